pub mod db;
pub mod dialog;
pub mod error;
pub mod models;
pub mod render;
pub mod service;
pub mod session;

pub use error::{Error, Result};
