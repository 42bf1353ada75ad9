use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
}

impl Config {
    /// Resolve the data directory, creating it if needed. `db_override`
    /// replaces the default `<data_dir>/foodlog.db`.
    pub fn load(db_override: Option<PathBuf>) -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "foodlog").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        let db_path = match db_override {
            Some(path) => path,
            None => {
                std::fs::create_dir_all(&data_dir).with_context(|| {
                    format!("Failed to create data directory: {}", data_dir.display())
                })?;
                data_dir.join("foodlog.db")
            }
        };

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        Ok(Config { db_path, data_dir })
    }
}
