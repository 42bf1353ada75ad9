mod commands;
mod config;
mod telegram;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use crate::commands::{cmd_chat, cmd_foods, cmd_goal, cmd_summary, cmd_weekly};
use crate::config::Config;
use crate::telegram::TelegramBot;
use foodlog_core::db::Database;
use foodlog_core::dialog::DialogController;
use foodlog_core::service::FoodLogService;

#[derive(Parser)]
#[command(
    name = "foodlog",
    version,
    about = "A conversational daily food and calorie log"
)]
struct Cli {
    /// Path to the SQLite database (default: <data dir>/foodlog.db)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the Telegram bot (long polling)
    Bot {
        /// Telegram Bot API token
        #[arg(long, env = "FOODLOG_BOT_TOKEN", hide_env_values = true)]
        token: String,
        /// Long-poll timeout in seconds
        #[arg(long, default_value = "30")]
        poll_timeout: u64,
    },
    /// Talk to the bot from the terminal as the given user
    Chat {
        /// User ID to act as
        #[arg(short, long)]
        user: i64,
    },
    /// Show a daily summary (defaults to today)
    Summary {
        #[arg(short, long)]
        user: i64,
        /// Date to show (YYYY-MM-DD, today or yesterday)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the seven days ending at a date (defaults to today)
    Weekly {
        #[arg(short, long)]
        user: i64,
        /// Last day of the week (YYYY-MM-DD, today or yesterday)
        #[arg(long)]
        end: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the foods a user can log
    Foods {
        #[arg(short, long)]
        user: i64,
        /// Only the user's own foods
        #[arg(long)]
        mine: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set a user's daily calorie goal
    Goal {
        #[arg(short, long)]
        user: i64,
        /// Daily calorie goal in kcal
        kcal: f64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.db)?;
    tracing::debug!(
        data_dir = %config.data_dir.display(),
        db = %config.db_path.display(),
        "configuration loaded"
    );
    let db = Database::open(&config.db_path)
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))?;
    let service = FoodLogService::with_database(Arc::new(db));

    match cli.command {
        Commands::Bot {
            token,
            poll_timeout,
        } => {
            let bot = TelegramBot::new(token, poll_timeout)?;
            let controller = DialogController::with_sqlite_sessions(service);
            telegram::run(bot, controller).await
        }
        Commands::Chat { user } => {
            let controller = DialogController::with_sqlite_sessions(service);
            cmd_chat(&controller, user)
        }
        Commands::Summary { user, date, json } => cmd_summary(&service, user, date, json),
        Commands::Weekly { user, end, json } => cmd_weekly(&service, user, end, json),
        Commands::Foods { user, mine, json } => cmd_foods(&service, user, mine, json),
        Commands::Goal { user, kcal, json } => cmd_goal(&service, user, kcal, json),
    }
}
