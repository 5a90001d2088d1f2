use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod app;
mod auth;
mod config;
mod db;
mod error;
mod extract;
mod images;
mod recipe;
mod state;
mod storage;
mod user;

use crate::config::AppConfig;
use crate::state::AppState;
use crate::user::{dto::CreateUserRequest, services as users};

const DEFAULT_DB_ATTEMPTS: u32 = 30;

#[derive(Parser)]
#[command(name = "recipe-api", about = "Recipe REST API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run migrations and serve the HTTP API (default).
    Serve {
        #[arg(long, default_value_t = DEFAULT_DB_ATTEMPTS)]
        db_attempts: u32,
    },
    /// Block until the database accepts connections.
    WaitForDb {
        #[arg(long, default_value_t = DEFAULT_DB_ATTEMPTS)]
        attempts: u32,
        #[arg(long, default_value_t = 1000)]
        delay_ms: u64,
    },
    /// Create a staff superuser.
    CreateSuperuser {
        #[arg(long, env = "SUPERUSER_EMAIL")]
        email: String,
        #[arg(long, env = "SUPERUSER_PASSWORD")]
        password: String,
        #[arg(long, default_value = "")]
        name: String,
    },
}

impl Cli {
    fn command_or_serve(self) -> Command {
        self.command.unwrap_or(Command::Serve {
            db_attempts: DEFAULT_DB_ATTEMPTS,
        })
    }
}

const DEFAULT_LOG_FILTER: &str = "recipe_api=debug,axum=info,tower_http=info";

/// `RUST_LOG` overrides the default filter; `LOG_FORMAT=json` switches to
/// one JSON object per line.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().with_target(false).with_current_span(true).init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();
    match cli.command_or_serve() {
        Command::Serve { db_attempts } => {
            let config = AppConfig::from_env()?;
            let state = AppState::init(config, db_attempts).await?;
            db::migrate(&state.db).await?;
            app::serve(app::build_app(state)).await?;
        }
        Command::WaitForDb { attempts, delay_ms } => {
            let url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
            db::wait_for_db(&url, attempts, Duration::from_millis(delay_ms)).await?;
        }
        Command::CreateSuperuser {
            email,
            password,
            name,
        } => {
            let url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
            let pool = db::connect(&url).await?;
            db::migrate(&pool).await?;
            let input = users::validate_new_user(CreateUserRequest {
                email: Some(email),
                password: Some(password),
                name: Some(name),
            })
            .map_err(|e| anyhow::anyhow!("{e}"))?;
            let user = users::create_user(&pool, &input, true)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            tracing::info!(user_id = %user.id, email = %user.email, "superuser created");
        }
    }

    Ok(())
}
