pub mod agent;
pub mod config;
pub mod db;
pub mod llm;

use std::io::{self, BufRead, Write};

use tracing_subscriber::EnvFilter;

use agent::{AgentDeps, AgentRegistry, TurnRequest};
use config::AgentConfig;

/// User id for stdin turns when `CARELOG_USER_ID` is unset.
const DEFAULT_USER_ID: &str = "local";

pub fn run() {
    // Logs go to stderr so stdout stays one JSON result per line
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .with_writer(io::stderr)
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    if let Err(e) = serve_stdin() {
        tracing::error!(error = %e, "Carelog stopped");
        std::process::exit(1);
    }
}

#[derive(Debug, thiserror::Error)]
enum RunError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Agent(#[from] agent::AgentError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// One turn per non-empty stdin line; each result is printed as JSON.
fn serve_stdin() -> Result<(), RunError> {
    let config = AgentConfig::from_env()?;
    let deps = AgentDeps::connect(&config)?;
    let registry = AgentRegistry::from_config(&config, deps);
    let user_id = std::env::var("CARELOG_USER_ID").unwrap_or_else(|_| DEFAULT_USER_ID.to_string());

    tracing::info!(
        user_id = %user_id,
        model = %config.model_name,
        db_path = %config.db_path.display(),
        "Reading messages from stdin"
    );

    let stdout = io::stdout();
    for line in io::stdin().lock().lines() {
        let line = line?;
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        let result = registry.process_turn(&user_id, TurnRequest::new(message));
        let mut out = stdout.lock();
        writeln!(out, "{}", serde_json::to_string(&result)?)?;
        out.flush()?;
    }
    Ok(())
}
