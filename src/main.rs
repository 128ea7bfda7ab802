use anyhow::Result;
use std::io::Write;
use tracing_subscriber::EnvFilter;

mod actions;
mod app;
mod cache;
mod config;
mod session;
mod tmux;

use actions::{help_text, Action};
use app::App;
use config::{config_path, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; stdout is reserved for listings
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let action = match Action::parse(&args) {
        Ok(action) => action,
        Err(e) => {
            let path = config_path()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            let mut err = std::io::stderr().lock();
            writeln!(err, "{}\n", e)?;
            write!(err, "{}", help_text(&path))?;
            std::process::exit(2);
        }
    };

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "falling back to default config");
            Config::default()
        }
    };

    let app = App::from_config(config)?;
    let mut out = std::io::stdout().lock();
    app.handle_action(action, &mut out).await?;
    out.flush()?;
    Ok(())
}
