use clap::Parser;
use colored::*;
use mira_widget::cli::Args;
use mira_widget::{web, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let mut config = Config::from_env();
    if let Some(path) = args.knowledge {
        config.knowledge_path = path;
    }

    eprintln!("{}", "  Mira widget server".bright_cyan().bold());
    if config.openrouter_api_key.is_none() {
        eprintln!(
            "{}",
            "  OPENROUTER_API_KEY not set — chat routes will answer with a config error"
                .yellow()
        );
    }
    if config.assemblyai_api_key.is_none() {
        eprintln!(
            "{}",
            "  ASSEMBLYAI_API_KEY not set — voice input disabled".yellow()
        );
    }

    web::serve(&args.host, args.port, config).await
}
