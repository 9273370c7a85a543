use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mira-widget")]
#[command(version = "1.3.0")]
#[command(about = "Embeddable marketing chat widget with a live generated content panel")]
pub struct Args {
    /// Address to bind the widget server on
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port for the widget server
    #[arg(long, default_value = "5000")]
    pub port: u16,

    /// Path to the knowledge base file (falls back to the built-in profile)
    #[arg(long)]
    pub knowledge: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["mira-widget"]);
        assert_eq!(args.host, "127.0.0.1");
        assert_eq!(args.port, 5000);
        assert!(args.knowledge.is_none());
    }

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "mira-widget",
            "--host",
            "0.0.0.0",
            "--port",
            "8080",
            "--knowledge",
            "facts.md",
        ]);
        assert_eq!(args.host, "0.0.0.0");
        assert_eq!(args.port, 8080);
        assert_eq!(args.knowledge, Some(PathBuf::from("facts.md")));
    }
}
