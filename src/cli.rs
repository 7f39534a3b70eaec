use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "llm-proxy", version, about = "Reverse proxy for LLM chat-completion APIs")]
pub struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Override the listen port from the configuration
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Enable debug logging
    #[arg(long)]
    pub debug: bool,

    /// Enable trace logging
    #[arg(long)]
    pub verbose: bool,
}
