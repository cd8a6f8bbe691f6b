use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rormatch")]
#[command(about = "Find the research organization behind an email address using registry, DNS and WHOIS evidence")]
#[command(version)]
pub struct Cli {
    /// Email address to match (prompted for when omitted)
    pub email: Option<String>,

    /// Maximum number of results to display
    #[arg(short, long, value_name = "N")]
    pub limit: Option<usize>,

    /// Print results as JSON instead of the text report
    #[arg(long)]
    pub json: bool,

    /// Configuration file (defaults to ./config/rormatch.toml, then the built-in defaults)
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Create default configuration file at ./config/rormatch.toml
    #[arg(long)]
    pub init: bool,

    /// Verbose logging (use -v for INFO, -vv for DEBUG with lookup details)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
