use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use rormatch::cli::Cli;
use rormatch::config::AppConfig;
use rormatch::export;
use rormatch::finder::OrganizationFinder;
use rormatch::funder::{fetch_funders, CrossrefClient};
use rormatch::logger::{candidate_progress, init_tracing, VerbosityLevel};
use rormatch::rate_limit::ServiceLimiters;

fn prompt_email() -> Result<String> {
    print!("Enter email address: ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input).context("Failed to read email address from stdin")?;
    Ok(input.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.init {
        match AppConfig::create_default_config() {
            Ok(path) => {
                println!("✅ Created default configuration file at: {}", path.display());
                println!("   Edit this file to customize settings, then run rormatch again.");
                std::process::exit(0);
            }
            Err(e) => {
                eprintln!("❌ Failed to create configuration file: {}", e);
                std::process::exit(1);
            }
        }
    }

    let verbosity = VerbosityLevel::from_verbose_count(cli.verbose);
    init_tracing(verbosity);

    let config = match AppConfig::resolve(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let email = match cli.email {
        Some(email) => email.trim().to_string(),
        None => prompt_email()?,
    };
    if email.is_empty() {
        eprintln!("❌ No email address provided");
        std::process::exit(1);
    }
    if !email.contains('@') {
        warn!("'{}' has no '@', treating the whole input as the domain", email);
    }

    let limiters = ServiceLimiters::from_config(&config.analysis);
    let mut finder = OrganizationFinder::from_config(&config, &limiters)?;

    let progress = candidate_progress(verbosity);
    if let Some(pb) = &progress {
        let pb = pb.clone();
        finder = finder.with_progress(Arc::new(move |done: usize, total: usize, name: &str| {
            pb.set_length(total as u64);
            pb.set_position(done as u64);
            pb.set_message(name.to_string());
        }));
    }

    let report = finder.find(&email).await;
    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    let shown = export::displayed(&report, cli.limit);
    let crossref = CrossrefClient::new(&config.funder.base_url, &config.http)
        .context("Failed to create funder client")?
        .with_rate_limit(limiters.http.clone());
    let funders = fetch_funders(&crossref, shown.iter().filter_map(|r| r.candidate.funder_id())).await;
    info!("Fetched funder metadata for {} organizations", funders.len());

    if cli.json {
        println!("{}", export::render_json(&report, cli.limit, &funders)?);
    } else {
        print!("{}", export::render_text(&report, cli.limit, &funders)?);
    }

    Ok(())
}
