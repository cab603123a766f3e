//! CLI entry point for webagent.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use webagent_core::{Agent, AgentConfig, SaveOptions};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    debug!(?args, "CLI arguments parsed");

    let config = match &args.config {
        Some(path) => AgentConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AgentConfig::default(),
    };
    let mut agent = Agent::new(config).context("creating agent")?;

    let format = args.cookie_format.into();
    if let Some(path) = &args.cookies
        && path.exists()
    {
        let loaded = agent
            .cookie_jar_mut()
            .load(path, format)
            .with_context(|| format!("loading cookies from {}", path.display()))?;
        info!(loaded, path = %path.display(), "cookies loaded");
    }

    let page = agent
        .get(&args.url)
        .await
        .with_context(|| format!("fetching {}", args.url))?;

    println!("{} {}", page.status(), page.uri());
    match page.title() {
        Some(title) => println!("title: {title}"),
        None => println!(
            "{} bytes{}",
            page.body().len(),
            page.content_type()
                .map(|ct| format!(" ({ct})"))
                .unwrap_or_default()
        ),
    }

    if let Some(path) = &args.cookies {
        agent
            .cookie_jar()
            .save(
                path,
                format,
                SaveOptions {
                    session: args.save_session,
                },
            )
            .with_context(|| format!("saving cookies to {}", path.display()))?;
        info!(cookies = agent.cookie_jar().len(), path = %path.display(), "cookies saved");
    }

    Ok(())
}
