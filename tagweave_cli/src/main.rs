use std::process;

use clap::{CommandFactory, Parser};
use owo_colors::OwoColorize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod commands;
mod output;

use cli::{Cli, Commands};
use commands::*;

fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "tagweave_cli=info,tagweave_core=warn",
        1 => "tagweave_cli=debug,tagweave_core=info",
        _ => "tagweave_cli=trace,tagweave_core=debug",
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG wins over -v
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(cli.verbose).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let result = match &cli.command {
        None => {
            let _ = Cli::command().print_help();
            Ok(())
        }
        Some(Commands::Search {
            name,
            scope,
            page,
            page_size,
            count,
            status,
        }) => search::run(&cli, name, scope, *page, *page_size, *count, *status).await,
        Some(Commands::Tags { name, scope }) => tags::run(&cli, name, scope).await,
        Some(Commands::Sources) => sources::run(&cli).await,
        Some(Commands::Profiles { action }) => profiles::run(&cli, action.clone()).await,
        Some(Commands::Config { action }) => config::run(&cli, action.clone()).await,
    };

    if let Err(e) = result {
        eprintln!("{}: {}", "Error".red().bold(), e);
        process::exit(1);
    }
}
