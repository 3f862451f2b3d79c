use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tracing::info;

use crate::cli::{Cli, OutputFormat, ScopeArgs};
use crate::commands::{build_service, scoped_config, CommandError, Result};
use crate::output::{format_output, print_source_status, OutputData, SearchPage};

fn spinner(message: String) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner());
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

pub async fn run(
    cli: &Cli,
    name: &str,
    scope: &ScopeArgs,
    page: usize,
    page_size: usize,
    count: Option<usize>,
    status: bool,
) -> Result<()> {
    if page_size == 0 {
        return Err(CommandError::InvalidInput(
            "--page-size must be greater than 0".to_string(),
        ));
    }

    let (config, mode) = scoped_config(cli, scope)?;
    let service = build_service(config)?;

    let progress = matches!(cli.output, OutputFormat::Pretty)
        .then(|| spinner(format!("Searching for '{}'...", name)));

    let desired = count.unwrap_or_else(|| page.saturating_add(1).saturating_mul(page_size));
    let result = service
        .discover_and_search(name, scope.context.as_deref(), mode, desired)
        .await;
    let session = match result {
        Ok(session) => session,
        Err(e) => {
            if let Some(progress) = &progress {
                progress.finish_and_clear();
            }
            return Err(e.into());
        }
    };
    let window = session.page(page, page_size).await;
    let summary = session.summary().await;
    if let Some(progress) = &progress {
        progress.finish_and_clear();
    }

    info!(
        name,
        items = summary.total_items,
        rounds = summary.rounds,
        "search finished"
    );
    let all_failed = summary.all_failed();

    let data = OutputData::SearchResults(Box::new(SearchPage {
        page,
        page_size,
        has_more: window.has_more,
        items: window.items,
        summary,
    }));
    format_output(&data, &cli.output)?;

    if status && matches!(cli.output, OutputFormat::Pretty) {
        if let OutputData::SearchResults(page) = &data {
            println!();
            print_source_status(&page.summary);
        }
    }
    if all_failed {
        eprintln!(
            "{} every source failed; rerun with {} for details",
            "Warning:".yellow().bold(),
            "-v".cyan()
        );
    }
    Ok(())
}
