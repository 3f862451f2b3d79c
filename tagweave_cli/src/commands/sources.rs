use tagweave_core::build_registry_enabled_only;

use crate::cli::Cli;
use crate::commands::{config_store, Result};
use crate::output::{format_output, OutputData};

pub async fn run(cli: &Cli) -> Result<()> {
    let config = config_store(cli).load()?;
    let registry = build_registry_enabled_only(&config)?;
    let sources = registry
        .list_sources()
        .into_iter()
        .filter(|s| config.is_enabled(&s.descriptor.id))
        .collect();
    format_output(&OutputData::SourceList(sources), &cli.output)
}
