use owo_colors::OwoColorize;
use tagweave_core::AggregatorConfig;

use crate::cli::{Cli, ConfigAction};
use crate::commands::{config_store, Result};
use crate::output::{format_output, OutputData};

pub async fn run(cli: &Cli, action: ConfigAction) -> Result<()> {
    let store = config_store(cli);
    match action {
        ConfigAction::Show => {
            let config = store.load()?;
            let data = OutputData::ConfigInfo {
                path: store.path().display().to_string(),
                config,
            };
            format_output(&data, &cli.output)
        }
        ConfigAction::Path => {
            println!("{}", store.path().display());
            Ok(())
        }
        ConfigAction::Init { force } => {
            if store.exists() && !force {
                println!(
                    "{} {} already exists (use {} to overwrite)",
                    "!".yellow(),
                    store.path().display(),
                    "--force".cyan()
                );
                return Ok(());
            }
            store.save(&AggregatorConfig::default())?;
            println!("{} wrote {}", "✓".green(), store.path().display());
            Ok(())
        }
    }
}
