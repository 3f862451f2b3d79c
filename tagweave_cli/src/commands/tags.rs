use crate::cli::{Cli, ScopeArgs};
use crate::commands::{build_service, scoped_config, Result};
use crate::output::{format_output, OutputData};

pub async fn run(cli: &Cli, name: &str, scope: &ScopeArgs) -> Result<()> {
    let (config, mode) = scoped_config(cli, scope)?;
    let service = build_service(config)?;
    let resolved = service
        .discover(name, scope.context.as_deref(), mode)
        .await?;
    format_output(&OutputData::ResolvedTags((*resolved).clone()), &cli.output)
}
