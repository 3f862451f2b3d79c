use std::sync::Arc;

use serde::Serialize;
use tagweave_core::{
    AggregatorConfig, Item, ResolvedQuerySet, SessionSummary, SourceInfo, SourceProfile,
};

use crate::cli::OutputFormat;
use crate::commands::Result;

mod pretty;
pub use pretty::print_source_status;

/// One page of search results plus the session it came from.
#[derive(Debug, Clone, Serialize)]
pub struct SearchPage {
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
    pub items: Vec<Arc<Item>>,
    pub summary: SessionSummary,
}

/// A profile with its inheritance resolved.
#[derive(Debug, Clone, Serialize)]
pub struct ProfileView {
    #[serde(flatten)]
    pub profile: SourceProfile,
    pub builtin: bool,
    pub effective_sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum OutputData {
    SearchResults(Box<SearchPage>),
    ResolvedTags(ResolvedQuerySet),
    SourceList(Vec<SourceInfo>),
    ProfileList(Vec<ProfileView>),
    Profile(ProfileView),
    ConfigInfo { path: String, config: AggregatorConfig },
}

pub fn format_output(data: &OutputData, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(data)?);
        }
        OutputFormat::Yaml => {
            println!("{}", serde_yaml::to_string(data)?);
        }
        OutputFormat::Text => {
            format_text_output(data)?;
        }
        OutputFormat::Pretty => {
            pretty::format_pretty_output(data)?;
        }
    }
    Ok(())
}

/// Tab-separated lines, one record per line, for piping.
fn format_text_output(data: &OutputData) -> Result<()> {
    match data {
        OutputData::SearchResults(page) => {
            for item in &page.items {
                println!(
                    "{}\t{}\t{}\t{}",
                    item.source_id,
                    item.canonical_id,
                    item.quality_score,
                    item.content_url
                );
            }
        }
        OutputData::ResolvedTags(resolved) => {
            for (source, entry) in &resolved.sources {
                println!("{}\t{}", source, entry.tags.join(" "));
            }
        }
        OutputData::SourceList(sources) => {
            for source in sources {
                println!("{}\t{}", source.descriptor.id, source.descriptor.description);
            }
        }
        OutputData::ProfileList(profiles) => {
            for view in profiles {
                println!("{}\t{}", view.profile.name, view.effective_sources.join(","));
            }
        }
        OutputData::Profile(view) => {
            println!("{}\t{}", view.profile.name, view.effective_sources.join(","));
        }
        OutputData::ConfigInfo { path, config } => {
            println!("# {}", path);
            println!("{}", serde_yaml::to_string(config)?);
        }
    }
    Ok(())
}
