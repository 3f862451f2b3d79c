//! Pretty formatter for terminal output.

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use owo_colors::OwoColorize;
use tagweave_core::{SafetyRating, SourceStatus};

use super::{OutputData, ProfileView, SearchPage};
use crate::commands::Result;

/// Longest URL shown before truncation
const URL_WIDTH: usize = 72;

const TAG_WIDTH: usize = 48;

fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

pub fn format_pretty_output(data: &OutputData) -> Result<()> {
    match data {
        OutputData::SearchResults(page) => print_search_page(page),
        OutputData::ResolvedTags(resolved) => {
            print!("{} {}", "Tags for".dimmed(), resolved.name.cyan().bold());
            if let Some(context) = &resolved.context {
                print!(" {} {}", "in".dimmed(), context.cyan());
            }
            println!();
            println!();

            let mut table = table(vec!["Source", "Tags", "Fallback"]);
            for (source, entry) in &resolved.sources {
                let tags = entry
                    .candidates
                    .iter()
                    .map(|c| format!("{} ({:.0})", c.tag_string, c.match_score))
                    .collect::<Vec<_>>();
                let tags = if tags.is_empty() {
                    entry.tags.join(", ")
                } else {
                    tags.join(", ")
                };
                table.add_row(vec![
                    source.clone(),
                    tags,
                    if entry.used_fallback { "yes" } else { "" }.to_string(),
                ]);
            }
            println!("{}", table);
        }
        OutputData::SourceList(sources) => {
            println!("{}", "Available Sources".bold().cyan());
            println!();
            let mut table = table(vec!["Id", "Description", "Tag index", "Content"]);
            for source in sources {
                let d = &source.descriptor;
                let tier = if d.requires_elevated_context {
                    "restricted (unrestricted mode only)".to_string()
                } else {
                    format!("{:?}", d.safety_tier).to_lowercase()
                };
                table.add_row(vec![
                    d.id.clone(),
                    d.description.clone(),
                    if d.supports_tag_index { "yes" } else { "no" }.to_string(),
                    tier,
                ]);
            }
            println!("{}", table);
            println!();
            println!(
                "{} Use {} to query a subset",
                "Tip:".green().bold(),
                "tagweave search <name> -s danbooru,zerochan".cyan()
            );
        }
        OutputData::ProfileList(profiles) => {
            println!("{}", "Source Profiles".bold().cyan());
            println!();
            let mut table = table(vec!["Name", "Sources", "Mode", "Description"]);
            for view in profiles {
                table.add_row(profile_row(view));
            }
            println!("{}", table);
        }
        OutputData::Profile(view) => {
            let mut table = table(vec!["Name", "Sources", "Mode", "Description"]);
            table.add_row(profile_row(view));
            println!("{}", table);
            if let Some(parent) = &view.profile.extends {
                println!("{} {}", "extends".dimmed(), parent.cyan());
            }
        }
        OutputData::ConfigInfo { path, config } => {
            println!("{} {}", "Config file:".dimmed(), path);
            println!();
            println!("{}", serde_yaml::to_string(config)?);
        }
    }
    Ok(())
}

fn profile_row(view: &ProfileView) -> Vec<String> {
    let mut name = view.profile.name.clone();
    if view.builtin {
        name.push_str(" (built-in)");
    }
    vec![
        name,
        view.effective_sources.join(", "),
        view.profile
            .safety_mode
            .map(|m| m.as_str().to_string())
            .unwrap_or_default(),
        view.profile.description.clone().unwrap_or_default(),
    ]
}

fn print_search_page(page: &SearchPage) {
    let summary = &page.summary;
    print!("{} {}", "Search:".dimmed(), summary.name.cyan().bold());
    if let Some(context) = &summary.context {
        print!(" {} {}", "in".dimmed(), context.cyan());
    }
    println!(
        " {} {}",
        "mode:".dimmed(),
        summary.safety_mode.as_str().green()
    );
    println!();

    if page.items.is_empty() {
        println!("{}", "No results on this page.".yellow());
    }

    let offset = page.page * page.page_size;
    for (i, item) in page.items.iter().enumerate() {
        let rating = match item.safety_rating {
            SafetyRating::Safe => "safe".green().to_string(),
            SafetyRating::Unknown => "unrated".yellow().to_string(),
            SafetyRating::Restricted => "restricted".red().to_string(),
        };
        println!(
            "{:>4}. {} {}",
            (offset + i + 1).dimmed(),
            truncate_str(&item.content_url, URL_WIDTH).blue(),
            rating
        );

        let mut meta = vec![
            format!("{}#{}", item.source_id, item.canonical_id),
            format!("score {}", item.quality_score),
        ];
        if let (Some(w), Some(h)) = (item.width, item.height) {
            meta.push(format!("{}x{}", w, h));
        }
        if let Some(attribution) = &item.attribution {
            meta.push(truncate_str(attribution, 32));
        }
        println!("      {}", meta.join(" · ").dimmed());

        if !item.tags.is_empty() {
            let tags = item.tags.iter().cloned().collect::<Vec<_>>().join(" ");
            println!("      {}", truncate_str(&tags, TAG_WIDTH).dimmed());
        }
    }

    println!();
    println!(
        "{} {} of {} items fetched{}",
        "Page".dimmed(),
        page.page,
        summary.total_items,
        if page.has_more {
            format!(", next: --page {}", page.page + 1)
        } else {
            ", no more results".to_string()
        }
    );

    let degraded: Vec<String> = summary
        .source_status
        .iter()
        .filter(|(_, status)| **status != SourceStatus::Ok)
        .map(|(id, status)| match status {
            SourceStatus::Failed => format!("{} failed", id).red().to_string(),
            _ => format!("{} degraded", id).yellow().to_string(),
        })
        .collect();
    if !degraded.is_empty() {
        println!("{} {}", "Sources:".dimmed(), degraded.join(", "));
    }
}

/// Print a per-source health table.
pub fn print_source_status(summary: &tagweave_core::SessionSummary) {
    let mut table = table(vec!["Source", "Status", "Pages ok", "Failed", "Cancelled", "Items", "Last error"]);
    for (id, health) in &summary.health {
        let status = match health.status() {
            SourceStatus::Ok => "ok".green().to_string(),
            SourceStatus::Degraded => "degraded".yellow().to_string(),
            SourceStatus::Failed => "failed".red().to_string(),
        };
        table.add_row(vec![
            id.clone(),
            status,
            health.pages_ok.to_string(),
            health.pages_failed.to_string(),
            health.pages_cancelled.to_string(),
            health.items.to_string(),
            health.last_error.clone().unwrap_or_default(),
        ]);
    }
    println!("{}", table);
}

fn truncate_str(s: &str, max_len: usize) -> String {
    let first_line = s.lines().next().unwrap_or(s);
    if first_line.chars().count() <= max_len {
        first_line.to_string()
    } else {
        let truncated: String = first_line.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}
