use std::collections::HashMap;

use owo_colors::OwoColorize;
use tagweave_core::{ProfileStore, SourceProfile};

use crate::cli::{split_list, Cli, OutputFormat, ProfileAction};
use crate::commands::{CommandError, Result};
use crate::output::{format_output, OutputData, ProfileView};

fn view(
    profile: SourceProfile,
    store: &ProfileStore,
    saved: &HashMap<String, SourceProfile>,
) -> ProfileView {
    ProfileView {
        builtin: ProfileStore::is_builtin(&profile.name) && !saved.contains_key(&profile.name),
        effective_sources: profile.effective_sources(Some(store)),
        profile,
    }
}

pub async fn run(cli: &Cli, action: Option<ProfileAction>) -> Result<()> {
    let store = ProfileStore::new_default();
    match action.unwrap_or(ProfileAction::List) {
        ProfileAction::List => {
            let saved = store.load_all()?;
            let profiles = store
                .list_all()?
                .into_iter()
                .map(|p| view(p, &store, &saved))
                .collect();
            format_output(&OutputData::ProfileList(profiles), &cli.output)
        }
        ProfileAction::Show { name } => {
            let saved = store.load_all()?;
            let profile = store
                .load(&name)?
                .ok_or_else(|| CommandError::ProfileNotFound(name.clone()))?;
            format_output(&OutputData::Profile(view(profile, &store, &saved)), &cli.output)
        }
        ProfileAction::Save {
            name,
            sources,
            extends,
            add,
            exclude,
            mode,
            description,
        } => {
            if sources.is_none() && extends.is_none() {
                return Err(CommandError::InvalidInput(
                    "a profile needs --sources or --extends".to_string(),
                ));
            }
            if let Some(parent) = &extends {
                if store.load(parent)?.is_none() {
                    return Err(CommandError::ProfileNotFound(parent.clone()));
                }
            }
            let profile = SourceProfile {
                description,
                extends,
                add: add.as_deref().map(split_list).unwrap_or_default(),
                exclude: exclude.as_deref().map(split_list).unwrap_or_default(),
                safety_mode: mode,
                ..SourceProfile::new(name, sources.as_deref().map(split_list).unwrap_or_default())
            };
            store.save(&profile)?;
            if matches!(cli.output, OutputFormat::Pretty) {
                println!(
                    "{} profile {} saved to {}",
                    "✓".green(),
                    profile.name.cyan(),
                    store.path().display()
                );
            }
            Ok(())
        }
        ProfileAction::Delete { name } => {
            if store.delete(&name)? {
                println!("{} profile {} deleted", "✓".green(), name.cyan());
                Ok(())
            } else if ProfileStore::is_builtin(&name) {
                Err(CommandError::InvalidInput(format!(
                    "'{}' is a built-in profile and cannot be deleted",
                    name
                )))
            } else {
                Err(CommandError::ProfileNotFound(name))
            }
        }
    }
}
