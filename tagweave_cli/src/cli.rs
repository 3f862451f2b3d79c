use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tagweave_core::SafetyMode;

#[derive(Parser)]
#[command(name = "tagweave")]
#[command(about = "tagweave - find one character across many image boards")]
#[command(version)]
#[command(after_help = "\x1b[1;36mQuick Start:\x1b[0m
  tagweave search \"Anya\" --context \"Spy x Family\"   Search every enabled board
  tagweave tags \"Anya\" -c \"Spy x Family\"            Show the tags each board resolved
  tagweave sources                                  List the boards compiled in
  tagweave profiles                                 List source profiles

\x1b[1;36mConfiguration:\x1b[0m
  tagweave config show                              Show the effective configuration
  tagweave config init                              Write a default config file")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    pub output: OutputFormat,

    /// Configuration file (YAML, or TOML by extension)
    #[arg(long, global = true, env = "TAGWEAVE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose output (-v, -vv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Discover tags for a character and search every enabled source
    #[command(after_help = "\x1b[1;33mExamples:\x1b[0m
  tagweave search \"Anya\" --context \"Spy x Family\"
  tagweave search \"Anya Forger\" --page 2 --page-size 30
  tagweave search \"Rem\" -c \"Re:Zero\" --profile general --safety allow-unknown
  tagweave search \"Frieren\" -s danbooru,zerochan --output json")]
    Search {
        /// Character or entity name
        name: String,

        #[command(flatten)]
        scope: ScopeArgs,

        /// Zero-based page to show
        #[arg(long, default_value_t = 0)]
        page: usize,

        /// Items per page
        #[arg(long, default_value_t = 20)]
        page_size: usize,

        /// Items to gather before printing (default: enough for the page)
        #[arg(long)]
        count: Option<usize>,

        /// Print per-source status after the results
        #[arg(long)]
        status: bool,
    },

    /// Resolve per-source tags without fetching any images
    Tags {
        /// Character or entity name
        name: String,

        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// List the sources compiled into this binary
    #[command(alias = "ls")]
    Sources,

    /// Manage source profiles
    Profiles {
        #[command(subcommand)]
        action: Option<ProfileAction>,
    },

    /// Show or initialise the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Options shared by commands that run a query.
#[derive(clap::Args, Clone, Debug)]
pub struct ScopeArgs {
    /// Series or franchise the character belongs to
    #[arg(short, long)]
    pub context: Option<String>,

    /// Safety mode: safe, allow-unknown or unrestricted
    #[arg(short = 'm', long = "safety", alias = "mode")]
    pub mode: Option<SafetyMode>,

    /// Source profile (safe, general, everything or a saved one)
    #[arg(short, long)]
    pub profile: Option<String>,

    /// Comma-separated source ids, overriding the profile and config
    #[arg(short = 's', long = "sources")]
    pub sources: Option<String>,
}

#[derive(Subcommand, Clone)]
pub enum ProfileAction {
    /// List built-in and saved profiles
    List,
    /// Show a profile with its resolved sources
    Show { name: String },
    /// Save a profile
    Save {
        name: String,
        /// Comma-separated source ids
        #[arg(short, long)]
        sources: Option<String>,
        /// Profile to extend
        #[arg(long)]
        extends: Option<String>,
        /// Comma-separated sources added to the parent's
        #[arg(long)]
        add: Option<String>,
        /// Comma-separated sources removed from the parent's
        #[arg(long)]
        exclude: Option<String>,
        /// Default safety mode for searches using this profile
        #[arg(long = "safety")]
        mode: Option<SafetyMode>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Delete a saved profile
    Delete { name: String },
}

#[derive(Subcommand, Clone)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Print the configuration file path
    Path,
    /// Write the default configuration if no file exists
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable formatted output
    Pretty,
    /// JSON output
    Json,
    /// YAML output
    Yaml,
    /// Plain text output
    Text,
}

/// Split a comma-separated flag value, dropping blanks.
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
