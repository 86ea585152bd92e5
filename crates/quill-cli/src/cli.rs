use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Offline-first notes from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Optional path to local replica database
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// CLI profile name holding the API URL and credentials
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,

    /// Quick capture: quill "my thought here"
    #[arg(trailing_var_arg = true)]
    pub note: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new note
    #[command(alias = "new")]
    Add {
        /// Note body (read from stdin when omitted)
        body: Vec<String>,
        /// Note title
        #[arg(short, long)]
        title: Option<String>,
        /// Label name or ID; repeatable
        #[arg(short, long = "label", value_name = "LABEL")]
        labels: Vec<String>,
    },
    /// List recent notes
    List {
        /// Number of notes to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Only notes carrying this label
        #[arg(long)]
        label: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Search note titles and bodies
    Search {
        /// Search query
        query: String,
        /// Number of notes to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one note
    Show {
        /// Note ID or unique ID prefix
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change a note's title, body, or labels
    Edit {
        /// Note ID or unique ID prefix
        id: String,
        /// New title; an empty string clears it
        #[arg(short, long)]
        title: Option<String>,
        /// New body; an empty string clears it
        #[arg(short, long)]
        body: Option<String>,
        /// Replace the label set; repeatable
        #[arg(short, long = "label", value_name = "LABEL")]
        labels: Vec<String>,
        /// Remove every label
        #[arg(long, conflicts_with = "labels")]
        clear_labels: bool,
    },
    /// Move a note to the trash
    Delete {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// Bring a note back from the trash
    Restore {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// List deleted notes
    Trash {
        /// Number of notes to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a note from this device permanently
    Purge {
        /// Note ID
        id: String,
    },
    /// Manage labels
    Label {
        #[command(subcommand)]
        command: LabelCommands,
    },
    /// Sync the local replica with the API
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
        /// Only pull changes for this label
        #[arg(long)]
        label: Option<String>,
    },
    /// Configure CLI profiles
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
pub enum LabelCommands {
    /// Create a label
    Add {
        name: String,
        /// Color as #RRGGBB
        #[arg(long)]
        color: Option<String>,
    },
    /// List labels
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Rename or recolor a label
    Edit {
        /// Label name or ID
        label: String,
        /// New name
        #[arg(long)]
        name: Option<String>,
        /// New color as #RRGGBB
        #[arg(long)]
        color: Option<String>,
    },
    /// Delete a label and detach it from its notes
    Delete {
        /// Label name or ID
        label: String,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// Show pending changes and cursors
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sync periodically until interrupted
    Daemon,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Initialize or update profile config
    Init {
        /// Profile name to initialize
        #[arg(long, value_name = "NAME")]
        profile: Option<String>,
        /// API base URL
        #[arg(long, value_name = "URL")]
        api_url: Option<String>,
        /// Owner ID the token was issued for
        #[arg(long, value_name = "ID")]
        owner: Option<String>,
        /// Bearer token for the API
        #[arg(long, value_name = "TOKEN")]
        token: Option<String>,
        /// Keep current active profile instead of activating this one
        #[arg(long)]
        no_activate: bool,
    },
    /// Print the resolved profile
    Show,
}
