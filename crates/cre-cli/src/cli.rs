use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cre",
    about = "Content reconciliation engine: image references, comment merges, entry ranking and the local journal",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Engine configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Resolve raw image references to canonical URLs
    Resolve(ResolveArgs),
    /// Merge the rich and authoritative comments of a post
    Merge(MergeArgs),
    /// Rank contest entries by votes
    Rank(RankArgs),
    /// Inspect or maintain a pending-write journal
    Journal(JournalArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
pub struct ResolveArgs {
    /// Raw references: paths, URLs, or JSON values
    #[arg(required = true)]
    pub refs: Vec<String>,
    #[arg(long)]
    pub base_url: Option<String>,
}

#[derive(Args)]
pub struct MergeArgs {
    /// JSON array of image-bearing comments
    pub rich: PathBuf,
    /// JSON array of authoritative comments, or an item detail object
    pub authoritative: PathBuf,
    #[arg(long, default_value = "post")]
    pub post_id: String,
    /// Output of an earlier `merge --format json`
    #[arg(long)]
    pub previous: Option<PathBuf>,
}

#[derive(Args)]
pub struct RankArgs {
    /// Output of `merge --format json`
    pub comments: PathBuf,
    /// Only show the winners
    #[arg(long)]
    pub winners: bool,
}

#[derive(Args)]
pub struct JournalArgs {
    #[command(subcommand)]
    pub action: JournalAction,
    /// Journal directory; defaults to the configured one
    #[arg(long)]
    pub dir: Option<PathBuf>,
    /// Journal namespace; defaults to the configured user
    #[arg(long)]
    pub user: Option<String>,
}

#[derive(Subcommand)]
pub enum JournalAction {
    /// List pending writes in replay order
    List,
    /// Remove a pending write by its local id
    Confirm { local_id: String },
    /// Rewrite the journal without confirmed entries
    Compact,
}
