//! CLI definitions for xlens.
//!
//! Uses clap for argument parsing with derive macros.

use crate::model::Producer;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// xlens - per-account views over X archive analysis artifacts
#[derive(Parser, Debug)]
#[command(name = "xlens")]
#[command(version)]
#[command(about = "Summary, cluster, thread and embedding views of analyzed X archives")]
#[command(long_about = r#"
xlens reads the artifacts an offline analysis job leaves for each account
(a tweet table, a cluster hierarchy, conversation trees, an embedding matrix
and a handful of JSON companions) and turns them into JSON views.

Artifacts live under <account>/<file> in a directory tree or behind an HTTP
base URL.

Quick start:
  1. xlens --root ./data list
  2. xlens --root ./data bundle <account>
  3. xlens --root ./data clusters <account> --compact
"#)]
pub struct Cli {
    /// Root directory of a filesystem store
    #[arg(long, env = "XLENS_ROOT", global = true)]
    pub root: Option<PathBuf>,

    /// Base URL of an HTTP store (switches the backend to http)
    #[arg(long, env = "XLENS_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// Config file to use instead of ~/.config/xlens/config.toml
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Be verbose (-v debug, -vv trace)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Be quiet (errors only)
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Print JSON on one line
    #[arg(long, global = true)]
    pub compact: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the accounts in the store
    List,

    /// Print all four views of an account
    Bundle(AccountArgs),

    /// Print the account summary
    Summary(AccountArgs),

    /// Print the level-0 clusters
    Clusters(AccountArgs),

    /// Print the reconstructed threads
    Threads(AccountArgs),

    /// Print the 2-D embedding projection
    Embeddings(AccountArgs),

    /// Show or manage configuration
    Config(ConfigArgs),
}

#[derive(Args, Debug)]
pub struct AccountArgs {
    /// Account prefix in the store
    pub account: String,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Print a default config file instead of the effective configuration
    #[arg(long)]
    pub init: bool,

    /// Output format for the effective configuration
    #[arg(long, short = 'f', default_value = "toml")]
    pub format: ConfigFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConfigFormat {
    #[default]
    Toml,
    Json,
}

impl Commands {
    /// The producer a single-view command runs, if any.
    #[must_use]
    pub const fn producer(&self) -> Option<Producer> {
        match self {
            Self::Summary(_) => Some(Producer::Summary),
            Self::Clusters(_) => Some(Producer::Clusters),
            Self::Threads(_) => Some(Producer::Threads),
            Self::Embeddings(_) => Some(Producer::Embeddings),
            Self::List | Self::Bundle(_) | Self::Config(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["xlens", "clusters", "alice", "--root", "/tmp/x", "-vv", "--compact"]);
        assert_eq!(cli.root, Some(PathBuf::from("/tmp/x")));
        assert_eq!(cli.verbose, 2);
        assert!(cli.compact);
        assert_eq!(cli.command.producer(), Some(Producer::Clusters));
    }

    #[test]
    fn quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["xlens", "-q", "-v", "list"]).is_err());
    }

    #[test]
    fn config_init_flag() {
        let cli = Cli::parse_from(["xlens", "config", "--init"]);
        match cli.command {
            Commands::Config(args) => {
                assert!(args.init);
                assert_eq!(args.format, ConfigFormat::Toml);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
