use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};
use notify_relay::database::models::UndecidedReason;
use notify_relay::store::RecordKind;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// SQLite database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Rules file, TOML or JSON (overrides RULES_PATH)
    #[arg(long, global = true)]
    pub rules: Option<PathBuf>,

    /// Directory for daily log files (overrides LOG_DIR)
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Log filter directive, e.g. "notify_relay=debug"
    #[arg(long, global = true)]
    pub log_filter: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Read newline-delimited raw notifications from stdin and process them
    Run,

    /// Print failed and undecided record counts
    Status,

    /// Print records as JSON lines
    List {
        /// failed or undecided
        kind: RecordKind,

        /// Only undecided records with this reason (e.g. NO_MATCH)
        #[arg(long)]
        reason: Option<UndecidedReason>,
    },

    /// Re-send failed records
    Retry {
        /// Retry a single record; all records when omitted
        #[arg(long)]
        id: Option<i64>,
    },

    /// Send an undecided record to a webhook
    Upload {
        #[arg(long)]
        id: i64,

        /// Webhook URL
        #[arg(long)]
        url: String,
    },

    /// Delete records
    Delete {
        /// failed or undecided
        kind: RecordKind,

        #[command(flatten)]
        target: DeleteTarget,
    },

    /// Print live record counts until Ctrl-C
    Watch,

    /// Load and validate the rules, then print a summary
    CheckRules,
}

#[derive(ClapArgs, Debug)]
#[group(required = true, multiple = false)]
pub struct DeleteTarget {
    /// Record ids to delete
    #[arg(long = "id", num_args = 1..)]
    pub ids: Vec<i64>,

    /// Delete every record of this kind
    #[arg(long)]
    pub all: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_list_with_reason() {
        let args = Args::parse_from(["notify-relay", "list", "undecided", "--reason", "NO_MATCH"]);
        match args.command {
            Commands::List { kind, reason } => {
                assert_eq!(kind, RecordKind::Undecided);
                assert_eq!(reason, Some(UndecidedReason::NoMatch));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_delete_ids() {
        let args = Args::parse_from(["notify-relay", "delete", "failed", "--id", "3", "--id", "7"]);
        match args.command {
            Commands::Delete { kind, target } => {
                assert_eq!(kind, RecordKind::Failed);
                assert_eq!(target.ids, [3, 7]);
                assert!(!target.all);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_delete_requires_target() {
        assert!(Args::try_parse_from(["notify-relay", "delete", "failed"]).is_err());
        assert!(Args::try_parse_from(["notify-relay", "delete", "failed", "--id", "1", "--all"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = Args::parse_from(["notify-relay", "status", "--database-url", "sqlite::memory:"]);
        assert_eq!(args.database_url.as_deref(), Some("sqlite::memory:"));
        assert!(matches!(args.command, Commands::Status));
    }
}
