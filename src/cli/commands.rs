//! CLI command definitions using clap.
//!
//! - build / report: intake, waiting for the run to finish
//! - status / history / show / list / runs: read-only queries
//! - check: health-check the active version
//! - rollback / deactivate: operator actions
//! - doctor: sandbox driver availability

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Anvil - regenerate, verify, audit and promote broken tools
#[derive(Parser, Debug)]
#[command(name = "anvil")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register a tool and build its first version
    Build {
        /// Tool name
        tool: String,

        /// What the tool should do
        #[arg(short, long)]
        intent: String,

        /// Declared contract, e.g. "(city: string) -> number"
        #[arg(short, long)]
        signature: String,
    },

    /// Report a runtime failure and repair the tool
    Report {
        /// Tool name
        tool: String,

        /// Error message or traceback from the failed call
        trace: String,
    },

    /// Show a tool's status
    Status {
        /// Tool name
        tool: String,
    },

    /// List a tool's versions, oldest first
    History {
        /// Tool name
        tool: String,
    },

    /// Print a version's source (the active one by default)
    Show {
        /// Tool name
        tool: String,

        /// Version sequence number
        #[arg(short, long)]
        seq: Option<u64>,
    },

    /// List all tools
    List,

    /// List a tool's archived pipeline runs
    Runs {
        /// Tool name
        tool: String,
    },

    /// Run the active version and start a repair if it fails
    Check {
        /// Tool name
        tool: String,
    },

    /// Re-promote a superseded version
    Rollback {
        /// Tool name
        tool: String,

        /// Version sequence number to restore
        seq: u64,
    },

    /// Stop accepting new versions for a tool
    Deactivate {
        /// Tool name
        tool: String,
    },

    /// Report which sandbox drivers are usable
    Doctor,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_requires_subcommand() {
        assert!(Cli::try_parse_from(["anvil"]).is_err());
    }

    #[test]
    fn test_cli_verbose_flag() {
        let cli = Cli::try_parse_from(["anvil", "-v", "list"]).unwrap();
        assert!(cli.is_verbose());
    }

    #[test]
    fn test_cli_config_option() {
        let cli = Cli::try_parse_from(["anvil", "-c", "/path/to/anvil.yml", "doctor"]).unwrap();
        assert_eq!(cli.config.as_ref(), Some(&PathBuf::from("/path/to/anvil.yml")));
    }

    #[test]
    fn test_build_command() {
        let cli = Cli::try_parse_from([
            "anvil",
            "build",
            "weather",
            "--intent",
            "fetch current temperature for a city",
            "--signature",
            "(city: string) -> number",
        ])
        .unwrap();
        match cli.command {
            Commands::Build { tool, intent, signature } => {
                assert_eq!(tool, "weather");
                assert!(intent.starts_with("fetch"));
                assert_eq!(signature, "(city: string) -> number");
            }
            _ => panic!("Expected build command"),
        }
    }

    #[test]
    fn test_build_requires_signature() {
        assert!(Cli::try_parse_from(["anvil", "build", "weather", "-i", "x"]).is_err());
    }

    #[test]
    fn test_report_command() {
        let cli = Cli::try_parse_from(["anvil", "report", "stock", "ConnectionError: refused"]).unwrap();
        match cli.command {
            Commands::Report { tool, trace } => {
                assert_eq!(tool, "stock");
                assert_eq!(trace, "ConnectionError: refused");
            }
            _ => panic!("Expected report command"),
        }
    }

    #[test]
    fn test_show_with_seq() {
        let cli = Cli::try_parse_from(["anvil", "show", "stock", "--seq", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::Show { seq: Some(3), .. }));
    }

    #[test]
    fn test_rollback_command() {
        let cli = Cli::try_parse_from(["anvil", "rollback", "stock", "2"]).unwrap();
        assert!(matches!(cli.command, Commands::Rollback { seq: 2, .. }));
        assert!(Cli::try_parse_from(["anvil", "rollback", "stock", "two"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["anvil", "status", "stock", "--verbose"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }
}
