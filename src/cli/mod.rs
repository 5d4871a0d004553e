//! CLI module for anvil - command-line interface and subcommands.

pub mod commands;

pub use commands::Cli;
