//! CLI interface for Docent
//!
//! This module provides the command-line interface using clap's derive API.
//! Every command runs one operation against the configured memory backend and
//! exits; session history persists between invocations through that backend.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Docent document assistant
///
/// Answers questions from your documents with page citations, runs configured
/// actions, and remembers conversation context per session.
#[derive(Parser, Debug)]
#[command(name = "docent")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ask a question or request an action
    Ask {
        /// What to ask
        input: String,

        /// Caller identity
        #[arg(short, long, default_value = "local")]
        user: String,

        /// Session to continue; a new one is started when omitted
        #[arg(short, long)]
        session: Option<String>,

        /// Print the reasoning trace after the answer
        #[arg(long)]
        trace: bool,
    },

    /// Manage sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Show the stored turns of a session
    History {
        #[arg(short, long, default_value = "local")]
        user: String,

        #[arg(short, long)]
        session: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Session management actions
#[derive(Subcommand, Debug)]
pub enum SessionAction {
    /// Start a new session and print its id
    New {
        #[arg(short, long, default_value = "local")]
        user: String,
    },

    /// Close a session and drop its stored history
    Close {
        #[arg(short, long, default_value = "local")]
        user: String,

        #[arg(short, long)]
        session: String,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Print the configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["docent", "--json", "--log", "debug", "config", "show"]);
        assert!(cli.json);
        assert_eq!(cli.log, Some("debug".to_string()));
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_ask_command() {
        let cli = Cli::parse_from([
            "docent",
            "ask",
            "what is the refund window?",
            "--user",
            "alice",
            "--session",
            "s1",
        ]);
        if let Command::Ask {
            input,
            user,
            session,
            trace,
        } = cli.command
        {
            assert_eq!(input, "what is the refund window?");
            assert_eq!(user, "alice");
            assert_eq!(session, Some("s1".to_string()));
            assert!(!trace);
        } else {
            panic!("Expected Ask command");
        }
    }

    #[test]
    fn test_ask_defaults() {
        let cli = Cli::parse_from(["docent", "ask", "hello"]);
        if let Command::Ask { user, session, .. } = cli.command {
            assert_eq!(user, "local");
            assert!(session.is_none());
        } else {
            panic!("Expected Ask command");
        }
    }

    #[test]
    fn test_session_close() {
        let cli = Cli::parse_from(["docent", "session", "close", "-s", "abc"]);
        if let Command::Session { action } = cli.command {
            if let SessionAction::Close { user, session } = action {
                assert_eq!(user, "local");
                assert_eq!(session, "abc");
            } else {
                panic!("Expected SessionAction::Close");
            }
        } else {
            panic!("Expected Session command");
        }
    }

    #[test]
    fn test_history_requires_session() {
        assert!(Cli::try_parse_from(["docent", "history"]).is_err());
    }
}
