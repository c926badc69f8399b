//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// ReelForge - turns highlight moments into generated media sequences
#[derive(Parser)]
#[command(
    name = "rf",
    about = "Moment-to-media generation orchestrator",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage sessions
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },

    /// Analyze and generate a session in the foreground
    Run {
        /// Session ID (or partial match)
        id: String,
    },

    /// Regenerate one sequence of a completed session
    Regenerate {
        /// Session ID (or partial match)
        id: String,

        /// Moment number (1-based)
        moment: usize,

        /// Sequence order within the moment
        order: u32,
    },

    /// Print the cost/time estimate for a plan file
    Estimate {
        /// Plan JSON file
        plan: PathBuf,
    },
}

/// Session management subcommands
#[derive(Debug, Subcommand)]
pub enum SessionCommand {
    /// Create an uploaded session from a moments file
    Create {
        /// JSON file with a title and highlight list
        moments: PathBuf,
    },

    /// Show one session
    Show {
        /// Session ID (or partial match)
        id: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List all sessions
    List,
}

/// Output format for show commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text, json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Get the log file path
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reelforge")
        .join("logs")
        .join("reelforge.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["rf"]).is_err());
    }

    #[test]
    fn test_cli_parse_session_create() {
        let cli = Cli::try_parse_from(["rf", "session", "create", "moments.json"]).unwrap();
        match cli.command {
            Command::Session {
                command: SessionCommand::Create { moments },
            } => assert_eq!(moments, PathBuf::from("moments.json")),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_parse_show_json() {
        let cli = Cli::try_parse_from(["rf", "session", "show", "abc", "--format", "json"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Session {
                command: SessionCommand::Show {
                    format: OutputFormat::Json,
                    ..
                }
            }
        ));
    }

    #[test]
    fn test_cli_parse_regenerate() {
        let cli = Cli::try_parse_from(["rf", "regenerate", "abc", "2", "3"]).unwrap();
        match cli.command {
            Command::Regenerate { id, moment, order } => {
                assert_eq!(id, "abc");
                assert_eq!(moment, 2);
                assert_eq!(order, 3);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_cli_with_config() {
        let cli = Cli::try_parse_from(["rf", "-c", "/tmp/rf.yml", "estimate", "plan.json"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/rf.yml")));
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!("TEXT".parse::<OutputFormat>(), Ok(OutputFormat::Text));
        assert_eq!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert!("table".parse::<OutputFormat>().is_err());
    }
}
