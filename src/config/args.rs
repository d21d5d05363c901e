//! CLI argument parsing using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// aaudio-share - shared-mode audio endpoint
///
/// Multiplex several client streams onto one exclusive device stream
#[derive(Parser, Debug)]
#[command(name = "aaudio-share")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Verbose output (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode - only show errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log output to file
    #[arg(long, global = true)]
    pub log: Option<String>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run clients against a simulated device through a shared endpoint
    Run {
        /// Configuration file (default: <config dir>/aaudio-share/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// How long to run, in seconds
        #[arg(short, long, default_value = "3")]
        seconds: u64,

        /// Number of output clients when the config lists none
        #[arg(long, default_value = "2")]
        clients: usize,
    },

    /// Print a sample configuration file
    SampleConfig,

    /// Validate a set of stream parameters and print the result code
    Validate {
        /// Channel count (0 = unspecified)
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        channels: i32,

        /// Sample rate in Hz (0 = unspecified)
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        rate: i32,

        /// Sample format: float, i16 or unspecified
        #[arg(long, default_value = "unspecified")]
        format: String,

        /// Direction: output or input
        #[arg(long, default_value = "output")]
        direction: String,

        /// Sharing mode: shared or exclusive
        #[arg(long, default_value = "shared")]
        sharing: String,

        /// Device id (0 = default device)
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        device: i32,

        /// Buffer capacity in frames (0 = default)
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        capacity: i32,
    },
}

impl Args {
    /// Get the log level based on verbose/quiet flags
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else {
            match self.verbose {
                0 => tracing::Level::INFO,
                1 => tracing::Level::DEBUG,
                _ => tracing::Level::TRACE,
            }
        }
    }
}

impl Default for Command {
    fn default() -> Self {
        Command::Run {
            config: None,
            seconds: 3,
            clients: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_flags() {
        let args = Args::parse_from(["aaudio-share", "-vv"]);
        assert_eq!(args.log_level(), tracing::Level::TRACE);
        let args = Args::parse_from(["aaudio-share", "-q", "run"]);
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }

    #[test]
    fn test_validate_accepts_negative_values() {
        let args = Args::parse_from(["aaudio-share", "validate", "--device", "-1"]);
        match args.command {
            Some(Command::Validate { device, .. }) => assert_eq!(device, -1),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_default_command_is_run() {
        assert!(matches!(Command::default(), Command::Run { seconds: 3, .. }));
    }
}
