use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// SilentPort: keep rarely used apps off the network
///
/// Tracks how recently each installed app was used, blocks the network for
/// apps that sit idle and reminds you about apps worth disabling.
#[derive(Debug, Parser, Clone)]
#[command(about, long_about, version)]
pub struct Cli {
    /// Path to configuration file.
    #[arg(short, long, value_parser = validate_file)]
    pub conffile: Option<PathBuf>,

    /// File to load and save application state to.
    ///
    /// Empty string means state is stored in memory.
    #[arg(short, long)]
    pub statefile: Option<String>,

    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the daemon: periodic usage passes, timers and enforcement.
    Run {
        /// JSON usage snapshot standing in for the device's usage history.
        #[arg(short, long, value_parser = validate_file)]
        usage: PathBuf,
    },
    /// Run a single usage pass and sync the block list.
    Refresh {
        #[arg(short, long, value_parser = validate_file)]
        usage: PathBuf,
    },
    /// Print the firewall state and settings.
    Status,
    /// Enable the firewall in allowing mode.
    Enable {
        /// Seconds before blocking starts. Defaults to the configured window.
        #[arg(short, long, value_parser = parse_seconds)]
        allow: Option<Duration>,
        /// Packages to block. Defaults to the current block set.
        packages: Vec<String>,
    },
    /// Allow traffic for a while, then block automatically.
    Allow {
        #[arg(short = 'f', long = "for", value_parser = parse_seconds)]
        duration: Duration,
        packages: Vec<String>,
    },
    /// Block immediately.
    BlockNow { packages: Vec<String> },
    /// Replace the block set without changing the mode.
    Block { packages: Vec<String> },
    /// Turn the firewall off.
    Disable,
    /// Let one package through for a while.
    Unblock {
        package: String,
        #[arg(short = 'f', long = "for", value_parser = parse_seconds)]
        duration: Option<Duration>,
    },
    /// Replace the set of packages that are never blocked.
    Whitelist { packages: Vec<String> },
    /// Change user settings.
    Settings {
        /// Idle time in seconds after which an app counts as rarely used.
        #[arg(long, value_parser = parse_seconds)]
        allow_duration: Option<Duration>,
        /// Keep blocked apps blocked until unblocked by hand.
        #[arg(long)]
        manual_unblock: Option<bool>,
    },
}

/// Check if the file exists.
#[inline(always)]
fn validate_file(file: &str) -> Result<PathBuf, String> {
    let path = Path::new(file);
    if path.exists() {
        Ok(path.to_owned())
    } else {
        Err(format!("File not found: {:?}", path))
    }
}

/// Parse a positive number of seconds.
fn parse_seconds(secs: &str) -> Result<Duration, String> {
    let secs: u64 = secs
        .parse()
        .map_err(|_| format!("`{secs}` is not a number of seconds"))?;
    if secs == 0 {
        return Err("Duration must be positive".to_string());
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_unblock_with_duration() {
        let cli = Cli::try_parse_from(["silentport", "-vv", "unblock", "org.example", "--for", "600"])
            .unwrap();
        match cli.command {
            Command::Unblock { package, duration } => {
                assert_eq!(package, "org.example");
                assert_eq!(duration, Some(Duration::from_secs(600)));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_zero_duration() {
        assert!(Cli::try_parse_from(["silentport", "allow", "--for", "0"]).is_err());
    }
}
