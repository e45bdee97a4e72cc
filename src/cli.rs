use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::bridge::context::DEFAULT_URL;

#[derive(Parser)]
#[command(
    name = "sessionlinkd",
    about = "Bridge a chroot graphical session to the host desktop"
)]
pub struct Cli {
    /// Preferences file (default: $XDG_CONFIG_HOME/sessionlinkd/prefs.toml)
    #[arg(long, global = true)]
    pub prefs: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the bridge daemon
    Run {
        /// WebSocket endpoint of the chroot-side server
        #[arg(long, default_value = DEFAULT_URL)]
        url: String,

        /// Seconds between reconnect attempts
        #[arg(long, default_value_t = 5)]
        retry_secs: u64,

        /// Keep debug entries in the status log and start viewers in
        /// debug mode
        #[arg(long)]
        debug: bool,

        /// Viewer command for display surfaces; the launch query is
        /// appended as the last argument
        #[arg(long, num_args = 1.., default_value = "sessionlink-viewer")]
        viewer: Vec<String>,
    },

    /// Enable the bridge (a running daemon picks this up on SIGHUP)
    Enable,

    /// Disable the bridge
    Disable,

    /// Turn native-resolution rendering on or off
    Hidpi {
        #[arg(action = clap::ArgAction::Set)]
        on: bool,
    },

    /// Print the current preferences
    Prefs,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from(["sessionlinkd", "run"]).unwrap();
        let Command::Run {
            url,
            retry_secs,
            debug,
            viewer,
        } = cli.command
        else {
            panic!("expected run");
        };
        assert_eq!(url, DEFAULT_URL);
        assert_eq!(retry_secs, 5);
        assert!(!debug);
        assert_eq!(viewer, vec!["sessionlink-viewer"]);
        assert!(cli.prefs.is_none());
    }

    #[test]
    fn viewer_takes_several_words() {
        let cli = Cli::try_parse_from([
            "sessionlinkd",
            "run",
            "--viewer",
            "flatpak",
            "run",
            "org.example.Viewer",
        ])
        .unwrap();
        let Command::Run { viewer, .. } = cli.command else {
            panic!("expected run");
        };
        assert_eq!(viewer, vec!["flatpak", "run", "org.example.Viewer"]);
    }

    #[test]
    fn hidpi_takes_bool() {
        let cli = Cli::try_parse_from(["sessionlinkd", "hidpi", "true"]).unwrap();
        assert!(matches!(cli.command, Command::Hidpi { on: true }));
        assert!(Cli::try_parse_from(["sessionlinkd", "hidpi", "maybe"]).is_err());
    }

    #[test]
    fn global_prefs_path() {
        let cli = Cli::try_parse_from(["sessionlinkd", "disable", "--prefs", "/tmp/p.toml"]).unwrap();
        assert_eq!(cli.prefs, Some(PathBuf::from("/tmp/p.toml")));
    }
}
