use clap::{Parser, Subcommand};
use std::path::PathBuf;

const TAGLINE: &str = "Launch external scans, ingest their reports and correlate services with known CVEs";

#[derive(Parser, Debug)]
#[command(name = "scanlink")]
#[command(version)]
#[command(about = TAGLINE, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the external scanner against a target and stream its output
    Launch {
        /// IP, hostname or URL to scan
        target: String,

        /// User the scan is launched for
        #[arg(long, default_value_t = 1)]
        user_id: u64,
    },

    /// Ingest a scanner report (JSON) and correlate it with the CVE database
    Ingest {
        /// Report file, or "-" to read from stdin
        report: PathBuf,

        /// User the scan belongs to
        #[arg(long)]
        user_id: Option<u64>,
    },

    /// List stored scans, newest first
    List {
        #[arg(long, default_value_t = 0)]
        page: usize,

        #[arg(long, default_value_t = 10)]
        size: usize,
    },

    /// Show one scan with all of its findings
    Show { id: u64 },

    /// Delete a scan and everything it owns
    Delete { id: u64 },
}

pub fn parse() -> Args {
    Args::parse()
}
