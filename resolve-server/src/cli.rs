//! Command-line surface (spec §6). Grounded on the example pack's
//! `clap`-derive usage rather than the teacher's own long-retired
//! `docopt` CLI (SPEC_FULL §11 dependency ledger).

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "resolved", about = "Recursive, caching, DNSSEC-validating DNS resolver")]
pub struct Cli {
    /// Path to a TOML configuration file (spec §6). Defaults are used when omitted.
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Address to listen for client queries on, UDP and TCP both.
    #[arg(short, long, default_value = "127.0.0.1:5353")]
    pub listen: SocketAddr,

    /// Per-upstream-query timeout in milliseconds.
    #[arg(long, default_value_t = 3000)]
    pub upstream_timeout_ms: u64,
}
