//! Shared CLI helpers and small reusable Clap fragments

use clap::Parser;
use std::path::PathBuf;

/// Daemon options for depotd
#[derive(Clone, Debug, Parser)]
pub struct DaemonOpts {
    /// Bind address (host:port)
    #[arg(long, default_value = "127.0.0.1:9040")]
    pub bind: String,

    /// Storage root for uploaded blobs
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// TOML users/groups registry
    #[arg(long)]
    pub users: Option<PathBuf>,

    /// Append server events to this log file
    #[arg(long)]
    pub log: Option<PathBuf>,

    /// Custom TLS certificate (PEM); requires --tls-key
    #[arg(long)]
    pub tls_cert: Option<PathBuf>,

    /// Custom TLS private key (PEM)
    #[arg(long)]
    pub tls_key: Option<PathBuf>,

    /// Serve without TLS (trusted networks only)
    #[arg(long)]
    pub insecure: bool,
}
