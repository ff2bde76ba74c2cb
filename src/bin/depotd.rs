use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;

use depot::cli::DaemonOpts;
use depot::logger::TextLogger;
use depot::registry::Registry;
use depot::session::SessionCtx;
use depot::store::{DataBundle, MemStore};
use depot::tls;

fn main() -> Result<()> {
    let opts = DaemonOpts::parse();

    if !opts.root.exists() {
        anyhow::bail!("Error: Storage root does not exist: {}", opts.root.display());
    }
    if !opts.root.is_dir() {
        anyhow::bail!("Error: Storage root is not a directory: {}", opts.root.display());
    }
    let canonical_root = std::fs::canonicalize(&opts.root)
        .with_context(|| format!("Failed to canonicalize storage root: {}", opts.root.display()))?;

    let store = MemStore::shared();
    match &opts.users {
        Some(path) => {
            let registry = Registry::load(path)?;
            println!(
                "Loaded registry: {} users, {} groups",
                registry.users.len(),
                registry.groups.len()
            );
            registry.seed(&store);
        }
        None => {
            eprintln!("WARNING: no --users registry given; every login will be rejected");
        }
    }

    let mut ctx = SessionCtx::new(&canonical_root, DataBundle::backed_by(store));
    if let Some(log_path) = &opts.log {
        ctx = ctx.with_logger(Arc::new(TextLogger::new(log_path)?));
    }

    println!("Starting depot daemon:");
    println!("  Root: {}", canonical_root.display());
    println!("  Bind: {}", opts.bind);

    if opts.bind.starts_with("0.0.0.0") {
        eprintln!("WARNING: binding to 0.0.0.0 exposes the daemon to all interfaces");
        eprintln!("   Consider binding to a specific address (e.g. 192.168.1.100:9040)");
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    if opts.insecure {
        eprintln!("WARNING: --insecure serves without TLS; credentials and data travel in plain text");
        rt.block_on(depot::server::serve(&opts.bind, ctx))
    } else {
        println!("  Security: TLS enabled");
        if let Some(ref cert_path) = opts.tls_cert {
            println!("Using custom certificate: {}", cert_path.display());
        } else {
            let config_dir = tls::config_dir();
            println!(
                "Using self-signed certificate at: {}/server-cert.pem",
                config_dir.display()
            );
        }
        let tls_config = tls::load_or_generate_server_config(opts.tls_cert.clone(), opts.tls_key.clone())
            .context("Failed to set up TLS configuration")?;
        rt.block_on(depot::server::serve_with_tls(&opts.bind, ctx, tls_config))
    }
}
