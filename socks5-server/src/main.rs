//! Binary entry point: wires the CLI surface to the session/runtime crates
//! and runs the accept loop until Ctrl-C or SIGTERM.

use anyhow::Context as _;
use clap::Parser;
use socks5_auth::{Authenticator, StaticAuthenticator};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// A SOCKS5 (RFC 1928) proxy server with optional username/password auth.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Port to listen on.
    #[arg(long, short, default_value_t = 1080)]
    port: u16,

    /// CSV file of base64-encoded username,password pairs.
    #[arg(long)]
    password_file: Option<PathBuf>,

    /// Ad hoc credential, `NAME:PASS`. Repeatable.
    #[arg(long, short, value_parser = parse_user)]
    user: Vec<(Vec<u8>, Vec<u8>)>,

    /// Allow clients to connect without authenticating.
    #[arg(long)]
    no_auth_required: bool,

    /// Diagnostic log level: DEBUG, INFO, WARN or ERROR.
    #[arg(long, default_value = "WARN")]
    loglevel: String,

    /// Path to the per-connection audit log.
    #[arg(long, default_value = "connection.log")]
    connection_log: PathBuf,
}

fn parse_user(value: &str) -> Result<(Vec<u8>, Vec<u8>), String> {
    let (name, pass) = value.split_once(':').ok_or_else(|| format!("expected NAME:PASS, got {value:?}"))?;
    Ok((name.as_bytes().to_vec(), pass.as_bytes().to_vec()))
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut credentials = args.user;
    if let Some(path) = &args.password_file {
        let loaded = StaticAuthenticator::from_csv_path(path)
            .with_context(|| format!("failed to load password file {}", path.display()))?;
        credentials.extend(loaded.into_pairs());
    }

    if credentials.is_empty() && !args.no_auth_required {
        anyhow::bail!(
            "no credentials configured and --no-auth-required was not passed; refusing to start an unauthenticated-by-accident proxy"
        );
    }

    let authenticator: Arc<dyn Authenticator> = Arc::new(StaticAuthenticator::from_pairs(credentials));

    let _logger_guard = socks5_log::init(&args.loglevel, &args.connection_log).context("failed to initialize logging")?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build the tokio runtime")?;

    rt.block_on(run(args.port, authenticator))
}

async fn run(port: u16, authenticator: Arc<dyn Authenticator>) -> anyhow::Result<()> {
    let bind_addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = socks5_runtime::listen(bind_addr).await.context("failed to bind listener")?;
    tracing::info!(%bind_addr, "listening for SOCKS5 connections");

    let (shutdown_handle, shutdown_signal) = socks5_task::ShutdownHandle::new();

    tokio::select! {
        () = socks5_runtime::serve(listener, shutdown_signal, move |peer| {
            socks5_session::spawn_session(Arc::clone(&authenticator), peer)
        }) => {}
        result = tokio::signal::ctrl_c() => {
            result.context("failed to listen for ctrl-c")?;
            tracing::info!("shutdown signal received");
        }
    }

    shutdown_handle.signal();
    Ok(())
}
