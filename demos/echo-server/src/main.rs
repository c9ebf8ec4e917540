//! A bare echo server: shows how little code the connection runtime needs
//! from a `Handler` on its own, with no SOCKS5 negotiation in front of it.

use socks5_runtime::{Connection, Handler};

struct Echo;

impl Handler for Echo {
    fn on_connect(&mut self, _conn: &Connection) {}

    fn data_received(&mut self, conn: &Connection, data: &[u8]) {
        tracing::info!(bytes = data.len(), "data_received");
        conn.write(data.to_vec());
    }

    fn connection_lost(&mut self, _conn: &Connection) {
        tracing::info!("connection lost");
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let listener = socks5_runtime::listen("127.0.0.1:1080".parse().expect("hardcoded address is valid")).await?;
    tracing::info!("echo server listening on 127.0.0.1:1080");

    loop {
        let (socket, peer) = listener.accept().await?;
        tracing::info!(%peer, "accepted connection");
        tokio::spawn(async move {
            if let Err(error) = socks5_runtime::run_connection(socket, Echo).await {
                tracing::debug!(%error, "connection ended with an I/O error");
            }
        });
    }
}
