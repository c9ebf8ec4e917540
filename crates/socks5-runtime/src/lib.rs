//! The connection runtime (C3) and protocol base (C4) from the design: a
//! non-blocking socket lifecycle built on tokio, a generic per-connection
//! driver that dispatches reads to a [`Handler`], and the off-thread name
//! resolution helper. Layered SOCKS5 semantics live in `socks5-session`.

mod connection;

pub use connection::{Connection, Lifecycle};

use socks5_task::{ChildTask, ShutdownSignal};
use std::io;
use std::net::SocketAddr;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

/// Per-connection handler contract (C4): inbound callbacks a session
/// implements; outbound operations (`write`/`closing`/`close`/endpoints)
/// live on [`Connection`] itself since ownership naturally separates them
/// once callbacks run inside an owned async task instead of a shared
/// dynamic-dispatch object.
pub trait Handler: Send + 'static {
    fn on_connect(&mut self, conn: &Connection);
    fn data_received(&mut self, conn: &Connection, data: &[u8]);
    fn connection_lost(&mut self, conn: &Connection);
}

const READ_BUFFER_SIZE: usize = 8192;

/// Drives one accepted or outbound-connected socket: builds its
/// [`Connection`] handle, invokes `on_connect`, then delivers reads until
/// EOF, error, or the connection leaves the `Connected` state — at which
/// point no further read is delivered, matching the §3 invariant.
pub async fn run_connection<H: Handler>(stream: TcpStream, mut handler: H) -> io::Result<()> {
    let local = stream.local_addr()?;
    let peer = stream.peer_addr()?;
    let (mut read_half, write_half) = stream.into_split();
    let conn = Connection::new(write_half, local, peer);

    handler.on_connect(&conn);

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        if conn.state() != Lifecycle::Connected {
            break;
        }

        tokio::select! {
            biased;
            () = conn.closed_or_closing() => break,
            result = read_half.read(&mut buf) => {
                match result {
                    Ok(0) => break,
                    Ok(n) => handler.data_received(&conn, &buf[..n]),
                    Err(error) => {
                        tracing::debug!(%error, "socket read error");
                        break;
                    }
                }
            }
        }
    }

    handler.connection_lost(&conn);
    conn.close();
    Ok(())
}

/// Resolves `host` off the calling task, using tokio's blocking-thread-pool
/// backed `lookup_host`. This is the thread-safe hand-off to the main loop
/// required by the concurrency model: the awaited future completes on the
/// caller's own task once the worker thread reports back.
pub async fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    let mut addrs = tokio::net::lookup_host((host, port)).await?;
    addrs
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "name resolution returned no addresses"))
}

/// Opens a non-blocking outbound connection (C3 `create_client`). tokio
/// resolves the returned future only once the three-way handshake
/// completes, folding the spec's "verify via write-readiness then peer
/// name" dance into the await point itself.
pub async fn connect_outbound(addr: SocketAddr) -> io::Result<TcpStream> {
    TcpStream::connect(addr).await
}

/// Binds a listening socket (C3 `create_server`). The backlog is the
/// platform default tokio configures, which already meets the spec's
/// floor of 100 on every mainstream target; tokio does not expose a knob
/// to raise it further.
pub async fn listen(bind_addr: SocketAddr) -> io::Result<TcpListener> {
    TcpListener::bind(bind_addr).await
}

/// Runs the accept loop: for every accepted socket, builds a handler via
/// `make_handler` and spawns [`run_connection`] for it behind a [`ChildTask`].
/// Stops accepting new connections once `shutdown` fires; each connection's
/// own `conn_shutdown` branch still lets it wind down gracefully first, and
/// `serve` then drains every spawned `ChildTask` to completion before
/// returning, so a caller awaiting `serve` is guaranteed no connection task
/// outlives it. If `serve` itself is ever aborted or dropped before reaching
/// the drain (a crashed or cancelled parent), the still-owned `ChildTask`s
/// are dropped with it and abort their connections instead of leaking them.
pub async fn serve<H, F>(listener: TcpListener, mut shutdown: ShutdownSignal, make_handler: F)
where
    H: Handler,
    F: Fn(SocketAddr) -> H,
{
    let mut connections: Vec<ChildTask<()>> = Vec::new();

    loop {
        tokio::select! {
            biased;
            () = shutdown.wait() => {
                tracing::info!("shutdown requested, no longer accepting connections");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let handler = make_handler(peer);
                        let mut conn_shutdown = shutdown.clone();
                        let task = ChildTask::spawn(async move {
                            tokio::select! {
                                biased;
                                () = conn_shutdown.wait() => {}
                                result = run_connection(stream, handler) => {
                                    if let Err(error) = result {
                                        tracing::debug!(%error, "connection ended with an I/O error");
                                    }
                                }
                            }
                        });
                        connections.push(task);
                    }
                    Err(error) => {
                        tracing::warn!(%error, "failed to accept connection");
                    }
                }
            }
        }
    }

    for task in connections {
        let _ = task.join().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt as _;

    struct EchoHandler {
        received: Arc<AtomicUsize>,
    }

    impl Handler for EchoHandler {
        fn on_connect(&mut self, _conn: &Connection) {}

        fn data_received(&mut self, conn: &Connection, data: &[u8]) {
            self.received.fetch_add(data.len(), Ordering::SeqCst);
            conn.write(data.to_vec());
        }

        fn connection_lost(&mut self, _conn: &Connection) {}
    }

    #[tokio::test]
    async fn run_connection_echoes_until_eof() {
        let listener = listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(AtomicUsize::new(0));
        let received_clone = Arc::clone(&received);

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            run_connection(
                stream,
                EchoHandler {
                    received: received_clone,
                },
            )
            .await
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
        drop(client);

        server.await.unwrap().unwrap();
        assert_eq!(received.load(Ordering::SeqCst), 4);
    }
}
