//! The per-connection lifecycle (spec component C3/C4): a non-blocking
//! stream socket with a FIFO write buffer drained opportunistically, and
//! an explicit lifecycle state so reads/writes/closes are gated instead of
//! relying on null handler functions (see design notes: explicit enum +
//! match beats swapping in no-op callbacks).

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, Notify};

/// Lifecycle states from the data model (spec §3). `Unconnected` and
/// `Connecting` are transient states a caller passes through before a
/// [`Connection`] is constructed (tokio's `connect`/`accept` only hand back
/// a socket once the handshake has completed); from construction onward a
/// `Connection` lives in `Connected`, `Closing`, or `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Unconnected,
    Connecting,
    Connected,
    Closing,
    Closed,
}

enum WriteCommand {
    Data(Vec<u8>),
    Closing,
    Close,
}

struct Shared {
    local: SocketAddr,
    peer: SocketAddr,
    state: Mutex<Lifecycle>,
    notify: Notify,
    write_tx: mpsc::UnboundedSender<WriteCommand>,
}

/// A cheap, cloneable handle to a connection's outbound half and lifecycle
/// state. Two handlers pairing up (client session + remote relay) hold each
/// other's `Connection` directly: this is a non-owning relation, not a
/// back-pointer to the peer's handler, so either side can drop its handle
/// without keeping the other alive (see design notes on the paired-
/// connection cycle).
#[derive(Clone)]
pub struct Connection(Arc<Shared>);

impl Connection {
    pub(crate) fn new(write_half: OwnedWriteHalf, local: SocketAddr, peer: SocketAddr) -> Self {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            local,
            peer,
            state: Mutex::new(Lifecycle::Connected),
            notify: Notify::new(),
            write_tx,
        });

        tokio::spawn(run_writer(write_half, write_rx, Arc::clone(&shared)));

        Self(shared)
    }

    /// Appends `data` to the write buffer; a no-op once the connection is
    /// `Closing` or `Closed`.
    pub fn write(&self, data: impl Into<Vec<u8>>) {
        let state = self.0.state.lock().expect("connection state lock poisoned");
        if *state == Lifecycle::Connected {
            let _ = self.0.write_tx.send(WriteCommand::Data(data.into()));
        }
    }

    /// Half-closes: no further application writes are accepted, reads
    /// should stop being delivered by the caller, and once the write
    /// buffer drains the socket closes on its own. Idempotent.
    pub fn closing(&self) {
        let mut state = self.0.state.lock().expect("connection state lock poisoned");
        if *state == Lifecycle::Connected {
            *state = Lifecycle::Closing;
            drop(state);
            let _ = self.0.write_tx.send(WriteCommand::Closing);
            self.0.notify.notify_waiters();
        }
    }

    /// Hard close: unregisters and closes immediately, dropping any
    /// unsent buffered bytes. Idempotent.
    pub fn close(&self) {
        let mut state = self.0.state.lock().expect("connection state lock poisoned");
        if *state == Lifecycle::Closed {
            return;
        }
        *state = Lifecycle::Closed;
        drop(state);
        let _ = self.0.write_tx.send(WriteCommand::Close);
        self.0.notify.notify_waiters();
    }

    pub fn state(&self) -> Lifecycle {
        *self.0.state.lock().expect("connection state lock poisoned")
    }

    pub fn local_endpoint(&self) -> SocketAddr {
        self.0.local
    }

    pub fn peer_endpoint(&self) -> SocketAddr {
        self.0.peer
    }

    /// Resolves when the connection transitions away from `Connected`,
    /// letting a read loop stop promptly instead of blocking on a read
    /// that will never complete.
    pub(crate) async fn closed_or_closing(&self) {
        self.0.notify.notified().await;
    }
}

async fn run_writer(mut write_half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<WriteCommand>, shared: Arc<Shared>) {
    while let Some(command) = rx.recv().await {
        match command {
            WriteCommand::Data(bytes) => {
                if let Err(error) = write_half.write_all(&bytes).await {
                    tracing::debug!(%error, "write failed, closing connection");
                    break;
                }
            }
            WriteCommand::Closing => {
                let _ = write_half.shutdown().await;
                *shared.state.lock().expect("connection state lock poisoned") = Lifecycle::Closed;
                break;
            }
            WriteCommand::Close => {
                let _ = write_half.shutdown().await;
                break;
            }
        }
    }

    *shared.state.lock().expect("connection state lock poisoned") = Lifecycle::Closed;
}
