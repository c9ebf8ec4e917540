//! The SOCKS5 session (C5): a per-client state machine that composes the
//! codec (C1), the authenticator (C2) and the connection runtime (C3/C4)
//! into a proxy pair. Transitions are driven purely by the events below;
//! the phase enum makes illegal transitions a compile-time-obvious `match`
//! instead of swapping a mutable function-pointer field (see design notes).

use bytes::BytesMut;
use socks5_auth::Authenticator;
use socks5_codec::{self as codec, CodecError};
use socks5_runtime::{self as runtime, Connection, Handler};
use socks5_types::DestAddr;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Per-client protocol phase (spec §3/§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitGreeting,
    AwaitAuth,
    AwaitRequest,
    AwaitRemote,
    Proxying,
    Terminating,
}

/// Events fed into a session's actor loop. Client/remote reads cross into
/// the session only through this channel, so session state is only ever
/// touched by the single task running [`Session::run`] — no locking is
/// needed for per-session state, satisfying the concurrency model's
/// "accessed under a mutual exclusion discipline" requirement by
/// construction.
enum SessionEvent {
    ClientConnected(Connection),
    ClientData(Vec<u8>),
    ClientLost,
    RemoteConnected(Connection),
    RemoteConnectFailed,
    RemoteData(Vec<u8>),
    RemoteLost,
}

/// Thin [`Handler`] that forwards the client socket's callbacks into a
/// session's event channel; the actual state machine lives in
/// [`Session::run`], not here.
pub struct ClientFeed {
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Handler for ClientFeed {
    fn on_connect(&mut self, conn: &Connection) {
        let _ = self.events.send(SessionEvent::ClientConnected(conn.clone()));
    }

    fn data_received(&mut self, _conn: &Connection, data: &[u8]) {
        let _ = self.events.send(SessionEvent::ClientData(data.to_vec()));
    }

    fn connection_lost(&mut self, _conn: &Connection) {
        let _ = self.events.send(SessionEvent::ClientLost);
    }
}

/// Thin [`Handler`] for the paired remote (destination) socket. Forwards
/// callbacks back into the same session's event channel; it is a
/// non-owning relation to the session (the channel, not a handler
/// back-pointer), matching the design note on the paired-connection cycle.
struct RemoteFeed {
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Handler for RemoteFeed {
    fn on_connect(&mut self, conn: &Connection) {
        let _ = self.events.send(SessionEvent::RemoteConnected(conn.clone()));
    }

    fn data_received(&mut self, _conn: &Connection, data: &[u8]) {
        let _ = self.events.send(SessionEvent::RemoteData(data.to_vec()));
    }

    fn connection_lost(&mut self, _conn: &Connection) {
        let _ = self.events.send(SessionEvent::RemoteLost);
    }
}

/// Builds the [`ClientFeed`] handler for an accepted socket and spawns the
/// session actor that will consume its events. Call this from a
/// `socks5_runtime::serve` handler factory.
pub fn spawn_session(authenticator: Arc<dyn Authenticator>, peer: SocketAddr) -> ClientFeed {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = Session::new(authenticator, peer, tx.clone());
    tokio::spawn(session.run(rx));
    ClientFeed { events: tx }
}

struct Session {
    authenticator: Arc<dyn Authenticator>,
    peer: SocketAddr,
    phase: Phase,
    buffer: BytesMut,
    client: Option<Connection>,
    remote: Option<Connection>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl Session {
    fn new(authenticator: Arc<dyn Authenticator>, peer: SocketAddr, events: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self {
            authenticator,
            peer,
            phase: Phase::AwaitGreeting,
            buffer: BytesMut::new(),
            client: None,
            remote: None,
            events,
        }
    }

    async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::ClientConnected(conn) => {
                    self.client = Some(conn);
                }
                SessionEvent::ClientData(data) => self.on_client_data(data),
                SessionEvent::ClientLost => {
                    self.phase = Phase::Terminating;
                    if let Some(remote) = &self.remote {
                        remote.closing();
                    }
                    break;
                }
                SessionEvent::RemoteConnected(conn) => self.on_remote_connected(conn),
                SessionEvent::RemoteConnectFailed => self.on_remote_connect_failed(),
                SessionEvent::RemoteData(data) => {
                    if let Some(client) = &self.client {
                        client.write(data);
                    }
                }
                SessionEvent::RemoteLost => {
                    if let Some(client) = &self.client {
                        client.closing();
                    }
                }
            }
        }
    }

    fn on_client_data(&mut self, data: Vec<u8>) {
        if self.phase == Phase::AwaitRemote {
            // The client must wait for the CONNECT reply; any bytes sent
            // early are a protocol violation and we close hard.
            self.hard_close();
            return;
        }

        if self.phase == Phase::Proxying {
            if let Some(remote) = &self.remote {
                remote.write(data);
            }
            return;
        }

        self.buffer.extend_from_slice(&data);
        self.drain_buffer();
    }

    fn drain_buffer(&mut self) {
        loop {
            match self.phase {
                Phase::AwaitGreeting => match codec::decode_greeting(&self.buffer) {
                    Ok((methods, consumed)) => {
                        let _ = self.buffer.split_to(consumed);
                        self.handle_greeting(&methods);
                    }
                    Err(CodecError::Truncated) => break,
                    Err(_) => {
                        self.hard_close();
                        break;
                    }
                },
                Phase::AwaitAuth => match codec::decode_username_password(&self.buffer) {
                    Ok(((user, pass), consumed)) => {
                        let _ = self.buffer.split_to(consumed);
                        self.handle_auth(&user, &pass);
                    }
                    Err(CodecError::Truncated) => break,
                    Err(_) => {
                        self.hard_close();
                        break;
                    }
                },
                Phase::AwaitRequest => match codec::decode_connection_request(&self.buffer) {
                    Ok((dest, consumed)) => {
                        let _ = self.buffer.split_to(consumed);
                        self.handle_request(dest);
                    }
                    Err(CodecError::Truncated) => break,
                    Err(_) => {
                        self.hard_close();
                        break;
                    }
                },
                Phase::AwaitRemote | Phase::Proxying | Phase::Terminating => break,
            }
        }
    }

    fn handle_greeting(&mut self, methods: &[u8]) {
        let Some(client) = self.client.clone() else { return };
        let chosen = codec::choose_auth_method(methods);
        client.write(codec::encode_greeting_response(chosen).to_vec());

        match chosen {
            codec::NO_ACCEPTABLE_METHODS => {
                self.phase = Phase::Terminating;
                client.closing();
            }
            codec::USERNAME_PASSWORD => self.phase = Phase::AwaitAuth,
            _ => self.phase = Phase::AwaitRequest,
        }
    }

    fn handle_auth(&mut self, user: &[u8], pass: &[u8]) {
        let Some(client) = self.client.clone() else { return };
        if self.authenticator.authenticate(user, pass) {
            client.write(codec::encode_auth_response(true).to_vec());
            self.phase = Phase::AwaitRequest;
        } else {
            client.write(codec::encode_auth_response(false).to_vec());
            self.phase = Phase::Terminating;
            client.closing();
        }
    }

    fn handle_request(&mut self, dest: DestAddr) {
        self.phase = Phase::AwaitRemote;

        let events = self.events.clone();
        let client_peer = self.peer;

        tokio::spawn(async move {
            let hostname = dest.as_domain().map(|(name, _)| name.to_owned());
            let port = dest.port();

            let resolved: io::Result<SocketAddr> = match dest {
                DestAddr::Ip(addr) => Ok(addr),
                DestAddr::Domain(ref host, port) => runtime::resolve(host, port).await,
            };

            let dest_addr = match resolved {
                Ok(addr) => addr,
                Err(error) => {
                    tracing::debug!(%error, port, "name resolution failed");
                    let _ = events.send(SessionEvent::RemoteConnectFailed);
                    return;
                }
            };

            // Logged here, before the outbound connect is even attempted, so a
            // connect that later fails is still recorded as a request.
            tracing::info!(
                target: socks5_log::CONNECTION_TARGET,
                "Request:from:{}:{}:to:hostname:{}:{}:{}",
                client_peer.ip(),
                client_peer.port(),
                hostname.as_deref().unwrap_or("UNKNOWN"),
                dest_addr.ip(),
                dest_addr.port(),
            );

            match runtime::connect_outbound(dest_addr).await {
                Ok(stream) => {
                    let remote_events = events.clone();
                    let _ = runtime::run_connection(stream, RemoteFeed { events: remote_events }).await;
                }
                Err(error) => {
                    tracing::debug!(%error, port, "remote connect failed");
                    let _ = events.send(SessionEvent::RemoteConnectFailed);
                }
            }
        });
    }

    fn on_remote_connected(&mut self, remote: Connection) {
        if self.phase != Phase::AwaitRemote {
            // Stray/late connect signal after the session already moved on
            // (e.g. the client vanished mid-connect); tear the remote down.
            remote.closing();
            return;
        }

        let Some(client) = self.client.clone() else { return };
        let bound = DestAddr::Ip(remote.local_endpoint());
        match codec::encode_connection_response(&bound, codec::REQUEST_GRANTED) {
            Ok(response) => client.write(response),
            Err(error) => tracing::warn!(%error, "failed to encode success response"),
        }

        self.remote = Some(remote);
        self.phase = Phase::Proxying;
    }

    fn on_remote_connect_failed(&mut self) {
        if self.phase != Phase::AwaitRemote {
            return;
        }

        let Some(client) = self.client.clone() else { return };
        // No outbound endpoint was ever established; report the client's
        // own local endpoint as the only meaningful bound address.
        let bound = DestAddr::Ip(client.local_endpoint());
        match codec::encode_connection_response(&bound, codec::CONNECTION_REFUSED) {
            Ok(response) => client.write(response),
            Err(error) => tracing::warn!(%error, "failed to encode failure response"),
        }

        self.phase = Phase::Terminating;
        client.closing();
    }

    fn hard_close(&mut self) {
        self.phase = Phase::Terminating;
        if let Some(client) = &self.client {
            client.close();
        }
        if let Some(remote) = &self.remote {
            remote.closing();
        }
    }
}
