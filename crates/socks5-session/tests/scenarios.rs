//! End-to-end scenarios from the design's concrete test list: a real SOCKS5
//! proxy bound on loopback, a real loopback TCP target, and a raw client
//! socket speaking the literal bytes of the protocol.

use socks5_auth::{Authenticator, StaticAuthenticator};
use socks5_session::spawn_session;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn start_proxy(auth: Arc<dyn Authenticator>) -> std::net::SocketAddr {
    let listener = socks5_runtime::listen("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (_handle, shutdown) = socks5_task::ShutdownHandle::new();

    tokio::spawn(async move {
        socks5_runtime::serve(listener, shutdown, move |peer| spawn_session(Arc::clone(&auth), peer)).await;
    });

    addr
}

async fn start_echo_target() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    addr
}

fn connect_request(addr: std::net::SocketAddr) -> Vec<u8> {
    let mut req = vec![0x05, 0x01, 0x00, 0x01];
    match addr {
        std::net::SocketAddr::V4(v4) => req.extend_from_slice(&v4.ip().octets()),
        std::net::SocketAddr::V6(_) => unreachable!("test targets are always ipv4"),
    }
    req.extend_from_slice(&addr.port().to_be_bytes());
    req
}

#[tokio::test]
async fn no_auth_happy_path_proxies_bytes() {
    let auth: Arc<dyn Authenticator> = Arc::new(StaticAuthenticator::from_pairs([]));
    let proxy_addr = start_proxy(auth).await;
    let target_addr = start_echo_target().await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();

    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut greeting_reply = [0u8; 2];
    client.read_exact(&mut greeting_reply).await.unwrap();
    assert_eq!(greeting_reply, [0x05, 0x00]);

    client.write_all(&connect_request(target_addr)).await.unwrap();
    let mut reply_header = [0u8; 4];
    client.read_exact(&mut reply_header).await.unwrap();
    assert_eq!(reply_header, [0x05, 0x00, 0x00, 0x01]);
    let mut bound = [0u8; 6];
    client.read_exact(&mut bound).await.unwrap();

    client.write_all(b"hello proxy").await.unwrap();
    let mut echoed = [0u8; 11];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"hello proxy");
}

#[tokio::test]
async fn user_pwd_success_then_connect() {
    let auth: Arc<dyn Authenticator> =
        Arc::new(StaticAuthenticator::from_pairs([(b"user".to_vec(), b"pass".to_vec())]));
    let proxy_addr = start_proxy(auth).await;
    let target_addr = start_echo_target().await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();

    client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
    let mut greeting_reply = [0u8; 2];
    client.read_exact(&mut greeting_reply).await.unwrap();
    assert_eq!(greeting_reply, [0x05, 0x02]);

    let mut auth_req = vec![0x01, 4];
    auth_req.extend_from_slice(b"user");
    auth_req.push(4);
    auth_req.extend_from_slice(b"pass");
    client.write_all(&auth_req).await.unwrap();
    let mut auth_reply = [0u8; 2];
    client.read_exact(&mut auth_reply).await.unwrap();
    assert_eq!(auth_reply, [0x01, 0x00]);

    client.write_all(&connect_request(target_addr)).await.unwrap();
    let mut reply_header = [0u8; 4];
    client.read_exact(&mut reply_header).await.unwrap();
    assert_eq!(reply_header, [0x05, 0x00, 0x00, 0x01]);
}

#[tokio::test]
async fn user_pwd_failure_closes_without_connect_reply() {
    let auth: Arc<dyn Authenticator> =
        Arc::new(StaticAuthenticator::from_pairs([(b"user".to_vec(), b"pass".to_vec())]));
    let proxy_addr = start_proxy(auth).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x02]).await.unwrap();
    let mut greeting_reply = [0u8; 2];
    client.read_exact(&mut greeting_reply).await.unwrap();

    let mut auth_req = vec![0x01, 4];
    auth_req.extend_from_slice(b"user");
    auth_req.push(5);
    auth_req.extend_from_slice(b"wrong");
    client.write_all(&auth_req).await.unwrap();

    let mut auth_reply = [0u8; 2];
    client.read_exact(&mut auth_reply).await.unwrap();
    assert_eq!(auth_reply, [0x01, 0xFF]);

    // the connection closes without further bytes
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn no_acceptable_method_closes() {
    let auth: Arc<dyn Authenticator> = Arc::new(StaticAuthenticator::from_pairs([]));
    let proxy_addr = start_proxy(auth).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x09]).await.unwrap();

    let mut reply = [0u8; 2];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0xFF]);

    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn remote_connect_refused_replies_failure() {
    let auth: Arc<dyn Authenticator> = Arc::new(StaticAuthenticator::from_pairs([]));
    let proxy_addr = start_proxy(auth).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut greeting_reply = [0u8; 2];
    client.read_exact(&mut greeting_reply).await.unwrap();

    // port 1 on loopback should refuse immediately
    let refused_target = "127.0.0.1:1".parse().unwrap();
    client.write_all(&connect_request(refused_target)).await.unwrap();

    let mut reply_header = [0u8; 4];
    client.read_exact(&mut reply_header).await.unwrap();
    assert_eq!(reply_header[1], 0x05, "expected CONNECTION_REFUSED status byte");
}

#[tokio::test]
async fn domain_resolution_reaches_loopback_target() {
    let auth: Arc<dyn Authenticator> = Arc::new(StaticAuthenticator::from_pairs([]));
    let proxy_addr = start_proxy(auth).await;
    let target_addr = start_echo_target().await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut greeting_reply = [0u8; 2];
    client.read_exact(&mut greeting_reply).await.unwrap();

    let mut req = vec![0x05, 0x01, 0x00, 0x03, 9];
    req.extend_from_slice(b"localhost");
    req.extend_from_slice(&target_addr.port().to_be_bytes());
    client.write_all(&req).await.unwrap();

    let mut reply_header = [0u8; 4];
    client.read_exact(&mut reply_header).await.unwrap();
    assert_eq!(reply_header, [0x05, 0x00, 0x00, 0x01]);
}

#[tokio::test]
async fn malformed_greeting_closes_without_reply() {
    let auth: Arc<dyn Authenticator> = Arc::new(StaticAuthenticator::from_pairs([]));
    let proxy_addr = start_proxy(auth).await;

    let mut client = TcpStream::connect(proxy_addr).await.unwrap();
    // wrong version byte (0x04 instead of 0x05)
    client.write_all(&[0x04, 0x01, 0x00]).await.unwrap();

    let mut rest = Vec::new();
    client.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}
