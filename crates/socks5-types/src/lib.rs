//! Shared address/endpoint types for the SOCKS5 proxy workspace.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// A destination as carried on the wire: either a resolved IP endpoint or a
/// domain name awaiting resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestAddr {
    Ip(SocketAddr),
    Domain(String, u16),
}

/// Bound address, as returned by the server in a CONNECT reply. Same shape
/// as a destination, but always represents the server's own local endpoint
/// used to reach the target (never the client's requested host).
pub type BoundAddr = DestAddr;

/// Wire-level address type tag (SOCKS5 ATYP field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrType {
    V4 = 0x01,
    Domain = 0x03,
    V6 = 0x04,
}

impl DestAddr {
    pub fn as_ip(&self) -> Option<SocketAddr> {
        match self {
            DestAddr::Ip(ip) => Some(*ip),
            DestAddr::Domain(..) => None,
        }
    }

    pub fn as_domain(&self) -> Option<(&str, u16)> {
        match self {
            DestAddr::Domain(name, port) => Some((name, *port)),
            DestAddr::Ip(_) => None,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            DestAddr::Ip(addr) => addr.port(),
            DestAddr::Domain(_, port) => *port,
        }
    }

    pub fn addr_type(&self) -> AddrType {
        match self {
            DestAddr::Ip(SocketAddr::V4(_)) => AddrType::V4,
            DestAddr::Ip(SocketAddr::V6(_)) => AddrType::V6,
            DestAddr::Domain(..) => AddrType::Domain,
        }
    }
}

/// Converts to a `DestAddr`, mirroring `std::net::ToSocketAddrs`.
pub trait ToDestAddr {
    fn to_dest_addr(&self) -> io::Result<DestAddr>;
}

impl ToDestAddr for DestAddr {
    fn to_dest_addr(&self) -> io::Result<DestAddr> {
        Ok(self.clone())
    }
}

impl ToDestAddr for SocketAddr {
    fn to_dest_addr(&self) -> io::Result<DestAddr> {
        Ok(DestAddr::Ip(*self))
    }
}

impl ToDestAddr for SocketAddrV4 {
    fn to_dest_addr(&self) -> io::Result<DestAddr> {
        Ok(DestAddr::Ip(SocketAddr::V4(*self)))
    }
}

impl ToDestAddr for SocketAddrV6 {
    fn to_dest_addr(&self) -> io::Result<DestAddr> {
        Ok(DestAddr::Ip(SocketAddr::V6(*self)))
    }
}

impl ToDestAddr for (Ipv4Addr, u16) {
    fn to_dest_addr(&self) -> io::Result<DestAddr> {
        Ok(DestAddr::Ip(SocketAddr::V4(SocketAddrV4::new(self.0, self.1))))
    }
}

impl ToDestAddr for (Ipv6Addr, u16) {
    fn to_dest_addr(&self) -> io::Result<DestAddr> {
        Ok(DestAddr::Ip(SocketAddr::V6(SocketAddrV6::new(self.0, self.1, 0, 0))))
    }
}

impl ToDestAddr for (&str, u16) {
    fn to_dest_addr(&self) -> io::Result<DestAddr> {
        if let Ok(addr) = self.0.parse::<Ipv4Addr>() {
            return (addr, self.1).to_dest_addr();
        }

        if let Ok(addr) = self.0.parse::<Ipv6Addr>() {
            return (addr, self.1).to_dest_addr();
        }

        Ok(DestAddr::Domain(self.0.to_owned(), self.1))
    }
}

impl ToDestAddr for str {
    fn to_dest_addr(&self) -> io::Result<DestAddr> {
        if let Ok(addr) = self.parse::<SocketAddrV4>() {
            return addr.to_dest_addr();
        }

        if let Ok(addr) = self.parse::<SocketAddrV6>() {
            return addr.to_dest_addr();
        }

        let (host, port) = self
            .rsplit_once(':')
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "bad socket address format"))?;

        let port = port
            .parse()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("invalid port value: {e}")))?;

        Ok(DestAddr::Domain(host.to_owned(), port))
    }
}

impl ToDestAddr for String {
    fn to_dest_addr(&self) -> io::Result<DestAddr> {
        self.as_str().to_dest_addr()
    }
}

impl<T: ToDestAddr + ?Sized> ToDestAddr for &T {
    fn to_dest_addr(&self) -> io::Result<DestAddr> {
        (**self).to_dest_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ipv4_socket_addr() {
        let addr = "127.0.0.1:80".to_dest_addr().unwrap();
        assert_eq!(addr, DestAddr::Ip("127.0.0.1:80".parse().unwrap()));
    }

    #[test]
    fn parses_domain() {
        let addr = "example.com:443".to_dest_addr().unwrap();
        assert_eq!(addr, DestAddr::Domain("example.com".to_owned(), 443));
    }

    #[test]
    fn rejects_missing_port() {
        assert!("example.com".to_dest_addr().is_err());
    }
}
