//! Username/password authentication for the SOCKS5 proxy.
//!
//! The credential table is a pure `bytes -> bytes` map: keys and values are
//! raw byte strings with no charset normalization. It is built once at
//! startup and is read-only from every connection handler afterwards.

use base64::Engine as _;
use std::collections::HashMap;
use std::io::{self, BufRead};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("could not open password file: {0}")]
    Io(#[from] io::Error),
}

/// Capability consumed by the SOCKS5 session to check credentials.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, user: &[u8], pass: &[u8]) -> bool;
}

/// In-memory credential table, immutable once constructed.
#[derive(Debug, Default)]
pub struct StaticAuthenticator {
    passwords: HashMap<Vec<u8>, Vec<u8>>,
}

impl StaticAuthenticator {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (Vec<u8>, Vec<u8>)>) -> Self {
        Self {
            passwords: pairs.into_iter().collect(),
        }
    }

    /// Loads a password file: one `user,password` row per line, both fields
    /// base64-encoded (standard alphabet, padded). Rows whose field count
    /// isn't exactly two are silently skipped, matching the original
    /// implementation's forgiving CSV loader.
    pub fn from_csv_reader(reader: impl io::Read) -> Result<Self, AuthError> {
        let mut passwords = HashMap::new();

        for line in io::BufReader::new(reader).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() != 2 {
                continue;
            }

            let (Ok(user), Ok(pass)) = (
                base64::engine::general_purpose::STANDARD.decode(fields[0].trim()),
                base64::engine::general_purpose::STANDARD.decode(fields[1].trim()),
            ) else {
                continue;
            };

            passwords.insert(user, pass);
        }

        Ok(Self { passwords })
    }

    pub fn from_csv_path(path: impl AsRef<std::path::Path>) -> Result<Self, AuthError> {
        let file = std::fs::File::open(path)?;
        Self::from_csv_reader(file)
    }

    /// Consumes the table, yielding its credential pairs so a caller can
    /// merge several sources (e.g. a password file and ad hoc `--user`
    /// flags) before building the final authenticator.
    pub fn into_pairs(self) -> impl Iterator<Item = (Vec<u8>, Vec<u8>)> {
        self.passwords.into_iter()
    }
}

impl Authenticator for StaticAuthenticator {
    // Byte-exact comparison; variable-time. A constant-time compare is a
    // worthwhile hardening for a multi-tenant deployment but is not
    // required for the local/trusted deployments this proxy targets.
    fn authenticate(&self, user: &[u8], pass: &[u8]) -> bool {
        self.passwords.get(user).is_some_and(|expected| expected == pass)
    }
}
