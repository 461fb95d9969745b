//! Bearer credential access.
//!
//! The core never stores or refreshes credentials; it reads the current one
//! through [`CredentialSource`] when a connection is requested.

use std::{fmt, sync::Arc};

/// Opaque bearer credential.
///
/// `Debug` output is redacted so the value never reaches logs.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Wrap a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token.
    ///
    /// # Security
    ///
    /// Only for building the handshake `Authorization` header. Never log it or
    /// place it in a URL.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Value for the `Authorization` header.
    pub fn authorization(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Synchronous read of the current credential.
///
/// `None` means no user is signed in; connection attempts are suppressed.
pub trait CredentialSource: Send + Sync {
    /// Current credential, if any.
    fn current(&self) -> Option<Credential>;
}

impl<T: CredentialSource + ?Sized> CredentialSource for Arc<T> {
    fn current(&self) -> Option<Credential> {
        (**self).current()
    }
}

/// Fixed credential, or none.
#[derive(Debug, Clone, Default)]
pub struct StaticCredential(Option<Credential>);

impl StaticCredential {
    /// Source that always returns `credential`.
    pub fn new(credential: Credential) -> Self {
        Self(Some(credential))
    }

    /// Source with no credential.
    pub fn none() -> Self {
        Self(None)
    }
}

impl CredentialSource for StaticCredential {
    fn current(&self) -> Option<Credential> {
        self.0.clone()
    }
}
