//! Where the client gets its auth token
//!
//! The store is asked once at the start of every dial. If it has nothing the
//! dial is not attempted: the client publishes `AuthenticationMissing` and
//! waits for an explicit `connect()` after the session is restored.
//!
//! Any `Fn() -> Option<AuthToken>` closure is a store:
//!
//! ```rust
//! use tether_client::{ClientBuilder, CredentialStore};
//! use tether_core::AuthToken;
//!
//! let store = || Some(AuthToken::new("session-token"));
//! assert!(store.token().is_some());
//!
//! let _builder = ClientBuilder::new("ws://localhost:8080").credentials(store);
//! ```

use std::sync::{PoisonError, RwLock};
use tether_core::AuthToken;

/// Source of the token presented when dialing
pub trait CredentialStore: Send + Sync {
    /// The current token, or `None` when the user is signed out
    fn token(&self) -> Option<AuthToken>;
}

impl<F> CredentialStore for F
where
    F: Fn() -> Option<AuthToken> + Send + Sync,
{
    fn token(&self) -> Option<AuthToken> {
        self()
    }
}

/// In-memory store that can be updated while the client runs
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    token: RwLock<Option<AuthToken>>,
}

impl MemoryCredentials {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding `token`
    pub fn with_token(token: impl Into<AuthToken>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    /// Replace the token
    pub fn set(&self, token: impl Into<AuthToken>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    /// Forget the token (sign-out)
    pub fn clear(&self) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl CredentialStore for MemoryCredentials {
    fn token(&self) -> Option<AuthToken> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
