//! Credential repository contract.
//!
//! Parley doesn't store accounts itself. It asks a [`CredentialStore`]
//! exactly two questions: "create this account?" and "is this pair
//! valid?". The storage format stays somebody else's problem.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, PoisonError};

use parley_protocol::Credentials;

use crate::SessionError;

/// Creates and validates accounts.
///
/// # Example
///
/// ```rust
/// use parley_session::CredentialStore;
///
/// /// Knows exactly one account. Only for demos!
/// struct SingleUser;
///
/// impl CredentialStore for SingleUser {
///     async fn create(&self, _username: &str, _secret: &str) -> bool {
///         false
///     }
///
///     async fn validate(&self, username: &str, secret: &str) -> bool {
///         username == "admin" && secret == "admin"
///     }
/// }
/// ```
pub trait CredentialStore: Send + Sync + 'static {
    /// Stores a new account. Returns `false` if the username is taken.
    fn create(
        &self,
        username: &str,
        secret: &str,
    ) -> impl Future<Output = bool> + Send;

    /// Returns `true` if the pair matches a stored account.
    fn validate(
        &self,
        username: &str,
        secret: &str,
    ) -> impl Future<Output = bool> + Send;
}

/// Registers a new account through the store.
///
/// # Errors
/// [`SessionError::AccountExists`] if the store refuses the username.
pub async fn register<S: CredentialStore>(
    store: &S,
    credentials: &Credentials,
) -> Result<(), SessionError> {
    if store
        .create(&credentials.username, &credentials.password)
        .await
    {
        tracing::info!(username = %credentials.username, "account registered");
        Ok(())
    } else {
        Err(SessionError::AccountExists(credentials.username.clone()))
    }
}

/// A process-local [`CredentialStore`]. Accounts vanish on restart.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    accounts: Mutex<HashMap<String, String>>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored accounts.
    pub fn len(&self) -> usize {
        self.accounts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CredentialStore for MemoryCredentials {
    async fn create(&self, username: &str, secret: &str) -> bool {
        let mut accounts =
            self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        if accounts.contains_key(username) {
            return false;
        }
        accounts.insert(username.to_string(), secret.to_string());
        true
    }

    async fn validate(&self, username: &str, secret: &str) -> bool {
        self.accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(username)
            .is_some_and(|stored| stored == secret)
    }
}
