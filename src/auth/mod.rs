//! Token Repository Module
//!
//! The serving layer authenticates requests with bearer tokens. The core
//! only fixes the repository contract: a persistent named set of tokens
//! plus a validation check. [`BootstrapTokenRepository`] is the built-in
//! in-process implementation, seeded with the configured bootstrap token;
//! an empty bootstrap token disables authentication entirely.

#[cfg(test)]
mod tests;

use std::{
    collections::HashMap,
    sync::RwLock,
};

use thiserror::Error;
use tracing::info;

use crate::entry::now_micros;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by token repository operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Token name does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Token name already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Presented credentials were rejected.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Internal invariant violation or poisoned lock.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Contract
// ------------------------------------------------------------------------------------------------

/// One named access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Token name, unique within the repository.
    pub name: String,

    /// The secret value presented by clients.
    pub value: String,

    /// Creation time, microseconds since the Unix epoch.
    pub created_at: i64,
}

/// A persistent set of named access tokens.
///
/// The serving layer generates token values; the repository only stores
/// and validates them.
pub trait TokenRepository: Send + Sync {
    /// Stores a new token. Fails with [`AuthError::Conflict`] if the
    /// name is taken.
    fn create_token(&self, name: &str, value: String) -> Result<Token, AuthError>;

    /// Looks up a token by name.
    fn get_token(&self, name: &str) -> Result<Token, AuthError>;

    /// Removes a token by name.
    fn remove_token(&self, name: &str) -> Result<(), AuthError>;

    /// All tokens, sorted by name.
    fn list_tokens(&self) -> Result<Vec<Token>, AuthError>;

    /// Checks a presented token value.
    ///
    /// Returns `Ok(())` when authentication is disabled or the value
    /// matches a known token.
    fn validate(&self, value: &str) -> Result<(), AuthError>;
}

// ------------------------------------------------------------------------------------------------
// In-process implementation
// ------------------------------------------------------------------------------------------------

/// Token repository seeded with the configured bootstrap token.
///
/// An empty bootstrap token disables validation: [`validate`] accepts
/// anything, matching a deployment without authentication.
///
/// [`validate`]: TokenRepository::validate
#[derive(Debug)]
pub struct BootstrapTokenRepository {
    /// The `TS_API_TOKEN` value; empty disables auth.
    bootstrap: String,

    /// Named tokens created at runtime.
    tokens: RwLock<HashMap<String, Token>>,
}

impl BootstrapTokenRepository {
    /// Creates a repository from the configured bootstrap token.
    pub fn new(bootstrap: impl Into<String>) -> Self {
        let bootstrap = bootstrap.into();
        if bootstrap.is_empty() {
            info!("authentication disabled (no bootstrap token)");
        }
        Self {
            bootstrap,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, Token>>, AuthError> {
        self.tokens
            .read()
            .map_err(|_| AuthError::Internal("token map lock poisoned".into()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, Token>>, AuthError> {
        self.tokens
            .write()
            .map_err(|_| AuthError::Internal("token map lock poisoned".into()))
    }
}

impl TokenRepository for BootstrapTokenRepository {
    fn create_token(&self, name: &str, value: String) -> Result<Token, AuthError> {
        let mut tokens = self.write()?;
        if tokens.contains_key(name) {
            return Err(AuthError::Conflict(format!("token '{name}' already exists")));
        }

        let token = Token {
            name: name.to_string(),
            value,
            created_at: now_micros(),
        };
        tokens.insert(name.to_string(), token.clone());
        info!(token = name, "token created");
        Ok(token)
    }

    fn get_token(&self, name: &str) -> Result<Token, AuthError> {
        self.read()?
            .get(name)
            .cloned()
            .ok_or_else(|| AuthError::NotFound(format!("token '{name}' not found")))
    }

    fn remove_token(&self, name: &str) -> Result<(), AuthError> {
        if self.write()?.remove(name).is_none() {
            return Err(AuthError::NotFound(format!("token '{name}' not found")));
        }
        info!(token = name, "token removed");
        Ok(())
    }

    fn list_tokens(&self) -> Result<Vec<Token>, AuthError> {
        let mut tokens: Vec<Token> = self.read()?.values().cloned().collect();
        tokens.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tokens)
    }

    fn validate(&self, value: &str) -> Result<(), AuthError> {
        if self.bootstrap.is_empty() {
            return Ok(());
        }
        if value == self.bootstrap {
            return Ok(());
        }
        if self.read()?.values().any(|t| t.value == value) {
            return Ok(());
        }
        Err(AuthError::Unauthorized("invalid token".into()))
    }
}
