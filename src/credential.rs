//! Execution credentials.
//!
//! Every handler invocation receives a short-lived credential carrying the
//! calling identity's id, name, role names, and the flattened set of
//! permission names reachable through those roles. Handlers use it to make
//! authorized calls back into the rest of the platform.
//!
//! The minting component itself is an external collaborator; this module
//! defines the narrow contract plus [`SystemMinter`], which embeds a
//! configured administrative identity.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur while minting a credential.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The identity to mint for could not be resolved.
    #[error("identity not found: {0}")]
    IdentityNotFound(String),

    /// Token signing failed.
    #[error("signing failed: {0}")]
    SigningFailed(String),
}

/// A short-lived execution credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Opaque signed token.
    pub token: String,
    /// Identity id of the caller the credential represents.
    pub identity_id: String,
    /// Display name of the identity.
    pub identity_name: String,
    /// Role names held by the identity.
    pub roles: Vec<String>,
    /// Flattened permission names reachable through the roles.
    pub permissions: Vec<String>,
    /// When the credential was minted.
    pub issued_at: DateTime<Utc>,
    /// When the credential stops being valid.
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Whether the credential is still valid at the given instant.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        at < self.expires_at
    }

    /// Whether the credential grants a permission.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }
}

/// Contract for the component that mints execution credentials.
#[async_trait]
pub trait CredentialMinter: Send + Sync {
    /// Mint a fresh credential for one execution.
    async fn mint(&self) -> Result<Credential, CredentialError>;
}

/// Default TTL for system credentials.
const DEFAULT_TTL_SECS: i64 = 300;

/// Mints credentials for a fixed administrative system identity.
pub struct SystemMinter {
    identity_id: String,
    identity_name: String,
    roles: Vec<String>,
    permissions: Vec<String>,
    ttl: Duration,
}

impl SystemMinter {
    /// Create a minter for the given identity with a 5 minute TTL.
    pub fn new(
        identity_id: impl Into<String>,
        identity_name: impl Into<String>,
        roles: Vec<String>,
        permissions: Vec<String>,
    ) -> Self {
        Self {
            identity_id: identity_id.into(),
            identity_name: identity_name.into(),
            roles,
            permissions,
            ttl: Duration::seconds(DEFAULT_TTL_SECS),
        }
    }

    /// Set the credential TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

#[async_trait]
impl CredentialMinter for SystemMinter {
    async fn mint(&self) -> Result<Credential, CredentialError> {
        let issued_at = Utc::now();
        Ok(Credential {
            // Opaque bearer token; a production minter signs a real token here.
            token: format!("sys-{}", Uuid::new_v4().simple()),
            identity_id: self.identity_id.clone(),
            identity_name: self.identity_name.clone(),
            roles: self.roles.clone(),
            permissions: self.permissions.clone(),
            issued_at,
            expires_at: issued_at + self.ttl,
        })
    }
}
