//! Hello token -> identity resolution.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chorus_common::{validate_id, IdKind, PublicIdentity};
use chorus_config::{AuthConfig, AuthMode};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("unknown token")]
    UnknownToken,

    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

/// Resolves a hello token to the identity it authenticates.
#[async_trait]
pub trait ClaimsProvider: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<PublicIdentity, AuthError>;
}

/// Fixed token table loaded from config.
#[derive(Debug, Default)]
pub struct StaticClaims {
    users: HashMap<String, PublicIdentity>,
}

impl StaticClaims {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(mut self, token: &str, identity: PublicIdentity) -> Self {
        self.users.insert(token.to_string(), identity);
        self
    }
}

#[async_trait]
impl ClaimsProvider for StaticClaims {
    async fn resolve(&self, token: &str) -> Result<PublicIdentity, AuthError> {
        self.users.get(token).cloned().ok_or(AuthError::UnknownToken)
    }
}

/// Development provider: the token is `id` or `id:display name`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrustClaims;

#[async_trait]
impl ClaimsProvider for TrustClaims {
    async fn resolve(&self, token: &str) -> Result<PublicIdentity, AuthError> {
        let (id, name) = match token.split_once(':') {
            Some((id, name)) if !name.trim().is_empty() => (id, name.trim()),
            Some((id, _)) => (id, id),
            None => (token, token),
        };
        validate_id(IdKind::Identity, id).map_err(|e| AuthError::Malformed(e.to_string()))?;
        Ok(PublicIdentity::new(id, name))
    }
}

/// Build the provider selected by `[server.auth]`.
pub fn from_config(config: &AuthConfig) -> Arc<dyn ClaimsProvider> {
    match config.mode {
        AuthMode::Trust => {
            tracing::warn!("Trust auth mode enabled; any well-formed token is accepted");
            Arc::new(TrustClaims)
        }
        AuthMode::Static => {
            let claims = config.users.iter().fold(StaticClaims::new(), |claims, user| {
                let display_name = if user.display_name.is_empty() {
                    user.id.clone()
                } else {
                    user.display_name.clone()
                };
                let identity = PublicIdentity {
                    id: user.id.clone(),
                    display_name,
                    avatar: user.avatar.clone(),
                };
                claims.with_user(&user.token, identity)
            });
            tracing::info!(users = config.users.len(), "Static token table loaded");
            Arc::new(claims)
        }
    }
}
