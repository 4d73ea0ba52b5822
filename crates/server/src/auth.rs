//! Token authentication.
//!
//! Session issuance is owned by an external collaborator; this subsystem
//! only needs `authenticate(token) -> identity`. WebSocket connections pass
//! the token as a `?token=<token>` query parameter and are rejected with
//! 401 before upgrade when it does not resolve. The `/health` endpoint is
//! unauthenticated.

use std::collections::HashMap;
use std::path::Path;

use deskline_protocol::Role;
use serde::Deserialize;

/// An authenticated participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub role: Role,
}

/// Resolves opaque bearer tokens to identities.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Option<Identity>;
}

/// Token table loaded at startup. Stands in for the real auth collaborator
/// in development and tests.
#[derive(Default)]
pub struct StaticTokens {
    tokens: HashMap<String, Identity>,
}

#[derive(Deserialize)]
struct TokenEntry {
    id: String,
    role: Role,
}

impl StaticTokens {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn insert(&mut self, token: impl Into<String>, id: impl Into<String>, role: Role) {
        self.tokens.insert(
            token.into(),
            Identity {
                id: id.into(),
                role,
            },
        );
    }

    /// Load a JSON file mapping token -> { id, role }.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let entries: HashMap<String, TokenEntry> = serde_json::from_str(&raw)?;
        let tokens = entries
            .into_iter()
            .map(|(token, e)| {
                (
                    token,
                    Identity {
                        id: e.id,
                        role: e.role,
                    },
                )
            })
            .collect();
        Ok(Self { tokens })
    }
}

impl Authenticator for StaticTokens {
    fn authenticate(&self, token: &str) -> Option<Identity> {
        self.tokens.get(token).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_token_is_rejected() {
        let auth = StaticTokens::new();
        assert!(auth.authenticate("nope").is_none());
    }

    #[test]
    fn known_token_resolves_identity() {
        let mut auth = StaticTokens::new();
        auth.insert("tok-1", "admin-1", Role::Admin);

        let identity = auth.authenticate("tok-1").unwrap();
        assert_eq!(identity.id, "admin-1");
        assert_eq!(identity.role, Role::Admin);
    }

    #[test]
    fn loads_token_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(
            &path,
            r#"{"tok-c":{"id":"cust-1","role":"customer"},"tok-a":{"id":"admin-1","role":"admin"}}"#,
        )
        .unwrap();

        let auth = StaticTokens::load(&path).unwrap();
        assert_eq!(auth.authenticate("tok-c").unwrap().role, Role::Customer);
        assert_eq!(auth.authenticate("tok-a").unwrap().id, "admin-1");
    }
}
