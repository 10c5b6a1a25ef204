//! Caller authentication and finance roles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    FinanceReader,
    FinanceWriter,
}

impl Role {
    /// Writers may do everything readers may.
    pub fn allows(&self, required: Role) -> bool {
        matches!(
            (self, required),
            (Role::FinanceWriter, _) | (Role::FinanceReader, Role::FinanceReader)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::FinanceReader => "finance_reader",
            Role::FinanceWriter => "finance_writer",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reader" | "finance_reader" => Ok(Role::FinanceReader),
            "writer" | "finance_writer" => Ok(Role::FinanceWriter),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub role: Role,
}

impl Actor {
    pub fn require(&self, role: Role) -> Result<(), AuthError> {
        if self.role.allows(role) {
            Ok(())
        } else {
            Err(AuthError::Forbidden {
                actor: self.id.clone(),
                required: role,
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,
    #[error("Invalid token")]
    InvalidToken,
    #[error("Actor {actor} lacks the {required} role")]
    Forbidden { actor: String, required: Role },
}

/// Resolves a caller token to an actor.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Actor, AuthError>;
}

/// One configured token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub token: String,
    pub actor_id: String,
    pub role: Role,
}

/// Fixed token table loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenAuth {
    actors: HashMap<String, Actor>,
}

impl StaticTokenAuth {
    pub fn new(grants: &[TokenGrant]) -> Self {
        let actors = grants
            .iter()
            .map(|g| {
                (
                    g.token.clone(),
                    Actor {
                        id: g.actor_id.clone(),
                        role: g.role,
                    },
                )
            })
            .collect();
        StaticTokenAuth { actors }
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}

#[async_trait]
impl AuthProvider for StaticTokenAuth {
    async fn resolve(&self, token: &str) -> Result<Actor, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        self.actors.get(token).cloned().ok_or(AuthError::InvalidToken)
    }
}
