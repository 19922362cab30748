use crate::service::Protocol;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The kind of named entity an operation failed to find or collided on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Entity {
    Connector,
    Credential,
    IssuedToken,
    ServiceInterface,
    Target,
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::Connector => "connector".fmt(f),
            Entity::Credential => "credential".fmt(f),
            Entity::IssuedToken => "issued token".fmt(f),
            Entity::ServiceInterface => "service interface".fmt(f),
            Entity::Target => "target".fmt(f),
        }
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("{entity} {name:?} not found")]
    NotFound { entity: Entity, name: String },

    #[error("{entity} {name:?} already exists")]
    AlreadyExists { entity: Entity, name: String },

    #[error("connection token {path:?} not found")]
    TokenNotFound { path: String },

    #[error("invalid connection token: {reason}")]
    TokenInvalid { reason: String },

    #[error("the site router is not deployed")]
    NotDeployed,

    #[error("unsupported target type {0:?}; expected deployment, statefulset, pod or service")]
    UnsupportedTargetType(String),

    #[error("connector {name:?} carries this site's own control traffic; pass force to remove it")]
    CurrentConnector { name: String },

    #[error("service {address:?} speaks {expected} but the target was bound as {given}")]
    ProtocolMismatch {
        address: String,
        expected: Protocol,
        given: Protocol,
    },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("conflicting write to {name:?}")]
    Conflict { name: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("store: {0}")]
    Store(#[source] anyhow::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. } | Error::TokenNotFound { .. }
        )
    }
}
