//! Cloud lifecycle error types.

use std::time::Duration;

use thiserror::Error;

use crate::provider::ResourceKind;

/// Errors that can occur while talking to the cloud or provisioning workers.
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("cloud api error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("unexpected response: {0}")]
    Response(String),

    #[error("failed to resolve {kind} {name:?}: {reason}")]
    Resolution {
        kind: ResourceKind,
        name: String,
        reason: String,
    },

    #[error("server not found: {0}")]
    ServerNotFound(String),

    #[error("server {0} has no private network address")]
    NoPrivateAddress(String),

    #[error("server {servername} not running after {waited:?}")]
    ProvisioningTimedOut { servername: String, waited: Duration },

    #[error("server {servername} created but not registered: {source}")]
    Registration {
        servername: String,
        #[source]
        source: rffmpeg_state::StateError,
    },

    #[error("server {servername} deleted but still registered: {source}")]
    Deregistration {
        servername: String,
        #[source]
        source: rffmpeg_state::StateError,
    },
}

pub type CloudResult<T> = Result<T, CloudError>;
