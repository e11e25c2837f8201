use std::io;
use std::path::PathBuf;

use feynman_core::RegistryError;
use feynman_server::ServerError;

use crate::lifecycle::{SessionCommand, SessionState};

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    ConfigRender(#[from] toml::ser::Error),

    #[error("invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error("failed to start server runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("server thread exited before reporting its address")]
    ServerGone,

    #[error("event receiver was taken; the session cannot serve a viewer")]
    ReceiverTaken,

    #[error("cannot {command:?} a session that is {from:?}")]
    InvalidTransition {
        from: SessionState,
        command: SessionCommand,
    },
}
