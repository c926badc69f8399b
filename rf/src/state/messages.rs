//! Session store messages
//!
//! Commands and responses for the actor pattern.

use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{InvalidTransition, Session};

/// Errors from session store operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("Session {0} is busy with another operation")]
    Busy(String),

    #[error("Session reference '{reference}' is ambiguous: {candidates:?}")]
    Ambiguous { reference: String, candidates: Vec<String> },

    #[error("Session store is read-only")]
    ReadOnly,

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Channel error")]
    ChannelError,
}

/// Response from session store operations
pub type StateResponse<T> = Result<T, StateError>;

/// Commands sent to the SessionStore actor
#[derive(Debug)]
pub enum StateCommand {
    Create {
        session: Box<Session>,
        reply: oneshot::Sender<StateResponse<String>>,
    },
    Get {
        id: String,
        reply: oneshot::Sender<StateResponse<Option<Session>>>,
    },
    Update {
        session: Box<Session>,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    List {
        reply: oneshot::Sender<StateResponse<Vec<Session>>>,
    },
    Resolve {
        reference: String,
        reply: oneshot::Sender<StateResponse<String>>,
    },
    Shutdown,
}
