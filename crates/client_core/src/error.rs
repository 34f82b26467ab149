use thiserror::Error;

/// Typed failures of the session controller. Precondition violations are
/// separated from collaborator failures so a front end can decide which
/// deserve a notification and which just disable a control.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("not signed in")]
    NotAuthenticated,
    #[error("no server selected")]
    NoServerSelected,
    #[error("a connect attempt is already in flight")]
    ConnectInProgress,
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("signed out while the connect attempt was in flight")]
    ConnectAborted,
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("server directory unavailable: {0}")]
    DirectoryUnavailable(String),
    #[error("connection failed: {0}")]
    ConnectFailed(String),
    #[error("log history unavailable: {0}")]
    HistoryUnavailable(String),
}
