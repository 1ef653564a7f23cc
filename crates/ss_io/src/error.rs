use derive_more::{Display, Error};

/// Errors that can occur while binding or configuring a [`crate::Socket`].
#[derive(Debug, Display, Error)]
pub enum BindError {
    /// The underlying OS call failed.
    #[display("failed to bind socket: {_0}")]
    Io(std::io::Error),
    /// The socket could not be switched into non-blocking mode.
    #[display("failed to set socket non-blocking: {_0}")]
    NonBlocking(std::io::Error),
}
