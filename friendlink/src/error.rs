//! Unified error types for the friendlink SDK.

use crate::callback::CallbackId;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the friendlink SDK.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The native client could not be brought up (no pipe, no user, no identity).
    #[error("initialization: {0}")]
    Init(String),

    /// A raw payload did not match the layout expected for its callback id.
    #[error("callback {id}: expected {expected}-byte payload, got {actual}")]
    Decode {
        /// Discriminator of the offending record.
        id: CallbackId,
        /// Payload size the decoder expects.
        expected: usize,
        /// Payload size actually received.
        actual: usize,
    },

    /// A sink is already registered for this callback id.
    #[error("callback {0} already has a registered sink")]
    AlreadyRegistered(CallbackId),

    /// The native client refused a forwarded action.
    #[error("native: {0}")]
    Native(String),

    /// An argument passed to the SDK was invalid.
    #[error("{0}")]
    InvalidArgument(String),
}

/// Map a native boolean status to a [`Result`], naming the refused action.
#[inline]
pub(crate) fn check(ok: bool, action: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(Error::Native(format!("{action} was refused")))
    }
}
