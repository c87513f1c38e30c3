//! Typed callbacks: payload decoding and decode-and-invoke sinks.
//!
//! A [`CallbackPayload`] knows its discriminator and how to read itself from
//! the raw bytes of a [`RawCallback`](crate::RawCallback). A [`Sink`] is the
//! type-erased capability stored in the [`CallbackRegistry`]; [`Callback<T>`]
//! builds one from a payload type and a handler closure.

mod payload;
mod registry;

use std::fmt;
use std::marker::PhantomData;

use crate::error::Result;

pub use payload::{
    AppEventStateChange, FriendAdded, FriendChatMsg, FriendProfileInfoResponse,
    PersonaStateChange,
};
pub use registry::{CallbackRegistry, Registration};

/// Numeric discriminator identifying a kind of native callback.
pub type CallbackId = i32;

/// A strongly-typed callback payload with a fixed little-endian layout.
pub trait CallbackPayload: Sized + Send + 'static {
    /// Discriminator this payload is delivered under.
    const ID: CallbackId;
    /// Exact payload size in bytes.
    const SIZE: usize;

    /// Read the payload. Fails with [`Error::Decode`](crate::Error::Decode)
    /// when `raw` is not exactly [`SIZE`](Self::SIZE) bytes.
    fn decode(raw: &[u8]) -> Result<Self>;

    /// Write the payload in the layout [`decode`](Self::decode) reads.
    fn encode(&self) -> Vec<u8>;
}

/// Type-erased decode-and-invoke capability bound to one discriminator.
pub trait Sink: Send + Sync {
    /// Decode `raw` and hand the payload to the handler.
    fn run(&self, raw: &[u8]) -> Result<()>;
}

/// A [`Sink`] for payload type `T` that forwards decoded payloads to a closure.
pub struct Callback<T> {
    handler: Box<dyn Fn(T) + Send + Sync>,
    _payload: PhantomData<fn(T)>,
}

impl<T: CallbackPayload> Callback<T> {
    /// Wrap a handler.
    pub fn new(handler: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self {
            handler: Box::new(handler),
            _payload: PhantomData,
        }
    }
}

impl<T: CallbackPayload> Sink for Callback<T> {
    fn run(&self, raw: &[u8]) -> Result<()> {
        let payload = T::decode(raw)?;
        (self.handler)(payload);
        Ok(())
    }
}

impl<T: CallbackPayload> fmt::Debug for Callback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback").field("id", &T::ID).finish()
    }
}
