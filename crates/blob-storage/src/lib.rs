//! Blob persistence behind a single [`Storage`] contract.
//!
//! Identifiers are assigned by the backend when a blob is uploaded and are
//! opaque to callers. Operations keyed by an identifier report failures through
//! [`IdentifierError`], which keeps a malformed identifier apart from a missing
//! blob so the HTTP layer can answer the two differently.
//!
//! [`MongoStorage`] is the production backend (MongoDB GridFS).
//! [`MemoryStorage`] keeps blobs in process and is used by tests and local
//! development.

mod error;
mod memory;
mod mongo;

pub use error::IdentifierError;
pub use memory::MemoryStorage;
pub use mongo::{MongoConfig, MongoStorage};

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// Capability set every blob backend provides.
///
/// Implementations are shared across concurrently running requests, so every
/// method takes `&self` and must tolerate interleaving with any other call.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Persists everything readable from `reader` as a new blob and returns
    /// the identifier the backend assigned to it.
    async fn post(&self, reader: &mut (dyn AsyncRead + Unpin + Send)) -> Result<String>;

    /// Copies the blob stored under `id` into `writer`.
    ///
    /// Identifier syntax is checked before existence: a malformed `id` is
    /// always [`IdentifierError::IllFormed`], never
    /// [`IdentifierError::NotFound`]. Bytes already handed to `writer` stay
    /// there when the copy fails part way.
    async fn get(
        &self,
        id: &str,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<(), IdentifierError>;

    /// Lists every stored identifier in backend enumeration order. An empty
    /// store yields an empty list.
    async fn get_list(&self) -> Result<Vec<String>>;

    /// Removes the blob stored under `id`. Classification follows
    /// [`Storage::get`].
    async fn delete(&self, id: &str) -> Result<(), IdentifierError>;
}
