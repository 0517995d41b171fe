use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;

use crate::{IdentifierError, Storage};

/// In-process blob store with UUID identifiers.
///
/// Enumeration follows insertion order. Contents live as long as the last
/// clone of the store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    blobs: Arc<RwLock<Vec<(Uuid, Bytes)>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_id(id: &str) -> Result<Uuid, IdentifierError> {
        Uuid::parse_str(id).map_err(|_| IdentifierError::IllFormed(id.to_owned()))
    }

    fn lookup(&self, id: &str) -> Result<Bytes, IdentifierError> {
        let key = Self::parse_id(id)?;
        self.blobs
            .read()
            .iter()
            .find(|(candidate, _)| *candidate == key)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| IdentifierError::NotFound(id.to_owned()))
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn post(&self, reader: &mut (dyn AsyncRead + Unpin + Send)) -> Result<String> {
        let mut content = Vec::new();
        reader
            .read_to_end(&mut content)
            .await
            .context("failed to read upload stream")?;

        let id = Uuid::new_v4();
        debug!(%id, size = content.len(), "storing blob in memory");
        self.blobs.write().push((id, Bytes::from(content)));
        Ok(id.to_string())
    }

    async fn get(
        &self,
        id: &str,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<(), IdentifierError> {
        let content = self.lookup(id)?;
        writer.write_all(&content).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn get_list(&self) -> Result<Vec<String>> {
        Ok(self
            .blobs
            .read()
            .iter()
            .map(|(id, _)| id.to_string())
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<(), IdentifierError> {
        let key = Self::parse_id(id)?;
        let mut blobs = self.blobs.write();
        let position = blobs
            .iter()
            .position(|(candidate, _)| *candidate == key)
            .ok_or_else(|| IdentifierError::NotFound(id.to_owned()))?;
        blobs.remove(position);
        Ok(())
    }
}
