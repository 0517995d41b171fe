//! GridFS backend.
//!
//! Blobs live in a GridFS bucket whose name is the configured prefix, so the
//! underlying collections are `<prefix>.files` and `<prefix>.chunks`.
//! Identifiers are the hex form of the ObjectId GridFS assigns on upload.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use bson::{doc, oid::ObjectId, Bson};
use futures::TryStreamExt;
use mongodb::{
    error::{Error as MongoError, ErrorKind, GridFsErrorKind},
    gridfs::{GridFsBucket, GridFsUploadStream},
    options::GridFsBucketOptions,
    Client,
};
use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::compat::{Compat, FuturesAsyncReadCompatExt, FuturesAsyncWriteCompatExt};
use tracing::{debug, info, warn};

use crate::{IdentifierError, Storage};

/// Database used when neither the configuration nor the URL names one.
const DEFAULT_DATABASE: &str = "test";
const DEFAULT_PREFIX: &str = "fs";

#[derive(Debug, Clone)]
pub struct MongoConfig {
    /// Connection string, or a bare `host[:port]`.
    pub url: String,
    /// GridFS bucket name.
    pub prefix: String,
    /// Overrides the database named in `url`.
    pub database: Option<String>,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            url: "localhost".to_string(),
            prefix: DEFAULT_PREFIX.to_string(),
            database: None,
        }
    }
}

impl MongoConfig {
    /// Connection string handed to the driver. A bare host is accepted and
    /// gets the `mongodb://` scheme prepended.
    pub fn connection_uri(&self) -> String {
        if self.url.contains("://") {
            self.url.clone()
        } else {
            format!("mongodb://{}", self.url)
        }
    }
}

/// [`Storage`] over one shared MongoDB client.
///
/// The driver pools connections internally; clones share the pool.
#[derive(Debug, Clone)]
pub struct MongoStorage {
    client: Client,
    bucket: GridFsBucket,
}

impl MongoStorage {
    /// Connects and pings the database, so an unreachable backend fails here
    /// rather than on the first request.
    pub async fn start(config: &MongoConfig) -> Result<Self> {
        let uri = config.connection_uri();
        let client = Client::with_uri_str(&uri)
            .await
            .context("invalid MongoDB connection string")?;

        let database = match &config.database {
            Some(name) => client.database(name),
            None => client
                .default_database()
                .unwrap_or_else(|| client.database(DEFAULT_DATABASE)),
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .with_context(|| format!("MongoDB database '{}' is unreachable", database.name()))?;

        let mut options = GridFsBucketOptions::default();
        options.bucket_name = Some(config.prefix.clone());
        let bucket = database.gridfs_bucket(options);

        info!(
            database = %database.name(),
            prefix = %config.prefix,
            "connected to MongoDB GridFS"
        );

        Ok(Self { client, bucket })
    }

    /// Closes the client once outstanding cursors and sessions are released.
    pub async fn stop(self) {
        self.client.shutdown().await;
        info!("MongoDB client shut down");
    }

    async fn abort_upload(upload: Compat<GridFsUploadStream>) {
        let mut upload = upload.into_inner();
        if let Err(error) = upload.abort().await {
            warn!(%error, "failed to abort GridFS upload; orphaned chunks may remain");
        }
    }
}

#[async_trait]
impl Storage for MongoStorage {
    async fn post(&self, reader: &mut (dyn AsyncRead + Unpin + Send)) -> Result<String> {
        let upload = self
            .bucket
            .open_upload_stream("")
            .await
            .context("failed to open GridFS upload stream")?;
        let mut upload = upload.compat_write();

        let copied = match io::copy(reader, &mut upload).await {
            Ok(copied) => copied,
            Err(err) => {
                Self::abort_upload(upload).await;
                return Err(anyhow::Error::new(err).context("failed to write blob to GridFS"));
            }
        };
        if let Err(err) = upload.shutdown().await {
            Self::abort_upload(upload).await;
            return Err(anyhow::Error::new(err).context("failed to finish GridFS upload"));
        }

        let id = object_id_hex(upload.get_ref().id())?;
        debug!(%id, size = copied, "blob stored in GridFS");
        Ok(id)
    }

    async fn get(
        &self,
        id: &str,
        writer: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> Result<(), IdentifierError> {
        let oid = parse_object_id(id)?;
        let download = self
            .bucket
            .open_download_stream(Bson::ObjectId(oid))
            .await
            .map_err(|err| classify(id, err))?;

        let mut download = download.compat();
        io::copy(&mut download, writer).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn get_list(&self) -> Result<Vec<String>> {
        let mut files = self
            .bucket
            .find(doc! {})
            .await
            .context("failed to query GridFS files collection")?;

        let mut ids = Vec::new();
        while let Some(file) = files
            .try_next()
            .await
            .context("failed to read GridFS files cursor")?
        {
            ids.push(object_id_hex(&file.id)?);
        }
        Ok(ids)
    }

    async fn delete(&self, id: &str) -> Result<(), IdentifierError> {
        let oid = parse_object_id(id)?;
        self.bucket
            .delete(Bson::ObjectId(oid))
            .await
            .map_err(|err| classify(id, err))
    }
}

fn parse_object_id(id: &str) -> Result<ObjectId, IdentifierError> {
    ObjectId::parse_str(id).map_err(|_| IdentifierError::IllFormed(id.to_owned()))
}

fn classify(id: &str, err: MongoError) -> IdentifierError {
    match err.kind.as_ref() {
        ErrorKind::GridFs(GridFsErrorKind::FileNotFound { .. }) => {
            IdentifierError::NotFound(id.to_owned())
        }
        _ => IdentifierError::Backend(err.into()),
    }
}

fn object_id_hex(id: &Bson) -> Result<String> {
    match id {
        Bson::ObjectId(oid) => Ok(oid.to_hex()),
        other => Err(anyhow!("GridFS file has non-ObjectId identifier {other}")),
    }
}
