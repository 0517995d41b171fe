//! Runs against a live MongoDB when `BLOB_TEST_MONGO_URL` is set; otherwise
//! the test returns early.

use anyhow::Result;
use blob_storage::{MongoConfig, MongoStorage, Storage};
use uuid::Uuid;

async fn start_storage() -> Result<Option<MongoStorage>> {
    let Ok(url) = std::env::var("BLOB_TEST_MONGO_URL") else {
        eprintln!("BLOB_TEST_MONGO_URL not set; skipping GridFS integration test");
        return Ok(None);
    };
    let config = MongoConfig {
        url,
        prefix: format!("blob_storage_test_{}", Uuid::new_v4().simple()),
        database: None,
    };
    Ok(Some(MongoStorage::start(&config).await?))
}

async fn read_blob(storage: &MongoStorage, id: &str) -> Result<Vec<u8>, blob_storage::IdentifierError> {
    let mut sink = Vec::new();
    storage.get(id, &mut sink).await?;
    Ok(sink)
}

#[tokio::test]
async fn gridfs_lifecycle() -> Result<()> {
    let Some(storage) = start_storage().await? else {
        return Ok(());
    };

    assert!(storage.get_list().await?.is_empty(), "fresh bucket is not empty");

    let mut content: &[u8] = b"filecontent";
    let id = storage.post(&mut content).await?;
    assert_eq!(read_blob(&storage, &id).await?, b"filecontent");

    let err = read_blob(&storage, "badid").await.unwrap_err();
    assert!(err.is_ill_formed() && !err.is_not_found());

    assert_eq!(storage.get_list().await?, vec![id.clone()]);

    let err = storage.delete("badid").await.unwrap_err();
    assert!(err.is_ill_formed() && !err.is_not_found());

    storage.delete(&id).await?;

    let err = storage.delete(&id).await.unwrap_err();
    assert!(err.is_not_found() && !err.is_ill_formed());
    let err = read_blob(&storage, &id).await.unwrap_err();
    assert!(err.is_not_found() && !err.is_ill_formed());

    assert!(storage.get_list().await?.is_empty());

    storage.stop().await;
    Ok(())
}

#[tokio::test]
async fn gridfs_round_trips_empty_and_multi_chunk_blobs() -> Result<()> {
    let Some(storage) = start_storage().await? else {
        return Ok(());
    };

    // Default GridFS chunks are 255 KiB; this spans several of them.
    let large: Vec<u8> = (0..1_000_000u32).map(|i| (i % 253) as u8).collect();
    let mut ids = Vec::new();
    for content in [&b""[..], large.as_slice()] {
        let mut reader = content;
        let id = storage.post(&mut reader).await?;
        assert_eq!(read_blob(&storage, &id).await?, content);
        ids.push(id);
    }

    let mut listed = storage.get_list().await?;
    listed.sort();
    ids.sort();
    assert_eq!(listed, ids);

    for id in &ids {
        storage.delete(id).await?;
    }
    storage.stop().await;
    Ok(())
}
