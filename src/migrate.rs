use std::sync::Arc;

use futures::{Stream, TryStreamExt};
use thiserror::Error;

use crate::{
    config::WritePolicy,
    enumerate::EnumerateError,
    ftp::ReplaySource,
    replay::{ReplayId, TransferOutcome},
    store::ReplayStore,
};

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error(transparent)]
    Enumerate(#[from] EnumerateError),
    #[error("failed to save replay {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: object_store::Error,
    },
}

/// Copies replays from the file server into the bucket, skipping ones already there.
pub struct Migrator {
    source: Arc<dyn ReplaySource>,
    store: ReplayStore,
    on_write_error: WritePolicy,
    concurrency: usize,
}

impl Migrator {
    pub fn new(source: Arc<dyn ReplaySource>, store: ReplayStore) -> Migrator {
        Migrator {
            source,
            store,
            on_write_error: WritePolicy::default(),
            concurrency: 1,
        }
    }

    pub fn with_write_policy(mut self, policy: WritePolicy) -> Migrator {
        self.on_write_error = policy;
        self
    }

    /// Maximum number of replays in flight. 1 processes them one at a time.
    pub fn with_concurrency(mut self, concurrency: usize) -> Migrator {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Runs every id through [`Migrator::migrate`]. Stops on the first
    /// enumeration error, or write error under [`WritePolicy::Abort`].
    pub async fn run<S>(&self, ids: S) -> Result<(), MigrateError>
    where
        S: Stream<Item = Result<ReplayId, EnumerateError>>,
    {
        ids.map_err(MigrateError::from)
            .try_for_each_concurrent(self.concurrency, |id| async move {
                self.migrate(&id).await.map(|_| ())
            })
            .await?;

        log::info!("Done");
        Ok(())
    }

    pub async fn migrate(&self, id: &ReplayId) -> Result<TransferOutcome, MigrateError> {
        let key = id.destination_key();
        if self.store.exists(&key).await {
            log::info!("Replay {} already exists on S3", key);
            return Ok(TransferOutcome::AlreadyPresent);
        }

        let path = id.source_path();
        let content = match self.source.fetch(&path).await {
            Ok(content) => content,
            Err(e) => {
                log::info!("Replay {} doesn't exist in FTP", path);
                log::debug!("fetching {}: {}", path, e);
                return Ok(TransferOutcome::SourceMissing);
            }
        };

        match self.store.put(&key, content).await {
            Ok(()) => {
                log::info!("Saved replay {}", key);
                Ok(TransferOutcome::Transferred)
            }
            Err(e) => {
                log::error!("Failed to save replay: {} ({})", key, e);
                match self.on_write_error {
                    WritePolicy::Continue => Ok(TransferOutcome::DestinationWriteFailed),
                    WritePolicy::Abort => Err(MigrateError::Write { key, source: e }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashMap,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream;
    use object_store::{local::LocalFileSystem, memory::InMemory, path::Path, ObjectStore};

    use super::*;
    use crate::ftp::{SourceEntry, SourceError};

    struct FakeFtp {
        files: HashMap<String, Bytes>,
        fetches: AtomicUsize,
    }

    impl FakeFtp {
        fn with(files: &[(&str, &str)]) -> Arc<FakeFtp> {
            Arc::new(FakeFtp {
                files: files
                    .iter()
                    .map(|(path, content)| (path.to_string(), Bytes::from(content.to_string())))
                    .collect(),
                fetches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ReplaySource for FakeFtp {
        async fn fetch(&self, path: &str) -> Result<Bytes, SourceError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| SourceError::NotFound(path.to_string()))
        }

        async fn list(&self, _directory: &str) -> Result<Vec<SourceEntry>, SourceError> {
            Ok(Vec::new())
        }

        async fn close(&self) -> Result<(), SourceError> {
            Ok(())
        }
    }

    async fn content(bucket: &InMemory, key: &str) -> Option<Bytes> {
        match bucket.get(&Path::from(key)).await {
            Ok(result) => Some(result.bytes().await.unwrap()),
            Err(_) => None,
        }
    }

    #[tokio::test]
    async fn transfers_missing_replay() {
        let ftp = FakeFtp::with(&[("replays/replay_7.osr", "osu! replay bytes")]);
        let bucket = Arc::new(InMemory::new());
        let migrator = Migrator::new(ftp.clone(), ReplayStore::from_store(bucket.clone()));

        let outcome = migrator.migrate(&ReplayId::Score(7)).await.unwrap();

        assert_eq!(outcome, TransferOutcome::Transferred);
        assert_eq!(
            content(&bucket, "replays/7.osr").await,
            Some(Bytes::from_static(b"osu! replay bytes"))
        );
    }

    #[tokio::test]
    async fn skips_present_replay_without_fetching() {
        let ftp = FakeFtp::with(&[("replays/replay_7.osr", "new")]);
        let bucket = Arc::new(InMemory::new());
        bucket
            .put(&Path::from("replays/7.osr"), Bytes::from_static(b"old"))
            .await
            .unwrap();
        let migrator = Migrator::new(ftp.clone(), ReplayStore::from_store(bucket.clone()));

        let outcome = migrator.migrate(&ReplayId::Score(7)).await.unwrap();

        assert_eq!(outcome, TransferOutcome::AlreadyPresent);
        assert_eq!(ftp.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(
            content(&bucket, "replays/7.osr").await,
            Some(Bytes::from_static(b"old"))
        );
    }

    #[tokio::test]
    async fn missing_source_is_not_written() {
        let ftp = FakeFtp::with(&[]);
        let bucket = Arc::new(InMemory::new());
        let migrator = Migrator::new(ftp.clone(), ReplayStore::from_store(bucket.clone()));

        let outcome = migrator.migrate(&ReplayId::Score(3)).await.unwrap();

        assert_eq!(outcome, TransferOutcome::SourceMissing);
        assert_eq!(content(&bucket, "replays/3.osr").await, None);
    }

    #[tokio::test]
    async fn enumeration_error_stops_run() {
        let ftp = FakeFtp::with(&[("replays/replay_1.osr", "one")]);
        let bucket = Arc::new(InMemory::new());
        let migrator = Migrator::new(ftp, ReplayStore::from_store(bucket.clone()));

        let ids = stream::iter(vec![
            Ok(ReplayId::Score(1)),
            Err(EnumerateError::Query {
                table: "scores".to_string(),
                offset: 1000,
                source: sqlx::Error::RowNotFound,
            }),
        ]);

        let result = migrator.run(ids).await;

        assert!(matches!(result, Err(MigrateError::Enumerate(_))));
        assert!(content(&bucket, "replays/1.osr").await.is_some());
    }

    /// A bucket where `replays` is a plain file, so every replay write fails.
    fn unwritable_bucket(dir: &tempfile::TempDir) -> ReplayStore {
        std::fs::write(dir.path().join("replays"), b"not a directory").unwrap();
        ReplayStore::from_store(Arc::new(
            LocalFileSystem::new_with_prefix(dir.path()).unwrap(),
        ))
    }

    #[tokio::test]
    async fn write_failure_continues_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let ftp = FakeFtp::with(&[
            ("replays/replay_1.osr", "one"),
            ("replays/replay_2.osr", "two"),
        ]);
        let migrator = Migrator::new(ftp.clone(), unwritable_bucket(&dir));

        let outcome = migrator.migrate(&ReplayId::Score(1)).await.unwrap();
        assert_eq!(outcome, TransferOutcome::DestinationWriteFailed);

        let ids = stream::iter(vec![Ok(ReplayId::Score(1)), Ok(ReplayId::Score(2))]);
        migrator.run(ids).await.unwrap();
        assert_eq!(ftp.fetches.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn write_failure_aborts_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let ftp = FakeFtp::with(&[
            ("replays/replay_1.osr", "one"),
            ("replays/replay_2.osr", "two"),
        ]);
        let migrator = Migrator::new(ftp.clone(), unwritable_bucket(&dir))
            .with_write_policy(WritePolicy::Abort);

        let ids = stream::iter(vec![Ok(ReplayId::Score(1)), Ok(ReplayId::Score(2))]);
        let result = migrator.run(ids).await;

        assert!(matches!(
            result,
            Err(MigrateError::Write { ref key, .. }) if key == "replays/1.osr"
        ));
        assert_eq!(ftp.fetches.load(Ordering::SeqCst), 1);
    }
}
