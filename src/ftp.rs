use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use suppaftp::{list::File, types::FileType, FtpError, FtpStream};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::config::FtpConfig;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("ftp error: {0}")]
    Ftp(#[from] FtpError),
    #[error("'{0}' not found")]
    NotFound(String),
    #[error("ftp session closed")]
    Closed,
    #[error("ftp task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub name: String,
    pub is_file: bool,
}

/// The legacy file store replays are copied from.
#[async_trait]
pub trait ReplaySource: Send + Sync {
    /// Downloads the whole file at `path`.
    async fn fetch(&self, path: &str) -> Result<Bytes, SourceError>;

    async fn list(&self, directory: &str) -> Result<Vec<SourceEntry>, SourceError>;

    async fn close(&self) -> Result<(), SourceError>;
}

/// A single FTP control connection shared by every transfer.
///
/// `suppaftp::FtpStream` is blocking, so each call runs on the blocking pool
/// and transfers are serialized on the session lock.
#[derive(Clone)]
pub struct FtpSource {
    session: Arc<Mutex<Option<FtpStream>>>,
}

impl FtpSource {
    pub async fn connect(config: &FtpConfig) -> Result<FtpSource, SourceError> {
        let config = config.clone();
        let stream = tokio::task::spawn_blocking(move || -> Result<FtpStream, FtpError> {
            let mut stream = FtpStream::connect((config.host.as_str(), config.port))?;
            stream.login(&config.user, &config.password)?;
            stream.transfer_type(FileType::Binary)?;
            Ok(stream)
        })
        .await??;

        log::info!("connected to ftp server");

        Ok(FtpSource {
            session: Arc::new(Mutex::new(Some(stream))),
        })
    }

    async fn with_session<T, F>(&self, op: F) -> Result<T, SourceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut FtpStream) -> Result<T, SourceError> + Send + 'static,
    {
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = session.blocking_lock();
            let stream = guard.as_mut().ok_or(SourceError::Closed)?;
            op(stream)
        })
        .await?
    }
}

#[async_trait]
impl ReplaySource for FtpSource {
    async fn fetch(&self, path: &str) -> Result<Bytes, SourceError> {
        let path = path.to_string();
        self.with_session(move |stream| {
            let buffer = stream.retr_as_buffer(&path)?;
            Ok(Bytes::from(buffer.into_inner()))
        })
        .await
    }

    async fn list(&self, directory: &str) -> Result<Vec<SourceEntry>, SourceError> {
        let directory = directory.to_string();
        let lines = self
            .with_session(move |stream| Ok(stream.list(Some(&directory))?))
            .await?;

        Ok(lines.iter().filter_map(|line| parse_list_line(line)).collect())
    }

    /// Sends QUIT unless a transfer still holds the session, in which case
    /// the connection is left for the process exit to drop.
    async fn close(&self) -> Result<(), SourceError> {
        let stream = match self.session.try_lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => {
                log::warn!("ftp session busy, skipping QUIT");
                return Ok(());
            }
        };

        match stream {
            Some(mut stream) => {
                tokio::task::spawn_blocking(move || stream.quit().map_err(SourceError::from))
                    .await?
            }
            None => Ok(()),
        }
    }
}

fn parse_list_line(line: &str) -> Option<SourceEntry> {
    match File::from_str(line) {
        Ok(file) => Some(SourceEntry {
            name: file.name().to_string(),
            is_file: file.is_file(),
        }),
        Err(e) => {
            log::debug!("skipping unparseable listing line {:?}: {}", line, e);
            None
        }
    }
}
