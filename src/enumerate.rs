use std::sync::Arc;

use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use thiserror::Error;

use crate::{
    ftp::{ReplaySource, SourceEntry, SourceError},
    replay::{ReplayId, REPLAY_DIR, REPLAY_EXTENSION},
    scores::ScoreIndex,
};

#[derive(Error, Debug)]
pub enum EnumerateError {
    #[error("querying {table} at offset {offset}: {source}")]
    Query {
        table: String,
        offset: u64,
        #[source]
        source: sqlx::Error,
    },
    #[error("listing {directory}: {source}")]
    Listing {
        directory: String,
        #[source]
        source: SourceError,
    },
}

pub type ReplayIds = BoxStream<'static, Result<ReplayId, EnumerateError>>;

/// Lazily pages through every table in turn, yielding score ids.
pub fn score_ids(
    index: Arc<dyn ScoreIndex>,
    tables: Vec<String>,
    cutoff: i64,
    page_size: u32,
) -> ReplayIds {
    stream::iter(tables)
        .map(move |table| table_pages(index.clone(), table, cutoff, page_size))
        .flatten()
        .map_ok(|ids| {
            stream::iter(
                ids.into_iter()
                    .map(|id| Ok::<_, EnumerateError>(ReplayId::Score(id))),
            )
        })
        .try_flatten()
        .boxed()
}

/// Pages of ids from a single table. The offset advances by the number of
/// rows actually returned and paging stops after the first short page.
fn table_pages(
    index: Arc<dyn ScoreIndex>,
    table: String,
    cutoff: i64,
    page_size: u32,
) -> impl Stream<Item = Result<Vec<i64>, EnumerateError>> + Send + 'static {
    stream::try_unfold(Some(0u64), move |offset| {
        let index = index.clone();
        let table = table.clone();
        async move {
            let Some(offset) = offset else {
                return Ok(None);
            };

            let ids = index
                .page(&table, cutoff, page_size, offset)
                .await
                .map_err(|source| EnumerateError::Query {
                    table: table.clone(),
                    offset,
                    source,
                })?;
            log::debug!("{}: offset {} returned {} rows", table, offset, ids.len());

            let next = if ids.len() < page_size as usize {
                log::info!("Done with {}", table);
                None
            } else {
                Some(offset + ids.len() as u64)
            };

            Ok::<_, EnumerateError>(Some((ids, next)))
        }
    })
}

/// Replays found in the listing of `replays/` on the source.
pub async fn listed_ids(source: &dyn ReplaySource) -> Result<ReplayIds, EnumerateError> {
    let entries = source
        .list(REPLAY_DIR)
        .await
        .map_err(|source| EnumerateError::Listing {
            directory: REPLAY_DIR.to_string(),
            source,
        })?;

    let ids = replay_files(entries);
    log::info!("found {} replays in {}", ids.len(), REPLAY_DIR);

    Ok(stream::iter(ids.into_iter().map(Ok)).boxed())
}

/// Plain files ending in `.osr`; directories and other files are skipped.
pub fn replay_files(entries: Vec<SourceEntry>) -> Vec<ReplayId> {
    entries
        .into_iter()
        .filter(|entry| entry.is_file && entry.name.ends_with(REPLAY_EXTENSION))
        .map(|entry| ReplayId::from_file_name(&entry.name))
        .collect()
}
