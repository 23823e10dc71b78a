use async_trait::async_trait;
use sqlx::{mysql::MySqlPoolOptions, MySqlPool};

use crate::config::DatabaseConfig;

/// Read-only access to the score tables that reference replays.
#[async_trait]
pub trait ScoreIndex: Send + Sync {
    /// Ids of scores set before `cutoff`, newest first.
    async fn page(
        &self,
        table: &str,
        cutoff: i64,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<i64>, sqlx::Error>;
}

#[derive(Clone)]
pub struct MySqlScores {
    pool: MySqlPool,
}

impl MySqlScores {
    pub async fn connect(config: &DatabaseConfig) -> Result<MySqlScores, sqlx::Error> {
        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .connect(&config.url)
            .await?;

        log::info!("connected to database");

        Ok(MySqlScores { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ScoreIndex for MySqlScores {
    async fn page(
        &self,
        table: &str,
        cutoff: i64,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<i64>, sqlx::Error> {
        // table names are validated when the config is loaded
        let query = format!(
            "SELECT id FROM {table} WHERE {table}.time < ? ORDER BY {table}.time DESC LIMIT ? OFFSET ?"
        );

        sqlx::query_scalar::<_, i64>(&query)
            .bind(cutoff)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await
    }
}
