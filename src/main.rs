use std::{process, sync::Arc};

use anyhow::Context;
use dotenv::dotenv;
use env_logger::Env;

use move_replays::{
    config::{Config, SourceMode},
    enumerate,
    ftp::{FtpSource, ReplaySource},
    migrate::Migrator,
    scores::MySqlScores,
    store,
};

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stdout)
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("error: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(config).await {
        log::error!("error: {:#}", e);
        process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), anyhow::Error> {
    let store = store::new(&config.store)?;
    let ftp = Arc::new(
        FtpSource::connect(&config.ftp)
            .await
            .with_context(|| format!("connecting to {}:{}", config.ftp.host, config.ftp.port))?,
    );

    let scores = match &config.source {
        SourceMode::Database { database, .. } => match MySqlScores::connect(database).await {
            Ok(scores) => Some(scores),
            Err(e) => {
                cleanup(ftp.as_ref(), None).await;
                return Err(e).context("connecting to database");
            }
        },
        SourceMode::Listing { .. } => None,
    };

    let migrator = Migrator::new(ftp.clone(), store)
        .with_write_policy(config.on_write_error)
        .with_concurrency(config.concurrency);

    // in-flight transfers are abandoned on interrupt
    let result = tokio::select! {
        result = migrate(&config, &migrator, ftp.as_ref(), scores.as_ref()) => result,
        _ = tokio::signal::ctrl_c() => {
            log::warn!("interrupted, closing connections");
            Err(anyhow::anyhow!("interrupted"))
        }
    };

    cleanup(ftp.as_ref(), scores.as_ref()).await;
    result
}

async fn migrate(
    config: &Config,
    migrator: &Migrator,
    ftp: &FtpSource,
    scores: Option<&MySqlScores>,
) -> Result<(), anyhow::Error> {
    let ids = match (&config.source, scores) {
        (
            SourceMode::Database {
                tables,
                cutoff,
                page_size,
                ..
            },
            Some(scores),
        ) => enumerate::score_ids(
            Arc::new(scores.clone()),
            tables.clone(),
            *cutoff,
            *page_size,
        ),
        (SourceMode::Listing, _) => enumerate::listed_ids(ftp).await?,
        (SourceMode::Database { .. }, None) => anyhow::bail!("no database connection"),
    };

    migrator.run(ids).await?;
    Ok(())
}

async fn cleanup(ftp: &dyn ReplaySource, scores: Option<&MySqlScores>) {
    if let Err(e) = ftp.close().await {
        log::warn!("closing ftp session: {}", e);
    }
    if let Some(scores) = scores {
        scores.close().await;
    }
}
