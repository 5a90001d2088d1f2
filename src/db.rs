use std::{future::Future, time::Duration};

use anyhow::Context;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::{info, warn};

pub async fn connect(database_url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
        .context("connect to database")
}

/// Keep trying to open a pool until the database accepts connections.
pub async fn wait_for_db(
    database_url: &str,
    attempts: u32,
    delay: Duration,
) -> anyhow::Result<PgPool> {
    info!("waiting for database");
    let pool = retry(attempts, delay, || connect(database_url)).await?;
    info!("database available");
    Ok(pool)
}

pub async fn migrate(db: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(db)
        .await
        .context("run migrations")?;
    Ok(())
}

/// Runs `op` up to `attempts` times, sleeping `delay` between failures.
pub async fn retry<T, F, Fut>(attempts: u32, delay: Duration, mut op: F) -> anyhow::Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < attempts => {
                warn!(attempt, error = %e, "database unavailable, waiting");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e.context(format!("gave up after {attempts} attempts"))),
        }
    }
}

pub fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|d| d.is_unique_violation())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_returns_once_the_operation_succeeds() {
        let calls = AtomicU32::new(0);
        let out = retry(10, Duration::from_millis(1), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= 5 {
                anyhow::bail!("not ready ({n})");
            }
            Ok(n)
        })
        .await
        .unwrap();

        assert_eq!(out, 6);
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn retry_gives_up_after_the_last_attempt() {
        let calls = AtomicU32::new(0);
        let err = retry(3, Duration::from_millis(1), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow::anyhow!("still down"))
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.to_string().contains("gave up after 3 attempts"));
    }

    #[tokio::test]
    async fn retry_calls_once_when_ready() {
        let calls = AtomicU32::new(0);
        retry(0, Duration::from_millis(1), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
