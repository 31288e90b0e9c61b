use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log2::{debug, info};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::scraper::normalize_tld;

/// `<prefix>_<tld without dots>.txt`, e.g. `iran_coir.txt` for `.CO.IR`.
pub fn domain_file_name(prefix: &str, tld: &str) -> String {
    let clean: String = tld.trim().chars().filter(|c| *c != '.').collect::<String>().to_lowercase();
    format!("{}_{}.txt", prefix, clean)
}

/// Writes the domains sorted, one per line, and returns the file path.
pub fn write_domain_file(dir: &Path, prefix: &str, tld: &str, domains: &HashSet<String>) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(domain_file_name(prefix, tld));

    let mut sorted: Vec<&String> = domains.iter().collect();
    sorted.sort();
    let mut content = String::new();
    for domain in sorted {
        content.push_str(domain);
        content.push('\n');
    }

    std::fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
    info!("{} domains for {} written to {}", domains.len(), tld, path.display());
    Ok(path)
}

/// A stored domain row.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct DomainRecord {
    pub id: i64,
    pub domain_name: String,
    pub tld: String,
    pub created_at: DateTime<Utc>,
}

/// SQLite table of discovered domains; `domain_name` is unique.
#[derive(Debug, Clone)]
pub struct DomainStore {
    pool: SqlitePool,
}

impl DomainStore {
    /// Opens (creating if needed) the database at `url`, e.g.
    /// `sqlite://domains.db` or `sqlite::memory:`.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("Invalid database URL {}", url))?
            .create_if_missing(true);
        // every in-memory connection would get its own database
        let mut pool_options = SqlitePoolOptions::new().max_connections(5);
        if url.contains(":memory:") {
            pool_options = pool_options.max_connections(1).idle_timeout(None).max_lifetime(None);
        }
        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", url))?;

        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS domains (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                domain_name TEXT NOT NULL UNIQUE,
                tld TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create domains table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_domains_tld ON domains (tld)")
            .execute(&self.pool)
            .await
            .context("Failed to create tld index")?;
        Ok(())
    }

    /// Stores `domains` under `tld`, skipping names already present.
    /// Returns how many rows were added.
    pub async fn insert_domains<'a, I>(&self, tld: &str, domains: I) -> Result<u64>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let tld = normalize_tld(tld)?;
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for domain in domains {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO domains (domain_name, tld, created_at)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(domain)
            .bind(&tld)
            .bind(now)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to store {}", domain))?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        debug!("Stored {} new domains for {}", inserted, tld);
        Ok(inserted)
    }

    /// Waits for pending writes and closes every connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn list_domains(&self) -> Result<Vec<DomainRecord>> {
        let rows = sqlx::query_as::<_, DomainRecord>(
            "SELECT id, domain_name, tld, created_at FROM domains ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list domains")?;
        Ok(rows)
    }

    pub async fn list_domains_by_tld(&self, tld: &str) -> Result<Vec<DomainRecord>> {
        let tld = normalize_tld(tld)?;
        let rows = sqlx::query_as::<_, DomainRecord>(
            "SELECT id, domain_name, tld, created_at FROM domains WHERE tld = $1 ORDER BY id",
        )
        .bind(tld)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list domains")?;
        Ok(rows)
    }
}
