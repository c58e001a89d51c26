//! SQLite table connectors
//!
//! Tables are addressed as `<database-file>:<table>`. The source reads the
//! `key` and `image` columns in rowid order; the sink recreates its table with
//! `key INTEGER` followed by one `predN REAL` column per score.

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::{SqlitePool, SqlitePoolOptions}, Row};
use tracing::{debug, info, warn};

use crate::error::MalformedRecordError;
use crate::service::types::{InputRecord, OutputRecord, RecordKey};

use super::traits::{PredictionSink, RecordSource, SourceItem};

/// A table inside a SQLite database file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub db_path: PathBuf,
    pub table: String,
}

impl TableRef {
    /// Parse `<database-file>:<table>`
    pub fn parse(reference: &str) -> Result<Self> {
        let Some((db, table)) = reference.rsplit_once(':') else {
            bail!("Table reference must be <database-file>:<table>, got {:?}", reference);
        };
        if db.is_empty() {
            bail!("Table reference {:?} has no database file", reference);
        }
        let valid = !table.is_empty()
            && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            && !table.starts_with(|c: char| c.is_ascii_digit());
        if !valid {
            bail!("Invalid table name {:?}", table);
        }

        Ok(Self {
            db_path: PathBuf::from(db),
            table: table.to_string(),
        })
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.db_path.display(), self.table)
    }
}

async fn connect(db_path: &Path, mode: &str) -> Result<SqlitePool> {
    let database_url = format!("sqlite:{}?mode={}", db_path.display(), mode);
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await
        .with_context(|| format!("Failed to connect to SQLite database {}", db_path.display()))
}

/// Paged reader over a table's `key` and `image` columns
pub struct SqliteSource {
    table: TableRef,
    pool: SqlitePool,
    page_size: i64,
    last_rowid: i64,
    buffer: VecDeque<SourceItem>,
    exhausted: bool,
}

impl SqliteSource {
    pub async fn open(table: TableRef, page_size: usize) -> Result<Self> {
        if !table.db_path.is_file() {
            bail!("Input database not found: {}", table.db_path.display());
        }
        let pool = connect(&table.db_path, "ro").await?;
        info!("Reading records from table {}", table);

        Ok(Self {
            table,
            pool,
            page_size: page_size.max(1) as i64,
            last_rowid: 0,
            buffer: VecDeque::new(),
            exhausted: false,
        })
    }

    async fn fetch_page(&mut self) -> Result<()> {
        let sql = format!(
            r#"
            SELECT rowid AS row_id,
                   typeof(key) AS key_type,
                   key,
                   CAST(key AS TEXT) AS key_text,
                   CAST(image AS TEXT) AS image
            FROM "{}"
            WHERE rowid > ?
            ORDER BY rowid
            LIMIT ?
            "#,
            self.table.table
        );
        let rows = sqlx::query(&sql)
            .bind(self.last_rowid)
            .bind(self.page_size)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("Failed to read table {}", self.table))?;

        debug!("Fetched {} rows after rowid {}", rows.len(), self.last_rowid);
        if (rows.len() as i64) < self.page_size {
            self.exhausted = true;
        }

        for row in rows {
            self.last_rowid = row.try_get("row_id")?;
            let key_type: String = row.try_get("key_type")?;
            let image: Option<String> = row.try_get("image")?;

            let item = match key_type.as_str() {
                "null" => Err(MalformedRecordError::MissingField("key")),
                "integer" => Ok(InputRecord {
                    key: RecordKey::Int(row.try_get("key")?),
                    image,
                }),
                "real" => {
                    let value: f64 = row.try_get("key")?;
                    if value.fract() == 0.0 {
                        Ok(InputRecord {
                            key: RecordKey::Int(value as i64),
                            image,
                        })
                    } else {
                        Err(MalformedRecordError::InvalidKey(row.try_get("key_text")?))
                    }
                }
                _ => Ok(InputRecord {
                    key: RecordKey::Text(row.try_get("key_text")?),
                    image,
                }),
            };
            self.buffer.push_back(item);
        }
        Ok(())
    }
}

#[async_trait]
impl RecordSource for SqliteSource {
    async fn next_record(&mut self) -> Result<Option<SourceItem>> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fetch_page().await?;
        }
        Ok(self.buffer.pop_front())
    }

    fn describe(&self) -> String {
        self.table.to_string()
    }
}

/// Table writer whose column count follows the model's output width
pub struct SqliteSink {
    table: TableRef,
    pool: SqlitePool,
    width: Option<usize>,
    insert_sql: String,
    written: u64,
}

impl SqliteSink {
    pub async fn create(table: TableRef) -> Result<Self> {
        if let Some(parent) = table.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let pool = connect(&table.db_path, "rwc").await?;

        Ok(Self {
            table,
            pool,
            width: None,
            insert_sql: String::new(),
            written: 0,
        })
    }

    /// Drop and recreate the table for `width` score columns
    async fn prepare_table(&mut self, width: usize) -> Result<()> {
        let names = OutputRecord::field_names(width);
        let columns: Vec<String> = names
            .iter()
            .map(|name| {
                let ty = if name == "key" { "INTEGER" } else { "REAL" };
                format!("{} {}", name, ty)
            })
            .collect();

        sqlx::query(&format!(r#"DROP TABLE IF EXISTS "{}""#, self.table.table))
            .execute(&self.pool)
            .await?;
        sqlx::query(&format!(
            r#"CREATE TABLE "{}" ({})"#,
            self.table.table,
            columns.join(", ")
        ))
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to create table {}", self.table))?;

        let placeholders = vec!["?"; names.len()].join(", ");
        self.insert_sql = format!(
            r#"INSERT INTO "{}" ({}) VALUES ({})"#,
            self.table.table,
            names.join(", "),
            placeholders
        );
        self.width = Some(width);

        info!("Created table {} with {} score columns", self.table, width);
        Ok(())
    }
}

#[async_trait]
impl PredictionSink for SqliteSink {
    async fn write(&mut self, records: &[OutputRecord]) -> Result<()> {
        let Some(first) = records.first() else {
            return Ok(());
        };
        let width = match self.width {
            Some(width) => width,
            None => {
                self.prepare_table(first.width()).await?;
                first.width()
            }
        };

        let mut tx = self.pool.begin().await?;
        for record in records {
            if record.width() != width {
                bail!(
                    "Prediction for key {} has {} scores, table {} has {}",
                    record.key,
                    record.width(),
                    self.table,
                    width
                );
            }
            let mut query = sqlx::query(&self.insert_sql).bind(record.key);
            for score in &record.scores {
                query = query.bind(*score as f64);
            }
            query.execute(&mut *tx).await?;
        }
        tx.commit().await?;

        self.written += records.len() as u64;
        Ok(())
    }

    async fn finish(&mut self) -> Result<()> {
        if self.width.is_none() {
            // A previous run's rows must not pass for this run's output
            sqlx::query(&format!(r#"DROP TABLE IF EXISTS "{}""#, self.table.table))
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to drop table {}", self.table))?;
            warn!("No predictions produced, table {} was dropped", self.table);
        } else {
            info!("Wrote {} rows to {}", self.written, self.table);
        }
        self.pool.close().await;
        Ok(())
    }

    fn describe(&self) -> String {
        self.table.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn seed(db_path: &Path, rows: &[(&str, Option<&str>)]) {
        let pool = connect(db_path, "rwc").await.unwrap();
        sqlx::query("CREATE TABLE images (key, image TEXT)")
            .execute(&pool)
            .await
            .unwrap();
        for (key, image) in rows {
            let query = sqlx::query("INSERT INTO images (key, image) VALUES (?, ?)");
            let query = if let Ok(int) = key.parse::<i64>() {
                query.bind(int)
            } else if let Ok(real) = key.parse::<f64>() {
                query.bind(real)
            } else {
                query.bind(key.to_string())
            };
            query.bind(image.map(str::to_string)).execute(&pool).await.unwrap();
        }
        pool.close().await;
    }

    #[test]
    fn test_table_ref_parse() {
        let table = TableRef::parse("data/warehouse.db:images").unwrap();
        assert_eq!(table.db_path, PathBuf::from("data/warehouse.db"));
        assert_eq!(table.table, "images");
        assert_eq!(table.to_string(), "data/warehouse.db:images");

        assert!(TableRef::parse("warehouse.db").is_err());
        assert!(TableRef::parse(":images").is_err());
        assert!(TableRef::parse("w.db:bad-name").is_err());
        assert!(TableRef::parse("w.db:1images").is_err());
    }

    #[tokio::test]
    async fn test_sqlite_source_pages() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("in.db");
        seed(
            &db,
            &[("1", Some("0.1,0.2")), ("abc", Some("1,2")), ("3", None)],
        )
        .await;

        let table = TableRef { db_path: db, table: "images".to_string() };
        let mut source = SqliteSource::open(table, 2).await.unwrap();

        let first = source.next_record().await.unwrap().unwrap().unwrap();
        assert_eq!(first.key, RecordKey::Int(1));
        assert_eq!(first.image.as_deref(), Some("0.1,0.2"));

        let second = source.next_record().await.unwrap().unwrap().unwrap();
        assert_eq!(second.key, RecordKey::Text("abc".to_string()));

        let third = source.next_record().await.unwrap().unwrap().unwrap();
        assert_eq!(third.key, RecordKey::Int(3));
        assert_eq!(third.image, None);

        assert!(source.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_source_real_keys() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("in.db");
        seed(&db, &[("42.0", Some("1,2")), ("4.5", Some("1,2"))]).await;

        let table = TableRef { db_path: db, table: "images".to_string() };
        let mut source = SqliteSource::open(table, 10).await.unwrap();

        let integral = source.next_record().await.unwrap().unwrap().unwrap();
        assert_eq!(integral.key, RecordKey::Int(42));

        let fractional = source.next_record().await.unwrap().unwrap();
        assert_eq!(fractional, Err(MalformedRecordError::InvalidKey("4.5".to_string())));

        assert!(source.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sqlite_source_missing_db() {
        let dir = tempdir().unwrap();
        let table = TableRef { db_path: dir.path().join("nope.db"), table: "images".to_string() };
        assert!(SqliteSource::open(table, 10).await.is_err());
    }

    #[tokio::test]
    async fn test_sqlite_sink_width_follows_model() {
        let dir = tempdir().unwrap();
        let table = TableRef { db_path: dir.path().join("out.db"), table: "predictions".to_string() };

        let mut sink = SqliteSink::create(table.clone()).await.unwrap();
        sink.write(&[
            OutputRecord::new(1, vec![0.25, 0.5, 0.25]),
            OutputRecord::new(2, vec![0.0, 1.0, 0.0]),
        ])
        .await
        .unwrap();

        let err = sink.write(&[OutputRecord::new(3, vec![1.0])]).await.unwrap_err();
        assert!(err.to_string().contains("has 1 scores"));
        sink.finish().await.unwrap();

        let pool = connect(&table.db_path, "ro").await.unwrap();
        let rows = sqlx::query("SELECT key, pred0, pred1, pred2 FROM predictions ORDER BY key")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get::<i64, _>("key"), 2);
        assert_eq!(rows[1].get::<f64, _>("pred1"), 1.0);

        let columns = sqlx::query("SELECT name FROM pragma_table_info('predictions')")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(columns.len(), 4);
    }

    #[tokio::test]
    async fn test_sqlite_sink_truncates_previous_run() {
        let dir = tempdir().unwrap();
        let table = TableRef { db_path: dir.path().join("out.db"), table: "predictions".to_string() };

        let mut sink = SqliteSink::create(table.clone()).await.unwrap();
        sink.write(&[OutputRecord::new(1, vec![0.5, 0.5])]).await.unwrap();
        sink.finish().await.unwrap();

        let mut sink = SqliteSink::create(table.clone()).await.unwrap();
        sink.write(&[OutputRecord::new(9, vec![1.0])]).await.unwrap();
        sink.finish().await.unwrap();

        let pool = connect(&table.db_path, "ro").await.unwrap();
        let rows = sqlx::query("SELECT * FROM predictions").fetch_all(&pool).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get::<i64, _>("key"), 9);
        assert_eq!(rows[0].columns().len(), 2);
    }

    #[tokio::test]
    async fn test_sqlite_sink_empty_run_drops_previous_table() {
        let dir = tempdir().unwrap();
        let table = TableRef { db_path: dir.path().join("out.db"), table: "predictions".to_string() };

        let mut sink = SqliteSink::create(table.clone()).await.unwrap();
        sink.write(&[OutputRecord::new(1, vec![0.5, 0.5])]).await.unwrap();
        sink.finish().await.unwrap();

        let mut sink = SqliteSink::create(table.clone()).await.unwrap();
        sink.write(&[]).await.unwrap();
        sink.finish().await.unwrap();

        let pool = connect(&table.db_path, "ro").await.unwrap();
        let tables = sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'predictions'")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert!(tables.is_empty());
    }
}
