//! SQLite ledger backend for TransferIndex.
//!
//! Persists transfers and scan checkpoints to a single SQLite file.
//! Uses `sqlx` with WAL mode and `synchronous = FULL`, so an insert is
//! durable once it returns.
//!
//! # Usage
//! ```rust,no_run
//! use transferindex_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./transfers.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use transferindex_core::checkpoint::{CheckpointStore, ScanCheckpoint};
use transferindex_core::error::IndexerError;
use transferindex_core::ledger::{InsertOutcome, LedgerStore};
use transferindex_core::types::{StoredTransfer, Transfer};

const SELECT_COLUMNS: &str = "SELECT id, transaction_hash, block_number, block_timestamp,
        from_address, to_address, value, token_address, log_index, transaction_index, created_at
     FROM transfers";

const NEWEST_FIRST: &str = "ORDER BY block_number DESC, transaction_index DESC, log_index DESC";

fn storage_err(e: sqlx::Error) -> IndexerError {
    IndexerError::Storage(e.to_string())
}

/// SQLite integers are signed; saturate instead of wrapping negative.
fn sql_int(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

/// SQLite-backed ledger and checkpoint store.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./transfers.db"`) or a full
    /// SQLite URL (`"sqlite:./transfers.db"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let base = if path.starts_with("sqlite:") {
            SqliteConnectOptions::from_str(path).map_err(storage_err)?
        } else {
            SqliteConnectOptions::new().filename(path)
        };
        let options = base
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        info!(path, "ledger opened");
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// The pool holds exactly one connection that never expires, otherwise
    /// each new connection would see a fresh, empty database.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(storage_err)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
            .connect_with(options)
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS transfers (
                id                INTEGER PRIMARY KEY AUTOINCREMENT,
                transaction_hash  TEXT    NOT NULL,
                block_number      INTEGER NOT NULL,
                block_timestamp   INTEGER NOT NULL,
                from_address      TEXT    NOT NULL,
                to_address        TEXT    NOT NULL,
                value             TEXT    NOT NULL,
                token_address     TEXT    NOT NULL,
                log_index         INTEGER NOT NULL,
                transaction_index INTEGER NOT NULL,
                created_at        TEXT    NOT NULL,
                UNIQUE (transaction_hash, log_index)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS scan_checkpoints (
                token_address TEXT    PRIMARY KEY,
                next_block    INTEGER NOT NULL,
                updated_at    INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_transfers_from ON transfers (from_address);",
            "CREATE INDEX IF NOT EXISTS idx_transfers_to ON transfers (to_address);",
            "CREATE INDEX IF NOT EXISTS idx_transfers_block ON transfers (block_number);",
            "CREATE INDEX IF NOT EXISTS idx_transfers_token ON transfers (token_address);",
        ] {
            sqlx::query(ddl)
                .execute(&self.pool)
                .await
                .map_err(storage_err)?;
        }

        Ok(())
    }
}

fn row_to_transfer(row: &SqliteRow) -> Result<StoredTransfer, sqlx::Error> {
    Ok(StoredTransfer {
        id: row.try_get("id")?,
        transfer: Transfer {
            transaction_hash: row.try_get("transaction_hash")?,
            block_number: row.try_get::<i64, _>("block_number")? as u64,
            block_timestamp: row.try_get::<i64, _>("block_timestamp")? as u64,
            from: row.try_get("from_address")?,
            to: row.try_get("to_address")?,
            value: row.try_get("value")?,
            token_address: row.try_get("token_address")?,
            log_index: row.try_get::<i64, _>("log_index")? as u64,
            transaction_index: row.try_get::<i64, _>("transaction_index")? as u64,
        },
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn rows_to_transfers(rows: Vec<SqliteRow>) -> Result<Vec<StoredTransfer>, IndexerError> {
    rows.iter()
        .map(|r| row_to_transfer(r).map_err(storage_err))
        .collect()
}

// ─── LedgerStore impl ────────────────────────────────────────────────────────

#[async_trait]
impl LedgerStore for SqliteStorage {
    async fn insert(&self, transfer: &Transfer) -> Result<InsertOutcome, IndexerError> {
        let result = sqlx::query(
            "INSERT INTO transfers (
                transaction_hash, block_number, block_timestamp, from_address, to_address,
                value, token_address, log_index, transaction_index, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (transaction_hash, log_index) DO NOTHING",
        )
        .bind(transfer.transaction_hash.to_ascii_lowercase())
        .bind(sql_int(transfer.block_number))
        .bind(sql_int(transfer.block_timestamp))
        .bind(transfer.from.to_ascii_lowercase())
        .bind(transfer.to.to_ascii_lowercase())
        .bind(&transfer.value)
        .bind(transfer.token_address.to_ascii_lowercase())
        .bind(sql_int(transfer.log_index))
        .bind(sql_int(transfer.transaction_index))
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            debug!(
                tx = %transfer.transaction_hash,
                log_index = transfer.log_index,
                "duplicate transfer ignored"
            );
            Ok(InsertOutcome::Duplicate)
        } else {
            debug!(block = transfer.block_number, "transfer stored");
            Ok(InsertOutcome::Inserted)
        }
    }

    async fn query_by_address(
        &self,
        address: &str,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<StoredTransfer>, IndexerError> {
        let address = address.to_ascii_lowercase();
        let sql = format!(
            "{SELECT_COLUMNS} WHERE from_address = ? OR to_address = ? {NEWEST_FIRST} LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&sql)
            .bind(&address)
            .bind(&address)
            .bind(sql_int(limit))
            .bind(sql_int(offset))
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows_to_transfers(rows)
    }

    async fn count_by_address(&self, address: &str) -> Result<u64, IndexerError> {
        let address = address.to_ascii_lowercase();
        let row = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM transfers WHERE from_address = ? OR to_address = ?",
        )
        .bind(&address)
        .bind(&address)
        .fetch_one(&self.pool)
        .await
        .map_err(storage_err)?;

        let cnt: i64 = row.try_get("cnt").map_err(storage_err)?;
        Ok(cnt as u64)
    }

    async fn query_all(&self, limit: u64, offset: u64) -> Result<Vec<StoredTransfer>, IndexerError> {
        let sql = format!("{SELECT_COLUMNS} {NEWEST_FIRST} LIMIT ? OFFSET ?");
        let rows = sqlx::query(&sql)
            .bind(sql_int(limit))
            .bind(sql_int(offset))
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        rows_to_transfers(rows)
    }

    async fn count_all(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) AS cnt FROM transfers")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;

        let cnt: i64 = row.try_get("cnt").map_err(storage_err)?;
        Ok(cnt as u64)
    }

    async fn high_water_mark(&self) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COALESCE(MAX(block_number), 0) AS hwm FROM transfers")
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;

        let hwm: i64 = row.try_get("hwm").map_err(storage_err)?;
        Ok(hwm as u64)
    }

    async fn close(&self) -> Result<(), IndexerError> {
        self.pool.close().await;
        info!("ledger closed");
        Ok(())
    }
}

// ─── CheckpointStore impl ────────────────────────────────────────────────────

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn load_checkpoint(
        &self,
        token_address: &str,
    ) -> Result<Option<ScanCheckpoint>, IndexerError> {
        let row = sqlx::query(
            "SELECT token_address, next_block, updated_at
             FROM scan_checkpoints WHERE token_address = ?",
        )
        .bind(token_address.to_ascii_lowercase())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.map(|r| -> Result<ScanCheckpoint, sqlx::Error> {
            Ok(ScanCheckpoint {
                token_address: r.try_get("token_address")?,
                next_block: r.try_get::<i64, _>("next_block")? as u64,
                updated_at: r.try_get("updated_at")?,
            })
        })
        .transpose()
        .map_err(storage_err)
    }

    async fn save_checkpoint(&self, checkpoint: ScanCheckpoint) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO scan_checkpoints (token_address, next_block, updated_at)
             VALUES (?, ?, ?)
             ON CONFLICT (token_address) DO UPDATE SET
                next_block = excluded.next_block,
                updated_at = excluded.updated_at
             WHERE excluded.next_block > scan_checkpoints.next_block",
        )
        .bind(checkpoint.token_address.to_ascii_lowercase())
        .bind(sql_int(checkpoint.next_block))
        .bind(checkpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(
            token = %checkpoint.token_address,
            next_block = checkpoint.next_block,
            "checkpoint saved"
        );
        Ok(())
    }

    async fn delete_checkpoint(&self, token_address: &str) -> Result<(), IndexerError> {
        sqlx::query("DELETE FROM scan_checkpoints WHERE token_address = ?")
            .bind(token_address.to_ascii_lowercase())
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
