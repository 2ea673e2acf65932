//! Position persistence
//!
//! Append-only SQLite store behind the `PositionStore` contract. Rows
//! are deserialized into `Position` at this boundary; raw rows never
//! reach order-book logic. Timestamps are stored as fixed-width
//! RFC3339 text so lexicographic `ORDER BY created_at` is
//! chronological; `rowid` breaks ties between same-microsecond inserts.

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{Position, PositionId, PositionStatus, Side, StatusFilter};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Durable store contract the order book runs against: append,
/// archive, and `created_at`-ordered queries by status.
pub trait PositionStore: Send + Sync {
    fn insert(&self, position: &Position) -> Result<(), StoreError>;

    /// Flip a position Open -> Archived. Returns false if it was not
    /// open (already archived, or unknown) - the transition happens at
    /// most once.
    fn archive(&self, id: PositionId) -> Result<bool, StoreError>;

    /// Count of open positions per side: `(buys, sells)`
    fn open_counts(&self) -> Result<(u64, u64), StoreError>;

    /// Creation-time-ascending snapshot, optionally filtered by status
    fn scan(&self, filter: StatusFilter) -> Result<Vec<Position>, StoreError>;

    /// Open positions created at or before `cutoff`, oldest first
    fn open_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Position>, StoreError>;

    fn oldest_open_created_at(&self) -> Result<Option<DateTime<Utc>>, StoreError>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_tables()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    fn init_tables(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                side TEXT NOT NULL,
                payout_address TEXT NOT NULL,
                reference_price REAL NOT NULL,
                price_paid INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'open',
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status);
            CREATE INDEX IF NOT EXISTS idx_positions_created ON positions(created_at);
        "#,
        )?;
        Ok(())
    }
}

impl PositionStore for SqliteStore {
    fn insert(&self, position: &Position) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            r#"INSERT INTO positions
               (id, side, payout_address, reference_price, price_paid, status, created_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                position.id.to_string(),
                side_str(position.side),
                position.payout_address,
                position.reference_price,
                position.price_paid as i64,
                status_str(position.status),
                encode_ts(position.created_at),
            ],
        )?;
        Ok(())
    }

    fn archive(&self, id: PositionId) -> Result<bool, StoreError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE positions SET status = 'archived' WHERE id = ?1 AND status = 'open'",
            params![id.to_string()],
        )?;
        Ok(changed > 0)
    }

    fn open_counts(&self) -> Result<(u64, u64), StoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT side, COUNT(*) FROM positions WHERE status = 'open' GROUP BY side")?;
        let mut rows = stmt.query([])?;

        let (mut buys, mut sells) = (0u64, 0u64);
        while let Some(row) = rows.next()? {
            let side: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            match side.as_str() {
                "buy" => buys = count as u64,
                "sell" => sells = count as u64,
                other => return Err(StoreError::Corrupt(format!("unknown side {:?}", other))),
            }
        }
        Ok((buys, sells))
    }

    fn scan(&self, filter: StatusFilter) -> Result<Vec<Position>, StoreError> {
        let conn = self.conn.lock();
        let query = match filter {
            StatusFilter::All => {
                "SELECT id, side, payout_address, reference_price, price_paid, status, created_at
                 FROM positions ORDER BY created_at ASC, rowid ASC"
            }
            StatusFilter::Open => {
                "SELECT id, side, payout_address, reference_price, price_paid, status, created_at
                 FROM positions WHERE status = 'open' ORDER BY created_at ASC, rowid ASC"
            }
            StatusFilter::Archived => {
                "SELECT id, side, payout_address, reference_price, price_paid, status, created_at
                 FROM positions WHERE status = 'archived' ORDER BY created_at ASC, rowid ASC"
            }
        };
        let mut stmt = conn.prepare(query)?;
        let mut rows = stmt.query([])?;

        let mut positions = Vec::new();
        while let Some(row) = rows.next()? {
            positions.push(row_to_position(row)?);
        }
        Ok(positions)
    }

    fn open_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Position>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, side, payout_address, reference_price, price_paid, status, created_at
             FROM positions WHERE status = 'open' AND created_at <= ?1
             ORDER BY created_at ASC, rowid ASC",
        )?;
        let mut rows = stmt.query(params![encode_ts(cutoff)])?;

        let mut positions = Vec::new();
        while let Some(row) = rows.next()? {
            positions.push(row_to_position(row)?);
        }
        Ok(positions)
    }

    fn oldest_open_created_at(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        let conn = self.conn.lock();
        let oldest: Option<String> = conn.query_row(
            "SELECT MIN(created_at) FROM positions WHERE status = 'open'",
            [],
            |row| row.get(0),
        )?;
        oldest.map(|s| decode_ts(&s)).transpose()
    }
}

fn side_str(side: Side) -> &'static str {
    match side {
        Side::Buy => "buy",
        Side::Sell => "sell",
    }
}

fn status_str(status: PositionStatus) -> &'static str {
    match status {
        PositionStatus::Open => "open",
        PositionStatus::Archived => "archived",
    }
}

/// Fixed-width UTC RFC3339 with microseconds, e.g.
/// `2026-08-07T12:00:00.000000Z` - sorts lexicographically
fn encode_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn decode_ts(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {:?}: {}", s, e)))
}

fn row_to_position(row: &rusqlite::Row) -> Result<Position, StoreError> {
    let id: String = row.get(0)?;
    let side: String = row.get(1)?;
    let status: String = row.get(5)?;
    let created_at: String = row.get(6)?;

    Ok(Position {
        id: PositionId(
            Uuid::parse_str(&id).map_err(|e| StoreError::Corrupt(format!("bad id {:?}: {}", id, e)))?,
        ),
        side: match side.as_str() {
            "buy" => Side::Buy,
            "sell" => Side::Sell,
            other => return Err(StoreError::Corrupt(format!("unknown side {:?}", other))),
        },
        payout_address: row.get(2)?,
        reference_price: row.get(3)?,
        price_paid: row.get::<_, i64>(4)? as u64,
        status: match status.as_str() {
            "open" => PositionStatus::Open,
            "archived" => PositionStatus::Archived,
            other => return Err(StoreError::Corrupt(format!("unknown status {:?}", other))),
        },
        created_at: decode_ts(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn backdated(side: Side, address: &str, reference_price: f64, age_secs: i64) -> Position {
        let mut p = Position::open(side, address, reference_price, 500);
        p.created_at = Utc::now() - Duration::seconds(age_secs);
        p
    }

    #[test]
    fn test_insert_and_scan_fifo() {
        let store = SqliteStore::in_memory().unwrap();
        let first = backdated(Side::Buy, "a", 400.0, 30);
        let second = backdated(Side::Sell, "b", 500.0, 20);
        let third = backdated(Side::Buy, "c", 600.0, 10);
        for p in [&second, &third, &first] {
            store.insert(p).unwrap();
        }

        let all = store.scan(StatusFilter::All).unwrap();
        let ids: Vec<_> = all.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
    }

    #[test]
    fn test_archive_happens_at_most_once() {
        let store = SqliteStore::in_memory().unwrap();
        let p = Position::open(Side::Buy, "addr", 400.0, 500);
        store.insert(&p).unwrap();

        assert!(store.archive(p.id).unwrap());
        assert!(!store.archive(p.id).unwrap());
        assert!(!store.archive(PositionId::new()).unwrap());

        let archived = store.scan(StatusFilter::Archived).unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].status, PositionStatus::Archived);
        assert!(store.scan(StatusFilter::Open).unwrap().is_empty());
    }

    #[test]
    fn test_open_counts_by_side() {
        let store = SqliteStore::in_memory().unwrap();
        assert_eq!(store.open_counts().unwrap(), (0, 0));

        for _ in 0..3 {
            store.insert(&Position::open(Side::Buy, "a", 400.0, 500)).unwrap();
        }
        let sell = Position::open(Side::Sell, "b", 400.0, 500);
        store.insert(&sell).unwrap();
        assert_eq!(store.open_counts().unwrap(), (3, 1));

        store.archive(sell.id).unwrap();
        assert_eq!(store.open_counts().unwrap(), (3, 0));
    }

    #[test]
    fn test_open_created_before_cutoff() {
        let store = SqliteStore::in_memory().unwrap();
        let old = backdated(Side::Buy, "old", 400.0, 3600);
        let fresh = backdated(Side::Buy, "fresh", 400.0, 10);
        store.insert(&old).unwrap();
        store.insert(&fresh).unwrap();

        let cutoff = Utc::now() - Duration::seconds(60);
        let expired = store.open_created_before(cutoff).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, old.id);

        store.archive(old.id).unwrap();
        assert!(store.open_created_before(cutoff).unwrap().is_empty());
    }

    #[test]
    fn test_oldest_open_created_at() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.oldest_open_created_at().unwrap().is_none());

        let old = backdated(Side::Sell, "old", 400.0, 3600);
        let fresh = backdated(Side::Buy, "fresh", 400.0, 10);
        store.insert(&fresh).unwrap();
        store.insert(&old).unwrap();

        let oldest = store.oldest_open_created_at().unwrap().unwrap();
        assert!((oldest - old.created_at).num_milliseconds().abs() < 5);

        store.archive(old.id).unwrap();
        let oldest = store.oldest_open_created_at().unwrap().unwrap();
        assert!((oldest - fresh.created_at).num_milliseconds().abs() < 5);
    }

    #[test]
    fn test_roundtrip_preserves_fields() {
        let store = SqliteStore::in_memory().unwrap();
        let p = Position::open(Side::Sell, "1BitcoinAddr", 63412.55, 987);
        store.insert(&p).unwrap();

        let got = &store.scan(StatusFilter::All).unwrap()[0];
        assert_eq!(got.id, p.id);
        assert_eq!(got.side, Side::Sell);
        assert_eq!(got.payout_address, "1BitcoinAddr");
        assert!((got.reference_price - 63412.55).abs() < 1e-9);
        assert_eq!(got.price_paid, 987);
        assert_eq!(got.status, PositionStatus::Open);
    }
}
