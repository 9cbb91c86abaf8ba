//! SQLite-backed market-data store.
//!
//! Three logical tables, written in batches inside one transaction per
//! chunk. Candle inserts are idempotent (`INSERT OR IGNORE` on the
//! `(symbol, timeframe, timestamp)` key) so redelivery or overlapping
//! drains never corrupt stored history. Order-book sample payloads are
//! optionally lz4-compressed, one blob per side per row.

use std::sync::Arc;

use anyhow::{Context, Result};
use dw_core::time_util;
use dw_core::types::{CandleRecord, OrderBookSample, TradeTick};
use parking_lot::Mutex;
use rusqlite::{Connection, params};

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS candles (
    symbol     TEXT    NOT NULL,
    timeframe  TEXT    NOT NULL,
    timestamp  INTEGER NOT NULL,
    open       REAL    NOT NULL,
    high       REAL    NOT NULL,
    low        REAL    NOT NULL,
    close      REAL    NOT NULL,
    volume     REAL    NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (symbol, timeframe, timestamp)
);

CREATE TABLE IF NOT EXISTS book_samples (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol     TEXT    NOT NULL,
    timestamp  INTEGER NOT NULL,
    bids       BLOB    NOT NULL,
    asks       BLOB    NOT NULL,
    compressed INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_book_samples_symbol_ts
    ON book_samples(symbol, timestamp);

CREATE TABLE IF NOT EXISTS trade_ticks (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    symbol     TEXT    NOT NULL,
    timestamp  INTEGER NOT NULL,
    price      REAL    NOT NULL,
    size       REAL    NOT NULL,
    side       TEXT    NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_trade_ticks_symbol_ts
    ON trade_ticks(symbol, timestamp);
"#;

/// Shared SQLite handle for the writer and the runner.
pub struct MarketStore {
    conn: Arc<Mutex<Connection>>,
    compression_enabled: bool,
}

impl MarketStore {
    /// Open (or create) the database at `path` and bootstrap the schema.
    /// `":memory:"` is accepted for tests and smoke runs.
    pub fn open(path: &str, compression_enabled: bool) -> Result<Self> {
        let conn = Connection::open(path).with_context(|| format!("open sqlite db at {path}"))?;
        conn.execute_batch(SCHEMA).context("bootstrap schema")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            compression_enabled,
        })
    }

    /// Insert a chunk of candles inside one transaction.
    ///
    /// Returns the number of rows actually inserted — redelivered candles
    /// are ignored by the uniqueness key rather than duplicated.
    pub fn insert_candles(&self, rows: &[CandleRecord]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let created_at = time_util::now_ms();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO candles
                 (symbol, timeframe, timestamp, open, high, low, close, volume, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for row in rows {
                inserted += stmt.execute(params![
                    row.symbol,
                    row.timeframe,
                    row.timestamp_ms as i64,
                    row.open,
                    row.high,
                    row.low,
                    row.close,
                    row.volume,
                    created_at as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    /// Insert a chunk of order-book samples inside one transaction.
    ///
    /// Each row's bid and ask payloads are compressed independently when
    /// compression is enabled.
    pub fn insert_book_samples(&self, rows: &[OrderBookSample]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let created_at = time_util::now_ms();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO book_samples
                 (symbol, timestamp, bids, asks, compressed, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for row in rows {
                let bids = self.encode_payload(row.bids_json.as_bytes())?;
                let asks = self.encode_payload(row.asks_json.as_bytes())?;
                stmt.execute(params![
                    row.symbol,
                    row.timestamp_ms as i64,
                    bids,
                    asks,
                    self.compression_enabled,
                    created_at as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    /// Insert a chunk of trade ticks inside one transaction.
    pub fn insert_ticks(&self, rows: &[TradeTick]) -> Result<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        let created_at = time_util::now_ms();
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO trade_ticks
                 (symbol, timestamp, price, size, side, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.symbol,
                    row.timestamp_ms as i64,
                    row.price,
                    row.size,
                    row.side.to_string(),
                    created_at as i64,
                ])?;
            }
        }
        tx.commit()?;
        Ok(rows.len())
    }

    fn encode_payload(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        if self.compression_enabled {
            Ok(lz4::block::compress(bytes, None, true)?)
        } else {
            Ok(bytes.to_vec())
        }
    }

    // -----------------------------------------------------------------------
    // Row counts / readback
    // -----------------------------------------------------------------------

    pub fn candle_count(&self) -> Result<u64> {
        self.count("candles")
    }

    pub fn sample_count(&self) -> Result<u64> {
        self.count("book_samples")
    }

    pub fn tick_count(&self) -> Result<u64> {
        self.count("trade_ticks")
    }

    fn count(&self, table: &str) -> Result<u64> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
        Ok(n as u64)
    }

    /// Load one sample's bid payload back as JSON text, decompressing when
    /// the row was stored compressed.
    pub fn load_sample_bids(&self, symbol: &str, timestamp_ms: u64) -> Result<String> {
        let conn = self.conn.lock();
        let (blob, compressed): (Vec<u8>, bool) = conn.query_row(
            "SELECT bids, compressed FROM book_samples WHERE symbol = ?1 AND timestamp = ?2",
            params![symbol, timestamp_ms as i64],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        let bytes = if compressed {
            lz4::block::decompress(&blob, None)?
        } else {
            blob
        };
        Ok(String::from_utf8(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dw_core::types::TradeSide;

    fn candle(symbol: &str, ts: u64) -> CandleRecord {
        CandleRecord {
            symbol: symbol.into(),
            timeframe: "1m".into(),
            timestamp_ms: ts,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 100.0,
        }
    }

    #[test]
    fn candle_insert_is_idempotent() {
        let store = MarketStore::open(":memory:", false).unwrap();
        let rows = vec![candle("BTCUSDT", 1_000), candle("BTCUSDT", 2_000)];

        assert_eq!(store.insert_candles(&rows).unwrap(), 2);
        // Redelivery of the same rows inserts nothing new.
        assert_eq!(store.insert_candles(&rows).unwrap(), 0);
        assert_eq!(store.candle_count().unwrap(), 2);

        // Same timestamp, different timeframe is a distinct row.
        let mut other = candle("BTCUSDT", 1_000);
        other.timeframe = "5m".into();
        assert_eq!(store.insert_candles(&[other]).unwrap(), 1);
        assert_eq!(store.candle_count().unwrap(), 3);
    }

    #[test]
    fn compressed_sample_round_trips() {
        let store = MarketStore::open(":memory:", true).unwrap();
        let bids_json = r#"[{"price":100.0,"size":10.0},{"price":99.0,"size":5.0}]"#;
        let sample = OrderBookSample {
            symbol: "BTCUSDT".into(),
            timestamp_ms: 1_000,
            bids_json: bids_json.into(),
            asks_json: "[]".into(),
        };
        store.insert_book_samples(&[sample]).unwrap();
        assert_eq!(store.sample_count().unwrap(), 1);
        assert_eq!(store.load_sample_bids("BTCUSDT", 1_000).unwrap(), bids_json);
    }

    #[test]
    fn uncompressed_sample_round_trips() {
        let store = MarketStore::open(":memory:", false).unwrap();
        let sample = OrderBookSample {
            symbol: "ETHUSDT".into(),
            timestamp_ms: 2_000,
            bids_json: r#"[{"price":1.0,"size":2.0}]"#.into(),
            asks_json: "[]".into(),
        };
        store.insert_book_samples(&[sample]).unwrap();
        assert_eq!(
            store.load_sample_bids("ETHUSDT", 2_000).unwrap(),
            r#"[{"price":1.0,"size":2.0}]"#
        );
    }

    #[test]
    fn ticks_append_plainly() {
        let store = MarketStore::open(":memory:", false).unwrap();
        let ticks = vec![
            TradeTick {
                symbol: "BTCUSDT".into(),
                timestamp_ms: 1_000,
                price: 100.0,
                size: 0.5,
                side: TradeSide::Buy,
            },
            TradeTick {
                symbol: "BTCUSDT".into(),
                timestamp_ms: 1_000,
                price: 100.0,
                size: 0.5,
                side: TradeSide::Buy,
            },
        ];
        // Ticks carry no uniqueness key — identical rows both land.
        assert_eq!(store.insert_ticks(&ticks).unwrap(), 2);
        assert_eq!(store.tick_count().unwrap(), 2);
    }

    #[test]
    fn empty_batches_are_noops() {
        let store = MarketStore::open(":memory:", true).unwrap();
        assert_eq!(store.insert_candles(&[]).unwrap(), 0);
        assert_eq!(store.insert_book_samples(&[]).unwrap(), 0);
        assert_eq!(store.insert_ticks(&[]).unwrap(), 0);
    }
}
