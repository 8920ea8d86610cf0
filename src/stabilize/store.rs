//! # Correction Counter Store
//!
//! Persistent per-fragment observation counts behind the stabilizer. The
//! store is shared across sessions, so fragments a speaker repeats in one
//! connection stabilize faster in the next, and frequently seen spellings
//! become correction candidates for near-miss recognitions.
//!
//! `SqliteStore` persists to disk; `MemoryStore` backs processes that run
//! without a store path (counts reset on restart).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension};

/// One canonical fragment and how often it has been observed.
#[derive(Debug, Clone, PartialEq)]
pub struct CountRecord {
    pub text: String,
    pub count: u64,
}

pub trait CounterStore: Send + Sync {
    /// Record one observation of `text`, returning the updated count.
    fn increment(&self, text: &str) -> Result<u64>;

    /// Current count for `text`, zero if never observed.
    fn lookup(&self, text: &str) -> Result<u64>;

    /// The most frequently observed fragments, highest count first. Ties
    /// break lexicographically so ordering is deterministic.
    fn top(&self, limit: usize) -> Result<Vec<CountRecord>>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("Failed to open correction store at {:?}", path.as_ref()))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS corrections (
                text  TEXT PRIMARY KEY,
                count INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl CounterStore for SqliteStore {
    fn increment(&self, text: &str) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        // Upsert and read back in one statement so concurrent sessions
        // never lose an observation.
        let count: u64 = conn.query_row(
            "INSERT INTO corrections (text, count) VALUES (?1, 1)
             ON CONFLICT(text) DO UPDATE SET count = count + 1
             RETURNING count",
            [text],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn lookup(&self, text: &str) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count = conn
            .query_row(
                "SELECT count FROM corrections WHERE text = ?1",
                [text],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count.unwrap_or(0))
    }

    fn top(&self, limit: usize) -> Result<Vec<CountRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT text, count FROM corrections
             ORDER BY count DESC, text ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok(CountRecord {
                text: row.get(0)?,
                count: row.get(1)?,
            })
        })?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

pub struct MemoryStore {
    counts: Mutex<HashMap<String, u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            counts: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterStore for MemoryStore {
    fn increment(&self, text: &str) -> Result<u64> {
        let mut counts = self.counts.lock().unwrap();
        let count = counts.entry(text.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    fn lookup(&self, text: &str) -> Result<u64> {
        let counts = self.counts.lock().unwrap();
        Ok(counts.get(text).copied().unwrap_or(0))
    }

    fn top(&self, limit: usize) -> Result<Vec<CountRecord>> {
        let counts = self.counts.lock().unwrap();
        let mut records: Vec<CountRecord> = counts
            .iter()
            .map(|(text, count)| CountRecord {
                text: text.clone(),
                count: *count,
            })
            .collect();
        records.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.text.cmp(&b.text)));
        records.truncate(limit);
        Ok(records)
    }
}
