//! SQLite visit table.
//!
//! Each record field has its own column, nested sections are stored as JSON
//! text. Inserts are single statements, so concurrent saves never race.

use super::{matches, BlockedAccess, Criteria, VisitStore};
use crate::config::is_identifier;
use crate::error::{Result, WardenError};
use crate::record::TelemetryRecord;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Columns that can be filtered in SQL; other criteria are applied after loading
const SCALAR_COLUMNS: &[&str] = &["fingerprint", "cookie_id", "ip"];

const RECORD_COLUMNS: &str =
    "timestamp, fingerprint, cookie_id, ip, ip_info, device_data, behavioral, webrtc_ips, headers";

pub struct SqliteStore {
    conn: Mutex<Connection>,
    table: String,
    blocked_table: String,
}

impl SqliteStore {
    pub fn open(path: &Path, table: &str) -> Result<Self> {
        if !is_identifier(table) {
            return Err(WardenError::Config(format!("Invalid table name: {table}")));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        let store = Self {
            conn: Mutex::new(conn),
            table: table.to_string(),
            blocked_table: format!("{table}_blocked"),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {visits} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                ts_nanos INTEGER NOT NULL,
                fingerprint TEXT NOT NULL,
                cookie_id TEXT NOT NULL,
                ip TEXT NOT NULL,
                ip_info TEXT NOT NULL,
                device_data TEXT NOT NULL,
                behavioral TEXT NOT NULL,
                webrtc_ips TEXT NOT NULL,
                headers TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_{visits}_ts ON {visits}(ts_nanos);
            CREATE TABLE IF NOT EXISTS {blocked} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                ip TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                cookie_id TEXT NOT NULL,
                reasons TEXT NOT NULL,
                severity TEXT NOT NULL,
                data TEXT NOT NULL
            );",
            visits = self.table,
            blocked = self.blocked_table,
        ))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| WardenError::Lock("sqlite connection mutex poisoned".to_string()))
    }

    fn select_records(&self, filter: &str, values: Vec<String>) -> Result<Vec<TelemetryRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM {} {filter} ORDER BY id ASC",
            self.table
        ))?;
        let records = stmt
            .query_map(params_from_iter(values.iter()), record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(idx, e))
}

/// Nanosecond key for window comparisons, clamped outside the i64 range (1677-2262)
fn sort_key(timestamp: &DateTime<Utc>) -> i64 {
    timestamp.timestamp_nanos_opt().unwrap_or(if timestamp.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    })
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    text.parse::<DateTime<Utc>>().map_err(|e| conversion_error(idx, e))
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<TelemetryRecord> {
    Ok(TelemetryRecord {
        timestamp: timestamp_column(row, 0)?,
        fingerprint: row.get(1)?,
        cookie_id: row.get(2)?,
        ip: row.get(3)?,
        ip_info: json_column(row, 4)?,
        device_data: json_column(row, 5)?,
        behavioral: json_column(row, 6)?,
        webrtc_ips: json_column(row, 7)?,
        headers: json_column(row, 8)?,
    })
}

fn blocked_from_row(row: &Row<'_>) -> rusqlite::Result<BlockedAccess> {
    let severity: String = row.get(5)?;
    Ok(BlockedAccess {
        timestamp: timestamp_column(row, 0)?,
        ip: row.get(1)?,
        fingerprint: row.get(2)?,
        cookie_id: row.get(3)?,
        reasons: json_column(row, 4)?,
        severity: serde_json::from_value(Value::String(severity)).map_err(|e| conversion_error(5, e))?,
        data: json_column(row, 6)?,
    })
}

impl VisitStore for SqliteStore {
    fn backend(&self) -> &'static str {
        "relational"
    }

    fn save(&self, record: &TelemetryRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (ts_nanos, {RECORD_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                self.table
            ),
            params![
                sort_key(&record.timestamp),
                record.timestamp.to_rfc3339(),
                record.fingerprint,
                record.cookie_id,
                record.ip,
                serde_json::to_string(&record.ip_info)?,
                serde_json::to_string(&record.device_data)?,
                serde_json::to_string(&record.behavioral)?,
                serde_json::to_string(&record.webrtc_ips)?,
                serde_json::to_string(&record.headers)?,
            ],
        )?;
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<TelemetryRecord>> {
        self.select_records("", Vec::new())
    }

    fn find_by(&self, criteria: &Criteria) -> Result<Vec<TelemetryRecord>> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        for (field, value) in criteria {
            if let (true, Some(text)) = (SCALAR_COLUMNS.contains(&field.as_str()), value.as_str()) {
                values.push(text.to_string());
                clauses.push(format!("{field} = ?{}", values.len()));
            }
        }

        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        Ok(self
            .select_records(&filter, values)?
            .into_iter()
            .filter(|record| matches(record, criteria))
            .collect())
    }

    fn count_since(&self, since: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE ts_nanos >= ?1", self.table),
            params![sort_key(&since)],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn()?;
        let removed = conn.execute(
            &format!("DELETE FROM {} WHERE ts_nanos < ?1", self.table),
            params![sort_key(&cutoff)],
        )?;
        debug!(table = %self.table, removed = removed, "Visit table purged");
        Ok(removed)
    }

    fn log_blocked(&self, entry: &BlockedAccess) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            &format!(
                "INSERT INTO {} (timestamp, ip, fingerprint, cookie_id, reasons, severity, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                self.blocked_table
            ),
            params![
                entry.timestamp.to_rfc3339(),
                entry.ip,
                entry.fingerprint,
                entry.cookie_id,
                serde_json::to_string(&entry.reasons)?,
                entry.severity.to_string(),
                serde_json::to_string(&entry.data)?,
            ],
        )?;
        Ok(())
    }

    fn blocked(&self) -> Result<Vec<BlockedAccess>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT timestamp, ip, fingerprint, cookie_id, reasons, severity, data
             FROM {} ORDER BY id ASC",
            self.blocked_table
        ))?;
        let entries = stmt
            .query_map([], blocked_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}
