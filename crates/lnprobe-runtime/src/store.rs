//! SQLite persistence for targets and probes.
//!
//! Timestamps are stored as RFC 3339 text, routes as comma-joined short
//! channel ids.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};

use lnprobe_core::classify::NO_ROUTE;
use lnprobe_core::{
    Dispatched, NewProbe, Probe, ProbeId, ProbeOutcome, ProbeStore, StoreError, Target,
    TargetStore,
};

/// SQLite-backed target pool and probe log.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn count(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<u64, StoreError> {
    let n: i64 = conn.query_row(sql, params, |row| row.get(0)).map_err(backend)?;
    Ok(u64::try_from(n).unwrap_or(0))
}

/// How long a writer waits on another connection's lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const PROBE_COLUMNS: &str = "id, destination, route, payment_hash, error, erring_channel,
     failcode, started_at, finished_at";

impl SqliteStore {
    /// Open (or create) a database at the given filesystem path and run migrations.
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> rusqlite::Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn migrate(&self) -> rusqlite::Result<()> {
        self.lock().execute_batch(
            "CREATE TABLE IF NOT EXISTS targets (
                id     TEXT PRIMARY KEY,
                final  INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS probes (
                id             INTEGER PRIMARY KEY AUTOINCREMENT,
                destination    TEXT NOT NULL REFERENCES targets(id),
                route          TEXT,
                error          TEXT,
                erring_channel TEXT,
                failcode       INTEGER,
                payment_hash   TEXT,
                started_at     TEXT NOT NULL,
                finished_at    TEXT
            );
            CREATE INDEX IF NOT EXISTS probes_destination ON probes(destination);",
        )?;
        Ok(())
    }

    fn load_probe(conn: &Connection, id: ProbeId) -> Result<Option<Probe>, StoreError> {
        let raw = conn
            .query_row(
                &format!("SELECT {PROBE_COLUMNS} FROM probes WHERE id = ?1"),
                params![id],
                RawProbe::from_row,
            )
            .optional()
            .map_err(backend)?;
        raw.map(RawProbe::into_probe).transpose()
    }

    fn finalize(conn: &Connection, id: &str) -> Result<(), StoreError> {
        let updated = conn
            .execute("UPDATE targets SET final = 1 WHERE id = ?1", params![id])
            .map_err(backend)?;
        if updated == 0 {
            return Err(StoreError::UnknownTarget(id.to_string()));
        }
        Ok(())
    }
}

/// Row as stored, before timestamps are parsed.
struct RawProbe {
    id: ProbeId,
    destination: String,
    route: Option<String>,
    payment_hash: Option<String>,
    error: Option<String>,
    erring_channel: Option<String>,
    fail_code: Option<i64>,
    started_at: String,
    finished_at: Option<String>,
}

impl RawProbe {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            destination: row.get(1)?,
            route: row.get(2)?,
            payment_hash: row.get(3)?,
            error: row.get(4)?,
            erring_channel: row.get(5)?,
            fail_code: row.get(6)?,
            started_at: row.get(7)?,
            finished_at: row.get(8)?,
        })
    }

    fn into_probe(self) -> Result<Probe, StoreError> {
        let route = match self.route.as_deref() {
            None | Some("") => Vec::new(),
            Some(route) => route.split(',').map(str::to_owned).collect(),
        };
        Ok(Probe {
            id: self.id,
            destination: self.destination,
            route,
            payment_hash: self.payment_hash,
            error: self.error,
            erring_channel: self.erring_channel,
            fail_code: self.fail_code,
            started_at: parse_time(&self.started_at)?,
            finished_at: self.finished_at.as_deref().map(parse_time).transpose()?,
        })
    }
}

fn parse_time(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp {s:?}: {e}")))
}

impl TargetStore for SqliteStore {
    fn count_targets(&self) -> Result<u64, StoreError> {
        count(&self.lock(), "SELECT COUNT(*) FROM targets", [])
    }

    fn seed_targets(&self, ids: &[String]) -> Result<usize, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(backend)?;
        if count(&tx, "SELECT COUNT(*) FROM targets", [])? > 0 {
            return Ok(0);
        }
        let mut inserted = 0;
        {
            let mut stmt = tx
                .prepare("INSERT OR IGNORE INTO targets (id, final) VALUES (?1, 0)")
                .map_err(backend)?;
            for id in ids {
                inserted += stmt.execute(params![id]).map_err(backend)?;
            }
        }
        tx.commit().map_err(backend)?;
        Ok(inserted)
    }

    fn candidate_targets(&self, limit: usize) -> Result<Vec<Target>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT id FROM targets WHERE final = 0 ORDER BY id LIMIT ?1")
            .map_err(backend)?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt
            .query_map(params![limit], |row| row.get::<_, String>(0))
            .map_err(backend)?;
        rows.map(|id| id.map(Target::new).map_err(backend)).collect()
    }

    fn get_target(&self, id: &str) -> Result<Option<Target>, StoreError> {
        self.lock()
            .query_row(
                "SELECT id, final FROM targets WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Target {
                        id: row.get(0)?,
                        terminal: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(backend)
    }

    fn mark_terminal(&self, id: &str) -> Result<(), StoreError> {
        Self::finalize(&self.lock(), id)
    }
}

impl ProbeStore for SqliteStore {
    fn probe_count(&self, destination: &str) -> Result<u64, StoreError> {
        count(
            &self.lock(),
            "SELECT COUNT(*) FROM probes WHERE destination = ?1",
            params![destination],
        )
    }

    fn record_unroutable(&self, destination: &str, at: DateTime<Utc>) -> Result<Probe, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(backend)?;
        Self::finalize(&tx, destination)?;
        let at = at.to_rfc3339();
        tx.execute(
            "INSERT INTO probes (destination, route, failcode, started_at, finished_at)
             VALUES (?1, '', ?2, ?3, ?3)",
            params![destination, NO_ROUTE, at],
        )
        .map_err(backend)?;
        let id = tx.last_insert_rowid();
        let probe = Self::load_probe(&tx, id)?.ok_or(StoreError::UnknownProbe(id))?;
        tx.commit().map_err(backend)?;
        Ok(probe)
    }

    fn record_dispatch(&self, new: &NewProbe, budget: u64) -> Result<Dispatched, StoreError> {
        let mut conn = self.lock();
        // Immediate: the count below must not go stale before the insert.
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(backend)?;
        let attempts = count(
            &tx,
            "SELECT COUNT(*) FROM probes WHERE destination = ?1",
            params![new.destination],
        )? + 1;
        let target_retired = attempts > budget;
        if target_retired {
            Self::finalize(&tx, &new.destination)?;
        }
        tx.execute(
            "INSERT INTO probes (destination, route, payment_hash, started_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                new.destination,
                new.route.join(","),
                new.payment_hash,
                new.started_at.to_rfc3339(),
            ],
        )
        .map_err(backend)?;
        let id = tx.last_insert_rowid();
        let probe = Self::load_probe(&tx, id)?.ok_or(StoreError::UnknownProbe(id))?;
        tx.commit().map_err(backend)?;
        Ok(Dispatched {
            probe,
            target_retired,
        })
    }

    fn record_outcome(
        &self,
        id: ProbeId,
        outcome: &ProbeOutcome,
        finalize_target: bool,
    ) -> Result<Probe, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(backend)?;
        let updated = tx
            .execute(
                "UPDATE probes
                 SET error = ?1, erring_channel = ?2, failcode = ?3, finished_at = ?4
                 WHERE id = ?5",
                params![
                    outcome.error,
                    outcome.erring_channel,
                    outcome.fail_code,
                    outcome.finished_at.to_rfc3339(),
                    id,
                ],
            )
            .map_err(backend)?;
        if updated == 0 {
            return Err(StoreError::UnknownProbe(id));
        }
        let probe = Self::load_probe(&tx, id)?.ok_or(StoreError::UnknownProbe(id))?;
        if finalize_target {
            Self::finalize(&tx, &probe.destination)?;
        }
        tx.commit().map_err(backend)?;
        Ok(probe)
    }

    fn get_probe(&self, id: ProbeId) -> Result<Option<Probe>, StoreError> {
        Self::load_probe(&self.lock(), id)
    }

    fn pending_probes(&self) -> Result<Vec<Probe>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {PROBE_COLUMNS} FROM probes
                 WHERE failcode IS NULL AND finished_at IS NULL
                 ORDER BY id"
            ))
            .map_err(backend)?;
        let rows = stmt.query_map([], RawProbe::from_row).map_err(backend)?;
        rows.map(|raw| raw.map_err(backend)?.into_probe()).collect()
    }
}
