use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

mod settings;

pub use settings::{ProjectSettings, ResizeAspect, ResizeOrder, ResizePolicy, SettingsError};

pub fn app_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
    base.join("clipjob")
}

/// Ledger of clip jobs and the results they extracted.
pub struct ProjectDb {
    conn: Connection,
    path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRow {
    pub id: String,
    pub clip_id: String,
    pub kind: String,
    pub status: String,
    pub error: Option<String>,
    pub destination: Option<String>,
}

impl ProjectDb {
    pub fn open_or_create(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() { fs::create_dir_all(dir)?; }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", &"WAL")?;
        conn.pragma_update(None, "synchronous", &"NORMAL")?;
        conn.pragma_update(None, "foreign_keys", &"ON")?;
        apply_migrations(&conn)?;
        Ok(Self { conn, path: path.to_path_buf() })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", &"ON")?;
        apply_migrations(&conn)?;
        Ok(Self { conn, path: PathBuf::from(":memory:") })
    }

    pub fn path(&self) -> &Path { &self.path }

    pub fn begin_tx(&self) -> Result<Transaction<'_>> { Ok(self.conn.unchecked_transaction()?) }

    pub fn record_job(&self, job_id: &str, clip_id: &str, kind: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.conn.execute(
            "INSERT OR IGNORE INTO jobs(id, clip_id, kind, status, created_at, updated_at) VALUES(?1, ?2, ?3, 'waiting', ?4, ?4)",
            params![job_id, clip_id, kind, now],
        )?;
        Ok(())
    }

    pub fn update_job_status(&self, job_id: &str, status: &str, error: Option<&str>) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.conn.execute(
            "UPDATE jobs SET status = ?2, error = COALESCE(?3, error), updated_at = ?4 WHERE id = ?1",
            params![job_id, status, error, now],
        )?;
        Ok(())
    }

    pub fn set_job_destination(&self, job_id: &str, destination: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE jobs SET destination = ?2, updated_at = ?3 WHERE id = ?1",
            params![job_id, destination, chrono::Utc::now().timestamp()],
        )?;
        Ok(())
    }

    pub fn record_job_results(&self, job_id: &str, results: &BTreeMap<String, String>) -> Result<()> {
        let tx = self.begin_tx()?;
        for (key, value) in results {
            tx.execute(
                "INSERT OR REPLACE INTO job_results(job_id, key, value) VALUES(?1, ?2, ?3)",
                params![job_id, key, value],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn job_results(&self, job_id: &str) -> Result<BTreeMap<String, String>> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM job_results WHERE job_id = ?1")?;
        let rows = stmt.query_map(params![job_id], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        let mut out = BTreeMap::new();
        for r in rows { let (k, v) = r?; out.insert(k, v); }
        Ok(out)
    }

    pub fn job(&self, job_id: &str) -> Result<Option<JobRow>> {
        let row = self.conn.query_row(
            "SELECT id, clip_id, kind, status, error, destination FROM jobs WHERE id = ?1",
            params![job_id],
            job_row,
        ).optional()?;
        Ok(row)
    }

    pub fn list_jobs(&self, clip_id: &str) -> Result<Vec<JobRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, clip_id, kind, status, error, destination FROM jobs WHERE clip_id = ?1 ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map(params![clip_id], job_row)?;
        let mut out = Vec::new();
        for r in rows { out.push(r?); }
        Ok(out)
    }
}

fn job_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: row.get(0)?,
        clip_id: row.get(1)?,
        kind: row.get(2)?,
        status: row.get(3)?,
        error: row.get(4)?,
        destination: row.get(5)?,
    })
}

fn apply_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(include_str!("../migrations/V0001__init.sql"))?;
    conn.execute(
        "INSERT OR IGNORE INTO migrations(name, applied_at) VALUES(?1, strftime('%s','now'))",
        params!["V0001__init"],
    )?;
    conn.execute_batch(include_str!("../migrations/V0002__job_results.sql"))?;
    conn.execute(
        "INSERT OR IGNORE INTO migrations(name, applied_at) VALUES(?1, strftime('%s','now'))",
        params!["V0002__job_results"],
    )?;
    Ok(())
}
