//! Durable session storage.
//!
//! The engine itself is purely in-memory. [`PersistentRideEngine`] wraps it
//! together with a [`SnapshotStore`] and writes the flattened session after
//! every mutation, so a killed app resumes mid-ride with both blocks, the
//! trail and the block clock intact.
//!
//! Two stores are provided:
//! - [`MemorySnapshotStore`] for tests and hosts without storage
//! - `SqliteSnapshotStore` (feature `persistence`), one row per key

use log::warn;

use crate::clock::{Clock, SystemClock};
use crate::engine::RideEngine;
use crate::error::Result;
use crate::session::RaceSession;
use crate::snapshot::Snapshot;

#[cfg(feature = "persistence")]
use rusqlite::{params, Connection};

/// Key-value storage for one session snapshot.
pub trait SnapshotStore {
    /// Last saved snapshot, or an empty map if nothing was saved.
    fn load(&self) -> Result<Snapshot>;

    /// Replace the stored snapshot.
    fn save(&mut self, snapshot: &Snapshot) -> Result<()>;

    fn clear(&mut self) -> Result<()>;
}

impl<S: SnapshotStore + ?Sized> SnapshotStore for Box<S> {
    fn load(&self) -> Result<Snapshot> {
        (**self).load()
    }

    fn save(&mut self, snapshot: &Snapshot) -> Result<()> {
        (**self).save(snapshot)
    }

    fn clear(&mut self) -> Result<()> {
        (**self).clear()
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct MemorySnapshotStore {
    snapshot: Snapshot,
    saves: u64,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> u64 {
        self.saves
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load(&self) -> Result<Snapshot> {
        Ok(self.snapshot.clone())
    }

    fn save(&mut self, snapshot: &Snapshot) -> Result<()> {
        self.snapshot = snapshot.clone();
        self.saves += 1;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.snapshot.clear();
        Ok(())
    }
}

// ============================================================================
// SQLite store
// ============================================================================

/// Snapshot store backed by a single SQLite table.
#[cfg(feature = "persistence")]
pub struct SqliteSnapshotStore {
    db: Connection,
    db_path: String,
}

#[cfg(feature = "persistence")]
impl SqliteSnapshotStore {
    /// Open (or create) the database at `db_path`.
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Connection::open(db_path)?;
        Self::init_schema(&db)?;
        log::info!("[SnapshotStore] Opened {}", db_path);
        Ok(Self {
            db,
            db_path: db_path.to_string(),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::new(":memory:")
    }

    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS session_snapshot (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

#[cfg(feature = "persistence")]
impl SnapshotStore for SqliteSnapshotStore {
    fn load(&self) -> Result<Snapshot> {
        let mut stmt = self.db.prepare("SELECT key, value FROM session_snapshot")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut snapshot = Snapshot::new();
        for row in rows {
            let (key, value) = row?;
            snapshot.insert(key, value);
        }
        Ok(snapshot)
    }

    /// Replaces every row in one transaction.
    fn save(&mut self, snapshot: &Snapshot) -> Result<()> {
        let tx = self.db.transaction()?;
        tx.execute("DELETE FROM session_snapshot", [])?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO session_snapshot (key, value) VALUES (?, ?)")?;
            for (key, value) in snapshot {
                stmt.execute(params![key, value])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.db.execute("DELETE FROM session_snapshot", [])?;
        log::info!("[SnapshotStore] Cleared");
        Ok(())
    }
}

// ============================================================================
// Persistent engine
// ============================================================================

/// A [`RideEngine`] that saves its session after every mutation.
pub struct PersistentRideEngine<S: SnapshotStore, C: Clock = SystemClock> {
    engine: RideEngine<C>,
    store: S,
}

impl<S: SnapshotStore, C: Clock> PersistentRideEngine<S, C> {
    /// Restore the last saved session from `store`.
    ///
    /// A snapshot that no longer decodes is discarded and the engine starts
    /// idle. Storage errors are returned.
    pub fn open(mut store: S, clock: C) -> Result<Self> {
        let snapshot = store.load()?;
        let engine = match RaceSession::from_snapshot(&snapshot) {
            Ok(session) => RideEngine::from_session(session, clock),
            Err(e) => {
                warn!("[SnapshotStore] Discarding unreadable snapshot: {}", e);
                store.clear()?;
                RideEngine::with_clock(clock)
            }
        };
        Ok(Self { engine, store })
    }

    pub fn engine(&self) -> &RideEngine<C> {
        &self.engine
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run a mutation and persist the resulting session.
    ///
    /// The mutation is kept in memory even if saving fails; the error is
    /// returned so the caller can surface it.
    pub fn apply<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut RideEngine<C>) -> R,
    {
        let result = f(&mut self.engine);
        self.persist()?;
        Ok(result)
    }

    /// Like [`apply`](Self::apply), but a failed save is only logged.
    pub fn apply_or_warn<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut RideEngine<C>) -> R,
    {
        let result = f(&mut self.engine);
        if let Err(e) = self.persist() {
            warn!("[SnapshotStore] Failed to persist session: {}", e);
        }
        result
    }

    /// Recompute elapsed time. Not persisted, the clock fields already
    /// determine it.
    pub fn tick(&mut self) -> u64 {
        self.engine.update_timer()
    }

    pub fn persist(&mut self) -> Result<()> {
        let snapshot = self.engine.snapshot();
        self.store.save(&snapshot)
    }

    pub fn into_parts(self) -> (RideEngine<C>, S) {
        (self.engine, self.store)
    }
}
