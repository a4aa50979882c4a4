//! Durable store of known hosts, backed by `SQLite`.
//!
//! The store's lifetime is reference counted. [`Registry::open`] holds the initial
//! reference, every operation runs on a [`RegistryRef`] acquired before touching
//! storage, and the pool is closed once the last reference is gone. A poll that is
//! still running after shutdown was requested therefore always finishes against an
//! open store.
//!
//! Storage failures never leave this module: they are logged and the operation
//! reports `None`/`false` instead.

use alloc::sync::Arc;
use core::{
    net::IpAddr,
    str::FromStr as _,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::{
    io,
    path::Path,
    sync::{Mutex, PoisonError},
};

use chrono::{DateTime, Utc};
use rand::Rng as _;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use thiserror::Error as ThisError;
use tokio::runtime::Handle;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::host::HostRecord;

const UNIQUE_ID_KEY: &str = "unique_id";

/// Errors from the storage layer. Only surfaced by [`Registry::open`].
#[derive(Debug, ThisError)]
pub enum RegistryError {
    #[error("database error")]
    Sqlx(#[from] sqlx::Error),
    #[error("failed to apply database migrations")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("failed to create database directory")]
    Io(#[from] io::Error),
    #[error("corrupt row for host '{name}': {reason}")]
    Corrupt { name: String, reason: String },
}

/// Reference-counted handle to the host database.
pub struct Registry {
    refs: AtomicUsize,
    initial_released: AtomicBool,
    pool: Mutex<Option<SqlitePool>>,
}

/// One acquired reference to an open [`Registry`]; released on drop.
pub struct RegistryRef {
    registry: Arc<Registry>,
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct HostRow {
    uuid: String,
    name: String,
    mac: Option<String>,
    local_ip: String,
    remote_ip: String,
    state: String,
    reachability: String,
    pair_state: String,
    running_app: i64,
    updated_at: DateTime<Utc>,
}

impl TryFrom<HostRow> for HostRecord {
    type Error = RegistryError;

    fn try_from(row: HostRow) -> Result<Self, Self::Error> {
        fn field<T, E: ToString>(name: &str, res: Result<T, E>) -> Result<T, RegistryError> {
            res.map_err(|e| RegistryError::Corrupt {
                name: name.to_owned(),
                reason: e.to_string(),
            })
        }

        let name = row.name;
        Ok(Self {
            uuid: field(&name, Uuid::parse_str(&row.uuid))?,
            mac: row.mac,
            local_ip: field(&name, row.local_ip.parse::<IpAddr>())?,
            remote_ip: field(&name, row.remote_ip.parse::<IpAddr>())?,
            state: field(&name, serde_plain::from_str(&row.state))?,
            reachability: field(&name, serde_plain::from_str(&row.reachability))?,
            pair_state: field(&name, serde_plain::from_str(&row.pair_state))?,
            running_app: field(&name, u32::try_from(row.running_app))?,
            raw_app_list: None,
            updated_at: row.updated_at,
            name,
        })
    }
}

impl Registry {
    /// Opens (creating if necessary) the database at `path` and applies migrations.
    ///
    /// `:memory:` opens a private in-memory database. The returned registry holds its
    /// initial reference until [`Registry::close`] is called.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    #[tracing::instrument(skip_all, fields(path = %path.display()))]
    pub async fn open(path: &Path) -> Result<Arc<Self>, RegistryError> {
        let in_memory = path == Path::new(":memory:");
        let options = if in_memory {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
        };

        // An in-memory database lives exactly as long as its single connection.
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 4 })
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Host registry opened");

        Ok(Arc::new(Self {
            refs: AtomicUsize::new(1),
            initial_released: AtomicBool::new(false),
            pool: Mutex::new(Some(pool)),
        }))
    }

    /// Takes a reference for one or more storage operations.
    ///
    /// Returns `None` once the registry has been closed.
    #[must_use]
    pub fn acquire(self: &Arc<Self>) -> Option<RegistryRef> {
        let mut current = self.refs.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return None;
            }
            match self.refs.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        let pool = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(pool) = pool else {
            self.release();
            return None;
        };
        Some(RegistryRef {
            registry: Arc::clone(self),
            pool,
        })
    }

    /// Drops the initial reference. The database is closed as soon as no
    /// operation holds a reference anymore. Calling this again has no effect.
    pub fn close(&self) {
        if !self.initial_released.swap(true, Ordering::AcqRel) {
            self.release();
        }
    }

    /// Whether the database has been closed for good.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.refs.load(Ordering::Acquire) == 0
    }

    fn release(&self) {
        if self.refs.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let pool = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pool) = pool {
            info!("Closing host registry");
            match Handle::try_current() {
                Ok(handle) => drop(handle.spawn(async move { pool.close().await })),
                Err(_) => drop(pool),
            }
        }
    }
}

impl Drop for RegistryRef {
    fn drop(&mut self) {
        self.registry.release();
    }
}

impl RegistryRef {
    /// All stored hosts, or `None` if they could not be read. Rows that cannot be
    /// decoded are logged and left out.
    pub async fn get_all(&self) -> Option<Vec<HostRecord>> {
        log_failure("read hosts", self.try_get_all().await)
    }

    /// Inserts `host` or replaces the stored row with the same UUID.
    ///
    /// Fails if another host already uses the same name.
    pub async fn upsert(&self, host: &HostRecord) -> bool {
        log_failure("store host", self.try_upsert(host).await).is_some()
    }

    /// Deletes the host called `name`. Returns `false` if nothing was deleted.
    pub async fn delete(&self, name: &str) -> bool {
        log_failure("delete host", self.try_delete(name).await).unwrap_or(false)
    }

    pub async fn lookup(&self, uuid: Uuid) -> Option<HostRecord> {
        log_failure(
            "look up host",
            self.try_lookup("SELECT * FROM hosts WHERE uuid = ?", &uuid.to_string())
                .await,
        )
        .flatten()
    }

    pub async fn lookup_by_name(&self, name: &str) -> Option<HostRecord> {
        log_failure(
            "look up host",
            self.try_lookup("SELECT * FROM hosts WHERE name = ?", name).await,
        )
        .flatten()
    }

    /// The id this client identifies itself with, generated on first use.
    pub async fn unique_id(&self) -> Option<String> {
        log_failure("load client id", self.try_unique_id().await)
    }

    async fn try_get_all(&self) -> Result<Vec<HostRecord>, RegistryError> {
        let rows = sqlx::query_as::<_, HostRow>("SELECT * FROM hosts ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| log_failure("load host", HostRecord::try_from(row)))
            .collect())
    }

    async fn try_upsert(&self, host: &HostRecord) -> Result<(), RegistryError> {
        sqlx::query(
            "INSERT INTO hosts \
                (uuid, name, mac, local_ip, remote_ip, state, reachability, pair_state, running_app, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT(uuid) DO UPDATE SET \
                name = excluded.name, mac = excluded.mac, local_ip = excluded.local_ip, \
                remote_ip = excluded.remote_ip, state = excluded.state, \
                reachability = excluded.reachability, pair_state = excluded.pair_state, \
                running_app = excluded.running_app, updated_at = excluded.updated_at",
        )
        .bind(host.uuid.to_string())
        .bind(&host.name)
        .bind(host.mac.as_deref())
        .bind(host.local_ip.to_string())
        .bind(host.remote_ip.to_string())
        .bind(plain(&host.state))
        .bind(plain(&host.reachability))
        .bind(plain(&host.pair_state))
        .bind(i64::from(host.running_app))
        .bind(host.updated_at)
        .execute(&self.pool)
        .await?;
        debug!(host = %host.name, "Stored host");
        Ok(())
    }

    async fn try_delete(&self, name: &str) -> Result<bool, RegistryError> {
        let res = sqlx::query("DELETE FROM hosts WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    async fn try_lookup(&self, sql: &str, key: &str) -> Result<Option<HostRecord>, RegistryError> {
        sqlx::query_as::<_, HostRow>(sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
            .map(HostRecord::try_from)
            .transpose()
    }

    async fn try_unique_id(&self) -> Result<String, RegistryError> {
        let generated = format!("{:016x}", rand::rng().random::<u64>());
        // Keeps an existing id; the select below returns whichever id won.
        sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
            .bind(UNIQUE_ID_KEY)
            .bind(&generated)
            .execute(&self.pool)
            .await?;
        Ok(
            sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
                .bind(UNIQUE_ID_KEY)
                .fetch_one(&self.pool)
                .await?,
        )
    }
}

fn plain<T: serde::Serialize>(value: &T) -> String {
    serde_plain::to_string(value).unwrap_or_default()
}

fn log_failure<T>(what: &str, res: Result<T, RegistryError>) -> Option<T> {
    match res {
        Ok(v) => Some(v),
        Err(e) => {
            error!("Failed to {what}: {e:?}");
            None
        }
    }
}
