//! The relational store backing kuang's Host/Service/XFR records.
//!
//! A `host` table with a trigger that bumps `last_contact` whenever a `svc`
//! row is inserted for it, and an `xfr` table tracking zone-transfer
//! attempts.

mod error;
mod model;

pub use error::DbError;
pub use model::{Host, HostSource, Service, Xfr};

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use camino::Utf8Path;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use tracing::debug;

/// How long a connection waits on `SQLITE_BUSY`/`SQLITE_LOCKED` before giving
/// up and surfacing [`DbError::Lock`] to the caller.
const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Flags for the shared-cache, process-lifetime in-memory database used by
/// [`Store::open_in_memory`]. `cache=shared` lets every connection opened
/// against the same URI see the same database; without it each
/// `Connection::open` would start from an empty one.
fn memory_flags() -> OpenFlags {
    OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS host (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    addr TEXT UNIQUE NOT NULL,
    src INTEGER NOT NULL,
    added INTEGER NOT NULL,
    last_contact INTEGER,
    sysname TEXT NOT NULL DEFAULT '',
    location TEXT NOT NULL DEFAULT '',
    xfr INTEGER NOT NULL DEFAULT 0,
    CHECK (name <> ''),
    CHECK (src BETWEEN 1 AND 5)
) STRICT;

CREATE INDEX IF NOT EXISTS host_added_idx ON host (added);
CREATE INDEX IF NOT EXISTS host_last_contact_idx ON host (COALESCE(last_contact, 0));
CREATE INDEX IF NOT EXISTS host_xfr_idx ON host (xfr) WHERE xfr = 0;

CREATE TABLE IF NOT EXISTS svc (
    id INTEGER PRIMARY KEY,
    host_id INTEGER NOT NULL,
    port INTEGER NOT NULL,
    added INTEGER NOT NULL,
    response TEXT,
    FOREIGN KEY (host_id) REFERENCES host (id) ON UPDATE RESTRICT ON DELETE CASCADE,
    UNIQUE (host_id, port),
    CHECK (port BETWEEN 1 AND 65535)
) STRICT;

CREATE INDEX IF NOT EXISTS svc_host_idx ON svc (host_id);
CREATE INDEX IF NOT EXISTS svc_port_idx ON svc (port);
CREATE INDEX IF NOT EXISTS svc_added_idx ON svc (added);

CREATE TRIGGER IF NOT EXISTS tr_host_contact AFTER INSERT ON svc
BEGIN
    UPDATE host SET last_contact = unixepoch() WHERE id = NEW.host_id;
END;

CREATE TABLE IF NOT EXISTS xfr (
    id INTEGER PRIMARY KEY,
    name TEXT UNIQUE NOT NULL,
    added INTEGER NOT NULL,
    started INTEGER NOT NULL DEFAULT 0,
    finished INTEGER NOT NULL DEFAULT 0,
    status INTEGER NOT NULL DEFAULT 0,
    CHECK (finished >= started)
) STRICT;

CREATE INDEX IF NOT EXISTS xfr_start_idx ON xfr (started);
CREATE INDEX IF NOT EXISTS xfr_finish_idx ON xfr (finished);
CREATE INDEX IF NOT EXISTS xfr_name_idx ON xfr (name);
"#;

/// The relational store behind kuang's Host/Service/XFR bookkeeping.
///
/// No connection is held open for the store's lifetime (other than the
/// keepalive connection an in-memory store needs to keep its data from
/// disappearing). Every method opens its own [`rusqlite::Connection`] against
/// the same URI, mirroring the "connections are opened per thread" contract:
/// SQLite itself serializes writers across connections via its own file
/// locking, bounded by [`LOCK_TIMEOUT`]. Callers on an async runtime should
/// still drive [`Store`] methods through `tokio::task::spawn_blocking`, since
/// opening a connection and running a query are both blocking calls.
pub struct Store {
    uri: String,
    memory: bool,
    /// Keeps a `cache=shared` in-memory database alive for the lifetime of
    /// the `Store`; SQLite drops a shared-cache memory database as soon as
    /// its last connection closes, which would otherwise happen between
    /// every call. Never queried directly, so a bare `Mutex` (rather than a
    /// connection pool) is enough to keep `Store` `Sync`.
    _keepalive: Option<Mutex<Connection>>,
}

impl Store {
    /// Open (creating if necessary) the database at `path`.
    pub fn open(path: &Utf8Path) -> Result<Self, DbError> {
        let store = Self {
            uri: path.to_string(),
            memory: false,
            _keepalive: None,
        };
        let conn = store.connect()?;
        conn.execute_batch(SCHEMA)?;
        debug!("Opened store at {path}");
        Ok(store)
    }

    /// Open an in-memory database, useful for tests. Every connection opened
    /// against this `Store` shares the same data via a `cache=shared` URI
    /// unique to this instance, so concurrent callers see a single database
    /// exactly as they would against a real file.
    pub fn open_in_memory() -> Result<Self, DbError> {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut store = Self {
            uri: format!("file:kuang-mem-{id}?mode=memory&cache=shared"),
            memory: true,
            _keepalive: None,
        };
        let keepalive = store.connect()?;
        keepalive.execute_batch(SCHEMA)?;
        store._keepalive = Some(Mutex::new(keepalive));
        Ok(store)
    }

    /// Open a fresh connection against this store's database, with the
    /// bounded busy timeout and pragmas every caller needs.
    fn connect(&self) -> Result<Connection, DbError> {
        let conn = if self.memory {
            Connection::open_with_flags(&self.uri, memory_flags())?
        } else {
            Connection::open(&self.uri)?
        };
        conn.busy_timeout(LOCK_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys = true;")?;
        if !self.memory {
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }
        Ok(conn)
    }

    // --- Host ---------------------------------------------------------

    /// Insert a new host. `host.id` is ignored; the row's id is returned.
    pub fn host_add(
        &self,
        name: &str,
        addr: IpAddr,
        src: HostSource,
    ) -> Result<Host, DbError> {
        let conn = self.connect()?;
        let now: i64 = conn.query_row("SELECT unixepoch()", [], |row| row.get(0))?;
        let id: i64 = conn.query_row(
            "INSERT INTO host (name, addr, src, added) VALUES (?1, ?2, ?3, ?4) RETURNING id",
            params![name, addr.to_string(), src as i64, now],
            |row| row.get(0),
        )?;
        Ok(Host {
            id,
            name: name.to_string(),
            addr,
            src,
            added: now,
            last_contact: None,
            sysname: String::new(),
            location: String::new(),
            xfr: false,
        })
    }

    pub fn host_get_by_addr(&self, addr: IpAddr) -> Result<Option<Host>, DbError> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT id, name, addr, src, added, last_contact, sysname, location, xfr \
             FROM host WHERE addr = ?1",
            params![addr.to_string()],
            row_to_host,
        )
        .optional()
        .map_err(DbError::from)
    }

    pub fn host_get_by_id(&self, id: i64) -> Result<Option<Host>, DbError> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT id, name, addr, src, added, last_contact, sysname, location, xfr \
             FROM host WHERE id = ?1",
            params![id],
            row_to_host,
        )
        .optional()
        .map_err(DbError::from)
    }

    /// Return up to `cnt` hosts, favoring hosts that have gone longest
    /// without contact, but starting from a random offset into that
    /// ordering so that repeated calls do not always return the same set.
    pub fn host_get_random(&self, cnt: u32) -> Result<Vec<Host>, DbError> {
        if cnt == 0 {
            return Err(DbError::InvalidArgument("cnt must be positive".to_string()));
        }
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, addr, src, added, last_contact, sysname, location, xfr \
             FROM host ORDER BY COALESCE(last_contact, 0) DESC \
             LIMIT ?1 OFFSET ABS(RANDOM()) % MAX((SELECT COUNT(*) FROM host), 1)",
        )?;
        let rows = stmt.query_map(params![cnt], row_to_host)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn host_get_all(&self) -> Result<Vec<Host>, DbError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, addr, src, added, last_contact, sysname, location, xfr FROM host",
        )?;
        let rows = stmt.query_map([], row_to_host)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Hosts that have not yet been through a zone-transfer attempt.
    pub fn host_get_no_xfr(&self, cnt: u32) -> Result<Vec<Host>, DbError> {
        if cnt == 0 {
            return Err(DbError::InvalidArgument("cnt must be positive".to_string()));
        }
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, addr, src, added, last_contact, sysname, location, xfr \
             FROM host WHERE xfr = 0 ORDER BY added ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![cnt], row_to_host)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn host_update_contact(&self, host_id: i64) -> Result<(), DbError> {
        if host_id < 1 {
            return Err(DbError::InvalidArgument("host_id must be >= 1".to_string()));
        }
        let conn = self.connect()?;
        conn.execute(
            "UPDATE host SET last_contact = unixepoch() WHERE id = ?1",
            params![host_id],
        )?;
        Ok(())
    }

    pub fn host_set_xfr(&self, host_id: i64, xfr: bool) -> Result<(), DbError> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE host SET xfr = ?1 WHERE id = ?2",
            params![xfr as i64, host_id],
        )?;
        Ok(())
    }

    pub fn host_update_sysname(&self, host_id: i64, sysname: &str) -> Result<(), DbError> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE host SET sysname = ?1 WHERE id = ?2",
            params![sysname, host_id],
        )?;
        Ok(())
    }

    pub fn host_update_location(&self, host_id: i64, location: &str) -> Result<(), DbError> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE host SET location = ?1 WHERE id = ?2",
            params![location, host_id],
        )?;
        Ok(())
    }

    pub fn host_count(&self) -> Result<i64, DbError> {
        let conn = self.connect()?;
        conn.query_row("SELECT COUNT(*) FROM host", [], |row| row.get(0))
            .map_err(DbError::from)
    }

    // --- Service --------------------------------------------------------

    pub fn service_add(
        &self,
        host_id: i64,
        port: u16,
        response: Option<&str>,
    ) -> Result<Service, DbError> {
        let conn = self.connect()?;
        let now: i64 = conn.query_row("SELECT unixepoch()", [], |row| row.get(0))?;
        let id: i64 = conn.query_row(
            "INSERT INTO svc (host_id, port, added, response) VALUES (?1, ?2, ?3, ?4) \
             RETURNING id",
            params![host_id, port, now, response],
            |row| row.get(0),
        )?;
        Ok(Service {
            id,
            host_id,
            port,
            added: now,
            response: response.map(str::to_string),
        })
    }

    pub fn service_get_by_host(&self, host_id: i64) -> Result<Vec<Service>, DbError> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT id, host_id, port, added, response FROM svc WHERE host_id = ?1")?;
        let rows = stmt.query_map(params![host_id], row_to_service)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn service_count(&self) -> Result<i64, DbError> {
        let conn = self.connect()?;
        conn.query_row("SELECT COUNT(*) FROM svc", [], |row| row.get(0))
            .map_err(DbError::from)
    }

    // --- XFR --------------------------------------------------------------

    pub fn xfr_add(&self, name: &str) -> Result<Xfr, DbError> {
        let conn = self.connect()?;
        let now: i64 = conn.query_row("SELECT unixepoch()", [], |row| row.get(0))?;
        let id: i64 = conn.query_row(
            "INSERT INTO xfr (name, added) VALUES (?1, ?2) RETURNING id",
            params![name, now],
            |row| row.get(0),
        )?;
        Ok(Xfr {
            id,
            name: name.to_string(),
            added: now,
            started: 0,
            finished: 0,
            status: false,
        })
    }

    pub fn xfr_start(&self, id: i64) -> Result<(), DbError> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE xfr SET started = unixepoch() WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    pub fn xfr_finish(&self, id: i64, status: bool) -> Result<(), DbError> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE xfr SET finished = unixepoch(), status = ?1 WHERE id = ?2",
            params![status as i64, id],
        )?;
        Ok(())
    }

    pub fn xfr_get_unfinished(&self, limit: u32) -> Result<Vec<Xfr>, DbError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, added, started, finished, status FROM xfr \
             WHERE finished = 0 LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], row_to_xfr)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn xfr_get_by_name(&self, name: &str) -> Result<Option<Xfr>, DbError> {
        let conn = self.connect()?;
        conn.query_row(
            "SELECT id, name, added, started, finished, status FROM xfr WHERE name = ?1",
            params![name],
            row_to_xfr,
        )
        .optional()
        .map_err(DbError::from)
    }

    pub fn xfr_count(&self) -> Result<i64, DbError> {
        let conn = self.connect()?;
        conn.query_row("SELECT COUNT(*) FROM xfr", [], |row| row.get(0))
            .map_err(DbError::from)
    }
}

fn row_to_host(row: &rusqlite::Row<'_>) -> rusqlite::Result<Host> {
    let addr_str: String = row.get(2)?;
    let src_raw: i64 = row.get(3)?;
    Ok(Host {
        id: row.get(0)?,
        name: row.get(1)?,
        addr: addr_str.parse().map_err(|_| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                "invalid IP address stored in host.addr".into(),
            )
        })?,
        src: HostSource::from_i64(src_raw).unwrap_or(HostSource::User),
        added: row.get(4)?,
        last_contact: row.get(5)?,
        sysname: row.get(6)?,
        location: row.get(7)?,
        xfr: row.get::<_, i64>(8)? != 0,
    })
}

fn row_to_service(row: &rusqlite::Row<'_>) -> rusqlite::Result<Service> {
    Ok(Service {
        id: row.get(0)?,
        host_id: row.get(1)?,
        port: row.get::<_, i64>(2)? as u16,
        added: row.get(3)?,
        response: row.get(4)?,
    })
}

fn row_to_xfr(row: &rusqlite::Row<'_>) -> rusqlite::Result<Xfr> {
    Ok(Xfr {
        id: row.get(0)?,
        name: row.get(1)?,
        added: row.get(2)?,
        started: row.get(3)?,
        finished: row.get(4)?,
        status: row.get::<_, i64>(5)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_add_then_get_by_addr() {
        let store = Store::open_in_memory().unwrap();
        let host = store
            .host_add("foo.example.net", "198.51.100.7".parse().unwrap(), HostSource::Generator)
            .unwrap();
        let fetched = store.host_get_by_addr("198.51.100.7".parse().unwrap()).unwrap();
        assert_eq!(fetched.unwrap().id, host.id);
    }

    #[test]
    fn duplicate_address_is_an_integrity_error() {
        let store = Store::open_in_memory().unwrap();
        store
            .host_add("a.example.net", "198.51.100.7".parse().unwrap(), HostSource::Generator)
            .unwrap();
        let err = store
            .host_add("b.example.net", "198.51.100.7".parse().unwrap(), HostSource::Generator)
            .unwrap_err();
        assert!(matches!(err, DbError::Integrity(_)));
    }

    #[test]
    fn service_add_bumps_host_last_contact() {
        let store = Store::open_in_memory().unwrap();
        let host = store
            .host_add("a.example.net", "198.51.100.7".parse().unwrap(), HostSource::Generator)
            .unwrap();
        assert!(host.last_contact.is_none());
        store.service_add(host.id, 80, Some("nginx")).unwrap();
        let refreshed = store.host_get_by_id(host.id).unwrap().unwrap();
        assert!(refreshed.last_contact.is_some());
    }

    #[test]
    fn xfr_finish_requires_started_le_finished() {
        let store = Store::open_in_memory().unwrap();
        let xfr = store.xfr_add("example.net.").unwrap();
        store.xfr_start(xfr.id).unwrap();
        store.xfr_finish(xfr.id, true).unwrap();
        let reloaded = store.xfr_get_by_name("example.net.").unwrap().unwrap();
        assert!(reloaded.status);
    }

    #[test]
    fn host_get_random_rejects_zero_count() {
        let store = Store::open_in_memory().unwrap();
        assert!(matches!(
            store.host_get_random(0),
            Err(DbError::InvalidArgument(_))
        ));
    }

    #[test]
    fn host_get_no_xfr_returns_oldest_first() {
        let store = Store::open_in_memory().unwrap();
        let a = store
            .host_add("a.example.net", "198.51.100.1".parse().unwrap(), HostSource::Generator)
            .unwrap();
        let b = store
            .host_add("b.example.net", "198.51.100.2".parse().unwrap(), HostSource::Generator)
            .unwrap();
        store.host_set_xfr(b.id, true).unwrap();
        let c = store
            .host_add("c.example.net", "198.51.100.3".parse().unwrap(), HostSource::Generator)
            .unwrap();

        let pending = store.host_get_no_xfr(10).unwrap();
        let ids: Vec<i64> = pending.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![a.id, c.id]);
    }
}
