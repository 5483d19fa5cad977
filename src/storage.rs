use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::api::FeedKind;

/// Fixed keys mirroring the browser client's localStorage slots.
pub const TOKEN_KEY: &str = "token";
pub const USER_ID_KEY: &str = "user:id";

/// Durable client state: bearer token, user id, and one pagination cursor
/// per feed kind, all addressed by fixed string keys.
#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", &"WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", &5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    pub fn set(&self, key: &str, value: Option<&str>) -> Result<()> {
        if key.is_empty() {
            bail!("storage: state key required");
        }
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO client_state (key, value, updated_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(key) DO UPDATE SET
  value = excluded.value,
  updated_at = excluded.updated_at
"#,
            params![key, value, Utc::now().timestamp()],
        )?;
        Ok(())
    }

    /// Outer `None` means the key has never been written; `Some(None)` means
    /// it was explicitly set to the null sentinel.
    pub fn get(&self, key: &str) -> Result<Option<Option<String>>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT value FROM client_state WHERE key = ?1",
            params![key],
            |row| row.get::<_, Option<String>>(0),
        )
        .optional()
        .context("storage: query state")
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM client_state WHERE key = ?1", params![key])?;
        Ok(())
    }

    pub fn set_token(&self, token: &str) -> Result<()> {
        if token.is_empty() {
            bail!("storage: token required");
        }
        self.set(TOKEN_KEY, Some(token))
    }

    pub fn token(&self) -> Result<Option<String>> {
        Ok(self.get(TOKEN_KEY)?.flatten())
    }

    pub fn set_user_id(&self, user_id: i64) -> Result<()> {
        self.set(USER_ID_KEY, Some(&user_id.to_string()))
    }

    pub fn user_id(&self) -> Result<Option<i64>> {
        let value = self.get(USER_ID_KEY)?.flatten();
        Ok(value.and_then(|v| v.parse().ok()))
    }

    /// `next = None` records the exhausted sentinel: the kind has no more
    /// pages until the cursor is overwritten by a feed reset.
    pub fn set_cursor(&self, kind: FeedKind, next: Option<&str>) -> Result<()> {
        self.set(&cursor_key(kind), next)
    }

    pub fn cursor(&self, kind: FeedKind) -> Result<Option<Option<String>>> {
        self.get(&cursor_key(kind))
    }

    pub fn clear_cursor(&self, kind: FeedKind) -> Result<()> {
        self.delete(&cursor_key(kind))
    }

    pub fn clear_session(&self) -> Result<()> {
        self.delete(TOKEN_KEY)?;
        self.delete(USER_ID_KEY)
    }
}

fn cursor_key(kind: FeedKind) -> String {
    format!("{}:next", kind.as_str())
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let migrations = migrations();
    for (idx, sql) in migrations.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS client_state (
  key TEXT PRIMARY KEY,
  value TEXT,
  updated_at INTEGER NOT NULL
);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("firefly").join("state.db"))
}
