//! SQLite connectors.
//!
//! One database file holds both trees. [`SqliteDatabase`] owns the shared
//! connection and hands out a data and a meta connector over it. Work runs
//! on the blocking pool via `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use synclets_core::{Address, Hash, Timestamp, Value};

use crate::error::{ConnectorError, Result};
use crate::migration;
use crate::traits::{Attachment, DataConnector, MetaConnector};

/// A SQLite database holding a data tree and a meta tree.
#[derive(Clone)]
pub struct SqliteDatabase {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDatabase {
    /// Open (creating if needed) a database file and migrate it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a private in-memory database.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn data_connector(&self, depth: usize) -> SqliteDataConnector {
        SqliteDataConnector {
            db: self.clone(),
            depth,
            attachment: Attachment::new(),
        }
    }

    pub fn meta_connector(&self, depth: usize) -> SqliteMetaConnector {
        SqliteMetaConnector {
            db: self.clone(),
            depth,
            attachment: Attachment::new(),
        }
    }

    async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| ConnectorError::Backend(format!("blocking task failed: {}", e)))?
    }
}

fn address_key(ids: &[String]) -> Result<String> {
    serde_json::to_string(ids).map_err(|e| ConnectorError::Serialization(e.to_string()))
}

fn encode_value(value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| ConnectorError::Serialization(e.to_string()))?;
    Ok(buf)
}

fn decode_value(bytes: &[u8]) -> Result<Value> {
    ciborium::from_reader(bytes).map_err(|e| ConnectorError::Serialization(e.to_string()))
}

/// Record every parent/child edge from the root down to `address`.
fn insert_edges(conn: &Connection, table: &str, address: &Address) -> Result<()> {
    let sql = format!("INSERT OR IGNORE INTO {} (parent, id) VALUES (?1, ?2)", table);
    let mut stmt = conn.prepare_cached(&sql)?;
    let ids = address.ids();
    for (len, id) in ids.iter().enumerate() {
        stmt.execute(params![address_key(&ids[..len])?, id])?;
    }
    Ok(())
}

fn child_ids(conn: &Connection, table: &str, address: &Address) -> Result<Vec<String>> {
    let sql = format!("SELECT id FROM {} WHERE parent = ?1 ORDER BY id", table);
    let mut stmt = conn.prepare_cached(&sql)?;
    let ids = stmt
        .query_map([address_key(address.ids())?], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

fn invalid(address: &Address, depth: usize) -> ConnectorError {
    ConnectorError::InvalidAddress {
        address: address.clone(),
        depth,
    }
}

/// Data connector storing CBOR-encoded leaf values.
pub struct SqliteDataConnector {
    db: SqliteDatabase,
    depth: usize,
    attachment: Attachment,
}

#[async_trait]
impl DataConnector for SqliteDataConnector {
    fn depth(&self) -> usize {
        self.depth
    }

    fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    async fn read_child_ids(&self, address: &Address) -> Result<Vec<String>> {
        let address = address.clone();
        self.db
            .run(move |conn| child_ids(conn, "data_nodes", &address))
            .await
    }

    async fn read_value(&self, address: &Address) -> Result<Option<Value>> {
        let key = address_key(address.ids())?;
        let bytes: Option<Vec<u8>> = self
            .db
            .run(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT value FROM data_values WHERE address = ?1",
                        [key],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        bytes.map(|b| decode_value(&b)).transpose()
    }

    async fn write_value(&self, address: &Address, value: &Value) -> Result<()> {
        if address.len() != self.depth {
            return Err(invalid(address, self.depth));
        }
        let address = address.clone();
        let key = address_key(address.ids())?;
        let bytes = encode_value(value)?;
        self.db
            .run(move |conn| {
                let tx = conn.transaction()?;
                insert_edges(&tx, "data_nodes", &address)?;
                tx.execute(
                    "INSERT INTO data_values (address, value) VALUES (?1, ?2)
                     ON CONFLICT(address) DO UPDATE SET value = excluded.value",
                    params![key, bytes],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
    }
}

/// Meta connector storing leaf timestamps and ancestor hashes.
pub struct SqliteMetaConnector {
    db: SqliteDatabase,
    depth: usize,
    attachment: Attachment,
}

#[async_trait]
impl MetaConnector for SqliteMetaConnector {
    fn depth(&self) -> usize {
        self.depth
    }

    fn attachment(&self) -> &Attachment {
        &self.attachment
    }

    async fn read_child_ids(&self, address: &Address) -> Result<Vec<String>> {
        let address = address.clone();
        self.db
            .run(move |conn| child_ids(conn, "meta_nodes", &address))
            .await
    }

    async fn read_timestamp(&self, address: &Address) -> Result<Option<Timestamp>> {
        let key = address_key(address.ids())?;
        let encoded: Option<String> = self
            .db
            .run(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT timestamp FROM meta_timestamps WHERE address = ?1",
                        [key],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await?;
        Ok(encoded.map(Timestamp::from_encoded))
    }

    async fn write_timestamp(&self, address: &Address, timestamp: &Timestamp) -> Result<()> {
        if address.len() != self.depth {
            return Err(invalid(address, self.depth));
        }
        let address = address.clone();
        let key = address_key(address.ids())?;
        let encoded = timestamp.as_str().to_string();
        self.db
            .run(move |conn| {
                let tx = conn.transaction()?;
                insert_edges(&tx, "meta_nodes", &address)?;
                tx.execute(
                    "INSERT INTO meta_timestamps (address, timestamp) VALUES (?1, ?2)
                     ON CONFLICT(address) DO UPDATE SET timestamp = excluded.timestamp",
                    params![key, encoded],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
    }

    async fn read_hash(&self, address: &Address) -> Result<Option<Hash>> {
        let key = address_key(address.ids())?;
        self.db
            .run(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT hash FROM meta_hashes WHERE address = ?1",
                        [key],
                        |row| row.get::<_, u32>(0),
                    )
                    .optional()?)
            })
            .await
    }

    async fn write_hash(&self, address: &Address, hash: Hash) -> Result<()> {
        if address.len() >= self.depth {
            return Err(invalid(address, self.depth));
        }
        let address = address.clone();
        let key = address_key(address.ids())?;
        self.db
            .run(move |conn| {
                let tx = conn.transaction()?;
                insert_edges(&tx, "meta_nodes", &address)?;
                tx.execute(
                    "INSERT INTO meta_hashes (address, hash) VALUES (?1, ?2)
                     ON CONFLICT(address) DO UPDATE SET hash = excluded.hash",
                    params![key, hash],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
    }
}
