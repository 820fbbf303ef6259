//! Document persistence on top of SQLite.
//!
//! Each collection is a table of JSON documents addressed by a business key.
//! The connection sits behind a mutex, so a read-modify-write on one document
//! never interleaves with another write from this process.

use std::path::Path;
use std::sync::{Arc, Mutex};

use actix_web::web;
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{CompanyConfig, Lead, Product};

/// A stored record type. `_id`, `createdAt` and `updatedAt` are owned by the store.
pub trait Document: Serialize + DeserializeOwned + Send + 'static {
    const TABLE: &'static str;
    const KEY_FIELD: &'static str;
    const UNIQUE_KEY: bool;
}

const MANAGED_FIELDS: [&str; 3] = ["_id", "createdAt", "updatedAt"];

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database unavailable: {0}")]
    Unavailable(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored document is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    /// The merged document does not fit its model.
    #[error("{0}")]
    Invalid(String),

    #[error("database connection lock poisoned")]
    Poisoned,

    #[error("database task was cancelled")]
    Cancelled,
}

struct StoredRow {
    oid: String,
    doc: String,
    created_at: String,
    updated_at: String,
}

#[derive(Clone)]
pub struct Store {
    conn: Result<Arc<Mutex<Connection>>, Arc<str>>,
}

impl Store {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// A store that answers every call with [`StoreError::Unavailable`].
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            conn: Err(Arc::from(reason.into())),
        }
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        create_collection::<Product>(&conn)?;
        create_collection::<Lead>(&conn)?;
        create_collection::<CompanyConfig>(&conn)?;
        Ok(Self {
            conn: Ok(Arc::new(Mutex::new(conn))),
        })
    }

    pub fn is_available(&self) -> bool {
        self.conn.is_ok()
    }

    /// All documents of a collection in insertion order.
    pub async fn find_all<D: Document>(&self) -> Result<Vec<D>, StoreError> {
        self.blocking(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT oid, doc, created_at, updated_at FROM {} ORDER BY rowid",
                D::TABLE
            ))?;
            let rows = stmt.query_map([], read_row)?;
            let mut documents = Vec::new();
            for row in rows {
                documents.push(assemble::<D>(row?)?);
            }
            Ok(documents)
        })
        .await
    }

    pub async fn find_by_key<D: Document>(&self, key: &str) -> Result<Option<D>, StoreError> {
        let key = key.to_string();
        self.blocking(move |conn| {
            select_by_key::<D>(conn, &key)?
                .map(assemble::<D>)
                .transpose()
        })
        .await
    }

    /// The most recently written document of a collection.
    pub async fn find_latest<D: Document>(&self) -> Result<Option<D>, StoreError> {
        self.blocking(|conn| {
            conn.query_row(
                &format!(
                    "SELECT oid, doc, created_at, updated_at FROM {} ORDER BY rev DESC LIMIT 1",
                    D::TABLE
                ),
                [],
                read_row,
            )
            .optional()?
            .map(assemble::<D>)
            .transpose()
        })
        .await
    }

    /// Sets the given top-level fields on an existing document. `None` when no document matches.
    pub async fn update<D: Document>(
        &self,
        key: &str,
        fields: Map<String, Value>,
    ) -> Result<Option<D>, StoreError> {
        let key = key.to_string();
        self.blocking(move |conn| match select_by_key::<D>(conn, &key)? {
            Some(existing) => write::<D>(conn, Some(existing), &key, fields).map(Some),
            None => Ok(None),
        })
        .await
    }

    /// Sets the given fields on the matching document, inserting it first if absent.
    pub async fn upsert<D: Document>(
        &self,
        key: &str,
        fields: Map<String, Value>,
    ) -> Result<D, StoreError> {
        let key = key.to_string();
        self.blocking(move |conn| {
            let existing = select_by_key::<D>(conn, &key)?;
            write::<D>(conn, existing, &key, fields)
        })
        .await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = match &self.conn {
            Ok(conn) => Arc::clone(conn),
            Err(reason) => return Err(StoreError::Unavailable(reason.to_string())),
        };
        web::block(move || {
            let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
            f(&guard)
        })
        .await
        .map_err(|_| StoreError::Cancelled)?
    }
}

fn create_collection<D: Document>(conn: &Connection) -> rusqlite::Result<()> {
    let unique = if D::UNIQUE_KEY { " UNIQUE" } else { "" };
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            oid TEXT PRIMARY KEY,
            doc_key TEXT NOT NULL{unique},
            doc TEXT NOT NULL,
            rev INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS {table}_doc_key ON {table}(doc_key);",
        table = D::TABLE,
    ))
}

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredRow> {
    Ok(StoredRow {
        oid: row.get(0)?,
        doc: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

fn select_by_key<D: Document>(conn: &Connection, key: &str) -> Result<Option<StoredRow>, StoreError> {
    let row = conn
        .query_row(
            &format!(
                "SELECT oid, doc, created_at, updated_at FROM {} WHERE doc_key = ?1 ORDER BY rowid LIMIT 1",
                D::TABLE
            ),
            params![key],
            read_row,
        )
        .optional()?;
    Ok(row)
}

fn with_managed_fields(
    mut fields: Map<String, Value>,
    oid: &str,
    created_at: &str,
    updated_at: &str,
) -> Value {
    fields.insert("_id".into(), Value::String(oid.to_string()));
    fields.insert("createdAt".into(), Value::String(created_at.to_string()));
    fields.insert("updatedAt".into(), Value::String(updated_at.to_string()));
    Value::Object(fields)
}

fn assemble<D: Document>(row: StoredRow) -> Result<D, StoreError> {
    let fields: Map<String, Value> = serde_json::from_str(&row.doc)?;
    let value = with_managed_fields(fields, &row.oid, &row.created_at, &row.updated_at);
    Ok(serde_json::from_value(value)?)
}

fn write<D: Document>(
    conn: &Connection,
    existing: Option<StoredRow>,
    key: &str,
    fields: Map<String, Value>,
) -> Result<D, StoreError> {
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let is_new = existing.is_none();
    let (oid, mut doc, created_at) = match existing {
        Some(row) => (row.oid, serde_json::from_str::<Map<String, Value>>(&row.doc)?, row.created_at),
        None => (Uuid::new_v4().to_string(), Map::new(), now.clone()),
    };

    for (name, value) in fields {
        if name == D::KEY_FIELD || MANAGED_FIELDS.contains(&name.as_str()) {
            continue;
        }
        doc.insert(name, value);
    }
    doc.insert(D::KEY_FIELD.to_string(), Value::String(key.to_string()));

    let document: D = serde_json::from_value(with_managed_fields(doc, &oid, &created_at, &now))
        .map_err(|e| StoreError::Invalid(e.to_string()))?;

    // Store the model's own rendering so defaults are fixed at write time.
    let Value::Object(mut canonical) = serde_json::to_value(&document)? else {
        return Err(StoreError::Invalid(format!(
            "{} documents must be JSON objects",
            D::TABLE
        )));
    };
    for field in MANAGED_FIELDS {
        canonical.remove(field);
    }
    let body = serde_json::to_string(&canonical)?;

    if is_new {
        conn.execute(
            &format!(
                "INSERT INTO {table} (oid, doc_key, doc, rev, created_at, updated_at)
                 VALUES (?1, ?2, ?3, (SELECT COALESCE(MAX(rev), 0) + 1 FROM {table}), ?4, ?5)",
                table = D::TABLE
            ),
            params![oid, key, body, created_at, now],
        )?;
    } else {
        conn.execute(
            &format!(
                "UPDATE {table} SET doc = ?1, rev = (SELECT COALESCE(MAX(rev), 0) + 1 FROM {table}),
                 updated_at = ?2 WHERE oid = ?3",
                table = D::TABLE
            ),
            params![body, now, oid],
        )?;
    }

    Ok(document)
}
