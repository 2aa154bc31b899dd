/*
 * SPDX-FileCopyrightText: 2026 Starling Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Activity/object store over SQLite.
//!
//! Documents are stored as JSON blobs in their internal (all-lists) shape.
//! `_meta.collection` inside the activity document is the authoritative
//! membership set; the `activity_collections` table mirrors it as a queryable
//! index and both are edited in the same transaction. Stream cursors are the
//! monotonically increasing `seq` insertion key.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

use starling_protocol::normalize::{first_id, first_str, id_of, type_of};

use crate::keys::ActorKeys;

#[derive(Clone)]
pub struct Store {
    path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct StreamPage {
    pub total: u64,
    pub items: Vec<Value>,
    /// Insertion key of the oldest returned item; embed in the page's `next`.
    pub next: Option<i64>,
}

impl Store {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        init_db(&path)?;
        Ok(Self { path })
    }

    pub fn db_path(&self) -> &Path {
        &self.path
    }

    /// Persist an activity, idempotent on `id`. `_meta.collection` must
    /// already be set on the document; the index rows are written alongside.
    pub async fn save_activity(&self, activity: &Value, collections: &[String]) -> Result<()> {
        let id = id_of(activity)
            .context("activity has no id")?
            .to_string();
        let actor = first_str(activity, "actor").map(str::to_string);
        let ty = type_of(activity).unwrap_or("").to_string();
        let object_id = first_id(activity, "object").map(str::to_string);
        let json = serde_json::to_vec(activity).context("encode activity")?;
        let collections = collections.to_vec();

        let db_path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = connect(&db_path)?;
            let tx = conn.transaction()?;
            let inserted = tx.execute(
                r#"
                INSERT OR IGNORE INTO activities (id, actor_id, type, object_id, created_at_ms, activity_json)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![id, actor, ty, object_id, now_ms(), json],
            )?;
            if inserted > 0 {
                for c in &collections {
                    tx.execute(
                        "INSERT OR IGNORE INTO activity_collections (activity_id, collection_iri) VALUES (?1, ?2)",
                        params![id, c],
                    )?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await?
    }

    pub async fn get_activity(&self, id: &str) -> Result<Option<Value>> {
        let db_path = self.path.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Value>> {
            let conn = connect(&db_path)?;
            fetch_json(&conn, "SELECT activity_json FROM activities WHERE id = ?1", &id)
        })
        .await?
    }

    pub async fn delete_activity(&self, id: &str) -> Result<()> {
        let db_path = self.path.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = connect(&db_path)?;
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM activity_collections WHERE activity_id = ?1", params![id])?;
            tx.execute("DELETE FROM activities WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(())
        })
        .await?
    }

    /// Persist an object, idempotent on `id`.
    pub async fn save_object(&self, object: &Value) -> Result<()> {
        let id = id_of(object).context("object has no id")?.to_string();
        let actor = first_str(object, "attributedTo").map(str::to_string);
        let json = serde_json::to_vec(object).context("encode object")?;
        let db_path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = connect(&db_path)?;
            conn.execute(
                r#"
                INSERT OR IGNORE INTO objects (id, actor_id, created_at_ms, updated_at_ms, object_json)
                VALUES (?1, ?2, ?3, ?3, ?4)
                "#,
                params![id, actor, now_ms(), json],
            )?;
            Ok(())
        })
        .await?
    }

    /// Replace a stored object wholesale (tombstones, post-merge writes).
    pub async fn upsert_object(&self, object: &Value) -> Result<()> {
        let id = id_of(object).context("object has no id")?.to_string();
        let actor = first_str(object, "attributedTo").map(str::to_string);
        let json = serde_json::to_vec(object).context("encode object")?;
        let db_path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = connect(&db_path)?;
            conn.execute(
                r#"
                INSERT INTO objects (id, actor_id, created_at_ms, updated_at_ms, object_json)
                VALUES (?1, ?2, ?3, ?3, ?4)
                ON CONFLICT(id) DO UPDATE SET actor_id = ?2, updated_at_ms = ?3, object_json = ?4
                "#,
                params![id, actor, now_ms(), json],
            )?;
            Ok(())
        })
        .await?
    }

    pub async fn get_object(&self, id: &str) -> Result<Option<Value>> {
        let db_path = self.path.clone();
        let id = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Value>> {
            let conn = connect(&db_path)?;
            fetch_json(&conn, "SELECT object_json FROM objects WHERE id = ?1", &id)
        })
        .await?
    }

    /// Merge a partial document into the stored object: properties present in
    /// the partial replace the stored ones, everything else is untouched.
    /// Returns the merged object, or None when nothing is stored under its id.
    pub async fn update_object(&self, partial: &Value) -> Result<Option<Value>> {
        let id = id_of(partial).context("partial object has no id")?.to_string();
        let partial = partial.clone();
        let db_path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<Option<Value>> {
            let mut conn = connect(&db_path)?;
            let tx = conn.transaction()?;
            let stored: Option<Vec<u8>> = tx
                .query_row("SELECT object_json FROM objects WHERE id = ?1", params![id], |r| {
                    r.get(0)
                })
                .optional()?;
            let Some(raw) = stored else {
                return Ok(None);
            };
            let mut merged: Value = serde_json::from_slice(&raw).context("decode stored object")?;
            if let (Some(target), Some(src)) = (merged.as_object_mut(), partial.as_object()) {
                for (k, v) in src {
                    if k == "id" || k == "_meta" {
                        continue;
                    }
                    target.insert(k.clone(), v.clone());
                }
            }
            let json = serde_json::to_vec(&merged).context("encode merged object")?;
            tx.execute(
                "UPDATE objects SET object_json = ?2, updated_at_ms = ?3 WHERE id = ?1",
                params![id, json, now_ms()],
            )?;
            tx.commit()?;
            Ok(Some(merged))
        })
        .await?
    }

    /// Replace every embedded copy of the object (matched by the activity's
    /// `object[0].id`) across all stored activities. Returns how many
    /// activities were patched.
    pub async fn update_object_in_activities(&self, object: &Value) -> Result<u64> {
        let id = id_of(object).context("object has no id")?.to_string();
        let object = object.clone();
        let db_path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<u64> {
            let mut conn = connect(&db_path)?;
            let tx = conn.transaction()?;
            let mut patched = 0u64;
            {
                let mut stmt =
                    tx.prepare("SELECT seq, activity_json FROM activities WHERE object_id = ?1")?;
                let rows: Vec<(i64, Vec<u8>)> = stmt
                    .query_map(params![id], |r| Ok((r.get(0)?, r.get(1)?)))?
                    .collect::<rusqlite::Result<_>>()?;
                drop(stmt);
                for (seq, raw) in rows {
                    let mut activity: Value =
                        serde_json::from_slice(&raw).context("decode stored activity")?;
                    let Some(slot) = activity.get_mut("object") else { continue };
                    // Only embedded copies are patched; bare IRI references
                    // keep their reference semantics.
                    let embedded = matches!(slot, Value::Array(items) if items.first().map(|v| v.is_object()).unwrap_or(false));
                    if !embedded {
                        continue;
                    }
                    *slot = Value::Array(vec![object.clone()]);
                    let json = serde_json::to_vec(&activity)?;
                    tx.execute(
                        "UPDATE activities SET activity_json = ?2 WHERE seq = ?1",
                        params![seq, json],
                    )?;
                    patched += 1;
                }
            }
            tx.commit()?;
            Ok(patched)
        })
        .await?
    }

    /// Tag an activity into a collection: index row plus `_meta.collection`
    /// inside the document, one transaction. Safe to call for ids that are
    /// not (yet) stored activities; the index row alone is written then.
    pub async fn insert_into_collection(&self, activity_id: &str, collection_iri: &str) -> Result<()> {
        self.edit_collection(activity_id, collection_iri, true).await
    }

    pub async fn remove_from_collection(&self, activity_id: &str, collection_iri: &str) -> Result<()> {
        self.edit_collection(activity_id, collection_iri, false).await
    }

    async fn edit_collection(&self, activity_id: &str, collection_iri: &str, add: bool) -> Result<()> {
        let db_path = self.path.clone();
        let activity_id = activity_id.to_string();
        let collection_iri = collection_iri.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = connect(&db_path)?;
            let tx = conn.transaction()?;
            if add {
                tx.execute(
                    "INSERT OR IGNORE INTO activity_collections (activity_id, collection_iri) VALUES (?1, ?2)",
                    params![activity_id, collection_iri],
                )?;
            } else {
                tx.execute(
                    "DELETE FROM activity_collections WHERE activity_id = ?1 AND collection_iri = ?2",
                    params![activity_id, collection_iri],
                )?;
            }
            let stored: Option<Vec<u8>> = tx
                .query_row(
                    "SELECT activity_json FROM activities WHERE id = ?1",
                    params![activity_id],
                    |r| r.get(0),
                )
                .optional()?;
            if let Some(raw) = stored {
                let mut activity: Value =
                    serde_json::from_slice(&raw).context("decode stored activity")?;
                edit_meta_collection(&mut activity, &collection_iri, add);
                let json = serde_json::to_vec(&activity)?;
                tx.execute(
                    "UPDATE activities SET activity_json = ?2 WHERE id = ?1",
                    params![activity_id, json],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await?
    }

    pub async fn collections_of(&self, activity_id: &str) -> Result<Vec<String>> {
        let db_path = self.path.clone();
        let activity_id = activity_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let conn = connect(&db_path)?;
            let mut stmt = conn
                .prepare("SELECT collection_iri FROM activity_collections WHERE activity_id = ?1")?;
            let out = stmt
                .query_map(params![activity_id], |r| r.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            Ok(out)
        })
        .await?
    }

    /// Newest-first page of a collection. A cursor restricts to items
    /// strictly older than it.
    pub async fn get_stream(
        &self,
        collection_iri: &str,
        cursor: Option<i64>,
        limit: u32,
    ) -> Result<StreamPage> {
        let db_path = self.path.clone();
        let collection_iri = collection_iri.to_string();
        tokio::task::spawn_blocking(move || -> Result<StreamPage> {
            let conn = connect(&db_path)?;
            let total: u64 = conn.query_row(
                r#"
                SELECT COUNT(*) FROM activity_collections c
                JOIN activities a ON a.id = c.activity_id
                WHERE c.collection_iri = ?1
                "#,
                params![collection_iri],
                |r| r.get(0),
            )?;
            let mut stmt = conn.prepare(
                r#"
                SELECT a.seq, a.activity_json FROM activity_collections c
                JOIN activities a ON a.id = c.activity_id
                WHERE c.collection_iri = ?1 AND a.seq < ?2
                ORDER BY a.seq DESC
                LIMIT ?3
                "#,
            )?;
            let rows: Vec<(i64, Vec<u8>)> = stmt
                .query_map(params![collection_iri, cursor.unwrap_or(i64::MAX), limit], |r| {
                    Ok((r.get(0)?, r.get(1)?))
                })?
                .collect::<rusqlite::Result<_>>()?;
            let mut items = Vec::with_capacity(rows.len());
            let mut last_seq = None;
            for (seq, raw) in rows {
                let v: Value = serde_json::from_slice(&raw).context("decode stored activity")?;
                items.push(v);
                last_seq = Some(seq);
            }
            Ok(StreamPage {
                total,
                items,
                next: last_seq,
            })
        })
        .await?
    }

    /// Every member activity of a collection, newest first. Collection
    /// membership stays small relative to streams (follower/block lists), so
    /// an unpaged read is fine here.
    pub async fn collection_items(&self, collection_iri: &str) -> Result<Vec<Value>> {
        let page = self.get_stream(collection_iri, None, u32::MAX).await?;
        Ok(page.items)
    }

    pub async fn save_actor_keys(&self, actor_id: &str, keys: &ActorKeys) -> Result<()> {
        let db_path = self.path.clone();
        let actor_id = actor_id.to_string();
        let public_pem = keys.public_key_pem.clone();
        let private_pem = keys.private_key_pem.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = connect(&db_path)?;
            conn.execute(
                "INSERT OR IGNORE INTO actor_keys (actor_id, public_key_pem, private_key_pem) VALUES (?1, ?2, ?3)",
                params![actor_id, public_pem, private_pem],
            )?;
            Ok(())
        })
        .await?
    }

    /// Signing material for a local actor. Present iff the actor is local.
    pub async fn actor_keys(&self, actor_id: &str) -> Result<Option<ActorKeys>> {
        let db_path = self.path.clone();
        let actor_id = actor_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<ActorKeys>> {
            let conn = connect(&db_path)?;
            let row = conn
                .query_row(
                    "SELECT public_key_pem, private_key_pem FROM actor_keys WHERE actor_id = ?1",
                    params![actor_id],
                    |r| {
                        Ok(ActorKeys {
                            public_key_pem: r.get(0)?,
                            private_key_pem: r.get(1)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
        .await?
    }
}

fn edit_meta_collection(activity: &mut Value, collection_iri: &str, add: bool) {
    let Some(map) = activity.as_object_mut() else { return };
    let meta = map
        .entry("_meta".to_string())
        .or_insert_with(|| Value::Object(Default::default()));
    let Some(meta_map) = meta.as_object_mut() else { return };
    let list = meta_map
        .entry("collection".to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    let Some(items) = list.as_array_mut() else { return };
    let present = items.iter().any(|v| v.as_str() == Some(collection_iri));
    if add && !present {
        items.push(Value::String(collection_iri.to_string()));
    } else if !add && present {
        items.retain(|v| v.as_str() != Some(collection_iri));
    }
}

fn fetch_json(conn: &Connection, sql: &str, id: &str) -> Result<Option<Value>> {
    let raw: Option<Vec<u8>> = conn
        .query_row(sql, params![id], |r| r.get(0))
        .optional()?;
    match raw {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes).context("decode stored json")?)),
        None => Ok(None),
    }
}

fn connect(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path).with_context(|| format!("open db: {}", path.display()))?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

fn init_db(path: &Path) -> Result<()> {
    let conn = Connection::open(path).with_context(|| format!("open db: {}", path.display()))?;
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS activities (
          seq INTEGER PRIMARY KEY AUTOINCREMENT,
          id TEXT NOT NULL UNIQUE,
          actor_id TEXT NULL,
          type TEXT NOT NULL,
          object_id TEXT NULL,
          created_at_ms INTEGER NOT NULL,
          activity_json BLOB NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_activities_object ON activities(object_id);
        CREATE TABLE IF NOT EXISTS activity_collections (
          activity_id TEXT NOT NULL,
          collection_iri TEXT NOT NULL,
          PRIMARY KEY (activity_id, collection_iri)
        );
        CREATE INDEX IF NOT EXISTS idx_activity_collections_iri ON activity_collections(collection_iri);
        CREATE TABLE IF NOT EXISTS objects (
          id TEXT PRIMARY KEY,
          actor_id TEXT NULL,
          created_at_ms INTEGER NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          object_json BLOB NOT NULL
        );
        CREATE TABLE IF NOT EXISTS actor_keys (
          actor_id TEXT PRIMARY KEY,
          public_key_pem TEXT NOT NULL,
          private_key_pem TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
