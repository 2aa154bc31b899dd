/*
 * SPDX-FileCopyrightText: 2026 Starling Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Actor resolution: local actors come from the store, remote actors are
//! fetched as activity+json and cached. A 404/410/Tombstone answer resolves
//! to a sentinel so delivery drops the recipient instead of erroring.

use anyhow::{Context, Result};
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{Mutex, RwLock};

use starling_protocol::normalize::{first_str, first_value, id_of, normalize, type_of};

use crate::iri::IriScheme;
use crate::store::Store;

const ACCEPT_ACTIVITY: &str =
    "application/activity+json, application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"";
const CACHE_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub enum ResolvedActor {
    Local(Value),
    Remote(Value),
    /// The actor existed and is gone (410 or Tombstone); drop as recipient.
    Gone,
    NotFound,
}

impl ResolvedActor {
    pub fn document(&self) -> Option<&Value> {
        match self {
            ResolvedActor::Local(doc) | ResolvedActor::Remote(doc) => Some(doc),
            _ => None,
        }
    }
}

#[derive(Clone)]
enum CachedResolution {
    Remote(Value),
    Gone,
    NotFound,
}

struct CacheEntry {
    resolution: CachedResolution,
    expires_at: Instant,
}

#[derive(Clone)]
pub struct ActorResolver {
    http: reqwest::Client,
    store: Store,
    iri: IriScheme,
    cache: Arc<RwLock<HashMap<String, CacheEntry>>>,
    inflight: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ActorResolver {
    pub fn new(http: reqwest::Client, store: Store, iri: IriScheme) -> Self {
        Self {
            http,
            store,
            iri,
            cache: Arc::new(RwLock::new(HashMap::new())),
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn local_actor(&self, username: &str) -> Result<Option<Value>> {
        self.store.get_object(&self.iri.actor(username)).await
    }

    pub async fn resolve(&self, actor_iri: &str) -> Result<ResolvedActor> {
        if let Some(name) = self.iri.local_username(actor_iri) {
            return Ok(match self.local_actor(name).await? {
                Some(doc) => ResolvedActor::Local(doc),
                None => ResolvedActor::NotFound,
            });
        }

        if let Some(hit) = self.get_cached(actor_iri).await {
            return Ok(hit.into());
        }

        // Single-flight per key: concurrent misses for the same actor share
        // one fetch.
        let gate = {
            let mut inflight = self.inflight.lock().await;
            inflight
                .entry(actor_iri.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = gate.lock().await;
        if let Some(hit) = self.get_cached(actor_iri).await {
            return Ok(hit.into());
        }

        let resolution = self.fetch_remote(actor_iri).await;
        if let Ok(resolution) = &resolution {
            self.put_cached(actor_iri, resolution.clone()).await;
        }
        {
            let mut inflight = self.inflight.lock().await;
            inflight.remove(actor_iri);
        }
        Ok(resolution?.into())
    }

    /// Dereference an arbitrary object: store first, then a remote fetch for
    /// foreign IRIs. A fetched object is normalized and cached in the store,
    /// so later lookups are local. Used where an activity must embed its
    /// target (Like). Returns None when nothing dereferenceable exists.
    pub async fn resolve_object(&self, object_iri: &str) -> Result<Option<Value>> {
        if let Some(stored) = self.store.get_object(object_iri).await? {
            return Ok(Some(stored));
        }
        if self.iri.is_local(object_iri) {
            return Ok(None);
        }

        let resp = self
            .http
            .get(object_iri)
            .header("Accept", ACCEPT_ACTIVITY)
            .send()
            .await
            .with_context(|| format!("fetch object: {object_iri}"))?;
        if matches!(resp.status().as_u16(), 404 | 410) {
            return Ok(None);
        }
        let resp = resp
            .error_for_status()
            .with_context(|| format!("object not ok: {object_iri}"))?;
        let doc: Value = resp
            .json()
            .await
            .with_context(|| format!("parse object json from {object_iri}"))?;

        let Ok(object) = normalize(&doc, false) else {
            return Ok(None);
        };
        if id_of(&object).is_none() {
            return Ok(None);
        }
        self.store.save_object(&object).await?;
        Ok(Some(object))
    }

    async fn fetch_remote(&self, actor_iri: &str) -> Result<CachedResolution> {
        let resp = self
            .http
            .get(actor_iri)
            .header("Accept", ACCEPT_ACTIVITY)
            .send()
            .await
            .with_context(|| format!("fetch actor: {actor_iri}"))?;

        match resp.status().as_u16() {
            404 => return Ok(CachedResolution::NotFound),
            410 => return Ok(CachedResolution::Gone),
            _ => {}
        }
        let resp = resp
            .error_for_status()
            .with_context(|| format!("actor not ok: {actor_iri}"))?;

        let doc: Value = resp
            .json()
            .await
            .with_context(|| format!("parse actor json from {actor_iri}"))?;
        if type_of(&doc) == Some("Tombstone") {
            return Ok(CachedResolution::Gone);
        }
        Ok(CachedResolution::Remote(doc))
    }

    async fn get_cached(&self, actor_iri: &str) -> Option<CachedResolution> {
        let mut cache = self.cache.write().await;
        let now = Instant::now();
        if let Some(entry) = cache.get(actor_iri) {
            if entry.expires_at > now {
                return Some(entry.resolution.clone());
            }
        }
        cache.remove(actor_iri);
        None
    }

    async fn put_cached(&self, actor_iri: &str, resolution: CachedResolution) {
        let mut cache = self.cache.write().await;
        cache.insert(
            actor_iri.to_string(),
            CacheEntry {
                resolution,
                expires_at: Instant::now() + CACHE_TTL,
            },
        );
    }
}

impl From<CachedResolution> for ResolvedActor {
    fn from(c: CachedResolution) -> Self {
        match c {
            CachedResolution::Remote(doc) => ResolvedActor::Remote(doc),
            CachedResolution::Gone => ResolvedActor::Gone,
            CachedResolution::NotFound => ResolvedActor::NotFound,
        }
    }
}

/// Delivery endpoint of an actor document, in either the internal or the
/// external shape. `endpoints.sharedInbox` wins when present.
pub fn inbox_of(doc: &Value) -> Option<String> {
    if let Some(endpoints) = first_value(doc, "endpoints") {
        if let Some(shared) = first_str(endpoints, "sharedInbox") {
            return Some(shared.to_string());
        }
    }
    first_str(doc, "inbox").map(str::to_string)
}
