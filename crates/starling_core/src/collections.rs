/*
 * SPDX-FileCopyrightText: 2026 Starling Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Derived per-actor collections. Membership is the set of activities tagged
//! with the collection IRI (Follows for followers, Likes for liked, Blocks
//! for blocked); reads and member projections derive from that index.
//!
//! Every membership change is pushed back to the fediverse by synthesizing an
//! `Update` whose object is the fresh collection summary and re-submitting it
//! through the outbox pipeline, so signing and audience expansion are shared
//! with ordinary posts.

use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashSet;

use starling_protocol::normalize::{externalize, first_id, first_str};
use starling_protocol::vocab::AS_CONTEXT;

use crate::iri::IriScheme;
use crate::store::Store;

pub const PAGE_SIZE: u32 = 20;

#[derive(Serialize)]
#[allow(non_snake_case)]
pub struct OrderedCollection {
    #[serde(rename = "@context")]
    pub context: String,
    pub id: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub totalItems: u64,
    pub first: String,
}

#[derive(Serialize)]
#[allow(non_snake_case)]
pub struct OrderedCollectionPage {
    #[serde(rename = "@context")]
    pub context: String,
    pub id: String,
    #[serde(rename = "type")]
    pub ty: String,
    pub partOf: String,
    pub orderedItems: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

#[derive(Clone)]
pub struct Collections {
    store: Store,
    iri: IriScheme,
}

impl Collections {
    pub fn new(store: Store, iri: IriScheme) -> Self {
        Self { store, iri }
    }

    pub async fn total(&self, collection_iri: &str) -> Result<u64> {
        Ok(self.store.get_stream(collection_iri, None, 0).await?.total)
    }

    pub async fn summary(&self, collection_iri: &str) -> Result<OrderedCollection> {
        Ok(OrderedCollection {
            context: AS_CONTEXT.to_string(),
            id: collection_iri.to_string(),
            ty: "OrderedCollection".to_string(),
            totalItems: self.total(collection_iri).await?,
            first: format!("{collection_iri}?page=true"),
        })
    }

    /// Summary as a plain document, for embedding inside a synthetic Update.
    pub async fn summary_object(&self, collection_iri: &str) -> Result<Value> {
        Ok(json!({
            "id": collection_iri,
            "type": "OrderedCollection",
            "totalItems": self.total(collection_iri).await?,
            "first": format!("{collection_iri}?page=true"),
        }))
    }

    /// Newest-first page; items are served in external form. `cursor` is the
    /// insertion key out of a previous page's `next`.
    pub async fn page(
        &self,
        collection_iri: &str,
        cursor: Option<i64>,
    ) -> Result<OrderedCollectionPage> {
        let page = self.store.get_stream(collection_iri, cursor, PAGE_SIZE).await?;
        let id = match cursor {
            Some(c) => format!("{collection_iri}?page={c}"),
            None => format!("{collection_iri}?page=true"),
        };
        Ok(OrderedCollectionPage {
            context: AS_CONTEXT.to_string(),
            id,
            ty: "OrderedCollectionPage".to_string(),
            partOf: collection_iri.to_string(),
            orderedItems: page.items.iter().map(externalize).collect(),
            next: page.next.map(|c| format!("{collection_iri}?page={c}")),
        })
    }

    /// Actor IRIs behind the followers collection: the `actor` of every
    /// tagged Follow.
    pub async fn follower_actors(&self, username: &str) -> Result<Vec<String>> {
        let items = self.store.collection_items(&self.iri.followers(username)).await?;
        let mut out = Vec::new();
        for item in items {
            if let Some(actor) = first_str(&item, "actor") {
                out.push(actor.to_string());
            }
        }
        out.sort();
        out.dedup();
        Ok(out)
    }

    /// The actor's block list: the `object` of every tagged Block.
    pub async fn blocked_actors(&self, username: &str) -> Result<HashSet<String>> {
        let items = self.store.collection_items(&self.iri.blocked(username)).await?;
        let mut out = HashSet::new();
        for item in items {
            if let Some(target) = first_id(&item, "object") {
                out.insert(target.to_string());
            }
        }
        Ok(out)
    }

    /// The synthetic activity broadcasting a membership change: an `Update`
    /// carrying the fresh summary, addressed to the actor's followers. Fed
    /// back into the pipeline by the caller.
    pub async fn collection_update_activity(
        &self,
        actor_iri: &str,
        username: &str,
        collection_iri: &str,
    ) -> Result<Value> {
        Ok(json!({
            "type": "Update",
            "actor": actor_iri,
            "object": self.summary_object(collection_iri).await?,
            "to": self.iri.followers(username),
        }))
    }
}
