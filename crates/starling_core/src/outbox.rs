/*
 * SPDX-FileCopyrightText: 2026 Starling Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! The outbox pipeline: wrap → validate → per-verb side effects → persist →
//! expand audience → enqueue delivery → emit event.
//!
//! Side effects run before the activity row is written, so a store failure
//! never leaves a visible activity whose side effects are missing; observers
//! of the outbox event see a fully settled store.

use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use tracing::warn;

use starling_protocol::normalize::{externalize, first_str, id_of, normalize, type_of};
use starling_protocol::vocab::{is_activity_media_type, is_activity_type};

use crate::audience::AudienceResolver;
use crate::collections::Collections;
use crate::delivery_queue::DeliveryQueue;
use crate::error::OutboxError;
use crate::events::{EventBus, OutboxEvent};
use crate::handlers::{self, HandlerCtx};
use crate::iri::IriScheme;
use crate::resolver::ActorResolver;
use crate::store::Store;

#[derive(Clone)]
pub struct Outbox {
    store: Store,
    resolver: ActorResolver,
    audience: AudienceResolver,
    collections: Collections,
    queue: DeliveryQueue,
    events: EventBus,
    iri: IriScheme,
}

impl Outbox {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        resolver: ActorResolver,
        audience: AudienceResolver,
        collections: Collections,
        queue: DeliveryQueue,
        events: EventBus,
        iri: IriScheme,
    ) -> Self {
        Self {
            store,
            resolver,
            audience,
            collections,
            queue,
            events,
            iri,
        }
    }

    /// Handle a `POST /outbox/:username` body. Returns the stored activity in
    /// its internal shape.
    pub async fn submit(
        &self,
        username: &str,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<Value, OutboxError> {
        let ct = content_type.ok_or(OutboxError::UnsupportedMediaType)?;
        if !is_activity_media_type(ct) {
            return Err(OutboxError::UnsupportedMediaType);
        }
        if self.resolver.local_actor(username).await?.is_none() {
            return Err(OutboxError::UnknownActor(username.to_string()));
        }
        let doc: Value =
            serde_json::from_slice(body).map_err(|_| OutboxError::InvalidActivity)?;
        self.submit_document(username, doc).await
    }

    /// Pipeline entry shared by HTTP posts and server-synthesized activities
    /// (collection updates re-enter here, so they are signed and expanded
    /// like anything else).
    pub async fn submit_document(
        &self,
        username: &str,
        mut doc: Value,
    ) -> Result<Value, OutboxError> {
        let actor_iri = self.iri.actor(username);

        if !doc.is_object() {
            return Err(OutboxError::InvalidActivity);
        }
        let ty = type_of(&doc).ok_or(OutboxError::InvalidActivity)?;

        // A bare object posts as a Create with the same addressing.
        if !is_activity_type(ty) {
            doc = wrap_in_create(&actor_iri, doc);
        }

        match first_str(&doc, "actor") {
            Some(a) if a != actor_iri => return Err(OutboxError::ActorMismatch),
            Some(_) => {}
            None => {
                if let Some(map) = doc.as_object_mut() {
                    map.insert("actor".to_string(), Value::String(actor_iri.clone()));
                }
            }
        }

        let mut activity =
            normalize(&doc, true).map_err(|_| OutboxError::InvalidActivity)?;

        if let Some(map) = activity.as_object_mut() {
            if !map.contains_key("id") {
                map.insert("id".to_string(), Value::String(self.iri.new_activity_id()));
            }
            if !map.contains_key("published") {
                map.insert("published".to_string(), json!([now_rfc3339()]));
            }
        }

        let ctx = HandlerCtx {
            store: &self.store,
            resolver: &self.resolver,
            iri: &self.iri,
            actor_iri: &actor_iri,
            username,
        };
        let outcome = handlers::dispatch(&ctx, &mut activity).await?;

        let tags = match outcome.collections_override {
            Some(tags) => tags,
            None => {
                let mut tags = vec![self.iri.outbox(username)];
                tags.extend(outcome.extra_collections);
                tags
            }
        };
        if let Some(map) = activity.as_object_mut() {
            map.insert("_meta".to_string(), json!({ "collection": tags }));
        }
        self.store.save_activity(&activity, &tags).await?;

        let recipients = self.audience.expand(&activity, &actor_iri, username).await?;
        if !recipients.is_empty() {
            let body = serde_json::to_vec(&externalize(&activity))
                .map_err(|e| OutboxError::Internal(e.into()))?;
            let activity_id = id_of(&activity).unwrap_or_default().to_string();
            self.queue
                .enqueue(&actor_iri, &activity_id, body, recipients)
                .await?;
        }

        self.events.emit(OutboxEvent {
            actor: actor_iri.clone(),
            activity: activity.clone(),
            object: outcome.object,
        });

        // Membership changes re-broadcast the fresh summary within the same
        // request. A failure here is logged, not surfaced: the activity is
        // already durable.
        for collection in &outcome.updated_collections {
            if let Err(e) = self
                .publish_collection_update(username, &actor_iri, collection)
                .await
            {
                warn!("collection update broadcast failed for {collection}: {e:#}");
            }
        }

        Ok(activity)
    }

    fn publish_collection_update<'a>(
        &'a self,
        username: &'a str,
        actor_iri: &'a str,
        collection_iri: &'a str,
    ) -> BoxFuture<'a, Result<(), anyhow::Error>> {
        Box::pin(async move {
            let update = self
                .collections
                .collection_update_activity(actor_iri, username, collection_iri)
                .await?;
            self.submit_document(username, update)
                .await
                .map_err(|e| anyhow::anyhow!("{e}"))?;
            Ok(())
        })
    }
}

fn wrap_in_create(actor_iri: &str, object: Value) -> Value {
    let mut create = serde_json::Map::new();
    create.insert("type".to_string(), Value::String("Create".to_string()));
    create.insert("actor".to_string(), Value::String(actor_iri.to_string()));
    for field in ["to", "cc", "audience"] {
        if let Some(v) = object.get(field) {
            create.insert(field.to_string(), v.clone());
        }
    }
    create.insert("object".to_string(), object);
    Value::Object(create)
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
