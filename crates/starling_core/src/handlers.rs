/*
 * SPDX-FileCopyrightText: 2026 Starling Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Per-verb side effects. Each handler validates, mutates the shared object
//! graph through the store, and reports which collections the activity should
//! be tagged into and which collection summaries must be re-broadcast.

use serde_json::{json, Value};
use tracing::warn;

use starling_protocol::normalize::{first_id, first_str, first_value, id_of, str_values, type_of};
use starling_protocol::vocab::AUDIENCE_FIELDS;

use crate::error::OutboxError;
use crate::iri::IriScheme;
use crate::resolver::ActorResolver;
use crate::store::Store;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Create,
    Update,
    Delete,
    Undo,
    Accept,
    Reject,
    Like,
    Announce,
    Add,
    Remove,
    Block,
    Other,
}

impl Verb {
    pub fn from_type(ty: &str) -> Self {
        match ty.to_ascii_lowercase().as_str() {
            "create" => Verb::Create,
            "update" => Verb::Update,
            "delete" => Verb::Delete,
            "undo" => Verb::Undo,
            "accept" => Verb::Accept,
            "reject" => Verb::Reject,
            "like" => Verb::Like,
            "announce" => Verb::Announce,
            "add" => Verb::Add,
            "remove" => Verb::Remove,
            "block" => Verb::Block,
            _ => Verb::Other,
        }
    }
}

pub struct HandlerCtx<'a> {
    pub store: &'a Store,
    pub resolver: &'a ActorResolver,
    pub iri: &'a IriScheme,
    pub actor_iri: &'a str,
    pub username: &'a str,
}

#[derive(Default)]
pub struct Outcome {
    /// Collections to tag alongside the actor's outbox.
    pub extra_collections: Vec<String>,
    /// Replaces the default tag set entirely (Block never enters the outbox).
    pub collections_override: Option<Vec<String>>,
    /// The embedded or mutated object, carried on the outbox event.
    pub object: Option<Value>,
    /// Collections whose summaries changed and must be re-broadcast.
    pub updated_collections: Vec<String>,
}

pub async fn dispatch(ctx: &HandlerCtx<'_>, activity: &mut Value) -> Result<Outcome, OutboxError> {
    let verb = Verb::from_type(type_of(activity).unwrap_or(""));
    match verb {
        Verb::Create => create(ctx, activity).await,
        Verb::Update => update(ctx, activity).await,
        Verb::Delete => delete(ctx, activity).await,
        Verb::Undo => undo(ctx, activity).await,
        Verb::Accept => accept(ctx, activity).await,
        Verb::Reject => reject(ctx, activity).await,
        Verb::Like => like(ctx, activity).await,
        Verb::Announce => announce(ctx, activity),
        Verb::Add => add(ctx, activity, true).await,
        Verb::Remove => add(ctx, activity, false).await,
        Verb::Block => block(ctx, activity),
        Verb::Other => Ok(Outcome::default()),
    }
}

async fn create(ctx: &HandlerCtx<'_>, activity: &mut Value) -> Result<Outcome, OutboxError> {
    let object = first_value(activity, "object")
        .cloned()
        .ok_or(OutboxError::MissingObject)?;
    match object {
        Value::Object(mut map) => {
            if !map.contains_key("id") {
                map.insert("id".to_string(), Value::String(ctx.iri.new_object_id()));
            }
            map.entry("attributedTo".to_string())
                .or_insert_with(|| json!([ctx.actor_iri]));
            // Audience propagates onto the object so visibility holds when it
            // is dereferenced outside the Create.
            for field in ["to", "cc", "audience"] {
                if !map.contains_key(field) {
                    if let Some(v) = activity.get(field) {
                        map.insert(field.to_string(), v.clone());
                    }
                }
            }
            if !map.contains_key("published") {
                if let Some(p) = activity.get("published") {
                    map.insert("published".to_string(), p.clone());
                }
            }
            let object = Value::Object(map);
            ctx.store.save_object(&object).await?;
            set_object(activity, object.clone());
            Ok(Outcome {
                object: Some(object),
                ..Outcome::default()
            })
        }
        Value::String(oid) => {
            // A Create of a bare IRI embeds the stored record when we have it.
            match ctx.store.get_object(&oid).await? {
                Some(stored) => {
                    set_object(activity, stored.clone());
                    Ok(Outcome {
                        object: Some(stored),
                        ..Outcome::default()
                    })
                }
                None => Ok(Outcome::default()),
            }
        }
        _ => Err(OutboxError::InvalidActivity),
    }
}

async fn update(ctx: &HandlerCtx<'_>, activity: &mut Value) -> Result<Outcome, OutboxError> {
    let partial = first_value(activity, "object")
        .cloned()
        .ok_or(OutboxError::MissingObject)?;
    if !partial.is_object() {
        return Err(OutboxError::InvalidActivity);
    }
    let oid = id_of(&partial)
        .ok_or(OutboxError::InvalidActivity)?
        .to_string();

    let Some(stored) = ctx.store.get_object(&oid).await? else {
        // Nothing stored under this id (server-synthesized collection
        // summaries land here): embed-only, no merge.
        return Ok(Outcome {
            object: Some(partial),
            ..Outcome::default()
        });
    };

    if first_str(&stored, "attributedTo") != Some(ctx.actor_iri) {
        return Err(OutboxError::OwnershipViolation);
    }

    let mut partial = partial;
    if let Some(map) = partial.as_object_mut() {
        map.insert("updated".to_string(), json!([now_rfc3339()]));
    }
    let merged = ctx
        .store
        .update_object(&partial)
        .await?
        .unwrap_or(stored);
    ctx.store.update_object_in_activities(&merged).await?;
    set_object(activity, merged.clone());
    Ok(Outcome {
        object: Some(merged),
        ..Outcome::default()
    })
}

async fn delete(ctx: &HandlerCtx<'_>, activity: &mut Value) -> Result<Outcome, OutboxError> {
    let oid = first_id(activity, "object")
        .ok_or(OutboxError::MissingObject)?
        .to_string();
    let Some(stored) = ctx.store.get_object(&oid).await? else {
        return Ok(Outcome::default());
    };

    // Deleting an already-tombstoned object is a no-op.
    if type_of(&stored) == Some("Tombstone") {
        set_object(activity, stored.clone());
        return Ok(Outcome {
            object: Some(stored),
            ..Outcome::default()
        });
    }

    if first_str(&stored, "attributedTo") != Some(ctx.actor_iri) {
        return Err(OutboxError::OwnershipViolation);
    }

    let now = json!([now_rfc3339()]);
    let mut tombstone = json!({
        "id": oid,
        "type": "Tombstone",
        "deleted": now.clone(),
        "updated": now,
    });
    if let Some(published) = stored.get("published") {
        tombstone["published"] = published.clone();
    }
    ctx.store.upsert_object(&tombstone).await?;
    ctx.store.update_object_in_activities(&tombstone).await?;
    set_object(activity, tombstone.clone());
    Ok(Outcome {
        object: Some(tombstone),
        ..Outcome::default()
    })
}

async fn undo(ctx: &HandlerCtx<'_>, activity: &mut Value) -> Result<Outcome, OutboxError> {
    let target_id = first_id(activity, "object")
        .ok_or(OutboxError::MissingObject)?
        .to_string();
    let Some(original) = ctx.store.get_activity(&target_id).await? else {
        return Ok(Outcome::default());
    };

    let mut original_actors: Vec<&str> = str_values(&original, "actor");
    original_actors.sort();
    original_actors.dedup();
    if original_actors != [ctx.actor_iri] {
        return Err(OutboxError::OwnershipViolation);
    }

    // Reversing the side effect means vacating every collection the activity
    // was tagged into, then dropping the activity itself.
    let tags = ctx.store.collections_of(&target_id).await?;
    let mut updated_collections = Vec::new();
    for tag in &tags {
        ctx.store.remove_from_collection(&target_id, tag).await?;
        if broadcasts_membership(ctx, tag) {
            updated_collections.push(tag.clone());
        }
    }
    ctx.store.delete_activity(&target_id).await?;
    Ok(Outcome {
        object: Some(original),
        updated_collections,
        ..Outcome::default()
    })
}

async fn accept(ctx: &HandlerCtx<'_>, activity: &mut Value) -> Result<Outcome, OutboxError> {
    let Some((follow_id, follow)) = resolve_follow(ctx, activity).await? else {
        return Ok(Outcome::default());
    };
    let followers = ctx.iri.followers(ctx.username);
    ctx.store.insert_into_collection(&follow_id, &followers).await?;
    Ok(Outcome {
        object: Some(follow),
        updated_collections: vec![followers],
        ..Outcome::default()
    })
}

async fn reject(ctx: &HandlerCtx<'_>, activity: &mut Value) -> Result<Outcome, OutboxError> {
    let Some((follow_id, follow)) = resolve_follow(ctx, activity).await? else {
        return Ok(Outcome::default());
    };
    let followers = ctx.iri.followers(ctx.username);
    let rejected = ctx.iri.rejected(ctx.username);
    ctx.store.remove_from_collection(&follow_id, &followers).await?;
    ctx.store.insert_into_collection(&follow_id, &rejected).await?;
    Ok(Outcome {
        object: Some(follow),
        updated_collections: vec![followers],
        ..Outcome::default()
    })
}

/// The Follow being accepted or rejected: the stored activity when we have
/// it, otherwise a client-embedded copy (which gets persisted so the
/// membership tag has a row to land on). Must be a Follow of the sender.
async fn resolve_follow(
    ctx: &HandlerCtx<'_>,
    activity: &Value,
) -> Result<Option<(String, Value)>, OutboxError> {
    let follow_id = first_id(activity, "object")
        .ok_or(OutboxError::MissingObject)?
        .to_string();
    let follow = match ctx.store.get_activity(&follow_id).await? {
        Some(stored) => stored,
        None => {
            let Some(embedded) = first_value(activity, "object").filter(|v| v.is_object()) else {
                return Ok(None);
            };
            if type_of(embedded) != Some("Follow") {
                return Ok(None);
            }
            ctx.store.save_activity(embedded, &[]).await?;
            embedded.clone()
        }
    };
    if type_of(&follow) != Some("Follow") {
        return Ok(None);
    }
    if !str_values(&follow, "object").contains(&ctx.actor_iri) {
        return Ok(None);
    }
    Ok(Some((follow_id, follow)))
}

async fn like(ctx: &HandlerCtx<'_>, activity: &mut Value) -> Result<Outcome, OutboxError> {
    let oid = first_id(activity, "object")
        .ok_or(OutboxError::MissingObject)?
        .to_string();
    // The stored and delivered Like embeds the liked object, dereferencing
    // remote posts we have not seen yet. A transient fetch failure leaves
    // the IRI reference rather than failing the post.
    let object = match ctx.resolver.resolve_object(&oid).await {
        Ok(Some(resolved)) => {
            set_object(activity, resolved.clone());
            Some(resolved)
        }
        Ok(None) => None,
        Err(e) => {
            warn!("liked object fetch failed for {oid}: {e:#}");
            None
        }
    };
    let liked = ctx.iri.liked(ctx.username);
    Ok(Outcome {
        extra_collections: vec![liked.clone()],
        object,
        updated_collections: vec![liked],
        ..Outcome::default()
    })
}

/// Announce keeps reference semantics: the delivered activity must carry the
/// object as IRIs, never denormalized.
fn announce(_ctx: &HandlerCtx<'_>, activity: &mut Value) -> Result<Outcome, OutboxError> {
    let ids: Vec<Value> = str_values(activity, "object")
        .into_iter()
        .map(|s| Value::String(s.to_string()))
        .collect();
    if ids.is_empty() {
        return Err(OutboxError::MissingObject);
    }
    if let Some(map) = activity.as_object_mut() {
        map.insert("object".to_string(), Value::Array(ids));
    }
    Ok(Outcome::default())
}

async fn add(ctx: &HandlerCtx<'_>, activity: &mut Value, insert: bool) -> Result<Outcome, OutboxError> {
    let target = first_id(activity, "target")
        .ok_or(OutboxError::MissingTarget)?
        .to_string();
    if !ctx.iri.owns_collection(ctx.username, &target) {
        return Err(OutboxError::OwnershipViolation);
    }
    let oid = first_id(activity, "object")
        .ok_or(OutboxError::MissingObject)?
        .to_string();
    if insert {
        ctx.store.insert_into_collection(&oid, &target).await?;
    } else {
        ctx.store.remove_from_collection(&oid, &target).await?;
    }
    let updated_collections = if broadcasts_membership(ctx, &target) {
        vec![target]
    } else {
        Vec::new()
    };
    Ok(Outcome {
        updated_collections,
        ..Outcome::default()
    })
}

/// A Block is tagged only into the blocked collection and is stripped of all
/// addressing, so it is never federated anywhere, least of all to its target.
fn block(ctx: &HandlerCtx<'_>, activity: &mut Value) -> Result<Outcome, OutboxError> {
    first_id(activity, "object").ok_or(OutboxError::MissingObject)?;
    if let Some(map) = activity.as_object_mut() {
        for field in AUDIENCE_FIELDS {
            map.remove(*field);
        }
    }
    Ok(Outcome {
        collections_override: Some(vec![ctx.iri.blocked(ctx.username)]),
        ..Outcome::default()
    })
}

/// Membership changes broadcast a summary update, except for the blocked
/// collection (broadcasting it would leak the block) and the outbox itself.
fn broadcasts_membership(ctx: &HandlerCtx<'_>, collection: &str) -> bool {
    collection == ctx.iri.followers(ctx.username)
        || collection == ctx.iri.liked(ctx.username)
        || collection.starts_with(&ctx.iri.named_collection_prefix(ctx.username))
}

fn set_object(activity: &mut Value, object: Value) {
    if let Some(map) = activity.as_object_mut() {
        map.insert("object".to_string(), Value::Array(vec![object]));
    }
}

fn now_rfc3339() -> String {
    time::OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_default()
}
