/*
 * SPDX-FileCopyrightText: 2026 Starling Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Document normalization.
//!
//! Internally every property except `id` and `type` is an ordered list, so the
//! store can index documents uniformly. `normalize` coerces an incoming
//! document into that shape and strips `@context`; `externalize` reverses it
//! for federated egress, collapsing single-element lists back to scalars and
//! dropping everything that must never leave the server.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::vocab::{self, AS_CONTEXT};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("document is not a JSON object")]
    NotAnObject,
    #[error("document has no type")]
    MissingType,
    #[error("activity has no actor")]
    MissingActor,
}

/// Fields that never get list-coerced. `_meta` is internal bookkeeping and is
/// carried through untouched.
fn keeps_scalar(key: &str) -> bool {
    key == "id" || key == "type" || key == "_meta"
}

/// Fields stripped from every externalized document.
fn is_local_only(key: &str) -> bool {
    key.starts_with('_')
        || vocab::LOCAL_ONLY_AUDIENCE.contains(&key)
        || key == "privateKey"
        || key == "privateKeyPem"
}

/// Coerce a document into the internal all-lists shape. The top-level
/// document must carry a `type`; when `require_actor` is set (activities) an
/// `actor` property must be present as well.
pub fn normalize(doc: &Value, require_actor: bool) -> Result<Value, NormalizeError> {
    let map = doc.as_object().ok_or(NormalizeError::NotAnObject)?;
    if type_of(doc).is_none() {
        return Err(NormalizeError::MissingType);
    }
    let out = normalize_map(map);
    if require_actor && !out.contains_key("actor") {
        return Err(NormalizeError::MissingActor);
    }
    Ok(Value::Object(out))
}

fn normalize_map(map: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (k, v) in map {
        if k == "@context" {
            continue;
        }
        if keeps_scalar(k) {
            // A type given as a list keeps its first entry.
            if k == "type" {
                if let Some(ty) = scalar_or_first(v) {
                    out.insert(k.clone(), Value::String(ty.to_string()));
                }
            } else {
                out.insert(k.clone(), v.clone());
            }
            continue;
        }
        out.insert(k.clone(), to_list(v));
    }
    out
}

fn to_list(v: &Value) -> Value {
    match v {
        Value::Array(items) => Value::Array(items.iter().map(normalize_value).collect()),
        other => Value::Array(vec![normalize_value(other)]),
    }
}

/// Embedded node objects (anything carrying `id` or `type`) are normalized
/// recursively; language maps and typed values pass through unchanged.
fn normalize_value(v: &Value) -> Value {
    match v {
        Value::Object(map) if map.contains_key("id") || map.contains_key("type") => {
            Value::Object(normalize_map(map))
        }
        other => other.clone(),
    }
}

/// Produce the external (federation-facing) form: `@context` restored,
/// single-element lists collapsed, local-only fields stripped.
pub fn externalize(doc: &Value) -> Value {
    let mut v = collapse(doc);
    if let Some(map) = v.as_object_mut() {
        map.insert("@context".to_string(), Value::String(AS_CONTEXT.to_string()));
    }
    v
}

fn collapse(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, item) in map {
                if is_local_only(k) {
                    continue;
                }
                out.insert(k.clone(), collapse(item));
            }
            Value::Object(out)
        }
        Value::Array(items) if items.len() == 1 => collapse(&items[0]),
        Value::Array(items) => Value::Array(items.iter().map(collapse).collect()),
        other => other.clone(),
    }
}

// Accessors tolerant of both the scalar and list shapes. Used everywhere the
// pipeline reads documents, so external input works before normalization too.

pub fn type_of(doc: &Value) -> Option<&str> {
    scalar_or_first(doc.get("type")?)
}

pub fn id_of(doc: &Value) -> Option<&str> {
    doc.get("id").and_then(Value::as_str)
}

/// First string under `key`, looking through a wrapping list.
pub fn first_str<'a>(doc: &'a Value, key: &str) -> Option<&'a str> {
    scalar_or_first(doc.get(key)?)
}

/// First value under `key`, looking through a wrapping list.
pub fn first_value<'a>(doc: &'a Value, key: &str) -> Option<&'a Value> {
    match doc.get(key)? {
        Value::Array(items) => items.first(),
        other => Some(other),
    }
}

/// The id of the first value under `key`: either the string itself or the
/// embedded object's `id`.
pub fn first_id<'a>(doc: &'a Value, key: &str) -> Option<&'a str> {
    match first_value(doc, key)? {
        Value::String(s) => Some(s.as_str()),
        obj @ Value::Object(_) => id_of(obj),
        _ => None,
    }
}

/// Every string under `key`, flattening lists and taking ids of embedded
/// objects.
pub fn str_values<'a>(doc: &'a Value, key: &str) -> Vec<&'a str> {
    let mut out = Vec::new();
    let Some(v) = doc.get(key) else {
        return out;
    };
    collect_strs(v, &mut out);
    out
}

fn collect_strs<'a>(v: &'a Value, out: &mut Vec<&'a str>) {
    match v {
        Value::String(s) => out.push(s.as_str()),
        Value::Array(items) => {
            for item in items {
                collect_strs(item, out);
            }
        }
        Value::Object(map) => {
            if let Some(Value::String(id)) = map.get("id") {
                out.push(id.as_str());
            }
        }
        _ => {}
    }
}

fn scalar_or_first(v: &Value) -> Option<&str> {
    match v {
        Value::String(s) => Some(s.as_str()),
        Value::Array(items) => items.first().and_then(Value::as_str),
        _ => None,
    }
}
