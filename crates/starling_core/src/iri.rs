/*
 * SPDX-FileCopyrightText: 2026 Starling Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! IRI minting and recognition for the local instance.

use rand::{rngs::OsRng, RngCore};

#[derive(Clone, Debug)]
pub struct IriScheme {
    base: String,
}

impl IriScheme {
    pub fn new(public_base_url: &str) -> Self {
        Self {
            base: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn actor(&self, name: &str) -> String {
        format!("{}/u/{name}", self.base)
    }

    pub fn key_id(&self, name: &str) -> String {
        format!("{}#main-key", self.actor(name))
    }

    pub fn inbox(&self, name: &str) -> String {
        format!("{}/inbox/{name}", self.base)
    }

    pub fn shared_inbox(&self) -> String {
        format!("{}/inbox", self.base)
    }

    pub fn outbox(&self, name: &str) -> String {
        format!("{}/outbox/{name}", self.base)
    }

    pub fn followers(&self, name: &str) -> String {
        format!("{}/followers/{name}", self.base)
    }

    pub fn following(&self, name: &str) -> String {
        format!("{}/following/{name}", self.base)
    }

    pub fn liked(&self, name: &str) -> String {
        format!("{}/liked/{name}", self.base)
    }

    pub fn blocked(&self, name: &str) -> String {
        format!("{}/blocked/{name}", self.base)
    }

    pub fn rejected(&self, name: &str) -> String {
        format!("{}/rejected/{name}", self.base)
    }

    pub fn named_collection_prefix(&self, name: &str) -> String {
        format!("{}/c/{name}/", self.base)
    }

    pub fn new_activity_id(&self) -> String {
        format!("{}/s/{}", self.base, random_hex())
    }

    pub fn new_object_id(&self) -> String {
        format!("{}/o/{}", self.base, random_hex())
    }

    pub fn activity_iri(&self, id: &str) -> String {
        format!("{}/s/{id}", self.base)
    }

    pub fn object_iri(&self, id: &str) -> String {
        format!("{}/o/{id}", self.base)
    }

    pub fn is_local(&self, iri: &str) -> bool {
        iri.starts_with(&self.base)
    }

    /// The username when `iri` is a local actor IRI.
    pub fn local_username<'a>(&self, iri: &'a str) -> Option<&'a str> {
        let rest = iri.strip_prefix(&self.base)?.strip_prefix("/u/")?;
        if rest.is_empty() || rest.contains('/') {
            return None;
        }
        Some(rest)
    }

    /// Whether `collection` is one the named actor may Add to / Remove from.
    pub fn owns_collection(&self, name: &str, collection: &str) -> bool {
        collection == self.followers(name)
            || collection == self.following(name)
            || collection == self.liked(name)
            || collection == self.blocked(name)
            || collection == self.rejected(name)
            || collection.starts_with(&self.named_collection_prefix(name))
    }
}

// 16 random bytes -> 32 hex chars
fn random_hex() -> String {
    let mut b = [0u8; 16];
    OsRng.fill_bytes(&mut b);
    hex::encode(b)
}
