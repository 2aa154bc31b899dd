/*
 * SPDX-FileCopyrightText: 2026 Starling Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Recipient expansion: audience fields to deduplicated inbox URLs.
//!
//! The block list is authoritative: a blocked actor is dropped even when the
//! expansion reached it through the follower collection rather than a direct
//! address. A recipient whose actor cannot be fetched is skipped; the POST
//! itself still succeeds.

use anyhow::Result;
use serde_json::Value;
use tracing::warn;

use starling_protocol::normalize::str_values;
use starling_protocol::vocab::{AUDIENCE_FIELDS, PUBLIC_IRI};

use crate::collections::Collections;
use crate::iri::IriScheme;
use crate::resolver::{inbox_of, ActorResolver, ResolvedActor};

#[derive(Clone)]
pub struct AudienceResolver {
    resolver: ActorResolver,
    collections: Collections,
    iri: IriScheme,
}

impl AudienceResolver {
    pub fn new(resolver: ActorResolver, collections: Collections, iri: IriScheme) -> Self {
        Self {
            resolver,
            collections,
            iri,
        }
    }

    pub async fn expand(
        &self,
        activity: &Value,
        sender_iri: &str,
        sender_name: &str,
    ) -> Result<Vec<String>> {
        let mut actors: Vec<String> = Vec::new();
        for field in AUDIENCE_FIELDS {
            for v in str_values(activity, field) {
                actors.push(v.to_string());
            }
        }
        actors.retain(|a| a != PUBLIC_IRI);

        // The sender's follower collection expands to its current members.
        let followers_iri = self.iri.followers(sender_name);
        if actors.iter().any(|a| *a == followers_iri) {
            actors.retain(|a| *a != followers_iri);
            actors.extend(self.collections.follower_actors(sender_name).await?);
        }

        actors.sort();
        actors.dedup();
        actors.retain(|a| a != sender_iri);

        let blocked = self.collections.blocked_actors(sender_name).await?;
        actors.retain(|a| !blocked.contains(a));

        let mut inboxes = Vec::new();
        for actor in actors {
            match self.resolver.resolve(&actor).await {
                Ok(ResolvedActor::Local(doc)) | Ok(ResolvedActor::Remote(doc)) => {
                    match inbox_of(&doc) {
                        Some(inbox) => {
                            if !inboxes.contains(&inbox) {
                                inboxes.push(inbox);
                            }
                        }
                        None => warn!("recipient has no inbox, skipping: {actor}"),
                    }
                }
                Ok(ResolvedActor::Gone) | Ok(ResolvedActor::NotFound) => {
                    warn!("recipient unavailable, skipping: {actor}");
                }
                Err(e) => {
                    warn!("recipient fetch failed, skipping {actor}: {e:#}");
                }
            }
        }
        Ok(inboxes)
    }
}
