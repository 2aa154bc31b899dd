/*
 * SPDX-FileCopyrightText: 2026 Starling Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! ActivityStreams vocabulary shared between the pipeline and the surface.

pub const AS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";
pub const PUBLIC_IRI: &str = "https://www.w3.org/ns/activitystreams#Public";

pub const MEDIA_TYPE_ACTIVITY: &str = "application/activity+json";
pub const MEDIA_TYPE_LD: &str = "application/ld+json";

/// Recipient fields, in expansion order.
pub const AUDIENCE_FIELDS: &[&str] = &["to", "cc", "bto", "bcc", "audience"];

/// Recipient fields that never leave the server.
pub const LOCAL_ONLY_AUDIENCE: &[&str] = &["bto", "bcc"];

/// The closed set of activity verbs. Anything else on a posted document is
/// treated as a plain object and wrapped in a Create.
pub const ACTIVITY_TYPES: &[&str] = &[
    "Accept",
    "Add",
    "Announce",
    "Arrive",
    "Block",
    "Create",
    "Delete",
    "Dislike",
    "Flag",
    "Follow",
    "Ignore",
    "Invite",
    "Join",
    "Leave",
    "Like",
    "Listen",
    "Move",
    "Offer",
    "Question",
    "Read",
    "Reject",
    "Remove",
    "TentativeAccept",
    "TentativeReject",
    "Travel",
    "Undo",
    "Update",
    "View",
];

pub const ACTOR_TYPES: &[&str] = &["Application", "Group", "Organization", "Person", "Service"];

pub fn is_activity_type(ty: &str) -> bool {
    ACTIVITY_TYPES.iter().any(|t| t.eq_ignore_ascii_case(ty))
}

pub fn is_actor_type(ty: &str) -> bool {
    ACTOR_TYPES.iter().any(|t| *t == ty)
}

/// Accepts `application/activity+json` and `application/ld+json` with or
/// without the activitystreams profile parameter.
pub fn is_activity_media_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    essence == MEDIA_TYPE_ACTIVITY || essence == MEDIA_TYPE_LD
}
