/*
 * SPDX-FileCopyrightText: 2026 Starling Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Emitted once per accepted outbox submission, after the activity and its
/// side effects are visible in the store.
#[derive(Clone, Debug, Serialize)]
pub struct OutboxEvent {
    pub actor: String,
    pub activity: Value,
    pub object: Option<Value>,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<OutboxEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OutboxEvent> {
        self.tx.subscribe()
    }

    /// Best-effort: an event with no subscribers is dropped.
    pub fn emit(&self, event: OutboxEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
