/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::Serialize;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 512;

/// Follow-graph changes pushed to presentation collaborators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReaderEvent {
    ActorFollowed { url: String, followed_at_ms: i64 },
    ActorUnfollowed { url: String },
}

impl ReaderEvent {
    pub fn url(&self) -> &str {
        match self {
            Self::ActorFollowed { url, .. } | Self::ActorUnfollowed { url } => url,
        }
    }
}

/// Fan-out of [`ReaderEvent`]s. Sending with no subscriber is not an error.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ReaderEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }
}

impl EventBus {
    pub fn subscribe(&self) -> broadcast::Receiver<ReaderEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ReaderEvent) {
        let _ = self.tx.send(event);
    }
}
