/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReaderError>;

/// Errors surfaced by the reader core.
///
/// Item-scoped errors (`MalformedReference`, `AttributionMismatch`, `PartialCollection`) are
/// normally logged and swallowed by the ingestion engine; they are only returned from the
/// lower-level entry points that operate on that single item.
#[derive(Debug, Error)]
pub enum ReaderError {
    /// Remote answered with a non-success status after every fallback.
    #[error("HTTP error! Status: {status}. {url}: {body}")]
    Fetch {
        url: String,
        status: u16,
        body: String,
    },

    /// Network-level failure (DNS, connect, timeout) on the last strategy tried.
    #[error("fetch failed: {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// HTML response without a JSON-LD alternate link.
    #[error("no JSON-LD link found in the response: {url}")]
    NoDiscoveryLink { url: String },

    #[error("invalid document from {url}: {reason}")]
    InvalidDocument { url: String, reason: String },

    /// Activity without an id and without a string `object` to derive one from.
    #[error("activity has no id and cannot be processed: {0}")]
    MalformedReference(String),

    #[error("note {note} is attributed to {attributed_to}, but activity actor is {actor}")]
    AttributionMismatch {
        note: String,
        attributed_to: String,
        actor: String,
    },

    #[error("collection branch failed: {url}: {source}")]
    PartialCollection {
        url: String,
        #[source]
        source: Box<ReaderError>,
    },

    /// Fatal at open: the store is not used until every migration has applied.
    #[error("schema migration to version {version} failed: {reason}")]
    SchemaMigration { version: i64, reason: String },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),
}

impl ReaderError {
    pub(crate) fn invalid(url: &str, reason: impl Into<String>) -> Self {
        Self::InvalidDocument {
            url: url.to_string(),
            reason: reason.into(),
        }
    }
}
