/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

pub mod collection;
pub mod config;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod http_retry;
pub mod ingest;
pub mod query;
pub mod reader;
pub mod social_db;

pub use config::ReaderConfig;
pub use error::{ReaderError, Result};
pub use events::ReaderEvent;
pub use ingest::IngestMode;
pub use query::{NoteFilter, SearchOptions, SortOrder};
pub use reader::{Reader, RefreshReport};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
