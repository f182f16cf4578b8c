/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::error::{ReaderError, Result};
use crate::fetcher::Fetcher;
use apreader_protocol::ObjectRef;
use futures_util::stream::{self, Stream};
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Oldest first: own items, then `first`, then `next` links.
    #[default]
    Forward,
    /// Newest first: own items reversed, then `last`, then `prev` links.
    Backward,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkOptions {
    pub skip: usize,
    /// `None` walks until the collection is exhausted.
    pub limit: Option<usize>,
    pub direction: Direction,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: Some(crate::config::DEFAULT_LIMIT),
            direction: Direction::Forward,
        }
    }
}

impl WalkOptions {
    pub fn unbounded(direction: Direction) -> Self {
        Self {
            skip: 0,
            limit: None,
            direction,
        }
    }
}

/// Lazy, pull-driven walk over an ActivityStreams collection.
///
/// Nothing is fetched until the first pull, and a page is only fetched once every item of the
/// previous one has been handed out. Once `limit` items were yielded the walker stops without
/// touching the network again. A walker is single use; build a new one to restart.
pub struct CollectionWalker {
    fetcher: Fetcher,
    start: Option<ObjectRef>,
    direction: Direction,
    buffer: VecDeque<Value>,
    next_page: Option<ObjectRef>,
    visited: HashSet<String>,
    to_skip: usize,
    remaining: Option<usize>,
    done: bool,
}

impl CollectionWalker {
    pub fn new(fetcher: Fetcher, collection: ObjectRef, opts: WalkOptions) -> Self {
        Self {
            fetcher,
            start: Some(collection),
            direction: opts.direction,
            buffer: VecDeque::new(),
            next_page: None,
            visited: HashSet::new(),
            to_skip: opts.skip,
            remaining: opts.limit,
            done: false,
        }
    }

    /// Next item as found in the collection, without resolving references.
    ///
    /// A failure to load the collection itself is returned as is; a failure to load a later page
    /// is returned as `PartialCollection`. Both end the walk.
    pub async fn next_ref(&mut self) -> Option<Result<ObjectRef>> {
        loop {
            if self.done {
                return None;
            }
            if self.remaining == Some(0) {
                self.done = true;
                return None;
            }

            if let Some(start) = self.start.take() {
                if let Some(id) = start.id() {
                    self.visited.insert(id.to_string());
                }
                match self.fetcher.resolve(&start).await {
                    Ok(doc) => self.load(doc, true),
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
                continue;
            }

            if let Some(raw) = self.buffer.pop_front() {
                let Some(item) = ObjectRef::from_value(&raw) else {
                    continue;
                };
                if self.to_skip > 0 {
                    self.to_skip -= 1;
                    continue;
                }
                if let Some(n) = self.remaining.as_mut() {
                    *n -= 1;
                }
                return Some(Ok(item));
            }

            let Some(page) = self.next_page.take() else {
                self.done = true;
                return None;
            };
            if let Some(id) = page.id() {
                if !self.visited.insert(id.to_string()) {
                    debug!("collection page {id} already visited, stopping");
                    self.done = true;
                    return None;
                }
            }
            match self.fetcher.resolve(&page).await {
                Ok(doc) => self.load(doc, false),
                Err(e) => {
                    self.done = true;
                    let url = page.id().unwrap_or("<inline page>").to_string();
                    return Some(Err(ReaderError::PartialCollection {
                        url,
                        source: Box::new(e),
                    }));
                }
            }
        }
    }

    /// Next item, resolved to a document. A failed item does not end the walk.
    pub async fn next(&mut self) -> Option<Result<Value>> {
        let item = match self.next_ref().await? {
            Ok(item) => item,
            Err(e) => return Some(Err(e)),
        };
        Some(self.fetcher.resolve(&item).await)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Value>> {
        stream::unfold(self, |mut walker| async move {
            let item = walker.next().await?;
            Some((item, walker))
        })
    }

    /// Queues the items of a collection or page and picks the link to follow next.
    fn load(&mut self, doc: Value, is_root: bool) {
        let items = doc
            .get("orderedItems")
            .or_else(|| doc.get("items"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        match self.direction {
            Direction::Forward => self.buffer.extend(items),
            Direction::Backward => self.buffer.extend(items.into_iter().rev()),
        }

        let keys: &[&str] = match (self.direction, is_root) {
            (Direction::Forward, true) => &["first", "next"],
            (Direction::Forward, false) => &["next"],
            (Direction::Backward, true) => &["last", "prev"],
            (Direction::Backward, false) => &["prev"],
        };
        self.next_page = keys
            .iter()
            .find_map(|k| doc.get(*k).and_then(ObjectRef::from_value));
    }
}
