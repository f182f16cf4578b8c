/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::config::ReaderConfig;
use crate::error::Result;
use crate::events::{EventBus, ReaderEvent};
use crate::fetcher::Fetcher;
use crate::ingest::{IngestMode, Ingestor, OutboxSummary};
use crate::query::{NoteFilter, SearchOptions};
use crate::social_db::{
    now_ms, ActivityRecord, ActorRecord, FollowedActor, NoteRecord, SocialDb,
};
use apreader_protocol::{classify, DocumentKind, ObjectRef};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const BOOTSTRAP_KEY: &str = "bootstrap_complete";

/// Outcome of a bulk refresh: each actor is refreshed independently.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshReport {
    pub refreshed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Resolved {
    pub kind: DocumentKind,
    pub document: Value,
}

/// Engine facade consumed by presentation code.
#[derive(Clone)]
pub struct Reader {
    db: SocialDb,
    fetcher: Fetcher,
    ingestor: Ingestor,
    events: EventBus,
    initialized: Arc<AtomicBool>,
    cfg: Arc<ReaderConfig>,
}

impl Reader {
    /// Opens (and migrates) the store named by `cfg`.
    pub fn open(cfg: ReaderConfig) -> Result<Self> {
        let db = SocialDb::open(cfg.db_path()?)?;
        let fetcher = Fetcher::new(cfg.fetch.clone())?;
        Ok(Self::with_parts(cfg, db, fetcher))
    }

    pub fn with_parts(cfg: ReaderConfig, db: SocialDb, fetcher: Fetcher) -> Self {
        let ingestor = Ingestor::new(db.clone(), fetcher.clone());
        Self {
            db,
            fetcher,
            ingestor,
            events: EventBus::default(),
            initialized: Arc::new(AtomicBool::new(false)),
            cfg: Arc::new(cfg),
        }
    }

    pub fn db(&self) -> &SocialDb {
        &self.db
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReaderEvent> {
        self.events.subscribe()
    }

    pub fn default_search(&self) -> SearchOptions {
        SearchOptions {
            limit: Some(self.cfg.default_limit()),
            ..SearchOptions::default()
        }
    }

    // ----- lifecycle -----

    /// First call follows the default actors (once per store) and refreshes every followed actor.
    /// Later calls do nothing until [`Reader::reset`].
    pub async fn start(&self) -> Result<Option<RefreshReport>> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }
        let defaults = self.cfg.default_followed_actors.clone();
        if let Err(e) = self.bootstrap(&defaults).await {
            self.initialized.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(Some(self.ingest_all_followed_actors().await?))
    }

    pub fn reset(&self) {
        self.initialized.store(false, Ordering::SeqCst);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Follows `default_actors` when nothing is followed and the store was never bootstrapped.
    /// Returns whether it ran.
    pub async fn bootstrap(&self, default_actors: &[String]) -> Result<bool> {
        if self.db.get_setting(BOOTSTRAP_KEY)?.is_some() || self.has_followed_actors()? {
            return Ok(false);
        }
        info!("bootstrapping with {} default actors", default_actors.len());
        let follows = default_actors.iter().map(|url| async move {
            if let Err(e) = self.follow_actor(url).await {
                warn!("failed to follow default actor {url}: {e}");
            }
        });
        join_all(follows).await;
        self.db.set_setting(BOOTSTRAP_KEY, &now_ms().to_string())?;
        Ok(true)
    }

    // ----- actors -----

    /// Fetches the actor and stores it, returning the stored record.
    pub async fn get_actor(&self, url: &str) -> Result<ActorRecord> {
        self.ingestor.fetch_and_store_actor(&ObjectRef::from(url)).await
    }

    pub fn get_stored_actor(&self, id_or_url: &str) -> Result<Option<ActorRecord>> {
        self.db.get_actor(id_or_url)
    }

    pub fn get_all_actors(&self) -> Result<Vec<ActorRecord>> {
        self.db.list_actors()
    }

    pub async fn ingest_actor(&self, url: &str, mode: IngestMode) -> Result<OutboxSummary> {
        self.ingestor.ingest_actor(&ObjectRef::from(url), mode).await
    }

    // ----- follow graph -----

    pub async fn follow_actor(&self, url: &str) -> Result<OutboxSummary> {
        let followed_at_ms = now_ms();
        let summary = self.ingestor.follow(url, followed_at_ms).await?;
        info!("followed actor {url}");
        self.events.emit(ReaderEvent::ActorFollowed {
            url: url.to_string(),
            followed_at_ms,
        });
        Ok(summary)
    }

    pub async fn unfollow_actor(&self, url: &str) -> Result<()> {
        self.ingestor.unfollow(url).await?;
        info!("unfollowed and purged actor {url}");
        self.events.emit(ReaderEvent::ActorUnfollowed { url: url.to_string() });
        Ok(())
    }

    pub fn is_actor_followed(&self, url: &str) -> Result<bool> {
        self.db.is_followed(url)
    }

    pub fn get_followed_actors(&self) -> Result<Vec<FollowedActor>> {
        self.db.list_followed_actors()
    }

    pub fn has_followed_actors(&self) -> Result<bool> {
        Ok(self.db.count_followed_actors()? > 0)
    }

    /// Catch-up refresh of every followed actor, concurrently. One actor failing does not affect
    /// the others.
    pub async fn ingest_all_followed_actors(&self) -> Result<RefreshReport> {
        let followed = self.db.list_followed_actors()?;
        let runs = followed.into_iter().map(|f| async move {
            let res = self
                .ingestor
                .ingest_actor(&ObjectRef::from(f.url.as_str()), IngestMode::CatchUp)
                .await;
            (f.url, res)
        });
        let mut report = RefreshReport::default();
        for (url, res) in join_all(runs).await {
            match res {
                Ok(_) => report.refreshed.push(url),
                Err(e) => {
                    error!("refresh of {url} failed: {e}");
                    report.failed.push((url, e.to_string()));
                }
            }
        }
        Ok(report)
    }

    // ----- objects -----

    /// Stored note, or the remote document when it is not stored. Nothing is ingested.
    pub async fn get_note(&self, url: &str) -> Result<Value> {
        if let Some(note) = self.db.get_note(url)? {
            return Ok(note.json);
        }
        self.fetcher.fetch(url).await
    }

    /// Stored activity, else fetched and ingested.
    pub async fn get_activity(&self, url: &str) -> Result<Value> {
        if let Some(activity) = self.db.get_activity(url)? {
            return Ok(activity.json);
        }
        let doc = self.fetcher.fetch(url).await?;
        if let Err(e) = self.ingestor.ingest_activity(doc.clone()).await {
            warn!("fetched activity {url} could not be ingested: {e}");
        }
        Ok(doc)
    }

    /// Resolves any reference without storing it.
    pub async fn resolve_url(&self, url: &str) -> Result<Resolved> {
        let document = self.fetcher.fetch(url).await?;
        Ok(Resolved {
            kind: classify(&document),
            document,
        })
    }

    pub fn is_p2p(&self, url: &str) -> bool {
        self.fetcher.is_p2p(url)
    }

    pub fn resolve_p2p_url(&self, url: &str) -> String {
        self.fetcher.resolve_p2p_url(url)
    }

    // ----- queries -----

    pub fn search_notes(&self, filter: &NoteFilter, opts: SearchOptions) -> Result<Vec<NoteRecord>> {
        self.db.search_notes(filter, opts)
    }

    pub fn search_activities(
        &self,
        actor: &str,
        skip: usize,
        limit: Option<usize>,
    ) -> Result<Vec<ActivityRecord>> {
        self.db.search_activities(actor, skip, limit)
    }

    /// Ingests the note and its replies first, so this may write and hit the network.
    pub async fn reply_count(&self, note_id: &str) -> Result<u64> {
        self.ingestor.ingest_note(ObjectRef::from(note_id)).await?;
        self.db.count_replies(note_id)
    }

    pub fn get_total_notes_count(&self) -> Result<u64> {
        self.db.count_notes()
    }

    // ----- settings -----

    pub fn set_theme(&self, theme: &str) -> Result<()> {
        self.db.set_theme(theme)
    }

    pub fn get_theme(&self) -> Result<Option<String>> {
        self.db.get_theme()
    }
}
