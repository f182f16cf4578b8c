/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::collection::{CollectionWalker, Direction, WalkOptions};
use crate::error::{ReaderError, Result};
use crate::fetcher::Fetcher;
use crate::social_db::{
    ActorRecord, NewActivity, NewNote, NoteWrite, PurgeSummary, SocialDb, TIMELINE_ALL,
    TIMELINE_FOLLOWING,
};
use apreader_protocol::{first_id, id_list, tag_names, type_name, ActivityKind, ObjectRef};
use futures_util::StreamExt;
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// How an actor's outbox is walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// First follow: newest first.
    Backfill,
    /// Refresh: oldest first, stopping at the first activity already stored.
    CatchUp,
}

impl IngestMode {
    fn direction(self) -> Direction {
        match self {
            Self::Backfill => Direction::Backward,
            Self::CatchUp => Direction::Forward,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboxSummary {
    pub new_activities: u64,
    pub skipped: u64,
    pub caught_up: bool,
}

/// The only writer of the store. Every entry point is an idempotent upsert attempt.
#[derive(Clone)]
pub struct Ingestor {
    db: SocialDb,
    fetcher: Fetcher,
}

impl Ingestor {
    pub fn new(db: SocialDb, fetcher: Fetcher) -> Self {
        Self { db, fetcher }
    }

    /// Fetches and stores an actor, re-labels its history if followed, then walks its outbox.
    pub async fn ingest_actor(&self, actor: &ObjectRef, mode: IngestMode) -> Result<OutboxSummary> {
        let record = self.fetch_and_store_actor(actor).await?;
        let requested = actor.id().unwrap_or(record.id.as_str()).to_string();

        if self.db.is_followed(&requested)? || self.db.is_followed(&record.id)? {
            self.db.bind_followed_actor_id(&requested, &record.id)?;
            let relabeled = self
                .db
                .add_timeline_label_for_author(&record.id, TIMELINE_FOLLOWING)?;
            if relabeled > 0 {
                debug!("added {relabeled} stored notes of {} to the following timeline", record.id);
            }
        }

        let Some(outbox) = record.json.get("outbox").and_then(ObjectRef::from_value) else {
            warn!("no outbox found for actor {}", record.id);
            return Ok(OutboxSummary::default());
        };
        self.ingest_outbox(outbox, &record.id, mode).await
    }

    pub(crate) async fn fetch_and_store_actor(&self, actor: &ObjectRef) -> Result<ActorRecord> {
        let doc = self.fetcher.resolve(actor).await?;
        self.db.upsert_actor(&doc)
    }

    /// Walks an activity collection until it is exhausted or an already stored activity shows up.
    pub async fn ingest_outbox(
        &self,
        outbox: ObjectRef,
        actor_id: &str,
        mode: IngestMode,
    ) -> Result<OutboxSummary> {
        info!("ingesting outbox of {actor_id} ({mode:?})");
        // Loading the outbox itself is the one failure that fails the whole call.
        let outbox = ObjectRef::Inline(self.fetcher.resolve(&outbox).await?);
        let items = CollectionWalker::new(
            self.fetcher.clone(),
            outbox,
            WalkOptions::unbounded(mode.direction()),
        )
        .into_stream();
        let mut items = std::pin::pin!(items);
        let mut summary = OutboxSummary::default();
        while let Some(item) = items.next().await {
            let activity = match item {
                Ok(activity) => activity,
                Err(e) => {
                    warn!("skipping outbox item of {actor_id}: {e}");
                    summary.skipped += 1;
                    continue;
                }
            };
            match self.ingest_activity(activity).await {
                Ok(true) => summary.new_activities += 1,
                Ok(false) => {
                    info!("caught up with {actor_id}");
                    summary.caught_up = true;
                    break;
                }
                Err(e) => {
                    warn!("skipping activity of {actor_id}: {e}");
                    summary.skipped += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Stores an activity and applies its side effect. `Ok(false)` means it was already known.
    pub async fn ingest_activity(&self, mut activity: Value) -> Result<bool> {
        let id = match activity.get("id").and_then(|v| v.as_str()).map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => match activity.get("object").and_then(|v| v.as_str()) {
                Some(object) if !object.trim().is_empty() => {
                    let object = object.trim().to_string();
                    debug!("activity without id, using its object {object} as id");
                    if let Some(map) = activity.as_object_mut() {
                        map.insert("id".to_string(), Value::String(object.clone()));
                    }
                    object
                }
                _ => {
                    let shown = activity.get("type").and_then(|v| v.as_str()).unwrap_or("?");
                    return Err(ReaderError::MalformedReference(format!(
                        "{shown} activity without id or object reference"
                    )));
                }
            },
        };

        let kind = ActivityKind::of(&activity).unwrap_or_else(|| ActivityKind::Other(String::new()));
        let actor = activity.get("actor").and_then(first_id);
        let object = activity.get("object").and_then(ObjectRef::from_value);
        let mut to = id_list(activity.get("to"));
        for cc in id_list(activity.get("cc")) {
            if !to.contains(&cc) {
                to.push(cc);
            }
        }
        let record = NewActivity {
            id: id.clone(),
            kind: kind.as_str().to_string(),
            actor: actor.clone(),
            object_id: object.as_ref().and_then(|o| o.id()).map(str::to_string),
            published_ms: published_ms(&activity),
            to,
            json: activity,
        };
        if !self.db.insert_activity_if_new(&record)? {
            return Ok(false);
        }

        match (&kind, object) {
            (k, Some(object)) if k.carries_object() => {
                let Some(actor) = actor else {
                    debug!("{} activity {id} has no actor; note not ingested", k.as_str());
                    return Ok(true);
                };
                // The activity only counts as seen once its object was loaded.
                let note = match self.fetcher.resolve(&object).await {
                    Ok(note) => note,
                    Err(e) => {
                        self.db.forget_activity(&id)?;
                        return Err(e);
                    }
                };
                if type_name(&note) != Some("Note") {
                    return Ok(true);
                }
                let attributed_to = note.get("attributedTo").and_then(first_id);
                if attributed_to.as_deref() != Some(actor.as_str()) {
                    let mismatch = ReaderError::AttributionMismatch {
                        note: note.get("id").and_then(first_id).unwrap_or_default(),
                        attributed_to: attributed_to.unwrap_or_default(),
                        actor,
                    };
                    warn!("skipping note: {mismatch}");
                    return Ok(true);
                }
                if let Err(e) = self.ingest_note(ObjectRef::Inline(note)).await {
                    self.db.forget_activity(&id)?;
                    return Err(e);
                }
            }
            (ActivityKind::Delete, Some(object)) => {
                let Some(note_id) = object.id() else {
                    return Ok(true);
                };
                let Some(stored) = self.db.get_note(note_id)? else {
                    return Ok(true);
                };
                if stored.attributed_to.is_some() && stored.attributed_to != actor {
                    warn!(
                        "ignoring delete {id}: note {note_id} belongs to {}",
                        stored.attributed_to.as_deref().unwrap_or_default()
                    );
                } else if self.db.delete_note(note_id)? {
                    info!("deleted note {note_id}");
                }
            }
            _ => {}
        }
        Ok(true)
    }

    /// Stores a note (local copy preferred for references) and walks its replies.
    pub fn ingest_note(&self, note: ObjectRef) -> Pin<Box<dyn Future<Output = Result<NoteWrite>> + Send + '_>> {
        Box::pin(async move {
            let doc = match &note {
                ObjectRef::Inline(doc) => doc.clone(),
                ObjectRef::Id(id) => match self.db.get_note(id)? {
                    Some(stored) => stored.json,
                    None => self.fetcher.fetch(id).await?,
                },
            };
            let Some(id) = doc.get("id").and_then(first_id) else {
                return Err(ReaderError::invalid(
                    note.id().unwrap_or("<inline note>"),
                    "note has no id",
                ));
            };

            let attributed_to = doc.get("attributedTo").and_then(first_id);
            let in_reply_to = doc.get("inReplyTo").and_then(first_id);
            let mut timeline = vec![TIMELINE_ALL.to_string()];
            if in_reply_to.is_none() {
                if let Some(author) = &attributed_to {
                    if self.db.is_followed(author)? {
                        timeline.push(TIMELINE_FOLLOWING.to_string());
                    }
                }
            }
            let mut to = id_list(doc.get("to"));
            for cc in id_list(doc.get("cc")) {
                if !to.contains(&cc) {
                    to.push(cc);
                }
            }
            let record = NewNote {
                id: id.clone(),
                attributed_to,
                in_reply_to,
                conversation: doc.get("conversation").and_then(first_id),
                url: doc.get("url").and_then(|_| apreader_protocol::object_page_url(&doc)),
                published_ms: published_ms(&doc),
                tag_names: tag_names(&doc),
                timeline,
                to,
                json: doc.clone(),
            };
            let outcome = self.db.upsert_note(&record)?;
            match outcome {
                NoteWrite::Inserted => debug!("added note {id}"),
                NoteWrite::Replaced => info!("updated note {id} with a newer version"),
                NoteWrite::KeptExisting => {}
            }

            if let Some(replies) = doc.get("replies").and_then(ObjectRef::from_value) {
                self.ingest_replies(&id, replies).await;
            }
            Ok(outcome)
        })
    }

    /// Failures stay inside this subtree: they are logged and never reach the parent note.
    async fn ingest_replies(&self, parent: &str, replies: ObjectRef) {
        let mut walker = CollectionWalker::new(
            self.fetcher.clone(),
            replies,
            WalkOptions::unbounded(Direction::Forward),
        );
        while let Some(item) = walker.next_ref().await {
            let reply = match item {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("error loading replies of {parent}: {e}");
                    continue;
                }
            };
            if let ObjectRef::Id(reply_id) = &reply {
                match self.db.has_note(reply_id) {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(e) => {
                        warn!("error checking reply {reply_id}: {e}");
                        continue;
                    }
                }
            }
            if let Err(e) = self.ingest_note(reply).await {
                warn!("error ingesting reply of {parent}: {e}");
            }
        }
    }

    /// Records the follow and backfills the actor.
    pub async fn follow(&self, url: &str, followed_at_ms: i64) -> Result<OutboxSummary> {
        self.db.add_followed_actor(url, followed_at_ms)?;
        self.ingest_actor(&ObjectRef::from(url), IngestMode::Backfill).await
    }

    /// Drops the follow record, then purges the actor and everything it authored.
    pub async fn unfollow(&self, url: &str) -> Result<PurgeSummary> {
        let removed = self.db.remove_followed_actor(url)?;
        let known_id = match removed.and_then(|f| f.actor_id) {
            Some(id) => Some(id),
            None => self.db.get_actor(url)?.map(|a| a.id),
        };
        let actor_id = match known_id {
            Some(id) => id,
            None => match self.fetcher.fetch(url).await {
                Ok(doc) => doc
                    .get("id")
                    .and_then(first_id)
                    .unwrap_or_else(|| url.to_string()),
                Err(e) => {
                    debug!("could not resolve {url} for purge, using it as id: {e}");
                    url.to_string()
                }
            },
        };
        let summary = self.db.purge_actor(&actor_id)?;
        info!(
            "purged actor {actor_id}: {} activities, {} notes",
            summary.activities, summary.notes
        );
        Ok(summary)
    }
}

/// `published` as epoch milliseconds; missing or unparseable dates sort first.
pub(crate) fn published_ms(doc: &Value) -> i64 {
    doc.get("published")
        .and_then(|v| v.as_str())
        .and_then(|s| OffsetDateTime::parse(s.trim(), &Rfc3339).ok())
        .map(|t| (t.unix_timestamp_nanos() / 1_000_000) as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn setup() -> (TempDir, SocialDb, Ingestor) {
        let dir = tempfile::tempdir().unwrap();
        let db = SocialDb::open(dir.path().join("reader.db")).unwrap();
        let fetcher = Fetcher::new(FetchConfig {
            cors_proxy: None,
            retry_attempts: 1,
            ..FetchConfig::default()
        })
        .unwrap();
        let ingestor = Ingestor::new(db.clone(), fetcher);
        (dir, db, ingestor)
    }

    fn create(id: &str, actor: &str, note: Value) -> Value {
        json!({"id": id, "type": "Create", "actor": actor, "object": note})
    }

    #[test]
    fn published_is_parsed_as_rfc3339() {
        assert_eq!(published_ms(&json!({"published": "1970-01-01T00:00:01.500Z"})), 1500);
        assert_eq!(published_ms(&json!({"published": "2024-01-01T00:00:00+01:00"})), 1704063600000);
        assert_eq!(published_ms(&json!({"published": "yesterday"})), 0);
        assert_eq!(published_ms(&json!({})), 0);
    }

    #[tokio::test]
    async fn activity_ingestion_is_idempotent() {
        let (_dir, db, ing) = setup();
        let note = json!({"id": "n1", "type": "Note", "attributedTo": "alice", "published": "2024-01-01T00:00:00Z"});
        let act = create("act1", "alice", note);
        assert!(ing.ingest_activity(act.clone()).await.unwrap());
        assert!(!ing.ingest_activity(act).await.unwrap());
        assert_eq!(db.count_notes().unwrap(), 1);
        assert!(db.has_activity("act1").unwrap());
    }

    #[tokio::test]
    async fn activity_id_is_synthesized_from_object_reference() {
        let (_dir, db, ing) = setup();
        let like = json!({"type": "Like", "actor": "alice", "object": "https://b.example/n/9"});
        assert!(ing.ingest_activity(like.clone()).await.unwrap());
        let stored = db.get_activity("https://b.example/n/9").unwrap().unwrap();
        assert_eq!(stored.kind, "Like");
        assert!(!ing.ingest_activity(like).await.unwrap());

        let bad = json!({"type": "Create", "object": {"type": "Note"}});
        assert!(matches!(
            ing.ingest_activity(bad).await,
            Err(ReaderError::MalformedReference(_))
        ));
    }

    #[tokio::test]
    async fn mismatched_author_is_not_stored() {
        let (_dir, db, ing) = setup();
        let note = json!({"id": "n1", "type": "Note", "attributedTo": "mallory"});
        assert!(ing.ingest_activity(create("act1", "alice", note)).await.unwrap());
        assert!(db.get_note("n1").unwrap().is_none());
        assert_eq!(db.count_notes().unwrap(), 0);
    }

    #[tokio::test]
    async fn update_only_replaces_with_newer_copy() {
        let (_dir, db, ing) = setup();
        let v1 = json!({"id": "n1", "type": "Note", "attributedTo": "alice", "content": "v1", "published": "2024-01-02T00:00:00Z"});
        let stale = json!({"id": "n1", "type": "Note", "attributedTo": "alice", "content": "stale", "published": "2024-01-01T00:00:00Z"});
        let v2 = json!({"id": "n1", "type": "Note", "attributedTo": "alice", "content": "v2", "published": "2024-01-03T00:00:00Z"});
        ing.ingest_activity(create("c1", "alice", v1)).await.unwrap();
        let mut update = create("u1", "alice", stale);
        update["type"] = json!("Update");
        ing.ingest_activity(update).await.unwrap();
        assert_eq!(db.get_note("n1").unwrap().unwrap().content(), Some("v1"));

        let mut update = create("u2", "alice", v2);
        update["type"] = json!("Update");
        ing.ingest_activity(update).await.unwrap();
        assert_eq!(db.get_note("n1").unwrap().unwrap().content(), Some("v2"));
    }

    #[tokio::test]
    async fn delete_removes_the_note_and_tolerates_absence() {
        let (_dir, db, ing) = setup();
        let note = json!({"id": "n1", "type": "Note", "attributedTo": "alice"});
        ing.ingest_activity(create("c1", "alice", note)).await.unwrap();
        let del = json!({"id": "d1", "type": "Delete", "actor": "alice", "object": {"id": "n1", "type": "Tombstone"}});
        assert!(ing.ingest_activity(del).await.unwrap());
        assert!(db.get_note("n1").unwrap().is_none());
        let del = json!({"id": "d2", "type": "Delete", "actor": "alice", "object": "n404"});
        assert!(ing.ingest_activity(del).await.unwrap());
    }

    #[tokio::test]
    async fn delete_from_another_actor_keeps_the_note() {
        let (_dir, db, ing) = setup();
        let note = json!({"id": "n1", "type": "Note", "attributedTo": "alice"});
        ing.ingest_activity(create("c1", "alice", note)).await.unwrap();
        let del = json!({"id": "d1", "type": "Delete", "actor": "bob", "object": "n1"});
        assert!(ing.ingest_activity(del).await.unwrap());
        assert!(db.get_note("n1").unwrap().is_some());
    }

    #[tokio::test]
    async fn unreachable_object_leaves_the_activity_retryable() {
        let server = MockServer::start().await;
        let base = server.uri();
        Mock::given(method("GET"))
            .and(path("/n/1"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/n/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": format!("{base}/n/1"), "type": "Note", "attributedTo": "alice"
            })))
            .mount(&server)
            .await;

        let (_dir, db, ing) = setup();
        let act = create("act1", "alice", json!(format!("{base}/n/1")));
        assert!(matches!(
            ing.ingest_activity(act.clone()).await,
            Err(ReaderError::Fetch { status: 503, .. })
        ));
        assert!(!db.has_activity("act1").unwrap());

        assert!(ing.ingest_activity(act).await.unwrap());
        assert!(db.has_activity("act1").unwrap());
        assert_eq!(db.count_notes().unwrap(), 1);
    }

    #[tokio::test]
    async fn following_label_skips_replies() {
        let (_dir, db, ing) = setup();
        db.add_followed_actor("alice", 1).unwrap();
        ing.ingest_note(json!({"id": "n1", "type": "Note", "attributedTo": "alice"}).into())
            .await
            .unwrap();
        ing.ingest_note(json!({"id": "n2", "type": "Note", "attributedTo": "alice", "inReplyTo": "n1"}).into())
            .await
            .unwrap();
        ing.ingest_note(json!({"id": "n3", "type": "Note", "attributedTo": "bob"}).into())
            .await
            .unwrap();
        assert_eq!(db.get_note("n1").unwrap().unwrap().timeline, vec!["all", "following"]);
        assert_eq!(db.get_note("n2").unwrap().unwrap().timeline, vec!["all"]);
        assert_eq!(db.get_note("n3").unwrap().unwrap().timeline, vec!["all"]);
    }

    #[tokio::test]
    async fn broken_reply_does_not_abort_siblings_or_parent() {
        let server = MockServer::start().await;
        let base = server.uri();
        Mock::given(method("GET"))
            .and(path("/r/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": format!("{base}/r/ok"), "type": "Note", "attributedTo": "bob", "inReplyTo": "n1"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/r/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (_dir, db, ing) = setup();
        let note = json!({
            "id": "n1", "type": "Note", "attributedTo": "alice",
            "replies": {"type": "Collection", "items": [format!("{base}/r/broken"), format!("{base}/r/ok")]}
        });
        assert_eq!(ing.ingest_note(note.into()).await.unwrap(), NoteWrite::Inserted);
        assert_eq!(db.count_replies("n1").unwrap(), 1);
    }

    #[tokio::test]
    async fn catch_up_stops_at_first_known_activity() {
        let server = MockServer::start().await;
        let base = server.uri();
        let items: Vec<Value> = (1..=4)
            .map(|i| json!({"id": format!("a{i}"), "type": "Like", "actor": "alice", "object": format!("x{i}")}))
            .collect();
        Mock::given(method("GET"))
            .and(path("/outbox"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "type": "OrderedCollection",
                "first": format!("{base}/outbox/1"),
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/outbox/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "orderedItems": items,
                "next": format!("{base}/outbox/2"),
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/outbox/2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"orderedItems": []})))
            .expect(0)
            .mount(&server)
            .await;

        let (_dir, db, ing) = setup();
        ing.ingest_activity(json!({"id": "a3", "type": "Like", "actor": "alice", "object": "x3"}))
            .await
            .unwrap();
        let summary = ing
            .ingest_outbox(format!("{base}/outbox").into(), "alice", IngestMode::CatchUp)
            .await
            .unwrap();
        assert_eq!(summary, OutboxSummary { new_activities: 2, skipped: 0, caught_up: true });
        assert!(db.has_activity("a1").unwrap());
        assert!(db.has_activity("a2").unwrap());
        assert!(!db.has_activity("a4").unwrap());
    }
}
