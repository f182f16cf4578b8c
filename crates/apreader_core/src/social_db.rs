/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::error::{ReaderError, Result};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::Serialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const TIMELINE_ALL: &str = "all";
pub const TIMELINE_FOLLOWING: &str = "following";

pub const SCHEMA_VERSION: i64 = 3;

const THEME_KEY: &str = "theme";
const LIST_SEP: char = '\u{1f}';

/// Local store for actors, notes, activities and the follow graph.
///
/// Every call opens its own connection; SQLite (WAL) serializes writers, and every multi-row
/// mutation runs in a single transaction.
#[derive(Clone)]
pub struct SocialDb {
    path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActorRecord {
    pub id: String,
    pub url: Option<String>,
    pub name: Option<String>,
    pub preferred_username: Option<String>,
    pub icon_url: Option<String>,
    pub summary: Option<String>,
    pub outbox: Option<String>,
    pub created_ms: i64,
    pub updated_ms: i64,
    pub json: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FollowedActor {
    pub url: String,
    pub followed_at_ms: i64,
    /// Resolved actor `id`, once the actor document has been fetched.
    pub actor_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActivityRecord {
    pub id: String,
    pub kind: String,
    pub actor: Option<String>,
    pub object_id: Option<String>,
    pub published_ms: i64,
    pub json: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct NoteRecord {
    pub id: String,
    pub attributed_to: Option<String>,
    pub in_reply_to: Option<String>,
    pub conversation: Option<String>,
    pub url: Option<String>,
    pub published_ms: i64,
    pub tag_names: Vec<String>,
    pub timeline: Vec<String>,
    pub json: Value,
}

impl NoteRecord {
    pub fn content(&self) -> Option<&str> {
        self.json.get("content").and_then(|v| v.as_str())
    }

    pub fn in_timeline(&self, label: &str) -> bool {
        self.timeline.iter().any(|l| l == label)
    }
}

/// Activity as written by the ingestion engine.
#[derive(Debug, Clone)]
pub struct NewActivity {
    pub id: String,
    pub kind: String,
    pub actor: Option<String>,
    pub object_id: Option<String>,
    pub published_ms: i64,
    pub to: Vec<String>,
    pub json: Value,
}

/// Note as written by the ingestion engine, with its derived index fields.
#[derive(Debug, Clone)]
pub struct NewNote {
    pub id: String,
    pub attributed_to: Option<String>,
    pub in_reply_to: Option<String>,
    pub conversation: Option<String>,
    pub url: Option<String>,
    pub published_ms: i64,
    pub tag_names: Vec<String>,
    pub timeline: Vec<String>,
    pub to: Vec<String>,
    pub json: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteWrite {
    Inserted,
    Replaced,
    /// The stored copy is as new or newer; nothing was written.
    KeptExisting,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeSummary {
    pub actors: u64,
    pub activities: u64,
    pub notes: u64,
}

type MigrationStep = fn(&Transaction<'_>) -> rusqlite::Result<()>;

const MIGRATIONS: &[(i64, MigrationStep)] = &[
    (1, migrate_v1_base_schema),
    (2, migrate_v2_note_timelines),
    (3, migrate_v3_timeline_index),
];

impl SocialDb {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        let path = db_path.as_ref().to_path_buf();
        let db = Self { path };
        let mut conn = db.conn()?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        run_migrations(&mut conn)?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn conn(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.conn()?;
        Ok(conn.query_row("PRAGMA user_version", [], |r| r.get(0))?)
    }

    // ----- actors -----

    /// Insert or overwrite the actor keyed by `id`; `created_ms` survives overwrites.
    pub fn upsert_actor(&self, actor: &Value) -> Result<ActorRecord> {
        let id = actor
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ReaderError::invalid("actor", "actor document has no id"))?
            .to_string();
        let now = now_ms();
        let url = apreader_protocol::object_page_url(actor);
        let text = |k: &str| actor.get(k).and_then(|v| v.as_str()).map(str::to_string);
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO actors(id, url, name, preferred_username, icon_url, summary, outbox, created_ms, updated_ms, actor_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
              url=excluded.url,
              name=excluded.name,
              preferred_username=excluded.preferred_username,
              icon_url=excluded.icon_url,
              summary=excluded.summary,
              outbox=excluded.outbox,
              updated_ms=excluded.updated_ms,
              actor_json=excluded.actor_json
            "#,
            params![
                id,
                url,
                text("name"),
                text("preferredUsername"),
                apreader_protocol::icon_url(actor),
                text("summary"),
                actor.get("outbox").and_then(apreader_protocol::first_id),
                now,
                serde_json::to_vec(actor)?,
            ],
        )?;
        drop(conn);
        self.get_actor(&id)?
            .ok_or_else(|| ReaderError::invalid(&id, "actor vanished after upsert"))
    }

    /// Looks an actor up by `id`, falling back to its `url` alias.
    pub fn get_actor(&self, id_or_url: &str) -> Result<Option<ActorRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            r#"
            SELECT id, url, name, preferred_username, icon_url, summary, outbox, created_ms, updated_ms, actor_json
            FROM actors
            WHERE id=?1 OR url=?1
            ORDER BY (id=?1) DESC
            LIMIT 1
            "#,
            params![id_or_url],
            actor_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    pub fn list_actors(&self) -> Result<Vec<ActorRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, url, name, preferred_username, icon_url, summary, outbox, created_ms, updated_ms, actor_json
            FROM actors
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map([], actor_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // ----- follow graph -----

    pub fn add_followed_actor(&self, url: &str, followed_at_ms: i64) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO followed_actors(url, followed_at_ms, actor_id) VALUES (?1, ?2, NULL)
            ON CONFLICT(url) DO UPDATE SET followed_at_ms=excluded.followed_at_ms
            "#,
            params![url, followed_at_ms],
        )?;
        Ok(())
    }

    /// Remembers which actor `id` a followed URL resolved to.
    pub fn bind_followed_actor_id(&self, url: &str, actor_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE followed_actors SET actor_id=?2 WHERE url=?1 OR url=?2",
            params![url, actor_id],
        )?;
        Ok(())
    }

    /// Deletes every follow record matching `url`, including the other aliases bound to the same
    /// actor id. Returns one removed record, preferring a bound one.
    pub fn remove_followed_actor(&self, url: &str) -> Result<Option<FollowedActor>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let matching = {
            let mut stmt = tx.prepare(
                "SELECT url, followed_at_ms, actor_id FROM followed_actors WHERE url=?1 OR actor_id=?1 ORDER BY followed_at_ms, url",
            )?;
            let rows = stmt.query_map(params![url], followed_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        for f in &matching {
            tx.execute("DELETE FROM followed_actors WHERE url=?1", params![f.url])?;
            if let Some(actor_id) = &f.actor_id {
                tx.execute(
                    "DELETE FROM followed_actors WHERE actor_id=?1 OR url=?1",
                    params![actor_id],
                )?;
            }
        }
        tx.commit()?;
        let bound = matching.iter().position(|f| f.actor_id.is_some()).unwrap_or(0);
        Ok(matching.into_iter().nth(bound))
    }

    /// True when `url_or_id` is a followed URL or the resolved id of one.
    pub fn is_followed(&self, url_or_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM followed_actors WHERE url=?1 OR actor_id=?1 LIMIT 1",
                params![url_or_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn list_followed_actors(&self) -> Result<Vec<FollowedActor>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT url, followed_at_ms, actor_id FROM followed_actors ORDER BY followed_at_ms, url",
        )?;
        let rows = stmt.query_map([], followed_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count_followed_actors(&self) -> Result<u64> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM followed_actors", [], |r| r.get(0))?)
    }

    // ----- activities -----

    /// Stores the activity unless its id is already known. Returns whether it was new.
    pub fn insert_activity_if_new(&self, activity: &NewActivity) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let inserted = tx.execute(
            r#"
            INSERT OR IGNORE INTO activities(id, type, actor, object_id, published_ms, activity_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                activity.id,
                activity.kind,
                activity.actor,
                activity.object_id,
                activity.published_ms,
                serde_json::to_vec(&activity.json)?,
            ],
        )?;
        if inserted == 1 {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO activity_recipients(activity_id, recipient, published_ms) VALUES (?1, ?2, ?3)",
            )?;
            for r in &activity.to {
                stmt.execute(params![activity.id, r, activity.published_ms])?;
            }
        }
        tx.commit()?;
        Ok(inserted == 1)
    }

    /// Drops an activity row so a later ingest treats it as new again.
    pub fn forget_activity(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM activity_recipients WHERE activity_id=?1", params![id])?;
        let n = tx.execute("DELETE FROM activities WHERE id=?1", params![id])?;
        tx.commit()?;
        Ok(n > 0)
    }

    pub fn has_activity(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM activities WHERE id=?1", params![id], |r| r.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    pub fn get_activity(&self, id: &str) -> Result<Option<ActivityRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, type, actor, object_id, published_ms, activity_json FROM activities WHERE id=?1",
            params![id],
            activity_from_row,
        )
        .optional()
        .map_err(Into::into)
    }

    // ----- notes -----

    /// Upsert that never replaces a stored note with an older or equally old copy.
    ///
    /// The compare and the write happen under one IMMEDIATE transaction, so concurrent ingestion of
    /// the same note cannot lose the newer copy.
    pub fn upsert_note(&self, note: &NewNote) -> Result<NoteWrite> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let existing: Option<i64> = tx
            .query_row(
                "SELECT published_ms FROM notes WHERE id=?1",
                params![note.id],
                |r| r.get(0),
            )
            .optional()?;
        let outcome = match existing {
            Some(published) if note.published_ms <= published => NoteWrite::KeptExisting,
            Some(_) => NoteWrite::Replaced,
            None => NoteWrite::Inserted,
        };
        if outcome == NoteWrite::KeptExisting {
            tx.commit()?;
            return Ok(outcome);
        }

        delete_note_index_rows(&tx, &note.id)?;
        tx.execute(
            r#"
            INSERT OR REPLACE INTO notes(id, attributed_to, in_reply_to, conversation, url, published_ms, note_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                note.id,
                note.attributed_to,
                note.in_reply_to,
                note.conversation,
                note.url,
                note.published_ms,
                serde_json::to_vec(&note.json)?,
            ],
        )?;
        {
            let mut tags = tx.prepare("INSERT OR IGNORE INTO note_tags(note_id, tag_name) VALUES (?1, ?2)")?;
            for t in &note.tag_names {
                tags.execute(params![note.id, t])?;
            }
            let mut labels = tx.prepare(
                "INSERT OR IGNORE INTO note_timeline(note_id, label, published_ms) VALUES (?1, ?2, ?3)",
            )?;
            for l in &note.timeline {
                labels.execute(params![note.id, l, note.published_ms])?;
            }
            let mut to = tx.prepare(
                "INSERT OR IGNORE INTO note_recipients(note_id, recipient, published_ms) VALUES (?1, ?2, ?3)",
            )?;
            for r in &note.to {
                to.execute(params![note.id, r, note.published_ms])?;
            }
        }
        tx.commit()?;
        Ok(outcome)
    }

    pub fn get_note(&self, id: &str) -> Result<Option<NoteRecord>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {NOTE_COLUMNS} FROM notes n WHERE n.id=?1");
        conn.query_row(&sql, params![id], note_from_row)
            .optional()
            .map_err(Into::into)
    }

    pub fn has_note(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let found: Option<i64> = conn
            .query_row("SELECT 1 FROM notes WHERE id=?1", params![id], |r| r.get(0))
            .optional()?;
        Ok(found.is_some())
    }

    /// Removes a note and its index rows. Absence is not an error.
    pub fn delete_note(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        delete_note_index_rows(&tx, id)?;
        let n = tx.execute("DELETE FROM notes WHERE id=?1", params![id])?;
        tx.commit()?;
        Ok(n > 0)
    }

    /// Adds `label` to every non-reply note of `author`. Returns how many notes gained it.
    pub fn add_timeline_label_for_author(&self, author: &str, label: &str) -> Result<u64> {
        let conn = self.conn()?;
        let n = conn.execute(
            r#"
            INSERT OR IGNORE INTO note_timeline(note_id, label, published_ms)
            SELECT id, ?2, published_ms FROM notes
            WHERE attributed_to=?1 AND in_reply_to IS NULL
            "#,
            params![author, label],
        )?;
        Ok(n as u64)
    }

    pub fn count_notes(&self) -> Result<u64> {
        let conn = self.conn()?;
        Ok(conn.query_row("SELECT COUNT(*) FROM notes", [], |r| r.get(0))?)
    }

    pub fn count_replies(&self, note_id: &str) -> Result<u64> {
        let conn = self.conn()?;
        Ok(conn.query_row(
            "SELECT COUNT(*) FROM notes WHERE in_reply_to=?1",
            params![note_id],
            |r| r.get(0),
        )?)
    }

    /// Deletes an actor with all of its activities and notes in one transaction.
    pub fn purge_actor(&self, actor_id: &str) -> Result<PurgeSummary> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "DELETE FROM note_tags WHERE note_id IN (SELECT id FROM notes WHERE attributed_to=?1)",
            params![actor_id],
        )?;
        tx.execute(
            "DELETE FROM note_timeline WHERE note_id IN (SELECT id FROM notes WHERE attributed_to=?1)",
            params![actor_id],
        )?;
        tx.execute(
            "DELETE FROM note_recipients WHERE note_id IN (SELECT id FROM notes WHERE attributed_to=?1)",
            params![actor_id],
        )?;
        let notes = tx.execute("DELETE FROM notes WHERE attributed_to=?1", params![actor_id])?;
        tx.execute(
            "DELETE FROM activity_recipients WHERE activity_id IN (SELECT id FROM activities WHERE actor=?1)",
            params![actor_id],
        )?;
        let activities = tx.execute("DELETE FROM activities WHERE actor=?1", params![actor_id])?;
        let actors = tx.execute("DELETE FROM actors WHERE id=?1", params![actor_id])?;
        tx.commit()?;
        Ok(PurgeSummary {
            actors: actors as u64,
            activities: activities as u64,
            notes: notes as u64,
        })
    }

    // ----- settings -----

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        conn.query_row("SELECT value FROM settings WHERE key=?1", params![key], |r| r.get(0))
            .optional()
            .map_err(Into::into)
    }

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO settings(key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn set_theme(&self, theme: &str) -> Result<()> {
        self.set_setting(THEME_KEY, theme)
    }

    pub fn get_theme(&self) -> Result<Option<String>> {
        self.get_setting(THEME_KEY)
    }
}

fn run_migrations(conn: &mut Connection) -> Result<()> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    if current > SCHEMA_VERSION {
        return Err(ReaderError::SchemaMigration {
            version: current,
            reason: format!("database is newer than this build (max {SCHEMA_VERSION})"),
        });
    }
    for (version, step) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        let fail = |e: rusqlite::Error| ReaderError::SchemaMigration {
            version: *version,
            reason: e.to_string(),
        };
        let tx = conn.transaction().map_err(fail)?;
        step(&tx).map_err(fail)?;
        tx.execute_batch(&format!("PRAGMA user_version = {version};"))
            .map_err(fail)?;
        tx.commit().map_err(fail)?;
        info!("store migrated to schema version {version}");
    }
    Ok(())
}

fn migrate_v1_base_schema(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS actors (
          id TEXT PRIMARY KEY,
          url TEXT NULL,
          name TEXT NULL,
          preferred_username TEXT NULL,
          icon_url TEXT NULL,
          summary TEXT NULL,
          outbox TEXT NULL,
          created_ms INTEGER NOT NULL,
          updated_ms INTEGER NOT NULL,
          actor_json BLOB NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_actors_url ON actors(url);
        CREATE INDEX IF NOT EXISTS idx_actors_created ON actors(created_ms);
        CREATE INDEX IF NOT EXISTS idx_actors_updated ON actors(updated_ms);

        CREATE TABLE IF NOT EXISTS followed_actors (
          url TEXT PRIMARY KEY,
          followed_at_ms INTEGER NOT NULL,
          actor_id TEXT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_followed_actor_id ON followed_actors(actor_id);

        CREATE TABLE IF NOT EXISTS activities (
          id TEXT PRIMARY KEY,
          type TEXT NOT NULL,
          actor TEXT NULL,
          object_id TEXT NULL,
          published_ms INTEGER NOT NULL,
          activity_json BLOB NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_activities_actor_published ON activities(actor, published_ms);
        CREATE INDEX IF NOT EXISTS idx_activities_published ON activities(published_ms);

        CREATE TABLE IF NOT EXISTS activity_recipients (
          activity_id TEXT NOT NULL,
          recipient TEXT NOT NULL,
          published_ms INTEGER NOT NULL,
          PRIMARY KEY(activity_id, recipient)
        );
        CREATE INDEX IF NOT EXISTS idx_activity_recipients_to_published ON activity_recipients(recipient, published_ms);

        CREATE TABLE IF NOT EXISTS notes (
          id TEXT PRIMARY KEY,
          attributed_to TEXT NULL,
          in_reply_to TEXT NULL,
          conversation TEXT NULL,
          url TEXT NULL,
          published_ms INTEGER NOT NULL,
          note_json BLOB NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_notes_attributed_published ON notes(attributed_to, published_ms);
        CREATE INDEX IF NOT EXISTS idx_notes_reply_published ON notes(in_reply_to, published_ms);
        CREATE INDEX IF NOT EXISTS idx_notes_conversation_published ON notes(conversation, published_ms);
        CREATE INDEX IF NOT EXISTS idx_notes_published ON notes(published_ms);
        CREATE INDEX IF NOT EXISTS idx_notes_url ON notes(url);

        CREATE TABLE IF NOT EXISTS note_recipients (
          note_id TEXT NOT NULL,
          recipient TEXT NOT NULL,
          published_ms INTEGER NOT NULL,
          PRIMARY KEY(note_id, recipient)
        );
        CREATE INDEX IF NOT EXISTS idx_note_recipients_to_published ON note_recipients(recipient, published_ms);

        -- Multi-valued tag index.
        CREATE TABLE IF NOT EXISTS note_tags (
          note_id TEXT NOT NULL,
          tag_name TEXT NOT NULL,
          PRIMARY KEY(note_id, tag_name)
        );
        CREATE INDEX IF NOT EXISTS idx_note_tags_name ON note_tags(tag_name);

        CREATE TABLE IF NOT EXISTS settings (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );
        "#,
    )
}

/// Timeline labels. Notes written before this version get `all`, plus `following` when their
/// author is followed and they are not replies.
fn migrate_v2_note_timelines(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS note_timeline (
          note_id TEXT NOT NULL,
          label TEXT NOT NULL,
          published_ms INTEGER NOT NULL,
          PRIMARY KEY(note_id, label)
        );
        "#,
    )?;
    tx.execute(
        "INSERT OR IGNORE INTO note_timeline(note_id, label, published_ms) SELECT id, ?1, published_ms FROM notes",
        params![TIMELINE_ALL],
    )?;
    tx.execute(
        r#"
        INSERT OR IGNORE INTO note_timeline(note_id, label, published_ms)
        SELECT n.id, ?1, n.published_ms FROM notes n
        WHERE n.in_reply_to IS NULL
          AND n.attributed_to IS NOT NULL
          AND EXISTS (
            SELECT 1 FROM followed_actors f
            WHERE f.url = n.attributed_to OR f.actor_id = n.attributed_to
          )
        "#,
        params![TIMELINE_FOLLOWING],
    )?;
    Ok(())
}

fn migrate_v3_timeline_index(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_note_timeline_label_published ON note_timeline(label, published_ms);",
    )
}

fn delete_note_index_rows(tx: &Transaction<'_>, note_id: &str) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM note_tags WHERE note_id=?1", params![note_id])?;
    tx.execute("DELETE FROM note_timeline WHERE note_id=?1", params![note_id])?;
    tx.execute("DELETE FROM note_recipients WHERE note_id=?1", params![note_id])?;
    Ok(())
}

/// Column list matching [`note_from_row`]; the notes table must be aliased `n`.
pub(crate) const NOTE_COLUMNS: &str = r#"
    n.id, n.attributed_to, n.in_reply_to, n.conversation, n.url, n.published_ms, n.note_json,
    (SELECT group_concat(g.tag_name, char(31)) FROM note_tags g WHERE g.note_id = n.id),
    (SELECT group_concat(t.label, char(31)) FROM note_timeline t WHERE t.note_id = n.id)
"#;

pub(crate) fn note_from_row(r: &Row<'_>) -> rusqlite::Result<NoteRecord> {
    let mut timeline = split_list(r.get(8)?);
    timeline.sort();
    Ok(NoteRecord {
        id: r.get(0)?,
        attributed_to: r.get(1)?,
        in_reply_to: r.get(2)?,
        conversation: r.get(3)?,
        url: r.get(4)?,
        published_ms: r.get(5)?,
        json: json_column(r, 6)?,
        tag_names: split_list(r.get(7)?),
        timeline,
    })
}

pub(crate) fn activity_from_row(r: &Row<'_>) -> rusqlite::Result<ActivityRecord> {
    Ok(ActivityRecord {
        id: r.get(0)?,
        kind: r.get(1)?,
        actor: r.get(2)?,
        object_id: r.get(3)?,
        published_ms: r.get(4)?,
        json: json_column(r, 5)?,
    })
}

fn actor_from_row(r: &Row<'_>) -> rusqlite::Result<ActorRecord> {
    Ok(ActorRecord {
        id: r.get(0)?,
        url: r.get(1)?,
        name: r.get(2)?,
        preferred_username: r.get(3)?,
        icon_url: r.get(4)?,
        summary: r.get(5)?,
        outbox: r.get(6)?,
        created_ms: r.get(7)?,
        updated_ms: r.get(8)?,
        json: json_column(r, 9)?,
    })
}

fn followed_from_row(r: &Row<'_>) -> rusqlite::Result<FollowedActor> {
    Ok(FollowedActor {
        url: r.get(0)?,
        followed_at_ms: r.get(1)?,
        actor_id: r.get(2)?,
    })
}

fn json_column(r: &Row<'_>, idx: usize) -> rusqlite::Result<Value> {
    let bytes: Vec<u8> = r.get(idx)?;
    serde_json::from_slice(&bytes)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Blob, Box::new(e)))
}

fn split_list(raw: Option<String>) -> Vec<String> {
    raw.map(|s| s.split(LIST_SEP).map(str::to_string).collect())
        .unwrap_or_default()
}

pub(crate) fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
