/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Read-only queries over the local store.

use crate::config::DEFAULT_LIMIT;
use crate::error::Result;
use crate::social_db::{activity_from_row, note_from_row, ActivityRecord, NoteRecord, SocialDb, NOTE_COLUMNS};
use rand::{thread_rng, Rng};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension};

/// Constraints on `search_notes`. Empty means every note.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteFilter {
    pub attributed_to: Option<String>,
    pub in_reply_to: Option<String>,
    pub timeline: Option<String>,
    pub tag: Option<String>,
    pub to: Option<String>,
    pub conversation: Option<String>,
}

impl NoteFilter {
    pub fn by_author(actor_id: impl Into<String>) -> Self {
        Self {
            attributed_to: Some(actor_id.into()),
            ..Self::default()
        }
    }

    pub fn replies_to(note_id: impl Into<String>) -> Self {
        Self {
            in_reply_to: Some(note_id.into()),
            ..Self::default()
        }
    }

    pub fn timeline(label: impl Into<String>) -> Self {
        Self {
            timeline: Some(label.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
    /// Best-effort shuffle: independent random offsets, duplicates possible.
    Random,
}

impl SortOrder {
    /// `1` ascending, `-1` descending, `0` random.
    pub fn from_i8(v: i8) -> Self {
        match v {
            0 => Self::Random,
            v if v > 0 => Self::Ascending,
            _ => Self::Descending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchOptions {
    pub skip: usize,
    /// `None` returns everything that matches.
    pub limit: Option<usize>,
    pub sort: SortOrder,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            skip: 0,
            limit: Some(DEFAULT_LIMIT),
            sort: SortOrder::Descending,
        }
    }
}

/// FROM/WHERE clause for a filter. The join picks the index that narrows the scan most:
/// reply parent, then author, then the label/tag/recipient side tables, else `published`.
fn note_scope(filter: &NoteFilter) -> (String, Vec<SqlValue>) {
    let mut from = String::from("notes n");
    let mut clauses: Vec<&str> = Vec::new();
    let mut args: Vec<SqlValue> = Vec::new();

    if let Some(parent) = &filter.in_reply_to {
        clauses.push("n.in_reply_to = ?");
        args.push(SqlValue::Text(parent.clone()));
    }
    if let Some(author) = &filter.attributed_to {
        clauses.push("n.attributed_to = ?");
        args.push(SqlValue::Text(author.clone()));
    }
    if let Some(conversation) = &filter.conversation {
        clauses.push("n.conversation = ?");
        args.push(SqlValue::Text(conversation.clone()));
    }
    if let Some(label) = &filter.timeline {
        from.push_str(" JOIN note_timeline tl ON tl.note_id = n.id AND tl.label = ?");
        args.insert(0, SqlValue::Text(label.clone()));
    }
    if let Some(tag) = &filter.tag {
        clauses.push("EXISTS (SELECT 1 FROM note_tags g WHERE g.note_id = n.id AND g.tag_name = ?)");
        args.push(SqlValue::Text(tag.clone()));
    }
    if let Some(to) = &filter.to {
        clauses.push("EXISTS (SELECT 1 FROM note_recipients r WHERE r.note_id = n.id AND r.recipient = ?)");
        args.push(SqlValue::Text(to.clone()));
    }

    let mut sql = from;
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    (sql, args)
}

fn sql_limit(limit: Option<usize>) -> i64 {
    limit.map(|l| l.min(i64::MAX as usize) as i64).unwrap_or(-1)
}

impl SocialDb {
    pub fn search_notes(&self, filter: &NoteFilter, opts: SearchOptions) -> Result<Vec<NoteRecord>> {
        let (scope, args) = note_scope(filter);
        let conn = self.conn()?;

        if opts.sort == SortOrder::Random {
            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {scope}"),
                params_from_iter(args.iter()),
                |r| r.get(0),
            )?;
            if total == 0 {
                return Ok(Vec::new());
            }
            let draws = opts.limit.unwrap_or(total as usize).min(total as usize);
            let sql = format!(
                "SELECT {NOTE_COLUMNS} FROM {scope} ORDER BY n.published_ms, n.id LIMIT 1 OFFSET ?"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rng = thread_rng();
            let mut out = Vec::with_capacity(draws);
            for _ in 0..draws {
                let offset: i64 = rng.gen_range(0..total);
                let mut bound = args.clone();
                bound.push(SqlValue::Integer(offset));
                if let Some(note) = stmt
                    .query_row(params_from_iter(bound.iter()), note_from_row)
                    .optional()?
                {
                    out.push(note);
                }
            }
            return Ok(out);
        }

        let order = match opts.sort {
            SortOrder::Ascending => "ASC",
            _ => "DESC",
        };
        let sql = format!(
            "SELECT {NOTE_COLUMNS} FROM {scope} ORDER BY n.published_ms {order}, n.id {order} LIMIT ? OFFSET ?"
        );
        let mut bound = args;
        bound.push(SqlValue::Integer(sql_limit(opts.limit)));
        bound.push(SqlValue::Integer(opts.skip as i64));
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(bound.iter()), note_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn count_notes_matching(&self, filter: &NoteFilter) -> Result<u64> {
        let (scope, args) = note_scope(filter);
        let conn = self.conn()?;
        Ok(conn.query_row(
            &format!("SELECT COUNT(*) FROM {scope}"),
            params_from_iter(args.iter()),
            |r| r.get(0),
        )?)
    }

    /// An actor's activities, oldest first.
    pub fn search_activities(
        &self,
        actor: &str,
        skip: usize,
        limit: Option<usize>,
    ) -> Result<Vec<ActivityRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, type, actor, object_id, published_ms, activity_json
            FROM activities
            WHERE actor=?1
            ORDER BY published_ms ASC, id ASC
            LIMIT ?2 OFFSET ?3
            "#,
        )?;
        let rows = stmt.query_map(
            params![actor, sql_limit(limit), skip as i64],
            activity_from_row,
        )?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}
