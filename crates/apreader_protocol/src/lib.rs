/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! ActivityStreams vocabulary shared by the reader core and its presentation collaborators.
//!
//! Remote documents are kept as `serde_json::Value`: servers disagree on almost every field shape
//! (string vs object vs list), so the helpers here normalize the handful of fields the reader
//! actually indexes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Media types sent in `Accept`, in order of preference.
pub const ACCEPT_HEADER: &str =
    "application/activity+json, application/ld+json, application/json, text/html";

pub const MEDIA_ACTIVITY_JSON: &str = "application/activity+json";
pub const MEDIA_LD_JSON: &str = "application/ld+json";

pub const HYPER_PREFIX: &str = "hyper://";
pub const IPNS_PREFIX: &str = "ipns://";

/// A field that may hold either a bare reference (URL) or an already-materialized document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ObjectRef {
    Id(String),
    Inline(Value),
}

impl ObjectRef {
    /// `None` for null, empty strings and anything that is neither a string nor an object.
    pub fn from_value(v: &Value) -> Option<Self> {
        match v {
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    None
                } else {
                    Some(Self::Id(s.to_string()))
                }
            }
            Value::Object(_) => Some(Self::Inline(v.clone())),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Id(s) => Some(s.as_str()),
            Self::Inline(v) => v.get("id").and_then(|id| id.as_str()),
        }
    }
}

impl From<&str> for ObjectRef {
    fn from(s: &str) -> Self {
        Self::Id(s.to_string())
    }
}

impl From<String> for ObjectRef {
    fn from(s: String) -> Self {
        Self::Id(s)
    }
}

impl From<Value> for ObjectRef {
    fn from(v: Value) -> Self {
        match v {
            Value::String(s) => Self::Id(s),
            other => Self::Inline(other),
        }
    }
}

/// Activity types the reader dispatches on. Anything else is stored but has no side effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    Create,
    Update,
    Delete,
    Follow,
    Like,
    Announce,
    Other(String),
}

impl ActivityKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "Create" => Self::Create,
            "Update" => Self::Update,
            "Delete" => Self::Delete,
            "Follow" => Self::Follow,
            "Like" => Self::Like,
            "Announce" => Self::Announce,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Follow => "Follow",
            Self::Like => "Like",
            Self::Announce => "Announce",
            Self::Other(s) => s.as_str(),
        }
    }

    pub fn of(doc: &Value) -> Option<Self> {
        type_name(doc).map(Self::parse)
    }

    /// Create and Update carry a full object that should be (re)ingested.
    pub fn carries_object(&self) -> bool {
        matches!(self, Self::Create | Self::Update)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Actor,
    Note,
    Activity,
    Collection,
    Other,
}

const ACTOR_TYPES: &[&str] = &["Person", "Service", "Application", "Group", "Organization"];
const ACTIVITY_TYPES: &[&str] = &[
    "Create", "Update", "Delete", "Follow", "Like", "Announce", "Undo", "Accept", "Reject", "Add",
    "Remove", "Block", "Move",
];
const COLLECTION_TYPES: &[&str] = &[
    "Collection",
    "OrderedCollection",
    "CollectionPage",
    "OrderedCollectionPage",
];

pub fn classify(doc: &Value) -> DocumentKind {
    let Some(ty) = type_name(doc) else {
        return DocumentKind::Other;
    };
    if ACTOR_TYPES.contains(&ty) {
        DocumentKind::Actor
    } else if ty == "Note" {
        DocumentKind::Note
    } else if ACTIVITY_TYPES.contains(&ty) {
        DocumentKind::Activity
    } else if COLLECTION_TYPES.contains(&ty) {
        DocumentKind::Collection
    } else {
        DocumentKind::Other
    }
}

/// The `type` of a document; JSON-LD allows a list, in which case the first string wins.
pub fn type_name(doc: &Value) -> Option<&str> {
    match doc.get("type")? {
        Value::String(s) => Some(s.as_str()),
        Value::Array(list) => list.iter().find_map(|v| v.as_str()),
        _ => None,
    }
}

/// First identifier found in a field that may be a string, an object with `id`, or a list of either.
pub fn first_id(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Object(map) => map.get("id").and_then(first_id),
        Value::Array(list) => list.iter().find_map(first_id),
        _ => None,
    }
}

/// Every identifier in an addressing field (`to`, `cc`), deduplicated in order.
pub fn id_list(v: Option<&Value>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut push = |s: String| {
        if !out.contains(&s) {
            out.push(s);
        }
    };
    match v {
        Some(Value::Array(list)) => {
            for item in list {
                if let Some(id) = first_id(item) {
                    push(id);
                }
            }
        }
        Some(other) => {
            if let Some(id) = first_id(other) {
                push(id);
            }
        }
        None => {}
    }
    out
}

/// Human-facing page of an object: its `url` (string, first link of a list, or `.href`), else its `id`.
pub fn object_page_url(doc: &Value) -> Option<String> {
    if let Some(s) = doc.as_str() {
        return Some(s.to_string());
    }
    let from_url = match doc.get("url") {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Array(list)) => list.iter().find_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map.get("href").and_then(|h| h.as_str()).map(str::to_string),
            _ => None,
        }),
        Some(Value::Object(map)) => map.get("href").and_then(|h| h.as_str()).map(str::to_string),
        _ => None,
    };
    from_url.or_else(|| doc.get("id").and_then(|v| v.as_str()).map(str::to_string))
}

/// Avatar URL: first entry of a list, `.url` of an object, or a bare string.
pub fn icon_url(doc: &Value) -> Option<String> {
    fn url_of(v: &Value) -> Option<String> {
        match v {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map.get("url").and_then(url_of),
            _ => None,
        }
    }
    match doc.get("icon")? {
        Value::Array(list) => list.first().and_then(url_of),
        other => url_of(other),
    }
}

/// Names of the note's tags (`tag`, or the non-standard `tags`).
pub fn tag_names(doc: &Value) -> Vec<String> {
    let tags = doc.get("tag").or_else(|| doc.get("tags"));
    let list = match tags {
        Some(Value::Array(list)) => list.clone(),
        Some(v @ Value::Object(_)) => vec![v.clone()],
        _ => return Vec::new(),
    };
    let mut out: Vec<String> = Vec::new();
    for t in list {
        let Some(name) = t.get("name").and_then(|n| n.as_str()) else {
            continue;
        };
        let name = name.trim();
        if !name.is_empty() && !out.iter().any(|n| n == name) {
            out.push(name.to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn object_ref_distinguishes_reference_from_inline() {
        assert_eq!(
            ObjectRef::from_value(&json!(" https://a.example/1 ")),
            Some(ObjectRef::Id("https://a.example/1".to_string()))
        );
        let inline = ObjectRef::from_value(&json!({"id": "https://a.example/2"})).unwrap();
        assert!(matches!(inline, ObjectRef::Inline(_)));
        assert_eq!(inline.id(), Some("https://a.example/2"));
        assert_eq!(ObjectRef::from_value(&json!(null)), None);
        assert_eq!(ObjectRef::from_value(&json!("")), None);
    }

    #[test]
    fn activity_kind_keeps_unknown_types() {
        assert_eq!(ActivityKind::parse("Create"), ActivityKind::Create);
        let kind = ActivityKind::of(&json!({"type": "EmojiReact"})).unwrap();
        assert_eq!(kind, ActivityKind::Other("EmojiReact".to_string()));
        assert_eq!(kind.as_str(), "EmojiReact");
        assert!(!kind.carries_object());
    }

    #[test]
    fn classify_handles_type_lists() {
        assert_eq!(classify(&json!({"type": ["Person", "Thing"]})), DocumentKind::Actor);
        assert_eq!(classify(&json!({"type": "Note"})), DocumentKind::Note);
        assert_eq!(classify(&json!({"type": "OrderedCollectionPage"})), DocumentKind::Collection);
        assert_eq!(classify(&json!({})), DocumentKind::Other);
    }

    #[test]
    fn page_url_prefers_first_link() {
        let doc = json!({
            "id": "https://a.example/users/alice",
            "url": [{"href": "https://a.example/@alice"}, "https://b.example/alice"]
        });
        assert_eq!(object_page_url(&doc).as_deref(), Some("https://a.example/@alice"));
        assert_eq!(
            object_page_url(&json!({"id": "https://a.example/x"})).as_deref(),
            Some("https://a.example/x")
        );
    }

    #[test]
    fn icon_takes_first_entry() {
        let doc = json!({"icon": [{"url": "https://a.example/1.png"}, {"url": "https://a.example/2.png"}]});
        assert_eq!(icon_url(&doc).as_deref(), Some("https://a.example/1.png"));
        let doc = json!({"icon": {"type": "Image", "url": "https://a.example/3.png"}});
        assert_eq!(icon_url(&doc).as_deref(), Some("https://a.example/3.png"));
        assert_eq!(icon_url(&json!({})), None);
    }

    #[test]
    fn addressing_and_tags_are_normalized() {
        let doc = json!({
            "to": ["https://www.w3.org/ns/activitystreams#Public", {"id": "https://a.example/f"}],
            "tag": [{"type": "Hashtag", "name": "#rust"}, {"type": "Mention"}, {"name": "#rust"}]
        });
        assert_eq!(
            id_list(doc.get("to")),
            vec![
                "https://www.w3.org/ns/activitystreams#Public".to_string(),
                "https://a.example/f".to_string()
            ]
        );
        assert_eq!(tag_names(&doc), vec!["#rust".to_string()]);
        assert_eq!(tag_names(&json!({"tags": [{"name": "x"}]})), vec!["x".to_string()]);
    }
}
