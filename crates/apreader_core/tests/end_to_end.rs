/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use apreader_core::config::{FetchConfig, ReaderConfig};
use apreader_core::query::{NoteFilter, SearchOptions, SortOrder};
use apreader_core::social_db::{TIMELINE_ALL, TIMELINE_FOLLOWING};
use apreader_core::Reader;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn open_reader(dir: &TempDir) -> Reader {
    let cfg = ReaderConfig {
        data_dir: Some(dir.path().display().to_string()),
        fetch: FetchConfig {
            cors_proxy: None,
            retry_attempts: 1,
            timeout_secs: 5,
            ..FetchConfig::default()
        },
        ..ReaderConfig::default()
    };
    Reader::open(cfg).unwrap()
}

async fn serve(server: &MockServer, at: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

fn create(actor: &str, n: u32, object: Value) -> Value {
    json!({
        "id": format!("{actor}/activities/{n}"),
        "type": "Create",
        "actor": actor,
        "object": object,
        "to": ["https://www.w3.org/ns/activitystreams#Public"],
    })
}

/// Actor at `/@{name}` whose outbox is one page holding `activities` (newest first).
async fn serve_actor(server: &MockServer, name: &str, activities: Vec<Value>) -> String {
    let base = server.uri();
    let id = format!("{base}/@{name}");
    serve(
        server,
        &format!("/@{name}"),
        json!({
            "id": id,
            "type": "Person",
            "preferredUsername": name,
            "outbox": format!("{id}/outbox"),
        }),
    )
    .await;
    serve(
        server,
        &format!("/@{name}/outbox"),
        json!({
            "type": "OrderedCollection",
            "totalItems": activities.len(),
            "first": format!("{id}/outbox/page"),
            "last": format!("{id}/outbox/page"),
        }),
    )
    .await;
    serve(
        server,
        &format!("/@{name}/outbox/page"),
        json!({"type": "OrderedCollectionPage", "orderedItems": activities}),
    )
    .await;
    id
}

async fn serve_alice(server: &MockServer) -> String {
    let alice = format!("{}/@alice", server.uri());
    let mut activities = Vec::new();
    for (n, day) in [(3u32, "03"), (2, "02"), (1, "01")] {
        let note_id = format!("{alice}/notes/{n}");
        serve(
            server,
            &format!("/@alice/notes/{n}"),
            json!({
                "id": note_id,
                "type": "Note",
                "attributedTo": alice,
                "content": format!("note {n}"),
                "published": format!("2024-01-{day}T12:00:00Z"),
            }),
        )
        .await;
        activities.push(create(&alice, n, json!(note_id)));
    }
    serve_actor(server, "alice", activities).await
}

fn note_ids(notes: &[apreader_core::social_db::NoteRecord]) -> Vec<String> {
    notes.iter().map(|n| n.id.clone()).collect()
}

#[tokio::test]
async fn following_an_actor_stores_its_notes_newest_first() {
    let server = MockServer::start().await;
    let alice = serve_alice(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let reader = open_reader(&dir);

    let before = reader.get_total_notes_count().unwrap();
    reader.follow_actor(&alice).await.unwrap();

    let opts = SearchOptions {
        sort: SortOrder::from_i8(-1),
        ..SearchOptions::default()
    };
    let notes = reader.search_notes(&NoteFilter::by_author(alice.as_str()), opts).unwrap();
    assert_eq!(
        note_ids(&notes),
        vec![
            format!("{alice}/notes/3"),
            format!("{alice}/notes/2"),
            format!("{alice}/notes/1"),
        ]
    );
    assert_eq!(reader.get_total_notes_count().unwrap(), before + 3);
    assert!(notes.iter().all(|n| n.in_timeline(TIMELINE_FOLLOWING)));
    assert_eq!(reader.search_activities(&alice, 0, None).unwrap().len(), 3);
}

#[tokio::test]
async fn reply_count_ingests_once_and_then_stays_local() {
    let server = MockServer::start().await;
    let base = server.uri();
    let parent = format!("{base}/notes/parent");
    let replies: Vec<String> = (1..=2).map(|i| format!("{base}/notes/reply-{i}")).collect();

    Mock::given(method("GET"))
        .and(path("/notes/parent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": parent,
            "type": "Note",
            "attributedTo": format!("{base}/@carol"),
            "published": "2024-02-01T00:00:00Z",
            "replies": {
                "type": "Collection",
                "first": {"type": "CollectionPage", "items": replies},
            },
        })))
        .expect(1)
        .mount(&server)
        .await;
    for (i, reply) in replies.iter().enumerate() {
        Mock::given(method("GET"))
            .and(path(format!("/notes/reply-{}", i + 1)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": reply,
                "type": "Note",
                "attributedTo": format!("{base}/@dave"),
                "inReplyTo": parent,
                "published": format!("2024-02-0{}T00:00:00Z", i + 2),
            })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let dir = tempfile::tempdir().unwrap();
    let reader = open_reader(&dir);
    assert_eq!(reader.reply_count(&parent).await.unwrap(), 2);
    assert_eq!(reader.reply_count(&parent).await.unwrap(), 2);

    let thread = reader
        .search_notes(
            &NoteFilter::replies_to(parent.as_str()),
            SearchOptions {
                sort: SortOrder::Ascending,
                ..SearchOptions::default()
            },
        )
        .unwrap();
    assert_eq!(note_ids(&thread), replies);
}

#[tokio::test]
async fn spoofed_notes_are_dropped_and_replies_stay_off_the_following_feed() {
    let server = MockServer::start().await;
    let base = server.uri();
    let bob = format!("{base}/@bob");
    let activities = vec![
        create(
            &bob,
            3,
            json!({"id": format!("{base}/notes/spoof"), "type": "Note", "attributedTo": format!("{base}/@mallory")}),
        ),
        create(
            &bob,
            2,
            json!({"id": format!("{bob}/notes/reply"), "type": "Note", "attributedTo": bob, "inReplyTo": format!("{base}/notes/elsewhere")}),
        ),
        create(
            &bob,
            1,
            json!({"id": format!("{bob}/notes/top"), "type": "Note", "attributedTo": bob}),
        ),
    ];
    serve_actor(&server, "bob", activities).await;

    let dir = tempfile::tempdir().unwrap();
    let reader = open_reader(&dir);
    let summary = reader.follow_actor(&bob).await.unwrap();
    assert_eq!(summary.new_activities, 3);

    assert_eq!(reader.get_total_notes_count().unwrap(), 2);
    let all = reader
        .search_notes(&NoteFilter::timeline(TIMELINE_ALL), SearchOptions::default())
        .unwrap();
    assert!(!note_ids(&all).contains(&format!("{base}/notes/spoof")));
    let following = reader
        .search_notes(&NoteFilter::timeline(TIMELINE_FOLLOWING), SearchOptions::default())
        .unwrap();
    assert_eq!(note_ids(&following), vec![format!("{bob}/notes/top")]);
}

#[tokio::test]
async fn unfollow_purges_everything_the_actor_wrote() {
    let server = MockServer::start().await;
    let alice = serve_alice(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let reader = open_reader(&dir);
    reader.follow_actor(&alice).await.unwrap();
    reader.db().set_theme("dark").unwrap();

    reader.unfollow_actor(&alice).await.unwrap();
    assert!(!reader.is_actor_followed(&alice).unwrap());
    assert!(reader.search_activities(&alice, 0, None).unwrap().is_empty());
    let opts = SearchOptions {
        limit: None,
        ..SearchOptions::default()
    };
    assert!(reader
        .search_notes(&NoteFilter::by_author(alice.as_str()), opts)
        .unwrap()
        .is_empty());
    assert!(reader.get_stored_actor(&alice).unwrap().is_none());
    assert_eq!(reader.get_theme().unwrap().as_deref(), Some("dark"));
}

#[tokio::test]
async fn refresh_only_ingests_activities_newer_than_the_stored_ones() {
    let server = MockServer::start().await;
    let alice = serve_alice(&server).await;
    let dir = tempfile::tempdir().unwrap();
    let reader = open_reader(&dir);
    reader.follow_actor(&alice).await.unwrap();

    let note_id = format!("{alice}/notes/4");
    serve(
        &server,
        "/@alice/notes/4",
        json!({"id": note_id, "type": "Note", "attributedTo": alice, "published": "2024-01-04T12:00:00Z"}),
    )
    .await;
    let mut items = vec![create(&alice, 4, json!(note_id))];
    for n in [3u32, 2, 1] {
        items.push(create(&alice, n, json!(format!("{alice}/notes/{n}"))));
    }
    Mock::given(method("GET"))
        .and(path("/@alice/outbox/page"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"type": "OrderedCollectionPage", "orderedItems": items})),
        )
        .with_priority(1)
        .mount(&server)
        .await;

    let report = reader.ingest_all_followed_actors().await.unwrap();
    assert_eq!(report.refreshed, vec![alice.clone()]);
    assert!(report.failed.is_empty());
    assert_eq!(reader.get_total_notes_count().unwrap(), 4);
    assert_eq!(reader.search_activities(&alice, 0, None).unwrap().len(), 4);
}

#[tokio::test]
async fn one_broken_actor_does_not_stop_the_others() {
    let server = MockServer::start().await;
    let alice = serve_alice(&server).await;
    let broken = format!("{}/@broken", server.uri());
    Mock::given(method("GET"))
        .and(path("/@broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let reader = open_reader(&dir);
    reader.db().add_followed_actor(&alice, 1).unwrap();
    reader.db().add_followed_actor(&broken, 2).unwrap();

    let report = reader.ingest_all_followed_actors().await.unwrap();
    assert_eq!(report.refreshed, vec![alice]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, broken);
    assert!(report.failed[0].1.contains("500"));
    assert_eq!(reader.get_total_notes_count().unwrap(), 3);
}
