use std::sync::Arc;
use std::time::Duration;

use searchd_core::config::IndexSettings;
use searchd_core::{ChangeEvent, CollectionDescriptor, ErrorKind, FieldDescriptor};
use searchd_ingest::{ChangeSource, MemorySource};
use searchd_text::{
    IndexMapping, IndexOptions, IndexState, QueryOptions, QueryServer, Refresher, SearchError, TextIndex,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

fn descriptor() -> CollectionDescriptor {
    CollectionDescriptor::new()
        .with_collection(
            "motion",
            [
                ("title", FieldDescriptor::new("string", true)),
                ("text", FieldDescriptor::new("HTMLStrict", true)),
                ("meeting_id", FieldDescriptor::new("relation", true)),
                ("state", FieldDescriptor::new("boolean", true)),
            ],
        )
        .with_collection(
            "topic",
            [
                ("title", FieldDescriptor::new("string", true)),
                ("owner_id", FieldDescriptor::new("generic-relation", true)),
            ],
        )
        .with_collection(
            "user",
            [
                ("username", FieldDescriptor::new("string", true)),
                ("meeting_ids", FieldDescriptor::new("number[]", true)),
            ],
        )
}

fn payload(value: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&value).expect("payload json")
}

fn added(collection: &str, id: u64, value: serde_json::Value) -> ChangeEvent {
    ChangeEvent::added(collection, id, payload(value))
}

struct Fixture {
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
    source: Arc<MemorySource>,
    index: Arc<TextIndex>,
}

fn fixture(events: Vec<ChangeEvent>) -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("search.index");
    let source = Arc::new(MemorySource::new());
    source.publish_all(events);
    let feed: Arc<dyn ChangeSource> = source.clone();
    let index = TextIndex::open(descriptor(), feed, IndexOptions::new(&root).with_batch(2)).expect("build index");
    Fixture { _dir: dir, root, source, index: Arc::new(index) }
}

fn server(index: &Arc<TextIndex>, max_queue: usize) -> QueryServer {
    QueryServer::new(Arc::clone(index), QueryOptions { max_queue, ..QueryOptions::default() })
}

#[test]
fn mapping_is_deterministic() {
    let a = IndexMapping::new(&descriptor());
    let b = IndexMapping::new(&descriptor());
    assert_eq!(
        serde_json::to_value(a.schema()).expect("schema"),
        serde_json::to_value(b.schema()).expect("schema")
    );
}

#[tokio::test]
async fn indexed_document_is_found_by_its_text() {
    let fx = fixture(vec![
        added("motion", 1, json!({"title": "Haushaltsplan Entwurf", "meeting_id": 1})),
        added("motion", 2, json!({"title": "Satzung", "meeting_id": 1})),
    ]);
    let qs = server(&fx.index, 2);
    let answers = qs.query("Haushaltsplan", 0).await.expect("query");
    assert_eq!(answers.keys().collect::<Vec<_>>(), ["motion/1"]);
    assert!(answers["motion/1"].matched_words.contains_key("title"));
    assert!(answers["motion/1"].score > 0.0);

    let none = qs.query("Verkehrswende", 0).await.expect("query");
    assert!(none.is_empty());
}

#[tokio::test]
async fn removed_entities_are_not_found() {
    let fx = fixture(vec![added("motion", 1, json!({"title": "Haushaltsplan"}))]);
    fx.source.publish(ChangeEvent::removed("motion", 1));
    assert_eq!(fx.index.update().expect("update"), 1);

    let qs = server(&fx.index, 2);
    assert!(qs.query("Haushaltsplan", 0).await.expect("query").is_empty());
}

#[tokio::test]
async fn changes_apply_in_arrival_order() {
    let fx = fixture(Vec::new());
    fx.source.publish(added("motion", 1, json!({"title": "Fahrradweg"})));
    fx.source.publish(ChangeEvent::changed("motion", 1, payload(json!({"title": "Spielplatz"}))));
    assert_eq!(fx.index.update().expect("update"), 2);

    let qs = server(&fx.index, 2);
    assert!(qs.query("Fahrradweg", 0).await.expect("query").is_empty());
    assert!(qs.query("Spielplatz", 0).await.expect("query").contains_key("motion/1"));

    fx.source.publish(ChangeEvent::changed("motion", 1, payload(json!({"title": "Bibliothek"}))));
    fx.source.publish(ChangeEvent::removed("motion", 1));
    fx.index.update().expect("update");
    assert!(qs.query("Bibliothek", 0).await.expect("query").is_empty());
    assert_eq!(fx.index.snapshot().expect("live").num_docs(), 0);
}

#[tokio::test]
async fn replayed_added_does_not_duplicate() {
    let fx = fixture(vec![added("motion", 1, json!({"title": "Fahrradweg"}))]);
    fx.source.publish(added("motion", 1, json!({"title": "Fahrradweg"})));
    fx.index.update().expect("update");
    assert_eq!(fx.index.snapshot().expect("live").num_docs(), 1);
}

#[tokio::test]
async fn two_matching_fields_give_one_answer() {
    let fx = fixture(vec![added(
        "motion",
        1,
        json!({"title": "Haushaltsplan", "text": "<p>Der <b>Haushaltsplan</b> wird beraten.</p>"}),
    )]);
    let qs = server(&fx.index, 2);
    let answers = qs.query("Haushaltsplan", 0).await.expect("query");
    assert_eq!(answers.len(), 1);
    let words = &answers["motion/1"].matched_words;
    assert!(words.contains_key("title"));
    assert!(words.contains_key("text"));
}

#[tokio::test]
async fn scoped_queries_only_see_their_meeting() {
    let fx = fixture(vec![
        added("motion", 1, json!({"title": "Tagesordnung", "meeting_id": 1})),
        added("motion", 2, json!({"title": "Tagesordnung", "meeting_id": 2})),
        added("topic", 3, json!({"title": "Tagesordnung", "owner_id": "meeting/1"})),
        added("topic", 4, json!({"title": "Tagesordnung", "owner_id": "meeting/2"})),
        added("user", 5, json!({"username": "Tagesordnung", "meeting_ids": [2, 1]})),
        added("user", 6, json!({"username": "Tagesordnung", "meeting_ids": [3]})),
    ]);
    let qs = server(&fx.index, 2);

    let scoped = qs.query("Tagesordnung", 1).await.expect("scoped query");
    assert_eq!(scoped.keys().collect::<Vec<_>>(), ["motion/1", "topic/3", "user/5"]);

    let unscoped = qs.query("Tagesordnung", 0).await.expect("unscoped query");
    assert_eq!(unscoped.len(), 6);
}

#[tokio::test]
async fn unsupported_field_types_are_skipped() {
    let fx = fixture(vec![added("motion", 1, json!({"title": "Fahrradweg", "state": true}))]);
    assert!(IndexMapping::new(&descriptor()).schema().get_field("state").is_err());
    let qs = server(&fx.index, 2);
    assert!(qs.query("Fahrradweg", 0).await.expect("query").contains_key("motion/1"));
}

#[tokio::test]
async fn malformed_payloads_do_not_abort_the_batch() {
    let fx = fixture(Vec::new());
    fx.source.publish(ChangeEvent::added("motion", 1, b"{not json".to_vec()));
    fx.source.publish(added("motion", 2, json!({"title": "Fahrradweg"})));
    assert_eq!(fx.index.update().expect("update"), 2);
    let qs = server(&fx.index, 2);
    assert!(qs.query("Fahrradweg", 0).await.expect("query").contains_key("motion/2"));
}

#[tokio::test]
async fn unknown_collections_are_ignored() {
    let fx = fixture(vec![added("poll", 1, json!({"title": "Fahrradweg"}))]);
    assert_eq!(fx.index.snapshot().expect("live").num_docs(), 0);
}

#[tokio::test]
async fn invalid_questions_are_client_errors() {
    let fx = fixture(vec![added("motion", 1, json!({"title": "Fahrradweg"}))]);
    let qs = server(&fx.index, 2);
    for question in ["", "   "] {
        let err = qs.query(question, 0).await.expect_err("invalid question");
        assert_eq!(err.kind(), ErrorKind::QueryInvalid, "{question:?}");
    }
}

#[tokio::test]
async fn expired_deadline_fails_and_frees_the_slot() {
    let fx = fixture((1..=40).map(|id| added("motion", id, json!({"title": "Fahrradweg Haushalt"}))).collect());
    let qs = server(&fx.index, 2);

    // The blocking search may occasionally win the race against an already
    // expired deadline, so allow a few attempts.
    let mut timed_out = false;
    for _ in 0..20 {
        match qs.query_with_deadline("Fahrradweg", 0, tokio::time::Instant::now()).await {
            Err(err) => {
                assert!(matches!(err, SearchError::DeadlineExceeded));
                assert_eq!(err.kind(), ErrorKind::QueryInternal);
                timed_out = true;
                break;
            }
            Ok(_) => continue,
        }
    }
    assert!(timed_out);

    let waited = tokio::time::Instant::now();
    while qs.available() < 2 {
        assert!(waited.elapsed() < Duration::from_secs(10), "slot never released");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(qs.available(), 2);

    let huge = QueryServer::new(
        Arc::clone(&fx.index),
        QueryOptions { timeout: Duration::from_secs(u64::MAX), ..QueryOptions::default() },
    );
    assert!(huge.query("Fahrradweg", 0).await.expect("query").contains_key("motion/1"));
}

#[tokio::test]
async fn stray_query_syntax_is_tolerated() {
    let fx = fixture(vec![added("motion", 1, json!({"title": "Haushalt"}))]);
    let qs = server(&fx.index, 2);
    for question in ["Antrag: Haushalt", "Haushalt)", "\"Haushalt", "nosuchfield:Fahrradweg"] {
        qs.query(question, 0).await.unwrap_or_else(|e| panic!("{question:?}: {e}"));
    }
    assert_eq!(qs.available(), 2);
}

#[tokio::test]
async fn queries_beyond_capacity_are_rejected() {
    let fx = fixture(vec![added("motion", 1, json!({"title": "Fahrradweg"}))]);
    let qs = server(&fx.index, 2);
    let first = qs.admit().expect("first slot");
    let _second = qs.admit().expect("second slot");
    assert_eq!(qs.available(), 0);

    let err = qs.query("Fahrradweg", 0).await.expect_err("over capacity");
    assert!(matches!(err, SearchError::Overloaded));
    assert_eq!(err.kind(), ErrorKind::AdmissionRejected);

    drop(first);
    assert!(qs.query("Fahrradweg", 0).await.expect("query").contains_key("motion/1"));
    assert_eq!(qs.available(), 1);
}

#[tokio::test]
async fn shutdown_rejects_new_queries() {
    let fx = fixture(vec![added("motion", 1, json!({"title": "Fahrradweg"}))]);
    let qs = server(&fx.index, 2);
    qs.shutdown().await;
    let err = qs.query("Fahrradweg", 0).await.expect_err("shut down");
    assert!(matches!(err, SearchError::ShuttingDown));
}

#[tokio::test]
async fn rebuild_swaps_generations_without_disturbing_readers() {
    let fx = fixture(vec![added("motion", 1, json!({"title": "Fahrradweg"}))]);
    let qs = server(&fx.index, 2);

    let pinned = fx.index.snapshot().expect("live generation");
    let old_path = pinned.path().expect("old path").to_path_buf();
    let old_id = pinned.id();

    fx.source.publish(added("motion", 2, json!({"title": "Schwimmbad"})));
    fx.index.rebuild().expect("rebuild");
    assert_eq!(fx.index.state(), IndexState::Serving);

    // The pinned generation still answers with its own content.
    assert!(pinned.search("Schwimmbad", None, 10).expect("old search").is_empty());
    assert_eq!(pinned.search("Fahrradweg", None, 10).expect("old search").len(), 1);
    assert!(old_path.exists());

    let fresh = qs.query("Schwimmbad", 0).await.expect("new query");
    assert!(fresh.contains_key("motion/2"));
    assert!(fx.index.snapshot().expect("live").id() > old_id);

    drop(pinned);
    assert!(!old_path.exists());
}

#[test]
fn failed_build_leaves_no_storage() {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path().join("search.index");
    let source = Arc::new(MemorySource::new());
    source.publish(added("motion", 1, json!({"title": "Fahrradweg"})));
    source.disconnect();

    let feed: Arc<dyn ChangeSource> = source.clone();
    let index = TextIndex::new(descriptor(), feed, IndexOptions::new(&root));
    let err = index.build().expect_err("source unavailable");
    assert_eq!(err.kind(), ErrorKind::BuildFatal);
    assert_eq!(index.state(), IndexState::Uninitialized);
    assert!(!root.join("gen-1").exists());

    source.reconnect();
    index.build().expect("second build");
    assert_eq!(index.state(), IndexState::Serving);
    assert!(matches!(index.build(), Err(SearchError::AlreadyBuilt)));
}

#[test]
fn close_is_idempotent_and_removes_storage() {
    let fx = fixture(vec![added("motion", 1, json!({"title": "Fahrradweg"}))]);
    let path = fx.index.snapshot().expect("live").path().expect("path").to_path_buf();
    fx.index.close().expect("close");
    fx.index.close().expect("second close");
    assert_eq!(fx.index.state(), IndexState::Closed);
    assert!(!path.exists());
    assert!(!fx.root.exists());
    assert!(matches!(fx.index.update(), Err(SearchError::Closed)));

    let never_built = TextIndex::new(descriptor(), Arc::new(MemorySource::new()), IndexOptions::new(&fx.root));
    never_built.close().expect("close unbuilt");
}

#[test]
fn transport_failures_during_update_ask_for_rebuild() {
    let fx = fixture(Vec::new());
    fx.source.disconnect();
    let err = fx.index.update().expect_err("disconnected");
    assert!(err.triggers_rebuild());
    assert_eq!(err.kind(), ErrorKind::UpdateTransient);
    assert_eq!(fx.index.state(), IndexState::Serving);
}

#[tokio::test]
async fn stale_index_nudges_the_refresher() {
    let fx = fixture(vec![added("motion", 1, json!({"title": "Fahrradweg"}))]);
    let nudge = Arc::new(tokio::sync::Notify::new());
    let options = QueryOptions { age: Duration::ZERO, ..QueryOptions::default() };
    let qs = QueryServer::new(Arc::clone(&fx.index), options).with_refresh(Arc::clone(&nudge));
    tokio::time::sleep(Duration::from_millis(2)).await;
    qs.query("Fahrradweg", 0).await.expect("query");
    tokio::time::timeout(Duration::from_secs(1), nudge.notified()).await.expect("nudged");
}

#[tokio::test]
async fn refresher_applies_changes_and_recovers_from_feed_outages() {
    let fx = fixture(Vec::new());
    let settings = IndexSettings {
        update_interval: Duration::from_millis(20),
        rebuild_interval: Duration::ZERO,
        ..IndexSettings::default()
    };
    let refresher = Refresher::new(Arc::clone(&fx.index), &settings);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(refresher.run(cancel.clone()));
    let qs = server(&fx.index, 2);

    fx.source.publish(added("motion", 1, json!({"title": "Fahrradweg"})));
    wait_for(&qs, "Fahrradweg", "motion/1").await;

    // A failed drain schedules a rebuild, which picks up everything
    // published in the meantime once the feed is back.
    fx.source.disconnect();
    tokio::time::sleep(Duration::from_millis(60)).await;
    fx.source.publish(added("motion", 2, json!({"title": "Schwimmbad"})));
    fx.source.reconnect();
    wait_for(&qs, "Schwimmbad", "motion/2").await;

    cancel.cancel();
    task.await.expect("refresher task");
}

async fn wait_for(qs: &QueryServer, question: &str, fqid: &str) {
    for _ in 0..200 {
        if qs.query(question, 0).await.expect("query").contains_key(fqid) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{fqid} never became searchable for {question:?}");
}
