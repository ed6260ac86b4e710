//! End-to-end overlay lifecycle against a mock GraphQL server.

use entrylive::dom::{NodeId, MARKER_ATTR};
use entrylive::feed::render::{LIKED_ATTR, POST_ID_ATTR};
use entrylive::util::{CachedTlds, TldCacheStore};
use entrylive::{Config, Engine, HostPage};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct FakeHost {
    state: Mutex<Option<serde_json::Value>>,
}

impl FakeHost {
    fn new() -> Self {
        Self {
            state: Mutex::new(Some(json!({
                "props": { "initialState": { "common": {
                    "user": { "xToken": "tok", "id": "viewer-1" }
                } } }
            }))),
        }
    }
}

impl HostPage for FakeHost {
    fn meta_content(&self, name: &str) -> Option<String> {
        (name == "csrf-token").then(|| "csrf".to_string())
    }

    fn embedded_state(&self) -> Option<serde_json::Value> {
        self.state.lock().clone()
    }
}

#[derive(Default)]
struct MemStore {
    snapshot: Mutex<Option<CachedTlds>>,
}

impl TldCacheStore for MemStore {
    fn load(&self) -> Option<CachedTlds> {
        self.snapshot.lock().clone()
    }
    fn save(&self, snapshot: &CachedTlds) {
        *self.snapshot.lock() = Some(snapshot.clone());
    }
}

fn post_row(id: &str, likes: i64, comments: i64) -> serde_json::Value {
    json!({
        "id": id,
        "content": "post body",
        "likesLength": likes,
        "isLike": false,
        "commentsLength": comments,
        "user": { "id": "u1", "nickname": "someone" }
    })
}

async fn mount_feed(server: &MockServer, rows: Vec<serde_json::Value>) {
    Mock::given(method("POST"))
        .and(path("/graphql/SELECT_ENTRYSTORY"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {
            "discussList": { "list": rows, "searchAfter": null, "total": 1 }
        }})))
        .mount(server)
        .await;
}

async fn mount_comments(server: &MockServer, rows: Vec<serde_json::Value>) {
    let total = rows.len();
    Mock::given(method("POST"))
        .and(path("/graphql/SELECT_COMMENTS"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {
            "commentList": { "list": rows, "searchAfter": null, "total": total }
        }})))
        .mount(server)
        .await;
}

/// Refresh cadences are parked far out so tests drive every cycle
/// explicitly; the refresh test overrides them.
fn config(server: &MockServer) -> Config {
    Config {
        graphql_base: server.uri(),
        tld_list_url: Some(format!("{}/tld-list", server.uri())),
        recent_refresh_ms: 60_000,
        background_refresh_ms: 60_000,
        fetch_retries: 0,
        token_retries: 0,
        ..Config::default()
    }
}

async fn activated_engine_with(config: Config) -> (Engine, NodeId) {
    let mut engine = Engine::new(
        config,
        Arc::new(FakeHost::new()),
        Arc::new(MemStore::default()),
    );
    let mount = engine.tree().read().root();
    engine
        .handle_location("https://playentry.org/community/entrystory", mount)
        .await
        .unwrap();
    (engine, mount)
}

async fn activated_engine(server: &MockServer) -> (Engine, NodeId) {
    activated_engine_with(config(server)).await
}

#[tokio::test]
async fn periodic_refresh_patches_counters_in_place() {
    let server = MockServer::start().await;
    mount_feed(&server, vec![post_row("p1", 0, 0)]).await;
    let fast = Config {
        recent_refresh_ms: 25,
        background_refresh_ms: 40,
        ..config(&server)
    };
    let (engine, _mount) = activated_engine_with(fast).await;

    let view = engine.view().unwrap();
    let (root, like_button) = {
        let view = view.lock().await;
        let nodes = view.entry("p1").unwrap().nodes;
        (nodes.root, nodes.like_button)
    };

    // The server-side count moves; the next refresh cycle should patch the
    // existing entry rather than rebuild it.
    server.reset().await;
    mount_feed(&server, vec![post_row("p1", 7, 0)]).await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    let tree = engine.tree();
    {
        let guard = tree.read();
        assert!(guard.is_attached(root));
        assert_eq!(guard.text_of(like_button), "like 7");
    }
    let view = view.lock().await;
    assert_eq!(view.entry("p1").unwrap().nodes.root, root);
    assert_eq!(view.item("p1").unwrap().like_count, 7);
}

#[tokio::test]
async fn like_applies_only_after_server_confirmation() {
    let server = MockServer::start().await;
    mount_feed(&server, vec![post_row("p1", 2, 0)]).await;
    Mock::given(method("POST"))
        .and(path("/graphql/LIKE"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "data": { "like": { "target": "p1" } } })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let (engine, _mount) = activated_engine(&server).await;
    let liked = engine.actions().unwrap().toggle_post_like("p1").await.unwrap();
    assert!(liked);

    let view = engine.view().unwrap();
    let view = view.lock().await;
    let nodes = view.entry("p1").unwrap().nodes;
    let tree = engine.tree();
    let guard = tree.read();
    assert_eq!(guard.text_of(nodes.like_button), "like 3");
    assert_eq!(guard.attr(nodes.like_button, LIKED_ATTR), Some("true"));
}

#[tokio::test]
async fn thread_expansion_and_pagination() {
    let server = MockServer::start().await;
    mount_feed(&server, vec![post_row("p1", 0, 3)]).await;
    Mock::given(method("POST"))
        .and(path("/graphql/SELECT_COMMENTS"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {
            "commentList": {
                "list": [
                    { "id": "c1", "content": "first", "likesLength": 0, "isLike": false,
                      "user": { "id": "u2", "nickname": "other" } }
                ],
                "searchAfter": [100, "c1"],
                "total": 3
            }
        }})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql/SELECT_COMMENTS"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {
            "commentList": {
                "list": [
                    { "id": "c2", "content": "second", "likesLength": 0, "isLike": false,
                      "user": { "id": "u2", "nickname": "other" } }
                ],
                "searchAfter": null,
                "total": 3
            }
        }})))
        .mount(&server)
        .await;

    let (engine, _mount) = activated_engine(&server).await;
    assert!(engine.toggle_thread("p1").await.unwrap());

    let appended = engine.load_more_comments("p1").await.unwrap();
    assert_eq!(appended, 1);
    {
        let threads = engine.threads().unwrap();
        let threads = threads.lock().await;
        assert_eq!(threads.thread("p1").unwrap().comment_count(), 2);
        assert!(!threads.thread("p1").unwrap().has_more());
    }

    assert!(!engine.toggle_thread("p1").await.unwrap());
    let threads = engine.threads().unwrap();
    assert!(!threads.lock().await.is_open("p1"));
}

#[tokio::test]
async fn rejected_credentials_surface_and_recover_without_replay() {
    let server = MockServer::start().await;
    mount_feed(&server, vec![post_row("p1", 0, 0)]).await;
    Mock::given(method("POST"))
        .and(path("/graphql/LIKE"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<html>form tampered with</html>"),
        )
        .expect(1)
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/graphql/LIKE"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "data": { "like": { "target": "p1" } } })),
        )
        .mount(&server)
        .await;

    let (engine, _mount) = activated_engine(&server).await;
    let actions = engine.actions().unwrap();

    // First attempt is rejected and NOT replayed automatically.
    let err = actions.toggle_post_like("p1").await.unwrap_err();
    assert!(matches!(
        err,
        entrylive::feed::ActionError::Api(ref e) if e.is_auth_failure()
    ));
    {
        let view = engine.view().unwrap();
        let view = view.lock().await;
        assert!(!view.item("p1").unwrap().is_liked_by_viewer);
    }

    // The next explicit invocation goes through.
    assert!(actions.toggle_post_like("p1").await.unwrap());
}

#[tokio::test]
async fn comment_submission_updates_counter_and_thread() {
    let server = MockServer::start().await;
    mount_feed(&server, vec![post_row("p1", 0, 0)]).await;
    mount_comments(
        &server,
        vec![json!({
            "id": "c1", "content": "fresh comment", "likesLength": 0, "isLike": false,
            "user": { "id": "viewer-1", "nickname": "me" }
        })],
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/graphql/CREATE_COMMENT"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({ "data": { "createComment": { "comment": { "id": "c1" } } } }),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let (engine, _mount) = activated_engine(&server).await;
    engine.toggle_thread("p1").await.unwrap();
    engine
        .actions()
        .unwrap()
        .submit_comment("p1", "fresh comment", None)
        .await
        .unwrap();

    let view = engine.view().unwrap();
    let view = view.lock().await;
    assert_eq!(view.item("p1").unwrap().comment_count, 1);
    let threads = engine.threads().unwrap();
    let threads = threads.lock().await;
    assert_eq!(
        threads.comment("p1", "c1").unwrap().body_text,
        "fresh comment"
    );
}

#[tokio::test]
async fn deleted_post_disappears_with_its_thread() {
    let server = MockServer::start().await;
    mount_feed(&server, vec![post_row("p1", 0, 1)]).await;
    mount_comments(
        &server,
        vec![json!({
            "id": "c1", "content": "first", "likesLength": 0, "isLike": false,
            "user": { "id": "u2", "nickname": "other" }
        })],
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/graphql/DELETE_DISCUSS"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "data": { "deleteDiscuss": { "id": "p1" } } })),
        )
        .mount(&server)
        .await;

    let (engine, _mount) = activated_engine(&server).await;
    engine.toggle_thread("p1").await.unwrap();
    let (entry_root, thread_container) = {
        let view = engine.view().unwrap();
        let root = view.lock().await.entry("p1").unwrap().nodes.root;
        let threads = engine.threads().unwrap();
        let container = threads.lock().await.thread("p1").unwrap().container();
        (root, container)
    };

    engine.actions().unwrap().delete_post("p1").await.unwrap();

    let tree = engine.tree();
    {
        let guard = tree.read();
        assert!(!guard.is_attached(entry_root));
        assert!(!guard.is_attached(thread_container));
    }
    let view = engine.view().unwrap();
    assert!(view.lock().await.entry("p1").is_none());
    let threads = engine.threads().unwrap();
    assert!(!threads.lock().await.is_open("p1"));
}

#[tokio::test]
async fn sticker_tabs_load_once_per_session() {
    let server = MockServer::start().await;
    mount_feed(&server, vec![post_row("p1", 0, 0)]).await;
    Mock::given(method("POST"))
        .and(path("/graphql/SELECT_STICKERS"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {
            "stickers": { "list": [{ "id": 1, "title": "animals" }] }
        }})))
        .expect(1)
        .mount(&server)
        .await;

    let (engine, _mount) = activated_engine(&server).await;
    assert_eq!(engine.sticker_tabs().await.unwrap(), 1);
    // Cached for the session; no second request.
    assert_eq!(engine.sticker_tabs().await.unwrap(), 1);
    let catalog = engine.stickers().unwrap();
    assert_eq!(catalog.lock().await.tabs()[0].title, "animals");
}

#[tokio::test]
async fn overlay_nodes_carry_the_capability_marker() {
    let server = MockServer::start().await;
    mount_feed(&server, vec![post_row("p1", 0, 0)]).await;
    let (engine, mount) = activated_engine(&server).await;

    let tree = engine.tree();
    let guard = tree.read();
    let entry = guard
        .find_by_attr(mount, POST_ID_ATTR, "p1")
        .expect("entry rendered");
    assert_eq!(guard.attr(entry, MARKER_ATTR), Some("true"));
    assert!(guard.is_injected(entry).unwrap());
    // The mount point itself belongs to the host.
    assert!(!guard.is_injected(mount).unwrap());
}
