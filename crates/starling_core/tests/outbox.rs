/*
 * SPDX-FileCopyrightText: 2026 Starling Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! End-to-end outbox pipeline tests driven through the HTTP surface, with a
//! loopback listener standing in for a remote instance where federation is
//! exercised.

use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, Response, StatusCode},
    routing::any,
    Router,
};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;
use tokio::sync::Mutex;
use tokio::time::sleep;

use starling_core::{
    ap::handle_request,
    config::ServerConfig,
    http_sig::{verify_digest, SignatureHeader},
    runtime,
};

const ACTIVITY_JSON: &str = "application/activity+json";

async fn app_with_users(users: &[&str]) -> (TempDir, runtime::App) {
    let dir = TempDir::new().unwrap();
    let cfg: ServerConfig = serde_json::from_value(json!({
        "public_base_url": "https://localhost",
        "data_dir": dir.path().join("data"),
        "users": users,
        "http_timeout_secs": 5,
    }))
    .unwrap();
    let app = runtime::build(&cfg).await.unwrap();
    (dir, app)
}

async fn request(app: &runtime::App, req: Request<Body>) -> (StatusCode, String) {
    let resp = handle_request(&app.state, req).await;
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8_lossy(&bytes).to_string())
}

async fn post_outbox(
    app: &runtime::App,
    name: &str,
    content_type: Option<&str>,
    body: &Value,
) -> (StatusCode, String) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/outbox/{name}"));
    if let Some(ct) = content_type {
        builder = builder.header(header::CONTENT_TYPE, ct);
    }
    let req = builder.body(Body::from(body.to_string())).unwrap();
    request(app, req).await
}

async fn post_activity(app: &runtime::App, name: &str, body: &Value) -> (StatusCode, Value) {
    let (status, body) = post_outbox(app, name, Some(ACTIVITY_JSON), body).await;
    let parsed = serde_json::from_str(&body).unwrap_or(Value::Null);
    (status, parsed)
}

async fn get_json(app: &runtime::App, uri: &str) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::ACCEPT, ACTIVITY_JSON)
        .body(Body::empty())
        .unwrap();
    let (status, body) = request(app, req).await;
    let parsed = serde_json::from_str(&body).unwrap_or(Value::Null);
    (status, parsed)
}

#[tokio::test]
async fn rejects_unrecognized_content_type_with_404() {
    let (_dir, app) = app_with_users(&["test"]).await;
    let (status, _) = post_outbox(&app, "test", Some("application/json"), &json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = post_outbox(&app, "test", None, &json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rejects_document_without_type() {
    let (_dir, app) = app_with_users(&["test"]).await;
    let (status, body) = post_outbox(
        &app,
        "test",
        Some(ACTIVITY_JSON),
        &json!({"actor": "bob", "@context": "https://www.w3.org/ns/activitystreams"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "Invalid activity");
}

#[tokio::test]
async fn unknown_actor_gets_formatted_404() {
    let (_dir, app) = app_with_users(&["test"]).await;
    let (status, body) = post_outbox(
        &app,
        "noone",
        Some(ACTIVITY_JSON),
        &json!({
            "type": "Create",
            "actor": "https://localhost/u/noone",
            "object": {"type": "Note", "content": "hi"}
        }),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, "'noone' not found on this instance");
}

#[tokio::test]
async fn create_note_lands_in_outbox_stream() {
    let (_dir, app) = app_with_users(&["test"]).await;
    let (status, _) = post_activity(
        &app,
        "test",
        &json!({
            "type": "Create",
            "to": "https://www.w3.org/ns/activitystreams#Public",
            "object": {
                "type": "Note",
                "content": "Say, did you finish reading that book I lent you?"
            }
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let page = app
        .store
        .get_stream("https://localhost/outbox/test", None, 10)
        .await
        .unwrap();
    assert_eq!(page.items.len(), 1);
    let stored = &page.items[0];
    assert_eq!(stored["actor"], json!(["https://localhost/u/test"]));
    assert_eq!(
        stored["object"][0]["content"],
        json!(["Say, did you finish reading that book I lent you?"])
    );
    assert_eq!(
        stored["_meta"]["collection"],
        json!(["https://localhost/outbox/test"])
    );
    let id = stored["id"].as_str().unwrap();
    assert!(id.starts_with("https://localhost/s/"));
}

#[tokio::test]
async fn bare_object_is_wrapped_in_create() {
    let (_dir, app) = app_with_users(&["test"]).await;
    let (status, returned) = post_activity(
        &app,
        "test",
        &json!({
            "type": "Note",
            "content": "a bare note",
            "to": "https://www.w3.org/ns/activitystreams#Public"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(returned["type"], "Create");
    assert_eq!(returned["object"]["type"], "Note");
    assert_eq!(returned["object"]["content"], "a bare note");

    // The embedded note was stored as its own object, owned by the poster.
    let oid = returned["object"]["id"].as_str().unwrap();
    let object = app.store.get_object(oid).await.unwrap().unwrap();
    assert_eq!(object["attributedTo"], json!(["https://localhost/u/test"]));
}

#[derive(Clone, Default)]
struct Captured {
    requests: Arc<Mutex<Vec<(String, HeaderMap, Vec<u8>)>>>,
}

/// A loopback "remote instance": serves one actor document and captures
/// inbox POSTs.
async fn spawn_remote_instance() -> (String, Captured) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let captured = Captured::default();

    let router = {
        let captured = captured.clone();
        let base = base.clone();
        Router::new().fallback(any(move |req: Request<Body>| {
            let captured = captured.clone();
            let base = base.clone();
            async move {
                let path = req.uri().path().to_string();
                match (req.method().as_str(), path.as_str()) {
                    ("GET", "/user/mocked") => {
                        let actor = json!({
                            "@context": "https://www.w3.org/ns/activitystreams",
                            "id": format!("{base}/user/mocked"),
                            "type": "Person",
                            "preferredUsername": "mocked",
                            "inbox": format!("{base}/inbox/mocked"),
                        });
                        json_response(StatusCode::OK, &actor)
                    }
                    ("GET", "/objects/note1") => {
                        let note = json!({
                            "@context": "https://www.w3.org/ns/activitystreams",
                            "id": format!("{base}/objects/note1"),
                            "type": "Note",
                            "attributedTo": format!("{base}/user/mocked"),
                            "content": "a remote post",
                        });
                        json_response(StatusCode::OK, &note)
                    }
                    ("POST", "/inbox/mocked") => {
                        let (parts, body) = req.into_parts();
                        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
                        captured
                            .requests
                            .lock()
                            .await
                            .push((path, parts.headers, bytes.to_vec()));
                        Response::builder()
                            .status(StatusCode::ACCEPTED)
                            .body(Body::empty())
                            .unwrap()
                    }
                    _ => Response::builder()
                        .status(StatusCode::NOT_FOUND)
                        .body(Body::empty())
                        .unwrap(),
                }
            }
        }))
    };

    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service()).await.unwrap();
    });
    (base, captured)
}

fn json_response(status: StatusCode, value: &Value) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, ACTIVITY_JSON)
        .body(Body::from(value.to_string()))
        .unwrap()
}

#[tokio::test]
async fn delivery_posts_once_with_verifiable_signature() {
    let (_dir, app) = app_with_users(&["test"]).await;
    let (remote_base, captured) = spawn_remote_instance().await;
    let remote_actor = format!("{remote_base}/user/mocked");

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    runtime::start_delivery_worker(&app, shutdown_rx);

    let (status, _) = post_activity(
        &app,
        "test",
        &json!({
            "type": "Create",
            "to": remote_actor,
            "bto": remote_actor,
            "object": {"type": "Note", "content": "across the wire"}
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // At-least-once with a healthy remote settles to exactly one POST.
    for _ in 0..100 {
        if !captured.requests.lock().await.is_empty() {
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }
    sleep(Duration::from_millis(300)).await;
    let requests = captured.requests.lock().await;
    assert_eq!(requests.len(), 1, "expected exactly one inbox POST");
    let (path, headers, body) = &requests[0];
    assert_eq!(path, "/inbox/mocked");

    let sig =
        SignatureHeader::parse(headers.get("Signature").unwrap().to_str().unwrap()).unwrap();
    assert_eq!(sig.key_id, "https://localhost/u/test#main-key");
    assert_eq!(sig.algorithm.as_deref(), Some("rsa-sha256"));
    assert!(sig.covers("digest"));
    verify_digest(headers, body).unwrap();

    let uri: http::Uri = format!("{remote_base}/inbox/mocked").parse().unwrap();
    let sender_keys = app
        .store
        .actor_keys("https://localhost/u/test")
        .await
        .unwrap()
        .unwrap();
    sig.verify(&sender_keys.public_key_pem, &Method::POST, &uri, headers)
        .unwrap();

    // External form: context restored, local-only addressing stripped, and no
    // private key bytes anywhere in the payload.
    let delivered: Value = serde_json::from_slice(body).unwrap();
    assert_eq!(delivered["@context"], "https://www.w3.org/ns/activitystreams");
    assert!(delivered.get("bto").is_none());
    assert!(delivered.get("_meta").is_none());
    let body_str = String::from_utf8_lossy(body);
    assert!(!body_str.contains("PRIVATE KEY"));
    assert!(!body_str.contains(sender_keys.private_key_pem.trim()));

    let _ = shutdown_tx.send(true);
}

#[tokio::test]
async fn blocked_recipient_is_never_enqueued() {
    let (_dir, app) = app_with_users(&["test", "blocked"]).await;

    let (status, _) = post_activity(
        &app,
        "test",
        &json!({"type": "Block", "object": "https://localhost/u/blocked"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // The block lives only in the blocked collection, not the outbox, and
    // was not federated anywhere.
    let outbox = app
        .store
        .get_stream("https://localhost/outbox/test", None, 10)
        .await
        .unwrap();
    assert_eq!(outbox.total, 0);
    let blocked = app
        .store
        .get_stream("https://localhost/blocked/test", None, 10)
        .await
        .unwrap();
    assert_eq!(blocked.total, 1);
    assert_eq!(app.queue.stats().await.unwrap().pending, 0);

    let (status, _) = post_activity(
        &app,
        "test",
        &json!({
            "type": "Create",
            "to": "https://localhost/u/blocked",
            "object": {"type": "Note", "content": "should not arrive"}
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.queue.stats().await.unwrap().pending, 0);
    assert!(app.queue.pending_targets().await.unwrap().is_empty());
}

#[tokio::test]
async fn outbox_get_pages_newest_first() {
    let (_dir, app) = app_with_users(&["test"]).await;
    for i in 1..=3 {
        let (status, _) = post_activity(
            &app,
            "test",
            &json!({
                "type": "Create",
                "object": {"type": "Note", "content": format!("note {i}")}
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, summary) = get_json(&app, "/outbox/test").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["type"], "OrderedCollection");
    assert_eq!(summary["totalItems"], 3);
    assert_eq!(summary["first"], "https://localhost/outbox/test?page=true");

    let (status, page) = get_json(&app, "/outbox/test?page=true").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["type"], "OrderedCollectionPage");
    let items = page["orderedItems"].as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0]["object"]["content"], "note 3");
    assert_eq!(items[2]["object"]["content"], "note 1");

    // `next` embeds the oldest item's cursor; following it finds nothing
    // older.
    let next = page["next"].as_str().unwrap();
    let query = next.strip_prefix("https://localhost/outbox/test?").unwrap();
    assert!(query.starts_with("page="));
    let (status, rest) = get_json(&app, &format!("/outbox/test?{query}")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(rest["orderedItems"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn delete_of_foreign_object_is_forbidden() {
    let (_dir, app) = app_with_users(&["test", "other"]).await;
    let (_, created) = post_activity(
        &app,
        "other",
        &json!({"type": "Create", "object": {"type": "Note", "content": "mine"}}),
    )
    .await;
    let note_id = created["object"]["id"].as_str().unwrap().to_string();

    let (status, body) =
        post_outbox(&app, "test", Some(ACTIVITY_JSON), &json!({"type": "Delete", "object": note_id})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, "not owner");

    let object = app.store.get_object(&note_id).await.unwrap().unwrap();
    assert_eq!(object["type"], "Note");
}

#[tokio::test]
async fn undo_of_foreign_activity_is_forbidden() {
    let (_dir, app) = app_with_users(&["test", "other"]).await;
    let (_, created) = post_activity(
        &app,
        "other",
        &json!({"type": "Create", "object": {"type": "Note", "content": "mine"}}),
    )
    .await;
    let (_, like) = post_activity(
        &app,
        "other",
        &json!({"type": "Like", "object": created["object"]["id"].clone()}),
    )
    .await;
    let like_id = like["id"].as_str().unwrap().to_string();

    let (status, body) =
        post_outbox(&app, "test", Some(ACTIVITY_JSON), &json!({"type": "Undo", "object": like_id})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, "not owner");
    assert!(app.store.get_activity(&like_id).await.unwrap().is_some());
}

#[tokio::test]
async fn like_tags_liked_collection_and_broadcasts_summary() {
    let (_dir, app) = app_with_users(&["test"]).await;
    let (_, created) = post_activity(
        &app,
        "test",
        &json!({"type": "Create", "object": {"type": "Note", "content": "likeable"}}),
    )
    .await;
    let note_id = created["object"]["id"].as_str().unwrap().to_string();

    let (status, like) =
        post_activity(&app, "test", &json!({"type": "Like", "object": note_id})).await;
    assert_eq!(status, StatusCode::OK);
    // The stored and delivered Like embeds the resolved object.
    assert_eq!(like["object"]["content"], "likeable");

    let liked = app
        .store
        .get_stream("https://localhost/liked/test", None, 10)
        .await
        .unwrap();
    assert_eq!(liked.total, 1);

    // Membership change synthesized exactly one Update(liked) into the
    // outbox, carrying the post-change count.
    let outbox = app
        .store
        .get_stream("https://localhost/outbox/test", None, 20)
        .await
        .unwrap();
    let updates: Vec<&Value> = outbox
        .items
        .iter()
        .filter(|a| a["type"] == "Update")
        .collect();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["object"][0]["id"], "https://localhost/liked/test");
    assert_eq!(updates[0]["object"][0]["totalItems"], json!([1]));
    assert_eq!(updates[0]["to"], json!(["https://localhost/followers/test"]));
}

#[tokio::test]
async fn like_embeds_resolved_remote_object() {
    let (_dir, app) = app_with_users(&["test"]).await;
    let (remote_base, _captured) = spawn_remote_instance().await;
    let remote_note = format!("{remote_base}/objects/note1");

    let (status, like) = post_activity(
        &app,
        "test",
        &json!({"type": "Like", "object": remote_note.clone()}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // The remote post was dereferenced and embedded, not left as an IRI.
    assert_eq!(like["object"]["id"], remote_note);
    assert_eq!(like["object"]["content"], "a remote post");

    // The fetched object is cached, so later dereferences stay local.
    let cached = app.store.get_object(&remote_note).await.unwrap().unwrap();
    assert_eq!(cached["content"], json!(["a remote post"]));
}

#[tokio::test]
async fn undo_like_reverses_membership_and_deletes() {
    let (_dir, app) = app_with_users(&["test"]).await;
    let (_, created) = post_activity(
        &app,
        "test",
        &json!({"type": "Create", "object": {"type": "Note", "content": "likeable"}}),
    )
    .await;
    let (_, like) = post_activity(
        &app,
        "test",
        &json!({"type": "Like", "object": created["object"]["id"].clone()}),
    )
    .await;
    let like_id = like["id"].as_str().unwrap().to_string();

    let (status, _) =
        post_activity(&app, "test", &json!({"type": "Undo", "object": like_id})).await;
    assert_eq!(status, StatusCode::OK);

    assert!(app.store.get_activity(&like_id).await.unwrap().is_none());
    let liked = app
        .store
        .get_stream("https://localhost/liked/test", None, 10)
        .await
        .unwrap();
    assert_eq!(liked.total, 0);

    // A second summary update went out for the vacated collection.
    let outbox = app
        .store
        .get_stream("https://localhost/outbox/test", None, 20)
        .await
        .unwrap();
    let counts: Vec<&Value> = outbox
        .items
        .iter()
        .filter(|a| a["type"] == "Update" && a["object"][0]["id"] == "https://localhost/liked/test")
        .map(|a| &a["object"][0]["totalItems"])
        .collect();
    assert_eq!(counts.len(), 2);
    assert_eq!(counts[0], &json!([0]));
    assert_eq!(counts[1], &json!([1]));
}

#[tokio::test]
async fn delete_tombstones_and_is_idempotent() {
    let (_dir, app) = app_with_users(&["test"]).await;
    let (_, created) = post_activity(
        &app,
        "test",
        &json!({"type": "Create", "object": {"type": "Note", "content": "doomed"}}),
    )
    .await;
    let note_id = created["object"]["id"].as_str().unwrap().to_string();
    let create_id = created["id"].as_str().unwrap().to_string();

    let (status, _) =
        post_activity(&app, "test", &json!({"type": "Delete", "object": note_id})).await;
    assert_eq!(status, StatusCode::OK);

    let tombstone = app.store.get_object(&note_id).await.unwrap().unwrap();
    assert_eq!(tombstone["type"], "Tombstone");
    assert!(tombstone.get("deleted").is_some());
    assert!(tombstone.get("updated").is_some());
    assert!(tombstone.get("content").is_none());
    let deleted_at = tombstone["deleted"].clone();

    // Embedded copies were patched to the tombstone as well.
    let create = app.store.get_activity(&create_id).await.unwrap().unwrap();
    assert_eq!(create["object"][0]["type"], "Tombstone");

    // Deleting again is a no-op 200: the tombstone is untouched.
    let (status, _) =
        post_activity(&app, "test", &json!({"type": "Delete", "object": note_id})).await;
    assert_eq!(status, StatusCode::OK);
    let again = app.store.get_object(&note_id).await.unwrap().unwrap();
    assert_eq!(again["deleted"], deleted_at);
}

#[tokio::test]
async fn accept_follow_updates_followers_collection() {
    let (_dir, app) = app_with_users(&["test"]).await;
    let follow = json!({
        "id": "https://remote.example/s/follow1",
        "type": "Follow",
        "actor": ["https://remote.example/u/alice"],
        "object": ["https://localhost/u/test"]
    });
    app.store.save_activity(&follow, &[]).await.unwrap();

    let (status, _) = post_activity(
        &app,
        "test",
        &json!({"type": "Accept", "object": "https://remote.example/s/follow1"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let followers = app
        .store
        .get_stream("https://localhost/followers/test", None, 10)
        .await
        .unwrap();
    assert_eq!(followers.total, 1);

    let (_, summary) = get_json(&app, "/followers/test").await;
    assert_eq!(summary["totalItems"], 1);

    // Synthesized Update(followers) carries the post-change count.
    let outbox = app
        .store
        .get_stream("https://localhost/outbox/test", None, 20)
        .await
        .unwrap();
    let update = outbox
        .items
        .iter()
        .find(|a| a["type"] == "Update")
        .expect("followers update synthesized");
    assert_eq!(update["object"][0]["id"], "https://localhost/followers/test");
    assert_eq!(update["object"][0]["totalItems"], json!([1]));
}

#[tokio::test]
async fn update_merges_into_stored_object_and_embeds() {
    let (_dir, app) = app_with_users(&["test"]).await;
    let (_, created) = post_activity(
        &app,
        "test",
        &json!({
            "type": "Create",
            "object": {"type": "Note", "content": "before", "summary": "s"}
        }),
    )
    .await;
    let note_id = created["object"]["id"].as_str().unwrap().to_string();
    let create_id = created["id"].as_str().unwrap().to_string();

    let (status, returned) = post_activity(
        &app,
        "test",
        &json!({"type": "Update", "object": {"id": note_id, "content": "after"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // The outgoing activity carries the full post-merge object.
    assert_eq!(returned["object"]["content"], "after");
    assert_eq!(returned["object"]["summary"], "s");

    let stored = app.store.get_object(&note_id).await.unwrap().unwrap();
    assert_eq!(stored["content"], json!(["after"]));
    assert_eq!(stored["summary"], json!(["s"]));
    assert!(stored.get("updated").is_some());

    let create = app.store.get_activity(&create_id).await.unwrap().unwrap();
    assert_eq!(create["object"][0]["content"], json!(["after"]));
}

#[tokio::test]
async fn announce_keeps_object_as_iri() {
    let (_dir, app) = app_with_users(&["test"]).await;
    let (status, returned) = post_activity(
        &app,
        "test",
        &json!({
            "type": "Announce",
            "object": {"id": "https://remote.example/o/99", "type": "Note", "content": "theirs"}
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(returned["object"], "https://remote.example/o/99");

    let outbox = app
        .store
        .get_stream("https://localhost/outbox/test", None, 10)
        .await
        .unwrap();
    assert_eq!(outbox.items[0]["object"], json!(["https://remote.example/o/99"]));
}

#[tokio::test]
async fn add_and_remove_enforce_target_ownership() {
    let (_dir, app) = app_with_users(&["test"]).await;
    let (_, created) = post_activity(
        &app,
        "test",
        &json!({"type": "Create", "object": {"type": "Note", "content": "collectable"}}),
    )
    .await;
    let create_id = created["id"].as_str().unwrap().to_string();
    let shelf = "https://localhost/c/test/reading-list";

    let (status, body) = post_outbox(
        &app,
        "test",
        Some(ACTIVITY_JSON),
        &json!({"type": "Add", "object": create_id}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "missing target");

    let (status, _) = post_outbox(
        &app,
        "test",
        Some(ACTIVITY_JSON),
        &json!({"type": "Add", "object": create_id, "target": "https://localhost/c/other/shelf"}),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = post_activity(
        &app,
        "test",
        &json!({"type": "Add", "object": create_id, "target": shelf}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.store.get_stream(shelf, None, 10).await.unwrap().total, 1);

    let (status, _) = post_activity(
        &app,
        "test",
        &json!({"type": "Remove", "object": create_id, "target": shelf}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.store.get_stream(shelf, None, 10).await.unwrap().total, 0);
}

#[tokio::test]
async fn like_without_object_is_rejected() {
    let (_dir, app) = app_with_users(&["test"]).await;
    let (status, body) =
        post_outbox(&app, "test", Some(ACTIVITY_JSON), &json!({"type": "Like"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "missing object");
}

#[tokio::test]
async fn outbox_event_fires_after_side_effects() {
    let (_dir, app) = app_with_users(&["test"]).await;
    let mut events = app.events.subscribe();

    let (status, _) = post_activity(
        &app,
        "test",
        &json!({"type": "Create", "object": {"type": "Note", "content": "observable"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.actor, "https://localhost/u/test");
    assert_eq!(event.activity["type"], "Create");
    let object = event.object.unwrap();
    assert_eq!(object["content"], json!(["observable"]));

    // The event is ordered after visibility: the activity is in the store.
    let id = event.activity["id"].as_str().unwrap();
    assert!(app.store.get_activity(id).await.unwrap().is_some());
}

#[tokio::test]
async fn actor_document_never_leaks_key_material() {
    let (_dir, app) = app_with_users(&["test"]).await;
    let req = Request::builder()
        .method("GET")
        .uri("/u/test")
        .header(header::ACCEPT, ACTIVITY_JSON)
        .body(Body::empty())
        .unwrap();
    let (status, body) = request(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("publicKeyPem"));
    assert!(!body.contains("PRIVATE KEY"));

    let doc: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(doc["type"], "Person");
    assert_eq!(doc["publicKey"]["id"], "https://localhost/u/test#main-key");
}

#[tokio::test]
async fn tombstoned_object_dereferences_as_gone() {
    let (_dir, app) = app_with_users(&["test"]).await;
    let (_, created) = post_activity(
        &app,
        "test",
        &json!({"type": "Create", "object": {"type": "Note", "content": "soon gone"}}),
    )
    .await;
    let note_id = created["object"]["id"].as_str().unwrap().to_string();
    post_activity(&app, "test", &json!({"type": "Delete", "object": note_id})).await;

    let path = note_id.strip_prefix("https://localhost").unwrap().to_string();
    let (status, doc) = get_json(&app, &path).await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(doc["type"], "Tombstone");
}
