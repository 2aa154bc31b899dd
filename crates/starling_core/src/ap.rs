/*
 * SPDX-FileCopyrightText: 2026 Starling Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! The ActivityPub HTTP surface: actor documents, webfinger, the outbox
//! (GET/POST), collection reads, and object/activity dereference.

use axum::{
    body::Body,
    http::{header, HeaderValue, Request, Response, StatusCode},
};
use serde::Serialize;
use tracing::error;

use starling_protocol::normalize::{externalize, type_of};

use crate::collections::Collections;
use crate::error::OutboxError;
use crate::iri::IriScheme;
use crate::outbox::Outbox;
use crate::store::Store;

#[derive(Clone)]
pub struct ApState {
    pub iri: IriScheme,
    pub domain: String,
    pub store: Store,
    pub outbox: Outbox,
    pub collections: Collections,
    pub max_body_bytes: usize,
}

#[derive(Serialize)]
struct Webfinger {
    subject: String,
    links: Vec<WebfingerLink>,
}

#[derive(Serialize)]
struct WebfingerLink {
    rel: String,
    #[serde(rename = "type")]
    ty: String,
    href: String,
}

pub async fn handle_request(state: &ApState, req: Request<Body>) -> Response<Body> {
    let path = req.uri().path().to_string();
    let accept = accept_activity(req.headers());
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    match (req.method().as_str(), segments.as_slice()) {
        ("GET", [".well-known", "webfinger"]) => {
            webfinger(state, req.uri().query().unwrap_or("")).await
        }
        ("GET", ["u", name]) => actor_get(state, name, accept).await,
        ("POST", ["outbox", name]) => {
            let name = name.to_string();
            outbox_post(state, &name, req, accept).await
        }
        ("GET", ["outbox", name]) => {
            let col = state.iri.outbox(name);
            collection_get(state, &col, req.uri().query().unwrap_or(""), accept).await
        }
        ("GET", ["followers", name]) => {
            let col = state.iri.followers(name);
            collection_get(state, &col, req.uri().query().unwrap_or(""), accept).await
        }
        ("GET", ["following", name]) => {
            let col = state.iri.following(name);
            collection_get(state, &col, req.uri().query().unwrap_or(""), accept).await
        }
        ("GET", ["liked", name]) => {
            let col = state.iri.liked(name);
            collection_get(state, &col, req.uri().query().unwrap_or(""), accept).await
        }
        ("GET", ["s", id]) => activity_get(state, id, accept).await,
        ("GET", ["o", id]) => object_get(state, id, accept).await,
        _ => simple(StatusCode::NOT_FOUND, "not found"),
    }
}

async fn actor_get(state: &ApState, name: &str, accept: Option<ActivityAccept>) -> Response<Body> {
    match state.store.get_object(&state.iri.actor(name)).await {
        Ok(Some(actor)) => json_activity(StatusCode::OK, accept, &externalize(&actor)),
        Ok(None) => simple(
            StatusCode::NOT_FOUND,
            &format!("'{name}' not found on this instance"),
        ),
        Err(e) => internal_error(e),
    }
}

async fn outbox_post(
    state: &ApState,
    name: &str,
    req: Request<Body>,
    accept: Option<ActivityAccept>,
) -> Response<Body> {
    let (parts, body) = req.into_parts();
    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body_bytes = match axum::body::to_bytes(body, state.max_body_bytes).await {
        Ok(b) => b,
        Err(_) => return simple(StatusCode::BAD_REQUEST, "invalid body"),
    };

    // Run the pipeline on its own task: a dropped client connection must not
    // cancel side effects mid-flight.
    let outbox = state.outbox.clone();
    let name = name.to_string();
    let submitted = tokio::spawn(async move {
        outbox
            .submit(&name, content_type.as_deref(), &body_bytes)
            .await
    })
    .await;

    match submitted {
        Ok(Ok(activity)) => json_activity(StatusCode::OK, accept, &externalize(&activity)),
        Ok(Err(e)) => error_response(e),
        Err(e) => internal_error(e.into()),
    }
}

async fn collection_get(
    state: &ApState,
    collection_iri: &str,
    query: &str,
    accept: Option<ActivityAccept>,
) -> Response<Body> {
    let page_param = query
        .split('&')
        .find(|p| p.starts_with("page="))
        .and_then(|p| p.split_once('='))
        .map(|(_, v)| v);

    match page_param {
        None => match state.collections.summary(collection_iri).await {
            Ok(summary) => json_activity(StatusCode::OK, accept, &summary),
            Err(e) => internal_error(e),
        },
        Some(v) => {
            // `page=true` is the first page; a numeric value resumes strictly
            // after that cursor.
            let cursor = v.parse::<i64>().ok();
            match state.collections.page(collection_iri, cursor).await {
                Ok(page) => json_activity(StatusCode::OK, accept, &page),
                Err(e) => internal_error(e),
            }
        }
    }
}

async fn activity_get(state: &ApState, id: &str, accept: Option<ActivityAccept>) -> Response<Body> {
    match state.store.get_activity(&state.iri.activity_iri(id)).await {
        Ok(Some(activity)) => json_activity(StatusCode::OK, accept, &externalize(&activity)),
        Ok(None) => simple(StatusCode::NOT_FOUND, "not found"),
        Err(e) => internal_error(e),
    }
}

async fn object_get(state: &ApState, id: &str, accept: Option<ActivityAccept>) -> Response<Body> {
    match state.store.get_object(&state.iri.object_iri(id)).await {
        Ok(Some(object)) => {
            let status = if type_of(&object) == Some("Tombstone") {
                StatusCode::GONE
            } else {
                StatusCode::OK
            };
            json_activity(status, accept, &externalize(&object))
        }
        Ok(None) => simple(StatusCode::NOT_FOUND, "not found"),
        Err(e) => internal_error(e),
    }
}

async fn webfinger(state: &ApState, query: &str) -> Response<Body> {
    let resource = query
        .split('&')
        .find(|p| p.starts_with("resource="))
        .and_then(|p| p.split_once('='))
        .map(|(_, v)| v.replace("%3A", ":").replace("%40", "@"))
        .unwrap_or_default();

    let Some(acct) = resource.strip_prefix("acct:") else {
        return simple(StatusCode::BAD_REQUEST, "missing resource");
    };
    let Some((name, domain)) = acct.split_once('@') else {
        return simple(StatusCode::BAD_REQUEST, "invalid resource");
    };
    if domain != state.domain {
        return simple(StatusCode::NOT_FOUND, "unknown domain");
    }
    match state.store.get_object(&state.iri.actor(name)).await {
        Ok(Some(_)) => jrd(
            StatusCode::OK,
            &Webfinger {
                subject: format!("acct:{name}@{domain}"),
                links: vec![WebfingerLink {
                    rel: "self".to_string(),
                    ty: "application/activity+json".to_string(),
                    href: state.iri.actor(name),
                }],
            },
        ),
        Ok(None) => simple(
            StatusCode::NOT_FOUND,
            &format!("'{name}' not found on this instance"),
        ),
        Err(e) => internal_error(e),
    }
}

fn error_response(e: OutboxError) -> Response<Body> {
    if let OutboxError::Internal(inner) = &e {
        error!("outbox request failed: {inner:#}");
    }
    simple(e.status(), &e.to_string())
}

fn internal_error(e: anyhow::Error) -> Response<Body> {
    error!("request failed: {e:#}");
    simple(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

#[derive(Clone, Copy)]
enum ActivityAccept {
    ActivityJson,
    LdJson,
}

fn accept_activity(headers: &http::HeaderMap) -> Option<ActivityAccept> {
    let accept = headers
        .get(header::ACCEPT)?
        .to_str()
        .ok()?
        .to_ascii_lowercase();
    if accept.contains("application/ld+json") {
        Some(ActivityAccept::LdJson)
    } else if accept.contains("application/activity+json")
        || accept.contains("application/json")
        || accept.contains("*/*")
    {
        Some(ActivityAccept::ActivityJson)
    } else {
        None
    }
}

fn json_activity<T: Serialize>(
    status: StatusCode,
    accept: Option<ActivityAccept>,
    value: &T,
) -> Response<Body> {
    let body = serde_json::to_vec(value).unwrap_or_default();
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = status;
    let headers = resp.headers_mut();
    let ct = match accept.unwrap_or(ActivityAccept::ActivityJson) {
        ActivityAccept::ActivityJson => "application/activity+json; charset=utf-8",
        ActivityAccept::LdJson => {
            "application/ld+json; profile=\"https://www.w3.org/ns/activitystreams\"; charset=utf-8"
        }
    };
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(ct));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    resp
}

fn jrd<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    let body = serde_json::to_vec(value).unwrap_or_default();
    let mut resp = Response::new(Body::from(body));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/jrd+json; charset=utf-8"),
    );
    resp
}

fn simple(status: StatusCode, msg: &str) -> Response<Body> {
    let mut resp = Response::new(Body::from(msg.to_string()));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}
