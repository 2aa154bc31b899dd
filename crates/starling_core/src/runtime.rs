/*
 * SPDX-FileCopyrightText: 2026 Starling Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Wiring: open the store, provision local actors, spawn the delivery
//! worker, serve the HTTP surface.

use anyhow::{Context, Result};
use axum::{body::Body, http::Request, routing::any, Router};
use serde_json::{json, Value};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::info;

use starling_protocol::normalize::normalize;

use crate::ap::{handle_request, ApState};
use crate::audience::AudienceResolver;
use crate::collections::Collections;
use crate::config::ServerConfig;
use crate::delivery::DeliverySender;
use crate::delivery_queue::{DeliveryQueue, QueueSettings};
use crate::events::EventBus;
use crate::iri::IriScheme;
use crate::keys::generate_actor_keys;
use crate::outbox::Outbox;
use crate::resolver::ActorResolver;
use crate::store::Store;

pub struct App {
    pub state: Arc<ApState>,
    pub events: EventBus,
    pub queue: DeliveryQueue,
    pub store: Store,
    pub sender: DeliverySender,
    pub settings: QueueSettings,
}

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().expect("static directive")),
        )
        .try_init()
        .ok();
}

pub async fn build(cfg: &ServerConfig) -> Result<App> {
    std::fs::create_dir_all(&cfg.data_dir)
        .with_context(|| format!("create data dir: {}", cfg.data_dir.display()))?;
    let db_path = cfg.data_dir.join("starling.db");
    let store = Store::open(&db_path)?;
    let queue = DeliveryQueue::open(&db_path)?;
    let iri = IriScheme::new(&cfg.public_base_url);

    let timeout = cfg.http_timeout_secs.unwrap_or(30).clamp(5, 120);
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout))
        .build()
        .context("build http client")?;

    for name in &cfg.users {
        if store.get_object(&iri.actor(name)).await?.is_none() {
            provision_actor(&store, &iri, name).await?;
            info!("provisioned local actor: {name}");
        }
    }

    let resolver = ActorResolver::new(http.clone(), store.clone(), iri.clone());
    let collections = Collections::new(store.clone(), iri.clone());
    let audience = AudienceResolver::new(resolver.clone(), collections.clone(), iri.clone());
    let events = EventBus::default();
    let outbox = Outbox::new(
        store.clone(),
        resolver,
        audience,
        collections.clone(),
        queue.clone(),
        events.clone(),
        iri.clone(),
    );

    let state = ApState {
        domain: host_of(&cfg.public_base_url),
        iri,
        store: store.clone(),
        outbox,
        collections,
        max_body_bytes: cfg.max_body_bytes(),
    };

    Ok(App {
        state: Arc::new(state),
        events,
        queue,
        store,
        sender: DeliverySender::new(http),
        settings: cfg.queue_settings(),
    })
}

pub fn start_delivery_worker(app: &App, shutdown: watch::Receiver<bool>) {
    app.queue
        .start_worker(shutdown, app.store.clone(), app.sender.clone(), app.settings);
}

pub async fn run(cfg: ServerConfig, shutdown: watch::Receiver<bool>) -> Result<()> {
    let app = build(&cfg).await?;
    start_delivery_worker(&app, shutdown.clone());

    let state = app.state.clone();
    let router = Router::new()
        .fallback(any(move |req: Request<Body>| {
            let state = state.clone();
            async move { handle_request(&state, req).await }
        }))
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = cfg.bind.parse().context("parse bind")?;
    let listener = tokio::net::TcpListener::bind(addr).await.context("bind")?;
    info!("listening on {addr} as {}", cfg.public_base_url);

    let mut shutdown = shutdown;
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .context("serve")?;
    Ok(())
}

/// A fresh local actor: a Person document in the store plus a keypair row.
/// The private key never enters the document.
pub async fn provision_actor(store: &Store, iri: &IriScheme, name: &str) -> Result<Value> {
    let keys = generate_actor_keys()?;
    let actor_iri = iri.actor(name);
    let doc = json!({
        "id": actor_iri,
        "type": "Person",
        "preferredUsername": name,
        "inbox": iri.inbox(name),
        "outbox": iri.outbox(name),
        "followers": iri.followers(name),
        "following": iri.following(name),
        "liked": iri.liked(name),
        "endpoints": {"sharedInbox": iri.shared_inbox()},
        "publicKey": {
            "id": iri.key_id(name),
            "owner": actor_iri,
            "publicKeyPem": keys.public_key_pem,
        },
    });
    let doc = normalize(&doc, false).context("normalize actor document")?;
    store.save_object(&doc).await?;
    store.save_actor_keys(&actor_iri, &keys).await?;
    Ok(doc)
}

fn host_of(base_url: &str) -> String {
    base_url
        .trim_end_matches('/')
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(base_url)
        .split('/')
        .next()
        .unwrap_or("")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("https://localhost/"), "localhost");
        assert_eq!(host_of("https://social.example:8443"), "social.example:8443");
        assert_eq!(host_of("social.example"), "social.example");
    }
}
