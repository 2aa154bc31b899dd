/*
 * SPDX-FileCopyrightText: 2026 Starling Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! One signed POST per recipient inbox. The queue decides what happens next
//! from the classified outcome; this module never retries on its own.

use http::{HeaderMap, Method, Uri};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;

use starling_protocol::vocab::MEDIA_TYPE_ACTIVITY;

use crate::http_sig::RequestSigner;

#[derive(Debug)]
pub enum DeliveryOutcome {
    Delivered,
    /// Transient: 408/429/5xx/transport. Requeue with backoff.
    Retry(String),
    /// Permanent: any other 4xx, or a request we cannot even sign.
    Fatal(String),
}

#[derive(Clone)]
pub struct DeliverySender {
    http: reqwest::Client,
}

impl DeliverySender {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    pub async fn deliver(
        &self,
        private_key_pem: &str,
        key_id: &str,
        inbox_url: &str,
        body: &[u8],
    ) -> DeliveryOutcome {
        let uri: Uri = match inbox_url.parse() {
            Ok(u) => u,
            Err(e) => return DeliveryOutcome::Fatal(format!("bad inbox url: {e}")),
        };

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, MEDIA_TYPE_ACTIVITY.parse().expect("static header"));
        headers.insert(CONTENT_TYPE, MEDIA_TYPE_ACTIVITY.parse().expect("static header"));

        let signer = match RequestSigner::from_pem(key_id, private_key_pem) {
            Ok(s) => s,
            Err(e) => return DeliveryOutcome::Fatal(format!("signing key: {e:#}")),
        };
        if let Err(e) = signer.sign(&Method::POST, &uri, &mut headers, body) {
            return DeliveryOutcome::Fatal(format!("sign request: {e:#}"));
        }

        let mut req = self.http.post(inbox_url);
        for (k, v) in headers.iter() {
            req = req.header(k.as_str(), v.to_str().unwrap_or_default());
        }

        match req.body(body.to_vec()).send().await {
            Ok(resp) => classify_status(resp.status()),
            Err(e) => DeliveryOutcome::Retry(format!("transport: {e}")),
        }
    }
}

pub fn classify_status(status: StatusCode) -> DeliveryOutcome {
    if status.is_success() {
        return DeliveryOutcome::Delivered;
    }
    match status.as_u16() {
        408 | 429 => DeliveryOutcome::Retry(format!("status {status}")),
        400..=499 => DeliveryOutcome::Fatal(format!("status {status}")),
        _ => DeliveryOutcome::Retry(format!("status {status}")),
    }
}
