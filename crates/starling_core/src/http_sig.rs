/*
 * SPDX-FileCopyrightText: 2026 Starling Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! HTTP Signatures (draft-cavage) over rsa-sha256, the dialect strict
//! fediverse implementations verify.
//!
//! Outbound requests are signed by a [`RequestSigner`] held per local actor;
//! the canonical string covers `(request-target) host date digest
//! content-type`. [`SignatureHeader`] is the parsed inbound/captured form and
//! re-derives the canonical string from the request it arrived on; the
//! integration tests use it to check what actually went over the wire.

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use http::{HeaderMap, Method, Uri};
use rsa::{
    pkcs1v15::{SigningKey, VerifyingKey},
    pkcs8::{DecodePrivateKey, DecodePublicKey},
    signature::{RandomizedSigner, SignatureEncoding, Verifier},
    RsaPrivateKey, RsaPublicKey,
};
use sha2::{Digest, Sha256};

pub const ALGORITHM: &str = "rsa-sha256";

/// What every outbound request covers: the minimum strict peers require,
/// plus the content type.
pub const COVERED_HEADERS: &[&str] =
    &["(request-target)", "host", "date", "digest", "content-type"];

const REQUEST_TARGET: &str = "(request-target)";

/// Signs outbound requests on behalf of one local actor.
pub struct RequestSigner {
    key_id: String,
    signing_key: SigningKey<Sha256>,
}

impl RequestSigner {
    pub fn from_pem(key_id: impl Into<String>, private_key_pem: &str) -> Result<Self> {
        let private_key =
            RsaPrivateKey::from_pkcs8_pem(private_key_pem).context("parse private key pem")?;
        Ok(Self {
            key_id: key_id.into(),
            signing_key: SigningKey::new(private_key),
        })
    }

    /// Fill `Date`, `Digest`, and `Host` when absent, then attach the
    /// `Signature` header covering [`COVERED_HEADERS`]. The caller supplies
    /// `Content-Type`; the body bytes must be exactly what goes on the wire.
    pub fn sign(
        &self,
        method: &Method,
        uri: &Uri,
        headers: &mut HeaderMap,
        body: &[u8],
    ) -> Result<()> {
        if !headers.contains_key("Date") {
            let date = httpdate::fmt_http_date(std::time::SystemTime::now());
            headers.insert("Date", date.parse().context("set Date")?);
        }
        if !headers.contains_key("Digest") {
            headers.insert("Digest", body_digest(body).parse().context("set Digest")?);
        }
        if !headers.contains_key("Host") {
            let authority = uri
                .authority()
                .ok_or_else(|| anyhow!("request url has no host"))?;
            headers.insert("Host", authority.as_str().parse().context("set Host")?);
        }

        let covered: Vec<String> = COVERED_HEADERS.iter().map(|h| h.to_string()).collect();
        let canonical = canonical_string(method, uri, headers, &covered)?;
        let mut rng = rand::rngs::OsRng;
        let signature = self.signing_key.sign_with_rng(&mut rng, canonical.as_bytes());

        let header = format!(
            "keyId=\"{}\",algorithm=\"{ALGORITHM}\",headers=\"{}\",signature=\"{}\"",
            self.key_id,
            covered.join(" "),
            B64.encode(signature.to_bytes()),
        );
        headers.insert("Signature", header.parse().context("set Signature")?);
        Ok(())
    }
}

/// A parsed `Signature` header:
/// `keyId="...",algorithm="rsa-sha256",headers="(request-target) host date",signature="base64"`.
#[derive(Debug)]
pub struct SignatureHeader {
    pub key_id: String,
    pub algorithm: Option<String>,
    pub covered: Vec<String>,
    signature: Vec<u8>,
}

impl SignatureHeader {
    pub fn parse(raw: &str) -> Result<Self> {
        let key_id = param(raw, "keyId").ok_or_else(|| anyhow!("Signature missing keyId"))?;
        let signature_b64 =
            param(raw, "signature").ok_or_else(|| anyhow!("Signature missing signature"))?;
        let covered = param(raw, "headers").unwrap_or("date");
        Ok(Self {
            key_id: key_id.to_string(),
            algorithm: param(raw, "algorithm").map(str::to_string),
            covered: covered
                .split_whitespace()
                .map(str::to_ascii_lowercase)
                .collect(),
            signature: B64
                .decode(signature_b64.as_bytes())
                .context("decode signature")?,
        })
    }

    pub fn covers(&self, field: &str) -> bool {
        self.covered.iter().any(|h| h == field)
    }

    /// Check the signature against the request it was captured from.
    pub fn verify(
        &self,
        public_key_pem: &str,
        method: &Method,
        uri: &Uri,
        headers: &HeaderMap,
    ) -> Result<()> {
        let public_key =
            RsaPublicKey::from_public_key_pem(public_key_pem).context("parse public key pem")?;
        let canonical = canonical_string(method, uri, headers, &self.covered)?;
        let signature = rsa::pkcs1v15::Signature::try_from(self.signature.as_slice())
            .context("invalid rsa signature bytes")?;
        VerifyingKey::<Sha256>::new(public_key)
            .verify(canonical.as_bytes(), &signature)
            .context("signature verify failed")
    }
}

/// One `key="value"` parameter out of the comma-separated header.
fn param<'a>(raw: &'a str, key: &str) -> Option<&'a str> {
    raw.split(',').find_map(|part| {
        let (k, v) = part.trim().split_once('=')?;
        (k.trim() == key).then(|| v.trim().trim_matches('"'))
    })
}

/// One line per covered field, in covered order, newline-joined.
fn canonical_string(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    covered: &[String],
) -> Result<String> {
    let lines = covered
        .iter()
        .map(|field| canonical_line(field, method, uri, headers))
        .collect::<Result<Vec<_>>>()?;
    Ok(lines.join("\n"))
}

fn canonical_line(
    field: &str,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
) -> Result<String> {
    if field == REQUEST_TARGET {
        let query = uri.query().map(|q| format!("?{q}")).unwrap_or_default();
        return Ok(format!(
            "{REQUEST_TARGET}: {} {}{query}",
            method.as_str().to_ascii_lowercase(),
            uri.path(),
        ));
    }
    let value = headers
        .get(field)
        .ok_or_else(|| anyhow!("missing signed header: {field}"))?
        .to_str()
        .with_context(|| format!("invalid header value for {field}"))?;
    Ok(format!("{field}: {}", value.trim()))
}

/// `SHA-256=<base64>` over the exact body bytes.
pub fn body_digest(body: &[u8]) -> String {
    format!("SHA-256={}", B64.encode(Sha256::digest(body)))
}

/// Check a request's `Digest` header against the body it carried.
pub fn verify_digest(headers: &HeaderMap, body: &[u8]) -> Result<()> {
    let digest = headers
        .get("Digest")
        .ok_or_else(|| anyhow!("missing Digest header"))?
        .to_str()
        .context("Digest header not utf8")?;
    let Some((alg, value)) = digest.split_once('=') else {
        bail!("invalid Digest header");
    };
    if !alg.trim().eq_ignore_ascii_case("SHA-256") {
        bail!("unsupported digest alg: {alg}");
    }
    let expected = B64.decode(value.trim().as_bytes()).context("decode digest")?;
    if expected.as_slice() != Sha256::digest(body).as_slice() {
        bail!("digest mismatch");
    }
    Ok(())
}
