/*
 * SPDX-FileCopyrightText: 2026 Starling Contributors
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use anyhow::{Context, Result};
use rand::rngs::OsRng;
use rsa::{
    pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding},
    RsaPrivateKey, RsaPublicKey,
};

#[derive(Clone)]
pub struct ActorKeys {
    pub public_key_pem: String,
    pub private_key_pem: String,
}

/// Fresh RSA-2048 signing identity for a local actor. The private half lives
/// only in the key table, never inside a stored document.
pub fn generate_actor_keys() -> Result<ActorKeys> {
    let mut rng = OsRng;
    let private_key = RsaPrivateKey::new(&mut rng, 2048).context("generate rsa key")?;
    let private_key_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .context("encode private key pem")?
        .to_string();
    let public_key_pem = RsaPublicKey::from(&private_key)
        .to_public_key_pem(LineEnding::LF)
        .context("encode public key pem")?;
    Ok(ActorKeys {
        public_key_pem,
        private_key_pem,
    })
}
