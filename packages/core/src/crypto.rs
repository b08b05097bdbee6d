//! Conversation-keyed authenticated encryption for private event content
//! (PIN submissions, precise locations, preimage shares).
//!
//! Scheme mirrors NIP-44 v2: `conversation_key = HKDF-Extract(salt="nip44-v2",
//! ikm=ECDH(their_pub, my_sec).x)`, then per-message keys are derived via
//! HKDF-Expand with a random 32-byte nonce, payload encrypted with ChaCha20
//! and authenticated with HMAC-SHA256 over `[nonce, ciphertext]`.

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::ChaCha20;
use hmac::{Hmac, Mac};
use rand::RngCore;
use secp256k1::ecdh::SharedSecret;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use sha2::Sha256;
use thiserror::Error;

const SALT: &[u8] = b"nip44-v2";
const NONCE_LEN: usize = 32;
const MAC_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("ciphertext too short")]
    Truncated,
    #[error("authentication failed")]
    BadMac,
    #[error("secp256k1 error: {0}")]
    Secp(#[from] secp256k1::Error),
}

type HmacSha256 = Hmac<Sha256>;

fn conversation_key(their_pub: &[u8; 32], my_sec: &SecretKey) -> [u8; 32] {
    let secp = Secp256k1::new();
    // x-only pubkeys are treated as even-parity full points for ECDH.
    let mut full = [0u8; 33];
    full[0] = 0x02;
    full[1..].copy_from_slice(their_pub);
    let their_full = PublicKey::from_slice(&full).expect("valid x-only point");
    let shared = SharedSecret::new(&their_full, my_sec);

    let mut mac = HmacSha256::new_from_slice(SALT).expect("hmac accepts any key length");
    mac.update(shared.as_ref());
    mac.finalize().into_bytes().into()
}

fn expand_keys(conversation_key: &[u8; 32], nonce: &[u8; NONCE_LEN]) -> ([u8; 32], [u8; 12], [u8; 32]) {
    let mut mac = HmacSha256::new_from_slice(conversation_key).expect("32-byte key");
    mac.update(nonce);
    let expanded: [u8; 32] = mac.finalize().into_bytes().into();

    let mut chacha_key = [0u8; 32];
    chacha_key.copy_from_slice(&expanded);
    let chacha_nonce = [0u8; 12];
    let hmac_key = expanded;
    (chacha_key, chacha_nonce, hmac_key)
}

/// Pad plaintext length to the next power-of-two-ish bucket so ciphertext
/// length doesn't leak exact message size (same bucketing NIP-44 uses).
fn padded_len(unpadded: usize) -> usize {
    if unpadded <= 32 {
        return 32;
    }
    let next_power = (unpadded - 1).next_power_of_two();
    let chunk = if next_power <= 256 { 32 } else { next_power / 8 };
    ((unpadded - 1) / chunk + 1) * chunk
}

pub fn encrypt(plaintext: &str, their_pub: &[u8; 32], my_sec: &SecretKey) -> Result<String, CryptoError> {
    let key = conversation_key(their_pub, my_sec);

    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let (chacha_key, chacha_nonce, hmac_key) = expand_keys(&key, &nonce);

    let raw = plaintext.as_bytes();
    let target_len = padded_len(raw.len());
    let mut padded = Vec::with_capacity(2 + target_len);
    padded.extend_from_slice(&(raw.len() as u16).to_be_bytes());
    padded.extend_from_slice(raw);
    padded.resize(2 + target_len, 0);

    let mut cipher = ChaCha20::new((&chacha_key).into(), (&chacha_nonce).into());
    cipher.apply_keystream(&mut padded);

    let mut mac = HmacSha256::new_from_slice(&hmac_key).expect("32-byte key");
    mac.update(&nonce);
    mac.update(&padded);
    let tag = mac.finalize().into_bytes();

    let mut out = Vec::with_capacity(NONCE_LEN + padded.len() + MAC_LEN);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&padded);
    out.extend_from_slice(&tag);
    Ok(base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        out,
    ))
}

pub fn decrypt(ciphertext: &str, their_pub: &[u8; 32], my_sec: &SecretKey) -> Result<String, CryptoError> {
    let raw = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, ciphertext)
        .map_err(|_| CryptoError::Truncated)?;
    if raw.len() < NONCE_LEN + 2 + MAC_LEN {
        return Err(CryptoError::Truncated);
    }

    let (nonce, rest) = raw.split_at(NONCE_LEN);
    let (body, tag) = rest.split_at(rest.len() - MAC_LEN);

    let key = conversation_key(their_pub, my_sec);
    let mut nonce_arr = [0u8; NONCE_LEN];
    nonce_arr.copy_from_slice(nonce);
    let (chacha_key, chacha_nonce, hmac_key) = expand_keys(&key, &nonce_arr);

    let mut mac = HmacSha256::new_from_slice(&hmac_key).expect("32-byte key");
    mac.update(&nonce_arr);
    mac.update(body);
    mac.verify_slice(tag).map_err(|_| CryptoError::BadMac)?;

    let mut body = body.to_vec();
    let mut cipher = ChaCha20::new((&chacha_key).into(), (&chacha_nonce).into());
    cipher.apply_keystream(&mut body);

    let len = u16::from_be_bytes([body[0], body[1]]) as usize;
    let plaintext = &body[2..2 + len];
    Ok(String::from_utf8_lossy(plaintext).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn keys() -> (SecretKey, [u8; 32], SecretKey, [u8; 32]) {
        let secp = Secp256k1::new();
        let (sk_a, pk_a) = secp.generate_keypair(&mut OsRng);
        let (sk_b, pk_b) = secp.generate_keypair(&mut OsRng);
        (sk_a, pk_a.x_only_public_key().0.serialize(), sk_b, pk_b.x_only_public_key().0.serialize())
    }

    #[test]
    fn encrypt_then_decrypt_round_trips() {
        let (sk_a, pub_a, sk_b, pub_b) = keys();
        let ciphertext = encrypt("1234", &pub_b, &sk_a).unwrap();
        let plaintext = decrypt(&ciphertext, &pub_a, &sk_b).unwrap();
        assert_eq!(plaintext, "1234");
    }

    #[test]
    fn tampered_ciphertext_fails_mac() {
        let (sk_a, pub_a, sk_b, pub_b) = keys();
        let mut ciphertext = encrypt("pickup at 5th & main", &pub_b, &sk_a).unwrap();
        ciphertext.push('A');
        assert!(decrypt(&ciphertext, &pub_a, &sk_b).is_err());
    }

    #[test]
    fn padded_len_buckets_short_messages() {
        assert_eq!(padded_len(1), 32);
        assert_eq!(padded_len(4), 32);
    }
}
