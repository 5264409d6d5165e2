//! Cryptographic integrity checks for authentication events.

use secp256k1::{schnorr::Signature, Message, Secp256k1, XOnlyPublicKey};
use thiserror::Error;

use crate::event::AuthEvent;

/// Reasons an event fails integrity verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("ID mismatch")]
    IdMismatch,
    #[error("bad pubkey")]
    BadPubkey,
    #[error("bad signature encoding")]
    BadSignatureEncoding,
    #[error("signature verification failed")]
    SignatureVerificationFailed,
}

/// Verify an event's ID and Schnorr signature.
///
/// The ID and both encodings are checked before the curve operation. On
/// success the verified event hash is returned.
pub fn verify_event(ev: &AuthEvent) -> Result<[u8; 32], VerifyError> {
    let hash = ev.hash();
    if hex::encode(hash) != ev.id {
        return Err(VerifyError::IdMismatch);
    }
    let pk = parse_pubkey(&ev.pubkey)?;
    let sig = decode_fixed::<64>(&ev.sig)
        .and_then(|bytes| Signature::from_slice(&bytes).ok())
        .ok_or(VerifyError::BadSignatureEncoding)?;
    let secp = Secp256k1::verification_only();
    let msg = Message::from_digest(hash);
    secp.verify_schnorr(&sig, &msg, &pk)
        .map_err(|_| VerifyError::SignatureVerificationFailed)?;
    Ok(hash)
}

/// Decode a hex x-only public key and check it lies on the curve.
pub fn parse_pubkey(hex_key: &str) -> Result<XOnlyPublicKey, VerifyError> {
    decode_fixed::<32>(hex_key)
        .and_then(|bytes| XOnlyPublicKey::from_slice(&bytes).ok())
        .ok_or(VerifyError::BadPubkey)
}

fn decode_fixed<const N: usize>(s: &str) -> Option<[u8; N]> {
    let mut out = [0u8; N];
    hex::decode_to_slice(s, &mut out).ok()?;
    Some(out)
}
