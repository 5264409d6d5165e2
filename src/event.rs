//! NIP-98 authentication event model and canonical serialization.

use secp256k1::{Keypair, Message, Secp256k1};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Event kind reserved for HTTP authentication.
pub const HTTP_AUTH_KIND: u32 = 27235;

/// Wrapper for a Nostr tag expressed as an array of strings.
///
/// The first element names the tag and the following elements hold data. An
/// authentication event carries at least:
///
/// - `u` – the absolute URL of the request being authorized
/// - `method` – the HTTP method of that request
///
/// Tags are kept verbatim so the canonical serialization reproduces exactly
/// what the client signed, including tags this service does not interpret.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag(pub Vec<String>);

impl Tag {
    /// Build a two-element `[name, value]` tag.
    pub fn pair(name: &str, value: &str) -> Self {
        Tag(vec![name.to_string(), value.to_string()])
    }

    /// Tag name, if the tag is non-empty.
    pub fn name(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    /// First data element, if present.
    pub fn value(&self) -> Option<&str> {
        self.0.get(1).map(String::as_str)
    }
}

/// Signed event a client presents as proof of key control for one request.
///
/// ```json
/// {
///   "id": "5c83...",
///   "pubkey": "79be...",
///   "created_at": 1700000000,
///   "kind": 27235,
///   "tags": [["u", "https://api.example.com/v1/tracks/nostr"], ["method", "POST"]],
///   "content": "",
///   "sig": "a1b2..."
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthEvent {
    /// Lowercase hex SHA-256 of the canonical serialization.
    pub id: String,
    /// Author x-only public key (hex).
    pub pubkey: String,
    /// Unix timestamp of creation.
    pub created_at: i64,
    /// Kind number; [`HTTP_AUTH_KIND`] for authentication events.
    pub kind: u32,
    /// Ordered tags, `u` and `method` among them.
    #[serde(default)]
    pub tags: Vec<Tag>,
    /// Event content, usually empty.
    #[serde(default)]
    pub content: String,
    /// Schnorr signature over the event hash (hex).
    pub sig: String,
}

impl AuthEvent {
    /// Canonical `[0, pubkey, created_at, kind, tags, content]` encoding as
    /// compact JSON.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let arr = serde_json::json!([
            0,
            self.pubkey,
            self.created_at,
            self.kind,
            self.tags,
            self.content
        ]);
        // Serializing a `Value` built from strings and integers cannot fail.
        serde_json::to_vec(&arr).unwrap_or_default()
    }

    /// SHA-256 over [`AuthEvent::canonical_bytes`].
    pub fn hash(&self) -> [u8; 32] {
        Sha256::digest(self.canonical_bytes()).into()
    }

    /// Value of the first tag named `name` that carries a value. Tags with
    /// only a name are skipped.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find_map(|t| (t.name() == Some(name)).then(|| t.value()).flatten())
    }

    /// Build and sign an authentication event for `method` on `url`.
    pub fn sign_http_auth(keypair: &Keypair, url: &str, method: &str, created_at: i64) -> Self {
        Self::sign(
            keypair,
            HTTP_AUTH_KIND,
            created_at,
            vec![Tag::pair("u", url), Tag::pair("method", method)],
            String::new(),
        )
    }

    /// Fill in `pubkey`, `id` and `sig` for the given fields.
    pub fn sign(
        keypair: &Keypair,
        kind: u32,
        created_at: i64,
        tags: Vec<Tag>,
        content: String,
    ) -> Self {
        let secp = Secp256k1::signing_only();
        let mut ev = AuthEvent {
            id: String::new(),
            pubkey: hex::encode(keypair.x_only_public_key().0.serialize()),
            created_at,
            kind,
            tags,
            content,
            sig: String::new(),
        };
        let hash = ev.hash();
        ev.id = hex::encode(hash);
        let msg = Message::from_digest(hash);
        let sig = secp.sign_schnorr_no_aux_rand(&msg, keypair);
        ev.sig = hex::encode(sig.as_ref());
        ev
    }
}
