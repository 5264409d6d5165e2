//! Nostr HTTP authentication and pubkey-to-account linking.
//!
//! Requests prove control of a Nostr key with a signed kind-27235 event in
//! the `Authorization: Nostr <base64>` header. Verified pubkeys are resolved
//! to accounts through durable [`model::IdentityLink`] records, which the
//! [`link::IdentityLinkService`] creates, transfers and deactivates.

pub mod auth;
pub mod binding;
pub mod config;
pub mod context;
pub mod directory;
pub mod dual;
pub mod error;
pub mod event;
pub mod extract;
pub mod header;
pub mod link;
pub mod model;
pub mod server;
pub mod store;
pub mod token;
pub mod touch;
pub mod verify;
