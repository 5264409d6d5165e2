//! Durable records linking Nostr pubkeys to accounts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Link between one pubkey and the account currently (or last) owning it.
///
/// Records are never deleted; unlinking clears `active`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdentityLink {
    /// Hex x-only public key; primary key.
    pub pubkey: String,
    /// Owning account.
    pub account_id: String,
    /// Whether `account_id` currently owns the pubkey.
    pub active: bool,
    /// First time this pubkey was linked to any account.
    pub created_at: DateTime<Utc>,
    /// Most recent link (or re-link) time.
    pub linked_at: DateTime<Utc>,
    /// Last successful authentication with this pubkey.
    pub last_used_at: DateTime<Utc>,
}

impl IdentityLink {
    /// Shortened `first8...last8` form for display.
    pub fn display_pubkey(&self) -> String {
        display_pubkey(&self.pubkey)
    }
}

/// Account holding the set of pubkeys it actively owns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Account {
    /// Account identifier issued by the centralized identity provider.
    pub account_id: String,
    /// Pubkeys whose link is active under this account, in link order.
    pub active_pubkeys: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(account_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            account_id: account_id.to_string(),
            active_pubkeys: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add `pubkey` unless already present.
    pub fn add_pubkey(&mut self, pubkey: &str) {
        if !self.active_pubkeys.iter().any(|p| p == pubkey) {
            self.active_pubkeys.push(pubkey.to_string());
        }
    }

    /// Remove every occurrence of `pubkey`.
    pub fn remove_pubkey(&mut self, pubkey: &str) {
        self.active_pubkeys.retain(|p| p != pubkey);
    }
}

/// Shorten a pubkey to `first8...last8`; short keys are returned unchanged.
pub fn display_pubkey(pubkey: &str) -> String {
    if pubkey.len() <= 16 || !pubkey.is_ascii() {
        return pubkey.to_string();
    }
    format!("{}...{}", &pubkey[..8], &pubkey[pubkey.len() - 8..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_pubkey_shortens_long_keys() {
        let pk = format!("abcdef01{}23456789", "0".repeat(48));
        assert_eq!(display_pubkey(&pk), "abcdef01...23456789");
        assert_eq!(display_pubkey("short"), "short");
        assert_eq!(display_pubkey(&"a".repeat(16)), "a".repeat(16));
    }

    #[test]
    fn account_pubkeys_behave_as_a_set() {
        let mut acct = Account::new("acct", Utc::now());
        acct.add_pubkey("p1");
        acct.add_pubkey("p2");
        acct.add_pubkey("p1");
        assert_eq!(acct.active_pubkeys, vec!["p1", "p2"]);
        acct.remove_pubkey("p1");
        assert_eq!(acct.active_pubkeys, vec!["p2"]);
        acct.remove_pubkey("missing");
        assert_eq!(acct.active_pubkeys, vec!["p2"]);
    }
}
