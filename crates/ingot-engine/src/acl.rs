//! The access-control authority.
//!
//! Permissions are granted to hostmask patterns, scoped to a network and
//! optionally to a single channel. A caller holds a permission when any
//! stored entry's pattern matches their hostmask on the right network, for
//! the requested permission or the blanket `"admin"` permission, at the
//! right scope.
//!
//! Entries are in-memory; hosts persist them through their own record store
//! via [`Acl::snapshot`] / [`Acl::restore`].

use std::collections::HashSet;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use ingot_core::hostmask::wildcard_match;

/// The permission that implies every other permission.
pub const ADMIN_PERMISSION: &str = "admin";

/// One access-control record.
///
/// The full tuple is unique; grants and revocations create and destroy
/// entries, never mutate them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AclEntry {
    /// Wildcard hostmask pattern, e.g. `alice!*@*`.
    pub hostmask: String,
    /// Network identifier the entry applies to.
    pub network: String,
    /// Permission name.
    pub permission: String,
    /// Channel scope; `None` means the grant is global for the network.
    pub channel: Option<String>,
}

/// Hostmask-pattern permission store.
#[derive(Debug, Default)]
pub struct Acl {
    entries: RwLock<HashSet<AclEntry>>,
}

impl Acl {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants `permission` to `hostmask` on `network`, optionally scoped to
    /// one channel.
    ///
    /// Idempotent: returns `true` when a new entry was created, `false` when
    /// an identical entry already existed.
    pub fn grant(
        &self,
        network: impl Into<String>,
        hostmask: impl Into<String>,
        permission: impl Into<String>,
        channel: Option<&str>,
    ) -> bool {
        let entry = AclEntry {
            hostmask: hostmask.into(),
            network: network.into(),
            permission: permission.into(),
            channel: channel.map(str::to_string),
        };
        let created = self.entries.write().insert(entry.clone());
        if created {
            debug!(
                network = %entry.network,
                hostmask = %entry.hostmask,
                permission = %entry.permission,
                channel = entry.channel.as_deref().unwrap_or("*global*"),
                "Permission granted"
            );
        }
        created
    }

    /// Revokes grants for `hostmask` on `network`.
    ///
    /// `permission = None` removes every permission for that hostmask at the
    /// given channel scope (`channel = None` addresses the global scope).
    /// Returns the number of entries removed.
    pub fn revoke(
        &self,
        network: &str,
        hostmask: &str,
        permission: Option<&str>,
        channel: Option<&str>,
    ) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| {
            !(e.network == network
                && e.hostmask == hostmask
                && permission.is_none_or(|p| e.permission == p)
                && e.channel.as_deref() == channel)
        });
        before - entries.len()
    }

    /// Checks whether `hostmask` holds `permission` on `network`.
    ///
    /// An entry counts when its pattern matches the caller's hostmask, its
    /// network matches exactly, its permission is the requested one or
    /// [`ADMIN_PERMISSION`], and it is either global or scoped to the
    /// requested channel.
    pub fn has(
        &self,
        network: &str,
        hostmask: &str,
        permission: &str,
        channel: Option<&str>,
    ) -> bool {
        self.entries.read().iter().any(|e| {
            e.network == network
                && (e.permission == permission || e.permission == ADMIN_PERMISSION)
                && (e.channel.is_none() || e.channel.as_deref() == channel)
                && wildcard_match(&e.hostmask, hostmask)
        })
    }

    /// Returns a copy of all entries, for host-side persistence.
    pub fn snapshot(&self) -> Vec<AclEntry> {
        self.entries.read().iter().cloned().collect()
    }

    /// Replaces all entries, e.g. when restoring persisted records at startup.
    pub fn restore(&self, entries: impl IntoIterator<Item = AclEntry>) {
        let mut guard = self.entries.write();
        guard.clear();
        guard.extend(entries);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NET: &str = "example";

    #[test]
    fn global_grant_applies_on_any_channel() {
        let acl = Acl::new();
        assert!(acl.grant(NET, "alice!*@*", "quote", None));
        assert!(acl.has(NET, "alice!user@host", "quote", Some("#foo")));
        assert!(acl.has(NET, "alice!user@host", "quote", None));
    }

    #[test]
    fn revoke_removes_the_grant() {
        let acl = Acl::new();
        acl.grant(NET, "alice!*@*", "quote", None);
        assert_eq!(acl.revoke(NET, "alice!*@*", Some("quote"), None), 1);
        assert!(!acl.has(NET, "alice!user@host", "quote", Some("#foo")));
    }

    #[test]
    fn admin_implies_everything() {
        let acl = Acl::new();
        acl.grant(NET, "alice!*@*", ADMIN_PERMISSION, None);
        assert!(acl.has(NET, "alice!user@host", "quote", Some("#foo")));
        assert!(acl.has(NET, "alice!user@host", "anything-at-all", None));
    }

    #[test]
    fn grant_is_idempotent() {
        let acl = Acl::new();
        assert!(acl.grant(NET, "alice!*@*", "quote", None));
        assert!(!acl.grant(NET, "alice!*@*", "quote", None));
        assert_eq!(acl.snapshot().len(), 1);
    }

    #[test]
    fn channel_grant_is_confined_to_its_channel() {
        let acl = Acl::new();
        acl.grant(NET, "bob!*@*", "kick", Some("#foo"));
        assert!(acl.has(NET, "bob!b@h", "kick", Some("#foo")));
        assert!(!acl.has(NET, "bob!b@h", "kick", Some("#bar")));
        assert!(!acl.has(NET, "bob!b@h", "kick", None));
    }

    #[test]
    fn network_must_match_exactly() {
        let acl = Acl::new();
        acl.grant(NET, "alice!*@*", "quote", None);
        assert!(!acl.has("othernet", "alice!user@host", "quote", None));
    }

    #[test]
    fn revoke_all_permissions_for_pair() {
        let acl = Acl::new();
        acl.grant(NET, "alice!*@*", "quote", None);
        acl.grant(NET, "alice!*@*", "kick", None);
        acl.grant(NET, "alice!*@*", "kick", Some("#foo"));
        // None permission at the global scope removes both global grants but
        // leaves the channel-scoped one alone.
        assert_eq!(acl.revoke(NET, "alice!*@*", None, None), 2);
        assert!(!acl.has(NET, "alice!u@h", "quote", None));
        assert!(acl.has(NET, "alice!u@h", "kick", Some("#foo")));
    }

    #[test]
    fn snapshot_and_restore_round_trip() {
        let acl = Acl::new();
        acl.grant(NET, "alice!*@*", "quote", None);
        let saved = acl.snapshot();

        let restored = Acl::new();
        restored.restore(saved);
        assert!(restored.has(NET, "alice!user@host", "quote", None));
    }
}
