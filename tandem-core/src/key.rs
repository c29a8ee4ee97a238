//! Key namespacing.
//!
//! Every key that reaches Redis or the coherence bus is prefixed with the
//! shared group name, so multiple logical caches can coexist on one Redis
//! deployment. The transform is `<group>:<user-key>`; the reserved key
//! `<group>:*FLUSHDB*` instructs peers to drop their entire local tier.

use std::fmt;

/// Reserved suffix of the "drop the whole local tier" key.
pub const FLUSH_SENTINEL: &str = "*FLUSHDB*";

/// The shared group name that scopes keys to a set of cooperating
/// cache instances.
///
/// `Namespace` is a pure transform: it owns no connection and keeps no
/// state beyond the group string. Cloning is cheap enough to hand one to
/// every component that needs to build or recognise namespaced keys.
///
/// # Example
///
/// ```
/// use tandem_core::Namespace;
///
/// let ns = Namespace::new("app");
/// assert_eq!(ns.key("u:1"), "app:u:1");
/// assert_eq!(ns.pattern("a:"), "app:*a:*");
/// assert_eq!(ns.flush_sentinel(), "app:*FLUSHDB*");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    group: String,
}

impl Namespace {
    /// Creates a namespace for the given instance group.
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
        }
    }

    /// Returns the group name.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Namespaces a user key: `<group>:<user-key>`.
    pub fn key(&self, user_key: &str) -> String {
        format!("{}:{}", self.group, user_key)
    }

    /// Returns the reserved clear-all sentinel key for this group.
    ///
    /// The sentinel is never stored in either tier; its presence as the
    /// first key of an invalidation means "rebuild the local tier".
    pub fn flush_sentinel(&self) -> String {
        format!("{}:{}", self.group, FLUSH_SENTINEL)
    }

    /// Returns `true` if `key` is this group's clear-all sentinel.
    pub fn is_flush_sentinel(&self, key: &str) -> bool {
        key.strip_prefix(self.group.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
            .is_some_and(|rest| rest == FLUSH_SENTINEL)
    }

    /// Builds a namespaced glob pattern for server-side key scans.
    ///
    /// The user pattern is wrapped in `*` wildcards (unless it already
    /// carries them) and then prefixed with the group, so a pattern of
    /// `"a:"` in group `"app"` becomes `"app:*a:*"`.
    pub fn pattern(&self, user_pattern: &str) -> String {
        let prefix = if user_pattern.starts_with('*') { "" } else { "*" };
        let suffix = if user_pattern.ends_with('*') { "" } else { "*" };
        format!("{}:{}{}{}", self.group, prefix, user_pattern, suffix)
    }

    /// Removes the group prefix from a namespaced key.
    ///
    /// Returns `None` when the key does not belong to this group.
    pub fn strip<'a>(&self, namespaced: &'a str) -> Option<&'a str> {
        namespaced
            .strip_prefix(self.group.as_str())
            .and_then(|rest| rest.strip_prefix(':'))
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespaced_form_is_group_colon_key() {
        let ns = Namespace::new("app");
        assert_eq!(ns.key("u:1"), "app:u:1");
        assert_eq!(ns.key(""), "app:");
    }

    #[test]
    fn strip_is_the_inverse_of_key() {
        let ns = Namespace::new("app");
        assert_eq!(ns.strip(&ns.key("u:1")), Some("u:1"));
        assert_eq!(ns.strip("other:u:1"), None);
        // A key from a group that merely shares a prefix is not ours.
        assert_eq!(ns.strip("apple:u:1"), None);
    }

    #[test]
    fn pattern_wraps_in_wildcards_once() {
        let ns = Namespace::new("app");
        assert_eq!(ns.pattern("a:"), "app:*a:*");
        assert_eq!(ns.pattern("a:*"), "app:*a:*");
        assert_eq!(ns.pattern("*a:"), "app:*a:*");
        assert_eq!(ns.pattern("*a:*"), "app:*a:*");
    }

    #[test]
    fn sentinel_recognition() {
        let ns = Namespace::new("app");
        assert!(ns.is_flush_sentinel("app:*FLUSHDB*"));
        assert!(!ns.is_flush_sentinel("app:user"));
        assert!(!ns.is_flush_sentinel("other:*FLUSHDB*"));
        assert_eq!(ns.flush_sentinel(), "app:*FLUSHDB*");
    }
}
