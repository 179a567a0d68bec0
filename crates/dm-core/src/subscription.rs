//! Tracks which oids a connected client wants pushed to it.
//!
//! Subscriptions come in two flavors: an explicit oid (`"/power"`) or a
//! prefix pattern (`"/sensors/*"`) that matches every oid nested under it.
//! `UpdateSubscriptions` adds/removes either flavor; `Device::should_send`
//! consults [`SubscriptionSet::is_subscribed`] before emitting a push.

use std::collections::HashSet;

const WILDCARD_SUFFIX: &str = "/*";

#[derive(Clone, Debug, Default)]
pub struct SubscriptionSet {
    explicit: HashSet<String>,
    prefixes: Vec<String>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, oid: &str) {
        if let Some(prefix) = oid.strip_suffix(WILDCARD_SUFFIX) {
            if !self.prefixes.iter().any(|p| p == prefix) {
                self.prefixes.push(prefix.to_string());
            }
        } else {
            self.explicit.insert(oid.to_string());
        }
    }

    pub fn remove(&mut self, oid: &str) {
        if let Some(prefix) = oid.strip_suffix(WILDCARD_SUFFIX) {
            self.prefixes.retain(|p| p != prefix);
        } else {
            self.explicit.remove(oid);
        }
    }

    /// True if `oid` is named explicitly, or falls under a subscribed
    /// `/prefix/*` pattern.
    pub fn is_subscribed(&self, oid: &str) -> bool {
        if self.explicit.contains(oid) {
            return true;
        }
        self.prefixes
            .iter()
            .any(|prefix| oid == prefix || oid.starts_with(&format!("{prefix}/")))
    }

    pub fn is_empty(&self) -> bool {
        self.explicit.is_empty() && self.prefixes.is_empty()
    }

    pub fn explicit_oids(&self) -> impl Iterator<Item = &str> {
        self.explicit.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_oid_matches_only_itself() {
        let mut subs = SubscriptionSet::new();
        subs.add("/power");
        assert!(subs.is_subscribed("/power"));
        assert!(!subs.is_subscribed("/power/sub"));
    }

    #[test]
    fn wildcard_prefix_matches_descendants_and_itself() {
        let mut subs = SubscriptionSet::new();
        subs.add("/sensors/*");
        assert!(subs.is_subscribed("/sensors"));
        assert!(subs.is_subscribed("/sensors/temp"));
        assert!(!subs.is_subscribed("/sensorsx"));
    }

    #[test]
    fn remove_drops_the_matching_flavor_only() {
        let mut subs = SubscriptionSet::new();
        subs.add("/power");
        subs.add("/sensors/*");
        subs.remove("/power");
        assert!(!subs.is_subscribed("/power"));
        assert!(subs.is_subscribed("/sensors/temp"));
    }
}
