use std::collections::HashSet;

use crate::platform::Identity;

/// Fixed set of senders allowed to use the bot.
///
/// An empty allowlist denies everyone.
#[derive(Debug, Clone, Default)]
pub struct AllowlistGate {
    allowed: HashSet<u64>,
}

impl AllowlistGate {
    pub fn new(ids: impl IntoIterator<Item = u64>) -> Self {
        Self {
            allowed: ids.into_iter().collect(),
        }
    }

    pub fn is_authorized(&self, identity: Identity) -> bool {
        self.allowed.contains(&identity.0)
    }

    /// Unknown senders are never authorized
    pub fn admits(&self, sender: Option<Identity>) -> bool {
        sender.is_some_and(|id| self.is_authorized(id))
    }

    pub fn len(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }
}
