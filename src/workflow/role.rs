//! Role guard: gates workflow entry and every subsequent event.

use crate::store::model::Role;

/// Fixed notice sent when the guard denies access.
pub const DENIAL_NOTICE: &str = "⛔ You don't have access to this section.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow,
    Deny,
}

impl Access {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Any one role in common with the allowlist suffices.
pub fn check(roles: &[Role], allowlist: &[Role]) -> Access {
    if roles.iter().any(|r| allowlist.contains(r)) {
        Access::Allow
    } else {
        Access::Deny
    }
}
