//! Role-based allow/deny decision.
//!
//! Rules are evaluated in order and the first match wins:
//!
//! 1. no required roles: allow
//! 2. exactly `["*"]`: allow
//! 3. unauthenticated caller: allow only if `anonymous` is required
//! 4. `admin` caller: allow
//! 5. `authenticated` is required: allow
//! 6. caller role is one of the required roles: allow
//! 7. otherwise deny

use super::{Auth, Roles, ROLE_ADMIN, ROLE_ANONYMOUS, ROLE_ANY, ROLE_AUTHENTICATED};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        matches!(self, Decision::Allow)
    }
}

pub fn decide(auth: &Auth, required: &Roles) -> Decision {
    if required.is_empty() {
        return Decision::Allow;
    }
    if required.len() == 1 && required.contains(ROLE_ANY) {
        return Decision::Allow;
    }
    if !auth.authenticated {
        return if required.contains(ROLE_ANONYMOUS) {
            Decision::Allow
        } else {
            Decision::Deny
        };
    }
    if auth.role == ROLE_ADMIN {
        return Decision::Allow;
    }
    if required.contains(ROLE_AUTHENTICATED) {
        return Decision::Allow;
    }
    // a blank role never matches, even if a route lists one
    if !auth.role.trim().is_empty() && required.contains(&auth.role) {
        return Decision::Allow;
    }
    Decision::Deny
}
