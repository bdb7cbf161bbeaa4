//! Authorization gate.
//!
//! [`decide`] is the whole routing policy: a pure function of the session, the
//! requested path and the [`GatePolicy`]. The axum middleware in
//! [`crate::api::middleware`] only feeds it and acts on the answer.

use crate::config::GateConfig;
use crate::identity::Role;
use crate::session::Session;

/// Outcome of the gate for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Allow,
    RedirectTo(String),
}

/// Routing table consulted by [`decide`].
#[derive(Debug, Clone)]
pub struct GatePolicy {
    pub login_entry: String,
    pub admin_landing: String,
    pub staff_landing: String,
    pub public_paths: Vec<String>,
    /// Path prefixes reserved for one role
    pub role_prefixes: Vec<(String, Role)>,
}

impl GatePolicy {
    pub fn from_config(config: &GateConfig) -> Self {
        let role_prefixes = config
            .admin_prefixes
            .iter()
            .map(|p| (p.clone(), Role::Admin))
            .chain(config.staff_prefixes.iter().map(|p| (p.clone(), Role::Staff)))
            .collect();

        Self {
            login_entry: config.login_entry.clone(),
            admin_landing: config.admin_landing.clone(),
            staff_landing: config.staff_landing.clone(),
            public_paths: config.public_paths.clone(),
            role_prefixes,
        }
    }

    pub fn landing_for(&self, role: Role) -> &str {
        match role {
            Role::Admin => &self.admin_landing,
            Role::Staff => &self.staff_landing,
        }
    }

    pub fn is_public(&self, path: &str) -> bool {
        self.public_paths.iter().any(|p| path_matches(path, p))
    }

    /// Role owning `path`, if it lies in a role-scoped section.
    pub fn required_role(&self, path: &str) -> Option<Role> {
        self.role_prefixes
            .iter()
            .find(|(prefix, _)| path_matches(path, prefix))
            .map(|(_, role)| *role)
    }
}

impl Default for GatePolicy {
    fn default() -> Self {
        Self::from_config(&GateConfig::default())
    }
}

/// `path` equals `prefix` or lies below it.
fn path_matches(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return path == "/";
    }
    path == prefix
        || path
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Decide what happens to a request for `path`.
///
/// The login entry is reachable without a session but sends signed-in users
/// to their landing page; everything else follows the public list, then the
/// role-scoped sections. A role mismatch is a redirect, never a 403.
pub fn decide(session: Option<&Session>, path: &str, policy: &GatePolicy) -> GateDecision {
    if path == policy.login_entry {
        return match session {
            Some(session) => {
                GateDecision::RedirectTo(policy.landing_for(session.identity.role).to_string())
            }
            None => GateDecision::Allow,
        };
    }

    if policy.is_public(path) {
        return GateDecision::Allow;
    }

    let Some(session) = session else {
        return GateDecision::RedirectTo(policy.login_entry.clone());
    };

    match policy.required_role(path) {
        Some(required) if required != session.identity.role => {
            GateDecision::RedirectTo(policy.landing_for(session.identity.role).to_string())
        }
        _ => GateDecision::Allow,
    }
}
