//! Caller identity and role checks.
//!
//! Authentication happens elsewhere (token verification in the server); this
//! module only maps an authenticated caller name to groups and answers
//! "may this caller enter?" at each protected entry point.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

/// An authenticated caller together with the groups it belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    pub groups: BTreeSet<String>,
}

impl Principal {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            groups: BTreeSet::new(),
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups.extend(groups.into_iter().map(Into::into));
        self
    }

    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }
}

/// Supplies the groups of an authenticated caller.
pub trait IdentityStore: Send + Sync {
    fn caller_groups(&self, caller: &str) -> BTreeSet<String>;

    /// Build a principal for `caller` with its groups attached.
    fn principal(&self, caller: &str) -> Principal {
        Principal {
            name: caller.to_string(),
            groups: self.caller_groups(caller),
        }
    }
}

/// Fixed caller→groups table. Unknown callers get no groups.
#[derive(Clone, Debug, Default)]
pub struct StaticIdentityStore {
    table: BTreeMap<String, BTreeSet<String>>,
}

impl StaticIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant<I, S>(mut self, caller: &str, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.table
            .entry(caller.to_string())
            .or_default()
            .extend(groups.into_iter().map(Into::into));
        self
    }

    /// The default grants: `foo` and `bar` for the demo accounts of the
    /// local, Auth0 and Okta setups.
    pub fn demo() -> Self {
        Self::new()
            .grant("user", ["foo", "bar"])
            .grant("auth0|63249de53e292439f31c6be6", ["foo", "bar"])
            .grant("user@example.com", ["foo", "bar"])
    }
}

impl IdentityStore for StaticIdentityStore {
    fn caller_groups(&self, caller: &str) -> BTreeSet<String> {
        self.table.get(caller).cloned().unwrap_or_default()
    }
}

/// The caller holds none of the roles an entry point requires.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessDenied {
    pub caller: String,
    pub required: Vec<String>,
}

impl Display for AccessDenied {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "caller '{}' lacks any of the roles [{}]",
            self.caller,
            self.required.join(", ")
        )
    }
}

impl std::error::Error for AccessDenied {}

/// Policy check for protected entry points: passes when the principal is in
/// at least one of `roles`.
pub fn require_any_role(principal: &Principal, roles: &[&str]) -> Result<(), AccessDenied> {
    if roles.iter().any(|r| principal.in_group(r)) {
        return Ok(());
    }
    Err(AccessDenied {
        caller: principal.name.clone(),
        required: roles.iter().map(|r| r.to_string()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_store_grants_known_callers() {
        let store = StaticIdentityStore::demo();
        let p = store.principal("auth0|63249de53e292439f31c6be6");
        assert!(p.in_group("foo"));
        assert!(p.in_group("bar"));
        assert!(store.caller_groups("stranger").is_empty());
    }

    #[test]
    fn require_any_role_checks_membership() {
        let p = Principal::new("user").with_groups(["bar"]);
        assert!(require_any_role(&p, &["foo", "bar"]).is_ok());
        let err = require_any_role(&p, &["foo"]).unwrap_err();
        assert_eq!(err.caller, "user");
        assert_eq!(err.required, vec!["foo".to_string()]);
    }

    #[test]
    fn no_groups_means_denied() {
        let p = Principal::new("nobody");
        assert!(require_any_role(&p, &["foo"]).is_err());
    }
}
