//! The authenticated identity bound to a single connection.

use std::collections::HashSet;

/// A role a [`Principal`] may hold.
///
/// Any role string not in this set is simply not granted admin privileges;
/// unrecognized roles are kept as opaque strings by callers upstream of this
/// crate (JWT validation is out of scope here, see spec §1).
pub const ROLE_USER: &str = "user";

/// The admin role string.
pub const ROLE_ADMIN: &str = "admin";

/// An authenticated identity, produced by the (out-of-scope) auth layer and
/// handed to the router for the lifetime of one connection.
///
/// Immutable for the lifetime of a connection: nothing in this crate or in
/// `chat-router` ever mutates a `Principal` after a connection is
/// established.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    user_id: String,
    roles: HashSet<String>,
    display_name: Option<String>,
}

impl Principal {
    /// Creates a new `Principal`.
    ///
    /// # Panics
    ///
    /// Panics if `user_id` is empty — the wire contract and every ownership
    /// check in the router assume a non-empty, stable user id.
    pub fn new(
        user_id: impl Into<String>,
        roles: impl IntoIterator<Item = String>,
        display_name: Option<String>,
    ) -> Self {
        let user_id = user_id.into();
        assert!(!user_id.is_empty(), "principal user_id must not be empty");
        Self {
            user_id,
            roles: roles.into_iter().collect(),
            display_name,
        }
    }

    /// The stable, non-empty user id.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// `true` iff this principal holds the `admin` role.
    pub fn is_admin(&self) -> bool {
        self.roles.contains(ROLE_ADMIN)
    }

    /// The principal's display name, falling back to `user_id` when unset
    /// or empty (used by the admin-takeover broadcast, spec §4.6.5).
    pub fn display_name_or_id(&self) -> &str {
        match &self.display_name {
            Some(name) if !name.is_empty() => name,
            _ => &self.user_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_user_id_when_display_name_empty() {
        let p = Principal::new("u1", [ROLE_ADMIN.to_owned()], Some(String::new()));
        assert_eq!(p.display_name_or_id(), "u1");
    }

    #[test]
    fn uses_display_name_when_present() {
        let p = Principal::new("u1", [], Some("Alice".to_owned()));
        assert_eq!(p.display_name_or_id(), "Alice");
    }

    #[test]
    #[should_panic(expected = "user_id must not be empty")]
    fn rejects_empty_user_id() {
        Principal::new("", [], None);
    }
}
