use std::fmt::{Display, Formatter};

/// Firestore's own minimal notion of "who is signed in", independent of the
/// Auth SDK's richer `auth::model::User`. The sync engine only needs a
/// stable, cheaply comparable identity to partition mutation callbacks and
/// detect credential changes — it never needs tokens, provider data, or
/// profile fields, so it does not borrow the Auth SDK's type.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct User {
    uid: Option<String>,
}

impl User {
    /// The anonymous/unauthenticated identity. All anonymous sessions share
    /// this identity, matching the source SDK's treatment of "no user" as a
    /// single well-known value rather than `None` scattered through call sites.
    pub fn unauthenticated() -> Self {
        Self { uid: None }
    }

    pub fn new(uid: impl Into<String>) -> Self {
        Self { uid: Some(uid.into()) }
    }

    pub fn is_authenticated(&self) -> bool {
        self.uid.is_some()
    }

    pub fn uid(&self) -> Option<&str> {
        self.uid.as_deref()
    }
}

impl Default for User {
    fn default() -> Self {
        Self::unauthenticated()
    }
}

impl Display for User {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.uid {
            Some(uid) => write!(f, "{uid}"),
            None => write!(f, "<unauthenticated>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthenticated_users_are_equal() {
        assert_eq!(User::unauthenticated(), User::default());
        assert!(!User::unauthenticated().is_authenticated());
    }

    #[test]
    fn distinct_uids_are_distinct_identities() {
        assert_ne!(User::new("alice"), User::new("bob"));
        assert!(User::new("alice").is_authenticated());
    }
}
