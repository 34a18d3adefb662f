/// Who this client signs in as.
///
/// `id` is the account the token belongs to; it is what [`ClientHub`]
/// compares to decide whether an existing connection can be reused.
///
/// [`ClientHub`]: crate::lifecycle::ClientHub
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub token: String,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

impl Identity {
    pub fn new(id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            token: token.into(),
        }
    }

    /// Same account, regardless of token.
    pub fn same_account(&self, other: &Identity) -> bool {
        self.id == other.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_token() {
        let identity = Identity::new("alice", "super-secret");
        let shown = format!("{identity:?}");
        assert!(shown.contains("alice"));
        assert!(!shown.contains("super-secret"));
    }

    #[test]
    fn same_account_ignores_token() {
        let a = Identity::new("alice", "t1");
        let b = Identity::new("alice", "t2");
        assert!(a.same_account(&b));
        assert!(!a.same_account(&Identity::new("bob", "t1")));
    }
}
