//! Per-organization table of enrolled member identities

use super::{Identity, IdentityError};
use std::collections::BTreeMap;

/// Member identities keyed by name
///
/// Insertion never replaces an existing entry.
#[derive(Debug, Default)]
pub struct IdentityDirectory {
    identities: BTreeMap<String, Identity>,
}

impl IdentityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a newly enrolled identity
    pub fn insert(&mut self, identity: Identity) -> Result<(), IdentityError> {
        if self.identities.contains_key(identity.name()) {
            return Err(IdentityError::DuplicateIdentity(identity.name().to_string()));
        }

        self.identities.insert(identity.name().to_string(), identity);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Identity> {
        self.identities.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.identities.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.identities.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identity> {
        self.identities.values()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Credential;

    fn identity(name: &str, key: u8) -> Identity {
        Identity::new(name, "Org1MSP", Credential::new(vec![key], format!("cert-{}", key)))
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut directory = IdentityDirectory::new();
        directory.insert(identity("user1", 1)).unwrap();
        directory.insert(identity("user2", 2)).unwrap();

        assert_eq!(directory.len(), 2);
        assert!(directory.contains("user1"));
        assert_eq!(directory.names().collect::<Vec<_>>(), vec!["user1", "user2"]);
        assert!(directory.get("user3").is_none());
    }

    #[test]
    fn test_duplicate_does_not_overwrite() {
        let mut directory = IdentityDirectory::new();
        directory.insert(identity("user1", 1)).unwrap();

        let result = directory.insert(identity("user1", 9));
        assert!(matches!(result, Err(IdentityError::DuplicateIdentity(name)) if name == "user1"));

        let kept = directory.get("user1").unwrap();
        assert_eq!(kept.credential().private_key(), &[1]);
        assert_eq!(directory.len(), 1);
    }
}
