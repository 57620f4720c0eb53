//! Group membership lookups used to filter layers per user.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

/// Errors loading a membership file.
#[derive(Debug, Error)]
pub enum AccessError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid group membership document: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Answers who a user is and which groups they belong to.
pub trait AccessControl: Send + Sync {
    fn is_user_valid(&self, user: &str) -> bool;

    fn group_membership_for_user(&self, user: &str) -> Vec<String>;

    fn is_user_member_of(&self, user: &str, group: &str) -> bool {
        self.group_membership_for_user(user)
            .iter()
            .any(|g| g == group)
    }
}

/// No known users; every restricted layer is hidden.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousAccess;

impl AccessControl for AnonymousAccess {
    fn is_user_valid(&self, _user: &str) -> bool {
        false
    }

    fn group_membership_for_user(&self, _user: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Fixed user → groups table.
///
/// The JSON form is an object mapping user names to group arrays:
/// `{"alice": ["planners", "editors"]}`.
#[derive(Debug, Clone, Default)]
pub struct StaticAccessControl {
    users: HashMap<String, Vec<String>>,
}

impl StaticAccessControl {
    pub fn new(users: HashMap<String, Vec<String>>) -> Self {
        Self { users }
    }

    pub fn from_json_str(json: &str) -> Result<Self, AccessError> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, AccessError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| AccessError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl AccessControl for StaticAccessControl {
    fn is_user_valid(&self, user: &str) -> bool {
        self.users.contains_key(user)
    }

    fn group_membership_for_user(&self, user: &str) -> Vec<String> {
        self.users.get(user).cloned().unwrap_or_default()
    }

    fn is_user_member_of(&self, user: &str, group: &str) -> bool {
        self.users
            .get(user)
            .is_some_and(|groups| groups.iter().any(|g| g == group))
    }
}
