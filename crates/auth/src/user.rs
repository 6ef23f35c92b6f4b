//! Users: identities that log in by name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clientdesk_core::{DomainError, DomainResult, UserId};

/// Longest accepted user name.
pub const MAX_USER_NAME_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(name: String, created_at: DateTime<Utc>) -> Self {
        Self {
            id: UserId::new(),
            name,
            created_at,
        }
    }
}

/// Trim and validate a login name.
pub fn normalize_user_name(name: &str) -> DomainResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DomainError::validation("name must not be empty"));
    }
    if name.chars().count() > MAX_USER_NAME_LEN {
        return Err(DomainError::validation(format!(
            "name must be at most {MAX_USER_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_trimmed() {
        assert_eq!(normalize_user_name("  Ada  ").unwrap(), "Ada");
    }

    #[test]
    fn blank_names_are_rejected() {
        assert!(matches!(
            normalize_user_name("   "),
            Err(DomainError::Validation(_))
        ));
    }
}
