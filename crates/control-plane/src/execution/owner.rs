//! Execution ownership: exactly one user or one service principal.

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// The principal an execution belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    content = "id",
    rename_all = "snake_case",
    try_from = "UncheckedOwner"
)]
pub enum Owner {
    User(String),
    ServicePrincipal(String),
}

/// Wire shape of [`Owner`] before its id is validated.
#[derive(Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
enum UncheckedOwner {
    User(String),
    ServicePrincipal(String),
}

impl TryFrom<UncheckedOwner> for Owner {
    type Error = AppError;

    fn try_from(owner: UncheckedOwner) -> AppResult<Self> {
        match owner {
            UncheckedOwner::User(id) => Self::user(id),
            UncheckedOwner::ServicePrincipal(id) => Self::service_principal(id),
        }
    }
}

impl Owner {
    pub fn user(id: impl Into<String>) -> AppResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(AppError::Validation("user id must not be empty".to_string()));
        }
        Ok(Self::User(id))
    }

    pub fn service_principal(id: impl Into<String>) -> AppResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(AppError::Validation(
                "service principal id must not be empty".to_string(),
            ));
        }
        Ok(Self::ServicePrincipal(id))
    }

    /// Rebuild an owner from the two nullable storage columns.
    pub fn from_columns(
        user_id: Option<String>,
        service_principal_id: Option<String>,
    ) -> AppResult<Self> {
        match (user_id, service_principal_id) {
            (Some(user), None) => Self::user(user),
            (None, Some(principal)) => Self::service_principal(principal),
            (Some(_), Some(_)) => Err(AppError::Validation(
                "execution cannot be owned by both a user and a service principal".to_string(),
            )),
            (None, None) => Err(AppError::Validation(
                "execution must be owned by a user or a service principal".to_string(),
            )),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::User(id) => Some(id),
            Self::ServicePrincipal(_) => None,
        }
    }

    pub fn service_principal_id(&self) -> Option<&str> {
        match self {
            Self::User(_) => None,
            Self::ServicePrincipal(id) => Some(id),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::User(id) | Self::ServicePrincipal(id) => id,
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Self::User(_))
    }
}

impl std::fmt::Display for Owner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{}", id),
            Self::ServicePrincipal(id) => write!(f, "service_principal:{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_columns_requires_exactly_one() {
        assert_eq!(
            Owner::from_columns(Some("u1".into()), None).unwrap(),
            Owner::User("u1".into())
        );
        assert_eq!(
            Owner::from_columns(None, Some("sp1".into())).unwrap(),
            Owner::ServicePrincipal("sp1".into())
        );
        assert!(Owner::from_columns(Some("u1".into()), Some("sp1".into())).is_err());
        assert!(Owner::from_columns(None, None).is_err());
    }

    #[test]
    fn test_empty_id_rejected() {
        assert!(Owner::user("  ").is_err());
        assert!(Owner::service_principal("").is_err());
    }

    #[test]
    fn test_accessors() {
        let owner = Owner::service_principal("etl-bot").unwrap();
        assert_eq!(owner.user_id(), None);
        assert_eq!(owner.service_principal_id(), Some("etl-bot"));
        assert_eq!(owner.id(), "etl-bot");
        assert!(!owner.is_user());
    }

    #[test]
    fn test_serializes_as_tagged_union() {
        let owner = Owner::user("alice").unwrap();
        let json = serde_json::to_value(&owner).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "user", "id": "alice"}));
    }

    #[test]
    fn test_deserialization_validates_id() {
        let owner: Owner =
            serde_json::from_value(serde_json::json!({"kind": "service_principal", "id": "etl"}))
                .unwrap();
        assert_eq!(owner, Owner::ServicePrincipal("etl".into()));

        let blank = serde_json::from_value::<Owner>(serde_json::json!({"kind": "user", "id": ""}));
        assert!(blank.is_err());
    }
}
