//! Relationship tuples — `(subject, relation, object)` edges, extended
//! with tenant, expiry, and ABAC condition columns for the persisted
//! tuple layout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Subject types a tuple can reference. `UserSet` marks the tuple as
/// userset-as-subject when paired with `subject_relation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectType {
    User,
    Application,
    Group,
    UserSet,
}

impl std::fmt::Display for SubjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubjectType::User => "user",
            SubjectType::Application => "application",
            SubjectType::Group => "group",
            SubjectType::UserSet => "userset",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for SubjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(SubjectType::User),
            "application" => Ok(SubjectType::Application),
            "group" => Ok(SubjectType::Group),
            "userset" => Ok(SubjectType::UserSet),
            other => Err(format!("invalid subject type: {other}")),
        }
    }
}

/// The reserved wildcard subject `("*", "*")` used for public grants.
pub const WILDCARD_SUBJECT_ID: &str = "*";
pub const WILDCARD_SUBJECT_TYPE: &str = "*";

/// A subject reference: either a concrete `(type, id)` pair or, when
/// `relation` is set, a userset-as-subject pointing at `(type, id)#relation`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectRef {
    pub subject_type: SubjectType,
    pub subject_id: String,
    pub subject_relation: Option<String>,
}

impl SubjectRef {
    pub fn new(subject_type: SubjectType, subject_id: impl Into<String>) -> Self {
        Self {
            subject_type,
            subject_id: subject_id.into(),
            subject_relation: None,
        }
    }

    pub fn userset(
        subject_type: SubjectType,
        subject_id: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            subject_type,
            subject_id: subject_id.into(),
            subject_relation: Some(relation.into()),
        }
    }

    pub fn wildcard() -> Self {
        Self {
            subject_type: SubjectType::User,
            subject_id: WILDCARD_SUBJECT_ID.to_string(),
            subject_relation: None,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        self.subject_id == WILDCARD_SUBJECT_ID
    }
}

/// One relationship edge: `(subject, relation, object)`, with the tenancy
/// and ABAC condition columns from the persisted layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationTuple {
    pub tuple_id: Uuid,
    pub subject_type: SubjectType,
    pub subject_id: String,
    pub subject_relation: Option<String>,
    pub relation: String,
    pub object_type: String,
    pub object_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub conditions: Option<serde_json::Value>,
    pub tenant_id: Option<Uuid>,
    pub subject_tenant_id: Option<Uuid>,
    pub object_tenant_id: Option<Uuid>,
}

impl RelationTuple {
    /// A tuple with `expires_at <= now` must be treated as absent on read:
    /// live iff `expires_at IS NULL OR expires_at >= now`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            None => true,
            Some(expiry) => expiry >= now,
        }
    }

    pub fn subject(&self) -> SubjectRef {
        SubjectRef {
            subject_type: self.subject_type,
            subject_id: self.subject_id.clone(),
            subject_relation: self.subject_relation.clone(),
        }
    }

    pub fn is_userset_as_subject(&self) -> bool {
        self.subject_relation.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tuple_expiring_exactly_now_is_dead() {
        let now = Utc::now();
        let tuple = RelationTuple {
            tuple_id: Uuid::new_v4(),
            subject_type: SubjectType::User,
            subject_id: "alice".into(),
            subject_relation: None,
            relation: "viewer".into(),
            object_type: "file".into(),
            object_id: "/doc".into(),
            created_at: now,
            expires_at: Some(now),
            conditions: None,
            tenant_id: None,
            subject_tenant_id: None,
            object_tenant_id: None,
        };
        assert!(!tuple.is_live_at(now));
    }
}
