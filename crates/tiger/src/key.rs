//! Tiger cache key. `zone_id` is deliberately excluded from the cache key:
//! cross-zone resource sharing means the same `(subject, permission,
//! resource_type)` triple can cover resources in more than one zone; zone
//! isolation is enforced where the bitmap is consulted (the caller always
//! also checks the resource's own zone), not by partitioning the cache.

use nexus_models::tuple::SubjectType;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TigerKey {
    pub subject_type: SubjectType,
    pub subject_id: String,
    pub permission: String,
    pub resource_type: String,
}

impl TigerKey {
    pub fn new(
        subject_type: SubjectType,
        subject_id: impl Into<String>,
        permission: impl Into<String>,
        resource_type: impl Into<String>,
    ) -> Self {
        Self {
            subject_type,
            subject_id: subject_id.into(),
            permission: permission.into(),
            resource_type: resource_type.into(),
        }
    }
}
