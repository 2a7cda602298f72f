//! Cache key construction with revision-bucketed keys.
//!
//! A naive representation would format a key as a string
//! (`"{subject_type}:{subject_id}:{permission}:{object_type}:{object_id}:{zone}:r{bucket}"`)
//! and re-parse it whenever invalidation needs to recover the components.
//! A typed struct carries the same fields without the format/parse round
//! trip and is used directly as the map key.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub subject_type: String,
    pub subject_id: String,
    pub permission: String,
    pub object_type: String,
    pub object_id: String,
    pub zone_id: String,
    /// `RevisionService::quantize(revision, window)` — callers compute this
    /// once up front so unrelated readers/writers within the same bucket
    /// share cache entries across processes.
    pub revision_bucket: i64,
}

impl CacheKey {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        subject_type: impl Into<String>,
        subject_id: impl Into<String>,
        permission: impl Into<String>,
        object_type: impl Into<String>,
        object_id: impl Into<String>,
        zone_id: Option<&str>,
        revision_bucket: i64,
    ) -> Self {
        Self {
            subject_type: subject_type.into(),
            subject_id: subject_id.into(),
            permission: permission.into(),
            object_type: object_type.into(),
            object_id: object_id.into(),
            zone_id: zone_id.unwrap_or("default").to_string(),
            revision_bucket,
        }
    }

    pub(crate) fn subject_key(&self) -> (String, String, String) {
        (
            self.zone_id.clone(),
            self.subject_type.clone(),
            self.subject_id.clone(),
        )
    }

    pub(crate) fn object_key(&self) -> (String, String, String) {
        (
            self.zone_id.clone(),
            self.object_type.clone(),
            self.object_id.clone(),
        )
    }

    pub(crate) fn is_path_indexable(&self) -> bool {
        matches!(self.object_type.as_str(), "file" | "memory" | "resource")
            && self.object_id.starts_with('/')
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}:r{}",
            self.subject_type,
            self.subject_id,
            self.permission,
            self.object_type,
            self.object_id,
            self.zone_id,
            self.revision_bucket
        )
    }
}

/// Walks `path` and every ancestor directory up to and including `/`,
/// mirroring Python's `path.rsplit("/", 1)[0] or "/"` loop used to populate
/// the path-prefix index.
pub(crate) fn ancestor_prefixes(path: &str) -> Vec<String> {
    let mut prefixes = Vec::new();
    let mut current = path.to_string();
    loop {
        prefixes.push(current.clone());
        if current == "/" {
            break;
        }
        let parent = match current.rfind('/') {
            Some(0) => "/".to_string(),
            Some(idx) => current[..idx].to_string(),
            None => break,
        };
        if parent == current {
            break;
        }
        current = parent;
    }
    prefixes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_legacy_string_shape() {
        let key = CacheKey::new("user", "alice", "viewer", "file", "/a/b.txt", None, 3);
        assert_eq!(key.to_string(), "user:alice:viewer:file:/a/b.txt:default:r3");
    }

    #[test]
    fn ancestor_prefixes_walks_to_root() {
        let prefixes = ancestor_prefixes("/a/b/c.txt");
        assert_eq!(prefixes, vec!["/a/b/c.txt", "/a/b", "/a", "/"]);
    }

    #[test]
    fn ancestor_prefixes_of_root_is_just_root() {
        assert_eq!(ancestor_prefixes("/"), vec!["/"]);
    }
}
