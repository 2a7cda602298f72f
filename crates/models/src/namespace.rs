//! Namespace schema types — the rewrite-rule algebra a permission check is
//! evaluated against.

use chrono::{DateTime, Utc};
use serde::de::Error as DeError;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use uuid::Uuid;

pub type RelationName = String;

/// One object type's rewrite schema, as persisted by the Namespace Store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub id: Uuid,
    pub object_type: String,
    pub config: NamespaceConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `relations` define how a relation on this object type is assigned;
/// `permissions` name the relation(s) that satisfy a permission string —
/// granted if any listed rewrite evaluates to true.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamespaceConfig {
    #[serde(default)]
    pub relations: HashMap<RelationName, RewriteExpr>,
    #[serde(default)]
    pub permissions: HashMap<String, Vec<RewriteExpr>>,
}

/// A rewrite expression: union / intersection / exclusion / tupleToUserset
/// over relations on an object type.
#[derive(Debug, Clone, PartialEq)]
pub enum RewriteExpr {
    /// `"this"` — a direct tuple on the relation itself.
    This,
    /// A bare relation name — a computed userset on the same object.
    ComputedUserset(RelationName),
    Union(Vec<RewriteExpr>),
    Intersection(Vec<RewriteExpr>),
    /// The only DENY primitive: NOT the nested expression.
    Exclusion(Box<RewriteExpr>),
    TupleToUserset(TupleToUserset),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TupleToUserset {
    pub tupleset: Tupleset,
    #[serde(alias = "computedUserset")]
    pub computed_userset: ComputedUserset,
}

impl Serialize for TupleToUserset {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("tupleset", &self.tupleset)?;
        map.serialize_entry("computedUserset", &self.computed_userset)?;
        map.end()
    }
}

/// §6's wire form is a bare relation name (`"tupleset": "parent"`), matching
/// `original_source`'s `ttu["tupleset"]` string access; an object form
/// (`{"relation": "parent"}`) is also accepted for leniency but never
/// produced on serialize.
#[derive(Debug, Clone, PartialEq)]
pub struct Tupleset {
    pub relation: RelationName,
}

impl Serialize for Tupleset {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.relation)
    }
}

impl<'de> Deserialize<'de> for Tupleset {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bare(RelationName),
            Object { relation: RelationName },
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Bare(relation) => Tupleset { relation },
            Raw::Object { relation } => Tupleset { relation },
        })
    }
}

/// Same bare-string wire form as `Tupleset`, for `computedUserset`.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputedUserset {
    pub relation: RelationName,
}

impl Serialize for ComputedUserset {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.relation)
    }
}

impl<'de> Deserialize<'de> for ComputedUserset {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bare(RelationName),
            Object { relation: RelationName },
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Bare(relation) => ComputedUserset { relation },
            Raw::Object { relation } => ComputedUserset { relation },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectRelation {
    #[serde(default)]
    pub types: Vec<String>,
}

/// Serializes back to the tagged wire shape (`{"this": {}}`,
/// `{"union": [...]}`, ...) rather than the plain Rust enum representation,
/// so a schema round-trips through JSON unchanged.
impl Serialize for RewriteExpr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            RewriteExpr::This => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("this", &serde_json::json!({}))?;
                map.end()
            }
            RewriteExpr::ComputedUserset(name) => serializer.serialize_str(name),
            RewriteExpr::Union(items) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("union", items)?;
                map.end()
            }
            RewriteExpr::Intersection(items) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("intersection", items)?;
                map.end()
            }
            RewriteExpr::Exclusion(inner) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("exclusion", inner)?;
                map.end()
            }
            RewriteExpr::TupleToUserset(ttu) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("tupleToUserset", ttu)?;
                map.end()
            }
        }
    }
}

/// Raw JSON shapes accepted for a `RewriteExpr`, mirroring the OpenFGA-ish
/// wire format. This goes through a richer raw form (rather than
/// a direct `#[serde(untagged)]` derive) because `"this"` can appear either
/// as the bare string `"this"` or as `{"this": {}}`, and `union`/
/// `intersection` may be either a direct array or OpenFGA's
/// `{"child": [...]}` wrapper.
impl<'de> Deserialize<'de> for RewriteExpr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Name(String),
            This {
                #[allow(dead_code)]
                this: serde_json::Value,
            },
            Union {
                union: ChildList,
            },
            Intersection {
                intersection: ChildList,
            },
            Exclusion {
                exclusion: Box<Raw>,
            },
            TupleToUserset {
                #[serde(rename = "tupleToUserset")]
                tuple_to_userset: TupleToUserset,
            },
        }

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum ChildList {
            Direct(Vec<Raw>),
            Wrapped { child: Vec<Raw> },
        }

        impl ChildList {
            fn into_vec(self) -> Vec<Raw> {
                match self {
                    ChildList::Direct(items) => items,
                    ChildList::Wrapped { child } => child,
                }
            }
        }

        fn convert(raw: Raw) -> RewriteExpr {
            match raw {
                Raw::Name(name) if name == "this" => RewriteExpr::This,
                Raw::Name(name) => RewriteExpr::ComputedUserset(name),
                Raw::This { .. } => RewriteExpr::This,
                Raw::Union { union } => {
                    RewriteExpr::Union(union.into_vec().into_iter().map(convert).collect())
                }
                Raw::Intersection { intersection } => RewriteExpr::Intersection(
                    intersection.into_vec().into_iter().map(convert).collect(),
                ),
                Raw::Exclusion { exclusion } => {
                    RewriteExpr::Exclusion(Box::new(convert(*exclusion)))
                }
                Raw::TupleToUserset { tuple_to_userset } => {
                    RewriteExpr::TupleToUserset(tuple_to_userset)
                }
            }
        }

        let raw = Raw::deserialize(deserializer)
            .map_err(|e| DeError::custom(format!("invalid rewrite expression: {e}")))?;
        Ok(convert(raw))
    }
}

/// The built-in `file`, `group`, `memory` namespaces the store seeds on
/// first use (spec §3, §4.1). `file`'s shape is the one documented verbatim
/// in §6; `memory` mirrors it (memories live in the same owner/editor/viewer
/// hierarchy as files); `group` only needs a membership relation, since
/// group membership is consulted through userset-as-subject tuples rather
/// than through a `permissions` entry of its own.
pub fn default_namespaces() -> Vec<(&'static str, NamespaceConfig)> {
    vec![
        ("file", owner_editor_viewer_hierarchy()),
        ("memory", owner_editor_viewer_hierarchy()),
        ("group", group_namespace()),
    ]
}

fn owner_editor_viewer_hierarchy() -> NamespaceConfig {
    let mut relations = HashMap::new();
    relations.insert("owner".to_string(), RewriteExpr::This);
    relations.insert("editor".to_string(), RewriteExpr::This);
    relations.insert(
        "viewer".to_string(),
        RewriteExpr::Union(vec![
            RewriteExpr::This,
            RewriteExpr::ComputedUserset("editor".into()),
            RewriteExpr::ComputedUserset("owner".into()),
        ]),
    );
    relations.insert(
        "parent_viewer".to_string(),
        RewriteExpr::TupleToUserset(TupleToUserset {
            tupleset: Tupleset {
                relation: "parent".into(),
            },
            computed_userset: ComputedUserset {
                relation: "viewer".into(),
            },
        }),
    );

    let mut permissions = HashMap::new();
    permissions.insert(
        "read".to_string(),
        vec![
            RewriteExpr::ComputedUserset("viewer".into()),
            RewriteExpr::ComputedUserset("parent_viewer".into()),
        ],
    );
    permissions.insert(
        "write".to_string(),
        vec![
            RewriteExpr::ComputedUserset("editor".into()),
            RewriteExpr::ComputedUserset("owner".into()),
        ],
    );

    NamespaceConfig {
        relations,
        permissions,
    }
}

fn group_namespace() -> NamespaceConfig {
    let mut relations = HashMap::new();
    relations.insert("owner".to_string(), RewriteExpr::This);
    relations.insert(
        "member".to_string(),
        RewriteExpr::Union(vec![
            RewriteExpr::This,
            RewriteExpr::ComputedUserset("owner".into()),
        ]),
    );

    NamespaceConfig {
        relations,
        permissions: HashMap::new(),
    }
}

/// Canonical JSON form used as the cycle-detection visit key for
/// dictionary-shaped permissions — two structurally identical rewrites must
/// canonicalize identically regardless of HashMap iteration order, so this
/// re-serializes through a `BTreeMap` rather than relying on insertion order.
pub fn canonicalize(expr: &RewriteExpr) -> String {
    fn sort_value(value: serde_json::Value) -> serde_json::Value {
        match value {
            serde_json::Value::Object(map) => {
                let sorted: std::collections::BTreeMap<String, serde_json::Value> = map
                    .into_iter()
                    .map(|(k, v)| (k, sort_value(v)))
                    .collect();
                serde_json::to_value(sorted).unwrap_or(serde_json::Value::Null)
            }
            serde_json::Value::Array(items) => {
                serde_json::Value::Array(items.into_iter().map(sort_value).collect())
            }
            other => other,
        }
    }

    let value = serde_json::to_value(expr).unwrap_or(serde_json::Value::Null);
    sort_value(value).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_file_namespace_with_union_and_tuple_to_userset() {
        let raw = serde_json::json!({
            "relations": {
                "owner": {"this": {}},
                "editor": {"this": {}},
                "viewer": {"union": [{"this": {}}, "editor", "owner"]},
                "parent_viewer": {"tupleToUserset": {"tupleset": "parent", "computedUserset": "viewer"}}
            },
            "permissions": {
                "read": ["viewer", "parent_viewer"],
                "write": ["editor", "owner"]
            }
        });

        let config: NamespaceConfig = serde_json::from_value(raw).expect("parses");

        assert!(matches!(config.relations["owner"], RewriteExpr::This));
        match &config.relations["viewer"] {
            RewriteExpr::Union(parts) => assert_eq!(parts.len(), 3),
            other => panic!("expected union, got {other:?}"),
        }
        match &config.relations["parent_viewer"] {
            RewriteExpr::TupleToUserset(ttu) => {
                assert_eq!(ttu.tupleset.relation, "parent");
                assert_eq!(ttu.computed_userset.relation, "viewer");
            }
            other => panic!("expected tupleToUserset, got {other:?}"),
        }
        assert_eq!(config.permissions["read"].len(), 2);
    }

    #[test]
    fn round_trips_through_json() {
        let expr = RewriteExpr::Union(vec![
            RewriteExpr::This,
            RewriteExpr::ComputedUserset("editor".into()),
            RewriteExpr::Exclusion(Box::new(RewriteExpr::ComputedUserset("banned".into()))),
        ]);
        let json = serde_json::to_value(&expr).unwrap();
        let back: RewriteExpr = serde_json::from_value(json).unwrap();
        assert_eq!(expr, back);
    }

    #[test]
    fn tuple_to_userset_round_trips_as_bare_relation_strings() {
        let expr = RewriteExpr::TupleToUserset(TupleToUserset {
            tupleset: Tupleset {
                relation: "parent".into(),
            },
            computed_userset: ComputedUserset {
                relation: "viewer".into(),
            },
        });
        let json = serde_json::to_value(&expr).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"tupleToUserset": {"tupleset": "parent", "computedUserset": "viewer"}})
        );
        let back: RewriteExpr = serde_json::from_value(json).unwrap();
        assert_eq!(expr, back);
    }

    #[test]
    fn tuple_to_userset_also_accepts_legacy_object_form() {
        let raw = serde_json::json!({
            "tupleToUserset": {"tupleset": {"relation": "parent"}, "computedUserset": {"relation": "viewer"}}
        });
        let expr: RewriteExpr = serde_json::from_value(raw).unwrap();
        match expr {
            RewriteExpr::TupleToUserset(ttu) => {
                assert_eq!(ttu.tupleset.relation, "parent");
                assert_eq!(ttu.computed_userset.relation, "viewer");
            }
            other => panic!("expected tupleToUserset, got {other:?}"),
        }
    }

    #[test]
    fn canonicalize_is_order_independent() {
        let a = RewriteExpr::Union(vec![
            RewriteExpr::ComputedUserset("editor".into()),
            RewriteExpr::ComputedUserset("owner".into()),
        ]);
        let b = a.clone();
        assert_eq!(canonicalize(&a), canonicalize(&b));
    }

    #[test]
    fn default_namespaces_cover_file_group_and_memory() {
        let defaults = default_namespaces();
        let object_types: Vec<&str> = defaults.iter().map(|(t, _)| *t).collect();
        assert_eq!(object_types, vec!["file", "group", "memory"]);
    }

    #[test]
    fn default_file_namespace_matches_section_6_shape() {
        let (_, file) = default_namespaces()
            .into_iter()
            .find(|(t, _)| *t == "file")
            .unwrap();

        assert!(matches!(file.relations["owner"], RewriteExpr::This));
        assert!(matches!(file.relations["editor"], RewriteExpr::This));
        match &file.relations["viewer"] {
            RewriteExpr::Union(parts) => assert_eq!(parts.len(), 3),
            other => panic!("expected union, got {other:?}"),
        }
        match &file.relations["parent_viewer"] {
            RewriteExpr::TupleToUserset(ttu) => {
                assert_eq!(ttu.tupleset.relation, "parent");
                assert_eq!(ttu.computed_userset.relation, "viewer");
            }
            other => panic!("expected tupleToUserset, got {other:?}"),
        }
        assert_eq!(file.permissions["read"].len(), 2);
        assert_eq!(file.permissions["write"].len(), 2);
    }

    #[test]
    fn default_group_namespace_has_member_and_owner_relations() {
        let (_, group) = default_namespaces()
            .into_iter()
            .find(|(t, _)| *t == "group")
            .unwrap();

        assert!(matches!(group.relations["owner"], RewriteExpr::This));
        match &group.relations["member"] {
            RewriteExpr::Union(parts) => assert_eq!(parts.len(), 2),
            other => panic!("expected union, got {other:?}"),
        }
    }
}
