pub mod consistency;
pub mod directory_grant;
pub mod namespace;
pub mod refresh_token;
pub mod resource;
pub mod tiger;
pub mod tuple;
pub mod zone;

pub use consistency::{ConsistencyMode, ConsistencyToken};
pub use directory_grant::{DirectoryGrant, ExpansionStatus};
pub use namespace::{
    canonicalize, default_namespaces, ComputedUserset, DirectRelation, Namespace, NamespaceConfig,
    RelationName, RewriteExpr, Tupleset, TupleToUserset,
};
pub use refresh_token::RefreshTokenHistory;
pub use resource::ResourceMapRow;
pub use tiger::TigerBitmapRow;
pub use tuple::{RelationTuple, SubjectRef, SubjectType};
pub use zone::ZoneId;
