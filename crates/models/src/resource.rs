//! Resource Map row — the `(resource_type, resource_id) <-> int32_id`
//! bijection that feeds Roaring Bitmaps.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMapRow {
    pub resource_int_id: i32,
    pub resource_type: String,
    pub resource_id: String,
}
