use serde::{Deserialize, Serialize};

/// Acting identity for tenant-scoped operations, passed explicitly through the call chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorContext {
    pub tenant_id: i64,
    pub user_id: i64,
}

impl ActorContext {
    pub fn new(tenant_id: i64, user_id: i64) -> Self {
        Self { tenant_id, user_id }
    }
}
