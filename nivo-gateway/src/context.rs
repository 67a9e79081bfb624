//! Per-request context threaded through the middleware chain (spec §9:
//! "Request context carries request-id, authenticated user id, and
//! deadline").

use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub user_id: Option<String>,
    pub deadline: Instant,
}

impl RequestContext {
    #[must_use]
    pub fn new(request_id: Uuid, read_write_timeout: std::time::Duration) -> Self {
        Self {
            request_id,
            user_id: None,
            deadline: Instant::now() + read_write_timeout,
        }
    }
}
