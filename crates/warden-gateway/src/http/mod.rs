pub mod error;
pub mod health;
pub mod live;
pub mod methods;
pub mod params;
pub mod requests;
pub mod schedules;
pub mod tasks;

use serde::Deserialize;
use warden_core::types::PageRequest;

/// `{page}/{limit}` path segments of the paginated routes.
#[derive(Debug, Deserialize)]
pub struct PagePath {
    pub page: u32,
    pub limit: u32,
}

impl From<PagePath> for PageRequest {
    fn from(p: PagePath) -> Self {
        PageRequest::new(p.page, p.limit)
    }
}

/// `?q=` on the search routes.
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: Option<String>,
}

/// `?actor=` on state-changing routes without a body.
#[derive(Debug, Default, Deserialize)]
pub struct ActorQuery {
    #[serde(default)]
    pub actor: Option<String>,
}
