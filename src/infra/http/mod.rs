mod admin_routes;
pub mod middleware;
mod public;

pub use admin_routes::{AdminState, build_admin_router};
pub use public::{HttpState, build_router};
