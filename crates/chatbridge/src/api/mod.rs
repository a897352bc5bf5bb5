//! HTTP API.
//!
//! REST endpoints for the control panel and the `X-API-Key` bot API, plus the
//! `/ws` relay upgrade.

mod error;
mod handlers;
mod middleware;
mod routes;
mod state;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use middleware::API_KEY_HEADER;
pub use routes::create_router;
pub use state::AppState;
