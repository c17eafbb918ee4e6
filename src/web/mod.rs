//! Web server module
//!
//! A thin HTTP surface over [`ForecastService`](crate::service::ForecastService).

mod handlers;
mod routes;
mod state;

pub use handlers::{ApiError, ErrorBody};
pub use routes::create_router;
pub use state::AppState;
