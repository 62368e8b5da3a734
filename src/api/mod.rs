mod analytics;
mod handlers;
mod routes;

pub use handlers::{ApiState, ErrorResponse, HealthResponse};
pub use routes::create_api_router;
