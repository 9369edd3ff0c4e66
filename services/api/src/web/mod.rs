pub mod admin;
pub mod middleware;
pub mod progress;
pub mod rest;
pub mod routes;
pub mod state;

pub use routes::create_router;
pub use state::AppState;
