pub mod clients_api;
mod http_server;

pub use http_server::{build_router, run, AppState};
