mod handlers;
mod models;
mod overlay;
mod state;
mod upload;

pub use handlers::{router, run_server};
