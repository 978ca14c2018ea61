pub mod api;
pub mod config;
pub mod error;
pub mod rvc;
pub mod tts;

pub use api::routes::{create_router, AppState};
pub use config::Config;
