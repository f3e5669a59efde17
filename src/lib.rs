//! PDF Image Extraction Service
//!
//! Accepts PDF uploads over HTTP, finds every embedded raster image and
//! returns each one base64-encoded together with its dimensions, format and
//! colour mode.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use handlers::{create_router, AppState};
