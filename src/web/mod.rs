// Web server module
// Handles the HTTP endpoints for background removal

mod app;
mod error;
mod extract_request_data;
mod handlers;
mod image_codec;
mod listeners;
mod models;

pub use app::create_app;
pub use listeners::create_listener;

use std::sync::Arc;

use crate::engine::BackgroundRemover;

// Maximum allowed size for image upload requests
pub const MAX_IMAGE_SIZE_BYTES: usize = 100 * 1024 * 1024; // 100MB

pub type SharedRemover = Arc<dyn BackgroundRemover>;
