// API-specific data models for the web server

use serde::{Deserialize, Serialize};

/// Fixed body shape of every error response
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ErrorResponse {
    pub error: String,
}
