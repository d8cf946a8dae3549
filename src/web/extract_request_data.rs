use axum::{
    extract::{FromRequest, Multipart, Request},
    http::header,
};
use tracing::{debug, warn};

use super::error::ApiError;

// Pulls the uploaded image out of a multipart request. The contract is one
// field named "image"; anything without it is answered with the fixed
// "No file uploaded" message.
pub async fn extract_upload_image(
    request: Request,
) -> Result<(Vec<u8>, Option<String>), ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if !content_type.starts_with("multipart/form-data") {
        return Err(ApiError::BadRequest("No file uploaded".to_string()));
    }

    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to process multipart request: {}", e)))?;

    let mut image_data_opt: Option<Vec<u8>> = None;
    let mut content_type_opt: Option<String> = None;

    // Loop through all fields to find "image" and ignore others
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Failed to process multipart field: {}", e)))?
    {
        if field.name() == Some("image") {
            if image_data_opt.is_some() {
                warn!("Multiple 'image' fields found in multipart request, using the last one");
            }

            let content_type_str = field.content_type().map(str::to_string);
            debug!("Received image with content type: {:?}", content_type_str);

            let data = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Failed to read image data: {}", e)))?
                .to_vec();

            if data.is_empty() {
                return Err(ApiError::BadRequest(
                    "Uploaded 'image' field is empty.".to_string(),
                ));
            }

            image_data_opt = Some(data);
            content_type_opt = content_type_str;
        } else {
            debug!(
                "Ignoring multipart field: {}",
                field.name().unwrap_or("unnamed")
            );
        }
    }

    match image_data_opt {
        Some(data) => Ok((data, content_type_opt)),
        None => Err(ApiError::BadRequest("No file uploaded".to_string())),
    }
}
