// API handlers for the web server

use axum::{
    extract::{Request, State},
    response::{Html, Response},
};
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    SharedRemover,
    error::ApiError,
    extract_request_data::extract_upload_image,
    image_codec::{decode_upload, encode_png_response},
};

// --- GET / ---
// Static landing page with the upload form
pub async fn home() -> Html<&'static str> {
    Html(include_str!("../../assets/home.html"))
}

// --- POST /remove-bg ---
// Removes the background from one uploaded image and returns it as a PNG
// download. Pipeline: extract multipart field, decode, segment, encode.
pub async fn remove_background(
    State(remover): State<SharedRemover>,
    request: Request,
) -> Result<Response, ApiError> {
    let request_id = Uuid::new_v4();

    let (image_data, input_content_type) = extract_upload_image(request).await?;

    info!(
        "Background removal request: request_id={}, {} byte(s), content type {:?}",
        request_id,
        image_data.len(),
        input_content_type
    );

    // Decode the uploaded bytes
    let image = tokio::task::spawn_blocking(move || {
        decode_upload(&image_data, input_content_type.as_deref())
    })
    .await
    .map_err(|e| ApiError::InternalServerError(format!("Image decode task failed: {}", e)))??;

    let (width, height) = (image.width(), image.height());

    // Hand the bitmap to the segmentation engine
    let cutout = remover.remove_background(image).await?;

    debug!(
        "Background removed: {}x{} input, request_id={}",
        width, height, request_id
    );

    // Encode the result
    tokio::task::spawn_blocking(move || encode_png_response(&cutout))
        .await
        .map_err(|e| ApiError::InternalServerError(format!("Image encode task failed: {}", e)))?
}
