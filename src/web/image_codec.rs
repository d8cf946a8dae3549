use axum::{
    http::header,
    response::{IntoResponse, Response},
};
use image::DynamicImage;
use tracing::debug;

use super::error::ApiError;

// Helper function to decode the uploaded image bytes
pub fn decode_upload(
    image_data: &[u8],
    content_type_str: Option<&str>,
) -> Result<DynamicImage, ApiError> {
    let media_type = content_type_str.and_then(|s| s.parse::<mime::Mime>().ok());

    if let Some(media_type) = &media_type {
        if media_type.type_() != mime::IMAGE
            && media_type.essence_str() != "application/octet-stream"
        {
            return Err(ApiError::UnsupportedMediaType(format!(
                "Content type '{}' is not supported.",
                media_type
            )));
        }
    }

    let img_format_hint = media_type.as_ref().and_then(|m| match m.essence_str() {
        "image/jpeg" => Some(image::ImageFormat::Jpeg),
        "image/png" => Some(image::ImageFormat::Png),
        "image/webp" => Some(image::ImageFormat::WebP),
        "image/bmp" | "image/x-bmp" => Some(image::ImageFormat::Bmp),
        _ => None,
    });

    if let Some(format) = img_format_hint {
        image::load_from_memory_with_format(image_data, format).map_err(|e| {
            ApiError::ImageDecodeError(format!(
                "Failed to decode image (format: {:?}): {}",
                format, e
            ))
        })
    } else {
        image::load_from_memory(image_data).map_err(|e| {
            ApiError::ImageDecodeError(format!("Failed to auto-detect and decode image: {}", e))
        })
    }
}

// Helper function to encode the cutout and build the download response
pub fn encode_png_response(image: &DynamicImage) -> Result<Response, ApiError> {
    use image::ImageFormat;
    use std::io::Cursor;

    debug!(
        "Encoding output as PNG ({}x{}).",
        image.width(),
        image.height()
    );

    // Background removal implies transparency, so the output is always RGBA.
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();

    let mut buffer = Cursor::new(Vec::new());
    image::write_buffer_with_format(
        &mut buffer,
        rgba.as_raw(),
        width,
        height,
        image::ColorType::Rgba8,
        ImageFormat::Png,
    )
    .map_err(|e| ApiError::InternalServerError(format!("PNG encoding failed: {}", e)))?;

    Ok((
        [
            (header::CONTENT_TYPE, "image/png"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"output.png\"",
            ),
        ],
        buffer.into_inner(), // Bytes of the encoded PNG.
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_fixture() -> Vec<u8> {
        let image = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            4,
            4,
            image::Rgb([255, 0, 0]),
        ));
        let mut buffer = std::io::Cursor::new(Vec::new());
        image
            .write_to(&mut buffer, image::ImageFormat::Png)
            .expect("encode fixture");
        buffer.into_inner()
    }

    #[test]
    fn decodes_with_a_content_type_hint() {
        let decoded = decode_upload(&png_fixture(), Some("image/png")).expect("decode");
        assert_eq!((decoded.width(), decoded.height()), (4, 4));
    }

    #[test]
    fn decodes_without_a_content_type() {
        assert!(decode_upload(&png_fixture(), None).is_ok());
    }

    #[test]
    fn rejects_non_image_content_types() {
        let result = decode_upload(&png_fixture(), Some("text/plain"));
        assert!(matches!(result, Err(ApiError::UnsupportedMediaType(_))));
    }

    #[test]
    fn rejects_bytes_that_are_not_an_image() {
        let result = decode_upload(b"definitely not pixels", Some("image/png"));
        assert!(matches!(result, Err(ApiError::ImageDecodeError(_))));
    }

    #[test]
    fn encoded_response_carries_png_and_attachment_headers() {
        let image = DynamicImage::new_rgba8(2, 2);
        let response = encode_png_response(&image).expect("encode");

        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE.as_str()], "image/png");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION.as_str()],
            "attachment; filename=\"output.png\""
        );
    }
}
