use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, info};

use super::models::ErrorResponse;
use super::state::ServerState;
use super::upload::{TEXT_FIELD, UploadForm};
use crate::overlay::{RenderedImage, render_overlay};

pub(crate) const NO_IMAGE_MESSAGE: &str = "No image file uploaded.";
pub(crate) const NO_TEXT_MESSAGE: &str = "No text parameter provided for overlay.";

#[derive(Debug)]
pub(crate) struct ServerError {
    pub(crate) status: StatusCode,
    pub(crate) message: String,
}

impl ServerError {
    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub(crate) fn upload(message: impl Into<String>) -> Self {
        Self::bad_request(format!("File upload error: {}", message.into()))
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        ServerError::internal(format!("{:#}", err))
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("request failed ({}): {}", self.status, self.message);
        } else {
            info!("request rejected ({}): {}", self.status, self.message);
        }
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

pub(crate) async fn overlay_request(
    state: &ServerState,
    form: UploadForm,
) -> Result<RenderedImage, ServerError> {
    let request = form.overlay_request();
    let Some(image) = form.image else {
        return Err(ServerError::bad_request(NO_IMAGE_MESSAGE));
    };
    if !form.fields.contains_key(TEXT_FIELD) {
        return Err(ServerError::bad_request(NO_TEXT_MESSAGE));
    }
    info!(
        "add-text: {} ({}, {} bytes)",
        image.file_name.as_deref().unwrap_or("upload"),
        image.content_type,
        image.bytes.len()
    );

    let fonts = state.fonts.clone();
    let quality = state.settings.encoding;
    let rendered = tokio::task::spawn_blocking(move || {
        render_overlay(&image.bytes, &request, &fonts, &quality)
    })
    .await
    .map_err(|err| ServerError::internal(format!("image task failed: {}", err)))??;
    info!(
        "add-text: rendered {}x{} as {}",
        rendered.options.width, rendered.options.height, rendered.options.output_format
    );
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::FontLibrary;
    use crate::server::upload::UploadedImage;
    use crate::settings::Settings;
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use std::collections::HashMap;
    use std::io::Cursor;

    fn state() -> ServerState {
        ServerState {
            settings: Settings::default(),
            fonts: FontLibrary::empty(),
        }
    }

    fn png_upload() -> UploadedImage {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(400, 300, Rgba([0, 90, 0, 255])))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .expect("encode png");
        UploadedImage {
            bytes,
            content_type: "image/png".to_string(),
            file_name: Some("photo.png".to_string()),
        }
    }

    #[tokio::test]
    async fn missing_image_is_rejected_first() {
        let err = overlay_request(&state(), UploadForm::default())
            .await
            .err()
            .expect("no image");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, NO_IMAGE_MESSAGE);
    }

    #[tokio::test]
    async fn absent_text_differs_from_empty_text() {
        let form = UploadForm {
            image: Some(png_upload()),
            fields: HashMap::new(),
        };
        let err = overlay_request(&state(), form).await.err().expect("no text");
        assert_eq!(err.message, NO_TEXT_MESSAGE);

        let form = UploadForm {
            image: Some(png_upload()),
            fields: HashMap::from([(TEXT_FIELD.to_string(), String::new())]),
        };
        let rendered = overlay_request(&state(), form).await.expect("empty text renders");
        assert_eq!(rendered.options.text, "Sample Text");
        assert_eq!(rendered.mime(), "image/png");
    }

    #[tokio::test]
    async fn corrupt_image_is_a_processing_error() {
        let form = UploadForm {
            image: Some(UploadedImage {
                bytes: b"\x89PNG\r\n\x1a\nbroken".to_vec(),
                content_type: "image/png".to_string(),
                file_name: None,
            }),
            fields: HashMap::from([(TEXT_FIELD.to_string(), "hi".to_string())]),
        };
        let err = overlay_request(&state(), form).await.err().expect("corrupt");
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.message.contains("failed to decode image"));
    }

    #[test]
    fn upload_errors_carry_prefix() {
        let err = ServerError::upload("File too large");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "File upload error: File too large");
    }
}
