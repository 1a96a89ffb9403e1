use axum::extract::Multipart;
use std::collections::HashMap;

use super::overlay::ServerError;
use crate::overlay::OverlayRequest;

pub(crate) const IMAGE_FIELD: &str = "image";
pub(crate) const TEXT_FIELD: &str = "text";

pub(crate) const ALLOWED_IMAGE_MIMES: [&str; 6] = [
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/avif",
    "image/tiff",
];

#[derive(Debug)]
pub(crate) struct UploadedImage {
    pub(crate) bytes: Vec<u8>,
    pub(crate) content_type: String,
    pub(crate) file_name: Option<String>,
}

#[derive(Debug, Default)]
pub(crate) struct UploadForm {
    pub(crate) image: Option<UploadedImage>,
    pub(crate) fields: HashMap<String, String>,
}

impl UploadForm {
    pub(crate) fn overlay_request(&self) -> OverlayRequest {
        let text = |name: &str| self.fields.get(name).cloned();
        let number = |name: &str| {
            self.fields
                .get(name)
                .and_then(|value| value.trim().parse::<u32>().ok())
        };
        OverlayRequest {
            text: text(TEXT_FIELD),
            font_family: text("fontFamily"),
            font_size: number("fontSize").filter(|size| *size > 0),
            font_color: text("fontColor"),
            stroke_color: text("strokeColor"),
            stroke_width: number("strokeWidth"),
            x_position: text("xPosition"),
            y_position: text("yPosition"),
            text_align: text("textAlign"),
            dominant_baseline: text("dominantBaseline"),
            output_format: text("outputFormat"),
        }
    }
}

/// Reads the whole form. The image is held in memory and capped at `max_file_bytes`.
pub(crate) async fn read_form(
    mut multipart: Multipart,
    max_file_bytes: usize,
) -> Result<UploadForm, ServerError> {
    let mut form = UploadForm::default();
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| ServerError::upload(err.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        // an `image` part without a filename is plain form data, not a file
        if name != IMAGE_FIELD || field.file_name().is_none() {
            let value = field
                .text()
                .await
                .map_err(|err| ServerError::upload(err.to_string()))?;
            form.fields.insert(name, value);
            continue;
        }

        if form.image.is_some() {
            return Err(ServerError::upload("Unexpected field"));
        }
        let content_type = field
            .content_type()
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or_default();
        if !ALLOWED_IMAGE_MIMES.contains(&content_type.as_str()) {
            return Err(ServerError::upload(format!(
                "Only image files are allowed (jpeg, png, gif, webp, avif, tiff); got '{}'",
                content_type
            )));
        }
        let file_name = field.file_name().map(|value| value.to_string());
        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|err| ServerError::upload(err.to_string()))?
        {
            if bytes.len() + chunk.len() > max_file_bytes {
                return Err(ServerError::upload(format!(
                    "File too large (limit {} bytes)",
                    max_file_bytes
                )));
            }
            bytes.extend_from_slice(&chunk);
        }
        form.image = Some(UploadedImage {
            bytes,
            content_type,
            file_name,
        });
    }
    Ok(form)
}
