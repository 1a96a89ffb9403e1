use image::DynamicImage;
use std::fmt;
use tracing::warn;

const BLUR_SIGMA: f32 = 5.0;
const SHARPEN_SIGMA: f32 = 5.0;
const SHARPEN_THRESHOLD: i32 = 3;

/// The canned filters the processing job can apply before the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Filter {
    Blur,
    Grayscale,
    Sharpen,
}

impl Filter {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "blur" => Some(Filter::Blur),
            "grayscale" | "greyscale" => Some(Filter::Grayscale),
            "sharpen" | "unsharp" => Some(Filter::Sharpen),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Filter::Blur => "blur",
            Filter::Grayscale => "grayscale",
            Filter::Sharpen => "sharpen",
        }
    }

    pub fn apply(self, image: &DynamicImage) -> DynamicImage {
        match self {
            Filter::Blur => image.blur(BLUR_SIGMA),
            // back to rgba so colored overlay text survives
            Filter::Grayscale => DynamicImage::ImageRgba8(image.grayscale().to_rgba8()),
            Filter::Sharpen => image.unsharpen(SHARPEN_SIGMA, SHARPEN_THRESHOLD),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Blank means no filter; unknown names are logged and ignored.
pub fn resolve_filter(value: Option<&str>) -> Option<Filter> {
    let raw = value.map(str::trim).filter(|value| !value.is_empty())?;
    let filter = Filter::parse(raw);
    if filter.is_none() {
        warn!("unknown filter '{}'; no filter applied", raw);
    }
    filter
}
