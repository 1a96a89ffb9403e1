use std::fmt;
use tracing::warn;

/// Encodings the overlay endpoint and the processing job can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    Webp,
    Avif,
    Tiff,
    Gif,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 6] = [
        OutputFormat::Jpeg,
        OutputFormat::Png,
        OutputFormat::Webp,
        OutputFormat::Avif,
        OutputFormat::Tiff,
        OutputFormat::Gif,
    ];

    /// Case-insensitive lookup; `jpg` is an alias of `jpeg`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Some(OutputFormat::Jpeg),
            "png" => Some(OutputFormat::Png),
            "webp" => Some(OutputFormat::Webp),
            "avif" => Some(OutputFormat::Avif),
            "tiff" => Some(OutputFormat::Tiff),
            "gif" => Some(OutputFormat::Gif),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpeg",
            OutputFormat::Png => "png",
            OutputFormat::Webp => "webp",
            OutputFormat::Avif => "avif",
            OutputFormat::Tiff => "tiff",
            OutputFormat::Gif => "gif",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "image/jpeg",
            OutputFormat::Png => "image/png",
            OutputFormat::Webp => "image/webp",
            OutputFormat::Avif => "image/avif",
            OutputFormat::Tiff => "image/tiff",
            OutputFormat::Gif => "image/gif",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Jpeg => "jpg",
            other => other.as_str(),
        }
    }

    pub fn image_format(self) -> image::ImageFormat {
        match self {
            OutputFormat::Jpeg => image::ImageFormat::Jpeg,
            OutputFormat::Png => image::ImageFormat::Png,
            OutputFormat::Webp => image::ImageFormat::WebP,
            OutputFormat::Avif => image::ImageFormat::Avif,
            OutputFormat::Tiff => image::ImageFormat::Tiff,
            OutputFormat::Gif => image::ImageFormat::Gif,
        }
    }

    pub fn from_image_format(format: image::ImageFormat) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|candidate| candidate.image_format() == format)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Picks the encoding for a request: the requested value, else the detected
/// source format, else png. Anything outside the whitelist becomes png.
pub fn resolve_output_format(requested: Option<&str>, detected: Option<&str>) -> OutputFormat {
    let requested = requested.map(str::trim).filter(|value| !value.is_empty());
    let detected = detected.map(str::trim).filter(|value| !value.is_empty());
    let Some(raw) = requested.or(detected) else {
        return OutputFormat::Png;
    };
    match OutputFormat::parse(raw) {
        Some(format) => format,
        None => {
            warn!("unsupported output format '{}'; falling back to png", raw);
            OutputFormat::Png
        }
    }
}
