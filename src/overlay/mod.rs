//! Text overlay compositing.
//!
//! [`compose`] turns a styling request into an SVG fragment sized to the base
//! image. It performs no pixel work; [`render_overlay`] rasterises the fragment and
//! merges it onto the decoded image.

mod font;
mod format;
mod render;

use serde::Deserialize;
use tracing::warn;

pub use font::FontLibrary;
pub use format::{OutputFormat, resolve_output_format};
pub use render::{
    DecodedImage, EncodeQuality, RenderedImage, apply_overlay, composite, decode_image,
    encode_image, rasterize_overlay, render_overlay,
};

pub const DEFAULT_TEXT: &str = "Sample Text";
pub const DEFAULT_FONT_FAMILY: &str = "Arial";
pub const DEFAULT_FONT_COLOR: &str = "#FFFFFF";
pub const DEFAULT_STROKE_COLOR: &str = "#000000";
pub const DEFAULT_POSITION: &str = "50%";
const MIN_DERIVED_FONT_SIZE: u32 = 20;

/// Pixel size of the base image plus the format it was decoded from, if known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
    pub detected_format: Option<String>,
}

/// Raw styling parameters as supplied by a caller. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OverlayRequest {
    pub text: Option<String>,
    pub font_family: Option<String>,
    pub font_size: Option<u32>,
    pub font_color: Option<String>,
    pub stroke_color: Option<String>,
    pub stroke_width: Option<u32>,
    pub x_position: Option<String>,
    pub y_position: Option<String>,
    pub text_align: Option<String>,
    pub dominant_baseline: Option<String>,
    pub output_format: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextAnchor {
    Start,
    #[default]
    Middle,
    End,
}

impl TextAnchor {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "start" => Some(TextAnchor::Start),
            "middle" => Some(TextAnchor::Middle),
            "end" => Some(TextAnchor::End),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TextAnchor::Start => "start",
            TextAnchor::Middle => "middle",
            TextAnchor::End => "end",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DominantBaseline {
    Auto,
    #[default]
    Middle,
    Hanging,
    Mathematical,
}

impl DominantBaseline {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(DominantBaseline::Auto),
            "middle" => Some(DominantBaseline::Middle),
            "hanging" => Some(DominantBaseline::Hanging),
            "mathematical" => Some(DominantBaseline::Mathematical),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DominantBaseline::Auto => "auto",
            DominantBaseline::Middle => "middle",
            DominantBaseline::Hanging => "hanging",
            DominantBaseline::Mathematical => "mathematical",
        }
    }
}

/// Fully defaulted overlay options. `font_size` and `stroke_width` are never zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOverlayOptions {
    pub text: String,
    pub font_family: String,
    pub font_size: u32,
    pub font_color: String,
    pub stroke_color: String,
    pub stroke_width: u32,
    pub x_position: String,
    pub y_position: String,
    pub text_anchor: TextAnchor,
    pub dominant_baseline: DominantBaseline,
    pub output_format: OutputFormat,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct Composition {
    pub markup: String,
    pub options: ResolvedOverlayOptions,
}

pub fn default_font_size(width: u32, height: u32) -> u32 {
    (width.min(height) / 12).max(MIN_DERIVED_FONT_SIZE)
}

pub fn default_stroke_width(font_size: u32) -> u32 {
    (font_size / 20).max(1)
}

pub fn resolve_options(
    dimensions: &ImageDimensions,
    request: &OverlayRequest,
) -> ResolvedOverlayOptions {
    let font_size = request
        .font_size
        .filter(|size| *size > 0)
        .unwrap_or_else(|| default_font_size(dimensions.width, dimensions.height));
    let stroke_width = request
        .stroke_width
        .map(|width| width.max(1))
        .unwrap_or_else(|| default_stroke_width(font_size));

    let text_anchor = match non_blank(&request.text_align) {
        Some(raw) => TextAnchor::parse(raw).unwrap_or_else(|| {
            warn!("unsupported textAlign '{}'; using middle", raw);
            TextAnchor::default()
        }),
        None => TextAnchor::default(),
    };
    let dominant_baseline = match non_blank(&request.dominant_baseline) {
        Some(raw) => DominantBaseline::parse(raw).unwrap_or_else(|| {
            warn!("unsupported dominantBaseline '{}'; using middle", raw);
            DominantBaseline::default()
        }),
        None => DominantBaseline::default(),
    };

    ResolvedOverlayOptions {
        text: request
            .text
            .as_deref()
            .filter(|text| !text.is_empty())
            .unwrap_or(DEFAULT_TEXT)
            .to_string(),
        font_family: or_default(&request.font_family, DEFAULT_FONT_FAMILY),
        font_size,
        font_color: or_default(&request.font_color, DEFAULT_FONT_COLOR),
        stroke_color: or_default(&request.stroke_color, DEFAULT_STROKE_COLOR),
        stroke_width,
        x_position: or_default(&request.x_position, DEFAULT_POSITION),
        y_position: or_default(&request.y_position, DEFAULT_POSITION),
        text_anchor,
        dominant_baseline,
        output_format: resolve_output_format(
            request.output_format.as_deref(),
            dimensions.detected_format.as_deref(),
        ),
        width: dimensions.width,
        height: dimensions.height,
    }
}

/// Resolves `request` against the base image and builds the overlay markup.
pub fn compose(dimensions: &ImageDimensions, request: &OverlayRequest) -> Composition {
    let options = resolve_options(dimensions, request);
    let markup = build_markup(&options);
    Composition { markup, options }
}

pub fn build_markup(options: &ResolvedOverlayOptions) -> String {
    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">"#,
        w = options.width,
        h = options.height
    ));
    svg.push_str(&format!(
        r##"<text x="{x}" y="{y}" font-family="{family}" font-size="{size}" fill="{fill}" stroke="{stroke}" stroke-width="{stroke_width}" stroke-linecap="round" stroke-linejoin="round" paint-order="stroke" text-anchor="{anchor}" dominant-baseline="{baseline}">{text}</text>"##,
        x = escape_xml(&options.x_position),
        y = escape_xml(&options.y_position),
        family = escape_xml(&options.font_family),
        size = options.font_size,
        fill = escape_xml(&options.font_color),
        stroke = escape_xml(&options.stroke_color),
        stroke_width = options.stroke_width,
        anchor = options.text_anchor.as_str(),
        baseline = options.dominant_baseline.as_str(),
        text = escape_xml(&options.text)
    ));
    svg.push_str("</svg>");
    svg
}

pub fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|value| !value.is_empty())
}

fn or_default(value: &Option<String>, default: &str) -> String {
    non_blank(value).unwrap_or(default).to_string()
}
