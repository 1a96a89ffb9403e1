use anyhow::{Context, Result, anyhow};
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ImageFormat, RgbaImage};
use std::io::Cursor;
use tiny_skia::Pixmap;
use tracing::debug;
use usvg::{Options, Tree};

use super::{
    FontLibrary, ImageDimensions, OutputFormat, OverlayRequest, ResolvedOverlayOptions, compose,
};

/// Per-format encoder settings. Formats not listed use library defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeQuality {
    pub jpeg_quality: u8,
    pub avif_quality: u8,
    pub avif_speed: u8,
}

impl Default for EncodeQuality {
    fn default() -> Self {
        Self {
            jpeg_quality: 90,
            avif_quality: 80,
            avif_speed: 6,
        }
    }
}

pub struct DecodedImage {
    pub image: DynamicImage,
    pub format: Option<ImageFormat>,
}

impl DecodedImage {
    pub fn dimensions(&self) -> ImageDimensions {
        let detected_format = self.format.map(|format| {
            OutputFormat::from_image_format(format)
                .map(|known| known.as_str())
                .or_else(|| format.extensions_str().first().copied())
                .unwrap_or("unknown")
                .to_string()
        });
        ImageDimensions {
            width: self.image.width(),
            height: self.image.height(),
            detected_format,
        }
    }
}

pub struct RenderedImage {
    pub bytes: Vec<u8>,
    pub options: ResolvedOverlayOptions,
}

impl RenderedImage {
    pub fn mime(&self) -> &'static str {
        self.options.output_format.mime()
    }
}

pub fn decode_image(bytes: &[u8]) -> Result<DecodedImage> {
    let format = image::guess_format(bytes).ok();
    let image = image::load_from_memory(bytes).with_context(|| "failed to decode image")?;
    Ok(DecodedImage { image, format })
}

/// Rasterises overlay markup into a straight-alpha RGBA buffer.
pub fn rasterize_overlay(markup: &str, fonts: &FontLibrary) -> Result<RgbaImage> {
    let options = Options {
        fontdb: fonts.database(),
        ..Options::default()
    };
    let tree = Tree::from_str(markup, &options).with_context(|| "failed to parse overlay SVG")?;
    let size = tree.size().to_int_size();
    let mut pixmap =
        Pixmap::new(size.width(), size.height()).ok_or_else(|| anyhow!("empty overlay size"))?;
    resvg::render(&tree, tiny_skia::Transform::identity(), &mut pixmap.as_mut());

    let mut data = Vec::with_capacity(pixmap.data().len());
    for pixel in pixmap.pixels() {
        let color = pixel.demultiply();
        data.extend_from_slice(&[color.red(), color.green(), color.blue(), color.alpha()]);
    }
    RgbaImage::from_raw(size.width(), size.height(), data)
        .ok_or_else(|| anyhow!("failed to build image buffer from overlay"))
}

pub fn composite(base: &mut RgbaImage, overlay: &RgbaImage) {
    image::imageops::overlay(base, overlay, 0, 0);
}

/// Draws the overlay described by `request` onto `image`.
pub fn apply_overlay(
    image: &DynamicImage,
    detected_format: Option<String>,
    request: &OverlayRequest,
    fonts: &FontLibrary,
) -> Result<(DynamicImage, ResolvedOverlayOptions)> {
    let dimensions = ImageDimensions {
        width: image.width(),
        height: image.height(),
        detected_format,
    };
    let composition = compose(&dimensions, request);
    if !fonts.has_family(&composition.options.font_family) {
        debug!(
            "font family '{}' not installed; using fallback",
            composition.options.font_family
        );
    }
    let overlay = rasterize_overlay(&composition.markup, fonts)?;
    let mut base = image.to_rgba8();
    composite(&mut base, &overlay);
    Ok((DynamicImage::ImageRgba8(base), composition.options))
}

pub fn encode_image(
    image: &DynamicImage,
    format: OutputFormat,
    quality: &EncodeQuality,
) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    let mut cursor = Cursor::new(&mut bytes);
    let result = match format {
        OutputFormat::Jpeg => image.to_rgb8().write_with_encoder(JpegEncoder::new_with_quality(
            &mut cursor,
            quality.jpeg_quality.clamp(1, 100),
        )),
        OutputFormat::Png => image.to_rgba8().write_with_encoder(PngEncoder::new(&mut cursor)),
        OutputFormat::Webp => image
            .to_rgba8()
            .write_with_encoder(WebPEncoder::new_lossless(&mut cursor)),
        OutputFormat::Avif => image
            .to_rgba8()
            .write_with_encoder(AvifEncoder::new_with_speed_quality(
                &mut cursor,
                quality.avif_speed.clamp(1, 10),
                quality.avif_quality.clamp(1, 100),
            )),
        OutputFormat::Tiff | OutputFormat::Gif => {
            DynamicImage::ImageRgba8(image.to_rgba8()).write_to(&mut cursor, format.image_format())
        }
    };
    result.with_context(|| format!("failed to encode image as {}", format))?;
    Ok(bytes)
}

/// Decodes `bytes`, draws the text overlay and encodes the result.
pub fn render_overlay(
    bytes: &[u8],
    request: &OverlayRequest,
    fonts: &FontLibrary,
    quality: &EncodeQuality,
) -> Result<RenderedImage> {
    let decoded = decode_image(bytes)?;
    let detected = decoded.dimensions().detected_format;
    let (image, options) = apply_overlay(&decoded.image, detected, request, fonts)?;
    let bytes = encode_image(&image, options.output_format, quality)?;
    Ok(RenderedImage { bytes, options })
}
