//! Standalone processing job: fetch one image, filter it, caption it and
//! write the result plus `manifest.json` into the output directory.

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::info;

use crate::filters::{Filter, resolve_filter};
use crate::overlay::{
    EncodeQuality, FontLibrary, OutputFormat, OverlayRequest, apply_overlay, decode_image,
    encode_image, resolve_output_format,
};
use crate::settings::Settings;
use crate::source::{GatewayResolver, ImageFetcher, ImageSource, SourceFetcher};

pub const MANIFEST_FILE_NAME: &str = "manifest.json";
pub const DEFAULT_OUTPUT_DIR: &str = "/data/outputs";
pub const DEFAULT_INPUTS_DIR: &str = "/data/inputs";
pub const DEFAULT_OUTPUT_NAME: &str = "processed_image";
pub const DEFAULT_CAPTION_COLOR: &str = "#0000FF";
const CAPTION_Y_POSITION: &str = "90%";

/// Job parameters, read once from the environment.
#[derive(Debug, Clone)]
pub struct JobEnv {
    pub image_path: Option<String>,
    pub image_url: Option<String>,
    pub did: Option<String>,
    pub gateway_url: Option<String>,
    pub filter: Option<String>,
    pub overlay_text: Option<String>,
    pub overlay_color: Option<String>,
    pub output_format: Option<String>,
    pub output_name: String,
    pub output_dir: PathBuf,
    pub inputs_dir: PathBuf,
}

impl Default for JobEnv {
    fn default() -> Self {
        Self {
            image_path: None,
            image_url: None,
            did: None,
            gateway_url: None,
            filter: None,
            overlay_text: None,
            overlay_color: None,
            output_format: None,
            output_name: DEFAULT_OUTPUT_NAME.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            inputs_dir: PathBuf::from(DEFAULT_INPUTS_DIR),
        }
    }
}

impl JobEnv {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let did = match get("DIDS") {
            Some(raw) => first_did(&raw)?,
            None => get("ASSET_DID"),
        };
        let defaults = JobEnv::default();
        Ok(Self {
            image_path: get("IMAGE_PATH"),
            image_url: get("IMAGE_URL"),
            did,
            gateway_url: get("ASSET_GATEWAY_URL"),
            filter: get("FILTER"),
            // caption text keeps its surrounding whitespace
            overlay_text: lookup("OVERLAY_TEXT").filter(|value| !value.trim().is_empty()),
            overlay_color: get("OVERLAY_COLOR"),
            output_format: get("OUTPUT_FORMAT"),
            output_name: get("OUTPUT_NAME").unwrap_or(defaults.output_name),
            output_dir: get("OUTPUT_DIR").map(PathBuf::from).unwrap_or(defaults.output_dir),
            inputs_dir: get("INPUTS_DIR").map(PathBuf::from).unwrap_or(defaults.inputs_dir),
        })
    }

    pub fn source(&self) -> Option<ImageSource> {
        ImageSource::select(
            self.image_path.as_deref(),
            self.image_url.as_deref(),
            self.did.as_deref(),
        )
    }
}

fn first_did(raw: &str) -> Result<Option<String>> {
    let dids: Vec<String> =
        serde_json::from_str(raw).with_context(|| format!("invalid DIDS value: {}", raw))?;
    Ok(dids.into_iter().map(|did| did.trim().to_string()).find(|did| !did.is_empty()))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobManifest {
    pub source: ImageSource,
    pub filter: Option<Filter>,
    pub text: Option<String>,
    pub output: String,
    pub format: OutputFormat,
    pub mime: String,
    pub width: u32,
    pub height: u32,
    pub bytes: usize,
    pub created_at: String,
}

/// Builds the fetcher and font library from `settings` and runs the job.
pub async fn run(settings: &Settings, env: &JobEnv) -> Result<JobManifest> {
    let mut fetcher = SourceFetcher::new(
        Duration::from_secs(settings.fetch_timeout_secs),
        settings.max_download_bytes,
        env.inputs_dir.clone(),
    )?;
    if let Some(url) = env.gateway_url.as_deref() {
        fetcher = fetcher.with_resolver(Arc::new(GatewayResolver::new(url)));
    }
    let fonts = FontLibrary::load(&settings.fonts)?;
    process(env, &fetcher, &fonts, &settings.encoding).await
}

pub async fn process(
    env: &JobEnv,
    fetcher: &dyn ImageFetcher,
    fonts: &FontLibrary,
    quality: &EncodeQuality,
) -> Result<JobManifest> {
    let source = env
        .source()
        .ok_or_else(|| anyhow!("no image source configured (set IMAGE_PATH, IMAGE_URL or DIDS)"))?;
    let bytes = fetcher.fetch_image_bytes(&source).await?;

    let env = env.clone();
    let fonts = fonts.clone();
    let quality = *quality;
    tokio::task::spawn_blocking(move || render_and_write(&env, source, &bytes, &fonts, &quality))
        .await
        .with_context(|| "image processing task failed")?
}

fn render_and_write(
    env: &JobEnv,
    source: ImageSource,
    bytes: &[u8],
    fonts: &FontLibrary,
    quality: &EncodeQuality,
) -> Result<JobManifest> {
    let decoded = decode_image(bytes)?;
    let detected = decoded.dimensions().detected_format;
    let filter = resolve_filter(env.filter.as_deref());
    let mut image = decoded.image;
    if let Some(filter) = filter {
        info!("job: applying {} filter", filter);
        image = filter.apply(&image);
    }

    let (image, format) = match env.overlay_text.as_deref() {
        Some(text) => {
            info!("job: adding text overlay");
            let request = OverlayRequest {
                text: Some(text.to_string()),
                font_color: Some(
                    env.overlay_color
                        .clone()
                        .unwrap_or_else(|| DEFAULT_CAPTION_COLOR.to_string()),
                ),
                y_position: Some(CAPTION_Y_POSITION.to_string()),
                output_format: env.output_format.clone(),
                ..OverlayRequest::default()
            };
            let (image, options) = apply_overlay(&image, detected, &request, fonts)?;
            (image, options.output_format)
        }
        None => {
            let format = resolve_output_format(env.output_format.as_deref(), detected.as_deref());
            (image, format)
        }
    };

    let encoded = encode_image(&image, format, quality)?;
    std::fs::create_dir_all(&env.output_dir).with_context(|| {
        format!("failed to create output dir: {}", env.output_dir.display())
    })?;
    let file_name = format!("{}.{}", env.output_name, format.extension());
    let output_path = env.output_dir.join(&file_name);
    write_atomically(&env.output_dir, &output_path, &encoded)?;
    info!("job: wrote {}", output_path.display());

    let manifest = JobManifest {
        source,
        filter,
        text: env.overlay_text.clone(),
        output: file_name,
        format,
        mime: format.mime().to_string(),
        width: image.width(),
        height: image.height(),
        bytes: encoded.len(),
        created_at: OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .with_context(|| "failed to format timestamp")?,
    };
    let manifest_path = env.output_dir.join(MANIFEST_FILE_NAME);
    let json = serde_json::to_vec_pretty(&manifest)?;
    write_atomically(&env.output_dir, &manifest_path, &json)?;
    Ok(manifest)
}

fn write_atomically(dir: &Path, destination: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = tempfile::Builder::new()
        .prefix(".image-overlay-")
        .tempfile_in(dir)
        .with_context(|| format!("failed to create temp file in {}", dir.display()))?;
    file.write_all(bytes)
        .with_context(|| format!("failed to write {}", destination.display()))?;
    file.persist(destination)
        .with_context(|| format!("failed to persist {}", destination.display()))?;
    Ok(())
}
