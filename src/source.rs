//! Where the processing job gets its input image from.
//!
//! Every source goes through [`ImageFetcher::fetch_image_bytes`], so callers
//! never see the marketplace integration directly. Marketplace identifiers
//! (DIDs) are read from the compute-to-data input directory when the job runs
//! inside one, and otherwise resolved to a URL by an [`AssetResolver`].

use anyhow::{Context, Result, anyhow};
use futures_util::StreamExt;
use serde::Serialize;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<Vec<u8>>> + Send + 'a>>;
pub type ResolveFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum ImageSource {
    LocalPath(PathBuf),
    RemoteUrl(String),
    Marketplace(String),
}

impl ImageSource {
    /// First configured source wins: local path, then URL, then DID.
    pub fn select(path: Option<&str>, url: Option<&str>, did: Option<&str>) -> Option<Self> {
        let non_blank = |value: Option<&str>| {
            value
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string)
        };
        if let Some(path) = non_blank(path) {
            return Some(ImageSource::LocalPath(PathBuf::from(path)));
        }
        if let Some(url) = non_blank(url) {
            return Some(ImageSource::RemoteUrl(url));
        }
        non_blank(did).map(ImageSource::Marketplace)
    }

    pub fn describe(&self) -> String {
        match self {
            ImageSource::LocalPath(path) => format!("file {}", path.display()),
            ImageSource::RemoteUrl(url) => format!("url {}", url),
            ImageSource::Marketplace(did) => format!("asset {}", did),
        }
    }
}

/// Turns a marketplace identifier into a downloadable URL.
pub trait AssetResolver: Send + Sync {
    fn resolve<'a>(&'a self, did: &'a str) -> ResolveFuture<'a>;
}

/// Resolves `did` to `<base_url>/<did>` on an asset gateway.
#[derive(Debug, Clone)]
pub struct GatewayResolver {
    base_url: String,
}

impl GatewayResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl AssetResolver for GatewayResolver {
    fn resolve<'a>(&'a self, did: &'a str) -> ResolveFuture<'a> {
        Box::pin(async move {
            let did = checked_did(did)?;
            let base = self.base_url.trim();
            if base.is_empty() {
                return Err(anyhow!("asset gateway url is empty"));
            }
            let mut url = reqwest::Url::parse(base)
                .with_context(|| format!("invalid asset gateway url: {}", base))?;
            url.path_segments_mut()
                .map_err(|_| anyhow!("asset gateway url cannot take a path: {}", base))?
                .pop_if_empty()
                .push(did);
            Ok(url.to_string())
        })
    }
}

pub trait ImageFetcher: Send + Sync {
    fn fetch_image_bytes<'a>(&'a self, source: &'a ImageSource) -> FetchFuture<'a>;
}

#[derive(Clone)]
pub struct SourceFetcher {
    client: reqwest::Client,
    max_download_bytes: usize,
    inputs_dir: PathBuf,
    resolver: Option<Arc<dyn AssetResolver>>,
}

impl SourceFetcher {
    pub fn new(timeout: Duration, max_download_bytes: usize, inputs_dir: PathBuf) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .with_context(|| "failed to build http client")?;
        Ok(Self {
            client,
            max_download_bytes,
            inputs_dir,
            resolver: None,
        })
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn AssetResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Path where a compute-to-data job receives the first file of `did`.
    pub fn compute_input_path(&self, did: &str) -> Result<PathBuf> {
        Ok(self.inputs_dir.join(checked_did(did)?).join("0"))
    }

    async fn read_local(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read image file: {}", path.display()))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to fetch image: {}", url))?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("failed to fetch image: {} returned {}", url, status));
        }
        if let Some(length) = response.content_length() {
            if length > self.max_download_bytes as u64 {
                return Err(anyhow!(
                    "image at {} is {} bytes (limit {})",
                    url,
                    length,
                    self.max_download_bytes
                ));
            }
        }
        let mut stream = response.bytes_stream();
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.with_context(|| format!("failed to read image body: {}", url))?;
            if bytes.len() + chunk.len() > self.max_download_bytes {
                return Err(anyhow!(
                    "image at {} exceeds {} bytes",
                    url,
                    self.max_download_bytes
                ));
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes)
    }

    async fn fetch_asset(&self, did: &str) -> Result<Vec<u8>> {
        let local = self.compute_input_path(did)?;
        if local.is_file() {
            info!("source: using compute input {}", local.display());
            return self.read_local(&local).await;
        }
        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| anyhow!("no asset resolver configured for {}", did))?;
        let url = resolver
            .resolve(did)
            .await
            .with_context(|| format!("failed to resolve asset {}", did))?;
        info!("source: asset {} resolved to {}", did, url);
        self.download(&url).await
    }
}

impl ImageFetcher for SourceFetcher {
    fn fetch_image_bytes<'a>(&'a self, source: &'a ImageSource) -> FetchFuture<'a> {
        Box::pin(async move {
            info!("source: fetching {}", source.describe());
            let bytes = match source {
                ImageSource::LocalPath(path) => self.read_local(path).await?,
                ImageSource::RemoteUrl(url) => self.download(url).await?,
                ImageSource::Marketplace(did) => self.fetch_asset(did).await?,
            };
            ensure_image(&bytes, source)?;
            Ok(bytes)
        })
    }
}

/// A DID must name exactly one directory under the inputs dir.
fn checked_did(did: &str) -> Result<&str> {
    let did = did.trim();
    let mut components = Path::new(did).components();
    let single_normal = matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    );
    if !single_normal || did.contains(['/', '\\']) {
        return Err(anyhow!("invalid asset id: {:?}", did));
    }
    Ok(did)
}

fn ensure_image(bytes: &[u8], source: &ImageSource) -> Result<()> {
    match infer::get(bytes) {
        Some(kind) if kind.mime_type().starts_with("image/") => Ok(()),
        Some(kind) => Err(anyhow!(
            "{} is not an image (detected '{}')",
            source.describe(),
            kind.mime_type()
        )),
        None => Err(anyhow!("{} is not a recognised image", source.describe())),
    }
}
