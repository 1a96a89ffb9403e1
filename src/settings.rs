use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::overlay::EncodeQuality;

const DEFAULT_SETTINGS_TOML: &str = include_str!("../settings.toml");

/// Process-wide configuration, built once at start-up and passed by reference.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
    pub fonts: FontSettings,
    pub encoding: EncodeQuality,
    pub fetch_timeout_secs: u64,
    pub max_download_bytes: usize,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct FontSettings {
    pub fallback_family: Option<String>,
    pub load_system_fonts: bool,
    pub dirs: Vec<String>,
    pub files: Vec<String>,
}

impl Default for FontSettings {
    fn default() -> Self {
        Self {
            fallback_family: None,
            load_system_fonts: true,
            dirs: Vec::new(),
            files: Vec::new(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_upload_bytes: 10 * 1024 * 1024,
            fonts: FontSettings::default(),
            encoding: EncodeQuality::default(),
            fetch_timeout_secs: 30,
            max_download_bytes: 50 * 1024 * 1024,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SettingsFile {
    server: Option<ServerSection>,
    fonts: Option<FontsSection>,
    encoding: Option<EncodingSection>,
    fetch: Option<FetchSection>,
    log: Option<LogSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerSection {
    host: Option<String>,
    port: Option<u16>,
    max_upload_bytes: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct FontsSection {
    fallback_family: Option<String>,
    load_system_fonts: Option<bool>,
    dirs: Option<Vec<String>>,
    files: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct EncodingSection {
    jpeg_quality: Option<u8>,
    avif_quality: Option<u8>,
    avif_speed: Option<u8>,
}

#[derive(Debug, Default, Deserialize)]
struct FetchSection {
    timeout_secs: Option<u64>,
    max_download_bytes: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct LogSection {
    level: Option<String>,
}

/// Embedded defaults, then `settings.toml`/`settings.local.toml` in the working
/// directory, then `extra_path`, then environment overrides.
pub fn load_settings(extra_path: Option<&Path>) -> Result<Settings> {
    let mut settings = Settings::default();
    let defaults: SettingsFile =
        toml::from_str(DEFAULT_SETTINGS_TOML).with_context(|| "failed to parse default settings")?;
    settings.merge(defaults);

    let mut ordered_paths = vec![
        PathBuf::from("settings.toml"),
        PathBuf::from("settings.local.toml"),
    ];
    if let Some(extra) = extra_path {
        if !extra.exists() {
            return Err(anyhow!("settings file not found: {}", extra.display()));
        }
        ordered_paths.push(extra.to_path_buf());
    }

    for path in ordered_paths {
        if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings: {}", path.display()))?;
            settings
                .merge_toml(&content)
                .with_context(|| format!("failed to parse settings: {}", path.display()))?;
        }
    }

    settings.apply_env(|key| std::env::var(key).ok())?;
    Ok(settings)
}

impl Settings {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn merge_toml(&mut self, content: &str) -> Result<()> {
        let parsed: SettingsFile = toml::from_str(content)?;
        self.merge(parsed);
        Ok(())
    }

    /// Applies `HOST`, `PORT`, `MAX_UPLOAD_BYTES`, `FONT_DIR`, `FETCH_TIMEOUT_SECS`
    /// and `LOG_LEVEL` from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        if let Some(host) = get("HOST") {
            self.host = host;
        }
        if let Some(port) = get("PORT") {
            self.port = port
                .parse()
                .with_context(|| format!("invalid PORT: {}", port))?;
        }
        if let Some(limit) = get("MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = limit
                .parse()
                .with_context(|| format!("invalid MAX_UPLOAD_BYTES: {}", limit))?;
        }
        if let Some(dir) = get("FONT_DIR") {
            self.fonts.dirs.push(dir);
        }
        if let Some(timeout) = get("FETCH_TIMEOUT_SECS") {
            self.fetch_timeout_secs = timeout
                .parse()
                .with_context(|| format!("invalid FETCH_TIMEOUT_SECS: {}", timeout))?;
        }
        if let Some(level) = get("LOG_LEVEL") {
            self.log_level = level;
        }
        Ok(())
    }

    fn merge(&mut self, incoming: SettingsFile) {
        if let Some(server) = incoming.server {
            if let Some(host) = server.host {
                if !host.trim().is_empty() {
                    self.host = host;
                }
            }
            if let Some(port) = server.port {
                self.port = port;
            }
            if let Some(limit) = server.max_upload_bytes {
                if limit > 0 {
                    self.max_upload_bytes = limit;
                }
            }
        }
        if let Some(fonts) = incoming.fonts {
            if let Some(family) = fonts.fallback_family {
                if !family.trim().is_empty() {
                    self.fonts.fallback_family = Some(family);
                }
            }
            if let Some(load) = fonts.load_system_fonts {
                self.fonts.load_system_fonts = load;
            }
            if let Some(dirs) = fonts.dirs {
                self.fonts.dirs.extend(dirs);
            }
            if let Some(files) = fonts.files {
                self.fonts.files.extend(files);
            }
        }
        if let Some(encoding) = incoming.encoding {
            if let Some(quality) = encoding.jpeg_quality {
                self.encoding.jpeg_quality = quality.clamp(1, 100);
            }
            if let Some(quality) = encoding.avif_quality {
                self.encoding.avif_quality = quality.clamp(1, 100);
            }
            if let Some(speed) = encoding.avif_speed {
                self.encoding.avif_speed = speed.clamp(1, 10);
            }
        }
        if let Some(fetch) = incoming.fetch {
            if let Some(timeout) = fetch.timeout_secs {
                if timeout > 0 {
                    self.fetch_timeout_secs = timeout;
                }
            }
            if let Some(limit) = fetch.max_download_bytes {
                if limit > 0 {
                    self.max_download_bytes = limit;
                }
            }
        }
        if let Some(log) = incoming.log {
            if let Some(level) = log.level {
                if !level.trim().is_empty() {
                    self.log_level = level;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn embedded() -> Settings {
        let mut settings = Settings::default();
        settings.merge_toml(DEFAULT_SETTINGS_TOML).expect("embedded settings");
        settings
    }

    #[test]
    fn embedded_defaults_match_upload_limit() {
        let settings = embedded();
        assert_eq!(settings.max_upload_bytes, 10 * 1024 * 1024);
        assert_eq!(settings.bind_addr(), "0.0.0.0:3000");
        assert_eq!(settings.encoding, EncodeQuality::default());
        assert_eq!(settings.fonts.fallback_family.as_deref(), Some("DejaVu Sans"));
    }

    #[test]
    fn later_files_override_earlier_values() {
        let mut settings = embedded();
        settings
            .merge_toml(
                r#"
                [server]
                port = 8080
                [encoding]
                jpeg_quality = 250
                [fonts]
                dirs = ["/opt/fonts"]
                load_system_fonts = false
                "#,
            )
            .expect("merge");
        assert_eq!(settings.port, 8080);
        assert_eq!(settings.encoding.jpeg_quality, 100);
        assert_eq!(settings.fonts.dirs, vec!["/opt/fonts".to_string()]);
        assert!(!settings.fonts.load_system_fonts);
        assert_eq!(settings.host, "0.0.0.0");
    }

    #[test]
    fn environment_overrides_apply_last() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("PORT", "9000"),
            ("HOST", "127.0.0.1"),
            ("FONT_DIR", "/usr/share/fonts/custom"),
            ("LOG_LEVEL", " debug "),
            ("MAX_UPLOAD_BYTES", ""),
        ]);
        let mut settings = embedded();
        settings
            .apply_env(|key| env.get(key).map(|value| value.to_string()))
            .expect("apply env");
        assert_eq!(settings.bind_addr(), "127.0.0.1:9000");
        assert_eq!(settings.fonts.dirs, vec!["/usr/share/fonts/custom".to_string()]);
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.max_upload_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn invalid_port_is_rejected() {
        let mut settings = Settings::default();
        let err = settings
            .apply_env(|key| (key == "PORT").then(|| "eighty".to_string()))
            .err()
            .expect("invalid port");
        assert!(err.to_string().contains("invalid PORT"));
    }

    #[test]
    fn missing_extra_settings_file_is_an_error() {
        let err = load_settings(Some(Path::new("/nonexistent/overlay.toml")))
            .err()
            .expect("missing file");
        assert!(err.to_string().contains("settings file not found"));
    }
}
