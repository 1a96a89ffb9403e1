use anyhow::{Context, Result, anyhow};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use usvg::fontdb;

use crate::settings::FontSettings;

/// Read-only font database shared by every overlay render.
#[derive(Clone)]
pub struct FontLibrary {
    db: Arc<fontdb::Database>,
}

impl FontLibrary {
    pub fn load(settings: &FontSettings) -> Result<Self> {
        let mut db = fontdb::Database::new();
        if settings.load_system_fonts {
            db.load_system_fonts();
        }
        for dir in &settings.dirs {
            let path = Path::new(dir);
            if !path.is_dir() {
                return Err(anyhow!("font directory not found: {}", path.display()));
            }
            db.load_fonts_dir(path);
        }
        for file in &settings.files {
            let path = Path::new(file);
            db.load_font_file(path)
                .with_context(|| format!("failed to load font: {}", path.display()))?;
        }
        // usvg falls back to the serif family when no requested family matches.
        if let Some(family) = settings.fallback_family.as_deref() {
            db.set_serif_family(family);
            db.set_sans_serif_family(family);
        }
        info!("fonts: {} faces loaded", db.len());
        Ok(Self { db: Arc::new(db) })
    }

    pub fn empty() -> Self {
        Self {
            db: Arc::new(fontdb::Database::new()),
        }
    }

    pub fn database(&self) -> Arc<fontdb::Database> {
        self.db.clone()
    }

    pub fn face_count(&self) -> usize {
        self.db.len()
    }

    pub fn has_family(&self, family: &str) -> bool {
        let lower = family.trim().to_ascii_lowercase();
        let families = match lower.as_str() {
            "serif" => [fontdb::Family::Serif],
            "sans-serif" => [fontdb::Family::SansSerif],
            "monospace" => [fontdb::Family::Monospace],
            "cursive" => [fontdb::Family::Cursive],
            "fantasy" => [fontdb::Family::Fantasy],
            _ => [fontdb::Family::Name(family.trim())],
        };
        let query = fontdb::Query {
            families: &families,
            ..Default::default()
        };
        self.db.query(&query).is_some()
    }
}
