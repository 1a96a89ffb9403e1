pub mod filters;
pub mod job;
pub mod logging;
pub mod overlay;
pub mod server;
pub mod settings;
pub mod source;

pub use filters::Filter;
pub use job::{JobEnv, JobManifest};
pub use overlay::{
    Composition, FontLibrary, ImageDimensions, OutputFormat, OverlayRequest,
    ResolvedOverlayOptions, compose,
};
pub use settings::{Settings, load_settings};
