use crate::overlay::FontLibrary;
use crate::settings;

#[derive(Clone)]
pub(crate) struct ServerState {
    pub(crate) settings: settings::Settings,
    pub(crate) fonts: FontLibrary,
}
