pub mod config;
pub mod constants;

pub use config::{IngestSettings, SettingsError, load_settings};
