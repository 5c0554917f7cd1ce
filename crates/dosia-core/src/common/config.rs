//! Ingestion policy switches.
//!
//! Every function that makes a policy decision receives an [`IngestSettings`]
//! explicitly; nothing here is global.

use crate::domain::{DosiaError, ErrorCode};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Margin added around the jaw opening to get the dose-scoring field box.
    pub field_margin: f64,
    pub dose_per_fraction: bool,
    pub continuous_materials: bool,
    /// Reweight arc control points instead of converting them to dynamic segments.
    pub pinnacle_vmat_interpolation: bool,
    pub score_dose_to_water: bool,
    pub score_and_transport_in_water: bool,
    pub hounsfield_conversion_dir: PathBuf,
    pub debug_output: bool,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            field_margin: 5.0,
            dose_per_fraction: true,
            continuous_materials: true,
            pinnacle_vmat_interpolation: false,
            score_dose_to_water: false,
            score_and_transport_in_water: false,
            hounsfield_conversion_dir: PathBuf::from("."),
            debug_output: false,
        }
    }
}

impl IngestSettings {
    /// Fraction multiplier applied to doses and weights.
    pub fn fraction_factor(&self, fraction_count: u32) -> f64 {
        if self.dose_per_fraction {
            1.0
        } else {
            f64::from(fraction_count)
        }
    }

    pub fn uses_reference_medium(&self) -> bool {
        self.score_dose_to_water || self.score_and_transport_in_water
    }

    pub fn hu_to_density_path(&self) -> PathBuf {
        self.hounsfield_conversion_dir
            .join(super::constants::HU_TO_DENSITY_FILE)
    }

    pub fn density_to_material_path(&self) -> PathBuf {
        self.hounsfield_conversion_dir
            .join(super::constants::DENSITY_TO_MATERIAL_FILE)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse settings '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl From<SettingsError> for DosiaError {
    fn from(error: SettingsError) -> Self {
        match &error {
            SettingsError::Read { .. } => DosiaError::io_system(
                ErrorCode::InvalidSettings,
                "IO.SETTINGS_READ",
                error.to_string(),
            ),
            SettingsError::Parse { .. } => DosiaError::input_validation(
                ErrorCode::InvalidSettings,
                "INPUT.SETTINGS_PARSE",
                error.to_string(),
            ),
        }
    }
}

pub fn load_settings(path: impl AsRef<Path>) -> Result<IngestSettings, SettingsError> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let settings: IngestSettings =
        serde_json::from_str(&source).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    tracing::debug!(
        field_margin = settings.field_margin,
        dose_per_fraction = settings.dose_per_fraction,
        pinnacle_vmat_interpolation = settings.pinnacle_vmat_interpolation,
        "settings loaded from {}",
        path.display()
    );
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::{IngestSettings, SettingsError, load_settings};
    use crate::domain::{DosiaError, ErrorCode};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("settings.json");
        fs::write(
            &path,
            r#"{ "field_margin": 0.5, "pinnacle_vmat_interpolation": true }"#,
        )
        .expect("settings should be written");

        let settings = load_settings(&path).expect("settings should load");
        assert_eq!(settings.field_margin, 0.5);
        assert!(settings.pinnacle_vmat_interpolation);
        assert!(settings.dose_per_fraction);
        assert!(settings.continuous_materials);
        assert_eq!(
            settings.hounsfield_conversion_dir,
            IngestSettings::default().hounsfield_conversion_dir
        );
    }

    #[test]
    fn fraction_factor_follows_dose_per_fraction() {
        let mut settings = IngestSettings::default();
        assert_eq!(settings.fraction_factor(30), 1.0);
        settings.dose_per_fraction = false;
        assert_eq!(settings.fraction_factor(30), 30.0);
    }

    #[test]
    fn unreadable_and_malformed_settings_map_to_numbered_errors() {
        let temp = TempDir::new().expect("tempdir should be created");
        let missing = load_settings(temp.path().join("absent.json"))
            .expect_err("missing settings should fail");
        assert!(matches!(missing, SettingsError::Read { .. }));

        let path = temp.path().join("broken.json");
        fs::write(&path, "{ field_margin: ").expect("settings should be written");
        let broken = load_settings(&path).expect_err("malformed settings should fail");
        let error = DosiaError::from(broken);
        assert_eq!(error.code(), ErrorCode::InvalidSettings);
        assert_eq!(error.placeholder(), "INPUT.SETTINGS_PARSE");
    }
}
