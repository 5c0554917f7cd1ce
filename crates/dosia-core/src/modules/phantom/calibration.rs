//! Hounsfield-to-density and density-to-material lookup tables.
//!
//! Both files hold one whitespace-separated row per line, ascending in the
//! first column.

use crate::domain::{DosiaError, DosiaResult, ErrorCode};
use crate::modules::serialization::read_text_artifact;
use crate::numerics::{Extrapolation, interpolate_piecewise};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct HounsfieldTable {
    hounsfield: Vec<f64>,
    density: Vec<f64>,
}

impl HounsfieldTable {
    pub fn load(path: impl AsRef<Path>) -> DosiaResult<Self> {
        let path = path.as_ref();
        require_file(
            path,
            ErrorCode::MissingHounsfieldCalibration,
            "IO.HU_TO_DENSITY_MISSING",
        )?;
        Self::parse(path, &read_text_artifact(path)?)
    }

    pub fn parse(path: &Path, source: &str) -> DosiaResult<Self> {
        let mut hounsfield = Vec::new();
        let mut density = Vec::new();
        for (line_number, tokens) in rows(source) {
            let [hu, rho] = tokens.as_slice() else {
                return Err(malformed(path, line_number, "expected '<hu> <density>'"));
            };
            hounsfield.push(parse_number(path, line_number, hu)?);
            density.push(parse_number(path, line_number, rho)?);
        }
        validate_axis(path, &hounsfield, 2)?;
        tracing::debug!(rows = hounsfield.len(), "loaded {}", path.display());
        Ok(Self {
            hounsfield,
            density,
        })
    }

    /// Density for a Hounsfield value. Past the table ends the boundary
    /// gradient is continued; negative densities are clamped to zero.
    pub fn density_for(&self, hounsfield: f64) -> f64 {
        interpolate_piecewise(
            hounsfield,
            &self.hounsfield,
            &self.density,
            Extrapolation::Linear,
        )
        .unwrap_or(0.0)
        .max(0.0)
    }

    pub fn len(&self) -> usize {
        self.hounsfield.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hounsfield.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MaterialTable {
    density: Vec<f64>,
    names: Vec<String>,
    index_axis: Vec<f64>,
}

impl MaterialTable {
    pub fn load(path: impl AsRef<Path>) -> DosiaResult<Self> {
        let path = path.as_ref();
        require_file(
            path,
            ErrorCode::MissingMaterialCalibration,
            "IO.DENSITY_TO_MATERIAL_MISSING",
        )?;
        Self::parse(path, &read_text_artifact(path)?)
    }

    pub fn parse(path: &Path, source: &str) -> DosiaResult<Self> {
        let mut density = Vec::new();
        let mut names = Vec::new();
        for (line_number, tokens) in rows(source) {
            let [rho, name, ..] = tokens.as_slice() else {
                return Err(malformed(path, line_number, "expected '<density> <material>'"));
            };
            density.push(parse_number(path, line_number, rho)?);
            names.push((*name).to_string());
        }
        validate_axis(path, &density, 1)?;
        let index_axis = (0..density.len()).map(|index| index as f64).collect();
        tracing::debug!(materials = ?names, "loaded {}", path.display());
        Ok(Self {
            density,
            names,
            index_axis,
        })
    }

    /// Fractional index mixing two adjacent materials; held at the end
    /// indices outside the table.
    pub fn continuous_index(&self, density: f64) -> f64 {
        interpolate_piecewise(density, &self.density, &self.index_axis, Extrapolation::Hold)
            .unwrap_or(0.0)
    }

    /// Highest row whose density does not exceed `density`, or 0 below the table.
    pub fn discrete_index(&self, density: f64) -> usize {
        self.density
            .iter()
            .take_while(|&&row| row <= density)
            .count()
            .saturating_sub(1)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn rows(source: &str) -> impl Iterator<Item = (usize, Vec<&str>)> {
    source
        .lines()
        .enumerate()
        .map(|(index, line)| (index + 1, line.split_whitespace().collect::<Vec<_>>()))
        .filter(|(_, tokens)| !tokens.is_empty())
}

fn require_file(path: &Path, code: ErrorCode, placeholder: &'static str) -> DosiaResult<()> {
    if path.is_file() {
        return Ok(());
    }
    Err(DosiaError::io_system(
        code,
        placeholder,
        format!("calibration file '{}' not found", path.display()),
    ))
}

fn parse_number(path: &Path, line_number: usize, token: &str) -> DosiaResult<f64> {
    token
        .parse::<f64>()
        .map_err(|_| malformed(path, line_number, &format!("'{token}' is not a number")))
}

fn validate_axis(path: &Path, axis: &[f64], min_rows: usize) -> DosiaResult<()> {
    if axis.len() < min_rows {
        return Err(DosiaError::input_validation(
            ErrorCode::MalformedCalibration,
            "INPUT.CALIBRATION",
            format!(
                "{} has {} rows, at least {} required",
                path.display(),
                axis.len(),
                min_rows
            ),
        ));
    }
    if !axis.windows(2).all(|pair| pair[0] <= pair[1]) {
        return Err(DosiaError::input_validation(
            ErrorCode::MalformedCalibration,
            "INPUT.CALIBRATION",
            format!("{} is not sorted ascending", path.display()),
        ));
    }
    Ok(())
}

fn malformed(path: &Path, line_number: usize, message: &str) -> DosiaError {
    DosiaError::input_validation(
        ErrorCode::MalformedCalibration,
        "INPUT.CALIBRATION",
        format!("{}:{}: {}", path.display(), line_number, message),
    )
}
