use super::CliError;
use dosia_core::common::{IngestSettings, load_settings};
use dosia_core::domain::BeamRecord;
use dosia_core::modules::phantom::Phantom;
use std::fmt::Write as _;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Installs the stderr subscriber. `RUST_LOG` wins over `-v` repetitions.
pub(super) fn init_tracing(verbosity: u8) {
    let default_level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

pub(super) fn resolve_settings(path: Option<&Path>) -> Result<IngestSettings, CliError> {
    match path {
        Some(path) => load_settings(path).map_err(|error| CliError::Compute(error.into())),
        None => Ok(IngestSettings::default()),
    }
}

pub(super) fn render_plan_summary(plan_dir: &Path, record: &BeamRecord) -> String {
    let metadata = &record.metadata;
    let accelerator = &metadata.accelerator;
    let mut summary = String::new();
    let _ = writeln!(summary, "Plan: {}", plan_dir.display());
    let _ = writeln!(
        summary,
        "Accelerator: {} ({:?}, {:?})",
        accelerator.kind(),
        accelerator.energy,
        accelerator.filter
    );
    let _ = writeln!(summary, "Beam type: {:?}", metadata.beam_type);
    let _ = writeln!(
        summary,
        "Fractions: {}  MU/fraction: {}  Prescription dose: {}",
        metadata.fraction_count, metadata.mu_per_fraction, metadata.prescription_dose
    );
    let [x, y, z] = metadata.isocenter;
    let _ = writeln!(summary, "Isocenter: ({x}, {y}, {z})");
    let _ = write!(
        summary,
        "Control points: {}  Total weight: {}",
        record.control_point_count(),
        record.total_relative_weight()
    );
    summary
}

pub(super) fn render_phantom_summary(plan_dir: &Path, phantom: &Phantom) -> String {
    let [nx, ny, nz] = phantom.voxel_counts;
    let [sx, sy, sz] = phantom.voxel_sizes;
    let [cx, cy, cz] = phantom.corner;
    let mut summary = String::new();
    let _ = writeln!(summary, "Phantom: {}", plan_dir.display());
    let _ = writeln!(summary, "Voxels: {nx} x {ny} x {nz}");
    let _ = writeln!(summary, "Voxel size: {sx} x {sy} x {sz}");
    let _ = writeln!(summary, "Corner: ({cx}, {cy}, {cz})");
    let _ = write!(summary, "Materials: {}", phantom.materials.join(", "));
    if let Some(reference) = phantom.reference_medium {
        let _ = write!(summary, " (reference medium index {reference})");
    }
    summary
}
