//! File names and numeric limits shared by the ingestion modules.

pub const DATABASE_MARKER_DUMP: &str = "dbtype.dump";
pub const TRIAL_DUMP: &str = "trialname.dump";
pub const PLAN_DUMP: &str = "plan.dump";
pub const BEAM_DUMP: &str = "beam.dump";
pub const SCAN_DUMP: &str = "scan.dump";
pub const DOSE_DUMP: &str = "dose.dump";

pub const CT_VOLUME_FILE: &str = "ct.xdr";
pub const HU_TO_DENSITY_FILE: &str = "hu2dens.ini";
pub const DENSITY_TO_MATERIAL_FILE: &str = "dens2mat.ini";
pub const MEDIUM_INDEX_DEBUG_FILE: &str = "mediumIndex.xdr";
pub const MASS_DENSITY_DEBUG_FILE: &str = "massDensityArray.xdr";

pub const REFERENCE_MEDIUM_NAME: &str = "Water";

/// Accepted range for the sum of a beam's relative control-point weights.
pub const WEIGHT_SUM_LOWER: f64 = 0.9999;
pub const WEIGHT_SUM_UPPER: f64 = 1.0001;

/// Format Y stores spacing and offset in millimetres; voxel grids use centimetres.
pub const SIDECAR_UNIT_SCALE: f32 = 10.0;
/// DICOM plan positions are millimetres; beam records use centimetres.
pub const DICOM_POSITION_SCALE: f64 = 10.0;

pub const MAX_LIMITING_DEVICES: usize = 3;
pub const MAX_IMAGE_AXES: usize = 3;
