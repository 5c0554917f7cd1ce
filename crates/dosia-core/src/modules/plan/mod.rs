//! Plan ingestion: dialect selection, ordered parse phases and normalization.
//!
//! Each phase takes the intermediate [`PlanState`] by value and returns the
//! updated state, so later phases see exactly what earlier ones produced.

mod dicom;
mod normalize;
mod pinnacle;

pub use normalize::normalize;

use crate::common::IngestSettings;
use crate::common::constants::{
    BEAM_DUMP, DATABASE_MARKER_DUMP, DOSE_DUMP, PLAN_DUMP, SCAN_DUMP, TRIAL_DUMP,
};
use crate::domain::{BeamMetaData, BeamRecord, ControlPoint, DosiaError, DosiaResult, ErrorCode};
use crate::parser::{DumpEntry, load_dump, load_required_dump};
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PlanDialect {
    /// Flat indexed keys such as `gantry[3]`.
    Pinnacle,
    /// Hierarchical keys such as `ControlPointSequence[3].GantryAngle`.
    Dicom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParsePhase {
    Trial,
    Plan,
    Beam,
    Scan,
    Dose,
}

impl ParsePhase {
    pub const fn dump_name(self) -> &'static str {
        match self {
            Self::Trial => TRIAL_DUMP,
            Self::Plan => PLAN_DUMP,
            Self::Beam => BEAM_DUMP,
            Self::Scan => SCAN_DUMP,
            Self::Dose => DOSE_DUMP,
        }
    }
}

impl PlanDialect {
    /// Picks the dialect from the first bare `pinnacle` or `dicom` line.
    pub fn from_marker(entries: &[DumpEntry]) -> DosiaResult<Self> {
        entries
            .iter()
            .filter(|entry| entry.is_bare())
            .find_map(|entry| match entry.key.trim() {
                "pinnacle" => Some(Self::Pinnacle),
                "dicom" => Some(Self::Dicom),
                _ => None,
            })
            .ok_or_else(|| {
                DosiaError::input_validation(
                    ErrorCode::UnknownDatabaseType,
                    "INPUT.DATABASE_TYPE",
                    format!("{DATABASE_MARKER_DUMP} names neither a pinnacle nor a dicom plan"),
                )
            })
    }

    /// Fixed phase order; later phases depend on fields set by earlier ones.
    pub const fn phase_order(self) -> [ParsePhase; 5] {
        match self {
            Self::Pinnacle => [
                ParsePhase::Trial,
                ParsePhase::Beam,
                ParsePhase::Plan,
                ParsePhase::Scan,
                ParsePhase::Dose,
            ],
            Self::Dicom => [
                ParsePhase::Trial,
                ParsePhase::Plan,
                ParsePhase::Beam,
                ParsePhase::Scan,
                ParsePhase::Dose,
            ],
        }
    }

    /// Whether the dialect's dump set encodes anything for `phase`.
    pub const fn parses(self, phase: ParsePhase) -> bool {
        match self {
            Self::Pinnacle => !matches!(phase, ParsePhase::Scan),
            Self::Dicom => matches!(phase, ParsePhase::Beam | ParsePhase::Scan),
        }
    }

    pub fn run_phase(
        self,
        phase: ParsePhase,
        state: PlanState,
        entries: &[DumpEntry],
        settings: &IngestSettings,
    ) -> DosiaResult<PlanState> {
        match (self, phase) {
            (Self::Pinnacle, ParsePhase::Trial) => pinnacle::parse_trial(state, entries),
            (Self::Pinnacle, ParsePhase::Beam) => pinnacle::parse_beam(state, entries, settings),
            (Self::Pinnacle, ParsePhase::Plan) => pinnacle::parse_plan(state, entries),
            (Self::Pinnacle, ParsePhase::Dose) => pinnacle::parse_dose(state, entries),
            (Self::Dicom, ParsePhase::Beam) => dicom::parse_beam(state, entries, settings),
            (Self::Dicom, ParsePhase::Scan) => dicom::parse_scan(state, entries),
            _ => Ok(state),
        }
    }

    /// Runs every phase over in-memory dumps, then normalizes.
    pub fn ingest<F>(self, mut dump_for: F, settings: &IngestSettings) -> DosiaResult<BeamRecord>
    where
        F: FnMut(ParsePhase) -> DosiaResult<Vec<DumpEntry>>,
    {
        let mut state = PlanState::default();
        for phase in self.phase_order() {
            if !self.parses(phase) {
                continue;
            }
            let entries = dump_for(phase)?;
            state = self.run_phase(phase, state, &entries, settings)?;
        }
        normalize(self, state, settings)
    }
}

impl Display for PlanDialect {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pinnacle => f.write_str("pinnacle"),
            Self::Dicom => f.write_str("dicom"),
        }
    }
}

/// Beam metadata and control points while the parse phases run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanState {
    pub metadata: BeamMetaData,
    pub control_points: Vec<ControlPoint>,
}

impl BeamRecord {
    /// Ingests and normalizes the single-beam plan exported into `plan_dir`.
    pub fn load(plan_dir: impl AsRef<Path>, settings: &IngestSettings) -> DosiaResult<Self> {
        let plan_dir = plan_dir.as_ref();
        let marker = plan_dir.join(DATABASE_MARKER_DUMP);
        if !marker.is_file() {
            return Err(DosiaError::io_system(
                ErrorCode::MissingDatabaseMarker,
                "IO.DATABASE_MARKER",
                format!("plan marker '{}' not found", marker.display()),
            ));
        }
        let dialect = PlanDialect::from_marker(&load_dump(&marker)?)?;
        tracing::info!(%dialect, "ingesting plan from {}", plan_dir.display());

        let record = dialect.ingest(
            |phase| load_required_dump(plan_dir.join(phase.dump_name())),
            settings,
        )?;
        record.log_summary();
        Ok(record)
    }
}

pub(super) fn sized_control_points(count: usize, leaf_pairs: usize) -> Vec<ControlPoint> {
    vec![ControlPoint::with_leaf_pairs(leaf_pairs); count]
}

/// Resolves the control point addressed by `index`, reporting keys without
/// a usable index and indices past the declared count.
pub(super) fn control_point_mut<'a>(
    control_points: &'a mut [ControlPoint],
    index: Option<usize>,
    entry: &DumpEntry,
) -> DosiaResult<&'a mut ControlPoint> {
    let index = index.ok_or_else(|| {
        DosiaError::input_validation(
            ErrorCode::InvalidDumpValue,
            "INPUT.DUMP_INDEX",
            format!(
                "key '{}' at line {} has no control point index",
                entry.key, entry.source_line
            ),
        )
    })?;
    let count = control_points.len();
    control_points.get_mut(index).ok_or_else(|| {
        DosiaError::input_validation(
            ErrorCode::ControlPointOutOfRange,
            "INPUT.CONTROL_POINT_RANGE",
            format!(
                "control point {} at line {} is outside the {} declared",
                index, entry.source_line, count
            ),
        )
    })
}

pub(super) fn leaf_count_error(message: impl Into<String>) -> DosiaError {
    DosiaError::input_validation(ErrorCode::LeafCountMismatch, "INPUT.LEAF_COUNT", message)
}

#[cfg(test)]
mod tests {
    use super::{ParsePhase, PlanDialect};
    use crate::domain::ErrorCode;
    use crate::parser::parse_dump;

    #[test]
    fn marker_selects_dialect_from_bare_line() {
        assert_eq!(
            PlanDialect::from_marker(&parse_dump("pinnacle\n")).ok(),
            Some(PlanDialect::Pinnacle)
        );
        assert_eq!(
            PlanDialect::from_marker(&parse_dump("version = 2\n dicom \n")).ok(),
            Some(PlanDialect::Dicom)
        );
        let error = PlanDialect::from_marker(&parse_dump("monaco\n")).expect_err("unknown");
        assert_eq!(error.code(), ErrorCode::UnknownDatabaseType);
    }

    #[test]
    fn pinnacle_reads_beam_before_plan() {
        let order = PlanDialect::Pinnacle.phase_order();
        let beam = order.iter().position(|phase| *phase == ParsePhase::Beam);
        let plan = order.iter().position(|phase| *phase == ParsePhase::Plan);
        assert!(beam < plan);
        assert!(!PlanDialect::Pinnacle.parses(ParsePhase::Scan));
    }

    #[test]
    fn dicom_skips_trial_plan_and_dose() {
        let parsed: Vec<ParsePhase> = PlanDialect::Dicom
            .phase_order()
            .into_iter()
            .filter(|phase| PlanDialect::Dicom.parses(*phase))
            .collect();
        assert_eq!(parsed, vec![ParsePhase::Beam, ParsePhase::Scan]);
        assert_eq!(ParsePhase::Beam.dump_name(), "beam.dump");
    }
}
