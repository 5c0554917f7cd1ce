//! Hierarchical dumps (`ControlPointSequence[3].GantryAngle = 180.0`).
//!
//! Positions arrive in millimetres and are stored in centimetres. A control
//! point only lists what changed since the previous one, so omitted angles,
//! jaws, leaves and isocenter are carried forward once the dump is read.

use super::{PlanState, control_point_mut, leaf_count_error, sized_control_points};
use crate::common::IngestSettings;
use crate::common::constants::{DICOM_POSITION_SCALE, MAX_LIMITING_DEVICES};
use crate::domain::{
    AcceleratorType, BeamType, ControlPoint, DosiaError, DosiaResult, Energy, ErrorCode, Filter,
    Span,
};
use crate::parser::{DumpEntry, bracket_index, key_segments};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceRole {
    ParallelJaw,
    PerpendicularJaw,
    Mlc,
    Other,
}

impl DeviceRole {
    fn from_device_type(device_type: &str) -> Self {
        match device_type.trim() {
            "ASMX" | "X" => Self::ParallelJaw,
            "ASMY" | "Y" => Self::PerpendicularJaw,
            "MLCX" => Self::Mlc,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Default)]
struct ReferencedBeam {
    number: Option<i64>,
    meterset: Option<f64>,
    dose: Option<f64>,
}

/// Fields a control point listed explicitly.
#[derive(Debug, Clone, Copy, Default)]
struct Listed {
    gantry: bool,
    couch: bool,
    collimator: bool,
    isocenter: bool,
    parallel_jaw: bool,
    perpendicular_jaw: bool,
    mlc: bool,
}

#[derive(Debug, Default)]
struct BeamScan {
    device_roles: [Option<DeviceRole>; MAX_LIMITING_DEVICES],
    device_overrides: HashMap<(usize, usize), DeviceRole>,
    referenced_beams: BTreeMap<usize, ReferencedBeam>,
    beam_number: Option<i64>,
    listed: Vec<Listed>,
}

pub(super) fn parse_beam(
    mut state: PlanState,
    entries: &[DumpEntry],
    settings: &IngestSettings,
) -> DosiaResult<PlanState> {
    let mut scan = BeamScan::default();

    for entry in entries {
        let segments = key_segments(&entry.key);
        let head = segments[0];
        let metadata = &mut state.metadata;

        if head.starts_with("FractionGroupSequence") {
            read_fraction_group(&mut state, &mut scan, &segments, entry)?;
        } else if entry.key == "TreatmentMachineName" {
            metadata.accelerator = metadata
                .accelerator
                .reidentify(AcceleratorType::from_machine_name(&entry.value));
        } else if head.starts_with("BeamLimitingDeviceSequence") {
            read_limiting_device(&state, &mut scan, &segments, entry)?;
        } else if entry.key == "BeamNumber" {
            scan.beam_number = Some(entry.i64_value()?);
        } else if entry.key == "NumberOfControlPoints" {
            let count = entry.count_value()?;
            state.control_points =
                sized_control_points(count, metadata.accelerator.leafs_per_bank());
            scan.listed = vec![Listed::default(); count];
        } else if head.starts_with("BeamType") {
            metadata.beam_type = BeamType::from_label(&entry.value);
        } else if head.starts_with("PatientSetupSequence") {
            if segments.get(1) == Some(&"PatientPosition") {
                metadata.patient_position = entry.value.clone();
            }
        } else if head.starts_with("PrimaryFluenceModeSequence") {
            if segments.get(1) == Some(&"FluenceModeID") && entry.value.trim() == "FFF" {
                metadata.accelerator.filter = Filter::Unflattened;
            }
        } else if head.starts_with("ControlPointSequence") && segments.len() > 1 {
            read_control_point(&mut state, &mut scan, &segments, entry, settings)?;
        }
    }

    carry_forward(&mut state.control_points, &scan.listed);
    resolve_beam_weight(&mut state, &scan)?;

    tracing::debug!(
        beam_weight = state.metadata.weight,
        fractions = state.metadata.fraction_count,
        control_points = state.control_points.len(),
        isocenter = ?state.metadata.isocenter,
        "beam parsed"
    );
    Ok(state)
}

fn read_fraction_group(
    state: &mut PlanState,
    scan: &mut BeamScan,
    segments: &[&str],
    entry: &DumpEntry,
) -> DosiaResult<()> {
    let Some(&field) = segments.get(1) else {
        return Ok(());
    };
    if field == "NumberOfFractionsPlanned" {
        state.metadata.fraction_count = u32::try_from(entry.count_value()?).map_err(|_| {
            DosiaError::input_validation(
                ErrorCode::InvalidDumpValue,
                "INPUT.DUMP_VALUE",
                format!("fraction count '{}' is out of range", entry.value),
            )
        })?;
        return Ok(());
    }

    let (Some(beam), Some(&attribute)) = (bracket_index(field, 1), segments.get(2)) else {
        return Ok(());
    };
    if !field.starts_with("ReferencedBeamSequence") {
        return Ok(());
    }
    let reference = scan.referenced_beams.entry(beam).or_default();
    match attribute {
        "ReferencedBeamNumber" => reference.number = Some(entry.i64_value()?),
        "BeamMeterset" => reference.meterset = Some(entry.f64_value()?),
        "BeamDose" => reference.dose = Some(entry.f64_value()?),
        _ => {}
    }
    Ok(())
}

fn read_limiting_device(
    state: &PlanState,
    scan: &mut BeamScan,
    segments: &[&str],
    entry: &DumpEntry,
) -> DosiaResult<()> {
    let (Some(slot), Some(&attribute)) = (bracket_index(segments[0], 1), segments.get(1)) else {
        return Ok(());
    };
    if slot >= MAX_LIMITING_DEVICES {
        return Err(DosiaError::input_validation(
            ErrorCode::TooManyLimitingDevices,
            "INPUT.LIMITING_DEVICES",
            format!(
                "beam limiting device slot {} at line {} exceeds the {} supported",
                slot, entry.source_line, MAX_LIMITING_DEVICES
            ),
        ));
    }

    match attribute {
        "RTBeamLimitingDeviceType" => {
            scan.device_roles[slot] = Some(DeviceRole::from_device_type(&entry.value));
        }
        "NumberOfLeafJawPairs" if scan.device_roles[slot] == Some(DeviceRole::Mlc) => {
            let declared = entry.count_value()?;
            let leafs = state.metadata.accelerator.leafs_per_bank();
            if declared != leafs {
                return Err(leaf_count_error(format!(
                    "MLC declares {} leaf pairs, accelerator {} has {}",
                    declared,
                    state.metadata.accelerator.kind(),
                    leafs
                )));
            }
        }
        _ => {}
    }
    Ok(())
}

fn read_control_point(
    state: &mut PlanState,
    scan: &mut BeamScan,
    segments: &[&str],
    entry: &DumpEntry,
    settings: &IngestSettings,
) -> DosiaResult<()> {
    let Some(index) = bracket_index(segments[0], 1) else {
        return Ok(());
    };
    let metadata = &mut state.metadata;
    let leafs = metadata.accelerator.leafs_per_bank();
    let cp = control_point_mut(&mut state.control_points, Some(index), entry)?;
    let Some(listed) = scan.listed.get_mut(index) else {
        return Ok(());
    };
    let field = segments[1];

    match field {
        "ControlPointIndex" => {
            if entry.count_value()? != index {
                tracing::warn!(
                    line = entry.source_line,
                    index,
                    declared = %entry.value,
                    "control point index disagrees with its sequence position"
                );
            }
        }
        "NominalBeamEnergy" => metadata.accelerator.energy = Energy::from_label(&entry.value),
        "GantryAngle" => {
            cp.geometry.gantry_angle = Span::fixed(entry.f64_value()?);
            listed.gantry = true;
        }
        "PatientSupportAngle" => {
            cp.geometry.couch_angle = Span::fixed(entry.f64_value()?);
            listed.couch = true;
        }
        "BeamLimitingDeviceAngle" => {
            cp.geometry.collimator_angle = Span::fixed(entry.f64_value()?);
            listed.collimator = true;
        }
        "IsocenterPosition" => {
            let position = scaled_positions(entry)?;
            let [x, y, z] = position.as_slice() else {
                return Err(DosiaError::input_validation(
                    ErrorCode::InvalidDumpValue,
                    "INPUT.DUMP_VALUE",
                    format!("isocenter at line {} needs three coordinates", entry.source_line),
                ));
            };
            cp.geometry.isocenter = [*x, *y, *z];
            if index == 0 {
                metadata.isocenter = cp.geometry.isocenter;
            }
            listed.isocenter = true;
        }
        "CumulativeMetersetWeight" => cp.geometry.relative_weight = entry.f64_value()?,
        _ if field.starts_with("BeamLimitingDevicePositionSequence") => {
            let Some(slot) = bracket_index(field, 1) else {
                return Ok(());
            };
            if slot >= MAX_LIMITING_DEVICES {
                return Err(DosiaError::input_validation(
                    ErrorCode::TooManyLimitingDevices,
                    "INPUT.LIMITING_DEVICES",
                    format!("device position slot {} at line {}", slot, entry.source_line),
                ));
            }
            match segments.get(2).copied() {
                Some("RTBeamLimitingDeviceType") => {
                    scan.device_overrides
                        .insert((index, slot), DeviceRole::from_device_type(&entry.value));
                }
                Some("LeafJawPositions") => {
                    let role = scan
                        .device_overrides
                        .get(&(index, slot))
                        .copied()
                        .or(scan.device_roles[slot])
                        .unwrap_or(DeviceRole::Other);
                    let positions = scaled_positions(entry)?;
                    apply_positions(cp, listed, role, &positions, leafs, settings.field_margin)
                        .map_err(|message| {
                            leaf_count_error(format!("line {}: {}", entry.source_line, message))
                        })?;
                }
                _ => {}
            }
        }
        _ => {}
    }
    Ok(())
}

fn scaled_positions(entry: &DumpEntry) -> DosiaResult<Vec<f64>> {
    Ok(entry
        .f64_values('\\')?
        .into_iter()
        .map(|value| value / DICOM_POSITION_SCALE)
        .collect())
}

fn apply_positions(
    cp: &mut ControlPoint,
    listed: &mut Listed,
    role: DeviceRole,
    positions: &[f64],
    leafs: usize,
    margin: f64,
) -> Result<(), String> {
    match role {
        DeviceRole::ParallelJaw | DeviceRole::PerpendicularJaw => {
            let [j1, j2] = positions else {
                return Err(format!("a jaw pair needs 2 positions, got {}", positions.len()));
            };
            let (jaw, axis) = if role == DeviceRole::ParallelJaw {
                listed.parallel_jaw = true;
                (&mut cp.collimator.parallel_jaw, 0)
            } else {
                listed.perpendicular_jaw = true;
                (&mut cp.collimator.perpendicular_jaw, 1)
            };
            jaw.j1 = Span::fixed(*j1);
            jaw.j2 = Span::fixed(*j2);
            set_axis(&mut cp.geometry.field_min, axis, j1 - margin);
            set_axis(&mut cp.geometry.field_max, axis, j2 + margin);
        }
        DeviceRole::Mlc => {
            if positions.len() != 2 * leafs || cp.collimator.mlc.leaf_pairs() != leafs {
                return Err(format!(
                    "{} leaf positions do not fill two banks of {} leaves",
                    positions.len(),
                    leafs
                ));
            }
            let (first_bank, second_bank) = positions.split_at(leafs);
            for (pair, (&right, &left)) in first_bank.iter().zip(second_bank).enumerate() {
                cp.collimator.mlc.right[pair] = Span::fixed(right);
                cp.collimator.mlc.left[pair] = Span::fixed(left);
            }
            listed.mlc = true;
        }
        DeviceRole::Other => {
            tracing::trace!(count = positions.len(), "ignoring positions of an unused device");
        }
    }
    Ok(())
}

fn set_axis(pair: &mut (f64, f64), axis: usize, value: f64) {
    if axis == 0 {
        pair.0 = value;
    } else {
        pair.1 = value;
    }
}

fn carry_forward(control_points: &mut [ControlPoint], listed: &[Listed]) {
    for index in 1..control_points.len().min(listed.len()) {
        let (done, rest) = control_points.split_at_mut(index);
        let previous = &done[index - 1];
        let current = &mut rest[0];
        let listed = listed[index];

        if !listed.gantry {
            current.geometry.gantry_angle = previous.geometry.gantry_angle;
        }
        if !listed.couch {
            current.geometry.couch_angle = previous.geometry.couch_angle;
        }
        if !listed.collimator {
            current.geometry.collimator_angle = previous.geometry.collimator_angle;
        }
        if !listed.isocenter {
            current.geometry.isocenter = previous.geometry.isocenter;
        }
        if !listed.parallel_jaw {
            current.collimator.parallel_jaw = previous.collimator.parallel_jaw;
            current.geometry.field_min.0 = previous.geometry.field_min.0;
            current.geometry.field_max.0 = previous.geometry.field_max.0;
        }
        if !listed.perpendicular_jaw {
            current.collimator.perpendicular_jaw = previous.collimator.perpendicular_jaw;
            current.geometry.field_min.1 = previous.geometry.field_min.1;
            current.geometry.field_max.1 = previous.geometry.field_max.1;
        }
        if !listed.mlc {
            current.collimator.mlc = previous.collimator.mlc.clone();
        }
    }
}

/// The beam weight is the meterset of the referenced beam whose number
/// matches this beam; a lone reference is used when the beam is unnumbered.
fn resolve_beam_weight(state: &mut PlanState, scan: &BeamScan) -> DosiaResult<()> {
    let reference = match scan.beam_number {
        Some(number) => scan
            .referenced_beams
            .values()
            .find(|reference| reference.number == Some(number)),
        None if scan.referenced_beams.len() == 1 => scan.referenced_beams.values().next(),
        None => None,
    };

    let Some((reference, meterset)) = reference
        .and_then(|reference| reference.meterset.map(|meterset| (reference, meterset)))
    else {
        let beam = scan
            .beam_number
            .map_or_else(|| "unnumbered beam".to_string(), |number| format!("beam {number}"));
        return Err(DosiaError::input_validation(
            ErrorCode::MissingBeamMeterset,
            "INPUT.BEAM_METERSET",
            format!(
                "no referenced beam meterset for {beam} among {} referenced beam(s)",
                scan.referenced_beams.len()
            ),
        ));
    };

    state.metadata.weight = meterset;
    tracing::debug!(
        beam_number = ?scan.beam_number,
        meterset,
        beam_dose = ?reference.dose,
        "beam meterset resolved"
    );
    Ok(())
}

pub(super) fn parse_scan(mut state: PlanState, entries: &[DumpEntry]) -> DosiaResult<PlanState> {
    for entry in entries {
        if entry.key.starts_with("RescaleIntercept") {
            state.metadata.hu_intercept = entry.f64_value()?;
        } else if entry.key.starts_with("RescaleSlope") {
            state.metadata.hu_slope = entry.f64_value()?;
        }
    }
    tracing::debug!(
        hu_intercept = state.metadata.hu_intercept,
        hu_slope = state.metadata.hu_slope,
        "scan parsed"
    );
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::{parse_beam, parse_scan};
    use crate::common::IngestSettings;
    use crate::domain::{AcceleratorType, BeamType, Energy, ErrorCode, Filter, Span};
    use crate::modules::plan::PlanState;
    use crate::parser::parse_dump;

    const HEADER: &str = "\
FractionGroupSequence[0].NumberOfFractionsPlanned = 25
FractionGroupSequence[0].ReferencedBeamSequence[0].BeamMeterset = 80.0
FractionGroupSequence[0].ReferencedBeamSequence[0].ReferencedBeamNumber = 1
FractionGroupSequence[0].ReferencedBeamSequence[1].BeamMeterset = 120.5
FractionGroupSequence[0].ReferencedBeamSequence[1].BeamDose = 1.2
FractionGroupSequence[0].ReferencedBeamSequence[1].ReferencedBeamNumber = 2
TreatmentMachineName = MLC160_A
BeamLimitingDeviceSequence[0].RTBeamLimitingDeviceType = ASMX
BeamLimitingDeviceSequence[1].RTBeamLimitingDeviceType = ASMY
BeamLimitingDeviceSequence[2].RTBeamLimitingDeviceType = MLCX
BeamLimitingDeviceSequence[2].NumberOfLeafJawPairs = 80
BeamNumber = 2
BeamType = DYNAMIC
PatientSetupSequence[0].PatientPosition = HFS
NumberOfControlPoints = 2
";

    fn mlc_positions(right: f64, left: f64) -> String {
        let mut values = vec![right.to_string(); 80];
        values.extend(vec![left.to_string(); 80]);
        values.join("\\")
    }

    fn two_point_beam() -> String {
        format!(
            "{HEADER}\
ControlPointSequence[0].ControlPointIndex = 0
ControlPointSequence[0].NominalBeamEnergy = 6
ControlPointSequence[0].GantryAngle = 180
ControlPointSequence[0].PatientSupportAngle = 0
ControlPointSequence[0].BeamLimitingDeviceAngle = 45
ControlPointSequence[0].BeamLimitingDevicePositionSequence[0].LeafJawPositions = -50\\60
ControlPointSequence[0].BeamLimitingDevicePositionSequence[1].LeafJawPositions = -70\\80
ControlPointSequence[0].BeamLimitingDevicePositionSequence[2].LeafJawPositions = {}
ControlPointSequence[0].IsocenterPosition = 10\\-20\\300
ControlPointSequence[0].CumulativeMetersetWeight = 0
ControlPointSequence[1].ControlPointIndex = 1
ControlPointSequence[1].GantryAngle = 178
ControlPointSequence[1].BeamLimitingDevicePositionSequence[0].RTBeamLimitingDeviceType = MLCX
ControlPointSequence[1].BeamLimitingDevicePositionSequence[0].LeafJawPositions = {}
ControlPointSequence[1].CumulativeMetersetWeight = 1
",
            mlc_positions(-10.0, 20.0),
            mlc_positions(-30.0, 40.0),
        )
    }

    fn parse(source: &str) -> PlanState {
        parse_beam(PlanState::default(), &parse_dump(source), &IngestSettings::default())
            .expect("beam dump should parse")
    }

    #[test]
    fn beam_level_fields_and_referenced_meterset() {
        let state = parse(&two_point_beam());
        let metadata = &state.metadata;
        assert_eq!(metadata.fraction_count, 25);
        assert_eq!(metadata.weight, 120.5);
        assert_eq!(metadata.accelerator.kind(), AcceleratorType::Agility);
        assert_eq!(metadata.accelerator.energy, Energy::Mv6);
        assert_eq!(metadata.accelerator.filter, Filter::Flattened);
        assert_eq!(metadata.beam_type, BeamType::Vmat);
        assert_eq!(metadata.patient_position, "HFS");
        assert_eq!(metadata.isocenter, [1.0, -2.0, 30.0]);
    }

    #[test]
    fn positions_are_routed_through_the_device_table_in_centimetres() {
        let state = parse(&two_point_beam());
        let cp = &state.control_points[0];
        assert_eq!(cp.collimator.parallel_jaw.j1, Span::fixed(-5.0));
        assert_eq!(cp.collimator.parallel_jaw.j2, Span::fixed(6.0));
        assert_eq!(cp.collimator.perpendicular_jaw.j1, Span::fixed(-7.0));
        assert_eq!(cp.geometry.field_min, (-10.0, -12.0));
        assert_eq!(cp.geometry.field_max, (11.0, 13.0));
        assert_eq!(cp.collimator.mlc.right[0], Span::fixed(-1.0));
        assert_eq!(cp.collimator.mlc.left[79], Span::fixed(2.0));
        assert_eq!(cp.geometry.collimator_angle, Span::fixed(45.0));
    }

    #[test]
    fn omitted_values_carry_forward_and_slot_override_applies() {
        let state = parse(&two_point_beam());
        let cp = &state.control_points[1];
        assert_eq!(cp.geometry.gantry_angle, Span::fixed(178.0));
        assert_eq!(cp.geometry.collimator_angle, Span::fixed(45.0));
        assert_eq!(cp.geometry.isocenter, [1.0, -2.0, 30.0]);
        assert_eq!(cp.collimator.parallel_jaw.j2, Span::fixed(6.0));
        assert_eq!(cp.collimator.mlc.right[5], Span::fixed(-3.0));
        assert_eq!(cp.collimator.mlc.left[5], Span::fixed(4.0));
        assert_eq!(cp.geometry.relative_weight, 1.0);
    }

    #[test]
    fn leaf_pair_count_must_match_accelerator() {
        let source = HEADER.replace("NumberOfLeafJawPairs = 80", "NumberOfLeafJawPairs = 40");
        let error = parse_beam(PlanState::default(), &parse_dump(&source), &IngestSettings::default())
            .expect_err("40 pairs on an 80-leaf machine");
        assert_eq!(error.code(), ErrorCode::LeafCountMismatch);
    }

    #[test]
    fn fourth_limiting_device_is_rejected() {
        let source = format!("{HEADER}BeamLimitingDeviceSequence[3].RTBeamLimitingDeviceType = MLCY\n");
        let error = parse_beam(PlanState::default(), &parse_dump(&source), &IngestSettings::default())
            .expect_err("slot 3");
        assert_eq!(error.code(), ErrorCode::TooManyLimitingDevices);
    }

    #[test]
    fn control_point_past_declared_count_is_fatal() {
        let source = format!("{HEADER}ControlPointSequence[2].GantryAngle = 0\n");
        let error = parse_beam(PlanState::default(), &parse_dump(&source), &IngestSettings::default())
            .expect_err("index 2 of 2");
        assert_eq!(error.code(), ErrorCode::ControlPointOutOfRange);
    }

    #[test]
    fn unmatched_beam_number_has_no_meterset() {
        let source = two_point_beam().replace("\nBeamNumber = 2", "\nBeamNumber = 3");
        let error = parse_beam(PlanState::default(), &parse_dump(&source), &IngestSettings::default())
            .expect_err("no referenced beam numbered 3");
        assert_eq!(error.code(), ErrorCode::MissingBeamMeterset);
        assert_eq!(error.placeholder(), "INPUT.BEAM_METERSET");
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn scan_sets_rescale() {
        let state = parse_scan(
            PlanState::default(),
            &parse_dump("RescaleIntercept = -1024\nRescaleSlope = 1\nImagePositionPatient = 0\\0\\0\n"),
        )
        .expect("scan dump should parse");
        assert_eq!(state.metadata.hu_intercept, -1024.0);
        assert_eq!(state.metadata.hu_slope, 1.0);
    }
}
