//! Flat indexed dumps (`gantry[3] = 180.0`).

use super::{PlanState, control_point_mut, leaf_count_error, sized_control_points};
use crate::common::IngestSettings;
use crate::domain::{AcceleratorType, BeamType, DosiaError, DosiaResult, ErrorCode, Span};
use crate::numerics::stable_sum;
use crate::parser::DumpEntry;

pub(super) fn parse_trial(mut state: PlanState, entries: &[DumpEntry]) -> DosiaResult<PlanState> {
    let metadata = &mut state.metadata;
    for entry in entries {
        let key = entry.key.as_str();
        if key.starts_with("numberoffractions[") {
            metadata.fraction_count = u32::try_from(entry.i64_value()?).map_err(|_| {
                DosiaError::input_validation(
                    ErrorCode::InvalidDumpValue,
                    "INPUT.DUMP_VALUE",
                    format!("fraction count '{}' is out of range", entry.value),
                )
            })?;
        } else if key.starts_with("negativemupenalty") {
            // No rescale slope exists in this dialect; the penalty is the negated intercept.
            metadata.hu_intercept = -(entry.i64_value()? as f64);
            metadata.hu_slope = 1.0;
        } else if key.starts_with("outsidepatientairthreshold") {
            metadata.outside_patient_air_threshold = entry.f64_value()?;
        } else if key.starts_with("outsidepatientisctnumber") {
            metadata.outside_patient_ct_number = i32::try_from(entry.i64_value()?).map_err(|_| {
                DosiaError::input_validation(
                    ErrorCode::InvalidDumpValue,
                    "INPUT.DUMP_VALUE",
                    format!("outside-patient CT number '{}' is out of range", entry.value),
                )
            })?;
        } else if key.starts_with("patient_position") {
            metadata.patient_position = entry.value.clone();
        } else if key.starts_with("couchremovalycoordinate") {
            metadata.couch_removal_y = entry.f64_value()?;
        }
    }

    tracing::debug!(
        hu_intercept = metadata.hu_intercept,
        hu_slope = metadata.hu_slope,
        fractions = metadata.fraction_count,
        "trial parsed"
    );
    Ok(state)
}

pub(super) fn parse_beam(
    mut state: PlanState,
    entries: &[DumpEntry],
    settings: &IngestSettings,
) -> DosiaResult<PlanState> {
    let margin = settings.field_margin;
    let mut skip_lines = 0_usize;
    let mut control_point_weights = Vec::new();

    for entry in entries {
        if skip_lines > 0 {
            skip_lines -= 1;
            tracing::trace!(line = entry.source_line, key = %entry.key, "skipping line");
            continue;
        }

        let key = entry.key.as_str();
        let metadata = &mut state.metadata;
        let leafs = metadata.accelerator.leafs_per_bank();
        let control_points = &mut state.control_points;

        match key {
            "isocentername" => {
                metadata.isocenter_name = entry.value.clone();
                continue;
            }
            "machinenameandversion" => {
                metadata.accelerator = metadata
                    .accelerator
                    .reidentify(AcceleratorType::from_machine_name(&entry.value));
                continue;
            }
            "machineenergyname" => {
                metadata.accelerator.apply_energy_name(&entry.value);
                continue;
            }
            "numberofcontrolpoints" => {
                *control_points = sized_control_points(entry.count_value()?, leafs);
                continue;
            }
            _ => {}
        }

        if key.starts_with("gantry[") {
            let angle = entry.f64_value()?;
            control_point_mut(control_points, entry.index(1), entry)?
                .geometry
                .gantry_angle = Span::fixed(angle);
        } else if key.starts_with("couch[") {
            let angle = 360.0 - entry.f64_value()?;
            control_point_mut(control_points, entry.index(1), entry)?
                .geometry
                .couch_angle = Span::fixed(angle);
        } else if key.starts_with("collimator[") {
            let angle = entry.f64_value()?;
            control_point_mut(control_points, entry.index(1), entry)?
                .geometry
                .collimator_angle = Span::fixed(angle);
        } else if key.starts_with("setbeamtype") {
            metadata.beam_type = BeamType::from_label(&entry.value);
        } else if key.starts_with("numberofpoints[") {
            let declared = entry.count_value()?;
            if declared != leafs {
                // Best-effort resync: assumes one line per leaf per bank follows.
                tracing::warn!(
                    line = entry.source_line,
                    declared,
                    expected = leafs,
                    "invalid control point leaf count, skipping its points"
                );
                skip_lines = declared * 2;
            }
        } else if key.starts_with("points_element[") {
            let position = entry.f64_value()?;
            let leaf = entry.index(2).ok_or_else(|| {
                leaf_count_error(format!("key '{}' has no leaf index", entry.key))
            })?;
            let mlc = &mut control_point_mut(control_points, entry.index(1), entry)?
                .collimator
                .mlc;
            place_leaf(&mut mlc.left, &mut mlc.right, leafs, leaf, position).ok_or_else(|| {
                leaf_count_error(format!(
                    "leaf index {} at line {} exceeds {} leaf pairs per bank",
                    leaf, entry.source_line, leafs
                ))
            })?;
        } else if key.starts_with("leftjawposition[") {
            let position = -entry.f64_value()?;
            let cp = control_point_mut(control_points, entry.index(1), entry)?;
            cp.collimator.parallel_jaw.j1 = Span::fixed(position);
            cp.geometry.field_min.0 = position - margin;
        } else if key.starts_with("rightjawposition[") {
            let position = entry.f64_value()?;
            let cp = control_point_mut(control_points, entry.index(1), entry)?;
            cp.collimator.parallel_jaw.j2 = Span::fixed(position);
            cp.geometry.field_max.0 = position + margin;
        } else if key.starts_with("topjawposition[") {
            let position = entry.f64_value()?;
            let cp = control_point_mut(control_points, entry.index(1), entry)?;
            cp.collimator.perpendicular_jaw.j2 = Span::fixed(position);
            cp.geometry.field_max.1 = position + margin;
        } else if key.starts_with("bottomjawposition[") {
            let position = -entry.f64_value()?;
            let cp = control_point_mut(control_points, entry.index(1), entry)?;
            cp.collimator.perpendicular_jaw.j1 = Span::fixed(position);
            cp.geometry.field_min.1 = position - margin;
        } else if key.starts_with("weight[") {
            let weight = entry.f64_value()?;
            control_point_mut(control_points, entry.index(1), entry)?
                .geometry
                .relative_weight = weight;
            control_point_weights.push(weight);
        } else if key.starts_with("weight") {
            metadata.weight = entry.f64_value()?;
        }
    }

    tracing::debug!(
        beam_weight = state.metadata.weight,
        control_point_weight_total = stable_sum(&control_point_weights),
        control_points = state.control_points.len(),
        "beam parsed"
    );
    Ok(state)
}

/// Stream positions alternate left/right and count leaf pairs from the far
/// end of each bank; left positions are mirrored about the beam axis.
fn place_leaf(
    left: &mut [Span],
    right: &mut [Span],
    leafs: usize,
    stream_index: usize,
    position: f64,
) -> Option<()> {
    let pair = stream_index / 2;
    let slot = leafs.checked_sub(1)?.checked_sub(pair)?;
    if stream_index % 2 == 0 {
        *left.get_mut(slot)? = Span::fixed(-position);
    } else {
        *right.get_mut(slot)? = Span::fixed(position);
    }
    Some(())
}

pub(super) fn parse_plan(mut state: PlanState, entries: &[DumpEntry]) -> DosiaResult<PlanState> {
    let metadata = &mut state.metadata;
    if metadata.isocenter_name.is_empty() {
        return Err(DosiaError::input_validation(
            ErrorCode::MissingIsocenterName,
            "INPUT.ISOCENTER_NAME",
            "plan dump read before the beam named its isocenter",
        ));
    }

    let name = metadata.isocenter_name.to_lowercase();
    let axes = [
        (format!("{name}_x"), 1.0),
        (format!("{name}_y"), -1.0),
        (format!("{name}_z"), -1.0),
    ];
    for entry in entries {
        let key = entry.key.to_lowercase();
        if let Some(axis) = axes.iter().position(|(prefix, _)| key.starts_with(prefix)) {
            metadata.isocenter[axis] = axes[axis].1 * entry.f64_value()?;
        }
    }

    tracing::debug!(isocenter = ?metadata.isocenter, "plan parsed");
    Ok(state)
}

pub(super) fn parse_dose(mut state: PlanState, entries: &[DumpEntry]) -> DosiaResult<PlanState> {
    let metadata = &mut state.metadata;
    for entry in entries {
        if entry.key.starts_with("prescriptiondose") {
            metadata.prescription_dose = entry.f64_value()?;
        } else if entry.key.starts_with("requestedmonitorunitsperfraction") {
            metadata.mu_per_fraction = entry.f64_value()?;
        }
    }
    tracing::debug!(
        prescription_dose = metadata.prescription_dose,
        mu_per_fraction = metadata.mu_per_fraction,
        "dose parsed"
    );
    Ok(state)
}
