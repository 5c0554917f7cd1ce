use super::{PlanDialect, PlanState};
use crate::common::IngestSettings;
use crate::common::constants::{WEIGHT_SUM_LOWER, WEIGHT_SUM_UPPER};
use crate::domain::{
    AcceleratorType, BeamMetaData, BeamRecord, BeamType, ControlPoint, DosiaError, DosiaResult,
    Energy, ErrorCode, Filter, ModifierOrientation,
};
use crate::numerics::{stable_sum, within_closed_range};

/// Validates a parsed beam and converts its control points to the per-segment
/// representation: weights rescaled to monitor units, arcs turned into
/// dynamic segments or reweighted.
pub fn normalize(
    dialect: PlanDialect,
    state: PlanState,
    settings: &IngestSettings,
) -> DosiaResult<BeamRecord> {
    let PlanState {
        mut metadata,
        mut control_points,
    } = state;

    if dialect == PlanDialect::Dicom {
        cumulative_to_segment_weights(&mut control_points);
    }

    require_resolved(&metadata)?;

    let fraction_factor = settings.fraction_factor(metadata.fraction_count);
    metadata.prescription_dose *= fraction_factor;

    let weights: Vec<f64> = control_points
        .iter()
        .map(|cp| cp.geometry.relative_weight)
        .collect();
    let weight_sum = stable_sum(&weights);
    let scale = metadata.weight * metadata.mu_per_fraction * fraction_factor;
    let parallel_jaw_orientation = if metadata.accelerator.kind() == AcceleratorType::Mlci80 {
        ModifierOrientation::IecY
    } else {
        ModifierOrientation::NotPresent
    };

    for cp in &mut control_points {
        cp.geometry.isocenter = metadata.isocenter;
        cp.collimator.mlc.orientation = ModifierOrientation::IecY;
        cp.collimator.perpendicular_jaw.orientation = ModifierOrientation::IecX;
        cp.collimator.parallel_jaw.orientation = parallel_jaw_orientation;
        cp.geometry.relative_weight *= scale;
    }

    if !within_closed_range(weight_sum, WEIGHT_SUM_LOWER, WEIGHT_SUM_UPPER) {
        return Err(DosiaError::computation(
            ErrorCode::WeightSumViolation,
            "RUN.WEIGHT_SUM",
            format!(
                "control point weights sum to {weight_sum}, expected 1 within [{WEIGHT_SUM_LOWER}, {WEIGHT_SUM_UPPER}]"
            ),
        ));
    }

    if metadata.beam_type.is_arc() {
        if settings.pinnacle_vmat_interpolation {
            average_adjacent_weights(&mut control_points);
        } else {
            to_arc_segments(&mut control_points);
        }
    }

    tracing::debug!(
        %dialect,
        weight_sum,
        segments = control_points.len(),
        prescription_dose = metadata.prescription_dose,
        "control points normalized"
    );
    Ok(BeamRecord {
        metadata,
        control_points,
    })
}

fn require_resolved(metadata: &BeamMetaData) -> DosiaResult<()> {
    let accelerator = &metadata.accelerator;
    if !accelerator.kind().is_resolved() {
        return Err(DosiaError::input_validation(
            ErrorCode::UndefinedAccelerator,
            "INPUT.UNDEFINED_ACCELERATOR",
            format!("undefined accelerator encountered ({})", accelerator.kind()),
        ));
    }
    if accelerator.energy == Energy::Unknown {
        return Err(DosiaError::input_validation(
            ErrorCode::UnknownEnergy,
            "INPUT.UNKNOWN_ENERGY",
            "unknown energy encountered",
        ));
    }
    if accelerator.filter == Filter::Unknown {
        return Err(DosiaError::input_validation(
            ErrorCode::UnknownFilter,
            "INPUT.UNKNOWN_FILTER",
            "unknown filter encountered",
        ));
    }
    if metadata.beam_type == BeamType::Unknown {
        return Err(DosiaError::input_validation(
            ErrorCode::UnknownBeamType,
            "INPUT.UNKNOWN_BEAM_TYPE",
            "unknown beam type encountered",
        ));
    }
    Ok(())
}

/// Cumulative meterset fractions to per-segment weights; the last control
/// point closes the beam and carries no weight.
fn cumulative_to_segment_weights(control_points: &mut [ControlPoint]) {
    let cumulative: Vec<f64> = control_points
        .iter()
        .map(|cp| cp.geometry.relative_weight)
        .collect();
    for (index, cp) in control_points.iter_mut().enumerate() {
        cp.geometry.relative_weight = match cumulative.get(index + 1) {
            Some(next) => next - cumulative[index],
            None => 0.0,
        };
    }
}

/// N control points become N-1 segments, each running from one control
/// point to the next.
fn to_arc_segments(control_points: &mut Vec<ControlPoint>) {
    for index in 0..control_points.len().saturating_sub(1) {
        let (head, tail) = control_points.split_at_mut(index + 1);
        let segment = &mut head[index];
        let next = &tail[0];

        let geometry = &mut segment.geometry;
        geometry.gantry_angle.end = next.geometry.gantry_angle.start;
        geometry.couch_angle.end = next.geometry.couch_angle.start;
        geometry.collimator_angle.end = next.geometry.collimator_angle.start;
        geometry.field_min.0 = geometry.field_min.0.min(next.geometry.field_min.0);
        geometry.field_min.1 = geometry.field_min.1.min(next.geometry.field_min.1);
        geometry.field_max.0 = geometry.field_max.0.max(next.geometry.field_max.0);
        geometry.field_max.1 = geometry.field_max.1.max(next.geometry.field_max.1);

        let collimator = &mut segment.collimator;
        collimator.parallel_jaw.j1.end = next.collimator.parallel_jaw.j1.start;
        collimator.parallel_jaw.j2.end = next.collimator.parallel_jaw.j2.start;
        collimator.perpendicular_jaw.j1.end = next.collimator.perpendicular_jaw.j1.start;
        collimator.perpendicular_jaw.j2.end = next.collimator.perpendicular_jaw.j2.start;
        for (leaf, next_leaf) in collimator.mlc.left.iter_mut().zip(&next.collimator.mlc.left) {
            leaf.end = next_leaf.start;
        }
        for (leaf, next_leaf) in collimator.mlc.right.iter_mut().zip(&next.collimator.mlc.right) {
            leaf.end = next_leaf.start;
        }
    }
    control_points.pop();
}

/// Each segment takes the mean of its own and the next control point's
/// weight, then the last control point is dropped.
fn average_adjacent_weights(control_points: &mut Vec<ControlPoint>) {
    for index in 0..control_points.len().saturating_sub(1) {
        let next = control_points[index + 1].geometry.relative_weight;
        let current = &mut control_points[index].geometry.relative_weight;
        *current = *current / 2.0 + next / 2.0;
    }
    control_points.pop();
}

#[cfg(test)]
mod tests {
    use super::normalize;
    use crate::common::IngestSettings;
    use crate::domain::{
        Accelerator, AcceleratorType, BeamType, ControlPoint, Energy, ErrorCode, Filter,
        ModifierOrientation, Span,
    };
    use crate::modules::plan::{PlanDialect, PlanState};

    fn arc_state(weights: &[f64]) -> PlanState {
        let mut state = PlanState::default();
        let mut accelerator = Accelerator::new(AcceleratorType::Agility);
        accelerator.energy = Energy::Mv6;
        state.metadata.accelerator = accelerator;
        state.metadata.beam_type = BeamType::Vmat;
        state.metadata.weight = 1.0;
        state.metadata.isocenter = [1.0, 2.0, 3.0];
        state.control_points = weights
            .iter()
            .enumerate()
            .map(|(index, &weight)| {
                let mut cp = ControlPoint::with_leaf_pairs(2);
                let value = index as f64;
                cp.geometry.relative_weight = weight;
                cp.geometry.gantry_angle = Span::fixed(10.0 * value);
                cp.geometry.field_min = (-value, -1.0);
                cp.geometry.field_max = (1.0, value);
                cp.collimator.parallel_jaw.j1 = Span::fixed(-value);
                cp.collimator.mlc.left = vec![Span::fixed(value), Span::fixed(-value)];
                cp.collimator.mlc.right = vec![Span::fixed(2.0 * value), Span::fixed(3.0 * value)];
                cp
            })
            .collect();
        state
    }

    #[test]
    fn arc_control_points_become_segments() {
        let record = normalize(
            PlanDialect::Pinnacle,
            arc_state(&[0.0, 0.5, 0.5]),
            &IngestSettings::default(),
        )
        .expect("arc should normalize");

        assert_eq!(record.control_points.len(), 2);
        let first = &record.control_points[0];
        assert_eq!(first.geometry.gantry_angle, Span { start: 0.0, end: 10.0 });
        assert_eq!(first.geometry.field_min, (-1.0, -1.0));
        assert_eq!(first.geometry.field_max, (1.0, 1.0));
        assert_eq!(first.collimator.parallel_jaw.j1, Span { start: 0.0, end: -1.0 });
        assert_eq!(first.collimator.mlc.left[0], Span { start: 0.0, end: 1.0 });
        assert_eq!(first.collimator.mlc.right[1], Span { start: 0.0, end: 3.0 });

        let second = &record.control_points[1];
        assert_eq!(second.geometry.gantry_angle, Span { start: 10.0, end: 20.0 });
        assert_eq!(second.collimator.mlc.right[0], Span { start: 2.0, end: 4.0 });
        assert_eq!(second.geometry.isocenter, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn interpolation_mode_averages_weights() {
        let settings = IngestSettings {
            pinnacle_vmat_interpolation: true,
            ..IngestSettings::default()
        };
        let record = normalize(PlanDialect::Pinnacle, arc_state(&[0.0, 0.5, 0.5]), &settings)
            .expect("arc should normalize");

        let weights: Vec<f64> = record
            .control_points
            .iter()
            .map(|cp| cp.geometry.relative_weight)
            .collect();
        assert_eq!(weights, vec![0.25, 0.5]);
        assert_eq!(record.control_points[0].geometry.gantry_angle, Span::fixed(0.0));
    }

    #[test]
    fn weights_scale_by_beam_weight_monitor_units_and_fractions() {
        let mut state = arc_state(&[0.25, 0.75]);
        state.metadata.beam_type = BeamType::Imrt;
        state.metadata.weight = 2.0;
        state.metadata.mu_per_fraction = 100.0;
        state.metadata.fraction_count = 3;
        state.metadata.prescription_dose = 2.0;
        let settings = IngestSettings {
            dose_per_fraction: false,
            ..IngestSettings::default()
        };

        let record = normalize(PlanDialect::Pinnacle, state, &settings).expect("beam should normalize");
        assert_eq!(record.control_points[0].geometry.relative_weight, 150.0);
        assert_eq!(record.control_points[1].geometry.relative_weight, 450.0);
        assert_eq!(record.metadata.prescription_dose, 6.0);
        assert!((record.total_relative_weight() - 600.0).abs() < 1e-9);
    }

    #[test]
    fn orientations_depend_on_accelerator() {
        let mut state = arc_state(&[1.0]);
        state.metadata.beam_type = BeamType::Imrt;
        let record = normalize(PlanDialect::Pinnacle, state, &IngestSettings::default())
            .expect("beam should normalize");
        let collimator = &record.control_points[0].collimator;
        assert_eq!(collimator.mlc.orientation, ModifierOrientation::IecY);
        assert_eq!(collimator.perpendicular_jaw.orientation, ModifierOrientation::IecX);
        assert_eq!(collimator.parallel_jaw.orientation, ModifierOrientation::NotPresent);

        let mut state = arc_state(&[1.0]);
        state.metadata.beam_type = BeamType::Imrt;
        state.metadata.accelerator = state.metadata.accelerator.reidentify(AcceleratorType::Mlci80);
        let record = normalize(PlanDialect::Pinnacle, state, &IngestSettings::default())
            .expect("beam should normalize");
        assert_eq!(
            record.control_points[0].collimator.parallel_jaw.orientation,
            ModifierOrientation::IecY
        );
    }

    #[test]
    fn weight_sum_outside_tolerance_is_fatal() {
        let error = normalize(
            PlanDialect::Pinnacle,
            arc_state(&[0.25, 0.25]),
            &IngestSettings::default(),
        )
        .expect_err("weights sum to 0.5");
        assert_eq!(error.code(), ErrorCode::WeightSumViolation);

        normalize(
            PlanDialect::Pinnacle,
            arc_state(&[0.49995, 0.5]),
            &IngestSettings::default(),
        )
        .expect("within tolerance");
    }

    #[test]
    fn dicom_cumulative_weights_are_differenced_first() {
        let record = normalize(
            PlanDialect::Dicom,
            arc_state(&[0.0, 0.4, 1.0]),
            &IngestSettings {
                pinnacle_vmat_interpolation: true,
                ..IngestSettings::default()
            },
        )
        .expect("arc should normalize");
        let weights: Vec<f64> = record
            .control_points
            .iter()
            .map(|cp| cp.geometry.relative_weight)
            .collect();
        assert_eq!(weights.len(), 2);
        assert!((weights[0] - 0.5).abs() < 1e-12);
        assert!((weights[1] - 0.3).abs() < 1e-12);
    }

    #[test]
    fn unresolved_fields_are_reported_in_order() {
        let mut state = arc_state(&[1.0]);
        state.metadata.accelerator = Accelerator::default();
        let error = normalize(PlanDialect::Pinnacle, state, &IngestSettings::default())
            .expect_err("empty accelerator");
        assert_eq!(error.code(), ErrorCode::UndefinedAccelerator);

        let mut state = arc_state(&[1.0]);
        state.metadata.accelerator.energy = Energy::Unknown;
        let error = normalize(PlanDialect::Pinnacle, state, &IngestSettings::default())
            .expect_err("unknown energy");
        assert_eq!(error.code(), ErrorCode::UnknownEnergy);

        let mut state = arc_state(&[1.0]);
        state.metadata.accelerator.filter = Filter::Unknown;
        let error = normalize(PlanDialect::Pinnacle, state, &IngestSettings::default())
            .expect_err("unknown filter");
        assert_eq!(error.code(), ErrorCode::UnknownFilter);

        let mut state = arc_state(&[1.0]);
        state.metadata.beam_type = BeamType::Unknown;
        let error = normalize(PlanDialect::Pinnacle, state, &IngestSettings::default())
            .expect_err("unknown beam type");
        assert_eq!(error.code(), ErrorCode::UnknownBeamType);
    }
}
