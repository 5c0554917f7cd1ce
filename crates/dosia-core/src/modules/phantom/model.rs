use crate::common::IngestSettings;
use crate::common::constants::REFERENCE_MEDIUM_NAME;
use serde::Serialize;

/// Voxelized patient handed to the dose engine.
///
/// `mass_density` and `medium_index` are parallel arrays of one value per
/// voxel. `corner` is the outer corner of the first voxel, not its centre.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Phantom {
    pub voxel_counts: [usize; 3],
    pub voxel_sizes: [f32; 3],
    pub corner: [f32; 3],
    pub mass_density: Vec<f32>,
    pub medium_index: Vec<f32>,
    pub materials: Vec<String>,
    pub reference_medium: Option<usize>,
}

impl Phantom {
    pub fn voxel_count(&self) -> usize {
        self.voxel_counts.iter().product()
    }

    /// Appends the reference medium when dose is scored in water, and forces
    /// every voxel to it when transport also happens in water.
    pub(super) fn apply_reference_medium(&mut self, settings: &IngestSettings) {
        if !settings.uses_reference_medium() {
            return;
        }
        self.materials.push(REFERENCE_MEDIUM_NAME.to_string());
        let reference = self.materials.len() - 1;
        self.reference_medium = Some(reference);

        if settings.score_and_transport_in_water {
            self.medium_index.fill(reference as f32);
        }
        tracing::debug!(
            reference,
            transport_in_water = settings.score_and_transport_in_water,
            "reference medium set"
        );
    }

    pub fn log_geometry(&self) {
        tracing::debug!(
            voxel_sizes = ?self.voxel_sizes,
            voxel_counts = ?self.voxel_counts,
            corner = ?self.corner,
            "phantom geometry"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::Phantom;
    use crate::common::IngestSettings;

    fn phantom() -> Phantom {
        Phantom {
            voxel_counts: [2, 1, 1],
            voxel_sizes: [1.0; 3],
            corner: [0.0; 3],
            mass_density: vec![1.0, 0.5],
            medium_index: vec![0.0, 1.5],
            materials: vec!["Air".into(), "Lung".into(), "Soft".into()],
            reference_medium: None,
        }
    }

    #[test]
    fn no_reference_medium_by_default() {
        let mut phantom = phantom();
        phantom.apply_reference_medium(&IngestSettings::default());
        assert_eq!(phantom.materials.len(), 3);
        assert_eq!(phantom.reference_medium, None);
    }

    #[test]
    fn dose_to_water_appends_reference_medium_only() {
        let mut phantom = phantom();
        let settings = IngestSettings {
            score_dose_to_water: true,
            ..IngestSettings::default()
        };
        phantom.apply_reference_medium(&settings);
        assert_eq!(phantom.materials.last().map(String::as_str), Some("Water"));
        assert_eq!(phantom.reference_medium, Some(3));
        assert_eq!(phantom.medium_index, vec![0.0, 1.5]);
    }

    #[test]
    fn transport_in_water_overwrites_every_voxel() {
        let mut phantom = phantom();
        let settings = IngestSettings {
            score_and_transport_in_water: true,
            ..IngestSettings::default()
        };
        phantom.apply_reference_medium(&settings);
        assert_eq!(phantom.reference_medium, Some(3));
        assert_eq!(phantom.medium_index, vec![3.0, 3.0]);
        assert_eq!(phantom.voxel_count(), 2);
    }
}
