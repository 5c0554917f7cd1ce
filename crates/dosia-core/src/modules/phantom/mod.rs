//! CT volume to phantom conversion.

mod calibration;
mod model;

pub use calibration::{HounsfieldTable, MaterialTable};
pub use model::Phantom;

use crate::common::IngestSettings;
use crate::common::constants::{CT_VOLUME_FILE, MASS_DENSITY_DEBUG_FILE, MEDIUM_INDEX_DEBUG_FILE};
use crate::domain::{BeamMetaData, DosiaError, DosiaResult, ErrorCode};
use crate::modules::image::VoxelGrid;
use std::path::Path;

/// Hounsfield rescale taken from the plan's scan metadata.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HounsfieldRescale {
    pub slope: f64,
    pub intercept: f64,
}

impl HounsfieldRescale {
    pub fn from_metadata(metadata: &BeamMetaData) -> Self {
        Self {
            slope: metadata.hu_slope,
            intercept: metadata.hu_intercept,
        }
    }

    pub fn apply(&self, raw: f64) -> f64 {
        raw * self.slope + self.intercept
    }
}

impl Default for HounsfieldRescale {
    fn default() -> Self {
        Self {
            slope: 1.0,
            intercept: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhantomBuilder {
    hounsfield: HounsfieldTable,
    materials: MaterialTable,
}

impl PhantomBuilder {
    pub fn new(hounsfield: HounsfieldTable, materials: MaterialTable) -> Self {
        Self {
            hounsfield,
            materials,
        }
    }

    /// Loads both calibration tables from the configured conversion directory.
    pub fn from_settings(settings: &IngestSettings) -> DosiaResult<Self> {
        let hounsfield = HounsfieldTable::load(settings.hu_to_density_path())?;
        let materials = MaterialTable::load(settings.density_to_material_path())?;
        Ok(Self::new(hounsfield, materials))
    }

    pub fn build(
        &self,
        grid: &VoxelGrid,
        rescale: HounsfieldRescale,
        settings: &IngestSettings,
    ) -> DosiaResult<Phantom> {
        let (voxel_counts, voxel_sizes, min_extent) = volume_axes(grid)?;
        let corner = [0, 1, 2].map(|axis| min_extent[axis] - voxel_sizes[axis] / 2.0);

        let mass_density: Vec<f32> = grid
            .data()
            .iter()
            .map(|&raw| {
                self.hounsfield
                    .density_for(rescale.apply(f64::from(raw))) as f32
            })
            .collect();

        let medium_index = mass_density
            .iter()
            .map(|&density| {
                let density = f64::from(density);
                if settings.continuous_materials {
                    self.materials.continuous_index(density) as f32
                } else {
                    self.materials.discrete_index(density) as f32
                }
            })
            .collect();

        let mut phantom = Phantom {
            voxel_counts,
            voxel_sizes,
            corner,
            mass_density,
            medium_index,
            materials: self.materials.names().to_vec(),
            reference_medium: None,
        };
        phantom.apply_reference_medium(settings);
        phantom.log_geometry();
        Ok(phantom)
    }
}

fn volume_axes(grid: &VoxelGrid) -> DosiaResult<([usize; 3], [f32; 3], [f32; 3])> {
    let (Ok(dims), Ok(spacing), Ok(min_extent)) = (
        <[usize; 3]>::try_from(grid.dims()),
        <[f32; 3]>::try_from(grid.spacing()),
        <[f32; 3]>::try_from(grid.min_extent()),
    ) else {
        return Err(DosiaError::input_validation(
            ErrorCode::UnsupportedVolumeShape,
            "INPUT.CT_SHAPE",
            format!("CT volume has {} axes, 3 required", grid.ndim()),
        ));
    };
    Ok((dims, spacing, min_extent))
}

/// CT volume of a plan directory together with the phantom derived from it.
#[derive(Debug, Clone)]
pub struct CtPhantom {
    pub image: VoxelGrid,
    pub phantom: Phantom,
}

impl CtPhantom {
    pub fn load(
        plan_dir: impl AsRef<Path>,
        settings: &IngestSettings,
        metadata: &BeamMetaData,
    ) -> DosiaResult<Self> {
        let plan_dir = plan_dir.as_ref();
        let builder = PhantomBuilder::from_settings(settings)?;
        let image = VoxelGrid::load(plan_dir.join(CT_VOLUME_FILE))?;
        let phantom = builder.build(&image, HounsfieldRescale::from_metadata(metadata), settings)?;
        let ct = Self { image, phantom };

        if settings.debug_output {
            ct.write_debug_images(plan_dir)?;
        }
        Ok(ct)
    }

    /// Writes the medium index and mass density arrays on the CT geometry.
    pub fn write_debug_images(&self, dir: &Path) -> DosiaResult<()> {
        self.image
            .with_voxels(self.phantom.medium_index.clone())?
            .store(dir.join(MEDIUM_INDEX_DEBUG_FILE))?;
        self.image
            .with_voxels(self.phantom.mass_density.clone())?
            .store(dir.join(MASS_DENSITY_DEBUG_FILE))?;
        Ok(())
    }
}
