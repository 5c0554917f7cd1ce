//! Volumetric image codec.
//!
//! Two on-disk layouts are supported, selected by file extension:
//! `.xdr` (self-describing, big-endian) and `.mhd` (text header plus a
//! little-endian `.raw` sidecar). Voxels are always widened to `f32` in memory.

mod mhd;
mod xdr;

use crate::common::constants::MAX_IMAGE_AXES;
use crate::domain::{CodecResult, DosiaError, ErrorCode};
use byteorder::{ByteOrder, WriteBytesExt};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Xdr,
    MetaImage,
}

impl ImageFormat {
    pub fn from_path(path: &Path) -> CodecResult<Self> {
        match path.extension().and_then(|extension| extension.to_str()) {
            Some("xdr") => Ok(Self::Xdr),
            Some("mhd") => Ok(Self::MetaImage),
            _ => Err(DosiaError::input_validation(
                ErrorCode::UnsupportedImageExtension,
                "INPUT.IMAGE_EXTENSION",
                format!(
                    "image '{}' has no supported extension (.xdr or .mhd)",
                    path.display()
                ),
            )),
        }
    }
}

/// On-disk voxel storage width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ElementType {
    Short,
    #[default]
    Float,
}

impl ElementType {
    pub const fn size_bytes(self) -> usize {
        match self {
            Self::Short => 2,
            Self::Float => 4,
        }
    }

    /// Rounds to the nearest 16-bit integer, saturating at the type bounds.
    pub fn narrow(value: f32) -> i16 {
        value.round() as i16
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoxelGrid {
    dims: Vec<usize>,
    spacing: Vec<f32>,
    min_extent: Vec<f32>,
    max_extent: Vec<f32>,
    data: Vec<f32>,
}

impl VoxelGrid {
    /// Builds a grid from its corner and spacing; the maximum extent is derived.
    pub fn new(
        dims: Vec<usize>,
        min_extent: Vec<f32>,
        spacing: Vec<f32>,
        data: Vec<f32>,
    ) -> CodecResult<Self> {
        validate_axes(&dims, &[min_extent.len(), spacing.len()])?;
        validate_voxel_count(&dims, data.len())?;
        let max_extent = dims
            .iter()
            .zip(min_extent.iter().zip(&spacing))
            .map(|(&size, (&min, &step))| min + step * (size as f32 - 1.0))
            .collect();
        Ok(Self {
            dims,
            spacing,
            min_extent,
            max_extent,
            data,
        })
    }

    /// Builds a grid from both extents; spacing is derived as
    /// `(max - min) / (size - 1)`, with singleton axes treated as one interval.
    pub fn from_extents(
        dims: Vec<usize>,
        min_extent: Vec<f32>,
        max_extent: Vec<f32>,
        data: Vec<f32>,
    ) -> CodecResult<Self> {
        validate_axes(&dims, &[min_extent.len(), max_extent.len()])?;
        validate_voxel_count(&dims, data.len())?;
        let spacing = dims
            .iter()
            .zip(min_extent.iter().zip(&max_extent))
            .map(|(&size, (&min, &max))| (max - min) / (size.max(2) - 1) as f32)
            .collect();
        Ok(Self {
            dims,
            spacing,
            min_extent,
            max_extent,
            data,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> CodecResult<Self> {
        let path = path.as_ref();
        let grid = match ImageFormat::from_path(path)? {
            ImageFormat::Xdr => xdr::read(path)?,
            ImageFormat::MetaImage => mhd::read(path)?,
        };
        tracing::info!(dims = ?grid.dims, "loaded image {}", path.display());
        Ok(grid)
    }

    pub fn store(&self, path: impl AsRef<Path>) -> CodecResult<()> {
        self.store_as(path, ElementType::Float)
    }

    pub fn store_as(&self, path: impl AsRef<Path>, element: ElementType) -> CodecResult<()> {
        let path = path.as_ref();
        match ImageFormat::from_path(path)? {
            ImageFormat::Xdr => xdr::write(self, path, element)?,
            ImageFormat::MetaImage => mhd::write(self, path, element)?,
        }
        tracing::info!(?element, "wrote image {}", path.display());
        Ok(())
    }

    /// Same geometry, different voxel values.
    pub fn with_voxels(&self, data: Vec<f32>) -> CodecResult<Self> {
        if data.len() != self.data.len() {
            return Err(DosiaError::input_validation(
                ErrorCode::VoxelCountMismatch,
                "INPUT.VOXEL_COUNT",
                format!(
                    "replacement voxel array has {} values, grid has {}",
                    data.len(),
                    self.data.len()
                ),
            ));
        }
        Ok(Self {
            data,
            ..self.clone()
        })
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn spacing(&self) -> &[f32] {
        &self.spacing
    }

    pub fn min_extent(&self) -> &[f32] {
        &self.min_extent
    }

    pub fn max_extent(&self) -> &[f32] {
        &self.max_extent
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn voxel_count(&self) -> usize {
        self.data.len()
    }
}

/// `None` when the product of the axis sizes does not fit in `usize`.
fn voxel_count_for(dims: &[usize]) -> Option<usize> {
    dims.iter()
        .try_fold(1_usize, |count, &size| count.checked_mul(size))
}

/// On-disk payload length implied by a header's axis sizes.
pub(crate) fn payload_bytes_for(
    path: &Path,
    dims: &[usize],
    element: ElementType,
) -> CodecResult<usize> {
    voxel_count_for(dims)
        .and_then(|count| count.checked_mul(element.size_bytes()))
        .ok_or_else(|| {
            header_error(
                path,
                format!("dimensions {dims:?} exceed the addressable payload size"),
            )
        })
}

fn validate_axes(dims: &[usize], per_axis_lengths: &[usize]) -> CodecResult<()> {
    if dims.is_empty() || dims.len() > MAX_IMAGE_AXES || dims.contains(&0) {
        return Err(DosiaError::input_validation(
            ErrorCode::MalformedImageHeader,
            "INPUT.IMAGE_SHAPE",
            format!("image dimensions {:?} must name 1 to {} non-empty axes", dims, MAX_IMAGE_AXES),
        ));
    }
    if per_axis_lengths.iter().any(|&length| length != dims.len()) {
        return Err(DosiaError::input_validation(
            ErrorCode::MalformedImageHeader,
            "INPUT.IMAGE_SHAPE",
            format!("image geometry does not have one entry per axis for {} axes", dims.len()),
        ));
    }
    Ok(())
}

fn validate_voxel_count(dims: &[usize], count: usize) -> CodecResult<()> {
    let expected = voxel_count_for(dims).ok_or_else(|| {
        DosiaError::input_validation(
            ErrorCode::MalformedImageHeader,
            "INPUT.IMAGE_SHAPE",
            format!("dimensions {dims:?} overflow the voxel count"),
        )
    })?;
    if count != expected {
        return Err(DosiaError::input_validation(
            ErrorCode::VoxelCountMismatch,
            "INPUT.VOXEL_COUNT",
            format!("dimensions {:?} need {} voxels, got {}", dims, expected, count),
        ));
    }
    Ok(())
}

pub(crate) fn header_error(path: &Path, message: impl AsRef<str>) -> DosiaError {
    DosiaError::input_validation(
        ErrorCode::MalformedImageHeader,
        "INPUT.IMAGE_HEADER",
        format!("{}: {}", path.display(), message.as_ref()),
    )
}

pub(crate) fn size_mismatch_error(path: &Path, expected: usize, actual: usize) -> DosiaError {
    DosiaError::input_validation(
        ErrorCode::ImageSizeMismatch,
        "INPUT.IMAGE_SIZE",
        format!(
            "{} is {} bytes, header implies {} bytes",
            path.display(),
            actual,
            expected
        ),
    )
}

/// Caller guarantees `bytes.len()` is a multiple of the element size.
pub(crate) fn decode_voxels<B: ByteOrder>(bytes: &[u8], element: ElementType) -> Vec<f32> {
    match element {
        ElementType::Short => bytes
            .chunks_exact(2)
            .map(|chunk| f32::from(B::read_i16(chunk)))
            .collect(),
        ElementType::Float => bytes.chunks_exact(4).map(B::read_f32).collect(),
    }
}

pub(crate) fn encode_voxels<B: ByteOrder>(
    data: &[f32],
    element: ElementType,
) -> std::io::Result<Vec<u8>> {
    let mut bytes = Vec::with_capacity(data.len() * element.size_bytes());
    for &value in data {
        match element {
            ElementType::Short => bytes.write_i16::<B>(ElementType::narrow(value))?,
            ElementType::Float => bytes.write_f32::<B>(value)?,
        }
    }
    Ok(bytes)
}
