use super::{
    ElementType, VoxelGrid, decode_voxels, encode_voxels, header_error, payload_bytes_for,
    size_mismatch_error,
};
use crate::common::constants::SIDECAR_UNIT_SCALE;
use crate::domain::{CodecResult, DosiaError, ErrorCode};
use crate::modules::serialization::{
    read_binary_artifact, read_text_artifact, write_binary_artifact, write_text_artifact,
};
use crate::parser::{DumpEntry, parse_dump};
use byteorder::LittleEndian;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
struct MetaHeader {
    ndim: Option<usize>,
    dims: Vec<usize>,
    spacing: Vec<f32>,
    offset: Vec<f32>,
    element: Option<ElementType>,
    data_file: Option<String>,
}

impl MetaHeader {
    fn parse(path: &Path, text: &str) -> CodecResult<Self> {
        let mut header = Self::default();
        for entry in parse_dump(text) {
            let key = entry.key.as_str();
            if key.starts_with("NDims") {
                header.ndim = Some(parse_list::<usize>(path, &entry)?.into_iter().next().ok_or_else(
                    || header_error(path, "NDims has no value"),
                )?);
            } else if key.starts_with("BinaryDataByteOrderMSB") {
                require_flag(path, &entry, "False")?;
            } else if key.starts_with("BinaryData") {
                require_flag(path, &entry, "True")?;
            } else if key.starts_with("CompressedData") {
                require_flag(path, &entry, "False")?;
            } else if key.starts_with("ElementSpacing") {
                header.spacing = scaled_list(path, &entry)?;
            } else if key.starts_with("DimSize") {
                header.dims = parse_list::<usize>(path, &entry)?;
            } else if key.starts_with("Offset") {
                header.offset = scaled_list(path, &entry)?;
            } else if key.starts_with("ElementDataFile") {
                header.data_file = Some(entry.value.clone());
            } else if key.starts_with("ElementType") {
                header.element = Some(parse_element(path, &entry.value)?);
            }
        }
        Ok(header)
    }

    fn payload_path(&self, header_path: &Path) -> CodecResult<PathBuf> {
        let data_file = self
            .data_file
            .as_deref()
            .ok_or_else(|| header_error(header_path, "header has no ElementDataFile"))?;
        let data_file = Path::new(data_file);
        if data_file.is_absolute() {
            return Ok(data_file.to_path_buf());
        }
        Ok(header_path
            .parent()
            .map(|parent| parent.join(data_file))
            .unwrap_or_else(|| data_file.to_path_buf()))
    }
}

fn require_flag(path: &Path, entry: &DumpEntry, expected: &str) -> CodecResult<()> {
    if entry.value.starts_with(expected) {
        Ok(())
    } else {
        Err(header_error(
            path,
            format!("{} = {} is not supported, expected {}", entry.key, entry.value, expected),
        ))
    }
}

fn parse_list<T: std::str::FromStr>(path: &Path, entry: &DumpEntry) -> CodecResult<Vec<T>> {
    entry
        .value
        .split_whitespace()
        .map(|token| {
            token.parse::<T>().map_err(|_| {
                header_error(path, format!("{} = {} is not a list of numbers", entry.key, entry.value))
            })
        })
        .collect()
}

fn scaled_list(path: &Path, entry: &DumpEntry) -> CodecResult<Vec<f32>> {
    Ok(parse_list::<f32>(path, entry)?
        .into_iter()
        .map(|value| value / SIDECAR_UNIT_SCALE)
        .collect())
}

fn parse_element(path: &Path, value: &str) -> CodecResult<ElementType> {
    if value.starts_with("MET_SHORT") {
        Ok(ElementType::Short)
    } else if value.starts_with("MET_FLOAT") {
        Ok(ElementType::Float)
    } else {
        Err(header_error(path, format!("unsupported ElementType '{value}'")))
    }
}

fn element_label(element: ElementType) -> &'static str {
    match element {
        ElementType::Short => "MET_SHORT",
        ElementType::Float => "MET_FLOAT",
    }
}

pub(super) fn read(path: &Path) -> CodecResult<VoxelGrid> {
    let header = MetaHeader::parse(path, &read_text_artifact(path)?)?;
    let element = header
        .element
        .ok_or_else(|| header_error(path, "header has no ElementType"))?;
    if let Some(ndim) = header.ndim {
        if ndim != header.dims.len() {
            return Err(header_error(
                path,
                format!("NDims = {} but DimSize lists {} axes", ndim, header.dims.len()),
            ));
        }
    }

    let expected = payload_bytes_for(path, &header.dims, element)?;
    let raw_path = header.payload_path(path)?;
    let bytes = read_binary_artifact(&raw_path)?;
    if bytes.len() != expected {
        return Err(size_mismatch_error(&raw_path, expected, bytes.len()));
    }

    let data = decode_voxels::<LittleEndian>(&bytes, element);
    tracing::debug!(
        dims = ?header.dims,
        ?element,
        raw = %raw_path.display(),
        "parsed metaimage header"
    );
    VoxelGrid::new(header.dims, header.offset, header.spacing, data)
}

fn join_scaled(values: &[f32]) -> String {
    values
        .iter()
        .map(|value| (value * SIDECAR_UNIT_SCALE).to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

pub(super) fn write(grid: &VoxelGrid, path: &Path, element: ElementType) -> CodecResult<()> {
    let raw_path = path.with_extension("raw");
    let raw_name = raw_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| header_error(path, "cannot derive a sidecar file name"))?;
    let dims = grid
        .dims()
        .iter()
        .map(usize::to_string)
        .collect::<Vec<_>>()
        .join(" ");

    let header = [
        "ObjectType = Image".to_string(),
        format!("NDims = {}", grid.ndim()),
        "BinaryData = True".to_string(),
        "BinaryDataByteOrderMSB = False".to_string(),
        "CompressedData = False".to_string(),
        format!("Offset = {}", join_scaled(grid.min_extent())),
        format!("ElementSpacing = {}", join_scaled(grid.spacing())),
        format!("DimSize = {dims}"),
        format!("ElementType = {}", element_label(element)),
        format!("ElementDataFile = {raw_name}"),
    ]
    .join("\n");

    let payload = encode_voxels::<LittleEndian>(grid.data(), element).map_err(|source| {
        DosiaError::internal(
            ErrorCode::WriteFailure,
            "SYS.RAW_ENCODE",
            format!("failed to encode '{}': {}", raw_path.display(), source),
        )
    })?;
    write_text_artifact(path, &header)?;
    write_binary_artifact(&raw_path, &payload)
}
