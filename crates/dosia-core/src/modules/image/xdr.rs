use super::{
    ElementType, VoxelGrid, decode_voxels, encode_voxels, header_error, payload_bytes_for,
    size_mismatch_error,
};
use crate::common::constants::MAX_IMAGE_AXES;
use crate::domain::{CodecResult, DosiaError, ErrorCode};
use crate::modules::serialization::{read_binary_artifact, write_binary_artifact};
use crate::parser::{DumpEntry, parse_dump};
use byteorder::BigEndian;
use std::path::Path;

const HEADER_SENTINEL: u8 = 0x0C;
const EXTENT_BYTES: usize = 4;

#[derive(Debug, PartialEq, Eq)]
struct XdrHeader {
    dims: Vec<usize>,
    element: ElementType,
}

impl XdrHeader {
    fn parse(path: &Path, text: &str) -> CodecResult<Self> {
        let mut ndim = None;
        let mut element = None;
        let mut axis_sizes = [None; MAX_IMAGE_AXES];

        for entry in parse_dump(text) {
            let key = entry.key.as_str();
            if key.starts_with("ndim") {
                let value = parse_header_count(path, &entry)?;
                if !(1..=MAX_IMAGE_AXES).contains(&value) {
                    return Err(header_error(path, format!("ndim={value} is not 1, 2 or 3")));
                }
                ndim = Some(value);
            } else if key.starts_with("field") {
                if !entry.value.starts_with("uniform") {
                    return Err(header_error(
                        path,
                        format!("field={} is not uniform", entry.value),
                    ));
                }
            } else if key.starts_with("data") {
                element = Some(parse_element(path, &entry.value)?);
            } else if let Some(axis) = axis_key(key) {
                axis_sizes[axis] = Some(parse_header_count(path, &entry)?);
            }
        }

        let ndim = ndim.ok_or_else(|| header_error(path, "header has no ndim"))?;
        let element = element.ok_or_else(|| header_error(path, "header has no data type"))?;
        let dims = axis_sizes[..ndim]
            .iter()
            .enumerate()
            .map(|(axis, size)| {
                size.ok_or_else(|| header_error(path, format!("header has no dim{}", axis + 1)))
            })
            .collect::<CodecResult<Vec<_>>>()?;

        Ok(Self { dims, element })
    }
}

fn axis_key(key: &str) -> Option<usize> {
    ["dim1", "dim2", "dim3"]
        .iter()
        .position(|prefix| key.starts_with(prefix))
}

fn parse_element(path: &Path, value: &str) -> CodecResult<ElementType> {
    if value.starts_with("xdr_short") {
        Ok(ElementType::Short)
    } else if value.starts_with("xdr_real") || value.starts_with("xdr_float") {
        Ok(ElementType::Float)
    } else {
        Err(header_error(path, format!("unsupported data type '{value}'")))
    }
}

fn parse_header_count(path: &Path, entry: &DumpEntry) -> CodecResult<usize> {
    entry
        .value
        .trim()
        .parse::<usize>()
        .map_err(|_| header_error(path, format!("{}={} is not a count", entry.key, entry.value)))
}

fn element_label(element: ElementType) -> &'static str {
    match element {
        ElementType::Short => "xdr_short",
        ElementType::Float => "xdr_real",
    }
}

pub(super) fn read(path: &Path) -> CodecResult<VoxelGrid> {
    let bytes = read_binary_artifact(path)?;
    let header_end = bytes
        .windows(2)
        .position(|pair| pair == [HEADER_SENTINEL, HEADER_SENTINEL])
        .ok_or_else(|| header_error(path, "header terminator not found"))?;
    let header = XdrHeader::parse(path, &String::from_utf8_lossy(&bytes[..header_end]))?;

    let payload_offset = header_end + 2;
    let payload_bytes = payload_bytes_for(path, &header.dims, header.element)?;
    let extent_bytes = 2 * header.dims.len() * EXTENT_BYTES;
    let (extent_offset, expected) = payload_offset
        .checked_add(payload_bytes)
        .and_then(|offset| Some((offset, offset.checked_add(extent_bytes)?)))
        .ok_or_else(|| header_error(path, "payload and extents exceed the addressable file size"))?;
    if bytes.len() != expected {
        return Err(size_mismatch_error(path, expected, bytes.len()));
    }

    let data = decode_voxels::<BigEndian>(&bytes[payload_offset..extent_offset], header.element);
    let extents = decode_voxels::<BigEndian>(&bytes[extent_offset..], ElementType::Float);
    let min_extent = extents.iter().step_by(2).copied().collect();
    let max_extent = extents.iter().skip(1).step_by(2).copied().collect();

    tracing::debug!(
        dims = ?header.dims,
        element = ?header.element,
        header_bytes = payload_offset,
        "parsed xdr header"
    );
    VoxelGrid::from_extents(header.dims, min_extent, max_extent, data)
}

fn render_header(grid: &VoxelGrid, element: ElementType) -> String {
    let ndim = grid.ndim();
    let mut header = String::from("# AVS field file written by dosia\n");
    header.push_str(&format!("ndim={ndim}\n"));
    for (axis, size) in grid.dims().iter().enumerate() {
        header.push_str(&format!("dim{}={}\n", axis + 1, size));
    }
    header.push_str(&format!("nspace={ndim}\n"));
    header.push_str("veclen=1\n");
    header.push_str(&format!("data={}\n", element_label(element)));
    header.push_str("field=uniform\n");
    header
}

pub(super) fn write(grid: &VoxelGrid, path: &Path, element: ElementType) -> CodecResult<()> {
    let extents: Vec<f32> = grid
        .min_extent()
        .iter()
        .zip(grid.max_extent())
        .flat_map(|(&min, &max)| [min, max])
        .collect();

    let mut bytes = render_header(grid, element).into_bytes();
    bytes.extend_from_slice(&[HEADER_SENTINEL, HEADER_SENTINEL]);
    let payload = encode_voxels::<BigEndian>(grid.data(), element)
        .and_then(|payload| {
            encode_voxels::<BigEndian>(&extents, ElementType::Float).map(|tail| (payload, tail))
        })
        .map_err(|source| {
            DosiaError::internal(
                ErrorCode::WriteFailure,
                "SYS.XDR_ENCODE",
                format!("failed to encode '{}': {}", path.display(), source),
            )
        })?;
    bytes.extend_from_slice(&payload.0);
    bytes.extend_from_slice(&payload.1);

    write_binary_artifact(path, &bytes)
}

#[cfg(test)]
mod tests {
    use super::{XdrHeader, read, write};
    use crate::domain::ErrorCode;
    use crate::modules::image::{ElementType, VoxelGrid};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn hand_built_short_file() -> Vec<u8> {
        let mut bytes = b"# test\nndim=2\ndim1=2\ndim2=1\ndata=xdr_short\nfield=uniform\n".to_vec();
        bytes.extend_from_slice(&[0x0C, 0x0C]);
        bytes.extend_from_slice(&(-1000_i16).to_be_bytes());
        bytes.extend_from_slice(&(25_i16).to_be_bytes());
        for extent in [-2.0_f32, 2.0, 5.0, 5.0] {
            bytes.extend_from_slice(&extent.to_be_bytes());
        }
        bytes
    }

    #[test]
    fn header_keys_match_by_prefix() {
        let header = XdrHeader::parse(
            Path::new("ct.xdr"),
            "# comment\nndim=3\ndim1=4\ndim2=5 \ndim3=6\nnspace=3\ndata=xdr_float\nfield=uniform\n",
        )
        .expect("header should parse");
        assert_eq!(header.dims, vec![4, 5, 6]);
        assert_eq!(header.element, ElementType::Float);
    }

    #[test]
    fn header_without_type_or_axes_is_rejected() {
        let missing_type = XdrHeader::parse(Path::new("ct.xdr"), "ndim=1\ndim1=4\n")
            .expect_err("data type is required");
        assert_eq!(missing_type.code(), ErrorCode::MalformedImageHeader);

        let missing_axis = XdrHeader::parse(Path::new("ct.xdr"), "ndim=2\ndim1=4\ndata=xdr_real\n")
            .expect_err("dim2 is required");
        assert!(missing_axis.message().contains("dim2"));

        let rectilinear =
            XdrHeader::parse(Path::new("ct.xdr"), "ndim=1\ndim1=4\nfield=rectilinear\n")
                .expect_err("only uniform fields are supported");
        assert_eq!(rectilinear.code(), ErrorCode::MalformedImageHeader);
    }

    #[test]
    fn reads_big_endian_shorts_and_extents() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("ct.xdr");
        fs::write(&path, hand_built_short_file()).expect("file should be written");

        let grid = read(&path).expect("file should parse");
        assert_eq!(grid.dims(), &[2, 1]);
        assert_eq!(grid.data(), &[-1000.0, 25.0]);
        assert_eq!(grid.min_extent(), &[-2.0, 5.0]);
        assert_eq!(grid.max_extent(), &[2.0, 5.0]);
        assert_eq!(grid.spacing(), &[4.0, 0.0]);
    }

    #[test]
    fn any_size_mismatch_is_fatal() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("ct.xdr");

        let mut long = hand_built_short_file();
        long.push(0);
        fs::write(&path, &long).expect("file should be written");
        let error = read(&path).expect_err("trailing byte");
        assert_eq!(error.code(), ErrorCode::ImageSizeMismatch);

        let mut short = hand_built_short_file();
        short.pop();
        fs::write(&path, &short).expect("file should be written");
        let error = read(&path).expect_err("missing byte");
        assert_eq!(error.code(), ErrorCode::ImageSizeMismatch);
    }

    #[test]
    fn written_layout_is_header_sentinels_payload_extents() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("out.xdr");
        let grid = VoxelGrid::new(vec![2], vec![1.0], vec![0.5], vec![3.0, -4.5])
            .expect("grid should be valid");

        write(&grid, &path, ElementType::Float).expect("grid should be written");
        let bytes = fs::read(&path).expect("file should be readable");

        let header_end = bytes
            .windows(2)
            .position(|pair| pair == [0x0C, 0x0C])
            .expect("sentinels present");
        let header = String::from_utf8_lossy(&bytes[..header_end]);
        let lines: Vec<&str> = header.lines().skip(1).collect();
        assert_eq!(
            lines,
            vec!["ndim=1", "dim1=2", "nspace=1", "veclen=1", "data=xdr_real", "field=uniform"]
        );

        let tail = &bytes[header_end + 2..];
        assert_eq!(tail.len(), 2 * 4 + 2 * 4);
        assert_eq!(&tail[0..4], &3.0_f32.to_be_bytes());
        assert_eq!(&tail[4..8], &(-4.5_f32).to_be_bytes());
        assert_eq!(&tail[8..12], &1.0_f32.to_be_bytes());
        assert_eq!(&tail[12..16], &1.5_f32.to_be_bytes());
    }

    #[test]
    fn overflowing_axis_sizes_are_a_header_error() {
        let temp = TempDir::new().expect("tempdir should be created");
        let path = temp.path().join("huge.xdr");
        let mut bytes = b"ndim=3\ndim1=4294967296\ndim2=4294967296\ndim3=2\ndata=xdr_real\nfield=uniform\n"
            .to_vec();
        bytes.extend_from_slice(&[0x0C, 0x0C]);
        fs::write(&path, &bytes).expect("file should be written");

        let error = read(&path).expect_err("voxel count overflows");
        assert_eq!(error.code(), ErrorCode::MalformedImageHeader);
    }
}
