use crate::domain::{DosiaError, DosiaResult, ErrorCode};
use std::fs;
use std::path::Path;

pub fn normalize_text_artifact(content: &str) -> String {
    let mut normalized = content.replace("\r\n", "\n").replace('\r', "\n");
    if !normalized.is_empty() && !normalized.ends_with('\n') {
        normalized.push('\n');
    }
    normalized
}

pub fn write_text_artifact(path: &Path, content: &str) -> DosiaResult<()> {
    fs::write(path, normalize_text_artifact(content)).map_err(|source| write_error(path, source))
}

pub fn write_binary_artifact(path: &Path, bytes: &[u8]) -> DosiaResult<()> {
    fs::write(path, bytes).map_err(|source| write_error(path, source))
}

pub fn read_binary_artifact(path: &Path) -> DosiaResult<Vec<u8>> {
    fs::read(path).map_err(|source| {
        DosiaError::io_system(
            ErrorCode::BinaryReadFailure,
            "IO.BINARY_READ",
            format!("failed to read '{}': {}", path.display(), source),
        )
    })
}

pub fn read_text_artifact(path: &Path) -> DosiaResult<String> {
    fs::read_to_string(path).map_err(|source| {
        DosiaError::io_system(
            ErrorCode::TextReadFailure,
            "IO.TEXT_READ",
            format!("failed to read '{}': {}", path.display(), source),
        )
    })
}

fn write_error(path: &Path, source: std::io::Error) -> DosiaError {
    DosiaError::io_system(
        ErrorCode::WriteFailure,
        "IO.WRITE",
        format!("problem writing file '{}': {}", path.display(), source),
    )
}

#[cfg(test)]
mod tests {
    use super::{
        normalize_text_artifact, read_binary_artifact, read_text_artifact, write_binary_artifact,
        write_text_artifact,
    };
    use crate::domain::ErrorCode;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn normalize_text_artifact_uses_canonical_line_endings() {
        let normalized = normalize_text_artifact("NDims = 3\r\nDimSize = 2 2 2\rElementType = MET_FLOAT");
        assert_eq!(
            normalized,
            "NDims = 3\nDimSize = 2 2 2\nElementType = MET_FLOAT\n"
        );
    }

    #[test]
    fn text_and_binary_writes_round_trip() {
        let temp = TempDir::new().expect("tempdir should be created");
        let text_path = temp.path().join("image.mhd");
        let binary_path = temp.path().join("image.raw");

        write_text_artifact(&text_path, "NDims = 1").expect("header should be written");
        write_binary_artifact(&binary_path, &[0_u8, 1, 2, 255]).expect("payload should be written");

        assert_eq!(
            read_text_artifact(&text_path).expect("header should be readable"),
            "NDims = 1\n"
        );
        assert_eq!(
            read_binary_artifact(&binary_path).expect("payload should be readable"),
            vec![0_u8, 1, 2, 255]
        );
    }

    #[test]
    fn failures_carry_io_error_numbers() {
        let temp = TempDir::new().expect("tempdir should be created");
        let missing = temp.path().join("absent.raw");

        let read = read_binary_artifact(&missing).expect_err("missing file should fail");
        assert_eq!(read.code(), ErrorCode::BinaryReadFailure);
        assert_eq!(read.exit_code(), 3);

        let unwritable = temp.path().join("no_such_dir").join("out.raw");
        let write = write_binary_artifact(&unwritable, &[1]).expect_err("write should fail");
        assert_eq!(write.code(), ErrorCode::WriteFailure);

        fs::write(&missing, [0xff_u8, 0xfe]).expect("bytes should be written");
        let text = read_text_artifact(&missing).expect_err("invalid utf-8 should fail");
        assert_eq!(text.code(), ErrorCode::TextReadFailure);
    }
}
