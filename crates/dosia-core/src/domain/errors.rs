use std::error::Error;
use std::fmt::{Display, Formatter};

pub type DosiaResult<T> = Result<T, DosiaError>;
pub type ParserResult<T> = DosiaResult<T>;
pub type CodecResult<T> = DosiaResult<T>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DosiaErrorCategory {
    InputValidationError,
    IoSystemError,
    ComputationError,
    InternalError,
}

impl DosiaErrorCategory {
    pub const fn exit_status(self) -> ExitStatus {
        match self {
            Self::InputValidationError => ExitStatus {
                exit_code: 2,
                rust_category: "InputValidationError",
            },
            Self::IoSystemError => ExitStatus {
                exit_code: 3,
                rust_category: "IoSystemError",
            },
            Self::ComputationError => ExitStatus {
                exit_code: 4,
                rust_category: "ComputationError",
            },
            Self::InternalError => ExitStatus {
                exit_code: 5,
                rust_category: "InternalError",
            },
        }
    }

    pub const fn exit_code(self) -> i32 {
        self.exit_status().exit_code
    }

    pub const fn rust_category(self) -> &'static str {
        self.exit_status().rust_category
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub exit_code: i32,
    pub rust_category: &'static str,
}

/// Numbered fatal conditions raised while ingesting a plan or an image.
///
/// The numbers are stable: scripts around the dose engine match on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    MissingDatabaseMarker = 20,
    UnknownEnergy = 21,
    UnknownBeamType = 22,
    UnknownFilter = 23,
    TooManyLimitingDevices = 24,
    LeafCountMismatch = 25,
    ControlPointOutOfRange = 26,
    UndefinedAccelerator = 27,
    UnknownDatabaseType = 28,
    WeightSumViolation = 29,
    UnsupportedImageExtension = 30,
    MalformedImageHeader = 31,
    ImageSizeMismatch = 32,
    MissingIsocenterName = 33,
    EmptyDump = 34,
    InvalidDumpValue = 35,
    MalformedCalibration = 36,
    UnsupportedVolumeShape = 37,
    VoxelCountMismatch = 38,
    MissingBeamMeterset = 39,
    MissingHounsfieldCalibration = 43,
    MissingMaterialCalibration = 45,
    InvalidSettings = 46,
    InvalidArguments = 47,
    WriteFailure = 70,
    InternalFailure = 71,
    BinaryReadFailure = 72,
    TextReadFailure = 73,
}

impl ErrorCode {
    pub const fn number(self) -> u16 {
        self as u16
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DosiaError {
    category: DosiaErrorCategory,
    code: ErrorCode,
    placeholder: &'static str,
    message: String,
}

impl DosiaError {
    pub fn new(
        category: DosiaErrorCategory,
        code: ErrorCode,
        placeholder: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code,
            placeholder,
            message: message.into(),
        }
    }

    pub fn input_validation(
        code: ErrorCode,
        placeholder: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            DosiaErrorCategory::InputValidationError,
            code,
            placeholder,
            message,
        )
    }

    pub fn io_system(code: ErrorCode, placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(DosiaErrorCategory::IoSystemError, code, placeholder, message)
    }

    pub fn computation(
        code: ErrorCode,
        placeholder: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::new(DosiaErrorCategory::ComputationError, code, placeholder, message)
    }

    pub fn internal(code: ErrorCode, placeholder: &'static str, message: impl Into<String>) -> Self {
        Self::new(DosiaErrorCategory::InternalError, code, placeholder, message)
    }

    pub const fn category(&self) -> DosiaErrorCategory {
        self.category
    }

    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    pub const fn placeholder(&self) -> &'static str {
        self.placeholder
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub const fn exit_code(&self) -> i32 {
        self.category.exit_code()
    }

    pub fn diagnostic_line(&self) -> String {
        format!(
            "ERROR: [{}] ({}) {}",
            self.placeholder,
            self.code.number(),
            self.message
        )
    }

    pub fn fatal_exit_line(&self) -> String {
        format!("FATAL EXIT CODE: {}", self.exit_code())
    }
}

impl Display for DosiaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] ({}) {}",
            self.category.rust_category(),
            self.placeholder,
            self.code.number(),
            self.message
        )
    }
}

impl Error for DosiaError {}
