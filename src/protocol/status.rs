//! Result codes carried in the first four bytes of every response.
//!
//! [`HipError`] mirrors the compute runtime's error vocabulary so callers can
//! keep their existing error handling. Codes this crate does not name are kept
//! verbatim in [`HipError::Other`] and forwarded unchanged.
//!
//! [`SmiStatus`] is the telemetry library's status vocabulary.

use thiserror::Error;

/// Wire value for success.
pub const SUCCESS: i32 = 0;

/// Non-success runtime result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum HipError {
    #[error("invalid argument")]
    InvalidValue,
    #[error("out of memory")]
    OutOfMemory,
    #[error("initialization error")]
    NotInitialized,
    #[error("driver shutting down")]
    Deinitialized,
    #[error("invalid configuration argument")]
    InvalidConfiguration,
    #[error("invalid pitch argument")]
    InvalidPitchValue,
    #[error("invalid device symbol")]
    InvalidSymbol,
    #[error("invalid device pointer")]
    InvalidDevicePointer,
    #[error("invalid copy direction for memcpy")]
    InvalidMemcpyDirection,
    #[error("driver version is insufficient for runtime version")]
    InsufficientDriver,
    #[error("unspecified launch failure in prior launch")]
    PriorLaunchFailure,
    #[error("invalid device function")]
    InvalidDeviceFunction,
    #[error("no ROCm-capable device is detected")]
    NoDevice,
    #[error("invalid device ordinal")]
    InvalidDevice,
    #[error("device kernel image is invalid")]
    InvalidImage,
    #[error("invalid device context")]
    InvalidContext,
    #[error("device kernel image is invalid source")]
    InvalidSource,
    #[error("file not found")]
    FileNotFound,
    #[error("invalid resource handle")]
    InvalidHandle,
    #[error("the operation cannot be performed in the present state")]
    IllegalState,
    #[error("named symbol not found")]
    NotFound,
    #[error("device not ready")]
    NotReady,
    #[error("an illegal memory access was encountered")]
    IllegalAddress,
    #[error("too many resources requested for launch")]
    LaunchOutOfResources,
    #[error("the launch timed out and was terminated")]
    LaunchTimeOut,
    #[error("unspecified launch failure")]
    LaunchFailure,
    #[error("too many blocks in cooperative launch")]
    CooperativeLaunchTooLarge,
    #[error("operation not supported")]
    NotSupported,
    #[error("unknown error")]
    Unknown,
    #[error("unrecognized error code {0}")]
    Other(i32),
}

/// Result type for calls that surface runtime result codes.
pub type HipResult<T> = std::result::Result<T, HipError>;

/// (code, variant, name) for every named code.
const HIP_CODES: &[(i32, HipError, &str)] = &[
    (1, HipError::InvalidValue, "hipErrorInvalidValue"),
    (2, HipError::OutOfMemory, "hipErrorOutOfMemory"),
    (3, HipError::NotInitialized, "hipErrorNotInitialized"),
    (4, HipError::Deinitialized, "hipErrorDeinitialized"),
    (9, HipError::InvalidConfiguration, "hipErrorInvalidConfiguration"),
    (12, HipError::InvalidPitchValue, "hipErrorInvalidPitchValue"),
    (13, HipError::InvalidSymbol, "hipErrorInvalidSymbol"),
    (17, HipError::InvalidDevicePointer, "hipErrorInvalidDevicePointer"),
    (21, HipError::InvalidMemcpyDirection, "hipErrorInvalidMemcpyDirection"),
    (35, HipError::InsufficientDriver, "hipErrorInsufficientDriver"),
    (53, HipError::PriorLaunchFailure, "hipErrorPriorLaunchFailure"),
    (98, HipError::InvalidDeviceFunction, "hipErrorInvalidDeviceFunction"),
    (100, HipError::NoDevice, "hipErrorNoDevice"),
    (101, HipError::InvalidDevice, "hipErrorInvalidDevice"),
    (200, HipError::InvalidImage, "hipErrorInvalidImage"),
    (201, HipError::InvalidContext, "hipErrorInvalidContext"),
    (300, HipError::InvalidSource, "hipErrorInvalidSource"),
    (301, HipError::FileNotFound, "hipErrorFileNotFound"),
    (400, HipError::InvalidHandle, "hipErrorInvalidHandle"),
    (401, HipError::IllegalState, "hipErrorIllegalState"),
    (500, HipError::NotFound, "hipErrorNotFound"),
    (600, HipError::NotReady, "hipErrorNotReady"),
    (700, HipError::IllegalAddress, "hipErrorIllegalAddress"),
    (701, HipError::LaunchOutOfResources, "hipErrorLaunchOutOfResources"),
    (702, HipError::LaunchTimeOut, "hipErrorLaunchTimeOut"),
    (719, HipError::LaunchFailure, "hipErrorLaunchFailure"),
    (720, HipError::CooperativeLaunchTooLarge, "hipErrorCooperativeLaunchTooLarge"),
    (801, HipError::NotSupported, "hipErrorNotSupported"),
    (999, HipError::Unknown, "hipErrorUnknown"),
];

impl HipError {
    /// Map a non-zero wire code to an error.
    ///
    /// Zero is not an error; callers should use [`check`] for raw codes.
    pub fn from_code(code: i32) -> Self {
        HIP_CODES
            .iter()
            .find(|(c, _, _)| *c == code)
            .map(|(_, e, _)| *e)
            .unwrap_or(HipError::Other(code))
    }

    /// Wire value of this error.
    pub fn code(self) -> i32 {
        if let HipError::Other(code) = self {
            return code;
        }
        HIP_CODES
            .iter()
            .find(|(_, e, _)| *e == self)
            .map(|(c, _, _)| *c)
            .unwrap_or(999)
    }

    /// Symbolic name, e.g. `hipErrorInvalidValue`.
    pub fn name(self) -> &'static str {
        HIP_CODES
            .iter()
            .find(|(_, e, _)| *e == self)
            .map(|(_, _, n)| *n)
            .unwrap_or("hipErrorUnknown")
    }

    /// Human-readable description, as `hipGetErrorString` reports it.
    pub fn description(self) -> String {
        match self {
            HipError::Other(_) => "unknown error".to_string(),
            e => e.to_string(),
        }
    }
}

/// Turn a wire result code into a `HipResult`.
#[inline]
pub fn check(code: i32) -> HipResult<()> {
    if code == SUCCESS {
        Ok(())
    } else {
        Err(HipError::from_code(code))
    }
}

/// Wire value of a `HipResult`.
#[inline]
pub fn code_of<T>(result: &HipResult<T>) -> i32 {
    match result {
        Ok(_) => SUCCESS,
        Err(e) => e.code(),
    }
}

/// Symbolic name of any raw code, including success.
pub fn error_name(code: i32) -> &'static str {
    if code == SUCCESS {
        "hipSuccess"
    } else {
        HipError::from_code(code).name()
    }
}

/// Human-readable description of any raw code, including success.
pub fn error_string(code: i32) -> String {
    match code {
        SUCCESS => "no error".to_string(),
        _ => HipError::from_code(code).description(),
    }
}

/// Non-success telemetry status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum SmiStatus {
    #[error("invalid arguments")]
    InvalidArgs,
    #[error("not supported")]
    NotSupported,
    #[error("not found")]
    NotFound,
    #[error("not initialized")]
    NotInitialized,
    #[error("I/O error")]
    IoError,
    #[error("API call failed")]
    ApiFailed,
    #[error("telemetry status {0}")]
    Other(i32),
}

/// Result type for telemetry queries.
pub type SmiResult<T> = std::result::Result<T, SmiStatus>;

impl SmiStatus {
    /// Map a non-zero wire status to an error.
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => SmiStatus::InvalidArgs,
            2 => SmiStatus::NotSupported,
            3 => SmiStatus::NotFound,
            4 => SmiStatus::NotInitialized,
            5 => SmiStatus::IoError,
            6 => SmiStatus::ApiFailed,
            other => SmiStatus::Other(other),
        }
    }

    /// Wire value of this status.
    pub fn code(self) -> i32 {
        match self {
            SmiStatus::InvalidArgs => 1,
            SmiStatus::NotSupported => 2,
            SmiStatus::NotFound => 3,
            SmiStatus::NotInitialized => 4,
            SmiStatus::IoError => 5,
            SmiStatus::ApiFailed => 6,
            SmiStatus::Other(code) => code,
        }
    }

    /// Turn a wire status into a `SmiResult`.
    #[inline]
    pub fn check(code: i32) -> SmiResult<()> {
        if code == SUCCESS {
            Ok(())
        } else {
            Err(SmiStatus::from_code(code))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_codes_roundtrip() {
        for (code, err, name) in HIP_CODES {
            assert_eq!(HipError::from_code(*code), *err);
            assert_eq!(err.code(), *code);
            assert_eq!(err.name(), *name);
        }
    }

    #[test]
    fn test_unknown_code_is_preserved() {
        let err = HipError::from_code(4242);
        assert_eq!(err, HipError::Other(4242));
        assert_eq!(err.code(), 4242);
        assert_eq!(err.name(), "hipErrorUnknown");
    }

    #[test]
    fn test_check() {
        assert!(check(0).is_ok());
        assert_eq!(check(101), Err(HipError::InvalidDevice));
        assert_eq!(code_of::<()>(&Ok(())), 0);
        assert_eq!(code_of::<()>(&Err(HipError::NotReady)), 600);
    }

    #[test]
    fn test_error_strings() {
        assert_eq!(error_name(0), "hipSuccess");
        assert_eq!(error_name(1), "hipErrorInvalidValue");
        assert_eq!(error_string(0), "no error");
        assert_eq!(error_string(2), "out of memory");
        assert_eq!(error_string(123456), "unknown error");
    }

    #[test]
    fn test_smi_status_roundtrip() {
        for code in 1..=6 {
            assert_eq!(SmiStatus::from_code(code).code(), code);
        }
        assert_eq!(SmiStatus::from_code(-7), SmiStatus::Other(-7));
        assert!(SmiStatus::check(0).is_ok());
        assert_eq!(SmiStatus::check(3), Err(SmiStatus::NotFound));
    }
}
