use std::{io, path::PathBuf};

/// Library-specific error numbers, as reported by the FMC ADC library.
///
/// They start above the range used by the system `errno` values.
#[repr(i32)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Debug)]
pub enum ErrorCode {
    NotSupported = 1024,
    NoCapability = 1025,
    NoConfigType = 1026,
    NoGet = 1027,
    NoSet = 1028,
    NoChannel = 1029,
    NoMask = 1030,
    Disabled = 1031,
    Unknown = -1,
}

impl From<i32> for ErrorCode {
    fn from(value: i32) -> Self {
        match value {
            1024 => Self::NotSupported,
            1025 => Self::NoCapability,
            1026 => Self::NoConfigType,
            1027 => Self::NoGet,
            1028 => Self::NoSet,
            1029 => Self::NoChannel,
            1030 => Self::NoMask,
            1031 => Self::Disabled,
            _ => Self::Unknown,
        }
    }
}

impl ErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::NotSupported => "Operation not supported",
            Self::NoCapability => "Capabilities not supported",
            Self::NoConfigType => "Configuration type not supported",
            Self::NoGet => "Cannot get capabilities information",
            Self::NoSet => "Cannot set capabilities information",
            Self::NoChannel => "Invalid channel",
            Self::NoMask => "Missing configuration mask",
            Self::Disabled => "Trigger is disabled: I/O aborted",
            Self::Unknown => "Unknown error",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no such device: {0}")]
    NoDevice(PathBuf),

    #[error("cannot open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error("attribute {attr}: {source}")]
    Attribute { attr: String, source: io::Error },

    #[error("attribute {attr}: invalid value {value:?}")]
    InvalidValue { attr: String, value: String },

    #[error("timed out waiting for the device")]
    Again,

    #[error("{0}")]
    Adc(ErrorCode),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        Error::Adc(code)
    }
}

impl Error {
    /// A timeout with no activity; the operation can be issued again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Again)
    }

    /// The driver aborted I/O because the trigger was disabled.
    pub fn is_disabled(&self) -> bool {
        matches!(self, Error::Adc(ErrorCode::Disabled))
    }

    /// Nothing was applied because the configuration mask was empty.
    pub fn is_no_mask(&self) -> bool {
        matches!(self, Error::Adc(ErrorCode::NoMask))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
