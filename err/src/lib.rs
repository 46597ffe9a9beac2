use std::fmt;

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentError {
    #[error("Invalid value")]
    InvalidValue,
    #[error("Value out of range")]
    OutOfRange,
    #[error("Unsupported access flags")]
    UnsupportedAccessFlags,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoError {
    #[error("Open failed")]
    Open,
    #[error("Read failed")]
    Read,
    #[error("Close failed")]
    Close,
    #[error("Offset out of range")]
    OutOfRange,
    #[error("Unexpected end of input")]
    UnexpectedEnd,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputError {
    #[error("Signature mismatch")]
    Signature,
    #[error("Unsupported value")]
    UnsupportedValue,
    #[error("Offset out of bounds")]
    OutOfBounds,
    #[error("Key order violation")]
    KeyOrder,
    #[error("Self block number mismatch")]
    SelfBlockMismatch,
    #[error("Declared length exceeds container")]
    LengthExceedsContainer,
    #[error("Arithmetic overflow")]
    Overflow,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionError {
    #[error("Unpaired surrogate")]
    UnpairedSurrogate,
    #[error("Truncated character")]
    TruncatedCharacter,
    #[error("Buffer too small")]
    BufferTooSmall,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeError {
    #[error("Value already set")]
    ValueAlreadySet,
    #[error("Value missing")]
    ValueMissing,
    #[error("Internal invariant violated")]
    Invariant,
}

/// The error kind, one per failure domain.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("Arguments: {0}")]
    Arguments(#[from] ArgumentError),
    #[error("IO: {0}")]
    Io(#[from] IoError),
    #[error("Input: {0}")]
    Input(#[from] InputError),
    #[error("Conversion: {0}")]
    Conversion(#[from] ConversionError),
    #[error("Memory")]
    Memory,
    #[error("Runtime: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("Aborted")]
    Aborted,
}

/// One frame of the descent that produced an error, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub function: &'static str,
    pub block_number: Option<u64>,
    pub offset: Option<u64>,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.function)?;
        if let Some(block_number) = self.block_number {
            write!(f, " block {block_number}")?;
        }
        if let Some(offset) = self.offset {
            write!(f, " offset {offset:#x}")?;
        }
        Ok(())
    }
}

/// An error with the descent frames collected while it bubbled up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    frames: Vec<Frame>,
}

impl Error {
    pub fn new(kind: impl Into<ErrorKind>) -> Self {
        Self {
            kind: kind.into(),
            frames: Vec::new(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The descent frames, innermost first.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    #[must_use]
    pub fn frame(mut self, function: &'static str) -> Self {
        self.frames.push(Frame {
            function,
            block_number: None,
            offset: None,
        });
        self
    }

    #[must_use]
    pub fn frame_at(mut self, function: &'static str, block_number: u64, offset: u64) -> Self {
        self.frames.push(Frame {
            function,
            block_number: Some(block_number),
            offset: Some(offset),
        });
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        for frame in &self.frames {
            write!(f, "\n  in {frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<ArgumentError> for Error {
    fn from(error: ArgumentError) -> Self {
        Self::new(error)
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Self {
        Self::new(error)
    }
}

impl From<InputError> for Error {
    fn from(error: InputError) -> Self {
        Self::new(error)
    }
}

impl From<ConversionError> for Error {
    fn from(error: ConversionError) -> Self {
        Self::new(error)
    }
}

impl From<RuntimeError> for Error {
    fn from(error: RuntimeError) -> Self {
        Self::new(error)
    }
}

pub type Result<T> = core::result::Result<T, Error>;
