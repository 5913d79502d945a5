/// Result type alias for codec operations
pub type Result<T> = std::result::Result<T, FramingError>;

/// Wire format errors.
///
/// [`FramingError::Incomplete`] is the only variant that means "wait for more
/// bytes"; every other variant means the stream is corrupt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// Not enough buffered bytes to hold the declared frame.
    #[error("incomplete frame: need {needed} bytes, have {available}")]
    Incomplete { needed: usize, available: usize },

    /// A buffer meant to hold exactly one frame had bytes left after it.
    #[error("{count} trailing bytes after frame")]
    TrailingBytes { count: usize },

    /// Frame declared a zero-length body; every frame carries a type byte.
    #[error("empty frame body")]
    EmptyFrame,

    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: usize, max: usize },

    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    /// A field ran past the end of the declared body.
    #[error("truncated frame while reading {field}")]
    Truncated { field: &'static str },

    /// Parsing finished before the declared body did.
    #[error("frame body declared {declared} bytes but {consumed} were parsed")]
    BodyLengthMismatch { declared: usize, consumed: usize },

    #[error("negative length {value} for {field}")]
    NegativeLength { field: &'static str, value: i32 },

    #[error("malformed length prefix for {field}")]
    MalformedVarint { field: &'static str },

    #[error("invalid null flag {value:#04x} for {field}")]
    InvalidFlag { field: &'static str, value: u8 },

    #[error("invalid UTF-8 in {field}")]
    InvalidUtf8 { field: &'static str },

    /// Requests never carry a fault section.
    #[error("request frame carries a remote fault")]
    UnexpectedFault,
}

impl FramingError {
    /// True when the caller should keep the bytes and read more.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, FramingError::Incomplete { .. })
    }
}
