use std::io;

/// The tape domain error.
///
/// Kernel level conditions (tapemarks, end of media, blank tape) are
/// reported by [`TapeDevice`](crate::TapeDevice) implementations as
/// error values; the [`TapeDrive`](crate::TapeDrive) classifies them
/// into status flags on block I/O, so callers above the drive only see
/// them as errors where they are genuinely exceptional (positioning).
#[derive(thiserror::Error, Debug)]
pub enum TapeError {
    #[error("drive not ready")]
    NotReady,
    #[error("bus reset detected")]
    BusReset,
    #[error("media changed")]
    MediaChanged,

    #[error("filemark detected")]
    Filemark,
    #[error("setmark detected")]
    Setmark,
    #[error("end of media")]
    EndOfMedia,
    #[error("no data detected")]
    NoData,
    #[error("end of file")]
    EndOfFile,
    #[error("beginning of media")]
    BeginningOfMedia,

    #[error("no media loaded")]
    NoMedia,
    #[error("media is write protected")]
    WriteProtected,
    #[error("invalid operation '{operation}' in state {state}")]
    InvalidState {
        state: &'static str,
        operation: &'static str,
    },
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Plain classification of a [`TapeError`], usable as a stored field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TapeErrorKind {
    #[default]
    Ok,
    NotReady,
    BusReset,
    MediaChanged,
    Filemark,
    Setmark,
    EndOfMedia,
    NoData,
    EndOfFile,
    BeginningOfMedia,
    NoMedia,
    WriteProtected,
    InvalidState,
    InvalidData,
    NotFound,
    Unsupported,
    Io,
}

impl TapeError {
    pub fn kind(&self) -> TapeErrorKind {
        match self {
            TapeError::NotReady => TapeErrorKind::NotReady,
            TapeError::BusReset => TapeErrorKind::BusReset,
            TapeError::MediaChanged => TapeErrorKind::MediaChanged,
            TapeError::Filemark => TapeErrorKind::Filemark,
            TapeError::Setmark => TapeErrorKind::Setmark,
            TapeError::EndOfMedia => TapeErrorKind::EndOfMedia,
            TapeError::NoData => TapeErrorKind::NoData,
            TapeError::EndOfFile => TapeErrorKind::EndOfFile,
            TapeError::BeginningOfMedia => TapeErrorKind::BeginningOfMedia,
            TapeError::NoMedia => TapeErrorKind::NoMedia,
            TapeError::WriteProtected => TapeErrorKind::WriteProtected,
            TapeError::InvalidState { .. } => TapeErrorKind::InvalidState,
            TapeError::InvalidData(_) => TapeErrorKind::InvalidData,
            TapeError::NotFound(_) => TapeErrorKind::NotFound,
            TapeError::Unsupported(_) => TapeErrorKind::Unsupported,
            TapeError::Io(_) => TapeErrorKind::Io,
        }
    }

    /// Errors worth a retry on open/load (the drive may just need a
    /// moment after a bus reset or a cartridge swap).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TapeError::NotReady | TapeError::BusReset | TapeError::MediaChanged
        )
    }

    /// In-band separator conditions (filemark, setmark, end of media).
    pub fn is_tapemark(&self) -> bool {
        matches!(
            self,
            TapeError::Filemark | TapeError::Setmark | TapeError::EndOfMedia
        )
    }

    /// Any condition a block read reports as end-of-file.
    pub fn is_eof_condition(&self) -> bool {
        self.is_tapemark() || matches!(self, TapeError::NoData | TapeError::EndOfFile)
    }

    pub fn invalid_data<S: Into<String>>(msg: S) -> Self {
        TapeError::InvalidData(msg.into())
    }
}

impl From<TapeError> for io::Error {
    fn from(err: TapeError) -> Self {
        match err {
            TapeError::Io(inner) => inner,
            other => {
                let kind = match other {
                    TapeError::EndOfFile | TapeError::Filemark | TapeError::Setmark => {
                        io::ErrorKind::UnexpectedEof
                    }
                    TapeError::NotFound(_) => io::ErrorKind::NotFound,
                    _ => io::ErrorKind::Other,
                };
                io::Error::new(kind, other)
            }
        }
    }
}

/// Recover the tape error wrapped into an [`io::Error`] by the stream
/// layer, if there is one.
pub fn tape_error_kind(err: &io::Error) -> Option<TapeErrorKind> {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<TapeError>())
        .map(|err| err.kind())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classification_predicates() {
        assert!(TapeError::NotReady.is_transient());
        assert!(!TapeError::EndOfMedia.is_transient());

        assert!(TapeError::Filemark.is_tapemark());
        assert!(TapeError::Setmark.is_tapemark());
        assert!(TapeError::EndOfMedia.is_tapemark());
        assert!(!TapeError::NoData.is_tapemark());

        assert!(TapeError::NoData.is_eof_condition());
        assert!(TapeError::EndOfFile.is_eof_condition());
        assert!(!TapeError::NoMedia.is_eof_condition());
    }

    #[test]
    fn io_round_trip_keeps_kind() {
        let io_err: io::Error = TapeError::EndOfMedia.into();
        assert_eq!(tape_error_kind(&io_err), Some(TapeErrorKind::EndOfMedia));
    }
}
