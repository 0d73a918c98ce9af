use std::{error, io};

#[derive(Debug)]
pub enum Error {
    /// Fewer bytes were available than the current token requires.
    TruncatedInput,
    /// The stream does not start with the `04 08` version header.
    BadHeader([u8; 2]),
    /// The tag byte does not match any known variant.
    UnknownTag(u8),
    /// A symbol link or object link references a slot that has not been
    /// established yet.
    IndexOutOfRange(usize),
    /// A class-name position held something other than a symbol.
    SymbolExpected(String),
    /// The class registry returned a constructor incompatible with the
    /// demanded variant.
    RegistryMismatch(String),
    /// The declared text encoding cannot be applied to the payload.
    EncodingFailure(String),
    /// The writer was asked to encode a value with no defined mapping.
    Unrepresentable(String),
    /// The stream violates the dump format in some other way.
    Format(String),
    IOError(io::Error),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        // byteorder and read_exact signal a short stream this way
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::TruncatedInput
        } else {
            Error::IOError(err)
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::IOError(err) => Some(err),
            _ => None,
        }
    }
}
