use crate::error::Error;

/// Enum of all tag bytes defined by the Marshal 4.8 stream format.
///
/// Every token is a single ASCII byte. The discriminants are the wire
/// bytes themselves, so converting back and forth is a cast plus a table
/// check.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Token {
    Nil = b'0',
    True = b'T',
    False = b'F',
    Fixnum = b'i',
    Bignum = b'l',
    Float = b'f',
    Symbol = b':',
    Symlink = b';',
    Link = b'@',
    Array = b'[',
    Hash = b'{',
    String = b'"',
    Regexp = b'/',
    Ivar = b'I',
    UserMarshal = b'U',
    UserDef = b'u',
    Object = b'o',
    Module = b'm',
    Class = b'c',
    Struct = b'S',
    Data = b'd',
    Extended = b'e',
}

impl TryFrom<u8> for Token {
    type Error = Error;

    /// Attempts to convert a raw tag byte into a `Token` variant.
    ///
    /// # Returns
    /// - `Token`: A valid `Token` variant if the byte is a known tag.
    /// - `Error::UnknownTag`: If the byte does not match any known tag.
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            b'0' => Ok(Token::Nil),
            b'T' => Ok(Token::True),
            b'F' => Ok(Token::False),
            b'i' => Ok(Token::Fixnum),
            b'l' => Ok(Token::Bignum),
            b'f' => Ok(Token::Float),
            b':' => Ok(Token::Symbol),
            b';' => Ok(Token::Symlink),
            b'@' => Ok(Token::Link),
            b'[' => Ok(Token::Array),
            b'{' => Ok(Token::Hash),
            b'"' => Ok(Token::String),
            b'/' => Ok(Token::Regexp),
            b'I' => Ok(Token::Ivar),
            b'U' => Ok(Token::UserMarshal),
            b'u' => Ok(Token::UserDef),
            b'o' => Ok(Token::Object),
            b'm' => Ok(Token::Module),
            b'c' => Ok(Token::Class),
            b'S' => Ok(Token::Struct),
            b'd' => Ok(Token::Data),
            b'e' => Ok(Token::Extended),
            _ => Err(Error::UnknownTag(value)),
        }
    }
}

impl Token {
    /// Returns the wire byte of this token.
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Whether consuming this token claims a slot in the object table.
    ///
    /// The slot must be reserved before any child value is read, so that
    /// link indices inside the body line up with the writer's numbering.
    /// Nil, booleans, fixnums, raw strings, symbols and the two link
    /// tokens never occupy a slot.
    pub(crate) fn reserves_slot(self) -> bool {
        matches!(
            self,
            Token::Float
                | Token::Bignum
                | Token::Regexp
                | Token::Array
                | Token::Hash
                | Token::Struct
                | Token::Object
                | Token::Data
                | Token::UserMarshal
                | Token::UserDef
                | Token::Class
                | Token::Module
                | Token::Ivar
        )
    }
}

bitflags::bitflags! {
    /// Option bits carried by a serialized regular expression.
    ///
    /// Only the low three bits are defined by the format. Bit 2 is what
    /// Ruby calls `MULTILINE` (`.` also matches a newline); some other
    /// runtimes label the equivalent flag "dotall".
    pub struct RegexOptions: u8 {
        const IGNORECASE = 0b0000_0001;
        const EXTENDED   = 0b0000_0010;
        const MULTILINE  = 0b0000_0100;
    }
}
