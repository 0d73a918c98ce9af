//! Token-dispatched decoder for Marshal 4.8 streams.
//!
//! The reader verifies the two-byte version header, then reads exactly one
//! value by recursive descent over the tag bytes. Two tables accumulate
//! while it runs: the symbol table (one entry per symbol literal) and the
//! object table (one slot per shareable value, reserved *before* the
//! value's children are read so link indices line up with the writer's
//! numbering).

use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use crate::error::Error;
use crate::registry::{ClassDef, ClassRegistry};
use crate::tables::{ObjectTable, SymbolTable};
use crate::types::{
    encoding::Encoding, enums::Token, Attributes, Bignum, Regexp, RubyObject, RubyString,
    RubyStruct, RubyValue, Symbol, UserDef, UserMarshal,
};
use crate::util::{read_byte_seq, read_long, read_ubyte, read_ushort, ByteCounter};

/// Decodes one value from a byte source and returns it together with the
/// number of bytes consumed (header included).
pub fn read<R>(source: R) -> Result<(RubyValue, u64), Error>
where
    R: io::Read,
{
    let mut reader = Reader::new(source);
    let value = reader.read()?;
    Ok((value, reader.bytes_consumed()))
}

/// Decodes one value from a byte source.
pub fn load<R>(source: R) -> Result<RubyValue, Error>
where
    R: io::Read,
{
    Reader::new(source).read()
}

/// Decodes one value from a byte source, hydrating registered class
/// names.
pub fn load_with_registry<R>(source: R, registry: ClassRegistry) -> Result<RubyValue, Error>
where
    R: io::Read,
{
    Reader::with_registry(source, registry).read()
}

/// Decodes one value from an in-memory byte buffer.
pub fn loads(bytes: &[u8]) -> Result<RubyValue, Error> {
    load(bytes)
}

/// Decodes one value from an in-memory byte buffer, hydrating registered
/// class names.
pub fn loads_with_registry(bytes: &[u8], registry: ClassRegistry) -> Result<RubyValue, Error> {
    load_with_registry(bytes, registry)
}

/// Stateful stream decoder.
///
/// One instance decodes one stream; the tables it accumulates are local
/// to the instance, so independent readers never interfere.
pub struct Reader<R> {
    source: ByteCounter<R>,
    symbols: SymbolTable,
    objects: ObjectTable,
    registry: ClassRegistry,
}

impl<R: io::Read> Reader<R> {
    pub fn new(source: R) -> Self {
        Reader::with_registry(source, ClassRegistry::new())
    }

    pub fn with_registry(source: R, registry: ClassRegistry) -> Self {
        Reader {
            source: ByteCounter::new(source),
            symbols: SymbolTable::new(),
            objects: ObjectTable::new(),
            registry,
        }
    }

    /// Returns how many bytes have been pulled from the source so far.
    pub fn bytes_consumed(&self) -> u64 {
        self.source.bytes_read()
    }

    /// Verifies the `04 08` version header and reads one value.
    pub fn read(&mut self) -> Result<RubyValue, Error> {
        let major = read_ubyte(&mut self.source)?;
        let minor = read_ubyte(&mut self.source)?;
        if (major, minor) != (4, 8) {
            return Err(Error::BadHeader([major, minor]));
        }
        self.read_value()
    }

    /// Reads a value expected to be a symbol: a literal, a symlink, or an
    /// instance-variable-wrapped literal (the form non-ASCII symbols take
    /// on the wire). A symlink inside the wrapper is a dump format error.
    pub fn read_symbol(&mut self) -> Result<Symbol, Error> {
        let mut wrapped = false;
        loop {
            let token = self.read_token()?;
            match token {
                Token::Ivar => {
                    if wrapped {
                        return Err(Error::Format(
                            "nested instance-variable wrapper around a symbol".to_string(),
                        ));
                    }
                    wrapped = true;
                }
                Token::Symbol => {
                    let symbol = self.read_symbol_literal()?;
                    if wrapped {
                        // encoding attributes add nothing, symbol text is
                        // already UTF-8
                        let _ = self.read_attributes()?;
                    }
                    return Ok(symbol);
                }
                Token::Symlink => {
                    if wrapped {
                        return Err(Error::Format(
                            "dump format error (symlink carries an encoding)".to_string(),
                        ));
                    }
                    let id = self.read_length()?;
                    return self.symbols.get(id);
                }
                other => {
                    return Err(Error::SymbolExpected(format!(
                        "expected a symbol, found tag {:?}",
                        other.byte() as char
                    )));
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Token plumbing
    // ------------------------------------------------------------------

    fn read_token(&mut self) -> Result<Token, Error> {
        Token::try_from(read_ubyte(&mut self.source)?)
    }

    fn read_length(&mut self) -> Result<usize, Error> {
        let value = read_long(&mut self.source)?;
        usize::try_from(value)
            .map_err(|_| Error::Format(format!("negative length {}", value)))
    }

    fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>, Error> {
        read_byte_seq(&mut self.source, len)
    }

    fn install(&mut self, slot: Option<usize>, value: &RubyValue) {
        if let Some(id) = slot {
            self.objects.install(id, value.clone());
        }
    }

    /// Reads the next value, reserving an object-table slot first when
    /// the tag calls for one.
    fn read_value(&mut self) -> Result<RubyValue, Error> {
        let token = self.read_token()?;
        let slot = if token.reserves_slot() {
            Some(self.objects.reserve())
        } else {
            None
        };
        self.read_body(token, slot)
    }

    /// Decodes the body of `token`. `slot` is the object-table slot the
    /// resulting value must be installed into; when the token sits
    /// directly under an instance-variable wrapper this is the wrapper's
    /// slot, shared instead of reserving a second one.
    fn read_body(&mut self, token: Token, slot: Option<usize>) -> Result<RubyValue, Error> {
        match token {
            Token::Nil => Ok(RubyValue::Nil),
            Token::True => Ok(RubyValue::Bool(true)),
            Token::False => Ok(RubyValue::Bool(false)),
            Token::Fixnum => Ok(RubyValue::Int(read_long(&mut self.source)?)),
            Token::Bignum => self.read_bignum(slot),
            Token::Float => self.read_float(slot),
            Token::Symbol => Ok(RubyValue::Symbol(self.read_symbol_literal()?)),
            Token::Symlink => {
                let id = self.read_length()?;
                Ok(RubyValue::Symbol(self.symbols.get(id)?))
            }
            Token::Link => {
                let id = self.read_length()?;
                self.objects.get(id)
            }
            Token::Array => self.read_array(slot),
            Token::Hash => self.read_hash(slot),
            Token::String => {
                let len = self.read_length()?;
                Ok(RubyValue::bytes(self.read_bytes(len)?))
            }
            Token::Regexp => self.read_regexp(slot),
            Token::Ivar => self.read_ivar(slot),
            Token::UserMarshal => self.read_user_marshal(slot),
            Token::UserDef => {
                let class_name = self.read_class_symbol(ClassDef::UserDef)?;
                let len = self.read_length()?;
                let data = self.read_bytes(len)?;
                let value = RubyValue::user_def(UserDef::new(class_name, data));
                self.install(slot, &value);
                Ok(value)
            }
            Token::Object => self.read_object(slot),
            Token::Struct => self.read_struct(slot),
            Token::Module => {
                let value = RubyValue::module(self.read_name()?);
                self.install(slot, &value);
                Ok(value)
            }
            Token::Class => {
                let value = RubyValue::class(self.read_name()?);
                self.install(slot, &value);
                Ok(value)
            }
            Token::Data | Token::Extended => Err(Error::Format(format!(
                "tag {:?} is not supported",
                token.byte() as char
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Per-tag bodies
    // ------------------------------------------------------------------

    fn read_bignum(&mut self, slot: Option<usize>) -> Result<RubyValue, Error> {
        let sign = read_ubyte(&mut self.source)?;
        let negative = sign == b'-';
        let count = self.read_length()?;
        let mut limbs = Vec::with_capacity(count.min(4096));
        for _ in 0..count {
            limbs.push(read_ushort(&mut self.source)?);
        }
        let big = Bignum::new(negative, limbs);
        // anything that fits the primary integer type is folded into it
        let value = match big.to_i128() {
            Some(v) if i64::try_from(v).is_ok() => RubyValue::Int(v as i64),
            _ => RubyValue::bignum(big),
        };
        self.install(slot, &value);
        Ok(value)
    }

    fn read_float(&mut self, slot: Option<usize>) -> Result<RubyValue, Error> {
        let len = self.read_length()?;
        let bytes = self.read_bytes(len)?;
        let value = RubyValue::float(parse_float_text(&bytes)?);
        self.install(slot, &value);
        Ok(value)
    }

    fn read_array(&mut self, slot: Option<usize>) -> Result<RubyValue, Error> {
        let count = self.read_length()?;
        let items = Rc::new(RefCell::new(Vec::with_capacity(count.min(4096))));
        let value = RubyValue::Array(items.clone());
        // installed before the children so a cycle back into this array
        // resolves to the container being filled
        self.install(slot, &value);
        for _ in 0..count {
            let item = self.read_value()?;
            items.borrow_mut().push(item);
        }
        Ok(value)
    }

    fn read_hash(&mut self, slot: Option<usize>) -> Result<RubyValue, Error> {
        let count = self.read_length()?;
        let pairs = Rc::new(RefCell::new(Vec::with_capacity(count.min(4096))));
        let value = RubyValue::Hash(pairs.clone());
        self.install(slot, &value);
        for _ in 0..count {
            let key = self.read_value()?;
            let item = self.read_value()?;
            pairs.borrow_mut().push((key, item));
        }
        Ok(value)
    }

    fn read_regexp(&mut self, slot: Option<usize>) -> Result<RubyValue, Error> {
        // a bare regexp has no attribute block; pattern bytes are taken
        // verbatim, options byte follows the pattern
        let len = self.read_length()?;
        let bytes = self.read_bytes(len)?;
        let options = read_ubyte(&mut self.source)?;
        let pattern = Encoding::Binary.decode(&bytes)?;
        let mut attributes = Attributes::new();
        attributes.push(Symbol::new("E"), RubyValue::Bool(false));
        let value = RubyValue::regexp(Regexp::with_attributes(pattern, options, attributes));
        self.install(slot, &value);
        Ok(value)
    }

    /// The instance-variable wrapper: one inner value, then the attribute
    /// block. For strings, regexps and user-defined payloads the
    /// attributes carry the text encoding, so their raw bodies are read
    /// here and decoded only once the block is known.
    fn read_ivar(&mut self, slot: Option<usize>) -> Result<RubyValue, Error> {
        let inner = self.read_token()?;
        match inner {
            Token::Symlink => Err(Error::Format(
                "dump format error (symlink carries an encoding)".to_string(),
            )),
            Token::String => {
                let len = self.read_length()?;
                let bytes = self.read_bytes(len)?;
                let attributes = self.read_attributes()?;
                let text = Encoding::from_attributes(&attributes).decode(&bytes)?;
                let value =
                    RubyValue::ruby_string(RubyString::with_attributes(text, attributes));
                self.install(slot, &value);
                Ok(value)
            }
            Token::Regexp => {
                let len = self.read_length()?;
                let bytes = self.read_bytes(len)?;
                let options = read_ubyte(&mut self.source)?;
                let attributes = self.read_attributes()?;
                let pattern = Encoding::from_attributes(&attributes).decode(&bytes)?;
                let value =
                    RubyValue::regexp(Regexp::with_attributes(pattern, options, attributes));
                self.install(slot, &value);
                Ok(value)
            }
            Token::UserDef => {
                let class_name = self.read_class_symbol(ClassDef::UserDef)?;
                let len = self.read_length()?;
                let data = self.read_bytes(len)?;
                let attributes = self.read_attributes()?;
                let value = RubyValue::user_def(UserDef::with_attributes(
                    class_name, data, attributes,
                ));
                self.install(slot, &value);
                Ok(value)
            }
            Token::Symbol => {
                let symbol = self.read_symbol_literal()?;
                // non-ASCII symbols arrive wrapped; the attributes only
                // restate an encoding the literal already resolved
                let _ = self.read_attributes()?;
                let value = RubyValue::Symbol(symbol);
                self.install(slot, &value);
                Ok(value)
            }
            other => {
                // the wrapper's slot is handed down, a reserving inner
                // token must not claim a second one
                let value = self.read_body(other, slot)?;
                let attributes = self.read_attributes()?;
                match &value {
                    RubyValue::Object(object) => {
                        let mut object = object.borrow_mut();
                        for (name, item) in attributes.iter() {
                            object.get_attributes_mut().push(name.clone(), item.clone());
                        }
                    }
                    RubyValue::UserMarshal(user) => {
                        user.borrow_mut().set_attributes(attributes);
                    }
                    _ => {
                        if !attributes.is_empty() {
                            return Err(Error::Format(format!(
                                "tag {:?} cannot carry instance variables",
                                other.byte() as char
                            )));
                        }
                    }
                }
                self.install(slot, &value);
                Ok(value)
            }
        }
    }

    fn read_user_marshal(&mut self, slot: Option<usize>) -> Result<RubyValue, Error> {
        let class_name = self.read_class_symbol(ClassDef::UserMarshal)?;
        let shell = Rc::new(RefCell::new(UserMarshal::new(class_name, RubyValue::Nil)));
        let value = RubyValue::UserMarshal(shell.clone());
        self.install(slot, &value);
        let inner = self.read_value()?;
        shell.borrow_mut().set_value(inner);
        Ok(value)
    }

    fn read_object(&mut self, slot: Option<usize>) -> Result<RubyValue, Error> {
        let class_name = self.read_class_symbol(ClassDef::Object)?;
        let shell = Rc::new(RefCell::new(RubyObject::new(class_name)));
        let value = RubyValue::Object(shell.clone());
        self.install(slot, &value);
        let count = self.read_length()?;
        for _ in 0..count {
            let name = self.read_symbol()?;
            let item = self.read_value()?;
            shell.borrow_mut().get_attributes_mut().push(name, item);
        }
        Ok(value)
    }

    fn read_struct(&mut self, slot: Option<usize>) -> Result<RubyValue, Error> {
        let class_name = self.read_symbol()?;
        let shell = Rc::new(RefCell::new(RubyStruct::new(class_name, Attributes::new())));
        let value = RubyValue::Struct(shell.clone());
        self.install(slot, &value);
        let count = self.read_length()?;
        for _ in 0..count {
            let name = self.read_symbol()?;
            let item = self.read_value()?;
            shell.borrow_mut().get_members_mut().push(name, item);
        }
        Ok(value)
    }

    // ------------------------------------------------------------------
    // Shared pieces
    // ------------------------------------------------------------------

    fn read_symbol_literal(&mut self) -> Result<Symbol, Error> {
        let len = self.read_length()?;
        let bytes = self.read_bytes(len)?;
        let name = String::from_utf8(bytes)
            .map_err(|_| Error::EncodingFailure("symbol name is not valid UTF-8".to_string()))?;
        let symbol = Symbol::new(&name);
        self.symbols.push(symbol.clone());
        Ok(symbol)
    }

    fn read_attributes(&mut self) -> Result<Attributes, Error> {
        let count = self.read_length()?;
        let mut attributes = Attributes::new();
        for _ in 0..count {
            let name = self.read_symbol()?;
            let value = self.read_value()?;
            attributes.push(name, value);
        }
        Ok(attributes)
    }

    /// Reads a class-name symbol and checks it against the registry when
    /// the caller registered that name.
    fn read_class_symbol(&mut self, expected: ClassDef) -> Result<Symbol, Error> {
        let symbol = self.read_symbol()?;
        if let Some(def) = self.registry.get(symbol.get_name()) {
            if def != expected {
                return Err(Error::RegistryMismatch(format!(
                    "class {} is registered as {:?} but the stream demands {:?}",
                    symbol.get_name(),
                    def,
                    expected
                )));
            }
        }
        Ok(symbol)
    }

    /// Reads a length-prefixed UTF-8 name (module and class bodies).
    fn read_name(&mut self) -> Result<String, Error> {
        let len = self.read_length()?;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes)
            .map_err(|_| Error::EncodingFailure("name is not valid UTF-8".to_string()))
    }
}

/// Parses the decimal text of a float body. The special tokens `inf`,
/// `-inf` and `nan` are honoured; anything past the first NUL byte is an
/// artifact of older emitters and ignored.
fn parse_float_text(bytes: &[u8]) -> Result<f64, Error> {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    let text = std::str::from_utf8(&bytes[..end])
        .map_err(|_| Error::Format("float literal is not ASCII".to_string()))?;
    match text {
        "inf" => Ok(f64::INFINITY),
        "-inf" => Ok(f64::NEG_INFINITY),
        "nan" => Ok(f64::NAN),
        _ => text
            .parse::<f64>()
            .map_err(|_| Error::Format(format!("malformed float literal {:?}", text))),
    }
}
