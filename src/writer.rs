//! Type-dispatched encoder producing Marshal 4.8 streams.
//!
//! The writer mirrors the reader's table discipline: every shareable
//! value consults the object map first, emits a link on a hit, and
//! otherwise claims the next id *before* its body (and therefore its
//! children) is written. Symbols go through the reverse symbol map the
//! same way. There is no modal state beyond those two maps.

use std::io;

use crate::error::Error;
use crate::tables::{ObjectIndex, SymbolIndex};
use crate::types::{
    encoding::Encoding, enums::Token, Attributes, Regexp, RubyString, RubyValue, Symbol,
    ATTR_SHORT_FORM,
};
use crate::util::{write_long, write_ubyte, write_ushort};

/// Encodes one value, header included, into a byte sink.
///
/// Partial output already written before an error is not rolled back.
pub fn write<W>(sink: W, value: &RubyValue) -> Result<(), Error>
where
    W: io::Write,
{
    Writer::new(sink).write(value)
}

/// Encodes one value into an in-memory byte buffer.
pub fn writes(value: &RubyValue) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    write(&mut buf, value)?;
    Ok(buf)
}

/// Stateful stream encoder.
///
/// One instance encodes one stream; its reverse maps are instance-local.
pub struct Writer<W> {
    sink: W,
    symbols: SymbolIndex,
    objects: ObjectIndex,
}

impl<W: io::Write> Writer<W> {
    pub fn new(sink: W) -> Self {
        Writer {
            sink,
            symbols: SymbolIndex::new(),
            objects: ObjectIndex::new(),
        }
    }

    /// Emits the `04 08` version header followed by one value.
    pub fn write(&mut self, value: &RubyValue) -> Result<(), Error> {
        self.sink.write_all(&[4, 8])?;
        self.write_value(value)
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    fn tag(&mut self, token: Token) -> Result<(), Error> {
        write_ubyte(&mut self.sink, token.byte())
    }

    /// Consults the object map for a shareable value about to be
    /// emitted. On a hit the link is written and the body must be
    /// skipped; on a miss the value claims the next id.
    fn must_write(&mut self, address: usize) -> Result<bool, Error> {
        if let Some(id) = self.objects.get(address) {
            self.tag(Token::Link)?;
            write_long(&mut self.sink, id as i64)?;
            Ok(false)
        } else {
            self.objects.insert(address);
            Ok(true)
        }
    }

    fn write_value(&mut self, value: &RubyValue) -> Result<(), Error> {
        match value {
            RubyValue::Nil => self.tag(Token::Nil),
            RubyValue::Bool(true) => self.tag(Token::True),
            RubyValue::Bool(false) => self.tag(Token::False),
            RubyValue::Int(v) => self.write_int(*v),
            RubyValue::Symbol(symbol) => self.write_symbol(symbol),
            RubyValue::Bytes(bytes) => {
                // raw byte strings are emitted in full on every
                // occurrence and never linked
                self.tag(Token::String)?;
                let bytes = bytes.borrow();
                write_long(&mut self.sink, bytes.len() as i64)?;
                self.sink.write_all(&bytes)?;
                Ok(())
            }
            RubyValue::Bignum(big) => {
                if self.must_write(rc_address(value))? {
                    self.write_bignum_body(big.is_negative(), big.get_limbs())?;
                }
                Ok(())
            }
            RubyValue::Float(cell) => {
                if self.must_write(rc_address(value))? {
                    self.tag(Token::Float)?;
                    let text = format_float(cell.get());
                    write_long(&mut self.sink, text.len() as i64)?;
                    self.sink.write_all(text.as_bytes())?;
                }
                Ok(())
            }
            RubyValue::String(string) => {
                if self.must_write(rc_address(value))? {
                    let string = string.borrow();
                    self.write_string_body(&string)?;
                }
                Ok(())
            }
            RubyValue::Regexp(regexp) => {
                if self.must_write(rc_address(value))? {
                    let regexp = regexp.borrow();
                    self.write_regexp_body(&regexp)?;
                }
                Ok(())
            }
            RubyValue::Array(items) => {
                if self.must_write(rc_address(value))? {
                    self.tag(Token::Array)?;
                    let items = items.borrow();
                    write_long(&mut self.sink, items.len() as i64)?;
                    for item in items.iter() {
                        self.write_value(item)?;
                    }
                }
                Ok(())
            }
            RubyValue::Hash(pairs) => {
                if self.must_write(rc_address(value))? {
                    self.tag(Token::Hash)?;
                    let pairs = pairs.borrow();
                    write_long(&mut self.sink, pairs.len() as i64)?;
                    for (key, item) in pairs.iter() {
                        self.write_value(key)?;
                        self.write_value(item)?;
                    }
                }
                Ok(())
            }
            RubyValue::Object(object) => {
                if self.must_write(rc_address(value))? {
                    self.tag(Token::Object)?;
                    let object = object.borrow();
                    self.write_symbol(object.get_class_name())?;
                    self.write_attributes(object.get_attributes())?;
                }
                Ok(())
            }
            RubyValue::Struct(structure) => {
                if self.must_write(rc_address(value))? {
                    self.tag(Token::Struct)?;
                    let structure = structure.borrow();
                    self.write_symbol(structure.get_class_name())?;
                    self.write_attributes(structure.get_members())?;
                }
                Ok(())
            }
            RubyValue::UserDef(user) => {
                if self.must_write(rc_address(value))? {
                    let user = user.borrow();
                    let wrapped = !user.get_attributes().is_empty();
                    if wrapped {
                        self.tag(Token::Ivar)?;
                    }
                    self.tag(Token::UserDef)?;
                    self.write_symbol(user.get_class_name())?;
                    write_long(&mut self.sink, user.get_data().len() as i64)?;
                    self.sink.write_all(user.get_data())?;
                    if wrapped {
                        self.write_attributes(user.get_attributes())?;
                    }
                }
                Ok(())
            }
            RubyValue::UserMarshal(user) => {
                if self.must_write(rc_address(value))? {
                    let user = user.borrow();
                    let wrapped = !user.get_attributes().is_empty();
                    if wrapped {
                        self.tag(Token::Ivar)?;
                    }
                    self.tag(Token::UserMarshal)?;
                    self.write_symbol(user.get_class_name())?;
                    self.write_value(user.get_value())?;
                    if wrapped {
                        self.write_attributes(user.get_attributes())?;
                    }
                }
                Ok(())
            }
            RubyValue::Class(class) => {
                if self.must_write(rc_address(value))? {
                    self.tag(Token::Class)?;
                    let bytes = class.get_name().as_bytes();
                    write_long(&mut self.sink, bytes.len() as i64)?;
                    self.sink.write_all(bytes)?;
                }
                Ok(())
            }
            RubyValue::Module(module) => {
                if self.must_write(rc_address(value))? {
                    self.tag(Token::Module)?;
                    let bytes = module.get_name().as_bytes();
                    write_long(&mut self.sink, bytes.len() as i64)?;
                    self.sink.write_all(bytes)?;
                }
                Ok(())
            }
        }
    }

    // ------------------------------------------------------------------
    // Per-variant bodies
    // ------------------------------------------------------------------

    fn write_int(&mut self, value: i64) -> Result<(), Error> {
        if value.unsigned_abs() < (1u64 << 40) {
            self.tag(Token::Fixnum)?;
            write_long(&mut self.sink, value)
        } else {
            // the reader reserves a slot for every bignum body, so the
            // numbering must advance even though an Int has no identity
            self.objects.insert_anonymous();
            self.write_bignum_body(value < 0, &limbs_of(value.unsigned_abs()))
        }
    }

    fn write_bignum_body(&mut self, negative: bool, limbs: &[u16]) -> Result<(), Error> {
        self.tag(Token::Bignum)?;
        write_ubyte(&mut self.sink, if negative { b'-' } else { b'+' })?;
        write_long(&mut self.sink, limbs.len() as i64)?;
        for limb in limbs {
            write_ushort(&mut self.sink, *limb)?;
        }
        Ok(())
    }

    fn write_symbol(&mut self, symbol: &Symbol) -> Result<(), Error> {
        if let Some(id) = self.symbols.get(symbol.get_name()) {
            self.tag(Token::Symlink)?;
            write_long(&mut self.sink, id as i64)
        } else {
            self.symbols.insert(symbol.get_name());
            self.tag(Token::Symbol)?;
            let bytes = symbol.get_name().as_bytes();
            write_long(&mut self.sink, bytes.len() as i64)?;
            self.sink.write_all(bytes)?;
            Ok(())
        }
    }

    fn write_attributes(&mut self, attributes: &Attributes) -> Result<(), Error> {
        write_long(&mut self.sink, attributes.len() as i64)?;
        for (name, value) in attributes.iter() {
            self.write_symbol(name)?;
            self.write_value(value)?;
        }
        Ok(())
    }

    fn write_string_body(&mut self, string: &RubyString) -> Result<(), Error> {
        self.tag(Token::Ivar)?;
        self.tag(Token::String)?;
        let attributes = string.get_attributes();
        if attributes.is_empty() {
            // bare text defaults to the host's native encoding
            let bytes = string.get_text().as_bytes();
            write_long(&mut self.sink, bytes.len() as i64)?;
            self.sink.write_all(bytes)?;
            let mut defaults = Attributes::new();
            defaults.push(Symbol::new(ATTR_SHORT_FORM), RubyValue::Bool(true));
            self.write_attributes(&defaults)
        } else {
            let bytes = Encoding::from_attributes(attributes).encode(string.get_text())?;
            write_long(&mut self.sink, bytes.len() as i64)?;
            self.sink.write_all(&bytes)?;
            self.write_attributes(attributes)
        }
    }

    fn write_regexp_body(&mut self, regexp: &Regexp) -> Result<(), Error> {
        self.tag(Token::Ivar)?;
        self.tag(Token::Regexp)?;
        let attributes = regexp.get_attributes();
        if attributes.is_empty() {
            let bytes = Encoding::Binary.encode(regexp.get_pattern())?;
            write_long(&mut self.sink, bytes.len() as i64)?;
            self.sink.write_all(&bytes)?;
            write_ubyte(&mut self.sink, regexp.get_options())?;
            let mut defaults = Attributes::new();
            defaults.push(Symbol::new(ATTR_SHORT_FORM), RubyValue::Bool(false));
            self.write_attributes(&defaults)
        } else {
            let bytes = Encoding::from_attributes(attributes).encode(regexp.get_pattern())?;
            write_long(&mut self.sink, bytes.len() as i64)?;
            self.sink.write_all(&bytes)?;
            write_ubyte(&mut self.sink, regexp.get_options())?;
            self.write_attributes(attributes)
        }
    }
}

fn rc_address(value: &RubyValue) -> usize {
    // only called for variants the object map tracks
    value.identity().expect("value has no allocation identity")
}

fn limbs_of(magnitude: u64) -> Vec<u16> {
    let mut limbs = Vec::new();
    let mut rest = magnitude;
    while rest != 0 {
        limbs.push((rest & 0xFFFF) as u16);
        rest >>= 16;
    }
    limbs
}

/// Formats a float the way the foreign runtime prints it: `%.20g`, with
/// trailing zeros after the decimal point trimmed. Special values are
/// the bare tokens `inf`, `-inf` and `nan`.
fn format_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    // 20 significant digits: one lead digit plus 19 fractional ones
    let formatted = format!("{:.19e}", value);
    let (mantissa, exponent) = formatted
        .split_once('e')
        .expect("exponential format always contains an exponent");
    let exponent: i32 = exponent.parse().expect("exponent is a decimal integer");
    let negative = mantissa.starts_with('-');
    let digits: String = mantissa.chars().filter(|c| c.is_ascii_digit()).collect();
    let body = if !(-4..20).contains(&exponent) {
        let trimmed = digits.trim_end_matches('0');
        let trimmed = if trimmed.is_empty() { "0" } else { trimmed };
        let (head, tail) = trimmed.split_at(1);
        let sign = if exponent < 0 { '-' } else { '+' };
        if tail.is_empty() {
            format!("{}e{}{:02}", head, sign, exponent.abs())
        } else {
            format!("{}.{}e{}{:02}", head, tail, sign, exponent.abs())
        }
    } else if exponent >= 0 {
        let split = (exponent + 1) as usize;
        let frac = digits[split..].trim_end_matches('0');
        if frac.is_empty() {
            digits[..split].to_string()
        } else {
            format!("{}.{}", &digits[..split], frac)
        }
    } else {
        let leading = "0".repeat((-exponent - 1) as usize);
        let frac = format!("{}{}", leading, digits);
        let frac = frac.trim_end_matches('0');
        format!("0.{}", frac)
    };
    if negative {
        format!("-{}", body)
    } else {
        body
    }
}
