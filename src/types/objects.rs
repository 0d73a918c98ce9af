use std::fmt;
use std::rc::Rc;

use super::{Attributes, RubyValue};
use crate::types::enums::RegexOptions;

/// An interned name (`:symbol` in Ruby source).
///
/// Symbols compare and hash by their text, and cloning one only bumps a
/// reference count, so every occurrence of a name decoded from one stream
/// shares a single allocation.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol {
    name: Rc<str>,
}

impl Symbol {
    pub fn new(name: &str) -> Self {
        Symbol { name: Rc::from(name) }
    }

    /// Returns the symbol's text.
    pub fn get_name(&self) -> &str {
        &self.name
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol::new(name)
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({:?})", self.name)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.name)
    }
}

/// A decoded text string together with its serialized instance variables.
///
/// The attribute list keeps every pair exactly as it appeared on the wire,
/// including the reserved encoding keys `E` and `encoding`; preserving
/// their order is what makes re-encoding byte-exact.
#[derive(Debug, Clone, PartialEq)]
pub struct RubyString {
    text: String,
    attributes: Attributes,
}

impl RubyString {
    /// Creates a UTF-8 string, the encoding the host runtime uses for
    /// plain text (attribute `E: true`).
    pub fn new(text: impl Into<String>) -> Self {
        let mut attributes = Attributes::new();
        attributes.push(Symbol::new("E"), RubyValue::Bool(true));
        RubyString {
            text: text.into(),
            attributes,
        }
    }

    /// Creates a string carrying an explicit attribute list, e.g. one
    /// decoded from a stream.
    pub fn with_attributes(text: impl Into<String>, attributes: Attributes) -> Self {
        RubyString {
            text: text.into(),
            attributes,
        }
    }

    pub fn get_text(&self) -> &str {
        &self.text
    }

    pub fn get_attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn get_attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }
}

/// A serialized regular expression: pattern text plus the wire option
/// byte.
///
/// Only the low three option bits are defined (see [`RegexOptions`]); the
/// raw byte is kept so unknown bits survive a round trip.
#[derive(Debug, Clone, PartialEq)]
pub struct Regexp {
    pattern: String,
    options: u8,
    attributes: Attributes,
}

impl Regexp {
    /// Creates a regexp the way the writer serializes host patterns:
    /// pattern bytes tagged `E: false`.
    pub fn new(pattern: impl Into<String>, flags: RegexOptions) -> Self {
        let mut attributes = Attributes::new();
        attributes.push(Symbol::new("E"), RubyValue::Bool(false));
        Regexp {
            pattern: pattern.into(),
            options: flags.bits(),
            attributes,
        }
    }

    pub fn with_attributes(
        pattern: impl Into<String>,
        options: u8,
        attributes: Attributes,
    ) -> Self {
        Regexp {
            pattern: pattern.into(),
            options,
            attributes,
        }
    }

    pub fn get_pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns the raw option byte as stored on the wire.
    pub fn get_options(&self) -> u8 {
        self.options
    }

    /// Returns the defined option bits; unknown bits are dropped.
    pub fn flags(&self) -> RegexOptions {
        RegexOptions::from_bits_truncate(self.options)
    }

    pub fn get_attributes(&self) -> &Attributes {
        &self.attributes
    }
}

/// A generic object: class name plus its instance-variable block.
#[derive(Debug, Clone, PartialEq)]
pub struct RubyObject {
    class_name: Symbol,
    attributes: Attributes,
}

impl RubyObject {
    pub fn new(class_name: Symbol) -> Self {
        RubyObject {
            class_name,
            attributes: Attributes::new(),
        }
    }

    pub fn with_attributes(class_name: Symbol, attributes: Attributes) -> Self {
        RubyObject {
            class_name,
            attributes,
        }
    }

    pub fn get_class_name(&self) -> &Symbol {
        &self.class_name
    }

    pub fn get_attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn get_attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    pub fn set_attributes(&mut self, attributes: Attributes) {
        self.attributes = attributes;
    }
}

/// A struct instance: class name plus its member block.
///
/// Members are serialized exactly like an instance-variable block, so the
/// same ordered pair list is reused.
#[derive(Debug, Clone, PartialEq)]
pub struct RubyStruct {
    class_name: Symbol,
    members: Attributes,
}

impl RubyStruct {
    pub fn new(class_name: Symbol, members: Attributes) -> Self {
        RubyStruct {
            class_name,
            members,
        }
    }

    pub fn get_class_name(&self) -> &Symbol {
        &self.class_name
    }

    pub fn get_members(&self) -> &Attributes {
        &self.members
    }

    pub fn get_members_mut(&mut self) -> &mut Attributes {
        &mut self.members
    }
}

/// An object serialized through `_dump`/`_load`: the payload stays an
/// opaque byte blob tagged with the class name.
#[derive(Clone, PartialEq)]
pub struct UserDef {
    class_name: Symbol,
    data: Vec<u8>,
    attributes: Attributes,
}

impl UserDef {
    pub fn new(class_name: Symbol, data: Vec<u8>) -> Self {
        UserDef {
            class_name,
            data,
            attributes: Attributes::new(),
        }
    }

    pub fn with_attributes(class_name: Symbol, data: Vec<u8>, attributes: Attributes) -> Self {
        UserDef {
            class_name,
            data,
            attributes,
        }
    }

    pub fn get_class_name(&self) -> &Symbol {
        &self.class_name
    }

    pub fn get_data(&self) -> &[u8] {
        &self.data
    }

    pub fn get_attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn get_attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }
}

impl fmt::Debug for UserDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // cap the payload dump, gem specifications embed whole streams
        let shown = &self.data[..self.data.len().min(16)];
        write!(
            f,
            "UserDef({}, {} bytes: {}{})",
            self.class_name,
            self.data.len(),
            hex::encode(shown),
            if self.data.len() > 16 { ".." } else { "" }
        )?;
        if !self.attributes.is_empty() {
            write!(f, " {:?}", self.attributes)?;
        }
        Ok(())
    }
}

/// An object serialized through `marshal_dump`/`marshal_load`: the
/// payload is a single nested value.
#[derive(Debug, Clone, PartialEq)]
pub struct UserMarshal {
    class_name: Symbol,
    value: RubyValue,
    attributes: Attributes,
}

impl UserMarshal {
    pub fn new(class_name: Symbol, value: RubyValue) -> Self {
        UserMarshal {
            class_name,
            value,
            attributes: Attributes::new(),
        }
    }

    pub fn get_class_name(&self) -> &Symbol {
        &self.class_name
    }

    pub fn get_value(&self) -> &RubyValue {
        &self.value
    }

    pub fn set_value(&mut self, value: RubyValue) {
        self.value = value;
    }

    pub fn get_attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn set_attributes(&mut self, attributes: Attributes) {
        self.attributes = attributes;
    }
}

/// A class reference, carrying just the dotted class path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RubyClass {
    name: String,
}

impl RubyClass {
    pub fn new(name: impl Into<String>) -> Self {
        RubyClass { name: name.into() }
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }
}

/// A module reference, carrying just the dotted module path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RubyModule {
    name: String,
}

impl RubyModule {
    pub fn new(name: impl Into<String>) -> Self {
        RubyModule { name: name.into() }
    }

    pub fn get_name(&self) -> &str {
        &self.name
    }
}

/// An integer too large for the packed encoding, kept as its wire image:
/// a sign and little-endian base-65536 limbs of the magnitude.
///
/// Values that fit `i64` never surface as `Bignum`; the reader folds them
/// into [`RubyValue::Int`](super::RubyValue).
#[derive(Clone, PartialEq, Eq)]
pub struct Bignum {
    negative: bool,
    limbs: Vec<u16>,
}

impl Bignum {
    pub fn new(negative: bool, limbs: Vec<u16>) -> Self {
        Bignum { negative, limbs }
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn get_limbs(&self) -> &[u16] {
        &self.limbs
    }

    /// Returns the numeric value when it fits 128 bits.
    pub fn to_i128(&self) -> Option<i128> {
        if self.limbs.len() > 8 {
            return None;
        }
        let mut magnitude: u128 = 0;
        for (i, limb) in self.limbs.iter().enumerate() {
            magnitude |= (*limb as u128) << (16 * i);
        }
        if self.negative {
            if magnitude > i128::MAX as u128 + 1 {
                return None;
            }
            Some((magnitude as i128).wrapping_neg())
        } else {
            i128::try_from(magnitude).ok()
        }
    }
}

impl fmt::Debug for Bignum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut bytes: Vec<u8> = self.limbs.iter().flat_map(|l| l.to_le_bytes()).collect();
        bytes.reverse();
        write!(
            f,
            "Bignum({}0x{})",
            if self.negative { "-" } else { "" },
            hex::encode(bytes)
        )
    }
}
