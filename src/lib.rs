//! A reader and writer for the Marshal 4.8 binary serialization format
//! used by the Ruby runtime.
//!
//! Streams decode into a [`RubyValue`] tree and encode back bit-exact,
//! including shared substructure and cycles: both sides of the codec keep
//! a symbol table and an object table and advance them in the same
//! order, so back-references land on the same values.
//!
//! ```
//! use rbmarshal::{loads, writes, RubyValue};
//!
//! let value = loads(b"\x04\x08[\x07i\x06i\x07").unwrap();
//! assert_eq!(
//!     value,
//!     RubyValue::array(vec![RubyValue::Int(1), RubyValue::Int(2)])
//! );
//! assert_eq!(writes(&value).unwrap(), b"\x04\x08[\x07i\x06i\x07");
//! ```

pub mod error;
pub mod util;
pub mod types;
pub mod tables;
pub mod registry;
pub mod reader;
pub mod writer;

pub use error::Error;
pub use reader::{load, load_with_registry, loads, loads_with_registry, read, Reader};
pub use registry::{ClassDef, ClassRegistry};
pub use types::{
    Attributes, Bignum, Encoding, RegexOptions, Regexp, RubyClass, RubyHash, RubyModule,
    RubyObject, RubyString, RubyStruct, RubyValue, Symbol, UserDef, UserMarshal,
};
pub use writer::{write, writes, Writer};
