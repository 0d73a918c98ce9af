use std::cell::RefCell;
use std::rc::Rc;

use pretty_assertions::assert_eq;
use rbmarshal::{
    loads, loads_with_registry, Attributes, ClassDef, ClassRegistry, Error, Reader, RegexOptions,
    Regexp, RubyObject, RubyString, RubyValue, Symbol, UserMarshal,
};

fn as_array(value: &RubyValue) -> Rc<RefCell<Vec<RubyValue>>> {
    match value {
        RubyValue::Array(items) => items.clone(),
        other => panic!("expected an array, got {:?}", other),
    }
}

fn string_text(value: &RubyValue) -> String {
    match value {
        RubyValue::String(string) => string.borrow().get_text().to_string(),
        other => panic!("expected a string, got {:?}", other),
    }
}

fn float_value(value: &RubyValue) -> f64 {
    match value {
        RubyValue::Float(cell) => cell.get(),
        other => panic!("expected a float, got {:?}", other),
    }
}

#[test]
fn nil_true_false() {
    assert_eq!(loads(b"\x04\x080").unwrap(), RubyValue::Nil);
    assert_eq!(loads(b"\x04\x08T").unwrap(), RubyValue::Bool(true));
    assert_eq!(loads(b"\x04\x08F").unwrap(), RubyValue::Bool(false));
}

#[test]
fn fixnums() {
    let cases: &[(&[u8], i64)] = &[
        (b"\x04\x08i\x00", 0),
        (b"\x04\x08i\x06", 1),
        (b"\x04\x08i\x7F", 122),
        (b"\x04\x08i\x01{", 123),
        (b"\x04\x08i\x01\xFF", 255),
        (b"\x04\x08i\x02\x00\x01", 256),
        (b"\x04\x08i\x02\xFF\xFF", 65535),
        (b"\x04\x08i\x03\x00\x00\x01", 65536),
        (b"\x04\x08i\x04\xE8\x03\xE8\x03", 65537000),
        (b"\x04\x08i\xFA", -1),
        (b"\x04\x08i\x80", -123),
        (b"\x04\x08i\xFF\x84", -124),
        (b"\x04\x08i\xFF\x00", -256),
        (b"\x04\x08i\xFE\x00\xFF", -256),
        (b"\x04\x08i\xFE\xFF\xFE", -257),
        (b"\x04\x08i\xFE\xFD\xFE", -259),
        (b"\x04\x08i\xFE\x00\x00", -65536),
        (b"\x04\x08i\xFD\xFF\xFF\xFE", -65537),
        (b"\x04\x08i\xFC\x18\xFC\x17\xFC", -65537000),
    ];
    for (bytes, expected) in cases {
        assert_eq!(loads(bytes).unwrap(), RubyValue::Int(*expected), "{:?}", bytes);
    }
}

#[test]
fn bignum_that_fits_folds_into_int() {
    let value = loads(b"\x04\x08l+\x09\x15\x81\xE9\x7D\xF4\x10\x22\x11").unwrap();
    assert_eq!(value, RubyValue::Int(1234567890123456789));
}

#[test]
fn bignum_beyond_the_integer_range() {
    let stream: &[u8] = b"\x04\x08l+\x16\xD0\xE8\xDD\x86T\x9D$\x08&\xF83E\xE3\xD2\xFD\xB9\"\x12\
\x0D\x85\"\x0B\x92\x06\xEF\x7F}/\xB7_\xB7\xEF\xA5)";
    match loads(stream).unwrap() {
        RubyValue::Bignum(big) => {
            assert!(!big.is_negative());
            assert_eq!(big.get_limbs().len(), 17);
            assert_eq!(big.to_i128(), None);
        }
        other => panic!("expected a bignum, got {:?}", other),
    }
}

#[test]
fn strings_with_utf8_marker() {
    assert_eq!(string_text(&loads(b"\x04\x08I\"\x00\x06:\x06ET").unwrap()), "");
    assert_eq!(
        loads(b"\x04\x08I\"\x06a\x06:\x06ET").unwrap(),
        RubyValue::string("a")
    );
    assert_eq!(
        string_text(&loads(b"\x04\x08I\"\x0Aabcde\x06:\x06ET").unwrap()),
        "abcde"
    );
}

#[test]
fn strings_with_explicit_ascii_marker() {
    let mut attributes = Attributes::new();
    attributes.push(Symbol::new("E"), RubyValue::Bool(false));
    assert_eq!(
        loads(b"\x04\x08I\"\x0Ahello\x06:\x06EF").unwrap(),
        RubyValue::ruby_string(RubyString::with_attributes("hello", attributes))
    );
}

#[test]
fn strings_with_named_encodings() {
    // the encoding attribute survives on the decoded string
    let mut attributes = Attributes::new();
    attributes.push(
        Symbol::new("encoding"),
        RubyValue::bytes(b"Shift_JIS".to_vec()),
    );
    assert_eq!(
        loads(b"\x04\x08I\"\x0Ahello\x06:\x0Dencoding\"\x0EShift_JIS").unwrap(),
        RubyValue::ruby_string(RubyString::with_attributes("hello", attributes))
    );

    let utf16 = loads(b"\x04\x08I\"\x0D\xFE\xFF\x00a\x00b\x00c\x06:\x0Dencoding\"\x0BUTF-16")
        .unwrap();
    assert_eq!(string_text(&utf16), "abc");

    let utf32 = loads(
        b"\x04\x08I\"\x15\x00\x00\xFE\xFF\x00\x00\x00a\x00\x00\x00b\x00\x00\x00c\x06:\x0Dencoding\"\x0BUTF-32",
    )
    .unwrap();
    assert_eq!(string_text(&utf32), "abc");
}

#[test]
fn string_keeps_plain_attributes() {
    let mut attributes = Attributes::new();
    attributes.push(Symbol::new("E"), RubyValue::Bool(true));
    attributes.push(Symbol::new("@test"), RubyValue::Nil);
    assert_eq!(
        loads(b"\x04\x08I\"\x0Ahello\x07:\x06ET:\x0A@test0").unwrap(),
        RubyValue::ruby_string(RubyString::with_attributes("hello", attributes))
    );
}

#[test]
fn raw_byte_strings_stay_undecoded() {
    assert_eq!(
        loads(b"\x04\x08\"\x0Ahello").unwrap(),
        RubyValue::bytes(b"hello".to_vec())
    );
}

#[test]
fn arrays() {
    assert_eq!(loads(b"\x04\x08[\x00").unwrap(), RubyValue::array(vec![]));
    assert_eq!(
        loads(b"\x04\x08[\x08i\x06i\x07i\x08").unwrap(),
        RubyValue::array(vec![
            RubyValue::Int(1),
            RubyValue::Int(2),
            RubyValue::Int(3)
        ])
    );
}

#[test]
fn nested_arrays() {
    assert_eq!(
        loads(b"\x04\x08[\x0Ai\x06i\x07i\x08[\x08I\"\x09test\x06:\x06ETF0[\x06i/").unwrap(),
        RubyValue::array(vec![
            RubyValue::Int(1),
            RubyValue::Int(2),
            RubyValue::Int(3),
            RubyValue::array(vec![
                RubyValue::string("test"),
                RubyValue::Bool(false),
                RubyValue::Nil
            ]),
            RubyValue::array(vec![RubyValue::Int(42)]),
        ])
    );
}

#[test]
fn hashes_preserve_insertion_order() {
    assert_eq!(loads(b"\x04\x08{\x00").unwrap(), RubyValue::hash(vec![]));
    assert_eq!(
        loads(b"\x04\x08{\x07i\x06i\x07i\x08i\x09").unwrap(),
        RubyValue::hash(vec![
            (RubyValue::Int(1), RubyValue::Int(2)),
            (RubyValue::Int(3), RubyValue::Int(4)),
        ])
    );
}

#[test]
fn nested_hashes() {
    assert_eq!(
        loads(b"\x04\x08{\x0Ai\x06i\x07i\x08i\x09i\x0A[\x08i\x06i\x07i\x08i\x0B{\x06i\x0Ci\x0Di\x0EI\"\x09test\x06:\x06ET")
            .unwrap(),
        RubyValue::hash(vec![
            (RubyValue::Int(1), RubyValue::Int(2)),
            (RubyValue::Int(3), RubyValue::Int(4)),
            (
                RubyValue::Int(5),
                RubyValue::array(vec![
                    RubyValue::Int(1),
                    RubyValue::Int(2),
                    RubyValue::Int(3)
                ])
            ),
            (
                RubyValue::Int(6),
                RubyValue::hash(vec![(RubyValue::Int(7), RubyValue::Int(8))])
            ),
            (RubyValue::Int(9), RubyValue::string("test")),
        ])
    );
}

#[test]
fn floats() {
    assert_eq!(float_value(&loads(b"\x04\x08f\x060").unwrap()), 0.0);
    assert_eq!(float_value(&loads(b"\x04\x08f\x061").unwrap()), 1.0);
    assert_eq!(float_value(&loads(b"\x04\x08f\x081.2").unwrap()), 1.2);
    assert_eq!(float_value(&loads(b"\x04\x08f\x07-1").unwrap()), -1.0);
    assert_eq!(
        float_value(&loads(b"\x04\x08f\x171234567890.1234567").unwrap()),
        1234567890.1234567
    );
    assert_eq!(
        float_value(&loads(b"\x04\x08f\x08inf").unwrap()),
        f64::INFINITY
    );
    assert_eq!(
        float_value(&loads(b"\x04\x08f\x09-inf").unwrap()),
        f64::NEG_INFINITY
    );
    assert!(float_value(&loads(b"\x04\x08f\x08nan").unwrap()).is_nan());
}

#[test]
fn float_ignores_the_legacy_nul_suffix() {
    assert_eq!(
        float_value(&loads(b"\x04\x08f\x0D1.25\x00xyz").unwrap()),
        1.25
    );
}

#[test]
fn regexps() {
    assert_eq!(
        loads(b"\x04\x08I/\x07tt\x00\x06:\x06EF").unwrap(),
        RubyValue::regexp(Regexp::new("tt", RegexOptions::empty()))
    );
    assert_eq!(
        loads(b"\x04\x08I/\x07tt\x01\x06:\x06EF").unwrap(),
        RubyValue::regexp(Regexp::new("tt", RegexOptions::IGNORECASE))
    );
    assert_eq!(
        loads(b"\x04\x08I/\x07tt\x04\x06:\x06EF").unwrap(),
        RubyValue::regexp(Regexp::new("tt", RegexOptions::MULTILINE))
    );
    assert_ne!(
        loads(b"\x04\x08I/\x07tt\x01\x06:\x06EF").unwrap(),
        RubyValue::regexp(Regexp::new("tt", RegexOptions::empty()))
    );
}

#[test]
fn user_marshal() {
    let expected = UserMarshal::new(
        Symbol::new("Gem::Version"),
        RubyValue::array(vec![RubyValue::string("0.1.2")]),
    );
    assert_eq!(
        loads(b"\x04\x08U:\x11Gem::Version[\x06I\"\x0A0.1.2\x06:\x06ET").unwrap(),
        RubyValue::user_marshal(expected)
    );
}

#[test]
fn symbols_and_symlinks() {
    assert_eq!(
        loads(b"\x04\x08:\x10test_symbol").unwrap(),
        RubyValue::symbol("test_symbol")
    );
    let value = loads(b"\x04\x08[\x07:\x10test_symbol;\x00").unwrap();
    assert_eq!(
        value,
        RubyValue::array(vec![
            RubyValue::symbol("test_symbol"),
            RubyValue::symbol("test_symbol"),
        ])
    );
}

#[test]
fn modules_and_classes() {
    assert_eq!(
        loads(b"\x04\x08m\x0FEnumerable").unwrap(),
        RubyValue::module("Enumerable")
    );
    assert_eq!(
        loads(b"\x04\x08c\x16Math::DomainError").unwrap(),
        RubyValue::class("Math::DomainError")
    );
    assert_eq!(
        loads(b"\x04\x08c\x0BString").unwrap(),
        RubyValue::class("String")
    );
}

#[test]
fn objects() {
    let mut attributes = Attributes::new();
    attributes.push(Symbol::new("@a"), RubyValue::Nil);
    assert_eq!(
        loads(b"\x04\x08o:\x0DDumpTest\x06:\x07@a0").unwrap(),
        RubyValue::object(RubyObject::with_attributes(
            Symbol::new("DumpTest"),
            attributes
        ))
    );
}

#[test]
fn object_links_preserve_identity() {
    let value = loads(b"\x04\x08[\x08[\x08i\x06i\x07i\x08@\x06@\x06").unwrap();
    let outer = as_array(&value);
    assert_eq!(outer.borrow().len(), 3);

    // mutating one occurrence is visible at the other two
    let first = outer.borrow()[0].clone();
    as_array(&first).borrow_mut()[2] = RubyValue::Int(4);
    for i in 1..3 {
        let item = outer.borrow()[i].clone();
        assert_eq!(as_array(&item).borrow()[2], RubyValue::Int(4));
    }
}

#[test]
fn links_resolve_user_marshal_objects() {
    let value = loads(b"\x04\x08[\x07U:\x11Gem::Version[\x06I\"\x0A0.1.2\x06:\x06ET@\x06")
        .unwrap();
    let items = as_array(&value);
    let (first, second) = (items.borrow()[0].clone(), items.borrow()[1].clone());
    match (&first, &second) {
        (RubyValue::UserMarshal(a), RubyValue::UserMarshal(b)) => {
            assert!(Rc::ptr_eq(a, b));
        }
        other => panic!("expected two user-marshal values, got {:?}", other),
    }
}

#[test]
fn links_mix_with_fresh_objects() {
    let value = loads(
        b"\x04\x08[\x08[\x07[\x08i\x06i\x07i\x08@\x07[\x07U:\x11Gem::Version[\x06I\"\x0A0.1.2\x06:\x06ET@\x09[\x07@\x07@\x07",
    )
    .unwrap();
    let a = RubyValue::array(vec![
        RubyValue::Int(1),
        RubyValue::Int(2),
        RubyValue::Int(3),
    ]);
    let b = RubyValue::user_marshal(UserMarshal::new(
        Symbol::new("Gem::Version"),
        RubyValue::array(vec![RubyValue::string("0.1.2")]),
    ));
    assert_eq!(
        value,
        RubyValue::array(vec![
            RubyValue::array(vec![a.clone(), a.clone()]),
            RubyValue::array(vec![b.clone(), b.clone()]),
            RubyValue::array(vec![a.clone(), a]),
        ])
    );
}

#[test]
fn structs_decode_like_member_blocks() {
    // Struct.new("Point", :x, :y).new(1, 2)
    let value = loads(b"\x04\x08S:\x0APoint\x07:\x06xi\x06:\x06yi\x07").unwrap();
    match &value {
        RubyValue::Struct(structure) => {
            let structure = structure.borrow();
            assert_eq!(structure.get_class_name(), &Symbol::new("Point"));
            assert_eq!(structure.get_members().len(), 2);
            assert_eq!(structure.get_members().get("x"), Some(&RubyValue::Int(1)));
            assert_eq!(structure.get_members().get("y"), Some(&RubyValue::Int(2)));
        }
        other => panic!("expected a struct, got {:?}", other),
    }
}

#[test]
fn read_reports_bytes_consumed() {
    let (value, consumed) = rbmarshal::read(&b"\x04\x08i\x06trailing"[..]).unwrap();
    assert_eq!(value, RubyValue::Int(1));
    assert_eq!(consumed, 4);
}

#[test]
fn read_symbol_is_a_public_sub_reader() {
    let mut reader = Reader::new(&b":\x10test_symbol"[..]);
    assert_eq!(reader.read_symbol().unwrap(), Symbol::new("test_symbol"));
}

#[test]
fn registry_hydrates_matching_kinds() {
    let mut registry = ClassRegistry::new();
    registry.register("Gem::Version", ClassDef::UserMarshal);
    let value = loads_with_registry(
        b"\x04\x08U:\x11Gem::Version[\x06I\"\x0A0.1.2\x06:\x06ET",
        registry,
    )
    .unwrap();
    assert!(matches!(value, RubyValue::UserMarshal(_)));
}

#[test]
fn registry_rejects_mismatched_kinds() {
    let mut registry = ClassRegistry::new();
    registry.register("Gem::Version", ClassDef::Object);
    let result = loads_with_registry(
        b"\x04\x08U:\x11Gem::Version[\x06I\"\x0A0.1.2\x06:\x06ET",
        registry,
    );
    assert!(matches!(result, Err(Error::RegistryMismatch(_))));
}

#[test]
fn bad_header_is_rejected() {
    assert!(matches!(
        loads(b"\x03\x08i\x00"),
        Err(Error::BadHeader([3, 8]))
    ));
    assert!(matches!(
        loads(b"\x04\x07i\x00"),
        Err(Error::BadHeader([4, 7]))
    ));
}

#[test]
fn unknown_tags_are_rejected() {
    assert!(matches!(loads(b"\x04\x08!"), Err(Error::UnknownTag(b'!'))));
}

#[test]
fn truncated_streams_are_rejected() {
    for bytes in [
        &b"\x04"[..],
        &b"\x04\x08"[..],
        &b"\x04\x08i"[..],
        &b"\x04\x08i\x02\x00"[..],
        &b"\x04\x08\"\x0Aab"[..],
        &b"\x04\x08[\x07i\x06"[..],
    ] {
        assert!(
            matches!(loads(bytes), Err(Error::TruncatedInput)),
            "{:?}",
            bytes
        );
    }
}

#[test]
fn dangling_links_are_rejected() {
    assert!(matches!(
        loads(b"\x04\x08;\x00"),
        Err(Error::IndexOutOfRange(0))
    ));
    assert!(matches!(
        loads(b"\x04\x08[\x06@\x06"),
        Err(Error::IndexOutOfRange(1))
    ));
}

#[test]
fn symlink_cannot_carry_instance_variables() {
    // a symbol must exist first for the link to make sense at all
    assert!(matches!(
        loads(b"\x04\x08[\x07:\x06aI;\x00\x06:\x06ET"),
        Err(Error::Format(_))
    ));
}

#[test]
fn class_name_positions_demand_symbols() {
    assert!(matches!(
        loads(b"\x04\x08Ui\x06"),
        Err(Error::SymbolExpected(_))
    ));
    assert!(matches!(
        loads(b"\x04\x08o\"\x06X\x00"),
        Err(Error::SymbolExpected(_))
    ));
}

#[test]
fn data_and_extended_tags_fail_cleanly() {
    assert!(matches!(loads(b"\x04\x08d:\x08Foo0"), Err(Error::Format(_))));
    assert!(matches!(
        loads(b"\x04\x08e:\x08Foo0"),
        Err(Error::Format(_))
    ));
}
