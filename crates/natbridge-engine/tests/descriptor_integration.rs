//! Declaring types from data and reading fields under each representation

use natbridge_engine::{Bridge, BridgeOptions, Value};
use natbridge_sdk::{
    BridgeError, DeclaredType, FieldDescriptor, LayoutError, Representation, ScalarKind,
    TypeKey, UncertainSpec,
};

const SHAPES_JSON: &str = r#"[
    {
        "key": "Point",
        "fields": [
            {"name": "x", "order": 0, "ty": {"scalar": "i32"}},
            {"name": "y", "order": 1, "ty": {"scalar": "i32"}}
        ],
        "methods": [
            {
                "kind": {"method": "length"},
                "is_const": true,
                "virtuality": "virtual",
                "slot": 0,
                "symbol": "point_length",
                "ret": {"ty": {"scalar": "f64"}}
            }
        ]
    },
    {
        "key": "Segment",
        "fields": [
            {"name": "ends", "order": 0, "ty": {"aggregate": "Point"}, "count": 2},
            {"name": "id", "order": 1, "ty": {"scalar": "u16"}, "setter": false}
        ]
    }
]"#;

#[test]
fn test_declare_json_document() {
    let bridge = Bridge::default();
    let keys = bridge.declare_json(SHAPES_JSON).unwrap();
    assert_eq!(keys, vec![TypeKey::new("Point"), TypeKey::new("Segment")]);

    let point = bridge.metadata(&keys[0]).unwrap();
    assert_eq!(point.layout.size, 8);
    let length = point.method("length").unwrap();
    assert!(length.is_const());
    assert_eq!(length.display_name(), "Point::length");

    let segment = bridge.layout(&keys[1]).unwrap();
    assert_eq!(segment.field(1).unwrap().offset, 16);
    assert_eq!(segment.size, 20);
    assert!(!segment.field(1).unwrap().setter);
}

#[test]
fn test_declare_json_single_object() {
    let bridge = Bridge::default();
    let flag = r#"{
        "key": "Flag",
        "fields": [{"name": "on", "order": 0, "ty": {"scalar": "bool"}}]
    }"#;
    let keys = bridge.declare_json(flag).unwrap();
    assert_eq!(keys, vec![TypeKey::new("Flag")]);
    assert_eq!(bridge.layout(&keys[0]).unwrap().size, 1);
}

#[test]
fn test_declare_json_malformed() {
    let bridge = Bridge::default();
    assert!(matches!(
        bridge.declare_json(r#"{"key": "Broken", "fields": [{"name": 3}]}"#),
        Err(BridgeError::Layout(LayoutError::MalformedDocument(_)))
    ));
    assert!(matches!(
        bridge.declare_json("not json"),
        Err(BridgeError::Layout(LayoutError::MalformedDocument(_)))
    ));
}

#[test]
fn test_redeclaration() {
    let bridge = Bridge::default();
    let decl = DeclaredType::new("Once").field(FieldDescriptor::scalar("v", 0, ScalarKind::U8));
    bridge.declare(decl.clone()).unwrap();
    bridge.declare(decl).unwrap();

    let changed =
        DeclaredType::new("Once").field(FieldDescriptor::scalar("v", 0, ScalarKind::U16));
    assert!(matches!(
        bridge.declare(changed),
        Err(BridgeError::Layout(LayoutError::ConflictingDeclaration(_)))
    ));
}

#[test]
fn test_layout_failures_are_reported_every_time() {
    let bridge = Bridge::default();
    let gap = bridge
        .declare(
            DeclaredType::new("Gap")
                .field(FieldDescriptor::scalar("a", 0, ScalarKind::U8))
                .field(FieldDescriptor::scalar("c", 2, ScalarKind::U8)),
        )
        .unwrap();
    for _ in 0..2 {
        assert!(matches!(
            bridge.layout(&gap),
            Err(BridgeError::Layout(LayoutError::NonContiguousOrder { .. }))
        ));
    }
    assert!(matches!(
        bridge.instantiate(&gap),
        Err(BridgeError::Layout(_))
    ));

    let a = bridge
        .declare(DeclaredType::new("A").field(FieldDescriptor::aggregate("b", 0, "B")))
        .unwrap();
    bridge
        .declare(DeclaredType::new("B").field(FieldDescriptor::aggregate("a", 0, "A")))
        .unwrap();
    assert!(matches!(
        bridge.layout(&a),
        Err(BridgeError::Layout(LayoutError::RecursiveAggregate { .. }))
    ));

    assert!(matches!(
        bridge.layout(&TypeKey::new("Nowhere")),
        Err(BridgeError::Layout(LayoutError::UnknownType(_)))
    ));
}

#[test]
fn test_oversized_layout_fails_and_is_cached() {
    let bridge = Bridge::default();
    bridge
        .declare(
            DeclaredType::new("Slab")
                .field(FieldDescriptor::scalar("words", 0, ScalarKind::U64).with_count(u32::MAX)),
        )
        .unwrap();
    let stack = bridge
        .declare(
            DeclaredType::new("SlabStack")
                .field(FieldDescriptor::aggregate("slabs", 0, "Slab").with_count(u32::MAX)),
        )
        .unwrap();

    assert_eq!(
        bridge.layout(&TypeKey::new("Slab")).unwrap().size,
        8 * u32::MAX as u64
    );
    for _ in 0..2 {
        assert!(matches!(
            bridge.layout(&stack),
            Err(BridgeError::Layout(LayoutError::SizeOverflow { order: 0, .. }))
        ));
    }
    assert!(bridge.cache().is_cached(&stack));
    assert_eq!(bridge.cache().computations(), 2);
}

#[test]
fn test_getter_and_setter_flags() {
    let bridge = Bridge::default();
    let key = bridge
        .declare(
            DeclaredType::new("Sealed")
                .field(FieldDescriptor::scalar("fixed", 0, ScalarKind::I32).read_only())
                .field(FieldDescriptor {
                    getter: false,
                    ..FieldDescriptor::scalar("hidden", 1, ScalarKind::I32)
                }),
        )
        .unwrap();
    let obj = bridge.instantiate(&key).unwrap();

    assert_eq!(obj.get("fixed").unwrap(), Value::I32(0));
    assert!(matches!(obj.set("fixed", 1i32), Err(BridgeError::Marshal(_))));
    obj.set("hidden", 5i32).unwrap();
    assert!(matches!(obj.get("hidden"), Err(BridgeError::Marshal(_))));
    assert!(matches!(obj.get("absent"), Err(BridgeError::Marshal(_))));
}

#[test]
fn test_scalar_array_representations() {
    let bridge = Bridge::default();
    let spec = |text: &str| UncertainSpec::parse(text).unwrap();
    let key = bridge
        .declare(
            DeclaredType::new("Buffers")
                .field(FieldDescriptor::scalar("plain", 0, ScalarKind::U16).with_count(3))
                .field(
                    FieldDescriptor::scalar("copied", 1, ScalarKind::U16)
                        .with_count(3)
                        .with_uncertain(spec("Options: value Fallback: value")),
                )
                .field(
                    FieldDescriptor::scalar("addressed", 2, ScalarKind::U16)
                        .with_count(3)
                        .with_uncertain(spec("Options: reference Fallback: reference")),
                ),
        )
        .unwrap();
    let obj = bridge.instantiate(&key).unwrap();
    let layout = obj.layout().clone();

    obj.write_field(0, vec![Value::U16(1), Value::U16(2), Value::U16(3)])
        .unwrap();
    let plain = obj.read_field(0).unwrap();
    let plain = plain.as_array().unwrap();
    assert_eq!(plain.len(), 3);
    assert_eq!(plain.address(), obj.address() + layout.field(0).unwrap().offset);
    plain.set(1, 20u16).unwrap();
    assert_eq!(obj.read_element(0, 1).unwrap(), Value::U16(20));
    assert!(matches!(plain.get(3), Err(BridgeError::Marshal(_))));

    obj.write_field(1, plain.to_vec().unwrap()).unwrap();
    assert_eq!(obj.representation(1).unwrap(), Representation::Value);
    assert_eq!(
        obj.read_field(1).unwrap(),
        Value::List(vec![Value::U16(1), Value::U16(20), Value::U16(3)])
    );

    assert_eq!(obj.representation(2).unwrap(), Representation::Reference);
    assert_eq!(
        obj.read_field(2).unwrap(),
        Value::Pointer(obj.address() + layout.field(2).unwrap().offset)
    );

    assert!(matches!(
        obj.write_field(0, vec![Value::U16(1)]),
        Err(BridgeError::Marshal(_))
    ));
}

#[test]
fn test_value_representation_copies_aggregates() {
    let bridge = Bridge::default();
    bridge
        .declare(DeclaredType::new("Cell").field(FieldDescriptor::scalar("v", 0, ScalarKind::I32)))
        .unwrap();
    let key = bridge
        .declare(
            DeclaredType::new("Grid").field(
                FieldDescriptor::aggregate("cells", 0, "Cell")
                    .with_count(2)
                    .with_uncertain(
                        UncertainSpec::parse("Options: value Fallback: value").unwrap(),
                    ),
            ),
        )
        .unwrap();
    let grid = bridge.instantiate(&key).unwrap();

    let copy = grid.read_element(0, 1).unwrap();
    let copy = copy.as_struct().unwrap();
    assert!(!copy.peer().same_peer(grid.peer()));
    assert!(copy.peer().is_owned());
    copy.set("v", 8i32).unwrap();

    let view = grid.read_field(0).unwrap();
    match view {
        Value::List(cells) => {
            assert_eq!(cells.len(), 2);
            assert_eq!(cells[1].as_struct().unwrap().get("v").unwrap(), Value::I32(0));
        }
        other => panic!("expected a list of copies, got {:?}", other),
    }
}

#[test]
fn test_cast_bounds() {
    let bridge = Bridge::default();
    let small = bridge
        .declare(DeclaredType::new("Small").field(FieldDescriptor::scalar("a", 0, ScalarKind::U32)))
        .unwrap();
    let large = bridge
        .declare(
            DeclaredType::new("Large")
                .field(FieldDescriptor::scalar("a", 0, ScalarKind::U32))
                .field(FieldDescriptor::scalar("b", 1, ScalarKind::U64)),
        )
        .unwrap();

    let big = bridge.instantiate(&large).unwrap();
    big.set("a", 77u32).unwrap();
    let narrowed = bridge.cast(&big, &small).unwrap();
    assert!(narrowed.same_object(&big));
    assert_eq!(narrowed.get("a").unwrap(), Value::U32(77));

    let tiny = bridge.instantiate(&small).unwrap();
    assert!(matches!(
        bridge.cast(&tiny, &large),
        Err(BridgeError::Marshal(_))
    ));
}

#[test]
fn test_options_from_toml() {
    let options = BridgeOptions::from_toml_str("zero_fill = false\nmin_alloc_align = 32").unwrap();
    assert!(!options.zero_fill);
    assert_eq!(options.min_alloc_align, 32);
    assert!(options.strict_aliasing);

    let bridge = Bridge::new(options.clone());
    assert_eq!(bridge.options(), &options);
}
