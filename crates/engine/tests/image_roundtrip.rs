//! Binary image format: encode/decode symmetry and installation into a
//! running `VMState`.

use stackjit_engine::error::LoadError;
use stackjit_engine::image::{self, ClassDecl, ImageContents};
use stackjit_engine::instruction::{Instruction, OpCode, Operand};
use stackjit_engine::signature::{FunctionDefinition, ManagedFunction};
use stackjit_engine::types::Type;
use stackjit_engine::{VMState, VmConfig};

fn sample_contents() -> ImageContents {
    let mut contents = ImageContents::default();

    contents.classes.push(ClassDecl {
        name: "Object".to_string(),
        parent: None,
        fields: Vec::new(),
        virtuals: Vec::new(),
    });
    contents.classes.push(ClassDecl {
        name: "Point".to_string(),
        parent: Some("Object".to_string()),
        fields: vec![("x".to_string(), Type::Int), ("y".to_string(), Type::Int)],
        virtuals: Vec::new(),
    });

    contents
        .externs
        .push(FunctionDefinition::new("print", vec![Type::Int], Type::Void, false, false, None));

    let definition = FunctionDefinition::new("answer", Vec::new(), Type::Int, true, false, None);
    let instructions = vec![
        Instruction::new(OpCode::LoadInt, Operand::Int(42)),
        Instruction::simple(OpCode::Ret),
    ];
    contents.functions.push(ManagedFunction::new(definition, instructions, Vec::new()));

    contents
}

#[test]
fn decode_after_encode_preserves_every_declaration() {
    let original = sample_contents();
    let bytes = image::encode(&original);
    let decoded = image::decode(&bytes).expect("decodes cleanly");

    assert_eq!(decoded.classes.len(), original.classes.len());
    assert_eq!(decoded.classes[0].name, "Object");
    assert_eq!(decoded.classes[1].name, "Point");
    assert_eq!(decoded.classes[1].parent.as_deref(), Some("Object"));
    assert_eq!(decoded.classes[1].fields, original.classes[1].fields);

    assert_eq!(decoded.externs.len(), 1);
    assert_eq!(decoded.externs[0].signature(), "print(Int)");

    assert_eq!(decoded.functions.len(), 1);
    assert_eq!(decoded.functions[0].signature(), "answer()");
    assert_eq!(decoded.functions[0].instructions, original.functions[0].instructions);
}

#[test]
fn rejects_bad_magic() {
    let bytes = vec![0u8; 32];
    let err = image::decode(&bytes).unwrap_err();
    assert!(matches!(err, LoadError::MalformedImage(_)));
}

#[test]
fn rejects_truncated_input() {
    let bytes = image::encode(&sample_contents());
    let truncated = &bytes[..bytes.len() - 4];
    let err = image::decode(truncated).unwrap_err();
    assert!(matches!(err, LoadError::UnexpectedEof));
}

#[test]
fn installs_classes_before_functions_into_a_running_vm() {
    let mut vm = VMState::new(VmConfig::default());
    let bytes = image::encode(&sample_contents());
    image::load(&bytes, &mut vm).expect("loads cleanly");

    assert!(vm.classes.contains_key("Object"));
    assert!(vm.classes.contains_key("Point"));
    assert_eq!(vm.classes["Point"].fields.len(), 2);
    assert!(vm.externs.contains_key("print(Int)"));
    assert!(vm.lookup("answer()").is_some());
}

#[test]
fn loading_the_same_image_twice_reports_a_duplicate_class() {
    let mut vm = VMState::new(VmConfig::default());
    let bytes = image::encode(&sample_contents());
    image::load(&bytes, &mut vm).expect("first load succeeds");

    let err = image::load(&bytes, &mut vm).unwrap_err();
    assert!(matches!(err, LoadError::DuplicateClass(name) if name == "Object"));
}

#[test]
fn a_class_whose_parent_is_missing_is_rejected() {
    let mut vm = VMState::new(VmConfig::default());
    let mut contents = ImageContents::default();
    contents.classes.push(ClassDecl {
        name: "Orphan".to_string(),
        parent: Some("Nonexistent".to_string()),
        fields: Vec::new(),
        virtuals: Vec::new(),
    });
    let bytes = image::encode(&contents);

    let err = image::load(&bytes, &mut vm).unwrap_err();
    assert!(matches!(err, LoadError::UnknownClass(name) if name == "Nonexistent"));
}
