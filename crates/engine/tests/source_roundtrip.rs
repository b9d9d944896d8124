//! Textual assembly front end: parse/disassemble symmetry and the
//! duplicate-signature error surfaced when the same function is loaded
//! twice.

use stackjit_engine::error::LoadError;
use stackjit_engine::source::{disassemble, parse};
use stackjit_engine::{VMState, VmConfig};

const PROGRAM: &str = "\
func add(Int Int) Int {
.locals 0
ldarg 0
ldarg 1
add
ret
}

class Point extends Object {
x Int
y Int
}

member func Point::getX() Int {
.locals 0
ldarg 0
ldfield Point::x
ret
}
";

#[test]
fn disassembling_a_parsed_program_reproduces_its_declarations() {
    let contents = parse(PROGRAM).expect("parses cleanly");
    assert_eq!(contents.functions.len(), 2);
    assert_eq!(contents.classes.len(), 1);

    let text = disassemble(&contents);
    let reparsed = parse(&text).expect("disassembled text re-parses");

    assert_eq!(reparsed.functions.len(), contents.functions.len());
    assert_eq!(reparsed.classes.len(), contents.classes.len());

    let signatures: Vec<_> = reparsed.functions.iter().map(|f| f.signature()).collect();
    assert!(signatures.contains(&"add(Int Int)".to_string()));
    assert!(signatures.contains(&"Point::getX()".to_string()));

    assert_eq!(reparsed.classes[0].name, "Point");
    assert_eq!(reparsed.classes[0].parent.as_deref(), Some("Object"));
}

#[test]
fn a_virtual_attribute_registers_the_method_in_its_owning_classs_vtable() {
    let source = "\
class Shape extends Object {
}

member func Shape::area() Int {
.locals 0
@ virtual()
ldint 0
ret
}
";
    let contents = parse(source).expect("parses cleanly");
    assert_eq!(contents.classes[0].virtuals, vec!["Shape::area()".to_string()]);

    let text = disassemble(&contents);
    let reparsed = parse(&text).expect("disassembled text re-parses");
    assert_eq!(reparsed.classes[0].virtuals, contents.classes[0].virtuals);
}

#[test]
fn a_function_defined_twice_in_one_image_is_rejected() {
    let mut vm = VMState::new(VmConfig::default());
    let source = "func test(Int) Int {\n.locals 0\nldarg 0\nret\n}";
    stackjit_engine::source::load_source(source, &mut vm).expect("first definition installs");

    let err = stackjit_engine::source::load_source(source, &mut vm).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("test(Int)"), "message was: {message}");
    assert!(message.contains("already defined"), "message was: {message}");
}

#[test]
fn a_syntax_error_reports_its_line_number() {
    let source = "func f() Int {\n.locals 0\nbogus\nret\n}";
    let err = parse(source).unwrap_err();
    match err {
        LoadError::Syntax { line, .. } => assert_eq!(line, 3),
        other => panic!("expected a syntax error, got {other:?}"),
    }
}
