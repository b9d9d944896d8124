//! End-to-end scenarios: assemble source, lazily compile, and actually run
//! the generated machine code.

use stackjit_engine::{source, VMState, VmConfig};

fn run_main(source_text: &str) -> i32 {
    let mut vm = VMState::new(VmConfig::default());
    source::load_source(source_text, &mut vm).expect("source assembles cleanly");
    let entry = vm.compile_by_signature("main()").expect("main() compiles");
    let main: extern "C" fn() -> i32 = unsafe { std::mem::transmute(entry as *const ()) };
    main()
}

#[test]
fn a_function_returning_a_constant_returns_that_constant() {
    let source_text = "func main() Int {\n.locals 0\nldint 100\nret\n}\n";
    assert_eq!(run_main(source_text), 100);
}

#[test]
fn locals_and_arithmetic_compose_across_stack_slots() {
    let source_text = "\
func main() Int {
.locals 1
ldint 10
stloc 0
ldloc 0
ldint 5
add
ret
}
";
    assert_eq!(run_main(source_text), 15);
}

#[test]
fn a_descending_branch_loop_sums_down_to_zero() {
    // sum = 0; i = 5; while (i != 0) { sum = sum + i; i = i - 1; } return sum;
    // => 5 + 4 + 3 + 2 + 1 == 15
    let source_text = "\
func main() Int {
.locals 2
ldint 0
stloc 0
ldint 5
stloc 1
ldloc 1
ldint 0
beq 16
ldloc 0
ldloc 1
add
stloc 0
ldloc 1
ldint 1
sub
stloc 1
br 4
ldloc 0
ret
}
";
    assert_eq!(run_main(source_text), 15);
}

#[test]
fn a_lazily_compiled_call_runs_the_callee_and_returns_its_result() {
    let source_text = "\
func add(Int Int) Int {
.locals 0
ldarg 0
ldarg 1
add
ret
}

func main() Int {
.locals 0
ldint 7
ldint 35
call add(Int Int)
ret
}
";
    assert_eq!(run_main(source_text), 42);
}

#[test]
fn recursion_computes_a_factorial() {
    let source_text = "\
func factorial(Int) Int {
.locals 0
ldarg 0
ldint 1
bgt 5
ldint 1
ret
ldarg 0
ldarg 0
ldint 1
sub
call factorial(Int)
mul
ret
}

func main() Int {
.locals 0
ldint 4
call factorial(Int)
ret
}
";
    assert_eq!(run_main(source_text), 24);
}

#[test]
fn a_float_comparison_drives_a_conditional_branch() {
    let source_text = "\
func main() Int {
.locals 0
ldfloat 2.5
ldfloat 5.0
blt 5
ldint 0
ret
ldint 15
ret
}
";
    assert_eq!(run_main(source_text), 15);
}

#[test]
fn arrays_store_and_load_an_element() {
    let source_text = "\
func main() Int {
.locals 1
.local 0 Int[]
ldint 3
newarr Int
stloc 0
ldloc 0
ldint 1
ldint 5
stelem Int
ldloc 0
ldint 1
ldelem Int
ret
}
";
    assert_eq!(run_main(source_text), 5);
}

#[test]
fn callvirt_dispatches_to_the_overriding_subclass_method() {
    // A call site statically typed against `Shape::area()` must still run
    // `Circle::area()` for a `Circle` receiver: real vtable dispatch, not
    // the static call target, decides which body runs.
    let source_text = "\
class Object {
}

class Shape extends Object {
}

class Circle extends Shape {
}

member func Shape::area() Int {
.locals 0
@ virtual()
ldint 1
ret
}

member func Circle::area() Int {
.locals 0
@ virtual()
ldint 2
ret
}

func main() Int {
.locals 0
newobj Circle::.constructor()
callvirt Shape::area()
ret
}
";
    assert_eq!(run_main(source_text), 2);
}

#[test]
fn calling_the_same_function_twice_reuses_the_already_compiled_entry_point() {
    let source_text = "\
func inc(Int) Int {
.locals 0
ldarg 0
ldint 1
add
ret
}

func main() Int {
.locals 0
ldint 0
call inc(Int)
call inc(Int)
call inc(Int)
ret
}
";
    assert_eq!(run_main(source_text), 3);
}
