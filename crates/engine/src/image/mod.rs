//! C8: the binary image format.
//!
//! Every numeric field is stored as a little-endian `u64`, even the
//! logically 32-bit ones (array lengths, `Int`/`Float`/`Char` literals,
//! branch targets): one width throughout keeps the reader free of
//! per-field size bookkeeping, at the cost of a few padding bytes per
//! instruction (an Open Question resolved this way rather than packing
//! tightly).
//!
//! The format separates class/function *definitions*, read eagerly so the
//! whole image's signatures are known up front, from function *bodies*
//! (instructions, locals, string table), which this loader currently also
//! decodes eagerly into a resident `ManagedFunction` — lazy compilation
//! happens at the machine-code level (§4.7), not at the body-decoding
//! level, so there is no separate benefit to deferring parsing here.

use crate::class::ClassMetadata;
use crate::error::LoadError;
use crate::instruction::{CallTarget, Instruction, OpCode, Operand};
use crate::runtime::VMState;
use crate::signature::{FunctionDefinition, ManagedFunction};
use crate::types::Type;

const MAGIC: &[u8; 4] = b"SJIT";
const VERSION: u64 = 1;

/// A class as declared in source, before `ClassMetadata::build` resolves
/// field offsets and the vtable against its (already-loaded) parent.
#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub name: String,
    pub parent: Option<String>,
    pub fields: Vec<(String, Type)>,
    pub virtuals: Vec<String>,
}

/// Everything needed to write or load one complete image.
#[derive(Debug, Clone, Default)]
pub struct ImageContents {
    /// Parent-before-child order; the loader relies on this (§3 invariant).
    pub classes: Vec<ClassDecl>,
    pub externs: Vec<FunctionDefinition>,
    pub functions: Vec<ManagedFunction>,
}

pub fn encode(contents: &ImageContents) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    write_u64(&mut buf, VERSION);
    write_u64(&mut buf, contents.classes.len() as u64);
    write_u64(&mut buf, contents.externs.len() as u64);
    write_u64(&mut buf, contents.functions.len() as u64);

    for class in &contents.classes {
        write_class_decl(&mut buf, class);
    }
    for ext in &contents.externs {
        write_definition(&mut buf, ext);
    }
    for function in &contents.functions {
        write_function(&mut buf, function);
    }
    buf
}

/// Decodes `bytes` into the class/extern/function declarations it holds,
/// without installing them anywhere — used by `stackasm -d` to print an
/// image's surface syntax without needing a running `VMState`.
pub fn decode(bytes: &[u8]) -> Result<ImageContents, LoadError> {
    let mut r = Reader::new(bytes);
    let magic = r.read_bytes(4)?;
    if magic != MAGIC {
        return Err(LoadError::MalformedImage("bad magic".into()));
    }
    let version = r.read_u64()?;
    if version != VERSION {
        return Err(LoadError::MalformedImage(format!("unsupported image version {version}")));
    }
    let class_count = r.read_u64()?;
    let extern_count = r.read_u64()?;
    let function_count = r.read_u64()?;

    let mut contents = ImageContents::default();
    for _ in 0..class_count {
        contents.classes.push(read_class_decl(&mut r)?);
    }
    for _ in 0..extern_count {
        contents.externs.push(read_definition(&mut r, false)?);
    }
    for _ in 0..function_count {
        contents.functions.push(read_function(&mut r)?);
    }
    Ok(contents)
}

/// Loads every class and function definition in `bytes` into `vm`, in the
/// order encountered. Classes must appear parent-before-child; functions
/// may reference any class or function already loaded (§3).
pub fn load(bytes: &[u8], vm: &mut VMState) -> Result<(), LoadError> {
    install(decode(bytes)?, vm)
}

/// Defines every class (parent-before-child), extern, and managed function
/// in `contents` into `vm`. Shared by the binary loader above and the
/// textual source loader (`source::load_source`), since both produce the
/// same `ImageContents` shape before installation.
pub fn install(contents: ImageContents, vm: &mut VMState) -> Result<(), LoadError> {
    for decl in contents.classes {
        let parent = match &decl.parent {
            Some(name) => Some(
                vm.classes
                    .get(name)
                    .cloned()
                    .ok_or_else(|| LoadError::UnknownClass(name.clone()))?,
            ),
            None => None,
        };
        let metadata = ClassMetadata::build(decl.name, parent.as_deref(), decl.fields, decl.virtuals);
        vm.define_class(metadata)?;
    }

    for definition in contents.externs {
        let signature = definition.signature();
        if vm.externs.contains_key(&signature) || vm.functions.contains_key(&signature) {
            return Err(LoadError::DuplicateFunction(signature));
        }
        vm.externs.insert(signature, std::rc::Rc::new(definition));
    }

    for function in contents.functions {
        vm.define_function(function)?;
    }

    vm.link_vtables().map_err(|e| LoadError::MalformedImage(e.to_string()))?;

    Ok(())
}

fn write_class_decl(buf: &mut Vec<u8>, class: &ClassDecl) {
    write_string(buf, &class.name);
    write_option_string(buf, class.parent.as_deref());
    write_u64(buf, class.fields.len() as u64);
    for (name, ty) in &class.fields {
        write_string(buf, name);
        write_type(buf, ty);
    }
    write_u64(buf, class.virtuals.len() as u64);
    for sig in &class.virtuals {
        write_string(buf, sig);
    }
}

fn read_class_decl(r: &mut Reader) -> Result<ClassDecl, LoadError> {
    let name = r.read_string()?;
    let parent = r.read_option_string()?;
    let field_count = r.read_u64()?;
    let mut fields = Vec::with_capacity(field_count as usize);
    for _ in 0..field_count {
        let field_name = r.read_string()?;
        let ty = r.read_type()?;
        fields.push((field_name, ty));
    }
    let virtual_count = r.read_u64()?;
    let mut virtuals = Vec::with_capacity(virtual_count as usize);
    for _ in 0..virtual_count {
        virtuals.push(r.read_string()?);
    }
    Ok(ClassDecl { name, parent, fields, virtuals })
}

fn write_definition(buf: &mut Vec<u8>, def: &FunctionDefinition) {
    write_string(buf, &def.name);
    buf.push(def.is_member as u8);
    write_option_string(buf, def.owner.as_deref());
    write_u64(buf, def.parameters.len() as u64);
    for ty in &def.parameters {
        write_type(buf, ty);
    }
    write_type(buf, &def.return_type);
}

fn read_definition(r: &mut Reader, is_managed: bool) -> Result<FunctionDefinition, LoadError> {
    let name = r.read_string()?;
    let is_member = r.read_u8()? != 0;
    let owner = r.read_option_string()?;
    let param_count = r.read_u64()?;
    let mut parameters = Vec::with_capacity(param_count as usize);
    for _ in 0..param_count {
        parameters.push(r.read_type()?);
    }
    let return_type = r.read_type()?;
    Ok(FunctionDefinition::new(name, parameters, return_type, is_managed, is_member, owner))
}

fn write_function(buf: &mut Vec<u8>, function: &ManagedFunction) {
    write_definition(buf, &function.definition);
    write_u64(buf, function.locals.len() as u64);
    for ty in &function.locals {
        write_type(buf, ty);
    }
    write_u64(buf, function.string_table.len() as u64);
    for s in &function.string_table {
        write_string(buf, s);
    }
    write_u64(buf, function.instructions.len() as u64);
    for instruction in &function.instructions {
        write_instruction(buf, instruction);
    }
}

fn read_function(r: &mut Reader) -> Result<ManagedFunction, LoadError> {
    let definition = read_definition(r, true)?;
    let local_count = r.read_u64()?;
    let mut locals = Vec::with_capacity(local_count as usize);
    for _ in 0..local_count {
        locals.push(r.read_type()?);
    }
    let string_count = r.read_u64()?;
    let mut string_table = Vec::with_capacity(string_count as usize);
    for _ in 0..string_count {
        string_table.push(r.read_string()?);
    }
    let instruction_count = r.read_u64()?;
    let mut instructions = Vec::with_capacity(instruction_count as usize);
    for _ in 0..instruction_count {
        instructions.push(read_instruction(r)?);
    }
    let mut function = ManagedFunction::new(definition, instructions, locals);
    function.string_table = string_table;
    Ok(function)
}

fn write_instruction(buf: &mut Vec<u8>, instruction: &Instruction) {
    buf.push(opcode_tag(instruction.opcode));
    match &instruction.operand {
        Operand::None => {}
        Operand::Int(v) => write_u64(buf, *v as i64 as u64),
        Operand::Float(v) => write_u64(buf, v.to_bits() as u64),
        Operand::Char(v) => write_u64(buf, *v as u64),
        Operand::StringConst(v) => write_u64(buf, *v as u64),
        Operand::Name(name) => write_string(buf, name),
        Operand::NewObject(name) => write_string(buf, name),
        Operand::Call(target) => write_call_target(buf, target),
    }
}

fn read_instruction(r: &mut Reader) -> Result<Instruction, LoadError> {
    let tag = r.read_u8()?;
    let opcode = opcode_from_tag(tag)?;
    let operand = match opcode {
        OpCode::LoadInt => Operand::Int(r.read_u64()? as i64 as i32),
        OpCode::LoadFloat => Operand::Float(f32::from_bits(r.read_u64()? as u32)),
        OpCode::LoadChar => Operand::Char(r.read_u64()? as u8),
        OpCode::LoadString => Operand::StringConst(r.read_u64()? as u32),
        OpCode::LoadLocal | OpCode::StoreLocal | OpCode::LoadArg => Operand::Int(r.read_u64()? as i64 as i32),
        op if op.is_branch() => Operand::Int(r.read_u64()? as i64 as i32),
        OpCode::NewObject => Operand::NewObject(r.read_string()?),
        OpCode::NewArray | OpCode::LoadField | OpCode::StoreField => Operand::Name(r.read_string()?),
        OpCode::Call | OpCode::CallInstance | OpCode::CallVirtual => Operand::Call(read_call_target(r)?),
        _ => Operand::None,
    };
    Ok(Instruction::new(opcode, operand))
}

fn write_call_target(buf: &mut Vec<u8>, target: &CallTarget) {
    write_string(buf, &target.name);
    write_option_string(buf, target.class.as_deref());
    write_u64(buf, target.parameters.len() as u64);
    for ty in &target.parameters {
        write_type(buf, ty);
    }
}

fn read_call_target(r: &mut Reader) -> Result<CallTarget, LoadError> {
    let name = r.read_string()?;
    let class = r.read_option_string()?;
    let param_count = r.read_u64()?;
    let mut parameters = Vec::with_capacity(param_count as usize);
    for _ in 0..param_count {
        parameters.push(r.read_type()?);
    }
    Ok(CallTarget { name, class, parameters })
}

fn opcode_tag(op: OpCode) -> u8 {
    use OpCode::*;
    match op {
        Nop => 0,
        Pop => 1,
        Duplicate => 2,
        LoadInt => 3,
        LoadFloat => 4,
        LoadChar => 5,
        LoadTrue => 6,
        LoadFalse => 7,
        LoadNull => 8,
        LoadString => 9,
        LoadLocal => 10,
        StoreLocal => 11,
        LoadArg => 12,
        Add => 13,
        Sub => 14,
        Mul => 15,
        Div => 16,
        And => 17,
        Or => 18,
        Not => 19,
        ConvertIntToFloat => 20,
        ConvertFloatToInt => 21,
        CompareEqual => 22,
        CompareNotEqual => 23,
        CompareGreaterThan => 24,
        CompareGreaterThanOrEqual => 25,
        CompareLessThan => 26,
        CompareLessThanOrEqual => 27,
        Branch => 28,
        BranchEqual => 29,
        BranchNotEqual => 30,
        BranchGreaterThan => 31,
        BranchGreaterThanOrEqual => 32,
        BranchLessThan => 33,
        BranchLessThanOrEqual => 34,
        Call => 35,
        CallInstance => 36,
        CallVirtual => 37,
        NewObject => 38,
        NewArray => 39,
        LoadArrayLength => 40,
        LoadElement => 41,
        StoreElement => 42,
        LoadField => 43,
        StoreField => 44,
        Ret => 45,
    }
}

fn opcode_from_tag(tag: u8) -> Result<OpCode, LoadError> {
    use OpCode::*;
    Ok(match tag {
        0 => Nop,
        1 => Pop,
        2 => Duplicate,
        3 => LoadInt,
        4 => LoadFloat,
        5 => LoadChar,
        6 => LoadTrue,
        7 => LoadFalse,
        8 => LoadNull,
        9 => LoadString,
        10 => LoadLocal,
        11 => StoreLocal,
        12 => LoadArg,
        13 => Add,
        14 => Sub,
        15 => Mul,
        16 => Div,
        17 => And,
        18 => Or,
        19 => Not,
        20 => ConvertIntToFloat,
        21 => ConvertFloatToInt,
        22 => CompareEqual,
        23 => CompareNotEqual,
        24 => CompareGreaterThan,
        25 => CompareGreaterThanOrEqual,
        26 => CompareLessThan,
        27 => CompareLessThanOrEqual,
        28 => Branch,
        29 => BranchEqual,
        30 => BranchNotEqual,
        31 => BranchGreaterThan,
        32 => BranchGreaterThanOrEqual,
        33 => BranchLessThan,
        34 => BranchLessThanOrEqual,
        35 => Call,
        36 => CallInstance,
        37 => CallVirtual,
        38 => NewObject,
        39 => NewArray,
        40 => LoadArrayLength,
        41 => LoadElement,
        42 => StoreElement,
        43 => LoadField,
        44 => StoreField,
        45 => Ret,
        other => return Err(LoadError::MalformedImage(format!("unknown opcode tag {other}"))),
    })
}

fn write_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_u64(buf, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

fn write_option_string(buf: &mut Vec<u8>, s: Option<&str>) {
    match s {
        Some(s) => {
            buf.push(1);
            write_string(buf, s);
        }
        None => buf.push(0),
    }
}

fn write_type(buf: &mut Vec<u8>, ty: &Type) {
    write_string(buf, &ty.to_string());
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes, pos: 0 }
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], LoadError> {
        if self.pos + n > self.bytes.len() {
            return Err(LoadError::UnexpectedEof);
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, LoadError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u64(&mut self) -> Result<u64, LoadError> {
        let bytes: [u8; 8] = self.read_bytes(8)?.try_into().expect("read_bytes(8) returns 8 bytes");
        Ok(u64::from_le_bytes(bytes))
    }

    fn read_string(&mut self) -> Result<String, LoadError> {
        let len = self.read_u64()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| LoadError::MalformedImage(e.to_string()))
    }

    fn read_option_string(&mut self) -> Result<Option<String>, LoadError> {
        if self.read_u8()? != 0 {
            Ok(Some(self.read_string()?))
        } else {
            Ok(None)
        }
    }

    fn read_type(&mut self) -> Result<Type, LoadError> {
        let spelling = self.read_string()?;
        Type::parse(&spelling).ok_or_else(|| LoadError::UnknownType(spelling))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;

    fn sample() -> ImageContents {
        let object = ClassDecl { name: "Object".into(), parent: None, fields: vec![], virtuals: vec![] };
        let point = ClassDecl {
            name: "Point".into(),
            parent: Some("Object".into()),
            fields: vec![("x".into(), Type::Int), ("y".into(), Type::Int)],
            virtuals: vec![],
        };
        let main_def = FunctionDefinition::new("main", vec![], Type::Int, true, false, None);
        let main_body = ManagedFunction::new(
            main_def,
            vec![Instruction::new(OpCode::LoadInt, Operand::Int(42)), Instruction::new(OpCode::Ret, Operand::None)],
            vec![],
        );
        ImageContents { classes: vec![object, point], externs: vec![], functions: vec![main_body] }
    }

    #[test]
    fn round_trips_classes_and_functions() {
        let contents = sample();
        let bytes = encode(&contents);
        let mut vm = VMState::new(VmConfig::default());
        load(&bytes, &mut vm).unwrap();
        assert!(vm.classes.contains_key("Point"));
        assert_eq!(vm.classes["Point"].field_offset("x"), Some(crate::class::OBJECT_HEADER_SIZE));
        let main = vm.lookup("main()").unwrap();
        assert_eq!(main.instructions.len(), 2);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut vm = VMState::new(VmConfig::default());
        let err = load(b"NOPE", &mut vm).unwrap_err();
        assert!(matches!(err, LoadError::MalformedImage(_)));
    }

    #[test]
    fn duplicate_function_across_load_is_rejected() {
        let contents = sample();
        let bytes = encode(&contents);
        let mut vm = VMState::new(VmConfig::default());
        load(&bytes, &mut vm).unwrap();
        let err = load(&bytes, &mut vm).unwrap_err();
        assert!(matches!(err, LoadError::DuplicateClass(_)));
    }
}
