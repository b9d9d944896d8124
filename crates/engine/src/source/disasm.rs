//! The disassembler's surface-syntax pretty-printer: the inverse of
//! `parser::parse`, used by `stackasm -d` and by the image round-trip test
//! (§8 "disassemble(assemble(S)) == canonicalize(S)").

use crate::image::ImageContents;
use crate::instruction::{Instruction, OpCode, Operand};
use crate::types::Type;

pub fn disassemble(contents: &ImageContents) -> String {
    let mut out = String::new();

    for class in &contents.classes {
        match &class.parent {
            Some(parent) => out.push_str(&format!("class {} extends {} {{\n", class.name, parent)),
            None => out.push_str(&format!("class {} {{\n", class.name)),
        }
        for (name, ty) in &class.fields {
            out.push_str(&format!("    {name} {ty}\n"));
        }
        out.push_str("}\n\n");
    }

    for extern_def in &contents.externs {
        out.push_str(&format!("extern func {}({}) {}\n\n", extern_def.name, join_types(extern_def.signature_parameters()), extern_def.return_type));
    }

    for function in &contents.functions {
        let def = &function.definition;
        if def.is_member {
            let owner = def.owner.as_deref().unwrap_or("?");
            out.push_str(&format!(
                "member func {}::{}({}) {} {{\n",
                owner,
                def.name,
                join_types(def.signature_parameters()),
                def.return_type
            ));
        } else {
            out.push_str(&format!("func {}({}) {} {{\n", def.name, join_types(def.signature_parameters()), def.return_type));
        }

        out.push_str(&format!("    .locals {}\n", function.locals.len()));
        for (i, ty) in function.locals.iter().enumerate() {
            out.push_str(&format!("    .local {i} {ty}\n"));
        }
        for (name, values) in &function.attributes {
            let rendered =
                values.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(" ");
            out.push_str(&format!("    @ {name}({rendered})\n"));
        }
        for instruction in &function.instructions {
            out.push_str("    ");
            out.push_str(&render_instruction(instruction, &function.string_table));
            out.push('\n');
        }
        out.push_str("}\n\n");
    }

    out
}

fn join_types(types: &[Type]) -> String {
    types.iter().map(|t| t.to_string()).collect::<Vec<_>>().join(" ")
}

fn render_instruction(instruction: &Instruction, string_table: &[String]) -> String {
    use OpCode::*;
    let mnemonic = mnemonic_for(instruction.opcode);
    match &instruction.operand {
        Operand::None => mnemonic.to_string(),
        Operand::Int(v) => format!("{mnemonic} {v}"),
        Operand::Float(v) => format!("{mnemonic} {v}"),
        Operand::Char(v) => format!("{mnemonic} {v}"),
        Operand::StringConst(index) => {
            let text = string_table.get(*index as usize).map(String::as_str).unwrap_or("");
            format!("{mnemonic} \"{}\"", escape_string(text))
        }
        Operand::Name(name) => format!("{mnemonic} {name}"),
        Operand::NewObject(class) => format!("newobj {class}::.constructor()"),
        Operand::Call(target) => {
            let params = join_types(&target.parameters);
            match (&instruction.opcode, &target.class) {
                (CallInstance, Some(class)) | (CallVirtual, Some(class)) => {
                    format!("{mnemonic} {class}::{}({params})", target.name)
                }
                _ => format!("{mnemonic} {}({params})", target.name),
            }
        }
    }
}

fn escape_string(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn mnemonic_for(opcode: OpCode) -> &'static str {
    use OpCode::*;
    match opcode {
        Nop => "nop",
        Pop => "pop",
        Duplicate => "dup",
        LoadInt => "ldint",
        LoadFloat => "ldfloat",
        LoadChar => "ldchar",
        LoadTrue => "ldtrue",
        LoadFalse => "ldfalse",
        LoadNull => "ldnull",
        LoadString => "ldstr",
        LoadLocal => "ldloc",
        StoreLocal => "stloc",
        LoadArg => "ldarg",
        Add => "add",
        Sub => "sub",
        Mul => "mul",
        Div => "div",
        And => "and",
        Or => "or",
        Not => "not",
        ConvertIntToFloat => "convinttofloat",
        ConvertFloatToInt => "convfloattoint",
        CompareEqual => "cmpeq",
        CompareNotEqual => "cmpne",
        CompareGreaterThan => "cmpgt",
        CompareGreaterThanOrEqual => "cmpge",
        CompareLessThan => "cmplt",
        CompareLessThanOrEqual => "cmple",
        Branch => "br",
        BranchEqual => "beq",
        BranchNotEqual => "bne",
        BranchGreaterThan => "bgt",
        BranchGreaterThanOrEqual => "bge",
        BranchLessThan => "blt",
        BranchLessThanOrEqual => "ble",
        Call => "call",
        CallInstance => "callinst",
        CallVirtual => "callvirt",
        NewObject => "newobj",
        NewArray => "newarr",
        LoadArrayLength => "ldlen",
        LoadElement => "ldelem",
        StoreElement => "stelem",
        LoadField => "ldfield",
        StoreField => "stfield",
        Ret => "ret",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::parser::parse;

    #[test]
    fn round_trips_a_simple_function() {
        let source = "func main() Int {\n    .locals 1\n    .local 0 Int\n    ldint 42\n    stloc 0\n    ldloc 0\n    ret\n}\n\n";
        let contents = parse(source).unwrap();
        let printed = disassemble(&contents);
        let reparsed = parse(&printed).unwrap();
        assert_eq!(reparsed.functions[0].instructions, contents.functions[0].instructions);
    }
}
