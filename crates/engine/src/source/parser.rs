//! Recursive-descent parser over the tokenized surface syntax. Builds the
//! in-memory `FunctionDefinition`/`ManagedFunction`/`ClassDecl` structures
//! directly; there is no separate AST stage.
//!
//! Top-level declarations: `func name(T…) R { … }`, `extern func name(T…)
//! R`, `member func Class::m(T…) R { … }`, `class Name [extends Parent] {
//! @attr(k=v)* name Type* }`. Mnemonics mirror the original tool's bytecode
//! parser (`ldint`, `ldloc`, `callvirt`, `newobj`, `br`/`beq`/…) one for
//! one, case-insensitively.
//!
//! A `member func` tagged with the `@virtual()` attribute is registered
//! into its owning class's vtable (`ClassDecl::virtuals`) rather than only
//! being callable by static signature; the class body itself carries no
//! virtual-method syntax; of its own, only fields.

use super::lexer::{tokenize, Token};
use crate::error::LoadError;
use crate::image::{ClassDecl, ImageContents};
use crate::instruction::{CallTarget, Instruction, OpCode, Operand};
use crate::signature::{FunctionDefinition, ManagedFunction};
use crate::types::Type;

pub fn parse(source: &str) -> Result<ImageContents, LoadError> {
    let tokens = tokenize(source)?;
    let mut p = Parser { tokens, pos: 0 };
    let mut contents = ImageContents::default();
    // (owner class, qualified signature) pairs for member funcs marked `@virtual()`,
    // applied to `contents.classes` once every declaration has been seen so that
    // member funcs and their owning `class` block may appear in either order.
    let mut pending_virtuals: Vec<(String, String)> = Vec::new();

    while !p.at_end() {
        match p.peek_text()?.to_ascii_lowercase().as_str() {
            "func" => {
                p.advance();
                let (name, parameters, return_type) = p.parse_signature()?;
                if name.contains("::") {
                    return Err(p.err("'::' is only allowed in member functions"));
                }
                let definition = FunctionDefinition::new(name, parameters, return_type, true, false, None);
                let function = p.parse_function_body(definition)?;
                contents.functions.push(function);
            }
            "extern" => {
                p.advance();
                p.expect_word("func")?;
                let (name, parameters, return_type) = p.parse_signature()?;
                contents.externs.push(FunctionDefinition::new(name, parameters, return_type, false, false, None));
            }
            "member" => {
                p.advance();
                p.expect_word("func")?;
                let (qualified, mut parameters, return_type) = p.parse_signature()?;
                let (owner, method) = qualified
                    .split_once("::")
                    .ok_or_else(|| p.err("expected '::' in member function name"))?;
                let owner = owner.to_string();
                parameters.insert(0, Type::Class(owner.clone()));
                let definition =
                    FunctionDefinition::new(method.to_string(), parameters, return_type, true, true, Some(owner.clone()));
                let function = p.parse_function_body(definition)?;
                if function.attributes.iter().any(|(name, _)| name == "virtual") {
                    pending_virtuals.push((owner, function.signature()));
                }
                contents.functions.push(function);
            }
            "class" => {
                p.advance();
                let name = p.next_word()?;
                let parent = if p.peek_text().map(|t| t.eq_ignore_ascii_case("extends")).unwrap_or(false) {
                    p.advance();
                    Some(p.next_word()?)
                } else {
                    None
                };
                let decl = p.parse_class_body(name, parent)?;
                contents.classes.push(decl);
            }
            other => return Err(p.err(format!("invalid top-level identifier '{other}'"))),
        }
    }

    for (owner, signature) in pending_virtuals {
        let class = contents
            .classes
            .iter_mut()
            .find(|c| c.name == owner)
            .ok_or_else(|| p.err(format!("'@virtual' member function names unknown class '{owner}'")))?;
        class.virtuals.push(signature);
    }

    Ok(contents)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn current_line(&self) -> usize {
        self.tokens.get(self.pos).or_else(|| self.tokens.last()).map(|t| t.line).unwrap_or(0)
    }

    fn err(&self, message: impl Into<String>) -> LoadError {
        LoadError::Syntax { line: self.current_line(), message: message.into() }
    }

    fn peek_text(&self) -> Result<&str, LoadError> {
        self.tokens.get(self.pos).map(|t| t.text.as_str()).ok_or(LoadError::UnexpectedEof)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn next_word(&mut self) -> Result<String, LoadError> {
        let token = self.tokens.get(self.pos).ok_or(LoadError::UnexpectedEof)?;
        let text = token.text.clone();
        self.advance();
        Ok(text)
    }

    fn expect_word(&mut self, expected: &str) -> Result<(), LoadError> {
        let word = self.next_word()?;
        if word != expected {
            return Err(self.err(format!("expected '{expected}', found '{word}'")));
        }
        Ok(())
    }

    fn next_int(&mut self) -> Result<i64, LoadError> {
        let word = self.next_word()?;
        word.parse::<i64>().map_err(|_| self.err(format!("expected integer, found '{word}'")))
    }

    fn next_type(&mut self) -> Result<Type, LoadError> {
        let word = self.next_word()?;
        Type::parse(&word).ok_or_else(|| LoadError::UnknownType(word))
    }

    /// `name(T…) R`, common to `func`, `extern func`, and `member func`.
    fn parse_signature(&mut self) -> Result<(String, Vec<Type>, Type), LoadError> {
        let name = self.next_word()?;
        self.expect_word("(")?;
        let mut parameters = Vec::new();
        loop {
            if self.peek_text()? == ")" {
                self.advance();
                break;
            }
            parameters.push(self.next_type()?);
        }
        let return_type = self.next_type()?;
        Ok((name, parameters, return_type))
    }

    fn parse_attribute(&mut self) -> Result<(String, Vec<(String, String)>), LoadError> {
        let name = self.next_word()?;
        self.expect_word("(")?;
        let mut values = Vec::new();
        loop {
            let key = self.next_word()?;
            if key == ")" {
                break;
            }
            self.expect_word("=")?;
            let value = self.next_word()?;
            values.push((key, value));
        }
        Ok((name, values))
    }

    fn parse_function_body(&mut self, definition: FunctionDefinition) -> Result<ManagedFunction, LoadError> {
        self.expect_word("{")?;
        let mut instructions = Vec::new();
        let mut locals: Vec<Type> = Vec::new();
        let mut locals_set = false;
        let mut string_table: Vec<String> = Vec::new();
        let mut attributes = Vec::new();

        loop {
            let word = self.next_word()?;
            if word == "}" {
                break;
            }

            match word.as_str() {
                "@" => {
                    attributes.push(self.parse_attribute()?);
                }
                ".locals" => {
                    if locals_set {
                        return Err(self.err("the locals has already been set"));
                    }
                    let count = self.next_int()?;
                    if count < 0 {
                        return Err(self.err("the number of locals must be >= 0"));
                    }
                    locals = vec![Type::Int; count as usize];
                    locals_set = true;
                }
                ".local" => {
                    if !locals_set {
                        return Err(self.err("the locals must be set before '.local'"));
                    }
                    let index = self.next_int()?;
                    let ty = self.next_type()?;
                    let slot = locals
                        .get_mut(index as usize)
                        .ok_or_else(|| self.err(format!("invalid local index {index}")))?;
                    *slot = ty;
                }
                mnemonic => {
                    instructions.push(self.parse_instruction(mnemonic, &mut string_table)?);
                }
            }
        }

        let mut function = ManagedFunction::new(definition, instructions, locals);
        function.string_table = string_table;
        function.attributes = attributes;
        Ok(function)
    }

    fn parse_instruction(&mut self, mnemonic: &str, string_table: &mut Vec<String>) -> Result<Instruction, LoadError> {
        let lower = mnemonic.to_ascii_lowercase();

        if let Some(opcode) = no_operand_opcode(&lower) {
            return Ok(Instruction::simple(opcode));
        }
        if let Some(opcode) = branch_opcode(&lower) {
            let target = self.next_int()?;
            return Ok(Instruction::new(opcode, Operand::Int(target as i32)));
        }
        if let Some(opcode) = name_operand_opcode(&lower) {
            let name = self.next_word()?;
            return Ok(Instruction::new(opcode, Operand::Name(name)));
        }

        match lower.as_str() {
            "ldint" => Ok(Instruction::new(OpCode::LoadInt, Operand::Int(self.next_int()? as i32))),
            "ldfloat" => {
                let word = self.next_word()?;
                let value: f32 = word.parse().map_err(|_| self.err(format!("expected float, found '{word}'")))?;
                Ok(Instruction::new(OpCode::LoadFloat, Operand::Float(value)))
            }
            "ldchar" => Ok(Instruction::new(OpCode::LoadChar, Operand::Char(self.next_int()? as u8))),
            "ldarg" => Ok(Instruction::new(OpCode::LoadArg, Operand::Int(self.next_int()? as i32))),
            "ldloc" | "stloc" => {
                let index = self.next_int()? as i32;
                let opcode = if lower == "ldloc" { OpCode::LoadLocal } else { OpCode::StoreLocal };
                Ok(Instruction::new(opcode, Operand::Int(index)))
            }
            "br" => Ok(Instruction::new(OpCode::Branch, Operand::Int(self.next_int()? as i32))),
            "ldstr" => {
                let text = self.next_word()?;
                let index = string_table.iter().position(|s| s == &text).unwrap_or_else(|| {
                    string_table.push(text.clone());
                    string_table.len() - 1
                });
                Ok(Instruction::new(OpCode::LoadString, Operand::StringConst(index as u32)))
            }
            "call" | "callinst" | "callvirt" => self.parse_call(&lower),
            "newobj" => self.parse_new_object(),
            other => Err(self.err(format!("'{other}' is not a valid instruction"))),
        }
    }

    fn parse_call(&mut self, mnemonic: &str) -> Result<Instruction, LoadError> {
        let is_instance = mnemonic == "callinst" || mnemonic == "callvirt";
        let is_virtual = mnemonic == "callvirt";
        let mut target_name = self.next_word()?;
        let class = if is_instance {
            let (class, method) = target_name
                .split_once("::")
                .ok_or_else(|| self.err("expected '::' in called member function"))?;
            let class = class.to_string();
            target_name = method.to_string();
            Some(class)
        } else {
            None
        };
        self.expect_word("(")?;
        let parameters = self.parse_call_parameters()?;
        let target = CallTarget { name: target_name, class, parameters };
        let opcode = if !is_instance {
            OpCode::Call
        } else if !is_virtual {
            OpCode::CallInstance
        } else {
            OpCode::CallVirtual
        };
        Ok(Instruction::new(opcode, Operand::Call(target)))
    }

    fn parse_new_object(&mut self) -> Result<Instruction, LoadError> {
        let target_name = self.next_word()?;
        let (class, ctor) =
            target_name.split_once("::").ok_or_else(|| self.err("expected '::' after the type in 'newobj'"))?;
        if ctor != ".constructor" {
            return Err(self.err("expected call to constructor"));
        }
        self.expect_word("(")?;
        let _parameters = self.parse_call_parameters()?;
        Ok(Instruction::new(OpCode::NewObject, Operand::NewObject(class.to_string())))
    }

    fn parse_call_parameters(&mut self) -> Result<Vec<Type>, LoadError> {
        let mut parameters = Vec::new();
        loop {
            if self.peek_text()? == ")" {
                self.advance();
                break;
            }
            parameters.push(self.next_type()?);
        }
        Ok(parameters)
    }

    fn parse_class_body(&mut self, name: String, parent: Option<String>) -> Result<ClassDecl, LoadError> {
        self.expect_word("{")?;
        let mut fields = Vec::new();

        loop {
            let word = self.next_word()?;
            if word == "}" {
                break;
            }
            if word == "@" {
                self.parse_attribute()?;
                continue;
            }
            let field_type = self.next_type()?;
            fields.push((word, field_type));
        }

        Ok(ClassDecl { name, parent, fields, virtuals: Vec::new() })
    }
}

fn no_operand_opcode(mnemonic: &str) -> Option<OpCode> {
    use OpCode::*;
    Some(match mnemonic {
        "nop" => Nop,
        "pop" => Pop,
        "dup" => Duplicate,
        "add" => Add,
        "sub" => Sub,
        "mul" => Mul,
        "div" => Div,
        "ldtrue" => LoadTrue,
        "ldfalse" => LoadFalse,
        "ldnull" => LoadNull,
        "and" => And,
        "or" => Or,
        "not" => Not,
        "convinttofloat" => ConvertIntToFloat,
        "convfloattoint" => ConvertFloatToInt,
        "cmpeq" => CompareEqual,
        "cmpne" => CompareNotEqual,
        "cmpgt" => CompareGreaterThan,
        "cmpge" => CompareGreaterThanOrEqual,
        "cmplt" => CompareLessThan,
        "cmple" => CompareLessThanOrEqual,
        "ldlen" => LoadArrayLength,
        "ret" => Ret,
        _ => return None,
    })
}

fn branch_opcode(mnemonic: &str) -> Option<OpCode> {
    use OpCode::*;
    Some(match mnemonic {
        "beq" => BranchEqual,
        "bne" => BranchNotEqual,
        "bgt" => BranchGreaterThan,
        "bge" => BranchGreaterThanOrEqual,
        "blt" => BranchLessThan,
        "ble" => BranchLessThanOrEqual,
        _ => return None,
    })
}

fn name_operand_opcode(mnemonic: &str) -> Option<OpCode> {
    use OpCode::*;
    Some(match mnemonic {
        "newarr" => NewArray,
        "stelem" => StoreElement,
        "ldelem" => LoadElement,
        "stfield" => StoreField,
        "ldfield" => LoadField,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_function() {
        let contents = parse("func main() Int {\n.locals 0\nldint 42\nret\n}").unwrap();
        assert_eq!(contents.functions.len(), 1);
        let main = &contents.functions[0];
        assert_eq!(main.signature(), "main()");
        assert_eq!(main.instructions.len(), 2);
    }

    #[test]
    fn parses_member_function_with_implicit_this() {
        let contents = parse("member func Point::getX() Int {\n.locals 0\nldarg 0\nldfield Point::x\nret\n}").unwrap();
        let getx = &contents.functions[0];
        assert_eq!(getx.definition.parameters[0], Type::Class("Point".into()));
        assert_eq!(getx.signature(), "Point::getX()");
    }

    #[test]
    fn parses_class_with_fields_and_parent() {
        let contents = parse("class Point extends Object {\nx Int\ny Int\n}").unwrap();
        let point = &contents.classes[0];
        assert_eq!(point.parent.as_deref(), Some("Object"));
        assert_eq!(point.fields.len(), 2);
    }

    #[test]
    fn interns_repeated_string_literals() {
        let contents = parse(r#"func f() Int { .locals 0 ldstr "hi" ldstr "hi" ldstr "bye" pop pop ldint 0 ret }"#).unwrap();
        let f = &contents.functions[0];
        assert_eq!(f.string_table, vec!["hi".to_string(), "bye".to_string()]);
    }

    #[test]
    fn rejects_unknown_instruction() {
        let err = parse("func f() Int {\n.locals 0\nbogus\n}").unwrap_err();
        assert!(matches!(err, LoadError::Syntax { .. }));
    }
}
