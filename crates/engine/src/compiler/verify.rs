//! The verifier: a single forward pass over a function's instructions that
//! checks the invariants §3 lists (stack underflow, branch targets in
//! range, known locals/arguments, resolvable calls) and records, for every
//! instruction, the static type of each value already on the operand stack
//! before it runs. C6 consults this to choose the integer or SSE lowering
//! for polymorphic opcodes and to resolve field/array element types.

use crate::class::ClassMetadata;
use crate::error::VerifyError;
use crate::instruction::{Instruction, OpCode, Operand};
use crate::signature::ManagedFunction;
use crate::types::Type;
use rustc_hash::FxHashMap;
use std::rc::Rc;

pub struct Verified {
    /// Operand-stack type snapshot immediately before executing
    /// instruction `i` (bottom-to-top order).
    pub pre_state: Vec<Vec<Type>>,
    pub max_stack_depth: usize,
}

fn root_object() -> Type {
    Type::Class("Object".into())
}

pub fn verify(
    classes: &FxHashMap<String, Rc<ClassMetadata>>,
    functions: &FxHashMap<String, Rc<ManagedFunction>>,
    function: &ManagedFunction,
) -> Result<Verified, VerifyError> {
    let name = function.signature();
    let mut stack: Vec<Type> = Vec::new();
    let mut pre_state = Vec::with_capacity(function.instructions.len());
    let mut max_depth = 0usize;

    let pop = |stack: &mut Vec<Type>, index: usize| -> Result<Type, VerifyError> {
        stack.pop().ok_or_else(|| VerifyError::StackUnderflow {
            function: name.clone(),
            index,
        })
    };

    for (index, instruction) in function.instructions.iter().enumerate() {
        pre_state.push(stack.clone());
        lower_one(&name, classes, functions, function, instruction, index, &mut stack, &pop)?;
        max_depth = max_depth.max(stack.len());

        if instruction.opcode.is_branch() {
            let target = instruction.branch_target().ok_or_else(|| VerifyError::InvalidBranchTarget {
                function: name.clone(),
                index,
                target: usize::MAX,
            })?;
            if target >= function.instructions.len() {
                return Err(VerifyError::InvalidBranchTarget {
                    function: name.clone(),
                    index,
                    target,
                });
            }
        }
    }

    Ok(Verified { pre_state, max_stack_depth: max_depth })
}

type PopFn<'a> = dyn Fn(&mut Vec<Type>, usize) -> Result<Type, VerifyError> + 'a;

fn lower_one(
    name: &str,
    classes: &FxHashMap<String, Rc<ClassMetadata>>,
    functions: &FxHashMap<String, Rc<ManagedFunction>>,
    function: &ManagedFunction,
    instruction: &Instruction,
    index: usize,
    stack: &mut Vec<Type>,
    pop: &PopFn,
) -> Result<(), VerifyError> {
    use OpCode::*;
    match instruction.opcode {
        Nop => {}
        Pop => {
            pop(stack, index)?;
        }
        Duplicate => {
            let top = pop(stack, index)?;
            stack.push(top.clone());
            stack.push(top);
        }
        LoadInt => stack.push(Type::Int),
        LoadFloat => stack.push(Type::Float),
        LoadChar => stack.push(Type::Char),
        LoadTrue | LoadFalse => stack.push(Type::Bool),
        LoadNull => stack.push(root_object()),
        LoadString => stack.push(Type::Class("String".into())),
        LoadLocal => {
            let n = operand_index(instruction);
            let ty = function.locals.get(n).cloned().ok_or_else(|| VerifyError::UnknownLocal {
                function: name.to_string(),
                index,
                local: n,
            })?;
            stack.push(ty);
        }
        StoreLocal => {
            let n = operand_index(instruction);
            if n >= function.locals.len() {
                return Err(VerifyError::UnknownLocal {
                    function: name.to_string(),
                    index,
                    local: n,
                });
            }
            pop(stack, index)?;
        }
        LoadArg => {
            let n = operand_index(instruction);
            let ty = function
                .definition
                .parameters
                .get(n)
                .cloned()
                .ok_or_else(|| VerifyError::UnknownArgument {
                    function: name.to_string(),
                    index,
                    argument: n,
                })?;
            stack.push(ty);
        }
        Add | Sub | Mul | Div | And | Or => {
            pop(stack, index)?;
            let a = pop(stack, index)?;
            stack.push(a);
        }
        Not => {
            let a = pop(stack, index)?;
            stack.push(a);
        }
        ConvertIntToFloat => {
            pop(stack, index)?;
            stack.push(Type::Float);
        }
        ConvertFloatToInt => {
            pop(stack, index)?;
            stack.push(Type::Int);
        }
        CompareEqual | CompareNotEqual | CompareGreaterThan | CompareGreaterThanOrEqual | CompareLessThan
        | CompareLessThanOrEqual => {
            pop(stack, index)?;
            pop(stack, index)?;
            stack.push(Type::Bool);
        }
        Branch => {}
        BranchEqual | BranchNotEqual | BranchGreaterThan | BranchGreaterThanOrEqual | BranchLessThan
        | BranchLessThanOrEqual => {
            pop(stack, index)?;
            pop(stack, index)?;
        }
        Call | CallInstance | CallVirtual => {
            let target = match &instruction.operand {
                Operand::Call(t) => t,
                _ => unreachable!("call opcodes always carry a CallTarget operand"),
            };
            let mut arity = target.parameters.len();
            if instruction.opcode != Call {
                arity += 1; // `this`
            }
            for _ in 0..arity {
                pop(stack, index)?;
            }
            let signature = target.signature();
            let return_type = functions
                .get(&signature)
                .map(|f| f.definition.return_type.clone())
                .ok_or_else(|| VerifyError::UnresolvedCall {
                    function: name.to_string(),
                    index,
                    signature,
                })?;
            if return_type != Type::Void {
                stack.push(return_type);
            }
        }
        NewObject => {
            let class_name = match &instruction.operand {
                Operand::NewObject(c) => c.clone(),
                _ => unreachable!("NewObject always carries a class name operand"),
            };
            stack.push(Type::Class(class_name));
        }
        NewArray => {
            let elem = match &instruction.operand {
                Operand::Name(t) => Type::parse(t).unwrap_or(Type::Int),
                _ => Type::Int,
            };
            pop(stack, index)?; // length
            stack.push(Type::Array(Box::new(elem)));
        }
        LoadArrayLength => {
            pop(stack, index)?;
            stack.push(Type::Int);
        }
        LoadElement => {
            pop(stack, index)?; // index
            let array_ty = pop(stack, index)?;
            let elem = match array_ty {
                Type::Array(t) => *t,
                _ => Type::Int,
            };
            stack.push(elem);
        }
        StoreElement => {
            pop(stack, index)?; // value
            pop(stack, index)?; // index
            pop(stack, index)?; // array ref
        }
        LoadField => {
            let field_name = field_operand(instruction);
            let owner = pop(stack, index)?;
            let ty = resolve_field_type(classes, &owner, &field_name);
            stack.push(ty);
        }
        StoreField => {
            let _field_name = field_operand(instruction);
            pop(stack, index)?; // value
            pop(stack, index)?; // ref
        }
        Ret => {
            if function.definition.return_type != Type::Void {
                pop(stack, index)?;
            }
        }
    }
    Ok(())
}

fn operand_index(instruction: &Instruction) -> usize {
    match instruction.operand {
        Operand::Int(n) => n as usize,
        _ => unreachable!("local/arg opcodes always carry an integer index operand"),
    }
}

fn field_operand(instruction: &Instruction) -> String {
    match &instruction.operand {
        Operand::Name(n) => n.clone(),
        _ => unreachable!("field opcodes always carry a name operand"),
    }
}

fn resolve_field_type(classes: &FxHashMap<String, Rc<ClassMetadata>>, owner: &Type, field: &str) -> Type {
    if let Type::Class(class_name) = owner {
        if let Some(class) = classes.get(class_name) {
            if let Some(f) = class.fields.iter().find(|f| f.name == field) {
                return f.ty.clone();
            }
        }
    }
    Type::Int
}
