//! C6: lowers one verified function body to native x86-64, instruction by
//! instruction (§4.6). Local branches are left as zeroed placeholders with
//! a recorded `BranchFixup`; call sites are left as self-patching stubs
//! (§4.7) recorded as `StubSite`s, resolved the first time each one runs.

use crate::abi::CallingConvention;
use crate::asm::{Assembler, Condition, DataSize, ExtReg, FloatReg, IntReg, IntRegister, MemoryOperand};
use crate::class::{self, ClassMetadata};
use crate::error::EngineError;
use crate::instruction::{CallTarget, Instruction, OpCode, Operand};
use crate::runtime::entrypoints;
use crate::runtime::VMState;
use crate::signature::ManagedFunction;
use crate::types::Type;
use std::rc::Rc;

use super::prologue;
use super::stack::OperandStack;
use super::verify::Verified;
use super::{BranchFixup, CompiledBody, StubSite};

/// A scratch register never used by either calling convention's argument
/// classification, free to clobber across a runtime call without saving
/// it (§4.4).
const SCRATCH: IntRegister = IntRegister::Extended(ExtReg::R10);
const SCRATCH_2: IntRegister = IntRegister::Extended(ExtReg::R11);

struct Ctx<'a> {
    asm: Assembler,
    stack: OperandStack,
    vm_offsets: Vec<usize>,
    branch_fixups: Vec<BranchFixup>,
    stub_sites: Vec<StubSite>,
    convention: &'a dyn CallingConvention,
    classes: &'a rustc_hash::FxHashMap<String, Rc<ClassMetadata>>,
    function: &'a Rc<ManagedFunction>,
    verified: &'a Verified,
    num_params: usize,
    num_locals: usize,
}

pub(crate) fn lower_function(
    vm: &VMState,
    function: &Rc<ManagedFunction>,
    verified: &Verified,
) -> Result<CompiledBody, EngineError> {
    let num_params = function.definition.parameters.len();
    let num_locals = function.locals.len();

    let mut asm = Assembler::new();
    prologue::emit_frame_setup(&mut asm, num_params, num_locals, verified.max_stack_depth);
    prologue::emit_move_args_to_stack(&mut asm, vm.convention.as_ref(), function);
    prologue::emit_zero_locals(&mut asm, num_params, num_locals);

    let vm_ptr = vm as *const VMState as i64;
    let caller_ptr = &function.definition as *const _ as i64;
    let function_ptr = Rc::as_ptr(function) as i64;

    emit_push_call_frame(&mut asm, vm.convention.as_ref(), vm_ptr, caller_ptr);

    let mut ctx = Ctx {
        asm,
        stack: OperandStack::new(num_params, num_locals),
        vm_offsets: Vec::with_capacity(function.instructions.len()),
        branch_fixups: Vec::new(),
        stub_sites: Vec::new(),
        convention: vm.convention.as_ref(),
        classes: &vm.classes,
        function,
        verified,
        num_params,
        num_locals,
    };

    for (index, instruction) in function.instructions.iter().enumerate() {
        ctx.vm_offsets.push(ctx.asm.len());
        lower_one(&mut ctx, vm, vm_ptr, caller_ptr, function_ptr, instruction, index)?;
    }

    Ok(CompiledBody {
        code: ctx.asm.into_bytes(),
        vm_offsets: ctx.vm_offsets,
        branch_fixups: ctx.branch_fixups,
        stub_sites: ctx.stub_sites,
    })
}

fn top_type(verified: &Verified, index: usize) -> Type {
    verified.pre_state[index].last().cloned().unwrap_or(Type::Int)
}

fn type_below_top(verified: &Verified, index: usize) -> Type {
    let stack = &verified.pre_state[index];
    stack.get(stack.len().saturating_sub(2)).cloned().unwrap_or(Type::Int)
}

fn frame_slot(base: i32, index: usize) -> MemoryOperand {
    MemoryOperand::with_offset(IntRegister::Base(IntReg::Bp), base - 8 * index as i32)
}

fn lower_one(
    ctx: &mut Ctx,
    vm: &VMState,
    vm_ptr: i64,
    caller_ptr: i64,
    function_ptr: i64,
    instruction: &Instruction,
    index: usize,
) -> Result<(), EngineError> {
    use OpCode::*;
    match instruction.opcode {
        Nop => {}
        Pop => ctx.stack.pop_reg(&mut ctx.asm, IntRegister::Base(IntReg::Ax)),
        Duplicate => ctx.stack.duplicate(&mut ctx.asm),

        LoadInt => {
            let value = match instruction.operand {
                Operand::Int(v) => v,
                _ => unreachable!("LoadInt always carries an Int operand"),
            };
            ctx.stack.reserve_space();
            ctx.stack.push_int(&mut ctx.asm, value, false);
        }
        LoadFloat => {
            // The operand stack's float slots hold the IEEE-754 bit pattern
            // directly; `push_int` spills it as-is, so no int-to-float
            // conversion runs here (that opcode is `ConvertIntToFloat`).
            let value = match instruction.operand {
                Operand::Float(v) => v,
                _ => unreachable!("LoadFloat always carries a Float operand"),
            };
            ctx.stack.reserve_space();
            ctx.stack.push_int(&mut ctx.asm, value.to_bits() as i32, false);
        }
        LoadChar => {
            let value = match instruction.operand {
                Operand::Char(c) => c as i32,
                _ => unreachable!("LoadChar always carries a Char operand"),
            };
            ctx.stack.reserve_space();
            ctx.stack.push_int(&mut ctx.asm, value, false);
        }
        LoadTrue => {
            ctx.stack.reserve_space();
            ctx.stack.push_int(&mut ctx.asm, 1, false);
        }
        LoadFalse => {
            ctx.stack.reserve_space();
            ctx.stack.push_int(&mut ctx.asm, 0, false);
        }
        LoadNull => {
            ctx.stack.reserve_space();
            ctx.stack.push_int(&mut ctx.asm, 0, false);
        }
        LoadString => {
            let idx = match instruction.operand {
                Operand::StringConst(i) => i as i32,
                _ => unreachable!("LoadString always carries a StringConst operand"),
            };
            let locations = ctx.convention.classify(&[Type::Int, Type::Int, Type::Int]);
            move_imm_to_location(&mut ctx.asm, &locations[0], vm_ptr);
            move_imm_to_location(&mut ctx.asm, &locations[1], function_ptr);
            move_imm_to_location(&mut ctx.asm, &locations[2], idx as i64);
            call_absolute(&mut ctx.asm, entrypoints::stackjit_load_string as usize);
            ctx.stack.push_reg(&mut ctx.asm, IntRegister::Base(IntReg::Ax));
        }

        LoadLocal => {
            let n = operand_index(instruction);
            let src = frame_slot(-8, 1 + ctx.num_params + n);
            if top_type_of_local(ctx, n).is_float() {
                ctx.asm.mov_float_reg_mem(FloatReg::Xmm0, src);
                ctx.stack.push_float(&mut ctx.asm, FloatReg::Xmm0);
            } else {
                ctx.asm.mov_reg_mem(IntRegister::Base(IntReg::Ax), src, DataSize::Size64)?;
                ctx.stack.push_reg(&mut ctx.asm, IntRegister::Base(IntReg::Ax));
            }
        }
        StoreLocal => {
            let n = operand_index(instruction);
            let dest = frame_slot(-8, 1 + ctx.num_params + n);
            if top_type(ctx.verified, index).is_float() {
                ctx.stack.pop_float(&mut ctx.asm, FloatReg::Xmm0);
                ctx.asm.mov_mem_float_reg(dest, FloatReg::Xmm0);
            } else {
                ctx.stack.pop_reg(&mut ctx.asm, IntRegister::Base(IntReg::Ax));
                ctx.asm.mov_mem_reg(dest, IntRegister::Base(IntReg::Ax), DataSize::Size64)?;
            }
        }
        LoadArg => {
            let n = operand_index(instruction);
            let src = frame_slot(-8, 1 + n);
            if ctx.function.definition.parameters[n].is_float() {
                ctx.asm.mov_float_reg_mem(FloatReg::Xmm0, src);
                ctx.stack.push_float(&mut ctx.asm, FloatReg::Xmm0);
            } else {
                ctx.asm.mov_reg_mem(IntRegister::Base(IntReg::Ax), src, DataSize::Size64)?;
                ctx.stack.push_reg(&mut ctx.asm, IntRegister::Base(IntReg::Ax));
            }
        }

        Add | Sub | Mul | Div | And | Or => {
            let ty = top_type(ctx.verified, index);
            lower_binary_arith(ctx, instruction.opcode, &ty)?;
        }
        Not => {
            ctx.stack.pop_reg(&mut ctx.asm, IntRegister::Base(IntReg::Ax));
            ctx.asm.not_reg(IntRegister::Base(IntReg::Ax), DataSize::Size64)?;
            ctx.stack.push_reg(&mut ctx.asm, IntRegister::Base(IntReg::Ax));
        }

        ConvertIntToFloat => {
            ctx.stack.pop_reg(&mut ctx.asm, IntRegister::Base(IntReg::Ax));
            ctx.asm.convert_int_to_float(FloatReg::Xmm0, IntRegister::Base(IntReg::Ax));
            ctx.stack.push_float(&mut ctx.asm, FloatReg::Xmm0);
        }
        ConvertFloatToInt => {
            ctx.stack.pop_float(&mut ctx.asm, FloatReg::Xmm0);
            ctx.asm.convert_float_to_int(IntRegister::Base(IntReg::Ax), FloatReg::Xmm0);
            ctx.stack.push_reg(&mut ctx.asm, IntRegister::Base(IntReg::Ax));
        }

        CompareEqual | CompareNotEqual | CompareGreaterThan | CompareGreaterThanOrEqual | CompareLessThan
        | CompareLessThanOrEqual => {
            let ty = type_below_top(ctx.verified, index);
            lower_compare(ctx, instruction.opcode, &ty)?;
        }

        Branch => {
            let target = instruction.branch_target().expect("Branch always carries a target");
            let at = ctx.asm.jmp_placeholder();
            ctx.branch_fixups.push(BranchFixup { disp_offset: at, target_vm_index: target });
        }
        BranchEqual | BranchNotEqual | BranchGreaterThan | BranchGreaterThanOrEqual | BranchLessThan
        | BranchLessThanOrEqual => {
            let ty = type_below_top(ctx.verified, index);
            lower_conditional_branch(ctx, instruction, index, &ty)?;
        }

        Call | CallInstance => {
            lower_call(ctx, vm, vm_ptr, caller_ptr, instruction, index)?;
        }
        CallVirtual => {
            lower_virtual_call(ctx, vm, instruction)?;
        }
        NewObject => {
            let class_name = match &instruction.operand {
                Operand::NewObject(name) => name.clone(),
                _ => unreachable!("NewObject always carries a class name operand"),
            };
            let metadata = ctx.classes.get(&class_name).expect("verifier resolved this class");
            let locations = ctx.convention.classify(&[Type::Int, Type::Int, Type::Int]);
            move_imm_to_location(&mut ctx.asm, &locations[0], vm_ptr);
            move_imm_to_location(&mut ctx.asm, &locations[1], metadata.vtable_base());
            move_imm_to_location(&mut ctx.asm, &locations[2], metadata.total_size as i64);
            call_absolute(&mut ctx.asm, entrypoints::stackjit_new_class as usize);
            ctx.stack.push_reg(&mut ctx.asm, IntRegister::Base(IntReg::Ax));
        }
        NewArray => {
            let elem = match &instruction.operand {
                Operand::Name(t) => Type::parse(t).unwrap_or(Type::Int),
                _ => Type::Int,
            };
            ctx.stack.pop_reg(&mut ctx.asm, IntRegister::Base(IntReg::Dx)); // length, staged for arg 3
            let locations = ctx.convention.classify(&[Type::Int, Type::Int, Type::Int, Type::Int]);
            move_imm_to_location(&mut ctx.asm, &locations[0], vm_ptr);
            move_imm_to_location(&mut ctx.asm, &locations[1], array_type_descriptor(&elem));
            move_reg_to_location(&mut ctx.asm, &locations[2], IntRegister::Base(IntReg::Dx));
            move_imm_to_location(&mut ctx.asm, &locations[3], elem.size() as i64);
            call_absolute(&mut ctx.asm, entrypoints::stackjit_new_array as usize);
            ctx.stack.push_reg(&mut ctx.asm, IntRegister::Base(IntReg::Ax));
        }
        LoadArrayLength => {
            ctx.stack.pop_reg(&mut ctx.asm, IntRegister::Base(IntReg::Ax));
            emit_null_check(ctx, IntRegister::Base(IntReg::Ax));
            ctx.asm.mov_reg_mem(
                IntRegister::Base(IntReg::Ax),
                MemoryOperand::with_offset(IntRegister::Base(IntReg::Ax), class::OBJECT_HEADER_SIZE as i32),
                DataSize::Size32,
            )?;
            ctx.stack.push_reg(&mut ctx.asm, IntRegister::Base(IntReg::Ax));
        }
        LoadElement => {
            let array_ty = type_below_top(ctx.verified, index);
            let elem = match array_ty {
                Type::Array(t) => *t,
                _ => Type::Int,
            };
            ctx.stack.pop_reg(&mut ctx.asm, IntRegister::Base(IntReg::Cx)); // index
            ctx.stack.pop_reg(&mut ctx.asm, IntRegister::Base(IntReg::Ax)); // array ref
            emit_null_check(ctx, IntRegister::Base(IntReg::Ax));
            emit_bounds_check(ctx, IntRegister::Base(IntReg::Ax), IntRegister::Base(IntReg::Cx));
            let elem_addr = element_address(ctx, IntRegister::Base(IntReg::Ax), IntRegister::Base(IntReg::Cx), elem.size());
            if elem.is_float() {
                ctx.asm.mov_float_reg_mem(FloatReg::Xmm0, elem_addr);
                ctx.stack.push_float(&mut ctx.asm, FloatReg::Xmm0);
            } else {
                let size = if elem.size() == 4 { DataSize::Size32 } else { DataSize::Size64 };
                ctx.asm.mov_reg_mem(IntRegister::Base(IntReg::Ax), elem_addr, size)?;
                ctx.stack.push_reg(&mut ctx.asm, IntRegister::Base(IntReg::Ax));
            }
        }
        StoreElement => {
            let stack = &ctx.verified.pre_state[index];
            let array_ty = stack.get(stack.len().saturating_sub(3)).cloned().unwrap_or(Type::Int);
            let elem = match array_ty {
                Type::Array(t) => *t,
                _ => Type::Int,
            };
            if elem.is_float() {
                ctx.stack.pop_float(&mut ctx.asm, FloatReg::Xmm0);
            } else {
                ctx.stack.pop_reg(&mut ctx.asm, IntRegister::Base(IntReg::Dx));
            }
            ctx.stack.pop_reg(&mut ctx.asm, IntRegister::Base(IntReg::Cx)); // index
            ctx.stack.pop_reg(&mut ctx.asm, IntRegister::Base(IntReg::Ax)); // array ref
            emit_null_check(ctx, IntRegister::Base(IntReg::Ax));
            emit_bounds_check(ctx, IntRegister::Base(IntReg::Ax), IntRegister::Base(IntReg::Cx));
            let elem_addr = element_address(ctx, IntRegister::Base(IntReg::Ax), IntRegister::Base(IntReg::Cx), elem.size());
            if elem.is_float() {
                ctx.asm.mov_mem_float_reg(elem_addr, FloatReg::Xmm0);
            } else {
                let size = if elem.size() == 4 { DataSize::Size32 } else { DataSize::Size64 };
                ctx.asm.mov_mem_reg(elem_addr, IntRegister::Base(IntReg::Dx), size)?;
                if elem.is_reference() {
                    emit_write_barrier(ctx, vm_ptr, IntRegister::Base(IntReg::Ax));
                }
            }
        }
        LoadField => {
            let field_name = field_operand(instruction);
            let owner = type_below_top(ctx.verified, index);
            ctx.stack.pop_reg(&mut ctx.asm, IntRegister::Base(IntReg::Ax));
            emit_null_check(ctx, IntRegister::Base(IntReg::Ax));
            let (offset, ty) = resolve_field(ctx.classes, &owner, &field_name);
            let src = MemoryOperand::with_offset(IntRegister::Base(IntReg::Ax), offset as i32);
            if ty.is_float() {
                ctx.asm.mov_float_reg_mem(FloatReg::Xmm0, src);
                ctx.stack.push_float(&mut ctx.asm, FloatReg::Xmm0);
            } else {
                let size = if ty.size() == 4 { DataSize::Size32 } else { DataSize::Size64 };
                ctx.asm.mov_reg_mem(IntRegister::Base(IntReg::Ax), src, size)?;
                ctx.stack.push_reg(&mut ctx.asm, IntRegister::Base(IntReg::Ax));
            }
        }
        StoreField => {
            let field_name = field_operand(instruction);
            let stack = &ctx.verified.pre_state[index];
            let owner = stack.get(stack.len().saturating_sub(2)).cloned().unwrap_or(Type::Int);
            let (offset, ty) = resolve_field(ctx.classes, &owner, &field_name);
            if ty.is_float() {
                ctx.stack.pop_float(&mut ctx.asm, FloatReg::Xmm0);
            } else {
                ctx.stack.pop_reg(&mut ctx.asm, IntRegister::Base(IntReg::Dx));
            }
            ctx.stack.pop_reg(&mut ctx.asm, IntRegister::Base(IntReg::Ax));
            emit_null_check(ctx, IntRegister::Base(IntReg::Ax));
            let dest = MemoryOperand::with_offset(IntRegister::Base(IntReg::Ax), offset as i32);
            if ty.is_float() {
                ctx.asm.mov_mem_float_reg(dest, FloatReg::Xmm0);
            } else {
                let size = if ty.size() == 4 { DataSize::Size32 } else { DataSize::Size64 };
                ctx.asm.mov_mem_reg(dest, IntRegister::Base(IntReg::Dx), size)?;
                if ty.is_reference() {
                    emit_write_barrier(ctx, vm_ptr, IntRegister::Base(IntReg::Ax));
                }
            }
        }
        Ret => {
            emit_pop_call_frame(ctx, vm_ptr);
            let is_void = ctx.function.definition.return_type == Type::Void;
            let is_float = ctx.function.definition.return_type.is_float();
            prologue::emit_make_return_value(&mut ctx.asm, &mut ctx.stack, ctx.convention, is_void, is_float);
            prologue::emit_epilogue(&mut ctx.asm);
        }
    }
    Ok(())
}

/// Pushes this function's frame marker onto the runtime call stack and
/// inline-checks the result, branching to the shared stack-overflow fault
/// stub exactly the way `emit_null_check`/`emit_bounds_check` branch to
/// theirs (§4.6, §7 kind 4). Emitted once, right after locals are
/// zero-initialized and before the function body runs.
fn emit_push_call_frame(asm: &mut Assembler, convention: &dyn CallingConvention, vm_ptr: i64, function_ptr: i64) {
    let locations = convention.classify(&[Type::Int, Type::Int, Type::Int]);
    move_imm_to_location(asm, &locations[0], vm_ptr);
    move_imm_to_location(asm, &locations[1], function_ptr);
    move_reg_to_location(asm, &locations[2], IntRegister::Base(IntReg::Bp));
    call_absolute(asm, entrypoints::stackjit_push_call_frame as usize);
    asm.mov_reg_imm(SCRATCH_2, 0, DataSize::Size32).expect("Size32 move is implemented");
    asm.cmp_reg_reg(IntRegister::Base(IntReg::Ax), SCRATCH_2, DataSize::Size64)
        .expect("Size64 compare is implemented");
    let at = asm.jcc_placeholder(Condition::NotEqual, true);
    call_absolute(asm, entrypoints::stackjit_fault_stack_overflow as usize);
    patch_local(asm, at);
}

/// Pops this function's frame marker before its return value is loaded
/// into the ABI return register, so the call the pop itself makes doesn't
/// clobber a return value already sitting in a volatile register (§4.6).
fn emit_pop_call_frame(ctx: &mut Ctx, vm_ptr: i64) {
    let locations = ctx.convention.classify(&[Type::Int]);
    move_imm_to_location(&mut ctx.asm, &locations[0], vm_ptr);
    call_absolute(&mut ctx.asm, entrypoints::stackjit_pop_call_frame as usize);
}

fn top_type_of_local(ctx: &Ctx, n: usize) -> Type {
    ctx.function.locals.get(n).cloned().unwrap_or(Type::Int)
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

fn resolve_field(classes: &rustc_hash::FxHashMap<String, Rc<ClassMetadata>>, owner: &Type, field: &str) -> (usize, Type) {
    if let Type::Class(name) = owner {
        if let Some(class) = classes.get(name) {
            if let Some(f) = class.fields.iter().find(|f| f.name == field) {
                return (f.offset, f.ty.clone());
            }
        }
    }
    (class::OBJECT_HEADER_SIZE, Type::Int)
}

fn array_type_descriptor(elem: &Type) -> i64 {
    match elem {
        Type::Class(name) => name.as_ptr() as i64,
        _ => 0,
    }
}

fn element_address(ctx: &mut Ctx, array_reg: IntRegister, index_reg: IntRegister, elem_size: usize) -> MemoryOperand {
    // `[array + ARRAY_DATA_OFFSET + index * elem_size]`; computed through a
    // scratch register since C1 has no scaled-index addressing mode.
    ctx.asm.mov_reg_reg(SCRATCH, index_reg, DataSize::Size64).expect("Size64 move is implemented");
    match elem_size {
        1 => {}
        _ => {
            let shift = elem_size.trailing_zeros() as i32;
            for _ in 0..shift {
                ctx.asm.add_reg_reg(SCRATCH, SCRATCH, DataSize::Size64).expect("Size64 add is implemented");
            }
        }
    }
    ctx.asm.add_reg_reg(SCRATCH, array_reg, DataSize::Size64).expect("Size64 add is implemented");
    MemoryOperand::with_offset(SCRATCH, class::ARRAY_DATA_OFFSET as i32)
}

fn emit_null_check(ctx: &mut Ctx, reg: IntRegister) {
    ctx.asm.mov_reg_imm(SCRATCH_2, 0, DataSize::Size32).expect("Size32 move is implemented");
    ctx.asm.cmp_reg_reg(reg, SCRATCH_2, DataSize::Size64).expect("Size64 compare is implemented");
    let at = ctx.asm.jcc_placeholder(Condition::NotEqual, true);
    call_absolute(&mut ctx.asm, entrypoints::stackjit_fault_null_reference as usize);
    patch_local(&mut ctx.asm, at);
}

fn emit_bounds_check(ctx: &mut Ctx, array_reg: IntRegister, index_reg: IntRegister) {
    // Unsigned comparison: a negative index wraps to a huge unsigned value
    // and is caught by the same `jb` as an index past the end.
    let length_addr = MemoryOperand::with_offset(array_reg, class::OBJECT_HEADER_SIZE as i32);
    ctx.asm.mov_reg_mem(SCRATCH, length_addr, DataSize::Size32).expect("Size32 move is implemented");
    ctx.asm.cmp_reg_reg(index_reg, SCRATCH, DataSize::Size32).expect("Size32 compare is implemented");
    let at = ctx.asm.jcc_placeholder(Condition::Less, true);
    call_absolute(&mut ctx.asm, entrypoints::stackjit_fault_index_out_of_bounds as usize);
    patch_local(&mut ctx.asm, at);
}

fn emit_write_barrier(ctx: &mut Ctx, vm_ptr: i64, object_reg: IntRegister) {
    let locations = ctx.convention.classify(&[Type::Int, Type::Int]);
    move_imm_to_location(&mut ctx.asm, &locations[0], vm_ptr);
    move_reg_to_location(&mut ctx.asm, &locations[1], object_reg);
    call_absolute(&mut ctx.asm, entrypoints::stackjit_write_barrier as usize);
}

/// Patches a jump/branch placeholder to target "here", for conditions
/// entirely local to the instruction currently being lowered (inline
/// fault checks, boolean materialization) where the target is already
/// known without a cross-instruction `BranchFixup`.
fn patch_local(asm: &mut Assembler, disp_offset: usize) {
    let rel32 = asm.len() as i32 - (disp_offset as i32 + 4);
    asm.patch_rel32(disp_offset, rel32);
}

fn call_absolute(asm: &mut Assembler, target: usize) {
    asm.mov_reg_imm64(SCRATCH, target as i64);
    asm.call_reg(SCRATCH);
}

fn move_imm_to_location(asm: &mut Assembler, location: &crate::abi::ArgLocation, value: i64) {
    use crate::abi::ArgLocation;
    match location {
        ArgLocation::Int(reg) => {
            asm.mov_reg_imm64(*reg, value);
        }
        ArgLocation::Float(_) => unreachable!("runtime entrypoints take only integer/pointer arguments"),
        ArgLocation::Stack(_) => unreachable!("entrypoints here never take more than the register-resident arguments"),
    }
}

fn move_reg_to_location(asm: &mut Assembler, location: &crate::abi::ArgLocation, reg: IntRegister) {
    use crate::abi::ArgLocation;
    match location {
        ArgLocation::Int(dest) => {
            asm.mov_reg_reg(*dest, reg, DataSize::Size64).expect("Size64 move is implemented");
        }
        ArgLocation::Float(_) => unreachable!("runtime entrypoints take only integer/pointer arguments"),
        ArgLocation::Stack(_) => unreachable!("entrypoints here never take more than the register-resident arguments"),
    }
}

fn lower_binary_arith(ctx: &mut Ctx, opcode: OpCode, ty: &Type) -> Result<(), EngineError> {
    if ty.is_float() {
        ctx.stack.pop_float(&mut ctx.asm, FloatReg::Xmm1);
        ctx.stack.pop_float(&mut ctx.asm, FloatReg::Xmm0);
        match opcode {
            OpCode::Add => {
                ctx.asm.add_float_float(FloatReg::Xmm0, FloatReg::Xmm1);
            }
            OpCode::Sub => {
                ctx.asm.sub_float_float(FloatReg::Xmm0, FloatReg::Xmm1);
            }
            OpCode::Mul => {
                ctx.asm.mul_float_float(FloatReg::Xmm0, FloatReg::Xmm1);
            }
            OpCode::Div => {
                ctx.asm.div_float_float(FloatReg::Xmm0, FloatReg::Xmm1);
            }
            _ => unreachable!("And/Or are integer-only opcodes"),
        }
        ctx.stack.push_float(&mut ctx.asm, FloatReg::Xmm0);
    } else {
        let a = IntRegister::Base(IntReg::Ax);
        let b = IntRegister::Base(IntReg::Cx);
        ctx.stack.pop_reg(&mut ctx.asm, b);
        ctx.stack.pop_reg(&mut ctx.asm, a);
        match opcode {
            OpCode::Add => {
                ctx.asm.add_reg_reg(a, b, DataSize::Size64)?;
            }
            OpCode::Sub => {
                ctx.asm.sub_reg_reg(a, b, DataSize::Size64)?;
            }
            OpCode::Mul => {
                ctx.asm.mul_reg_reg(a, b, DataSize::Size64)?;
            }
            OpCode::Div => {
                // `idiv` takes its dividend from RAX (already there) and
                // sign-extends it into RDX:RAX first (§4.1).
                ctx.asm.sign_extend(DataSize::Size64)?;
                ctx.asm.div_reg(b, DataSize::Size64)?;
            }
            OpCode::And => {
                ctx.asm.and_reg_reg(a, b, DataSize::Size64)?;
            }
            OpCode::Or => {
                ctx.asm.or_reg_reg(a, b, DataSize::Size64)?;
            }
            _ => unreachable!(),
        }
        ctx.stack.push_reg(&mut ctx.asm, a);
    }
    Ok(())
}

fn condition_for(opcode: OpCode) -> Condition {
    use OpCode::*;
    match opcode {
        CompareEqual | BranchEqual => Condition::Equal,
        CompareNotEqual | BranchNotEqual => Condition::NotEqual,
        CompareGreaterThan | BranchGreaterThan => Condition::Greater,
        CompareGreaterThanOrEqual | BranchGreaterThanOrEqual => Condition::GreaterOrEqual,
        CompareLessThan | BranchLessThan => Condition::Less,
        CompareLessThanOrEqual | BranchLessThanOrEqual => Condition::LessOrEqual,
        _ => unreachable!("condition_for is only called on compare/branch opcodes"),
    }
}

fn lower_compare(ctx: &mut Ctx, opcode: OpCode, ty: &Type) -> Result<(), EngineError> {
    let condition = condition_for(opcode);
    if ty.is_float() {
        ctx.stack.pop_float(&mut ctx.asm, FloatReg::Xmm1);
        ctx.stack.pop_float(&mut ctx.asm, FloatReg::Xmm0);
        ctx.asm.cmp_float_float(FloatReg::Xmm0, FloatReg::Xmm1);
    } else {
        let b = IntRegister::Base(IntReg::Cx);
        let a = IntRegister::Base(IntReg::Ax);
        ctx.stack.pop_reg(&mut ctx.asm, b);
        ctx.stack.pop_reg(&mut ctx.asm, a);
        ctx.asm.cmp_reg_reg(a, b, DataSize::Size64)?;
    }
    let taken = ctx.asm.jcc_placeholder(condition, ty.is_float());
    ctx.stack.reserve_space();
    ctx.stack.push_int(&mut ctx.asm, 0, false);
    let done = ctx.asm.jmp_placeholder();
    patch_local(&mut ctx.asm, taken);
    ctx.asm.mov_mem_imm(
        MemoryOperand::with_offset(IntRegister::Base(IntReg::Bp), ctx.stack.top_offset()),
        1,
        DataSize::Size64,
    )?;
    patch_local(&mut ctx.asm, done);
    Ok(())
}

fn lower_conditional_branch(ctx: &mut Ctx, instruction: &Instruction, index: usize, ty: &Type) -> Result<(), EngineError> {
    let target = instruction.branch_target().expect("conditional branches always carry a target");
    let condition = condition_for(instruction.opcode);
    if ty.is_float() {
        ctx.stack.pop_float(&mut ctx.asm, FloatReg::Xmm1);
        ctx.stack.pop_float(&mut ctx.asm, FloatReg::Xmm0);
        ctx.asm.cmp_float_float(FloatReg::Xmm0, FloatReg::Xmm1);
    } else {
        let b = IntRegister::Base(IntReg::Cx);
        let a = IntRegister::Base(IntReg::Ax);
        ctx.stack.pop_reg(&mut ctx.asm, b);
        ctx.stack.pop_reg(&mut ctx.asm, a);
        ctx.asm.cmp_reg_reg(a, b, DataSize::Size64)?;
    }
    let _ = index;
    let at = ctx.asm.jcc_placeholder(condition, ty.is_float());
    ctx.branch_fixups.push(BranchFixup { disp_offset: at, target_vm_index: target });
    Ok(())
}

/// Lowers `Call`/`CallInstance`: both resolve their callee via the
/// verifier's statically-recorded target signature and go through the same
/// lazy self-patching stub (§4.7). `CallVirtual` dispatches dynamically
/// instead; see `lower_virtual_call`.
fn lower_call(
    ctx: &mut Ctx,
    vm: &VMState,
    vm_ptr: i64,
    caller_ptr: i64,
    instruction: &Instruction,
    index: usize,
) -> Result<(), EngineError> {
    let target = match &instruction.operand {
        Operand::Call(t) => t,
        _ => unreachable!("call opcodes always carry a CallTarget operand"),
    };
    let signature = target.signature();
    let target_def = &vm.functions.get(&signature).expect("verifier resolved this call").definition;
    let target_ptr = target_def as *const _ as i64;

    let mut param_types: Vec<Type> = target.parameters.clone();
    if instruction.opcode != OpCode::Call {
        param_types.insert(0, this_type(target));
    }
    let locations = ctx.convention.classify(&param_types);

    // Pop arguments off the operand stack in reverse (last-pushed is the
    // last parameter) and stage each into its ABI location.
    for (slot, ty) in param_types.iter().enumerate().rev() {
        let location = &locations[slot];
        if ty.is_float() {
            ctx.stack.pop_float(&mut ctx.asm, FloatReg::Xmm0);
            if let crate::abi::ArgLocation::Float(dest) = location {
                ctx.asm.mov_float_reg_reg(*dest, FloatReg::Xmm0);
            }
        } else {
            ctx.stack.pop_reg(&mut ctx.asm, IntRegister::Base(IntReg::Ax));
            move_reg_to_location(&mut ctx.asm, location, IntRegister::Base(IntReg::Ax));
        }
    }

    let call_at = ctx.asm.call_placeholder();
    patch_local(&mut ctx.asm, call_at);
    emit_compile_stub(ctx, vm_ptr, caller_ptr, target_ptr, call_at as i64, &param_types);
    ctx.stub_sites.push(StubSite { patch_offset: call_at, target_signature: signature });

    if target_def.return_type != Type::Void {
        if target_def.return_type.is_float() {
            ctx.stack.push_float(&mut ctx.asm, ctx.convention.return_float_register());
        } else {
            ctx.stack.push_reg(&mut ctx.asm, IntRegister::Base(ctx.convention.return_int_register()));
        }
    }
    let _ = index;
    Ok(())
}

/// Lowers `CallVirtual` through real dynamic dispatch: loads the receiver's
/// type-descriptor pointer (a class's `vtable_base()`, written into the
/// header by `NewObject`), indexes it by the statically-resolved vtable
/// slot, and calls through the loaded function pointer. The declared
/// signature's own `FunctionDefinition` (shared by every override, by
/// construction of `ClassMetadata::build`) supplies parameter/return types
/// for ABI classification; only the entry address is resolved dynamically
/// (§4.6).
fn lower_virtual_call(ctx: &mut Ctx, vm: &VMState, instruction: &Instruction) -> Result<(), EngineError> {
    let target = match &instruction.operand {
        Operand::Call(t) => t,
        _ => unreachable!("call opcodes always carry a CallTarget operand"),
    };
    let signature = target.signature();
    let target_def = &vm.functions.get(&signature).expect("verifier resolved this call").definition;

    let class_name = target.class.as_deref().expect("CallVirtual always names its static receiver class");
    let owner_class = ctx.classes.get(class_name).expect("verifier resolved this class");
    let slot = owner_class
        .vtable_slot(&signature)
        .expect("verifier resolved this virtual method's vtable slot");

    let mut param_types: Vec<Type> = target.parameters.clone();
    param_types.insert(0, this_type(target));
    let locations = ctx.convention.classify(&param_types);

    for (slot_index, ty) in param_types.iter().enumerate().rev() {
        let location = &locations[slot_index];
        if ty.is_float() {
            ctx.stack.pop_float(&mut ctx.asm, FloatReg::Xmm0);
            if let crate::abi::ArgLocation::Float(dest) = location {
                ctx.asm.mov_float_reg_reg(*dest, FloatReg::Xmm0);
            }
        } else {
            ctx.stack.pop_reg(&mut ctx.asm, IntRegister::Base(IntReg::Ax));
            move_reg_to_location(&mut ctx.asm, location, IntRegister::Base(IntReg::Ax));
        }
    }

    let this_reg = match &locations[0] {
        crate::abi::ArgLocation::Int(r) => *r,
        _ => unreachable!("`this` always classifies to an integer register"),
    };
    emit_null_check(ctx, this_reg);
    ctx.asm.mov_reg_mem(SCRATCH, MemoryOperand::new(this_reg), DataSize::Size64)?;
    ctx.asm
        .mov_reg_mem(SCRATCH, MemoryOperand::with_offset(SCRATCH, (slot * 8) as i32), DataSize::Size64)?;
    ctx.asm.call_reg(SCRATCH);

    if target_def.return_type != Type::Void {
        if target_def.return_type.is_float() {
            ctx.stack.push_float(&mut ctx.asm, ctx.convention.return_float_register());
        } else {
            ctx.stack.push_reg(&mut ctx.asm, IntRegister::Base(ctx.convention.return_int_register()));
        }
    }
    Ok(())
}

fn this_type(target: &CallTarget) -> Type {
    target.class.clone().map(Type::Class).unwrap_or(Type::Class("Object".into()))
}

/// Emits the trampoline trailer a call site's placeholder jumps to the
/// first time it runs (§4.7). Saves the physical argument registers the
/// real call needs, invokes `stackjit_compile_function_stub` to compile
/// the callee and patch the call site in place, restores the arguments,
/// then calls through to the now-compiled entry point. Because the
/// trailer reaches the callee via `call` rather than `jmp`, the callee's
/// own `ret` returns to this trailer's final `ret`, which in turn pops the
/// original call site's return address — the callee never sees this
/// trailer on its stack.
fn emit_compile_stub(ctx: &mut Ctx, vm_ptr: i64, caller_ptr: i64, target_ptr: i64, patch_rel_offset: i64, param_types: &[Type]) {
    let arg_locations = ctx.convention.classify(param_types);
    let int_regs: Vec<IntRegister> = arg_locations
        .iter()
        .filter_map(|l| match l {
            crate::abi::ArgLocation::Int(r) => Some(*r),
            _ => None,
        })
        .collect();
    let float_regs: Vec<FloatReg> = arg_locations
        .iter()
        .filter_map(|l| match l {
            crate::abi::ArgLocation::Float(r) => Some(*r),
            _ => None,
        })
        .collect();

    for r in &int_regs {
        ctx.asm.push(*r);
    }
    for r in &float_regs {
        ctx.asm.push_float(*r);
    }

    let trampoline_args = ctx.convention.classify(&[Type::Int, Type::Int, Type::Int, Type::Int]);
    move_imm_to_location(&mut ctx.asm, &trampoline_args[0], vm_ptr);
    move_imm_to_location(&mut ctx.asm, &trampoline_args[1], caller_ptr);
    move_imm_to_location(&mut ctx.asm, &trampoline_args[2], target_ptr);
    move_imm_to_location(&mut ctx.asm, &trampoline_args[3], patch_rel_offset);
    ctx.asm.mov_reg_imm64(SCRATCH, entrypoints::stackjit_compile_function_stub as usize as i64);
    ctx.asm.call_reg(SCRATCH);
    ctx.asm.mov_reg_reg(SCRATCH_2, IntRegister::Base(IntReg::Ax), DataSize::Size64).expect("Size64 move is implemented");

    for r in float_regs.iter().rev() {
        ctx.asm.pop_float(*r);
    }
    for r in int_regs.iter().rev() {
        ctx.asm.pop(*r);
    }

    ctx.asm.call_reg(SCRATCH_2);
    ctx.asm.ret();
}
