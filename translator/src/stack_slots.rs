//! Stack-Slot Allocator
//!
//! Replaces the implicit CIL operand stack with named C temporaries. Each
//! block is simulated from its entry shape; every value pushed at depth `d`
//! with normalized stack type `T` is bound to the temporary `(d, T)`, so
//! values flowing across block edges meet in the same variable without any
//! phi resolution.

use crate::error::{TranslateError, TranslateResult};
use crate::metadata::{
    InstrId, Instruction, MethodBody, MethodDef, MethodId, OpCode, Operand, PrimitiveType, Program,
    TypeId, TypeKind,
};
use indexmap::IndexMap;
use log::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Temp {
    pub depth: u32,
    /// Normalized stack type
    pub ty: TypeId,
    pub name: String,
}

/// Scratch variables a method body needs beyond its temporaries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MethodNeeds {
    pub needs_overflow_flag: bool,
    pub needs_element_address: bool,
    pub needs_virtual_ptr: bool,
    pub needs_boxed_receiver: bool,
    pub may_throw: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SlotAllocation {
    temps: IndexMap<(u32, TypeId), Temp>,
    bindings: Vec<Option<usize>>,
    pub needs: MethodNeeds,
}

impl SlotAllocation {
    pub fn temp_of(&self, instr: InstrId) -> Option<&Temp> {
        self.bindings
            .get(instr.index())
            .copied()
            .flatten()
            .and_then(|index| self.temps.get_index(index))
            .map(|(_, temp)| temp)
    }

    pub fn temps(&self) -> impl Iterator<Item = &Temp> {
        self.temps.values()
    }

    pub fn temp_count(&self) -> usize {
        self.temps.len()
    }

    pub fn temp(&self, depth: u32, ty: TypeId) -> Option<&Temp> {
        self.temps.get(&(depth, ty))
    }

    /// Bound instructions in arena order
    pub fn bindings(&self) -> impl Iterator<Item = (InstrId, &Temp)> {
        self.bindings.iter().enumerate().filter_map(|(index, binding)| {
            binding
                .and_then(|t| self.temps.get_index(t))
                .map(|(_, temp)| (InstrId(index as u32), temp))
        })
    }

    fn temp_index(&mut self, depth: u32, ty: TypeId) -> usize {
        let entry = self.temps.entry((depth, ty));
        let index = entry.index();
        entry.or_insert_with(|| Temp {
            depth,
            ty,
            name: format!("_slot_{}_{}", depth, ty.0),
        });
        index
    }

    fn bind(&mut self, instr: InstrId, temp: usize) -> TranslateResult<()> {
        match self.bindings[instr.index()] {
            Some(existing) if existing != temp => Err(TranslateError::internal(format!(
                "instruction {} is bound to two different stack slots",
                instr
            ))),
            _ => {
                self.bindings[instr.index()] = Some(temp);
                Ok(())
            }
        }
    }
}

/// Static type of the value an instruction pushes
///
/// The metadata reader normally supplies it; when it does not, the type is
/// derived from the opcode and its operand.
pub fn result_type(
    program: &Program,
    method: &MethodDef,
    body: &MethodBody,
    instr: &Instruction,
) -> TranslateResult<TypeId> {
    if let Some(ty) = instr.ty {
        return Ok(ty);
    }
    let prim = |p| program.primitive(p);
    let missing = || TranslateError::MissingOperand {
        opcode: instr.opcode.mnemonic().to_string(),
        offset: instr.offset,
        what: "result type",
    };
    match (instr.opcode, &instr.operand) {
        (OpCode::LdcI4 | OpCode::Ceq | OpCode::Cgt | OpCode::CgtUn | OpCode::Clt | OpCode::CltUn, _) => {
            prim(PrimitiveType::Int32)
        }
        (OpCode::LdcI8, _) => prim(PrimitiveType::Int64),
        (OpCode::LdcR4, _) => prim(PrimitiveType::Float32),
        (OpCode::LdcR8 | OpCode::ConvRUn, _) => prim(PrimitiveType::Float64),
        (OpCode::Ldnull | OpCode::Box, _) => Ok(program.well_known.object),
        (OpCode::Ldstr, _) => Ok(program.well_known.string),
        (OpCode::Sizeof, _) => prim(PrimitiveType::UInt32),
        (
            OpCode::Ldlen
            | OpCode::Ldarga
            | OpCode::Ldloca
            | OpCode::Ldflda
            | OpCode::Ldsflda
            | OpCode::Ldelema
            | OpCode::Localloc
            | OpCode::Ldtoken,
            _,
        ) => prim(PrimitiveType::UIntPtr),
        (OpCode::Ldftn | OpCode::Ldvirtftn, _) => prim(PrimitiveType::IntPtr),
        // `this` of a value-type method is a managed pointer
        (OpCode::Ldarg, Operand::This) if program.is_value_type(method.declaring_type) => {
            prim(PrimitiveType::UIntPtr)
        }
        (OpCode::Ldarg, Operand::This) => Ok(method.declaring_type),
        (OpCode::Ldarg, Operand::Parameter(index)) => method
            .parameters
            .get(*index as usize)
            .map(|p| p.ty)
            .ok_or_else(missing),
        (OpCode::Ldloc, Operand::Local(index)) => body
            .locals
            .get(*index as usize)
            .map(|l| l.ty)
            .ok_or_else(missing),
        (OpCode::Ldfld | OpCode::Ldsfld, Operand::Field(field)) => Ok(program.field(*field).ty),
        (OpCode::Call | OpCode::Callvirt, Operand::Method(callee)) => {
            Ok(program.method(*callee).return_type)
        }
        (OpCode::Newobj, Operand::Method(ctor)) => Ok(program.method(*ctor).declaring_type),
        (OpCode::Calli, Operand::Type(pointer)) => match &program.ty(*pointer).kind {
            TypeKind::FunctionPointer { signature } => Ok(signature.return_type),
            _ => Err(missing()),
        },
        (
            OpCode::Castclass | OpCode::Isinst | OpCode::UnboxAny | OpCode::Ldobj | OpCode::Ldelem,
            Operand::Type(ty),
        ) => Ok(*ty),
        (OpCode::ConvI1 | OpCode::ConvOvfI1 | OpCode::ConvOvfI1Un | OpCode::LdindI1 | OpCode::LdelemI1, _) => {
            prim(PrimitiveType::Int8)
        }
        (OpCode::ConvU1 | OpCode::ConvOvfU1 | OpCode::ConvOvfU1Un | OpCode::LdindU1 | OpCode::LdelemU1, _) => {
            prim(PrimitiveType::UInt8)
        }
        (OpCode::ConvI2 | OpCode::ConvOvfI2 | OpCode::ConvOvfI2Un | OpCode::LdindI2 | OpCode::LdelemI2, _) => {
            prim(PrimitiveType::Int16)
        }
        (OpCode::ConvU2 | OpCode::ConvOvfU2 | OpCode::ConvOvfU2Un | OpCode::LdindU2 | OpCode::LdelemU2, _) => {
            prim(PrimitiveType::UInt16)
        }
        (OpCode::ConvI4 | OpCode::ConvOvfI4 | OpCode::ConvOvfI4Un | OpCode::LdindI4 | OpCode::LdelemI4, _) => {
            prim(PrimitiveType::Int32)
        }
        (OpCode::ConvU4 | OpCode::ConvOvfU4 | OpCode::ConvOvfU4Un | OpCode::LdindU4 | OpCode::LdelemU4, _) => {
            prim(PrimitiveType::UInt32)
        }
        (OpCode::ConvI8 | OpCode::ConvOvfI8 | OpCode::ConvOvfI8Un | OpCode::LdindI8 | OpCode::LdelemI8, _) => {
            prim(PrimitiveType::Int64)
        }
        (OpCode::ConvU8 | OpCode::ConvOvfU8 | OpCode::ConvOvfU8Un, _) => prim(PrimitiveType::UInt64),
        (OpCode::ConvI | OpCode::ConvOvfI | OpCode::ConvOvfIUn | OpCode::LdindI | OpCode::LdelemI, _) => {
            prim(PrimitiveType::IntPtr)
        }
        (OpCode::ConvU | OpCode::ConvOvfU | OpCode::ConvOvfUUn, _) => prim(PrimitiveType::UIntPtr),
        (OpCode::ConvR4 | OpCode::LdindR4 | OpCode::LdelemR4, _) => prim(PrimitiveType::Float32),
        (OpCode::ConvR8 | OpCode::LdindR8 | OpCode::LdelemR8, _) => prim(PrimitiveType::Float64),
        (OpCode::LdindRef | OpCode::LdelemRef | OpCode::Newarr | OpCode::Unbox, _) => {
            Ok(program.well_known.object)
        }
        _ => instr
            .operand1
            .map(|first| result_type(program, method, body, body.instr(first)))
            .unwrap_or_else(|| Err(missing())),
    }
}

/// Stack slots a call consumes: declared parameters plus `this`
fn call_arity(program: &Program, callee: MethodId, with_this: bool) -> usize {
    let def = program.method(callee);
    def.parameters.len() + usize::from(with_this && !def.is_static())
}

fn returns_value(program: &Program, callee: MethodId) -> bool {
    !program.is_void(program.method(callee).return_type)
}

enum Effect {
    /// Pop `n`, then push the instruction's result when `push`
    Normal { pops: usize, push: bool },
    Dup,
    Clear,
    Ret,
}

fn stack_effect(program: &Program, instr: &Instruction) -> TranslateResult<Effect> {
    use OpCode::*;
    let normal = |pops, push| Ok(Effect::Normal { pops, push });
    let method_operand = || match instr.operand {
        Operand::Method(m) => Ok(m),
        _ => Err(TranslateError::InvalidOperand {
            opcode: instr.opcode.mnemonic().to_string(),
            offset: instr.offset,
            expected: "method",
        }),
    };
    match instr.opcode {
        Constrained | No | Readonly | Tail | Unaligned | Volatile | Nop | Break | Br | Rethrow
        | Jmp => normal(0, false),
        Ldarg | Ldarga | Ldloc | Ldloca | LdcI4 | LdcI8 | LdcR4 | LdcR8 | Ldnull | Ldstr | Ldsfld
        | Ldsflda | Ldtoken | Ldftn | Arglist | Sizeof | EntryValue => normal(0, true),
        Neg | Not | ConvI | ConvI1 | ConvI2 | ConvI4 | ConvI8 | ConvU | ConvU1 | ConvU2 | ConvU4
        | ConvU8 | ConvR4 | ConvR8 | ConvRUn | ConvOvfI | ConvOvfIUn | ConvOvfI1 | ConvOvfI1Un
        | ConvOvfI2 | ConvOvfI2Un | ConvOvfI4 | ConvOvfI4Un | ConvOvfI8 | ConvOvfI8Un | ConvOvfU
        | ConvOvfUUn | ConvOvfU1 | ConvOvfU1Un | ConvOvfU2 | ConvOvfU2Un | ConvOvfU4
        | ConvOvfU4Un | ConvOvfU8 | ConvOvfU8Un | Ckfinite | Ldfld | Ldflda | Ldlen | LdindI
        | LdindI1 | LdindI2 | LdindI4 | LdindI8 | LdindR4 | LdindR8 | LdindRef | LdindU1
        | LdindU2 | LdindU4 | Ldobj | Box | Unbox | UnboxAny | Castclass | Isinst | Newarr
        | Localloc | Ldvirtftn | Refanytype | Refanyval | Mkrefany => normal(1, true),
        Add | AddOvf | AddOvfUn | Sub | SubOvf | SubOvfUn | Mul | MulOvf | MulOvfUn | Div | DivUn
        | Rem | RemUn | And | Or | Xor | Shl | Shr | ShrUn | Ceq | Cgt | CgtUn | Clt | CltUn
        | Ldelem | LdelemI | LdelemI1 | LdelemI2 | LdelemI4 | LdelemI8 | LdelemR4 | LdelemR8
        | LdelemRef | LdelemU1 | LdelemU2 | LdelemU4 | Ldelema => normal(2, true),
        Pop | Starg | Stloc | Stsfld | Brtrue | Brfalse | Switch | Throw | Initobj | Endfilter => {
            normal(1, false)
        }
        Stfld | StindI | StindI1 | StindI2 | StindI4 | StindI8 | StindR4 | StindR8 | StindRef
        | Beq | Bge | BgeUn | Bgt | BgtUn | Ble | BleUn | Blt | BltUn | BneUn | Stobj | Cpobj => {
            normal(2, false)
        }
        Stelem | StelemI | StelemI1 | StelemI2 | StelemI4 | StelemI8 | StelemR4 | StelemR8
        | StelemRef | Cpblk | Initblk => normal(3, false),
        Dup => Ok(Effect::Dup),
        Leave | Endfinally => Ok(Effect::Clear),
        Ret => Ok(Effect::Ret),
        Call | Callvirt => {
            let callee = method_operand()?;
            normal(call_arity(program, callee, true), returns_value(program, callee))
        }
        Newobj => {
            let ctor = method_operand()?;
            normal(call_arity(program, ctor, false), true)
        }
        Calli => {
            let signature = match &instr.operand {
                Operand::Type(ty) => match &program.ty(*ty).kind {
                    TypeKind::FunctionPointer { signature } => Some(signature),
                    _ => None,
                },
                _ => None,
            };
            let signature = signature.ok_or_else(|| TranslateError::InvalidOperand {
                opcode: instr.opcode.mnemonic().to_string(),
                offset: instr.offset,
                expected: "function pointer type",
            })?;
            let pops = 1 + signature.parameters.len() + usize::from(signature.has_this);
            normal(pops, !program.is_void(signature.return_type))
        }
        ArrayAddr | ArrayCreate | ArrayCreateWithLowerBound | ArrayGet | ArraySet => {
            normal(instr.operands().count(), instr.ty.is_some())
        }
    }
}

fn note_needs(program: &Program, body: &MethodBody, instr: &Instruction, needs: &mut MethodNeeds) {
    use OpCode::*;
    match instr.opcode {
        AddOvf | AddOvfUn | SubOvf | SubOvfUn | MulOvf | MulOvfUn | ConvOvfI | ConvOvfIUn
        | ConvOvfI1 | ConvOvfI1Un | ConvOvfI2 | ConvOvfI2Un | ConvOvfI4 | ConvOvfI4Un | ConvOvfI8
        | ConvOvfI8Un | ConvOvfU | ConvOvfUUn | ConvOvfU1 | ConvOvfU1Un | ConvOvfU2
        | ConvOvfU2Un | ConvOvfU4 | ConvOvfU4Un | ConvOvfU8 | ConvOvfU8Un => {
            needs.needs_overflow_flag = true;
            needs.may_throw = true;
        }
        Ldelem | LdelemI | LdelemI1 | LdelemI2 | LdelemI4 | LdelemI8 | LdelemR4 | LdelemR8
        | LdelemRef | LdelemU1 | LdelemU2 | LdelemU4 | Ldelema | Stelem | StelemI | StelemI1
        | StelemI2 | StelemI4 | StelemI8 | StelemR4 | StelemR8 | StelemRef => {
            needs.needs_element_address = true;
            needs.may_throw = true;
        }
        Callvirt | Ldvirtftn => {
            needs.may_throw = true;
            if let Operand::Method(callee) = instr.operand {
                let def = program.method(callee);
                if def.is_virtual() {
                    needs.needs_virtual_ptr = true;
                }
                let receiver = instr
                    .operand1
                    .and_then(|r| body.instr(r).ty)
                    .and_then(|t| program.pointee(t).filter(|_| program.is_managed_pointer(t)));
                if let Some(target) = receiver {
                    if instr.opcode == Callvirt
                        && program.is_value_type(target)
                        && !program.declares_matching_method(target, callee)
                    {
                        needs.needs_boxed_receiver = true;
                    }
                }
            }
        }
        Div | DivUn | Rem | RemUn | Ckfinite | Ldfld | Ldflda | Stfld | Ldsfld | Ldsflda | Stsfld
        | Ldlen | LdindI | LdindI1 | LdindI2 | LdindI4 | LdindI8 | LdindR4 | LdindR8 | LdindRef
        | LdindU1 | LdindU2 | LdindU4 | StindI | StindI1 | StindI2 | StindI4 | StindI8
        | StindR4 | StindR8 | StindRef | Box | Unbox | UnboxAny | Castclass | Isinst | Newarr
        | Newobj | Call | Calli | Throw | Rethrow | Localloc | Leave | Ret | Endfinally => {
            needs.may_throw = true
        }
        _ => {}
    }
}

/// Bind every stack-producing instruction of `method` to a temporary
pub fn allocate(program: &Program, method: MethodId) -> TranslateResult<SlotAllocation> {
    let def = program.method(method);
    let body = program.require_body(method)?;
    let mut alloc = SlotAllocation {
        temps: IndexMap::new(),
        bindings: vec![None; body.instructions.len()],
        needs: MethodNeeds::default(),
    };
    let underflow = |offset| TranslateError::StackUnderflow {
        method: program.method_display_name(method),
        offset,
    };

    for block in &body.blocks {
        let mut stack: Vec<(InstrId, usize)> = Vec::with_capacity(block.entry_stack.len() + 4);
        for &entry in &block.entry_stack {
            let ty = program.stack_type(result_type(program, def, body, body.instr(entry))?)?;
            let temp = alloc.temp_index(stack.len() as u32, ty);
            alloc.bind(entry, temp)?;
            stack.push((entry, temp));
        }

        for &id in &block.instructions {
            let instr = body.instr(id);
            note_needs(program, body, instr, &mut alloc.needs);
            match stack_effect(program, instr)? {
                Effect::Normal { pops, push } => {
                    if stack.len() < pops {
                        return Err(underflow(instr.offset));
                    }
                    let linked = instr.operands().count();
                    if linked < pops {
                        return Err(TranslateError::MissingOperand {
                            opcode: instr.opcode.mnemonic().to_string(),
                            offset: instr.offset,
                            what: "operand link",
                        });
                    }
                    stack.truncate(stack.len() - pops);
                    if push {
                        let ty = program.stack_type(result_type(program, def, body, instr)?)?;
                        let temp = alloc.temp_index(stack.len() as u32, ty);
                        alloc.bind(id, temp)?;
                        stack.push((id, temp));
                    }
                }
                Effect::Dup => {
                    let &(_, source) = stack.last().ok_or_else(|| underflow(instr.offset))?;
                    let ty = alloc
                        .temps
                        .get_index(source)
                        .map(|(key, _)| key.1)
                        .ok_or_else(|| TranslateError::internal("dangling stack slot"))?;
                    let temp = alloc.temp_index(stack.len() as u32, ty);
                    alloc.bind(id, temp)?;
                    stack.push((id, temp));
                }
                Effect::Clear => stack.clear(),
                Effect::Ret => {
                    if !program.is_void(def.return_type) && stack.pop().is_none() {
                        return Err(underflow(instr.offset));
                    }
                }
            }
            trace!("{} IL_{:04x} {} depth {}", def.name, instr.offset, instr.opcode.mnemonic(), stack.len());
        }
    }

    if body.has_catch() {
        let uintptr = program.primitive(PrimitiveType::UIntPtr)?;
        alloc.temp_index(0, uintptr);
    }
    if !body.regions.is_empty() {
        alloc.needs.may_throw = true;
    }
    Ok(alloc)
}
