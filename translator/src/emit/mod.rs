//! Method Emitter
//!
//! Translates one method body into a C function. Blocks become labels
//! (`l<offset>`), stack values live in the temporaries chosen by the
//! stack-slot allocator, and every instruction family is lowered by its own
//! submodule. Exceptions are plain return values: a callee that fails
//! returns the exception object, and the emitted code either jumps to a
//! matching handler in the same function or returns it to its caller.

pub mod arithmetic;
pub mod calls;
pub mod casts;
pub mod exceptions;
pub mod memory;
pub mod signature;
pub mod synthesized;

use crate::ctypes::{is_aggregate, storage_type};
use crate::error::{TranslateError, TranslateResult};
use crate::layout::statics::static_constructor_check;
use crate::mangler::sanitize_local;
use crate::metadata::{
    check_flags, BasicBlock, FieldId, HandlerKind, InstrId, Instruction, MethodBody, MethodDef,
    MethodId, OpCode, Operand, Program, TypeId,
};
use crate::session::TranslationSession;
use crate::source_writer::SourceWriter;
use crate::stack_slots::{self, result_type, SlotAllocation};
use fxhash::FxHashSet;
use indexmap::IndexMap;
use log::{debug, trace};

/// Exceptions raised by checks the emitted code performs itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeFault {
    Arithmetic,
    DivideByZero,
    InvalidCast,
    NullReference,
    OutOfMemory,
    Overflow,
    StackOverflow,
}

impl RuntimeFault {
    /// Runtime helper that allocates the exception object
    pub fn helper(self) -> &'static str {
        match self {
            RuntimeFault::Arithmetic => "GetArithmeticException",
            RuntimeFault::DivideByZero => "GetDivideByZeroException",
            RuntimeFault::InvalidCast => "GetInvalidCastException",
            RuntimeFault::NullReference => "GetNullReferenceException",
            RuntimeFault::OutOfMemory => "GetOutOfMemoryException",
            RuntimeFault::Overflow => "GetOverflowException",
            RuntimeFault::StackOverflow => "GetStackOverflowException",
        }
    }

    /// Block-local variable receiving the new exception object
    pub fn variable(self) -> &'static str {
        match self {
            RuntimeFault::Arithmetic => "arithmeticException",
            RuntimeFault::DivideByZero => "divideByZeroException",
            RuntimeFault::InvalidCast => "invalidCastException",
            RuntimeFault::NullReference => "nullReferenceException",
            RuntimeFault::OutOfMemory => "outOfMemoryException",
            RuntimeFault::Overflow => "overflowException",
            RuntimeFault::StackOverflow => "stackOverflowException",
        }
    }

    pub fn exception_type(self, program: &Program) -> TypeId {
        let e = &program.well_known.exceptions;
        match self {
            RuntimeFault::Arithmetic => e.arithmetic,
            RuntimeFault::DivideByZero => e.divide_by_zero,
            RuntimeFault::InvalidCast => e.invalid_cast,
            RuntimeFault::NullReference => e.null_reference,
            RuntimeFault::OutOfMemory => e.out_of_memory,
            RuntimeFault::Overflow => e.overflow,
            RuntimeFault::StackOverflow => e.stack_overflow,
        }
    }
}

/// `l<offset>`, the label of the block starting at `offset`
pub fn block_label(offset: u32) -> String {
    format!("l{:04x}", offset)
}

pub struct MethodEmitter<'s, 'p> {
    pub(crate) session: &'s mut TranslationSession<'p>,
    pub(crate) program: &'p Program,
    pub(crate) method: MethodId,
    pub(crate) def: &'p MethodDef,
    pub(crate) body: &'p MethodBody,
    pub(crate) slots: SlotAllocation,
    pub(crate) out: SourceWriter,
    locals: Vec<String>,
    /// Most recent instruction other than `unaligned.`; prefixes apply to
    /// the instruction that follows them
    previous: Option<&'p Instruction>,
    /// Continuation labels reachable through `lexpSwitch<try start>`
    pub(crate) switch_tables: IndexMap<u32, Vec<String>>,
}

/// Translate the body of `method` into a complete C function definition
pub fn emit_method(session: &mut TranslationSession<'_>, method: MethodId) -> TranslateResult<String> {
    let emitter = MethodEmitter::new(session, method)?;
    emitter.emit()
}

impl<'s, 'p> MethodEmitter<'s, 'p> {
    pub fn new(session: &'s mut TranslationSession<'p>, method: MethodId) -> TranslateResult<Self> {
        let program = session.program;
        let def = program.method(method);
        let body = program.require_body(method)?;

        for region in &body.regions {
            if region.kind == HandlerKind::Filter {
                return Err(TranslateError::UnsupportedOpcode {
                    opcode: OpCode::Endfilter.mnemonic().to_string(),
                    offset: region.handler_start,
                });
            }
            if !body.blocks.iter().any(|b| b.offset == region.handler_start) {
                return Err(TranslateError::HandlerMissing {
                    method: program.method_display_name(method),
                    handler_start: region.handler_start,
                });
            }
        }

        let mut slots = stack_slots::allocate(program, method)?;
        for block in &body.blocks {
            let mut previous: Option<&Instruction> = None;
            for &id in &block.instructions {
                let instr = body.instr(id);
                if needs_boxed_receiver(program, def, body, previous, instr)? {
                    slots.needs.needs_boxed_receiver = true;
                }
                if instr.opcode != OpCode::Unaligned {
                    previous = Some(instr);
                }
            }
        }

        let mut taken: FxHashSet<String> = (0..def.parameters.len())
            .map(|i| signature::parameter_name(def, i))
            .collect();
        let locals = body
            .locals
            .iter()
            .enumerate()
            .map(|(index, local)| {
                let base = if local.name.is_empty() {
                    format!("local{}", index)
                } else {
                    sanitize_local(&local.name)
                };
                let name = if taken.contains(&base) {
                    format!("{}_{}", base, index)
                } else {
                    base
                };
                taken.insert(name.clone());
                name
            })
            .collect();

        let mut switch_tables = IndexMap::new();
        for region in &body.regions {
            switch_tables.entry(region.try_start).or_insert_with(Vec::new);
        }

        Ok(MethodEmitter {
            session,
            program,
            method,
            def,
            body,
            slots,
            out: SourceWriter::new(),
            locals,
            previous: None,
            switch_tables,
        })
    }

    pub fn emit(mut self) -> TranslateResult<String> {
        debug!(
            "emitting {} ({} temps)",
            self.program.method_display_name(self.method),
            self.slots.temp_count()
        );
        let signature = signature::method_signature(self.session, self.method)?;
        self.out.open(signature);
        self.declarations()?;
        self.entry_check();

        let body = self.body;
        for block in &body.blocks {
            self.emit_block(block)?;
        }
        self.emit_exception_tables()?;
        self.out.close("");
        Ok(self.out.finish())
    }

    fn declarations(&mut self) -> TranslateResult<()> {
        let needs = self.slots.needs;
        let body = self.body;
        if needs.may_throw || !body.regions.is_empty() {
            self.out.line("uintptr_t exception = 0;");
        }
        if body.has_catch() {
            self.out.line("uintptr_t originalException = 0;");
            self.out.line("uint32_t canHandleExp = 0;");
        }
        if !body.regions.is_empty() {
            self.out.line("uint32_t throwOffset = 0;");
            self.out.line("uintptr_t pendingException = 0;");
            let starts: Vec<u32> = self.switch_tables.keys().copied().collect();
            for start in starts {
                self.out.line(format!("int32_t expSwitchVal{:04x} = 0;", start));
            }
        }
        if needs.needs_overflow_flag {
            self.out.line("uint32_t overflowFlag = 0;");
        }
        if needs.needs_element_address {
            self.out.line("uintptr_t element_address;");
        }
        if needs.needs_virtual_ptr {
            self.out.line("uintptr_t* virtualPtr;");
            self.out.line("uintptr_t virtualFunction;");
        }
        if needs.needs_boxed_receiver {
            self.out.line("uintptr_t boxedReceiver;");
        }

        let mut cleared = Vec::new();
        for (index, local) in body.locals.iter().enumerate() {
            let name = self.locals[index].clone();
            if local.by_ref {
                self.out.line(format!("uintptr_t {} = 0;", name));
            } else if self.program.is_va_list(local.ty) {
                self.out.line(format!("va_list {};", name));
            } else if is_aggregate(self.program, local.ty) {
                let storage = storage_type(self.session, local.ty)?;
                self.out.line(format!("{} {};", storage, name));
                cleared.push(name);
            } else {
                let storage = storage_type(self.session, local.ty)?;
                self.out.line(format!("{} {} = 0;", storage, name));
            }
        }

        let temps: Vec<(String, TypeId)> = self.slots.temps().map(|t| (t.name.clone(), t.ty)).collect();
        for (name, ty) in temps {
            let storage = storage_type(self.session, ty)?;
            if self.session.config.emit_temp_comments {
                self.out.line(format!(
                    "{} {}; // {}",
                    storage,
                    name,
                    self.program.display_name(ty)
                ));
            } else {
                self.out.line(format!("{} {};", storage, name));
            }
        }

        for name in cleared {
            self.out.line(format!("memset(&{}, 0, sizeof({}));", name, name));
        }
        Ok(())
    }

    /// Types without `beforefieldinit` run their initializer before any of
    /// their methods
    fn entry_check(&mut self) {
        let declaring = self.def.declaring_type;
        if self.def.flags.static_constructor || self.program.ty(declaring).flags.before_field_init {
            return;
        }
        if self.session.has_static_constructor(declaring) {
            let check = static_constructor_check(self.session, declaring);
            self.out.line(format!("{}();", check));
        }
    }

    fn emit_block(&mut self, block: &'p BasicBlock) -> TranslateResult<()> {
        self.out.label(block_label(block.offset));
        let catch_entry = self
            .body
            .regions
            .iter()
            .any(|r| r.kind == HandlerKind::Catch && r.handler_start == block.offset);
        if catch_entry {
            self.out.line("originalException = exception;");
            if let Some(&caught) = block.entry_stack.first() {
                let slot = self.value(caught)?;
                self.out.line(format!("{} = exception;", slot));
            }
            self.out.line("exception = 0;");
        }

        self.previous = None;
        let body = self.body;
        for &id in &block.instructions {
            let instr = body.instr(id);
            trace!("  {:04x}: {}", instr.offset, instr.opcode.mnemonic());
            self.emit_instruction(id, instr)?;
            if instr.opcode != OpCode::Unaligned {
                self.previous = Some(instr);
            }
        }
        Ok(())
    }

    fn emit_instruction(&mut self, id: InstrId, instr: &'p Instruction) -> TranslateResult<()> {
        use OpCode::*;
        match instr.opcode {
            Nop | Pop | Volatile | Unaligned | Tail | Readonly | Constrained | No => Ok(()),
            Break => {
                self.out.line("__debugbreak();");
                Ok(())
            }
            LdcI4 | LdcI8 | LdcR4 | LdcR8 | Ldnull | Ldstr | Ldtoken => self.emit_constant(id, instr),
            Ldarg | Ldarga | Starg | Ldloc | Ldloca | Stloc | Dup => self.emit_variable(id, instr),
            Add | Sub | Mul | And | Or | Xor | Shl | Shr | ShrUn | Div | DivUn | Rem | RemUn | Neg
            | Not | AddOvf | AddOvfUn | SubOvf | SubOvfUn | MulOvf | MulOvfUn | Ckfinite => {
                self.emit_arithmetic(id, instr)
            }
            Ceq | Cgt | CgtUn | Clt | CltUn => self.emit_compare(id, instr),
            Br | Brtrue | Brfalse | Beq | Bge | BgeUn | Bgt | BgtUn | Ble | BleUn | Blt | BltUn
            | BneUn | Switch => self.emit_branch(instr),
            ConvI | ConvI1 | ConvI2 | ConvI4 | ConvI8 | ConvU | ConvU1 | ConvU2 | ConvU4 | ConvU8
            | ConvR4 | ConvR8 | ConvRUn | ConvOvfI | ConvOvfIUn | ConvOvfI1 | ConvOvfI1Un
            | ConvOvfI2 | ConvOvfI2Un | ConvOvfI4 | ConvOvfI4Un | ConvOvfI8 | ConvOvfI8Un
            | ConvOvfU | ConvOvfUUn | ConvOvfU1 | ConvOvfU1Un | ConvOvfU2 | ConvOvfU2Un
            | ConvOvfU4 | ConvOvfU4Un | ConvOvfU8 | ConvOvfU8Un => self.emit_conversion(id, instr),
            Ldfld | Ldflda | Stfld | Ldsfld | Ldsflda | Stsfld => self.emit_field(id, instr),
            Newarr | Ldlen | Ldelem | LdelemI | LdelemI1 | LdelemI2 | LdelemI4 | LdelemI8
            | LdelemR4 | LdelemR8 | LdelemRef | LdelemU1 | LdelemU2 | LdelemU4 | Ldelema | Stelem
            | StelemI | StelemI1 | StelemI2 | StelemI4 | StelemI8 | StelemR4 | StelemR8
            | StelemRef => self.emit_array(id, instr),
            LdindI | LdindI1 | LdindI2 | LdindI4 | LdindI8 | LdindR4 | LdindR8 | LdindRef
            | LdindU1 | LdindU2 | LdindU4 | StindI | StindI1 | StindI2 | StindI4 | StindI8
            | StindR4 | StindR8 | StindRef | Ldobj | Stobj | Cpobj | Initobj | Cpblk | Initblk
            | Sizeof | Localloc => self.emit_memory(id, instr),
            Call | Callvirt | Calli | Newobj | Ldftn | Ldvirtftn => self.emit_call(id, instr),
            Box | Unbox | UnboxAny | Castclass | Isinst => self.emit_cast(id, instr),
            Throw | Rethrow | Leave | Endfinally => self.emit_exception_flow(instr),
            Ret => self.emit_return(instr),
            Jmp | Arglist | Mkrefany | Refanytype | Refanyval | Endfilter | ArrayAddr | ArrayCreate
            | ArrayCreateWithLowerBound | ArrayGet | ArraySet | EntryValue => Err(self.unsupported(instr)),
        }
    }

    pub(crate) fn unsupported(&self, instr: &Instruction) -> TranslateError {
        TranslateError::UnsupportedOpcode {
            opcode: instr.opcode.mnemonic().to_string(),
            offset: instr.offset,
        }
    }

    pub(crate) fn invalid_operand(&self, instr: &Instruction, expected: &'static str) -> TranslateError {
        TranslateError::InvalidOperand {
            opcode: instr.opcode.mnemonic().to_string(),
            offset: instr.offset,
            expected,
        }
    }

    // Stack values

    /// Temporary holding the value produced by `id`
    pub(crate) fn value(&self, id: InstrId) -> TranslateResult<String> {
        self.slots
            .temp_of(id)
            .map(|t| t.name.clone())
            .ok_or_else(|| TranslateError::internal(format!("no stack slot bound to {}", id)))
    }

    /// Stack operand `n` of `instr`, in push order
    pub(crate) fn operand(&self, instr: &Instruction, n: usize) -> TranslateResult<InstrId> {
        instr.operands().nth(n).ok_or_else(|| TranslateError::MissingOperand {
            opcode: instr.opcode.mnemonic().to_string(),
            offset: instr.offset,
            what: "operand link",
        })
    }

    /// Temporary of stack operand `n`
    pub(crate) fn operand_value(&self, instr: &Instruction, n: usize) -> TranslateResult<String> {
        self.value(self.operand(instr, n)?)
    }

    /// Static (pre-normalization) type of the value `id` produces
    pub(crate) fn static_type(&self, id: InstrId) -> TranslateResult<TypeId> {
        result_type(self.program, self.def, self.body, self.body.instr(id))
    }

    /// Normalized stack type of the value `id` produces
    pub(crate) fn slot_type(&self, id: InstrId) -> TranslateResult<TypeId> {
        self.slots
            .temp_of(id)
            .map(|t| t.ty)
            .ok_or_else(|| TranslateError::internal(format!("no stack slot bound to {}", id)))
    }

    pub(crate) fn is_this(&self, id: InstrId) -> bool {
        let instr = self.body.instr(id);
        instr.opcode == OpCode::Ldarg && instr.operand == Operand::This
    }

    // Prefixes

    pub(crate) fn prefixed(&self, prefix: OpCode) -> bool {
        self.previous.is_some_and(|p| p.opcode == prefix)
    }

    pub(crate) fn constrained_type(&self) -> Option<TypeId> {
        match self.previous {
            Some(Instruction {
                opcode: OpCode::Constrained,
                operand: Operand::Type(ty),
                ..
            }) => Some(*ty),
            _ => None,
        }
    }

    /// Whether a `no.` prefix suppresses the given check
    pub(crate) fn suppressed(&self, check: u8) -> bool {
        match self.previous {
            Some(Instruction {
                opcode: OpCode::No,
                operand: Operand::CheckFlags(flags),
                ..
            }) => flags & check != 0,
            _ => false,
        }
    }

    pub(crate) fn wants_null_check(&self, receiver: InstrId) -> bool {
        !self.is_this(receiver) && !self.suppressed(check_flags::NULL_CHECK)
    }

    pub(crate) fn memory_barrier_if_volatile(&mut self) {
        if self.prefixed(OpCode::Volatile) {
            self.out.line("MemoryBarrier();");
        }
    }

    // Names

    pub(crate) fn local_name(&self, index: u32) -> TranslateResult<&str> {
        self.locals
            .get(index as usize)
            .map(String::as_str)
            .ok_or_else(|| TranslateError::internal(format!("local {} out of range", index)))
    }

    pub(crate) fn object_struct(&mut self) -> String {
        format!("struct {}", self.session.type_name(self.program.well_known.object))
    }

    /// `((struct D*)(object - sizeof(struct Object)))->field`, where `D`
    /// declares the field
    pub(crate) fn object_field(&mut self, object: &str, field: FieldId) -> String {
        let declaring = self.program.field(field).declaring_type;
        self.object_field_as(object, field, declaring)
    }

    pub(crate) fn object_field_as(&mut self, object: &str, field: FieldId, layout: TypeId) -> String {
        let header = self.object_struct();
        let layout = self.session.type_name(layout);
        let name = self.session.field_name(field);
        format!("((struct {}*)({} - sizeof({})))->{}", layout, object, header, name)
    }

    /// Expression reading the type object pointer from an object header
    pub(crate) fn type_object_of(&mut self, object: &str) -> String {
        let field = self.program.well_known.object_type_field;
        self.object_field(object, field)
    }

    pub(crate) fn cctor_check(&mut self, ty: TypeId) {
        if self.def.flags.static_constructor && self.def.declaring_type == ty {
            return;
        }
        if self.session.has_static_constructor(ty) {
            let check = static_constructor_check(self.session, ty);
            self.out.line(format!("{}();", check));
        }
    }

    // Copies

    /// `dst = src;`, or a `memcpy` for struct-typed values
    pub(crate) fn assign(&mut self, dst: &str, src: &str, ty: TypeId) -> TranslateResult<()> {
        if is_aggregate(self.program, ty) {
            self.out.line(format!("memcpy(&{}, &{}, sizeof({}));", dst, src, dst));
        } else {
            self.out.line(format!("{} = {};", dst, src));
        }
        Ok(())
    }

    /// Store `value` at the address `address` as a `ty`
    pub(crate) fn store_through(&mut self, address: &str, value: &str, ty: TypeId) -> TranslateResult<()> {
        let storage = storage_type(self.session, ty)?;
        if is_aggregate(self.program, ty) {
            self.out.line(format!("memcpy((void*){}, &{}, sizeof({}));", address, value, storage));
        } else {
            self.out.line(format!("*(({}*){}) = ({}){};", storage, address, storage, value));
        }
        Ok(())
    }

    /// Load a `ty` from the address `address` into `dst`
    pub(crate) fn load_through(&mut self, dst: &str, address: &str, ty: TypeId) -> TranslateResult<()> {
        let storage = storage_type(self.session, ty)?;
        if is_aggregate(self.program, ty) {
            self.out.line(format!("memcpy(&{}, (void*){}, sizeof({}));", dst, address, storage));
        } else {
            self.out.line(format!("{} = *(({}*){});", dst, storage, address));
        }
        Ok(())
    }
}

/// An instance call whose receiver is a value type that does not itself
/// declare the method must box the receiver first. The value type comes
/// from a `constrained.` prefix or from a managed-pointer receiver.
fn needs_boxed_receiver(
    program: &Program,
    def: &MethodDef,
    body: &MethodBody,
    previous: Option<&Instruction>,
    instr: &Instruction,
) -> TranslateResult<bool> {
    if !matches!(instr.opcode, OpCode::Call | OpCode::Callvirt | OpCode::Ldvirtftn) {
        return Ok(false);
    }
    let (Operand::Method(callee), Some(receiver)) = (&instr.operand, instr.operand1) else {
        return Ok(false);
    };
    let callee_def = program.method(*callee);
    if callee_def.is_static() || callee_def.intrinsic.is_some() || callee_def.flags.c_runtime {
        return Ok(false);
    }
    let constrained = match previous {
        Some(Instruction {
            opcode: OpCode::Constrained,
            operand: Operand::Type(ty),
            ..
        }) => Some(*ty),
        _ => None,
    };
    let target = match constrained {
        Some(ty) => ty,
        None => {
            let receiver_type = result_type(program, def, body, body.instr(receiver))?;
            match program.pointee(receiver_type) {
                Some(target) if program.is_managed_pointer(receiver_type) => target,
                _ => return Ok(false),
            }
        }
    };
    Ok(program.is_value_type(target)
        && !program.is_generic_parameter(target)
        && !program.declares_matching_method(target, *callee))
}
