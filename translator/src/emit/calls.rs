//! Calls, object construction and function pointers
//!
//! Every translated callee returns its exception (0 for none), so a call is
//! always `exception = f(args..., (uintptr_t)&result);` followed by the
//! propagation check. Virtual calls read the target from the receiver's
//! type object: the interface method table sits right after the
//! `RuntimeType` header (one slot for the overflow table, then `IMTSIZE`
//! entries) and the virtual method table follows it.

use super::signature::is_delegate_constructor;
use super::MethodEmitter;
use crate::ctypes::{function_pointer_parameters, is_aggregate, is_scalar_in_c, storage_type};
use crate::error::{TranslateError, TranslateResult};
use crate::layout::statics::interface_method_id;
use crate::layout::vtable::virtual_table;
use crate::metadata::{
    InstrId, Instruction, Intrinsic, MethodId, OpCode, Operand, PrimitiveType, TypeId,
    TypeKind,
};
use log::trace;

/// How the receiver of an instance call reaches the callee
struct Receiver {
    expression: String,
    /// Type whose method table is consulted
    exact: TypeId,
}

/// Where a dispatched call finds its target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dispatch {
    /// `virtualFunction`, fetched from the interface method table
    Interface,
    /// `*virtualPtr`, a virtual method table slot
    Table,
}

impl Dispatch {
    fn address(self) -> &'static str {
        match self {
            Dispatch::Interface => "virtualFunction",
            Dispatch::Table => "*virtualPtr",
        }
    }

    fn callee(self, method_name: &str) -> String {
        format!("(({}_ptr){})", method_name, self.address())
    }
}

impl<'s, 'p> MethodEmitter<'s, 'p> {
    pub(crate) fn emit_call(&mut self, id: InstrId, instr: &Instruction) -> TranslateResult<()> {
        match instr.opcode {
            OpCode::Ldftn => {
                let method = self.method_operand(instr)?;
                let name = self.session.method_name(method);
                let result = self.value(id)?;
                self.out.line(format!("{} = (uintptr_t)&{};", result, name));
                Ok(())
            }
            OpCode::Ldvirtftn => self.emit_virtual_function_pointer(id, instr),
            OpCode::Calli => self.emit_calli(id, instr),
            OpCode::Newobj => self.emit_newobj(id, instr),
            _ => self.emit_method_call(id, instr),
        }
    }

    fn method_operand(&self, instr: &Instruction) -> TranslateResult<MethodId> {
        match instr.operand {
            Operand::Method(method) => Ok(method),
            _ => Err(self.invalid_operand(instr, "method")),
        }
    }

    /// A stack value as a call argument; struct-typed values travel by
    /// address
    fn argument(&self, id: InstrId, c_runtime: bool) -> TranslateResult<String> {
        let value = self.value(id)?;
        let ty = self.slot_type(id)?;
        if is_aggregate(self.program, ty) {
            return Ok(if c_runtime {
                format!("(void*)&{}", value)
            } else {
                format!("(uintptr_t)&{}", value)
            });
        }
        if c_runtime
            && matches!(
                self.program.primitive_of(ty),
                Some(PrimitiveType::IntPtr | PrimitiveType::UIntPtr)
            )
        {
            return Ok(format!("(void*){}", value));
        }
        Ok(value)
    }

    fn arguments(&self, operands: &[InstrId], c_runtime: bool) -> TranslateResult<Vec<String>> {
        operands.iter().map(|&op| self.argument(op, c_runtime)).collect()
    }

    /// `exception = callee(args..., &result);` and propagation. When the
    /// callee's result storage is narrower or wider than the stack slot the
    /// result lands in a scratch variable first.
    fn finish_call(
        &mut self,
        id: InstrId,
        callee: &str,
        mut arguments: Vec<String>,
        return_type: TypeId,
        returns_by_ref: bool,
        offset: u32,
    ) -> TranslateResult<()> {
        let result = match self.slots.temp_of(id) {
            Some(temp) if !self.program.is_void(return_type) => temp.name.clone(),
            _ => {
                self.out.line(format!("exception = {}({});", callee, arguments.join(", ")));
                self.propagate(offset);
                return Ok(());
            }
        };
        let slot_storage = storage_type(self.session, self.slot_type(id)?)?;
        let return_storage = if returns_by_ref {
            "uintptr_t".to_string()
        } else {
            storage_type(self.session, return_type)?
        };
        if slot_storage == return_storage {
            arguments.push(format!("(uintptr_t)&{}", result));
            self.out.line(format!("exception = {}({});", callee, arguments.join(", ")));
            self.propagate(offset);
        } else {
            self.out.open("");
            self.out.line(format!("{} callResult;", return_storage));
            arguments.push("(uintptr_t)&callResult".to_string());
            self.out.line(format!("exception = {}({});", callee, arguments.join(", ")));
            self.propagate(offset);
            self.out.line(format!("{} = ({})callResult;", result, slot_storage));
            self.out.close("");
        }
        Ok(())
    }

    fn emit_method_call(&mut self, id: InstrId, instr: &Instruction) -> TranslateResult<()> {
        let callee = self.method_operand(instr)?;
        let def = self.program.method(callee);
        let operands: Vec<InstrId> = instr.operands().collect();
        trace!("call {}", self.program.method_display_name(callee));

        if let Some(intrinsic) = def.intrinsic {
            return self.emit_intrinsic(id, instr, intrinsic, &operands);
        }
        if def.flags.c_runtime {
            return self.emit_runtime_call(id, callee, &operands);
        }
        if def.is_static() {
            let name = self.session.method_name(callee);
            let arguments = self.arguments(&operands, false)?;
            return self.finish_call(id, &name, arguments, def.return_type, def.returns_by_ref, instr.offset);
        }

        let (&receiver_id, rest) = operands.split_first().ok_or_else(|| TranslateError::MissingOperand {
            opcode: instr.opcode.mnemonic().to_string(),
            offset: instr.offset,
            what: "receiver",
        })?;
        let receiver = self.receiver(receiver_id, callee, instr.offset)?;
        let mut arguments = vec![receiver.expression.clone()];
        arguments.extend(self.arguments(rest, false)?);

        let dispatch = instr.opcode == OpCode::Callvirt && def.is_virtual();
        let target = if dispatch {
            match self.devirtualized(receiver.exact, callee) {
                Some(implementation) => self.session.method_name(implementation),
                None => {
                    let dispatch = self.dispatch(&receiver, callee)?;
                    dispatch.callee(&self.session.method_name(callee))
                }
            }
        } else {
            self.session.method_name(callee)
        };
        self.finish_call(id, &target, arguments, def.return_type, def.returns_by_ref, instr.offset)
    }

    /// Null-checks, dereferences or boxes the receiver of an instance call
    fn receiver(&mut self, id: InstrId, callee: MethodId, offset: u32) -> TranslateResult<Receiver> {
        let program = self.program;
        let value = self.value(id)?;
        let static_ty = self.static_type(id)?;
        let pointee = self
            .constrained_type()
            .or_else(|| program.pointee(static_ty).filter(|_| program.is_managed_pointer(static_ty)));

        let Some(target) = pointee else {
            if !program.is_value_type(static_ty) && self.wants_null_check(id) {
                self.null_check(&value, offset);
            }
            return Ok(Receiver {
                expression: self.argument(id, false)?,
                exact: static_ty,
            });
        };

        if !program.is_value_type(target) || program.is_generic_parameter(target) {
            return Ok(Receiver {
                expression: format!("(*(uintptr_t*){})", value),
                exact: target,
            });
        }
        if program.declares_matching_method(target, callee) {
            return Ok(Receiver {
                expression: value,
                exact: target,
            });
        }
        let storage = storage_type(self.session, target)?;
        self.box_value("boxedReceiver", &format!("(*(({}*){}))", storage, value), target, offset)?;
        Ok(Receiver {
            expression: "boxedReceiver".to_string(),
            exact: target,
        })
    }

    /// The implementation a virtual call resolves to when the receiver's
    /// exact type is known
    fn devirtualized(&self, exact: TypeId, callee: MethodId) -> Option<MethodId> {
        let program = self.program;
        if !program.is_sealed(exact) || program.is_interface(exact) {
            return None;
        }
        let declaring = program.method(callee).declaring_type;
        let implementation = if program.is_interface(declaring) {
            program.interface_implementation(exact, callee)
        } else {
            program.find_implementation(exact, callee)
        }?;
        Some(implementation).filter(|&m| !program.method(m).flags.is_abstract)
    }

    /// Loads the dispatch target into `virtualPtr`/`virtualFunction`
    fn dispatch(&mut self, receiver: &Receiver, callee: MethodId) -> TranslateResult<Dispatch> {
        let program = self.program;
        let type_object = self.type_object_of(&receiver.expression);
        let object = self.object_struct();
        let runtime_type = format!("struct {}", self.session.type_name(program.well_known.runtime_type));
        let declaring = program.method(callee).declaring_type;

        if program.is_interface(declaring) {
            let id = interface_method_id(self.session, callee);
            self.out.line(format!(
                "virtualPtr = (uintptr_t*)({} - sizeof({}) + sizeof({}) + sizeof(uintptr_t));",
                type_object, object, runtime_type
            ));
            self.out.line(format!("virtualFunction = *(virtualPtr + ({} % IMTSIZE));", id));
            self.out.open("if (virtualFunction == 1)");
            self.out.line(format!(
                "GetFunctionPointerForInterfaceID(*(virtualPtr - 1), {}, (uintptr_t)&virtualFunction);",
                id
            ));
            self.out.close("");
            return Ok(Dispatch::Interface);
        }

        let vmt = virtual_table(self.session, declaring)?;
        let slot = vmt.slot_of(callee).ok_or_else(|| TranslateError::UnresolvedVirtualSlot {
            method: program.method_display_name(callee),
        })?;
        self.out.line(format!(
            "virtualPtr = (uintptr_t*)({} - sizeof({}) + sizeof({}) + (1 + IMTSIZE) * sizeof(uintptr_t));",
            type_object, object, runtime_type
        ));
        self.out.line(format!("virtualPtr += {};", slot));
        Ok(Dispatch::Table)
    }

    fn emit_virtual_function_pointer(&mut self, id: InstrId, instr: &Instruction) -> TranslateResult<()> {
        let callee = self.method_operand(instr)?;
        let receiver_id = self.operand(instr, 0)?;
        let receiver = self.receiver(receiver_id, callee, instr.offset)?;
        let result = self.value(id)?;
        if !self.program.method(callee).is_virtual() {
            let name = self.session.method_name(callee);
            self.out.line(format!("{} = (uintptr_t)&{};", result, name));
            return Ok(());
        }
        let dispatch = self.dispatch(&receiver, callee)?;
        self.out.line(format!("{} = (uintptr_t){};", result, dispatch.address()));
        Ok(())
    }

    fn emit_calli(&mut self, id: InstrId, instr: &Instruction) -> TranslateResult<()> {
        let signature = match instr.operand {
            Operand::Type(ty) => match &self.program.ty(ty).kind {
                TypeKind::FunctionPointer { signature } => signature,
                _ => return Err(self.invalid_operand(instr, "function pointer type")),
            },
            _ => return Err(self.invalid_operand(instr, "function pointer type")),
        };
        let operands: Vec<InstrId> = instr.operands().collect();
        let (&pointer, arguments) = operands.split_last().ok_or_else(|| TranslateError::MissingOperand {
            opcode: instr.opcode.mnemonic().to_string(),
            offset: instr.offset,
            what: "function pointer",
        })?;
        let parameters = function_pointer_parameters(self.session, signature)?;
        let pointer = self.value(pointer)?;
        let callee = format!("((uintptr_t (*)({})){})", parameters, pointer);
        let arguments = self.arguments(arguments, false)?;
        self.finish_call(
            id,
            &callee,
            arguments,
            signature.return_type,
            signature.returns_by_ref,
            instr.offset,
        )
    }

    fn emit_intrinsic(
        &mut self,
        id: InstrId,
        instr: &Instruction,
        intrinsic: Intrinsic,
        operands: &[InstrId],
    ) -> TranslateResult<()> {
        match intrinsic {
            Intrinsic::GetAs | Intrinsic::GetAsPointer => {
                let value = self.operand_value(instr, 0)?;
                let result = self.value(id)?;
                self.out.line(format!("{} = {};", result, value));
            }
            Intrinsic::OffsetToStringData => {
                let result = self.value(id)?;
                let string = self.program.well_known.string;
                let first_char = self
                    .program
                    .ty(string)
                    .fields
                    .iter()
                    .copied()
                    .find(|&f| self.program.field(f).name == "m_firstChar");
                let offset = match first_char {
                    Some(field) => {
                        let string_struct = self.session.type_name(string);
                        let field_name = self.session.field_name(field);
                        let object = self.object_struct();
                        format!(
                            "offsetof(struct {}, {}) - sizeof({})",
                            string_struct, field_name, object
                        )
                    }
                    None => "sizeof(uint32_t)".to_string(),
                };
                self.out.line(format!("{} = {};", result, offset));
            }
            Intrinsic::CallFunctionPointer | Intrinsic::CallFunctionPointer2 => {
                let wanted = if intrinsic == Intrinsic::CallFunctionPointer { 1 } else { 2 };
                let (&pointer, rest) = operands.split_first().ok_or_else(|| TranslateError::MissingOperand {
                    opcode: instr.opcode.mnemonic().to_string(),
                    offset: instr.offset,
                    what: "function pointer",
                })?;
                if rest.len() < wanted {
                    return Err(TranslateError::MissingOperand {
                        opcode: instr.opcode.mnemonic().to_string(),
                        offset: instr.offset,
                        what: "function pointer argument",
                    });
                }
                let pointer = self.value(pointer)?;
                let arguments = self.arguments(&rest[..wanted], false)?;
                let parameters = vec!["uintptr_t"; wanted].join(", ");
                self.out.line(format!(
                    "exception = ((uintptr_t (*)({})){})({});",
                    parameters,
                    pointer,
                    arguments.join(", ")
                ));
                self.propagate(instr.offset);
            }
        }
        Ok(())
    }

    /// Runtime functions take plain C arguments, return their result
    /// directly and never throw
    fn emit_runtime_call(&mut self, id: InstrId, callee: MethodId, operands: &[InstrId]) -> TranslateResult<()> {
        let def = self.program.method(callee);
        let arguments = self.arguments(operands, true)?.join(", ");
        let call = format!("{}({})", def.name, arguments);
        match self.slots.temp_of(id) {
            Some(temp) if !self.program.is_void(def.return_type) => {
                let result = temp.name.clone();
                if is_scalar_in_c(self.program, def.return_type) {
                    self.out.line(format!("{} = {};", result, call));
                } else {
                    self.out.line(format!("{} = (uintptr_t){};", result, call));
                }
            }
            _ => self.out.line(format!("{};", call)),
        }
        Ok(())
    }

    fn emit_newobj(&mut self, id: InstrId, instr: &Instruction) -> TranslateResult<()> {
        let ctor = self.method_operand(instr)?;
        let program = self.program;
        let ty = program.method(ctor).declaring_type;
        let operands: Vec<InstrId> = instr.operands().collect();
        let result = self.value(id)?;

        if ty == program.well_known.string {
            return self.emit_new_string(instr, ctor, &operands, &result);
        }

        let ctor_name = self.session.method_name(ctor);
        let mut arguments = self.arguments(&operands, false)?;
        if is_delegate_constructor(program, ctor) {
            arguments.push(self.delegate_target_kind(instr, &operands)?.to_string());
        }

        let storage = storage_type(self.session, ty)?;
        self.out.open("");
        if program.is_value_type(ty) {
            self.out.line(format!("{} object_to_construct;", storage));
            self.out.line("memset(&object_to_construct, 0, sizeof(object_to_construct));");
            arguments.insert(0, "(uintptr_t)&object_to_construct".to_string());
        } else {
            let type_name = self.session.type_name(ty);
            let object = self.object_struct();
            let type_object = self.session.type_object(ty);
            self.out.line(format!(
                "uintptr_t object_to_construct = (uintptr_t)calloc(1, sizeof(struct {}));",
                type_name
            ));
            self.oom_check("object_to_construct", instr.offset);
            self.out.line(format!("object_to_construct += sizeof({});", object));
            self.out.line(format!("SetType(object_to_construct, {});", type_object));
            arguments.insert(0, "object_to_construct".to_string());
        }
        self.cctor_check(ty);
        self.out.line(format!("exception = {}({});", ctor_name, arguments.join(", ")));
        self.propagate(instr.offset);
        self.assign(&result, "object_to_construct", ty)?;
        self.out.close("");
        Ok(())
    }

    /// `1` when the delegate wraps a static method, read off the `ldftn`
    /// that produced its function pointer
    fn delegate_target_kind(&self, instr: &Instruction, operands: &[InstrId]) -> TranslateResult<u32> {
        let source = operands.last().map(|&op| self.body.instr(op));
        match source {
            Some(Instruction {
                opcode: OpCode::Ldftn | OpCode::Ldvirtftn,
                operand: Operand::Method(target),
                ..
            }) => Ok(u32::from(self.program.method(*target).is_static())),
            _ => Err(self.invalid_operand(instr, "delegate target loaded by ldftn")),
        }
    }

    fn emit_new_string(
        &mut self,
        instr: &Instruction,
        ctor: MethodId,
        operands: &[InstrId],
        result: &str,
    ) -> TranslateResult<()> {
        let program = self.program;
        let parameters: Vec<TypeId> = program.method(ctor).parameters.iter().map(|p| p.ty).collect();
        let is_pointer = |ty: TypeId| matches!(program.ty(ty).kind, TypeKind::Pointer { .. });
        let is_array = |ty: TypeId| program.array_element(ty).is_some();
        let is = |ty: TypeId, p: PrimitiveType| program.primitive_of(ty) == Some(p);

        let helper = match parameters.as_slice() {
            [p] if is_pointer(*p) => "CtorCharPtr",
            [p] if is_array(*p) => "CtorCharArray",
            [c, n] if is(*c, PrimitiveType::Char) && is(*n, PrimitiveType::Int32) => "CtorCharCount",
            [p, s, n] if is(*s, PrimitiveType::Int32) && is(*n, PrimitiveType::Int32) => {
                if is_pointer(*p) {
                    "CtorCharPtrStartLength"
                } else if is_array(*p) {
                    "CtorCharArrayStartLength"
                } else {
                    return Err(self.invalid_operand(instr, "string constructor"));
                }
            }
            _ => return Err(self.invalid_operand(instr, "string constructor")),
        };
        let mut arguments = self.arguments(operands, false)?;
        arguments.push(format!("(uintptr_t)&{}", result));
        self.out.line(format!("exception = {}({});", helper, arguments.join(", ")));
        self.propagate(instr.offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::TranslatorConfig;
    use crate::emit::emit_method;
    use crate::metadata::builder::{BodyBuilder, ProgramBuilder};
    use crate::metadata::{ModuleKind, OpCode, Operand, PrimitiveType};
    use crate::session::TranslationSession;

    #[test]
    fn test_constrained_call_on_value_type_declares_boxed_receiver() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let string = b.string();
        let int32 = b.prim(PrimitiveType::Int32);
        let to_string = b.virtual_method(object, "ToString", string);
        let int_ref = b.managed_pointer(int32);
        let c = b.class(module, "App", "C", Some(object));
        let m = b.static_method(c, "Describe", string);
        let mut body = BodyBuilder::new();
        let n = body.local("n", int32);
        let address = body.emit(0, OpCode::Ldloca, Operand::Local(n), Some(int_ref), &[]);
        body.emit(2, OpCode::Constrained, Operand::Type(int32), None, &[]);
        let text = body.emit(8, OpCode::Callvirt, Operand::Method(to_string), Some(string), &[address]);
        body.emit(13, OpCode::Ret, Operand::None, None, &[text]);
        b.body(m, body.finish());
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());

        let text = emit_method(&mut session, m).unwrap();
        let declared = text.find("uintptr_t boxedReceiver;").unwrap();
        let boxed = text.find("boxedReceiver = boxed_object;").unwrap();
        assert!(declared < boxed);
        assert!(text.contains("(boxedReceiver, "));
    }

    #[test]
    fn test_static_call_passes_result_address() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let int32 = b.prim(PrimitiveType::Int32);
        let c = b.class(module, "App", "C", Some(object));
        let twice = b.static_method(c, "Twice", int32);
        b.param(twice, "x", int32);
        let m = b.static_method(c, "Run", int32);
        let mut body = BodyBuilder::new();
        let arg = body.emit(0, OpCode::LdcI4, Operand::Int(21), Some(int32), &[]);
        let call = body.emit(2, OpCode::Call, Operand::Method(twice), Some(int32), &[arg]);
        body.emit(7, OpCode::Ret, Operand::None, None, &[call]);
        b.body(m, body.finish());
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        let twice_name = session.method_name(twice);

        let text = emit_method(&mut session, m).unwrap();
        assert!(text.contains(&format!("exception = {}(_slot_0_", twice_name)));
        assert!(text.contains(", (uintptr_t)&_slot_0_"));
        assert!(text.contains("if (exception) {"));
    }

    #[test]
    fn test_virtual_call_goes_through_method_table() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let void = b.prim(PrimitiveType::Void);
        let a = b.class(module, "App", "Animal", Some(object));
        let speak = b.virtual_method(a, "Speak", void);
        let m = b.static_method(a, "Talk", void);
        b.param(m, "animal", a);
        let mut body = BodyBuilder::new();
        let receiver = body.emit(0, OpCode::Ldarg, Operand::Parameter(0), Some(a), &[]);
        body.emit(1, OpCode::Callvirt, Operand::Method(speak), None, &[receiver]);
        body.emit(6, OpCode::Ret, Operand::None, None, &[]);
        b.body(m, body.finish());
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        let speak_name = session.method_name(speak);

        let text = emit_method(&mut session, m).unwrap();
        assert!(text.contains("(1 + IMTSIZE) * sizeof(uintptr_t));"));
        assert!(text.contains("virtualPtr += "));
        assert!(text.contains(&format!("exception = (({}_ptr)*virtualPtr)(_slot_0_", speak_name)));
        assert!(text.contains("GetNullReferenceException"));
    }

    #[test]
    fn test_sealed_receiver_is_devirtualized() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let void = b.prim(PrimitiveType::Void);
        let a = b.class(module, "App", "Animal", Some(object));
        let speak = b.virtual_method(a, "Speak", void);
        let dog = b.sealed_class(module, "App", "Dog", Some(a));
        let bark = b.virtual_method(dog, "Speak", void);
        let m = b.static_method(dog, "Talk", void);
        b.param(m, "dog", dog);
        let mut body = BodyBuilder::new();
        let receiver = body.emit(0, OpCode::Ldarg, Operand::Parameter(0), Some(dog), &[]);
        body.emit(1, OpCode::Callvirt, Operand::Method(speak), None, &[receiver]);
        body.emit(6, OpCode::Ret, Operand::None, None, &[]);
        b.body(m, body.finish());
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        let bark_name = session.method_name(bark);

        let text = emit_method(&mut session, m).unwrap();
        assert!(text.contains(&format!("exception = {}(_slot_0_", bark_name)));
        assert!(!text.contains("virtualPtr ="));
    }

    #[test]
    fn test_interface_call_uses_imt() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let void = b.prim(PrimitiveType::Void);
        let object = b.object();
        let iface = b.interface(module, "App", "IRun");
        let run = b.virtual_method(iface, "Run", void);
        let c = b.class(module, "App", "C", Some(object));
        let m = b.static_method(c, "Go", void);
        b.param(m, "r", iface);
        let mut body = BodyBuilder::new();
        let receiver = body.emit(0, OpCode::Ldarg, Operand::Parameter(0), Some(iface), &[]);
        body.emit(1, OpCode::Callvirt, Operand::Method(run), None, &[receiver]);
        body.emit(6, OpCode::Ret, Operand::None, None, &[]);
        b.body(m, body.finish());
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        let run_name = session.method_name(run);

        let text = emit_method(&mut session, m).unwrap();
        assert!(text.contains(&format!("virtualFunction = *(virtualPtr + ({}_id % IMTSIZE));", run_name)));
        assert!(text.contains("GetFunctionPointerForInterfaceID(*(virtualPtr - 1)"));
        assert!(text.contains(&format!("exception = (({}_ptr)virtualFunction)(_slot_0_", run_name)));
    }

    #[test]
    fn test_newobj_allocates_and_runs_constructor() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let void = b.prim(PrimitiveType::Void);
        let c = b.class(module, "App", "C", Some(object));
        let ctor = b.method(c, ".ctor", void);
        b.method_mut(ctor).flags.constructor = true;
        let m = b.static_method(c, "Make", c);
        let mut body = BodyBuilder::new();
        let made = body.emit(0, OpCode::Newobj, Operand::Method(ctor), Some(c), &[]);
        body.emit(5, OpCode::Ret, Operand::None, None, &[made]);
        b.body(m, body.finish());
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        let c_name = session.type_name(c);
        let ctor_name = session.method_name(ctor);
        let type_object = session.type_object(c);

        let text = emit_method(&mut session, m).unwrap();
        assert!(text.contains(&format!(
            "uintptr_t object_to_construct = (uintptr_t)calloc(1, sizeof(struct {}));",
            c_name
        )));
        assert!(text.contains(&format!("SetType(object_to_construct, {});", type_object)));
        assert!(text.contains(&format!("exception = {}(object_to_construct);", ctor_name)));
    }

    #[test]
    fn test_delegate_construction_passes_static_flag() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let void = b.prim(PrimitiveType::Void);
        let action = b.delegate(module, "App", "Action", &[], void);
        let c = b.class(module, "App", "C", Some(object));
        let target = b.static_method(c, "Target", void);
        let m = b.static_method(c, "Wrap", action);
        let ctor = b.ty_mut(action).methods[0];
        let mut body = BodyBuilder::new();
        let null = body.emit(0, OpCode::Ldnull, Operand::None, Some(object), &[]);
        let ftn = body.emit(1, OpCode::Ldftn, Operand::Method(target), None, &[]);
        let made = body.emit(7, OpCode::Newobj, Operand::Method(ctor), Some(action), &[null, ftn]);
        body.emit(12, OpCode::Ret, Operand::None, None, &[made]);
        b.body(m, body.finish());
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        let target_name = session.method_name(target);
        let ctor_name = session.method_name(ctor);

        let text = emit_method(&mut session, m).unwrap();
        assert!(text.contains(&format!("= (uintptr_t)&{};", target_name)));
        assert!(text.contains(&format!("exception = {}(object_to_construct, _slot_0_", ctor_name)));
        assert!(text.contains(", 1);"));
    }
}
