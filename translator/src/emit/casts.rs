//! Boxing, unboxing and type tests

use super::{MethodEmitter, RuntimeFault};
use crate::ctypes::storage_type;
use crate::error::TranslateResult;
use crate::metadata::{check_flags, InstrId, Instruction, OpCode, Operand, TypeId};

/// Outcome of a failed type test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnFailure {
    /// `castclass`: raise an invalid-cast exception
    Raise,
    /// `isinst`: yield null
    Null,
}

impl<'s, 'p> MethodEmitter<'s, 'p> {
    /// Box the value `lvalue` of type `ty` into a fresh object stored in
    /// `target`
    pub(crate) fn box_value(&mut self, target: &str, lvalue: &str, ty: TypeId, offset: u32) -> TranslateResult<()> {
        let storage = storage_type(self.session, ty)?;
        let object = self.object_struct();
        let type_object = self.session.type_object(ty);
        self.out.open("");
        self.out.line(format!(
            "uintptr_t boxed_object = (uintptr_t)malloc(sizeof({}) + sizeof({}));",
            object, storage
        ));
        self.oom_check("boxed_object", offset);
        self.out.line(format!("boxed_object += sizeof({});", object));
        self.out.line(format!("SetType(boxed_object, {});", type_object));
        self.out.line(format!("memcpy((void*)boxed_object, &{}, sizeof({}));", lvalue, storage));
        self.out.line(format!("{} = boxed_object;", target));
        self.out.close("");
        Ok(())
    }

    pub(crate) fn emit_cast(&mut self, id: InstrId, instr: &Instruction) -> TranslateResult<()> {
        let ty = match instr.operand {
            Operand::Type(ty) => ty,
            _ => return Err(self.invalid_operand(instr, "type")),
        };
        let value = self.operand_value(instr, 0)?;
        let result = self.value(id)?;
        let program = self.program;

        match instr.opcode {
            OpCode::Box if program.is_value_type(ty) => self.box_value(&result, &value, ty, instr.offset),
            OpCode::Box => {
                self.out.line(format!("{} = {};", result, value));
                Ok(())
            }
            OpCode::Unbox => {
                self.check_exact_type(&value, ty, instr.offset);
                self.out.line(format!("{} = {};", result, value));
                Ok(())
            }
            OpCode::UnboxAny if program.is_value_type(ty) => {
                self.check_exact_type(&value, ty, instr.offset);
                self.load_through(&result, &value, ty)
            }
            OpCode::UnboxAny | OpCode::Castclass => {
                if self.suppressed(check_flags::TYPE_CHECK) {
                    self.out.line(format!("{} = {};", result, value));
                    return Ok(());
                }
                self.type_test(&value, &result, ty, OnFailure::Raise, instr.offset)
            }
            OpCode::Isinst => self.type_test(&value, &result, ty, OnFailure::Null, instr.offset),
            _ => Err(self.unsupported(instr)),
        }
    }

    /// Null check, then require the object's type to be exactly `ty`
    fn check_exact_type(&mut self, value: &str, ty: TypeId, offset: u32) {
        if !self.suppressed(check_flags::NULL_CHECK) {
            self.null_check(value, offset);
        }
        if self.suppressed(check_flags::TYPE_CHECK) && !self.program.is_value_type(ty) {
            return;
        }
        let actual = self.type_object_of(value);
        let expected = self.session.type_object(ty);
        self.raise_if(
            &format!("{} != {}", actual, expected),
            RuntimeFault::InvalidCast,
            offset,
        );
    }

    fn type_test(&mut self, value: &str, result: &str, ty: TypeId, failure: OnFailure, offset: u32) -> TranslateResult<()> {
        let program = self.program;
        if let Some((element, rank)) = program.array_element(ty) {
            let element_object = self.session.type_object(element);
            let target = format!("{}, {}", element_object, rank);
            self.helper_test(value, result, &target, failure, "AsArray", offset);
            return Ok(());
        }
        if program.is_interface(ty) {
            self.interface_test(value, result, ty, failure, offset);
            return Ok(());
        }
        if program.ty(ty).kind.is_nominal() && !program.is_value_type(ty) {
            self.class_test(value, result, ty, failure, offset);
            return Ok(());
        }
        let type_object = self.session.type_object(ty);
        self.helper_test(value, result, &type_object, failure, "", offset);
        Ok(())
    }

    /// `Cast<suffix>` raises through the returned exception; `TryCast<suffix>`
    /// stores null on failure
    fn helper_test(&mut self, value: &str, result: &str, target: &str, failure: OnFailure, suffix: &str, offset: u32) {
        match failure {
            OnFailure::Raise => {
                self.out.line(format!(
                    "exception = Cast{}({}, {}, (uintptr_t)&{});",
                    suffix, value, target, result
                ));
                self.propagate(offset);
            }
            OnFailure::Null => {
                self.out.line(format!(
                    "TryCast{}({}, {}, (uintptr_t)&{});",
                    suffix, value, target, result
                ));
            }
        }
    }

    fn fail(&mut self, result: &str, failure: OnFailure, offset: u32) {
        match failure {
            OnFailure::Raise => self.raise(RuntimeFault::InvalidCast, offset),
            OnFailure::Null => self.out.line(format!("{} = 0;", result)),
        }
    }

    /// Exact type first, then the ancestor at the target's depth
    fn class_test(&mut self, value: &str, result: &str, ty: TypeId, failure: OnFailure, offset: u32) {
        let program = self.program;
        let fields = &program.well_known.type_object;
        let depth = self.session.type_depth(ty);
        let expected = self.session.type_object(ty);

        self.out.line(format!("{} = {};", result, value));
        self.out.open(format!("if ({} != 0)", value));
        let actual = self.type_object_of(value);
        self.out.line(format!("uintptr_t objectType = {};", actual));
        self.out.open(format!("if (objectType != {})", expected));
        let ancestor = match fields.base_classes.get(depth as usize) {
            Some(&field) => self.object_field("objectType", field),
            None => {
                let beyond = self.object_field("objectType", fields.base_classes_beyond);
                format!("((uintptr_t*){})[{}]", beyond, depth - 6)
            }
        };
        self.out.line(format!("uintptr_t baseClassType = {};", ancestor));
        self.out.open(format!("if (baseClassType != {})", expected));
        self.fail(result, failure, offset);
        self.out.close("");
        self.out.close("");
        self.out.close("");
    }

    /// Consults the two-bit entry of the object type's interface map and
    /// falls back to the runtime helper when the map does not know
    fn interface_test(&mut self, value: &str, result: &str, ty: TypeId, failure: OnFailure, offset: u32) {
        let program = self.program;
        let fields = &program.well_known.type_object;
        let interface_object = self.session.type_object(ty);

        self.out.line(format!("{} = {};", result, value));
        self.out.open(format!("if ({} != 0)", value));
        let actual = self.type_object_of(value);
        self.out.line(format!("uintptr_t objectType = {};", actual));
        let map = self.object_field("objectType", fields.implemented_interface_map);
        self.out.line(format!("uint32_t* map = (uint32_t*){};", map));
        let index = self.object_field(&interface_object, fields.interface_index);
        self.out.line(format!("uint32_t ifaceIndex = {};", index));
        self.out.line("uint32_t known = 0;");
        self.out.open("if (ifaceIndex < 60*4 || ifaceIndex < *map)");
        self.out.line("known = (map[(ifaceIndex>>4)+1] >> ((ifaceIndex & 0xF)*2)) & 3;");
        self.out.close("");
        self.out.open("if (known == 1)");
        self.fail(result, failure, offset);
        self.out.dedent();
        self.out.open("} else if (known != 2)");
        self.helper_test(value, result, &interface_object, failure, "", offset);
        self.out.close("");
        self.out.close("");
    }
}

#[cfg(test)]
mod tests {
    use crate::config::TranslatorConfig;
    use crate::emit::emit_method;
    use crate::metadata::builder::{BodyBuilder, ProgramBuilder};
    use crate::metadata::{check_flags, ModuleKind, OpCode, Operand, PrimitiveType};
    use crate::session::TranslationSession;

    #[test]
    fn test_box_allocates_header_and_copies_payload() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let int32 = b.prim(PrimitiveType::Int32);
        let c = b.class(module, "App", "C", Some(object));
        let m = b.static_method(c, "Wrap", object);
        let mut body = BodyBuilder::new();
        let seven = body.emit(0, OpCode::LdcI4, Operand::Int(7), Some(int32), &[]);
        let boxed = body.emit(1, OpCode::Box, Operand::Type(int32), Some(object), &[seven]);
        body.emit(6, OpCode::Ret, Operand::None, None, &[boxed]);
        b.body(m, body.finish());
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        let int_object = session.type_object(int32);

        let text = emit_method(&mut session, m).unwrap();
        assert!(text.contains("+ sizeof(int32_t));"));
        assert!(text.contains(&format!("SetType(boxed_object, {});", int_object)));
        assert!(text.contains("memcpy((void*)boxed_object, &_slot_0_"));
    }

    #[test]
    fn test_castclass_to_class_compares_ancestor_at_depth() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let a = b.class(module, "App", "Animal", Some(object));
        let dog = b.class(module, "App", "Dog", Some(a));
        let m = b.static_method(a, "AsDog", dog);
        b.param(m, "o", object);
        let mut body = BodyBuilder::new();
        let arg = body.emit(0, OpCode::Ldarg, Operand::Parameter(0), Some(object), &[]);
        let cast = body.emit(1, OpCode::Castclass, Operand::Type(dog), Some(dog), &[arg]);
        body.emit(6, OpCode::Ret, Operand::None, None, &[cast]);
        b.body(m, body.finish());
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        let depth = session.type_depth(dog);
        let base_field = program.well_known.type_object.base_classes[depth as usize];
        let base_name = session.field_name(base_field);
        let dog_object = session.type_object(dog);

        let text = emit_method(&mut session, m).unwrap();
        assert!(text.contains(&format!("if (objectType != {}) {{", dog_object)));
        assert!(text.contains(&format!("->{};", base_name)));
        assert!(text.contains("GetInvalidCastException"));
    }

    #[test]
    fn test_no_typecheck_prefix_turns_castclass_into_copy() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let a = b.class(module, "App", "Animal", Some(object));
        let dog = b.class(module, "App", "Dog", Some(a));
        let m = b.static_method(a, "AsDog", dog);
        b.param(m, "o", object);
        let mut body = BodyBuilder::new();
        let arg = body.emit(0, OpCode::Ldarg, Operand::Parameter(0), Some(object), &[]);
        body.emit(1, OpCode::No, Operand::CheckFlags(check_flags::TYPE_CHECK), None, &[]);
        let cast = body.emit(4, OpCode::Castclass, Operand::Type(dog), Some(dog), &[arg]);
        body.emit(9, OpCode::Ret, Operand::None, None, &[cast]);
        b.body(m, body.finish());
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());

        let text = emit_method(&mut session, m).unwrap();
        assert!(!text.contains("GetInvalidCastException"));
        assert!(!text.contains("objectType"));
    }

    #[test]
    fn test_isinst_interface_reads_map_and_falls_back() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let iface = b.interface(module, "App", "IRun");
        let c = b.class(module, "App", "C", Some(object));
        let m = b.static_method(c, "Try", iface);
        b.param(m, "o", object);
        let mut body = BodyBuilder::new();
        let arg = body.emit(0, OpCode::Ldarg, Operand::Parameter(0), Some(object), &[]);
        let test = body.emit(1, OpCode::Isinst, Operand::Type(iface), Some(iface), &[arg]);
        body.emit(6, OpCode::Ret, Operand::None, None, &[test]);
        b.body(m, body.finish());
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        let iface_object = session.type_object(iface);

        let text = emit_method(&mut session, m).unwrap();
        assert!(text.contains("if (ifaceIndex < 60*4 || ifaceIndex < *map) {"));
        assert!(text.contains("known = (map[(ifaceIndex>>4)+1] >> ((ifaceIndex & 0xF)*2)) & 3;"));
        assert!(text.contains("TryCast(_slot_0_"));
        assert!(text.contains(&format!(", {}, (uintptr_t)&", iface_object)));
        assert!(!text.contains("GetInvalidCastException"));
    }

    #[test]
    fn test_unbox_any_requires_exact_type() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let int32 = b.prim(PrimitiveType::Int32);
        let c = b.class(module, "App", "C", Some(object));
        let m = b.static_method(c, "Open", int32);
        b.param(m, "o", object);
        let mut body = BodyBuilder::new();
        let arg = body.emit(0, OpCode::Ldarg, Operand::Parameter(0), Some(object), &[]);
        let value = body.emit(1, OpCode::UnboxAny, Operand::Type(int32), Some(int32), &[arg]);
        body.emit(6, OpCode::Ret, Operand::None, None, &[value]);
        b.body(m, body.finish());
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        let int_object = session.type_object(int32);

        let text = emit_method(&mut session, m).unwrap();
        assert!(text.contains(&format!("!= {}) {{", int_object)));
        assert!(text.contains("= *((int32_t*)_slot_0_"));
    }
}
