//! Field, array and indirect memory access

use super::{MethodEmitter, RuntimeFault};
use crate::ctypes::{is_aggregate, storage_type};
use crate::error::{TranslateError, TranslateResult};
use crate::layout::statics::arena_of;
use crate::metadata::{check_flags, InstrId, Instruction, OpCode, Operand, PrimitiveType, TypeId, TypeKind};

/// Element primitive of the typed `ldelem.*`, `stelem.*`, `ldind.*` and
/// `stind.*` forms
fn typed_element(opcode: OpCode) -> Option<PrimitiveType> {
    use OpCode::*;
    Some(match opcode {
        LdelemI1 | StelemI1 | LdindI1 | StindI1 => PrimitiveType::Int8,
        LdelemU1 | LdindU1 => PrimitiveType::UInt8,
        LdelemI2 | StelemI2 | LdindI2 | StindI2 => PrimitiveType::Int16,
        LdelemU2 | LdindU2 => PrimitiveType::UInt16,
        LdelemI4 | StelemI4 | LdindI4 | StindI4 => PrimitiveType::Int32,
        LdelemU4 | LdindU4 => PrimitiveType::UInt32,
        LdelemI8 | StelemI8 | LdindI8 | StindI8 => PrimitiveType::Int64,
        LdelemI | StelemI | LdindI | StindI => PrimitiveType::IntPtr,
        LdelemR4 | StelemR4 | LdindR4 | StindR4 => PrimitiveType::Float32,
        LdelemR8 | StelemR8 | LdindR8 | StindR8 => PrimitiveType::Float64,
        _ => return None,
    })
}

/// Runtime helper covering one combination of array element checks; `None`
/// when at most the null check is left, which is emitted inline
fn array_check_helper(store_type: bool, null: bool, range: bool, store: bool) -> Option<&'static str> {
    Some(match (store_type, null, range, store) {
        (true, true, true, _) => "CheckArrayElementStore",
        (true, false, true, _) => "CheckArrayElementStoreAndIndexRange",
        (true, true, false, _) => "CheckArrayElementStoreAndNullCheck",
        (true, false, false, _) => "CheckArrayElementStoreType",
        (false, true, true, true) => "CheckArrayElementStoreNullRefAndIndexRange",
        (false, false, true, true) => "CheckArrayElementStoreIndexRange",
        (false, true, true, false) => "CheckArrayNullRefAndIndexRange",
        (false, false, true, false) => "CheckArrayIndexRange",
        _ => return None,
    })
}

impl<'s, 'p> MethodEmitter<'s, 'p> {
    /// Layout used to address a field declared on `declaring`; fields of
    /// open generic types are addressed through the closed receiver type
    fn field_layout(&self, declaring: TypeId, receiver: TypeId) -> TypeId {
        if !self.program.is_open(declaring) {
            return declaring;
        }
        let receiver = self.program.pointee(receiver).unwrap_or(receiver);
        if self.program.is_open(receiver) || self.program.primitive_of(receiver).is_some() {
            declaring
        } else {
            receiver
        }
    }

    pub(crate) fn emit_field(&mut self, id: InstrId, instr: &Instruction) -> TranslateResult<()> {
        let field = match instr.operand {
            Operand::Field(field) => field,
            _ => return Err(self.invalid_operand(instr, "field")),
        };
        let field_def = self.program.field(field);
        let field_ty = field_def.ty;
        let declaring = field_def.declaring_type;
        let name = self.session.field_name(field);

        let is_store = matches!(instr.opcode, OpCode::Stfld | OpCode::Stsfld);
        if is_store {
            self.memory_barrier_if_volatile();
        }

        if matches!(instr.opcode, OpCode::Ldsfld | OpCode::Ldsflda | OpCode::Stsfld) {
            self.cctor_check(declaring);
            let arena = arena_of(self.session, field);
            self.out.line(format!("statics = GetThreadLocalValue({}_tlsIndex);", arena));
            let storage = storage_type(self.session, field_ty)?;
            let address = format!("(statics + {})", name);
            match instr.opcode {
                OpCode::Ldsfld => {
                    let result = self.value(id)?;
                    self.load_through(&result, &address, field_ty)?;
                }
                OpCode::Ldsflda => {
                    let result = self.value(id)?;
                    self.out.line(format!("{} = (uintptr_t){};", result, address));
                }
                _ => {
                    let value = self.operand_value(instr, 0)?;
                    if is_aggregate(self.program, field_ty) {
                        self.out.line(format!("memcpy({}, &{}, sizeof({}));", address, value, storage));
                    } else {
                        self.out.line(format!("*(({}*){}) = {};", storage, address, value));
                    }
                }
            }
            if !is_store {
                self.memory_barrier_if_volatile();
            }
            return Ok(());
        }

        let receiver = self.operand(instr, 0)?;
        let object = self.value(receiver)?;
        let receiver_ty = self.static_type(receiver)?;
        let layout = self.field_layout(declaring, receiver_ty);

        // the receiver's own type decides the access form; its stack slot
        // folds every reference onto uintptr_t
        let program = self.program;
        let by_value = program.is_value_type(receiver_ty)
            && !(self.is_this(receiver) && program.is_value_type(self.def.declaring_type));
        let access = if by_value && is_aggregate(program, receiver_ty) {
            format!("{}.{}", object, name)
        } else if by_value && program.types_equivalent(receiver_ty, declaring) {
            // a primitive's single field is the value itself
            object.clone()
        } else if program.is_value_type(declaring) {
            let layout = self.session.type_name(layout);
            format!("((struct {}_unboxed*){})->{}", layout, object, name)
        } else {
            if self.wants_null_check(receiver) {
                self.null_check(&object, instr.offset);
            }
            self.object_field_as(&object, field, layout)
        };

        match instr.opcode {
            OpCode::Ldfld => {
                let result = self.value(id)?;
                if is_aggregate(self.program, field_ty) {
                    self.out.line(format!("memcpy(&{}, &{}, sizeof({}));", result, access, result));
                } else {
                    self.out.line(format!("{} = {};", result, access));
                }
            }
            OpCode::Ldflda => {
                let result = self.value(id)?;
                self.out.line(format!("{} = (uintptr_t)&{};", result, access));
            }
            OpCode::Stfld => {
                let value = self.operand_value(instr, 1)?;
                if is_aggregate(self.program, field_ty) {
                    self.out.line(format!("memcpy(&{}, &{}, sizeof({}));", access, value, access));
                } else {
                    self.out.line(format!("{} = {};", access, value));
                }
            }
            _ => return Err(self.unsupported(instr)),
        }
        if !is_store {
            self.memory_barrier_if_volatile();
        }
        Ok(())
    }

    /// The one-dimensional array type over `element`
    fn vector_of(&self, instr: &Instruction, element: TypeId) -> TranslateResult<TypeId> {
        if let Some(ty) = instr.ty {
            if matches!(self.program.ty(ty).kind, TypeKind::Vector { .. }) {
                return Ok(ty);
            }
        }
        self.program
            .type_ids()
            .find(|&t| matches!(self.program.ty(t).kind, TypeKind::Vector { element: e } if e == element))
            .ok_or_else(|| self.invalid_operand(instr, "array type"))
    }

    /// Element type accessed by an array opcode
    fn element_type(&self, instr: &Instruction, array: InstrId) -> TranslateResult<TypeId> {
        if let Operand::Type(ty) = instr.operand {
            return Ok(ty);
        }
        if let Some(primitive) = typed_element(instr.opcode) {
            return self.program.primitive(primitive);
        }
        let array_ty = self.static_type(array)?;
        Ok(self
            .program
            .array_element(array_ty)
            .map(|(element, _)| element)
            .unwrap_or(self.program.well_known.object))
    }

    pub(crate) fn emit_array(&mut self, id: InstrId, instr: &Instruction) -> TranslateResult<()> {
        use OpCode::*;
        let array_struct = format!("struct {}", self.session.type_name(self.program.well_known.array));
        match instr.opcode {
            Newarr => {
                let element = match instr.operand {
                    Operand::Type(ty) => ty,
                    _ => return Err(self.invalid_operand(instr, "element type")),
                };
                let vector = self.vector_of(instr, element)?;
                let length = self.operand_value(instr, 0)?;
                let result = self.value(id)?;
                let storage = storage_type(self.session, element)?;
                let header = self.object_struct();
                self.raise_if(&format!("{} < 0", length), RuntimeFault::Overflow, instr.offset);
                self.out.line(format!(
                    "{} = (uintptr_t)calloc(1, sizeof({}) + sizeof({}) * {});",
                    result, array_struct, storage, length
                ));
                self.oom_check(&result, instr.offset);
                self.out.line(format!("{} += sizeof({});", result, header));
                let vector_object = self.session.type_object(vector);
                let element_object = self.session.type_object(element);
                self.out.line(format!(
                    "InitializeArrayHeader({}, {}, {}, {});",
                    result, length, vector_object, element_object
                ));
                return Ok(());
            }
            Ldlen => {
                let array = self.operand(instr, 0)?;
                let value = self.value(array)?;
                if self.wants_null_check(array) {
                    self.null_check(&value, instr.offset);
                }
                let result = self.value(id)?;
                self.out.line(format!("{} = GetArrayLength({});", result, value));
                return Ok(());
            }
            _ => {}
        }

        let store = matches!(
            instr.opcode,
            Stelem | StelemI | StelemI1 | StelemI2 | StelemI4 | StelemI8 | StelemR4 | StelemR8 | StelemRef
        );
        let array_id = self.operand(instr, 0)?;
        let array = self.value(array_id)?;
        let index = self.operand_value(instr, 1)?;
        let element = self.element_type(instr, array_id)?;

        let null = !self.suppressed(check_flags::NULL_CHECK);
        let range = !self.suppressed(check_flags::RANGE_CHECK);
        let store_type =
            store && !self.program.is_value_type(element) && !self.suppressed(check_flags::TYPE_CHECK);
        let value = if store {
            Some(self.operand_value(instr, 2)?)
        } else {
            None
        };

        match array_check_helper(store_type, null, range, store) {
            Some(helper) => {
                let arguments = match (&value, store_type, range) {
                    (Some(v), true, true) => format!("{}, {}, {}", array, index, v),
                    (Some(v), true, false) => format!("{}, {}", array, v),
                    _ => format!("{}, {}", array, index),
                };
                self.out.line(format!("exception = {}({});", helper, arguments));
                self.propagate(instr.offset);
            }
            None if null => self.null_check(&array, instr.offset),
            None => {}
        }

        let storage = storage_type(self.session, element)?;
        let header = self.object_struct();
        self.out.line(format!(
            "element_address = {} - sizeof({}) + sizeof({}) + sizeof({}) * {};",
            array, header, array_struct, storage, index
        ));
        match (instr.opcode, value) {
            (Ldelema, _) => {
                let result = self.value(id)?;
                self.out.line(format!("{} = element_address;", result));
            }
            (_, Some(value)) => self.store_through("element_address", &value, element)?,
            (_, None) => {
                let result = self.value(id)?;
                self.load_through(&result, "element_address", element)?;
            }
        }
        Ok(())
    }

    /// Type read or written by an indirect memory opcode
    fn indirect_type(&self, instr: &Instruction) -> TranslateResult<TypeId> {
        if let Operand::Type(ty) = instr.operand {
            return Ok(ty);
        }
        if let Some(primitive) = typed_element(instr.opcode) {
            return self.program.primitive(primitive);
        }
        match instr.opcode {
            OpCode::LdindRef | OpCode::StindRef => Ok(self.program.well_known.object),
            _ => Err(self.invalid_operand(instr, "type")),
        }
    }

    pub(crate) fn emit_memory(&mut self, id: InstrId, instr: &Instruction) -> TranslateResult<()> {
        use OpCode::*;
        match instr.opcode {
            LdindI | LdindI1 | LdindI2 | LdindI4 | LdindI8 | LdindR4 | LdindR8 | LdindRef | LdindU1
            | LdindU2 | LdindU4 | Ldobj => {
                let ty = self.indirect_type(instr)?;
                let address = self.operand(instr, 0)?;
                let pointer = self.value(address)?;
                if instr.opcode != Ldobj && self.wants_null_check(address) {
                    self.null_check(&pointer, instr.offset);
                }
                let result = self.value(id)?;
                self.load_through(&result, &pointer, ty)?;
                self.memory_barrier_if_volatile();
            }
            StindI | StindI1 | StindI2 | StindI4 | StindI8 | StindR4 | StindR8 | StindRef | Stobj => {
                self.memory_barrier_if_volatile();
                let ty = self.indirect_type(instr)?;
                let address = self.operand(instr, 0)?;
                let pointer = self.value(address)?;
                let value = self.operand_value(instr, 1)?;
                if instr.opcode != Stobj && self.wants_null_check(address) {
                    self.null_check(&pointer, instr.offset);
                }
                self.store_through(&pointer, &value, ty)?;
            }
            Cpobj => {
                let ty = self.indirect_type(instr)?;
                let storage = storage_type(self.session, ty)?;
                let destination = self.operand_value(instr, 0)?;
                let source = self.operand_value(instr, 1)?;
                self.out.line(format!(
                    "memcpy((void*){}, (void*){}, sizeof({}));",
                    destination, source, storage
                ));
            }
            Initobj => {
                let ty = self.indirect_type(instr)?;
                let storage = storage_type(self.session, ty)?;
                let address = self.operand_value(instr, 0)?;
                self.out.line(format!("memset((void*){}, 0, sizeof({}));", address, storage));
            }
            Cpblk => {
                let destination = self.operand_value(instr, 0)?;
                let source = self.operand_value(instr, 1)?;
                let size = self.operand_value(instr, 2)?;
                self.out.line(format!(
                    "memcpy((void*){}, (void*){}, {});",
                    destination, source, size
                ));
            }
            Initblk => {
                let address = self.operand_value(instr, 0)?;
                let value = self.operand_value(instr, 1)?;
                let size = self.operand_value(instr, 2)?;
                self.out.line(format!("memset((void*){}, {}, {});", address, value, size));
            }
            Sizeof => {
                let ty = self.indirect_type(instr)?;
                let storage = storage_type(self.session, ty)?;
                let result = self.value(id)?;
                self.out.line(format!("{} = sizeof({});", result, storage));
            }
            Localloc => {
                let size = self.operand_value(instr, 0)?;
                let result = self.value(id)?;
                self.out.line(format!("{} = (uintptr_t)alloca({});", result, size));
                self.raise_if(&format!("{} == 0", result), RuntimeFault::StackOverflow, instr.offset);
                self.out.line(format!("memset((void*){}, 0, {});", result, size));
            }
            _ => {
                return Err(TranslateError::UnsupportedOpcode {
                    opcode: instr.opcode.mnemonic().to_string(),
                    offset: instr.offset,
                })
            }
        }
        Ok(())
    }
}
