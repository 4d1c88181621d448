//! Constants, variables, arithmetic, comparisons, branches and conversions

use super::{block_label, signature::parameter_name, MethodEmitter, RuntimeFault};
use crate::ctypes::{
    helper_name, is_aggregate, min_value_macro, passed_by_address, storage_type, unsigned_c_name,
    unsigned_equivalent,
};
use crate::error::TranslateResult;
use crate::metadata::{InstrId, Instruction, OpCode, Operand, PrimitiveType};

/// Result primitive of a conversion opcode
fn conversion_target(opcode: OpCode) -> Option<PrimitiveType> {
    use OpCode::*;
    Some(match opcode {
        ConvI1 | ConvOvfI1 | ConvOvfI1Un => PrimitiveType::Int8,
        ConvI2 | ConvOvfI2 | ConvOvfI2Un => PrimitiveType::Int16,
        ConvI4 | ConvOvfI4 | ConvOvfI4Un => PrimitiveType::Int32,
        ConvI8 | ConvOvfI8 | ConvOvfI8Un => PrimitiveType::Int64,
        ConvI | ConvOvfI | ConvOvfIUn => PrimitiveType::IntPtr,
        ConvU1 | ConvOvfU1 | ConvOvfU1Un => PrimitiveType::UInt8,
        ConvU2 | ConvOvfU2 | ConvOvfU2Un => PrimitiveType::UInt16,
        ConvU4 | ConvOvfU4 | ConvOvfU4Un => PrimitiveType::UInt32,
        ConvU8 | ConvOvfU8 | ConvOvfU8Un => PrimitiveType::UInt64,
        ConvU | ConvOvfU | ConvOvfUUn => PrimitiveType::UIntPtr,
        ConvR4 => PrimitiveType::Float32,
        ConvR8 | ConvRUn => PrimitiveType::Float64,
        _ => return None,
    })
}

fn is_checked_conversion(opcode: OpCode) -> bool {
    opcode.mnemonic().starts_with("conv.ovf")
}

fn is_unsigned_source(opcode: OpCode) -> bool {
    opcode.mnemonic().ends_with(".un")
}

fn float_literal(value: f32) -> String {
    if value.is_nan() {
        "NAN".to_string()
    } else if value == f32::INFINITY {
        "INFINITY".to_string()
    } else if value == f32::NEG_INFINITY {
        "-INFINITY".to_string()
    } else {
        format!("{:?}f", value)
    }
}

impl<'s, 'p> MethodEmitter<'s, 'p> {
    /// Primitive behind the stack slot of `id`; references and pointers act
    /// as native unsigned ints
    fn slot_primitive(&self, id: InstrId) -> TranslateResult<PrimitiveType> {
        Ok(self
            .program
            .primitive_of(self.slot_type(id)?)
            .unwrap_or(PrimitiveType::UIntPtr))
    }

    fn branch_target(&self, instr: &Instruction) -> TranslateResult<u32> {
        match instr.operand {
            Operand::Target(target) => Ok(target),
            _ => Err(self.invalid_operand(instr, "branch target")),
        }
    }

    pub(crate) fn emit_constant(&mut self, id: InstrId, instr: &Instruction) -> TranslateResult<()> {
        let result = self.value(id)?;
        match (instr.opcode, &instr.operand) {
            (OpCode::LdcI4, Operand::Int(value)) => {
                let value = *value as i32;
                if value == i32::MIN {
                    self.out.line(format!("{} = INT32_MIN;", result));
                } else {
                    self.out.line(format!("{} = {};", result, value));
                }
            }
            (OpCode::LdcI8, Operand::Int(value)) => {
                if *value == i64::MIN {
                    self.out.line(format!("{} = INT64_MIN;", result));
                } else {
                    self.out.line(format!("{} = {}LL;", result, value));
                }
            }
            (OpCode::LdcR4, Operand::Float(value)) => {
                self.out.line(format!("{} = {};", result, float_literal(*value as f32)));
            }
            (OpCode::LdcR8, Operand::Float(value)) => {
                self.out.line(format!(
                    "{{ uint64_t doubleAsHex = 0x{:016x}; memcpy(&{}, &doubleAsHex, sizeof(double)); }}",
                    value.to_bits(),
                    result
                ));
            }
            (OpCode::Ldnull, _) => self.out.line(format!("{} = 0;", result)),
            (OpCode::Ldstr, Operand::String(value)) => {
                let name = self.session.string_name(value);
                self.out.line(format!("{} = {};", result, name));
            }
            (OpCode::Ldtoken, Operand::Type(ty)) => {
                let type_object = self.session.type_object(*ty);
                self.out.line(format!("{} = {};", result, type_object));
            }
            (OpCode::Ldtoken, _) => return Err(self.invalid_operand(instr, "type token")),
            _ => return Err(self.invalid_operand(instr, "constant")),
        }
        Ok(())
    }

    pub(crate) fn emit_variable(&mut self, id: InstrId, instr: &Instruction) -> TranslateResult<()> {
        let def = self.def;
        let body = self.body;
        match (instr.opcode, &instr.operand) {
            (OpCode::Ldarg, Operand::This) => {
                let result = self.value(id)?;
                self.out.line(format!("{} = _this;", result));
            }
            (OpCode::Ldarga, Operand::This) => {
                let result = self.value(id)?;
                self.out.line(format!("{} = (uintptr_t)&_this;", result));
            }
            (OpCode::Ldarg | OpCode::Ldarga | OpCode::Starg, Operand::Parameter(index)) => {
                let parameter = def
                    .parameters
                    .get(*index as usize)
                    .ok_or_else(|| self.invalid_operand(instr, "parameter index"))?;
                let name = parameter_name(def, *index as usize);
                let by_address = !parameter.by_ref && passed_by_address(self.program, parameter.ty);
                match instr.opcode {
                    OpCode::Ldarg => {
                        let result = self.value(id)?;
                        if by_address {
                            self.out.line(format!(
                                "memcpy(&{}, (void*){}, sizeof({}));",
                                result, name, result
                            ));
                        } else {
                            self.out.line(format!("{} = {};", result, name));
                        }
                    }
                    OpCode::Ldarga => {
                        let result = self.value(id)?;
                        if by_address {
                            self.out.line(format!("{} = {};", result, name));
                        } else {
                            self.out.line(format!("{} = (uintptr_t)&{};", result, name));
                        }
                    }
                    _ => {
                        let value = self.operand_value(instr, 0)?;
                        if by_address {
                            self.out.line(format!(
                                "memcpy((void*){}, &{}, sizeof({}));",
                                name, value, value
                            ));
                        } else {
                            self.out.line(format!("{} = {};", name, value));
                        }
                    }
                }
            }
            (OpCode::Ldloc | OpCode::Ldloca | OpCode::Stloc, Operand::Local(index)) => {
                let local = body
                    .locals
                    .get(*index as usize)
                    .ok_or_else(|| self.invalid_operand(instr, "local index"))?;
                let name = self.local_name(*index)?.to_string();
                match instr.opcode {
                    OpCode::Ldloc => {
                        let result = self.value(id)?;
                        if !local.by_ref && is_aggregate(self.program, local.ty) {
                            self.out.line(format!("memcpy(&{}, &{}, sizeof({}));", result, name, result));
                        } else {
                            self.out.line(format!("{} = {};", result, name));
                        }
                    }
                    OpCode::Ldloca => {
                        let result = self.value(id)?;
                        self.out.line(format!("{} = (uintptr_t)&{};", result, name));
                    }
                    _ => {
                        let value = self.operand_value(instr, 0)?;
                        if local.by_ref {
                            self.out.line(format!("{} = (uintptr_t){};", name, value));
                        } else if is_aggregate(self.program, local.ty) {
                            self.out.line(format!("memcpy(&{}, &{}, sizeof({}));", name, value, name));
                        } else {
                            let storage = storage_type(self.session, local.ty)?;
                            self.out.line(format!("{} = ({}){};", name, storage, value));
                        }
                    }
                }
            }
            (OpCode::Dup, _) => {
                let source = self.operand(instr, 0)?;
                let value = self.value(source)?;
                let result = self.value(id)?;
                let ty = self.slot_type(source)?;
                self.assign(&result, &value, ty)?;
            }
            _ => return Err(self.invalid_operand(instr, "argument or local")),
        }
        Ok(())
    }

    pub(crate) fn emit_arithmetic(&mut self, id: InstrId, instr: &Instruction) -> TranslateResult<()> {
        use OpCode::*;
        let result = self.value(id)?;
        let a = self.operand_value(instr, 0)?;
        let first = self.operand(instr, 0)?;
        let primitive = self.slot_primitive(first)?;
        let unsigned = unsigned_c_name(primitive);

        match instr.opcode {
            Neg => self.out.line(format!("{} = -{};", result, a)),
            Not => self.out.line(format!("{} = ~{};", result, a)),
            Ckfinite => {
                self.raise_if(&format!("!isfinite({})", a), RuntimeFault::Arithmetic, instr.offset);
                self.out.line(format!("{} = {};", result, a));
            }
            _ => {
                let b = self.operand_value(instr, 1)?;
                let second = self.slot_primitive(self.operand(instr, 1)?)?;
                let line = match instr.opcode {
                    Add => format!("{} = {} + {};", result, a, b),
                    Sub => format!("{} = {} - {};", result, a, b),
                    Mul => format!("{} = {} * {};", result, a, b),
                    And => format!("{} = {} & {};", result, a, b),
                    Or => format!("{} = {} | {};", result, a, b),
                    Xor => format!("{} = {} ^ {};", result, a, b),
                    Shl => format!("{} = {} << {};", result, a, b),
                    Shr => format!("{} = {} >> {};", result, a, b),
                    ShrUn => format!("{} = ({}){} >> {};", result, unsigned, a, b),
                    Div | Rem if primitive.is_float() => {
                        if instr.opcode == Div {
                            format!("{} = {} / {};", result, a, b)
                        } else {
                            format!("{} = fmod({}, {});", result, a, b)
                        }
                    }
                    Div | Rem => {
                        self.raise_if(&format!("{} == 0", b), RuntimeFault::DivideByZero, instr.offset);
                        if let Some(min) = min_value_macro(primitive) {
                            self.raise_if(
                                &format!("{} == -1 && {} == {}", b, a, min),
                                RuntimeFault::Arithmetic,
                                instr.offset,
                            );
                        }
                        let op = if instr.opcode == Div { "/" } else { "%" };
                        format!("{} = {} {} {};", result, a, op, b)
                    }
                    DivUn | RemUn => {
                        self.raise_if(&format!("{} == 0", b), RuntimeFault::DivideByZero, instr.offset);
                        let op = if instr.opcode == DivUn { "/" } else { "%" };
                        format!(
                            "{} = ({}){} {} ({}){};",
                            result,
                            unsigned,
                            a,
                            op,
                            unsigned_c_name(second),
                            b
                        )
                    }
                    AddOvf | AddOvfUn | SubOvf | SubOvfUn | MulOvf | MulOvfUn => {
                        let helper = match instr.opcode {
                            AddOvf | AddOvfUn => "Add",
                            SubOvf | SubOvfUn => "Subtract",
                            _ => "Multiply",
                        };
                        let (left, right) = if matches!(instr.opcode, AddOvfUn | SubOvfUn | MulOvfUn) {
                            (unsigned_equivalent(primitive), unsigned_equivalent(second))
                        } else {
                            (primitive, second)
                        };
                        self.out.line(format!(
                            "{} = {}_{}_{}({}, {}, &overflowFlag);",
                            result,
                            helper,
                            helper_name(left),
                            helper_name(right),
                            a,
                            b
                        ));
                        self.raise_if("overflowFlag == 1", RuntimeFault::Overflow, instr.offset);
                        return Ok(());
                    }
                    _ => return Err(self.unsupported(instr)),
                };
                self.out.line(line);
            }
        }
        Ok(())
    }

    pub(crate) fn emit_compare(&mut self, id: InstrId, instr: &Instruction) -> TranslateResult<()> {
        let result = self.value(id)?;
        let a = self.operand_value(instr, 0)?;
        let b = self.operand_value(instr, 1)?;
        let left = self.slot_primitive(self.operand(instr, 0)?)?;
        let right = self.slot_primitive(self.operand(instr, 1)?)?;
        let condition = match instr.opcode {
            OpCode::Ceq => format!("{} == {}", a, b),
            OpCode::Cgt => format!("{} > {}", a, b),
            OpCode::Clt => format!("{} < {}", a, b),
            OpCode::CgtUn if left.is_float() => format!("!({} <= {})", a, b),
            OpCode::CltUn if left.is_float() => format!("!({} >= {})", a, b),
            OpCode::CgtUn => format!("({}){} > ({}){}", unsigned_c_name(left), a, unsigned_c_name(right), b),
            OpCode::CltUn => format!("({}){} < ({}){}", unsigned_c_name(left), a, unsigned_c_name(right), b),
            _ => return Err(self.unsupported(instr)),
        };
        self.out.line(format!("{} = {};", result, condition));
        Ok(())
    }

    pub(crate) fn emit_branch(&mut self, instr: &Instruction) -> TranslateResult<()> {
        use OpCode::*;
        if instr.opcode == Switch {
            let targets = match &instr.operand {
                Operand::Targets(targets) => targets.clone(),
                _ => return Err(self.invalid_operand(instr, "switch targets")),
            };
            let value = self.operand_value(instr, 0)?;
            self.out.open(format!("switch ({})", value));
            for (index, target) in targets.iter().enumerate() {
                self.out.line(format!("case {}: goto {};", index, block_label(*target)));
            }
            self.out.close("");
            return Ok(());
        }

        let target = block_label(self.branch_target(instr)?);
        let condition = match instr.opcode {
            Br => {
                self.out.line(format!("goto {};", target));
                return Ok(());
            }
            Brtrue => self.operand_value(instr, 0)?,
            Brfalse => format!("!{}", self.operand_value(instr, 0)?),
            _ => {
                let a = self.operand_value(instr, 0)?;
                let b = self.operand_value(instr, 1)?;
                let left = self.slot_primitive(self.operand(instr, 0)?)?;
                let right = self.slot_primitive(self.operand(instr, 1)?)?;
                let (ua, ub) = (unsigned_c_name(left), unsigned_c_name(right));
                let float = left.is_float();
                match instr.opcode {
                    Beq => format!("{} == {}", a, b),
                    Bge => format!("{} >= {}", a, b),
                    Bgt => format!("{} > {}", a, b),
                    Ble => format!("{} <= {}", a, b),
                    Blt => format!("{} < {}", a, b),
                    BneUn if float => format!("!({} == {})", a, b),
                    BgeUn if float => format!("!({} < {})", a, b),
                    BgtUn if float => format!("!({} <= {})", a, b),
                    BleUn if float => format!("!({} > {})", a, b),
                    BltUn if float => format!("!({} >= {})", a, b),
                    BneUn => format!("({}){} != ({}){}", ua, a, ub, b),
                    BgeUn => format!("({}){} >= ({}){}", ua, a, ub, b),
                    BgtUn => format!("({}){} > ({}){}", ua, a, ub, b),
                    BleUn => format!("({}){} <= ({}){}", ua, a, ub, b),
                    BltUn => format!("({}){} < ({}){}", ua, a, ub, b),
                    _ => return Err(self.unsupported(instr)),
                }
            }
        };
        self.out.line(format!("if ({}) goto {};", condition, target));
        Ok(())
    }

    pub(crate) fn emit_conversion(&mut self, id: InstrId, instr: &Instruction) -> TranslateResult<()> {
        let target = conversion_target(instr.opcode).ok_or_else(|| self.unsupported(instr))?;
        let result = self.value(id)?;
        let value = self.operand_value(instr, 0)?;
        let source = self.slot_primitive(self.operand(instr, 0)?)?;
        let target_name = target.c_name().unwrap_or("uintptr_t");

        if is_checked_conversion(instr.opcode) {
            let from = if is_unsigned_source(instr.opcode) {
                unsigned_equivalent(source)
            } else {
                source
            };
            self.out.line(format!(
                "{} = Convert_{}_to_{}({}, &overflowFlag);",
                result,
                helper_name(from),
                target_name,
                value
            ));
            self.raise_if("overflowFlag == 1", RuntimeFault::Overflow, instr.offset);
            return Ok(());
        }

        let line = if instr.opcode == OpCode::ConvRUn {
            format!("{} = (double)({}){};", result, unsigned_c_name(source), value)
        } else if target.is_unsigned() && !source.is_float() {
            format!("{} = ({})({}){};", result, target_name, unsigned_c_name(source), value)
        } else {
            format!("{} = ({}){};", result, target_name, value)
        };
        self.out.line(line);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslatorConfig;
    use crate::emit::emit_method;
    use crate::metadata::builder::{BodyBuilder, ProgramBuilder};
    use crate::metadata::{MethodId, ModuleKind, Program};
    use crate::session::TranslationSession;

    fn binary(opcode: OpCode, ty: PrimitiveType) -> (Program, MethodId) {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let t = b.prim(ty);
        let c = b.class(module, "App", "C", Some(object));
        let m = b.static_method(c, "Op", t);
        b.param(m, "a", t);
        b.param(m, "b", t);
        let mut body = BodyBuilder::new();
        let a = body.emit(0, OpCode::Ldarg, Operand::Parameter(0), Some(t), &[]);
        let x = body.emit(1, OpCode::Ldarg, Operand::Parameter(1), Some(t), &[]);
        let r = body.emit(2, opcode, Operand::None, Some(t), &[a, x]);
        body.emit(3, OpCode::Ret, Operand::None, None, &[r]);
        b.body(m, body.finish());
        (b.build().unwrap(), m)
    }

    #[test]
    fn test_signed_division_guards_zero_then_overflow() {
        let (program, m) = binary(OpCode::Div, PrimitiveType::Int32);
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        let text = emit_method(&mut session, m).unwrap();
        let zero = text.find("GetDivideByZeroException").unwrap();
        let overflow = text.find("== -1 && ").unwrap();
        let divide = text.find(" / ").unwrap();
        assert!(zero < overflow && overflow < divide);
        assert!(text.contains("== INT32_MIN)"));
        assert!(text.contains("GetArithmeticException"));
    }

    #[test]
    fn test_float_remainder_uses_fmod() {
        let (program, m) = binary(OpCode::Rem, PrimitiveType::Float64);
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        let text = emit_method(&mut session, m).unwrap();
        assert!(text.contains("fmod("));
        assert!(!text.contains("GetDivideByZeroException"));
    }

    #[test]
    fn test_checked_add_calls_helper() {
        let (program, m) = binary(OpCode::AddOvfUn, PrimitiveType::Int32);
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        let text = emit_method(&mut session, m).unwrap();
        assert!(text.contains("uint32_t overflowFlag = 0;"));
        assert!(text.contains("Add_uint32_t_uint32_t("));
        assert!(text.contains("if (overflowFlag == 1) {"));
        assert!(text.contains("GetOverflowException"));
    }

    #[test]
    fn test_constants() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let void = b.prim(PrimitiveType::Void);
        let int32 = b.prim(PrimitiveType::Int32);
        let float64 = b.prim(PrimitiveType::Float64);
        let c = b.class(module, "App", "C", Some(object));
        let m = b.static_method(c, "Consts", void);
        let mut body = BodyBuilder::new();
        let min = body.emit(0, OpCode::LdcI4, Operand::Int(i32::MIN as i64), Some(int32), &[]);
        body.emit(1, OpCode::Pop, Operand::None, None, &[min]);
        let one = body.emit(2, OpCode::LdcR8, Operand::Float(1.0), Some(float64), &[]);
        body.emit(3, OpCode::Pop, Operand::None, None, &[one]);
        body.emit(4, OpCode::Ret, Operand::None, None, &[]);
        b.body(m, body.finish());
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        let text = emit_method(&mut session, m).unwrap();
        assert!(text.contains("= INT32_MIN;"));
        assert!(text.contains("uint64_t doubleAsHex = 0x3ff0000000000000;"));
    }

    #[test]
    fn test_float_literals() {
        assert_eq!(float_literal(1.5), "1.5f");
        assert_eq!(float_literal(f32::NAN), "NAN");
        assert_eq!(float_literal(f32::NEG_INFINITY), "-INFINITY");
    }
}
