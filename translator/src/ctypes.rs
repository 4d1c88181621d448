//! C spellings of metadata types
//!
//! Two forms exist for every type. The *reference* form is what a C
//! expression of that type looks like (`struct T*`, `int32_t`). The
//! *storage* form is what a variable or struct member holding the value is
//! declared as: references and pointers collapse to `uintptr_t`, value
//! types use their unboxed layout.

use crate::error::TranslateResult;
use crate::metadata::{FnSignature, PrimitiveType, Program, TypeId, TypeKind};
use crate::session::TranslationSession;

pub fn c_type(session: &mut TranslationSession<'_>, ty: TypeId, storage: bool) -> TranslateResult<String> {
    let program = session.program;
    let def = program.ty(ty);

    if let Some(primitive) = def.primitive {
        if let Some(name) = primitive.c_name() {
            return Ok(name.to_string());
        }
        // System.String
        return Ok(if storage {
            "uintptr_t".to_string()
        } else {
            format!("struct {}*", session.type_name(ty))
        });
    }

    Ok(match &def.kind {
        TypeKind::Enum { underlying } => return c_type(session, *underlying, storage),
        TypeKind::Pointer { target } | TypeKind::ManagedPointer { target } => {
            if storage {
                "uintptr_t".to_string()
            } else {
                format!("{}*", c_type(session, *target, false)?)
            }
        }
        TypeKind::FunctionPointer { signature } => {
            format!("uintptr_t (*)({})", function_pointer_parameters(session, signature)?)
        }
        TypeKind::GenericParameter { .. } => "uintptr_t".to_string(),
        _ if program.is_va_list(ty) => "va_list".to_string(),
        _ if program.is_value_type(ty) => {
            if storage {
                format!("struct {}_unboxed", session.type_name(ty))
            } else {
                format!("struct {}", session.type_name(ty))
            }
        }
        _ => {
            if storage {
                "uintptr_t".to_string()
            } else {
                format!("struct {}*", session.type_name(ty))
            }
        }
    })
}

pub fn storage_type(session: &mut TranslationSession<'_>, ty: TypeId) -> TranslateResult<String> {
    c_type(session, ty, true)
}

/// Parameter list of a function pointer, following the calling convention
/// of emitted functions
pub fn function_pointer_parameters(
    session: &mut TranslationSession<'_>,
    signature: &FnSignature,
) -> TranslateResult<String> {
    let mut parts = Vec::new();
    if signature.has_this {
        parts.push("uintptr_t".to_string());
    }
    for parameter in &signature.parameters {
        parts.push(parameter_type(session, parameter.ty, parameter.by_ref)?);
    }
    if !session.program.is_void(signature.return_type) {
        parts.push("uintptr_t".to_string());
    }
    Ok(parts.join(", "))
}

/// Declared type of a parameter in an emitted function signature
pub fn parameter_type(session: &mut TranslationSession<'_>, ty: TypeId, by_ref: bool) -> TranslateResult<String> {
    if by_ref || passed_by_address(session.program, ty) {
        Ok("uintptr_t".to_string())
    } else {
        storage_type(session, ty)
    }
}

/// Value types that are structs in C travel by address
pub fn passed_by_address(program: &Program, ty: TypeId) -> bool {
    program.is_value_type(ty) && !is_scalar_in_c(program, ty)
}

/// Whether a value type is copied with `memcpy` rather than assignment
pub fn is_aggregate(program: &Program, ty: TypeId) -> bool {
    passed_by_address(program, ty)
}

pub fn is_scalar_in_c(program: &Program, ty: TypeId) -> bool {
    if program.is_va_list(ty) || program.enum_underlying(ty).is_some() {
        return true;
    }
    match program.primitive_of(ty) {
        Some(PrimitiveType::String | PrimitiveType::Void) | None => false,
        Some(_) => true,
    }
}

/// Stack types that have a checked-arithmetic helper
pub fn is_integral(program: &Program, ty: TypeId) -> bool {
    matches!(
        program.primitive_of(ty),
        Some(
            PrimitiveType::Int32
                | PrimitiveType::Int64
                | PrimitiveType::IntPtr
                | PrimitiveType::UInt32
                | PrimitiveType::UInt64
                | PrimitiveType::UIntPtr
        )
    )
}

pub fn is_float(program: &Program, ty: TypeId) -> bool {
    program.primitive_of(ty).is_some_and(PrimitiveType::is_float)
}

/// C spelling of the unsigned type with the same width
pub fn unsigned_c_name(primitive: PrimitiveType) -> &'static str {
    match primitive {
        PrimitiveType::Int8 | PrimitiveType::UInt8 | PrimitiveType::Boolean => "uint8_t",
        PrimitiveType::Int16 | PrimitiveType::UInt16 | PrimitiveType::Char => "uint16_t",
        PrimitiveType::Int32 | PrimitiveType::UInt32 => "uint32_t",
        PrimitiveType::Int64 | PrimitiveType::UInt64 => "uint64_t",
        PrimitiveType::Float32 => "float",
        PrimitiveType::Float64 => "double",
        _ => "uintptr_t",
    }
}

/// The unsigned primitive with the same width
pub fn unsigned_equivalent(primitive: PrimitiveType) -> PrimitiveType {
    match primitive {
        PrimitiveType::Int8 => PrimitiveType::UInt8,
        PrimitiveType::Int16 => PrimitiveType::UInt16,
        PrimitiveType::Int32 => PrimitiveType::UInt32,
        PrimitiveType::Int64 => PrimitiveType::UInt64,
        PrimitiveType::IntPtr => PrimitiveType::UIntPtr,
        other => other,
    }
}

/// The signed primitive with the same width
pub fn signed_equivalent(primitive: PrimitiveType) -> PrimitiveType {
    match primitive {
        PrimitiveType::UInt8 | PrimitiveType::Boolean => PrimitiveType::Int8,
        PrimitiveType::UInt16 | PrimitiveType::Char => PrimitiveType::Int16,
        PrimitiveType::UInt32 => PrimitiveType::Int32,
        PrimitiveType::UInt64 => PrimitiveType::Int64,
        PrimitiveType::UIntPtr => PrimitiveType::IntPtr,
        other => other,
    }
}

/// Name fragment used by the checked-arithmetic helpers (`Add_int32_t_int32_t`)
pub fn helper_name(primitive: PrimitiveType) -> &'static str {
    primitive.c_name().unwrap_or("uintptr_t")
}

/// `INT32_MIN` and friends for the signed division guard
pub fn min_value_macro(primitive: PrimitiveType) -> Option<&'static str> {
    match primitive {
        PrimitiveType::Int32 => Some("INT32_MIN"),
        PrimitiveType::Int64 => Some("INT64_MIN"),
        PrimitiveType::IntPtr => Some("INTPTR_MIN"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslatorConfig;
    use crate::metadata::builder::ProgramBuilder;
    use crate::metadata::ModuleKind;

    #[test]
    fn test_primitive_and_reference_spellings() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let c = b.class(module, "App", "C", Some(object));
        let point = b.value_type(module, "App", "Point");
        let int32 = b.prim(PrimitiveType::Int32);
        let ptr = b.pointer(int32);
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());

        assert_eq!(c_type(&mut session, int32, true).unwrap(), "int32_t");
        assert_eq!(c_type(&mut session, c, true).unwrap(), "uintptr_t");
        let c_name = session.type_name(c);
        assert_eq!(c_type(&mut session, c, false).unwrap(), format!("struct {}*", c_name));
        let p_name = session.type_name(point);
        assert_eq!(
            c_type(&mut session, point, true).unwrap(),
            format!("struct {}_unboxed", p_name)
        );
        assert_eq!(c_type(&mut session, ptr, false).unwrap(), "int32_t*");
        assert_eq!(c_type(&mut session, ptr, true).unwrap(), "uintptr_t");
    }

    #[test]
    fn test_enums_use_underlying_type() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let uint8 = b.prim(PrimitiveType::UInt8);
        let color = b.enum_type(module, "App", "Color", uint8);
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        assert_eq!(c_type(&mut session, color, true).unwrap(), "uint8_t");
        assert!(is_scalar_in_c(&program, color));
    }

    #[test]
    fn test_structs_pass_by_address() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let point = b.value_type(module, "App", "Point");
        let int32 = b.prim(PrimitiveType::Int32);
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        assert!(passed_by_address(&program, point));
        assert!(!passed_by_address(&program, int32));
        assert_eq!(parameter_type(&mut session, point, false).unwrap(), "uintptr_t");
        assert_eq!(parameter_type(&mut session, int32, true).unwrap(), "uintptr_t");
        assert_eq!(parameter_type(&mut session, int32, false).unwrap(), "int32_t");
    }

    #[test]
    fn test_function_pointer_spelling() {
        let mut b = ProgramBuilder::new();
        let int32 = b.prim(PrimitiveType::Int32);
        let fp = b.function_pointer(FnSignature {
            parameters: vec![crate::metadata::ParameterDef {
                name: String::new(),
                ty: int32,
                by_ref: false,
            }],
            return_type: int32,
            returns_by_ref: false,
            calling_convention: 0,
            has_this: false,
        });
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        assert_eq!(c_type(&mut session, fp, true).unwrap(), "uintptr_t (*)(int32_t, uintptr_t)");
    }

    #[test]
    fn test_width_equivalents() {
        assert_eq!(unsigned_equivalent(PrimitiveType::Int64), PrimitiveType::UInt64);
        assert_eq!(signed_equivalent(PrimitiveType::UIntPtr), PrimitiveType::IntPtr);
        assert_eq!(unsigned_c_name(PrimitiveType::IntPtr), "uintptr_t");
        assert_eq!(min_value_macro(PrimitiveType::Int64), Some("INT64_MIN"));
        assert_eq!(min_value_macro(PrimitiveType::Float64), None);
    }
}
