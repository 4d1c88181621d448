//! C function signatures of translated methods
//!
//! Every emitted function returns `uintptr_t`: zero on normal completion,
//! the thrown exception object otherwise. Results travel through a trailing
//! `_result` pointer.

use crate::ctypes::parameter_type;
use crate::error::TranslateResult;
use crate::mangler::sanitize_local;
use crate::metadata::{MethodDef, MethodId, Program};
use crate::session::TranslationSession;

/// Name of parameter `index` inside the emitted function
pub fn parameter_name(def: &MethodDef, index: usize) -> String {
    match def.parameters.get(index) {
        Some(p) if !p.name.is_empty() => sanitize_local(&p.name),
        _ => format!("arg{}", index),
    }
}

/// Delegate constructors receive an extra `isStatic` argument
pub fn is_delegate_constructor(program: &Program, method: MethodId) -> bool {
    let def = program.method(method);
    def.flags.constructor && program.is_delegate(def.declaring_type)
}

pub fn is_delegate_invoke(program: &Program, method: MethodId) -> bool {
    let def = program.method(method);
    def.name == "Invoke" && !def.is_static() && program.is_delegate(def.declaring_type)
}

/// Whether some translation unit defines a C function for `method`
pub fn is_defined(program: &Program, method: MethodId) -> bool {
    let def = program.method(method);
    if def.flags.c_runtime {
        return true;
    }
    if def.flags.is_abstract || def.intrinsic.is_some() || program.is_open_method(method) {
        return false;
    }
    def.body.is_some() || is_delegate_constructor(program, method) || is_delegate_invoke(program, method)
}

/// The parameter list, without parentheses
pub fn parameter_list(session: &mut TranslationSession<'_>, method: MethodId) -> TranslateResult<String> {
    let program = session.program;
    let def = program.method(method);
    let mut parts = Vec::with_capacity(def.parameters.len() + 2);
    if !def.is_static() {
        parts.push("uintptr_t  _this".to_string());
    }
    for (index, parameter) in def.parameters.iter().enumerate() {
        let ty = parameter_type(session, parameter.ty, parameter.by_ref)?;
        parts.push(format!("{} {}", ty, parameter_name(def, index)));
    }
    if is_delegate_constructor(program, method) {
        parts.push("uint32_t isStatic".to_string());
    }
    if !program.is_void(def.return_type) {
        parts.push("uintptr_t _result".to_string());
    }
    if def.flags.accepts_extra_arguments {
        parts.push("uintptr_t _extraArgumentTypes, ...".to_string());
    }
    if parts.is_empty() {
        return Ok("void".to_string());
    }
    Ok(parts.join(", "))
}

/// `uintptr_t name(params)`
pub fn method_signature(session: &mut TranslationSession<'_>, method: MethodId) -> TranslateResult<String> {
    let name = session.method_name(method);
    let parameters = parameter_list(session, method)?;
    Ok(format!("uintptr_t {}({})", name, parameters))
}

/// `typedef uintptr_t (*name_ptr)(params);` used for virtual dispatch
pub fn pointer_typedef(session: &mut TranslationSession<'_>, method: MethodId) -> TranslateResult<String> {
    let name = session.method_name(method);
    let parameters = parameter_list(session, method)?;
    Ok(format!("typedef uintptr_t (*{}_ptr)({});", name, parameters))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslatorConfig;
    use crate::metadata::builder::ProgramBuilder;
    use crate::metadata::{ModuleKind, PrimitiveType};

    #[test]
    fn test_instance_method_with_result() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let int32 = b.prim(PrimitiveType::Int32);
        let c = b.class(module, "App", "C", Some(object));
        let m = b.method(c, "Add", int32);
        b.param(m, "x", int32);
        b.param(m, "", int32);
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        let name = session.method_name(m);
        assert_eq!(
            method_signature(&mut session, m).unwrap(),
            format!(
                "uintptr_t {}(uintptr_t  _this, int32_t x, int32_t arg1, uintptr_t _result)",
                name
            )
        );
    }

    #[test]
    fn test_static_void_method_takes_void() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let void = b.prim(PrimitiveType::Void);
        let c = b.class(module, "App", "C", Some(object));
        let m = b.static_method(c, "Run", void);
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        let name = session.method_name(m);
        assert_eq!(
            pointer_typedef(&mut session, m).unwrap(),
            format!("typedef uintptr_t (*{}_ptr)(void);", name)
        );
    }

    #[test]
    fn test_delegate_constructor_takes_is_static() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let void = b.prim(PrimitiveType::Void);
        let d = b.delegate(module, "App", "Action", &[], void);
        let program = b.build().unwrap();
        let ctor = program.ty(d).methods[0];
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        assert!(method_signature(&mut session, ctor)
            .unwrap()
            .ends_with("uintptr_t object, intptr_t method, uint32_t isStatic)"));
        assert!(is_defined(&program, ctor));
    }
}
