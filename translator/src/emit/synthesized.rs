//! Delegate members the runtime expects every delegate type to provide

use super::signature::{method_signature, parameter_name};
use crate::ctypes::parameter_type;
use crate::error::TranslateResult;
use crate::metadata::{FieldId, MethodId};
use crate::session::TranslationSession;
use crate::source_writer::SourceWriter;
use log::debug;

fn delegate_field(session: &mut TranslationSession<'_>, object: &str, field: FieldId) -> String {
    let program = session.program;
    let header = session.type_name(program.well_known.object);
    let declaring = session.type_name(program.field(field).declaring_type);
    let name = session.field_name(field);
    format!("((struct {}*)({} - sizeof(struct {})))->{}", declaring, object, header, name)
}

/// The constructor records the target object, the function pointer and
/// whether that function is static
pub fn emit_delegate_constructor(session: &mut TranslationSession<'_>, method: MethodId) -> TranslateResult<String> {
    let program = session.program;
    let def = program.method(method);
    debug!("synthesizing {}", program.method_display_name(method));
    let fields = &program.well_known.delegate;

    let mut w = SourceWriter::new();
    w.open(method_signature(session, method)?);
    let target = delegate_field(session, "_this", fields.target);
    w.line(format!("{} = {};", target, parameter_name(def, 0)));
    let pointer = delegate_field(session, "_this", fields.method_ptr);
    w.line(format!("{} = (uintptr_t){};", pointer, parameter_name(def, 1)));
    let is_static = delegate_field(session, "_this", fields.is_static);
    w.line(format!("{} = isStatic;", is_static));
    w.line("return 0;");
    w.close("");
    Ok(w.finish())
}

/// `Invoke` forwards its arguments and result slot to the wrapped function,
/// prepending the target object for instance methods
pub fn emit_delegate_invoke(session: &mut TranslationSession<'_>, method: MethodId) -> TranslateResult<String> {
    let program = session.program;
    let def = program.method(method);
    debug!("synthesizing {}", program.method_display_name(method));
    let fields = &program.well_known.delegate;

    let mut types = Vec::with_capacity(def.parameters.len() + 1);
    let mut arguments = Vec::with_capacity(def.parameters.len() + 1);
    for (index, parameter) in def.parameters.iter().enumerate() {
        types.push(parameter_type(session, parameter.ty, parameter.by_ref)?);
        arguments.push(parameter_name(def, index));
    }
    if !program.is_void(def.return_type) {
        types.push("uintptr_t".to_string());
        arguments.push("_result".to_string());
    }

    let mut w = SourceWriter::new();
    w.open(method_signature(session, method)?);
    let target = delegate_field(session, "_this", fields.target);
    w.line(format!("uintptr_t target = {};", target));
    let pointer = delegate_field(session, "_this", fields.method_ptr);
    w.line(format!("uintptr_t methodPtr = (uintptr_t){};", pointer));
    let is_static = delegate_field(session, "_this", fields.is_static);
    w.open(format!("if ({})", is_static));
    let static_types = if types.is_empty() {
        "void".to_string()
    } else {
        types.join(", ")
    };
    w.line(format!(
        "return ((uintptr_t (*)({}))methodPtr)({});",
        static_types,
        arguments.join(", ")
    ));
    w.close("");
    types.insert(0, "uintptr_t".to_string());
    arguments.insert(0, "target".to_string());
    w.line(format!(
        "return ((uintptr_t (*)({}))methodPtr)({});",
        types.join(", "),
        arguments.join(", ")
    ));
    w.close("");
    Ok(w.finish())
}
