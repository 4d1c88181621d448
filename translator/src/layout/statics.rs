//! Static storage
//!
//! Static fields live in two runtime arenas, one per application domain and
//! one per thread. Each field is represented in C by a `uint32_t` holding
//! its byte offset into the arena; the executable computes every offset at
//! startup in `allocateStatics`. Types with a type initializer also get an
//! `_isInitialized` offset pointing at their one-byte guard.

use super::{static_fields, structural};
use crate::ctypes::storage_type;
use crate::error::TranslateResult;
use crate::metadata::{ModuleId, TypeId};
use crate::session::TranslationSession;
use crate::source_writer::SourceWriter;

pub const APPDOMAIN_BLOCK: &str = "appdomain_static_block";
pub const THREAD_BLOCK: &str = "thread_static_block";

/// `CheckIfStaticConstructorNeedsToRunFor<type>`
pub fn static_constructor_check(session: &mut TranslationSession<'_>, ty: TypeId) -> String {
    format!("CheckIfStaticConstructorNeedsToRunFor{}", session.type_name(ty))
}

/// `<type>_isInitialized`
pub fn initialized_flag(session: &mut TranslationSession<'_>, ty: TypeId) -> String {
    format!("{}_isInitialized", session.type_name(ty))
}

/// `<method>_id`, the runtime-assigned id of an interface method
pub fn interface_method_id(session: &mut TranslationSession<'_>, method: crate::metadata::MethodId) -> String {
    format!("{}_id", session.method_name(method))
}

/// Arena holding a static field
pub fn arena_of(session: &TranslationSession<'_>, field: crate::metadata::FieldId) -> &'static str {
    if session.program.field(field).thread_static {
        THREAD_BLOCK
    } else {
        APPDOMAIN_BLOCK
    }
}

/// Offset variables, initialization guards and interface method ids a
/// module's types own; `extern` in the header, definitions in the body
pub fn emit_static_variables(
    session: &mut TranslationSession<'_>,
    types: &[TypeId],
    external: bool,
    w: &mut SourceWriter,
) {
    let program = session.program;
    let prefix = if external { "extern " } else { "" };
    for &ty in types {
        if program.is_open(ty) {
            continue;
        }
        for field in static_fields(program, ty) {
            w.line(format!("{}uint32_t {};", prefix, session.field_name(field)));
        }
        if session.has_static_constructor(ty) {
            w.line(format!("{}uint32_t {};", prefix, initialized_flag(session, ty)));
        }
        if program.is_interface(ty) {
            for &method in &program.ty(ty).methods {
                if program.method(method).is_virtual() {
                    w.line(format!("{}uint32_t {};", prefix, interface_method_id(session, method)));
                }
            }
        }
    }
}

/// The globals the runtime expects the executable to define
pub fn emit_runtime_globals(w: &mut SourceWriter) {
    w.line(format!("uint32_t {}_size;", APPDOMAIN_BLOCK));
    w.line(format!("tls_type {}_tlsIndex;", APPDOMAIN_BLOCK));
    w.line("uint32_t interfaceMethodIDCounter;");
    w.line("uint8_t* statics;");
    w.line(format!("uint32_t {}_size;", THREAD_BLOCK));
    w.line(format!("tls_type {}_tlsIndex;", THREAD_BLOCK));
}

pub fn emit_runtime_externs(w: &mut SourceWriter) {
    w.line(format!("extern tls_type {}_tlsIndex;", APPDOMAIN_BLOCK));
    w.line("extern uint32_t interfaceMethodIDCounter;");
    w.line("extern uint8_t* statics;");
    w.line(format!("extern tls_type {}_tlsIndex;", THREAD_BLOCK));
}

/// `allocateStatics`: lay out every static field of the program's
/// reachable modules in its arena, then allocate both arenas
pub fn emit_allocate_statics(
    session: &mut TranslationSession<'_>,
    executable: ModuleId,
    w: &mut SourceWriter,
) -> TranslateResult<()> {
    let program = session.program;
    let modules = structural::reachable_modules(program, executable);
    let mut types: Vec<TypeId> = modules
        .iter()
        .flat_map(|&m| program.module_types(m))
        .filter(|&t| !program.is_open(t))
        .collect();
    types.extend(structural::program_structural_types(program, &modules));

    w.open("void allocateStatics()");
    w.line(format!("void* {};", APPDOMAIN_BLOCK));
    w.line(format!("void* {};", THREAD_BLOCK));

    for &ty in &types {
        for field in static_fields(program, ty) {
            let arena = arena_of(session, field);
            let name = session.field_name(field);
            let storage = storage_type(session, program.field(field).ty)?;
            w.line(format!(
                "{} = {}_size; {}_size = Increment_and_align({}_size, sizeof({}));",
                name, arena, arena, arena, storage
            ));
        }
    }
    for &ty in &types {
        if session.has_static_constructor(ty) {
            let flag = initialized_flag(session, ty);
            w.line(format!(
                "{} = {}_size; {}_size = Increment_and_align({}_size, 1);",
                flag, APPDOMAIN_BLOCK, APPDOMAIN_BLOCK, APPDOMAIN_BLOCK
            ));
        }
    }

    for arena in [APPDOMAIN_BLOCK, THREAD_BLOCK] {
        w.line(format!("AllocateThreadLocal(&{}_tlsIndex);", arena));
        w.line(format!("{} = calloc(1, {}_size);", arena, arena));
        w.line(format!("SetThreadLocalValue({}_tlsIndex, {});", arena, arena));
    }
    w.close("");
    Ok(())
}

/// The helper that runs a type initializer at most once per application
/// domain
pub fn emit_static_constructor_check(
    session: &mut TranslationSession<'_>,
    ty: TypeId,
    cctor: crate::metadata::MethodId,
    w: &mut SourceWriter,
) {
    let flag = initialized_flag(session, ty);
    let check = static_constructor_check(session, ty);
    let cctor_name = session.method_name(cctor);
    w.line(format!("extern uint32_t {};", flag));
    w.open(format!("void {}()", check));
    w.line(format!(
        "uint8_t* appDomainStatics = GetThreadLocalValue({}_tlsIndex);",
        APPDOMAIN_BLOCK
    ));
    w.line(format!("if (*((uint8_t*)(appDomainStatics+{}))) return;", flag));
    w.line(format!("*((uint8_t*)(appDomainStatics+{})) = 1;", flag));
    w.line(format!("{}();", cctor_name));
    w.close("");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslatorConfig;
    use crate::metadata::builder::ProgramBuilder;
    use crate::metadata::{ModuleKind, PrimitiveType};

    #[test]
    fn test_thread_statics_use_their_own_arena() {
        let mut b = ProgramBuilder::new();
        let app = b.module("App", ModuleKind::Executable);
        let object = b.object();
        let int32 = b.prim(PrimitiveType::Int32);
        let c = b.class(app, "App", "C", Some(object));
        let shared = b.static_field(c, "shared", int32);
        let local = b.static_field(c, "perThread", int32);
        b.field_mut(local).thread_static = true;
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());

        let mut w = SourceWriter::new();
        emit_allocate_statics(&mut session, app, &mut w).unwrap();
        let text = w.finish();
        let shared_name = session.field_name(shared);
        let local_name = session.field_name(local);
        assert!(text.contains(&format!(
            "{} = appdomain_static_block_size; appdomain_static_block_size = Increment_and_align(appdomain_static_block_size, sizeof(int32_t));",
            shared_name
        )));
        assert!(text.contains(&format!("{} = thread_static_block_size;", local_name)));
        assert!(text.contains("AllocateThreadLocal(&thread_static_block_tlsIndex);"));
    }

    #[test]
    fn test_guard_declared_for_type_initializers() {
        let mut b = ProgramBuilder::new();
        let app = b.module("App", ModuleKind::Library);
        let object = b.object();
        let c = b.class(app, "App", "C", Some(object));
        b.static_constructor(c);
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());

        let mut w = SourceWriter::new();
        emit_static_variables(&mut session, &[c], true, &mut w);
        let flag = initialized_flag(&mut session, c);
        assert_eq!(w.finish(), format!("extern uint32_t {};\n", flag));
    }
}
