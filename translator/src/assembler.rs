//! Module Assembler
//!
//! Drives the translation of one module into a header and a body:
//!
//! - header: includes, `IMTSIZE`, struct layouts, `extern` statics, helper
//!   prototypes and every method signature
//! - body: the executable's runtime globals, `allocateStatics` and `main`,
//!   then static definitions, the type loader, static-constructor helpers
//!   and one C function per translatable method
//!
//! Types defined by structure (closed generic instances, arrays, pointers)
//! belong to no module; their methods and statics are emitted once, by the
//! module that owns structural code.

use crate::config::TranslatorConfig;
use crate::emit::{self, signature};
use crate::error::{TranslateError, TranslateResult};
use crate::layout::statics::{self, static_constructor_check};
use crate::layout::structs::StructEmitter;
use crate::layout::structural;
use crate::layout::type_loader::{loader_name, TypeLoaderEmitter};
use crate::metadata::{MethodId, ModuleId, Operand, Program, TypeId, TypeKind};
use crate::session::TranslationSession;
use crate::source_writer::SourceWriter;
use indexmap::IndexSet;
use log::{debug, info};
use std::path::{Path, PathBuf};

/// The two translation units produced for a module
#[derive(Debug, Clone)]
pub struct ModuleOutput {
    /// File stem shared by the header and the body
    pub name: String,
    pub header: String,
    pub body: String,
}

impl ModuleOutput {
    pub fn header_file(&self) -> String {
        format!("{}.h", self.name)
    }

    pub fn body_file(&self) -> String {
        format!("{}.c", self.name)
    }

    /// Write `<name>.h` and `<name>.c` into `dir`
    pub fn write_to(&self, dir: &Path) -> TranslateResult<Vec<PathBuf>> {
        std::fs::create_dir_all(dir).map_err(|source| TranslateError::Io {
            path: dir.display().to_string(),
            source,
        })?;
        let mut written = Vec::with_capacity(2);
        for (file, text) in [(self.header_file(), &self.header), (self.body_file(), &self.body)] {
            let path = dir.join(file);
            std::fs::write(&path, text).map_err(|source| TranslateError::Io {
                path: path.display().to_string(),
                source,
            })?;
            written.push(path);
        }
        Ok(written)
    }
}

/// Translate every module of `program` within one session
pub fn translate_program(program: &Program, config: TranslatorConfig) -> TranslateResult<Vec<ModuleOutput>> {
    config.validate()?;
    let mut session = TranslationSession::new(program, config);
    let modules: Vec<ModuleId> = program.module_ids().collect();
    info!("translating {} modules", modules.len());
    modules
        .into_iter()
        .map(|module| translate_module(&mut session, module))
        .collect()
}

/// Translate a single module
///
/// Nothing is written here; the caller decides where the output goes once
/// the whole module has translated.
pub fn translate_module(session: &mut TranslationSession<'_>, module: ModuleId) -> TranslateResult<ModuleOutput> {
    let program = session.program;
    let name = session.module_name(module);
    let plan = ModulePlan::new(program, module);
    info!(
        "translating module {} ({} types, {} structural, {} methods)",
        program.module(module).name,
        plan.types.len(),
        plan.used_structural.len(),
        plan.methods.len()
    );

    let header = emit_header(session, &plan, &name)?;
    let body = emit_body(session, &plan, &name)?;
    Ok(ModuleOutput { name, header, body })
}

/// What a module declares and defines
struct ModulePlan {
    module: ModuleId,
    executable: bool,
    /// Closed nominal types the module declares
    types: Vec<TypeId>,
    /// Closed structural types the module's code mentions
    used_structural: Vec<TypeId>,
    /// Structural types whose code and storage this module defines
    owned_structural: Vec<TypeId>,
    /// Literals this module declares `extern`
    strings: IndexSet<String>,
    /// Literals this module defines and materializes
    owned_strings: Vec<String>,
    /// Methods with a signature in the header
    methods: Vec<MethodId>,
    /// Methods whose C function this module may define
    defined_methods: Vec<MethodId>,
}

impl ModulePlan {
    fn new(program: &Program, module: ModuleId) -> Self {
        let executable = program.module(module).is_executable();
        let types: Vec<TypeId> = program
            .module_types(module)
            .into_iter()
            .filter(|&t| !program.is_open(t))
            .collect();
        let used_structural = structural::module_structural_types(program, module);
        let owner = structural::owns_structural_code(program, module);

        let scope: Vec<ModuleId> = if executable {
            structural::reachable_modules(program, module)
        } else {
            program.module_ids().collect()
        };
        let owned_structural = if owner {
            structural::program_structural_types(program, &scope)
        } else {
            Vec::new()
        };
        let strings = module_strings(program, module);
        let owned_strings = if owner {
            let mut all = IndexSet::new();
            for &m in &scope {
                all.extend(module_strings(program, m));
            }
            all.into_iter().collect()
        } else {
            Vec::new()
        };

        let mut own_methods: IndexSet<MethodId> = types
            .iter()
            .flat_map(|&t| program.ty(t).methods.iter().copied())
            .collect();
        own_methods.extend(structural::generic_method_instances(program, module));

        let mut methods = own_methods.clone();
        for &ty in used_structural.iter().chain(&owned_structural) {
            methods.extend(program.ty(ty).methods.iter().copied());
        }
        let mut defined_methods = own_methods;
        for &ty in &owned_structural {
            defined_methods.extend(program.ty(ty).methods.iter().copied());
        }

        ModulePlan {
            module,
            executable,
            types,
            used_structural,
            owned_structural,
            strings,
            owned_strings,
            methods: methods.into_iter().collect(),
            defined_methods: defined_methods.into_iter().collect(),
        }
    }

    fn header_types(&self) -> Vec<TypeId> {
        let mut all: IndexSet<TypeId> = self.types.iter().copied().collect();
        all.extend(self.used_structural.iter().copied());
        all.extend(self.owned_structural.iter().copied());
        all.into_iter().collect()
    }

    fn body_types(&self) -> Vec<TypeId> {
        let mut all: IndexSet<TypeId> = self.types.iter().copied().collect();
        all.extend(self.owned_structural.iter().copied());
        all.into_iter().collect()
    }

    fn loader_structural(&self) -> Vec<TypeId> {
        let mut all: IndexSet<TypeId> = self.used_structural.iter().copied().collect();
        all.extend(self.owned_structural.iter().copied());
        all.into_iter().collect()
    }
}

/// Literal strings of a module: the declared list plus every `ldstr`
/// operand in its method bodies
fn module_strings(program: &Program, module: ModuleId) -> IndexSet<String> {
    let mut strings: IndexSet<String> = program.module(module).strings.iter().cloned().collect();
    let methods = program
        .module_types(module)
        .into_iter()
        .flat_map(|t| program.ty(t).methods.iter().copied())
        .chain(structural::generic_method_instances(program, module));
    for method in methods {
        if let Some(body) = &program.method(method).body {
            for instr in &body.instructions {
                if let Operand::String(value) = &instr.operand {
                    strings.insert(value.clone());
                }
            }
        }
    }
    strings
}

fn include_guard(name: &str) -> String {
    format!("{}_H", name.to_ascii_uppercase())
}

fn emit_header(session: &mut TranslationSession<'_>, plan: &ModulePlan, name: &str) -> TranslateResult<String> {
    let program = session.program;
    let mut w = SourceWriter::new();
    let guard = include_guard(name);
    w.line(format!("#ifndef {}", guard));
    w.line(format!("#define {}", guard));
    w.blank();

    w.line("#include <memory.h>");
    w.line("#include <stdlib.h>");
    w.line("#include <stdint.h>");
    w.line("#include <math.h>");
    w.line(format!("#include \"{}\"", session.config.platform_header));
    w.line(format!("#include \"{}\"", session.config.overflow_header));
    let mut included = IndexSet::new();
    for &reference in &program.module(plan.module).references {
        if reference != plan.module && included.insert(reference) {
            w.line(format!("#include \"{}.h\"", session.module_name(reference)));
        }
    }
    w.line(format!("#define IMTSIZE {}", session.config.imt_size));
    w.blank();

    let header_types = plan.header_types();
    StructEmitter::new(session, plan.module).emit_all(&header_types, &mut w)?;
    w.blank();

    statics::emit_static_variables(session, &header_types, true, &mut w);
    for value in &plan.strings {
        w.line(format!("extern uintptr_t {};", session.string_name(value)));
    }
    statics::emit_runtime_externs(&mut w);
    w.line(format!("void {}();", loader_name(session, plan.module)));
    w.blank();

    w.line("typedef uintptr_t (*ctor_ptr)(uintptr_t _this);");
    for &ty in &header_types {
        if session.has_static_constructor(ty) {
            w.line(format!("void {}();", static_constructor_check(session, ty)));
        }
    }
    w.blank();

    for &method in &plan.methods {
        let def = program.method(method);
        if program.is_open_method(method) || def.intrinsic.is_some() || def.flags.c_runtime {
            continue;
        }
        if def.is_virtual() {
            w.line(signature::pointer_typedef(session, method)?);
        }
        if signature::is_defined(program, method) {
            w.line(format!("{};", signature::method_signature(session, method)?));
        }
    }
    w.blank();
    w.line(format!("#endif /* {} */", guard));
    Ok(w.finish())
}

fn emit_body(session: &mut TranslationSession<'_>, plan: &ModulePlan, name: &str) -> TranslateResult<String> {
    let mut w = SourceWriter::new();
    w.line(format!("#include \"{}.h\"", name));
    w.blank();

    if plan.executable {
        if session.config.enable_debug_break {
            w.line("#define ENABLE_DEBUG_BREAK");
        } else {
            w.line("// Uncomment to trap with __debugbreak() whenever an exception is thrown");
            w.line("// #define ENABLE_DEBUG_BREAK");
        }
        statics::emit_runtime_globals(&mut w);
        w.blank();
        statics::emit_allocate_statics(session, plan.module, &mut w)?;
        w.blank();
        emit_main(session, plan.module, &mut w)?;
        w.blank();
    }

    let body_types = plan.body_types();
    for &ty in &body_types {
        w.line(format!("uintptr_t {};", session.type_object(ty)));
    }
    statics::emit_static_variables(session, &body_types, false, &mut w);
    for value in &plan.owned_strings {
        w.line(format!("uintptr_t {};", session.string_name(value)));
    }
    let loader = loader_name(session, plan.module);
    w.line(format!("uint32_t {}_is_initialized;", loader));
    w.blank();

    let structural = plan.loader_structural();
    TypeLoaderEmitter::new(session, plan.module).emit(&structural, &plan.owned_strings, &mut w)?;
    w.blank();

    for &ty in &body_types {
        if let Some(cctor) = session.static_constructor(ty) {
            statics::emit_static_constructor_check(session, ty, cctor, &mut w);
            w.blank();
        }
    }

    for &method in &plan.defined_methods {
        if let Some(text) = emit_function(session, method)? {
            w.raw(text);
            w.blank();
        }
    }
    Ok(w.finish())
}

/// The C function for `method`, or `None` when no translation unit defines
/// one here (abstract, runtime-provided and intrinsic methods)
fn emit_function(session: &mut TranslationSession<'_>, method: MethodId) -> TranslateResult<Option<String>> {
    let program = session.program;
    let def = program.method(method);
    if program.is_open_method(method) || def.flags.c_runtime || def.flags.is_abstract || def.intrinsic.is_some() {
        return Ok(None);
    }
    let method_label = program.method_display_name(method);
    let span = tracing::debug_span!("method", name = %method_label);
    let _enter = span.enter();

    if signature::is_delegate_constructor(program, method) {
        return emit::synthesized::emit_delegate_constructor(session, method).map(Some);
    }
    if signature::is_delegate_invoke(program, method) {
        return emit::synthesized::emit_delegate_invoke(session, method).map(Some);
    }
    if def.body.is_none() {
        tracing::debug!("{} has no body", method_label);
        return Ok(None);
    }
    debug!("translating {}", method_label);
    emit::emit_method(session, method).map(Some)
}

/// `int main(int argc, char *argv[])` around the module's entry point
fn emit_main(session: &mut TranslationSession<'_>, module: ModuleId, w: &mut SourceWriter) -> TranslateResult<()> {
    let program = session.program;
    let Some(entry) = program.module(module).entry_point else {
        debug!("{} has no entry point", program.module(module).name);
        return Ok(());
    };
    let def = program.method(entry);
    let object = session.type_name(program.well_known.object);
    let array = session.type_name(program.well_known.array);

    w.open("int main(int argc, char *argv[])");
    w.line("uintptr_t arguments_array = 0;");
    w.line("int result = 0;");
    w.line("uintptr_t exception;");
    w.line("allocateStatics();");
    w.line(format!("{}();", loader_name(session, module)));

    let mut arguments = Vec::with_capacity(2);
    if let Some(parameter) = def.parameters.first() {
        match program.ty(parameter.ty).kind {
            TypeKind::Vector { element } if element == program.well_known.string => {
                w.line(format!(
                    "arguments_array = (uintptr_t)calloc(1, sizeof(struct {}) + sizeof(uintptr_t) * argc);",
                    array
                ));
                w.line(format!("arguments_array += sizeof(struct {});", object));
                let vector_object = session.type_object(parameter.ty);
                let element_object = session.type_object(element);
                w.line(format!(
                    "InitializeArrayHeader(arguments_array, argc, {}, {});",
                    vector_object, element_object
                ));
                arguments.push("arguments_array".to_string());
            }
            _ => {
                return Err(TranslateError::MalformedType {
                    ty: program.display_name(parameter.ty),
                    message: "the entry point parameter must be string[]".to_string(),
                })
            }
        }
    }
    if !program.is_void(def.return_type) {
        arguments.push("(uintptr_t)&result".to_string());
    }
    w.line(format!(
        "exception = {}({});",
        session.method_name(entry),
        arguments.join(", ")
    ));
    w.open("if (exception != 0)");
    w.line(format!("exit({});", session.config.exception_exit_code));
    w.close("");
    w.line("return result;");
    w.close("");
    Ok(())
}
