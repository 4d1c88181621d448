//! Per-module type loader
//!
//! The loader builds the runtime type object of every type a module owns:
//! it allocates the object with room for the interface method table and
//! the virtual method table, registers it with the runtime, assigns
//! interface method ids, fills both dispatch tables and finally links each
//! type object to its base, declaring type and generic arguments. Loaders
//! of referenced modules run first, and each loader runs at most once.

use super::statics::interface_method_id;
use super::vtable::{interface_dispatch_plan, virtual_table};
use super::{runtime_type_flags, type_attributes, type_code};
use crate::emit::signature::is_defined;
use crate::error::TranslateResult;
use crate::metadata::{ModuleId, Program, TypeId, TypeKind};
use crate::session::TranslationSession;
use crate::source_writer::SourceWriter;
use fxhash::FxHashSet;
use log::debug;

/// `<module>_type_loader`
pub fn loader_name(session: &mut TranslationSession<'_>, module: ModuleId) -> String {
    format!("{}_type_loader", session.module_name(module))
}

/// Wide string literal body for `L"..."`
///
/// Backslashes and quotes are escaped; characters outside printable ASCII
/// use `\u`/`\U` when C accepts a universal character name for them and
/// `\x` otherwise. A hex escape followed by a hex digit closes the literal
/// so the digit is not swallowed.
pub fn escape_wide_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 8);
    let mut after_hex_escape = false;
    for c in value.chars() {
        if after_hex_escape && c.is_ascii_hexdigit() {
            out.push_str("\" L\"");
        }
        after_hex_escape = false;
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            ' '..='~' => out.push(c),
            _ if (c as u32) > 0xFFFF => out.push_str(&format!("\\U{:08x}", c as u32)),
            _ if (c as u32) > 0xA0 => out.push_str(&format!("\\u{:04x}", c as u32)),
            _ => {
                out.push_str(&format!("\\x{:02x}", c as u32));
                after_hex_escape = true;
            }
        }
    }
    out
}

pub struct TypeLoaderEmitter<'s, 'p> {
    session: &'s mut TranslationSession<'p>,
    program: &'p Program,
    module: ModuleId,
    linked: FxHashSet<TypeId>,
}

impl<'s, 'p> TypeLoaderEmitter<'s, 'p> {
    pub fn new(session: &'s mut TranslationSession<'p>, module: ModuleId) -> Self {
        let program = session.program;
        TypeLoaderEmitter {
            session,
            program,
            module,
            linked: FxHashSet::default(),
        }
    }

    fn object_struct(&mut self) -> String {
        format!("struct {}", self.session.type_name(self.program.well_known.object))
    }

    fn runtime_type_struct(&mut self) -> String {
        format!("struct {}", self.session.type_name(self.program.well_known.runtime_type))
    }

    /// Emits the loader function
    ///
    /// `structural` lists the closed structural types this loader must make
    /// sure exist; `strings` are the literals it materializes (executables
    /// only).
    pub fn emit(&mut self, structural: &[TypeId], strings: &[String], w: &mut SourceWriter) -> TranslateResult<()> {
        let program = self.program;
        let name = loader_name(self.session, self.module);
        let types: Vec<TypeId> = program
            .module_types(self.module)
            .into_iter()
            .filter(|&t| !program.is_open(t))
            .collect();
        debug!("type loader {}: {} types, {} structural", name, types.len(), structural.len());

        w.open(format!("void {}()", name));
        w.line("uintptr_t _module;");
        w.line("void ** baseAddress;");
        w.line("uint32_t IMTOffset;");
        w.line("uint32_t offsetToID[IMTSIZE];");
        w.line(format!("if ({}_is_initialized) return;", name));
        w.line(format!("{}_is_initialized = 1;", name));
        for &reference in &program.module(self.module).references {
            if reference != self.module {
                let referenced = loader_name(self.session, reference);
                w.line(format!("{}();", referenced));
            }
        }
        w.line("GetNewModule((uintptr_t)&_module);");

        for &ty in &types {
            self.create_type_object(ty, w)?;
        }
        for &ty in &types {
            self.fill_dispatch_tables(ty, w)?;
        }
        for &ty in &types {
            self.link(ty, w);
        }

        for &ty in structural {
            let type_object = self.session.type_object(ty);
            w.open(format!("if ({} == 0)", type_object));
            match program.ty(ty).kind {
                TypeKind::Vector { element } => {
                    let element_object = self.session.type_object(element);
                    w.line(format!("GetVectorType({}, (uintptr_t)&{});", element_object, type_object));
                }
                TypeKind::Matrix { element, rank } => {
                    let element_object = self.session.type_object(element);
                    w.line(format!(
                        "GetMatrixType({}, {}, (uintptr_t)&{});",
                        element_object, rank, type_object
                    ));
                }
                _ => {
                    self.create_type_object(ty, w)?;
                    self.fill_dispatch_tables(ty, w)?;
                    self.link(ty, w);
                }
            }
            w.close("");
        }

        for value in strings {
            let string_name = self.session.string_name(value);
            w.line(format!(
                "CtorCharPtr((uintptr_t)&L\"{}\", (uintptr_t)&{});",
                escape_wide_literal(value),
                string_name
            ));
        }
        w.close("");
        Ok(())
    }

    fn size_expression(&mut self, ty: TypeId) -> String {
        let program = self.program;
        match program.ty(ty).kind {
            TypeKind::Interface => "0".to_string(),
            TypeKind::Pointer { .. } | TypeKind::ManagedPointer { .. } => "sizeof(uintptr_t)".to_string(),
            _ if program.is_interface(ty) => "0".to_string(),
            _ => format!("sizeof(struct {})", self.session.type_name(ty)),
        }
    }

    /// Parameterless instance constructor, if the type has one with code
    fn default_constructor(&mut self, ty: TypeId) -> String {
        let program = self.program;
        let def = program.ty(ty);
        if def.flags.is_abstract || program.is_interface(ty) {
            return "0".to_string();
        }
        def.methods
            .iter()
            .copied()
            .find(|&m| {
                let md = program.method(m);
                md.flags.constructor && !md.is_static() && md.parameters.is_empty() && is_defined(program, m)
            })
            .map_or_else(
                || "0".to_string(),
                |ctor| format!("(uintptr_t)&{}", self.session.method_name(ctor)),
            )
    }

    fn create_type_object(&mut self, ty: TypeId, w: &mut SourceWriter) -> TranslateResult<()> {
        let program = self.program;
        let def = program.ty(ty);
        let type_object = self.session.type_object(ty);
        let object = self.object_struct();
        let runtime_type = self.runtime_type_struct();

        if program.is_interface(ty) {
            w.line(format!("{} = (uintptr_t)calloc(1, sizeof({}));", type_object, runtime_type));
        } else {
            let vmt = virtual_table(self.session, ty)?;
            w.line(format!(
                "{} = (uintptr_t)calloc(1, sizeof({}) + sizeof(uintptr_t) * ({} + IMTSIZE + 1));",
                type_object,
                runtime_type,
                vmt.len()
            ));
        }
        w.line(format!("{} += sizeof({});", type_object, object));

        let size = self.size_expression(ty);
        let ctor = self.default_constructor(ty);
        w.line(format!(
            "InitializeRuntimeType({}, _module, 0x{:x}, {}, {}, 0x{:x}, 0x{:x}, {}, {});",
            type_object,
            def.token,
            size,
            def.interfaces.len(),
            type_attributes(program, ty),
            runtime_type_flags(program, ty),
            type_code(program, ty),
            ctor
        ));

        if program.is_interface(ty) {
            for &method in &def.methods {
                if program.method(method).is_virtual() {
                    let id = interface_method_id(self.session, method);
                    w.line(format!("{} = interfaceMethodIDCounter;", id));
                    w.line("interfaceMethodIDCounter++;");
                }
            }
        }
        Ok(())
    }

    fn fill_dispatch_tables(&mut self, ty: TypeId, w: &mut SourceWriter) -> TranslateResult<()> {
        let program = self.program;
        if program.is_interface(ty) {
            return Ok(());
        }
        let type_object = self.session.type_object(ty);
        let object = self.object_struct();
        let runtime_type = self.runtime_type_struct();

        let system_type = self.session.type_name(program.well_known.system_type);
        let direct = self.session.field_name(program.well_known.type_object.direct_interfaces);
        for (index, &iface) in program.ty(ty).interfaces.iter().enumerate() {
            let iface_object = self.session.type_object(iface);
            w.line(format!(
                "((uintptr_t*)((struct {}*) ({} - sizeof({})))->{})[{}] = {};",
                system_type, type_object, object, direct, index, iface_object
            ));
        }

        let plan = interface_dispatch_plan(self.session, ty)?;
        if !plan.is_empty() {
            w.line(format!(
                "baseAddress = (void **)({} - sizeof({}) + sizeof({}) + sizeof(uintptr_t));",
                type_object, object, runtime_type
            ));
        }
        for entry in plan {
            let id = interface_method_id(self.session, entry.interface_method);
            let implementation = self.session.method_name(entry.implementation);
            w.line(format!("IMTOffset = {} % IMTSIZE;", id));
            w.open("if (*(baseAddress + IMTOffset) == 0 )");
            w.line(format!("*(baseAddress + IMTOffset) = (void *)&{};", implementation));
            w.line(format!("offsetToID[IMTOffset] = {};", id));
            w.dedent();
            w.open("} else if (*(baseAddress + IMTOffset) == (void *)1 )");
            w.line(format!(
                "AddToIMTTable((uintptr_t)(*(baseAddress - 1)), {}, (uintptr_t)&{});",
                id, implementation
            ));
            w.dedent();
            w.open("} else");
            w.line(format!(
                "UpdateIMTTable((uintptr_t)(*(baseAddress - 1)), offsetToID[IMTOffset], (uintptr_t)(*(baseAddress + IMTOffset)), {}, (uintptr_t)&{}, (uintptr_t)(baseAddress - 1));",
                id, implementation
            ));
            w.line("*(baseAddress + IMTOffset) = (void *)1;");
            w.close("");
        }

        let vmt = virtual_table(self.session, ty)?;
        if !vmt.is_empty() {
            w.line(format!(
                "baseAddress = (void **)({} - sizeof({}) + sizeof({}) + ((1 + IMTSIZE) * sizeof(uintptr_t)));",
                type_object, object, runtime_type
            ));
        }
        for &method in &vmt.slots {
            if is_defined(program, method) {
                let name = self.session.method_name(method);
                w.line(format!("*(baseAddress++) = (void *)&{};", name));
            } else {
                w.line("*(baseAddress++) = (void *)0;");
            }
        }
        Ok(())
    }

    /// Attaches base class, generic arguments and declaring type; types of
    /// other modules were linked by their own loader
    fn link(&mut self, ty: TypeId, w: &mut SourceWriter) {
        let program = self.program;
        let def = program.ty(ty);
        if def.kind.is_nominal() && def.module != Some(self.module) {
            return;
        }
        if !self.linked.insert(ty) {
            return;
        }
        let type_object = self.session.type_object(ty);
        let system_type_object = self.session.type_object(program.well_known.system_type);
        w.line(format!("SetType({}, {});", type_object, system_type_object));

        if let Some(base) = program.base_of(ty).filter(|&b| b != ty) {
            self.link(base, w);
            let base_object = self.session.type_object(base);
            w.line(format!("SetBaseClass({}, {});", type_object, base_object));
        }
        if let TypeKind::GenericInstance { arguments, .. } = &def.kind {
            w.line(format!("AllocateForGenericArguments({}, {});", type_object, arguments.len()));
            for (index, &argument) in arguments.iter().enumerate() {
                let argument_object = self.session.type_object(argument);
                w.line(format!(
                    "SetGenericArgument({}, {}, {});",
                    type_object, argument_object, index
                ));
            }
        }
        if let Some(outer) = def.declaring_type {
            self.link(outer, w);
            let outer_object = self.session.type_object(outer);
            w.line(format!("SetDeclaringType({}, {});", type_object, outer_object));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslatorConfig;
    use crate::metadata::builder::ProgramBuilder;
    use crate::metadata::{ModuleKind, PrimitiveType};

    #[test]
    fn test_escape_wide_literal() {
        assert_eq!(escape_wide_literal("a\"b\\c"), "a\\\"b\\\\c");
        assert_eq!(escape_wide_literal("x\ny"), "x\\x0ay");
        assert_eq!(escape_wide_literal("\u{1}a"), "\\x01\" L\"a");
        assert_eq!(escape_wide_literal("caf\u{e9}"), "caf\\u00e9");
    }

    #[test]
    fn test_base_linked_before_derived() {
        let mut b = ProgramBuilder::new();
        let app = b.module("App", ModuleKind::Library);
        let object = b.object();
        let c = b.class(app, "App", "C", Some(object));
        let d = b.class(app, "App", "D", Some(c));
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        let c_object = session.type_object(c);
        let d_object = session.type_object(d);
        let core_loader = loader_name(&mut session, ModuleId(0));

        let mut w = SourceWriter::new();
        TypeLoaderEmitter::new(&mut session, app).emit(&[], &[], &mut w).unwrap();
        let text = w.finish();
        let c_base = text.find(&format!("SetBaseClass({}, ", c_object)).unwrap();
        let d_base = text.find(&format!("SetBaseClass({}, {});", d_object, c_object)).unwrap();
        assert!(c_base < d_base);
        assert!(text.contains("GetNewModule((uintptr_t)&_module);"));
        assert!(text.contains(&format!("{}();", core_loader)));
    }

    #[test]
    fn test_interface_ids_and_imt_fill() {
        let mut b = ProgramBuilder::new();
        let app = b.module("App", ModuleKind::Library);
        let object = b.object();
        let void = b.prim(PrimitiveType::Void);
        let iface = b.interface(app, "App", "IRun");
        let run = b.virtual_method(iface, "Run", void);
        let c = b.class(app, "App", "C", Some(object));
        b.implement(c, iface);
        let c_run = b.virtual_method(c, "Run", void);
        b.body(c_run, Default::default());
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        let id = interface_method_id(&mut session, run);
        let implementation = session.method_name(c_run);

        let mut w = SourceWriter::new();
        TypeLoaderEmitter::new(&mut session, app).emit(&[], &[], &mut w).unwrap();
        let text = w.finish();
        assert!(text.contains(&format!("{} = interfaceMethodIDCounter;", id)));
        assert!(text.contains(&format!("IMTOffset = {} % IMTSIZE;", id)));
        assert!(text.contains(&format!("*(baseAddress + IMTOffset) = (void *)&{};", implementation)));
        assert!(text.contains(&format!("*(baseAddress++) = (void *)&{};", implementation)));
    }
}
