//! C struct declarations for object and value layouts

use super::{instance_fields, own_instance_fields};
use crate::ctypes::storage_type;
use crate::error::TranslateResult;
use crate::metadata::{FieldId, ModuleId, TypeId, TypeKind};
use crate::session::TranslationSession;
use crate::source_writer::SourceWriter;
use fxhash::FxHashSet;
use log::trace;

/// Emits struct declarations so that value types embedded by value are
/// declared before the structs embedding them
pub struct StructEmitter<'s, 'p> {
    session: &'s mut TranslationSession<'p>,
    module: ModuleId,
    done: FxHashSet<TypeId>,
}

impl<'s, 'p> StructEmitter<'s, 'p> {
    pub fn new(session: &'s mut TranslationSession<'p>, module: ModuleId) -> Self {
        StructEmitter {
            session,
            module,
            done: FxHashSet::default(),
        }
    }

    pub fn emit_all(&mut self, types: &[TypeId], w: &mut SourceWriter) -> TranslateResult<()> {
        for &ty in types {
            self.emit(ty, w)?;
        }
        Ok(())
    }

    /// Types this module declares structs for: its own, and closed generic
    /// instances
    fn is_local(&self, ty: TypeId) -> bool {
        let def = self.session.program.ty(ty);
        def.module == Some(self.module) || matches!(def.kind, TypeKind::GenericInstance { .. })
    }

    pub fn emit(&mut self, ty: TypeId, w: &mut SourceWriter) -> TranslateResult<()> {
        let program = self.session.program;
        if program.is_open(ty) || !self.done.insert(ty) {
            return Ok(());
        }

        let fields = instance_fields(program, ty);
        for &field in &fields {
            let field_ty = program.field(field).ty;
            if program.is_value_type(field_ty) && self.is_local(field_ty) && field_ty != ty {
                self.emit(field_ty, w)?;
            }
        }

        let name = self.session.type_name(ty);
        trace!("struct {}", name);
        w.line(format!("extern uintptr_t {}_typeObject;", name));
        if program.is_interface(ty) {
            return Ok(());
        }

        let size = program.ty(ty).size;
        w.line(format!("#ifndef struct_{}", name));
        w.line(format!("#define struct_{}", name));
        self.emit_body(&format!("struct {}", name), &fields, size, w)?;
        if program.is_value_type(ty) {
            let own = own_instance_fields(program, ty);
            self.emit_body(&format!("struct {}_unboxed", name), &own, size, w)?;
        }
        w.line("#endif");
        Ok(())
    }

    fn emit_body(&mut self, header: &str, fields: &[FieldId], size: u32, w: &mut SourceWriter) -> TranslateResult<()> {
        w.open(header);
        if fields.is_empty() {
            w.line(format!("char dummy[{}];", size.max(1)));
        }
        for &field in fields {
            let field_ty = self.session.program.field(field).ty;
            let storage = storage_type(self.session, field_ty)?;
            w.line(format!("{} {};", storage, self.session.field_name(field)));
        }
        w.close(";");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslatorConfig;
    use crate::metadata::builder::ProgramBuilder;
    use crate::metadata::{ModuleKind, PrimitiveType};

    #[test]
    fn test_embedded_value_type_declared_first() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let int32 = b.prim(PrimitiveType::Int32);
        let holder = b.class(module, "App", "Holder", Some(object));
        let point = b.value_type(module, "App", "Point");
        b.field(point, "x", int32);
        let origin = b.field(holder, "origin", point);
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        let point_name = session.type_name(point);
        let holder_name = session.type_name(holder);
        let origin_name = session.field_name(origin);

        let mut w = SourceWriter::new();
        StructEmitter::new(&mut session, module)
            .emit_all(&[holder, point], &mut w)
            .unwrap();
        let text = w.finish();
        let point_at = text.find(&format!("struct {} {{", point_name)).unwrap();
        let holder_at = text.find(&format!("struct {} {{", holder_name)).unwrap();
        assert!(point_at < holder_at);
        assert!(text.contains(&format!("struct {}_unboxed {{", point_name)));
        assert!(text.contains(&format!("struct {}_unboxed {};", point_name, origin_name)));
    }

    #[test]
    fn test_interfaces_only_get_type_object() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let iface = b.interface(module, "App", "IRun");
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        let name = session.type_name(iface);

        let mut w = SourceWriter::new();
        StructEmitter::new(&mut session, module).emit_all(&[iface], &mut w).unwrap();
        assert_eq!(w.finish(), format!("extern uintptr_t {}_typeObject;\n", name));
    }

    #[test]
    fn test_empty_class_gets_dummy_member() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let value = b.value_type(module, "App", "Empty");
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());

        let mut w = SourceWriter::new();
        StructEmitter::new(&mut session, module).emit_all(&[value], &mut w).unwrap();
        assert!(w.finish().contains("char dummy[1];"));
    }
}
