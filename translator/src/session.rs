//! Translation Session
//!
//! One session owns every cache that must stay consistent across the
//! modules translated together: mangled names, virtual method tables,
//! ancestor depths and static-constructor lookups. Nothing here is global;
//! the session is created by the caller and threaded through every
//! component.

use crate::config::TranslatorConfig;
use crate::layout::vtable::VirtualTable;
use crate::mangler::{sanitize_local, Mangler};
use crate::metadata::{FieldId, MethodId, ModuleId, Program, TypeId};
use fxhash::FxHashMap;
use std::rc::Rc;

pub struct TranslationSession<'p> {
    pub program: &'p Program,
    pub config: TranslatorConfig,

    type_names: FxHashMap<TypeId, String>,
    method_names: FxHashMap<MethodId, String>,
    field_names: FxHashMap<FieldId, String>,
    module_names: FxHashMap<ModuleId, String>,
    string_names: FxHashMap<String, String>,

    pub(crate) vmts: FxHashMap<TypeId, Rc<VirtualTable>>,
    type_depths: FxHashMap<TypeId, u32>,
    static_ctors: FxHashMap<TypeId, Option<MethodId>>,

    label_counter: u32,
}

impl<'p> TranslationSession<'p> {
    pub fn new(program: &'p Program, config: TranslatorConfig) -> Self {
        TranslationSession {
            program,
            config,
            type_names: FxHashMap::default(),
            method_names: FxHashMap::default(),
            field_names: FxHashMap::default(),
            module_names: FxHashMap::default(),
            string_names: FxHashMap::default(),
            vmts: FxHashMap::default(),
            type_depths: FxHashMap::default(),
            static_ctors: FxHashMap::default(),
            label_counter: 0,
        }
    }

    pub fn type_name(&mut self, ty: TypeId) -> String {
        let program = self.program;
        self.type_names
            .entry(ty)
            .or_insert_with(|| Mangler::new(program).mangle_type(ty))
            .clone()
    }

    /// C name of a method; runtime-provided and unmangled methods keep
    /// their declared name
    pub fn method_name(&mut self, method: MethodId) -> String {
        let program = self.program;
        self.method_names
            .entry(method)
            .or_insert_with(|| {
                let def = program.method(method);
                if def.flags.do_not_mangle || def.flags.c_runtime {
                    def.name.clone()
                } else {
                    Mangler::new(program).mangle_method(method)
                }
            })
            .clone()
    }

    pub fn field_name(&mut self, field: FieldId) -> String {
        let program = self.program;
        self.field_names
            .entry(field)
            .or_insert_with(|| Mangler::new(program).mangle_field(field))
            .clone()
    }

    pub fn module_name(&mut self, module: ModuleId) -> String {
        let program = self.program;
        self.module_names
            .entry(module)
            .or_insert_with(|| Mangler::new(program).mangle_module(module))
            .clone()
    }

    pub fn string_name(&mut self, value: &str) -> String {
        if let Some(name) = self.string_names.get(value) {
            return name.clone();
        }
        let name = Mangler::new(self.program).mangle_string(value);
        self.string_names.insert(value.to_string(), name.clone());
        name
    }

    /// `<type>_typeObject`
    pub fn type_object(&mut self, ty: TypeId) -> String {
        format!("{}_typeObject", self.type_name(ty))
    }

    pub fn local_name(&self, name: &str) -> String {
        sanitize_local(name)
    }

    /// Unique suffix for continuation labels
    pub fn next_label(&mut self) -> u32 {
        let label = self.label_counter;
        self.label_counter += 1;
        label
    }

    /// Number of base classes above `ty`
    pub fn type_depth(&mut self, ty: TypeId) -> u32 {
        if let Some(depth) = self.type_depths.get(&ty) {
            return *depth;
        }
        let depth = match self.program.base_of(ty) {
            Some(base) if base != ty => self.type_depth(base) + 1,
            _ => 0,
        };
        self.type_depths.insert(ty, depth);
        depth
    }

    /// The type initializer declared directly on `ty`, if any
    pub fn static_constructor(&mut self, ty: TypeId) -> Option<MethodId> {
        let program = self.program;
        *self.static_ctors.entry(ty).or_insert_with(|| {
            program
                .ty(ty)
                .methods
                .iter()
                .copied()
                .find(|&m| program.method(m).flags.static_constructor)
        })
    }

    pub fn has_static_constructor(&mut self, ty: TypeId) -> bool {
        self.static_constructor(ty).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::builder::ProgramBuilder;
    use crate::metadata::ModuleKind;

    #[test]
    fn test_names_are_memoized() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let c = b.class(module, "App", "C", Some(object));
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        let first = session.type_name(c);
        assert_eq!(first, session.type_name(c));
        assert_eq!(session.type_object(c), format!("{}_typeObject", first));
    }

    #[test]
    fn test_type_depth_counts_bases() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let a = b.class(module, "App", "A", Some(object));
        let c = b.class(module, "App", "C", Some(a));
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        assert_eq!(session.type_depth(object), 0);
        assert_eq!(session.type_depth(c), 2);
    }

    #[test]
    fn test_static_constructor_lookup() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let c = b.class(module, "App", "C", Some(object));
        let d = b.class(module, "App", "D", Some(object));
        let cctor = b.static_constructor(c);
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        assert_eq!(session.static_constructor(c), Some(cctor));
        assert!(!session.has_static_constructor(d));
    }

    #[test]
    fn test_label_counter_is_per_session() {
        let program = ProgramBuilder::new().build().unwrap();
        let mut first = TranslationSession::new(&program, TranslatorConfig::default());
        assert_eq!(first.next_label(), 0);
        assert_eq!(first.next_label(), 1);
        let mut second = TranslationSession::new(&program, TranslatorConfig::default());
        assert_eq!(second.next_label(), 0);
    }
}
