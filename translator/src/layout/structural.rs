//! Closed structural types (arrays, pointers, generic instances) a module
//! mentions, ordered so every component precedes the types built from it

use crate::metadata::{MethodId, ModuleId, Operand, Program, TypeId, TypeKind};
use indexmap::IndexSet;

/// Whether `ty` gets its own type object from a type loader
pub fn needs_type_object(program: &Program, ty: TypeId) -> bool {
    match &program.ty(ty).kind {
        TypeKind::Vector { .. }
        | TypeKind::Matrix { .. }
        | TypeKind::Pointer { .. }
        | TypeKind::ManagedPointer { .. }
        | TypeKind::GenericInstance { .. } => !program.is_open(ty),
        _ => false,
    }
}

struct Collector<'p> {
    program: &'p Program,
    found: IndexSet<TypeId>,
    visiting: IndexSet<TypeId>,
}

impl<'p> Collector<'p> {
    fn visit(&mut self, ty: TypeId) {
        if self.found.contains(&ty) || !self.visiting.insert(ty) {
            return;
        }
        let program = self.program;
        let def = program.ty(ty);
        match &def.kind {
            TypeKind::Vector { element } | TypeKind::Matrix { element, .. } => self.visit(*element),
            TypeKind::Pointer { target } | TypeKind::ManagedPointer { target } => self.visit(*target),
            TypeKind::GenericInstance { template, arguments } => {
                self.visit(*template);
                for &argument in arguments {
                    self.visit(argument);
                }
                if let Some(base) = program.base_of(ty) {
                    self.visit(base);
                }
                for &field in super::declared_fields(program, ty) {
                    self.visit(program.field(field).ty);
                }
            }
            TypeKind::FunctionPointer { signature } => {
                self.visit(signature.return_type);
                for parameter in &signature.parameters {
                    self.visit(parameter.ty);
                }
            }
            _ => {}
        }
        self.visiting.swap_remove(&ty);
        if needs_type_object(program, ty) {
            self.found.insert(ty);
        }
    }

    fn visit_method(&mut self, method: MethodId) {
        let program = self.program;
        let def = program.method(method);
        self.visit(def.return_type);
        for parameter in &def.parameters {
            self.visit(parameter.ty);
        }
        if let Some(instance) = &def.generic_instance {
            for &argument in &instance.arguments {
                self.visit(argument);
            }
        }
        let Some(body) = &def.body else { return };
        for local in &body.locals {
            self.visit(local.ty);
        }
        for instr in &body.instructions {
            if let Some(ty) = instr.ty {
                self.visit(ty);
            }
            match &instr.operand {
                Operand::Type(ty) => self.visit(*ty),
                Operand::Field(field) => {
                    let f = program.field(*field);
                    self.visit(f.declaring_type);
                    self.visit(f.ty);
                }
                Operand::Method(callee) => {
                    let c = program.method(*callee);
                    self.visit(c.declaring_type);
                    self.visit(c.return_type);
                    for parameter in &c.parameters {
                        self.visit(parameter.ty);
                    }
                }
                _ => {}
            }
        }
        for region in &body.regions {
            if let Some(ty) = region.catch_type {
                self.visit(ty);
            }
        }
    }

    fn visit_module(&mut self, module: ModuleId) {
        let program = self.program;
        for ty in program.module_types(module) {
            let def = program.ty(ty);
            if let Some(base) = def.base {
                self.visit(base);
            }
            for &iface in &def.interfaces {
                self.visit(iface);
            }
            for &field in &def.fields {
                self.visit(program.field(field).ty);
            }
            for &method in &def.methods {
                self.visit_method(method);
            }
        }
        for method in generic_method_instances(program, module) {
            self.visit_method(method);
        }
        if let Some(entry) = program.module(module).entry_point {
            self.visit_method(entry);
        }
    }
}

/// Closed structural types mentioned anywhere in `module`, components first
pub fn module_structural_types(program: &Program, module: ModuleId) -> Vec<TypeId> {
    let mut collector = Collector {
        program,
        found: IndexSet::new(),
        visiting: IndexSet::new(),
    };
    collector.visit_module(module);

    // Methods of generic instances reference further instances
    let mut index = 0;
    while index < collector.found.len() {
        let ty = collector.found[index];
        for &method in &program.ty(ty).methods {
            collector.visit_method(method);
        }
        index += 1;
    }
    collector.found.into_iter().collect()
}

/// Union of the structural types of several modules, components first
pub fn program_structural_types(program: &Program, modules: &[ModuleId]) -> Vec<TypeId> {
    let mut all: IndexSet<TypeId> = IndexSet::new();
    for &module in modules {
        all.extend(module_structural_types(program, module));
    }
    all.into_iter().collect()
}

/// Closed instantiations of generic methods whose declaring type lives in
/// `module` and which the type does not list among its own methods
pub fn generic_method_instances(program: &Program, module: ModuleId) -> Vec<MethodId> {
    (0..program.methods.len() as u32)
        .map(MethodId)
        .filter(|&m| {
            let def = program.method(m);
            def.generic_instance.is_some()
                && !program.is_open_method(m)
                && program.ty(def.declaring_type).module == Some(module)
                && !program.ty(def.declaring_type).methods.contains(&m)
        })
        .collect()
}

/// Module that emits the methods and static storage of structural types:
/// the executable when there is one, otherwise the first module
pub fn owns_structural_code(program: &Program, module: ModuleId) -> bool {
    let owner = program
        .module_ids()
        .find(|&m| program.module(m).is_executable())
        .or_else(|| program.module_ids().next());
    owner == Some(module)
}

/// Modules reachable from `root` through references, `root` last and
/// every module after the modules it references
pub fn reachable_modules(program: &Program, root: ModuleId) -> Vec<ModuleId> {
    fn walk(program: &Program, module: ModuleId, seen: &mut IndexSet<ModuleId>) {
        if seen.contains(&module) {
            return;
        }
        for &reference in &program.module(module).references {
            if reference != module {
                walk(program, reference, seen);
            }
        }
        seen.insert(module);
    }
    let mut seen = IndexSet::new();
    walk(program, root, &mut seen);
    seen.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::builder::{BodyBuilder, ProgramBuilder};
    use crate::metadata::{ModuleKind, OpCode, PrimitiveType};

    #[test]
    fn test_components_precede_arrays() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let int32 = b.prim(PrimitiveType::Int32);
        let inner = b.vector(int32);
        let jagged = b.vector(inner);
        let c = b.class(module, "App", "C", Some(object));
        b.field(c, "grid", jagged);
        let program = b.build().unwrap();

        let found = module_structural_types(&program, module);
        assert_eq!(found, vec![inner, jagged]);
    }

    #[test]
    fn test_instruction_operands_are_scanned() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let void = b.prim(PrimitiveType::Void);
        let string = b.string();
        let strings = b.vector(string);
        let c = b.class(module, "App", "C", Some(object));
        let m = b.static_method(c, "M", void);
        let mut body = BodyBuilder::new();
        let n = body.emit(0, OpCode::LdcI4, Operand::Int(3), None, &[]);
        let arr = body.emit(1, OpCode::Newarr, Operand::Type(string), Some(strings), &[n]);
        body.emit(6, OpCode::Pop, Operand::None, None, &[arr]);
        body.emit(7, OpCode::Ret, Operand::None, None, &[]);
        b.body(m, body.finish());
        let program = b.build().unwrap();

        assert_eq!(module_structural_types(&program, module), vec![strings]);
    }

    #[test]
    fn test_references_come_before_referrers() {
        let mut b = ProgramBuilder::new();
        let lib = b.module("Lib", ModuleKind::Library);
        let app = b.module("App", ModuleKind::Executable);
        b.reference(app, lib);
        let program = b.build().unwrap();
        let order = reachable_modules(&program, app);
        assert_eq!(order.last(), Some(&app));
        let lib_pos = order.iter().position(|&m| m == lib).unwrap();
        assert!(lib_pos < order.len() - 1);
        assert!(order.contains(&ModuleId(0)));
        assert!(owns_structural_code(&program, app));
        assert!(!owns_structural_code(&program, lib));
    }
}
