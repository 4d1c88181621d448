//! Deterministic C identifiers for metadata entities
//!
//! A structural visitor folds everything that identifies an entity (its
//! module, namespace chain, containing types, generic arguments and
//! signature) into a 32-bit rolling hash. The hash prefixes a sanitized
//! human-readable name, so two entities that print the same can never
//! collide unless their whole structure hashes equal.
//!
//! Callers normally go through [`crate::session::TranslationSession`],
//! which memoizes results per entity.

use crate::metadata::{FieldId, GenericOwner, MethodId, ModuleId, Program, TypeId, TypeKind};

const SEED: u32 = 5381;

const MANAGED_POINTER_MARKER: u32 = 1;
const BY_REF_MARKER: u32 = 2;
const POINTER_MARKER: u32 = 3;
const ARRAY_RANK_BIAS: u32 = 4;

/// Fold one string, a UTF-16 unit at a time, stopping at an embedded NUL
pub fn fold_str(mut h: u32, s: &str) -> u32 {
    for unit in s.encode_utf16() {
        if unit == 0 {
            break;
        }
        h = (h << 5).wrapping_add(h) ^ u32::from(unit);
    }
    h
}

/// Fold a structural marker; the shift count is taken modulo 32
pub fn fold_marker(h: u32, x: u32) -> u32 {
    h.wrapping_shl(5u32.wrapping_add(h)) ^ x
}

/// Append `name` with every character that is not a letter, digit or `_`
/// replaced by `_`. A leading digit (or, for locals and parameters, a
/// leading `_`) is escaped with an extra `_`.
pub fn sanitize_into(out: &mut String, name: &str, escape_underscore: bool) {
    let Some(first) = name.chars().next() else {
        return;
    };
    if first.is_ascii_digit() || (escape_underscore && first == '_') {
        out.push('_');
    }
    for ch in name.chars() {
        if ch == '_' || ch.is_alphanumeric() {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
}

pub fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 1);
    sanitize_into(&mut out, name, false);
    out
}

const C_KEYWORDS: [&str; 37] = [
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
    "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
    "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef",
    "union", "unsigned", "void", "volatile", "while", "main", "exception", "statics",
];

/// Sanitize a local or parameter name; names that collide with C keywords
/// or emitted scratch variables get a trailing `_`
pub fn sanitize_local(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 2);
    sanitize_into(&mut out, name, true);
    if C_KEYWORDS.contains(&out.as_str()) {
        out.push('_');
    }
    out
}

pub struct Mangler<'p> {
    program: &'p Program,
    hash: u32,
}

impl<'p> Mangler<'p> {
    pub fn new(program: &'p Program) -> Self {
        Mangler {
            program,
            hash: SEED,
        }
    }

    pub fn hash(&self) -> u32 {
        self.hash
    }

    fn reset(&mut self) {
        self.hash = SEED;
    }

    fn string(&mut self, s: &str) {
        self.hash = fold_str(self.hash, s);
    }

    fn marker(&mut self, x: u32) {
        self.hash = fold_marker(self.hash, x);
    }

    pub fn visit_module(&mut self, module: ModuleId) {
        let name = &self.program.module(module).name;
        self.string(name);
    }

    pub fn visit_type(&mut self, ty: TypeId) {
        let def = self.program.ty(ty);
        match &def.kind {
            TypeKind::Vector { element } => {
                self.visit_type(*element);
                self.marker(1 + ARRAY_RANK_BIAS);
            }
            TypeKind::Matrix { element, rank } => {
                self.visit_type(*element);
                self.marker(rank.wrapping_add(ARRAY_RANK_BIAS));
            }
            TypeKind::Pointer { target } => {
                self.visit_type(*target);
                self.marker(POINTER_MARKER);
            }
            TypeKind::ManagedPointer { target } => {
                self.visit_type(*target);
                self.marker(MANAGED_POINTER_MARKER);
            }
            TypeKind::FunctionPointer { signature } => {
                self.visit_type(signature.return_type);
                for parameter in &signature.parameters {
                    self.visit_type(parameter.ty);
                    if parameter.by_ref {
                        self.marker(BY_REF_MARKER);
                    }
                }
                self.marker(u32::from(signature.calling_convention));
                if signature.returns_by_ref {
                    self.marker(BY_REF_MARKER);
                }
            }
            TypeKind::GenericInstance {
                template,
                arguments,
            } => {
                self.visit_type(*template);
                for argument in arguments {
                    self.visit_type(*argument);
                }
            }
            TypeKind::GenericParameter { owner, index } => {
                match owner {
                    GenericOwner::Type(owner) => self.visit_type(*owner),
                    // The owner's signature may mention this parameter
                    GenericOwner::Method(owner) => {
                        let method = self.program.method(*owner);
                        self.visit_type(method.declaring_type);
                        self.string(&method.name);
                    }
                }
                self.string(&def.name);
                self.marker(*index);
            }
            _ => {
                match def.declaring_type {
                    Some(outer) => self.visit_type(outer),
                    None => {
                        if let Some(module) = def.module {
                            self.visit_module(module);
                        }
                        for segment in def.namespace.split('.').filter(|s| !s.is_empty()) {
                            self.string(segment);
                        }
                    }
                }
                self.string(&def.name);
                if def.generic_parameter_count > 0 {
                    self.marker(def.generic_parameter_count);
                }
            }
        }
    }

    pub fn visit_method(&mut self, method: MethodId) {
        let def = self.program.method(method);
        if let Some(instance) = &def.generic_instance {
            self.visit_method(instance.template);
            for argument in &instance.arguments {
                self.visit_type(*argument);
            }
            return;
        }
        self.visit_type(def.declaring_type);
        self.string(&def.name);
        self.visit_type(def.return_type);
        for parameter in &def.parameters {
            self.visit_type(parameter.ty);
            if parameter.by_ref {
                self.marker(BY_REF_MARKER);
            }
        }
        self.marker(u32::from(def.calling_convention));
        if def.returns_by_ref {
            self.marker(BY_REF_MARKER);
        }
    }

    pub fn visit_field(&mut self, field: FieldId) {
        let def = self.program.field(field);
        self.visit_type(def.declaring_type);
        self.visit_type(def.ty);
        self.string(&def.name);
    }

    fn prefix(&self) -> String {
        format!("_{}_", self.hash)
    }

    pub fn mangle_type(&mut self, ty: TypeId) -> String {
        self.reset();
        self.visit_type(ty);
        let mut out = self.prefix();
        sanitize_into(&mut out, &self.program.display_name(ty), false);
        out
    }

    pub fn mangle_method(&mut self, method: MethodId) -> String {
        self.reset();
        self.visit_method(method);
        let def = self.program.method(method);
        let mut out = self.prefix();
        sanitize_into(&mut out, &self.program.display_name(def.declaring_type), false);
        out.push('_');
        sanitize_into(&mut out, &def.name, false);
        for parameter in &def.parameters {
            out.push('_');
            sanitize_into(&mut out, &self.program.short_name(parameter.ty), false);
        }
        out
    }

    pub fn mangle_field(&mut self, field: FieldId) -> String {
        self.reset();
        self.visit_field(field);
        let mut out = self.prefix();
        sanitize_into(&mut out, &self.program.field(field).name, false);
        out
    }

    pub fn mangle_module(&mut self, module: ModuleId) -> String {
        self.reset();
        self.visit_module(module);
        let mut out = self.prefix();
        sanitize_into(&mut out, &self.program.module(module).name, false);
        out
    }

    pub fn mangle_string(&mut self, value: &str) -> String {
        self.reset();
        self.string(value);
        format!("mangled_string_{}", self.hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::builder::ProgramBuilder;
    use crate::metadata::{ModuleKind, PrimitiveType};

    #[test]
    fn test_string_fold_matches_djb_xor() {
        // h = 5381; h = h*33 ^ 'a'
        assert_eq!(fold_str(SEED, "a"), (5381u32 * 33) ^ 97);
        assert_eq!(fold_str(SEED, ""), SEED);
        assert_eq!(fold_str(SEED, "a\0b"), fold_str(SEED, "a"));
    }

    #[test]
    fn test_marker_shift_is_masked() {
        // 5 + 27 = 32 wraps to a shift of 0
        assert_eq!(fold_marker(27, 1), 27 ^ 1);
        assert_eq!(fold_marker(0, 3), 3);
        assert_eq!(fold_marker(1, 0), 1 << 6);
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("List`1"), "List_1");
        assert_eq!(sanitize("9lives"), "_9lives");
        assert_eq!(sanitize("_x"), "_x");
        assert_eq!(sanitize_local("_x"), "__x");
        assert_eq!(sanitize_local("int"), "int_");
        assert_eq!(sanitize("Größe"), "Größe");
        assert_eq!(sanitize(""), "");
    }

    #[test]
    fn test_same_short_name_different_namespace() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let a = b.class(module, "App.A", "Outer", Some(object));
        let c = b.class(module, "App.B", "Outer", Some(object));
        let helper_a = b.nested_class(a, "Helper", Some(object));
        let helper_c = b.nested_class(c, "Helper", Some(object));
        let program = b.build().unwrap();

        let mut mangler = Mangler::new(&program);
        let name_a = mangler.mangle_type(helper_a);
        let name_c = mangler.mangle_type(helper_c);
        assert_ne!(name_a, name_c);
        assert!(name_a.ends_with("_App_A_Outer_Helper"), "{}", name_a);
        assert!(name_a.starts_with('_'));
    }

    #[test]
    fn test_overloads_differ() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let c = b.class(module, "App", "C", Some(object));
        let void = b.prim(PrimitiveType::Void);
        let int32 = b.prim(PrimitiveType::Int32);
        let int64 = b.prim(PrimitiveType::Int64);
        let m1 = b.method(c, "M", void);
        b.param(m1, "x", int32);
        let m2 = b.method(c, "M", void);
        b.param(m2, "x", int64);
        let program = b.build().unwrap();

        let mut mangler = Mangler::new(&program);
        let n1 = mangler.mangle_method(m1);
        let n2 = mangler.mangle_method(m2);
        assert_ne!(n1, n2);
        assert!(n1.ends_with("_App_C_M_Int32"), "{}", n1);
        assert!(n2.ends_with("_App_C_M_Int64"), "{}", n2);
    }

    #[test]
    fn test_mangling_is_stable() {
        let mut b = ProgramBuilder::new();
        let int32 = b.prim(PrimitiveType::Int32);
        let vector = b.vector(int32);
        let matrix = b.matrix(int32, 2);
        let program = b.build().unwrap();

        let first = Mangler::new(&program).mangle_type(vector);
        let second = Mangler::new(&program).mangle_type(vector);
        assert_eq!(first, second);
        assert_ne!(first, Mangler::new(&program).mangle_type(matrix));
        assert!(first.ends_with("_System_Int32__"), "{}", first);
    }

    #[test]
    fn test_string_literal_names() {
        let program = ProgramBuilder::new().build().unwrap();
        let mut mangler = Mangler::new(&program);
        assert_eq!(mangler.mangle_string(""), "mangled_string_5381");
        assert_ne!(mangler.mangle_string("a"), mangler.mangle_string("b"));
    }
}
