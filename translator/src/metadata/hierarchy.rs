//! Type hierarchy queries over a [`Program`]

use super::{GenericOwner, MethodId, PrimitiveType, Program, TypeId, TypeKind};
use crate::error::{TranslateError, TranslateResult};
use indexmap::IndexSet;

impl Program {
    pub fn primitive_of(&self, ty: TypeId) -> Option<PrimitiveType> {
        self.ty(ty).primitive
    }

    pub fn is_void(&self, ty: TypeId) -> bool {
        self.primitive_of(ty) == Some(PrimitiveType::Void)
    }

    pub fn is_value_type(&self, ty: TypeId) -> bool {
        let def = self.ty(ty);
        if let Some(primitive) = def.primitive {
            return primitive.is_value_type();
        }
        match &def.kind {
            TypeKind::ValueType | TypeKind::Enum { .. } => true,
            TypeKind::GenericInstance { template, .. } => self.is_value_type(*template),
            _ => false,
        }
    }

    pub fn is_interface(&self, ty: TypeId) -> bool {
        match &self.ty(ty).kind {
            TypeKind::Interface => true,
            TypeKind::GenericInstance { template, .. } => self.is_interface(*template),
            _ => false,
        }
    }

    pub fn is_delegate(&self, ty: TypeId) -> bool {
        match &self.ty(ty).kind {
            TypeKind::Delegate => true,
            TypeKind::GenericInstance { template, .. } => self.is_delegate(*template),
            _ => false,
        }
    }

    pub fn enum_underlying(&self, ty: TypeId) -> Option<TypeId> {
        match &self.ty(ty).kind {
            TypeKind::Enum { underlying } => Some(*underlying),
            _ => None,
        }
    }

    pub fn is_managed_pointer(&self, ty: TypeId) -> bool {
        matches!(self.ty(ty).kind, TypeKind::ManagedPointer { .. })
    }

    pub fn is_generic_parameter(&self, ty: TypeId) -> bool {
        matches!(self.ty(ty).kind, TypeKind::GenericParameter { .. })
    }

    /// Target of a pointer or managed pointer
    pub fn pointee(&self, ty: TypeId) -> Option<TypeId> {
        match &self.ty(ty).kind {
            TypeKind::Pointer { target } | TypeKind::ManagedPointer { target } => Some(*target),
            _ => None,
        }
    }

    /// Element type and rank of an array type
    pub fn array_element(&self, ty: TypeId) -> Option<(TypeId, u32)> {
        match &self.ty(ty).kind {
            TypeKind::Vector { element } => Some((*element, 1)),
            TypeKind::Matrix { element, rank } => Some((*element, *rank)),
            _ => None,
        }
    }

    pub fn is_sealed(&self, ty: TypeId) -> bool {
        let def = self.ty(ty);
        match &def.kind {
            TypeKind::GenericInstance { template, .. } => self.is_sealed(*template),
            _ => def.flags.sealed || self.is_value_type(ty),
        }
    }

    pub fn is_va_list(&self, ty: TypeId) -> bool {
        self.well_known.va_list == Some(ty)
    }

    pub fn base_of(&self, ty: TypeId) -> Option<TypeId> {
        let def = self.ty(ty);
        match (&def.kind, def.base) {
            (_, Some(base)) => Some(base),
            (TypeKind::GenericInstance { template, .. }, None) => self.base_of(*template),
            (kind, None) if kind.is_array() => Some(self.well_known.array),
            _ => None,
        }
    }

    /// Base classes, nearest first
    pub fn base_chain(&self, ty: TypeId) -> Vec<TypeId> {
        let mut chain = Vec::new();
        let mut current = self.base_of(ty);
        while let Some(base) = current {
            if chain.contains(&base) || chain.len() > self.types.len() {
                break;
            }
            chain.push(base);
            current = self.base_of(base);
        }
        chain
    }

    /// Every interface `ty` implements, directly or through bases and
    /// interface inheritance, in discovery order
    pub fn interface_closure(&self, ty: TypeId) -> IndexSet<TypeId> {
        let mut closure = IndexSet::new();
        let mut pending: Vec<TypeId> = Vec::new();
        for t in std::iter::once(ty).chain(self.base_chain(ty)) {
            pending.extend(self.ty(t).interfaces.iter().rev());
            while let Some(iface) = pending.pop() {
                if closure.insert(iface) {
                    pending.extend(self.ty(iface).interfaces.iter().rev());
                }
            }
        }
        closure
    }

    /// Structural identity; nominal types are identical only by id
    pub fn types_equivalent(&self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        match (&self.ty(a).kind, &self.ty(b).kind) {
            (TypeKind::Vector { element: x }, TypeKind::Vector { element: y })
            | (TypeKind::Pointer { target: x }, TypeKind::Pointer { target: y })
            | (TypeKind::ManagedPointer { target: x }, TypeKind::ManagedPointer { target: y }) => {
                self.types_equivalent(*x, *y)
            }
            (
                TypeKind::Matrix {
                    element: x,
                    rank: rx,
                },
                TypeKind::Matrix {
                    element: y,
                    rank: ry,
                },
            ) => rx == ry && self.types_equivalent(*x, *y),
            (
                TypeKind::GenericInstance {
                    template: tx,
                    arguments: ax,
                },
                TypeKind::GenericInstance {
                    template: ty,
                    arguments: ay,
                },
            ) => {
                tx == ty
                    && ax.len() == ay.len()
                    && ax.iter().zip(ay).all(|(x, y)| self.types_equivalent(*x, *y))
            }
            (
                TypeKind::GenericParameter {
                    owner: ox,
                    index: ix,
                },
                TypeKind::GenericParameter {
                    owner: oy,
                    index: iy,
                },
            ) => ox == oy && ix == iy,
            _ => false,
        }
    }

    pub fn derives_from_or_same(&self, derived: TypeId, base: TypeId) -> bool {
        self.types_equivalent(derived, base)
            || self
                .base_chain(derived)
                .into_iter()
                .any(|b| self.types_equivalent(b, base))
    }

    pub fn implements(&self, ty: TypeId, iface: TypeId) -> bool {
        self.interface_closure(ty)
            .into_iter()
            .any(|i| self.types_equivalent(i, iface))
    }

    pub fn has_own_or_inherited_type_params(&self, ty: TypeId) -> bool {
        let def = self.ty(ty);
        def.generic_parameter_count > 0
            || def
                .declaring_type
                .is_some_and(|outer| self.has_own_or_inherited_type_params(outer))
    }

    /// Mentions a generic parameter anywhere in its structure
    pub fn is_open(&self, ty: TypeId) -> bool {
        match &self.ty(ty).kind {
            TypeKind::GenericParameter { .. } => true,
            TypeKind::Vector { element } | TypeKind::Matrix { element, .. } => self.is_open(*element),
            TypeKind::Pointer { target } | TypeKind::ManagedPointer { target } => {
                self.is_open(*target)
            }
            TypeKind::GenericInstance { arguments, .. } => {
                arguments.iter().any(|a| self.is_open(*a))
            }
            TypeKind::FunctionPointer { signature } => {
                self.is_open(signature.return_type)
                    || signature.parameters.iter().any(|p| self.is_open(p.ty))
            }
            _ => self.has_own_or_inherited_type_params(ty),
        }
    }

    pub fn is_open_method(&self, method: MethodId) -> bool {
        let def = self.method(method);
        if def.is_generic() || self.is_open(def.declaring_type) {
            return true;
        }
        def.generic_instance
            .as_ref()
            .is_some_and(|inst| inst.arguments.iter().any(|a| self.is_open(*a)))
    }

    /// Full name as written in signatures: `Ns.Outer.Inner`, `List<Int32>`,
    /// `Int32[]`, `Byte*`
    pub fn display_name(&self, ty: TypeId) -> String {
        self.format_name(ty, true)
    }

    /// Name without namespace or containing type
    pub fn short_name(&self, ty: TypeId) -> String {
        self.format_name(ty, false)
    }

    fn format_name(&self, ty: TypeId, qualified: bool) -> String {
        let def = self.ty(ty);
        match &def.kind {
            TypeKind::Vector { element } => format!("{}[]", self.format_name(*element, qualified)),
            TypeKind::Matrix { element, rank } => format!(
                "{}[{}]",
                self.format_name(*element, qualified),
                ",".repeat(rank.saturating_sub(1) as usize)
            ),
            TypeKind::Pointer { target } => format!("{}*", self.format_name(*target, qualified)),
            TypeKind::ManagedPointer { target } => {
                format!("{}&", self.format_name(*target, qualified))
            }
            TypeKind::FunctionPointer { signature } => {
                let params: Vec<String> = signature
                    .parameters
                    .iter()
                    .map(|p| self.format_name(p.ty, qualified))
                    .collect();
                format!(
                    "function {} ({})",
                    self.format_name(signature.return_type, qualified),
                    params.join(", ")
                )
            }
            TypeKind::GenericParameter { .. } => def.name.clone(),
            TypeKind::GenericInstance {
                template,
                arguments,
            } => {
                let args: Vec<String> = arguments
                    .iter()
                    .map(|a| self.format_name(*a, qualified))
                    .collect();
                format!("{}<{}>", self.format_name(*template, qualified), args.join(","))
            }
            _ => {
                if !qualified {
                    def.name.clone()
                } else if let Some(outer) = def.declaring_type {
                    format!("{}.{}", self.format_name(outer, true), def.name)
                } else if def.namespace.is_empty() {
                    def.name.clone()
                } else {
                    format!("{}.{}", def.namespace, def.name)
                }
            }
        }
    }

    /// Normalized operand-stack type: small integers widen to int32,
    /// unsigned forms fold onto their signed width, float32 widens to
    /// float64, enums use their underlying type, and every non-value type
    /// collapses to native unsigned int
    pub fn stack_type(&self, ty: TypeId) -> TranslateResult<TypeId> {
        if let Some(underlying) = self.enum_underlying(ty) {
            return self.stack_type(underlying);
        }
        let normalized = match self.primitive_of(ty) {
            Some(
                PrimitiveType::Boolean
                | PrimitiveType::Char
                | PrimitiveType::Int8
                | PrimitiveType::UInt8
                | PrimitiveType::Int16
                | PrimitiveType::UInt16
                | PrimitiveType::Int32
                | PrimitiveType::UInt32,
            ) => self.primitive(PrimitiveType::Int32)?,
            Some(PrimitiveType::Int64 | PrimitiveType::UInt64) => {
                self.primitive(PrimitiveType::Int64)?
            }
            Some(PrimitiveType::IntPtr | PrimitiveType::UIntPtr) => {
                self.primitive(PrimitiveType::IntPtr)?
            }
            Some(PrimitiveType::Float32 | PrimitiveType::Float64) => {
                self.primitive(PrimitiveType::Float64)?
            }
            _ => ty,
        };
        if self.is_value_type(normalized) {
            Ok(normalized)
        } else {
            self.primitive(PrimitiveType::UIntPtr)
        }
    }

    pub fn signatures_match(&self, a: MethodId, b: MethodId) -> bool {
        let (ma, mb) = (self.method(a), self.method(b));
        ma.name == mb.name
            && ma.parameters.len() == mb.parameters.len()
            && ma.generic_parameter_count == mb.generic_parameter_count
            && self.types_equivalent(ma.return_type, mb.return_type)
            && ma
                .parameters
                .iter()
                .zip(&mb.parameters)
                .all(|(pa, pb)| pa.by_ref == pb.by_ref && self.types_equivalent(pa.ty, pb.ty))
    }

    /// The nearest virtual method up the base chain that `method` overrides
    /// by name and signature
    pub fn implicitly_overridden_base_method(&self, method: MethodId) -> Option<MethodId> {
        let declaring = self.method(method).declaring_type;
        for base in self.base_chain(declaring) {
            for &candidate in &self.ty(base).methods {
                if self.method(candidate).is_virtual() && self.signatures_match(candidate, method) {
                    return Some(candidate);
                }
            }
        }
        None
    }

    /// Whether `ty` itself declares a method matching `target`
    pub fn declares_matching_method(&self, ty: TypeId, target: MethodId) -> bool {
        self.ty(ty)
            .methods
            .iter()
            .any(|&m| m == target || self.signatures_match(m, target))
    }

    /// The method that runs when `target` is invoked on an object whose
    /// exact type is `ty`
    pub fn find_implementation(&self, ty: TypeId, target: MethodId) -> Option<MethodId> {
        for t in std::iter::once(ty).chain(self.base_chain(ty)) {
            let def = self.ty(t);
            if let Some(over) = def
                .explicit_overrides
                .iter()
                .find(|o| o.implemented == target)
            {
                return Some(over.implementing);
            }
            for &candidate in &def.methods {
                let m = self.method(candidate);
                if candidate == target && !m.flags.is_abstract {
                    return Some(candidate);
                }
                if m.is_virtual() && !m.flags.is_abstract && self.signatures_match(candidate, target)
                {
                    return Some(candidate);
                }
            }
        }
        None
    }

    /// Implementation of an interface method on a class: explicit overrides
    /// first, then the most-derived public virtual method with the same name
    /// and signature
    pub fn interface_implementation(&self, ty: TypeId, iface_method: MethodId) -> Option<MethodId> {
        for t in std::iter::once(ty).chain(self.base_chain(ty)) {
            let def = self.ty(t);
            if let Some(over) = def
                .explicit_overrides
                .iter()
                .find(|o| o.implemented == iface_method)
            {
                return Some(over.implementing);
            }
            for &candidate in &def.methods {
                let m = self.method(candidate);
                if m.is_virtual() && m.flags.public && self.signatures_match(candidate, iface_method)
                {
                    return Some(candidate);
                }
            }
        }
        None
    }

    /// Owner chain of a generic parameter, used for diagnostics
    pub fn generic_owner(&self, ty: TypeId) -> Option<GenericOwner> {
        match &self.ty(ty).kind {
            TypeKind::GenericParameter { owner, .. } => Some(*owner),
            _ => None,
        }
    }

    /// The type that owns a method's `this`
    pub fn method_display_name(&self, method: MethodId) -> String {
        let def = self.method(method);
        format!("{}::{}", self.display_name(def.declaring_type), def.name)
    }

    pub fn require_body(&self, method: MethodId) -> TranslateResult<&super::MethodBody> {
        self.method(method)
            .body
            .as_ref()
            .ok_or_else(|| TranslateError::MissingBody {
                method: self.method_display_name(method),
            })
    }
}

#[cfg(test)]
mod tests {
    use crate::metadata::builder::ProgramBuilder;
    use crate::metadata::PrimitiveType;

    #[test]
    fn test_stack_type_normalization() {
        let b = ProgramBuilder::new();
        let program = b.build().unwrap();
        let int8 = program.primitive(PrimitiveType::Int8).unwrap();
        let int32 = program.primitive(PrimitiveType::Int32).unwrap();
        let uint64 = program.primitive(PrimitiveType::UInt64).unwrap();
        let int64 = program.primitive(PrimitiveType::Int64).unwrap();
        let float32 = program.primitive(PrimitiveType::Float32).unwrap();
        let float64 = program.primitive(PrimitiveType::Float64).unwrap();
        let string = program.well_known.string;
        let uintptr = program.primitive(PrimitiveType::UIntPtr).unwrap();

        assert_eq!(program.stack_type(int8).unwrap(), int32);
        assert_eq!(program.stack_type(uint64).unwrap(), int64);
        assert_eq!(program.stack_type(float32).unwrap(), float64);
        assert_eq!(program.stack_type(string).unwrap(), uintptr);
    }

    #[test]
    fn test_enum_stack_type_is_underlying() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", crate::metadata::ModuleKind::Library);
        let uint8 = b.prim(PrimitiveType::UInt8);
        let color = b.enum_type(module, "App", "Color", uint8);
        let program = b.build().unwrap();
        let int32 = program.primitive(PrimitiveType::Int32).unwrap();
        assert_eq!(program.stack_type(color).unwrap(), int32);
    }

    #[test]
    fn test_interface_closure_includes_inherited() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", crate::metadata::ModuleKind::Library);
        let i_base = b.interface(module, "App", "IBase");
        let i_derived = b.interface(module, "App", "IDerived");
        b.implement(i_derived, i_base);
        let object = b.object();
        let a = b.class(module, "App", "A", Some(object));
        b.implement(a, i_derived);
        let c = b.class(module, "App", "C", Some(a));
        let program = b.build().unwrap();

        let closure = program.interface_closure(c);
        assert!(closure.contains(&i_base));
        assert!(closure.contains(&i_derived));
        assert!(program.implements(c, i_base));
        assert!(program.derives_from_or_same(c, object));
    }

    #[test]
    fn test_display_names() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", crate::metadata::ModuleKind::Library);
        let object = b.object();
        let outer = b.class(module, "App.Util", "Outer", Some(object));
        let inner = b.nested_class(outer, "Helper", Some(object));
        let int32 = b.prim(PrimitiveType::Int32);
        let vector = b.vector(int32);
        let program = b.build().unwrap();
        assert_eq!(program.display_name(inner), "App.Util.Outer.Helper");
        assert_eq!(program.short_name(inner), "Helper");
        assert_eq!(program.display_name(vector), "System.Int32[]");
        assert_eq!(program.short_name(vector), "Int32[]");
    }
}
