//! Type layout: C structs, static storage, virtual tables and the runtime
//! type objects built by each module's type loader

pub mod statics;
pub mod structs;
pub mod structural;
pub mod type_loader;
pub mod vtable;

use crate::metadata::{FieldId, LayoutKind, PrimitiveType, Program, StringFormat, TypeId, TypeKind, Visibility};

/// Bits of the runtime's type-flags word
pub mod type_flags {
    pub const ATTRIBUTES_ARE_VALID: u32 = 0x1;
    pub const ELEMENT_TYPE_IS_VALID: u32 = 0x2;
    pub const FLAGS_ARE_VALID: u32 = 0x4;
    pub const IS_ARRAY: u32 = 0x8;
    pub const IS_BY_REF: u32 = 0x10;
    pub const IS_COM_OBJECT: u32 = 0x20;
    pub const IS_CONTEXTFUL: u32 = 0x40;
    pub const IS_DELEGATE: u32 = 0x80;
    pub const IS_ENUM: u32 = 0x100;
    pub const IS_GENERIC_PARAMETER: u32 = 0x200;
    pub const IS_GENERIC_TEMPLATE: u32 = 0x400;
    pub const IS_MARSHAL_BY_REF: u32 = 0x800;
    pub const IS_POINTER: u32 = 0x1000;
    pub const IS_PRIMITIVE: u32 = 0x2000;
    pub const IS_VALUE_TYPE: u32 = 0x4000;
    pub const IS_VECTOR: u32 = 0x8000;
    pub const TYPE_CODE_IS_VALID: u32 = 0x10000;
}

/// ECMA-335 `TypeAttributes`
pub mod type_attributes {
    pub const SEQUENTIAL_LAYOUT: u32 = 0x8;
    pub const EXPLICIT_LAYOUT: u32 = 0x10;
    pub const INTERFACE: u32 = 0x20;
    pub const ABSTRACT: u32 = 0x80;
    pub const SEALED: u32 = 0x100;
    pub const SPECIAL_NAME: u32 = 0x400;
    pub const RT_SPECIAL_NAME: u32 = 0x800;
    pub const IMPORT: u32 = 0x1000;
    pub const SERIALIZABLE: u32 = 0x2000;
    pub const UNICODE_CLASS: u32 = 0x10000;
    pub const AUTO_CLASS: u32 = 0x20000;
    pub const HAS_SECURITY: u32 = 0x40000;
    pub const BEFORE_FIELD_INIT: u32 = 0x100000;
}

/// `System.TypeCode` reported for `System.Object` itself
pub const OBJECT_TYPE_CODE: u32 = 99;

pub fn runtime_type_flags(program: &Program, ty: TypeId) -> u32 {
    use type_flags::*;

    let def = program.ty(ty);
    let mut flags = ATTRIBUTES_ARE_VALID | FLAGS_ARE_VALID | TYPE_CODE_IS_VALID;
    match &def.kind {
        TypeKind::Vector { .. } => flags |= IS_ARRAY | IS_VECTOR | ELEMENT_TYPE_IS_VALID,
        TypeKind::Matrix { .. } => flags |= IS_ARRAY | ELEMENT_TYPE_IS_VALID,
        TypeKind::ManagedPointer { .. } => flags |= IS_BY_REF | ELEMENT_TYPE_IS_VALID,
        TypeKind::Pointer { .. } => flags |= IS_POINTER | ELEMENT_TYPE_IS_VALID,
        TypeKind::Delegate => flags |= IS_DELEGATE,
        TypeKind::Enum { .. } => flags |= IS_ENUM,
        TypeKind::GenericParameter { .. } => flags |= IS_GENERIC_PARAMETER,
        _ => {}
    }
    if def.kind.is_nominal() && def.generic_parameter_count > 0 {
        flags |= IS_GENERIC_TEMPLATE;
    }
    if def.flags.com_object {
        flags |= IS_COM_OBJECT;
    }
    if let Some(contextful) = program.well_known.context_bound_object {
        if program.derives_from_or_same(ty, contextful) {
            flags |= IS_CONTEXTFUL;
        }
    }
    if let Some(marshal) = program.well_known.marshal_by_ref_object {
        if program.derives_from_or_same(ty, marshal) {
            flags |= IS_MARSHAL_BY_REF;
        }
    }
    if def.primitive.is_some_and(|p| p != PrimitiveType::String && p != PrimitiveType::Void) {
        flags |= IS_PRIMITIVE;
    }
    if program.is_value_type(ty) {
        flags |= IS_VALUE_TYPE;
    }
    flags
}

pub fn type_attributes(program: &Program, ty: TypeId) -> u32 {
    use type_attributes::*;

    let def = program.ty(ty);
    let mut attrs = match def.visibility {
        Visibility::NotPublic => 0,
        Visibility::Public => 1,
        Visibility::NestedPublic => 2,
        Visibility::NestedPrivate => 3,
        Visibility::NestedFamily => 4,
        Visibility::NestedAssembly => 5,
        Visibility::NestedFamAndAssem => 6,
        Visibility::NestedFamOrAssem => 7,
    };
    attrs |= match def.layout {
        LayoutKind::Auto => 0,
        LayoutKind::Sequential => SEQUENTIAL_LAYOUT,
        LayoutKind::Explicit => EXPLICIT_LAYOUT,
    };
    attrs |= match def.string_format {
        StringFormat::Ansi => 0,
        StringFormat::Unicode => UNICODE_CLASS,
        StringFormat::Auto => AUTO_CLASS,
    };
    let f = &def.flags;
    for (set, bit) in [
        (program.is_interface(ty), INTERFACE),
        (f.is_abstract, ABSTRACT),
        (f.sealed, SEALED),
        (f.special_name, SPECIAL_NAME),
        (f.rt_special_name, RT_SPECIAL_NAME),
        (f.com_object, IMPORT),
        (f.serializable, SERIALIZABLE),
        (f.has_security, HAS_SECURITY),
        (f.before_field_init, BEFORE_FIELD_INIT),
    ] {
        if set {
            attrs |= bit;
        }
    }
    attrs
}

pub fn type_code(program: &Program, ty: TypeId) -> u32 {
    if ty == program.well_known.object {
        return OBJECT_TYPE_CODE;
    }
    if let Some(underlying) = program.enum_underlying(ty) {
        return type_code(program, underlying);
    }
    program.primitive_of(ty).map_or(1, PrimitiveType::type_code)
}

/// Fields declared on `ty`; a generic instance without its own field list
/// shares its template's
pub fn declared_fields(program: &Program, ty: TypeId) -> &[FieldId] {
    let def = program.ty(ty);
    match &def.kind {
        TypeKind::GenericInstance { template, .. } if def.fields.is_empty() => {
            declared_fields(program, *template)
        }
        _ => &def.fields,
    }
}

/// Instance fields declared directly on `ty`
pub fn own_instance_fields(program: &Program, ty: TypeId) -> Vec<FieldId> {
    declared_fields(program, ty)
        .iter()
        .copied()
        .filter(|&f| !program.field(f).is_static)
        .collect()
}

/// Instance fields of `ty` with inherited fields first
pub fn instance_fields(program: &Program, ty: TypeId) -> Vec<FieldId> {
    let mut chain = program.base_chain(ty);
    chain.reverse();
    chain.push(ty);
    chain
        .into_iter()
        .flat_map(|t| own_instance_fields(program, t))
        .collect()
}

/// Static fields of `ty` that occupy arena storage
pub fn static_fields(program: &Program, ty: TypeId) -> Vec<FieldId> {
    declared_fields(program, ty)
        .iter()
        .copied()
        .filter(|&f| program.field(f).has_static_storage())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::builder::ProgramBuilder;
    use crate::metadata::ModuleKind;

    #[test]
    fn test_value_type_and_enum_flags() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let int32 = b.prim(PrimitiveType::Int32);
        let color = b.enum_type(module, "App", "Color", int32);
        let vector = b.vector(int32);
        let program = b.build().unwrap();

        let flags = runtime_type_flags(&program, color);
        assert_ne!(flags & type_flags::IS_ENUM, 0);
        assert_ne!(flags & type_flags::IS_VALUE_TYPE, 0);
        let flags = runtime_type_flags(&program, vector);
        assert_ne!(flags & type_flags::IS_VECTOR, 0);
        assert_ne!(flags & type_flags::IS_ARRAY, 0);
        assert_eq!(type_code(&program, color), 9);
        assert_eq!(type_code(&program, program.well_known.object), OBJECT_TYPE_CODE);
    }

    #[test]
    fn test_attributes_combine_visibility_and_flags() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let sealed = b.sealed_class(module, "App", "S", Some(object));
        b.ty_mut(sealed).flags.before_field_init = true;
        let iface = b.interface(module, "App", "I");
        let program = b.build().unwrap();

        assert_eq!(
            type_attributes(&program, sealed),
            1 | type_attributes::SEALED | type_attributes::BEFORE_FIELD_INIT
        );
        assert_eq!(
            type_attributes(&program, iface),
            1 | type_attributes::INTERFACE | type_attributes::ABSTRACT
        );
    }

    #[test]
    fn test_inherited_fields_come_first() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let int32 = b.prim(PrimitiveType::Int32);
        let a = b.class(module, "App", "A", Some(object));
        let x = b.field(a, "x", int32);
        let c = b.class(module, "App", "C", Some(a));
        let y = b.field(c, "y", int32);
        b.static_field(c, "count", int32);
        let program = b.build().unwrap();

        let fields = instance_fields(&program, c);
        assert_eq!(fields[0], program.well_known.object_type_field);
        assert_eq!(&fields[1..], &[x, y]);
        assert_eq!(static_fields(&program, c).len(), 1);
    }
}
