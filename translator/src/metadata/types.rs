//! Type definitions

use super::{MethodId, ModuleId, TypeId};
use serde::{Deserialize, Serialize};

/// Built-in types with a direct C representation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveType {
    Void,
    Boolean,
    Char,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    IntPtr,
    UIntPtr,
    String,
}

impl PrimitiveType {
    /// C spelling; `None` for types that are not scalars in C
    pub fn c_name(self) -> Option<&'static str> {
        Some(match self {
            PrimitiveType::Void => "void",
            PrimitiveType::Boolean => "uint8_t",
            PrimitiveType::Char => "wchar_t",
            PrimitiveType::Int8 => "int8_t",
            PrimitiveType::UInt8 => "uint8_t",
            PrimitiveType::Int16 => "int16_t",
            PrimitiveType::UInt16 => "uint16_t",
            PrimitiveType::Int32 => "int32_t",
            PrimitiveType::UInt32 => "uint32_t",
            PrimitiveType::Int64 => "int64_t",
            PrimitiveType::UInt64 => "uint64_t",
            PrimitiveType::Float32 => "float",
            PrimitiveType::Float64 => "double",
            PrimitiveType::IntPtr => "intptr_t",
            PrimitiveType::UIntPtr => "uintptr_t",
            PrimitiveType::String => return None,
        })
    }

    pub fn il_name(self) -> &'static str {
        match self {
            PrimitiveType::Void => "void",
            PrimitiveType::Boolean => "bool",
            PrimitiveType::Char => "char",
            PrimitiveType::Int8 => "int8",
            PrimitiveType::UInt8 => "uint8",
            PrimitiveType::Int16 => "int16",
            PrimitiveType::UInt16 => "uint16",
            PrimitiveType::Int32 => "int32",
            PrimitiveType::UInt32 => "uint32",
            PrimitiveType::Int64 => "int64",
            PrimitiveType::UInt64 => "uint64",
            PrimitiveType::Float32 => "float32",
            PrimitiveType::Float64 => "float64",
            PrimitiveType::IntPtr => "native int",
            PrimitiveType::UIntPtr => "native uint",
            PrimitiveType::String => "string",
        }
    }

    pub fn is_value_type(self) -> bool {
        !matches!(self, PrimitiveType::String | PrimitiveType::Void)
    }

    pub fn is_float(self) -> bool {
        matches!(self, PrimitiveType::Float32 | PrimitiveType::Float64)
    }

    pub fn is_unsigned(self) -> bool {
        matches!(
            self,
            PrimitiveType::Boolean
                | PrimitiveType::Char
                | PrimitiveType::UInt8
                | PrimitiveType::UInt16
                | PrimitiveType::UInt32
                | PrimitiveType::UInt64
                | PrimitiveType::UIntPtr
        )
    }

    /// Integers wide enough to be the source of a checked conversion helper
    pub fn is_wide_integer(self) -> bool {
        matches!(
            self,
            PrimitiveType::Int16
                | PrimitiveType::UInt16
                | PrimitiveType::Int32
                | PrimitiveType::UInt32
                | PrimitiveType::Int64
                | PrimitiveType::UInt64
                | PrimitiveType::IntPtr
                | PrimitiveType::UIntPtr
        )
    }

    /// `System.TypeCode` value
    pub fn type_code(self) -> u32 {
        match self {
            PrimitiveType::Boolean => 3,
            PrimitiveType::Char => 4,
            PrimitiveType::Int8 => 5,
            PrimitiveType::UInt8 => 6,
            PrimitiveType::Int16 => 7,
            PrimitiveType::UInt16 => 8,
            PrimitiveType::Int32 => 9,
            PrimitiveType::UInt32 => 10,
            PrimitiveType::Int64 => 11,
            PrimitiveType::UInt64 => 12,
            PrimitiveType::Float32 => 13,
            PrimitiveType::Float64 => 14,
            PrimitiveType::String => 18,
            PrimitiveType::Void | PrimitiveType::IntPtr | PrimitiveType::UIntPtr => 1,
        }
    }
}

/// Which entity declares a generic parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenericOwner {
    Type(TypeId),
    Method(MethodId),
}

/// A parameter of a method or function pointer signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDef {
    #[serde(default)]
    pub name: String,
    pub ty: TypeId,
    #[serde(default)]
    pub by_ref: bool,
}

/// Signature of a function pointer type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FnSignature {
    #[serde(default)]
    pub parameters: Vec<ParameterDef>,
    pub return_type: TypeId,
    #[serde(default)]
    pub returns_by_ref: bool,
    #[serde(default)]
    pub calling_convention: u8,
    #[serde(default)]
    pub has_this: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Class,
    ValueType,
    Enum {
        underlying: TypeId,
    },
    Interface,
    Delegate,
    /// Single-dimensional, zero-based array
    Vector {
        element: TypeId,
    },
    /// Multi-dimensional array
    Matrix {
        element: TypeId,
        rank: u32,
    },
    Pointer {
        target: TypeId,
    },
    ManagedPointer {
        target: TypeId,
    },
    FunctionPointer {
        signature: FnSignature,
    },
    GenericParameter {
        owner: GenericOwner,
        index: u32,
    },
    GenericInstance {
        template: TypeId,
        arguments: Vec<TypeId>,
    },
}

impl TypeKind {
    /// Declared by name in some module, as opposed to built by structure
    pub fn is_nominal(&self) -> bool {
        matches!(
            self,
            TypeKind::Class
                | TypeKind::ValueType
                | TypeKind::Enum { .. }
                | TypeKind::Interface
                | TypeKind::Delegate
        )
    }

    pub fn is_array(&self) -> bool {
        matches!(self, TypeKind::Vector { .. } | TypeKind::Matrix { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    #[default]
    Public,
    NotPublic,
    NestedPublic,
    NestedPrivate,
    NestedFamily,
    NestedAssembly,
    NestedFamAndAssem,
    NestedFamOrAssem,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    #[default]
    Auto,
    Sequential,
    Explicit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringFormat {
    #[default]
    Ansi,
    Unicode,
    Auto,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TypeFlags {
    pub sealed: bool,
    #[serde(rename = "abstract")]
    pub is_abstract: bool,
    pub before_field_init: bool,
    pub special_name: bool,
    pub rt_special_name: bool,
    pub com_object: bool,
    pub serializable: bool,
    pub has_security: bool,
}

/// `implementing` replaces `implemented` in the type's dispatch tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExplicitOverride {
    pub implemented: MethodId,
    pub implementing: MethodId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: String,

    /// Dotted namespace, empty for the global namespace and nested types
    #[serde(default)]
    pub namespace: String,

    /// Defining module; structural types have none
    #[serde(default)]
    pub module: Option<ModuleId>,

    pub kind: TypeKind,

    #[serde(default)]
    pub primitive: Option<PrimitiveType>,

    #[serde(default)]
    pub base: Option<TypeId>,

    /// Directly implemented interfaces
    #[serde(default)]
    pub interfaces: Vec<TypeId>,

    #[serde(default)]
    pub declaring_type: Option<TypeId>,

    #[serde(default)]
    pub fields: Vec<super::FieldId>,

    #[serde(default)]
    pub methods: Vec<MethodId>,

    #[serde(default)]
    pub explicit_overrides: Vec<ExplicitOverride>,

    #[serde(default)]
    pub flags: TypeFlags,

    #[serde(default)]
    pub visibility: Visibility,

    #[serde(default)]
    pub layout: LayoutKind,

    #[serde(default)]
    pub string_format: StringFormat,

    /// Metadata token, 0 for structural types
    #[serde(default)]
    pub token: u32,

    /// Explicit size in bytes, 0 when unspecified
    #[serde(default)]
    pub size: u32,

    #[serde(default)]
    pub generic_parameter_count: u32,
}

impl TypeDef {
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        TypeDef {
            name: name.into(),
            namespace: String::new(),
            module: None,
            kind,
            primitive: None,
            base: None,
            interfaces: Vec::new(),
            declaring_type: None,
            fields: Vec::new(),
            methods: Vec::new(),
            explicit_overrides: Vec::new(),
            flags: TypeFlags::default(),
            visibility: Visibility::default(),
            layout: LayoutKind::default(),
            string_format: StringFormat::default(),
            token: 0,
            size: 0,
            generic_parameter_count: 0,
        }
    }

    /// Every type id this definition mentions
    pub fn referenced_types(&self) -> Vec<TypeId> {
        let mut ids: Vec<TypeId> = Vec::new();
        ids.extend(self.base);
        ids.extend(self.declaring_type);
        ids.extend(self.interfaces.iter().copied());
        match &self.kind {
            TypeKind::Enum { underlying } => ids.push(*underlying),
            TypeKind::Vector { element } | TypeKind::Matrix { element, .. } => ids.push(*element),
            TypeKind::Pointer { target } | TypeKind::ManagedPointer { target } => ids.push(*target),
            TypeKind::FunctionPointer { signature } => {
                ids.push(signature.return_type);
                ids.extend(signature.parameters.iter().map(|p| p.ty));
            }
            TypeKind::GenericParameter {
                owner: GenericOwner::Type(owner),
                ..
            } => ids.push(*owner),
            TypeKind::GenericInstance {
                template,
                arguments,
            } => {
                ids.push(*template);
                ids.extend(arguments.iter().copied());
            }
            _ => {}
        }
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_json_shape() {
        let kind: TypeKind = serde_json::from_str(r#""class""#).unwrap();
        assert_eq!(kind, TypeKind::Class);
        let kind: TypeKind = serde_json::from_str(r#"{"vector": {"element": 3}}"#).unwrap();
        assert_eq!(kind, TypeKind::Vector { element: TypeId(3) });
    }

    #[test]
    fn test_primitive_names() {
        let p: PrimitiveType = serde_json::from_str(r#""uintptr""#).unwrap();
        assert_eq!(p, PrimitiveType::UIntPtr);
        assert_eq!(p.c_name(), Some("uintptr_t"));
        assert_eq!(PrimitiveType::Char.c_name(), Some("wchar_t"));
        assert_eq!(PrimitiveType::String.c_name(), None);
    }

    #[test]
    fn test_type_codes_follow_system_type_code() {
        assert_eq!(PrimitiveType::Int32.type_code(), 9);
        assert_eq!(PrimitiveType::String.type_code(), 18);
        assert_eq!(PrimitiveType::Float64.type_code(), 14);
    }
}
