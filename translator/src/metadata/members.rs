//! Methods, fields, modules and the well-known runtime entities

use super::{FieldId, MethodBody, MethodId, ModuleId, ParameterDef, TypeId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodFlags {
    #[serde(rename = "static")]
    pub is_static: bool,
    #[serde(rename = "virtual")]
    pub is_virtual: bool,
    #[serde(rename = "abstract")]
    pub is_abstract: bool,
    pub new_slot: bool,
    #[serde(rename = "final")]
    pub is_final: bool,
    #[serde(rename = "extern")]
    pub is_extern: bool,
    pub public: bool,
    /// Instance constructor (`.ctor`)
    pub constructor: bool,
    /// Type initializer (`.cctor`)
    pub static_constructor: bool,
    /// Implemented by the C runtime and called by its plain name
    pub c_runtime: bool,
    /// Emitted under its plain name instead of a mangled one
    pub do_not_mangle: bool,
    pub accepts_extra_arguments: bool,
}

/// Calls the runtime support library understands without a method body
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intrinsic {
    CallFunctionPointer,
    CallFunctionPointer2,
    GetAs,
    GetAsPointer,
    OffsetToStringData,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericMethodInstance {
    pub template: MethodId,
    pub arguments: Vec<TypeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    pub declaring_type: TypeId,

    #[serde(default)]
    pub parameters: Vec<ParameterDef>,

    /// The `void` primitive for methods without a result
    pub return_type: TypeId,

    #[serde(default)]
    pub returns_by_ref: bool,

    #[serde(default)]
    pub flags: MethodFlags,

    #[serde(default)]
    pub calling_convention: u8,

    #[serde(default)]
    pub generic_parameter_count: u32,

    /// Set on closed instantiations of a generic method
    #[serde(default)]
    pub generic_instance: Option<GenericMethodInstance>,

    #[serde(default)]
    pub intrinsic: Option<Intrinsic>,

    #[serde(default)]
    pub body: Option<MethodBody>,
}

impl MethodDef {
    pub fn new(name: impl Into<String>, declaring_type: TypeId, return_type: TypeId) -> Self {
        MethodDef {
            name: name.into(),
            declaring_type,
            parameters: Vec::new(),
            return_type,
            returns_by_ref: false,
            flags: MethodFlags::default(),
            calling_convention: 0,
            generic_parameter_count: 0,
            generic_instance: None,
            intrinsic: None,
            body: None,
        }
    }

    pub fn is_static(&self) -> bool {
        self.flags.is_static
    }

    pub fn is_virtual(&self) -> bool {
        self.flags.is_virtual
    }

    /// An uninstantiated generic method
    pub fn is_generic(&self) -> bool {
        self.generic_parameter_count > 0 && self.generic_instance.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub declaring_type: TypeId,
    pub ty: TypeId,

    #[serde(default, rename = "static")]
    pub is_static: bool,

    /// Lives in the per-thread static arena
    #[serde(default)]
    pub thread_static: bool,

    /// Compile-time constant; has no storage
    #[serde(default)]
    pub constant: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, declaring_type: TypeId, ty: TypeId) -> Self {
        FieldDef {
            name: name.into(),
            declaring_type,
            ty,
            is_static: false,
            thread_static: false,
            constant: false,
        }
    }

    pub fn has_static_storage(&self) -> bool {
        self.is_static && !self.constant
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    #[default]
    Library,
    Executable,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDef {
    pub name: String,

    #[serde(default)]
    pub kind: ModuleKind,

    /// Directly referenced modules, in reference order
    #[serde(default)]
    pub references: Vec<ModuleId>,

    #[serde(default)]
    pub entry_point: Option<MethodId>,

    /// Literal strings used by the module's method bodies
    #[serde(default)]
    pub strings: Vec<String>,
}

impl ModuleDef {
    pub fn new(name: impl Into<String>, kind: ModuleKind) -> Self {
        ModuleDef {
            name: name.into(),
            kind,
            references: Vec::new(),
            entry_point: None,
            strings: Vec::new(),
        }
    }

    pub fn is_executable(&self) -> bool {
        self.kind == ModuleKind::Executable
    }
}

/// Fields of the runtime's `System.Type` record the emitted code reads
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeObjectFields {
    pub base_classes: [FieldId; 6],
    pub base_classes_beyond: FieldId,
    pub direct_interfaces: FieldId,
    pub implemented_interface_map: FieldId,
    pub interface_index: FieldId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegateFields {
    pub target: FieldId,
    pub method_ptr: FieldId,
    pub is_static: FieldId,
}

/// Exception types raised by emitted runtime checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeExceptions {
    pub arithmetic: TypeId,
    pub divide_by_zero: TypeId,
    pub invalid_cast: TypeId,
    pub null_reference: TypeId,
    pub out_of_memory: TypeId,
    pub overflow: TypeId,
    pub stack_overflow: TypeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WellKnown {
    pub object: TypeId,
    pub string: TypeId,
    pub array: TypeId,
    /// `System.Type`, the type of every type object
    pub system_type: TypeId,
    /// `System.RuntimeType`, the layout of every type object
    pub runtime_type: TypeId,
    pub exceptions: RuntimeExceptions,

    /// `System.Object::type`, the type object pointer in every header
    pub object_type_field: FieldId,
    pub type_object: TypeObjectFields,
    pub delegate: DelegateFields,

    #[serde(default)]
    pub string_empty: Option<FieldId>,
    #[serde(default)]
    pub context_bound_object: Option<TypeId>,
    #[serde(default)]
    pub marshal_by_ref_object: Option<TypeId>,
    #[serde(default)]
    pub va_list: Option<TypeId>,
}

impl WellKnown {
    pub fn type_ids(&self) -> Vec<TypeId> {
        let e = &self.exceptions;
        let mut ids = vec![
            self.object,
            self.string,
            self.array,
            self.system_type,
            self.runtime_type,
            e.arithmetic,
            e.divide_by_zero,
            e.invalid_cast,
            e.null_reference,
            e.out_of_memory,
            e.overflow,
            e.stack_overflow,
        ];
        ids.extend(self.context_bound_object);
        ids.extend(self.marshal_by_ref_object);
        ids.extend(self.va_list);
        ids
    }

    pub fn field_ids(&self) -> Vec<FieldId> {
        let t = &self.type_object;
        let mut ids = vec![
            self.object_type_field,
            t.base_classes_beyond,
            t.direct_interfaces,
            t.implemented_interface_map,
            t.interface_index,
            self.delegate.target,
            self.delegate.method_ptr,
            self.delegate.is_static,
        ];
        ids.extend(t.base_classes.iter().copied());
        ids.extend(self.string_empty);
        ids
    }
}
