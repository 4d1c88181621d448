//! Programmatic construction of [`Program`] documents
//!
//! The builder starts from a minimal core library (`mscorlib`) holding the
//! primitive types and the runtime entities the emitted code depends on, so
//! callers only describe their own modules. Used by tests and benchmarks.

use super::*;
use crate::error::TranslateResult;
use fxhash::FxHashMap;

pub const CORE_MODULE: &str = "mscorlib";

const PRIMITIVES: [(PrimitiveType, &str); 16] = [
    (PrimitiveType::Void, "Void"),
    (PrimitiveType::Boolean, "Boolean"),
    (PrimitiveType::Char, "Char"),
    (PrimitiveType::Int8, "SByte"),
    (PrimitiveType::UInt8, "Byte"),
    (PrimitiveType::Int16, "Int16"),
    (PrimitiveType::UInt16, "UInt16"),
    (PrimitiveType::Int32, "Int32"),
    (PrimitiveType::UInt32, "UInt32"),
    (PrimitiveType::Int64, "Int64"),
    (PrimitiveType::UInt64, "UInt64"),
    (PrimitiveType::Float32, "Single"),
    (PrimitiveType::Float64, "Double"),
    (PrimitiveType::IntPtr, "IntPtr"),
    (PrimitiveType::UIntPtr, "UIntPtr"),
    (PrimitiveType::String, "String"),
];

pub struct ProgramBuilder {
    modules: Vec<ModuleDef>,
    types: Vec<TypeDef>,
    methods: Vec<MethodDef>,
    fields: Vec<FieldDef>,
    core: ModuleId,
    primitives: FxHashMap<PrimitiveType, TypeId>,
    well_known: WellKnown,
    value_type: TypeId,
    exception: TypeId,
    delegate: TypeId,
    next_token: u32,
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramBuilder {
    pub fn new() -> Self {
        let mut modules = vec![ModuleDef::new(CORE_MODULE, ModuleKind::Library)];
        modules[0].strings.push(String::new());
        let mut b = ProgramBuilder {
            modules,
            types: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            core: ModuleId(0),
            primitives: FxHashMap::default(),
            well_known: placeholder_well_known(),
            value_type: TypeId(0),
            exception: TypeId(0),
            delegate: TypeId(0),
            next_token: 0x0200_0001,
        };
        b.bootstrap_core();
        b
    }

    fn bootstrap_core(&mut self) {
        let core = self.core;
        let object = self.push_nominal(core, "System", "Object", TypeKind::Class, None);
        let value_type = self.push_nominal(core, "System", "ValueType", TypeKind::Class, Some(object));
        self.ty_mut(value_type).flags.is_abstract = true;
        self.value_type = value_type;

        for (primitive, name) in PRIMITIVES {
            let (kind, base) = if primitive == PrimitiveType::String {
                (TypeKind::Class, object)
            } else {
                (TypeKind::ValueType, value_type)
            };
            let id = self.push_nominal(core, "System", name, kind, Some(base));
            let def = self.ty_mut(id);
            def.primitive = Some(primitive);
            def.flags.sealed = true;
            self.primitives.insert(primitive, id);
        }

        let uintptr = self.prim(PrimitiveType::UIntPtr);
        let intptr = self.prim(PrimitiveType::IntPtr);
        let uint32 = self.prim(PrimitiveType::UInt32);
        let int32 = self.prim(PrimitiveType::Int32);
        let char_ = self.prim(PrimitiveType::Char);
        let string = self.prim(PrimitiveType::String);

        let object_type_field = self.field(object, "type", uintptr);
        self.field(string, "m_stringLength", int32);
        self.field(string, "m_firstChar", char_);
        let string_empty = self.static_field(string, "Empty", string);

        let array = self.push_nominal(core, "System", "Array", TypeKind::Class, Some(object));
        self.ty_mut(array).flags.is_abstract = true;
        self.field(array, "length", uintptr);
        self.field(array, "elementType", uintptr);

        let system_type = self.push_nominal(core, "System", "Type", TypeKind::Class, Some(object));
        self.ty_mut(system_type).flags.is_abstract = true;
        let base_classes = [
            self.field(system_type, "baseClass0", uintptr),
            self.field(system_type, "baseClass1", uintptr),
            self.field(system_type, "baseClass2", uintptr),
            self.field(system_type, "baseClass3", uintptr),
            self.field(system_type, "baseClass4", uintptr),
            self.field(system_type, "baseClass5", uintptr),
        ];
        let base_classes_beyond = self.field(system_type, "baseClasses6andBeyond", uintptr);
        let direct_interfaces = self.field(system_type, "directlyImplementedInterfaces", uintptr);
        let implemented_interface_map = self.field(system_type, "implementedInterfaceMap", uintptr);
        let interface_index = self.field(system_type, "interfaceIndex", uint32);
        let runtime_type =
            self.push_nominal(core, "System", "RuntimeType", TypeKind::Class, Some(system_type));

        let exception = self.push_nominal(core, "System", "Exception", TypeKind::Class, Some(object));
        self.exception = exception;
        let system_exception =
            self.push_nominal(core, "System", "SystemException", TypeKind::Class, Some(exception));
        let arithmetic = self.push_nominal(
            core,
            "System",
            "ArithmeticException",
            TypeKind::Class,
            Some(system_exception),
        );
        let exception_type = |b: &mut Self, name: &str, base: TypeId| {
            b.push_nominal(core, "System", name, TypeKind::Class, Some(base))
        };
        let divide_by_zero = exception_type(self, "DivideByZeroException", arithmetic);
        let overflow = exception_type(self, "OverflowException", arithmetic);
        let invalid_cast = exception_type(self, "InvalidCastException", system_exception);
        let null_reference = exception_type(self, "NullReferenceException", system_exception);
        let out_of_memory = exception_type(self, "OutOfMemoryException", system_exception);
        let stack_overflow = exception_type(self, "StackOverflowException", system_exception);

        let delegate = self.push_nominal(core, "System", "Delegate", TypeKind::Class, Some(object));
        self.ty_mut(delegate).flags.is_abstract = true;
        self.delegate = delegate;
        let target = self.field(delegate, "_target", object);
        let method_ptr = self.field(delegate, "_methodPtr", intptr);
        let is_static = self.field(delegate, "_isStatic", uint32);

        let marshal_by_ref =
            self.push_nominal(core, "System", "MarshalByRefObject", TypeKind::Class, Some(object));
        let context_bound = self.push_nominal(
            core,
            "System",
            "ContextBoundObject",
            TypeKind::Class,
            Some(marshal_by_ref),
        );
        let va_list = self.push_nominal(core, "System.CRuntime", "va_list", TypeKind::ValueType, Some(value_type));

        self.well_known = WellKnown {
            object,
            string,
            array,
            system_type,
            runtime_type,
            exceptions: RuntimeExceptions {
                arithmetic,
                divide_by_zero,
                invalid_cast,
                null_reference,
                out_of_memory,
                overflow,
                stack_overflow,
            },
            object_type_field,
            type_object: TypeObjectFields {
                base_classes,
                base_classes_beyond,
                direct_interfaces,
                implemented_interface_map,
                interface_index,
            },
            delegate: DelegateFields {
                target,
                method_ptr,
                is_static,
            },
            string_empty: Some(string_empty),
            context_bound_object: Some(context_bound),
            marshal_by_ref_object: Some(marshal_by_ref),
            va_list: Some(va_list),
        };
    }

    fn push_type(&mut self, def: TypeDef) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(def);
        id
    }

    fn push_nominal(
        &mut self,
        module: ModuleId,
        namespace: &str,
        name: &str,
        kind: TypeKind,
        base: Option<TypeId>,
    ) -> TypeId {
        let mut def = TypeDef::new(name, kind);
        def.namespace = namespace.to_string();
        def.module = Some(module);
        def.base = base;
        def.token = self.next_token;
        self.next_token += 1;
        self.push_type(def)
    }

    pub fn core_module(&self) -> ModuleId {
        self.core
    }

    pub fn well_known(&self) -> &WellKnown {
        &self.well_known
    }

    pub fn module(&mut self, name: &str, kind: ModuleKind) -> ModuleId {
        let id = ModuleId(self.modules.len() as u32);
        let mut module = ModuleDef::new(name, kind);
        module.references.push(self.core);
        self.modules.push(module);
        id
    }

    pub fn reference(&mut self, from: ModuleId, to: ModuleId) {
        let refs = &mut self.modules[from.index()].references;
        if !refs.contains(&to) {
            refs.push(to);
        }
    }

    pub fn entry_point(&mut self, module: ModuleId, method: MethodId) {
        self.modules[module.index()].entry_point = Some(method);
    }

    pub fn string_literal(&mut self, module: ModuleId, value: &str) {
        let strings = &mut self.modules[module.index()].strings;
        if !strings.iter().any(|s| s == value) {
            strings.push(value.to_string());
        }
    }

    pub fn prim(&self, primitive: PrimitiveType) -> TypeId {
        self.primitives[&primitive]
    }

    pub fn object(&self) -> TypeId {
        self.well_known.object
    }

    pub fn string(&self) -> TypeId {
        self.well_known.string
    }

    pub fn exception(&self) -> TypeId {
        self.exception
    }

    pub fn ty_mut(&mut self, id: TypeId) -> &mut TypeDef {
        &mut self.types[id.index()]
    }

    pub fn method_mut(&mut self, id: MethodId) -> &mut MethodDef {
        &mut self.methods[id.index()]
    }

    pub fn class(&mut self, module: ModuleId, namespace: &str, name: &str, base: Option<TypeId>) -> TypeId {
        self.push_nominal(module, namespace, name, TypeKind::Class, base)
    }

    pub fn sealed_class(&mut self, module: ModuleId, namespace: &str, name: &str, base: Option<TypeId>) -> TypeId {
        let id = self.class(module, namespace, name, base);
        self.ty_mut(id).flags.sealed = true;
        id
    }

    pub fn value_type(&mut self, module: ModuleId, namespace: &str, name: &str) -> TypeId {
        let value_type = self.value_type;
        let id = self.push_nominal(module, namespace, name, TypeKind::ValueType, Some(value_type));
        self.ty_mut(id).flags.sealed = true;
        id
    }

    pub fn interface(&mut self, module: ModuleId, namespace: &str, name: &str) -> TypeId {
        let id = self.push_nominal(module, namespace, name, TypeKind::Interface, None);
        self.ty_mut(id).flags.is_abstract = true;
        id
    }

    pub fn enum_type(&mut self, module: ModuleId, namespace: &str, name: &str, underlying: TypeId) -> TypeId {
        let value_type = self.value_type;
        let id = self.push_nominal(module, namespace, name, TypeKind::Enum { underlying }, Some(value_type));
        self.ty_mut(id).flags.sealed = true;
        id
    }

    /// A delegate type with its constructor and `Invoke` declared
    pub fn delegate(
        &mut self,
        module: ModuleId,
        namespace: &str,
        name: &str,
        parameters: &[(&str, TypeId)],
        return_type: TypeId,
    ) -> TypeId {
        let base = self.delegate;
        let id = self.push_nominal(module, namespace, name, TypeKind::Delegate, Some(base));
        self.ty_mut(id).flags.sealed = true;
        let void = self.prim(PrimitiveType::Void);
        let object = self.object();
        let intptr = self.prim(PrimitiveType::IntPtr);
        let ctor = self.method(id, ".ctor", void);
        self.method_mut(ctor).flags.constructor = true;
        self.param(ctor, "object", object);
        self.param(ctor, "method", intptr);
        let invoke = self.virtual_method(id, "Invoke", return_type);
        for (pname, pty) in parameters {
            self.param(invoke, pname, *pty);
        }
        id
    }

    pub fn nested_class(&mut self, outer: TypeId, name: &str, base: Option<TypeId>) -> TypeId {
        let module = self.types[outer.index()].module.unwrap_or(self.core);
        let id = self.push_nominal(module, "", name, TypeKind::Class, base);
        let def = self.ty_mut(id);
        def.declaring_type = Some(outer);
        def.visibility = Visibility::NestedPublic;
        id
    }

    pub fn implement(&mut self, ty: TypeId, iface: TypeId) {
        let interfaces = &mut self.ty_mut(ty).interfaces;
        if !interfaces.contains(&iface) {
            interfaces.push(iface);
        }
    }

    fn structural(&mut self, kind: TypeKind) -> TypeId {
        if let Some(index) = self.types.iter().position(|t| t.module.is_none() && t.kind == kind) {
            return TypeId(index as u32);
        }
        let name = String::new();
        self.push_type(TypeDef::new(name, kind))
    }

    pub fn vector(&mut self, element: TypeId) -> TypeId {
        self.structural(TypeKind::Vector { element })
    }

    pub fn matrix(&mut self, element: TypeId, rank: u32) -> TypeId {
        self.structural(TypeKind::Matrix { element, rank })
    }

    pub fn pointer(&mut self, target: TypeId) -> TypeId {
        self.structural(TypeKind::Pointer { target })
    }

    pub fn managed_pointer(&mut self, target: TypeId) -> TypeId {
        self.structural(TypeKind::ManagedPointer { target })
    }

    pub fn function_pointer(&mut self, signature: FnSignature) -> TypeId {
        self.structural(TypeKind::FunctionPointer { signature })
    }

    pub fn generic_instance(&mut self, template: TypeId, arguments: Vec<TypeId>) -> TypeId {
        self.structural(TypeKind::GenericInstance {
            template,
            arguments,
        })
    }

    pub fn generic_parameter(&mut self, owner: GenericOwner, index: u32, name: &str) -> TypeId {
        self.push_type(TypeDef::new(name, TypeKind::GenericParameter { owner, index }))
    }

    pub fn field(&mut self, declaring_type: TypeId, name: &str, ty: TypeId) -> FieldId {
        let id = FieldId(self.fields.len() as u32);
        self.fields.push(FieldDef::new(name, declaring_type, ty));
        self.types[declaring_type.index()].fields.push(id);
        id
    }

    pub fn static_field(&mut self, declaring_type: TypeId, name: &str, ty: TypeId) -> FieldId {
        let id = self.field(declaring_type, name, ty);
        self.fields[id.index()].is_static = true;
        id
    }

    pub fn field_mut(&mut self, id: FieldId) -> &mut FieldDef {
        &mut self.fields[id.index()]
    }

    /// A public instance method
    pub fn method(&mut self, declaring_type: TypeId, name: &str, return_type: TypeId) -> MethodId {
        let id = MethodId(self.methods.len() as u32);
        let mut def = MethodDef::new(name, declaring_type, return_type);
        def.flags.public = true;
        self.methods.push(def);
        self.types[declaring_type.index()].methods.push(id);
        id
    }

    pub fn static_method(&mut self, declaring_type: TypeId, name: &str, return_type: TypeId) -> MethodId {
        let id = self.method(declaring_type, name, return_type);
        self.method_mut(id).flags.is_static = true;
        id
    }

    pub fn virtual_method(&mut self, declaring_type: TypeId, name: &str, return_type: TypeId) -> MethodId {
        let id = self.method(declaring_type, name, return_type);
        self.method_mut(id).flags.is_virtual = true;
        id
    }

    pub fn static_constructor(&mut self, declaring_type: TypeId) -> MethodId {
        let void = self.prim(PrimitiveType::Void);
        let id = self.static_method(declaring_type, ".cctor", void);
        let flags = &mut self.method_mut(id).flags;
        flags.static_constructor = true;
        flags.public = false;
        id
    }

    pub fn param(&mut self, method: MethodId, name: &str, ty: TypeId) {
        self.methods[method.index()].parameters.push(ParameterDef {
            name: name.to_string(),
            ty,
            by_ref: false,
        });
    }

    pub fn override_explicitly(&mut self, ty: TypeId, implemented: MethodId, implementing: MethodId) {
        self.ty_mut(ty).explicit_overrides.push(ExplicitOverride {
            implemented,
            implementing,
        });
    }

    pub fn body(&mut self, method: MethodId, body: MethodBody) {
        self.methods[method.index()].body = Some(body);
    }

    pub fn build(self) -> TranslateResult<Program> {
        Program::new(self.modules, self.types, self.methods, self.fields, self.well_known)
    }
}

fn placeholder_well_known() -> WellKnown {
    let t = TypeId(0);
    let f = FieldId(0);
    WellKnown {
        object: t,
        string: t,
        array: t,
        system_type: t,
        runtime_type: t,
        exceptions: RuntimeExceptions {
            arithmetic: t,
            divide_by_zero: t,
            invalid_cast: t,
            null_reference: t,
            out_of_memory: t,
            overflow: t,
            stack_overflow: t,
        },
        object_type_field: f,
        type_object: TypeObjectFields {
            base_classes: [f; 6],
            base_classes_beyond: f,
            direct_interfaces: f,
            implemented_interface_map: f,
            interface_index: f,
        },
        delegate: DelegateFields {
            target: f,
            method_ptr: f,
            is_static: f,
        },
        string_empty: None,
        context_bound_object: None,
        marshal_by_ref_object: None,
        va_list: None,
    }
}

/// Incremental construction of a [`MethodBody`]
///
/// Instructions are appended to the most recently opened block. Entry-stack
/// values are pseudo instructions that belong to no block's instruction list.
#[derive(Default)]
pub struct BodyBuilder {
    body: MethodBody,
}

impl BodyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local(&mut self, name: &str, ty: TypeId) -> u32 {
        self.body.locals.push(LocalDef {
            name: name.to_string(),
            ty,
            by_ref: false,
            pinned: false,
        });
        (self.body.locals.len() - 1) as u32
    }

    pub fn block(&mut self, offset: u32) -> &mut Self {
        self.block_with_stack(offset, Vec::new())
    }

    pub fn block_with_stack(&mut self, offset: u32, entry_stack: Vec<InstrId>) -> &mut Self {
        self.body.blocks.push(BasicBlock {
            offset,
            instructions: Vec::new(),
            entry_stack,
            successors: Vec::new(),
        });
        self
    }

    /// A value live on entry to a block
    pub fn entry_value(&mut self, offset: u32, ty: TypeId) -> InstrId {
        let mut instr = Instruction::new(OpCode::EntryValue, offset);
        instr.ty = Some(ty);
        self.alloc(instr)
    }

    fn alloc(&mut self, instruction: Instruction) -> InstrId {
        let id = InstrId(self.body.instructions.len() as u32);
        self.body.instructions.push(instruction);
        id
    }

    /// Append an instruction to the current block
    pub fn emit(
        &mut self,
        offset: u32,
        opcode: OpCode,
        operand: Operand,
        ty: Option<TypeId>,
        operands: &[InstrId],
    ) -> InstrId {
        let mut instr = Instruction::new(opcode, offset);
        instr.operand = operand;
        instr.ty = ty;
        if let Some((first, rest)) = operands.split_first() {
            instr.operand1 = Some(*first);
            instr.operand2.extend(rest.iter().copied());
        }
        let id = self.alloc(instr);
        if self.body.blocks.is_empty() {
            self.block(0);
        }
        if let Some(block) = self.body.blocks.last_mut() {
            block.instructions.push(id);
        }
        id
    }

    pub fn region(&mut self, region: ExceptionRegion) -> &mut Self {
        self.body.regions.push(region);
        self
    }

    pub fn finish(self) -> MethodBody {
        self.body
    }
}
