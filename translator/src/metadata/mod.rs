//! Program metadata
//!
//! The translator consumes a resolved program description produced by an
//! external metadata reader: arenas of types, methods and fields addressed
//! by dense ids, the modules that own them, and per-method control flow
//! graphs whose instructions already carry operand links and static types.

pub mod body;
pub mod builder;
pub mod hierarchy;
pub mod members;
pub mod types;

pub use body::*;
pub use members::*;
pub use types::*;

use crate::error::{TranslateError, TranslateResult};
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

macro_rules! define_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            pub fn new(id: u32) -> Self {
                Self(id)
            }

            pub fn as_u32(&self) -> u32 {
                self.0
            }

            pub fn index(&self) -> usize {
                self.0 as usize
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}{}", $prefix, self.0)
            }
        }
    };
}

define_id!(
    /// Index into [`Program::types`]
    TypeId, "t"
);
define_id!(
    /// Index into [`Program::methods`]
    MethodId, "m"
);
define_id!(
    /// Index into [`Program::fields`]
    FieldId, "f"
);
define_id!(
    /// Index into [`Program::modules`]
    ModuleId, "mod"
);
define_id!(
    /// Index into [`MethodBody::instructions`]
    InstrId, "i"
);

/// A complete, resolved program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub modules: Vec<ModuleDef>,
    pub types: Vec<TypeDef>,
    pub methods: Vec<MethodDef>,
    pub fields: Vec<FieldDef>,
    pub well_known: WellKnown,

    #[serde(skip)]
    primitives: FxHashMap<PrimitiveType, TypeId>,
}

impl Program {
    pub fn new(
        modules: Vec<ModuleDef>,
        types: Vec<TypeDef>,
        methods: Vec<MethodDef>,
        fields: Vec<FieldDef>,
        well_known: WellKnown,
    ) -> TranslateResult<Self> {
        let mut program = Program {
            modules,
            types,
            methods,
            fields,
            well_known,
            primitives: FxHashMap::default(),
        };
        program.finish();
        program.validate()?;
        Ok(program)
    }

    pub fn from_json(text: &str) -> TranslateResult<Self> {
        let mut program: Program = serde_json::from_str(text)?;
        program.finish();
        program.validate()?;
        Ok(program)
    }

    pub fn load(path: &Path) -> TranslateResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| TranslateError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn to_json(&self) -> TranslateResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rebuild derived indexes after deserialization
    fn finish(&mut self) {
        self.primitives.clear();
        for (index, ty) in self.types.iter().enumerate() {
            if let Some(primitive) = ty.primitive {
                self.primitives
                    .entry(primitive)
                    .or_insert(TypeId(index as u32));
            }
        }
    }

    pub fn ty(&self, id: TypeId) -> &TypeDef {
        &self.types[id.index()]
    }

    pub fn method(&self, id: MethodId) -> &MethodDef {
        &self.methods[id.index()]
    }

    pub fn field(&self, id: FieldId) -> &FieldDef {
        &self.fields[id.index()]
    }

    pub fn module(&self, id: ModuleId) -> &ModuleDef {
        &self.modules[id.index()]
    }

    pub fn type_ids(&self) -> impl Iterator<Item = TypeId> + '_ {
        (0..self.types.len() as u32).map(TypeId)
    }

    pub fn module_ids(&self) -> impl Iterator<Item = ModuleId> + '_ {
        (0..self.modules.len() as u32).map(ModuleId)
    }

    pub fn module_by_name(&self, name: &str) -> TranslateResult<ModuleId> {
        self.modules
            .iter()
            .position(|m| m.name == name)
            .map(|index| ModuleId(index as u32))
            .ok_or_else(|| TranslateError::UnknownModule {
                name: name.to_string(),
            })
    }

    pub fn primitive(&self, primitive: PrimitiveType) -> TranslateResult<TypeId> {
        self.primitives
            .get(&primitive)
            .copied()
            .ok_or_else(|| TranslateError::MalformedType {
                ty: primitive.il_name().to_string(),
                message: "the program does not define this primitive type".to_string(),
            })
    }

    /// Nominal types owned by a module, in definition order
    pub fn module_types(&self, module: ModuleId) -> Vec<TypeId> {
        self.type_ids()
            .filter(|&id| {
                let ty = self.ty(id);
                ty.module == Some(module) && ty.kind.is_nominal()
            })
            .collect()
    }

    /// Check that every id in the document refers to an existing entry
    pub fn validate(&self) -> TranslateResult<()> {
        let types = self.types.len();
        let methods = self.methods.len();
        let fields = self.fields.len();
        let modules = self.modules.len();

        let check = |kind: &'static str, id: u32, len: usize, context: &dyn Fn() -> String| {
            if (id as usize) < len {
                Ok(())
            } else {
                Err(TranslateError::DanglingId {
                    kind,
                    id,
                    context: context(),
                })
            }
        };

        for (index, module) in self.modules.iter().enumerate() {
            let context = || format!("module `{}`", module.name);
            for reference in &module.references {
                check("module", reference.0, modules, &context)?;
            }
            if let Some(entry) = module.entry_point {
                check("method", entry.0, methods, &context)?;
            }
            if module.references.iter().any(|r| r.index() == index) {
                return Err(TranslateError::MalformedType {
                    ty: module.name.clone(),
                    message: "a module cannot reference itself".to_string(),
                });
            }
        }

        for (index, ty) in self.types.iter().enumerate() {
            let context = || format!("type {} `{}`", TypeId(index as u32), ty.name);
            if let Some(module) = ty.module {
                check("module", module.0, modules, &context)?;
            }
            for id in ty.referenced_types() {
                check("type", id.0, types, &context)?;
            }
            for field in &ty.fields {
                check("field", field.0, fields, &context)?;
            }
            for method in &ty.methods {
                check("method", method.0, methods, &context)?;
            }
            for over in &ty.explicit_overrides {
                check("method", over.implemented.0, methods, &context)?;
                check("method", over.implementing.0, methods, &context)?;
            }
            if let TypeKind::GenericParameter {
                owner: GenericOwner::Method(method),
                ..
            } = &ty.kind
            {
                check("method", method.0, methods, &context)?;
            }
            if ty.kind.is_nominal() && ty.module.is_none() {
                return Err(TranslateError::MalformedType {
                    ty: ty.name.clone(),
                    message: "nominal types must name their defining module".to_string(),
                });
            }
        }

        for (index, field) in self.fields.iter().enumerate() {
            let context = || format!("field {} `{}`", FieldId(index as u32), field.name);
            check("type", field.declaring_type.0, types, &context)?;
            check("type", field.ty.0, types, &context)?;
        }

        for (index, method) in self.methods.iter().enumerate() {
            let context = || format!("method {} `{}`", MethodId(index as u32), method.name);
            check("type", method.declaring_type.0, types, &context)?;
            check("type", method.return_type.0, types, &context)?;
            for parameter in &method.parameters {
                check("type", parameter.ty.0, types, &context)?;
            }
            if let Some(instance) = &method.generic_instance {
                check("method", instance.template.0, methods, &context)?;
                for argument in &instance.arguments {
                    check("type", argument.0, types, &context)?;
                }
            }
            if let Some(body) = &method.body {
                self.validate_body(method, body, &context)?;
            }
        }

        let well_known = &self.well_known;
        let context = || "well_known".to_string();
        for id in well_known.type_ids() {
            check("type", id.0, types, &context)?;
        }
        for id in well_known.field_ids() {
            check("field", id.0, fields, &context)?;
        }
        Ok(())
    }

    fn validate_body(
        &self,
        method: &MethodDef,
        body: &MethodBody,
        context: &dyn Fn() -> String,
    ) -> TranslateResult<()> {
        let dangling = |kind: &'static str, id: u32| TranslateError::DanglingId {
            kind,
            id,
            context: context(),
        };
        let instructions = body.instructions.len();
        for local in &body.locals {
            if local.ty.index() >= self.types.len() {
                return Err(dangling("type", local.ty.0));
            }
        }
        for instruction in &body.instructions {
            for link in instruction.operands() {
                if link.index() >= instructions {
                    return Err(dangling("instruction", link.0));
                }
            }
            if let Some(ty) = instruction.ty {
                if ty.index() >= self.types.len() {
                    return Err(dangling("type", ty.0));
                }
            }
            match &instruction.operand {
                Operand::Type(id) if id.index() >= self.types.len() => {
                    return Err(dangling("type", id.0))
                }
                Operand::Method(id) if id.index() >= self.methods.len() => {
                    return Err(dangling("method", id.0))
                }
                Operand::Field(id) if id.index() >= self.fields.len() => {
                    return Err(dangling("field", id.0))
                }
                Operand::Parameter(index) if *index as usize >= method.parameters.len() => {
                    return Err(dangling("parameter", *index))
                }
                Operand::Local(index) if *index as usize >= body.locals.len() => {
                    return Err(dangling("local", *index))
                }
                _ => {}
            }
        }
        for block in &body.blocks {
            for id in block.instructions.iter().chain(block.entry_stack.iter()) {
                if id.index() >= instructions {
                    return Err(dangling("instruction", id.0));
                }
            }
        }
        for region in &body.regions {
            if let Some(catch_type) = region.catch_type {
                if catch_type.index() >= self.types.len() {
                    return Err(dangling("type", catch_type.0));
                }
            }
        }
        Ok(())
    }
}
