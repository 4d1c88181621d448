//! Virtual method tables and interface dispatch plans

use crate::error::{TranslateError, TranslateResult};
use crate::metadata::{MethodId, TypeId, TypeKind};
use crate::session::TranslationSession;
use fxhash::FxHashMap;
use log::debug;
use std::rc::Rc;

/// Slot layout of one type's virtual methods
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VirtualTable {
    /// Method occupying each slot, in slot order
    pub slots: Vec<MethodId>,
    /// Every method that has ever owned a slot, including overridden ones
    index: FxHashMap<MethodId, usize>,
}

impl VirtualTable {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot_of(&self, method: MethodId) -> Option<usize> {
        self.index.get(&method).copied()
    }

    fn append(&mut self, method: MethodId) {
        self.index.insert(method, self.slots.len());
        self.slots.push(method);
    }

    fn replace(&mut self, slot: usize, method: MethodId) {
        self.slots[slot] = method;
        self.index.insert(method, slot);
    }
}

/// Virtual table of `ty`, memoized in the session
///
/// `System.Object` lists its virtual methods in declaration order. Every
/// other class starts from a copy of its base's table; a method marked
/// `newslot` or overriding nothing appends a slot, any other virtual
/// method replaces the slot of the base method it overrides. Explicit
/// overrides of class methods replace the overridden slot. Interfaces have
/// no table.
pub fn virtual_table(session: &mut TranslationSession<'_>, ty: TypeId) -> TranslateResult<Rc<VirtualTable>> {
    if let Some(vmt) = session.vmts.get(&ty) {
        return Ok(Rc::clone(vmt));
    }
    let program = session.program;
    let def = program.ty(ty);

    let vmt = if let TypeKind::GenericInstance { template, .. } = &def.kind {
        if def.methods.is_empty() {
            let template_vmt = virtual_table(session, *template)?;
            session.vmts.insert(ty, Rc::clone(&template_vmt));
            return Ok(template_vmt);
        }
        build_table(session, ty)?
    } else if program.is_interface(ty) {
        VirtualTable::default()
    } else {
        build_table(session, ty)?
    };

    debug!(
        "vtable for {}: {} slots",
        program.display_name(ty),
        vmt.len()
    );
    let vmt = Rc::new(vmt);
    session.vmts.insert(ty, Rc::clone(&vmt));
    Ok(vmt)
}

fn build_table(session: &mut TranslationSession<'_>, ty: TypeId) -> TranslateResult<VirtualTable> {
    let program = session.program;
    let def = program.ty(ty);

    let mut vmt = match program.base_of(ty) {
        Some(base) if ty != program.well_known.object => (*virtual_table(session, base)?).clone(),
        _ => VirtualTable::default(),
    };

    for &method in &def.methods {
        let m = program.method(method);
        if !m.is_virtual() {
            continue;
        }
        let overridden = if m.flags.new_slot {
            None
        } else {
            program.implicitly_overridden_base_method(method)
        };
        match overridden {
            None => vmt.append(method),
            Some(base_method) => {
                let slot = vmt.slot_of(base_method).ok_or_else(|| {
                    TranslateError::UnresolvedVirtualSlot {
                        method: program.method_display_name(method),
                    }
                })?;
                vmt.replace(slot, method);
            }
        }
    }

    for over in &def.explicit_overrides {
        let implemented_on = program.method(over.implemented).declaring_type;
        if program.is_interface(implemented_on) {
            continue;
        }
        let slot = vmt.slot_of(over.implemented).ok_or_else(|| {
            TranslateError::UnresolvedVirtualSlot {
                method: program.method_display_name(over.implemented),
            }
        })?;
        vmt.replace(slot, over.implementing);
    }

    Ok(vmt)
}

/// Interface method paired with the method implementing it on a class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImtEntry {
    pub interface_method: MethodId,
    pub implementation: MethodId,
}

/// Every (interface method, implementation) pair to install in the
/// interface method table of `ty`
///
/// Abstract classes may leave interface methods unimplemented; a concrete
/// class may not.
pub fn interface_dispatch_plan(session: &mut TranslationSession<'_>, ty: TypeId) -> TranslateResult<Vec<ImtEntry>> {
    let program = session.program;
    if program.is_interface(ty) {
        return Ok(Vec::new());
    }
    let is_abstract = program.ty(ty).flags.is_abstract;

    let mut plan = Vec::new();
    for iface in program.interface_closure(ty) {
        for &interface_method in &program.ty(iface).methods {
            let m = program.method(interface_method);
            if m.is_static() || !m.is_virtual() {
                continue;
            }
            match program.interface_implementation(ty, interface_method) {
                Some(implementation) if program.method(implementation).flags.is_abstract => {}
                Some(implementation) => plan.push(ImtEntry {
                    interface_method,
                    implementation,
                }),
                None if is_abstract => {}
                None => {
                    return Err(TranslateError::UnresolvedInterfaceMethod {
                        ty: program.display_name(ty),
                        method: program.method_display_name(interface_method),
                    })
                }
            }
        }
    }
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslatorConfig;
    use crate::metadata::builder::ProgramBuilder;
    use crate::metadata::{ModuleKind, PrimitiveType};

    #[test]
    fn test_override_replaces_base_slot() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let void = b.prim(PrimitiveType::Void);
        let a = b.class(module, "App", "A", Some(object));
        let speak = b.virtual_method(a, "Speak", void);
        let c = b.class(module, "App", "C", Some(a));
        let c_speak = b.virtual_method(c, "Speak", void);
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());

        let base = virtual_table(&mut session, a).unwrap();
        let derived = virtual_table(&mut session, c).unwrap();
        assert_eq!(base.len(), derived.len());
        let slot = base.slot_of(speak).unwrap();
        assert_eq!(derived.slots[slot], c_speak);
        assert_eq!(derived.slot_of(speak), Some(slot));
    }

    #[test]
    fn test_new_slot_appends() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let void = b.prim(PrimitiveType::Void);
        let a = b.class(module, "App", "A", Some(object));
        b.virtual_method(a, "Speak", void);
        let c = b.class(module, "App", "C", Some(a));
        let hidden = b.virtual_method(c, "Speak", void);
        b.method_mut(hidden).flags.new_slot = true;
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());

        let base = virtual_table(&mut session, a).unwrap();
        let derived = virtual_table(&mut session, c).unwrap();
        assert_eq!(derived.len(), base.len() + 1);
        assert_eq!(derived.slot_of(hidden), Some(base.len()));
    }

    #[test]
    fn test_interfaces_have_no_table() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let void = b.prim(PrimitiveType::Void);
        let iface = b.interface(module, "App", "IRun");
        b.virtual_method(iface, "Run", void);
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());
        assert!(virtual_table(&mut session, iface).unwrap().is_empty());
    }

    #[test]
    fn test_dispatch_plan_pairs_implementations() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let void = b.prim(PrimitiveType::Void);
        let iface = b.interface(module, "App", "IRun");
        let run = b.virtual_method(iface, "Run", void);
        let c = b.class(module, "App", "C", Some(object));
        b.implement(c, iface);
        let c_run = b.virtual_method(c, "Run", void);
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());

        let plan = interface_dispatch_plan(&mut session, c).unwrap();
        assert_eq!(
            plan,
            vec![ImtEntry {
                interface_method: run,
                implementation: c_run
            }]
        );
    }

    #[test]
    fn test_missing_interface_method_is_reported() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let void = b.prim(PrimitiveType::Void);
        let iface = b.interface(module, "App", "IRun");
        b.virtual_method(iface, "Run", void);
        let c = b.class(module, "App", "C", Some(object));
        b.implement(c, iface);
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());

        let err = interface_dispatch_plan(&mut session, c).unwrap_err();
        assert_eq!(err.code(), crate::error_codes::UNRESOLVED_INTERFACE_METHOD);
    }
}
