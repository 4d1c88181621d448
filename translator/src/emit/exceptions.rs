//! Exception dispatch
//!
//! A thrown exception is a value in `exception`. Throw sites jump straight
//! to the handler of a catch region whose type statically matches, visit
//! the dynamic filter of catch regions that might match, and otherwise run
//! the enclosing finally handlers before returning the exception to the
//! caller. Finally handlers are shared code: callers store a resume index in
//! `expSwitchVal<try start>` and the handler's `endfinally` jumps to the
//! region's `lexpSwitch` table, which returns to the recorded continuation.

use super::{block_label, MethodEmitter, RuntimeFault};
use crate::ctypes::{is_aggregate, storage_type};
use crate::error::{TranslateError, TranslateResult};
use crate::metadata::{ExceptionRegion, HandlerKind, Instruction, OpCode, Operand, PrimitiveType, TypeId};

impl<'s, 'p> MethodEmitter<'s, 'p> {
    /// `l<offset>_<handler>_<n>`, a fresh continuation label registered in
    /// the switch table of `try_start`; returns the label and its index
    fn continuation(&mut self, offset: u32, handler: u32, try_start: u32) -> (String, usize) {
        let label = format!("l{:04x}_{:04x}_{}", offset, handler, self.session.next_label());
        let table = self.switch_tables.entry(try_start).or_default();
        table.push(label.clone());
        (label, table.len() - 1)
    }

    /// Run `region`'s handler and come back here
    fn visit_handler(&mut self, region: &ExceptionRegion, offset: u32) {
        let (label, index) = self.continuation(offset, region.handler_start, region.try_start);
        self.out.line(format!("expSwitchVal{:04x} = {};", region.try_start, index));
        self.out.line(format!("goto {};", block_label(region.handler_start)));
        self.out.label(label);
    }

    /// Dispatch the exception named `name`, whose static type is `thrown`
    /// when known, from the instruction at `offset`
    pub(crate) fn throw(&mut self, name: &str, thrown: Option<TypeId>, offset: u32) {
        self.out.line("#ifdef ENABLE_DEBUG_BREAK");
        self.out.line("__debugbreak();");
        self.out.line("#endif");
        if name != "exception" {
            if name != "originalException" {
                // a failed helper leaves an out-of-memory exception behind
                self.out.open("if (exception != 0)");
                let oom = RuntimeFault::OutOfMemory.exception_type(self.program);
                self.throw("exception", Some(oom), offset);
                self.out.close("");
            }
            self.out.line(format!("exception = {};", name));
        }

        let body = self.body;
        if body.regions.is_empty() {
            self.out.line("return exception;");
            return;
        }
        self.out.line(format!("throwOffset = 0x{:04x};", offset));

        let object = self.program.well_known.object;
        for region in body.regions.iter().filter(|r| r.kind == HandlerKind::Catch && r.try_contains(offset)) {
            let catch_type = region.catch_type.unwrap_or(object);
            let certain = catch_type == object
                || thrown.is_some_and(|t| {
                    self.program.derives_from_or_same(t, catch_type) || self.program.implements(t, catch_type)
                });
            if certain {
                self.out.line(format!("goto lrun_finallies_for_catch_{:04x};", region.handler_start));
                return;
            }
            let possible = thrown.map_or(true, |t| self.program.derives_from_or_same(catch_type, t));
            if possible {
                let (label, index) = self.continuation(offset, region.handler_start, region.try_start);
                self.out.line(format!("expSwitchVal{:04x} = {};", region.try_start, index));
                self.out.line(format!("goto lcatch_filter_{:04x};", region.handler_start));
                self.out.label(label);
                self.out.open("if (canHandleExp > 0)");
                self.out.line("canHandleExp = 0;");
                self.out.line(format!("goto lrun_finallies_for_catch_{:04x};", region.handler_start));
                self.out.close("");
            }
        }

        self.out.line("pendingException = exception;");
        for region in body.regions.iter().filter(|r| {
            matches!(r.kind, HandlerKind::Finally | HandlerKind::Fault) && r.try_contains(offset)
        }) {
            self.visit_handler(region, offset);
        }
        self.out.line("return pendingException;");
    }

    /// The statements raising `fault`, without the surrounding condition
    pub(crate) fn raise(&mut self, fault: RuntimeFault, offset: u32) {
        let variable = fault.variable();
        self.out.line(format!("uintptr_t {};", variable));
        self.out.line(format!("exception = {}((uintptr_t)&{});", fault.helper(), variable));
        let thrown = fault.exception_type(self.program);
        self.throw(variable, Some(thrown), offset);
    }

    /// `if (condition) { raise fault }`
    pub(crate) fn raise_if(&mut self, condition: &str, fault: RuntimeFault, offset: u32) {
        self.out.open(format!("if ({})", condition));
        self.raise(fault, offset);
        self.out.close("");
    }

    pub(crate) fn null_check(&mut self, value: &str, offset: u32) {
        self.raise_if(&format!("{} == 0", value), RuntimeFault::NullReference, offset);
    }

    /// Allocation failure check; the helper writes straight into `exception`
    pub(crate) fn oom_check(&mut self, value: &str, offset: u32) {
        self.out.open(format!("if ({} == 0)", value));
        self.out.line("GetOutOfMemoryException((uintptr_t)&exception);");
        let thrown = RuntimeFault::OutOfMemory.exception_type(self.program);
        self.throw("exception", Some(thrown), offset);
        self.out.close("");
    }

    /// Forward an exception returned by a callee or runtime helper
    pub(crate) fn propagate(&mut self, offset: u32) {
        self.out.open("if (exception)");
        self.throw("exception", None, offset);
        self.out.close("");
    }

    pub(crate) fn emit_exception_flow(&mut self, instr: &Instruction) -> TranslateResult<()> {
        let body = self.body;
        match instr.opcode {
            OpCode::Throw => {
                let value = self.operand_value(instr, 0)?;
                let thrown = self.static_type(self.operand(instr, 0)?)?;
                self.out.open(format!("if ({} == 0)", value));
                self.raise(RuntimeFault::NullReference, instr.offset);
                self.out.close("");
                self.throw(&value, Some(thrown), instr.offset);
            }
            OpCode::Rethrow => {
                let enclosing = body
                    .regions
                    .iter()
                    .find(|r| r.kind == HandlerKind::Catch && r.handler_contains(instr.offset))
                    .ok_or_else(|| self.invalid_operand(instr, "enclosing catch handler"))?;
                let thrown = enclosing.catch_type.unwrap_or(self.program.well_known.object);
                self.throw("originalException", Some(thrown), instr.offset);
            }
            OpCode::Leave => {
                let target = match instr.operand {
                    Operand::Target(target) => target,
                    _ => return Err(self.invalid_operand(instr, "branch target")),
                };
                for region in body.regions.iter().filter(|r| {
                    r.kind == HandlerKind::Finally && r.try_contains(instr.offset) && !r.try_contains(target)
                }) {
                    self.visit_handler(region, instr.offset);
                }
                self.out.line(format!("goto {};", block_label(target)));
            }
            OpCode::Endfinally => {
                let region = body
                    .regions
                    .iter()
                    .find(|r| {
                        matches!(r.kind, HandlerKind::Finally | HandlerKind::Fault)
                            && r.handler_contains(instr.offset)
                    })
                    .ok_or_else(|| self.invalid_operand(instr, "enclosing finally handler"))?;
                self.out.line(format!("goto lexpSwitch{:04x};", region.try_start));
            }
            _ => return Err(self.unsupported(instr)),
        }
        Ok(())
    }

    pub(crate) fn emit_return(&mut self, instr: &Instruction) -> TranslateResult<()> {
        let def = self.def;
        if !self.program.is_void(def.return_type) {
            let value = self.operand_value(instr, 0)?;
            if def.returns_by_ref {
                self.out.line(format!("*((uintptr_t*)_result) = {};", value));
            } else if is_aggregate(self.program, def.return_type) {
                let storage = storage_type(self.session, def.return_type)?;
                self.out.line(format!("memcpy((void*)_result, &{}, sizeof({}));", value, storage));
            } else {
                let storage = storage_type(self.session, def.return_type)?;
                self.out.line(format!("*(({}*)_result) = {};", storage, value));
            }
        }
        self.out.line("return 0;");
        Ok(())
    }

    /// Catch filters, finally runners and resume tables, placed after the
    /// last block
    pub(crate) fn emit_exception_tables(&mut self) -> TranslateResult<()> {
        let body = self.body;
        if body.regions.is_empty() {
            return Ok(());
        }
        for region in body.regions.iter().filter(|r| r.kind == HandlerKind::Catch) {
            // reserved by the allocator whenever a catch region exists
            let uintptr = self.program.primitive(PrimitiveType::UIntPtr)?;
            let scratch = self
                .slots
                .temp(0, uintptr)
                .map(|t| t.name.clone())
                .ok_or_else(|| TranslateError::internal("catch filter scratch slot missing"))?;
            let catch_type = region.catch_type.unwrap_or(self.program.well_known.object);
            let type_object = self.session.type_object(catch_type);
            self.out.label(format!("lcatch_filter_{:04x}", region.handler_start));
            self.out.line(format!(
                "TryCast(exception, {}, (uintptr_t)&{});",
                type_object, scratch
            ));
            self.out.line(format!("canHandleExp = {} != 0;", scratch));
            self.out.line(format!("goto lexpSwitch{:04x};", region.try_start));

            self.out.label(format!("lrun_finallies_for_catch_{:04x}", region.handler_start));
            self.out.line("pendingException = exception;");
            for inner in body.regions.iter().filter(|r| {
                r.kind == HandlerKind::Finally
                    && r.try_start >= region.try_start
                    && r.try_end <= region.try_end
                    && *r != region
            }) {
                let (label, index) = self.continuation(region.handler_start, inner.handler_start, inner.try_start);
                self.out.open(format!(
                    "if (throwOffset >= 0x{:04x} && throwOffset < 0x{:04x})",
                    inner.try_start, inner.try_end
                ));
                self.out.line(format!("expSwitchVal{:04x} = {};", inner.try_start, index));
                self.out.line(format!("goto {};", block_label(inner.handler_start)));
                self.out.close("");
                self.out.label(label);
            }
            self.out.line("exception = pendingException;");
            self.out.line(format!("goto {};", block_label(region.handler_start)));
        }

        let tables: Vec<(u32, Vec<String>)> = self
            .switch_tables
            .iter()
            .map(|(start, labels)| (*start, labels.clone()))
            .collect();
        for (start, labels) in tables {
            self.out.label(format!("lexpSwitch{:04x}", start));
            self.out.open(format!("switch (expSwitchVal{:04x})", start));
            for (index, label) in labels.iter().enumerate() {
                self.out.line(format!("case {}: goto {};", index, label));
            }
            self.out.close("");
            self.out.line("return 0;");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::config::TranslatorConfig;
    use crate::emit::emit_method;
    use crate::metadata::builder::{BodyBuilder, ProgramBuilder};
    use crate::metadata::{ExceptionRegion, HandlerKind, ModuleKind, OpCode, Operand, PrimitiveType};
    use crate::session::TranslationSession;

    #[test]
    fn test_leave_runs_finally_through_resume_table() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let void = b.prim(PrimitiveType::Void);
        let c = b.class(module, "App", "C", Some(object));
        let m = b.static_method(c, "Guarded", void);
        let mut body = BodyBuilder::new();
        body.block(0);
        body.emit(0, OpCode::Leave, Operand::Target(0x10), None, &[]);
        body.block(0x8);
        body.emit(0x8, OpCode::Endfinally, Operand::None, None, &[]);
        body.block(0x10);
        body.emit(0x10, OpCode::Ret, Operand::None, None, &[]);
        body.region(ExceptionRegion {
            kind: HandlerKind::Finally,
            try_start: 0,
            try_end: 0x8,
            handler_start: 0x8,
            handler_end: 0x10,
            catch_type: None,
        });
        b.body(m, body.finish());
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());

        let text = emit_method(&mut session, m).unwrap();
        assert!(text.contains("int32_t expSwitchVal0000 = 0;"));
        assert!(text.contains("expSwitchVal0000 = 0;\n    goto l0008;\nl0000_0008_0:"));
        assert!(text.contains("goto lexpSwitch0000;"));
        assert!(text.contains("lexpSwitch0000:\n    switch (expSwitchVal0000) {\n        case 0: goto l0000_0008_0;"));
        // exactly one entry into the finally from the leave
        assert_eq!(text.matches("goto l0008;").count(), 1);
    }

    #[test]
    fn test_throw_inside_try_finally_runs_finally_before_returning() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let void = b.prim(PrimitiveType::Void);
        let exception = b.exception();
        let c = b.class(module, "App", "C", Some(object));
        let m = b.static_method(c, "Fail", void);
        b.param(m, "e", exception);
        let mut body = BodyBuilder::new();
        body.block(0);
        let value = body.emit(0, OpCode::Ldarg, Operand::Parameter(0), Some(exception), &[]);
        body.emit(1, OpCode::Throw, Operand::None, None, &[value]);
        body.block(2);
        body.emit(2, OpCode::Endfinally, Operand::None, None, &[]);
        body.region(ExceptionRegion {
            kind: HandlerKind::Finally,
            try_start: 0,
            try_end: 2,
            handler_start: 2,
            handler_end: 3,
            catch_type: None,
        });
        b.body(m, body.finish());
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());

        let text = emit_method(&mut session, m).unwrap();
        assert!(!text.contains("canHandleExp"));
        let pending = text.find("pendingException = exception;").unwrap();
        let finally = text.find("goto l0002;").unwrap();
        let returned = text.find("return pendingException;").unwrap();
        assert!(pending < finally && finally < returned);
        assert!(text.contains("lexpSwitch0000:"));
    }

    #[test]
    fn test_throw_of_matching_type_jumps_to_handler() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let void = b.prim(PrimitiveType::Void);
        let exception = b.exception();
        let c = b.class(module, "App", "C", Some(object));
        let m = b.static_method(c, "Fail", void);
        let mut body = BodyBuilder::new();
        body.block(0);
        let value = body.emit(0, OpCode::Ldnull, Operand::None, Some(exception), &[]);
        body.emit(1, OpCode::Throw, Operand::None, None, &[value]);
        let caught = body.entry_value(2, exception);
        body.block_with_stack(2, vec![caught]);
        body.emit(2, OpCode::Pop, Operand::None, None, &[caught]);
        body.emit(3, OpCode::Leave, Operand::Target(4), None, &[]);
        body.block(4);
        body.emit(4, OpCode::Ret, Operand::None, None, &[]);
        body.region(ExceptionRegion {
            kind: HandlerKind::Catch,
            try_start: 0,
            try_end: 2,
            handler_start: 2,
            handler_end: 4,
            catch_type: Some(exception),
        });
        b.body(m, body.finish());
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());

        let text = emit_method(&mut session, m).unwrap();
        assert!(text.contains("throwOffset = 0x0001;"));
        assert!(text.contains("goto lrun_finallies_for_catch_0002;"));
        assert!(text.contains("lcatch_filter_0002:"));
        assert!(text.contains("originalException = exception;"));
        // a null throw becomes a NullReferenceException
        assert!(text.contains("exception = GetNullReferenceException((uintptr_t)&nullReferenceException);"));
    }

    #[test]
    fn test_unhandled_throw_returns_exception() {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let void = b.prim(PrimitiveType::Void);
        let exception = b.exception();
        let c = b.class(module, "App", "C", Some(object));
        let m = b.static_method(c, "Fail", void);
        b.param(m, "e", exception);
        let mut body = BodyBuilder::new();
        let value = body.emit(0, OpCode::Ldarg, Operand::Parameter(0), Some(exception), &[]);
        body.emit(1, OpCode::Throw, Operand::None, None, &[value]);
        b.body(m, body.finish());
        let program = b.build().unwrap();
        let mut session = TranslationSession::new(&program, TranslatorConfig::default());

        let text = emit_method(&mut session, m).unwrap();
        assert!(text.contains("return exception;"));
        assert!(!text.contains("throwOffset"));
    }
}
