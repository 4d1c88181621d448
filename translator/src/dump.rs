//! Method Dump Utility
//!
//! Pretty-prints method bodies as the translator sees them: exception
//! regions, basic blocks with their entry stacks and successors, and each
//! instruction with the temporary its result is bound to. Useful for
//! debugging the stack-slot allocation of a failing method.

use crate::error::TranslateResult;
use crate::metadata::{HandlerKind, InstrId, Instruction, MethodBody, MethodId, Operand, Program};
use crate::source_writer::SourceWriter;
use crate::stack_slots::{self, MethodNeeds, SlotAllocation};

/// Dump every method with a body, or only those whose display name
/// contains `filter`
pub fn dump_program(program: &Program, filter: Option<&str>) -> TranslateResult<String> {
    let mut out = SourceWriter::new();
    let mut count = 0;
    for index in 0..program.methods.len() as u32 {
        let method = MethodId(index);
        if program.method(method).body.is_none() {
            continue;
        }
        if let Some(filter) = filter {
            if !program.method_display_name(method).contains(filter) {
                continue;
            }
        }
        out.raw(dump_method(program, method)?);
        out.blank();
        count += 1;
    }
    out.line(format!("; {} methods", count));
    Ok(out.finish())
}

/// Dump a single method body
pub fn dump_method(program: &Program, method: MethodId) -> TranslateResult<String> {
    let def = program.method(method);
    let body = program.require_body(method)?;
    let slots = stack_slots::allocate(program, method)?;

    let params: Vec<String> = def
        .parameters
        .iter()
        .map(|p| {
            let by_ref = if p.by_ref { "&" } else { "" };
            format!("{}: {}{}", p.name, program.display_name(p.ty), by_ref)
        })
        .collect();

    let mut out = SourceWriter::new();
    out.open(format!(
        "method {}({}) -> {} ; {}",
        program.method_display_name(method),
        params.join(", "),
        program.display_name(def.return_type),
        method
    ));

    for (index, local) in body.locals.iter().enumerate() {
        out.line(format!("local {} {}: {}", index, local.name, program.display_name(local.ty)));
    }
    for temp in slots.temps() {
        out.line(format!(
            "temp {} (depth {}, {})",
            temp.name,
            temp.depth,
            program.display_name(temp.ty)
        ));
    }
    let needs = dump_needs(&slots.needs);
    if !needs.is_empty() {
        out.line(format!("; needs: {}", needs));
    }

    for region in &body.regions {
        let kind = match region.kind {
            HandlerKind::Catch => match region.catch_type {
                Some(ty) => format!("catch {}", program.display_name(ty)),
                None => "catch".to_string(),
            },
            HandlerKind::Finally => "finally".to_string(),
            HandlerKind::Fault => "fault".to_string(),
            HandlerKind::Filter => "filter".to_string(),
        };
        out.line(format!(
            "try IL_{:04x}..IL_{:04x} {} IL_{:04x}..IL_{:04x}",
            region.try_start, region.try_end, kind, region.handler_start, region.handler_end
        ));
    }

    for block in &body.blocks {
        out.blank();
        let entry: Vec<String> = block.entry_stack.iter().map(|&id| binding(&slots, id)).collect();
        let successors: Vec<String> = block.successors.iter().map(|s| format!("IL_{:04x}", s)).collect();
        out.line(format!("IL_{:04x}: ; stack [{}]", block.offset, entry.join(", ")));
        out.indent();
        for &id in &block.instructions {
            out.line(dump_instruction(program, body, &slots, id));
        }
        if !successors.is_empty() {
            out.line(format!("; succs: {}", successors.join(", ")));
        }
        out.dedent();
    }
    out.close("");
    Ok(out.finish())
}

fn binding(slots: &SlotAllocation, id: InstrId) -> String {
    slots.temp_of(id).map_or_else(|| id.to_string(), |t| t.name.clone())
}

fn dump_needs(needs: &MethodNeeds) -> String {
    let flags = [
        (needs.needs_overflow_flag, "overflow_flag"),
        (needs.needs_element_address, "element_address"),
        (needs.needs_virtual_ptr, "virtual_ptr"),
        (needs.needs_boxed_receiver, "boxed_receiver"),
        (needs.may_throw, "may_throw"),
    ];
    flags
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn dump_instruction(program: &Program, body: &MethodBody, slots: &SlotAllocation, id: InstrId) -> String {
    let instr: &Instruction = body.instr(id);
    let mut text = format!("IL_{:04x}  {}", instr.offset, instr.opcode.mnemonic());
    let operand = dump_operand(program, body, &instr.operand);
    if !operand.is_empty() {
        text.push(' ');
        text.push_str(&operand);
    }
    let inputs: Vec<String> = instr.operands().map(|op| binding(slots, op)).collect();
    if !inputs.is_empty() {
        text.push_str(&format!(" ({})", inputs.join(", ")));
    }
    if let Some(temp) = slots.temp_of(id) {
        text.push_str(&format!(" -> {}", temp.name));
    }
    text
}

fn dump_operand(program: &Program, body: &MethodBody, operand: &Operand) -> String {
    match operand {
        Operand::None => String::new(),
        Operand::Int(value) => value.to_string(),
        Operand::Float(value) => format!("{:?}", value),
        Operand::String(value) => format!("{:?}", value),
        Operand::Type(ty) => program.display_name(*ty),
        Operand::Method(method) => program.method_display_name(*method),
        Operand::Field(field) => {
            let def = program.field(*field);
            format!("{}::{}", program.display_name(def.declaring_type), def.name)
        }
        Operand::This => "this".to_string(),
        Operand::Parameter(index) => format!("arg{}", index),
        Operand::Local(index) => match body.locals.get(*index as usize) {
            Some(local) if !local.name.is_empty() => local.name.clone(),
            _ => format!("local{}", index),
        },
        Operand::Target(offset) => format!("IL_{:04x}", offset),
        Operand::Targets(offsets) => {
            let labels: Vec<String> = offsets.iter().map(|o| format!("IL_{:04x}", o)).collect();
            format!("({})", labels.join(", "))
        }
        Operand::CheckFlags(flags) => format!("0x{:x}", flags),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::builder::{BodyBuilder, ProgramBuilder};
    use crate::metadata::{ModuleKind, OpCode, PrimitiveType};

    fn add_program() -> (Program, MethodId) {
        let mut b = ProgramBuilder::new();
        let module = b.module("App", ModuleKind::Library);
        let object = b.object();
        let int32 = b.prim(PrimitiveType::Int32);
        let c = b.class(module, "App", "Calc", Some(object));
        let m = b.static_method(c, "Add", int32);
        b.param(m, "x", int32);
        b.param(m, "y", int32);
        let mut body = BodyBuilder::new();
        body.block(0);
        let x = body.emit(0, OpCode::Ldarg, Operand::Parameter(0), Some(int32), &[]);
        let y = body.emit(1, OpCode::Ldarg, Operand::Parameter(1), Some(int32), &[]);
        let sum = body.emit(2, OpCode::Add, Operand::None, Some(int32), &[x, y]);
        body.emit(3, OpCode::Ret, Operand::None, None, &[sum]);
        b.body(m, body.finish());
        (b.build().unwrap(), m)
    }

    #[test]
    fn test_instructions_show_their_temps() {
        let (program, m) = add_program();
        let text = dump_method(&program, m).unwrap();
        assert!(text.contains("IL_0000: ; stack []"));
        assert!(text.contains("IL_0000  ldarg arg0 -> "));
        assert!(text.lines().any(|l| l.contains("IL_0002  add (") && l.contains(" -> ")));
        assert!(text.contains("temp "));
    }

    #[test]
    fn test_filter_selects_methods() {
        let (program, _) = add_program();
        let all = dump_program(&program, None).unwrap();
        assert!(all.contains("Add("));
        let none = dump_program(&program, Some("NoSuchMethod")).unwrap();
        assert_eq!(none.trim(), "; 0 methods");
    }
}
