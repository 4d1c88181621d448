//! Method bodies: instructions, basic blocks and exception regions
//!
//! Instructions live in a per-body arena. `operand1` and `operand2` link an
//! instruction to the instructions that produced its stack operands, so a
//! block's instructions form an expression DAG. Values that cross a block
//! boundary are represented by entry-stack pseudo instructions.

use super::{FieldId, InstrId, MethodId, TypeId};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// `no.` prefix flags
pub mod check_flags {
    pub const TYPE_CHECK: u8 = 0x1;
    pub const RANGE_CHECK: u8 = 0x2;
    pub const NULL_CHECK: u8 = 0x4;
}

macro_rules! opcodes {
    ($($variant:ident => $name:literal $(| $alias:literal)*),* $(,)?) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum OpCode {
            $(
                #[serde(rename = $name $(, alias = $alias)*)]
                $variant,
            )*
        }

        impl OpCode {
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(OpCode::$variant => $name,)*
                }
            }
        }
    };
}

opcodes! {
    Add => "add",
    AddOvf => "add.ovf",
    AddOvfUn => "add.ovf.un",
    And => "and",
    Arglist => "arglist",
    Beq => "beq" | "beq.s",
    Bge => "bge" | "bge.s",
    BgeUn => "bge.un" | "bge.un.s",
    Bgt => "bgt" | "bgt.s",
    BgtUn => "bgt.un" | "bgt.un.s",
    Ble => "ble" | "ble.s",
    BleUn => "ble.un" | "ble.un.s",
    Blt => "blt" | "blt.s",
    BltUn => "blt.un" | "blt.un.s",
    BneUn => "bne.un" | "bne.un.s",
    Box => "box",
    Br => "br" | "br.s",
    Break => "break",
    Brfalse => "brfalse" | "brfalse.s" | "brnull" | "brzero",
    Brtrue => "brtrue" | "brtrue.s" | "brinst",
    Call => "call",
    Calli => "calli",
    Callvirt => "callvirt",
    Castclass => "castclass",
    Ceq => "ceq",
    Cgt => "cgt",
    CgtUn => "cgt.un",
    Ckfinite => "ckfinite",
    Clt => "clt",
    CltUn => "clt.un",
    Constrained => "constrained.",
    ConvI => "conv.i",
    ConvI1 => "conv.i1",
    ConvI2 => "conv.i2",
    ConvI4 => "conv.i4",
    ConvI8 => "conv.i8",
    ConvOvfI => "conv.ovf.i",
    ConvOvfIUn => "conv.ovf.i.un",
    ConvOvfI1 => "conv.ovf.i1",
    ConvOvfI1Un => "conv.ovf.i1.un",
    ConvOvfI2 => "conv.ovf.i2",
    ConvOvfI2Un => "conv.ovf.i2.un",
    ConvOvfI4 => "conv.ovf.i4",
    ConvOvfI4Un => "conv.ovf.i4.un",
    ConvOvfI8 => "conv.ovf.i8",
    ConvOvfI8Un => "conv.ovf.i8.un",
    ConvOvfU => "conv.ovf.u",
    ConvOvfUUn => "conv.ovf.u.un",
    ConvOvfU1 => "conv.ovf.u1",
    ConvOvfU1Un => "conv.ovf.u1.un",
    ConvOvfU2 => "conv.ovf.u2",
    ConvOvfU2Un => "conv.ovf.u2.un",
    ConvOvfU4 => "conv.ovf.u4",
    ConvOvfU4Un => "conv.ovf.u4.un",
    ConvOvfU8 => "conv.ovf.u8",
    ConvOvfU8Un => "conv.ovf.u8.un",
    ConvRUn => "conv.r.un",
    ConvR4 => "conv.r4",
    ConvR8 => "conv.r8",
    ConvU => "conv.u",
    ConvU1 => "conv.u1",
    ConvU2 => "conv.u2",
    ConvU4 => "conv.u4",
    ConvU8 => "conv.u8",
    Cpblk => "cpblk",
    Cpobj => "cpobj",
    Div => "div",
    DivUn => "div.un",
    Dup => "dup",
    Endfilter => "endfilter",
    Endfinally => "endfinally" | "endfault",
    Initblk => "initblk",
    Initobj => "initobj",
    Isinst => "isinst",
    Jmp => "jmp",
    Ldarg => "ldarg" | "ldarg.s" | "ldarg.0" | "ldarg.1" | "ldarg.2" | "ldarg.3",
    Ldarga => "ldarga" | "ldarga.s",
    LdcI4 => "ldc.i4" | "ldc.i4.s" | "ldc.i4.m1" | "ldc.i4.0" | "ldc.i4.1" | "ldc.i4.2"
        | "ldc.i4.3" | "ldc.i4.4" | "ldc.i4.5" | "ldc.i4.6" | "ldc.i4.7" | "ldc.i4.8",
    LdcI8 => "ldc.i8",
    LdcR4 => "ldc.r4",
    LdcR8 => "ldc.r8",
    Ldelem => "ldelem" | "ldelem.any",
    LdelemI => "ldelem.i",
    LdelemI1 => "ldelem.i1",
    LdelemI2 => "ldelem.i2",
    LdelemI4 => "ldelem.i4",
    LdelemI8 => "ldelem.i8" | "ldelem.u8",
    LdelemR4 => "ldelem.r4",
    LdelemR8 => "ldelem.r8",
    LdelemRef => "ldelem.ref",
    LdelemU1 => "ldelem.u1",
    LdelemU2 => "ldelem.u2",
    LdelemU4 => "ldelem.u4",
    Ldelema => "ldelema",
    Ldfld => "ldfld",
    Ldflda => "ldflda",
    Ldftn => "ldftn",
    LdindI => "ldind.i",
    LdindI1 => "ldind.i1",
    LdindI2 => "ldind.i2",
    LdindI4 => "ldind.i4",
    LdindI8 => "ldind.i8" | "ldind.u8",
    LdindR4 => "ldind.r4",
    LdindR8 => "ldind.r8",
    LdindRef => "ldind.ref",
    LdindU1 => "ldind.u1",
    LdindU2 => "ldind.u2",
    LdindU4 => "ldind.u4",
    Ldlen => "ldlen",
    Ldloc => "ldloc" | "ldloc.s" | "ldloc.0" | "ldloc.1" | "ldloc.2" | "ldloc.3",
    Ldloca => "ldloca" | "ldloca.s",
    Ldnull => "ldnull",
    Ldobj => "ldobj",
    Ldsfld => "ldsfld",
    Ldsflda => "ldsflda",
    Ldstr => "ldstr",
    Ldtoken => "ldtoken",
    Ldvirtftn => "ldvirtftn",
    Leave => "leave" | "leave.s",
    Localloc => "localloc",
    Mkrefany => "mkrefany",
    Mul => "mul",
    MulOvf => "mul.ovf",
    MulOvfUn => "mul.ovf.un",
    Neg => "neg",
    Newarr => "newarr",
    Newobj => "newobj",
    No => "no.",
    Nop => "nop",
    Not => "not",
    Or => "or",
    Pop => "pop",
    Readonly => "readonly.",
    Refanytype => "refanytype",
    Refanyval => "refanyval",
    Rem => "rem",
    RemUn => "rem.un",
    Ret => "ret",
    Rethrow => "rethrow",
    Shl => "shl",
    Shr => "shr",
    ShrUn => "shr.un",
    Sizeof => "sizeof",
    Starg => "starg" | "starg.s",
    Stelem => "stelem" | "stelem.any",
    StelemI => "stelem.i",
    StelemI1 => "stelem.i1",
    StelemI2 => "stelem.i2",
    StelemI4 => "stelem.i4",
    StelemI8 => "stelem.i8",
    StelemR4 => "stelem.r4",
    StelemR8 => "stelem.r8",
    StelemRef => "stelem.ref",
    Stfld => "stfld",
    StindI => "stind.i",
    StindI1 => "stind.i1",
    StindI2 => "stind.i2",
    StindI4 => "stind.i4",
    StindI8 => "stind.i8",
    StindR4 => "stind.r4",
    StindR8 => "stind.r8",
    StindRef => "stind.ref",
    Stloc => "stloc" | "stloc.s" | "stloc.0" | "stloc.1" | "stloc.2" | "stloc.3",
    Stobj => "stobj",
    Stsfld => "stsfld",
    Sub => "sub",
    SubOvf => "sub.ovf",
    SubOvfUn => "sub.ovf.un",
    Switch => "switch",
    Tail => "tail.",
    Throw => "throw",
    Unaligned => "unaligned.",
    Unbox => "unbox",
    UnboxAny => "unbox.any",
    Volatile => "volatile.",
    Xor => "xor",
    ArrayAddr => "array_addr",
    ArrayCreate => "array_create",
    ArrayCreateWithLowerBound => "array_create_with_lower_bound",
    ArrayGet => "array_get",
    ArraySet => "array_set",
    EntryValue => "entry_value",
}

impl OpCode {
    pub fn is_prefix(self) -> bool {
        matches!(
            self,
            OpCode::Constrained
                | OpCode::No
                | OpCode::Readonly
                | OpCode::Tail
                | OpCode::Unaligned
                | OpCode::Volatile
        )
    }
}

/// The immediate argument of an instruction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operand {
    #[default]
    None,
    Int(i64),
    Float(f64),
    String(String),
    Type(TypeId),
    Method(MethodId),
    Field(FieldId),
    /// The implicit `this` argument
    This,
    /// Index into the method's declared parameters
    Parameter(u32),
    Local(u32),
    /// Branch target offset
    Target(u32),
    Targets(Vec<u32>),
    /// Bit set of `check_flags` for `no.`
    CheckFlags(u8),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub opcode: OpCode,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub operand: Operand,

    /// Static type of the value this instruction pushes
    #[serde(default)]
    pub ty: Option<TypeId>,

    #[serde(default)]
    pub operand1: Option<InstrId>,

    /// Second and further stack operands, in push order
    #[serde(default)]
    pub operand2: SmallVec<[InstrId; 2]>,
}

impl Instruction {
    pub fn new(opcode: OpCode, offset: u32) -> Self {
        Instruction {
            opcode,
            offset,
            operand: Operand::None,
            ty: None,
            operand1: None,
            operand2: SmallVec::new(),
        }
    }

    /// All stack operands in push order
    pub fn operands(&self) -> impl Iterator<Item = InstrId> + '_ {
        self.operand1.iter().chain(self.operand2.iter()).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalDef {
    #[serde(default)]
    pub name: String,
    pub ty: TypeId,
    /// Declared as a managed reference (`T&`)
    #[serde(default)]
    pub by_ref: bool,
    #[serde(default)]
    pub pinned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub offset: u32,
    pub instructions: Vec<InstrId>,
    /// Operand stack on entry, bottom first
    #[serde(default)]
    pub entry_stack: Vec<InstrId>,
    #[serde(default)]
    pub successors: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    Catch,
    Finally,
    Fault,
    Filter,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRegion {
    pub kind: HandlerKind,
    pub try_start: u32,
    pub try_end: u32,
    pub handler_start: u32,
    pub handler_end: u32,
    #[serde(default)]
    pub catch_type: Option<TypeId>,
}

impl ExceptionRegion {
    pub fn try_contains(&self, offset: u32) -> bool {
        offset >= self.try_start && offset < self.try_end
    }

    pub fn handler_contains(&self, offset: u32) -> bool {
        offset >= self.handler_start && offset < self.handler_end
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodBody {
    #[serde(default)]
    pub locals: Vec<LocalDef>,
    pub instructions: Vec<Instruction>,
    pub blocks: Vec<BasicBlock>,
    /// Innermost first, as in the metadata
    #[serde(default)]
    pub regions: Vec<ExceptionRegion>,
}

impl MethodBody {
    pub fn instr(&self, id: InstrId) -> &Instruction {
        &self.instructions[id.index()]
    }

    pub fn has_catch(&self) -> bool {
        self.regions.iter().any(|r| r.kind == HandlerKind::Catch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_forms_deserialize_to_long_forms() {
        let op: OpCode = serde_json::from_str(r#""br.s""#).unwrap();
        assert_eq!(op, OpCode::Br);
        let op: OpCode = serde_json::from_str(r#""ldc.i4.m1""#).unwrap();
        assert_eq!(op, OpCode::LdcI4);
        assert_eq!(OpCode::ConvOvfU2Un.mnemonic(), "conv.ovf.u2.un");
    }

    #[test]
    fn test_instruction_defaults() {
        let instr: Instruction = serde_json::from_str(r#"{"opcode": "add", "offset": 4, "operand1": 0, "operand2": [1]}"#).unwrap();
        assert_eq!(instr.operand, Operand::None);
        assert_eq!(instr.operands().collect::<Vec<_>>(), vec![InstrId(0), InstrId(1)]);
    }

    #[test]
    fn test_operand_shapes() {
        let operand: Operand = serde_json::from_str(r#""this""#).unwrap();
        assert_eq!(operand, Operand::This);
        let operand: Operand = serde_json::from_str(r#"{"targets": [4, 8]}"#).unwrap();
        assert_eq!(operand, Operand::Targets(vec![4, 8]));
    }

    #[test]
    fn test_prefixes() {
        assert!(OpCode::Volatile.is_prefix());
        assert!(!OpCode::Nop.is_prefix());
    }
}
