#![forbid(unsafe_code)]
#![cfg_attr(not(feature = "std"), no_std)]

//! The Viper intermediate language (IL).
//!
//! A [`Module`] holds functions made of ordered [`BasicBlock`]s, each a list of [`Instr`]s that
//! ends with exactly one terminator. Modules are produced by a front end and consumed read-only by
//! the VM.

extern crate alloc;
use alloc::{collections::BTreeMap, string::String, vec, vec::Vec};
use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The kind tag of an IL value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Type {
    Void,
    I1,
    I16,
    I32,
    I64,
    F64,
    Str,
    Ptr,
    Obj,
}

impl Type {
    /// The IL spelling of the type.
    pub const fn name(self) -> &'static str {
        match self {
            Type::Void => "void",
            Type::I1 => "i1",
            Type::I16 => "i16",
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::F64 => "f64",
            Type::Str => "str",
            Type::Ptr => "ptr",
            Type::Obj => "obj",
        }
    }

    /// Returns `true` for the signed integer widths `i16`, `i32` and `i64`.
    pub const fn is_integer(self) -> bool {
        matches!(self, Type::I16 | Type::I32 | Type::I64)
    }

    /// Storage size in bytes when the type is loaded from or stored to stack memory.
    pub const fn size_of(self) -> usize {
        match self {
            Type::Void => 0,
            Type::I1 => 1,
            Type::I16 => 2,
            Type::I32 => 4,
            Type::I64 | Type::F64 | Type::Str | Type::Ptr | Type::Obj => 8,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Exclusive upper bound on slot ids; frames allocate one register per slot.
pub const MAX_SLOTS: u32 = 1 << 20;

/// A result slot within a function (`%tN`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SlotId(pub u32);

/// A basic block index within a function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BlockId(pub usize);

/// A stable identifier for a function within a [`Module`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FunctionId(pub u32);

/// A stable identifier for an extern declaration within a [`Module`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExternId(pub u32);

/// Source position used only for diagnostics.
///
/// Line `0` means the location is unknown.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SourceLoc {
    pub file_id: u32,
    pub line: u32,
    pub col: u32,
}

impl SourceLoc {
    pub const UNKNOWN: SourceLoc = SourceLoc {
        file_id: 0,
        line: 0,
        col: 0,
    };

    pub const fn new(file_id: u32, line: u32, col: u32) -> Self {
        Self { file_id, line, col }
    }

    /// A location on `line` of file 0.
    pub const fn line(line: u32) -> Self {
        Self::new(0, line, 0)
    }

    pub const fn is_known(&self) -> bool {
        self.line != 0
    }
}

/// A constant operand.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Const {
    I1(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F64(f64),
    Str(String),
    NullPtr,
    NullObj,
}

impl Const {
    pub const fn ty(&self) -> Type {
        match self {
            Const::I1(_) => Type::I1,
            Const::I16(_) => Type::I16,
            Const::I32(_) => Type::I32,
            Const::I64(_) => Type::I64,
            Const::F64(_) => Type::F64,
            Const::Str(_) => Type::Str,
            Const::NullPtr => Type::Ptr,
            Const::NullObj => Type::Obj,
        }
    }
}

/// An instruction input: a constant or a previously computed result slot.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Operand {
    Const(Const),
    Temp(SlotId),
}

impl Operand {
    pub fn temp(slot: u32) -> Self {
        Operand::Temp(SlotId(slot))
    }

    pub fn i64(value: i64) -> Self {
        Operand::Const(Const::I64(value))
    }

    pub fn f64(value: f64) -> Self {
        Operand::Const(Const::F64(value))
    }

    pub fn str(value: impl Into<String>) -> Self {
        Operand::Const(Const::Str(value.into()))
    }
}

/// IL opcodes.
///
/// The discriminant is the stable integer tag the switch dispatcher branches on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum Opcode {
    // Wrapping integer arithmetic.
    Add,
    Sub,
    Mul,
    // Overflow-checked signed arithmetic.
    IAddOvf,
    ISubOvf,
    IMulOvf,
    INegOvf,
    SDiv,
    SRem,
    UDiv,
    URem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
    FAdd,
    FSub,
    FMul,
    FDiv,
    ICmpEq,
    ICmpNe,
    SCmpLT,
    SCmpLE,
    SCmpGT,
    SCmpGE,
    FCmpEQ,
    FCmpNE,
    FCmpLT,
    FCmpLE,
    FCmpGT,
    FCmpGE,
    Sitofp,
    Fptosi,
    CastFpToSiRteChk,
    CastSiNarrowChk,
    Zext1,
    Trunc1,
    Alloca,
    Gep,
    Load,
    Store,
    Call,
    // Terminators.
    Br,
    CBr,
    Ret,
    Trap,
}

impl Opcode {
    /// Number of opcodes; valid tags are `0..COUNT`.
    pub const COUNT: usize = Opcode::Trap as usize + 1;

    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// Returns `true` for control-transfer instructions that end a block.
    pub const fn is_terminator(self) -> bool {
        matches!(self, Opcode::Br | Opcode::CBr | Opcode::Ret | Opcode::Trap)
    }

    /// The IL mnemonic.
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::IAddOvf => "iadd.ovf",
            Opcode::ISubOvf => "isub.ovf",
            Opcode::IMulOvf => "imul.ovf",
            Opcode::INegOvf => "ineg.ovf",
            Opcode::SDiv => "sdiv",
            Opcode::SRem => "srem",
            Opcode::UDiv => "udiv",
            Opcode::URem => "urem",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Xor => "xor",
            Opcode::Shl => "shl",
            Opcode::LShr => "lshr",
            Opcode::AShr => "ashr",
            Opcode::FAdd => "fadd",
            Opcode::FSub => "fsub",
            Opcode::FMul => "fmul",
            Opcode::FDiv => "fdiv",
            Opcode::ICmpEq => "icmp_eq",
            Opcode::ICmpNe => "icmp_ne",
            Opcode::SCmpLT => "scmp_lt",
            Opcode::SCmpLE => "scmp_le",
            Opcode::SCmpGT => "scmp_gt",
            Opcode::SCmpGE => "scmp_ge",
            Opcode::FCmpEQ => "fcmp_eq",
            Opcode::FCmpNE => "fcmp_ne",
            Opcode::FCmpLT => "fcmp_lt",
            Opcode::FCmpLE => "fcmp_le",
            Opcode::FCmpGT => "fcmp_gt",
            Opcode::FCmpGE => "fcmp_ge",
            Opcode::Sitofp => "sitofp",
            Opcode::Fptosi => "fptosi",
            Opcode::CastFpToSiRteChk => "cast.fp_to_si.rte.chk",
            Opcode::CastSiNarrowChk => "cast.si_narrow.chk",
            Opcode::Zext1 => "zext1",
            Opcode::Trunc1 => "trunc1",
            Opcode::Alloca => "alloca",
            Opcode::Gep => "gep",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::Call => "call",
            Opcode::Br => "br",
            Opcode::CBr => "cbr",
            Opcode::Ret => "ret",
            Opcode::Trap => "trap",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// A single IL instruction.
///
/// The layout is flat: fields that an opcode does not use stay empty. `ty` is the result type
/// for value-producing instructions and the accessed type for `load`/`store`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Instr {
    #[cfg_attr(feature = "serde", serde(default))]
    pub result: Option<SlotId>,
    pub op: Opcode,
    pub ty: Type,
    #[cfg_attr(feature = "serde", serde(default))]
    pub operands: Vec<Operand>,
    /// Callee symbol for `call`: a module function or an extern.
    #[cfg_attr(feature = "serde", serde(default))]
    pub callee: Option<String>,
    /// Successor blocks for `br` (one) and `cbr` (true, false).
    #[cfg_attr(feature = "serde", serde(default))]
    pub labels: Vec<BlockId>,
    /// Block arguments, parallel to `labels`.
    #[cfg_attr(feature = "serde", serde(default))]
    pub br_args: Vec<Vec<Operand>>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub loc: SourceLoc,
}

impl Instr {
    pub fn new(op: Opcode, ty: Type) -> Self {
        Self {
            result: None,
            op,
            ty,
            operands: Vec::new(),
            callee: None,
            labels: Vec::new(),
            br_args: Vec::new(),
            loc: SourceLoc::UNKNOWN,
        }
    }

    /// `%dst = op ty a, b`
    pub fn binary(op: Opcode, ty: Type, dst: SlotId, lhs: Operand, rhs: Operand) -> Self {
        Self::new(op, ty).with_result(dst).with_operands(vec![lhs, rhs])
    }

    /// `%dst = op ty a`
    pub fn unary(op: Opcode, ty: Type, dst: SlotId, value: Operand) -> Self {
        Self::new(op, ty).with_result(dst).with_operands(vec![value])
    }

    /// `[%dst =] call ty @callee(args...)`
    pub fn call(dst: Option<SlotId>, ty: Type, callee: impl Into<String>, args: Vec<Operand>) -> Self {
        let mut instr = Self::new(Opcode::Call, ty).with_operands(args);
        instr.result = dst;
        instr.callee = Some(callee.into());
        instr
    }

    /// `%dst = alloca bytes`
    pub fn alloca(dst: SlotId, bytes: Operand) -> Self {
        Self::unary(Opcode::Alloca, Type::Ptr, dst, bytes)
    }

    /// `%dst = load ty ptr`
    pub fn load(ty: Type, dst: SlotId, ptr: Operand) -> Self {
        Self::unary(Opcode::Load, ty, dst, ptr)
    }

    /// `store ty ptr, value`
    pub fn store(ty: Type, ptr: Operand, value: Operand) -> Self {
        Self::new(Opcode::Store, ty).with_operands(vec![ptr, value])
    }

    pub fn br(target: BlockId, args: Vec<Operand>) -> Self {
        let mut instr = Self::new(Opcode::Br, Type::Void);
        instr.labels = vec![target];
        instr.br_args = vec![args];
        instr
    }

    pub fn cbr(
        cond: Operand,
        then_block: BlockId,
        then_args: Vec<Operand>,
        else_block: BlockId,
        else_args: Vec<Operand>,
    ) -> Self {
        let mut instr = Self::new(Opcode::CBr, Type::Void).with_operands(vec![cond]);
        instr.labels = vec![then_block, else_block];
        instr.br_args = vec![then_args, else_args];
        instr
    }

    pub fn ret(value: Option<Operand>) -> Self {
        Self::new(Opcode::Ret, Type::Void).with_operands(value.into_iter().collect())
    }

    pub fn trap() -> Self {
        Self::new(Opcode::Trap, Type::Void)
    }

    pub fn with_result(mut self, dst: SlotId) -> Self {
        self.result = Some(dst);
        self
    }

    pub fn with_operands(mut self, operands: Vec<Operand>) -> Self {
        self.operands = operands;
        self
    }

    pub fn at(mut self, loc: SourceLoc) -> Self {
        self.loc = loc;
        self
    }
}

/// A typed block parameter bound when control enters the block.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Param {
    pub slot: SlotId,
    pub ty: Type,
}

impl Param {
    pub fn new(slot: u32, ty: Type) -> Self {
        Self {
            slot: SlotId(slot),
            ty,
        }
    }
}

/// A labelled, ordered list of instructions ending in a terminator.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BasicBlock {
    pub label: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub params: Vec<Param>,
    pub instructions: Vec<Instr>,
    /// Set once a terminator has been appended.
    #[cfg_attr(feature = "serde", serde(default))]
    pub terminated: bool,
}

impl BasicBlock {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            params: Vec::new(),
            instructions: Vec::new(),
            terminated: false,
        }
    }

    pub fn with_params(mut self, params: Vec<Param>) -> Self {
        self.params = params;
        self
    }

    /// Appends `instr`, marking the block terminated if it is a control transfer.
    ///
    /// A terminated block accepts no further instructions.
    pub fn push(&mut self, instr: Instr) -> Result<(), BuildError> {
        if self.terminated {
            return Err(BuildError::BlockTerminated {
                label: self.label.clone(),
                op: instr.op,
            });
        }
        self.terminated = instr.op.is_terminator();
        self.instructions.push(instr);
        Ok(())
    }

    /// Builds a block from `instrs`, failing if anything follows a terminator.
    pub fn from_instrs(
        label: impl Into<String>,
        instrs: impl IntoIterator<Item = Instr>,
    ) -> Result<Self, BuildError> {
        let mut block = Self::new(label);
        for instr in instrs {
            block.push(instr)?;
        }
        Ok(block)
    }
}

/// An IL function. The first block is the entry block.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Function {
    pub name: String,
    #[cfg_attr(feature = "serde", serde(default))]
    pub params: Vec<Param>,
    pub ret: Type,
    pub blocks: Vec<BasicBlock>,
}

impl Function {
    pub fn new(name: impl Into<String>, params: Vec<Param>, ret: Type) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
            blocks: Vec::new(),
        }
    }

    pub fn with_block(mut self, block: BasicBlock) -> Self {
        self.blocks.push(block);
        self
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.0)
    }

    pub fn block_id(&self, label: &str) -> Option<BlockId> {
        self.blocks
            .iter()
            .position(|b| b.label == label)
            .map(BlockId)
    }

    /// Every slot the function defines: parameters, block parameters and results.
    fn defined_slots(&self) -> impl Iterator<Item = SlotId> + '_ {
        let params = self.params.iter().map(|p| p.slot);
        let block_params = self.blocks.iter().flat_map(|b| b.params.iter().map(|p| p.slot));
        let results = self
            .blocks
            .iter()
            .flat_map(|b| b.instructions.iter().filter_map(|i| i.result));
        params.chain(block_params).chain(results)
    }

    /// Number of result slots a frame for this function needs.
    pub fn slot_count(&self) -> usize {
        self.defined_slots()
            .map(|slot| slot.0 as usize + 1)
            .max()
            .unwrap_or(0)
    }

    /// Re-applies the builder rules to a function that did not come through [`BasicBlock::push`].
    ///
    /// Every block is rebuilt instruction by instruction, so anything after a terminator is
    /// rejected and `terminated` is recomputed. Slot ids must stay below [`MAX_SLOTS`].
    pub fn validate(&mut self) -> Result<(), BuildError> {
        if let Some(slot) = self.defined_slots().find(|slot| slot.0 >= MAX_SLOTS) {
            return Err(BuildError::SlotOutOfRange {
                function: self.name.clone(),
                slot: slot.0,
            });
        }
        for block in &mut self.blocks {
            let instrs = core::mem::take(&mut block.instructions);
            block.terminated = false;
            for instr in instrs {
                block.push(instr)?;
            }
        }
        Ok(())
    }
}

/// A host-runtime symbol callable from IL.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ExternDecl {
    pub name: String,
    pub ret: Type,
    #[cfg_attr(feature = "serde", serde(default))]
    pub params: Vec<Type>,
}

impl ExternDecl {
    pub fn new(name: impl Into<String>, params: Vec<Type>, ret: Type) -> Self {
        Self {
            name: name.into(),
            ret,
            params,
        }
    }
}

/// An IL module: functions plus extern declarations, both in declaration order.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
    /// Name → [`FunctionId`] map for entry lookup and call resolution.
    #[cfg_attr(feature = "serde", serde(default))]
    pub function_ids: BTreeMap<String, FunctionId>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub externs: Vec<ExternDecl>,
    /// Name → [`ExternId`] map for call resolution.
    #[cfg_attr(feature = "serde", serde(default))]
    pub extern_ids: BTreeMap<String, ExternId>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Inserts a function into the module, returning its assigned [`FunctionId`].
    ///
    /// This rejects duplicate names.
    pub fn add_function(&mut self, func: Function) -> Result<FunctionId, BuildError> {
        if self.function_ids.contains_key(func.name.as_str()) {
            return Err(BuildError::DuplicateFunction { name: func.name });
        }
        let id_u32: u32 = self
            .functions
            .len()
            .try_into()
            .map_err(|_| BuildError::TableOverflow { table: "function" })?;
        let id = FunctionId(id_u32);
        self.function_ids.insert(func.name.clone(), id);
        self.functions.push(func);
        Ok(id)
    }

    /// Declares an extern, returning its assigned [`ExternId`].
    ///
    /// This rejects duplicate names.
    pub fn add_extern(&mut self, decl: ExternDecl) -> Result<ExternId, BuildError> {
        if self.extern_ids.contains_key(decl.name.as_str()) {
            return Err(BuildError::DuplicateExtern { name: decl.name });
        }
        let id_u32: u32 = self
            .externs
            .len()
            .try_into()
            .map_err(|_| BuildError::TableOverflow { table: "extern" })?;
        let id = ExternId(id_u32);
        self.extern_ids.insert(decl.name.clone(), id);
        self.externs.push(decl);
        Ok(id)
    }

    /// Returns the [`FunctionId`] for `name` if the module defines it.
    pub fn function_id(&self, name: &str) -> Option<FunctionId> {
        self.function_ids.get(name).copied()
    }

    /// Returns the function for `id` if it is valid.
    pub fn function(&self, id: FunctionId) -> Option<&Function> {
        self.functions.get(id.0 as usize)
    }

    /// Returns the [`ExternId`] for `name` if the module declares it.
    pub fn extern_id(&self, name: &str) -> Option<ExternId> {
        self.extern_ids.get(name).copied()
    }

    /// Returns the extern declaration for `id` if it is valid.
    pub fn extern_decl(&self, id: ExternId) -> Option<&ExternDecl> {
        self.externs.get(id.0 as usize)
    }

    /// Rebuilds the name maps from the function and extern tables, validating each function.
    ///
    /// Run this after deserializing a module: its maps may be missing and its blocks never went
    /// through [`BasicBlock::push`].
    pub fn reindex(&mut self) -> Result<(), BuildError> {
        let functions = core::mem::take(&mut self.functions);
        let externs = core::mem::take(&mut self.externs);
        self.function_ids.clear();
        self.extern_ids.clear();
        for mut func in functions {
            func.validate()?;
            self.add_function(func)?;
        }
        for decl in externs {
            self.add_extern(decl)?;
        }
        Ok(())
    }
}

/// Errors raised while building IL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("block `{label}` is already terminated; cannot append `{op}`")]
    BlockTerminated { label: String, op: Opcode },
    #[error("duplicate function `{name}`")]
    DuplicateFunction { name: String },
    #[error("duplicate extern `{name}`")]
    DuplicateExtern { name: String },
    #[error("{table} table overflow")]
    TableOverflow { table: &'static str },
    #[error("slot %t{slot} in `{function}` exceeds the limit of {max}", max = MAX_SLOTS)]
    SlotOutOfRange { function: String, slot: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminated_block_rejects_further_instructions() {
        let mut block = BasicBlock::new("entry");
        block.push(Instr::ret(None)).unwrap();
        assert!(block.terminated);

        let err = block
            .push(Instr::binary(
                Opcode::Add,
                Type::I64,
                SlotId(0),
                Operand::i64(1),
                Operand::i64(2),
            ))
            .unwrap_err();
        assert_eq!(
            err,
            BuildError::BlockTerminated {
                label: "entry".to_string(),
                op: Opcode::Add,
            }
        );
        assert_eq!(block.instructions.len(), 1);
    }

    #[test]
    fn non_terminators_leave_block_open() {
        let block = BasicBlock::from_instrs(
            "entry",
            [Instr::alloca(SlotId(0), Operand::i64(8))],
        )
        .unwrap();
        assert!(!block.terminated);
    }

    #[test]
    fn module_rejects_duplicate_names() {
        let mut module = Module::new("m");
        let f = Function::new("main", vec![], Type::I64);
        assert_eq!(module.add_function(f.clone()).unwrap(), FunctionId(0));
        assert!(matches!(
            module.add_function(f),
            Err(BuildError::DuplicateFunction { .. })
        ));

        let decl = ExternDecl::new("rt_pow_f64_chkdom", vec![Type::F64, Type::F64], Type::F64);
        assert_eq!(module.add_extern(decl.clone()).unwrap(), ExternId(0));
        assert!(matches!(
            module.add_extern(decl),
            Err(BuildError::DuplicateExtern { .. })
        ));
        assert_eq!(module.extern_id("rt_pow_f64_chkdom"), Some(ExternId(0)));
    }

    #[test]
    fn slot_count_covers_params_block_params_and_results() {
        let f = Function::new("f", vec![Param::new(0, Type::I64)], Type::I64)
            .with_block(
                BasicBlock::from_instrs(
                    "entry",
                    [
                        Instr::binary(
                            Opcode::Add,
                            Type::I64,
                            SlotId(3),
                            Operand::temp(0),
                            Operand::i64(1),
                        ),
                        Instr::br(BlockId(1), vec![Operand::temp(3)]),
                    ],
                )
                .unwrap(),
            )
            .with_block(
                BasicBlock::from_instrs("exit", [Instr::ret(Some(Operand::temp(5)))])
                    .unwrap()
                    .with_params(vec![Param::new(5, Type::I64)]),
            );
        assert_eq!(f.slot_count(), 6);
        assert_eq!(f.block_id("exit"), Some(BlockId(1)));
    }

    #[test]
    fn validate_rejects_code_after_a_terminator() {
        let mut f = Function::new("f", vec![], Type::Void);
        f.blocks.push(BasicBlock {
            label: "entry".into(),
            params: Vec::new(),
            instructions: vec![Instr::ret(None), Instr::ret(None)],
            terminated: false,
        });
        assert!(matches!(
            f.validate(),
            Err(BuildError::BlockTerminated { ref label, op: Opcode::Ret }) if label == "entry"
        ));
    }

    #[test]
    fn validate_recomputes_terminated_and_bounds_slots() {
        let mut f = Function::new("f", vec![], Type::I64).with_block(BasicBlock {
            label: "entry".into(),
            params: Vec::new(),
            instructions: vec![Instr::ret(Some(Operand::i64(1)))],
            terminated: false,
        });
        f.validate().unwrap();
        assert!(f.blocks[0].terminated);

        let mut huge = Function::new("huge", vec![Param::new(MAX_SLOTS, Type::I64)], Type::Void);
        assert_eq!(
            huge.validate(),
            Err(BuildError::SlotOutOfRange {
                function: "huge".into(),
                slot: MAX_SLOTS,
            })
        );
    }

    #[test]
    fn opcode_tags_are_dense() {
        assert_eq!(Opcode::Add.tag(), 0);
        assert_eq!(Opcode::Trap as usize, Opcode::COUNT - 1);
        assert!(Opcode::CBr.is_terminator());
        assert!(!Opcode::Call.is_terminator());
    }
}
