// This module is the reference x86-64 emission backend. It implements LoweringBackend for the
// System V AMD64 ABI by giving every lowered value a home slot in the frame: parameters are
// stored from their argument registers, constants are materialized into slots, and every inline
// operation loads its operands into scratch registers from the register file, computes, and
// stores the result back. Because no value lives in a register across an operation, a stub
// call needs no caller-saved preservation; arguments are loaded straight into their ABI
// registers (or pushed, beyond the sixth integer argument) and the result is stored from RAX or
// XMM0. Operations are recorded while lowering and encoded in one pass at the end, once the
// frame size is known. The result is a function body whose stub calls are still unresolved
// and which the object writer turns into a relocatable ELF object.

//! x86-64 (System V) lowering backend.

use iced_x86::code_asm::CodeLabel;

use super::encoder::{X64Encoder, R10, R11, R8, R9, RAX, RBP, RCX, RDI, RDX, RSI, RSP, XMM0};
use crate::core::constant::Constant;
use crate::core::element::ElementKind;
use crate::core::error::{IntrinsicError, IntrinsicResult};
use crate::core::register_file::{AsmReg, RegAllocError, RegBitSet, RegisterFile, GP_BANK, VECTOR_BANK};
use crate::core::stamp::Stamp;
use crate::lowering::{InlineOp, LoweringBackend, StubCall};
use crate::stubs::ValueKind;
use crate::target::{Architecture, CpuFeature, TargetDescription};

const GP_ARG_REGS: [AsmReg; 6] = [RDI, RSI, RDX, RCX, R8, R9];
const XMM_ARG_REGS: usize = 8;

/// Registers the backend may use as scratch; all caller-saved.
const GP_SCRATCH: [AsmReg; 9] = [RAX, RCX, RDX, RSI, RDI, R8, R9, R10, R11];

impl From<RegAllocError> for IntrinsicError {
    fn from(err: RegAllocError) -> Self {
        IntrinsicError::Backend(err.to_string())
    }
}

/// A lowered value: a frame slot holding a value of `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct X64Value {
    slot: u32,
    kind: ValueKind,
}

impl X64Value {
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Offset of the slot from RBP.
    pub fn frame_offset(&self) -> i32 {
        -8 * (self.slot as i32 + 1)
    }
}

/// Where the ABI passes an incoming parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamLocation {
    Register(AsmReg),
    /// Offset from RBP of a stack-passed argument.
    Stack(i32),
}

fn assign_parameters(signature: &[ValueKind]) -> Vec<ParamLocation> {
    let mut gp = 0;
    let mut vector = 0;
    let mut stack = 16;
    signature
        .iter()
        .map(|kind| {
            if kind.is_float() && vector < XMM_ARG_REGS {
                vector += 1;
                ParamLocation::Register(AsmReg::vector(vector as u8 - 1))
            } else if !kind.is_float() && gp < GP_ARG_REGS.len() {
                gp += 1;
                ParamLocation::Register(GP_ARG_REGS[gp - 1])
            } else {
                stack += 8;
                ParamLocation::Stack(stack - 8)
            }
        })
        .collect()
}

/// Value kind of a parameter or constant with the given stamp.
pub fn value_kind(stamp: &Stamp) -> ValueKind {
    match stamp {
        Stamp::Integer(stamp) if stamp.bits() > 32 => ValueKind::Long,
        Stamp::Integer(_) => ValueKind::Int,
        Stamp::Float(stamp) if stamp.bits > 32 => ValueKind::Double,
        Stamp::Float(_) => ValueKind::Float,
        Stamp::Object { .. } => ValueKind::Pointer,
        Stamp::Void => ValueKind::Void,
    }
}

fn inline_result_kind(op: &InlineOp) -> ValueKind {
    match op {
        InlineOp::ReverseBytes { bits: 64 } => ValueKind::Long,
        InlineOp::HalfToFloat => ValueKind::Float,
        InlineOp::FloatMul | InlineOp::FloatDiv | InlineOp::Sqrt => ValueKind::Double,
        _ => ValueKind::Int,
    }
}

/// Whether a value of kind `actual` may be passed for a stub argument of kind `expected`.
/// Ints widen to longs by sign extension; pointers and longs share a register class.
fn passes_as(actual: ValueKind, expected: ValueKind) -> bool {
    actual == expected
        || matches!(
            (actual, expected),
            (ValueKind::Int, ValueKind::Long) | (ValueKind::Pointer, ValueKind::Long) | (ValueKind::Long, ValueKind::Pointer)
        )
}

fn inline_arity(op: &InlineOp) -> usize {
    match op {
        InlineOp::ArrayEquals { .. } => 4,
        InlineOp::UnsignedBelow { .. } | InlineOp::FloatMul | InlineOp::FloatDiv => 2,
        _ => 1,
    }
}

#[derive(Debug, Clone)]
enum Recorded {
    Parameter { location: ParamLocation, dst: X64Value },
    Constant { raw: u64, dst: X64Value },
    Address { data: usize, dst: X64Value },
    Inline { op: InlineOp, args: Vec<X64Value>, dst: X64Value },
    Call {
        stub: String,
        args: Vec<X64Value>,
        kinds: Vec<ValueKind>,
        dst: X64Value,
    },
}

/// A relocation against a stub symbol inside emitted code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubRelocation {
    /// Offset of the rel32 field.
    pub offset: u64,
    pub stub: String,
}

/// Machine code of one function with its unresolved stub calls.
#[derive(Debug, Clone)]
pub struct EmittedFunction {
    pub code: Vec<u8>,
    pub relocations: Vec<StubRelocation>,
    pub clobbered: RegBitSet,
}

/// Reference x86-64 backend.
pub struct X64Backend {
    target: TargetDescription,
    params: Vec<ParamLocation>,
    signature: Vec<ValueKind>,
    ops: Vec<Recorded>,
    data: Vec<Vec<u8>>,
    slots: u32,
}

impl X64Backend {
    /// Backend for a function taking parameters of `signature`.
    pub fn new(target: TargetDescription, signature: &[ValueKind]) -> IntrinsicResult<Self> {
        if target.arch != Architecture::Amd64 {
            return Err(IntrinsicError::ArchitectureMismatch {
                expected: Architecture::Amd64,
                found: target.arch,
            });
        }
        Ok(Self {
            target,
            params: assign_parameters(signature),
            signature: signature.to_vec(),
            ops: Vec::new(),
            data: Vec::new(),
            slots: 0,
        })
    }

    fn new_value(&mut self, kind: ValueKind) -> X64Value {
        let value = X64Value { slot: self.slots, kind };
        self.slots += 1;
        value
    }

    /// Encode the recorded operations, returning `result` in RAX or XMM0.
    pub fn emit(self, result: Option<X64Value>) -> IntrinsicResult<EmittedFunction> {
        let mut emitter = Emitter::new()?;
        // Keeps RSP 16-byte aligned at calls: the return address and saved RBP add 16.
        let frame_size = (self.slots * 8).next_multiple_of(16);
        emitter.encoder.emit_prologue(frame_size)?;

        let data_labels: Vec<CodeLabel> = self.data.iter().map(|_| emitter.encoder.create_label()).collect();
        for op in &self.ops {
            emitter.emit(op, &data_labels)?;
        }

        if let Some(result) = result {
            let reg = if result.kind.is_float() { XMM0 } else { RAX };
            emitter.encoder.load(reg, result.kind, RBP, result.frame_offset())?;
        }
        emitter.encoder.emit_epilogue()?;

        for (mut label, bytes) in data_labels.into_iter().zip(&self.data) {
            emitter.encoder.place_label(&mut label)?;
            emitter.encoder.bytes(bytes)?;
        }

        let clobbered = emitter.registers.clobbered();
        let (call_labels, stubs): (Vec<CodeLabel>, Vec<String>) = emitter.calls.into_iter().unzip();
        let assembled = emitter.encoder.finalize(&call_labels)?;
        let relocations = assembled
            .label_offsets
            .iter()
            .zip(stubs)
            .map(|(&offset, stub)| StubRelocation { offset: offset + 1, stub })
            .collect();
        log::debug!(
            "emitted {} bytes, {} slots, {} stub call(s)",
            assembled.code.len(),
            self.slots,
            call_labels.len()
        );
        Ok(EmittedFunction {
            code: assembled.code,
            relocations,
            clobbered,
        })
    }
}

impl LoweringBackend for X64Backend {
    type Value = X64Value;

    fn target(&self) -> &TargetDescription {
        &self.target
    }

    fn parameter(&mut self, index: u32, stamp: &Stamp) -> IntrinsicResult<X64Value> {
        let kind = value_kind(stamp);
        let (Some(&location), Some(&declared)) = (
            self.params.get(index as usize),
            self.signature.get(index as usize),
        ) else {
            return Err(IntrinsicError::Backend(format!(
                "parameter {index} is outside the {}-parameter signature",
                self.signature.len()
            )));
        };
        if declared != kind {
            return Err(IntrinsicError::Backend(format!(
                "parameter {index} declared {declared} but used as {kind}"
            )));
        }
        let dst = self.new_value(kind);
        self.ops.push(Recorded::Parameter { location, dst });
        Ok(dst)
    }

    fn constant(&mut self, constant: &Constant<'_>) -> IntrinsicResult<X64Value> {
        let (raw, kind) = match *constant {
            Constant::Int(v) => (v as u32 as u64, ValueKind::Int),
            Constant::Long(v) => (v as u64, ValueKind::Long),
            Constant::Float(v) => (v.to_bits() as u64, ValueKind::Float),
            Constant::Double(v) => (v.to_bits(), ValueKind::Double),
            Constant::Null => (0, ValueKind::Pointer),
            Constant::Array(array) => {
                let dst = self.new_value(ValueKind::Pointer);
                self.data.push(array.bytes().to_vec());
                self.ops.push(Recorded::Address {
                    data: self.data.len() - 1,
                    dst,
                });
                return Ok(dst);
            }
        };
        let dst = self.new_value(kind);
        self.ops.push(Recorded::Constant { raw, dst });
        Ok(dst)
    }

    fn emit_inline(&mut self, op: &InlineOp, args: &[X64Value]) -> IntrinsicResult<X64Value> {
        if args.len() != inline_arity(op) {
            return Err(IntrinsicError::Backend(format!(
                "{op} takes {} operands, {} supplied",
                inline_arity(op),
                args.len()
            )));
        }
        let dst = self.new_value(inline_result_kind(op));
        self.ops.push(Recorded::Inline {
            op: *op,
            args: args.to_vec(),
            dst,
        });
        Ok(dst)
    }

    fn emit_stub_call(&mut self, call: &StubCall, args: &[X64Value]) -> IntrinsicResult<X64Value> {
        let descriptor = call.descriptor;
        for (index, (arg, &expected)) in args.iter().zip(descriptor.args()).enumerate() {
            if !passes_as(arg.kind, expected) {
                return Err(IntrinsicError::Backend(format!(
                    "argument {index} of {} is {} but the stub expects {expected}",
                    descriptor.name(),
                    arg.kind
                )));
            }
        }
        if let Some(features) = &call.runtime_checked {
            log::trace!("{} guarded by runtime check of [{features}]", descriptor.name());
        }
        let dst = self.new_value(descriptor.result());
        self.ops.push(Recorded::Call {
            stub: descriptor.name().to_string(),
            args: args.to_vec(),
            kinds: descriptor.args().to_vec(),
            dst,
        });
        Ok(dst)
    }
}

/// Encoding state of [`X64Backend::emit`].
struct Emitter {
    encoder: X64Encoder,
    registers: RegisterFile,
    calls: Vec<(CodeLabel, String)>,
}

impl Emitter {
    fn new() -> IntrinsicResult<Self> {
        let mut allocatable = RegBitSet::of(&GP_SCRATCH);
        for id in 0..16 {
            allocatable.set(AsmReg::vector(id));
        }
        Ok(Self {
            encoder: X64Encoder::new()?,
            registers: RegisterFile::new(16, allocatable),
            calls: Vec::new(),
        })
    }

    fn gp(&mut self) -> IntrinsicResult<AsmReg> {
        Ok(self.registers.allocate_reg(GP_BANK, &RegBitSet::new())?)
    }

    fn vector(&mut self) -> IntrinsicResult<AsmReg> {
        Ok(self.registers.allocate_reg(VECTOR_BANK, &RegBitSet::new())?)
    }

    /// Load `value` into a fresh scratch register of the matching bank.
    fn load(&mut self, value: X64Value) -> IntrinsicResult<AsmReg> {
        let reg = if value.kind.is_float() { self.vector()? } else { self.gp()? };
        self.encoder.load(reg, value.kind, RBP, value.frame_offset())?;
        Ok(reg)
    }

    fn store(&mut self, dst: X64Value, reg: AsmReg) -> IntrinsicResult<()> {
        self.encoder.store(RBP, dst.frame_offset(), dst.kind, reg)?;
        Ok(())
    }

    fn emit(&mut self, op: &Recorded, data_labels: &[CodeLabel]) -> IntrinsicResult<()> {
        match op {
            Recorded::Parameter { location, dst } => match *location {
                ParamLocation::Register(reg) => self.store(*dst, reg)?,
                ParamLocation::Stack(offset) => {
                    let reg = if dst.kind.is_float() { self.vector()? } else { self.gp()? };
                    self.encoder.load(reg, dst.kind, RBP, offset)?;
                    self.store(*dst, reg)?;
                }
            },
            Recorded::Constant { raw, dst } => {
                let reg = self.gp()?;
                self.encoder.mov_reg_imm(reg, *raw as i64)?;
                // Same bits whatever the kind; a float slot is read back as a float.
                let as_integer = if dst.kind == ValueKind::Float { ValueKind::Int } else { ValueKind::Long };
                self.encoder.store(RBP, dst.frame_offset(), as_integer, reg)?;
            }
            Recorded::Address { data, dst } => {
                let label = data_labels
                    .get(*data)
                    .copied()
                    .ok_or_else(|| IntrinsicError::Backend(format!("missing data entry {data}")))?;
                let reg = self.gp()?;
                self.encoder.lea_label(reg, label)?;
                self.store(*dst, reg)?;
            }
            Recorded::Inline { op, args, dst } => self.inline(op, args, *dst)?,
            Recorded::Call { stub, args, kinds, dst } => self.call(stub, args, kinds, *dst)?,
        }
        self.registers.release_all();
        Ok(())
    }

    fn inline(&mut self, op: &InlineOp, args: &[X64Value], dst: X64Value) -> IntrinsicResult<()> {
        match *op {
            InlineOp::ArrayEquals { kind, length } => self.array_equals(kind, length, args, dst),
            InlineOp::BitCount { bits, features } => {
                if !features.contains(CpuFeature::Popcnt) {
                    return Err(IntrinsicError::Backend("BitCount requires popcnt".to_string()));
                }
                let reg = self.load(args[0])?;
                self.encoder.popcnt(reg, reg, bits)?;
                self.store(dst, reg)
            }
            InlineOp::LeadingZeros { bits, features } => {
                let src = self.load(args[0])?;
                let reg = self.gp()?;
                if features.contains(CpuFeature::Lzcnt) {
                    self.encoder.lzcnt(reg, src, bits)?;
                } else {
                    // (bits - 1) - bsr(x), with bits for x == 0.
                    let mut zero = self.encoder.create_label();
                    let mut done = self.encoder.create_label();
                    self.encoder.bsr(reg, src, bits)?;
                    self.encoder.je(zero)?;
                    self.encoder.xor32_reg_imm(reg, bits as i32 - 1)?;
                    self.encoder.jmp(done)?;
                    self.encoder.place_label(&mut zero)?;
                    self.encoder.mov32_reg_imm(reg, bits as i32)?;
                    self.encoder.place_label(&mut done)?;
                }
                self.store(dst, reg)
            }
            InlineOp::TrailingZeros { bits, features } => {
                let src = self.load(args[0])?;
                let reg = self.gp()?;
                if features.contains(CpuFeature::Bmi1) {
                    self.encoder.tzcnt(reg, src, bits)?;
                } else {
                    let mut nonzero = self.encoder.create_label();
                    self.encoder.bsf(reg, src, bits)?;
                    self.encoder.jne(nonzero)?;
                    self.encoder.mov32_reg_imm(reg, bits as i32)?;
                    self.encoder.place_label(&mut nonzero)?;
                }
                self.store(dst, reg)
            }
            InlineOp::ReverseBytes { bits } => {
                let reg = self.load(args[0])?;
                self.encoder.bswap(reg, bits)?;
                self.store(dst, reg)
            }
            InlineOp::HalfToFloat => {
                let half = self.load(args[0])?;
                let reg = self.vector()?;
                self.encoder.movd_to_vector(reg, half)?;
                self.encoder.half_to_float(reg, reg)?;
                self.store(dst, reg)
            }
            InlineOp::FloatToHalf => {
                let value = self.load(args[0])?;
                let converted = self.vector()?;
                let reg = self.gp()?;
                self.encoder.float_to_half(converted, value)?;
                self.encoder.movd_from_vector(reg, converted)?;
                self.encoder.movsx16(reg)?;
                self.store(dst, reg)
            }
            InlineOp::UnsignedBelow { bits } => {
                let x = self.load(args[0])?;
                let y = self.load(args[1])?;
                self.encoder.cmp_reg_reg(x, y, bits)?;
                self.encoder.set_below(x)?;
                self.store(dst, x)
            }
            InlineOp::FloatMul | InlineOp::FloatDiv => {
                let x = self.load(args[0])?;
                let y = self.load(args[1])?;
                if *op == InlineOp::FloatMul {
                    self.encoder.mulsd(x, y)?;
                } else {
                    self.encoder.divsd(x, y)?;
                }
                self.store(dst, x)
            }
            InlineOp::Sqrt => {
                let x = self.load(args[0])?;
                self.encoder.sqrtsd(x, x)?;
                self.store(dst, x)
            }
        }
    }

    /// Unrolled comparison of `length` elements, widest chunks first.
    fn array_equals(&mut self, kind: ElementKind, length: usize, args: &[X64Value], dst: X64Value) -> IntrinsicResult<()> {
        let a = self.load(args[0])?;
        let offset = self.gp()?;
        self.load_wide(offset, args[1])?;
        self.encoder.add_reg_reg(a, offset)?;
        let b = self.load(args[2])?;
        let offset_b = self.gp()?;
        self.load_wide(offset_b, args[3])?;
        self.encoder.add_reg_reg(b, offset_b)?;
        let x = self.gp()?;
        let y = self.gp()?;

        let mut not_equal = self.encoder.create_label();
        let mut done = self.encoder.create_label();
        let total = length * kind.bytes();
        let mut position = 0;
        for chunk in [8, 4, 2, 1] {
            while total - position >= chunk {
                let disp = i32::try_from(position)
                    .map_err(|_| IntrinsicError::Backend("inline comparison too long".to_string()))?;
                self.encoder.load_bytes(x, a, disp, chunk)?;
                self.encoder.load_bytes(y, b, disp, chunk)?;
                self.encoder.cmp_reg_reg(x, y, 64)?;
                self.encoder.jne(not_equal)?;
                position += chunk;
            }
        }
        self.encoder.mov32_reg_imm(x, 1)?;
        self.encoder.jmp(done)?;
        self.encoder.place_label(&mut not_equal)?;
        self.encoder.mov32_reg_imm(x, 0)?;
        self.encoder.place_label(&mut done)?;
        self.store(dst, x)
    }

    /// Load `value` as a 64-bit integer, sign-extending ints.
    fn load_wide(&mut self, reg: AsmReg, value: X64Value) -> IntrinsicResult<()> {
        if value.kind == ValueKind::Int {
            self.encoder.load_sign_extended(reg, RBP, value.frame_offset())?;
        } else {
            self.encoder.load(reg, value.kind, RBP, value.frame_offset())?;
        }
        Ok(())
    }

    fn call(&mut self, stub: &str, args: &[X64Value], kinds: &[ValueKind], dst: X64Value) -> IntrinsicResult<()> {
        let locations = assign_parameters(kinds);
        let stack_args: Vec<X64Value> = args
            .iter()
            .zip(&locations)
            .filter(|(_, location)| matches!(location, ParamLocation::Stack(_)))
            .map(|(arg, _)| *arg)
            .collect();

        let padding = if stack_args.len() % 2 == 1 { 8 } else { 0 };
        if padding != 0 {
            self.encoder.sub_reg_imm(RSP, padding)?;
        }
        for &arg in stack_args.iter().rev() {
            if arg.kind.is_float() {
                self.encoder.load(R11, ValueKind::Long, RBP, arg.frame_offset())?;
            } else {
                self.load_wide(R11, arg)?;
            }
            self.encoder.push_reg(R11)?;
        }
        for ((&arg, &expected), location) in args.iter().zip(kinds).zip(&locations) {
            if let ParamLocation::Register(reg) = *location {
                self.registers.claim(reg);
                if expected == ValueKind::Long {
                    self.load_wide(reg, arg)?;
                } else {
                    self.encoder.load(reg, arg.kind, RBP, arg.frame_offset())?;
                }
            }
        }

        let label = self.encoder.call_placeholder()?;
        self.calls.push((label, stub.to_string()));

        let cleanup = 8 * stack_args.len() as i32 + padding;
        if cleanup != 0 {
            self.encoder.add_reg_imm(RSP, cleanup)?;
        }
        match dst.kind {
            ValueKind::Void => Ok(()),
            kind if kind.is_float() => self.store(dst, XMM0),
            _ => self.store(dst, RAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_follow_sysv_classes() {
        let signature = [
            ValueKind::Pointer,
            ValueKind::Double,
            ValueKind::Int,
            ValueKind::Long,
            ValueKind::Long,
            ValueKind::Long,
            ValueKind::Long,
            ValueKind::Int,
        ];
        let locations = assign_parameters(&signature);
        assert_eq!(locations[0], ParamLocation::Register(RDI));
        assert_eq!(locations[1], ParamLocation::Register(XMM0));
        assert_eq!(locations[2], ParamLocation::Register(RSI));
        assert_eq!(locations[6], ParamLocation::Register(R9));
        assert_eq!(locations[7], ParamLocation::Stack(16));
    }

    #[test]
    fn rejects_other_architectures() {
        assert!(matches!(
            X64Backend::new(TargetDescription::aarch64(), &[]),
            Err(IntrinsicError::ArchitectureMismatch { .. })
        ));
    }

    #[test]
    fn constant_function_returns_in_rax() {
        let mut backend = X64Backend::new(TargetDescription::amd64(), &[]).unwrap();
        let value = backend.constant(&Constant::Int(7)).unwrap();
        let emitted = backend.emit(Some(value)).unwrap();
        assert!(emitted.relocations.is_empty());
        assert_eq!(emitted.code.last(), Some(&0xC3));
    }
}
