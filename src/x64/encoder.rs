// This module wraps the iced-x86 code assembler with the handful of instruction shapes the
// reference backend emits. X64Encoder converts AsmReg register references into iced registers
// of the requested width and offers frame-slot loads and stores keyed by value kind, the
// bit-manipulation instructions (POPCNT, LZCNT, TZCNT and their BSR/BSF fallbacks, BSWAP),
// F16C half conversions, scalar double arithmetic, byte-granular memory comparison for inline
// array equality, and labels for local control flow. Calls to stubs are emitted as a raw
// CALL rel32 with a zero displacement behind a label; after assembly the label address tells
// the object writer where to place the relocation. Constant array payloads are appended after
// the code as labelled data and addressed RIP-relative.

//! x86-64 instruction encoding using iced-x86.

use iced_x86::code_asm::*;
use iced_x86::BlockEncoderOptions;

use crate::core::error::IntrinsicError;
use crate::core::register_file::{AsmReg, GP_BANK, VECTOR_BANK};
use crate::stubs::ValueKind;

pub const RAX: AsmReg = AsmReg::gp(0);
pub const RCX: AsmReg = AsmReg::gp(1);
pub const RDX: AsmReg = AsmReg::gp(2);
pub const RSP: AsmReg = AsmReg::gp(4);
pub const RBP: AsmReg = AsmReg::gp(5);
pub const RSI: AsmReg = AsmReg::gp(6);
pub const RDI: AsmReg = AsmReg::gp(7);
pub const R8: AsmReg = AsmReg::gp(8);
pub const R9: AsmReg = AsmReg::gp(9);
pub const R10: AsmReg = AsmReg::gp(10);
pub const R11: AsmReg = AsmReg::gp(11);
pub const XMM0: AsmReg = AsmReg::vector(0);

/// Error types for instruction encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// Invalid register for the requested operation.
    InvalidRegister(AsmReg),
    /// Unsupported instruction or operand combination.
    UnsupportedInstruction(&'static str),
    /// Assembly error from iced-x86.
    AssemblyError(String),
}

impl std::fmt::Display for EncodingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodingError::InvalidRegister(reg) => write!(f, "Invalid register for operation: {reg:?}"),
            EncodingError::UnsupportedInstruction(what) => {
                write!(f, "Unsupported instruction or operand combination: {what}")
            }
            EncodingError::AssemblyError(msg) => write!(f, "Assembly error: {msg}"),
        }
    }
}

impl std::error::Error for EncodingError {}

impl From<EncodingError> for IntrinsicError {
    fn from(err: EncodingError) -> Self {
        IntrinsicError::Backend(err.to_string())
    }
}

const GP64_REGS: [AsmRegister64; 16] = [
    rax, rcx, rdx, rbx, rsp, rbp, rsi, rdi, r8, r9, r10, r11, r12, r13, r14, r15,
];

const GP32_REGS: [AsmRegister32; 16] = [
    eax, ecx, edx, ebx, esp, ebp, esi, edi, r8d, r9d, r10d, r11d, r12d, r13d, r14d, r15d,
];

const GP16_REGS: [AsmRegister16; 16] = [
    ax, cx, dx, bx, sp, bp, si, di, r8w, r9w, r10w, r11w, r12w, r13w, r14w, r15w,
];

const GP8_REGS: [AsmRegister8; 16] = [
    al, cl, dl, bl, spl, bpl, sil, dil, r8b, r9b, r10b, r11b, r12b, r13b, r14b, r15b,
];

const XMM_REGS: [AsmRegisterXmm; 16] = [
    xmm0, xmm1, xmm2, xmm3, xmm4, xmm5, xmm6, xmm7, xmm8, xmm9, xmm10, xmm11, xmm12, xmm13, xmm14, xmm15,
];

fn gp64(reg: AsmReg) -> Result<AsmRegister64, EncodingError> {
    if reg.bank != GP_BANK {
        return Err(EncodingError::InvalidRegister(reg));
    }
    GP64_REGS.get(reg.id as usize).copied().ok_or(EncodingError::InvalidRegister(reg))
}

fn gp32(reg: AsmReg) -> Result<AsmRegister32, EncodingError> {
    if reg.bank != GP_BANK {
        return Err(EncodingError::InvalidRegister(reg));
    }
    GP32_REGS.get(reg.id as usize).copied().ok_or(EncodingError::InvalidRegister(reg))
}

fn gp16(reg: AsmReg) -> Result<AsmRegister16, EncodingError> {
    if reg.bank != GP_BANK {
        return Err(EncodingError::InvalidRegister(reg));
    }
    GP16_REGS.get(reg.id as usize).copied().ok_or(EncodingError::InvalidRegister(reg))
}

fn gp8(reg: AsmReg) -> Result<AsmRegister8, EncodingError> {
    if reg.bank != GP_BANK {
        return Err(EncodingError::InvalidRegister(reg));
    }
    GP8_REGS.get(reg.id as usize).copied().ok_or(EncodingError::InvalidRegister(reg))
}

fn xmm(reg: AsmReg) -> Result<AsmRegisterXmm, EncodingError> {
    if reg.bank != VECTOR_BANK {
        return Err(EncodingError::InvalidRegister(reg));
    }
    XMM_REGS.get(reg.id as usize).copied().ok_or(EncodingError::InvalidRegister(reg))
}

/// Assembled code plus the resolved addresses of requested labels.
#[derive(Debug, Clone)]
pub struct AssembledCode {
    pub code: Vec<u8>,
    pub label_offsets: Vec<u64>,
}

/// x86-64 instruction encoder using iced-x86.
pub struct X64Encoder {
    assembler: CodeAssembler,
}

impl X64Encoder {
    pub fn new() -> Result<Self, EncodingError> {
        let assembler = CodeAssembler::new(64).map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(Self { assembler })
    }

    // ==== FRAME ====

    /// push rbp; mov rbp, rsp; sub rsp, frame_size
    pub fn emit_prologue(&mut self, frame_size: u32) -> Result<(), EncodingError> {
        self.push_reg(RBP)?;
        self.mov_reg_reg(RBP, RSP)?;
        if frame_size > 0 {
            self.sub_reg_imm(RSP, frame_size as i32)?;
        }
        Ok(())
    }

    /// mov rsp, rbp; pop rbp; ret
    pub fn emit_epilogue(&mut self) -> Result<(), EncodingError> {
        self.mov_reg_reg(RSP, RBP)?;
        self.pop_reg(RBP)?;
        self.assembler
            .ret()
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    pub fn push_reg(&mut self, reg: AsmReg) -> Result<(), EncodingError> {
        let reg = gp64(reg)?;
        self.assembler
            .push(reg)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    pub fn pop_reg(&mut self, reg: AsmReg) -> Result<(), EncodingError> {
        let reg = gp64(reg)?;
        self.assembler
            .pop(reg)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    pub fn mov_reg_reg(&mut self, dst: AsmReg, src: AsmReg) -> Result<(), EncodingError> {
        let dst = gp64(dst)?;
        let src = gp64(src)?;
        self.assembler
            .mov(dst, src)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    pub fn sub_reg_imm(&mut self, dst: AsmReg, imm: i32) -> Result<(), EncodingError> {
        let dst = gp64(dst)?;
        self.assembler
            .sub(dst, imm)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    pub fn add_reg_imm(&mut self, dst: AsmReg, imm: i32) -> Result<(), EncodingError> {
        let dst = gp64(dst)?;
        self.assembler
            .add(dst, imm)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    pub fn add_reg_reg(&mut self, dst: AsmReg, src: AsmReg) -> Result<(), EncodingError> {
        let dst = gp64(dst)?;
        let src = gp64(src)?;
        self.assembler
            .add(dst, src)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    // ==== VALUE MOVES ====

    /// Load a `kind` value from `[base + offset]`. Ints zero-extend into the full register.
    pub fn load(&mut self, dst: AsmReg, kind: ValueKind, base: AsmReg, offset: i32) -> Result<(), EncodingError> {
        let base = gp64(base)?;
        let result = match kind {
            ValueKind::Int => self.assembler.mov(gp32(dst)?, dword_ptr(base + offset)),
            ValueKind::Long | ValueKind::Pointer => self.assembler.mov(gp64(dst)?, qword_ptr(base + offset)),
            ValueKind::Float => self.assembler.movd(xmm(dst)?, dword_ptr(base + offset)),
            ValueKind::Double => self.assembler.movq(xmm(dst)?, qword_ptr(base + offset)),
            ValueKind::Void => return Err(EncodingError::UnsupportedInstruction("load of void")),
        };
        result.map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    /// Store a `kind` value to `[base + offset]`.
    pub fn store(&mut self, base: AsmReg, offset: i32, kind: ValueKind, src: AsmReg) -> Result<(), EncodingError> {
        let base = gp64(base)?;
        let result = match kind {
            ValueKind::Int => self.assembler.mov(dword_ptr(base + offset), gp32(src)?),
            ValueKind::Long | ValueKind::Pointer => self.assembler.mov(qword_ptr(base + offset), gp64(src)?),
            ValueKind::Float => self.assembler.movd(dword_ptr(base + offset), xmm(src)?),
            ValueKind::Double => self.assembler.movq(qword_ptr(base + offset), xmm(src)?),
            ValueKind::Void => return Err(EncodingError::UnsupportedInstruction("store of void")),
        };
        result.map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    /// movsxd dst64, dword [base + offset]
    pub fn load_sign_extended(&mut self, dst: AsmReg, base: AsmReg, offset: i32) -> Result<(), EncodingError> {
        let base = gp64(base)?;
        self.assembler
            .movsxd(gp64(dst)?, dword_ptr(base + offset))
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    pub fn mov_reg_imm(&mut self, dst: AsmReg, imm: i64) -> Result<(), EncodingError> {
        let dst = gp64(dst)?;
        self.assembler
            .mov(dst, imm)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    pub fn mov32_reg_imm(&mut self, dst: AsmReg, imm: i32) -> Result<(), EncodingError> {
        let dst = gp32(dst)?;
        self.assembler
            .mov(dst, imm)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    /// Zero-extending load of `size` bytes from `[base + offset]`.
    pub fn load_bytes(&mut self, dst: AsmReg, base: AsmReg, offset: i32, size: usize) -> Result<(), EncodingError> {
        let base = gp64(base)?;
        let result = match size {
            1 => self.assembler.movzx(gp32(dst)?, byte_ptr(base + offset)),
            2 => self.assembler.movzx(gp32(dst)?, word_ptr(base + offset)),
            4 => self.assembler.mov(gp32(dst)?, dword_ptr(base + offset)),
            8 => self.assembler.mov(gp64(dst)?, qword_ptr(base + offset)),
            _ => return Err(EncodingError::UnsupportedInstruction("load size")),
        };
        result.map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    // ==== INTEGER OPERATIONS ====

    pub fn cmp_reg_reg(&mut self, left: AsmReg, right: AsmReg, bits: u32) -> Result<(), EncodingError> {
        let result = match bits {
            32 => self.assembler.cmp(gp32(left)?, gp32(right)?),
            _ => self.assembler.cmp(gp64(left)?, gp64(right)?),
        };
        result.map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    /// setb dst8; movzx dst32, dst8
    pub fn set_below(&mut self, dst: AsmReg) -> Result<(), EncodingError> {
        self.assembler
            .setb(gp8(dst)?)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        self.assembler
            .movzx(gp32(dst)?, gp8(dst)?)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    pub fn xor32_reg_imm(&mut self, dst: AsmReg, imm: i32) -> Result<(), EncodingError> {
        self.assembler
            .xor(gp32(dst)?, imm)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    pub fn popcnt(&mut self, dst: AsmReg, src: AsmReg, bits: u32) -> Result<(), EncodingError> {
        let result = match bits {
            32 => self.assembler.popcnt(gp32(dst)?, gp32(src)?),
            _ => self.assembler.popcnt(gp64(dst)?, gp64(src)?),
        };
        result.map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    pub fn lzcnt(&mut self, dst: AsmReg, src: AsmReg, bits: u32) -> Result<(), EncodingError> {
        let result = match bits {
            32 => self.assembler.lzcnt(gp32(dst)?, gp32(src)?),
            _ => self.assembler.lzcnt(gp64(dst)?, gp64(src)?),
        };
        result.map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    pub fn tzcnt(&mut self, dst: AsmReg, src: AsmReg, bits: u32) -> Result<(), EncodingError> {
        let result = match bits {
            32 => self.assembler.tzcnt(gp32(dst)?, gp32(src)?),
            _ => self.assembler.tzcnt(gp64(dst)?, gp64(src)?),
        };
        result.map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    /// Bit scan reverse; ZF is set when `src` is zero and `dst` is then undefined.
    pub fn bsr(&mut self, dst: AsmReg, src: AsmReg, bits: u32) -> Result<(), EncodingError> {
        let result = match bits {
            32 => self.assembler.bsr(gp32(dst)?, gp32(src)?),
            _ => self.assembler.bsr(gp64(dst)?, gp64(src)?),
        };
        result.map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    /// Bit scan forward; ZF is set when `src` is zero and `dst` is then undefined.
    pub fn bsf(&mut self, dst: AsmReg, src: AsmReg, bits: u32) -> Result<(), EncodingError> {
        let result = match bits {
            32 => self.assembler.bsf(gp32(dst)?, gp32(src)?),
            _ => self.assembler.bsf(gp64(dst)?, gp64(src)?),
        };
        result.map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    pub fn bswap(&mut self, reg: AsmReg, bits: u32) -> Result<(), EncodingError> {
        let result = match bits {
            32 => self.assembler.bswap(gp32(reg)?),
            _ => self.assembler.bswap(gp64(reg)?),
        };
        result.map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    /// Sign-extend the low 16 bits of `reg` into its 32-bit form.
    pub fn movsx16(&mut self, reg: AsmReg) -> Result<(), EncodingError> {
        self.assembler
            .movsx(gp32(reg)?, gp16(reg)?)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    // ==== FLOATING POINT ====

    pub fn movd_to_vector(&mut self, dst: AsmReg, src: AsmReg) -> Result<(), EncodingError> {
        self.assembler
            .movd(xmm(dst)?, gp32(src)?)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    pub fn movd_from_vector(&mut self, dst: AsmReg, src: AsmReg) -> Result<(), EncodingError> {
        self.assembler
            .movd(gp32(dst)?, xmm(src)?)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    pub fn half_to_float(&mut self, dst: AsmReg, src: AsmReg) -> Result<(), EncodingError> {
        self.assembler
            .vcvtph2ps(xmm(dst)?, xmm(src)?)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    /// Round to nearest-even regardless of MXCSR.
    pub fn float_to_half(&mut self, dst: AsmReg, src: AsmReg) -> Result<(), EncodingError> {
        self.assembler
            .vcvtps2ph(xmm(dst)?, xmm(src)?, 0)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    pub fn mulsd(&mut self, dst: AsmReg, src: AsmReg) -> Result<(), EncodingError> {
        self.assembler
            .mulsd(xmm(dst)?, xmm(src)?)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    pub fn divsd(&mut self, dst: AsmReg, src: AsmReg) -> Result<(), EncodingError> {
        self.assembler
            .divsd(xmm(dst)?, xmm(src)?)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    pub fn sqrtsd(&mut self, dst: AsmReg, src: AsmReg) -> Result<(), EncodingError> {
        self.assembler
            .sqrtsd(xmm(dst)?, xmm(src)?)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    // ==== LABELS AND CONTROL FLOW ====

    pub fn create_label(&mut self) -> CodeLabel {
        self.assembler.create_label()
    }

    /// Bind `label` to the next emitted instruction.
    pub fn place_label(&mut self, label: &mut CodeLabel) -> Result<(), EncodingError> {
        self.assembler
            .set_label(label)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    pub fn jmp(&mut self, label: CodeLabel) -> Result<(), EncodingError> {
        self.assembler
            .jmp(label)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    pub fn je(&mut self, label: CodeLabel) -> Result<(), EncodingError> {
        self.assembler
            .je(label)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    pub fn jne(&mut self, label: CodeLabel) -> Result<(), EncodingError> {
        self.assembler
            .jne(label)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    /// `call rel32` with a zero displacement, to be patched by a relocation
    /// at the returned label's address plus one.
    pub fn call_placeholder(&mut self) -> Result<CodeLabel, EncodingError> {
        let mut label = self.assembler.create_label();
        self.place_label(&mut label)?;
        self.assembler
            .db(&[0xE8, 0, 0, 0, 0])
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(label)
    }

    /// Append raw data bytes. Empty data still emits one byte so a preceding label has a target.
    pub fn bytes(&mut self, bytes: &[u8]) -> Result<(), EncodingError> {
        let bytes = if bytes.is_empty() { &[0u8][..] } else { bytes };
        self.assembler
            .db(bytes)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    /// Load the address of a data label.
    pub fn lea_label(&mut self, dst: AsmReg, label: CodeLabel) -> Result<(), EncodingError> {
        self.assembler
            .lea(gp64(dst)?, ptr(label))
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(())
    }

    /// Assemble at address 0 and resolve `labels` to code offsets.
    pub fn finalize(mut self, labels: &[CodeLabel]) -> Result<AssembledCode, EncodingError> {
        let result = self
            .assembler
            .assemble_options(0, BlockEncoderOptions::RETURN_NEW_INSTRUCTION_OFFSETS)
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        let label_offsets = labels
            .iter()
            .map(|label| result.label_ip(label))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| EncodingError::AssemblyError(e.to_string()))?;
        Ok(AssembledCode {
            code: result.inner.code_buffer,
            label_offsets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prologue_and_epilogue_encode() {
        let mut encoder = X64Encoder::new().unwrap();
        encoder.emit_prologue(16).unwrap();
        encoder.emit_epilogue().unwrap();
        let assembled = encoder.finalize(&[]).unwrap();
        // push rbp
        assert_eq!(assembled.code[0], 0x55);
        // ret
        assert_eq!(assembled.code.last(), Some(&0xC3));
    }

    #[test]
    fn call_placeholder_is_resolved() {
        let mut encoder = X64Encoder::new().unwrap();
        encoder.push_reg(RBP).unwrap();
        let call = encoder.call_placeholder().unwrap();
        encoder.pop_reg(RBP).unwrap();
        let assembled = encoder.finalize(&[call]).unwrap();
        assert_eq!(assembled.label_offsets, vec![1]);
        assert_eq!(&assembled.code[1..6], &[0xE8, 0, 0, 0, 0]);
    }

    #[test]
    fn wrong_bank_is_rejected() {
        let mut encoder = X64Encoder::new().unwrap();
        assert_eq!(
            encoder.popcnt(XMM0, RAX, 32),
            Err(EncodingError::InvalidRegister(XMM0))
        );
    }
}
