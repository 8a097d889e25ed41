//! Scratch register tracking for the emission backends.
//!
//! Values of a lowered graph live in frame slots; registers only hold them
//! for the duration of one emitted operation. The register file hands out
//! scratch registers per bank with a clock so consecutive operations rotate
//! through the allocatable set, and remembers every register it ever handed
//! out so the backend can check what the emitted code clobbers.

use thiserror::Error;

/// Maximum number of register banks supported (GP, vector).
pub const MAX_REGISTER_BANKS: usize = 2;

/// Type for register bank indices.
pub type RegBank = u8;

/// Type for register IDs within a bank.
pub type RegId = u8;

pub const GP_BANK: RegBank = 0;
pub const VECTOR_BANK: RegBank = 1;

/// Combined register identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AsmReg {
    pub bank: RegBank,
    pub id: RegId,
}

impl AsmReg {
    pub const fn gp(id: RegId) -> Self {
        Self { bank: GP_BANK, id }
    }

    pub const fn vector(id: RegId) -> Self {
        Self { bank: VECTOR_BANK, id }
    }
}

/// Bit set for efficiently tracking register sets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegBitSet {
    banks: [u64; MAX_REGISTER_BANKS],
}

impl RegBitSet {
    pub const fn new() -> Self {
        Self {
            banks: [0; MAX_REGISTER_BANKS],
        }
    }

    pub fn of(regs: &[AsmReg]) -> Self {
        let mut set = Self::new();
        for &reg in regs {
            set.set(reg);
        }
        set
    }

    pub fn contains(&self, reg: AsmReg) -> bool {
        (reg.bank as usize) < MAX_REGISTER_BANKS && reg.id < 64 && self.banks[reg.bank as usize] & (1u64 << reg.id) != 0
    }

    pub fn set(&mut self, reg: AsmReg) {
        if (reg.bank as usize) < MAX_REGISTER_BANKS && reg.id < 64 {
            self.banks[reg.bank as usize] |= 1u64 << reg.id;
        }
    }

    pub fn clear(&mut self, reg: AsmReg) {
        if (reg.bank as usize) < MAX_REGISTER_BANKS && reg.id < 64 {
            self.banks[reg.bank as usize] &= !(1u64 << reg.id);
        }
    }

    pub fn union(&mut self, other: &RegBitSet) {
        for (bank, other) in self.banks.iter_mut().zip(other.banks) {
            *bank |= other;
        }
    }

    pub fn intersects(&self, other: &RegBitSet) -> bool {
        self.banks.iter().zip(other.banks).any(|(a, b)| a & b != 0)
    }

    pub fn count_in_bank(&self, bank: RegBank) -> u32 {
        self.banks.get(bank as usize).map_or(0, |bits| bits.count_ones())
    }

    pub fn iter(&self) -> impl Iterator<Item = AsmReg> + '_ {
        self.banks.iter().enumerate().flat_map(|(bank, &bits)| {
            (0..64u8)
                .filter(move |id| bits & (1u64 << id) != 0)
                .map(move |id| AsmReg { bank: bank as RegBank, id })
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegAllocError {
    #[error("no scratch register available in bank {0}")]
    NoRegistersAvailable(RegBank),
    #[error("register {0:?} is not allocated")]
    RegisterNotAllocated(AsmReg),
}

/// Scratch register allocator for one emitted function.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    regs_per_bank: u8,
    allocatable: RegBitSet,
    used: RegBitSet,
    clobbered: RegBitSet,
    clocks: [RegId; MAX_REGISTER_BANKS],
}

impl RegisterFile {
    pub fn new(regs_per_bank: u8, allocatable: RegBitSet) -> Self {
        Self {
            regs_per_bank: regs_per_bank.min(64),
            allocatable,
            used: RegBitSet::new(),
            clobbered: RegBitSet::new(),
            clocks: [0; MAX_REGISTER_BANKS],
        }
    }

    /// Allocate a free register of `bank`, starting the search at the bank's clock.
    pub fn allocate_reg(&mut self, bank: RegBank, exclude: &RegBitSet) -> Result<AsmReg, RegAllocError> {
        let clock = self
            .clocks
            .get_mut(bank as usize)
            .ok_or(RegAllocError::NoRegistersAvailable(bank))?;
        for step in 0..self.regs_per_bank {
            let reg = AsmReg {
                bank,
                id: (*clock + step) % self.regs_per_bank,
            };
            if self.allocatable.contains(reg) && !self.used.contains(reg) && !exclude.contains(reg) {
                *clock = (reg.id + 1) % self.regs_per_bank;
                self.used.set(reg);
                self.clobbered.set(reg);
                return Ok(reg);
            }
        }
        Err(RegAllocError::NoRegistersAvailable(bank))
    }

    /// Claim a specific register, e.g. an argument or result register.
    pub fn claim(&mut self, reg: AsmReg) {
        self.used.set(reg);
        self.clobbered.set(reg);
    }

    pub fn free_register(&mut self, reg: AsmReg) -> Result<(), RegAllocError> {
        if !self.used.contains(reg) {
            return Err(RegAllocError::RegisterNotAllocated(reg));
        }
        self.used.clear(reg);
        Ok(())
    }

    /// Release every scratch register at the end of an operation.
    pub fn release_all(&mut self) {
        self.used = RegBitSet::new();
    }

    pub fn is_allocated(&self, reg: AsmReg) -> bool {
        self.used.contains(reg)
    }

    /// Every register handed out since creation.
    pub fn clobbered(&self) -> RegBitSet {
        self.clobbered
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_regfile() -> RegisterFile {
        let allocatable = RegBitSet::of(&[AsmReg::gp(0), AsmReg::gp(1), AsmReg::gp(2), AsmReg::vector(0)]);
        RegisterFile::new(16, allocatable)
    }

    #[test]
    fn test_regbitset_operations() {
        let mut set = RegBitSet::new();
        let reg = AsmReg::gp(5);
        assert!(!set.contains(reg));
        set.set(reg);
        assert!(set.contains(reg));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![reg]);
        set.clear(reg);
        assert!(!set.contains(reg));
    }

    #[test]
    fn test_clock_rotates_through_bank() {
        let mut regfile = create_test_regfile();
        let none = RegBitSet::new();
        let first = regfile.allocate_reg(GP_BANK, &none).unwrap();
        regfile.release_all();
        let second = regfile.allocate_reg(GP_BANK, &none).unwrap();
        assert_ne!(first, second);
        assert_eq!(regfile.clobbered().count_in_bank(GP_BANK), 2);
    }

    #[test]
    fn test_exhaustion_and_exclusion() {
        let mut regfile = create_test_regfile();
        let exclude = RegBitSet::of(&[AsmReg::gp(1)]);
        let a = regfile.allocate_reg(GP_BANK, &exclude).unwrap();
        let b = regfile.allocate_reg(GP_BANK, &exclude).unwrap();
        assert!(!exclude.contains(a) && !exclude.contains(b));
        assert_eq!(
            regfile.allocate_reg(GP_BANK, &exclude),
            Err(RegAllocError::NoRegistersAvailable(GP_BANK))
        );
        regfile.free_register(a).unwrap();
        assert!(!regfile.is_allocated(a));
        assert!(regfile.free_register(a).is_err());
    }
}
