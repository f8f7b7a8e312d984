//! The target model: facts about the probed toolchain/target, populated in
//! dependency order by the early analyzers and read by the later ones.
//!
//! Register *names* are declared up front per architecture; everything else
//! (type details, register sizes, the argument-register sequence, the number
//! of banks in use) is discovered, and reads of a fact that has not been
//! discovered yet fail with `ProbeError::MissingFact` so the dependent probe
//! is reported as skipped instead of guessing.

use indexmap::IndexMap;

use crate::error::ProbeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeDetails {
    pub signed: bool,
    pub size: usize,
    pub align: usize,
}

const RISCV_BANK0: &[&str] = &[
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

const RISCV_BANK1: &[&str] = &[
    "ft0", "ft1", "ft2", "ft3", "ft4", "ft5", "ft6", "ft7", "fs0", "fs1", "fa0", "fa1", "fa2",
    "fa3", "fa4", "fa5", "fa6", "fa7", "fs2", "fs3", "fs4", "fs5", "fs6", "fs7", "fs8", "fs9",
    "fs10", "fs11", "ft8", "ft9", "ft10", "ft11",
];

pub struct Target {
    banks: Vec<(&'static str, &'static [&'static str])>,
    type_details: IndexMap<String, TypeDetails>,
    register_sizes: IndexMap<String, usize>,
    argument_registers: Option<Vec<String>>,
    register_bank_count: Option<usize>,
}

impl Target {
    pub fn riscv() -> Self {
        Self {
            banks: vec![("regs_bank0", RISCV_BANK0), ("regs_bank1", RISCV_BANK1)],
            type_details: IndexMap::new(),
            register_sizes: IndexMap::new(),
            argument_registers: None,
            register_bank_count: None,
        }
    }

    /// Register names for a dump bank id, positionally matching the values
    /// the dump helper prints for that bank. Unknown banks yield an empty
    /// slice, which makes every search in them come up empty.
    pub fn bank_registers(&self, bank_id: &str) -> &'static [&'static str] {
        self.banks
            .iter()
            .find(|(id, _)| *id == bank_id)
            .map(|(_, regs)| *regs)
            .unwrap_or(&[])
    }

    /// Every declared register name across all banks, in bank order. This is
    /// the clobber list for the saved-registers probe.
    pub fn all_register_names(&self) -> Vec<&'static str> {
        self.banks.iter().flat_map(|(_, regs)| regs.iter().copied()).collect()
    }

    pub fn set_type_details(&mut self, details: IndexMap<String, TypeDetails>) {
        self.type_details = details;
    }

    pub fn type_details(&self, name: &str) -> Result<&TypeDetails, ProbeError> {
        self.type_details.get(name).ok_or(ProbeError::MissingFact("type details"))
    }

    pub fn type_size(&self, name: &str) -> Result<usize, ProbeError> {
        Ok(self.type_details(name)?.size)
    }

    /// The reference width used to decide between fill, pair-split and
    /// pack-combined matching.
    pub fn int_width(&self) -> Result<usize, ProbeError> {
        self.type_size("int")
    }

    pub fn set_register_size(&mut self, bank_id: &str, size: usize) {
        self.register_sizes.insert(bank_id.to_string(), size);
    }

    pub fn register_size(&self, bank_id: &str) -> Result<usize, ProbeError> {
        self.register_sizes
            .get(bank_id)
            .copied()
            .ok_or(ProbeError::MissingFact("register size"))
    }

    pub fn set_argument_registers(&mut self, registers: Vec<String>) {
        self.argument_registers = Some(registers);
    }

    pub fn argument_registers(&self) -> Result<&[String], ProbeError> {
        self.argument_registers
            .as_deref()
            .ok_or(ProbeError::MissingFact("argument registers"))
    }

    pub fn set_register_bank_count(&mut self, count: usize) {
        self.register_bank_count = Some(count);
    }

    pub fn register_bank_count(&self) -> Option<usize> {
        self.register_bank_count
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn facts_are_absent_until_discovered() {
        let mut target = Target::riscv();
        assert!(target.argument_registers().is_err());
        assert!(target.int_width().is_err());

        let mut details = IndexMap::new();
        details.insert("int".to_string(), TypeDetails { signed: true, size: 4, align: 4 });
        target.set_type_details(details);
        assert_eq!(target.int_width().unwrap(), 4);

        target.set_argument_registers(vec!["a0".into(), "a1".into()]);
        assert_eq!(target.argument_registers().unwrap().len(), 2);
    }

    #[test]
    fn bank_lookup_is_positional() {
        let target = Target::riscv();
        assert_eq!(target.bank_registers("regs_bank0")[10], "a0");
        assert_eq!(target.bank_registers("regs_bank1")[10], "fa0");
        assert!(target.bank_registers("regs_bank7").is_empty());
        assert_eq!(target.all_register_names().len(), 64);
    }
}
