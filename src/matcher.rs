//! The matching engine: locates sentinels in parsed register banks and in
//! the stack window.
//!
//! Four placement shapes are recognized:
//!  - *fill*: the whole sentinel sits in one register or stack slot,
//!    possibly zero- or ones-extended to the slot width;
//!  - *pair split*: a wider-than-int sentinel is split at its midpoint
//!    across two adjacent registers;
//!  - *pack combined*: several narrower-than-int sentinels are concatenated
//!    little-endian into one int-wide chunk;
//!  - *by reference*: the sentinel sequence sits in the stack at an address
//!    held by the first argument register.
//!
//! Every search also reports inconsistencies: the same sentinel appearing in
//! more than one location usually means the compiler materialized an
//! intermediate copy that cannot be told apart from the ABI-placed one, so
//! it is surfaced as a warning rather than a failure.

use std::fmt;

use indexmap::IndexMap;

use crate::dump::{Banks, StackEntry};
use crate::hex::HexValue;
use crate::target::Target;

pub type RegisterAssignments = IndexMap<String, HexValue>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inconsistency {
    /// One sentinel matched several registers.
    Registers(Vec<String>),
    /// One sentinel matched both a register and a stack slot.
    RegisterAndStack(String),
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inconsistency::Registers(regs) => write!(f, "({})", regs.join(", ")),
            Inconsistency::RegisterAndStack(reg) => write!(f, "({reg}, [stack])"),
        }
    }
}

#[derive(Debug, Default)]
pub struct Matches {
    pub registers: RegisterAssignments,
    pub inconsistencies: Vec<Inconsistency>,
}

/// Which half of a split value lands in the lower-numbered register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairOrder {
    HighLow,
    LowHigh,
}

impl fmt::Display for PairOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairOrder::HighLow => write!(f, "[high, low]"),
            PairOrder::LowHigh => write!(f, "[low, high]"),
        }
    }
}

/// A struct argument located behind a pointer: the stack address that holds
/// the value sequence was found in the first argument register.
#[derive(Debug, Clone)]
pub struct ByRef {
    pub register: String,
    pub address: HexValue,
}

/// Locates each sentinel whole in a single register, under zero- or
/// ones-extension to the register's printed width.
pub fn find_registers_fill(argv: &[HexValue], banks: &Banks, target: &Target) -> Matches {
    let mut matches = Matches::default();
    for value in argv {
        let mut found = Vec::new();
        for (bank_id, values) in banks {
            let names = target.bank_registers(bank_id);
            for (index, observed) in values.iter().enumerate() {
                let Some(name) = names.get(index) else { continue };
                if value.matches_observed(observed) {
                    found.push(name.to_string());
                    matches.registers.insert(name.to_string(), value.clone());
                }
            }
        }
        if found.len() > 1 {
            matches.inconsistencies.push(Inconsistency::Registers(found));
        }
    }
    matches
}

/// Locates the halves of each wider-than-int sentinel in registers, and
/// derives the pair order from the first two adjacent matches.
pub fn find_registers_pairs(
    argv: &[HexValue],
    banks: &Banks,
    target: &Target,
    int_width: usize,
) -> (Matches, Option<PairOrder>) {
    let mut matches = Matches::default();
    let mut order = None;
    for value in argv {
        if value.width() <= int_width {
            continue;
        }
        let (high, low) = value.split_halves();
        let mut found = Vec::new();
        for (bank_id, values) in banks {
            let names = target.bank_registers(bank_id);
            for (index, observed) in values.iter().enumerate() {
                let Some(name) = names.get(index) else { continue };
                if order.is_none() {
                    if let Some(next) = values.get(index + 1) {
                        if *observed == high && *next == low {
                            order = Some(PairOrder::HighLow);
                        } else if *observed == low && *next == high {
                            order = Some(PairOrder::LowHigh);
                        }
                    }
                }
                if *observed == high {
                    found.push(name.to_string());
                    matches.registers.insert(name.to_string(), high.clone());
                } else if *observed == low {
                    found.push(name.to_string());
                    matches.registers.insert(name.to_string(), low.clone());
                }
            }
        }
        if found.len() > 1 {
            matches.inconsistencies.push(Inconsistency::Registers(found));
        }
    }
    (matches, order)
}

/// Greedily packs consecutive narrower-than-int sentinels into int-wide
/// chunks, little-endian, never overshooting the chunk width. A `char`
/// immediately followed by a `short` is padded out to a two-byte slot first,
/// because the short's alignment forces that layout in the packed struct.
fn pack_chunks(argv: &[HexValue], int_width: usize) -> Vec<HexValue> {
    let mut chunks = Vec::new();
    let mut index = 0;
    while index < argv.len() {
        if argv[index].width() >= int_width {
            index += 1;
            continue;
        }
        let mut parts: Vec<HexValue> = Vec::new();
        let mut total = 0;
        while index < argv.len() {
            let width = argv[index].width();
            if width >= int_width || (!parts.is_empty() && total + width > int_width) {
                break;
            }
            parts.push(argv[index].clone());
            total += width;
            index += 1;
        }
        if parts.len() == 2 && parts[0].width() == 1 && parts[1].width() == 2 {
            parts[0] = parts[0].zero_extended(2);
        }
        chunks.push(HexValue::combine_little_endian(&parts));
    }
    chunks
}

/// Locates packed chunks of narrower-than-int sentinels in registers.
pub fn find_registers_combined(
    argv: &[HexValue],
    banks: &Banks,
    target: &Target,
    int_width: usize,
) -> Matches {
    let mut matches = Matches::default();
    for chunk in pack_chunks(argv, int_width) {
        let mut found = Vec::new();
        for (bank_id, values) in banks {
            let names = target.bank_registers(bank_id);
            for (index, observed) in values.iter().enumerate() {
                let Some(name) = names.get(index) else { continue };
                if *observed == chunk {
                    found.push(name.to_string());
                    matches.registers.insert(name.to_string(), chunk.clone());
                }
            }
        }
        if found.len() > 1 {
            matches.inconsistencies.push(Inconsistency::Registers(found));
        }
    }
    matches
}

/// Locates the most recently passed sentinel whole in the stack window.
/// Registers already claimed for the same sentinel are reported as
/// inconsistencies, not failures.
pub fn find_value_in_stack(
    argv: &[HexValue],
    stack: &[StackEntry],
    claimed: &RegisterAssignments,
) -> (Vec<HexValue>, Vec<Inconsistency>) {
    let mut addresses = Vec::new();
    let mut inconsistencies = Vec::new();
    let Some(value) = argv.last() else {
        return (addresses, inconsistencies);
    };
    for entry in stack {
        if value.matches_observed(&entry.value) {
            for (name, held) in claimed {
                if held == value {
                    inconsistencies.push(Inconsistency::RegisterAndStack(name.clone()));
                }
            }
            addresses.push(entry.address.clone());
        }
    }
    (addresses, inconsistencies)
}

/// The pair-split analog of [`find_value_in_stack`]. Values no wider than
/// the int width are never split, so they produce no matches here.
pub fn find_value_pairs_in_stack(
    argv: &[HexValue],
    stack: &[StackEntry],
    claimed: &RegisterAssignments,
    int_width: usize,
) -> (Vec<HexValue>, Vec<Inconsistency>) {
    let mut addresses = Vec::new();
    let mut inconsistencies = Vec::new();
    let Some(value) = argv.last() else {
        return (addresses, inconsistencies);
    };
    if value.width() <= int_width {
        return (addresses, inconsistencies);
    }
    let (high, low) = value.split_halves();
    for entry in stack {
        if entry.value == high || entry.value == low {
            for (name, held) in claimed {
                if *held == entry.value {
                    inconsistencies.push(Inconsistency::RegisterAndStack(name.clone()));
                }
            }
            addresses.push(entry.address.clone());
        }
    }
    (addresses, inconsistencies)
}

fn register_value_map(banks: &Banks, target: &Target) -> IndexMap<&'static str, HexValue> {
    let mut map = IndexMap::new();
    for (bank_id, values) in banks {
        let names = target.bank_registers(bank_id);
        for (index, value) in values.iter().enumerate() {
            if let Some(name) = names.get(index) {
                map.insert(*name, value.clone());
            }
        }
    }
    map
}

/// Only the first argument register is considered as the pointer carrier:
/// the compiler has been observed staging the struct through other argument
/// registers while building it, so matching any of them would false-positive.
fn by_ref_at<'a>(
    argument_registers: &'a [String],
    register_values: &IndexMap<&'static str, HexValue>,
    entry: &StackEntry,
) -> Option<&'a String> {
    let first = argument_registers.first()?;
    let held = register_values.get(first.as_str())?;
    (*held == entry.address).then_some(first)
}

/// By-reference discriminator for register-width members: the referenced
/// slot must hold the first sentinel verbatim.
pub fn find_ref_in_stack_fill(
    argv: &[HexValue],
    banks: &Banks,
    stack: &[StackEntry],
    target: &Target,
    argument_registers: &[String],
) -> Option<ByRef> {
    let register_values = register_value_map(banks, target);
    let first_value = argv.first()?;
    for entry in stack {
        if let Some(register) = by_ref_at(argument_registers, &register_values, entry) {
            if entry.value == *first_value {
                return Some(ByRef { register: register.clone(), address: entry.address.clone() });
            }
        }
    }
    None
}

/// By-reference discriminator for wider-than-int members: the referenced
/// slot holds one half of the split value.
pub fn find_ref_in_stack_pairs(
    argv: &[HexValue],
    banks: &Banks,
    stack: &[StackEntry],
    target: &Target,
    argument_registers: &[String],
    int_width: usize,
) -> Option<ByRef> {
    let register_values = register_value_map(banks, target);
    for value in argv {
        if value.width() <= int_width {
            continue;
        }
        let (high, low) = value.split_halves();
        for entry in stack {
            if let Some(register) = by_ref_at(argument_registers, &register_values, entry) {
                if entry.value == high || entry.value == low {
                    return Some(ByRef {
                        register: register.clone(),
                        address: entry.address.clone(),
                    });
                }
            }
        }
    }
    None
}

/// By-reference discriminator for packed narrow members: the referenced
/// slot holds a packed chunk.
pub fn find_ref_in_stack_combined(
    argv: &[HexValue],
    banks: &Banks,
    stack: &[StackEntry],
    target: &Target,
    argument_registers: &[String],
    int_width: usize,
) -> Option<ByRef> {
    let register_values = register_value_map(banks, target);
    for chunk in pack_chunks(argv, int_width) {
        for entry in stack {
            if let Some(register) = by_ref_at(argument_registers, &register_values, entry) {
                if entry.value == chunk {
                    return Some(ByRef {
                        register: register.clone(),
                        address: entry.address.clone(),
                    });
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod test {
    use super::*;

    fn hex(s: &str) -> HexValue {
        HexValue::parse(s).unwrap()
    }

    /// Builds a two-bank dump with the given values placed at register
    /// indices; everything else is zero (bank1 slots are NaN-box patterns).
    fn banks(gprs: &[(usize, &str)], fprs: &[(usize, &str)]) -> Banks {
        let mut bank0 = vec![hex("0x0"); 32];
        for (index, value) in gprs {
            bank0[*index] = hex(value);
        }
        let mut bank1 = vec![hex("0xffffffff00000000"); 32];
        for (index, value) in fprs {
            bank1[*index] = hex(value);
        }
        let mut banks = Banks::default();
        banks.insert("regs_bank0".to_string(), bank0);
        banks.insert("regs_bank1".to_string(), bank1);
        banks
    }

    fn stack(entries: &[(&str, &str)]) -> Vec<StackEntry> {
        entries
            .iter()
            .map(|(address, value)| StackEntry { address: hex(address), value: hex(value) })
            .collect()
    }

    #[test]
    fn empty_argv_matches_nothing() {
        let target = Target::riscv();
        let banks = banks(&[(10, "0x12345678")], &[]);
        assert!(find_registers_fill(&[], &banks, &target).registers.is_empty());
        let (matches, order) = find_registers_pairs(&[], &banks, &target, 4);
        assert!(matches.registers.is_empty() && order.is_none());
        assert!(find_registers_combined(&[], &banks, &target, 4).registers.is_empty());
        let (addresses, _) = find_value_in_stack(&[], &stack(&[]), &RegisterAssignments::default());
        assert!(addresses.is_empty());
    }

    #[test]
    fn fill_matches_verbatim_and_extended() {
        let target = Target::riscv();
        let banks = banks(&[(10, "0x12345678"), (11, "0xffffffa1"), (12, "0x45")], &[]);
        let argv = [hex("0x12345678"), hex("0xa1"), hex("0x45")];
        let matches = find_registers_fill(&argv, &banks, &target);
        assert_eq!(matches.registers.get("a0"), Some(&argv[0]));
        assert_eq!(matches.registers.get("a1"), Some(&argv[1]));
        assert_eq!(matches.registers.get("a2"), Some(&argv[2]));
        assert!(matches.inconsistencies.is_empty());
    }

    #[test]
    fn fill_reports_duplicate_locations() {
        let target = Target::riscv();
        let banks = banks(&[(10, "0x4242"), (28, "0x4242")], &[]);
        let matches = find_registers_fill(&[hex("0x4242")], &banks, &target);
        assert_eq!(
            matches.inconsistencies,
            vec![Inconsistency::Registers(vec!["a0".to_string(), "t3".to_string()])]
        );
    }

    #[test]
    fn register_width_value_is_fill_only() {
        let target = Target::riscv();
        let argv = [hex("0x12345678")];
        let banks = banks(&[(10, "0x12345678")], &[]);
        assert!(!find_registers_fill(&argv, &banks, &target).registers.is_empty());
        let (matches, order) = find_registers_pairs(&argv, &banks, &target, 4);
        assert!(matches.registers.is_empty() && order.is_none());
        assert!(find_registers_combined(&argv, &banks, &target, 4).registers.is_empty());
    }

    #[test]
    fn pairs_detect_low_high_order() {
        let target = Target::riscv();
        let value = hex("0x1234567890abcdef");
        // Little-endian convention: low half in a0, high half in a1.
        let banks = banks(&[(10, "0x90abcdef"), (11, "0x12345678")], &[]);
        let (matches, order) = find_registers_pairs(&[value], &banks, &target, 4);
        assert_eq!(order, Some(PairOrder::LowHigh));
        assert_eq!(matches.registers.get("a0").unwrap().to_string(), "0x90abcdef");
        assert_eq!(matches.registers.get("a1").unwrap().to_string(), "0x12345678");
    }

    #[test]
    fn pairs_detect_high_low_order() {
        let target = Target::riscv();
        let value = hex("0x1234567890abcdef");
        let banks = banks(&[(10, "0x12345678"), (11, "0x90abcdef")], &[]);
        let (_, order) = find_registers_pairs(&[value], &banks, &target, 4);
        assert_eq!(order, Some(PairOrder::HighLow));
    }

    #[test]
    fn combined_packs_chars_and_pads_char_before_short() {
        let target = Target::riscv();
        // Four chars pack into one little-endian word.
        let chars = [hex("0x41"), hex("0x42"), hex("0x43"), hex("0x44")];
        let banks0 = banks(&[(10, "0x44434241")], &[]);
        let matches = find_registers_combined(&chars, &banks0, &target, 4);
        assert_eq!(matches.registers.get("a0").unwrap().to_string(), "0x44434241");

        // A char followed by a short lands in a two-byte slot.
        let mixed = [hex("0x41"), hex("0x2324")];
        let banks1 = banks(&[(10, "0x23240041")], &[]);
        let matches = find_registers_combined(&mixed, &banks1, &target, 4);
        assert_eq!(matches.registers.get("a0").unwrap().to_string(), "0x23240041");
    }

    #[test]
    fn combined_never_overshoots_the_chunk_width() {
        // char + short + short: the second short starts a new chunk.
        let argv = [hex("0x41"), hex("0x2324"), hex("0x5657")];
        let chunks = pack_chunks(&argv, 4);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].to_string(), "0x23240041");
        assert_eq!(chunks[1].to_string(), "0x5657");
    }

    #[test]
    fn stack_fill_flags_claimed_registers() {
        let argv = [hex("0x9999")];
        let mut claimed = RegisterAssignments::default();
        claimed.insert("t0".to_string(), hex("0x9999"));
        let stack = stack(&[("0x3ffffff0", "0x9999")]);
        let (addresses, inconsistencies) = find_value_in_stack(&argv, &stack, &claimed);
        assert_eq!(addresses.len(), 1);
        assert_eq!(
            inconsistencies,
            vec![Inconsistency::RegisterAndStack("t0".to_string())]
        );
    }

    #[test]
    fn stack_pairs_require_wider_than_int() {
        let claimed = RegisterAssignments::default();
        let narrow_window = stack(&[("0x3ffffff0", "0x1234")]);
        let (addresses, _) =
            find_value_pairs_in_stack(&[hex("0x12345678")], &narrow_window, &claimed, 4);
        assert!(addresses.is_empty());
        let wide = hex("0x1234567890abcdef");
        let wide_window = stack(&[("0x3ffffff0", "0x90abcdef")]);
        let (addresses, _) = find_value_pairs_in_stack(&[wide], &wide_window, &claimed, 4);
        assert_eq!(addresses.len(), 1);
    }

    #[test]
    fn by_ref_is_seen_through_the_first_argument_register() {
        let target = Target::riscv();
        let argument_registers: Vec<String> =
            ["a0", "a1", "a2", "a3", "a4", "a5", "a6", "a7"].map(String::from).to_vec();
        // a0 holds a stack address whose slot holds the first sentinel.
        let banks = banks(&[(10, "0x3ffffff8")], &[]);
        let window = stack(&[
            ("0x3ffffff0", "0x0"),
            ("0x3ffffff4", "0x0"),
            ("0x3ffffff8", "0x77665544"),
        ]);
        let argv = [hex("0x77665544")];
        let by_ref =
            find_ref_in_stack_fill(&argv, &banks, &window, &target, &argument_registers).unwrap();
        assert_eq!(by_ref.register, "a0");
        assert_eq!(by_ref.address.to_string(), "0x3ffffff8");

        // The packed variant: nine chars, first word at the referenced slot.
        let chars: Vec<HexValue> =
            ["0x41", "0x42", "0x43", "0x44", "0x45", "0x46", "0x47", "0x48", "0x49"]
                .iter()
                .map(|s| hex(s))
                .collect();
        let packed_window = stack(&[("0x3ffffff8", "0x44434241")]);
        let by_ref = find_ref_in_stack_combined(
            &chars,
            &banks,
            &packed_window,
            &target,
            &argument_registers,
            4,
        )
        .unwrap();
        assert_eq!(by_ref.register, "a0");

        // No argument registers known means no by-ref verdict.
        assert!(find_ref_in_stack_fill(&argv, &banks, &window, &target, &[]).is_none());
    }
}
