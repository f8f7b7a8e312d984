//! Fresh sentinel allocation.
//!
//! Probes locate values by literal match against the dump, so a sentinel
//! must survive the round trip through a C integer literal and the dump
//! helper's `%x` formatting unchanged: the top nibble must be non-zero
//! (leading zeros are elided when printing), wide values must keep a
//! non-zero nibble at the midpoint so the two halves stay distinguishable
//! when split across a register pair, and no value may be issued twice
//! within one probe.

use rand::Rng;
use rustc_hash::FxHashSet;

use crate::error::ProbeError;
use crate::hex::{BinValue, Bit, HexValue};
use crate::target::Target;

pub struct SentinelAllocator {
    used: FxHashSet<Vec<u8>>,
}

impl SentinelAllocator {
    pub fn new() -> Self {
        Self { used: FxHashSet::default() }
    }

    /// Forgets all issued values. Called at every probe boundary.
    pub fn reset(&mut self) {
        self.used.clear();
    }

    /// Returns a fresh sentinel of `width` bytes satisfying the canonical
    /// form invariants.
    pub fn fresh_hex(&mut self, width: usize) -> HexValue {
        assert!(width > 0);
        let mut rng = rand::thread_rng();
        loop {
            let mut bytes = vec![0u8; width];
            rng.fill(&mut bytes[..]);
            let candidate = HexValue::from_bytes(bytes);
            if candidate.top_nibble() == 0 || candidate.is_zero() {
                continue;
            }
            if width >= 8 && candidate.split_point_nibble() == 0 {
                continue;
            }
            if self.used.contains(candidate.bytes()) {
                continue;
            }
            self.used.insert(candidate.bytes().to_vec());
            return candidate;
        }
    }

    pub fn fresh_hex_list(&mut self, n: usize, width: usize) -> Vec<HexValue> {
        (0..n).map(|_| self.fresh_hex(width)).collect()
    }

    /// One sentinel per type name, sized per the discovered type details.
    pub fn fresh_hex_list_for_types(
        &mut self,
        dtypes: &[&str],
        target: &Target,
    ) -> Result<Vec<HexValue>, ProbeError> {
        let mut values = Vec::with_capacity(dtypes.len());
        for dtype in dtypes {
            let size = target.type_size(dtype)?;
            values.push(self.fresh_hex(size));
        }
        Ok(values)
    }

    /// A random bit string of exactly `bits` bits. With `set_msb`, the most
    /// significant bit is forced to one so the value is a non-zero
    /// discriminant wherever it lands.
    pub fn fresh_binary(&mut self, bits: usize, set_msb: bool) -> BinValue {
        assert!(bits > 0);
        let mut rng = rand::thread_rng();
        let mut out = Vec::with_capacity(bits);
        for i in 0..bits {
            let one = if i == 0 && set_msb { true } else { rng.gen::<bool>() };
            out.push(if one { Bit::One } else { Bit::Zero });
        }
        BinValue::from_bits(out)
    }
}
