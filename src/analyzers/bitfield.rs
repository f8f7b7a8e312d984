//! Bit-field layout probe: padding behavior and endianness of two-field
//! bit-field structs, over many random width pairs per type.
//!
//! Each case overlays the bit-field struct with a `unsigned long long
//! values[2]` view and prints, for four candidate encodings, a label iff
//! the observed memory matches that encoding: fields packed
//! bit-contiguously (no extra padding) or each field padded out to its
//! storage unit (extra padding), in little- or big-endian bit order.
//! Width pairs are drawn so the field sum lands on both sides of the
//! storage unit size, which is what separates the two padding policies.

use std::fmt::Write;

use indexmap::{IndexMap, IndexSet};
use rand::Rng;

use crate::analyzer::{Analyzer, AnalyzerContext};
use crate::error::ProbeError;
use crate::hex::BinValue;
use crate::sentinel::SentinelAllocator;

const TYPES: [&str; 5] = ["char", "short", "int", "long", "long long"];

/// Over/under width pairs drawn per type.
const ROUNDS_PER_TYPE: usize = 3;

struct BitFieldCase {
    name: String,
    dtype: &'static str,
    unit_bits: usize,
    widths: (usize, usize),
}

fn draw_widths(rng: &mut impl Rng, unit_bits: usize, over: bool) -> (usize, usize) {
    let limit = unit_bits - unit_bits / 4;
    loop {
        let w0 = rng.gen_range(1..=limit);
        let w1 = rng.gen_range(1..=limit);
        let sum = w0 + w1;
        if over {
            if sum > unit_bits {
                return (w0, w1);
            }
        } else if sum < unit_bits && sum > unit_bits / 2 {
            return (w0, w1);
        }
    }
}

fn emit_candidate(src: &mut String, value: &BinValue, padding: &str, endian: &str) {
    let _ = write!(
        src,
        r#"
    if ((*test.values & {mask}) == {value})
    {{
        printf("{padding}:");
        printf("{endian}");
    }}
"#,
        mask = value.mask_literal(),
        value = value.value_literal(),
    );
}

fn emit_split_candidate(
    src: &mut String,
    value: &BinValue,
    low_bits: usize,
    padding: &str,
    endian: &str,
) {
    let (upper, lower) = value.split_low(low_bits);
    let _ = write!(
        src,
        r#"
    if ((lower_bits & {lower_mask}) == {lower_value} &&
        (upper_bits & {upper_mask}) == {upper_value})
    {{
        printf("{padding}:");
        printf("{endian}");
    }}
"#,
        lower_mask = lower.mask_literal(),
        lower_value = lower.value_literal(),
        upper_mask = upper.mask_literal(),
        upper_value = upper.value_literal(),
    );
}

fn generate(cases: &[BitFieldCase], sentinels: &mut SentinelAllocator) -> String {
    let mut src = String::from("#include <stdio.h>\n#include <stdint.h>\n\n");

    for case in cases {
        let (w0, w1) = case.widths;
        let field0 = sentinels.fresh_binary(w0, true);
        let field1 = sentinels.fresh_binary(w1, true);

        let _ = write!(
            src,
            r#"union union_{name} {{
  struct {{
    unsigned {dtype} x0 : {w0};
    unsigned {dtype} x1 : {w1};
  }} s;
  unsigned long long values[2];
}};

void calculate_{name} (void) {{
    union union_{name} test = {{ .s = {{ .x0 = {v0}, .x1 = {v1} }} }};
"#,
            name = case.name,
            dtype = case.dtype,
            v0 = field0.value_literal(),
            v1 = field1.value_literal(),
        );

        let sign = if w0 + w1 > case.unit_bits { '>' } else { '<' };
        let _ = writeln!(src, "    printf(\"{}:{}:\");", case.name, sign);

        let no_pad = BinValue::concat_fields(&[field0.clone(), field1.clone()]);
        let padded =
            BinValue::concat_fields(&[field0.extended_with_undefined(case.unit_bits), field1]);

        if case.unit_bits >= 64 {
            // The packed pattern may exceed one storage word; compare the
            // two halves of values[0], then values[0] and values[1].
            src.push_str(
                r#"
    unsigned long long lower_bits = (*(test.values + 0) & 0xFFFFFFFF);
    unsigned long long upper_bits = ((*(test.values + 0) >> 32));
"#,
            );
            emit_split_candidate(&mut src, &no_pad, 32, "No extra padding.", "Little-endian.");
            emit_split_candidate(
                &mut src,
                &no_pad.byte_swapped(),
                32,
                "No extra padding.",
                "Big-endian.",
            );
            src.push_str(
                r#"
    lower_bits = (*(test.values + 0) & 0xFFFFFFFFFFFFFFFF);
    upper_bits = (*(test.values + 1) & 0xFFFFFFFFFFFFFFFF);
"#,
            );
            emit_split_candidate(&mut src, &padded, 64, "Extra padding.", "Little-endian.");
            emit_split_candidate(
                &mut src,
                &padded.byte_swapped(),
                64,
                "Extra padding.",
                "Big-endian.",
            );
        } else {
            emit_candidate(&mut src, &no_pad, "No extra padding.", "Little-endian.");
            emit_candidate(&mut src, &no_pad.byte_swapped(), "No extra padding.", "Big-endian.");
            emit_candidate(&mut src, &padded, "Extra padding.", "Little-endian.");
            emit_candidate(&mut src, &padded.byte_swapped(), "Extra padding.", "Big-endian.");
        }

        src.push_str("    printf(\"\\n\");\n}\n\n");
    }

    src.push_str("int main (void) {\n");
    for case in cases {
        let _ = writeln!(src, "  calculate_{}();", case.name);
    }
    src.push_str("  return 0;\n}\n");
    src
}

#[derive(Default)]
struct Tally {
    padding: IndexMap<String, usize>,
    endian: IndexMap<String, usize>,
}

/// First label to reach the maximum count wins ties.
fn majority(counts: &IndexMap<String, usize>) -> Option<&String> {
    let mut best: Option<(&String, usize)> = None;
    for (label, count) in counts {
        if best.map_or(true, |(_, best_count)| *count > best_count) {
            best = Some((label, *count));
        }
    }
    best.map(|(label, _)| label)
}

fn summarize(stdout: &str) -> String {
    let mut tallies: IndexMap<String, Tally> = IndexMap::new();
    let mut all_endians: IndexSet<String> = IndexSet::new();

    for line in stdout.lines() {
        let parts: Vec<&str> = line.split(':').collect();
        let [_, sign, padding, endian] = parts[..] else { continue };
        if sign != "<" && sign != ">" {
            continue;
        }
        let tally = tallies.entry(sign.to_string()).or_default();
        *tally.padding.entry(padding.to_string()).or_insert(0) += 1;
        *tally.endian.entry(endian.to_string()).or_insert(0) += 1;
        all_endians.insert(endian.to_string());
    }

    let mut lines = vec!["Bit-field test:".to_string()];
    for (sign, tally) in &tallies {
        lines.push(format!("- sum(bit-fields) {sign} sizeof(dtype)"));
        if let Some(padding) = majority(&tally.padding) {
            lines.push(format!("  - {padding}"));
        }
        if all_endians.len() > 1 {
            if let Some(endian) = majority(&tally.endian) {
                lines.push(format!("  - {endian}"));
            }
        }
    }
    if all_endians.len() == 1 {
        lines.push(format!("- {}", all_endians[0]));
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

pub struct BitFieldAnalyzer;

impl Analyzer for BitFieldAnalyzer {
    fn name(&self) -> &'static str {
        "bitfield"
    }

    fn analyze(&mut self, cx: &mut AnalyzerContext) -> Result<String, ProbeError> {
        let mut rng = rand::thread_rng();
        let mut cases = Vec::new();
        for dtype in TYPES {
            let unit_bits = cx.target.type_size(dtype)? * 8;
            let identifier = dtype.replace(' ', "_");
            let mut index = 0;
            for _ in 0..ROUNDS_PER_TYPE {
                for over in [true, false] {
                    cases.push(BitFieldCase {
                        name: format!("{identifier}_{index}"),
                        dtype,
                        unit_bits,
                        widths: draw_widths(&mut rng, unit_bits, over),
                    });
                    index += 1;
                }
            }
        }

        let source = generate(&cases, &mut cx.sentinels);
        let stdout = cx.run_probe(self.name(), &[source])?;
        Ok(summarize(&stdout))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn width_draws_respect_the_sign_constraint() {
        let mut rng = rand::thread_rng();
        for unit_bits in [8, 16, 32, 64] {
            let limit = unit_bits - unit_bits / 4;
            for _ in 0..50 {
                let (w0, w1) = draw_widths(&mut rng, unit_bits, true);
                assert!(w0 + w1 > unit_bits);
                assert!(w0 >= 1 && w0 <= limit && w1 >= 1 && w1 <= limit);
                let (w0, w1) = draw_widths(&mut rng, unit_bits, false);
                assert!(w0 + w1 < unit_bits && w0 + w1 > unit_bits / 2);
            }
        }
    }

    #[test]
    fn generated_case_checks_four_encodings() {
        let mut sentinels = SentinelAllocator::new();
        let cases = [BitFieldCase {
            name: "short_0".to_string(),
            dtype: "short",
            unit_bits: 16,
            widths: (10, 12),
        }];
        let source = generate(&cases, &mut sentinels);
        assert!(source.contains("unsigned short x0 : 10;"));
        assert!(source.contains("unsigned short x1 : 12;"));
        assert!(source.contains("unsigned long long values[2];"));
        assert!(source.contains("printf(\"short_0:>:\");"));
        assert_eq!(source.matches("No extra padding.").count(), 2);
        assert_eq!(source.matches("Extra padding.").count(), 2);
        assert_eq!(source.matches("Little-endian.").count(), 2);
        assert_eq!(source.matches("Big-endian.").count(), 2);
        assert!(source.contains("calculate_short_0();"));
    }

    #[test]
    fn wide_units_compare_both_storage_words() {
        let mut sentinels = SentinelAllocator::new();
        let cases = [BitFieldCase {
            name: "long_long_0".to_string(),
            dtype: "long long",
            unit_bits: 64,
            widths: (40, 30),
        }];
        let source = generate(&cases, &mut sentinels);
        assert!(source.contains("unsigned long long lower_bits"));
        assert!(source.contains("(*(test.values + 1) & 0xFFFFFFFFFFFFFFFF)"));
        assert!(source.contains("printf(\"long_long_0:>:\");"));
    }

    #[test]
    fn summary_reports_majority_per_sign_class() {
        let stdout = "\
short_0:>:Extra padding.:Little-endian.
short_1:<:No extra padding.:Little-endian.
int_0:>:Extra padding.:Little-endian.
int_1:<:No extra padding.:Little-endian.
long_0:>:No extra padding.:Little-endian.
";
        let summary = summarize(stdout);
        assert!(summary.contains("- sum(bit-fields) > sizeof(dtype)\n  - Extra padding.\n"));
        assert!(summary.contains("- sum(bit-fields) < sizeof(dtype)\n  - No extra padding.\n"));
        // A single observed endianness collapses to one trailing line.
        assert!(summary.ends_with("- Little-endian.\n"));
        assert!(!summary.contains("  - Little-endian.\n"));
    }

    #[test]
    fn mixed_endianness_is_reported_per_class() {
        let stdout = "\
short_0:>:Extra padding.:Little-endian.
int_0:>:Extra padding.:Little-endian.
long_0:>:Extra padding.:Big-endian.
";
        let summary = summarize(stdout);
        assert!(summary.contains("  - Little-endian.\n"));
        assert!(!summary.contains("\n- Little-endian.\n"));
    }

    #[test]
    fn unlabeled_lines_are_ignored() {
        let summary = summarize("// Header info\nnoise\nshort_0:?\n");
        assert_eq!(summary, "Bit-field test:\n");
    }
}
