//! Return passing probe: which register(s) carry each scalar return type.
//!
//! The call chain is `main (C) -> foo (asm) -> bar (C) -> callee (asm)`:
//! bar returns a fresh sentinel, the trampoline calls the dump callee
//! without touching the return registers, and the inferencer locates the
//! sentinel with fill and pair-split matching only.

use indexmap::IndexMap;

use crate::analyzer::{Analyzer, AnalyzerContext};
use crate::dump::DumpSnapshot;
use crate::error::ProbeError;
use crate::hex::HexValue;
use crate::matcher::{find_registers_fill, find_registers_pairs, PairOrder};

const TYPES: [&str; 7] = ["char", "short", "int", "long", "long long", "float", "double"];

fn generate(dtype: &str, hvalue: &HexValue) -> String {
    let mut src = String::new();
    let returned = match dtype {
        "float" => {
            src.push_str(
                r#"#include <string.h>

inline static float int_as_float(unsigned int lhs) {
    float result;
    memcpy(&result, &lhs, sizeof(result));
    return result;
}

"#,
            );
            format!("int_as_float({hvalue})")
        }
        "double" => {
            src.push_str(
                r#"#include <string.h>

inline static double ull_as_double(unsigned long long lhs) {
    double result;
    memcpy(&result, &lhs, sizeof(result));
    return result;
}

"#,
            );
            format!("ull_as_double({hvalue})")
        }
        _ => hvalue.to_string(),
    };

    src.push_str(&format!(
        r#"extern void foo (void);

{dtype} bar (void) {{
    return {returned};
}}

int main (void) {{
    foo ();
    return 0;
}}
"#
    ));
    src
}

#[derive(Debug, Clone, PartialEq)]
struct ReturnObservation {
    fill: Vec<String>,
    pairs: Vec<String>,
    order: Option<PairOrder>,
}

fn summarize(results: &IndexMap<String, ReturnObservation>) -> String {
    let mut grouped: Vec<(Vec<String>, bool, Vec<String>)> = Vec::new();
    let mut pairs_order = None;
    for (dtype, observation) in results {
        if pairs_order.is_none() {
            pairs_order = observation.order;
        }
        let (registers, paired) = if !observation.fill.is_empty() && observation.pairs.is_empty() {
            (observation.fill.clone(), false)
        } else if !observation.pairs.is_empty() && observation.fill.is_empty() {
            (observation.pairs.clone(), true)
        } else {
            (Vec::new(), false)
        };
        if let Some((_, _, dtypes)) = grouped
            .iter_mut()
            .find(|(existing, existing_paired, _)| *existing == registers && *existing_paired == paired)
        {
            dtypes.push(dtype.clone());
        } else {
            grouped.push((registers, paired, vec![dtype.clone()]));
        }
    }

    let mut lines = vec!["Return registers:".to_string()];
    for (registers, paired, dtypes) in &grouped {
        lines.push(format!("- {}", dtypes.join(" : ")));
        if registers.is_empty() {
            lines.push(" - passed in registers: None".to_string());
        } else if *paired {
            let order = pairs_order.map(|o| format!(" {o}")).unwrap_or_default();
            lines.push(format!(" - passed in registers{order}: {}", registers.join(", ")));
        } else {
            lines.push(format!(" - passed in registers: {}", registers.join(", ")));
        }
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

pub struct ReturnPassAnalyzer;

impl Analyzer for ReturnPassAnalyzer {
    fn name(&self) -> &'static str {
        "returnpass"
    }

    fn analyze(&mut self, cx: &mut AnalyzerContext) -> Result<String, ProbeError> {
        let int_width = cx.target.int_width()?;
        let mut results: IndexMap<String, ReturnObservation> = IndexMap::new();

        for dtype in TYPES {
            let size = cx.target.type_size(dtype)?;
            cx.sentinels.reset();
            let hvalue = cx.sentinels.fresh_hex(size);

            let stdout = cx.run_probe_with(
                self.name(),
                &[generate(dtype, &hvalue)],
                &[],
                &[cx.runtime.return_asm.as_path()],
            )?;
            let snapshot = DumpSnapshot::parse(&stdout)?;

            let argv = [hvalue];
            let fill = find_registers_fill(&argv, &snapshot.banks, &cx.target);
            let (pairs, order) =
                find_registers_pairs(&argv, &snapshot.banks, &cx.target, int_width);
            results.insert(
                dtype.to_string(),
                ReturnObservation {
                    fill: fill.registers.keys().cloned().collect(),
                    pairs: pairs.registers.keys().cloned().collect(),
                    order,
                },
            );
        }
        Ok(summarize(&results))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn observation(fill: &[&str], pairs: &[&str], order: Option<PairOrder>) -> ReturnObservation {
        ReturnObservation {
            fill: fill.iter().map(|s| s.to_string()).collect(),
            pairs: pairs.iter().map(|s| s.to_string()).collect(),
            order,
        }
    }

    #[test]
    fn groups_types_by_return_register_shape() {
        let mut results = IndexMap::new();
        for dtype in ["char", "short", "int", "long"] {
            results.insert(dtype.to_string(), observation(&["a0"], &[], None));
        }
        results.insert(
            "long long".to_string(),
            observation(&[], &["a0", "a1"], Some(PairOrder::LowHigh)),
        );
        results.insert("float".to_string(), observation(&["fa0"], &[], None));
        results.insert("double".to_string(), observation(&["fa0"], &[], None));

        let summary = summarize(&results);
        assert!(summary.contains("- char : short : int : long\n - passed in registers: a0\n"));
        assert!(summary
            .contains("- long long\n - passed in registers [low, high]: a0, a1\n"));
        assert!(summary.contains("- float : double\n - passed in registers: fa0\n"));
    }

    #[test]
    fn unlocated_returns_render_as_none() {
        let mut results = IndexMap::new();
        results.insert("long double".to_string(), observation(&[], &[], None));
        let summary = summarize(&results);
        assert!(summary.contains("- long double\n - passed in registers: None\n"));
    }

    #[test]
    fn generator_routes_the_sentinel_through_bar() {
        let hvalue = HexValue::parse("0x12345678").unwrap();
        let source = generate("int", &hvalue);
        assert!(source.contains("int bar (void)"));
        assert!(source.contains("return 0x12345678;"));
        assert!(source.contains("foo ();"));

        let source = generate("double", &HexValue::parse("0x1234567890abcdef").unwrap());
        assert!(source.contains("return ull_as_double(0x1234567890abcdef);"));
    }
}
