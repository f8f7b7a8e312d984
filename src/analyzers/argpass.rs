//! Argument passing probe: for each fundamental type, call an external
//! callee with a growing number of fresh sentinels until one of them shows
//! up in the stack, then summarize which registers carried arguments, in
//! which order split halves were paired, and at which count the register
//! file ran out.
//!
//! Float and double sentinels are bit patterns, not float literals: the
//! generated program `memcpy`s the integer sentinel into the float
//! argument, so the exact pattern reaches the ABI register without being
//! rounded by the compiler.

use indexmap::{IndexMap, IndexSet};
use log::debug;

use crate::analyzer::{Analyzer, AnalyzerContext};
use crate::dump::DumpSnapshot;
use crate::error::ProbeError;
use crate::hex::HexValue;
use crate::matcher::{
    find_registers_fill, find_registers_pairs, find_value_in_stack, find_value_pairs_in_stack,
    Inconsistency, PairOrder,
};
use crate::target::Target;

const TYPES: [&str; 7] = ["char", "short", "int", "long", "long long", "float", "double"];

/// Hard cap on the per-type iteration count; no known ABI passes more
/// arguments in registers.
const MAX_ARGC: usize = 20;

fn generate(dtype: &str, argv: &[HexValue]) -> String {
    let mut src = String::new();
    match dtype {
        "float" => src.push_str(
            r#"#include <string.h>

inline static float int_as_float(unsigned int lhs) {
    float result;
    memcpy(&result, &lhs, sizeof(result));
    return result;
}

"#,
        ),
        "double" => src.push_str(
            r#"#include <string.h>

inline static double ull_as_double(unsigned long long lhs) {
    double result;
    memcpy(&result, &lhs, sizeof(result));
    return result;
}

"#,
        ),
        _ => {}
    }

    let params = vec![dtype; argv.len()].join(", ");
    let args = argv
        .iter()
        .map(|value| match dtype {
            "float" => format!("int_as_float({value})"),
            "double" => format!("ull_as_double({value})"),
            _ => value.to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ");

    src.push_str(&format!(
        "extern void callee({params});\n\nint main(void) {{\n    callee({args});\n    return 0;\n}}\n"
    ));
    src
}

#[derive(Debug, Clone)]
struct Iteration {
    argc: usize,
    /// Registers that held any sentinel this iteration, in discovery order.
    registers: Vec<String>,
    pairs_order: Option<PairOrder>,
    inconsistencies: Vec<Inconsistency>,
    value_in_stack: bool,
}

fn observe(
    argv: &[HexValue],
    snapshot: &DumpSnapshot,
    target: &Target,
    int_width: usize,
) -> Iteration {
    let fill = find_registers_fill(argv, &snapshot.banks, target);
    let (pairs, pairs_order) = find_registers_pairs(argv, &snapshot.banks, target, int_width);

    let mut registers = fill.registers;
    registers.extend(pairs.registers);
    let mut inconsistencies = fill.inconsistencies;
    inconsistencies.extend(pairs.inconsistencies);

    let (stack_hits, stack_inconsistencies) =
        find_value_in_stack(argv, &snapshot.stack, &registers);
    inconsistencies.extend(stack_inconsistencies);
    let mut value_in_stack = !stack_hits.is_empty();
    if !value_in_stack {
        let (pair_hits, pair_inconsistencies) =
            find_value_pairs_in_stack(argv, &snapshot.stack, &registers, int_width);
        inconsistencies.extend(pair_inconsistencies);
        value_in_stack = !pair_hits.is_empty();
    }

    Iteration {
        argc: argv.len(),
        registers: registers.keys().cloned().collect(),
        pairs_order,
        inconsistencies,
        value_in_stack,
    }
}

/// Stage 1: flatten per-type iterations, keeping only the registers first
/// seen in each iteration.
#[derive(Debug, Clone, PartialEq)]
struct StageEntry {
    dtype: String,
    argc: usize,
    regs: Vec<String>,
    order: Option<PairOrder>,
    inconsistencies: Vec<Inconsistency>,
    stack: bool,
}

fn stage1_flatten(results: &IndexMap<String, Vec<Iteration>>) -> Vec<StageEntry> {
    let mut entries = Vec::new();
    for (dtype, iterations) in results {
        let mut seen: IndexSet<String> = IndexSet::new();
        for iteration in iterations {
            let regs: Vec<String> = iteration
                .registers
                .iter()
                .filter(|reg| !seen.contains(*reg))
                .cloned()
                .collect();
            entries.push(StageEntry {
                dtype: dtype.clone(),
                argc: iteration.argc,
                regs,
                order: iteration.pairs_order,
                inconsistencies: iteration.inconsistencies.clone(),
                stack: iteration.value_in_stack,
            });
            seen.extend(iteration.registers.iter().cloned());
        }
    }
    entries
}

/// Stage 2: group contiguous iterations with the same (order, stack) shape.
#[derive(Debug, Clone, PartialEq)]
struct GroupedRun {
    args: Vec<usize>,
    regs: Vec<String>,
    order: Option<PairOrder>,
    inconsistencies: Vec<Inconsistency>,
    stack: bool,
}

fn stage2_group(entries: Vec<StageEntry>) -> IndexMap<String, Vec<GroupedRun>> {
    let mut grouped: IndexMap<String, Vec<GroupedRun>> = IndexMap::new();
    for entry in entries {
        let runs = grouped.entry(entry.dtype.clone()).or_default();
        if let Some(run) = runs
            .iter_mut()
            .find(|run| run.order == entry.order && run.stack == entry.stack)
        {
            run.args.push(entry.argc);
            run.regs.extend(entry.regs);
            run.inconsistencies.extend(entry.inconsistencies);
        } else {
            runs.push(GroupedRun {
                args: vec![entry.argc],
                regs: entry.regs,
                order: entry.order,
                inconsistencies: entry.inconsistencies,
                stack: entry.stack,
            });
        }
    }
    grouped
}

/// Stage 3: merge types whose grouped runs came out identical.
fn stage3_merge(grouped: IndexMap<String, Vec<GroupedRun>>) -> Vec<(Vec<String>, Vec<GroupedRun>)> {
    let mut merged: Vec<(Vec<String>, Vec<GroupedRun>)> = Vec::new();
    for (dtype, runs) in grouped {
        if let Some((dtypes, _)) = merged.iter_mut().find(|(_, existing)| *existing == runs) {
            dtypes.push(dtype);
        } else {
            merged.push((vec![dtype], runs));
        }
    }
    merged
}

fn argc_range(args: &[usize]) -> String {
    match args {
        [] => String::new(),
        [single] => single.to_string(),
        _ if args.windows(2).all(|w| w[0] + 1 == w[1]) => {
            format!("{}-{}", args.first().unwrap(), args.last().unwrap())
        }
        _ => args.iter().map(usize::to_string).collect::<Vec<_>>().join(", "),
    }
}

/// Stage 4: render the merged groups.
fn stage4_render(merged: &[(Vec<String>, Vec<GroupedRun>)]) -> String {
    let mut lines = vec!["Argument passing test:".to_string()];
    for (dtypes, runs) in merged {
        lines.push(format!("- {}", dtypes.join(" : ")));
        let mut inconsistencies: Vec<&Inconsistency> = Vec::new();
        for run in runs {
            inconsistencies.extend(&run.inconsistencies);
            let (order_str, regs_str) = if run.stack {
                (String::new(), "[stack]".to_string())
            } else if let Some(order) = run.order {
                let pairs = run
                    .regs
                    .chunks(2)
                    .map(|pair| match pair {
                        [first, second] => format!("[{first}, {second}]"),
                        other => format!("[{}]", other[0]),
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                (format!("{order} "), pairs)
            } else {
                (String::new(), run.regs.join(" "))
            };
            lines.push(format!(" - args {:<3} {}: {}", argc_range(&run.args), order_str, regs_str));
        }
        if !inconsistencies.is_empty() {
            let listed = inconsistencies
                .iter()
                .map(|inconsistency| inconsistency.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            lines.push(format!(
                " - WARNING: multiple value occurrences detected in {listed}"
            ));
        }
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn summarize(results: &IndexMap<String, Vec<Iteration>>) -> String {
    stage4_render(&stage3_merge(stage2_group(stage1_flatten(results))))
}

pub struct ArgPassAnalyzer;

impl Analyzer for ArgPassAnalyzer {
    fn name(&self) -> &'static str {
        "argpass"
    }

    fn analyze(&mut self, cx: &mut AnalyzerContext) -> Result<String, ProbeError> {
        let int_width = cx.target.int_width()?;
        let mut results: IndexMap<String, Vec<Iteration>> = IndexMap::new();
        let mut int_registers: Vec<String> = Vec::new();

        for dtype in TYPES {
            let size = cx.target.type_size(dtype)?;
            let mut iterations = Vec::new();
            let mut argc = 1;
            loop {
                cx.sentinels.reset();
                let argv = cx.sentinels.fresh_hex_list(argc, size);
                let stdout = cx.run_probe(self.name(), &[generate(dtype, &argv)])?;
                let snapshot = DumpSnapshot::parse(&stdout)?;
                for info in &snapshot.bank_infos {
                    cx.target.set_register_size(&info.id, info.register_size);
                }

                let iteration = observe(&argv, &snapshot, &cx.target, int_width);
                let overflowed = iteration.value_in_stack;
                if overflowed && dtype == "int" {
                    int_registers = iteration.registers.clone();
                }
                iterations.push(iteration);

                if overflowed {
                    break;
                }
                if argc == MAX_ARGC {
                    debug!("argpass: {dtype} never overflowed within {MAX_ARGC} arguments");
                    break;
                }
                argc += 1;
            }
            results.insert(dtype.to_string(), iterations);
        }

        if !int_registers.is_empty() {
            cx.target.set_argument_registers(int_registers);
        }
        Ok(summarize(&results))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn reg_names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// Eight int-like iterations filling a0..a7, then a stack overflow.
    fn int_like_iterations() -> Vec<Iteration> {
        let all = ["a0", "a1", "a2", "a3", "a4", "a5", "a6", "a7"];
        let mut iterations: Vec<Iteration> = (1..=8)
            .map(|argc| Iteration {
                argc,
                registers: reg_names(&all[..argc]),
                pairs_order: None,
                inconsistencies: Vec::new(),
                value_in_stack: false,
            })
            .collect();
        iterations.push(Iteration {
            argc: 9,
            registers: reg_names(&all),
            pairs_order: None,
            inconsistencies: Vec::new(),
            value_in_stack: true,
        });
        iterations
    }

    /// Doubles: fa0..fa7 fill, then pair-split into a0..a7, then stack.
    fn double_iterations() -> Vec<Iteration> {
        let fa = ["fa0", "fa1", "fa2", "fa3", "fa4", "fa5", "fa6", "fa7"];
        let a = ["a0", "a1", "a2", "a3", "a4", "a5", "a6", "a7"];
        let mut iterations: Vec<Iteration> = (1..=8)
            .map(|argc| Iteration {
                argc,
                registers: reg_names(&fa[..argc]),
                pairs_order: None,
                inconsistencies: Vec::new(),
                value_in_stack: false,
            })
            .collect();
        for argc in 9..=12 {
            let mut registers = reg_names(&fa);
            registers.extend(reg_names(&a[..(argc - 8) * 2]));
            iterations.push(Iteration {
                argc,
                registers,
                pairs_order: Some(PairOrder::LowHigh),
                inconsistencies: Vec::new(),
                value_in_stack: false,
            });
        }
        let mut registers = reg_names(&fa);
        registers.extend(reg_names(&a));
        iterations.push(Iteration {
            argc: 13,
            registers,
            pairs_order: Some(PairOrder::LowHigh),
            inconsistencies: Vec::new(),
            value_in_stack: true,
        });
        iterations
    }

    #[test]
    fn stage1_keeps_only_newly_seen_registers() {
        let mut results = IndexMap::new();
        results.insert("int".to_string(), int_like_iterations());
        let entries = stage1_flatten(&results);
        assert_eq!(entries.len(), 9);
        assert_eq!(entries[0].regs, reg_names(&["a0"]));
        assert_eq!(entries[7].regs, reg_names(&["a7"]));
        assert!(entries[8].regs.is_empty());
        assert!(entries[8].stack);
    }

    #[test]
    fn identical_types_merge_into_one_row() {
        let mut results = IndexMap::new();
        results.insert("char".to_string(), int_like_iterations());
        results.insert("int".to_string(), int_like_iterations());
        let summary = summarize(&results);
        assert!(summary.contains("- char : int\n"));
        assert!(summary.contains(" - args 1-8 : a0 a1 a2 a3 a4 a5 a6 a7\n"));
        assert!(summary.contains(" - args 9   : [stack]\n"));
    }

    #[test]
    fn pair_split_runs_render_bracketed_pairs() {
        let mut results = IndexMap::new();
        results.insert("double".to_string(), double_iterations());
        let summary = summarize(&results);
        assert!(summary.contains("- double\n"));
        assert!(summary.contains(" - args 1-8 : fa0 fa1 fa2 fa3 fa4 fa5 fa6 fa7\n"));
        assert!(summary
            .contains(" - args 9-12 [low, high] : [a0, a1] [a2, a3] [a4, a5] [a6, a7]\n"));
        assert!(summary.contains(" - args 13  : [stack]\n"));
    }

    #[test]
    fn inconsistencies_surface_as_one_warning_line() {
        let mut iterations = int_like_iterations();
        iterations[3].inconsistencies =
            vec![Inconsistency::Registers(vec!["a3".to_string(), "t0".to_string()])];
        let mut results = IndexMap::new();
        results.insert("int".to_string(), iterations);
        let summary = summarize(&results);
        assert!(summary
            .contains(" - WARNING: multiple value occurrences detected in (a3, t0)\n"));
    }

    #[test]
    fn argc_ranges_collapse_only_contiguous_runs() {
        assert_eq!(argc_range(&[9]), "9");
        assert_eq!(argc_range(&[1, 2, 3, 4]), "1-4");
        assert_eq!(argc_range(&[1, 3, 7]), "1, 3, 7");
    }

    #[test]
    fn generator_converts_float_sentinels_through_memcpy() {
        let argv = [HexValue::parse("0x1234567890abcdef").unwrap()];
        let source = generate("double", &argv);
        assert!(source.contains("ull_as_double(0x1234567890abcdef)"));
        assert!(source.contains("extern void callee(double);"));
        let source = generate("int", &[HexValue::parse("0x12345678").unwrap()]);
        assert!(source.contains("callee(0x12345678);"));
        assert!(!source.contains("memcpy"));
    }
}
