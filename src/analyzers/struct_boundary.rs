//! Struct boundary probe: how large may a by-value struct grow before the
//! ABI passes it by reference, and which registers carry it until then.
//!
//! Stage A grows a struct of chars one member at a time until the call site
//! passes a pointer instead of the bytes; the last all-in-registers count is
//! the byte threshold. Stage B predicts the member limit for each wider
//! type from that threshold and verifies that one extra char tips the
//! struct over. Stage C probes small all-floating-point member lists, which
//! some ABIs pass in separate floating-point registers instead of packed.
//!
//! Floating-point members are initialized through a union whose second view
//! replaces every float member with a same-sized integer, so the struct
//! bytes are laid down at compile time and no conversion code touches the
//! argument registers before the call.

use indexmap::IndexMap;
use log::debug;

use crate::analyzer::{Analyzer, AnalyzerContext};
use crate::dump::DumpSnapshot;
use crate::error::ProbeError;
use crate::hex::HexValue;
use crate::matcher::{
    find_ref_in_stack_combined, find_ref_in_stack_fill, find_ref_in_stack_pairs,
    find_registers_combined, find_registers_fill, find_registers_pairs, ByRef, PairOrder,
    RegisterAssignments,
};
use crate::target::Target;

const STAGE_B_TYPES: [&str; 6] = ["short", "int", "long", "long long", "float", "double"];

const SPECIAL_CASES: [&[&str]; 8] = [
    &["float"],
    &["double"],
    &["float", "float"],
    &["double", "double"],
    &["float", "char"],
    &["double", "char"],
    &["float", "float", "float"],
    &["float", "char", "char"],
];

/// Members one struct may grow to before the probe gives up.
const MEMBER_CAP: usize = 20;

fn float_substitute(dtype: &str) -> Option<&'static str> {
    match dtype {
        "float" => Some("unsigned int"),
        "double" => Some("unsigned long long"),
        _ => None,
    }
}

fn generate(dtypes: &[String], hvalues: &[HexValue]) -> String {
    let has_float = dtypes.iter().any(|d| float_substitute(d).is_some());

    let mut src = String::from("#include <stdio.h>\n\n");
    src.push_str("struct structType {\n");
    for (index, dtype) in dtypes.iter().enumerate() {
        src.push_str(&format!("    {dtype} a{};\n", index + 1));
    }
    src.push_str("};\n");

    if has_float {
        src.push_str("\nstruct assignmentType {\n");
        for (index, dtype) in dtypes.iter().enumerate() {
            let assigned = float_substitute(dtype).unwrap_or(dtype.as_str());
            src.push_str(&format!("    {assigned} a{};\n", index + 1));
        }
        src.push_str("};\n\nunion initUnion {\n    struct structType sT;\n    struct assignmentType sA;\n};\n");
    }

    src.push_str("\nextern void callee(struct structType);\nextern void reset_registers(void);\n");

    let values = hvalues.iter().map(HexValue::to_string).collect::<Vec<_>>().join(", ");
    if has_float {
        src.push_str(&format!(
            r#"
int main(void) {{
    printf("Sizeof(struct structType): %d\n", (int)sizeof(struct structType));
    reset_registers();
    union initUnion u = {{ .sA = {{ {values} }} }};
    callee(u.sT);

    return 0;
}}
"#
        ));
    } else {
        src.push_str(&format!(
            r#"
int main(void) {{
    printf("Sizeof(struct structType): %d\n", (int)sizeof(struct structType));
    reset_registers();
    struct structType structTypeObject = {{ {values} }};
    callee(structTypeObject);

    return 0;
}}
"#
        ));
    }
    src
}

fn parse_struct_sizeof(stdout: &str) -> Result<usize, ProbeError> {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("Sizeof(struct structType): "))
        .and_then(|rest| rest.trim().parse().ok())
        .ok_or(ProbeError::MissingOutput("sizeof(struct structType)"))
}

#[derive(Debug, Clone)]
struct StructObservation {
    sizeof_s: usize,
    by_ref: Option<ByRef>,
    fill: RegisterAssignments,
    pairs: RegisterAssignments,
    combined: RegisterAssignments,
    pairs_order: Option<PairOrder>,
}

fn observe_struct(
    argv: &[HexValue],
    snapshot: &DumpSnapshot,
    target: &Target,
    argument_registers: &[String],
    int_width: usize,
    sizeof_s: usize,
) -> StructObservation {
    let by_ref = find_ref_in_stack_fill(argv, &snapshot.banks, &snapshot.stack, target, argument_registers)
        .or_else(|| {
            find_ref_in_stack_pairs(
                argv,
                &snapshot.banks,
                &snapshot.stack,
                target,
                argument_registers,
                int_width,
            )
        })
        .or_else(|| {
            find_ref_in_stack_combined(
                argv,
                &snapshot.banks,
                &snapshot.stack,
                target,
                argument_registers,
                int_width,
            )
        });
    if let Some(by_ref) = by_ref {
        return StructObservation {
            sizeof_s,
            by_ref: Some(by_ref),
            fill: RegisterAssignments::default(),
            pairs: RegisterAssignments::default(),
            combined: RegisterAssignments::default(),
            pairs_order: None,
        };
    }

    let fill = find_registers_fill(argv, &snapshot.banks, target);
    let (pairs, pairs_order) = find_registers_pairs(argv, &snapshot.banks, target, int_width);
    let combined = find_registers_combined(argv, &snapshot.banks, target, int_width);
    StructObservation {
        sizeof_s,
        by_ref: None,
        fill: fill.registers,
        pairs: pairs.registers,
        combined: combined.registers,
        pairs_order,
    }
}

#[derive(Debug, PartialEq)]
struct TypeRow {
    sizeof_s: usize,
    dtypes: Vec<String>,
    regs: Vec<String>,
    pairs: Option<PairOrder>,
}

/// Collapses per-type observations into rows keyed by the registers the
/// last all-in-registers iteration used, and extracts the by-ref register.
fn boundary_rows(
    results: &IndexMap<String, Vec<StructObservation>>,
    target: &Target,
) -> Result<(Vec<TypeRow>, Option<String>), ProbeError> {
    let mut rows: Vec<TypeRow> = Vec::new();
    let mut by_ref_register = None;

    for (dtype, observations) in results {
        if observations.len() < 2 {
            continue;
        }
        let last_in_registers = &observations[observations.len() - 2];

        // Floating-point registers can be wider than the integer ones, so a
        // double member is judged against its own bank's register size.
        let register_size = if dtype == "double" && target.register_bank_count() == Some(2) {
            target.register_size("regs_bank1")?
        } else {
            target.register_size("regs_bank0")?
        };
        let sizeof_dtype = target.type_size(dtype)?;

        let (regs, pairs): (Vec<String>, Option<PairOrder>) = if sizeof_dtype == register_size {
            (last_in_registers.fill.keys().cloned().collect(), None)
        } else if sizeof_dtype < register_size {
            (last_in_registers.combined.keys().cloned().collect(), None)
        } else {
            (
                last_in_registers.pairs.keys().cloned().collect(),
                last_in_registers.pairs_order,
            )
        };

        if let Some(row) = rows.iter_mut().find(|row| {
            row.regs == regs && row.pairs == pairs && row.sizeof_s == last_in_registers.sizeof_s
        }) {
            row.dtypes.push(dtype.clone());
        } else {
            rows.push(TypeRow {
                sizeof_s: last_in_registers.sizeof_s,
                dtypes: vec![dtype.clone()],
                regs,
                pairs,
            });
        }

        if by_ref_register.is_none() {
            if let Some(by_ref) = observations.last().and_then(|o| o.by_ref.as_ref()) {
                by_ref_register = Some(by_ref.register.clone());
            }
        }
    }
    Ok((rows, by_ref_register))
}

fn render_boundaries(rows: &[TypeRow], by_ref_register: Option<&str>) -> String {
    let mut grouped: IndexMap<usize, Vec<&TypeRow>> = IndexMap::new();
    for row in rows {
        grouped.entry(row.sizeof_s).or_default().push(row);
    }

    let mut lines = vec!["Struct argument passing test:".to_string()];
    for (sizeof_s, rows) in &grouped {
        lines.push(format!("- sizeof(S) <= {sizeof_s} : passed in registers"));
        lines.push(format!(
            "- sizeof(S) >  {sizeof_s} : passed by ref: {}",
            by_ref_register.unwrap_or("[stack]")
        ));
        for row in rows {
            let dtypes = row.dtypes.join(" : ");
            let regs = row.regs.join(", ");
            match row.pairs {
                Some(order) => lines.push(format!("  - {dtypes} {order} : {regs}")),
                None => lines.push(format!("  - {dtypes} : {regs}")),
            }
        }
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// One line per stage C combination: the registers the struct actually
/// occupied, in discovery order, or its by-ref register.
fn render_special_case(dtypes: &[&str], observation: &StructObservation) -> String {
    let label = dtypes.join(", ");
    if let Some(by_ref) = &observation.by_ref {
        return format!("- {label} : passed by ref: {}", by_ref.register);
    }
    let mut regs: Vec<&String> = Vec::new();
    for key in observation
        .fill
        .keys()
        .chain(observation.pairs.keys())
        .chain(observation.combined.keys())
    {
        if !regs.contains(&key) {
            regs.push(key);
        }
    }
    if regs.is_empty() {
        return format!("- {label} : none");
    }
    let regs = regs.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(" ");
    format!("- {label} : {regs}")
}

pub struct StructBoundaryAnalyzer;

impl StructBoundaryAnalyzer {
    fn probe(
        &self,
        cx: &mut AnalyzerContext,
        dtypes: &[String],
        hvalues: &[HexValue],
        argument_registers: &[String],
        int_width: usize,
    ) -> Result<StructObservation, ProbeError> {
        let stdout = cx.run_probe("struct_boundary", &[generate(dtypes, hvalues)])?;
        let snapshot = DumpSnapshot::parse(&stdout)?;
        cx.target.set_register_bank_count(snapshot.bank_infos.len());
        for info in &snapshot.bank_infos {
            cx.target.set_register_size(&info.id, info.register_size);
        }
        let sizeof_s = parse_struct_sizeof(&stdout)?;
        Ok(observe_struct(hvalues, &snapshot, &cx.target, argument_registers, int_width, sizeof_s))
    }

    /// Stage A: one more char per iteration until the struct travels by
    /// reference; the threshold is the last all-in-registers byte count.
    fn char_limit(
        &self,
        cx: &mut AnalyzerContext,
        results: &mut IndexMap<String, Vec<StructObservation>>,
        argument_registers: &[String],
        int_width: usize,
    ) -> Result<usize, ProbeError> {
        let char_size = cx.target.type_size("char")?;
        cx.sentinels.reset();
        let mut count = 1;
        loop {
            let hvalues = cx.sentinels.fresh_hex_list(count, char_size);
            let dtypes = vec!["char".to_string(); count];
            let observation = self.probe(cx, &dtypes, &hvalues, argument_registers, int_width)?;
            let done = observation.by_ref.is_some();
            results.entry("char".to_string()).or_default().push(observation);
            if done {
                return Ok(count - 1);
            }
            count += 1;
            if count == MEMBER_CAP {
                debug!("struct_boundary: char structs never went by-ref below {MEMBER_CAP} members");
                return Ok(count - 1);
            }
        }
    }

    /// Stage B: for each wider type, start from the predicted member limit
    /// and confirm that an appended char forces by-reference; if not,
    /// extend the limit and retry.
    fn wider_types(
        &self,
        cx: &mut AnalyzerContext,
        results: &mut IndexMap<String, Vec<StructObservation>>,
        char_limit: usize,
        argument_registers: &[String],
        int_width: usize,
    ) -> Result<(), ProbeError> {
        for dtype in STAGE_B_TYPES {
            cx.sentinels.reset();
            let sizeof_dtype = cx.target.type_size(dtype)?;
            let mut limit = (char_limit / sizeof_dtype).max(1);
            let mut reached_boundary = false;
            while !reached_boundary && limit < 10 {
                for extra in [None, Some("char")] {
                    let mut dtypes: Vec<String> = vec![dtype.to_string(); limit];
                    if let Some(extra) = extra {
                        dtypes.push(extra.to_string());
                    }
                    let dtype_refs: Vec<&str> = dtypes.iter().map(String::as_str).collect();
                    let hvalues =
                        cx.sentinels.fresh_hex_list_for_types(&dtype_refs, &cx.target)?;
                    let observation =
                        self.probe(cx, &dtypes, &hvalues, argument_registers, int_width)?;
                    let done = observation.by_ref.is_some();
                    results.entry(dtype.to_string()).or_default().push(observation);
                    if done {
                        reached_boundary = true;
                        break;
                    }
                }
                limit += 1;
            }
        }
        Ok(())
    }

    /// Stage C: small all-floating-point (and mixed) member lists.
    fn special_cases(
        &self,
        cx: &mut AnalyzerContext,
        argument_registers: &[String],
        int_width: usize,
    ) -> Result<String, ProbeError> {
        let mut lines = vec!["Struct floating-point members test:".to_string()];
        for dtypes in SPECIAL_CASES {
            cx.sentinels.reset();
            let owned: Vec<String> = dtypes.iter().map(|d| d.to_string()).collect();
            let hvalues = cx.sentinels.fresh_hex_list_for_types(dtypes, &cx.target)?;
            let observation = self.probe(cx, &owned, &hvalues, argument_registers, int_width)?;
            lines.push(render_special_case(dtypes, &observation));
        }
        let mut out = lines.join("\n");
        out.push('\n');
        Ok(out)
    }
}

impl Analyzer for StructBoundaryAnalyzer {
    fn name(&self) -> &'static str {
        "struct_boundary"
    }

    fn analyze(&mut self, cx: &mut AnalyzerContext) -> Result<String, ProbeError> {
        let int_width = cx.target.int_width()?;
        let argument_registers: Vec<String> = cx.target.argument_registers()?.to_vec();

        let mut results: IndexMap<String, Vec<StructObservation>> = IndexMap::new();
        let char_limit = self.char_limit(cx, &mut results, &argument_registers, int_width)?;
        self.wider_types(cx, &mut results, char_limit, &argument_registers, int_width)?;

        let (rows, by_ref_register) = boundary_rows(&results, &cx.target)?;
        let mut summary = render_boundaries(&rows, by_ref_register.as_deref());
        summary.push('\n');
        summary.push_str(&self.special_cases(cx, &argument_registers, int_width)?);
        Ok(summary)
    }
}
