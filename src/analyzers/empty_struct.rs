//! Empty struct probe: passes an empty struct at every position of the
//! argument list and checks that it occupies no argument register.
//!
//! The generated program emits one dump per call:
//!
//! ```c
//! callee(S, I);
//! callee(I, S, I);
//! callee(I, I, S, I);
//! ```
//!
//! For the k-th call the first k argument registers must all hold the
//! sentinel `I`; if they do for every call, the empty struct was ignored.

use crate::analyzer::{Analyzer, AnalyzerContext};
use crate::dump::DumpSnapshot;
use crate::error::ProbeError;
use crate::hex::HexValue;
use crate::target::Target;

/// A fixed, recognizable filler; the probe asks where `I` went, not what it
/// is, so it does not need to be fresh.
const KEYWORD: &str = "0xdead";

fn generate(max_call_count: usize) -> String {
    let mut src = String::from(
        r#"
struct emptyStruct {
};

extern void callee();

int main (void) {
    int I = 0xdead;
    struct emptyStruct S;

"#,
    );
    // One extra call so the struct also visits the last argument register.
    for call_count in 2..=max_call_count + 1 {
        let arguments: Vec<&str> = (0..call_count)
            .map(|position| if position == call_count - 2 { "S" } else { "I" })
            .collect();
        src.push_str(&format!("    callee({});\n", arguments.join(", ")));
    }
    src.push_str("}\n");
    src
}

fn keyword_in_argument_registers(
    snapshot: &DumpSnapshot,
    target: &Target,
    argument_registers: &[String],
    count: usize,
) -> bool {
    let keyword = HexValue::parse(KEYWORD).unwrap();
    argument_registers.iter().take(count).all(|register| {
        snapshot.banks.iter().any(|(bank_id, values)| {
            let names = target.bank_registers(bank_id);
            names
                .iter()
                .position(|name| *name == register.as_str())
                .and_then(|index| values.get(index))
                .is_some_and(|value| *value == keyword)
        })
    })
}

fn validate(
    snapshots: &[DumpSnapshot],
    target: &Target,
    argument_registers: &[String],
) -> bool {
    !snapshots.is_empty()
        && snapshots.iter().enumerate().all(|(index, snapshot)| {
            keyword_in_argument_registers(snapshot, target, argument_registers, index + 1)
        })
}

pub struct EmptyStructAnalyzer;

impl Analyzer for EmptyStructAnalyzer {
    fn name(&self) -> &'static str {
        "empty_struct"
    }

    fn analyze(&mut self, cx: &mut AnalyzerContext) -> Result<String, ProbeError> {
        let argument_registers: Vec<String> = cx.target.argument_registers()?.to_vec();
        let stdout = cx.run_probe(self.name(), &[generate(argument_registers.len())])?;
        let snapshots = DumpSnapshot::parse_all(&stdout)?;
        let ignored = validate(&snapshots, &cx.target, &argument_registers);

        let verdict = if ignored {
            "- empty struct is ignored by C compiler."
        } else {
            "- empty struct is not ignored by C compiler."
        };
        Ok(format!("Empty struct test:\n{verdict}\n"))
    }
}
