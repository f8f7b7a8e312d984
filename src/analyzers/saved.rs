//! Caller/callee-saved probe.
//!
//! `main` writes a first sentinel into every register and calls `aux`;
//! `aux` declares (via an empty asm block with a full clobber list) that it
//! clobbers everything, then writes a second sentinel into every register
//! and returns. Back in `main` a dump is taken: registers the callee had to
//! restore carry the first sentinel again (callee-saved), registers the
//! callee may freely use still carry the second one (caller-saved).

use crate::analyzer::{Analyzer, AnalyzerContext};
use crate::dump::DumpSnapshot;
use crate::error::ProbeError;
use crate::hex::HexValue;
use crate::matcher::find_registers_fill;

/// Registers that cannot appear in a clobber list (or that clobbering would
/// make unreturnable-from).
const UNCLOBBERABLE: [&str; 4] = ["zero", "sp", "gp", "tp"];

fn generate_main(first: &HexValue) -> String {
    format!(
        r#"extern void callee (void);
extern void reset_registers (void);
extern void set_registers (int);
void aux (void);

int main (void) {{
    reset_registers();
    set_registers({first});
    aux();
    callee();

    return 0;
}}
"#
    )
}

fn generate_aux(second: &HexValue, clobbers: &[&str]) -> String {
    let clobber_list = clobbers
        .iter()
        .map(|name| format!("\"{name}\""))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        r#"extern void set_registers (int);

void aux (void) {{
    asm volatile (""
    :
    :
    : {clobber_list});

    set_registers({second});

    /* Keep the second write from being scheduled away. */
    asm volatile("":::);
}}
"#
    )
}

fn summarize(caller_saved: &[String], callee_saved: &[String]) -> String {
    format!(
        "Caller/callee-saved test:\n - caller-saved {}\n - callee-saved {}\n",
        caller_saved.join(", "),
        callee_saved.join(", ")
    )
}

pub struct SavedAnalyzer;

impl Analyzer for SavedAnalyzer {
    fn name(&self) -> &'static str {
        "saved"
    }

    fn analyze(&mut self, cx: &mut AnalyzerContext) -> Result<String, ProbeError> {
        let int_width = cx.target.int_width()?;
        cx.sentinels.reset();
        let first = cx.sentinels.fresh_hex(int_width);
        let second = cx.sentinels.fresh_hex(int_width);

        let clobbers: Vec<&str> = cx
            .target
            .all_register_names()
            .into_iter()
            .filter(|name| !UNCLOBBERABLE.contains(name))
            .collect();

        let sources = [generate_main(&first), generate_aux(&second, &clobbers)];
        let stdout = cx.run_probe(self.name(), &sources)?;
        let snapshot = DumpSnapshot::parse(&stdout)?;

        // The registers still holding the value written inside aux survived
        // the return, so the caller owns saving them; the ones holding the
        // value from main were restored by aux's epilogue.
        let caller_saved =
            find_registers_fill(&[second], &snapshot.banks, &cx.target).registers;
        let callee_saved =
            find_registers_fill(&[first], &snapshot.banks, &cx.target).registers;

        Ok(summarize(
            &caller_saved.keys().cloned().collect::<Vec<_>>(),
            &callee_saved.keys().cloned().collect::<Vec<_>>(),
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::target::Target;

    #[test]
    fn aux_clobbers_everything_but_the_unclobberable() {
        let second = HexValue::parse("0x22221111").unwrap();
        let target = Target::riscv();
        let clobbers: Vec<&str> = target
            .all_register_names()
            .into_iter()
            .filter(|name| !UNCLOBBERABLE.contains(name))
            .collect();
        let source = generate_aux(&second, &clobbers);
        assert!(source.contains("\"ra\", \"t0\""));
        assert!(source.contains("\"ft11\""));
        assert!(!source.contains("\"sp\""));
        assert!(!source.contains("\"zero\""));
        assert!(source.contains("set_registers(0x22221111);"));
    }

    #[test]
    fn main_writes_then_calls_then_dumps() {
        let first = HexValue::parse("0x11112222").unwrap();
        let source = generate_main(&first);
        let set = source.find("set_registers(0x11112222);").unwrap();
        let aux = source.find("aux();").unwrap();
        let dump = source.find("callee();").unwrap();
        assert!(set < aux && aux < dump);
    }

    #[test]
    fn summary_lists_both_register_classes() {
        let caller: Vec<String> = ["ra", "t0", "a0"].map(String::from).to_vec();
        let callee: Vec<String> = ["s0", "s1"].map(String::from).to_vec();
        let summary = summarize(&caller, &callee);
        assert_eq!(
            summary,
            "Caller/callee-saved test:\n - caller-saved ra, t0, a0\n - callee-saved s0, s1\n"
        );
    }
}
