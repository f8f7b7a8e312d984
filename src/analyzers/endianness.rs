//! Byte order: a fixed C source prints the bytes of a known integer in
//! memory order; its stdout is the summary verbatim.

use crate::analyzer::{Analyzer, AnalyzerContext};
use crate::error::ProbeError;

pub struct EndiannessAnalyzer;

impl Analyzer for EndiannessAnalyzer {
    fn name(&self) -> &'static str {
        "endianness"
    }

    fn analyze(&mut self, cx: &mut AnalyzerContext) -> Result<String, ProbeError> {
        cx.run_probe_with(self.name(), &[], &[cx.runtime.endianness_c.as_path()], &[])
    }
}
