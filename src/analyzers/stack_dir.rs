//! Stack growth direction: three frames in three translation units record
//! their own local addresses; the innermost frame compares and prints the
//! verdict, which is the summary verbatim.

use crate::analyzer::{Analyzer, AnalyzerContext};
use crate::error::ProbeError;

pub struct StackDirAnalyzer;

impl Analyzer for StackDirAnalyzer {
    fn name(&self) -> &'static str {
        "stack_dir"
    }

    fn analyze(&mut self, cx: &mut AnalyzerContext) -> Result<String, ProbeError> {
        let sources = [
            cx.runtime.stack_dir_main_c.as_path(),
            cx.runtime.stack_dir_frame_a_c.as_path(),
            cx.runtime.stack_dir_frame_b_c.as_path(),
        ];
        cx.run_probe_with(self.name(), &[], &sources, &[])
    }
}
