//! The analyzer contract and the plumbing every probe shares.
//!
//! An analyzer generates one or more C sources, hands them to the toolchain
//! together with the fixed runtime support sources, parses the captured
//! stdout, and returns a summary fragment for the report. The plumbing here
//! handles temp-file allocation, the build-and-run call, summary emission
//! and the skip-on-failure policy; the probes supply generation and
//! interpretation.

use std::fs;
use std::path::{Path, PathBuf};

use log::warn;

use crate::error::ProbeError;
use crate::report::Report;
use crate::sentinel::SentinelAllocator;
use crate::target::Target;
use crate::toolchain::BuildRun;

/// The fixed target-specific sources shipped inside the binary and written
/// into the working directory at startup.
pub struct RuntimeSources {
    pub helper_c: PathBuf,
    pub arch_asm: PathBuf,
    pub return_asm: PathBuf,
    pub endianness_c: PathBuf,
    pub stack_dir_main_c: PathBuf,
    pub stack_dir_frame_a_c: PathBuf,
    pub stack_dir_frame_b_c: PathBuf,
}

impl RuntimeSources {
    pub fn materialize(tmp_dir: &Path) -> std::io::Result<Self> {
        let write = |name: &str, content: &str| -> std::io::Result<PathBuf> {
            let path = tmp_dir.join(name);
            fs::write(&path, content)?;
            Ok(path)
        };
        Ok(Self {
            helper_c: write("helper.c", include_str!("../runtime/helper.c"))?,
            arch_asm: write("riscv.S", include_str!("../runtime/arch/riscv.S"))?,
            return_asm: write("riscv_return.S", include_str!("../runtime/arch/riscv_return.S"))?,
            endianness_c: write("endianness.c", include_str!("../runtime/endianness.c"))?,
            stack_dir_main_c: write(
                "stack_dir_main.c",
                include_str!("../runtime/stack_dir/main.c"),
            )?,
            stack_dir_frame_a_c: write(
                "stack_dir_frame_a.c",
                include_str!("../runtime/stack_dir/frame_a.c"),
            )?,
            stack_dir_frame_b_c: write(
                "stack_dir_frame_b.c",
                include_str!("../runtime/stack_dir/frame_b.c"),
            )?,
        })
    }
}

pub struct AnalyzerContext<'a> {
    pub toolchain: &'a dyn BuildRun,
    pub runtime: &'a RuntimeSources,
    pub tmp_dir: &'a Path,
    pub target: Target,
    pub sentinels: SentinelAllocator,
}

impl<'a> AnalyzerContext<'a> {
    pub fn new(toolchain: &'a dyn BuildRun, runtime: &'a RuntimeSources, tmp_dir: &'a Path) -> Self {
        Self {
            toolchain,
            runtime,
            tmp_dir,
            target: Target::riscv(),
            sentinels: SentinelAllocator::new(),
        }
    }

    /// Writes generated C source into a uniquely named file in the working
    /// directory. The analyzer name keeps leftovers attributable under
    /// `--save-temps`.
    pub fn write_generated(&self, analyzer: &str, content: &str) -> Result<PathBuf, ProbeError> {
        let file = tempfile::Builder::new()
            .prefix(&format!("{analyzer}_"))
            .suffix(".c")
            .tempfile_in(self.tmp_dir)?;
        fs::write(file.path(), content)?;
        let (_, path) = file.keep().map_err(|err| ProbeError::Io(err.error))?;
        Ok(path)
    }

    /// Writes generated source under a fixed name. Needed when the content
    /// is found via `#include` and the name must be predictable.
    pub fn write_named(&self, file_name: &str, content: &str) -> Result<PathBuf, ProbeError> {
        let path = self.tmp_dir.join(file_name);
        fs::write(&path, content)?;
        Ok(path)
    }

    /// Builds and simulates the default probe shape: the dump helper, the
    /// target assembly, and the given generated sources.
    pub fn run_probe(&self, analyzer: &str, generated: &[String]) -> Result<String, ProbeError> {
        self.run_probe_with(analyzer, generated, &[], &[])
    }

    pub fn run_probe_with(
        &self,
        analyzer: &str,
        generated: &[String],
        extra_sources: &[&Path],
        extra_asm: &[&Path],
    ) -> Result<String, ProbeError> {
        let mut sources = vec![self.runtime.helper_c.clone()];
        sources.extend(extra_sources.iter().map(|p| p.to_path_buf()));
        for content in generated {
            sources.push(self.write_generated(analyzer, content)?);
        }
        let mut asm_sources = vec![self.runtime.arch_asm.clone()];
        asm_sources.extend(extra_asm.iter().map(|p| p.to_path_buf()));

        let stdout_path = self.toolchain.run(&sources, &asm_sources, analyzer)?;
        fs::read_to_string(&stdout_path)
            .map_err(|source| ProbeError::Stdout { path: stdout_path, source })
    }
}

pub trait Analyzer {
    fn name(&self) -> &'static str;

    /// Runs the probe and returns its summary fragment.
    fn analyze(&mut self, cx: &mut AnalyzerContext) -> Result<String, ProbeError>;
}

/// Runs one analyzer and attaches its summary to the report. A failure is
/// reported as a skip; it never aborts the driver.
pub fn run_analyzer(analyzer: &mut dyn Analyzer, cx: &mut AnalyzerContext, report: &mut Report) {
    cx.sentinels.reset();
    match analyzer.analyze(cx) {
        Ok(summary) => {
            let summary_file = cx.tmp_dir.join(format!("{}.sum", analyzer.name()));
            match fs::write(&summary_file, summary) {
                Ok(()) => report.append(summary_file),
                Err(err) => {
                    warn!("could not write summary for '{}': {err}", analyzer.name());
                    eprintln!("Skip: '{}' analyzer failed.", analyzer.name());
                }
            }
        }
        Err(err) => {
            warn!("'{}' analyzer failed: {err}", analyzer.name());
            eprintln!("Skip: '{}' analyzer failed.", analyzer.name());
        }
    }
}
