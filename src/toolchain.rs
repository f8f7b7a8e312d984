//! The build-and-run pipeline behind every probe: compile each C source to
//! assembly, assemble everything, link, and execute the result under the
//! simulator, capturing its stdout to a file.
//!
//! All four steps go through wrapper executables found on PATH, so swapping
//! toolchains is a matter of pointing PATH at a different wrapper directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::debug;

use crate::error::ProbeError;

pub const CC_WRAPPER: &str = "cc-wrapper";
pub const AS_WRAPPER: &str = "as-wrapper";
pub const LD_WRAPPER: &str = "ld-wrapper";
pub const SIM_WRAPPER: &str = "sim-wrapper";

// -O1 is fixed: sentinels must survive constant folding, and argument
// passing must go through the ABI without spurious stack spills.
const CFLAGS: &[&str] = &["-O1"];

pub trait BuildRun {
    /// Builds the given C and assembly sources into one program, simulates
    /// it, and returns the path of the captured stdout.
    fn run(
        &self,
        sources: &[PathBuf],
        asm_sources: &[PathBuf],
        out_basename: &str,
    ) -> Result<PathBuf, ProbeError>;
}

pub struct WrapperToolchain {
    tmp_dir: PathBuf,
    verbose: bool,
}

impl WrapperToolchain {
    pub fn new(tmp_dir: PathBuf, verbose: bool) -> Self {
        Self { tmp_dir, verbose }
    }

    /// Resolves all four wrappers on PATH, returning the names of the ones
    /// that are missing.
    pub fn missing_wrappers() -> Vec<&'static str> {
        [CC_WRAPPER, AS_WRAPPER, LD_WRAPPER, SIM_WRAPPER]
            .into_iter()
            .filter(|wrapper| which::which(wrapper).is_err())
            .collect()
    }

    fn in_tmp(&self, input: &Path, extension: &str) -> PathBuf {
        let mut path = self.tmp_dir.join(input.file_name().unwrap_or_default());
        path.set_extension(extension);
        path
    }

    fn cmd(&self, step: &'static str, program: &str, args: &[&Path]) -> Result<(), ProbeError> {
        let mut command = Command::new(program);
        command.args(CFLAGS);
        command.args(args);
        if self.verbose {
            debug!(
                "EXECUTING: {program} {} {}",
                CFLAGS.join(" "),
                args.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(" ")
            );
        } else {
            command.stdout(Stdio::null()).stderr(Stdio::null());
        }
        let status = command.status().map_err(|source| ProbeError::Spawn {
            program: program.to_string(),
            source,
        })?;
        match status.code() {
            Some(0) => Ok(()),
            Some(code) => Err(ProbeError::Toolchain { step, status: code }),
            None => Err(ProbeError::NoExitStatus { step }),
        }
    }

    fn compile(&self, input: &Path, output: &Path) -> Result<(), ProbeError> {
        self.cmd("compile", CC_WRAPPER, &[input, Path::new("-S"), Path::new("-o"), output])
    }

    fn assemble(&self, input: &Path, output: &Path) -> Result<(), ProbeError> {
        self.cmd("assemble", AS_WRAPPER, &[input, Path::new("-c"), Path::new("-o"), output])
    }

    fn link(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ProbeError> {
        let mut args: Vec<&Path> = inputs.iter().map(PathBuf::as_path).collect();
        args.push(Path::new("-o"));
        args.push(output);
        self.cmd("link", LD_WRAPPER, &args)
    }

    fn simulate(&self, program: &Path, stdout_path: &Path) -> Result<(), ProbeError> {
        if self.verbose {
            debug!("EXECUTING: {SIM_WRAPPER} {}", program.display());
        }
        let mut command = Command::new(SIM_WRAPPER);
        command.arg(program);
        if self.verbose {
            command.stderr(Stdio::inherit());
        } else {
            command.stderr(Stdio::null());
        }
        let output = command.output().map_err(|source| ProbeError::Spawn {
            program: SIM_WRAPPER.to_string(),
            source,
        })?;
        match output.status.code() {
            Some(0) => {}
            Some(code) => return Err(ProbeError::Toolchain { step: "simulate", status: code }),
            None => return Err(ProbeError::NoExitStatus { step: "simulate" }),
        }
        fs::write(stdout_path, &output.stdout)?;
        Ok(())
    }
}

impl BuildRun for WrapperToolchain {
    fn run(
        &self,
        sources: &[PathBuf],
        asm_sources: &[PathBuf],
        out_basename: &str,
    ) -> Result<PathBuf, ProbeError> {
        let mut asm_files: Vec<PathBuf> = asm_sources.to_vec();
        for source in sources {
            let asm_file = self.in_tmp(source, "s");
            self.compile(source, &asm_file)?;
            asm_files.push(asm_file);
        }

        let mut object_files = Vec::with_capacity(asm_files.len());
        for asm_file in &asm_files {
            let object_file = self.in_tmp(asm_file, "o");
            self.assemble(asm_file, &object_file)?;
            object_files.push(object_file);
        }

        let program = self.tmp_dir.join(format!("{out_basename}.elf"));
        self.link(&object_files, &program)?;

        let stdout_path = self.tmp_dir.join(format!("{out_basename}.stdout"));
        self.simulate(&program, &stdout_path)?;
        Ok(stdout_path)
    }
}
