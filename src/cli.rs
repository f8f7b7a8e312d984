use std::path::PathBuf;

use clap::Parser;

// clap's builtin help flag is disabled so `--help=cc` / `--help=sim` can
// carry a topic; plain `--help` still prints usage via default_missing_value.
#[derive(Debug, Parser)]
#[command(
    name = "abiprobe",
    version,
    disable_help_flag = true,
    about = r#"
abiprobe empirically discovers a C toolchain's ABI by compiling small probe
programs, running them under a simulator, and reading the register and stack
contents they dump.

EXAMPLES:
    # Probe the toolchain selected by the 'gcc-rv32' compiler wrappers,
    # simulated by the 'spike' wrappers:
    abiprobe --cc gcc-rv32 --sim spike

    # Same, echoing the report and keeping all generated files:
    abiprobe --cc gcc-rv32 --sim spike --print-report --save-temps
"#
)]
pub struct Opt {
    /// Compiler wrapper directory under scripts/wrapper/cc/.
    #[arg(long, value_name = "ID")]
    pub cc: Option<String>,

    /// Simulator wrapper directory under scripts/wrapper/sim/.
    #[arg(long, value_name = "ID")]
    pub sim: Option<String>,

    /// Log every external command and pass its output through.
    #[arg(short, long)]
    pub verbose: bool,

    /// Echo the report to stdout after writing it.
    #[arg(long)]
    pub print_report: bool,

    /// Keep the tmp/ working directory after the run.
    #[arg(long)]
    pub save_temps: bool,

    /// Print help; `--help=cc` and `--help=sim` list the available wrapper ids.
    #[arg(
        short = 'h',
        long = "help",
        value_name = "TOPIC",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "usage"
    )]
    pub help: Option<String>,
}

/// `scripts/wrapper/<kind>/<id>` relative to the current directory.
pub fn wrapper_dir(kind: &str, id: &str) -> PathBuf {
    ["scripts", "wrapper", kind, id].iter().collect()
}

/// The wrapper ids available for `--cc` or `--sim`: the subdirectories of
/// `scripts/wrapper/<kind>`.
pub fn wrapper_ids(kind: &str) -> Vec<String> {
    let base: PathBuf = ["scripts", "wrapper", kind].iter().collect();
    let mut ids: Vec<String> = std::fs::read_dir(base)
        .into_iter()
        .flatten()
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect();
    ids.sort();
    ids
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Opt::command().debug_assert();
    }

    #[test]
    fn verify_cli_flags() {
        let opt = Opt::parse_from(["abiprobe", "--cc", "gcc-rv32", "--sim", "spike"]);
        assert_eq!(opt.cc.as_deref(), Some("gcc-rv32"));
        assert_eq!(opt.sim.as_deref(), Some("spike"));
        assert!(!opt.verbose && !opt.print_report && !opt.save_temps);
        assert!(opt.help.is_none());

        let opt = Opt::parse_from(["abiprobe", "-v", "--cc", "x", "--sim", "y", "--save-temps"]);
        assert!(opt.verbose && opt.save_temps);

        let opt_res = Opt::try_parse_from(["abiprobe", "--unknown"]);
        assert!(opt_res.is_err());
    }

    #[test]
    fn verify_cli_help_topics() {
        let opt = Opt::parse_from(["abiprobe", "--help"]);
        assert_eq!(opt.help.as_deref(), Some("usage"));

        let opt = Opt::parse_from(["abiprobe", "--help=cc"]);
        assert_eq!(opt.help.as_deref(), Some("cc"));

        let opt = Opt::parse_from(["abiprobe", "--help=sim"]);
        assert_eq!(opt.help.as_deref(), Some("sim"));
    }

    #[test]
    fn wrapper_dirs_are_keyed_by_kind_and_id() {
        let dir = wrapper_dir("cc", "gcc-rv32");
        assert!(dir.ends_with(PathBuf::from("scripts/wrapper/cc/gcc-rv32")));
    }
}
