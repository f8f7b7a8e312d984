mod analyzer;
mod analyzers;
mod cli;
mod dump;
mod error;
mod hex;
mod matcher;
mod report;
mod sentinel;
mod target;
mod toolchain;

use std::fs;
use std::path::PathBuf;

use analyzer::{AnalyzerContext, RuntimeSources};
use report::Report;
use toolchain::WrapperToolchain;

fn main() {
    use clap::Parser;
    let opt = match cli::Opt::try_parse() {
        Ok(opt) => opt,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };

    if let Some(topic) = opt.help.as_deref() {
        print_help(topic);
    }

    let mut logger = env_logger::Builder::from_default_env();
    if opt.verbose {
        logger.filter_level(log::LevelFilter::Debug);
    }
    logger.init();

    let (cc, sim) = match (&opt.cc, &opt.sim) {
        (Some(cc), Some(sim)) => (cc.as_str(), sim.as_str()),
        _ => {
            eprintln!("abiprobe: both --cc and --sim are required (see --help=cc and --help=sim)");
            std::process::exit(1);
        }
    };

    if let Err(message) = set_up_wrapper_path(cc, sim) {
        eprintln!("abiprobe: {message}");
        std::process::exit(1);
    }

    let tmp_dir = PathBuf::from("tmp");
    if let Err(err) = fs::create_dir_all(&tmp_dir) {
        eprintln!("abiprobe: could not create working directory {tmp_dir:?}: {err}");
        std::process::exit(1);
    }
    let runtime = match RuntimeSources::materialize(&tmp_dir) {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("abiprobe: could not write runtime sources: {err}");
            std::process::exit(1);
        }
    };

    let toolchain = WrapperToolchain::new(tmp_dir.clone(), opt.verbose);
    let mut report = Report::new(PathBuf::from(format!("{cc}_{sim}.report")));

    eprintln!("Running {cc} with {sim}...");

    let mut cx = AnalyzerContext::new(&toolchain, &runtime, &tmp_dir);
    analyzers::run_all(&mut cx, &mut report);

    if let Err(err) = report.write(opt.print_report) {
        eprintln!("abiprobe: could not write {:?}: {err}", report.path());
        std::process::exit(1);
    }

    if !opt.save_temps {
        if let Err(err) = fs::remove_dir_all(&tmp_dir) {
            log::warn!("could not clean {tmp_dir:?}: {err}");
        }
    }
}

fn print_help(topic: &str) -> ! {
    use clap::CommandFactory;
    match topic {
        "usage" => {
            let _ = cli::Opt::command().print_long_help();
            std::process::exit(0);
        }
        "cc" | "sim" => {
            let ids = cli::wrapper_ids(topic);
            if ids.is_empty() {
                println!("no wrapper directories found under scripts/wrapper/{topic}/");
            } else {
                println!("available --{topic} ids:");
                for id in ids {
                    println!("  {id}");
                }
            }
            std::process::exit(0);
        }
        other => {
            eprintln!("abiprobe: unknown help topic '{other}' (expected 'cc' or 'sim')");
            std::process::exit(1);
        }
    }
}

/// Prepends the selected compiler and simulator wrapper directories to PATH
/// and checks that all four wrapper executables resolve.
fn set_up_wrapper_path(cc: &str, sim: &str) -> Result<(), String> {
    let cc_dir = cli::wrapper_dir("cc", cc);
    if !cc_dir.is_dir() {
        return Err(format!("unknown --cc id '{cc}': {} is not a directory", cc_dir.display()));
    }
    let sim_dir = cli::wrapper_dir("sim", sim);
    if !sim_dir.is_dir() {
        return Err(format!("unknown --sim id '{sim}': {} is not a directory", sim_dir.display()));
    }

    prepend_to_path(&[cc_dir, sim_dir])?;

    let missing = WrapperToolchain::missing_wrappers();
    if !missing.is_empty() {
        return Err(format!("wrapper executables not found on PATH: {}", missing.join(", ")));
    }
    Ok(())
}

fn prepend_to_path(dirs: &[PathBuf]) -> Result<(), String> {
    let absolute: Result<Vec<PathBuf>, String> = dirs
        .iter()
        .map(|dir| {
            dir.canonicalize()
                .map_err(|err| format!("could not resolve {}: {err}", dir.display()))
        })
        .collect();
    let mut paths = absolute?;
    if let Some(existing) = std::env::var_os("PATH") {
        paths.extend(std::env::split_paths(&existing));
    }
    let joined = std::env::join_paths(paths)
        .map_err(|err| format!("could not rebuild PATH: {err}"))?;
    std::env::set_var("PATH", joined);
    Ok(())
}
