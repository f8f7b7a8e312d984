//! The report: per-analyzer summary files collected in run order and
//! concatenated into `<cc>_<sim>.report` at the end.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct Report {
    path: PathBuf,
    summary_files: Vec<PathBuf>,
}

impl Report {
    pub fn new(path: PathBuf) -> Self {
        Self { path, summary_files: Vec::new() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, summary_file: PathBuf) {
        self.summary_files.push(summary_file);
    }

    /// Concatenates the collected summaries (each followed by one blank
    /// line) and writes the report atomically: the content lands in a
    /// sibling temp file first and is renamed into place.
    pub fn write(&self, echo_to_stdout: bool) -> std::io::Result<()> {
        let mut content = String::new();
        for summary_file in &self.summary_files {
            content.push_str(&fs::read_to_string(summary_file)?);
            content.push('\n');
        }

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(content.as_bytes())?;
        file.persist(&self.path).map_err(|err| err.error)?;

        if echo_to_stdout {
            print!("{content}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn concatenates_in_append_order_with_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.sum");
        let second = dir.path().join("b.sum");
        fs::write(&first, "First summary:\n- fact\n").unwrap();
        fs::write(&second, "Second summary:\n- other fact\n").unwrap();

        let mut report = Report::new(dir.path().join("cc_sim.report"));
        report.append(first);
        report.append(second);
        report.write(false).unwrap();

        let content = fs::read_to_string(report.path()).unwrap();
        assert_eq!(
            content,
            "First summary:\n- fact\n\nSecond summary:\n- other fact\n\n"
        );
    }

    #[test]
    fn missing_summary_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut report = Report::new(dir.path().join("out.report"));
        report.append(dir.path().join("nope.sum"));
        assert!(report.write(false).is_err());
    }
}
