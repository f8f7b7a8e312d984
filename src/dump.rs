//! Parser for the line-oriented dump stream emitted by the fixed target
//! helper (`runtime/helper.c`).
//!
//! The stream uses comment markers as section delimiters: `// Header info`,
//! one `// <bank_id>` section per register bank, `// Start of stack dump`,
//! and `// Done` between snapshots when the probe invokes the callee more
//! than once. Anything before the first header marker (for example a
//! probe's own `printf` output) is skipped.

use indexmap::IndexMap;

use crate::error::ProbeError;
use crate::hex::HexValue;

#[derive(Debug, Clone)]
pub struct BankInfo {
    pub id: String,
    pub register_size: usize,
    pub register_count: usize,
}

#[derive(Debug, Clone)]
pub struct StackEntry {
    pub address: HexValue,
    pub value: HexValue,
}

pub type Banks = IndexMap<String, Vec<HexValue>>;

#[derive(Debug)]
pub struct DumpSnapshot {
    pub stack_pointer: HexValue,
    pub stack_pointer_size: usize,
    pub bank_infos: Vec<BankInfo>,
    pub banks: Banks,
    pub stack: Vec<StackEntry>,
}

impl DumpSnapshot {
    /// Parses the first snapshot of a stream.
    pub fn parse(text: &str) -> Result<DumpSnapshot, ProbeError> {
        Self::parse_all(text)?
            .into_iter()
            .next()
            .ok_or_else(|| ProbeError::MalformedDump("stream contains no snapshot".into()))
    }

    /// Splits a stream on `// Done` and parses every section that carries a
    /// header. Sections without one (e.g. a trailing newline) are ignored.
    pub fn parse_all(text: &str) -> Result<Vec<DumpSnapshot>, ProbeError> {
        let mut snapshots = Vec::new();
        let mut section: Vec<&str> = Vec::new();
        for line in text.lines() {
            if line.contains("// Done") {
                if section.iter().any(|l| l.contains("// Header info")) {
                    snapshots.push(Self::parse_section(&section)?);
                }
                section.clear();
            } else {
                section.push(line);
            }
        }
        if section.iter().any(|l| l.contains("// Header info")) {
            snapshots.push(Self::parse_section(&section)?);
        }
        Ok(snapshots)
    }

    fn parse_section(lines: &[&str]) -> Result<DumpSnapshot, ProbeError> {
        let mut cursor = lines
            .iter()
            .position(|l| l.contains("// Header info"))
            .ok_or_else(|| ProbeError::MalformedDump("missing `// Header info`".into()))?
            + 1;

        let mut header: Vec<&str> = Vec::new();
        while cursor < lines.len() && !lines[cursor].trim_start().starts_with("//") {
            let line = lines[cursor].trim();
            if !line.is_empty() {
                header.push(line);
            }
            cursor += 1;
        }
        if header.len() < 3 {
            return Err(ProbeError::MalformedDump("truncated header".into()));
        }

        let stack_pointer = parse_hex(header[0])?;
        let stack_pointer_size = parse_usize(header[1])?;
        let bank_count = parse_usize(header[2])?;
        if header.len() != 3 + 3 * bank_count {
            return Err(ProbeError::MalformedDump(format!(
                "header declares {bank_count} banks but carries {} lines",
                header.len()
            )));
        }

        let mut bank_infos = Vec::with_capacity(bank_count);
        for bank in 0..bank_count {
            let base = 3 + 3 * bank;
            bank_infos.push(BankInfo {
                id: header[base].to_string(),
                register_size: parse_usize(header[base + 1])?,
                register_count: parse_usize(header[base + 2])?,
            });
        }

        let mut banks = Banks::default();
        for info in &bank_infos {
            let marker = format!("// {}", info.id);
            if cursor >= lines.len() || lines[cursor].trim() != marker {
                return Err(ProbeError::MalformedDump(format!("missing section `{marker}`")));
            }
            cursor += 1;
            let mut values = Vec::with_capacity(info.register_count);
            while cursor < lines.len() && !lines[cursor].trim_start().starts_with("//") {
                let line = lines[cursor].trim();
                if !line.is_empty() {
                    values.push(parse_hex(line)?);
                }
                cursor += 1;
            }
            if values.len() != info.register_count {
                return Err(ProbeError::MalformedDump(format!(
                    "bank {} declares {} registers but dumped {}",
                    info.id,
                    info.register_count,
                    values.len()
                )));
            }
            banks.insert(info.id.clone(), values);
        }

        let mut stack = Vec::new();
        if cursor < lines.len() && lines[cursor].contains("// Start of stack dump") {
            cursor += 1;
            while cursor < lines.len() && !lines[cursor].trim_start().starts_with("//") {
                let line = lines[cursor].trim();
                if !line.is_empty() {
                    let (address, value) = line
                        .split_once(" : ")
                        .ok_or_else(|| {
                            ProbeError::MalformedDump(format!("bad stack line `{line}`"))
                        })?;
                    stack.push(StackEntry {
                        address: parse_hex(address)?,
                        value: parse_hex(value)?,
                    });
                }
                cursor += 1;
            }
        }

        // The helper walks the stack window upward one slot at a time; any
        // other stride means the dump and the parser disagree about layout.
        for pair in stack.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            let stride = next
                .address
                .as_u64()
                .zip(prev.address.as_u64())
                .map(|(n, p)| n.wrapping_sub(p));
            if stride != Some(stack_pointer_size as u64) {
                return Err(ProbeError::MalformedDump(format!(
                    "stack addresses {} and {} are not {} bytes apart",
                    prev.address, next.address, stack_pointer_size
                )));
            }
        }

        Ok(DumpSnapshot {
            stack_pointer,
            stack_pointer_size,
            bank_infos,
            banks,
            stack,
        })
    }
}

fn parse_hex(s: &str) -> Result<HexValue, ProbeError> {
    HexValue::parse(s).ok_or_else(|| ProbeError::MalformedDump(format!("bad hex value `{s}`")))
}

fn parse_usize(s: &str) -> Result<usize, ProbeError> {
    parse_hex(s)?
        .as_u64()
        .map(|v| v as usize)
        .ok_or_else(|| ProbeError::MalformedDump(format!("oversized integer `{s}`")))
}
