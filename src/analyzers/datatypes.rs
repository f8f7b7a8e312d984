//! Fundamental type probe: size, alignment and signedness of every C
//! fundamental type, plus the layout of `struct { char; T; }` and
//! `union { char; T; }` wrappers.
//!
//! The generated program measures alignment as the offset of a `T` member
//! that follows a single `char` inside a struct object, which the C
//! standard pads exactly up to `_Alignof(T)`. Signedness is observed by
//! assigning `-1` and comparing (skipped for `void*`, where some compilers
//! reject the assignment).

use std::collections::BTreeMap;
use std::fmt::Write;

use indexmap::IndexMap;

use crate::analyzer::{Analyzer, AnalyzerContext};
use crate::error::ProbeError;
use crate::target::TypeDetails;

pub const TYPES: [&str; 11] = [
    "char",
    "signed char",
    "unsigned char",
    "short",
    "int",
    "long",
    "long long",
    "void*",
    "float",
    "double",
    "long double",
];

/// `long long` -> `long_long`, `void*` -> `void`; used for C identifiers.
fn identifier(dtype: &str) -> String {
    dtype.replace(' ', "_").replace('*', "")
}

fn generate() -> String {
    let mut src = String::new();
    src.push_str(
        r#"#include <stdio.h>
#include <stdint.h>

void print_info(const char *datatype, int signedness, size_t size, uintptr_t offset) {
    printf("%-20s: signedness: %d, size: %zu, align: %zu\n", datatype, signedness, size, (size_t)offset);
}
"#,
    );

    for (index, dtype) in TYPES.iter().enumerate() {
        let ident = identifier(dtype);
        let _ = write!(
            src,
            r#"
struct struct_{ident} {{
  {dtype} theType;
}};
struct StructType{index} {{
  char dummy;
  struct struct_{ident} theType;
}} theStructTypeObject{index};
"#
        );
    }

    for (index, dtype) in TYPES.iter().enumerate() {
        let ident = identifier(dtype);
        let _ = write!(
            src,
            r#"
union union_{ident} {{
  char dummy;
  {dtype} theType;
}};
struct UnionType{index} {{
  char dummy;
  union union_{ident} theType;
}} theUnionTypeObject{index};
"#
        );
    }

    for (index, dtype) in TYPES.iter().enumerate() {
        let _ = write!(
            src,
            r#"
struct Type{index} {{
  char dummy;
  {dtype} theType;
}} theTypeObject{index};
"#
        );
    }

    src.push_str("\nvoid analyzeTypesUsingGlobals(void) {\n");
    for (index, dtype) in TYPES.iter().enumerate() {
        if *dtype == "void*" {
            let _ = writeln!(
                src,
                "  print_info(\"{dtype}\", 0, sizeof({dtype}), (uintptr_t)&theTypeObject{index}.theType - (uintptr_t)&theTypeObject{index}.dummy);"
            );
        } else {
            let _ = writeln!(src, "  theTypeObject{index}.theType = -1;");
            let _ = writeln!(
                src,
                "  print_info(\"{dtype}\", theTypeObject{index}.theType == -1, sizeof({dtype}), (uintptr_t)&theTypeObject{index}.theType - (uintptr_t)&theTypeObject{index}.dummy);"
            );
        }
    }
    for (index, dtype) in TYPES.iter().enumerate() {
        let ident = identifier(dtype);
        let _ = writeln!(
            src,
            "  print_info(\"struct {dtype}\", 0, sizeof(struct struct_{ident}), (uintptr_t)&theStructTypeObject{index}.theType - (uintptr_t)&theStructTypeObject{index}.dummy);"
        );
    }
    for (index, dtype) in TYPES.iter().enumerate() {
        let ident = identifier(dtype);
        let _ = writeln!(
            src,
            "  print_info(\"union {dtype}\", 0, sizeof(union union_{ident}), (uintptr_t)&theUnionTypeObject{index}.theType - (uintptr_t)&theUnionTypeObject{index}.dummy);"
        );
    }
    src.push_str("}\n\nint main(void) {\n  analyzeTypesUsingGlobals();\n  return 0;\n}\n");
    src
}

fn parse_type_line(line: &str) -> Option<(String, TypeDetails)> {
    let (name, rest) = line.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let mut signedness = None;
    let mut size = None;
    let mut align = None;
    for part in rest.split(',') {
        let (key, value) = part.split_once(':')?;
        let value = value.trim();
        match key.trim() {
            "signedness" => signedness = value.parse::<u8>().ok(),
            "size" => size = value.parse::<usize>().ok(),
            "align" => align = value.parse::<usize>().ok(),
            _ => {}
        }
    }
    Some((
        name.to_string(),
        TypeDetails { signed: signedness? == 1, size: size?, align: align? },
    ))
}

pub fn parse_type_info(stdout: &str) -> IndexMap<String, TypeDetails> {
    stdout.lines().filter_map(parse_type_line).collect()
}

fn summarize(details: &IndexMap<String, TypeDetails>) -> String {
    let mut size: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
    let mut align: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
    let mut signedness: Vec<&str> = Vec::new();
    let mut struct_size: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
    let mut struct_align: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
    let mut union_size: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
    let mut union_align: BTreeMap<usize, Vec<&str>> = BTreeMap::new();

    for (name, detail) in details {
        if let Some(base) = name.strip_prefix("struct ") {
            struct_size.entry(detail.size).or_default().push(base);
            struct_align.entry(detail.align).or_default().push(base);
        } else if let Some(base) = name.strip_prefix("union ") {
            union_size.entry(detail.size).or_default().push(base);
            union_align.entry(detail.align).or_default().push(base);
        } else {
            size.entry(detail.size).or_default().push(name.as_str());
            align.entry(detail.align).or_default().push(name.as_str());
            if detail.signed {
                signedness.push(name.as_str());
            }
        }
    }

    let mut lines: Vec<String> = Vec::new();
    let tables: [(&str, &BTreeMap<usize, Vec<&str>>); 6] = [
        ("size", &size),
        ("align", &align),
        ("struct size", &struct_size),
        ("struct align", &struct_align),
        ("union size", &union_size),
        ("union align", &union_align),
    ];
    // The signedness table goes third, between the fundamental and the
    // struct/union tables.
    for (position, (key, table)) in tables.iter().enumerate() {
        if position == 2 {
            lines.push("Datatype signedness test:".to_string());
            lines.push(format!(" - {}", signedness.join(" : ")));
            lines.push(String::new());
        }
        lines.push(format!("Datatype {key} test:"));
        for (value, names) in table.iter() {
            lines.push(format!(" - {value}: {}", names.join(" : ")));
        }
        lines.push(String::new());
    }
    let mut out = lines.join("\n");
    while out.ends_with('\n') {
        out.pop();
    }
    out.push('\n');
    out
}

pub struct DatatypesAnalyzer;

impl Analyzer for DatatypesAnalyzer {
    fn name(&self) -> &'static str {
        "datatypes"
    }

    fn analyze(&mut self, cx: &mut AnalyzerContext) -> Result<String, ProbeError> {
        let stdout = cx.run_probe(self.name(), &[generate()])?;
        let details = parse_type_info(&stdout);
        if !details.contains_key("int") {
            return Err(ProbeError::MissingOutput("type details"));
        }
        let summary = summarize(&details);
        cx.target.set_type_details(details);
        Ok(summary)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const SAMPLE: &str = "\
char                : signedness: 1, size: 1, align: 1
signed char         : signedness: 1, size: 1, align: 1
unsigned char       : signedness: 0, size: 1, align: 1
short               : signedness: 1, size: 2, align: 2
int                 : signedness: 1, size: 4, align: 4
long                : signedness: 1, size: 4, align: 4
long long           : signedness: 1, size: 8, align: 8
void*               : signedness: 0, size: 4, align: 4
float               : signedness: 1, size: 4, align: 4
double              : signedness: 1, size: 8, align: 8
long double         : signedness: 1, size: 16, align: 16
struct char         : signedness: 0, size: 1, align: 1
struct int          : signedness: 0, size: 4, align: 4
union char          : signedness: 0, size: 1, align: 1
union int           : signedness: 0, size: 4, align: 4
";

    #[test]
    fn parses_print_info_lines() {
        let details = parse_type_info(SAMPLE);
        assert_eq!(details["int"], TypeDetails { signed: true, size: 4, align: 4 });
        assert_eq!(details["void*"].signed, false);
        assert_eq!(details["long long"].size, 8);
        assert_eq!(details["struct int"].align, 4);
        assert!(parse_type_line("// Header info").is_none());
        assert!(parse_type_line("").is_none());
    }

    #[test]
    fn summary_tables_are_sorted_by_key() {
        let details = parse_type_info(SAMPLE);
        let summary = summarize(&details);
        let size_table_start = summary.find("Datatype size test:").unwrap();
        let align_table_start = summary.find("Datatype align test:").unwrap();
        let size_table = &summary[size_table_start..align_table_start];
        let keys: Vec<&str> = size_table
            .lines()
            .skip(1)
            .filter_map(|l| l.trim().strip_prefix("- "))
            .map(|l| l.split(':').next().unwrap().trim())
            .collect();
        assert_eq!(keys, ["1", "2", "4", "8", "16"]);
        assert!(summary.contains(" - 4: int : long : void* : float"));
        assert!(summary.contains("Datatype signedness test:"));
        assert!(
            summary.contains("char : signed char : short : int : long : long long : float : double : long double")
        );
        assert!(summary.contains("Datatype union align test:"));
    }

    #[test]
    fn generator_emits_wrappers_for_every_type() {
        let source = generate();
        assert!(source.contains("struct struct_long_long"));
        assert!(source.contains("union union_void"));
        assert!(source.contains("print_info(\"struct long long\""));
        // void* never gets the -1 signedness assignment.
        assert!(!source.contains("theTypeObject7.theType = -1"));
        assert!(source.contains("analyzeTypesUsingGlobals"));
    }
}
