//! The probes, run in dependency order: each analyzer deposits the facts
//! the later ones read from the target model, so the order is fixed —
//! `datatypes` populates type details, `argpass` the argument-register
//! sequence and register-bank sizes, `struct_boundary` the bank count.

pub mod argpass;
pub mod bitfield;
pub mod datatypes;
pub mod empty_struct;
pub mod endianness;
pub mod returnpass;
pub mod saved;
pub mod stack_align;
pub mod stack_dir;
pub mod struct_boundary;

use crate::analyzer::{run_analyzer, Analyzer, AnalyzerContext};
use crate::report::Report;

pub fn run_all(cx: &mut AnalyzerContext, report: &mut Report) {
    let mut analyzers: Vec<Box<dyn Analyzer>> = vec![
        Box::new(datatypes::DatatypesAnalyzer),
        Box::new(stack_dir::StackDirAnalyzer),
        Box::new(stack_align::StackAlignAnalyzer),
        Box::new(endianness::EndiannessAnalyzer),
        Box::new(argpass::ArgPassAnalyzer),
        Box::new(struct_boundary::StructBoundaryAnalyzer),
        Box::new(empty_struct::EmptyStructAnalyzer),
        Box::new(saved::SavedAnalyzer),
        Box::new(returnpass::ReturnPassAnalyzer),
        Box::new(bitfield::BitFieldAnalyzer),
    ];
    for analyzer in &mut analyzers {
        run_analyzer(analyzer.as_mut(), cx, report);
    }
}
