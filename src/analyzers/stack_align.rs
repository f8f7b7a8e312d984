//! Stack alignment: a ladder of functions with local arrays of every size
//! from 1 to `LADDER` bytes calls downward through a function-pointer array,
//! ORing the stack pointer at each depth into an accumulator. Across the
//! ladder every stack position modulo the true alignment is visited, so the
//! trailing zero bits that survive in the accumulator are exactly the
//! alignment exponent. The generated program prints the verdict itself; its
//! stdout is the summary verbatim.
//!
//! The function-pointer indirection and the dummy argument keep the
//! compiler from flattening the recursion into one frame.

use std::fmt::Write;

use crate::analyzer::{Analyzer, AnalyzerContext};
use crate::error::ProbeError;

const LADDER: usize = 64;

const HEADER_NAME: &str = "out_functions.h";

fn generate_header() -> String {
    let mut src = String::new();
    src.push_str("#ifndef FUNCTIONS_H\n#define FUNCTIONS_H\n#include <stdint.h>\n\n");
    src.push_str("struct p_functions_struct;\n");
    src.push_str(
        "typedef void (*p_function)(uintptr_t*, struct p_functions_struct*, int, void*);\n\n",
    );
    let _ = write!(
        src,
        "typedef struct p_functions_struct {{\n    p_function functions[{LADDER}];\n}} p_functions_struct;\n\n"
    );
    src.push_str("extern unsigned long get_stack_pointer(void);\n");
    for n in 1..=LADDER {
        let _ = writeln!(
            src,
            "void TrackAlignment{n}(uintptr_t* p_Alignment, p_functions_struct* FunctionArray, int Index, void *Dummy);"
        );
    }
    src.push_str("int CalculateAlignment(uintptr_t alignment);\n");
    src.push_str("#endif /* FUNCTIONS_H */\n");
    src
}

fn generate_functions() -> String {
    let mut src = String::new();
    src.push_str("#include <stdint.h>\n#include \"out_functions.h\"\n");
    for n in 1..=LADDER {
        let _ = write!(
            src,
            r#"
void TrackAlignment{n}(uintptr_t* p_Alignment, p_functions_struct* FunctionArray, int Index, void *Dummy) {{
    char A[{n}];
    *p_Alignment |= get_stack_pointer();
    if (Index > 0) {{
        FunctionArray->functions[Index - 1](p_Alignment, FunctionArray, Index - 1, &A[0]);
    }}
}}
"#
        );
    }
    src.push_str(
        r#"
int CalculateAlignment(uintptr_t alignment) {
    int count = 0;
    while ((alignment & 1) == 0) {
        alignment >>= 1;
        count++;
    }
    return count;
}
"#,
    );
    src
}

fn generate_driver() -> String {
    let mut src = String::new();
    src.push_str("#include <stdio.h>\n#include <stdint.h>\n#include \"out_functions.h\"\n\n");
    src.push_str("int main(void) {\n    p_functions_struct FunctionArray = {\n        .functions = {\n");
    for n in 1..=LADDER {
        let _ = writeln!(src, "            TrackAlignment{n},");
    }
    src.push_str(
        r#"        }
    };

    uintptr_t alignment = 0;

    int startIndex = sizeof(FunctionArray.functions) / sizeof(FunctionArray.functions[0]) - 1;
    FunctionArray.functions[startIndex](&alignment, &FunctionArray, startIndex, NULL);

    int finalAlignment = CalculateAlignment(alignment);

    printf("Stack alignment test:\n");
    printf("- Number of least significant 0 bits: %d\n", finalAlignment);
    printf("- Stack is aligned to %d bytes.\n", 1 << finalAlignment);

    return 0;
}
"#,
    );
    src
}

pub struct StackAlignAnalyzer;

impl Analyzer for StackAlignAnalyzer {
    fn name(&self) -> &'static str {
        "stack_align"
    }

    fn analyze(&mut self, cx: &mut AnalyzerContext) -> Result<String, ProbeError> {
        cx.write_named(HEADER_NAME, &generate_header())?;
        cx.run_probe(self.name(), &[generate_functions(), generate_driver()])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_declares_the_whole_ladder() {
        let header = generate_header();
        assert!(header.contains("void TrackAlignment1("));
        assert!(header.contains(&format!("void TrackAlignment{LADDER}(")));
        assert!(header.contains(&format!("p_function functions[{LADDER}];")));
    }

    #[test]
    fn ladder_frames_grow_by_one_byte() {
        let functions = generate_functions();
        assert!(functions.contains("char A[1];"));
        assert!(functions.contains(&format!("char A[{LADDER}];")));
        assert!(functions.contains("*p_Alignment |= get_stack_pointer();"));
    }

    #[test]
    fn driver_starts_at_the_deepest_rung() {
        let driver = generate_driver();
        assert!(driver.contains(&format!("TrackAlignment{LADDER},")));
        assert!(driver.contains("FunctionArray.functions[startIndex]"));
    }
}
