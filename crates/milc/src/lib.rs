mod compiler;

pub use compiler::{
    Compiled, Options, RunOutput, compile_source, emit_llvm, format_diagnostics, run_program,
};
