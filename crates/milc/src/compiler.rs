//! The compilation pipeline: parse, verify, optimize, lower, verify again,
//! then hand the program to the emitter or the interpreter.

use mil_diag::DiagnosticError;
use mil_eval::{EvalError, Machine, Value};
use mil_ir::{Program, Reporter, verify::verify};
use mil_lower::rep_transform;
use mil_opt::{PassOptions, PassStats, optimize};
use mil_syntax::parse_program;

/// Pipeline configuration assembled from the command line.
#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub passes: PassOptions,
    /// Run the representation transform after optimizing.
    pub lower: bool,
    pub verbose: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            passes: PassOptions::default(),
            lower: true,
            verbose: false,
        }
    }
}

/// A compiled program together with what the pipeline did to it.
#[derive(Debug)]
pub struct Compiled {
    pub program: Program,
    pub stats: PassStats,
    pub reports: Vec<String>,
}

#[derive(Debug)]
pub struct RunOutput {
    pub values: Vec<Value>,
    pub trace: Vec<String>,
}

pub fn format_diagnostics(prefix: &str, error: &DiagnosticError) -> String {
    let rendered = error
        .diagnostics()
        .iter()
        .map(|d| format!("  - {d}"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("{prefix}:\n{rendered}")
}

/// Parse and compile one MIL source file.
pub fn compile_source(source: &str, options: &Options) -> Result<Compiled, String> {
    let mut program =
        parse_program(source).map_err(|err| format_diagnostics("parsing failed", &err))?;
    verify(&program).map_err(|err| format_diagnostics("verification failed", &err))?;

    let mut reporter = Reporter::new();
    let mut stats = optimize(&mut program, &options.passes, &mut reporter);
    verify(&program)
        .map_err(|err| format_diagnostics("internal error: optimizer broke the program", &err))?;

    if options.lower {
        let _support = rep_transform(&mut program, &mut reporter)
            .map_err(|err| format_diagnostics("lowering failed", &err))?;
        verify(&program)
            .map_err(|err| format_diagnostics("internal error: lowering broke the program", &err))?;

        // The generated constructor and mask-test blocks are ordinary MIL;
        // a second optimizer round folds their shifts and masks.
        let post = optimize(&mut program, &options.passes, &mut reporter);
        stats.iterations += post.iterations;
        stats.inline_steps += post.inline_steps;
        stats.flow_steps += post.flow_steps;
        stats.duplicates_merged += post.duplicates_merged;
        stats.args_removed += post.args_removed;
        verify(&program)
            .map_err(|err| format_diagnostics("internal error: optimizer broke the program", &err))?;
    }

    Ok(Compiled {
        program,
        stats,
        reports: reporter.entries().to_vec(),
    })
}

/// Emit the compiled program as textual LLVM IR.
pub fn emit_llvm(compiled: &Compiled) -> Result<String, String> {
    mil_llvm::emit_program(&compiled.program).map_err(|err| format!("emission failed: {err}"))
}

/// Run the compiled program's first entry block on the interpreter.
pub fn run_program(compiled: &Compiled) -> Result<RunOutput, String> {
    let mut machine = Machine::new(&compiled.program);
    match machine.run_entry(vec![]) {
        Ok(values) => Ok(RunOutput {
            values,
            trace: machine.trace,
        }),
        Err(EvalError::Halt) => Ok(RunOutput {
            values: vec![],
            trace: machine.trace,
        }),
        Err(err) => Err(format!("evaluation failed: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEMO: &str = "\
entry main

main[] =
  x <- add((3, 4))
  y <- mul((x, 8))
  [] <- printWord((y))
  return []
";

    #[test]
    fn pipeline_compiles_and_runs() {
        let compiled = compile_source(DEMO, &Options::default()).expect("compile");
        let output = run_program(&compiled).expect("run");
        assert_eq!(output.trace, vec!["printWord: 56"]);
        assert!(compiled.stats.flow_steps > 0);
    }

    #[test]
    fn optimized_dump_is_stable() {
        let compiled = compile_source(DEMO, &Options::default()).expect("compile");
        insta::assert_snapshot!(compiled.program.dump(), @r"
        entry main

        main[] =
          [] <- printWord((56))
          return []
        ");
    }

    #[test]
    fn optimization_preserves_the_trace() {
        let everything = Options::default();
        let nothing = Options {
            passes: PassOptions {
                inline: false,
                flow: false,
                eliminate_duplicates: false,
                remove_unused_args: false,
            },
            lower: false,
            verbose: false,
        };

        let sources = [
            DEMO,
            "\
entry loop_sum

loop_sum[] =
  go[0, 5]

go[acc, n] =
  z <- primEq((n, 0))
  if z then done[acc] else step[acc, n]

step[acc, n] =
  acc2 <- add((acc, n))
  n2 <- sub((n, 1))
  go[acc2, n2]

done[acc] =
  [] <- printWord((acc))
  return []
",
            "\
bitdata KeyCode width 8
  = Mk tag [128] fields [payload 0 6]

entry main

main[] =
  v <- Mk(42)
  p <- sel Mk 0 v
  [] <- printWord((p))
  return []
",
        ];

        for source in sources {
            let optimized = compile_source(source, &everything).expect("optimized compile");
            let plain = compile_source(source, &nothing).expect("plain compile");
            let fast = run_program(&optimized).expect("optimized run");
            let slow = run_program(&plain).expect("plain run");
            assert_eq!(fast.trace, slow.trace, "trace diverged for:\n{source}");
        }
    }

    #[test]
    fn lowered_bitdata_programs_reach_the_emitter() {
        let source = "\
bitdata KeyCode width 8
  = Mk tag [128] fields [payload 0 6]

entry main

main[] =
  v <- Mk(42)
  p <- sel Mk 0 v
  [] <- printWord((p))
  return []
";
        let compiled = compile_source(source, &Options::default()).expect("compile");
        let ir = emit_llvm(&compiled).expect("emit");
        assert!(ir.contains("define i32 @main()"));
        assert!(ir.contains("@mil_print_word"));
    }

    #[test]
    fn reports_name_what_the_optimizer_did() {
        let compiled = compile_source(DEMO, &Options::default()).expect("compile");
        assert!(
            compiled
                .reports
                .iter()
                .any(|line| line.contains("shorted out return binding")),
            "expected fold-and-short reports, got {:?}",
            compiled.reports
        );
    }

    #[test]
    fn parse_errors_surface_with_their_category_code() {
        let err = compile_source("main[] =\n  ghost[]\n", &Options::default())
            .expect_err("undefined block");
        assert!(err.contains("parsing failed"));
        assert!(err.contains("E0002"));
    }

    #[test]
    fn halt_is_an_orderly_stop() {
        let source = "\
entry main

main[] =
  [] <- printWord((1))
  halt(())
";
        let compiled = compile_source(source, &Options::default()).expect("compile");
        let output = run_program(&compiled).expect("run");
        assert_eq!(output.trace, vec!["printWord: 1"]);
        assert!(output.values.is_empty());
    }
}
