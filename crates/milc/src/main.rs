use std::fs;
use std::path::{Path, PathBuf};

use milc::{Options, compile_source, emit_llvm, run_program};
use mil_opt::PassOptions;

fn main() {
    if let Err(message) = run() {
        eprintln!("{message}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args = std::env::args().collect::<Vec<_>>();
    let (command, options) = parse_cli(&args)?;

    match command {
        Command::Run { input } => {
            let source = read_source(&input)?;
            let compiled = compile_source(&source, &options)?;
            emit_reports(&compiled.reports, options.verbose);
            let output = run_program(&compiled)?;
            for line in &output.trace {
                println!("{line}");
            }
            if !output.values.is_empty() {
                let rendered: Vec<String> =
                    output.values.iter().map(|v| format!("{v:?}")).collect();
                println!("result: [{}]", rendered.join(", "));
            }
            Ok(())
        }
        Command::Build { input, output } => {
            let source = read_source(&input)?;
            let compiled = compile_source(&source, &options)?;
            emit_reports(&compiled.reports, options.verbose);
            let ir = emit_llvm(&compiled)?;
            let output = output.unwrap_or_else(|| default_build_output_path(&input));
            if let Some(parent) = output.parent()
                && !parent.as_os_str().is_empty()
            {
                fs::create_dir_all(parent)
                    .map_err(|err| format!("failed to create output directory: {err}"))?;
            }
            fs::write(&output, ir)
                .map_err(|err| format!("failed to write `{}`: {err}", output.display()))?;
            println!("built `{}`", output.display());
            Ok(())
        }
        Command::Opt { input } => {
            let source = read_source(&input)?;
            let compiled = compile_source(&source, &options)?;
            emit_reports(&compiled.reports, options.verbose);
            print!("{}", compiled.program.dump());
            Ok(())
        }
    }
}

fn read_source(input: &Path) -> Result<String, String> {
    fs::read_to_string(input).map_err(|err| format!("failed to read `{}`: {err}", input.display()))
}

fn emit_reports(reports: &[String], verbose: bool) {
    if verbose {
        for line in reports {
            eprintln!("opt: {line}");
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Run { input: PathBuf },
    Build { input: PathBuf, output: Option<PathBuf> },
    Opt { input: PathBuf },
}

fn default_build_output_path(input: &Path) -> PathBuf {
    input.with_extension("ll")
}

fn usage() -> String {
    "usage: milc <run|build|opt> <input.mil> [options]\n\
     options:\n\
       -o <path>          output path for `build`\n\
       --no-inline        disable the inlining pass\n\
       --no-flow          disable the flow (rewrite) pass\n\
       --no-dedup         disable duplicate-definition merging\n\
       --no-unused-args   disable unused-argument removal\n\
       --no-lower         skip the representation transform\n\
       --verbose          print one line per applied rewrite"
        .to_string()
}

fn parse_cli(args: &[String]) -> Result<(Command, Options), String> {
    let mut rest = args.iter().skip(1);
    let command = rest.next().ok_or_else(usage)?;
    let mut input: Option<PathBuf> = None;
    let mut output: Option<PathBuf> = None;
    let mut options = Options::default();
    let mut passes = PassOptions::default();

    // `opt` shows the optimizer's result; lowering is opt-in there.
    if command.as_str() == "opt" {
        options.lower = false;
    }

    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "-o" => {
                let path = rest.next().ok_or("`-o` expects a path")?;
                output = Some(PathBuf::from(path));
            }
            "--no-inline" => passes.inline = false,
            "--no-flow" => passes.flow = false,
            "--no-dedup" => passes.eliminate_duplicates = false,
            "--no-unused-args" => passes.remove_unused_args = false,
            "--no-lower" => options.lower = false,
            "--lower" => options.lower = true,
            "--verbose" => options.verbose = true,
            _ if arg.starts_with('-') => {
                return Err(format!("unknown option `{arg}`\n{}", usage()));
            }
            _ => {
                if input.replace(PathBuf::from(arg)).is_some() {
                    return Err(format!("unexpected extra argument `{arg}`\n{}", usage()));
                }
            }
        }
    }

    options.passes = passes;
    let input = input.ok_or_else(|| format!("missing input file\n{}", usage()))?;
    let command = match command.as_str() {
        "run" => Command::Run { input },
        "build" => Command::Build { input, output },
        "opt" => Command::Opt { input },
        other => return Err(format!("unknown command `{other}`\n{}", usage())),
    };
    Ok((command, options))
}
