use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static TEMP_NONCE: AtomicU64 = AtomicU64::new(0);

fn milc_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_milc"))
}

fn temp_source_path(prefix: &str) -> PathBuf {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time should move forward")
        .as_nanos();
    let counter = TEMP_NONCE.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("{prefix}-{timestamp}-{counter}.mil"))
}

const DEMO: &str = "\
entry main

main[] =
  x <- add((3, 4))
  y <- mul((x, 8))
  [] <- printWord((y))
  return []
";

#[test]
fn milc_run_prints_the_trace() {
    let path = temp_source_path("milc-cli-run");
    std::fs::write(&path, DEMO).expect("temp source write should succeed");

    let output = Command::new(milc_bin())
        .arg("run")
        .arg(&path)
        .output()
        .expect("milc run should execute");

    let _ = std::fs::remove_file(path);

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("printWord: 56"),
        "expected the folded trace in stdout, got: {stdout}"
    );
}

#[test]
fn milc_build_writes_llvm_ir() {
    let path = temp_source_path("milc-cli-build");
    std::fs::write(&path, DEMO).expect("temp source write should succeed");
    let out_path = path.with_extension("ll");

    let output = Command::new(milc_bin())
        .arg("build")
        .arg(&path)
        .arg("-o")
        .arg(&out_path)
        .output()
        .expect("milc build should execute");

    let ir = std::fs::read_to_string(&out_path).unwrap_or_default();
    let _ = std::fs::remove_file(&path);
    let _ = std::fs::remove_file(&out_path);

    assert_eq!(output.status.code(), Some(0));
    assert!(ir.contains("define i32 @main()"), "missing main wrapper:\n{ir}");
    assert!(ir.contains("@mil_print_word"), "missing runtime declaration:\n{ir}");
}

#[test]
fn milc_opt_dumps_optimized_mil() {
    let path = temp_source_path("milc-cli-opt");
    std::fs::write(&path, DEMO).expect("temp source write should succeed");

    let output = Command::new(milc_bin())
        .arg("opt")
        .arg(&path)
        .output()
        .expect("milc opt should execute");

    let _ = std::fs::remove_file(path);

    assert_eq!(output.status.code(), Some(0));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("printWord((56))"), "fold missing in dump: {stdout}");
    assert!(!stdout.contains("add((3, 4))"), "unfolded dump: {stdout}");
}

#[test]
fn milc_reports_parse_failures_on_stderr() {
    let path = temp_source_path("milc-cli-bad");
    std::fs::write(&path, "main[] =\n  ghost[]\n").expect("temp source write should succeed");

    let output = Command::new(milc_bin())
        .arg("run")
        .arg(&path)
        .output()
        .expect("milc run should execute");

    let _ = std::fs::remove_file(path);

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("parsing failed"), "stderr was: {stderr}");
}
