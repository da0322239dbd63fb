//! Benchmark-only crate; see `benches/core.rs`.

use std::fmt::Write as _;

/// A straight-line source with `n` arithmetic binds feeding one another,
/// ending in a print of the accumulated value.
pub fn constant_chain_source(n: usize) -> String {
    let mut out = String::from("entry main\n\nmain[] =\n  x0 <- add((1, 2))\n");
    for i in 1..n {
        let _ = writeln!(out, "  x{i} <- add((x{}, {i}))", i - 1);
    }
    let _ = writeln!(out, "  [] <- printWord((x{}))", n - 1);
    out.push_str("  return []\n");
    out
}

/// `count` copies of the same squaring block, for duplicate merging.
pub fn duplicate_blocks_source(count: usize) -> String {
    let mut out = String::from("entry main\n\nmain[] =\n  return [0]\n");
    for i in 0..count {
        let _ = write!(
            out,
            "\nsquare{i}[v{i}] =\n  w{i} <- mul((v{i}, v{i}))\n  return [w{i}]\n"
        );
    }
    out
}
