use std::hint::black_box;

use divan::{AllocProfiler, Bencher};
use mil_bench::{constant_chain_source, duplicate_blocks_source};
use mil_ir::Reporter;
use mil_opt::{PassOptions, optimize, passes::flow};
use mil_syntax::parse_program;

#[global_allocator]
static ALLOC: AllocProfiler = AllocProfiler::system();

fn main() {
    divan::main();
}

#[divan::bench(args = [8, 64, 256])]
fn parse_constant_chain(bencher: Bencher, binds: usize) {
    let source = constant_chain_source(binds);
    bencher.bench(|| {
        let program = parse_program(black_box(&source)).expect("benchmark source must parse");
        black_box(program.blocks.len())
    });
}

#[divan::bench(args = [8, 64, 256])]
fn flow_folds_constant_chain(bencher: Bencher, binds: usize) {
    let source = constant_chain_source(binds);
    let program = parse_program(&source).expect("benchmark source must parse");
    bencher.bench(|| {
        let mut program = black_box(&program).clone();
        let mut reporter = Reporter::new();
        black_box(flow(&mut program, &mut reporter))
    });
}

#[divan::bench(args = [8, 64, 256])]
fn optimize_constant_chain_to_fixpoint(bencher: Bencher, binds: usize) {
    let source = constant_chain_source(binds);
    let program = parse_program(&source).expect("benchmark source must parse");
    bencher.bench(|| {
        let mut program = black_box(&program).clone();
        let mut reporter = Reporter::new();
        let stats = optimize(&mut program, &PassOptions::default(), &mut reporter);
        black_box(stats.flow_steps)
    });
}

#[divan::bench(args = [4, 32, 128])]
fn merge_duplicate_blocks(bencher: Bencher, count: usize) {
    let source = duplicate_blocks_source(count);
    let program = parse_program(&source).expect("benchmark source must parse");
    bencher.bench(|| {
        let mut program = black_box(&program).clone();
        let mut reporter = Reporter::new();
        let stats = optimize(&mut program, &PassOptions::default(), &mut reporter);
        black_box(stats.duplicates_merged)
    });
}

#[divan::bench(args = [64, 256])]
fn dump_round_trip(bencher: Bencher, binds: usize) {
    let source = constant_chain_source(binds);
    let program = parse_program(&source).expect("benchmark source must parse");
    bencher.bench(|| {
        let text = black_box(&program).dump();
        let reparsed = parse_program(&text).expect("dump must reparse");
        black_box(reparsed.temps.len())
    });
}
