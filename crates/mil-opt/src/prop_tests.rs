use proptest::prelude::*;

use mil_ir::{Atom, Code, PrimId, Program, Tail, TempId, Word, alpha_tail};

use crate::Reporter;
use crate::facts::Facts;
use crate::rewrite::{RewriteCx, rewrite_tail};

fn binary_prim(program: &Program, index: usize) -> PrimId {
    let prims = &program.prims;
    [prims.add, prims.sub, prims.mul, prims.and, prims.or, prims.xor][index % 6]
}

/// 0/1 pick one of the two temp slots, anything else is a literal.
fn atom_for(shape: u8, value: Word, temps: &[TempId; 2]) -> Atom {
    match shape {
        0 => Atom::Temp(temps[0]),
        1 => Atom::Temp(temps[1]),
        _ => Atom::Int(value),
    }
}

fn rewrite_once(program: &mut Program, tail: &Tail, facts: &Facts) -> Option<Code> {
    let prims = program.prims.clone();
    let mut temps = std::mem::take(&mut program.temps);
    let mut reporter = Reporter::new();
    let out = {
        let mut fresh = || {
            let id = TempId(temps.len() as u32);
            temps.push(Default::default());
            id
        };
        let mut cx = RewriteCx {
            prims: &prims,
            fresh: &mut fresh,
            reporter: &mut reporter,
        };
        rewrite_tail(&mut cx, tail, facts)
    };
    program.temps = temps;
    out
}

/// The final tail of a straight-line fragment.
fn final_tail(code: &Code) -> &Tail {
    match code {
        Code::Bind { rest, .. } => final_tail(rest),
        Code::Done(tail) => tail,
        _ => unreachable!("rewriter fragments are straight-line"),
    }
}

proptest! {
    /// The summary law: α-equivalent tails have equal summaries.
    #[test]
    fn alpha_equivalent_tails_share_summaries(
        op_index in 0usize..6,
        shape_a in 0u8..4,
        shape_b in 0u8..4,
        value in any::<Word>(),
    ) {
        let mut program = Program::new();
        let p = binary_prim(&program, op_index);
        let left = [program.fresh_temp(), program.fresh_temp()];
        let right = [program.fresh_temp(), program.fresh_temp()];

        let t1 = Tail::Prim(p, vec![atom_for(shape_a, value, &left), atom_for(shape_b, value, &left)]);
        let t2 = Tail::Prim(p, vec![atom_for(shape_a, value, &right), atom_for(shape_b, value, &right)]);

        prop_assert!(alpha_tail(&t1, &left, &t2, &right));
        prop_assert_eq!(t1.summary(), t2.summary());
    }

    /// Two constant operands always fold to a literal in one step for the
    /// foldable operators.
    #[test]
    fn constant_operands_fold_to_literals(
        op_index in 0usize..6,
        n in any::<Word>(),
        m in any::<Word>(),
    ) {
        let mut program = Program::new();
        let p = binary_prim(&program, op_index);
        let tail = Tail::Prim(p, vec![Atom::Int(n), Atom::Int(m)]);

        let out = rewrite_once(&mut program, &tail, &Facts::new());
        let out = out.expect("two-literal operands must fold");
        match final_tail(&out) {
            Tail::Return(args) => prop_assert!(matches!(args[0], Atom::Int(_))),
            other => prop_assert!(false, "expected a literal, got {other:?}"),
        }
    }

    /// Chasing rewrites at a single point terminates: the measure argument
    /// says every rewrite strictly shrinks, so a short chain must reach
    /// `None`.
    #[test]
    fn rewrite_chains_terminate(
        op_index in 0usize..6,
        fact_op in 0usize..6,
        c in any::<Word>(),
        m in any::<Word>(),
    ) {
        let mut program = Program::new();
        let q = binary_prim(&program, fact_op);
        let p = binary_prim(&program, op_index);
        let u = program.fresh_temp();
        let x = program.fresh_temp();

        let facts = Facts::new().update(x, Tail::Prim(q, vec![Atom::Temp(u), Atom::Int(c)]));
        let mut tail = Tail::Prim(p, vec![Atom::Temp(x), Atom::Int(m)]);

        let mut steps = 0;
        while let Some(fragment) = rewrite_once(&mut program, &tail, &facts) {
            steps += 1;
            prop_assert!(steps < 64, "rewrite chain did not terminate: {tail:?}");
            tail = final_tail(&fragment).clone();
            if !matches!(tail, Tail::Prim(..)) {
                break;
            }
        }
    }

    /// Rewriting is a function of its inputs: the same tail and facts give
    /// the same answer when asked twice.
    #[test]
    fn rewriting_is_deterministic(
        op_index in 0usize..6,
        shape_a in 0u8..4,
        shape_b in 0u8..4,
        value in any::<Word>(),
    ) {
        let mut program = Program::new();
        let p = binary_prim(&program, op_index);
        let temps = [program.fresh_temp(), program.fresh_temp()];
        let tail = Tail::Prim(p, vec![atom_for(shape_a, value, &temps), atom_for(shape_b, value, &temps)]);

        let first = rewrite_once(&mut program, &tail, &Facts::new());
        let second = rewrite_once(&mut program, &tail, &Facts::new());
        match (&first, &second) {
            (None, None) => {}
            (Some(a), Some(b)) => {
                // Fresh temp names differ between runs; compare shapes.
                prop_assert_eq!(a.summary(), b.summary());
            }
            _ => prop_assert!(false, "diverging answers: {first:?} vs {second:?}"),
        }
    }
}
