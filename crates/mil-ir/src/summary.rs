//! Summaries and α-equivalence.
//!
//! A summary is an integer computed for a tail or code fragment with the key
//! property that α-equivalent fragments receive the same summary value.
//! Duplicate-definition merging hashes on summaries and only runs the full
//! α-equivalence comparison within a bucket.

use crate::{Atom, CaseAlt, Code, Tail, TempId};

const MIX: i64 = 33;

fn atom_summary(atom: Atom) -> i64 {
    match atom {
        // Every temp summarizes alike so renaming cannot change a summary.
        Atom::Temp(_) => 19,
        Atom::Int(n) => n as i64,
        Atom::Flag(b) => {
            if b {
                11
            } else {
                7
            }
        }
        Atom::Top(t, i) => (t.0 as i64)
            .wrapping_mul(31)
            .wrapping_add(i as i64)
            .wrapping_mul(13),
    }
}

fn args_summary(seed: i64, args: &[Atom]) -> i64 {
    args.iter()
        .fold(seed, |acc, a| acc.wrapping_mul(53).wrapping_add(atom_summary(*a)))
}

impl Tail {
    /// An integer summary such that α-equivalent tails summarize equally.
    pub fn summary(&self) -> i64 {
        match self {
            Tail::Return(args) => args_summary(3, args),
            Tail::Prim(p, args) => args_summary(131i64.wrapping_mul(p.0 as i64 + 1), args)
                .wrapping_mul(MIX)
                .wrapping_add(1),
            Tail::Call(call) => args_summary(911i64.wrapping_mul(call.block.0 as i64 + 1), &call.args)
                .wrapping_mul(MIX)
                .wrapping_add(2),
            Tail::Data(cf, args) => args_summary(257i64.wrapping_mul(cf.0 as i64 + 1), args)
                .wrapping_mul(MIX)
                .wrapping_add(3),
            Tail::Clos(k, args) => args_summary(389i64.wrapping_mul(k.0 as i64 + 1), args)
                .wrapping_mul(MIX)
                .wrapping_add(4),
            Tail::Enter(f, args) => args_summary(atom_summary(*f), args)
                .wrapping_mul(MIX)
                .wrapping_add(5),
            Tail::Sel(cf, n, a) => (cf.0 as i64 + 1)
                .wrapping_mul(173)
                .wrapping_add(*n as i64)
                .wrapping_mul(53)
                .wrapping_add(atom_summary(*a))
                .wrapping_mul(MIX)
                .wrapping_add(6),
        }
    }
}

impl Code {
    /// An integer summary such that α-equivalent code summarizes equally.
    pub fn summary(&self) -> i64 {
        match self {
            Code::Bind { vs, tail, rest } => tail
                .summary()
                .wrapping_mul(53)
                .wrapping_add(vs.len() as i64)
                .wrapping_mul(MIX)
                .wrapping_add(rest.summary()),
            Code::Done(tail) => tail.summary().wrapping_mul(MIX).wrapping_add(7),
            Code::If {
                then_call,
                else_call,
                ..
            } => args_summary(
                args_summary(641i64.wrapping_mul(then_call.block.0 as i64 + 1), &then_call.args)
                    .wrapping_mul(53)
                    .wrapping_add(else_call.block.0 as i64),
                &else_call.args,
            )
            .wrapping_mul(MIX)
            .wrapping_add(8),
            Code::Case { alts, default, .. } => {
                let mut acc = 733i64;
                for CaseAlt { cfun, target } in alts {
                    acc = args_summary(
                        acc.wrapping_mul(53)
                            .wrapping_add(cfun.0 as i64)
                            .wrapping_mul(53)
                            .wrapping_add(target.block.0 as i64),
                        &target.args,
                    );
                }
                if let Some(call) = default {
                    acc = args_summary(acc.wrapping_mul(53).wrapping_add(call.block.0 as i64), &call.args);
                }
                acc.wrapping_mul(MIX).wrapping_add(9)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// α-equivalence
// ---------------------------------------------------------------------------

/// Compare two atoms modulo the renaming given by the parallel temp lists.
/// A temp matches a temp when both sit at the same (innermost-first)
/// position of their respective lists; temps in neither list must be
/// identical.
fn alpha_atom(a: Atom, vs1: &[TempId], b: Atom, vs2: &[TempId]) -> bool {
    match (a, b) {
        (Atom::Temp(x), Atom::Temp(y)) => {
            let px = vs1.iter().rposition(|v| *v == x);
            let py = vs2.iter().rposition(|v| *v == y);
            match (px, py) {
                (Some(i), Some(j)) => i == j,
                (None, None) => x == y,
                _ => false,
            }
        }
        _ => a == b,
    }
}

fn alpha_args(args1: &[Atom], vs1: &[TempId], args2: &[Atom], vs2: &[TempId]) -> bool {
    args1.len() == args2.len()
        && args1
            .iter()
            .zip(args2.iter())
            .all(|(a, b)| alpha_atom(*a, vs1, *b, vs2))
}

fn alpha_call(c1: &crate::BlockCall, vs1: &[TempId], c2: &crate::BlockCall, vs2: &[TempId]) -> bool {
    c1.block == c2.block && alpha_args(&c1.args, vs1, &c2.args, vs2)
}

/// Structural equality of two tails modulo renaming, where `vs1` and `vs2`
/// are parallel lists of temporaries considered equivalent.
pub fn alpha_tail(t1: &Tail, vs1: &[TempId], t2: &Tail, vs2: &[TempId]) -> bool {
    match (t1, t2) {
        (Tail::Return(a1), Tail::Return(a2)) => alpha_args(a1, vs1, a2, vs2),
        (Tail::Prim(p1, a1), Tail::Prim(p2, a2)) => p1 == p2 && alpha_args(a1, vs1, a2, vs2),
        (Tail::Call(c1), Tail::Call(c2)) => alpha_call(c1, vs1, c2, vs2),
        (Tail::Data(f1, a1), Tail::Data(f2, a2)) => f1 == f2 && alpha_args(a1, vs1, a2, vs2),
        (Tail::Clos(k1, a1), Tail::Clos(k2, a2)) => k1 == k2 && alpha_args(a1, vs1, a2, vs2),
        (Tail::Enter(f1, a1), Tail::Enter(f2, a2)) => {
            alpha_atom(*f1, vs1, *f2, vs2) && alpha_args(a1, vs1, a2, vs2)
        }
        (Tail::Sel(f1, n1, a1), Tail::Sel(f2, n2, a2)) => {
            f1 == f2 && n1 == n2 && alpha_atom(*a1, vs1, *a2, vs2)
        }
        _ => false,
    }
}

/// Structural equality of two code spines modulo renaming of bound temps.
/// The lists are extended in parallel as binds are crossed.
pub fn alpha_code(c1: &Code, vs1: &mut Vec<TempId>, c2: &Code, vs2: &mut Vec<TempId>) -> bool {
    match (c1, c2) {
        (
            Code::Bind {
                vs: b1,
                tail: t1,
                rest: r1,
            },
            Code::Bind {
                vs: b2,
                tail: t2,
                rest: r2,
            },
        ) => {
            if b1.len() != b2.len() || !alpha_tail(t1, vs1, t2, vs2) {
                return false;
            }
            let depth = vs1.len();
            vs1.extend_from_slice(b1);
            vs2.extend_from_slice(b2);
            let result = alpha_code(r1, vs1, r2, vs2);
            vs1.truncate(depth);
            vs2.truncate(depth);
            result
        }
        (Code::Done(t1), Code::Done(t2)) => alpha_tail(t1, vs1, t2, vs2),
        (
            Code::If {
                cond: x1,
                then_call: tc1,
                else_call: ec1,
            },
            Code::If {
                cond: x2,
                then_call: tc2,
                else_call: ec2,
            },
        ) => {
            alpha_atom(Atom::Temp(*x1), vs1, Atom::Temp(*x2), vs2)
                && alpha_call(tc1, vs1, tc2, vs2)
                && alpha_call(ec1, vs1, ec2, vs2)
        }
        (
            Code::Case {
                scrut: s1,
                alts: a1,
                default: d1,
            },
            Code::Case {
                scrut: s2,
                alts: a2,
                default: d2,
            },
        ) => {
            alpha_atom(Atom::Temp(*s1), vs1, Atom::Temp(*s2), vs2)
                && a1.len() == a2.len()
                && a1.iter().zip(a2.iter()).all(|(x, y)| {
                    x.cfun == y.cfun && alpha_call(&x.target, vs1, &y.target, vs2)
                })
                && match (d1, d2) {
                    (Some(x), Some(y)) => alpha_call(x, vs1, y, vs2),
                    (None, None) => true,
                    _ => false,
                }
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlockCall, BlockId, Program};

    #[test]
    fn alpha_equivalent_tails_share_a_summary() {
        let mut program = Program::new();
        let prims = program.prims.clone();
        let x = program.fresh_temp();
        let y = program.fresh_temp();

        let t1 = Tail::Prim(prims.add, vec![Atom::Temp(x), Atom::Int(4)]);
        let t2 = Tail::Prim(prims.add, vec![Atom::Temp(y), Atom::Int(4)]);
        assert!(alpha_tail(&t1, &[x], &t2, &[y]));
        assert_eq!(t1.summary(), t2.summary());
    }

    #[test]
    fn distinct_primitives_do_not_alpha_match() {
        let mut program = Program::new();
        let prims = program.prims.clone();
        let x = program.fresh_temp();

        let t1 = Tail::Prim(prims.add, vec![Atom::Temp(x), Atom::Int(4)]);
        let t2 = Tail::Prim(prims.sub, vec![Atom::Temp(x), Atom::Int(4)]);
        assert!(!alpha_tail(&t1, &[x], &t2, &[x]));
    }

    #[test]
    fn alpha_code_tracks_binders_positionally(){
        let mut program = Program::new();
        let prims = program.prims.clone();
        let (x1, v1) = (program.fresh_temp(), program.fresh_temp());
        let (x2, v2) = (program.fresh_temp(), program.fresh_temp());

        let c1 = Code::bind1(
            v1,
            Tail::Prim(prims.not, vec![Atom::Temp(x1)]),
            Code::Done(Tail::ret1(Atom::Temp(v1))),
        );
        let c2 = Code::bind1(
            v2,
            Tail::Prim(prims.not, vec![Atom::Temp(x2)]),
            Code::Done(Tail::ret1(Atom::Temp(v2))),
        );

        let mut vs1 = vec![x1];
        let mut vs2 = vec![x2];
        assert!(alpha_code(&c1, &mut vs1, &c2, &mut vs2));
        assert_eq!(c1.summary(), c2.summary());

        // Swapping which binder the result uses breaks the equivalence.
        let c3 = Code::bind1(
            v2,
            Tail::Prim(prims.not, vec![Atom::Temp(x2)]),
            Code::Done(Tail::ret1(Atom::Temp(x2))),
        );
        assert!(!alpha_code(&c1, &mut vec![x1], &c3, &mut vec![x2]));
    }

    #[test]
    fn free_temps_must_be_identical() {
        let mut program = Program::new();
        let x = program.fresh_temp();
        let y = program.fresh_temp();
        let t1 = Tail::ret1(Atom::Temp(x));
        let t2 = Tail::ret1(Atom::Temp(y));
        assert!(!alpha_tail(&t1, &[], &t2, &[]));
        assert!(alpha_tail(&t1, &[], &t1.clone(), &[]));
    }

    #[test]
    fn if_summaries_depend_on_targets() {
        let mut program = Program::new();
        let cond = program.fresh_temp();
        let mk = |b: u32| BlockCall::new(BlockId(b), vec![]);
        let c1 = Code::If {
            cond,
            then_call: mk(0),
            else_call: mk(1),
        };
        let c2 = Code::If {
            cond,
            then_call: mk(1),
            else_call: mk(0),
        };
        assert_ne!(c1.summary(), c2.summary());
    }
}
