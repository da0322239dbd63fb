//! The peephole rewriter over primitive calls.
//!
//! `rewrite_tail` returns `Some(code)` when a tail should be replaced by a
//! (possibly multi-binding) code fragment, `None` when no rewrite applies.
//! Every returned fragment is a straight-line bind spine ending in `Done`,
//! so the caller can splice it in place of the original tail.
//!
//! Dispatch is on primitive identity first, then on whether each operand is
//! a literal, a known tail (via the facts table), or an opaque atom. The
//! rule of thumb throughout: prefer `None` whenever applicability is
//! uncertain.

use mil_ir::{Atom, Code, PrimId, Prims, Tail, TempId, WORD_SIZE, Word};

use crate::facts::{Facts, lookup_fact};
use crate::Reporter;

/// Everything a rewrite needs besides the tail itself: the primitive
/// registry, a source of fresh temporaries, and the report sink.
pub struct RewriteCx<'a> {
    pub prims: &'a Prims,
    pub fresh: &'a mut dyn FnMut() -> TempId,
    pub reporter: &'a mut Reporter,
}

impl RewriteCx<'_> {
    fn fresh_temp(&mut self) -> TempId {
        (self.fresh)()
    }

    fn report(&mut self, message: impl Into<String>) {
        self.reporter.report(message);
    }
}

// ---------------------------------------------------------------------------
// Small constructors for result fragments
// ---------------------------------------------------------------------------

fn done(tail: Tail) -> Option<Code> {
    Some(Code::Done(tail))
}

fn done_atom(a: Atom) -> Option<Code> {
    done(Tail::ret1(a))
}

fn done_int(n: Word) -> Option<Code> {
    done_atom(Atom::Int(n))
}

fn done_flag(b: bool) -> Option<Code> {
    done_atom(Atom::Flag(b))
}

fn done_prim1(p: PrimId, a: Atom) -> Option<Code> {
    done(Tail::Prim(p, vec![a]))
}

fn done_prim2(p: PrimId, a: Atom, b: Atom) -> Option<Code> {
    done(Tail::Prim(p, vec![a, b]))
}

fn done_prim_const(p: PrimId, a: Atom, n: Word) -> Option<Code> {
    done_prim2(p, a, Atom::Int(n))
}

fn done_const_prim(p: PrimId, n: Word, b: Atom) -> Option<Code> {
    done_prim2(p, Atom::Int(n), b)
}

// ---------------------------------------------------------------------------
// Constant folding
// ---------------------------------------------------------------------------

/// Evaluate a binary word operator on constants. Only the operators the
/// redistribution rules combine constants with; `div` deliberately has no
/// entry (divide-by-zero stays a runtime question).
fn apply_bin(prims: &Prims, p: PrimId, n: Word, m: Word) -> Word {
    if p == prims.add {
        n.wrapping_add(m)
    } else if p == prims.sub {
        n.wrapping_sub(m)
    } else if p == prims.mul {
        n.wrapping_mul(m)
    } else if p == prims.and {
        n & m
    } else if p == prims.or {
        n | m
    } else if p == prims.xor {
        n ^ m
    } else {
        unreachable!("apply_bin on a non-foldable primitive")
    }
}

fn fold_binary(prims: &Prims, p: PrimId, n: Word, m: Word) -> Option<Code> {
    if p == prims.add
        || p == prims.sub
        || p == prims.mul
        || p == prims.and
        || p == prims.or
        || p == prims.xor
    {
        done_int(apply_bin(prims, p, n, m))
    } else if p == prims.shl {
        done_int(n.wrapping_shl(m as u32))
    } else if p == prims.lshr {
        done_int(((n as u32).wrapping_shr(m as u32)) as Word)
    } else if p == prims.ashr {
        done_int(n.wrapping_shr(m as u32))
    } else {
        None
    }
}

fn fold_rel(prims: &Prims, p: PrimId, n: Word, m: Word) -> Option<Code> {
    if p == prims.eq {
        done_flag(n == m)
    } else if p == prims.neq {
        done_flag(n != m)
    } else if p == prims.lt {
        done_flag(n < m)
    } else if p == prims.lte {
        done_flag(n <= m)
    } else if p == prims.gt {
        done_flag(n > m)
    } else if p == prims.gte {
        done_flag(n >= m)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Rewrite a tail given the facts in scope. Only primitive calls have
/// rewrites; every other tail form passes through untouched.
pub fn rewrite_tail(cx: &mut RewriteCx, tail: &Tail, facts: &Facts) -> Option<Code> {
    match tail {
        Tail::Prim(p, args) => rewrite_prim_call(cx, *p, args, facts),
        _ => None,
    }
}

/// The dispatch on primitive identity described in the module docs.
pub fn rewrite_prim_call(
    cx: &mut RewriteCx,
    p: PrimId,
    args: &[Atom],
    facts: &Facts,
) -> Option<Code> {
    let prims = cx.prims;

    if p == prims.bnot {
        let x = args[0];
        return match x.flag_const() {
            Some(b) => done_flag(!b),
            None => bnot_var(cx, x, facts),
        };
    }

    if p == prims.not {
        let x = args[0];
        return match x.int_const() {
            Some(n) => done_int(!n),
            None => not_var(cx, x, facts),
        };
    }

    if p == prims.neg {
        let x = args[0];
        return match x.int_const() {
            Some(n) => done_int(n.wrapping_neg()),
            None => neg_var(cx, x, facts),
        };
    }

    if p == prims.flag_to_word {
        let x = args[0];
        return match x.flag_const() {
            Some(b) => done_int(b as Word),
            None => None,
        };
    }

    // The commutative binary family: fold two constants, push a single
    // constant to the right, then try the variable/variable rules.
    if p == prims.add || p == prims.mul || p == prims.or || p == prims.and || p == prims.xor {
        let (x, y) = (args[0], args[1]);
        return match (x.int_const(), y.int_const()) {
            (None, None) => match () {
                _ if p == prims.add => add_var_var(cx, x, y, facts),
                _ if p == prims.mul => mul_var_var(cx, x, y, facts),
                _ if p == prims.or => or_var_var(cx, x, y, facts),
                _ if p == prims.and => and_var_var(cx, x, y, facts),
                _ => xor_var_var(cx, x, y, facts),
            },
            (None, Some(m)) => var_const(cx, p, x, m, facts),
            (Some(n), None) => {
                let rewritten = var_const(cx, p, y, n, facts);
                rewritten.or_else(|| done_prim2(p, y, x))
            }
            (Some(n), Some(m)) => fold_binary(prims, p, n, m),
        };
    }

    if p == prims.sub {
        let (x, y) = (args[0], args[1]);
        return match (x.int_const(), y.int_const()) {
            (None, None) => sub_var_var(cx, x, y, facts),
            (None, Some(m)) => sub_var_const(cx, x, m, facts),
            (Some(n), None) => sub_const_var(cx, n, y, facts),
            (Some(n), Some(m)) => done_int(n.wrapping_sub(m)),
        };
    }

    if p == prims.shl || p == prims.lshr || p == prims.ashr {
        let (x, y) = (args[0], args[1]);
        return match (x.int_const(), y.int_const()) {
            (None, None) => None,
            (None, Some(m)) => match () {
                _ if p == prims.shl => shl_var_const(cx, x, m, facts),
                _ if p == prims.lshr => lshr_var_const(cx, x, m, facts),
                _ => ashr_var_const(cx, x, m, facts),
            },
            (Some(n), None) => match () {
                _ if p == prims.shl => shl_const_var(cx, n),
                _ if p == prims.lshr => lshr_const_var(cx, n),
                _ => ashr_const_var(cx, n),
            },
            (Some(n), Some(m)) => fold_binary(prims, p, n, m),
        };
    }

    if p == prims.eq
        || p == prims.neq
        || p == prims.lt
        || p == prims.lte
        || p == prims.gt
        || p == prims.gte
    {
        if let (Some(n), Some(m)) = (args[0].int_const(), args[1].int_const()) {
            return fold_rel(prims, p, n, m);
        }
        return None;
    }

    if p == prims.load || p == prims.store {
        let new_args = rewrite_address(cx, args, facts)?;
        return done(Tail::Prim(p, new_args));
    }

    None
}

/// Single-constant dispatch for the commutative family.
fn var_const(cx: &mut RewriteCx, p: PrimId, x: Atom, m: Word, facts: &Facts) -> Option<Code> {
    let prims = cx.prims;
    if p == prims.add {
        add_var_const(cx, x, m, facts)
    } else if p == prims.mul {
        mul_var_const(cx, x, m, facts)
    } else if p == prims.or {
        or_var_const(cx, x, m, facts)
    } else if p == prims.and {
        and_var_const(cx, x, m, facts)
    } else {
        xor_var_const(cx, x, m, facts)
    }
}

// ---------------------------------------------------------------------------
// Unary rules
// ---------------------------------------------------------------------------

fn bnot_var(cx: &mut RewriteCx, x: Atom, facts: &Facts) -> Option<Code> {
    let a = lookup_fact(facts, x)?.clone();
    let prims = cx.prims;

    if let Some(ap) = a.prim_args(prims.bnot) {
        cx.report("eliminated double bnot");
        return done_atom(ap[0]);
    }

    // Negations of relational operators flip to the inverse relation.
    let inversions = [
        (prims.eq, prims.neq),
        (prims.neq, prims.eq),
        (prims.lt, prims.gte),
        (prims.lte, prims.gt),
        (prims.gt, prims.lte),
        (prims.gte, prims.lt),
    ];
    for (rel, inverse) in inversions {
        if let Some(ap) = a.prim_args(rel) {
            let args = ap.to_vec();
            cx.report(format!(
                "replaced bnot({}(x,y)) with {}(x,y)",
                cx.prims.name(rel),
                cx.prims.name(inverse)
            ));
            return done(Tail::Prim(inverse, args));
        }
    }
    None
}

fn not_var(cx: &mut RewriteCx, x: Atom, facts: &Facts) -> Option<Code> {
    let a = lookup_fact(facts, x)?;
    if let Some(ap) = a.prim_args(cx.prims.not) {
        let u = ap[0];
        cx.report("eliminated double not");
        return done_atom(u);
    }
    None
}

fn neg_var(cx: &mut RewriteCx, x: Atom, facts: &Facts) -> Option<Code> {
    let a = lookup_fact(facts, x)?.clone();
    let prims = cx.prims;
    if let Some(ap) = a.prim_args(prims.neg) {
        cx.report("rewrite: -(-x) ==> x");
        return done_atom(ap[0]);
    }
    if let Some(ap) = a.prim_args(prims.sub) {
        cx.report("rewrite: -(x - y) ==> y - x");
        return done_prim2(prims.sub, ap[1], ap[0]);
    }
    None
}

// ---------------------------------------------------------------------------
// Shared var/var machinery
// ---------------------------------------------------------------------------

/// `x ! x ==> x` for idempotent operators.
fn idempotent(cx: &mut RewriteCx, x: Atom, y: Atom) -> Option<Code> {
    if x == y {
        cx.report("rewrite: x ! x ==> x");
        return done_atom(x);
    }
    None
}

/// Code for `(a ! b) ! n` where `!` is `p` then `q`.
fn var_var_const(cx: &mut RewriteCx, p: PrimId, a: Atom, b: Atom, q: PrimId, n: Word) -> Option<Code> {
    let v = cx.fresh_temp();
    Some(Code::bind1(
        v,
        Tail::Prim(p, vec![a, b]),
        Code::Done(Tail::Prim(q, vec![Atom::Temp(v), Atom::Int(n)])),
    ))
}

/// Rewrite an expression of three operators and two constants into one with
/// two operators and one constant:
///
///   p(q(u,c), q(v,d))  ==>  q(p(u,v), p(c,d))
///   p(q(u,c), y)       ==>  q(p(u,y), c)
///   p(x, q(v,d))       ==>  p(p(x,v), d)        (note: no q on the rhs)
///
/// Valid when p == q is commutative and associative, and also for p = sub,
/// q = add.
fn redist_bin(
    cx: &mut RewriteCx,
    p: PrimId,
    q: PrimId,
    x: Atom,
    a: Option<&Tail>,
    y: Atom,
    b: Option<&Tail>,
) -> Option<Code> {
    // The (variable, constant) view of each operand's defining tail, when
    // it has the `q(u, c)` form.
    let split = |fact: Option<&Tail>| {
        let args = fact?.prim_args(q)?;
        Some((args[0], args[1].int_const()?))
    };

    match (split(a), split(b)) {
        (Some((u, c)), Some((v, d))) => {
            let folded = apply_bin(cx.prims, p, c, d);
            cx.report("rewrite: (u ! c) ! (w ! d) ==> (u ! w) ! (c ! d)");
            var_var_const(cx, p, u, v, q, folded)
        }
        (Some((u, c)), None) => {
            cx.report("rewrite: (u ! c) ! y ==> (u ! y) ! c");
            var_var_const(cx, p, u, y, q, c)
        }
        (None, Some((v, d))) => {
            cx.report("rewrite: x ! (w ! d) ==> (x ! w) ! d");
            var_var_const(cx, p, x, v, p, d)
        }
        (None, None) => None,
    }
}

/// `redist_bin` specialized to one commutative, associative operator.
fn commute_rearrange(
    cx: &mut RewriteCx,
    p: PrimId,
    x: Atom,
    a: Option<&Tail>,
    y: Atom,
    b: Option<&Tail>,
) -> Option<Code> {
    redist_bin(cx, p, p, x, a, y, b)
}

/// `(u `m` c) `a` (v `m` d)`: collapse when the variables coincide or the
/// constants do.
fn dist_cc(cx: &mut RewriteCx, u: Atom, m: PrimId, c: Word, a: PrimId, v: Atom, d: Word) -> Option<Code> {
    if u == v {
        cx.report("rewrite: (u ! c) ! (u ! d) ==> u ! (c ! d)");
        let folded = apply_bin(cx.prims, a, c, d);
        return done_prim_const(m, u, folded);
    }
    if c == d {
        cx.report("rewrite: (u ! c) ! (v ! c) ==> (u ! v) ! c");
        let t = cx.fresh_temp();
        return Some(Code::bind1(
            t,
            Tail::Prim(a, vec![u, v]),
            Code::Done(Tail::Prim(m, vec![Atom::Temp(t), Atom::Int(c)])),
        ));
    }
    None
}

/// Distributive rearrangement for dual operator pairs (or/and, and/or).
fn dist_rearrange(
    cx: &mut RewriteCx,
    p: PrimId,
    q: PrimId,
    a: Option<&Tail>,
    b: Option<&Tail>,
) -> Option<Code> {
    let ap = a?.prim_args(q)?;
    let bp = b?.prim_args(q)?;
    let c = ap[1].int_const()?;
    let d = bp[1].int_const()?;
    dist_cc(cx, ap[0], q, c, p, bp[0], d)
}

/// deMorgan: `p(inv(u), inv(v)) ==> inv(q(u, v))` where q is the dual of p.
fn de_morgan(
    cx: &mut RewriteCx,
    q: PrimId,
    inv: PrimId,
    a: Option<&Tail>,
    b: Option<&Tail>,
) -> Option<Code> {
    let ap = a?.prim_args(inv)?;
    let bp = b?.prim_args(inv)?;
    let (u, v) = (ap[0], bp[0]);
    cx.report("applied a version of deMorgan's law");
    let t = cx.fresh_temp();
    Some(Code::bind1(
        t,
        Tail::Prim(q, vec![u, v]),
        Code::Done(Tail::Prim(inv, vec![Atom::Temp(t)])),
    ))
}

// ---------------------------------------------------------------------------
// add
// ---------------------------------------------------------------------------

fn add_var_var(cx: &mut RewriteCx, x: Atom, y: Atom, facts: &Facts) -> Option<Code> {
    let a = lookup_fact(facts, x).cloned();
    let b = lookup_fact(facts, y).cloned();
    if a.is_some() || b.is_some() {
        return commute_rearrange(cx, cx.prims.add, x, a.as_ref(), y, b.as_ref())
            .or_else(|| dist_add(cx, x, a.as_ref(), y, b.as_ref()));
    }
    dist_add_any_any(cx, x, y)
}

fn add_var_const(cx: &mut RewriteCx, x: Atom, m: Word, facts: &Facts) -> Option<Code> {
    let prims = cx.prims;
    if m == 0 {
        cx.report("rewrite: x + 0 ==> x");
        return done_atom(x);
    }
    let a = lookup_fact(facts, x)?.clone();
    if let Some(ap) = a.prim_args(prims.add) {
        if let Some(c) = ap[1].int_const() {
            cx.report("rewrite: (x + n) + m ==> x + (n + m)");
            return done_prim_const(prims.add, ap[0], c.wrapping_add(m));
        }
    } else if let Some(ap) = a.prim_args(prims.sub) {
        if let Some(c) = ap[1].int_const() {
            cx.report("rewrite: (x - n) + m ==> x + (m - n)");
            return done_prim_const(prims.add, ap[0], m.wrapping_sub(c));
        }
        if let Some(c) = ap[0].int_const() {
            cx.report("rewrite: (n - x) + m ==> (n + m) - x");
            return done_const_prim(prims.sub, c.wrapping_add(m), ap[1]);
        }
    } else if let Some(ap) = a.prim_args(prims.neg) {
        cx.report("rewrite: (-x) + m ==> m - x");
        return done_const_prim(prims.sub, m, ap[0]);
    }
    None
}

fn dist_add(cx: &mut RewriteCx, x: Atom, a: Option<&Tail>, y: Atom, b: Option<&Tail>) -> Option<Code> {
    let prims = cx.prims;
    if let Some(a) = a {
        if let Some(ap) = a.prim_args(prims.neg) {
            return dist_add_neg(cx, ap[0], y, b);
        }
        if let Some(ap) = a.prim_args(prims.mul)
            && let Some(m) = ap[1].int_const()
        {
            return dist_add_cmul(cx, x, ap[0], m, y, b);
        }
    }
    dist_add_any(cx, x, y, b)
}

fn dist_add_neg(cx: &mut RewriteCx, u: Atom, y: Atom, b: Option<&Tail>) -> Option<Code> {
    let prims = cx.prims;
    if let Some(b) = b {
        if let Some(bp) = b.prim_args(prims.neg) {
            return dist_add_neg_neg(cx, u, bp[0]);
        }
        if let Some(bp) = b.prim_args(prims.mul)
            && let Some(n) = bp[1].int_const()
        {
            return dist_add_neg_cmul(cx, u, y, bp[0], n);
        }
    }
    dist_add_neg_any(cx, u, y)
}

fn dist_add_any(cx: &mut RewriteCx, x: Atom, y: Atom, b: Option<&Tail>) -> Option<Code> {
    let prims = cx.prims;
    if let Some(b) = b {
        if let Some(bp) = b.prim_args(prims.neg) {
            return dist_add_any_neg(cx, x, bp[0]);
        }
        if let Some(bp) = b.prim_args(prims.mul)
            && let Some(n) = bp[1].int_const()
        {
            return dist_add_any_cmul(cx, x, bp[0], n);
        }
    }
    dist_add_any_any(cx, x, y)
}

fn dist_add_cmul(
    cx: &mut RewriteCx,
    x: Atom,
    u: Atom,
    c: Word,
    y: Atom,
    b: Option<&Tail>,
) -> Option<Code> {
    let prims = cx.prims;
    if let Some(b) = b {
        if let Some(bp) = b.prim_args(prims.neg) {
            return dist_add_cmul_neg(cx, x, u, c, bp[0]);
        }
        if let Some(bp) = b.prim_args(prims.mul)
            && let Some(n) = bp[1].int_const()
        {
            return dist_cc(cx, u, prims.mul, c, prims.add, bp[0], n);
        }
    }
    dist_add_cmul_any(cx, u, c, y)
}

fn dist_add_neg_neg(cx: &mut RewriteCx, u: Atom, v: Atom) -> Option<Code> {
    cx.report("rewrite: (-u) + (-v) ==> -(u + v)");
    let prims = cx.prims;
    let t = cx.fresh_temp();
    Some(Code::bind1(
        t,
        Tail::Prim(prims.add, vec![u, v]),
        Code::Done(Tail::Prim(prims.neg, vec![Atom::Temp(t)])),
    ))
}

fn dist_add_neg_cmul(cx: &mut RewriteCx, u: Atom, y: Atom, v: Atom, d: Word) -> Option<Code> {
    if u == v {
        cx.report("rewrite: (-u) + (u * d) ==> u * (d - 1)");
        return done_prim_const(cx.prims.mul, u, d.wrapping_sub(1));
    }
    dist_add_neg_any(cx, u, y)
}

fn dist_add_neg_any(cx: &mut RewriteCx, u: Atom, y: Atom) -> Option<Code> {
    cx.report("rewrite: (-u) + y ==> y - u");
    done_prim2(cx.prims.sub, y, u)
}

fn dist_add_any_neg(cx: &mut RewriteCx, x: Atom, v: Atom) -> Option<Code> {
    cx.report("rewrite: x + (-v) ==> x - v");
    done_prim2(cx.prims.sub, x, v)
}

fn dist_add_any_cmul(cx: &mut RewriteCx, x: Atom, v: Atom, d: Word) -> Option<Code> {
    if x == v {
        cx.report("rewrite: v + (v * d) ==> v * (1 + d)");
        return done_prim_const(cx.prims.mul, v, d.wrapping_add(1));
    }
    None
}

fn dist_add_cmul_neg(cx: &mut RewriteCx, x: Atom, u: Atom, c: Word, v: Atom) -> Option<Code> {
    if u == v {
        cx.report("rewrite: (u * c) + (-u) ==> u * (c - 1)");
        return done_prim_const(cx.prims.mul, u, c.wrapping_sub(1));
    }
    dist_add_any_neg(cx, x, v)
}

fn dist_add_cmul_any(cx: &mut RewriteCx, u: Atom, c: Word, y: Atom) -> Option<Code> {
    if u == y {
        cx.report("rewrite: (u * c) + u ==> u * (c + 1)");
        return done_prim_const(cx.prims.mul, u, c.wrapping_add(1));
    }
    None
}

fn dist_add_any_any(cx: &mut RewriteCx, x: Atom, y: Atom) -> Option<Code> {
    if x == y {
        cx.report("rewrite: x + x ==> x * 2");
        return done_prim_const(cx.prims.mul, x, 2);
    }
    None
}

// ---------------------------------------------------------------------------
// sub
// ---------------------------------------------------------------------------

fn sub_var_var(cx: &mut RewriteCx, x: Atom, y: Atom, facts: &Facts) -> Option<Code> {
    if x == y {
        cx.report("rewrite: x - x ==> 0");
        return done_int(0);
    }
    let a = lookup_fact(facts, x).cloned();
    let b = lookup_fact(facts, y).cloned();
    if a.is_some() || b.is_some() {
        return redist_bin(cx, cx.prims.sub, cx.prims.add, x, a.as_ref(), y, b.as_ref())
            .or_else(|| dist_sub(cx, x, a.as_ref(), y, b.as_ref()));
    }
    None
}

fn sub_var_const(cx: &mut RewriteCx, x: Atom, m: Word, facts: &Facts) -> Option<Code> {
    let prims = cx.prims;
    if m == 0 {
        cx.report("rewrite: x - 0 ==> x");
        return done_atom(x);
    }
    if let Some(a) = lookup_fact(facts, x).cloned() {
        if let Some(ap) = a.prim_args(prims.add) {
            if let Some(c) = ap[1].int_const() {
                cx.report("rewrite: (x + n) - m ==> x + (n - m)");
                return done_prim_const(prims.add, ap[0], c.wrapping_sub(m));
            }
        } else if let Some(ap) = a.prim_args(prims.sub) {
            if let Some(c) = ap[1].int_const() {
                cx.report("rewrite: (x - n) - m ==> x - (n + m)");
                return done_prim_const(prims.sub, ap[0], c.wrapping_add(m));
            }
            if let Some(c) = ap[0].int_const() {
                cx.report("rewrite: (n - x) - m ==> (n - m) - x");
                return done_const_prim(prims.sub, c.wrapping_sub(m), ap[1]);
            }
        } else if let Some(ap) = a.prim_args(prims.neg) {
            cx.report("rewrite: (-x) - m ==> -(x + m)");
            let u = ap[0];
            let v = cx.fresh_temp();
            return Some(Code::bind1(
                v,
                Tail::Prim(prims.add, vec![u, Atom::Int(m)]),
                Code::Done(Tail::Prim(prims.neg, vec![Atom::Temp(v)])),
            ));
        }
    }
    // A decrement becomes an add with a negative immediate; the code
    // generator reconstitutes the best instruction form.
    done_prim_const(prims.add, x, m.wrapping_neg())
}

fn sub_const_var(cx: &mut RewriteCx, n: Word, y: Atom, facts: &Facts) -> Option<Code> {
    let prims = cx.prims;
    if n == 0 {
        cx.report("rewrite: 0 - y ==> -y");
        return done_prim1(prims.neg, y);
    }
    let b = lookup_fact(facts, y)?.clone();
    if let Some(bp) = b.prim_args(prims.add) {
        if let Some(c) = bp[1].int_const() {
            cx.report("rewrite: n - (x + m) ==> (n - m) - x");
            return done_const_prim(prims.sub, n.wrapping_sub(c), bp[0]);
        }
    } else if let Some(bp) = b.prim_args(prims.sub) {
        if let Some(c) = bp[1].int_const() {
            cx.report("rewrite: n - (x - m) ==> (n + m) - x");
            return done_const_prim(prims.sub, n.wrapping_add(c), bp[0]);
        }
        if let Some(c) = bp[0].int_const() {
            cx.report("rewrite: n - (m - x) ==> (n - m) + x");
            return done_const_prim(prims.add, n.wrapping_sub(c), bp[1]);
        }
    } else if let Some(bp) = b.prim_args(prims.neg) {
        cx.report("rewrite: n - (-x) ==> x + n");
        return done_prim_const(prims.add, bp[0], n);
    }
    None
}

fn dist_sub(cx: &mut RewriteCx, x: Atom, a: Option<&Tail>, y: Atom, b: Option<&Tail>) -> Option<Code> {
    let prims = cx.prims;
    if let Some(a) = a {
        if let Some(ap) = a.prim_args(prims.neg) {
            return dist_sub_neg(cx, ap[0], y, b);
        }
        if let Some(ap) = a.prim_args(prims.mul)
            && let Some(m) = ap[1].int_const()
        {
            return dist_sub_cmul(cx, x, ap[0], m, y, b);
        }
    }
    dist_sub_any(cx, x, y, b)
}

fn dist_sub_neg(cx: &mut RewriteCx, u: Atom, y: Atom, b: Option<&Tail>) -> Option<Code> {
    let prims = cx.prims;
    if let Some(b) = b {
        if let Some(bp) = b.prim_args(prims.neg) {
            return dist_sub_neg_neg(cx, u, bp[0]);
        }
        if let Some(bp) = b.prim_args(prims.mul)
            && let Some(n) = bp[1].int_const()
        {
            return dist_sub_neg_cmul(cx, u, y, bp[0], n);
        }
    }
    dist_sub_neg_any(cx, u, y)
}

fn dist_sub_any(cx: &mut RewriteCx, x: Atom, y: Atom, b: Option<&Tail>) -> Option<Code> {
    let prims = cx.prims;
    if let Some(b) = b {
        if let Some(bp) = b.prim_args(prims.neg) {
            return dist_sub_any_neg(cx, x, bp[0]);
        }
        if let Some(bp) = b.prim_args(prims.mul)
            && let Some(n) = bp[1].int_const()
        {
            return dist_sub_any_cmul(cx, x, bp[0], n);
        }
    }
    dist_sub_any_any(cx, x, y)
}

fn dist_sub_cmul(
    cx: &mut RewriteCx,
    x: Atom,
    u: Atom,
    c: Word,
    y: Atom,
    b: Option<&Tail>,
) -> Option<Code> {
    let prims = cx.prims;
    if let Some(b) = b {
        if let Some(bp) = b.prim_args(prims.neg) {
            return dist_sub_cmul_neg(cx, x, u, c, bp[0]);
        }
        if let Some(bp) = b.prim_args(prims.mul)
            && let Some(n) = bp[1].int_const()
        {
            return dist_cc(cx, u, prims.mul, c, prims.sub, bp[0], n);
        }
    }
    dist_sub_cmul_any(cx, u, c, y)
}

fn dist_sub_neg_neg(cx: &mut RewriteCx, u: Atom, v: Atom) -> Option<Code> {
    cx.report("rewrite: (-u) - (-v) ==> v - u");
    done_prim2(cx.prims.sub, v, u)
}

fn dist_sub_neg_cmul(cx: &mut RewriteCx, u: Atom, y: Atom, v: Atom, d: Word) -> Option<Code> {
    if u == v {
        cx.report("rewrite: (-u) - (u * d) ==> u * (-(1 + d))");
        return done_prim_const(cx.prims.mul, u, d.wrapping_add(1).wrapping_neg());
    }
    dist_sub_neg_any(cx, u, y)
}

fn dist_sub_neg_any(cx: &mut RewriteCx, u: Atom, y: Atom) -> Option<Code> {
    cx.report("rewrite: (-u) - y ==> -(u + y)");
    let prims = cx.prims;
    let t = cx.fresh_temp();
    Some(Code::bind1(
        t,
        Tail::Prim(prims.add, vec![u, y]),
        Code::Done(Tail::Prim(prims.neg, vec![Atom::Temp(t)])),
    ))
}

fn dist_sub_any_neg(cx: &mut RewriteCx, x: Atom, v: Atom) -> Option<Code> {
    cx.report("rewrite: x - (-v) ==> x + v");
    done_prim2(cx.prims.add, x, v)
}

fn dist_sub_any_cmul(cx: &mut RewriteCx, x: Atom, v: Atom, d: Word) -> Option<Code> {
    if x == v {
        cx.report("rewrite: v - (v * d) ==> v * (1 - d)");
        return done_prim_const(cx.prims.mul, v, 1i32.wrapping_sub(d));
    }
    None
}

fn dist_sub_cmul_neg(cx: &mut RewriteCx, x: Atom, u: Atom, c: Word, v: Atom) -> Option<Code> {
    if u == v {
        cx.report("rewrite: (u * c) - (-u) ==> u * (c + 1)");
        return done_prim_const(cx.prims.mul, u, c.wrapping_add(1));
    }
    // Still a subtraction of a negation: x - (-v) == x + v.
    dist_sub_any_neg(cx, x, v)
}

fn dist_sub_cmul_any(cx: &mut RewriteCx, u: Atom, c: Word, y: Atom) -> Option<Code> {
    if u == y {
        cx.report("rewrite: (u * c) - u ==> u * (c - 1)");
        return done_prim_const(cx.prims.mul, u, c.wrapping_sub(1));
    }
    None
}

fn dist_sub_any_any(cx: &mut RewriteCx, x: Atom, y: Atom) -> Option<Code> {
    if x == y {
        cx.report("rewrite: x - x ==> 0");
        return done_int(0);
    }
    None
}

// ---------------------------------------------------------------------------
// mul
// ---------------------------------------------------------------------------

fn mul_var_var(cx: &mut RewriteCx, x: Atom, y: Atom, facts: &Facts) -> Option<Code> {
    let a = lookup_fact(facts, x).cloned();
    let b = lookup_fact(facts, y).cloned();
    commute_rearrange(cx, cx.prims.mul, x, a.as_ref(), y, b.as_ref())
}

fn mul_var_const(cx: &mut RewriteCx, x: Atom, m: Word, facts: &Facts) -> Option<Code> {
    let prims = cx.prims;
    if m == 0 {
        cx.report("rewrite: x * 0 ==> 0");
        return done_int(0);
    }
    if m == 1 {
        cx.report("rewrite: x * 1 ==> x");
        return done_atom(x);
    }
    if m == -1 {
        cx.report("rewrite: x * (-1) ==> -x");
        return done_prim1(prims.neg, x);
    }
    if m > 2 && (m & (m - 1)) == 0 {
        let k = m.trailing_zeros() as Word;
        cx.report(format!("rewrite: x * {m} ==> x << {k}"));
        return done_prim_const(prims.shl, x, k);
    }
    let a = lookup_fact(facts, x)?.clone();
    if let Some(ap) = a.prim_args(prims.mul) {
        if let Some(c) = ap[1].int_const() {
            cx.report("rewrite: (u * c) * m ==> u * (c * m)");
            return done_prim_const(prims.mul, ap[0], c.wrapping_mul(m));
        }
    } else if let Some(ap) = a.prim_args(prims.add)
        && let Some(c) = ap[1].int_const()
    {
        cx.report("rewrite: (u + n) * m ==> (u * m) + (n * m)");
        let u = ap[0];
        let v = cx.fresh_temp();
        return Some(Code::bind1(
            v,
            Tail::Prim(prims.mul, vec![u, Atom::Int(m)]),
            Code::Done(Tail::Prim(
                prims.add,
                vec![Atom::Temp(v), Atom::Int(c.wrapping_mul(m))],
            )),
        ));
    }
    None
}

// ---------------------------------------------------------------------------
// or / and / xor
// ---------------------------------------------------------------------------

fn or_var_var(cx: &mut RewriteCx, x: Atom, y: Atom, facts: &Facts) -> Option<Code> {
    if let Some(code) = idempotent(cx, x, y) {
        return Some(code);
    }
    let prims = cx.prims;
    let a = lookup_fact(facts, x).cloned();
    let b = lookup_fact(facts, y).cloned();
    if a.is_none() && b.is_none() {
        return None;
    }
    commute_rearrange(cx, prims.or, x, a.as_ref(), y, b.as_ref())
        .or_else(|| dist_rearrange(cx, prims.or, prims.and, a.as_ref(), b.as_ref()))
        .or_else(|| de_morgan(cx, prims.and, prims.not, a.as_ref(), b.as_ref()))
}

fn or_var_const(cx: &mut RewriteCx, x: Atom, m: Word, facts: &Facts) -> Option<Code> {
    let prims = cx.prims;
    if m == 0 {
        cx.report("rewrite: x | 0 ==> x");
        return done_atom(x);
    }
    if m == !0 {
        cx.report("rewrite: x | (~0) ==> (~0)");
        return done_int(!0);
    }
    let a = lookup_fact(facts, x)?.clone();
    if let Some(ap) = a.prim_args(prims.or) {
        if let Some(c) = ap[1].int_const() {
            cx.report("rewrite: (u | c) | m ==> u | (c | m)");
            return done_prim_const(prims.or, ap[0], c | m);
        }
    } else if let Some(ap) = a.prim_args(prims.not) {
        cx.report("rewrite: (~u) | m ==> ~(u & ~m)");
        let u = ap[0];
        let v = cx.fresh_temp();
        return Some(Code::bind1(
            v,
            Tail::Prim(prims.and, vec![u, Atom::Int(!m)]),
            Code::Done(Tail::Prim(prims.not, vec![Atom::Temp(v)])),
        ));
    } else if let Some(ap) = a.prim_args(prims.and)
        && let Some(c) = ap[1].int_const()
        && let Some(b) = lookup_fact(facts, ap[0]).cloned()
        && let Some(bp) = b.prim_args(prims.or)
        && let Some(d) = bp[1].int_const()
    {
        cx.report("rewrite: ((u | d) & c) | m ==> (u & c) | ((d & c) | m)");
        let u = bp[0];
        let n = (d & c) | m;
        let v = cx.fresh_temp();
        return Some(Code::bind1(
            v,
            Tail::Prim(prims.and, vec![u, Atom::Int(c)]),
            Code::Done(Tail::Prim(prims.or, vec![Atom::Temp(v), Atom::Int(n)])),
        ));
    }
    None
}

fn and_var_var(cx: &mut RewriteCx, x: Atom, y: Atom, facts: &Facts) -> Option<Code> {
    if let Some(code) = idempotent(cx, x, y) {
        return Some(code);
    }
    let prims = cx.prims;
    let a = lookup_fact(facts, x).cloned();
    let b = lookup_fact(facts, y).cloned();
    if a.is_none() && b.is_none() {
        return None;
    }
    commute_rearrange(cx, prims.and, x, a.as_ref(), y, b.as_ref())
        .or_else(|| dist_rearrange(cx, prims.and, prims.or, a.as_ref(), b.as_ref()))
        .or_else(|| de_morgan(cx, prims.or, prims.not, a.as_ref(), b.as_ref()))
}

/// True if `((x & m1) + y) & m2 == (x + y) & m2`.
fn modarith(m1: Word, m2: Word) -> bool {
    bitrun(m1) && bitrun(m2) && (m1 & (m2 | !(m2.wrapping_sub(1)))) == m1
}

/// True if `m` is a single run of 1 bits.
fn bitrun(m: Word) -> bool {
    let v = m | m.wrapping_sub(1);
    v & v.wrapping_add(1) == 0
}

fn and_var_const(cx: &mut RewriteCx, x: Atom, m: Word, facts: &Facts) -> Option<Code> {
    let prims = cx.prims;
    if m == 0 {
        cx.report("rewrite: x & 0 ==> 0");
        return done_int(0);
    }
    if m == !0 {
        cx.report("rewrite: x & (~0) ==> x");
        return done_atom(x);
    }
    let a = lookup_fact(facts, x)?.clone();
    if let Some(ap) = a.prim_args(prims.and) {
        if let Some(c) = ap[1].int_const() {
            cx.report("rewrite: (u & c) & m ==> u & (c & m)");
            return done_prim_const(prims.and, ap[0], c & m);
        }
    } else if let Some(ap) = a.prim_args(prims.not) {
        cx.report("rewrite: (~u) & m ==> ~(u | ~m)");
        let u = ap[0];
        let v = cx.fresh_temp();
        return Some(Code::bind1(
            v,
            Tail::Prim(prims.or, vec![u, Atom::Int(!m)]),
            Code::Done(Tail::Prim(prims.not, vec![Atom::Temp(v)])),
        ));
    } else if let Some(ap) = a.prim_args(prims.or) {
        if let Some(c) = ap[1].int_const() {
            cx.report("rewrite: (u | c) & m ==> (u & m) | (c & m)");
            let u = ap[0];
            let v = cx.fresh_temp();
            return Some(Code::bind1(
                v,
                Tail::Prim(prims.and, vec![u, Atom::Int(m)]),
                Code::Done(Tail::Prim(prims.or, vec![Atom::Temp(v), Atom::Int(c & m)])),
            ));
        }
    } else if let Some(ap) = a.prim_args(prims.shl) {
        if let Some(w) = ap[1].int_const()
            && w > 0
            && (w as u32) < WORD_SIZE
        {
            // Left shifting by w bits already masks the result by em.
            let em = (-1i32).wrapping_shl(w as u32);
            if m & em == em {
                cx.report(format!("rewrite: (x << {w}) & {m:#x} ==> (x << {w})"));
                return done_atom(x);
            }
        }
    } else if let Some(ap) = a.prim_args(prims.lshr) {
        if let Some(w) = ap[1].int_const()
            && w > 0
            && (w as u32) < WORD_SIZE
        {
            let em = ((1i64 << (WORD_SIZE - w as u32)) - 1) as Word;
            if m & em == em {
                cx.report(format!("rewrite: (x >>> {w}) & {m:#x} ==> (x >>> {w})"));
                return done_atom(x);
            }
        }
    } else if let Some(ap) = a.prim_args(prims.add)
        && let Some(b) = lookup_fact(facts, ap[0]).cloned()
        && let Some(bp) = b.prim_args(prims.and)
        && let Some(c) = bp[1].int_const()
        && modarith(c, m)
    {
        cx.report(format!(
            "rewrite: ((x & {c:#x}) + y) & {m:#x} ==> (x + y) & {m:#x}"
        ));
        let (u, y2) = (bp[0], ap[1]);
        let v = cx.fresh_temp();
        return Some(Code::bind1(
            v,
            Tail::Prim(prims.add, vec![u, y2]),
            Code::Done(Tail::Prim(prims.and, vec![Atom::Temp(v), Atom::Int(m)])),
        ));
    }
    None
}

fn xor_var_var(cx: &mut RewriteCx, x: Atom, y: Atom, facts: &Facts) -> Option<Code> {
    if x == y {
        cx.report("rewrite: x ^ x ==> 0");
        return done_int(0);
    }
    let a = lookup_fact(facts, x).cloned();
    let b = lookup_fact(facts, y).cloned();
    commute_rearrange(cx, cx.prims.xor, x, a.as_ref(), y, b.as_ref())
}

fn xor_var_const(cx: &mut RewriteCx, x: Atom, m: Word, _facts: &Facts) -> Option<Code> {
    if m == 0 {
        cx.report("rewrite: x ^ 0 ==> x");
        return done_atom(x);
    }
    if m == !0 {
        cx.report("rewrite: x ^ (~0) ==> not(x)");
        return done_prim1(cx.prims.not, x);
    }
    None
}

// ---------------------------------------------------------------------------
// Shifts
// ---------------------------------------------------------------------------

fn shl_var_const(cx: &mut RewriteCx, x: Atom, m: Word, facts: &Facts) -> Option<Code> {
    let prims = cx.prims;
    if m == 0 {
        cx.report("rewrite: x << 0 ==> x");
        return done_atom(x);
    }
    if m < 0 || m as u32 >= WORD_SIZE {
        let n = m.rem_euclid(WORD_SIZE as Word);
        cx.report(format!("rewrite: x << {m} ==> x << {n}"));
        return done_prim_const(prims.shl, x, n);
    }
    let a = lookup_fact(facts, x)?.clone();
    if let Some(ap) = a.prim_args(prims.shl) {
        if let Some(n) = ap[1].int_const()
            && n >= 0
            && (n as u32) < WORD_SIZE
        {
            if (n + m) as u32 >= WORD_SIZE {
                cx.report(format!("rewrite: (x << {n}) << {m} ==> 0"));
                return done_int(0);
            }
            cx.report(format!("rewrite: (x << {n}) << {m} ==> x << {}", n + m));
            return done_prim_const(prims.shl, ap[0], n + m);
        }
    } else if let Some(ap) = a.prim_args(prims.lshr) {
        if let Some(n) = ap[1].int_const()
            && n == m
            && n > 0
            && (n as u32) < WORD_SIZE
        {
            let mask = (-1i32).wrapping_shl(m as u32);
            cx.report(format!("rewrite: (x >>> {m}) << {m} ==> x & {mask:#x}"));
            return done_prim_const(prims.and, ap[0], mask);
        }
    } else {
        // Redistribute the shift over a masked/offset operand. The constant
        // may grow but the shift can combine with another shift upstream.
        for q in [prims.and, prims.or, prims.xor, prims.add] {
            if let Some(ap) = a.prim_args(q)
                && let Some(n) = ap[1].int_const()
            {
                cx.report("rewrite: (x ! n) << m ==> (x << m) ! (n << m)");
                let u = ap[0];
                let v = cx.fresh_temp();
                return Some(Code::bind1(
                    v,
                    Tail::Prim(prims.shl, vec![u, Atom::Int(m)]),
                    Code::Done(Tail::Prim(
                        q,
                        vec![Atom::Temp(v), Atom::Int(n.wrapping_shl(m as u32))],
                    )),
                ));
            }
        }
    }
    None
}

fn shl_const_var(cx: &mut RewriteCx, n: Word) -> Option<Code> {
    if n == 0 {
        cx.report("rewrite: 0 << y ==> 0");
        return done_int(0);
    }
    None
}

fn lshr_var_const(cx: &mut RewriteCx, x: Atom, m: Word, facts: &Facts) -> Option<Code> {
    let prims = cx.prims;
    if m == 0 {
        cx.report("rewrite: x >>> 0 ==> x");
        return done_atom(x);
    }
    if m < 0 || m as u32 >= WORD_SIZE {
        let n = m.rem_euclid(WORD_SIZE as Word);
        cx.report(format!("rewrite: x >>> {m} ==> x >>> {n}"));
        return done_prim_const(prims.lshr, x, n);
    }
    let a = lookup_fact(facts, x)?.clone();
    if let Some(ap) = a.prim_args(prims.lshr) {
        if let Some(n) = ap[1].int_const()
            && n >= 0
            && (n as u32) < WORD_SIZE
        {
            if (n + m) as u32 >= WORD_SIZE {
                cx.report(format!("rewrite: (x >>> {n}) >>> {m} ==> 0"));
                return done_int(0);
            }
            cx.report(format!("rewrite: (x >>> {n}) >>> {m} ==> x >>> {}", n + m));
            return done_prim_const(prims.lshr, ap[0], n + m);
        }
    } else if let Some(ap) = a.prim_args(prims.shl) {
        if let Some(n) = ap[1].int_const()
            && n == m
            && n > 0
            && (n as u32) < WORD_SIZE
        {
            let mask = (u32::MAX >> m as u32) as Word;
            cx.report(format!("rewrite: (x << {m}) >>> {m} ==> x & {mask:#x}"));
            return done_prim_const(prims.and, ap[0], mask);
        }
    } else {
        for q in [prims.and, prims.or, prims.xor] {
            if let Some(ap) = a.prim_args(q)
                && let Some(n) = ap[1].int_const()
            {
                cx.report("rewrite: (x ! n) >>> m ==> (x >>> m) ! (n >>> m)");
                let u = ap[0];
                let v = cx.fresh_temp();
                return Some(Code::bind1(
                    v,
                    Tail::Prim(prims.lshr, vec![u, Atom::Int(m)]),
                    Code::Done(Tail::Prim(
                        q,
                        vec![Atom::Temp(v), Atom::Int(((n as u32) >> m as u32) as Word)],
                    )),
                ));
            }
        }
    }
    None
}

fn lshr_const_var(cx: &mut RewriteCx, n: Word) -> Option<Code> {
    if n == 0 {
        cx.report("rewrite: 0 >>> y ==> 0");
        return done_int(0);
    }
    None
}

fn ashr_var_const(cx: &mut RewriteCx, x: Atom, m: Word, facts: &Facts) -> Option<Code> {
    let prims = cx.prims;
    if m == 0 {
        cx.report("rewrite: x >> 0 ==> x");
        return done_atom(x);
    }
    if m < 0 || m as u32 >= WORD_SIZE {
        let n = m.rem_euclid(WORD_SIZE as Word);
        cx.report(format!("rewrite: x >> {m} ==> x >> {n}"));
        return done_prim_const(prims.ashr, x, n);
    }
    let a = lookup_fact(facts, x)?.clone();
    if let Some(ap) = a.prim_args(prims.ashr) {
        if let Some(n) = ap[1].int_const()
            && n >= 0
            && (n as u32) < WORD_SIZE
        {
            // A long enough arithmetic shift saturates at the sign bit.
            if (n + m) as u32 >= WORD_SIZE {
                let all = WORD_SIZE as Word - 1;
                cx.report(format!("rewrite: (x >> {n}) >> {m} ==> x >> {all}"));
                return done_prim_const(prims.ashr, ap[0], all);
            }
            cx.report(format!("rewrite: (x >> {n}) >> {m} ==> x >> {}", n + m));
            return done_prim_const(prims.ashr, ap[0], n + m);
        }
    } else {
        for q in [prims.and, prims.or, prims.xor] {
            if let Some(ap) = a.prim_args(q)
                && let Some(n) = ap[1].int_const()
            {
                cx.report("rewrite: (x ! n) >> m ==> (x >> m) ! (n >> m)");
                let u = ap[0];
                let v = cx.fresh_temp();
                return Some(Code::bind1(
                    v,
                    Tail::Prim(prims.ashr, vec![u, Atom::Int(m)]),
                    Code::Done(Tail::Prim(
                        q,
                        vec![Atom::Temp(v), Atom::Int(n.wrapping_shr(m as u32))],
                    )),
                ));
            }
        }
    }
    None
}

fn ashr_const_var(cx: &mut RewriteCx, n: Word) -> Option<Code> {
    if n == 0 {
        cx.report("rewrite: 0 >> y ==> 0");
        return done_int(0);
    }
    if !n == 0 {
        cx.report("rewrite: (~0) >> y ==> (~0)");
        return done_int(n);
    }
    None
}

// ---------------------------------------------------------------------------
// Addressing-mode synthesis
// ---------------------------------------------------------------------------

/// Rewrite the components of a load/store address vector
/// `(size, base, offset, index, multiplier, rest...)` to use complex
/// addressing modes. Each step fires only when the slot it fills is still
/// empty, and the fact views are refreshed whenever a slot changes. Returns
/// the new argument vector iff anything changed.
fn rewrite_address(cx: &mut RewriteCx, orig: &[Atom], facts: &Facts) -> Option<Vec<Atom>> {
    let prims = cx.prims;
    let mut args = orig.to_vec();
    let mut changed = false;

    let mut fo = lookup_fact(facts, args[2]).cloned();
    let mut fi = if args[3].is_zero() {
        None
    } else {
        lookup_fact(facts, args[3]).cloned()
    };

    // 0)  ((S, _, B, i, m)) ---> ((S, B, _, i, m))
    if args[1].is_zero() && args[2].is_base() {
        args[1] = args[2];
        args[2] = Atom::Int(0);
        fo = None;
        changed = true;
        cx.report("rewrite: use offset as base address");
    }

    // 1)  ((S, _, B+o, i, m)) ---> ((S, B, o, i, m))
    if args[1].is_zero()
        && let Some(ps) = fo.as_ref().and_then(|t| t.prim_args(prims.add))
    {
        let (lhs, rhs) = (ps[0], ps[1]);
        if lhs.is_base() {
            cx.report("rewrite: base addressing from offset sum");
            args[1] = lhs;
            args[2] = rhs;
            fo = lookup_fact(facts, args[2]).cloned();
            changed = true;
        } else if rhs.is_base() {
            cx.report("rewrite: base addressing from offset sum");
            args[1] = rhs;
            args[2] = lhs;
            fo = lookup_fact(facts, args[2]).cloned();
            changed = true;
        }
    }

    // 2)  ((S, _, o, B+i, _)) ---> ((S, B, o, i, _))
    if args[1].is_zero()
        && args[4].is_zero()
        && let Some(ps) = fi.as_ref().and_then(|t| t.prim_args(prims.add))
    {
        let (lhs, rhs) = (ps[0], ps[1]);
        if lhs.is_base() {
            cx.report("rewrite: base addressing from index sum");
            args[1] = lhs;
            args[3] = rhs;
            fi = lookup_fact(facts, args[3]).cloned();
            changed = true;
        } else if rhs.is_base() {
            cx.report("rewrite: base addressing from index sum");
            args[1] = rhs;
            args[3] = lhs;
            fi = lookup_fact(facts, args[3]).cloned();
            changed = true;
        }
    }

    if args[4].is_zero() {
        // 3)  ((S, b, o+i, _, _)) ---> ((S, b, o, i, _))
        if args[3].is_zero()
            && let Some(ps) = fo.as_ref().and_then(|t| t.prim_args(prims.add))
        {
            cx.report("rewrite: split offset sum into offset and index");
            args[2] = ps[0];
            args[3] = ps[1];
            fo = lookup_fact(facts, args[2]).cloned();
            fi = lookup_fact(facts, args[3]).cloned();
            changed = true;
        }

        // 4)  ((S, b, i*M, o, _)) ---> ((S, b, o, i, M))
        if let Some(ps) = fo.as_ref().and_then(|t| t.prim_args(prims.mul))
            && ps[1].multiplier().is_some()
        {
            cx.report("rewrite: scaled addressing from offset product");
            args[2] = args[3];
            args[3] = ps[0];
            args[4] = ps[1];
            changed = true;
        }
        // 5)  ((S, b, o, i*M, _)) ---> ((S, b, o, i, M))
        else if let Some(ps) = fi.as_ref().and_then(|t| t.prim_args(prims.mul))
            && ps[1].multiplier().is_some()
        {
            cx.report("rewrite: scaled addressing from index product");
            args[3] = ps[0];
            args[4] = ps[1];
            changed = true;
        }
    }

    changed.then_some(args)
}
