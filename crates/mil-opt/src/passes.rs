//! The whole-program pass driver.
//!
//! Four passes run to a fixpoint: inlining (with goto skipping), the flow
//! pass (peephole rewriting along each spine plus dead binding
//! elimination), duplicate-definition merging, and unused-argument removal.
//! Iteration order follows the program: definitions in declaration order,
//! blocks reachable from entry points first.

use std::collections::{HashMap, HashSet};

use mil_ir::{
    Atom, BlockCall, BlockId, Code, Prims, Program, Tail, TempId, TempInfo, TopId, alpha_code,
    alpha_tail,
};

use crate::Reporter;
use crate::facts::Facts;
use crate::rewrite::{RewriteCx, rewrite_tail};

/// Which passes the driver runs. All on by default; the CLI exposes a
/// toggle per pass.
#[derive(Debug, Clone, Copy)]
pub struct PassOptions {
    pub inline: bool,
    pub flow: bool,
    pub eliminate_duplicates: bool,
    pub remove_unused_args: bool,
}

impl Default for PassOptions {
    fn default() -> Self {
        Self {
            inline: true,
            flow: true,
            eliminate_duplicates: true,
            remove_unused_args: true,
        }
    }
}

/// Counts of the work each pass performed across the whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub iterations: usize,
    pub inline_steps: usize,
    pub flow_steps: usize,
    pub duplicates_merged: usize,
    pub args_removed: usize,
}

/// The driver cuts off after this many rounds. Every intermediate program
/// is semantically equivalent, so stopping early is always safe.
const MAX_ITERATIONS: usize = 100;

/// Run the optimizer to a fixpoint over the given program.
pub fn optimize(program: &mut Program, opts: &PassOptions, reporter: &mut Reporter) -> PassStats {
    let mut stats = PassStats::default();
    for _ in 0..MAX_ITERATIONS {
        stats.iterations += 1;
        let mut changed = false;

        if opts.inline {
            let steps = inlining(program, reporter);
            stats.inline_steps += steps;
            changed |= steps > 0;
        }
        if opts.flow {
            let steps = flow(program, reporter);
            stats.flow_steps += steps;
            changed |= steps > 0;
        }
        if opts.eliminate_duplicates {
            let steps = eliminate_duplicates(program, reporter);
            stats.duplicates_merged += steps;
            changed |= steps > 0;
        }
        if opts.remove_unused_args {
            let steps = remove_unused_args(program, reporter);
            stats.args_removed += steps;
            changed |= steps > 0;
        }

        if !changed {
            break;
        }
    }
    stats
}

// ---------------------------------------------------------------------------
// Inlining and goto skipping
// ---------------------------------------------------------------------------

/// A snapshot of the blocks whose body is a single `Done(tail)`, keyed by
/// block. These are the inlining and goto-skipping candidates.
type DoneBlocks = HashMap<BlockId, (Vec<TempId>, Tail)>;

fn done_blocks(program: &Program) -> DoneBlocks {
    let mut map = DoneBlocks::new();
    for (i, block) in program.blocks.iter().enumerate() {
        if let Code::Done(tail) = &block.body {
            map.insert(BlockId(i as u32), (block.params.clone(), tail.clone()));
        }
    }
    map
}

/// Follow a chain of goto blocks (body = `Done(BlockCall ...)`) from `call`,
/// substituting arguments along the way. Returns the final call when at
/// least one hop was skipped; chains that loop are left untouched.
fn resolve_goto(done: &DoneBlocks, call: &BlockCall) -> Option<BlockCall> {
    let mut current = call.clone();
    let mut visited = HashSet::from([current.block]);
    let mut hops = 0;
    loop {
        let Some((params, Tail::Call(inner))) = done.get(&current.block) else {
            break;
        };
        if params.len() != current.args.len() {
            break;
        }
        let map: HashMap<TempId, Atom> = params
            .iter()
            .copied()
            .zip(current.args.iter().copied())
            .collect();
        let mut next = inner.clone();
        for atom in next.args.iter_mut() {
            if let Atom::Temp(t) = atom
                && let Some(replacement) = map.get(t)
            {
                *atom = *replacement;
            }
        }
        if !visited.insert(next.block) {
            return None;
        }
        current = next;
        hops += 1;
    }
    (hops > 0).then_some(current)
}

/// Unfold a trivial call: a call to a block whose body is a single
/// non-call `Done(tail)` is replaced by that tail with arguments
/// substituted for parameters, and a call into a goto chain skips to the
/// end of the chain.
fn inline_tail(done: &DoneBlocks, tail: &Tail) -> Option<Tail> {
    let Tail::Call(call) = tail else {
        return None;
    };
    if let Some((params, body)) = done.get(&call.block)
        && params.len() == call.args.len()
        && !matches!(body, Tail::Call(_))
    {
        let map: HashMap<TempId, Atom> = params
            .iter()
            .copied()
            .zip(call.args.iter().copied())
            .collect();
        let mut body = body.clone();
        body.substitute(&map);
        return Some(body);
    }
    resolve_goto(done, call).map(Tail::Call)
}

fn inline_code(done: &DoneBlocks, code: &mut Code, reporter: &mut Reporter) -> usize {
    let mut steps = 0;
    match code {
        Code::Bind { tail, rest, .. } => {
            if let Some(new_tail) = inline_tail(done, tail) {
                reporter.report("inlined trivial block call");
                *tail = new_tail;
                steps += 1;
            }
            steps += inline_code(done, rest, reporter);
        }
        Code::Done(tail) => {
            if let Some(new_tail) = inline_tail(done, tail) {
                reporter.report("inlined trivial block call");
                *tail = new_tail;
                steps += 1;
            }
        }
        Code::If {
            then_call,
            else_call,
            ..
        } => {
            for call in [then_call, else_call] {
                if let Some(new_call) = resolve_goto(done, call) {
                    reporter.report("skipped goto block in branch target");
                    *call = new_call;
                    steps += 1;
                }
            }
        }
        Code::Case { alts, default, .. } => {
            for call in alts
                .iter_mut()
                .map(|alt| &mut alt.target)
                .chain(default.iter_mut())
            {
                if let Some(new_call) = resolve_goto(done, call) {
                    reporter.report("skipped goto block in case target");
                    *call = new_call;
                    steps += 1;
                }
            }
        }
    }
    steps
}

/// The inlining pass over every definition of the program.
pub fn inlining(program: &mut Program, reporter: &mut Reporter) -> usize {
    let done = done_blocks(program);
    let mut steps = 0;

    for top in program.tops.iter_mut() {
        if let Some(new_tail) = inline_tail(&done, &top.tail) {
            reporter.report(format!("inlined tail of top-level `{}`", top.name()));
            top.tail = new_tail;
            steps += 1;
        }
    }
    for defn in program.closures.iter_mut() {
        if let Some(new_tail) = inline_tail(&done, &defn.body) {
            reporter.report(format!("inlined tail of closure `{}`", defn.name));
            defn.body = new_tail;
            steps += 1;
        }
    }
    for block in program.blocks.iter_mut() {
        steps += inline_code(&done, &mut block.body, reporter);
    }
    steps
}

// ---------------------------------------------------------------------------
// Flow: rewriting and dead binding elimination
// ---------------------------------------------------------------------------

fn flow_code(
    prims: &Prims,
    fresh: &mut dyn FnMut() -> TempId,
    reporter: &mut Reporter,
    facts: Facts,
    code: Code,
    steps: &mut usize,
) -> Code {
    match code {
        Code::Bind { vs, tail, rest } => {
            let rewritten = {
                let mut cx = RewriteCx {
                    prims,
                    fresh: &mut *fresh,
                    reporter: &mut *reporter,
                };
                rewrite_tail(&mut cx, &tail, &facts)
            };
            if let Some(fragment) = rewritten {
                *steps += 1;
                let new_code = fragment.and_then(|t| Code::bind(vs, t, *rest));
                return flow_code(prims, fresh, reporter, facts, new_code, steps);
            }

            // Short out a return binding: the bound temps are just names
            // for the returned atoms, so substitute them downstream.
            if let Tail::Return(atoms) = &tail
                && atoms.len() == vs.len()
            {
                let map: HashMap<TempId, Atom> =
                    vs.iter().copied().zip(atoms.iter().copied()).collect();
                let mut rest = *rest;
                rest.substitute(&map);
                reporter.report("shorted out return binding");
                *steps += 1;
                return flow_code(prims, fresh, reporter, facts, rest, steps);
            }

            let mut inner_facts = facts;
            if vs.len() == 1 && tail.is_repeatable(prims) {
                inner_facts.insert(vs[0], tail.clone());
            }
            let rest = flow_code(prims, fresh, reporter, inner_facts, *rest, steps);

            let mut used = HashSet::new();
            rest.mark_used(&mut used);
            if vs.iter().all(|v| !used.contains(v)) && tail.has_no_effect(prims) {
                reporter.report("dropped binding of unused temporaries");
                *steps += 1;
                return rest;
            }
            Code::Bind {
                vs,
                tail,
                rest: Box::new(rest),
            }
        }
        Code::Done(tail) => {
            let rewritten = {
                let mut cx = RewriteCx {
                    prims,
                    fresh: &mut *fresh,
                    reporter: &mut *reporter,
                };
                rewrite_tail(&mut cx, &tail, &facts)
            };
            match rewritten {
                Some(fragment) => {
                    *steps += 1;
                    flow_code(prims, fresh, reporter, facts, fragment, steps)
                }
                None => Code::Done(tail),
            }
        }
        // Facts are local to a spine; branch targets see none of them.
        other @ (Code::If { .. } | Code::Case { .. }) => other,
    }
}

/// The flow pass: walk each block's spine extending the facts map at every
/// bind, rewrite tails, and prune bindings whose results are unused and
/// whose tails have no effect. Top-level tails get a factless rewrite,
/// which amounts to constant folding.
pub fn flow(program: &mut Program, reporter: &mut Reporter) -> usize {
    let prims = program.prims.clone();
    let mut temps = std::mem::take(&mut program.temps);
    let mut steps = 0;
    {
        let mut fresh = || {
            let id = TempId(temps.len() as u32);
            temps.push(TempInfo::default());
            id
        };

        for top in program.tops.iter_mut() {
            let rewritten = {
                let mut cx = RewriteCx {
                    prims: &prims,
                    fresh: &mut fresh,
                    reporter: &mut *reporter,
                };
                rewrite_tail(&mut cx, &top.tail, &Facts::new())
            };
            // Only a straight replacement tail fits a top-level definition.
            if let Some(Code::Done(new_tail)) = rewritten {
                top.tail = new_tail;
                steps += 1;
            }
        }

        for id in program.block_order() {
            let body = std::mem::replace(
                &mut program.block_mut(id).body,
                Code::Done(Tail::Return(Vec::new())),
            );
            let body = flow_code(&prims, &mut fresh, reporter, Facts::new(), body, &mut steps);
            program.block_mut(id).body = body;
        }
    }
    program.temps = temps;
    steps += short_top_levels(program, reporter);
    steps
}

/// Follow a chain of top-level references whose definitions are plain
/// returns, ending at a constant or the last top in the chain. Cyclic
/// definitions are left alone.
fn short_top_atom(program: &Program, atom: Atom) -> Option<Atom> {
    let mut current = atom;
    let mut visited = HashSet::new();
    let mut hops = 0;
    while let Atom::Top(t, i) = current {
        if !visited.insert((t, i)) {
            return None;
        }
        let Tail::Return(args) = &program.top(t).tail else {
            break;
        };
        let Some(next) = args.get(i).copied() else {
            break;
        };
        match next {
            Atom::Int(_) | Atom::Flag(_) | Atom::Top(..) => {
                current = next;
                hops += 1;
            }
            Atom::Temp(_) => break,
        }
    }
    (hops > 0).then_some(current)
}

/// Short out references to top levels that are plain returns of constants
/// or other top-level components.
fn short_top_levels(program: &mut Program, reporter: &mut Reporter) -> usize {
    let mut shorts: HashMap<Atom, Atom> = HashMap::new();
    for t in 0..program.tops.len() {
        for i in 0..program.tops[t].lhs.len() {
            let atom = Atom::Top(TopId(t as u32), i);
            if let Some(resolved) = short_top_atom(program, atom) {
                shorts.insert(atom, resolved);
            }
        }
    }
    if shorts.is_empty() {
        return 0;
    }

    let mut shorted = 0usize;
    let mut apply = |atom: &mut Atom| {
        if let Some(resolved) = shorts.get(atom) {
            *atom = *resolved;
            shorted += 1;
        }
    };
    for block in program.blocks.iter_mut() {
        block.body.map_atoms(&mut apply);
    }
    for defn in program.closures.iter_mut() {
        defn.body.map_atoms(&mut apply);
    }
    for top in program.tops.iter_mut() {
        top.tail.map_atoms(&mut apply);
    }
    drop(apply);

    if shorted > 0 {
        reporter.report(format!("shorted out {shorted} top-level reference(s)"));
    }
    shorted
}

// ---------------------------------------------------------------------------
// Duplicate-definition merging
// ---------------------------------------------------------------------------

/// True when the block body is already a bare forwarding call passing the
/// block's own parameters along. Those blocks are the *result* of a merge;
/// they are skipped so repeated runs stay quiescent.
fn is_forwarding(block: &mil_ir::Block) -> bool {
    match &block.body {
        Code::Done(Tail::Call(call)) => {
            call.args.len() == block.params.len()
                && call
                    .args
                    .iter()
                    .zip(block.params.iter())
                    .all(|(a, p)| *a == Atom::Temp(*p))
        }
        _ => false,
    }
}

/// Merge α-equivalent definitions: the later of two equivalent top-levels
/// becomes a `Return` of the earlier's components, and the later of two
/// equivalent blocks becomes a forwarding call to the earlier.
pub fn eliminate_duplicates(program: &mut Program, reporter: &mut Reporter) -> usize {
    let mut steps = 0;

    // Top-levels, bucketed by tail summary.
    let mut buckets: HashMap<i64, Vec<TopId>> = HashMap::new();
    for j in 0..program.tops.len() {
        let id = TopId(j as u32);
        let summary = program.tops[j].tail.summary();
        let mut merged = false;
        if let Some(candidates) = buckets.get(&summary) {
            for &earlier in candidates {
                let prior = program.top(earlier);
                if prior.lhs.len() == program.tops[j].lhs.len()
                    && alpha_tail(&program.tops[j].tail, &[], &prior.tail, &[])
                {
                    let replacement = Tail::Return(program.tops_of(earlier));
                    if program.tops[j].tail != replacement {
                        reporter.report(format!(
                            "identified top-level `{}` with `{}`",
                            program.tops[j].name(),
                            program.top(earlier).name()
                        ));
                        program.tops[j].tail = replacement;
                        steps += 1;
                    }
                    merged = true;
                    break;
                }
            }
        }
        if !merged {
            buckets.entry(summary).or_default().push(id);
        }
    }

    // Blocks, bucketed by body summary.
    let mut block_buckets: HashMap<i64, Vec<BlockId>> = HashMap::new();
    for j in 0..program.blocks.len() {
        let id = BlockId(j as u32);
        if is_forwarding(&program.blocks[j]) {
            continue;
        }
        let summary = program.blocks[j].body.summary();
        let mut merged = false;
        if let Some(candidates) = block_buckets.get(&summary) {
            for &earlier in candidates {
                let prior = program.block(earlier);
                let current = &program.blocks[j];
                if prior.params.len() == current.params.len() {
                    let mut vs1 = current.params.clone();
                    let mut vs2 = prior.params.clone();
                    if alpha_code(&current.body, &mut vs1, &prior.body, &mut vs2) {
                        reporter.report(format!(
                            "identified block `{}` with `{}`",
                            current.name, prior.name
                        ));
                        let params = program.blocks[j].params.clone();
                        program.blocks[j].body = Code::Done(Tail::Call(BlockCall::new(
                            earlier,
                            params.into_iter().map(Atom::Temp).collect(),
                        )));
                        steps += 1;
                        merged = true;
                        break;
                    }
                }
            }
        }
        if !merged {
            block_buckets.entry(summary).or_default().push(id);
        }
    }

    steps
}

// ---------------------------------------------------------------------------
// Unused-argument removal
// ---------------------------------------------------------------------------

/// Drop block parameters that the body never reads, rewriting every call
/// site to match. Entry blocks keep their signatures (they are the external
/// interface). The pass is single-level; the driver's fixpoint catches
/// arguments that become unused only once their consumers drop them.
pub fn remove_unused_args(program: &mut Program, reporter: &mut Reporter) -> usize {
    let entries: HashSet<BlockId> = program.entries.iter().copied().collect();
    let mut keep_masks: HashMap<BlockId, Vec<bool>> = HashMap::new();

    for (i, block) in program.blocks.iter().enumerate() {
        let id = BlockId(i as u32);
        if entries.contains(&id) || block.params.is_empty() {
            continue;
        }
        let mut used = HashSet::new();
        block.body.mark_used(&mut used);
        let mask: Vec<bool> = block.params.iter().map(|p| used.contains(p)).collect();
        if mask.iter().any(|keep| !keep) {
            keep_masks.insert(id, mask);
        }
    }

    if keep_masks.is_empty() {
        return 0;
    }

    let fix_call = |call: &mut BlockCall| {
        if let Some(mask) = keep_masks.get(&call.block) {
            let mut kept = mask.iter();
            call.args.retain(|_| kept.next().copied().unwrap_or(true));
        }
    };
    let fix_tail = |tail: &mut Tail| {
        if let Tail::Call(call) = tail {
            fix_call(call);
        }
    };

    fn fix_code(code: &mut Code, fix_tail: &impl Fn(&mut Tail), fix_call: &impl Fn(&mut BlockCall)) {
        match code {
            Code::Bind { tail, rest, .. } => {
                fix_tail(tail);
                fix_code(rest, fix_tail, fix_call);
            }
            Code::Done(tail) => fix_tail(tail),
            Code::If {
                then_call,
                else_call,
                ..
            } => {
                fix_call(then_call);
                fix_call(else_call);
            }
            Code::Case { alts, default, .. } => {
                for alt in alts.iter_mut() {
                    fix_call(&mut alt.target);
                }
                if let Some(call) = default {
                    fix_call(call);
                }
            }
        }
    }

    for block in program.blocks.iter_mut() {
        fix_code(&mut block.body, &fix_tail, &fix_call);
    }
    for top in program.tops.iter_mut() {
        fix_tail(&mut top.tail);
    }
    for defn in program.closures.iter_mut() {
        fix_tail(&mut defn.body);
    }

    let mut removed = 0;
    for (id, mask) in &keep_masks {
        let block = program.block_mut(*id);
        let mut kept = mask.iter();
        let before = block.params.len();
        block.params.retain(|_| kept.next().copied().unwrap_or(true));
        removed += before - block.params.len();
        reporter.report(format!(
            "removed {} unused argument(s) from block `{}`",
            before - block.params.len(),
            block.name
        ));
    }
    removed
}
