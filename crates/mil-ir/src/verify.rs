//! Structural verification of MIL programs.
//!
//! Run after parsing and after every optimizer pass: checks the scope and
//! arity invariants the rewriter relies on. A failure here is either a
//! malformed input program or a compiler bug in a pass, so the driver treats
//! any reported diagnostic as fatal.

use std::collections::{HashMap, HashSet};

use mil_diag::{Category, Diagnostic, DiagnosticError};

use crate::{Atom, BlockCall, BlockId, Code, Program, Tail, TempId};

/// The number of results a tail produces, when it can be determined without
/// type information. Block-call results chase the callee's body; cycles give
/// `None` and the corresponding bind checks are skipped.
fn result_arity(
    program: &Program,
    tail: &Tail,
    visiting: &mut HashSet<BlockId>,
    cache: &mut HashMap<BlockId, Option<usize>>,
) -> Option<usize> {
    match tail {
        Tail::Return(args) => Some(args.len()),
        Tail::Prim(p, _) => {
            if program.prims.purity(*p).doesnt_return() {
                None
            } else {
                Some(program.prims.outity(*p))
            }
        }
        Tail::Call(call) => block_result_arity(program, call.block, visiting, cache),
        Tail::Data(..) | Tail::Clos(..) | Tail::Sel(..) => Some(1),
        Tail::Enter(..) => None,
    }
}

fn block_result_arity(
    program: &Program,
    block: BlockId,
    visiting: &mut HashSet<BlockId>,
    cache: &mut HashMap<BlockId, Option<usize>>,
) -> Option<usize> {
    if let Some(known) = cache.get(&block) {
        return *known;
    }
    if !visiting.insert(block) {
        return None;
    }
    let arity = code_result_arity(program, &program.block(block).body, visiting, cache);
    visiting.remove(&block);
    cache.insert(block, arity);
    arity
}

fn code_result_arity(
    program: &Program,
    code: &Code,
    visiting: &mut HashSet<BlockId>,
    cache: &mut HashMap<BlockId, Option<usize>>,
) -> Option<usize> {
    match code {
        Code::Bind { rest, .. } => code_result_arity(program, rest, visiting, cache),
        Code::Done(tail) => result_arity(program, tail, visiting, cache),
        Code::If {
            then_call,
            else_call,
            ..
        } => block_result_arity(program, then_call.block, visiting, cache)
            .or_else(|| block_result_arity(program, else_call.block, visiting, cache)),
        Code::Case { alts, default, .. } => {
            for alt in alts {
                if let Some(n) = block_result_arity(program, alt.target.block, visiting, cache) {
                    return Some(n);
                }
            }
            default
                .as_ref()
                .and_then(|call| block_result_arity(program, call.block, visiting, cache))
        }
    }
}

struct Verifier<'a> {
    program: &'a Program,
    diags: Vec<Diagnostic>,
    /// Every temp bound anywhere, to detect re-binding across spines.
    binders: HashSet<TempId>,
    arity_cache: HashMap<BlockId, Option<usize>>,
}

impl<'a> Verifier<'a> {
    fn error(&mut self, category: Category, message: String) {
        self.diags.push(Diagnostic::error(category, message));
    }

    fn claim_binder(&mut self, t: TempId, context: &str) {
        if !self.binders.insert(t) {
            self.error(
                Category::ScopeViolation,
                format!(
                    "temporary `{}` is bound more than once (in {context})",
                    self.program.temp_name(t)
                ),
            );
        }
    }

    fn check_atom(&mut self, atom: Atom, scope: &HashSet<TempId>, context: &str) {
        match atom {
            Atom::Temp(t) => {
                if !scope.contains(&t) {
                    self.error(
                        Category::ScopeViolation,
                        format!(
                            "temporary `{}` is not in scope in {context}",
                            self.program.temp_name(t)
                        ),
                    );
                }
            }
            Atom::Top(top, i) => {
                if i >= self.program.top(top).lhs.len() {
                    self.error(
                        Category::ArityMismatch,
                        format!(
                            "top-level `{}` has no component {i}",
                            self.program.top(top).name()
                        ),
                    );
                }
            }
            Atom::Int(_) | Atom::Flag(_) => {}
        }
    }

    fn check_call(&mut self, call: &BlockCall, scope: &HashSet<TempId>, context: &str) {
        let params = self.program.block(call.block).params.len();
        if call.args.len() != params {
            let name = self.program.block(call.block).name.clone();
            self.error(
                Category::ArityMismatch,
                format!(
                    "block `{name}` takes {params} arguments but is called with {} in {context}",
                    call.args.len()
                ),
            );
        }
        for atom in &call.args {
            self.check_atom(*atom, scope, context);
        }
    }

    fn check_tail(&mut self, tail: &Tail, scope: &HashSet<TempId>, context: &str) {
        for atom in tail.atoms() {
            self.check_atom(atom, scope, context);
        }
        match tail {
            Tail::Prim(p, args) => {
                let arity = self.program.prims.arity(*p);
                if args.len() != arity {
                    let name = self.program.prims.name(*p).to_string();
                    self.error(
                        Category::ArityMismatch,
                        format!(
                            "primitive `{name}` expects {arity} arguments, got {} in {context}",
                            args.len()
                        ),
                    );
                }
            }
            Tail::Call(call) => self.check_call(call, scope, context),
            Tail::Data(cf, args) => {
                let arity = self.program.cfun(*cf).arity;
                if args.len() != arity {
                    let name = self.program.cfun(*cf).name.clone();
                    self.error(
                        Category::ArityMismatch,
                        format!(
                            "constructor `{name}` expects {arity} arguments, got {} in {context}",
                            args.len()
                        ),
                    );
                }
            }
            Tail::Clos(k, args) => {
                let stored = self.program.closure(*k).stored.len();
                if args.len() != stored {
                    let name = self.program.closure(*k).name.clone();
                    self.error(
                        Category::ArityMismatch,
                        format!(
                            "closure `{name}` stores {stored} atoms, got {} in {context}",
                            args.len()
                        ),
                    );
                }
            }
            Tail::Sel(cf, n, _) => {
                let arity = self.program.cfun(*cf).arity;
                if *n >= arity {
                    let name = self.program.cfun(*cf).name.clone();
                    self.error(
                        Category::ArityMismatch,
                        format!("selector {n} out of range for `{name}` (arity {arity})"),
                    );
                }
            }
            Tail::Return(_) | Tail::Enter(..) => {}
        }
    }

    fn check_code(&mut self, code: &Code, scope: &mut HashSet<TempId>, context: &str) {
        match code {
            Code::Bind { vs, tail, rest } => {
                self.check_tail(tail, scope, context);
                let mut visiting = HashSet::new();
                if let Some(produced) =
                    result_arity(self.program, tail, &mut visiting, &mut self.arity_cache)
                    && produced != vs.len()
                    && !tail.doesnt_return(&self.program.prims)
                {
                    self.error(
                        Category::ArityMismatch,
                        format!(
                            "bind of {} temporaries against a tail producing {produced} in {context}",
                            vs.len()
                        ),
                    );
                }
                for v in vs {
                    self.claim_binder(*v, context);
                    scope.insert(*v);
                }
                self.check_code(rest, scope, context);
            }
            Code::Done(tail) => self.check_tail(tail, scope, context),
            Code::If {
                cond,
                then_call,
                else_call,
            } => {
                self.check_atom(Atom::Temp(*cond), scope, context);
                self.check_call(then_call, scope, context);
                self.check_call(else_call, scope, context);
            }
            Code::Case {
                scrut,
                alts,
                default,
            } => {
                self.check_atom(Atom::Temp(*scrut), scope, context);
                let mut data = None;
                for alt in alts {
                    let cfun_data = self.program.cfun(alt.cfun).data;
                    if *data.get_or_insert(cfun_data) != cfun_data {
                        self.error(
                            Category::ArityMismatch,
                            format!("case alternatives mix data types in {context}"),
                        );
                    }
                    self.check_call(&alt.target, scope, context);
                }
                if let Some(call) = default {
                    self.check_call(call, scope, context);
                }
            }
        }
    }
}

/// Check the scope and arity invariants of a whole program.
pub fn verify(program: &Program) -> Result<(), DiagnosticError> {
    let mut verifier = Verifier {
        program,
        diags: Vec::new(),
        binders: HashSet::new(),
        arity_cache: HashMap::new(),
    };

    for top in &program.tops {
        let context = format!("top-level `{}`", top.name());
        let scope = HashSet::new();
        verifier.check_tail(&top.tail, &scope, &context);
    }

    for defn in &program.closures {
        let context = format!("closure `{}`", defn.name);
        let mut scope = HashSet::new();
        for t in defn.stored.iter().chain(defn.params.iter()) {
            verifier.claim_binder(*t, &context);
            scope.insert(*t);
        }
        verifier.check_tail(&defn.body, &scope, &context);
    }

    for block in &program.blocks {
        let context = format!("block `{}`", block.name);
        let mut scope = HashSet::new();
        for p in &block.params {
            verifier.claim_binder(*p, &context);
            scope.insert(*p);
        }
        let body = block.body.clone();
        verifier.check_code(&body, &mut scope, &context);
    }

    if verifier.diags.is_empty() {
        Ok(())
    } else {
        Err(DiagnosticError::multiple(verifier.diags))
    }
}
