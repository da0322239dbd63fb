//! Lambda lifting for the LC surface fragment.
//!
//! Nested (possibly mutually recursive) `let` bindings are replaced by
//! top-level functions taking their captured free variables as extra
//! arguments. Binding groups are split into strongly connected components
//! first; each component is lifted as a unit, and the set of extra
//! variables is closed under earlier liftings, so a binding that calls an
//! already-lifted neighbour inherits the neighbour's captures.

use std::collections::{BTreeSet, HashMap};

use petgraph::graph::DiGraph;

/// A surface-level variable, unique across a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(pub u32);

/// The name table for surface variables.
#[derive(Debug, Clone, Default)]
pub struct Names {
    names: Vec<String>,
}

impl Names {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self, name: impl Into<String>) -> VarId {
        let id = VarId(self.names.len() as u32);
        self.names.push(name.into());
        id
    }

    pub fn name(&self, v: VarId) -> &str {
        &self.names[v.0 as usize]
    }
}

/// The expression fragment the lifter works over.
#[derive(Debug, Clone, PartialEq)]
pub enum LExpr {
    Var(VarId),
    /// A reference to a top-level function (builtin or produced by
    /// lifting).
    Global(String),
    Lit(i32),
    App(Box<LExpr>, Vec<LExpr>),
    Lam(Vec<VarId>, Box<LExpr>),
    /// A group of local bindings scoping over `body`. The group may be
    /// mutually recursive; the lifter computes the real components.
    Let {
        bindings: Vec<Binding>,
        body: Box<LExpr>,
    },
}

/// A local function binding: `var params... = body`.
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub var: VarId,
    pub params: Vec<VarId>,
    pub body: LExpr,
}

/// A binding hoisted to the top level by the lifter.
#[derive(Debug, Clone, PartialEq)]
pub struct TopBinding {
    pub name: String,
    pub var: VarId,
    /// Extra parameters first, then the original ones.
    pub params: Vec<VarId>,
    pub body: LExpr,
}

/// Maps a lifted variable to an application of its new top-level function
/// to the captured extra variables.
#[derive(Debug, Clone)]
pub struct Lifting {
    pub name: String,
    pub extra: Vec<VarId>,
}

/// The lifting environment: the table of liftings made so far, and the
/// accumulated list of new top-level bindings.
#[derive(Debug, Default)]
pub struct LiftEnv {
    table: HashMap<VarId, Lifting>,
    lifted: Vec<TopBinding>,
}

impl LiftEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find_lifting(&self, v: VarId) -> Option<&Lifting> {
        self.table.get(&v)
    }

    pub fn lifted(&self) -> &[TopBinding] {
        &self.lifted
    }

    pub fn into_lifted(self) -> Vec<TopBinding> {
        self.lifted
    }

    fn add_lifting(&mut self, v: VarId, name: String, extra: Vec<VarId>) {
        self.table.insert(v, Lifting { name, extra });
    }

    /// The extra variables needed for an SCC with the given free variables:
    /// each free variable contributes itself, unless it was already lifted,
    /// in which case it contributes that lifting's extra variables instead.
    fn extra_vars(&self, fvs: &BTreeSet<VarId>) -> Vec<VarId> {
        let mut out: Vec<VarId> = Vec::new();
        for fv in fvs {
            match self.table.get(fv) {
                None => {
                    if !out.contains(fv) {
                        out.push(*fv);
                    }
                }
                Some(lifting) => {
                    for xv in &lifting.extra {
                        if !out.contains(xv) {
                            out.push(*xv);
                        }
                    }
                }
            }
        }
        out
    }
}

/// Free variables of an expression, minus `bound`.
pub fn free_vars(expr: &LExpr, bound: &mut BTreeSet<VarId>, out: &mut BTreeSet<VarId>) {
    match expr {
        LExpr::Var(v) => {
            if !bound.contains(v) {
                out.insert(*v);
            }
        }
        LExpr::Global(_) | LExpr::Lit(_) => {}
        LExpr::App(f, args) => {
            free_vars(f, bound, out);
            for arg in args {
                free_vars(arg, bound, out);
            }
        }
        LExpr::Lam(params, body) => {
            let fresh: Vec<VarId> = params.iter().filter(|p| bound.insert(**p)).copied().collect();
            free_vars(body, bound, out);
            for p in fresh {
                bound.remove(&p);
            }
        }
        LExpr::Let { bindings, body } => {
            let fresh: Vec<VarId> = bindings
                .iter()
                .filter(|b| bound.insert(b.var))
                .map(|b| b.var)
                .collect();
            for binding in bindings {
                let params: Vec<VarId> = binding
                    .params
                    .iter()
                    .filter(|p| bound.insert(**p))
                    .copied()
                    .collect();
                free_vars(&binding.body, bound, out);
                for p in params {
                    bound.remove(&p);
                }
            }
            free_vars(body, bound, out);
            for v in fresh {
                bound.remove(&v);
            }
        }
    }
}

fn binding_free_vars(binding: &Binding) -> BTreeSet<VarId> {
    let mut bound: BTreeSet<VarId> = binding.params.iter().copied().collect();
    let mut out = BTreeSet::new();
    free_vars(&binding.body, &mut bound, &mut out);
    out
}

/// Strongly connected components of a binding group, in dependency order
/// (callees before callers).
fn binding_sccs(bindings: Vec<Binding>) -> Vec<Vec<Binding>> {
    let mut graph = DiGraph::<usize, ()>::new();
    let nodes: Vec<_> = (0..bindings.len()).map(|i| graph.add_node(i)).collect();
    let index_of: HashMap<VarId, usize> = bindings
        .iter()
        .enumerate()
        .map(|(i, b)| (b.var, i))
        .collect();

    for (i, binding) in bindings.iter().enumerate() {
        for fv in binding_free_vars(binding) {
            if let Some(&j) = index_of.get(&fv) {
                graph.add_edge(nodes[i], nodes[j], ());
            }
        }
    }

    // Tarjan yields components with callees first, which is exactly the
    // order liftings must be registered in.
    let sccs = petgraph::algo::tarjan_scc(&graph);
    let mut slots: Vec<Option<Binding>> = bindings.into_iter().map(Some).collect();
    sccs.into_iter()
        .map(|component| {
            component
                .into_iter()
                .map(|node| slots[graph[node]].take().expect("binding taken twice"))
                .collect()
        })
        .collect()
}

/// Replace occurrences of lifted variables by applications of their
/// top-level functions to the captured extras.
fn apply_liftings(expr: &mut LExpr, env: &LiftEnv) {
    match expr {
        LExpr::Var(v) => {
            if let Some(lifting) = env.find_lifting(*v) {
                let extra: Vec<LExpr> = lifting.extra.iter().map(|x| LExpr::Var(*x)).collect();
                let call = LExpr::App(Box::new(LExpr::Global(lifting.name.clone())), extra);
                *expr = call;
            }
        }
        LExpr::Global(_) | LExpr::Lit(_) => {}
        LExpr::App(f, args) => {
            apply_liftings(f, env);
            for arg in args {
                apply_liftings(arg, env);
            }
        }
        LExpr::Lam(_, body) => apply_liftings(body, env),
        LExpr::Let { bindings, body } => {
            for binding in bindings {
                apply_liftings(&mut binding.body, env);
            }
            apply_liftings(body, env);
        }
    }
}

/// Lift every `Let` out of the expression, appending the new top-level
/// bindings to `env`. The returned expression contains no `Let` nodes.
pub fn lift_expr(expr: LExpr, names: &Names, env: &mut LiftEnv) -> LExpr {
    match expr {
        LExpr::Var(v) => {
            let mut out = LExpr::Var(v);
            apply_liftings(&mut out, env);
            out
        }
        leaf @ (LExpr::Global(_) | LExpr::Lit(_)) => leaf,
        LExpr::App(f, args) => LExpr::App(
            Box::new(lift_expr(*f, names, env)),
            args.into_iter().map(|a| lift_expr(a, names, env)).collect(),
        ),
        LExpr::Lam(params, body) => LExpr::Lam(params, Box::new(lift_expr(*body, names, env))),
        LExpr::Let { bindings, body } => {
            for component in binding_sccs(bindings) {
                lift_component(component, names, env);
            }
            lift_expr(*body, names, env)
        }
    }
}

/// Lift one strongly connected component of bindings.
fn lift_component(component: Vec<Binding>, names: &Names, env: &mut LiftEnv) {
    // Free variables of the whole component, excluding its own binders.
    let members: BTreeSet<VarId> = component.iter().map(|b| b.var).collect();
    let mut fvs = BTreeSet::new();
    for binding in &component {
        for fv in binding_free_vars(binding) {
            if !members.contains(&fv) {
                fvs.insert(fv);
            }
        }
    }
    let extra = env.extra_vars(&fvs);

    // Register the liftings first so co-recursive references rewrite to
    // calls of the new top levels.
    for binding in &component {
        env.add_lifting(binding.var, names.name(binding.var).to_string(), extra.clone());
    }

    for binding in component {
        let mut body = lift_expr(binding.body, names, env);
        apply_liftings(&mut body, env);
        let mut params = extra.clone();
        params.extend(binding.params.iter().copied());
        env.lifted.push(TopBinding {
            name: names.name(binding.var).to_string(),
            var: binding.var,
            params,
            body,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(v: VarId) -> LExpr {
        LExpr::Var(v)
    }

    fn app(f: LExpr, args: Vec<LExpr>) -> LExpr {
        LExpr::App(Box::new(f), args)
    }

    #[test]
    fn free_vars_respect_binders() {
        let mut names = Names::new();
        let x = names.fresh("x");
        let y = names.fresh("y");

        let expr = LExpr::Lam(vec![x], Box::new(app(var(x), vec![var(y)])));
        let mut bound = BTreeSet::new();
        let mut out = BTreeSet::new();
        free_vars(&expr, &mut bound, &mut out);
        assert_eq!(out, BTreeSet::from([y]));
    }

    #[test]
    fn lifting_a_binding_with_a_captured_variable() {
        // \k -> let f x = k x in f 1
        let mut names = Names::new();
        let k = names.fresh("k");
        let f = names.fresh("f");
        let x = names.fresh("x");

        let expr = LExpr::Lam(
            vec![k],
            Box::new(LExpr::Let {
                bindings: vec![Binding {
                    var: f,
                    params: vec![x],
                    body: app(var(k), vec![var(x)]),
                }],
                body: Box::new(app(var(f), vec![LExpr::Lit(1)])),
            }),
        );

        let mut env = LiftEnv::new();
        let lifted_expr = lift_expr(expr, &names, &mut env);

        // f is now a top level taking k as an extra parameter.
        let lifted = env.lifted();
        assert_eq!(lifted.len(), 1);
        assert_eq!(lifted[0].name, "f");
        assert_eq!(lifted[0].params, vec![k, x]);

        // The occurrence of f became `f k` applied to the original args.
        let LExpr::Lam(_, body) = &lifted_expr else {
            panic!("outer lambda should survive");
        };
        let LExpr::App(head, args) = body.as_ref() else {
            panic!("body should be an application");
        };
        assert_eq!(args, &vec![LExpr::Lit(1)]);
        assert_eq!(
            head.as_ref(),
            &app(LExpr::Global("f".to_string()), vec![var(k)])
        );
    }

    #[test]
    fn mutually_recursive_bindings_lift_as_one_component() {
        // let even n = odd n; odd n = even n in even 4   (shape only)
        let mut names = Names::new();
        let even = names.fresh("even");
        let odd = names.fresh("odd");
        let n1 = names.fresh("n1");
        let n2 = names.fresh("n2");

        let expr = LExpr::Let {
            bindings: vec![
                Binding {
                    var: even,
                    params: vec![n1],
                    body: app(var(odd), vec![var(n1)]),
                },
                Binding {
                    var: odd,
                    params: vec![n2],
                    body: app(var(even), vec![var(n2)]),
                },
            ],
            body: Box::new(app(var(even), vec![LExpr::Lit(4)])),
        };

        let mut env = LiftEnv::new();
        let lifted_expr = lift_expr(expr, &names, &mut env);

        assert_eq!(env.lifted().len(), 2);
        // No extra variables: the component is closed.
        for top in env.lifted() {
            assert_eq!(top.params.len(), 1);
            // Co-recursive occurrences became Global applications.
            let LExpr::App(head, _) = &top.body else {
                panic!("body should be an application");
            };
            assert!(matches!(
                head.as_ref(),
                LExpr::App(inner, _) if matches!(inner.as_ref(), LExpr::Global(_))
            ));
        }
        assert!(matches!(lifted_expr, LExpr::App(..)));
    }

    #[test]
    fn extra_vars_union_close_over_earlier_liftings() {
        // \k -> let f x = k x in let g y = f y in g 2
        // g's free variable is f; since f was lifted with extra [k], g's
        // extras become [k] too.
        let mut names = Names::new();
        let k = names.fresh("k");
        let f = names.fresh("f");
        let x = names.fresh("x");
        let g = names.fresh("g");
        let y = names.fresh("y");

        let expr = LExpr::Lam(
            vec![k],
            Box::new(LExpr::Let {
                bindings: vec![Binding {
                    var: f,
                    params: vec![x],
                    body: app(var(k), vec![var(x)]),
                }],
                body: Box::new(LExpr::Let {
                    bindings: vec![Binding {
                        var: g,
                        params: vec![y],
                        body: app(var(f), vec![var(y)]),
                    }],
                    body: Box::new(app(var(g), vec![LExpr::Lit(2)])),
                }),
            }),
        );

        let mut env = LiftEnv::new();
        lift_expr(expr, &names, &mut env);

        let g_top = env
            .lifted()
            .iter()
            .find(|t| t.name == "g")
            .expect("g lifted");
        assert_eq!(g_top.params, vec![k, y]);

        // g's body calls the lifted f with k.
        let LExpr::App(head, _) = &g_top.body else {
            panic!("g body should be an application");
        };
        assert_eq!(
            head.as_ref(),
            &app(LExpr::Global("f".to_string()), vec![var(k)])
        );
    }

    #[test]
    fn independent_bindings_become_separate_components() {
        let mut names = Names::new();
        let f = names.fresh("f");
        let x = names.fresh("x");
        let g = names.fresh("g");
        let y = names.fresh("y");

        let expr = LExpr::Let {
            bindings: vec![
                Binding {
                    var: f,
                    params: vec![x],
                    body: var(x),
                },
                Binding {
                    var: g,
                    params: vec![y],
                    body: var(y),
                },
            ],
            body: Box::new(app(var(f), vec![app(var(g), vec![LExpr::Lit(3)])])),
        };

        let mut env = LiftEnv::new();
        let lifted_expr = lift_expr(expr, &names, &mut env);

        assert_eq!(env.lifted().len(), 2);
        assert!(env.lifted().iter().all(|t| t.params.len() == 1));
        // Both call sites now reference globals (applied to no extras).
        let LExpr::App(head, args) = &lifted_expr else {
            panic!("body should be an application");
        };
        assert!(matches!(head.as_ref(), LExpr::App(..)));
        assert_eq!(args.len(), 1);
    }
}
