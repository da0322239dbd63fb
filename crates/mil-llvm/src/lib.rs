//! LLVM IR emission for lowered MIL programs.
//!
//! The emitter consumes programs in post-lowering form: every surviving
//! tail is a `Return`, a primitive call, or a block call, and every block's
//! terminal position is `Return`, `If`, or a tail call. Each MIL block
//! becomes one LLVM function; tail calls become `tail call` + `ret`, and
//! conditionals become a branch between two local labels.
//!
//! Every MIL value is carried as `i32`. Flags exist transiently as `i1`
//! (out of `icmp`, into `br`) and are widened with `zext` at the moment
//! they are stored in a temporary.

use std::collections::HashMap;
use std::fmt;
use std::fmt::Write as _;

use mil_ir::{Atom, BlockCall, BlockId, Code, PrimId, Program, Tail, TempId, Word};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmitError {
    #[error("cannot emit `{0}`: run the representation transform first")]
    NotLowered(String),
    #[error("top-level `{0}` has no compile-time value")]
    DynamicTopLevel(String),
    #[error("block `{0}` returns {1} results; the emitter supports 0 or 1")]
    WideResult(String, usize),
}

// ---------------------------------------------------------------------------
// The abstract instruction vocabulary
// ---------------------------------------------------------------------------

/// An LLVM value operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Val {
    Local(String),
    Int(Word),
}

impl fmt::Display for Val {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Val::Local(name) => write!(f, "%{name}"),
            Val::Int(n) => write!(f, "{n}"),
        }
    }
}

/// A right-hand side computing a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rhs {
    Op(&'static str, Val, Val),
    Icmp(&'static str, Val, Val),
    Zext(Val),
    Call(String, Vec<Val>),
    IntToPtr(Val),
    Load(Val),
    LoadGlobal(String),
}

impl fmt::Display for Rhs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rhs::Op(op, l, r) => write!(f, "{op} i32 {l}, {r}"),
            Rhs::Icmp(cond, l, r) => write!(f, "icmp {cond} i32 {l}, {r}"),
            Rhs::Zext(v) => write!(f, "zext i1 {v} to i32"),
            Rhs::Call(name, args) => {
                let args: Vec<String> = args.iter().map(|a| format!("i32 {a}")).collect();
                write!(f, "call i32 @{name}({})", args.join(", "))
            }
            Rhs::IntToPtr(v) => write!(f, "inttoptr i32 {v} to ptr"),
            Rhs::Load(p) => write!(f, "load i32, ptr {p}"),
            Rhs::LoadGlobal(name) => write!(f, "load i32, ptr @{name}"),
        }
    }
}

/// One line of a function body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instr {
    Assign(String, Rhs),
    CallVoid(String, Vec<Val>),
    Store(Val, Val),
    Label(String),
    CondBr(Val, String, String),
    TailCall(Option<String>, String, Vec<Val>),
    RetVoid,
    Ret(Val),
    Unreachable,
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Assign(name, rhs) => write!(f, "  %{name} = {rhs}"),
            Instr::CallVoid(name, args) => {
                let args: Vec<String> = args.iter().map(|a| format!("i32 {a}")).collect();
                write!(f, "  call void @{name}({})", args.join(", "))
            }
            Instr::Store(value, ptr) => write!(f, "  store i32 {value}, ptr {ptr}"),
            Instr::Label(name) => write!(f, "{name}:"),
            Instr::CondBr(cond, then_label, else_label) => {
                write!(f, "  br i1 {cond}, label %{then_label}, label %{else_label}")
            }
            Instr::TailCall(dest, name, args) => {
                let args: Vec<String> = args.iter().map(|a| format!("i32 {a}")).collect();
                match dest {
                    Some(dest) => {
                        write!(f, "  %{dest} = tail call i32 @{name}({})", args.join(", "))
                    }
                    None => write!(f, "  tail call void @{name}({})", args.join(", ")),
                }
            }
            Instr::RetVoid => write!(f, "  ret void"),
            Instr::Ret(v) => write!(f, "  ret i32 {v}"),
            Instr::Unreachable => write!(f, "  unreachable"),
        }
    }
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

struct Emitter<'a> {
    program: &'a Program,
    /// LLVM function name per MIL block, deduplicated against each other
    /// and against the reserved `main` wrapper.
    block_names: Vec<String>,
    /// Number of results per block, memoized.
    result_arities: HashMap<BlockId, usize>,
    next_local: u32,
}

/// Emit a whole program as textual LLVM IR.
pub fn emit_program(program: &Program) -> Result<String, EmitError> {
    let mut used: HashMap<String, u32> = HashMap::from([("main".to_string(), 1)]);
    let block_names = program
        .blocks
        .iter()
        .map(|b| {
            let base = sanitize(&b.name);
            let n = used.entry(base.clone()).or_insert(0);
            *n += 1;
            if *n == 1 { base } else { format!("{base}.{n}") }
        })
        .collect();

    let mut emitter = Emitter {
        program,
        block_names,
        result_arities: HashMap::new(),
        next_local: 0,
    };
    emitter.emit()
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl Emitter<'_> {
    fn fresh(&mut self) -> String {
        let n = self.next_local;
        self.next_local += 1;
        format!("v{n}")
    }

    fn temp(&self, t: TempId) -> String {
        format!("t{}", t.0)
    }

    /// The number of results a block produces. Cycles default to one word;
    /// a block that never returns directly agrees with its callees.
    fn result_arity(&mut self, block: BlockId) -> Result<usize, EmitError> {
        if let Some(known) = self.result_arities.get(&block) {
            return Ok(*known);
        }
        self.result_arities.insert(block, 1);
        let mut code = &self.program.block(block).body;
        let arity = loop {
            match code {
                Code::Bind { rest, .. } => code = rest,
                Code::Done(Tail::Return(args)) => break args.len(),
                Code::Done(Tail::Prim(p, _)) => break self.program.prims.outity(*p),
                Code::Done(Tail::Call(call)) => {
                    let target = call.block;
                    break self.result_arity(target)?;
                }
                Code::Done(other) => {
                    return Err(EmitError::NotLowered(tail_kind(other).to_string()));
                }
                Code::If { then_call, .. } => {
                    let target = then_call.block;
                    break self.result_arity(target)?;
                }
                Code::Case { .. } => {
                    return Err(EmitError::NotLowered("case dispatch".to_string()));
                }
            }
        };
        self.result_arities.insert(block, arity);
        Ok(arity)
    }

    /// Resolve an atom to an LLVM value, emitting a load for references to
    /// top-level globals.
    fn atom(
        &mut self,
        env: &HashMap<TempId, Val>,
        atom: Atom,
        instrs: &mut Vec<Instr>,
    ) -> Val {
        match atom {
            Atom::Temp(t) => env
                .get(&t)
                .cloned()
                .unwrap_or_else(|| Val::Local(self.temp(t))),
            Atom::Int(n) => Val::Int(n),
            Atom::Flag(b) => Val::Int(b as Word),
            Atom::Top(top, index) => {
                let name = sanitize(&self.program.top(top).lhs[index].name);
                let loaded = self.fresh();
                instrs.push(Instr::Assign(loaded.clone(), Rhs::LoadGlobal(name)));
                Val::Local(loaded)
            }
        }
    }

    fn atoms(
        &mut self,
        env: &HashMap<TempId, Val>,
        atoms: &[Atom],
        instrs: &mut Vec<Instr>,
    ) -> Vec<Val> {
        atoms.iter().map(|a| self.atom(env, *a, instrs)).collect()
    }

    fn emit(&mut self) -> Result<String, EmitError> {
        let mut out = String::new();
        let _ = writeln!(out, "; generated from MIL");
        let _ = writeln!(out, "declare void @mil_print_word(i32)");
        let _ = writeln!(out, "declare void @mil_halt()");
        out.push('\n');

        // Top-level definitions become global words; the optimizer is
        // expected to have folded their tails to literal returns.
        for top in &self.program.tops {
            let Tail::Return(args) = &top.tail else {
                return Err(EmitError::DynamicTopLevel(top.name()));
            };
            if args.len() != top.lhs.len() {
                return Err(EmitError::DynamicTopLevel(top.name()));
            }
            for (lhs, atom) in top.lhs.iter().zip(args) {
                let value = match atom {
                    Atom::Int(n) => *n,
                    Atom::Flag(b) => *b as Word,
                    _ => return Err(EmitError::DynamicTopLevel(lhs.name.clone())),
                };
                let _ = writeln!(out, "@{} = global i32 {value}", sanitize(&lhs.name));
            }
        }
        if !self.program.tops.is_empty() {
            out.push('\n');
        }

        for id in self.program.block_order() {
            self.emit_block(&mut out, id)?;
            out.push('\n');
        }

        // A zero-argument first entry point gets a main wrapper.
        if let Some(entry) = self.program.entries.first().copied()
            && self.program.block(entry).params.is_empty()
        {
            let arity = self.result_arity(entry)?;
            let name = self.block_names[entry.0 as usize].clone();
            let _ = writeln!(out, "define i32 @main() {{");
            if arity == 1 {
                let _ = writeln!(out, "  %r = call i32 @{name}()");
                let _ = writeln!(out, "  ret i32 %r");
            } else {
                let _ = writeln!(out, "  call void @{name}()");
                let _ = writeln!(out, "  ret i32 0");
            }
            let _ = writeln!(out, "}}");
        }

        Ok(out)
    }

    fn emit_block(&mut self, out: &mut String, id: BlockId) -> Result<(), EmitError> {
        let block = self.program.block(id).clone();
        let arity = self.result_arity(id)?;
        if arity > 1 {
            return Err(EmitError::WideResult(block.name.clone(), arity));
        }
        let ret_ty = if arity == 1 { "i32" } else { "void" };

        self.next_local = 0;
        let mut env: HashMap<TempId, Val> = HashMap::new();
        let params: Vec<String> = block
            .params
            .iter()
            .map(|p| format!("i32 %{}", self.temp(*p)))
            .collect();
        let name = self.block_names[id.0 as usize].clone();
        let _ = writeln!(out, "define {ret_ty} @{name}({}) {{", params.join(", "));

        let mut instrs = Vec::new();
        self.emit_code(&block.body, &mut env, arity, &mut instrs)?;
        for instr in instrs {
            let _ = writeln!(out, "{instr}");
        }
        let _ = writeln!(out, "}}");
        Ok(())
    }

    fn emit_code(
        &mut self,
        code: &Code,
        env: &mut HashMap<TempId, Val>,
        arity: usize,
        instrs: &mut Vec<Instr>,
    ) -> Result<(), EmitError> {
        match code {
            Code::Bind { vs, tail, rest } => {
                self.emit_bind(vs, tail, env, instrs)?;
                self.emit_code(rest, env, arity, instrs)
            }
            Code::Done(tail) => self.emit_done(tail, env, arity, instrs),
            Code::If {
                cond,
                then_call,
                else_call,
            } => {
                let cond_val = self.atom(env, Atom::Temp(*cond), instrs);
                let flag = self.fresh();
                instrs.push(Instr::Assign(
                    flag.clone(),
                    Rhs::Icmp("ne", cond_val, Val::Int(0)),
                ));
                instrs.push(Instr::CondBr(
                    Val::Local(flag),
                    "then".to_string(),
                    "else".to_string(),
                ));
                instrs.push(Instr::Label("then".to_string()));
                self.emit_tail_call(then_call, env, arity, instrs)?;
                instrs.push(Instr::Label("else".to_string()));
                self.emit_tail_call(else_call, env, arity, instrs)?;
                Ok(())
            }
            Code::Case { .. } => Err(EmitError::NotLowered("case dispatch".to_string())),
        }
    }

    fn emit_tail_call(
        &mut self,
        call: &BlockCall,
        env: &mut HashMap<TempId, Val>,
        arity: usize,
        instrs: &mut Vec<Instr>,
    ) -> Result<(), EmitError> {
        let args = self.atoms(env, &call.args, instrs);
        let callee = self.block_names[call.block.0 as usize].clone();
        let callee_arity = self.result_arity(call.block)?;
        match (callee_arity, arity) {
            (1, 1) => {
                let dest = self.fresh();
                instrs.push(Instr::TailCall(Some(dest.clone()), callee, args));
                instrs.push(Instr::Ret(Val::Local(dest)));
            }
            (1, _) => {
                let dest = self.fresh();
                instrs.push(Instr::TailCall(Some(dest), callee, args));
                instrs.push(Instr::RetVoid);
            }
            (_, 1) => {
                // A void callee under a word-typed block only happens for
                // halt wrappers; the call never returns.
                instrs.push(Instr::TailCall(None, callee, args));
                instrs.push(Instr::Unreachable);
            }
            _ => {
                instrs.push(Instr::TailCall(None, callee, args));
                instrs.push(Instr::RetVoid);
            }
        }
        Ok(())
    }

    fn emit_done(
        &mut self,
        tail: &Tail,
        env: &mut HashMap<TempId, Val>,
        arity: usize,
        instrs: &mut Vec<Instr>,
    ) -> Result<(), EmitError> {
        match tail {
            Tail::Return(args) => {
                if arity == 1 {
                    let v = self.atom(env, args[0], instrs);
                    instrs.push(Instr::Ret(v));
                } else {
                    instrs.push(Instr::RetVoid);
                }
                Ok(())
            }
            Tail::Call(call) => self.emit_tail_call(call, env, arity, instrs),
            Tail::Prim(p, args) => {
                let prims = &self.program.prims;
                if *p == prims.halt || *p == prims.looping {
                    instrs.push(Instr::CallVoid("mil_halt".to_string(), vec![]));
                    instrs.push(Instr::Unreachable);
                    return Ok(());
                }
                // Compute into a scratch destination, then return it.
                let scratch = TempId(u32::MAX);
                self.emit_prim(*p, args, &[scratch], env, instrs)?;
                if arity == 1 {
                    let v = self.atom(env, Atom::Temp(scratch), instrs);
                    instrs.push(Instr::Ret(v));
                } else {
                    instrs.push(Instr::RetVoid);
                }
                Ok(())
            }
            other => Err(EmitError::NotLowered(tail_kind(other).to_string())),
        }
    }

    fn emit_bind(
        &mut self,
        vs: &[TempId],
        tail: &Tail,
        env: &mut HashMap<TempId, Val>,
        instrs: &mut Vec<Instr>,
    ) -> Result<(), EmitError> {
        match tail {
            // A surviving return bind is a renaming.
            Tail::Return(args) => {
                for (v, a) in vs.iter().zip(args) {
                    let value = self.atom(env, *a, instrs);
                    env.insert(*v, value);
                }
                Ok(())
            }
            Tail::Prim(p, args) => self.emit_prim(*p, args, vs, env, instrs),
            Tail::Call(call) => {
                let args = self.atoms(env, &call.args, instrs);
                let callee = self.block_names[call.block.0 as usize].clone();
                if vs.len() == 1 {
                    let dest = self.temp(vs[0]);
                    instrs.push(Instr::Assign(dest, Rhs::Call(callee, args)));
                } else {
                    instrs.push(Instr::CallVoid(callee, args));
                }
                Ok(())
            }
            other => Err(EmitError::NotLowered(tail_kind(other).to_string())),
        }
    }

    fn emit_prim(
        &mut self,
        p: PrimId,
        args: &[Atom],
        vs: &[TempId],
        env: &mut HashMap<TempId, Val>,
        instrs: &mut Vec<Instr>,
    ) -> Result<(), EmitError> {
        let prims = self.program.prims.clone();
        let values = self.atoms(env, args, instrs);

        let simple: Option<&'static str> = if p == prims.add {
            Some("add")
        } else if p == prims.sub {
            Some("sub")
        } else if p == prims.mul {
            Some("mul")
        } else if p == prims.div {
            Some("sdiv")
        } else if p == prims.and {
            Some("and")
        } else if p == prims.or {
            Some("or")
        } else if p == prims.xor {
            Some("xor")
        } else if p == prims.shl {
            Some("shl")
        } else if p == prims.lshr {
            Some("lshr")
        } else if p == prims.ashr {
            Some("ashr")
        } else {
            None
        };
        if let Some(op) = simple {
            instrs.push(Instr::Assign(
                self.temp(vs[0]),
                Rhs::Op(op, values[0].clone(), values[1].clone()),
            ));
            return Ok(());
        }

        let compare: Option<&'static str> = if p == prims.eq {
            Some("eq")
        } else if p == prims.neq {
            Some("ne")
        } else if p == prims.lt {
            Some("slt")
        } else if p == prims.lte {
            Some("sle")
        } else if p == prims.gt {
            Some("sgt")
        } else if p == prims.gte {
            Some("sge")
        } else {
            None
        };
        if let Some(cond) = compare {
            let narrow = self.fresh();
            instrs.push(Instr::Assign(
                narrow.clone(),
                Rhs::Icmp(cond, values[0].clone(), values[1].clone()),
            ));
            instrs.push(Instr::Assign(self.temp(vs[0]), Rhs::Zext(Val::Local(narrow))));
            return Ok(());
        }

        if p == prims.neg {
            instrs.push(Instr::Assign(
                self.temp(vs[0]),
                Rhs::Op("sub", Val::Int(0), values[0].clone()),
            ));
            return Ok(());
        }
        if p == prims.not {
            instrs.push(Instr::Assign(
                self.temp(vs[0]),
                Rhs::Op("xor", Val::Int(-1), values[0].clone()),
            ));
            return Ok(());
        }
        if p == prims.bnot {
            instrs.push(Instr::Assign(
                self.temp(vs[0]),
                Rhs::Op("xor", Val::Int(1), values[0].clone()),
            ));
            return Ok(());
        }
        if p == prims.flag_to_word {
            // Flags are already carried as words.
            env.insert(vs[0], values[0].clone());
            return Ok(());
        }
        if p == prims.print_word {
            instrs.push(Instr::CallVoid(
                "mil_print_word".to_string(),
                vec![values[0].clone()],
            ));
            return Ok(());
        }
        if p == prims.load || p == prims.store {
            let ptr = self.emit_address(&values, instrs);
            if p == prims.load {
                instrs.push(Instr::Assign(self.temp(vs[0]), Rhs::Load(Val::Local(ptr))));
            } else {
                instrs.push(Instr::Store(values[5].clone(), Val::Local(ptr)));
            }
            return Ok(());
        }

        Err(EmitError::NotLowered(format!(
            "primitive `{}`",
            prims.name(p)
        )))
    }

    /// `base + offset + index * multiplier`, then `inttoptr`.
    fn emit_address(&mut self, values: &[Val], instrs: &mut Vec<Instr>) -> String {
        let scaled = if values[4] == Val::Int(0) {
            values[3].clone()
        } else {
            let s = self.fresh();
            instrs.push(Instr::Assign(
                s.clone(),
                Rhs::Op("mul", values[3].clone(), values[4].clone()),
            ));
            Val::Local(s)
        };
        let a1 = self.fresh();
        instrs.push(Instr::Assign(
            a1.clone(),
            Rhs::Op("add", values[1].clone(), values[2].clone()),
        ));
        let a2 = self.fresh();
        instrs.push(Instr::Assign(
            a2.clone(),
            Rhs::Op("add", Val::Local(a1), scaled),
        ));
        let ptr = self.fresh();
        instrs.push(Instr::Assign(ptr.clone(), Rhs::IntToPtr(Val::Local(a2))));
        ptr
    }
}

fn tail_kind(tail: &Tail) -> &'static str {
    match tail {
        Tail::Return(_) => "return",
        Tail::Prim(..) => "primitive call",
        Tail::Call(_) => "block call",
        Tail::Data(..) => "data allocation",
        Tail::Clos(..) => "closure allocation",
        Tail::Enter(..) => "closure entry",
        Tail::Sel(..) => "selector",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mil_syntax::parse_program;

    #[test]
    fn emits_arithmetic_blocks_and_main() {
        let source = "\
entry start

start[] =
  t <- add((3, 4))
  u <- mul((t, 5))
  return [u]
";
        let program = parse_program(source).expect("parse");
        let ir = emit_program(&program).expect("emit");

        assert!(ir.contains("define i32 @start()"));
        assert!(ir.contains("add i32 3, 4"));
        assert!(ir.contains("define i32 @main() {"));
        assert!(ir.contains("declare void @mil_print_word(i32)"));
    }

    #[test]
    fn a_block_named_main_does_not_collide_with_the_wrapper() {
        let source = "\
entry main

main[] =
  return [7]
";
        let program = parse_program(source).expect("parse");
        let ir = emit_program(&program).expect("emit");
        assert!(ir.contains("define i32 @main.2()"));
        assert!(ir.contains("call i32 @main.2()"));
    }

    #[test]
    fn emits_branches_as_tail_calls() {
        let source = "\
entry decide

decide[x] =
  c <- primLt((x, 10))
  if c then small[x] else big[x]

small[a] =
  return [a]

big[b] =
  t <- sub((b, 10))
  return [t]
";
        let program = parse_program(source).expect("parse");
        let ir = emit_program(&program).expect("emit");

        assert!(ir.contains("icmp slt i32"));
        assert!(ir.contains("br i1"));
        assert!(ir.contains("tail call i32 @small"));
        assert!(ir.contains("tail call i32 @big"));
    }

    #[test]
    fn unlowered_allocations_are_rejected() {
        let source = "\
data Pair = Mk/2

build[] =
  v <- Mk(1, 2)
  return [v]
";
        let program = parse_program(source).expect("parse");
        let err = emit_program(&program).expect_err("allocation must be rejected");
        assert!(matches!(err, EmitError::NotLowered(_)));
    }

    #[test]
    fn halt_becomes_a_runtime_call() {
        let source = "\
stop[] =
  halt(())
";
        let program = parse_program(source).expect("parse");
        let ir = emit_program(&program).expect("emit");
        assert!(ir.contains("call void @mil_halt()"));
        assert!(ir.contains("unreachable"));
    }

    #[test]
    fn static_top_levels_become_globals_and_are_loaded() {
        let source = "\
answer <- return [42]

read[] =
  return [answer]
";
        let program = parse_program(source).expect("parse");
        let ir = emit_program(&program).expect("emit");
        assert!(ir.contains("@answer = global i32 42"));
        assert!(ir.contains("load i32, ptr @answer"));
    }

    #[test]
    fn optimized_programs_emit_loads_and_stores() {
        use mil_opt::{PassOptions, Reporter, optimize};

        let source = "\
buffer <- return [1024]

entry write

write[] =
  off <- mul((3, 4))
  addr <- add((buffer, off))
  [] <- store((4, 0, addr, 0, 0, 99))
  return [0]
";
        let mut program = parse_program(source).expect("parse");
        let mut reporter = Reporter::new();
        optimize(&mut program, &PassOptions::default(), &mut reporter);
        let ir = emit_program(&program).expect("emit");
        assert!(ir.contains("store i32 99"));
        assert!(ir.contains("inttoptr"));
    }
}
