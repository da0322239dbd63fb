//! A reference interpreter for MIL programs.
//!
//! The interpreter defines the observable semantics the optimizer must
//! preserve: `printWord` output is collected as a trace, and round-trip
//! tests compare traces before and after optimization and lowering.

use std::collections::HashMap;

use mil_ir::{Atom, BlockCall, BlockId, CfunId, ClosId, Code, PrimId, Program, Tail, TempId, TopId, Word};

/// A runtime value. Constructed data and closures keep their identity so
/// `Sel` and `Enter` can be interpreted before lowering.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Word(Word),
    Flag(bool),
    Data(CfunId, Vec<Value>),
    Clos(ClosId, Vec<Value>),
}

impl Value {
    fn word(&self) -> Result<Word, EvalError> {
        match self {
            Value::Word(n) => Ok(*n),
            other => Err(EvalError::TypeMismatch(format!(
                "expected a word, got {other:?}"
            ))),
        }
    }

    fn flag(&self) -> Result<bool, EvalError> {
        match self {
            Value::Flag(b) => Ok(*b),
            other => Err(EvalError::TypeMismatch(format!(
                "expected a flag, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("divide by zero error")]
    DivideByZero,
    #[error("halt primitive executed")]
    Halt,
    #[error("primitive `{0}` not available")]
    Unavailable(String),
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    #[error("selector applied to a value of a different constructor")]
    BadSelector,
    #[error("no case alternative matched")]
    NoMatch,
    #[error("evaluation fuel exhausted")]
    OutOfFuel,
    #[error("unbound temporary during evaluation")]
    Unbound,
}

/// One interpreter run over a fixed program. Top-level definitions are
/// evaluated once, in declaration order, before the entry block runs.
pub struct Machine<'a> {
    program: &'a Program,
    tops: Vec<Option<Vec<Value>>>,
    memory: HashMap<Word, Word>,
    pub trace: Vec<String>,
    fuel: usize,
}

const DEFAULT_FUEL: usize = 1_000_000;

impl<'a> Machine<'a> {
    pub fn new(program: &'a Program) -> Self {
        Self {
            program,
            tops: vec![None; program.tops.len()],
            memory: HashMap::new(),
            trace: Vec::new(),
            fuel: DEFAULT_FUEL,
        }
    }

    pub fn with_fuel(mut self, fuel: usize) -> Self {
        self.fuel = fuel;
        self
    }

    /// Preload a word of memory, for programs that start by loading.
    pub fn poke(&mut self, addr: Word, value: Word) {
        self.memory.insert(addr, value);
    }

    pub fn peek(&self, addr: Word) -> Option<Word> {
        self.memory.get(&addr).copied()
    }

    /// Evaluate the program's top-level definitions, then run the given
    /// block to completion.
    pub fn run(&mut self, block: BlockId, args: Vec<Value>) -> Result<Vec<Value>, EvalError> {
        for i in 0..self.program.tops.len() {
            self.force_top(TopId(i as u32))?;
        }
        self.run_block(block, args)
    }

    /// Run the first entry block with the given arguments.
    pub fn run_entry(&mut self, args: Vec<Value>) -> Result<Vec<Value>, EvalError> {
        let entry = *self
            .program
            .entries
            .first()
            .ok_or_else(|| EvalError::Unavailable("entry block".to_string()))?;
        self.run(entry, args)
    }

    fn force_top(&mut self, id: TopId) -> Result<(), EvalError> {
        if self.tops[id.0 as usize].is_some() {
            return Ok(());
        }
        let tail = self.program.top(id).tail.clone();
        let env = HashMap::new();
        let values = self.eval_tail(&env, &tail)?;
        self.tops[id.0 as usize] = Some(values);
        Ok(())
    }

    fn atom(&self, env: &HashMap<TempId, Value>, atom: Atom) -> Result<Value, EvalError> {
        match atom {
            Atom::Temp(t) => env.get(&t).cloned().ok_or(EvalError::Unbound),
            Atom::Int(n) => Ok(Value::Word(n)),
            Atom::Flag(b) => Ok(Value::Flag(b)),
            Atom::Top(t, i) => {
                let values = self.tops[t.0 as usize]
                    .as_ref()
                    .ok_or(EvalError::Unbound)?;
                values.get(i).cloned().ok_or(EvalError::Unbound)
            }
        }
    }

    fn atoms(&self, env: &HashMap<TempId, Value>, atoms: &[Atom]) -> Result<Vec<Value>, EvalError> {
        atoms.iter().map(|a| self.atom(env, *a)).collect()
    }

    fn spend(&mut self) -> Result<(), EvalError> {
        if self.fuel == 0 {
            return Err(EvalError::OutOfFuel);
        }
        self.fuel -= 1;
        Ok(())
    }

    /// Run a block as a trampolined loop: tail calls and branch targets
    /// replace the current frame instead of recursing.
    pub fn run_block(&mut self, block: BlockId, args: Vec<Value>) -> Result<Vec<Value>, EvalError> {
        let mut current = block;
        let mut values = args;
        'blocks: loop {
            self.spend()?;
            let block = self.program.block(current).clone();
            if block.params.len() != values.len() {
                return Err(EvalError::TypeMismatch(format!(
                    "block `{}` called with {} arguments",
                    block.name,
                    values.len()
                )));
            }
            let mut env: HashMap<TempId, Value> =
                block.params.iter().copied().zip(values).collect();

            let mut code = &block.body;
            loop {
                match code {
                    Code::Bind { vs, tail, rest } => {
                        let produced = self.eval_tail(&env, tail)?;
                        if produced.len() != vs.len() {
                            return Err(EvalError::TypeMismatch(format!(
                                "bind of {} temporaries against {} results",
                                vs.len(),
                                produced.len()
                            )));
                        }
                        for (v, value) in vs.iter().zip(produced) {
                            env.insert(*v, value);
                        }
                        code = rest;
                    }
                    Code::Done(Tail::Call(call)) => {
                        let args = self.atoms(&env, &call.args)?;
                        current = call.block;
                        values = args;
                        continue 'blocks;
                    }
                    Code::Done(tail) => return self.eval_tail(&env, tail),
                    Code::If {
                        cond,
                        then_call,
                        else_call,
                    } => {
                        let flag = self.atom(&env, Atom::Temp(*cond))?.flag()?;
                        let call = if flag { then_call } else { else_call };
                        let args = self.atoms(&env, &call.args)?;
                        current = call.block;
                        values = args;
                        continue 'blocks;
                    }
                    Code::Case {
                        scrut,
                        alts,
                        default,
                    } => {
                        let value = self.atom(&env, Atom::Temp(*scrut))?;
                        let Value::Data(cf, _) = &value else {
                            return Err(EvalError::TypeMismatch(format!(
                                "case on a non-constructed value {value:?}"
                            )));
                        };
                        let call = alts
                            .iter()
                            .find(|alt| alt.cfun == *cf)
                            .map(|alt| &alt.target)
                            .or(default.as_ref())
                            .ok_or(EvalError::NoMatch)?;
                        let args = self.atoms(&env, &call.args)?;
                        current = call.block;
                        values = args;
                        continue 'blocks;
                    }
                }
            }
        }
    }

    fn eval_tail(
        &mut self,
        env: &HashMap<TempId, Value>,
        tail: &Tail,
    ) -> Result<Vec<Value>, EvalError> {
        match tail {
            Tail::Return(args) => self.atoms(env, args),
            Tail::Prim(p, args) => {
                let args = self.atoms(env, args)?;
                self.exec_prim(*p, args)
            }
            Tail::Call(BlockCall { block, args }) => {
                let args = self.atoms(env, args)?;
                self.run_block(*block, args)
            }
            Tail::Data(cf, args) => Ok(vec![Value::Data(*cf, self.atoms(env, args)?)]),
            Tail::Clos(k, args) => Ok(vec![Value::Clos(*k, self.atoms(env, args)?)]),
            Tail::Enter(f, args) => {
                let func = self.atom(env, *f)?;
                let Value::Clos(k, stored) = func else {
                    return Err(EvalError::TypeMismatch(format!(
                        "entering a non-closure value {func:?}"
                    )));
                };
                let defn = self.program.closure(k);
                let args = self.atoms(env, args)?;
                if stored.len() != defn.stored.len() || args.len() != defn.params.len() {
                    return Err(EvalError::TypeMismatch(format!(
                        "closure `{}` entered with the wrong shape",
                        defn.name
                    )));
                }
                let inner: HashMap<TempId, Value> = defn
                    .stored
                    .iter()
                    .chain(defn.params.iter())
                    .copied()
                    .zip(stored.into_iter().chain(args))
                    .collect();
                let body = defn.body.clone();
                self.eval_tail(&inner, &body)
            }
            Tail::Sel(cf, n, a) => {
                let value = self.atom(env, *a)?;
                let Value::Data(got, fields) = value else {
                    return Err(EvalError::TypeMismatch(
                        "selecting from a non-constructed value".to_string(),
                    ));
                };
                if got != *cf {
                    return Err(EvalError::BadSelector);
                }
                fields.get(*n).cloned().map(|v| vec![v]).ok_or(EvalError::BadSelector)
            }
        }
    }

    fn exec_prim(&mut self, p: PrimId, args: Vec<Value>) -> Result<Vec<Value>, EvalError> {
        let prims = &self.program.prims;
        let word = |v: &Value| v.word();
        let flag = |v: &Value| v.flag();

        let one_word = |n: Word| Ok(vec![Value::Word(n)]);
        let one_flag = |b: bool| Ok(vec![Value::Flag(b)]);

        if p == prims.add {
            return one_word(word(&args[0])?.wrapping_add(word(&args[1])?));
        }
        if p == prims.sub {
            return one_word(word(&args[0])?.wrapping_sub(word(&args[1])?));
        }
        if p == prims.mul {
            return one_word(word(&args[0])?.wrapping_mul(word(&args[1])?));
        }
        if p == prims.div {
            let d = word(&args[1])?;
            if d == 0 {
                return Err(EvalError::DivideByZero);
            }
            return one_word(word(&args[0])?.wrapping_div(d));
        }
        if p == prims.neg {
            return one_word(word(&args[0])?.wrapping_neg());
        }
        if p == prims.and {
            return one_word(word(&args[0])? & word(&args[1])?);
        }
        if p == prims.or {
            return one_word(word(&args[0])? | word(&args[1])?);
        }
        if p == prims.xor {
            return one_word(word(&args[0])? ^ word(&args[1])?);
        }
        if p == prims.not {
            return one_word(!word(&args[0])?);
        }
        if p == prims.shl {
            return one_word(word(&args[0])?.wrapping_shl(word(&args[1])? as u32));
        }
        if p == prims.lshr {
            return one_word(((word(&args[0])? as u32).wrapping_shr(word(&args[1])? as u32)) as Word);
        }
        if p == prims.ashr {
            return one_word(word(&args[0])?.wrapping_shr(word(&args[1])? as u32));
        }
        if p == prims.eq {
            return one_flag(word(&args[0])? == word(&args[1])?);
        }
        if p == prims.neq {
            return one_flag(word(&args[0])? != word(&args[1])?);
        }
        if p == prims.lt {
            return one_flag(word(&args[0])? < word(&args[1])?);
        }
        if p == prims.lte {
            return one_flag(word(&args[0])? <= word(&args[1])?);
        }
        if p == prims.gt {
            return one_flag(word(&args[0])? > word(&args[1])?);
        }
        if p == prims.gte {
            return one_flag(word(&args[0])? >= word(&args[1])?);
        }
        if p == prims.bnot {
            return one_flag(!flag(&args[0])?);
        }
        if p == prims.flag_to_word {
            return one_word(flag(&args[0])? as Word);
        }
        if p == prims.halt {
            return Err(EvalError::Halt);
        }
        if p == prims.print_word {
            let n = word(&args[0])?;
            self.trace.push(format!("printWord: {n}"));
            return Ok(vec![]);
        }
        if p == prims.load {
            let addr = self.effective_address(&args)?;
            return one_word(self.memory.get(&addr).copied().unwrap_or(0));
        }
        if p == prims.store {
            let addr = self.effective_address(&args)?;
            let value = word(&args[5])?;
            self.memory.insert(addr, value);
            return Ok(vec![]);
        }
        Err(EvalError::Unavailable(prims.name(p).to_string()))
    }

    /// `base + offset + index * multiplier` from a load/store argument
    /// vector `(size, base, offset, index, multiplier, ...)`. A zero
    /// multiplier means no scaling.
    fn effective_address(&self, args: &[Value]) -> Result<Word, EvalError> {
        let base = args[1].word()?;
        let offset = args[2].word()?;
        let index = args[3].word()?;
        let mult = args[4].word()?;
        let scaled = if mult == 0 {
            index
        } else {
            index.wrapping_mul(mult)
        };
        Ok(base.wrapping_add(offset).wrapping_add(scaled))
    }
}
