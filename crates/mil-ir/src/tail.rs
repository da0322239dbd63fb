//! Tails, code spines, and the named definitions that contain them.

use std::collections::{HashMap, HashSet};

use crate::{Atom, BlockId, CfunId, ClosId, DataId, PrimId, Prims, Purity, TempId, Word};

/// A call to a block with explicit arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockCall {
    pub block: BlockId,
    pub args: Vec<Atom>,
}

impl BlockCall {
    pub fn new(block: BlockId, args: Vec<Atom>) -> Self {
        Self { block, args }
    }
}

/// A computation producing a result tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tail {
    /// Pure; yields its arguments.
    Return(Vec<Atom>),
    /// Invoke a primitive.
    Prim(PrimId, Vec<Atom>),
    /// Call a block. In tail position this is a jump; on the right hand
    /// side of a bind it is an ordinary call.
    Call(BlockCall),
    /// Allocate a constructed value.
    Data(CfunId, Vec<Atom>),
    /// Allocate a closure over the stored atoms.
    Clos(ClosId, Vec<Atom>),
    /// Force and apply a closure value.
    Enter(Atom, Vec<Atom>),
    /// Extract field `usize` of a value built by the given constructor.
    Sel(CfunId, usize, Atom),
}

impl Tail {
    pub fn ret1(atom: Atom) -> Tail {
        Tail::Return(vec![atom])
    }

    /// The argument list iff this tail is a call to the primitive `p`.
    pub fn prim_args(&self, p: PrimId) -> Option<&[Atom]> {
        match self {
            Tail::Prim(q, args) if *q == p => Some(args),
            _ => None,
        }
    }

    pub fn as_block_call(&self) -> Option<&BlockCall> {
        match self {
            Tail::Call(call) => Some(call),
            _ => None,
        }
    }

    /// Effect classification. Allocation is pure (the result is immutable),
    /// while block calls and closure entries are opaque and conservatively
    /// impure.
    pub fn purity(&self, prims: &Prims) -> Purity {
        match self {
            Tail::Return(_) | Tail::Data(..) | Tail::Clos(..) | Tail::Sel(..) => Purity::Pure,
            Tail::Prim(p, _) => prims.purity(*p),
            Tail::Call(_) | Tail::Enter(..) => Purity::Impure,
        }
    }

    pub fn is_repeatable(&self, prims: &Prims) -> bool {
        self.purity(prims).is_repeatable()
    }

    pub fn has_no_effect(&self, prims: &Prims) -> bool {
        self.purity(prims).has_no_effect()
    }

    pub fn doesnt_return(&self, prims: &Prims) -> bool {
        self.purity(prims).doesnt_return()
    }

    /// All atoms this tail reads, in argument order.
    pub fn atoms(&self) -> Vec<Atom> {
        match self {
            Tail::Return(args) | Tail::Prim(_, args) | Tail::Data(_, args) | Tail::Clos(_, args) => {
                args.clone()
            }
            Tail::Call(call) => call.args.clone(),
            Tail::Enter(f, args) => {
                let mut out = vec![*f];
                out.extend_from_slice(args);
                out
            }
            Tail::Sel(_, _, a) => vec![*a],
        }
    }

    fn atoms_mut(&mut self) -> Vec<&mut Atom> {
        match self {
            Tail::Return(args) | Tail::Prim(_, args) | Tail::Data(_, args) | Tail::Clos(_, args) => {
                args.iter_mut().collect()
            }
            Tail::Call(call) => call.args.iter_mut().collect(),
            Tail::Enter(f, args) => std::iter::once(f).chain(args.iter_mut()).collect(),
            Tail::Sel(_, _, a) => vec![a],
        }
    }

    /// Replace temporaries according to `map`, leaving other atoms alone.
    pub fn substitute(&mut self, map: &HashMap<TempId, Atom>) {
        for atom in self.atoms_mut() {
            if let Atom::Temp(t) = atom
                && let Some(replacement) = map.get(t)
            {
                *atom = *replacement;
            }
        }
    }

    pub fn mark_used(&self, used: &mut HashSet<TempId>) {
        for atom in self.atoms() {
            if let Atom::Temp(t) = atom {
                used.insert(t);
            }
        }
    }

    /// Apply `f` to every atom operand in place.
    pub fn map_atoms(&mut self, f: &mut impl FnMut(&mut Atom)) {
        for atom in self.atoms_mut() {
            f(atom);
        }
    }
}

/// An alternative of a constructor dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseAlt {
    pub cfun: CfunId,
    pub target: BlockCall,
}

/// A linear spine of bindings terminated by a tail, conditional, or case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Code {
    /// Bind the tuple produced by `tail` to `vs`, in scope for `rest` only.
    Bind {
        vs: Vec<TempId>,
        tail: Tail,
        rest: Box<Code>,
    },
    Done(Tail),
    If {
        cond: TempId,
        then_call: BlockCall,
        else_call: BlockCall,
    },
    Case {
        scrut: TempId,
        alts: Vec<CaseAlt>,
        default: Option<BlockCall>,
    },
}

impl Code {
    pub fn bind1(v: TempId, tail: Tail, rest: Code) -> Code {
        Code::Bind {
            vs: vec![v],
            tail,
            rest: Box::new(rest),
        }
    }

    pub fn bind(vs: Vec<TempId>, tail: Tail, rest: Code) -> Code {
        Code::Bind {
            vs,
            tail,
            rest: Box::new(rest),
        }
    }

    /// The tail if this code is just `Done(tail)`.
    pub fn as_done(&self) -> Option<&Tail> {
        match self {
            Code::Done(tail) => Some(tail),
            _ => None,
        }
    }

    /// Splice this fragment in front of a continuation: the final
    /// `Done(tail)` becomes `k(tail)`. Rewriter fragments are straight-line
    /// bind spines by construction, so `If`/`Case` here is a compiler bug.
    pub fn and_then(self, k: impl FnOnce(Tail) -> Code) -> Code {
        match self {
            Code::Bind { vs, tail, rest } => Code::Bind {
                vs,
                tail,
                rest: Box::new(rest.and_then(k)),
            },
            Code::Done(tail) => k(tail),
            Code::If { .. } | Code::Case { .. } => {
                unreachable!("spliced fragment must be a straight-line bind spine")
            }
        }
    }

    /// Successor blocks referenced in tail position.
    pub fn successors(&self, out: &mut Vec<BlockId>) {
        match self {
            Code::Bind { tail, rest, .. } => {
                if let Tail::Call(call) = tail {
                    out.push(call.block);
                }
                rest.successors(out);
            }
            Code::Done(tail) => {
                if let Tail::Call(call) = tail {
                    out.push(call.block);
                }
            }
            Code::If {
                then_call,
                else_call,
                ..
            } => {
                out.push(then_call.block);
                out.push(else_call.block);
            }
            Code::Case { alts, default, .. } => {
                for alt in alts {
                    out.push(alt.target.block);
                }
                if let Some(call) = default {
                    out.push(call.block);
                }
            }
        }
    }

    /// Collect every temporary read anywhere on this spine.
    pub fn mark_used(&self, used: &mut HashSet<TempId>) {
        match self {
            Code::Bind { tail, rest, .. } => {
                tail.mark_used(used);
                rest.mark_used(used);
            }
            Code::Done(tail) => tail.mark_used(used),
            Code::If {
                cond,
                then_call,
                else_call,
            } => {
                used.insert(*cond);
                for atom in then_call.args.iter().chain(else_call.args.iter()) {
                    if let Atom::Temp(t) = atom {
                        used.insert(*t);
                    }
                }
            }
            Code::Case {
                scrut,
                alts,
                default,
            } => {
                used.insert(*scrut);
                let default_args = default.iter().flat_map(|call| call.args.iter());
                for atom in alts
                    .iter()
                    .flat_map(|alt| alt.target.args.iter())
                    .chain(default_args)
                {
                    if let Atom::Temp(t) = atom {
                        used.insert(*t);
                    }
                }
            }
        }
    }

    /// Apply `f` to every atom operand on the spine, including branch and
    /// case target arguments (scrutinees and conditions are temps, not
    /// atoms, and stay put).
    pub fn map_atoms(&mut self, f: &mut impl FnMut(&mut Atom)) {
        match self {
            Code::Bind { tail, rest, .. } => {
                tail.map_atoms(f);
                rest.map_atoms(f);
            }
            Code::Done(tail) => tail.map_atoms(f),
            Code::If {
                then_call,
                else_call,
                ..
            } => {
                for atom in then_call.args.iter_mut().chain(else_call.args.iter_mut()) {
                    f(atom);
                }
            }
            Code::Case { alts, default, .. } => {
                for alt in alts.iter_mut() {
                    for atom in alt.target.args.iter_mut() {
                        f(atom);
                    }
                }
                if let Some(call) = default {
                    for atom in call.args.iter_mut() {
                        f(atom);
                    }
                }
            }
        }
    }

    /// Replace temporaries according to `map` through the whole spine.
    /// Binders are left untouched; callers are responsible for not
    /// substituting a bound temp.
    pub fn substitute(&mut self, map: &HashMap<TempId, Atom>) {
        let subst_call = |call: &mut BlockCall| {
            for atom in call.args.iter_mut() {
                if let Atom::Temp(t) = atom
                    && let Some(replacement) = map.get(t)
                {
                    *atom = *replacement;
                }
            }
        };
        match self {
            Code::Bind { tail, rest, .. } => {
                tail.substitute(map);
                rest.substitute(map);
            }
            Code::Done(tail) => tail.substitute(map),
            Code::If {
                cond,
                then_call,
                else_call,
            } => {
                if let Some(Atom::Temp(t)) = map.get(cond) {
                    *cond = *t;
                }
                subst_call(then_call);
                subst_call(else_call);
            }
            Code::Case {
                scrut,
                alts,
                default,
            } => {
                if let Some(Atom::Temp(t)) = map.get(scrut) {
                    *scrut = *t;
                }
                for alt in alts {
                    subst_call(&mut alt.target);
                }
                if let Some(call) = default {
                    subst_call(call);
                }
            }
        }
    }
}

/// A named code with explicit parameters; the unit of control flow.
#[derive(Debug, Clone)]
pub struct Block {
    pub name: String,
    pub params: Vec<TempId>,
    pub body: Code,
}

impl Block {
    pub fn new(name: impl Into<String>, params: Vec<TempId>, body: Code) -> Self {
        Self {
            name: name.into(),
            params,
            body,
        }
    }
}

/// One component name of a top-level definition.
#[derive(Debug, Clone)]
pub struct TopLhs {
    pub name: String,
}

impl TopLhs {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A named, parameter-less, tuple-valued definition evaluated once.
#[derive(Debug, Clone)]
pub struct TopLevel {
    pub lhs: Vec<TopLhs>,
    pub tail: Tail,
}

impl TopLevel {
    pub fn single(name: impl Into<String>, tail: Tail) -> Self {
        Self {
            lhs: vec![TopLhs::new(name)],
            tail,
        }
    }

    pub fn name(&self) -> String {
        if self.lhs.len() == 1 {
            self.lhs[0].name.clone()
        } else {
            let names: Vec<&str> = self.lhs.iter().map(|l| l.name.as_str()).collect();
            format!("[{}]", names.join(","))
        }
    }
}

/// A closure definition: captured atoms in `stored`, entry parameters in
/// `params`, and a tail as the body.
#[derive(Debug, Clone)]
pub struct ClosureDefn {
    pub name: String,
    pub stored: Vec<TempId>,
    pub params: Vec<TempId>,
    pub body: Tail,
}

/// A constructor function introducing one tagged variant of a data type.
#[derive(Debug, Clone)]
pub struct Cfun {
    pub name: String,
    pub data: DataId,
    pub tag: usize,
    pub arity: usize,
}

/// A data type: its constructors, and a bitdata description when the values
/// are packed bit strings rather than heap records.
#[derive(Debug, Clone)]
pub struct DataDefn {
    pub name: String,
    pub cfuns: Vec<CfunId>,
    pub bitdata: Option<BitdataDefn>,
}

/// Bit-level description of a bitdata type: total width plus one layout per
/// constructor (indexed by constructor tag).
#[derive(Debug, Clone)]
pub struct BitdataDefn {
    pub width: u32,
    pub layouts: Vec<BitdataLayout>,
}

/// The layout of one bitdata constructor: fixed tag bits plus the fields
/// occupying the remaining positions.
#[derive(Debug, Clone)]
pub struct BitdataLayout {
    /// Constant bits of this layout, least significant word first, covering
    /// the full width of the type.
    pub tagbits: Vec<Word>,
    pub fields: Vec<BitdataField>,
}

/// A field of a bitdata layout. Fields never straddle a word boundary.
#[derive(Debug, Clone)]
pub struct BitdataField {
    pub name: String,
    pub offset: u32,
    pub width: u32,
}

impl BitdataField {
    /// Index of the word holding this field.
    pub fn word_index(&self) -> usize {
        (self.offset / crate::WORD_SIZE) as usize
    }

    /// Bit offset of the field within its word.
    pub fn word_offset(&self) -> u32 {
        self.offset % crate::WORD_SIZE
    }

    /// Mask for the field once shifted down to bit zero.
    pub fn value_mask(&self) -> Word {
        if self.width >= crate::WORD_SIZE {
            -1
        } else {
            ((1i64 << self.width) - 1) as Word
        }
    }
}

impl BitdataLayout {
    /// The mask/bits pair for the membership test of this layout: `mask`
    /// covers every position not claimed by a field, and `bits` holds the
    /// tag bits at those positions. A value `v` belongs to the layout iff
    /// `v & mask == bits`, word by word.
    pub fn mask_test(&self, width: u32) -> (Vec<Word>, Vec<Word>) {
        let words = crate::num_words(width);
        let mut mask: Vec<Word> = Vec::with_capacity(words);
        for w in 0..words as u32 {
            let lo = w * crate::WORD_SIZE;
            let hi = (lo + crate::WORD_SIZE).min(width);
            let word_mask = if hi <= lo {
                0
            } else if hi - lo >= crate::WORD_SIZE {
                -1
            } else {
                ((1i64 << (hi - lo)) - 1) as Word
            };
            mask.push(word_mask);
        }
        for field in &self.fields {
            let cleared = (field.value_mask() as i64) << field.word_offset();
            mask[field.word_index()] &= !(cleared as Word);
        }
        let bits = self
            .tagbits
            .iter()
            .zip(mask.iter())
            .map(|(t, m)| t & m)
            .collect();
        (mask, bits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Program;

    #[test]
    fn prim_args_matches_only_the_named_primitive() {
        let prims = Prims::new();
        let tail = Tail::Prim(prims.add, vec![Atom::Int(1), Atom::Int(2)]);
        assert_eq!(
            tail.prim_args(prims.add),
            Some(&[Atom::Int(1), Atom::Int(2)][..])
        );
        assert_eq!(tail.prim_args(prims.sub), None);
    }

    #[test]
    fn purity_classification() {
        let mut program = Program::new();
        let prims = program.prims.clone();
        let t = program.fresh_temp();

        assert!(Tail::ret1(Atom::Temp(t)).is_repeatable(&prims));
        assert!(Tail::Prim(prims.load, vec![]).is_repeatable(&prims));
        assert!(!Tail::Prim(prims.store, vec![]).has_no_effect(&prims));
        assert!(Tail::Prim(prims.halt, vec![]).doesnt_return(&prims));
        assert!(!Tail::Call(BlockCall::new(BlockId(0), vec![])).is_repeatable(&prims));
    }

    #[test]
    fn and_then_splices_below_the_binds() {
        let mut program = Program::new();
        let prims = program.prims.clone();
        let v = program.fresh_temp();
        let w = program.fresh_temp();
        let fragment = Code::bind1(
            v,
            Tail::Prim(prims.add, vec![Atom::Int(1), Atom::Int(2)]),
            Code::Done(Tail::Prim(prims.mul, vec![Atom::Temp(v), Atom::Int(3)])),
        );

        let spliced = fragment.and_then(|tail| Code::bind(vec![w], tail, Code::Done(Tail::ret1(Atom::Temp(w)))));
        let Code::Bind { rest, .. } = spliced else {
            panic!("expected the original bind to stay on top");
        };
        assert!(matches!(
            *rest,
            Code::Bind { ref vs, .. } if vs == &vec![w]
        ));
    }

    #[test]
    fn substitute_rewrites_free_temps_only() {
        let mut program = Program::new();
        let prims = program.prims.clone();
        let x = program.fresh_temp();
        let y = program.fresh_temp();
        let mut code = Code::bind1(
            y,
            Tail::Prim(prims.add, vec![Atom::Temp(x), Atom::Int(1)]),
            Code::Done(Tail::ret1(Atom::Temp(y))),
        );

        let map = HashMap::from([(x, Atom::Int(9))]);
        code.substitute(&map);

        let Code::Bind { tail, .. } = &code else {
            panic!("bind expected");
        };
        assert_eq!(tail.prim_args(prims.add), Some(&[Atom::Int(9), Atom::Int(1)][..]));
    }

    #[test]
    fn mask_test_covers_everything_but_fields() {
        // One constructor, tag 0b10 in the top two bits of an 8-bit value,
        // 6-bit payload in the low bits.
        let layout = BitdataLayout {
            tagbits: vec![0b1000_0000u32 as Word],
            fields: vec![BitdataField {
                name: "payload".to_string(),
                offset: 0,
                width: 6,
            }],
        };
        let (mask, bits) = layout.mask_test(8);
        assert_eq!(mask, vec![0b1100_0000]);
        assert_eq!(bits, vec![0b1000_0000u32 as Word]);
    }

    #[test]
    fn mask_test_multi_word_layout() {
        let layout = BitdataLayout {
            tagbits: vec![0, 0b1],
            fields: vec![BitdataField {
                name: "lo".to_string(),
                offset: 0,
                width: 32,
            }],
        };
        let (mask, bits) = layout.mask_test(34);
        assert_eq!(mask, vec![0, 0b11]);
        assert_eq!(bits, vec![0, 0b1]);
    }
}
