//! The primitive registry.
//!
//! Primitives are interned in a [`Prims`] table owned by the program and
//! referenced by [`PrimId`] handles, so passes never consult mutable global
//! state. Two primitives with the same name may coexist after
//! specialization; identity is the id, not the name.

use crate::PrimId;

/// The extent to which a primitive call may depend on or cause effects.
///
/// The ladder is ordered: rewrites that duplicate a tail require
/// [`Purity::is_repeatable`], rewrites that delete one require
/// [`Purity::has_no_effect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Purity {
    Pure,
    Observer,
    Volatile,
    Impure,
    DoesNotReturn,
}

impl Purity {
    /// Results of a previous use of the same tail can be reused.
    pub fn is_repeatable(self) -> bool {
        self <= Purity::Observer
    }

    /// The computation can be dropped without observable consequence.
    pub fn has_no_effect(self) -> bool {
        self <= Purity::Volatile
    }

    pub fn doesnt_return(self) -> bool {
        self >= Purity::DoesNotReturn
    }

    pub fn label(self) -> &'static str {
        match self {
            Purity::Pure => "pure",
            Purity::Observer => "observer",
            Purity::Volatile => "volatile",
            Purity::Impure => "impure",
            Purity::DoesNotReturn => "doesntReturn",
        }
    }

    pub fn from_label(label: &str) -> Option<Purity> {
        match label {
            "pure" => Some(Purity::Pure),
            "observer" => Some(Purity::Observer),
            "volatile" => Some(Purity::Volatile),
            "impure" => Some(Purity::Impure),
            "doesntReturn" => Some(Purity::DoesNotReturn),
            _ => None,
        }
    }
}

/// A named, typed primitive.
#[derive(Debug, Clone)]
pub struct PrimDef {
    pub name: String,
    pub arity: usize,
    pub outity: usize,
    pub purity: Purity,
}

/// The primitive table for one program, with handles for every builtin.
#[derive(Debug, Clone)]
pub struct Prims {
    defs: Vec<PrimDef>,

    pub add: PrimId,
    pub sub: PrimId,
    pub mul: PrimId,
    pub div: PrimId,
    pub neg: PrimId,
    pub and: PrimId,
    pub or: PrimId,
    pub xor: PrimId,
    pub not: PrimId,
    pub shl: PrimId,
    pub lshr: PrimId,
    pub ashr: PrimId,
    pub eq: PrimId,
    pub neq: PrimId,
    pub lt: PrimId,
    pub lte: PrimId,
    pub gt: PrimId,
    pub gte: PrimId,
    pub bnot: PrimId,
    pub flag_to_word: PrimId,
    pub halt: PrimId,
    pub looping: PrimId,
    pub print_word: PrimId,
    pub load: PrimId,
    pub store: PrimId,
}

impl Default for Prims {
    fn default() -> Self {
        Self::new()
    }
}

impl Prims {
    pub fn new() -> Self {
        let mut defs = Vec::new();
        let mut declare = |name: &str, arity, outity, purity| {
            let id = PrimId(defs.len() as u32);
            defs.push(PrimDef {
                name: name.to_string(),
                arity,
                outity,
                purity,
            });
            id
        };

        let add = declare("add", 2, 1, Purity::Pure);
        let sub = declare("sub", 2, 1, Purity::Pure);
        let mul = declare("mul", 2, 1, Purity::Pure);
        let div = declare("div", 2, 1, Purity::Pure);
        let neg = declare("neg", 1, 1, Purity::Pure);
        let and = declare("and", 2, 1, Purity::Pure);
        let or = declare("or", 2, 1, Purity::Pure);
        let xor = declare("xor", 2, 1, Purity::Pure);
        let not = declare("not", 1, 1, Purity::Pure);
        let shl = declare("shl", 2, 1, Purity::Pure);
        let lshr = declare("lshr", 2, 1, Purity::Pure);
        let ashr = declare("ashr", 2, 1, Purity::Pure);
        let eq = declare("primEq", 2, 1, Purity::Pure);
        let neq = declare("primNeq", 2, 1, Purity::Pure);
        let lt = declare("primLt", 2, 1, Purity::Pure);
        let lte = declare("primLte", 2, 1, Purity::Pure);
        let gt = declare("primGt", 2, 1, Purity::Pure);
        let gte = declare("primGte", 2, 1, Purity::Pure);
        let bnot = declare("bnot", 1, 1, Purity::Pure);
        let flag_to_word = declare("flagToWord", 1, 1, Purity::Pure);
        let halt = declare("halt", 0, 0, Purity::DoesNotReturn);
        let looping = declare("loop", 0, 0, Purity::DoesNotReturn);
        let print_word = declare("printWord", 1, 0, Purity::Impure);
        let load = declare("load", 5, 1, Purity::Observer);
        let store = declare("store", 6, 0, Purity::Impure);

        Self {
            defs,
            add,
            sub,
            mul,
            div,
            neg,
            and,
            or,
            xor,
            not,
            shl,
            lshr,
            ashr,
            eq,
            neq,
            lt,
            lte,
            gt,
            gte,
            bnot,
            flag_to_word,
            halt,
            looping,
            print_word,
            load,
            store,
        }
    }

    pub fn def(&self, id: PrimId) -> &PrimDef {
        &self.defs[id.0 as usize]
    }

    pub fn name(&self, id: PrimId) -> &str {
        &self.defs[id.0 as usize].name
    }

    pub fn arity(&self, id: PrimId) -> usize {
        self.defs[id.0 as usize].arity
    }

    pub fn outity(&self, id: PrimId) -> usize {
        self.defs[id.0 as usize].outity
    }

    pub fn purity(&self, id: PrimId) -> Purity {
        self.defs[id.0 as usize].purity
    }

    /// Register a new primitive (user-declared or a specialized copy).
    pub fn declare(
        &mut self,
        name: impl Into<String>,
        arity: usize,
        outity: usize,
        purity: Purity,
    ) -> PrimId {
        let id = PrimId(self.defs.len() as u32);
        self.defs.push(PrimDef {
            name: name.into(),
            arity,
            outity,
            purity,
        });
        id
    }

    /// Find the first primitive with the given name.
    pub fn lookup(&self, name: &str) -> Option<PrimId> {
        self.defs
            .iter()
            .position(|def| def.name == name)
            .map(|i| PrimId(i as u32))
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// The relational inverse of a comparison primitive, if `id` is one.
    /// Used by `bnot` rewriting: `bnot(lt(x,y))` becomes `gte(x,y)`.
    pub fn relational_inverse(&self, id: PrimId) -> Option<PrimId> {
        if id == self.eq {
            Some(self.neq)
        } else if id == self.neq {
            Some(self.eq)
        } else if id == self.lt {
            Some(self.gte)
        } else if id == self.lte {
            Some(self.gt)
        } else if id == self.gt {
            Some(self.lte)
        } else if id == self.gte {
            Some(self.lt)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purity_ladder_matches_contract() {
        assert!(Purity::Pure.is_repeatable());
        assert!(Purity::Observer.is_repeatable());
        assert!(!Purity::Volatile.is_repeatable());

        assert!(Purity::Volatile.has_no_effect());
        assert!(!Purity::Impure.has_no_effect());

        assert!(Purity::DoesNotReturn.doesnt_return());
        assert!(!Purity::Impure.doesnt_return());
    }

    #[test]
    fn purity_labels_round_trip() {
        for purity in [
            Purity::Pure,
            Purity::Observer,
            Purity::Volatile,
            Purity::Impure,
            Purity::DoesNotReturn,
        ] {
            assert_eq!(Purity::from_label(purity.label()), Some(purity));
        }
        assert_eq!(Purity::from_label("sometimes"), None);
    }

    #[test]
    fn builtin_arities_match_their_signatures() {
        let prims = Prims::new();
        assert_eq!(prims.arity(prims.add), 2);
        assert_eq!(prims.outity(prims.add), 1);
        assert_eq!(prims.arity(prims.load), 5);
        assert_eq!(prims.arity(prims.store), 6);
        assert_eq!(prims.outity(prims.store), 0);
        assert_eq!(prims.outity(prims.halt), 0);
        assert!(prims.purity(prims.halt).doesnt_return());
        assert!(prims.purity(prims.load).is_repeatable());
        assert!(!prims.purity(prims.store).has_no_effect());
    }

    #[test]
    fn declared_prims_are_distinct_even_with_equal_names(){
        let mut prims = Prims::new();
        let specialized = prims.declare("add", 2, 1, Purity::Pure);
        assert_ne!(specialized, prims.add);
        assert_eq!(prims.name(specialized), "add");
        // Name lookup finds the original registration.
        assert_eq!(prims.lookup("add"), Some(prims.add));
    }

    #[test]
    fn relational_inverses_pair_up() {
        let prims = Prims::new();
        assert_eq!(prims.relational_inverse(prims.eq), Some(prims.neq));
        assert_eq!(prims.relational_inverse(prims.lt), Some(prims.gte));
        assert_eq!(prims.relational_inverse(prims.gte), Some(prims.lt));
        assert_eq!(prims.relational_inverse(prims.add), None);
    }
}
