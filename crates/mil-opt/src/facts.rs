//! The facts table used by the peephole rewriter.
//!
//! A fact for temporary `t` is the tail that defined it, recorded only when
//! that tail is repeatable. The table is persistent: the flow pass extends
//! it as it walks down a spine, and facts never leak across a block
//! boundary.

use mil_ir::{Atom, Tail, TempId};

/// Persistent map from a temporary to its defining (repeatable) tail.
pub type Facts = im::HashMap<TempId, Tail>;

/// The tail defining `atom`, when `atom` is a temporary with a recorded
/// fact. Constants and static references have no facts.
pub fn lookup_fact(facts: &Facts, atom: Atom) -> Option<&Tail> {
    facts.get(&atom.temp()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mil_ir::Program;

    #[test]
    fn facts_are_keyed_by_temp_identity() {
        let mut program = Program::new();
        let prims = program.prims.clone();
        let x = program.fresh_temp();
        let y = program.fresh_temp();

        let defining = Tail::Prim(prims.add, vec![Atom::Int(1), Atom::Int(2)]);
        let facts = Facts::new().update(x, defining.clone());

        assert_eq!(lookup_fact(&facts, Atom::Temp(x)), Some(&defining));
        assert_eq!(lookup_fact(&facts, Atom::Temp(y)), None);
        assert_eq!(lookup_fact(&facts, Atom::Int(3)), None);
    }

    #[test]
    fn extending_a_snapshot_does_not_disturb_the_parent() {
        let mut program = Program::new();
        let x = program.fresh_temp();
        let y = program.fresh_temp();

        let parent = Facts::new().update(x, Tail::ret1(Atom::Int(1)));
        let child = parent.update(y, Tail::ret1(Atom::Int(2)));

        assert_eq!(lookup_fact(&parent, Atom::Temp(y)), None);
        assert!(lookup_fact(&child, Atom::Temp(x)).is_some());
        assert!(lookup_fact(&child, Atom::Temp(y)).is_some());
    }
}
