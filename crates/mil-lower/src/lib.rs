//! The representation transform.
//!
//! Bitdata values are packed bit strings; this pass replaces their
//! high-level operations with word-level primitive code:
//!
//! * `DataAlloc(cf, args)` becomes a call to a generated constructor block
//!   that ORs each field into position over the layout's tag bits;
//! * `Sel(cf, n, a)` becomes a call to a generated field block that shifts
//!   and masks the right word;
//! * `Case` dispatch over bitdata constructors becomes a chain of mask
//!   tests, short-circuiting as soon as a word mismatches.
//!
//! The generated support blocks share four primitives of their own:
//! `btrue`/`bfalse` (constant answers) and `bmaskeq`/`bmaskneq` (one-word
//! mask comparisons).

use std::collections::HashMap;

use mil_diag::{Category, Diagnostic, DiagnosticError};
use mil_ir::{
    Atom, Block, BlockCall, BlockId, CfunId, Code, DataId, Program, Reporter, Tail, TempId, Word,
    num_words,
};

/// Handles to every block the transform generated.
#[derive(Debug, Clone)]
pub struct Support {
    pub btrue: BlockId,
    pub bfalse: BlockId,
    pub bmaskeq: BlockId,
    pub bmaskneq: BlockId,
    /// Constructor block per bitdata constructor.
    pub constructors: HashMap<CfunId, BlockId>,
    /// Membership test block per bitdata constructor.
    pub mask_tests: HashMap<CfunId, BlockId>,
    /// Field extraction block per (constructor, field index).
    pub selectors: HashMap<(CfunId, usize), BlockId>,
}

/// Generate the support blocks for every bitdata type in the program.
/// A program with no bitdata types gets none.
pub fn generate_support(program: &mut Program) -> Option<Support> {
    if program.datas.iter().all(|d| d.bitdata.is_none()) {
        return None;
    }
    let btrue = atom_block(program, "btrue", Atom::Flag(true));
    let bfalse = atom_block(program, "bfalse", Atom::Flag(false));
    let bmaskeq = masktest_word_block(program, "bmaskeq", true);
    let bmaskneq = masktest_word_block(program, "bmaskneq", false);

    let mut support = Support {
        btrue,
        bfalse,
        bmaskeq,
        bmaskneq,
        constructors: HashMap::new(),
        mask_tests: HashMap::new(),
        selectors: HashMap::new(),
    };

    for data_index in 0..program.datas.len() {
        let data = DataId(data_index as u32);
        let Some(bitdata) = program.data(data).bitdata.clone() else {
            continue;
        };
        let cfuns = program.data(data).cfuns.clone();
        for (tag, cf) in cfuns.iter().enumerate() {
            let layout = bitdata.layouts[tag].clone();
            let name = program.cfun(*cf).name.clone();

            let ctor = generate_constructor(program, &name, &layout, bitdata.width);
            support.constructors.insert(*cf, ctor);

            let (mask, bits) = layout.mask_test(bitdata.width);
            let test = generate_mask_test(program, &name, &mask, &bits, &support);
            support.mask_tests.insert(*cf, test);

            for (index, field) in layout.fields.iter().enumerate() {
                let sel = generate_selector(program, &name, field, bitdata.width);
                support.selectors.insert((*cf, index), sel);
            }
        }
    }
    Some(support)
}

/// `b[] = return [a]` for a constant atom.
fn atom_block(program: &mut Program, name: &str, atom: Atom) -> BlockId {
    program.add_block(Block::new(name, vec![], Code::Done(Tail::ret1(atom))))
}

/// A single-word mask comparison:
/// `b[v, m, t] = w <- and((v, m)); primEq((w, t))` (or `primNeq`).
fn masktest_word_block(program: &mut Program, name: &str, eq: bool) -> BlockId {
    let prims = program.prims.clone();
    let params = vec![
        program.named_temp("v"),
        program.named_temp("m"),
        program.named_temp("t"),
    ];
    let w = program.fresh_temp();
    let compare = if eq { prims.eq } else { prims.neq };
    let body = Code::bind1(
        w,
        Tail::Prim(prims.and, vec![Atom::Temp(params[0]), Atom::Temp(params[1])]),
        Code::Done(Tail::Prim(compare, vec![Atom::Temp(w), Atom::Temp(params[2])])),
    );
    program.add_block(Block::new(name, params, body))
}

/// The constructor block: one parameter per field, each shifted into place
/// over the tag bits, returning the value's words.
fn generate_constructor(
    program: &mut Program,
    cfun_name: &str,
    layout: &mil_ir::BitdataLayout,
    width: u32,
) -> BlockId {
    let prims = program.prims.clone();
    let words = num_words(width);

    let params: Vec<TempId> = layout
        .fields
        .iter()
        .map(|f| program.named_temp(f.name.clone()))
        .collect();

    // Current atom per word, starting from the layout's tag bits, then a
    // shift and an OR per field.
    let mut current: Vec<Atom> = (0..words).map(|i| Atom::Int(layout.tagbits[i])).collect();
    let mut binds: Vec<(TempId, Tail)> = Vec::new();
    for (field, param) in layout.fields.iter().zip(params.iter()) {
        let shifted = program.fresh_temp();
        binds.push((
            shifted,
            Tail::Prim(
                prims.shl,
                vec![Atom::Temp(*param), Atom::Int(field.word_offset() as Word)],
            ),
        ));
        let merged = program.fresh_temp();
        binds.push((
            merged,
            Tail::Prim(
                prims.or,
                vec![current[field.word_index()], Atom::Temp(shifted)],
            ),
        ));
        current[field.word_index()] = Atom::Temp(merged);
    }

    let mut body = Code::Done(Tail::Return(current));
    for (v, tail) in binds.into_iter().rev() {
        body = Code::bind1(v, tail, body);
    }
    program.add_block(Block::new(format!("construct_{cfun_name}"), params, body))
}

/// The membership test for one layout, one parameter per word of the value.
/// Words are compared low to high; the first mismatch answers `false`
/// without looking at the rest.
fn generate_mask_test(
    program: &mut Program,
    cfun_name: &str,
    mask: &[Word],
    bits: &[Word],
    support: &Support,
) -> BlockId {
    let n = mask.len();
    let mut current = support.btrue;
    for i in 1..=n {
        let vs = program.fresh_temps(i);
        let word_args = vec![
            Atom::Temp(vs[0]),
            Atom::Int(mask[n - i]),
            Atom::Int(bits[n - i]),
        ];
        let code = if i == 1 {
            Code::Done(Tail::Call(BlockCall::new(support.bmaskeq, word_args)))
        } else {
            let t = program.fresh_temp();
            Code::bind1(
                t,
                Tail::Call(BlockCall::new(support.bmaskeq, word_args)),
                Code::If {
                    cond: t,
                    then_call: BlockCall::new(
                        current,
                        vs[1..].iter().map(|v| Atom::Temp(*v)).collect(),
                    ),
                    else_call: BlockCall::new(support.bfalse, vec![]),
                },
            )
        };
        let name = if i == n {
            format!("masktest_{cfun_name}")
        } else {
            format!("masktest_{cfun_name}_{i}")
        };
        current = program.add_block(Block::new(name, vs, code));
    }
    current
}

/// Field extraction: shift the field's word down and mask the value.
fn generate_selector(
    program: &mut Program,
    cfun_name: &str,
    field: &mil_ir::BitdataField,
    width: u32,
) -> BlockId {
    let prims = program.prims.clone();
    let words = num_words(width);
    let params = program.fresh_temps(words);
    let shifted = program.fresh_temp();
    let masked = program.fresh_temp();
    let body = Code::bind1(
        shifted,
        Tail::Prim(
            prims.lshr,
            vec![
                Atom::Temp(params[field.word_index()]),
                Atom::Int(field.word_offset() as Word),
            ],
        ),
        Code::bind1(
            masked,
            Tail::Prim(
                prims.and,
                vec![Atom::Temp(shifted), Atom::Int(field.value_mask())],
            ),
            Code::Done(Tail::ret1(Atom::Temp(masked))),
        ),
    );
    program.add_block(Block::new(
        format!("field_{cfun_name}_{}", field.name),
        params,
        body,
    ))
}

// ---------------------------------------------------------------------------
// Program rewriting
// ---------------------------------------------------------------------------

struct Lowerer<'a> {
    support: &'a Support,
    /// Word count per bitdata constructor.
    widths: HashMap<CfunId, usize>,
    diags: Vec<Diagnostic>,
}

impl Lowerer<'_> {
    fn check_single_word(&mut self, cf: CfunId, what: &str, name: &str) -> bool {
        match self.widths.get(&cf).copied() {
            Some(1) => true,
            Some(_) => {
                self.diags.push(Diagnostic::error(
                    Category::BadLayout,
                    format!("{what} of multi-word bitdata constructor `{name}` is not supported"),
                ));
                false
            }
            None => false,
        }
    }

    fn lower_tail(&mut self, tail: &mut Tail, names: &HashMap<CfunId, String>, reporter: &mut Reporter) {
        match tail {
            Tail::Data(cf, args) => {
                if let Some(ctor) = self.support.constructors.get(cf).copied() {
                    let name = names[cf].clone();
                    if self.check_single_word(*cf, "allocation", &name) {
                        reporter.report(format!("replaced `{name}` allocation with constructor block"));
                        *tail = Tail::Call(BlockCall::new(ctor, std::mem::take(args)));
                    }
                }
            }
            Tail::Sel(cf, index, a) => {
                if let Some(sel) = self.support.selectors.get(&(*cf, *index)).copied() {
                    let name = names[cf].clone();
                    if self.check_single_word(*cf, "selection", &name) {
                        reporter.report(format!("replaced `{name}` selector with field block"));
                        *tail = Tail::Call(BlockCall::new(sel, vec![*a]));
                    }
                }
            }
            _ => {}
        }
    }
}

/// Replace bitdata allocations, selectors, and case dispatches throughout
/// the program with calls to the generated support blocks. Returns the
/// support handles for callers that want to inspect or test them; a
/// program without bitdata types is left untouched.
pub fn rep_transform(
    program: &mut Program,
    reporter: &mut Reporter,
) -> Result<Option<Support>, DiagnosticError> {
    let Some(support) = generate_support(program) else {
        return Ok(None);
    };

    let mut widths = HashMap::new();
    let mut names = HashMap::new();
    for data in &program.datas {
        if let Some(bitdata) = &data.bitdata {
            for cf in &data.cfuns {
                widths.insert(*cf, num_words(bitdata.width));
                names.insert(*cf, program.cfun(*cf).name.clone());
            }
        }
    }

    let mut lowerer = Lowerer {
        support: &support,
        widths,
        diags: Vec::new(),
    };

    for i in 0..program.tops.len() {
        let mut tail = program.tops[i].tail.clone();
        lowerer.lower_tail(&mut tail, &names, reporter);
        program.tops[i].tail = tail;
    }
    for i in 0..program.closures.len() {
        let mut tail = program.closures[i].body.clone();
        lowerer.lower_tail(&mut tail, &names, reporter);
        program.closures[i].body = tail;
    }

    // Blocks get their tails lowered in place; bitdata case dispatches
    // spawn continuation blocks, so collect those rewrites first.
    let block_count = program.blocks.len();
    for i in 0..block_count {
        let mut body = std::mem::replace(
            &mut program.blocks[i].body,
            Code::Done(Tail::Return(Vec::new())),
        );
        lower_code(&mut lowerer, program, &mut body, &names, reporter);
        program.blocks[i].body = body;
    }

    if lowerer.diags.is_empty() {
        Ok(Some(support))
    } else {
        Err(DiagnosticError::multiple(lowerer.diags))
    }
}

fn lower_code(
    lowerer: &mut Lowerer,
    program: &mut Program,
    code: &mut Code,
    names: &HashMap<CfunId, String>,
    reporter: &mut Reporter,
) {
    match code {
        Code::Bind { tail, rest, .. } => {
            lowerer.lower_tail(tail, names, reporter);
            lower_code(lowerer, program, rest, names, reporter);
        }
        Code::Done(tail) => lowerer.lower_tail(tail, names, reporter),
        Code::If { .. } => {}
        Code::Case {
            scrut,
            alts,
            default,
        } => {
            let is_bitdata = alts
                .first()
                .is_some_and(|alt| lowerer.support.mask_tests.contains_key(&alt.cfun));
            if !is_bitdata {
                return;
            }
            for alt in alts.iter() {
                if !lowerer.check_single_word(alt.cfun, "case dispatch", &names[&alt.cfun]) {
                    return;
                }
            }
            reporter.report("replaced bitdata case with mask-test chain");
            let lowered = lower_case(lowerer.support, program, *scrut, alts, default.as_ref());
            *code = lowered;
        }
    }
}

/// Rewrite a bitdata `Case` into a chain of mask tests. The first test is
/// inline; each further alternative gets a continuation block taking the
/// temporaries its remaining targets mention.
fn lower_case(
    support: &Support,
    program: &mut Program,
    scrut: TempId,
    alts: &[mil_ir::CaseAlt],
    default: Option<&BlockCall>,
) -> Code {
    // Without a default the last alternative is taken unconditionally once
    // every other test has failed.
    let (tests, mut else_call) = match default {
        Some(call) => (alts, call.clone()),
        None => match alts.split_last() {
            Some((last, rest)) => (rest, last.target.clone()),
            None => unreachable!("bitdata case dispatch with no alternatives"),
        },
    };

    let Some((first, chained)) = tests.split_first() else {
        return Code::Done(Tail::Call(else_call));
    };

    // Build continuation blocks from the last test inward.
    for alt in chained.iter().rev() {
        let mut free: Vec<TempId> = vec![scrut];
        for atom in alt.target.args.iter().chain(else_call.args.iter()) {
            if let Atom::Temp(t) = atom
                && !free.contains(t)
            {
                free.push(*t);
            }
        }

        let params = program.fresh_temps(free.len());
        let map: HashMap<TempId, Atom> = free
            .iter()
            .copied()
            .zip(params.iter().map(|p| Atom::Temp(*p)))
            .collect();

        let remap = |call: &BlockCall| {
            let mut call = call.clone();
            for atom in call.args.iter_mut() {
                if let Atom::Temp(t) = atom
                    && let Some(replacement) = map.get(t)
                {
                    *atom = *replacement;
                }
            }
            call
        };

        let t = program.fresh_temp();
        let body = Code::bind1(
            t,
            Tail::Call(BlockCall::new(
                support.mask_tests[&alt.cfun],
                vec![map[&scrut]],
            )),
            Code::If {
                cond: t,
                then_call: remap(&alt.target),
                else_call: remap(&else_call),
            },
        );
        let name = format!("dispatch_{}", program.block(alt.target.block).name);
        let block = program.add_block(Block::new(name, params, body));
        else_call = BlockCall::new(block, free.into_iter().map(Atom::Temp).collect());
    }

    let t = program.fresh_temp();
    Code::bind1(
        t,
        Tail::Call(BlockCall::new(
            support.mask_tests[&first.cfun],
            vec![Atom::Temp(scrut)],
        )),
        Code::If {
            cond: t,
            then_call: first.target.clone(),
            else_call,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use mil_eval::{Machine, Value};
    use mil_ir::{BitdataDefn, BitdataField, BitdataLayout, CaseAlt, Cfun, DataDefn, verify::verify};

    /// An 8-bit bitdata type with one constructor: tag `10` in the top two
    /// bits, a 6-bit payload in the low bits.
    fn keycode_program() -> (Program, CfunId) {
        let mut program = Program::new();
        let data = program.add_data(DataDefn {
            name: "KeyCode".to_string(),
            cfuns: vec![],
            bitdata: Some(BitdataDefn {
                width: 8,
                layouts: vec![BitdataLayout {
                    tagbits: vec![0b1000_0000u32 as Word],
                    fields: vec![BitdataField {
                        name: "payload".to_string(),
                        offset: 0,
                        width: 6,
                    }],
                }],
            }),
        });
        let mk = program.add_cfun(Cfun {
            name: "Mk".to_string(),
            data,
            tag: 0,
            arity: 1,
        });
        program.datas[data.0 as usize].cfuns.push(mk);
        (program, mk)
    }

    #[test]
    fn constructor_block_packs_tag_and_payload() {
        let (mut program, mk) = keycode_program();
        let support = generate_support(&mut program).expect("support blocks");
        verify(&program).expect("generated blocks must verify");

        let ctor = support.constructors[&mk];
        let mut machine = Machine::new(&program);
        let values = machine.run(ctor, vec![Value::Word(0x2A)]).expect("construct");
        assert_eq!(values, vec![Value::Word(0xAA)]);
    }

    #[test]
    fn mask_test_accepts_members_and_rejects_others() {
        let (mut program, mk) = keycode_program();
        let support = generate_support(&mut program).expect("support blocks");

        let test = support.mask_tests[&mk];
        let mut machine = Machine::new(&program);
        assert_eq!(
            machine.run(test, vec![Value::Word(0xAA)]).expect("member"),
            vec![Value::Flag(true)]
        );
        let mut machine = Machine::new(&program);
        assert_eq!(
            machine.run(test, vec![Value::Word(0x6A)]).expect("non-member"),
            vec![Value::Flag(false)]
        );
    }

    #[test]
    fn selector_block_extracts_the_payload() {
        let (mut program, mk) = keycode_program();
        let support = generate_support(&mut program).expect("support blocks");

        let sel = support.selectors[&(mk, 0)];
        let mut machine = Machine::new(&program);
        assert_eq!(
            machine.run(sel, vec![Value::Word(0xAA)]).expect("select"),
            vec![Value::Word(0x2A)]
        );
    }

    #[test]
    fn multi_word_mask_test_chains_short_circuit() {
        let mut program = Program::new();
        let data = program.add_data(DataDefn {
            name: "Wide".to_string(),
            cfuns: vec![],
            bitdata: Some(BitdataDefn {
                width: 34,
                layouts: vec![BitdataLayout {
                    tagbits: vec![0, 0b10],
                    fields: vec![BitdataField {
                        name: "lo".to_string(),
                        offset: 0,
                        width: 32,
                    }],
                }],
            }),
        });
        let wide = program.add_cfun(Cfun {
            name: "Wide".to_string(),
            data,
            tag: 0,
            arity: 1,
        });
        program.datas[data.0 as usize].cfuns.push(wide);

        let support = generate_support(&mut program).expect("support blocks");
        verify(&program).expect("generated blocks must verify");
        let test = support.mask_tests[&wide];

        // Low word is all payload, high word must equal the tag bits.
        let mut machine = Machine::new(&program);
        assert_eq!(
            machine
                .run(test, vec![Value::Word(0x1234), Value::Word(0b10)])
                .expect("member"),
            vec![Value::Flag(true)]
        );
        let mut machine = Machine::new(&program);
        assert_eq!(
            machine
                .run(test, vec![Value::Word(0x1234), Value::Word(0b01)])
                .expect("non-member"),
            vec![Value::Flag(false)]
        );
    }

    #[test]
    fn rep_transform_preserves_the_observable_trace() {
        let (mut program, mk) = keycode_program();
        let prims = program.prims.clone();

        // done[] = return []
        // entry[] = v <- Mk(42); p <- sel Mk 0 v; printWord((p));
        //           case v of Mk -> done[]
        let done = program.add_block(Block::new(
            "done",
            vec![],
            Code::Done(Tail::Return(vec![])),
        ));
        let v = program.fresh_temp();
        let p = program.fresh_temp();
        let entry = program.add_block(Block::new(
            "entry",
            vec![],
            Code::bind1(
                v,
                Tail::Data(mk, vec![Atom::Int(42)]),
                Code::bind1(
                    p,
                    Tail::Sel(mk, 0, Atom::Temp(v)),
                    Code::bind(
                        vec![],
                        Tail::Prim(prims.print_word, vec![Atom::Temp(p)]),
                        Code::Case {
                            scrut: v,
                            alts: vec![CaseAlt {
                                cfun: mk,
                                target: BlockCall::new(done, vec![]),
                            }],
                            default: None,
                        },
                    ),
                ),
            ),
        ));
        program.entries.push(entry);

        let mut machine = Machine::new(&program);
        machine.run_entry(vec![]).expect("high-level run");
        let before = machine.trace.clone();

        let mut reporter = Reporter::new();
        let _ = rep_transform(&mut program, &mut reporter).expect("lowering");
        verify(&program).expect("lowered program must verify");

        // No bitdata operations survive in the entry spine.
        let mut residual = Vec::new();
        program.block(entry).body.successors(&mut residual);
        let body = format!("{:?}", program.block(entry).body);
        assert!(!body.contains("Data("), "allocation survived: {body}");
        assert!(!body.contains("Sel("), "selector survived: {body}");

        let mut machine = Machine::new(&program);
        machine.run_entry(vec![]).expect("lowered run");
        assert_eq!(machine.trace, before);
        assert!(reporter.count() >= 3);
    }

    #[test]
    fn two_constructor_case_tests_in_order() {
        // bitdata Sign width 2: Plus tag 01, Minus tag 10.
        let mut program = Program::new();
        let prims = program.prims.clone();
        let data = program.add_data(DataDefn {
            name: "Sign".to_string(),
            cfuns: vec![],
            bitdata: Some(BitdataDefn {
                width: 2,
                layouts: vec![
                    BitdataLayout {
                        tagbits: vec![0b01],
                        fields: vec![],
                    },
                    BitdataLayout {
                        tagbits: vec![0b10],
                        fields: vec![],
                    },
                ],
            }),
        });
        let plus = program.add_cfun(Cfun {
            name: "Plus".to_string(),
            data,
            tag: 0,
            arity: 0,
        });
        let minus = program.add_cfun(Cfun {
            name: "Minus".to_string(),
            data,
            tag: 1,
            arity: 0,
        });
        program.datas[data.0 as usize].cfuns.extend([plus, minus]);

        // report[n] = printWord((n)); return []
        let n = program.named_temp("n");
        let report = program.add_block(Block::new(
            "report",
            vec![n],
            Code::bind(
                vec![],
                Tail::Prim(prims.print_word, vec![Atom::Temp(n)]),
                Code::Done(Tail::Return(vec![])),
            ),
        ));

        // classify[s] = case s of Plus -> report[1] | Minus -> report[2]
        let s = program.named_temp("s");
        let classify = program.add_block(Block::new(
            "classify",
            vec![s],
            Code::Case {
                scrut: s,
                alts: vec![
                    CaseAlt {
                        cfun: plus,
                        target: BlockCall::new(report, vec![Atom::Int(1)]),
                    },
                    CaseAlt {
                        cfun: minus,
                        target: BlockCall::new(report, vec![Atom::Int(2)]),
                    },
                ],
                default: None,
            },
        ));
        program.entries.push(classify);

        let mut reporter = Reporter::new();
        let _ = rep_transform(&mut program, &mut reporter).expect("lowering");
        verify(&program).expect("lowered program must verify");

        let mut machine = Machine::new(&program);
        machine.run(classify, vec![Value::Word(0b01)]).expect("plus");
        assert_eq!(machine.trace, vec!["printWord: 1"]);

        let mut machine = Machine::new(&program);
        machine.run(classify, vec![Value::Word(0b10)]).expect("minus");
        assert_eq!(machine.trace, vec!["printWord: 2"]);
    }
}
