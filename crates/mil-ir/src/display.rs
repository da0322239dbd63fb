//! Textual dumps of MIL programs.
//!
//! The dumper writes the same dialect the parser reads, so `milc opt`
//! output can be fed back through the driver.

use std::fmt::Write as _;

use crate::{Atom, BlockCall, Code, Program, Tail};

impl Program {
    pub fn atom_name(&self, atom: Atom) -> String {
        match atom {
            Atom::Temp(t) => self.temp_name(t),
            Atom::Int(n) => n.to_string(),
            Atom::Flag(b) => b.to_string(),
            Atom::Top(t, i) => self.top(t).lhs[i].name.clone(),
        }
    }

    fn args_list(&self, args: &[Atom]) -> String {
        args.iter()
            .map(|a| self.atom_name(*a))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn call_text(&self, call: &BlockCall) -> String {
        format!("{}[{}]", self.block(call.block).name, self.args_list(&call.args))
    }

    pub fn tail_text(&self, tail: &Tail) -> String {
        match tail {
            Tail::Return(args) => format!("return [{}]", self.args_list(args)),
            Tail::Prim(p, args) => format!("{}(({}))", self.prims.name(*p), self.args_list(args)),
            Tail::Call(call) => self.call_text(call),
            Tail::Data(cf, args) => {
                format!("{}({})", self.cfun(*cf).name, self.args_list(args))
            }
            Tail::Clos(k, args) => {
                format!("{}{{{}}}", self.closure(*k).name, self.args_list(args))
            }
            Tail::Enter(f, args) => {
                format!("{} @ [{}]", self.atom_name(*f), self.args_list(args))
            }
            Tail::Sel(cf, n, a) => {
                format!("sel {} {} {}", self.cfun(*cf).name, n, self.atom_name(*a))
            }
        }
    }

    fn write_code(&self, out: &mut String, code: &Code, indent: &str) {
        match code {
            Code::Bind { vs, tail, rest } => {
                let lhs = if vs.len() == 1 {
                    self.temp_name(vs[0])
                } else {
                    let names: Vec<String> = vs.iter().map(|v| self.temp_name(*v)).collect();
                    format!("[{}]", names.join(", "))
                };
                let _ = writeln!(out, "{indent}{lhs} <- {}", self.tail_text(tail));
                self.write_code(out, rest, indent);
            }
            Code::Done(tail) => {
                let _ = writeln!(out, "{indent}{}", self.tail_text(tail));
            }
            Code::If {
                cond,
                then_call,
                else_call,
            } => {
                let _ = writeln!(
                    out,
                    "{indent}if {} then {} else {}",
                    self.temp_name(*cond),
                    self.call_text(then_call),
                    self.call_text(else_call)
                );
            }
            Code::Case {
                scrut,
                alts,
                default,
            } => {
                let _ = writeln!(out, "{indent}case {} of", self.temp_name(*scrut));
                for alt in alts {
                    let _ = writeln!(
                        out,
                        "{indent}  {} -> {}",
                        self.cfun(alt.cfun).name,
                        self.call_text(&alt.target)
                    );
                }
                if let Some(call) = default {
                    let _ = writeln!(out, "{indent}  _ -> {}", self.call_text(call));
                }
            }
        }
    }

    /// Render the whole program in the textual MIL dialect.
    pub fn dump(&self) -> String {
        let mut out = String::new();

        for data in &self.datas {
            match &data.bitdata {
                None => {
                    let cfuns: Vec<String> = data
                        .cfuns
                        .iter()
                        .map(|cf| {
                            let cfun = self.cfun(*cf);
                            format!("{}/{}", cfun.name, cfun.arity)
                        })
                        .collect();
                    let _ = writeln!(out, "data {} = {}", data.name, cfuns.join(" | "));
                }
                Some(bitdata) => {
                    let _ = writeln!(out, "bitdata {} width {}", data.name, bitdata.width);
                    for (i, cf) in data.cfuns.iter().enumerate() {
                        let layout = &bitdata.layouts[i];
                        let tag: Vec<String> =
                            layout.tagbits.iter().map(|w| w.to_string()).collect();
                        let fields: Vec<String> = layout
                            .fields
                            .iter()
                            .map(|f| format!("{} {} {}", f.name, f.offset, f.width))
                            .collect();
                        let lead = if i == 0 { "=" } else { "|" };
                        let _ = writeln!(
                            out,
                            "  {lead} {} tag [{}] fields [{}]",
                            self.cfun(*cf).name,
                            tag.join(", "),
                            fields.join(", ")
                        );
                    }
                }
            }
        }
        if !self.datas.is_empty() {
            out.push('\n');
        }

        for entry in &self.entries {
            let _ = writeln!(out, "entry {}", self.block(*entry).name);
        }
        if !self.entries.is_empty() {
            out.push('\n');
        }

        for top in &self.tops {
            let lhs = if top.lhs.len() == 1 {
                top.lhs[0].name.clone()
            } else {
                let names: Vec<&str> = top.lhs.iter().map(|l| l.name.as_str()).collect();
                format!("[{}]", names.join(", "))
            };
            let _ = writeln!(out, "{lhs} <- {}", self.tail_text(&top.tail));
        }
        if !self.tops.is_empty() {
            out.push('\n');
        }

        for defn in &self.closures {
            let stored: Vec<String> = defn.stored.iter().map(|t| self.temp_name(*t)).collect();
            let params: Vec<String> = defn.params.iter().map(|t| self.temp_name(*t)).collect();
            let _ = writeln!(
                out,
                "{}{{{}}} [{}] = {}",
                defn.name,
                stored.join(", "),
                params.join(", "),
                self.tail_text(&defn.body)
            );
        }
        if !self.closures.is_empty() {
            out.push('\n');
        }

        for block in &self.blocks {
            let params: Vec<String> = block.params.iter().map(|t| self.temp_name(*t)).collect();
            let _ = writeln!(out, "{}[{}] =", block.name, params.join(", "));
            self.write_code(&mut out, &block.body, "  ");
            out.push('\n');
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Block, TopLevel};

    #[test]
    fn dump_renders_binds_and_tails() {
        let mut program = Program::new();
        let prims = program.prims.clone();
        let x = program.named_temp("x");
        let t = program.named_temp("t");
        let block = program.add_block(Block::new(
            "b0",
            vec![x],
            Code::bind1(
                t,
                Tail::Prim(prims.add, vec![Atom::Temp(x), Atom::Int(4)]),
                Code::Done(Tail::ret1(Atom::Temp(t))),
            ),
        ));
        program.entries.push(block);

        let text = program.dump();
        assert!(text.contains("entry b0"));
        assert!(text.contains("b0[x] ="));
        assert!(text.contains("  t <- add((x, 4))"));
        assert!(text.contains("  return [t]"));
    }

    #[test]
    fn dump_renders_top_levels_by_name() {
        let mut program = Program::new();
        let top = program.add_top(TopLevel::single("answer", Tail::ret1(Atom::Int(42))));
        program.add_top(TopLevel::single(
            "alias",
            Tail::ret1(Atom::Top(top, 0)),
        ));

        let text = program.dump();
        assert!(text.contains("answer <- return [42]"));
        assert!(text.contains("alias <- return [answer]"));
    }
}
