//! Recursive-descent parser for the textual MIL dialect, plus the scope
//! resolution that turns the parse tree into a `mil_ir::Program`.
//!
//! The grammar is line oriented. An item is one of:
//!
//! ```text
//! entry main
//! data List = Nil/0 | Cons/2
//! bitdata KeyCode width 8
//!   = Mk tag [128] fields [payload 0 6]
//! answer <- return [42]
//! adder{s} [a] = add((s, a))
//! main[] =
//!   t <- add((3, 4))
//!   return [t]
//! ```
//!
//! Block bodies are bind lines (`v <- tail`, `[a, b] <- tail`) ending in a
//! tail, an `if v then b1[..] else b2[..]`, or a `case v of` with one
//! alternative per line.

use std::collections::HashMap;

use mil_diag::{Category, Diagnostic, DiagnosticError, SourceLocation};
use mil_ir::{
    Atom, BitdataDefn, BitdataField, BitdataLayout, Block, BlockCall, BlockId, Cfun, ClosId,
    ClosureDefn, Code, DataDefn, Program, Tail, TempId, TopId, TopLevel, TopLhs, WORD_SIZE, Word,
    num_words,
};

use crate::lexer::lex;
use crate::token::{Token, TokenKind};

// ---------------------------------------------------------------------------
// Parse tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Span {
    start: u32,
    end: u32,
}

impl Span {
    fn loc(self) -> SourceLocation {
        SourceLocation {
            file_id: 0,
            start: self.start,
            end: self.end,
        }
    }
}

#[derive(Debug, Clone)]
enum AtomExp {
    Name(String, Span),
    Int(Word),
    Flag(bool),
}

#[derive(Debug, Clone)]
struct CallExp {
    name: String,
    span: Span,
    args: Vec<AtomExp>,
}

#[derive(Debug, Clone)]
enum TailExp {
    Return(Vec<AtomExp>),
    Prim(String, Span, Vec<AtomExp>),
    Call(CallExp),
    Alloc(String, Span, Vec<AtomExp>),
    Clos(String, Span, Vec<AtomExp>),
    Enter(AtomExp, Vec<AtomExp>),
    Sel(String, Span, usize, AtomExp),
}

#[derive(Debug, Clone)]
enum CodeExp {
    Bind(Vec<(String, Span)>, TailExp, Box<CodeExp>),
    Done(TailExp),
    If(String, Span, CallExp, CallExp),
    Case {
        scrut: String,
        span: Span,
        alts: Vec<(String, Span, CallExp)>,
        default: Option<CallExp>,
    },
}

#[derive(Debug, Clone)]
struct BitdataConExp {
    name: String,
    span: Span,
    tag: Vec<Word>,
    fields: Vec<(String, u32, u32, Span)>,
}

#[derive(Debug, Clone)]
enum Item {
    Entry(String, Span),
    Data {
        name: String,
        span: Span,
        cfuns: Vec<(String, usize, Span)>,
    },
    Bitdata {
        name: String,
        span: Span,
        width: u32,
        cons: Vec<BitdataConExp>,
    },
    Top {
        lhs: Vec<(String, Span)>,
        tail: TailExp,
    },
    Closure {
        name: String,
        span: Span,
        stored: Vec<(String, Span)>,
        params: Vec<(String, Span)>,
        body: TailExp,
    },
    Block {
        name: String,
        span: Span,
        params: Vec<(String, Span)>,
        body: CodeExp,
    },
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

type Parse<T> = Result<T, Diagnostic>;

impl Parser {
    fn peek(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    fn peek2(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos + 1).map(|t| &t.kind)
    }

    fn span(&self) -> Span {
        match self.tokens.get(self.pos).or_else(|| self.tokens.last()) {
            Some(t) => Span {
                start: t.start,
                end: t.end,
            },
            None => Span { start: 0, end: 0 },
        }
    }

    fn bump(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn error(&self, expected: &str) -> Diagnostic {
        let found = self
            .peek()
            .map(|k| k.describe())
            .unwrap_or_else(|| "end of input".to_string());
        Diagnostic::error(Category::Syntax, format!("expected {expected}, found {found}"))
            .at(self.span().loc())
    }

    fn expect(&mut self, kind: TokenKind, expected: &str) -> Parse<Span> {
        if self.peek() == Some(&kind) {
            let span = self.span();
            self.bump();
            Ok(span)
        } else {
            Err(self.error(expected))
        }
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek() == Some(&kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn skip_newlines(&mut self) {
        while self.eat(TokenKind::Newline) {}
    }

    fn end_of_line(&mut self) -> Parse<()> {
        match self.peek() {
            Some(TokenKind::Newline) => {
                self.bump();
                Ok(())
            }
            None => Ok(()),
            _ => Err(self.error("end of line")),
        }
    }

    fn ident(&mut self, expected: &str) -> Parse<(String, Span)> {
        let span = self.span();
        match self.peek() {
            Some(TokenKind::Ident(_)) => {
                let Some(Token {
                    kind: TokenKind::Ident(name),
                    ..
                }) = self.bump()
                else {
                    unreachable!()
                };
                Ok((name, span))
            }
            _ => Err(self.error(expected)),
        }
    }

    fn int(&mut self, expected: &str) -> Parse<Word> {
        match self.peek() {
            Some(TokenKind::Int(_)) => {
                let Some(Token {
                    kind: TokenKind::Int(n),
                    ..
                }) = self.bump()
                else {
                    unreachable!()
                };
                Ok(n)
            }
            _ => Err(self.error(expected)),
        }
    }

    fn atom(&mut self) -> Parse<AtomExp> {
        let span = self.span();
        match self.peek() {
            Some(TokenKind::Int(_)) => Ok(AtomExp::Int(self.int("integer")?)),
            Some(TokenKind::True) => {
                self.bump();
                Ok(AtomExp::Flag(true))
            }
            Some(TokenKind::False) => {
                self.bump();
                Ok(AtomExp::Flag(false))
            }
            Some(TokenKind::Ident(_)) => {
                let (name, _) = self.ident("atom")?;
                Ok(AtomExp::Name(name, span))
            }
            _ => Err(self.error("an atom")),
        }
    }

    /// Comma-separated atoms up to (but not consuming) `close`.
    fn atoms_until(&mut self, close: &TokenKind) -> Parse<Vec<AtomExp>> {
        let mut atoms = Vec::new();
        if self.peek() == Some(close) {
            return Ok(atoms);
        }
        loop {
            atoms.push(self.atom()?);
            if !self.eat(TokenKind::Comma) {
                return Ok(atoms);
            }
        }
    }

    fn bracketed_atoms(&mut self) -> Parse<Vec<AtomExp>> {
        self.expect(TokenKind::LBracket, "`[`")?;
        let atoms = self.atoms_until(&TokenKind::RBracket)?;
        self.expect(TokenKind::RBracket, "`]`")?;
        Ok(atoms)
    }

    /// `name[atoms]`.
    fn call(&mut self) -> Parse<CallExp> {
        let (name, span) = self.ident("a block name")?;
        let args = self.bracketed_atoms()?;
        Ok(CallExp { name, span, args })
    }

    fn tail(&mut self) -> Parse<TailExp> {
        match self.peek() {
            Some(TokenKind::Return) => {
                self.bump();
                Ok(TailExp::Return(self.bracketed_atoms()?))
            }
            Some(TokenKind::Sel) => {
                self.bump();
                let (cfun, span) = self.ident("a constructor name")?;
                let index = self.int("a field index")?;
                if index < 0 {
                    return Err(Diagnostic::error(
                        Category::Syntax,
                        "selector index must not be negative",
                    )
                    .at(span.loc()));
                }
                let atom = self.atom()?;
                Ok(TailExp::Sel(cfun, span, index as usize, atom))
            }
            Some(TokenKind::Ident(_)) => {
                let (name, span) = self.ident("a tail")?;
                match self.peek() {
                    Some(TokenKind::LParen) if self.peek2() == Some(&TokenKind::LParen) => {
                        self.bump();
                        self.bump();
                        let args = self.atoms_until(&TokenKind::RParen)?;
                        self.expect(TokenKind::RParen, "`)`")?;
                        self.expect(TokenKind::RParen, "`)`")?;
                        Ok(TailExp::Prim(name, span, args))
                    }
                    Some(TokenKind::LParen) => {
                        self.bump();
                        let args = self.atoms_until(&TokenKind::RParen)?;
                        self.expect(TokenKind::RParen, "`)`")?;
                        Ok(TailExp::Alloc(name, span, args))
                    }
                    Some(TokenKind::LBracket) => {
                        let args = self.bracketed_atoms()?;
                        Ok(TailExp::Call(CallExp { name, span, args }))
                    }
                    Some(TokenKind::LBrace) => {
                        self.bump();
                        let args = self.atoms_until(&TokenKind::RBrace)?;
                        self.expect(TokenKind::RBrace, "`}`")?;
                        Ok(TailExp::Clos(name, span, args))
                    }
                    Some(TokenKind::At) => {
                        self.bump();
                        let args = self.bracketed_atoms()?;
                        Ok(TailExp::Enter(AtomExp::Name(name, span), args))
                    }
                    _ => Err(self.error("`((`, `(`, `[`, `{`, or `@` after the name")),
                }
            }
            _ => Err(self.error("a tail expression")),
        }
    }

    /// `name` or `[name, name, ...]` on the left of `<-`.
    fn bind_lhs(&mut self) -> Parse<Vec<(String, Span)>> {
        if self.eat(TokenKind::LBracket) {
            let mut names = Vec::new();
            if !self.eat(TokenKind::RBracket) {
                loop {
                    names.push(self.ident("a temporary name")?);
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RBracket, "`]`")?;
            }
            Ok(names)
        } else {
            Ok(vec![self.ident("a temporary name")?])
        }
    }

    fn code(&mut self) -> Parse<CodeExp> {
        self.skip_newlines();
        match self.peek() {
            // A bind line: `v <- ...` or `[a, b] <- ...`.
            Some(TokenKind::Ident(_)) if self.peek2() == Some(&TokenKind::BindArrow) => {
                let lhs = self.bind_lhs()?;
                self.expect(TokenKind::BindArrow, "`<-`")?;
                let tail = self.tail()?;
                self.end_of_line()?;
                Ok(CodeExp::Bind(lhs, tail, Box::new(self.code()?)))
            }
            Some(TokenKind::LBracket) => {
                let lhs = self.bind_lhs()?;
                self.expect(TokenKind::BindArrow, "`<-`")?;
                let tail = self.tail()?;
                self.end_of_line()?;
                Ok(CodeExp::Bind(lhs, tail, Box::new(self.code()?)))
            }
            Some(TokenKind::If) => {
                self.bump();
                let (cond, span) = self.ident("a temporary name")?;
                self.expect(TokenKind::Then, "`then`")?;
                let then_call = self.call()?;
                self.expect(TokenKind::Else, "`else`")?;
                let else_call = self.call()?;
                self.end_of_line()?;
                Ok(CodeExp::If(cond, span, then_call, else_call))
            }
            Some(TokenKind::Case) => {
                self.bump();
                let (scrut, span) = self.ident("a temporary name")?;
                self.expect(TokenKind::Of, "`of`")?;
                self.end_of_line()?;
                let mut alts = Vec::new();
                let mut default = None;
                loop {
                    self.skip_newlines();
                    match self.peek() {
                        Some(TokenKind::Underscore) => {
                            self.bump();
                            self.expect(TokenKind::Arrow, "`->`")?;
                            default = Some(self.call()?);
                            self.end_of_line()?;
                            break;
                        }
                        Some(TokenKind::Ident(_)) if self.peek2() == Some(&TokenKind::Arrow) => {
                            let (cfun, cfun_span) = self.ident("a constructor name")?;
                            self.expect(TokenKind::Arrow, "`->`")?;
                            let target = self.call()?;
                            self.end_of_line()?;
                            alts.push((cfun, cfun_span, target));
                        }
                        _ => break,
                    }
                }
                if alts.is_empty() && default.is_none() {
                    return Err(self.error("at least one case alternative"));
                }
                Ok(CodeExp::Case {
                    scrut,
                    span,
                    alts,
                    default,
                })
            }
            _ => {
                let tail = self.tail()?;
                self.end_of_line()?;
                Ok(CodeExp::Done(tail))
            }
        }
    }

    fn data_item(&mut self) -> Parse<Item> {
        self.expect(TokenKind::Data, "`data`")?;
        let (name, span) = self.ident("a data type name")?;
        self.expect(TokenKind::Equals, "`=`")?;
        let mut cfuns = Vec::new();
        loop {
            let (cfun, cfun_span) = self.ident("a constructor name")?;
            self.expect(TokenKind::Slash, "`/`")?;
            let arity = self.int("a constructor arity")?;
            if arity < 0 {
                return Err(Diagnostic::error(
                    Category::Syntax,
                    "constructor arity must not be negative",
                )
                .at(cfun_span.loc()));
            }
            cfuns.push((cfun, arity as usize, cfun_span));
            if !self.eat(TokenKind::Pipe) {
                break;
            }
        }
        self.end_of_line()?;
        Ok(Item::Data { name, span, cfuns })
    }

    fn bitdata_item(&mut self) -> Parse<Item> {
        self.expect(TokenKind::Bitdata, "`bitdata`")?;
        let (name, span) = self.ident("a bitdata type name")?;
        self.expect(TokenKind::Width, "`width`")?;
        let width = self.int("a bit width")?;
        if width <= 0 {
            return Err(Diagnostic::error(Category::Syntax, "bit width must be positive")
                .at(span.loc()));
        }
        self.end_of_line()?;

        let mut cons = Vec::new();
        loop {
            self.skip_newlines();
            if !(self.eat(TokenKind::Equals) || self.eat(TokenKind::Pipe)) {
                break;
            }
            let (con_name, con_span) = self.ident("a constructor name")?;
            self.expect(TokenKind::Tag, "`tag`")?;
            let tag = if self.eat(TokenKind::LBracket) {
                let mut words = Vec::new();
                if !self.eat(TokenKind::RBracket) {
                    loop {
                        words.push(self.int("a tag word")?);
                        if !self.eat(TokenKind::Comma) {
                            break;
                        }
                    }
                    self.expect(TokenKind::RBracket, "`]`")?;
                }
                words
            } else {
                vec![self.int("a tag value")?]
            };
            self.expect(TokenKind::Fields, "`fields`")?;
            self.expect(TokenKind::LBracket, "`[`")?;
            let mut fields = Vec::new();
            if !self.eat(TokenKind::RBracket) {
                loop {
                    let (field_name, field_span) = self.ident("a field name")?;
                    let offset = self.int("a field offset")?;
                    let field_width = self.int("a field width")?;
                    if offset < 0 || field_width <= 0 {
                        return Err(Diagnostic::error(
                            Category::Syntax,
                            "field offset and width must be non-negative",
                        )
                        .at(field_span.loc()));
                    }
                    fields.push((field_name, offset as u32, field_width as u32, field_span));
                    if !self.eat(TokenKind::Comma) {
                        break;
                    }
                }
                self.expect(TokenKind::RBracket, "`]`")?;
            }
            self.end_of_line()?;
            cons.push(BitdataConExp {
                name: con_name,
                span: con_span,
                tag,
                fields,
            });
        }
        if cons.is_empty() {
            return Err(self.error("at least one bitdata constructor"));
        }
        Ok(Item::Bitdata {
            name,
            span,
            width: width as u32,
            cons,
        })
    }

    fn item(&mut self) -> Parse<Item> {
        match self.peek() {
            Some(TokenKind::Entry) => {
                self.bump();
                let (name, span) = self.ident("a block name")?;
                self.end_of_line()?;
                Ok(Item::Entry(name, span))
            }
            Some(TokenKind::Data) => self.data_item(),
            Some(TokenKind::Bitdata) => self.bitdata_item(),
            Some(TokenKind::LBracket) => {
                // `[a, b] <- tail`: a multi-component top level.
                let span = self.span();
                let lhs = self.bind_lhs()?;
                if lhs.is_empty() {
                    return Err(Diagnostic::error(
                        Category::Syntax,
                        "a top-level definition needs at least one name",
                    )
                    .at(span.loc()));
                }
                self.expect(TokenKind::BindArrow, "`<-`")?;
                let tail = self.tail()?;
                self.end_of_line()?;
                Ok(Item::Top { lhs, tail })
            }
            Some(TokenKind::Ident(_)) => match self.peek2() {
                Some(TokenKind::BindArrow) => {
                    let lhs = vec![self.ident("a top-level name")?];
                    self.bump();
                    let tail = self.tail()?;
                    self.end_of_line()?;
                    Ok(Item::Top { lhs, tail })
                }
                Some(TokenKind::LBrace) => {
                    let (name, span) = self.ident("a closure name")?;
                    self.bump();
                    let mut stored = Vec::new();
                    if !self.eat(TokenKind::RBrace) {
                        loop {
                            stored.push(self.ident("a stored variable")?);
                            if !self.eat(TokenKind::Comma) {
                                break;
                            }
                        }
                        self.expect(TokenKind::RBrace, "`}`")?;
                    }
                    self.expect(TokenKind::LBracket, "`[`")?;
                    let mut params = Vec::new();
                    if !self.eat(TokenKind::RBracket) {
                        loop {
                            params.push(self.ident("a parameter name")?);
                            if !self.eat(TokenKind::Comma) {
                                break;
                            }
                        }
                        self.expect(TokenKind::RBracket, "`]`")?;
                    }
                    self.expect(TokenKind::Equals, "`=`")?;
                    let body = self.tail()?;
                    self.end_of_line()?;
                    Ok(Item::Closure {
                        name,
                        span,
                        stored,
                        params,
                        body,
                    })
                }
                Some(TokenKind::LBracket) => {
                    let (name, span) = self.ident("a block name")?;
                    self.bump();
                    let mut params = Vec::new();
                    if !self.eat(TokenKind::RBracket) {
                        loop {
                            params.push(self.ident("a parameter name")?);
                            if !self.eat(TokenKind::Comma) {
                                break;
                            }
                        }
                        self.expect(TokenKind::RBracket, "`]`")?;
                    }
                    self.expect(TokenKind::Equals, "`=`")?;
                    let body = self.code()?;
                    Ok(Item::Block {
                        name,
                        span,
                        params,
                        body,
                    })
                }
                _ => Err(self.error("`<-`, `[`, or `{` after the name")),
            },
            _ => Err(self.error("an item")),
        }
    }

    fn program(&mut self) -> Result<Vec<Item>, DiagnosticError> {
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            if self.peek().is_none() {
                return Ok(items);
            }
            match self.item() {
                Ok(item) => items.push(item),
                Err(diag) => return Err(DiagnosticError::single(diag)),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

struct Resolver {
    program: Program,
    blocks: HashMap<String, BlockId>,
    tops: HashMap<String, (TopId, usize)>,
    cfuns: HashMap<String, mil_ir::CfunId>,
    closures: HashMap<String, ClosId>,
    diags: Vec<Diagnostic>,
}

impl Resolver {
    fn error(&mut self, category: Category, message: String, span: Span) {
        self.diags
            .push(Diagnostic::error(category, message).at(span.loc()));
    }

    fn declare_name<T: Copy>(
        map: &mut HashMap<String, T>,
        diags: &mut Vec<Diagnostic>,
        kind: &str,
        name: &str,
        span: Span,
        value: T,
    ) {
        if map.insert(name.to_string(), value).is_some() {
            diags.push(
                Diagnostic::error(
                    Category::DuplicateName,
                    format!("{kind} `{name}` is defined more than once"),
                )
                .at(span.loc()),
            );
        }
    }

    fn atom(&mut self, scope: &HashMap<String, TempId>, exp: &AtomExp) -> Atom {
        match exp {
            AtomExp::Int(n) => Atom::Int(*n),
            AtomExp::Flag(b) => Atom::Flag(*b),
            AtomExp::Name(name, span) => {
                if let Some(t) = scope.get(name) {
                    Atom::Temp(*t)
                } else if let Some((top, index)) = self.tops.get(name).copied() {
                    Atom::Top(top, index)
                } else {
                    self.error(
                        Category::UndefinedName,
                        format!("`{name}` is not a temporary or top-level name"),
                        *span,
                    );
                    Atom::Int(0)
                }
            }
        }
    }

    fn atoms(&mut self, scope: &HashMap<String, TempId>, exps: &[AtomExp]) -> Vec<Atom> {
        exps.iter().map(|e| self.atom(scope, e)).collect()
    }

    fn block_call(&mut self, scope: &HashMap<String, TempId>, call: &CallExp) -> BlockCall {
        let args = self.atoms(scope, &call.args);
        match self.blocks.get(&call.name).copied() {
            Some(block) => BlockCall::new(block, args),
            None => {
                self.error(
                    Category::UndefinedName,
                    format!("block `{}` is not defined", call.name),
                    call.span,
                );
                BlockCall::new(BlockId(0), args)
            }
        }
    }

    fn tail(&mut self, scope: &HashMap<String, TempId>, exp: &TailExp) -> Tail {
        match exp {
            TailExp::Return(atoms) => Tail::Return(self.atoms(scope, atoms)),
            TailExp::Prim(name, span, atoms) => {
                let args = self.atoms(scope, atoms);
                match self.program.prims.lookup(name) {
                    Some(p) => Tail::Prim(p, args),
                    None => {
                        self.error(
                            Category::UndefinedName,
                            format!("primitive `{name}` is not defined"),
                            *span,
                        );
                        Tail::Return(args)
                    }
                }
            }
            TailExp::Call(call) => Tail::Call(self.block_call(scope, call)),
            TailExp::Alloc(name, span, atoms) => {
                let args = self.atoms(scope, atoms);
                match self.cfuns.get(name).copied() {
                    Some(cf) => Tail::Data(cf, args),
                    None => {
                        self.error(
                            Category::UndefinedName,
                            format!("constructor `{name}` is not defined"),
                            *span,
                        );
                        Tail::Return(args)
                    }
                }
            }
            TailExp::Clos(name, span, atoms) => {
                let args = self.atoms(scope, atoms);
                match self.closures.get(name).copied() {
                    Some(k) => Tail::Clos(k, args),
                    None => {
                        self.error(
                            Category::UndefinedName,
                            format!("closure `{name}` is not defined"),
                            *span,
                        );
                        Tail::Return(args)
                    }
                }
            }
            TailExp::Enter(f, atoms) => {
                let func = self.atom(scope, f);
                let args = self.atoms(scope, atoms);
                Tail::Enter(func, args)
            }
            TailExp::Sel(name, span, index, atom) => {
                let a = self.atom(scope, atom);
                match self.cfuns.get(name).copied() {
                    Some(cf) => Tail::Sel(cf, *index, a),
                    None => {
                        self.error(
                            Category::UndefinedName,
                            format!("constructor `{name}` is not defined"),
                            *span,
                        );
                        Tail::ret1(a)
                    }
                }
            }
        }
    }

    fn temp_in_scope(
        &mut self,
        scope: &HashMap<String, TempId>,
        name: &str,
        span: Span,
    ) -> TempId {
        match scope.get(name) {
            Some(t) => *t,
            None => {
                self.error(
                    Category::UndefinedName,
                    format!("`{name}` is not a temporary in scope"),
                    span,
                );
                TempId(0)
            }
        }
    }

    fn code(&mut self, scope: &mut HashMap<String, TempId>, exp: &CodeExp) -> Code {
        match exp {
            CodeExp::Bind(lhs, tail, rest) => {
                let tail = self.tail(scope, tail);
                let vs: Vec<TempId> = lhs
                    .iter()
                    .map(|(name, _)| {
                        let t = self.program.named_temp(name.clone());
                        scope.insert(name.clone(), t);
                        t
                    })
                    .collect();
                let rest = self.code(scope, rest);
                Code::bind(vs, tail, rest)
            }
            CodeExp::Done(tail) => Code::Done(self.tail(scope, tail)),
            CodeExp::If(cond, span, then_call, else_call) => {
                let cond = self.temp_in_scope(scope, cond, *span);
                Code::If {
                    cond,
                    then_call: self.block_call(scope, then_call),
                    else_call: self.block_call(scope, else_call),
                }
            }
            CodeExp::Case {
                scrut,
                span,
                alts,
                default,
            } => {
                let scrut = self.temp_in_scope(scope, scrut, *span);
                let alts = alts
                    .iter()
                    .filter_map(|(name, cfun_span, target)| {
                        let target = self.block_call(scope, target);
                        match self.cfuns.get(name).copied() {
                            Some(cf) => Some(mil_ir::CaseAlt { cfun: cf, target }),
                            None => {
                                self.error(
                                    Category::UndefinedName,
                                    format!("constructor `{name}` is not defined"),
                                    *cfun_span,
                                );
                                None
                            }
                        }
                    })
                    .collect();
                let default = default.as_ref().map(|call| self.block_call(scope, call));
                Code::Case {
                    scrut,
                    alts,
                    default,
                }
            }
        }
    }
}

/// Check a bitdata constructor's layout: fields must sit inside the width
/// and must not straddle a word boundary.
fn check_layout(
    name: &str,
    width: u32,
    con: &BitdataConExp,
    diags: &mut Vec<Diagnostic>,
) -> BitdataLayout {
    let words = num_words(width);
    let mut tagbits = con.tag.clone();
    tagbits.resize(words, 0);

    let mut fields = Vec::new();
    for (field_name, offset, field_width, span) in &con.fields {
        let end = offset + field_width;
        if end > width {
            diags.push(
                Diagnostic::error(
                    Category::BadLayout,
                    format!(
                        "field `{field_name}` of `{name}` extends past the declared width {width}"
                    ),
                )
                .at(span.loc()),
            );
            continue;
        }
        if offset / WORD_SIZE != (end - 1) / WORD_SIZE {
            diags.push(
                Diagnostic::error(
                    Category::BadLayout,
                    format!("field `{field_name}` of `{name}` straddles a word boundary"),
                )
                .at(span.loc()),
            );
            continue;
        }
        fields.push(BitdataField {
            name: field_name.clone(),
            offset: *offset,
            width: *field_width,
        });
    }
    BitdataLayout { tagbits, fields }
}

/// Parse and resolve a whole program.
pub fn parse_program(source: &str) -> Result<Program, DiagnosticError> {
    let tokens = lex(source)?;
    let mut parser = Parser { tokens, pos: 0 };
    let items = parser.program()?;

    let mut resolver = Resolver {
        program: Program::new(),
        blocks: HashMap::new(),
        tops: HashMap::new(),
        cfuns: HashMap::new(),
        closures: HashMap::new(),
        diags: Vec::new(),
    };

    // First pass: declare every named definition so bodies can refer to
    // definitions in any order.
    let mut block_params: HashMap<String, Vec<TempId>> = HashMap::new();
    let mut closure_temps: HashMap<String, (Vec<TempId>, Vec<TempId>)> = HashMap::new();
    for item in &items {
        match item {
            Item::Data { name, span: _, cfuns } => {
                let data = resolver.program.add_data(DataDefn {
                    name: name.clone(),
                    cfuns: vec![],
                    bitdata: None,
                });
                for (tag, (cfun_name, arity, cfun_span)) in cfuns.iter().enumerate() {
                    let cf = resolver.program.add_cfun(Cfun {
                        name: cfun_name.clone(),
                        data,
                        tag,
                        arity: *arity,
                    });
                    resolver.program.datas[data.0 as usize].cfuns.push(cf);
                    Resolver::declare_name(
                        &mut resolver.cfuns,
                        &mut resolver.diags,
                        "constructor",
                        cfun_name,
                        *cfun_span,
                        cf,
                    );
                }
            }
            Item::Bitdata {
                name,
                span: _,
                width,
                cons,
            } => {
                let layouts: Vec<BitdataLayout> = cons
                    .iter()
                    .map(|con| check_layout(name, *width, con, &mut resolver.diags))
                    .collect();
                let data = resolver.program.add_data(DataDefn {
                    name: name.clone(),
                    cfuns: vec![],
                    bitdata: Some(BitdataDefn {
                        width: *width,
                        layouts,
                    }),
                });
                for (tag, con) in cons.iter().enumerate() {
                    let cf = resolver.program.add_cfun(Cfun {
                        name: con.name.clone(),
                        data,
                        tag,
                        arity: con.fields.len(),
                    });
                    resolver.program.datas[data.0 as usize].cfuns.push(cf);
                    Resolver::declare_name(
                        &mut resolver.cfuns,
                        &mut resolver.diags,
                        "constructor",
                        &con.name,
                        con.span,
                        cf,
                    );
                }
            }
            Item::Top { lhs, .. } => {
                let top = resolver.program.add_top(TopLevel {
                    lhs: lhs.iter().map(|(name, _)| TopLhs::new(name.clone())).collect(),
                    tail: Tail::Return(vec![]),
                });
                for (index, (name, span)) in lhs.iter().enumerate() {
                    Resolver::declare_name(
                        &mut resolver.tops,
                        &mut resolver.diags,
                        "top-level",
                        name,
                        *span,
                        (top, index),
                    );
                }
            }
            Item::Closure {
                name,
                span,
                stored,
                params,
                ..
            } => {
                let stored_temps: Vec<TempId> = stored
                    .iter()
                    .map(|(n, _)| resolver.program.named_temp(n.clone()))
                    .collect();
                let param_temps: Vec<TempId> = params
                    .iter()
                    .map(|(n, _)| resolver.program.named_temp(n.clone()))
                    .collect();
                let k = resolver.program.add_closure(ClosureDefn {
                    name: name.clone(),
                    stored: stored_temps.clone(),
                    params: param_temps.clone(),
                    body: Tail::Return(vec![]),
                });
                closure_temps.insert(name.clone(), (stored_temps, param_temps));
                Resolver::declare_name(
                    &mut resolver.closures,
                    &mut resolver.diags,
                    "closure",
                    name,
                    *span,
                    k,
                );
            }
            Item::Block {
                name,
                span,
                params,
                ..
            } => {
                let param_temps: Vec<TempId> = params
                    .iter()
                    .map(|(n, _)| resolver.program.named_temp(n.clone()))
                    .collect();
                let block = resolver.program.add_block(Block::new(
                    name.clone(),
                    param_temps.clone(),
                    Code::Done(Tail::Return(vec![])),
                ));
                block_params.insert(name.clone(), param_temps);
                Resolver::declare_name(
                    &mut resolver.blocks,
                    &mut resolver.diags,
                    "block",
                    name,
                    *span,
                    block,
                );
            }
            Item::Entry(..) => {}
        }
    }

    // Second pass: bodies, tails, and entries.
    for item in &items {
        match item {
            Item::Entry(name, span) => match resolver.blocks.get(name).copied() {
                Some(block) => resolver.program.entries.push(block),
                None => resolver.error(
                    Category::UndefinedName,
                    format!("entry block `{name}` is not defined"),
                    *span,
                ),
            },
            Item::Top { lhs, tail } => {
                let scope = HashMap::new();
                let resolved = resolver.tail(&scope, tail);
                let (top, _) = resolver.tops[&lhs[0].0];
                resolver.program.top_mut(top).tail = resolved;
            }
            Item::Closure { name, body, stored, params, .. } => {
                let (stored_temps, param_temps) = closure_temps[name].clone();
                let scope: HashMap<String, TempId> = stored
                    .iter()
                    .map(|(n, _)| n.clone())
                    .zip(stored_temps)
                    .chain(params.iter().map(|(n, _)| n.clone()).zip(param_temps))
                    .collect();
                let resolved = resolver.tail(&scope, body);
                let k = resolver.closures[name];
                resolver.program.closures[k.0 as usize].body = resolved;
            }
            Item::Block { name, params, body, .. } => {
                let param_temps = block_params[name].clone();
                let mut scope: HashMap<String, TempId> = params
                    .iter()
                    .map(|(n, _)| n.clone())
                    .zip(param_temps)
                    .collect();
                let resolved = resolver.code(&mut scope, body);
                let block = resolver.blocks[name];
                resolver.program.block_mut(block).body = resolved;
            }
            Item::Data { .. } | Item::Bitdata { .. } => {}
        }
    }

    if resolver.diags.is_empty() {
        Ok(resolver.program)
    } else {
        Err(DiagnosticError::multiple(resolver.diags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mil_ir::verify::verify;

    #[test]
    fn parses_a_block_with_binds_and_entry() {
        let source = "\
entry main

main[] =
  t <- add((3, 4))
  return [t]
";
        let program = parse_program(source).expect("parse");
        verify(&program).expect("verify");

        assert_eq!(program.entries.len(), 1);
        let main = program.block(program.entries[0]);
        assert_eq!(main.name, "main");
        let Code::Bind { vs, tail, rest } = &main.body else {
            panic!("expected a bind, got {:?}", main.body);
        };
        assert_eq!(vs.len(), 1);
        assert_eq!(
            tail.prim_args(program.prims.add),
            Some(&[Atom::Int(3), Atom::Int(4)][..])
        );
        assert_eq!(**rest, Code::Done(Tail::ret1(Atom::Temp(vs[0]))));
    }

    #[test]
    fn parses_if_case_and_data() {
        let source = "\
data List = Nil/0 | Cons/2

len[xs] =
  case xs of
    Nil -> zero[]
    Cons -> nonzero[xs]

zero[] =
  return [0]

nonzero[ys] =
  t <- sel Cons 1 ys
  n <- len[t]
  m <- add((n, 1))
  return [m]

pick[c, xs] =
  if c then len[xs] else zero[]
";
        let program = parse_program(source).expect("parse");
        verify(&program).expect("verify");

        assert_eq!(program.datas.len(), 1);
        assert_eq!(program.datas[0].cfuns.len(), 2);
        assert_eq!(program.cfun(program.datas[0].cfuns[1]).arity, 2);

        let len = &program.blocks[0];
        assert!(matches!(len.body, Code::Case { ref alts, default: None, .. } if alts.len() == 2));
        let pick = &program.blocks[3];
        assert!(matches!(pick.body, Code::If { .. }));
    }

    #[test]
    fn parses_top_levels_closures_and_enter() {
        let source = "\
answer <- return [42]
[lo, hi] <- return [1, 2]

adder{s} [a] = add((s, a))

use[] =
  k <- adder{answer}
  r <- k @ [lo]
  return [r]
";
        let program = parse_program(source).expect("parse");
        verify(&program).expect("verify");

        assert_eq!(program.tops.len(), 2);
        assert_eq!(program.tops[1].lhs.len(), 2);
        assert_eq!(program.closures.len(), 1);

        let body = &program.blocks[0].body;
        let Code::Bind { tail, rest, .. } = body else {
            panic!("expected closure alloc bind");
        };
        assert!(matches!(tail, Tail::Clos(_, args) if args == &vec![Atom::Top(TopId(0), 0)]));
        assert!(matches!(
            **rest,
            Code::Bind { ref tail, .. } if matches!(tail, Tail::Enter(..))
        ));
    }

    #[test]
    fn parses_bitdata_declarations() {
        let source = "\
bitdata KeyCode width 8
  = Mk tag [128] fields [payload 0 6]

build[p] =
  v <- Mk(p)
  return [v]
";
        let program = parse_program(source).expect("parse");
        verify(&program).expect("verify");

        let data = &program.datas[0];
        let bitdata = data.bitdata.as_ref().expect("bitdata");
        assert_eq!(bitdata.width, 8);
        assert_eq!(bitdata.layouts[0].tagbits, vec![128]);
        assert_eq!(bitdata.layouts[0].fields[0].width, 6);
        assert_eq!(program.cfun(data.cfuns[0]).arity, 1);
    }

    #[test]
    fn rejects_word_straddling_bitdata_fields() {
        let source = "\
bitdata Wide width 40
  = Mk tag [0, 0] fields [bad 30 4]
";
        let err = parse_program(source).expect_err("straddling field");
        assert_eq!(err.diagnostics()[0].category, Category::BadLayout);
    }

    #[test]
    fn reports_undefined_names_with_category() {
        let err = parse_program("main[] =\n  ghost[1]\n").expect_err("undefined block");
        assert_eq!(err.diagnostics()[0].category, Category::UndefinedName);

        let err = parse_program("main[] =\n  return [nope]\n").expect_err("undefined atom");
        assert_eq!(err.diagnostics()[0].category, Category::UndefinedName);
    }

    #[test]
    fn reports_duplicate_definitions() {
        let source = "a[] =\n  return [0]\n\na[] =\n  return [1]\n";
        let err = parse_program(source).expect_err("duplicate block");
        assert_eq!(err.diagnostics()[0].category, Category::DuplicateName);
    }

    #[test]
    fn syntax_errors_name_what_was_expected() {
        let err = parse_program("main[] =\n  t <- \n").expect_err("missing tail");
        assert!(err.diagnostics()[0].message.contains("expected a tail"));
    }

    #[test]
    fn dump_round_trips_through_the_parser() {
        let source = "\
data List = Nil/0 | Cons/2

entry main

answer <- return [42]

main[] =
  t <- add((3, 4))
  u <- mul((t, 2))
  c <- primLt((u, 100))
  if c then small[u] else big[u]

small[x] =
  return [x]

big[y] =
  halt(())
";
        let program = parse_program(source).expect("parse");
        let dumped = program.dump();
        let reparsed = parse_program(&dumped).expect("reparse dumped text");
        assert_eq!(reparsed.dump(), dumped);
    }
}
