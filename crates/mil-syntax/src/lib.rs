//! Lexer and parser for the textual MIL dialect.
//!
//! The parser produces a resolved `mil_ir::Program`; scope errors
//! (undefined or duplicated names, malformed bitdata layouts) are reported
//! as `mil_diag` diagnostics with byte-offset locations. The dialect is the
//! same one `Program::dump` renders, so optimizer output can be fed back in.

pub mod lexer;
pub mod parser;
pub mod token;

pub use lexer::lex;
pub use parser::parse_program;
