//! The lexer for the textual MIL dialect.
//!
//! Line breaks are significant (they separate binds and items), so the
//! lexer emits a single `Newline` token per run of blank space containing
//! at least one line break. `--` starts a comment running to the end of
//! the line.

use mil_diag::{Category, Diagnostic, DiagnosticError, SourceLocation};
use mil_ir::Word;

use crate::token::{Token, TokenKind};

pub fn lex(source: &str) -> Result<Vec<Token>, DiagnosticError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut diags = Vec::new();
    let mut i = 0usize;

    let mut push = |kind: TokenKind, start: usize, end: usize, tokens: &mut Vec<Token>| {
        tokens.push(Token {
            kind,
            start: start as u32,
            end: end as u32,
        });
    };

    while i < bytes.len() {
        let start = i;
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' => {
                i += 1;
            }
            '\n' => {
                // Collapse a run of line breaks (and the blank space
                // between them) into one token, leaving the next line's
                // indentation for the ordinary whitespace path.
                while i < bytes.len() && matches!(bytes[i] as char, '\n' | ' ' | '\t' | '\r') {
                    i += 1;
                }
                while i > start && bytes[i - 1] != b'\n' {
                    i -= 1;
                }
                if tokens.last().map(|t: &Token| &t.kind) != Some(&TokenKind::Newline) {
                    push(TokenKind::Newline, start, i, &mut tokens);
                }
            }
            '[' => {
                i += 1;
                push(TokenKind::LBracket, start, i, &mut tokens);
            }
            ']' => {
                i += 1;
                push(TokenKind::RBracket, start, i, &mut tokens);
            }
            '(' => {
                i += 1;
                push(TokenKind::LParen, start, i, &mut tokens);
            }
            ')' => {
                i += 1;
                push(TokenKind::RParen, start, i, &mut tokens);
            }
            '{' => {
                i += 1;
                push(TokenKind::LBrace, start, i, &mut tokens);
            }
            '}' => {
                i += 1;
                push(TokenKind::RBrace, start, i, &mut tokens);
            }
            ',' => {
                i += 1;
                push(TokenKind::Comma, start, i, &mut tokens);
            }
            '|' => {
                i += 1;
                push(TokenKind::Pipe, start, i, &mut tokens);
            }
            '@' => {
                i += 1;
                push(TokenKind::At, start, i, &mut tokens);
            }
            '=' => {
                i += 1;
                push(TokenKind::Equals, start, i, &mut tokens);
            }
            '/' => {
                i += 1;
                push(TokenKind::Slash, start, i, &mut tokens);
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'-') {
                    i += 2;
                    push(TokenKind::BindArrow, start, i, &mut tokens);
                } else {
                    diags.push(stray(source, start, i + 1, "`<`"));
                    i += 1;
                }
            }
            '-' => match bytes.get(i + 1) {
                Some(b'-') => {
                    while i < bytes.len() && bytes[i] != b'\n' {
                        i += 1;
                    }
                }
                Some(b'>') => {
                    i += 2;
                    push(TokenKind::Arrow, start, i, &mut tokens);
                }
                Some(d) if d.is_ascii_digit() => {
                    i += 1;
                    match lex_int(bytes, &mut i, true) {
                        Ok(n) => push(TokenKind::Int(n), start, i, &mut tokens),
                        Err(()) => diags.push(stray(source, start, i, "numeric literal")),
                    }
                }
                _ => {
                    diags.push(stray(source, start, i + 1, "`-`"));
                    i += 1;
                }
            },
            _ if c.is_ascii_digit() => match lex_int(bytes, &mut i, false) {
                Ok(n) => push(TokenKind::Int(n), start, i, &mut tokens),
                Err(()) => diags.push(stray(source, start, i, "numeric literal")),
            },
            _ if c.is_ascii_alphabetic() || c == '_' => {
                while i < bytes.len()
                    && ((bytes[i] as char).is_ascii_alphanumeric()
                        || bytes[i] == b'_'
                        || bytes[i] == b'\'')
                {
                    i += 1;
                }
                let text = &source[start..i];
                let kind = if text == "_" {
                    TokenKind::Underscore
                } else {
                    TokenKind::keyword(text).unwrap_or_else(|| TokenKind::Ident(text.to_string()))
                };
                push(kind, start, i, &mut tokens);
            }
            _ => {
                diags.push(stray(source, start, i + c.len_utf8(), &format!("`{c}`")));
                i += c.len_utf8();
            }
        }
    }

    if diags.is_empty() {
        Ok(tokens)
    } else {
        Err(DiagnosticError::multiple(diags))
    }
}

fn stray(_source: &str, start: usize, end: usize, what: &str) -> Diagnostic {
    Diagnostic::error(Category::Syntax, format!("unexpected {what} in input")).at(SourceLocation {
        file_id: 0,
        start: start as u32,
        end: end as u32,
    })
}

/// Decimal, `0x` hexadecimal, or `0b` binary literal. The cursor sits on
/// the first digit; `negative` applies Java-style two's-complement
/// negation.
fn lex_int(bytes: &[u8], i: &mut usize, negative: bool) -> Result<Word, ()> {
    let radix = if bytes.get(*i) == Some(&b'0') && matches!(bytes.get(*i + 1), Some(b'x' | b'X')) {
        *i += 2;
        16
    } else if bytes.get(*i) == Some(&b'0') && matches!(bytes.get(*i + 1), Some(b'b' | b'B')) {
        *i += 2;
        2
    } else {
        10
    };

    let start = *i;
    while *i < bytes.len() {
        let c = bytes[*i] as char;
        if c == '_' || c.is_digit(radix) {
            *i += 1;
        } else {
            break;
        }
    }
    if *i == start {
        return Err(());
    }
    let digits: String = bytes[start..*i]
        .iter()
        .map(|b| *b as char)
        .filter(|c| *c != '_')
        .collect();
    // Accept the full unsigned word range for hex/binary patterns.
    let value = i64::from_str_radix(&digits, radix).map_err(|_| ())?;
    if value > u32::MAX as i64 {
        return Err(());
    }
    let word = value as Word;
    Ok(if negative { word.wrapping_neg() } else { word })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).expect("lex").into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_a_bind_line() {
        assert_eq!(
            kinds("t <- add((x, 4))"),
            vec![
                TokenKind::Ident("t".to_string()),
                TokenKind::BindArrow,
                TokenKind::Ident("add".to_string()),
                TokenKind::LParen,
                TokenKind::LParen,
                TokenKind::Ident("x".to_string()),
                TokenKind::Comma,
                TokenKind::Int(4),
                TokenKind::RParen,
                TokenKind::RParen,
            ]
        );
    }

    #[test]
    fn collapses_newline_runs_and_comments() {
        assert_eq!(
            kinds("a\n\n -- comment\nb"),
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::Newline,
                TokenKind::Ident("b".to_string()),
            ]
        );
    }

    #[test]
    fn integer_radices_and_signs() {
        assert_eq!(
            kinds("0xAA 0b10_101010 -1 170"),
            vec![
                TokenKind::Int(0xAA),
                TokenKind::Int(0b1010_1010),
                TokenKind::Int(-1),
                TokenKind::Int(170),
            ]
        );
        // The full unsigned range wraps into the word.
        assert_eq!(kinds("0xFFFFFFFF"), vec![TokenKind::Int(-1)]);
    }

    #[test]
    fn arrows_and_comments_disambiguate() {
        assert_eq!(
            kinds("a -> b <- c"),
            vec![
                TokenKind::Ident("a".to_string()),
                TokenKind::Arrow,
                TokenKind::Ident("b".to_string()),
                TokenKind::BindArrow,
                TokenKind::Ident("c".to_string()),
            ]
        );
    }

    #[test]
    fn keywords_are_not_identifiers() {
        assert_eq!(
            kinds("return if sel entry"),
            vec![TokenKind::Return, TokenKind::If, TokenKind::Sel, TokenKind::Entry]
        );
    }

    #[test]
    fn stray_characters_are_reported_with_locations() {
        let err = lex("a ? b").expect_err("stray character");
        let diag = &err.diagnostics()[0];
        assert_eq!(diag.category, Category::Syntax);
        assert_eq!(diag.location.map(|l| l.start), Some(2));
    }
}
