//! Path Query Tokenizer
//!
//! Turns a path string such as `$.items[?(@.price >= 10)].name` into a flat
//! token stream. Whitespace is insignificant everywhere.

use serde::{Deserialize, Serialize};

use super::PathError;

/// Comparison operators usable inside filter predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CmpOp {
    #[serde(alias = "==")]
    Eq,
    #[serde(alias = "!=")]
    Ne,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = ">=")]
    Ge,
    #[serde(alias = "<=")]
    Le,
}

/// A single lexical token
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// `$`
    Root,
    /// `@`
    Current,
    /// `.`
    Dot,
    /// `..`
    DotDot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    /// `*`
    Star,
    /// `:`
    Colon,
    /// `?`
    Question,
    Op(CmpOp),
    Ident(String),
    Int(i64),
    Float(f64),
    Str(String),
}

/// Tokenize a path expression.
pub fn tokenize(input: &str) -> Result<Vec<Token>, PathError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        match c {
            c if c.is_whitespace() => pos += 1,
            '$' => {
                tokens.push(Token::Root);
                pos += 1;
            }
            '@' => {
                tokens.push(Token::Current);
                pos += 1;
            }
            '.' => {
                if chars.get(pos + 1) == Some(&'.') {
                    tokens.push(Token::DotDot);
                    pos += 2;
                } else {
                    tokens.push(Token::Dot);
                    pos += 1;
                }
            }
            '[' => {
                tokens.push(Token::LBracket);
                pos += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                pos += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                pos += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                pos += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                pos += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                pos += 1;
            }
            '?' => {
                tokens.push(Token::Question);
                pos += 1;
            }
            '=' | '!' | '<' | '>' => {
                let next = chars.get(pos + 1).copied();
                let (op, width) = match (c, next) {
                    ('=', Some('=')) => (CmpOp::Eq, 2),
                    ('!', Some('=')) => (CmpOp::Ne, 2),
                    ('>', Some('=')) => (CmpOp::Ge, 2),
                    ('<', Some('=')) => (CmpOp::Le, 2),
                    ('>', _) => (CmpOp::Gt, 1),
                    ('<', _) => (CmpOp::Lt, 1),
                    _ => return Err(PathError::UnexpectedChar { ch: c, pos }),
                };
                tokens.push(Token::Op(op));
                pos += width;
            }
            '\'' | '"' => {
                let (s, next) = lex_string(&chars, pos)?;
                tokens.push(Token::Str(s));
                pos = next;
            }
            '-' | '0'..='9' => {
                let (token, next) = lex_number(&chars, pos)?;
                tokens.push(token);
                pos = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = pos;
                while pos < chars.len() && is_ident_char(chars[pos]) {
                    pos += 1;
                }
                tokens.push(Token::Ident(chars[start..pos].iter().collect()));
            }
            _ => return Err(PathError::UnexpectedChar { ch: c, pos }),
        }
    }

    Ok(tokens)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

fn lex_string(chars: &[char], start: usize) -> Result<(String, usize), PathError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut pos = start + 1;

    while pos < chars.len() {
        match chars[pos] {
            '\\' if pos + 1 < chars.len() => {
                out.push(chars[pos + 1]);
                pos += 2;
            }
            c if c == quote => return Ok((out, pos + 1)),
            c => {
                out.push(c);
                pos += 1;
            }
        }
    }

    Err(PathError::UnterminatedString { pos: start })
}

fn lex_number(chars: &[char], start: usize) -> Result<(Token, usize), PathError> {
    let mut pos = start;
    if chars[pos] == '-' {
        pos += 1;
    }
    let digits_start = pos;
    while pos < chars.len() && chars[pos].is_ascii_digit() {
        pos += 1;
    }
    if pos == digits_start {
        return Err(PathError::UnexpectedChar { ch: '-', pos: start });
    }

    // Only treat '.' as a decimal point when a digit follows, so that
    // `items.0.name` still lexes as Dot-separated segments.
    let mut is_float = false;
    if pos + 1 < chars.len() && chars[pos] == '.' && chars[pos + 1].is_ascii_digit() {
        is_float = true;
        pos += 1;
        while pos < chars.len() && chars[pos].is_ascii_digit() {
            pos += 1;
        }
    }

    let text: String = chars[start..pos].iter().collect();
    let token = if is_float {
        text.parse::<f64>()
            .map(Token::Float)
            .map_err(|_| PathError::InvalidNumber(text.clone()))?
    } else {
        text.parse::<i64>()
            .map(Token::Int)
            .map_err(|_| PathError::InvalidNumber(text.clone()))?
    };
    Ok((token, pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_simple_path() {
        let tokens = tokenize("$.items[-1].id").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Root,
                Token::Dot,
                Token::Ident("items".into()),
                Token::LBracket,
                Token::Int(-1),
                Token::RBracket,
                Token::Dot,
                Token::Ident("id".into()),
            ]
        );
    }

    #[test]
    fn test_tokenize_filter() {
        let tokens = tokenize("[?(@.price >= 9.5)]").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::LBracket,
                Token::Question,
                Token::LParen,
                Token::Current,
                Token::Dot,
                Token::Ident("price".into()),
                Token::Op(CmpOp::Ge),
                Token::Float(9.5),
                Token::RParen,
                Token::RBracket,
            ]
        );
    }

    #[test]
    fn test_tokenize_recursive_and_numeric_member() {
        let tokens = tokenize("$..name.0").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Root,
                Token::DotDot,
                Token::Ident("name".into()),
                Token::Dot,
                Token::Int(0),
            ]
        );
    }

    #[test]
    fn test_tokenize_quoted_strings() {
        let tokens = tokenize(r#"['a b']["it\"s"]"#).unwrap();
        assert_eq!(tokens[1], Token::Str("a b".into()));
        assert_eq!(tokens[4], Token::Str("it\"s".into()));
    }

    #[test]
    fn test_tokenize_errors() {
        assert!(matches!(tokenize("$.a = 1"), Err(PathError::UnexpectedChar { ch: '=', .. })));
        assert!(matches!(tokenize("$['open"), Err(PathError::UnterminatedString { .. })));
        assert!(tokenize("$.a#").is_err());
    }
}
