//! Recursive-descent parser producing the path AST.
//!
//! Grammar (informal):
//!
//! ```text
//! path      := ['$'] (member-start)? segment*
//! segment   := '.' (ident | int | '*')
//!            | '..' (ident | '*')
//!            | '[' bracket ']'
//! bracket   := '*' | string | '?' '(' filter ')' | [int] [':' [int] [':' [int]]]
//! filter    := '@' ('.' ident | '[' string ']')* [op literal]
//! literal   := string | number | true | false | null | bare-word
//! ```

use serde_json::Value;

use super::lexer::{tokenize, CmpOp, Token};
use super::PathError;

/// A literal on the right-hand side of a filter comparison
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

impl Literal {
    /// JSON form used for comparisons.
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Literal::String(s) => Value::String(s.clone()),
        }
    }
}

/// `[?(@.field OP literal)]`; without a comparison the predicate tests truthiness.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: Vec<String>,
    pub test: Option<(CmpOp, Literal)>,
}

/// One step of a path expression
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Property(String),
    Index(i64),
    Wildcard,
    /// `..name`
    Descendant(String),
    /// `..*`
    DescendantAll,
    Filter(Predicate),
    Slice {
        start: Option<i64>,
        end: Option<i64>,
        step: Option<i64>,
    },
}

/// A parsed path expression
#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    pub segments: Vec<Segment>,
}

impl PathExpr {
    /// Parse a path string into an AST.
    pub fn parse(input: &str) -> Result<Self, PathError> {
        let tokens = tokenize(input)?;
        Parser { tokens, pos: 0 }.parse_path()
    }

    /// True for `$` (or an empty path): evaluation returns the root unchanged.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token, what: &'static str) -> Result<(), PathError> {
        match self.next() {
            Some(ref t) if *t == expected => Ok(()),
            Some(t) => Err(PathError::UnexpectedToken {
                expected: what,
                found: format!("{:?}", t),
            }),
            None => Err(PathError::UnexpectedEnd(what)),
        }
    }

    fn parse_path(mut self) -> Result<PathExpr, PathError> {
        let mut segments = Vec::new();

        if self.peek() == Some(&Token::Root) {
            self.pos += 1;
        } else if let Some(Token::Ident(name)) = self.peek().cloned() {
            // Bare leading member: `data.items` == `$.data.items`
            self.pos += 1;
            segments.push(Segment::Property(name));
        }

        while let Some(token) = self.next() {
            let segment = match token {
                Token::Dot => self.parse_member()?,
                Token::DotDot => self.parse_descendant()?,
                Token::LBracket => self.parse_bracket()?,
                other => {
                    return Err(PathError::UnexpectedToken {
                        expected: "'.', '..' or '['",
                        found: format!("{:?}", other),
                    })
                }
            };
            segments.push(segment);
        }

        Ok(PathExpr { segments })
    }

    fn parse_member(&mut self) -> Result<Segment, PathError> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(Segment::Property(name)),
            Some(Token::Int(i)) if i >= 0 => Ok(Segment::Property(i.to_string())),
            Some(Token::Star) => Ok(Segment::Wildcard),
            Some(t) => Err(PathError::UnexpectedToken {
                expected: "property name",
                found: format!("{:?}", t),
            }),
            None => Err(PathError::UnexpectedEnd("property name")),
        }
    }

    fn parse_descendant(&mut self) -> Result<Segment, PathError> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(Segment::Descendant(name)),
            Some(Token::Star) => Ok(Segment::DescendantAll),
            Some(t) => Err(PathError::UnexpectedToken {
                expected: "property name after '..'",
                found: format!("{:?}", t),
            }),
            None => Err(PathError::UnexpectedEnd("property name after '..'")),
        }
    }

    fn parse_bracket(&mut self) -> Result<Segment, PathError> {
        let segment = match self.peek().cloned() {
            Some(Token::Star) => {
                self.pos += 1;
                Segment::Wildcard
            }
            Some(Token::Str(name)) => {
                self.pos += 1;
                Segment::Property(name)
            }
            Some(Token::Question) => {
                self.pos += 1;
                self.expect(Token::LParen, "'('")?;
                let predicate = self.parse_predicate()?;
                self.expect(Token::RParen, "')'")?;
                Segment::Filter(predicate)
            }
            Some(Token::Int(_)) | Some(Token::Colon) => self.parse_index_or_slice()?,
            Some(t) => {
                return Err(PathError::UnexpectedToken {
                    expected: "index, slice, string, '*' or filter",
                    found: format!("{:?}", t),
                })
            }
            None => return Err(PathError::UnexpectedEnd("bracket contents")),
        };
        self.expect(Token::RBracket, "']'")?;
        Ok(segment)
    }

    fn parse_index_or_slice(&mut self) -> Result<Segment, PathError> {
        let start = self.optional_int();
        if self.peek() != Some(&Token::Colon) {
            return match start {
                Some(i) => Ok(Segment::Index(i)),
                None => Err(PathError::UnexpectedEnd("index")),
            };
        }

        self.pos += 1;
        let end = self.optional_int();
        let step = if self.peek() == Some(&Token::Colon) {
            self.pos += 1;
            self.optional_int()
        } else {
            None
        };

        Ok(Segment::Slice { start, end, step })
    }

    fn optional_int(&mut self) -> Option<i64> {
        if let Some(Token::Int(i)) = self.peek() {
            let i = *i;
            self.pos += 1;
            Some(i)
        } else {
            None
        }
    }

    fn parse_predicate(&mut self) -> Result<Predicate, PathError> {
        self.expect(Token::Current, "'@'")?;

        let mut field = Vec::new();
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    match self.next() {
                        Some(Token::Ident(name)) => field.push(name),
                        Some(Token::Int(i)) if i >= 0 => field.push(i.to_string()),
                        Some(t) => {
                            return Err(PathError::UnexpectedToken {
                                expected: "field name",
                                found: format!("{:?}", t),
                            })
                        }
                        None => return Err(PathError::UnexpectedEnd("field name")),
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    match self.next() {
                        Some(Token::Str(name)) => field.push(name),
                        Some(Token::Int(i)) => field.push(i.to_string()),
                        Some(t) => {
                            return Err(PathError::UnexpectedToken {
                                expected: "quoted field name",
                                found: format!("{:?}", t),
                            })
                        }
                        None => return Err(PathError::UnexpectedEnd("quoted field name")),
                    }
                    self.expect(Token::RBracket, "']'")?;
                }
                _ => break,
            }
        }

        let test = match self.peek() {
            Some(Token::Op(op)) => {
                let op = *op;
                self.pos += 1;
                Some((op, self.parse_literal()?))
            }
            _ => None,
        };

        Ok(Predicate { field, test })
    }

    fn parse_literal(&mut self) -> Result<Literal, PathError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Literal::String(s)),
            Some(Token::Int(i)) => Ok(Literal::Number(i as f64)),
            Some(Token::Float(f)) => Ok(Literal::Number(f)),
            Some(Token::Ident(word)) => Ok(match word.as_str() {
                "true" => Literal::Bool(true),
                "false" => Literal::Bool(false),
                "null" => Literal::Null,
                _ => Literal::String(word),
            }),
            Some(t) => Err(PathError::UnexpectedToken {
                expected: "literal",
                found: format!("{:?}", t),
            }),
            None => Err(PathError::UnexpectedEnd("literal")),
        }
    }
}
