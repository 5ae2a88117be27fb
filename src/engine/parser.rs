//! Expression tokenizer and precedence parser
//!
//! Expressions pass through a safety sandbox before parsing: a deny-list
//! of tokens that would indicate host-environment access, and a hard
//! length cap. The parser itself is a hand-written precedence climber
//! producing the tree in [`super::ast`].
//!
//! Precedence, lowest to highest: `or`, `and`, `xor`, equality,
//! ordering and string/array predicates, `+ -`, `* / %`, unary, call and
//! member access.

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::value::Value;
use super::{EvalError, EvalResult};
use once_cell::sync::Lazy;
use regex::Regex;

/// Expressions longer than this are rejected outright.
pub const MAX_EXPRESSION_LENGTH: usize = 1_000;

static RESERVED_TOKENS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(eval|exec|import|require|process|global|window|document|Function|constructor)\b",
    )
    .expect("reserved token pattern")
});

/// Reject expressions that are too long or contain reserved tokens.
pub fn check_safety(text: &str) -> EvalResult<()> {
    if text.len() > MAX_EXPRESSION_LENGTH {
        return Err(EvalError::UnsafeExpression(format!(
            "expression length {} exceeds {}",
            text.len(),
            MAX_EXPRESSION_LENGTH
        )));
    }
    if let Some(m) = RESERVED_TOKENS.find(text) {
        return Err(EvalError::UnsafeExpression(format!(
            "reserved token `{}`",
            m.as_str()
        )));
    }
    Ok(())
}

/// Parse an expression into its tree, applying the safety sandbox first.
pub fn parse(text: &str) -> EvalResult<Expr> {
    check_safety(text)?;
    let tokens = tokenize(text)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_or()?;
    if let Some(tok) = parser.peek() {
        return Err(EvalError::ParseError {
            message: format!("unexpected token `{}`", tok.text()),
            pos: tok.pos,
        });
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Number(f64),
    Str(String),
    Symbol(&'static str),
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    pos: usize,
}

impl Token {
    fn text(&self) -> String {
        match &self.kind {
            TokenKind::Ident(s) => s.clone(),
            TokenKind::Number(n) => n.to_string(),
            TokenKind::Str(s) => format!("\"{}\"", s),
            TokenKind::Symbol(s) => s.to_string(),
        }
    }
}

fn tokenize(text: &str) -> EvalResult<Vec<Token>> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;

        if c.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                i += 1;
            }
            if i < bytes.len()
                && bytes[i] == b'.'
                && i + 1 < bytes.len()
                && (bytes[i + 1] as char).is_ascii_digit()
            {
                i += 1;
                while i < bytes.len() && (bytes[i] as char).is_ascii_digit() {
                    i += 1;
                }
            }
            let lexeme = &text[start..i];
            let n = lexeme.parse::<f64>().map_err(|_| EvalError::ParseError {
                message: format!("invalid number `{}`", lexeme),
                pos: start,
            })?;
            tokens.push(Token {
                kind: TokenKind::Number(n),
                pos: start,
            });
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' || c == '@' {
            let start = i;
            i += 1;
            while i < bytes.len() {
                let ch = bytes[i] as char;
                if ch.is_ascii_alphanumeric() || ch == '_' {
                    i += 1;
                } else {
                    break;
                }
            }
            tokens.push(Token {
                kind: TokenKind::Ident(text[start..i].to_string()),
                pos: start,
            });
            continue;
        }

        if c == '"' {
            let start = i;
            i += 1;
            let mut s = String::new();
            let mut closed = false;
            // Decode by character so multi-byte content survives intact.
            while i < bytes.len() {
                let ch = match text[i..].chars().next() {
                    Some(ch) => ch,
                    None => break,
                };
                if ch == '\\' && i + 1 < bytes.len() {
                    let esc = text[i + 1..].chars().next().unwrap_or('\\');
                    s.push(match esc {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                    i += 1 + esc.len_utf8();
                    continue;
                }
                if ch == '"' {
                    closed = true;
                    i += 1;
                    break;
                }
                s.push(ch);
                i += ch.len_utf8();
            }
            if !closed {
                return Err(EvalError::ParseError {
                    message: "unterminated string literal".to_string(),
                    pos: start,
                });
            }
            tokens.push(Token {
                kind: TokenKind::Str(s),
                pos: start,
            });
            continue;
        }

        let next = if i + 1 < bytes.len() {
            bytes[i + 1] as char
        } else {
            '\0'
        };
        let symbol = match (c, next) {
            ('=', '=') => Some("=="),
            ('!', '=') => Some("!="),
            ('<', '=') => Some("<="),
            ('>', '=') => Some(">="),
            _ => None,
        };
        if let Some(sym) = symbol {
            tokens.push(Token {
                kind: TokenKind::Symbol(sym),
                pos: i,
            });
            i += 2;
            continue;
        }

        let single = match c {
            '<' => Some("<"),
            '>' => Some(">"),
            '+' => Some("+"),
            '-' => Some("-"),
            '*' => Some("*"),
            '/' => Some("/"),
            '%' => Some("%"),
            '(' => Some("("),
            ')' => Some(")"),
            ',' => Some(","),
            '.' => Some("."),
            _ => None,
        };
        match single {
            Some(sym) => {
                tokens.push(Token {
                    kind: TokenKind::Symbol(sym),
                    pos: i,
                });
                i += 1;
            }
            None => {
                return Err(EvalError::ParseError {
                    message: format!("unexpected character `{}`", c),
                    pos: i,
                });
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    fn eat_symbol(&mut self, sym: &str) -> bool {
        if matches!(self.peek(), Some(Token { kind: TokenKind::Symbol(s), .. }) if *s == sym) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if matches!(self.peek(), Some(Token { kind: TokenKind::Ident(s), .. }) if s == word) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, sym: &'static str) -> EvalResult<()> {
        if self.eat_symbol(sym) {
            Ok(())
        } else {
            let (found, pos) = match self.peek() {
                Some(tok) => (tok.text(), tok.pos),
                None => ("end of expression".to_string(), usize::MAX),
            };
            Err(EvalError::ParseError {
                message: format!("expected `{}`, found `{}`", sym, found),
                pos: if pos == usize::MAX { 0 } else { pos },
            })
        }
    }

    fn parse_or(&mut self) -> EvalResult<Expr> {
        let mut left = self.parse_and()?;
        while self.eat_word("or") {
            let right = self.parse_and()?;
            left = Expr::Binary {
                op: BinaryOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> EvalResult<Expr> {
        let mut left = self.parse_xor()?;
        while self.eat_word("and") {
            let right = self.parse_xor()?;
            left = Expr::Binary {
                op: BinaryOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_xor(&mut self) -> EvalResult<Expr> {
        let mut left = self.parse_equality()?;
        while self.eat_word("xor") {
            let right = self.parse_equality()?;
            left = Expr::Binary {
                op: BinaryOp::Xor,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> EvalResult<Expr> {
        let mut left = self.parse_comparison()?;
        loop {
            let op = if self.eat_symbol("==") {
                BinaryOp::Eq
            } else if self.eat_symbol("!=") {
                BinaryOp::Ne
            } else {
                break;
            };
            let right = self.parse_comparison()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> EvalResult<Expr> {
        let mut left = self.parse_additive()?;
        loop {
            let op = if self.eat_symbol("<=") {
                BinaryOp::Le
            } else if self.eat_symbol(">=") {
                BinaryOp::Ge
            } else if self.eat_symbol("<") {
                BinaryOp::Lt
            } else if self.eat_symbol(">") {
                BinaryOp::Gt
            } else if self.eat_word("contains") {
                BinaryOp::Contains
            } else if self.eat_word("startsWith") {
                BinaryOp::StartsWith
            } else if self.eat_word("endsWith") {
                BinaryOp::EndsWith
            } else if self.eat_word("matches") {
                BinaryOp::Matches
            } else if self.eat_word("includes") {
                BinaryOp::Includes
            } else {
                break;
            };
            let right = self.parse_additive()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> EvalResult<Expr> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_symbol("+") {
                BinaryOp::Add
            } else if self.eat_symbol("-") {
                BinaryOp::Sub
            } else {
                break;
            };
            let right = self.parse_multiplicative()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> EvalResult<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat_symbol("*") {
                BinaryOp::Mul
            } else if self.eat_symbol("/") {
                BinaryOp::Div
            } else if self.eat_symbol("%") {
                BinaryOp::Mod
            } else {
                break;
            };
            let right = self.parse_unary()?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> EvalResult<Expr> {
        if self.eat_word("not") {
            let child = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                child: Box::new(child),
            });
        }
        if self.eat_symbol("-") {
            let child = self.parse_unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                child: Box::new(child),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> EvalResult<Expr> {
        let tok = match self.advance() {
            Some(tok) => tok,
            None => {
                return Err(EvalError::ParseError {
                    message: "unexpected end of expression".to_string(),
                    pos: 0,
                });
            }
        };

        match tok.kind {
            TokenKind::Number(n) => Ok(Expr::Literal(Value::Number(n))),
            TokenKind::Str(s) => Ok(Expr::Literal(Value::Text(s))),
            TokenKind::Symbol("(") => {
                let inner = self.parse_or()?;
                self.expect_symbol(")")?;
                Ok(inner)
            }
            TokenKind::Ident(name) => match name.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                "null" => Ok(Expr::Literal(Value::Null)),
                _ => {
                    if self.eat_symbol("(") {
                        let mut args = Vec::new();
                        if !self.eat_symbol(")") {
                            loop {
                                args.push(self.parse_or()?);
                                if self.eat_symbol(",") {
                                    continue;
                                }
                                self.expect_symbol(")")?;
                                break;
                            }
                        }
                        return Ok(Expr::Call { name, args });
                    }

                    let mut path = vec![name];
                    while self.eat_symbol(".") {
                        match self.advance() {
                            Some(Token {
                                kind: TokenKind::Ident(segment),
                                ..
                            }) => path.push(segment),
                            Some(other) => {
                                return Err(EvalError::ParseError {
                                    message: format!(
                                        "expected identifier after `.`, found `{}`",
                                        other.text()
                                    ),
                                    pos: other.pos,
                                });
                            }
                            None => {
                                return Err(EvalError::ParseError {
                                    message: "expected identifier after `.`".to_string(),
                                    pos: tok.pos,
                                });
                            }
                        }
                    }
                    Ok(Expr::VarRef(path))
                }
            },
            TokenKind::Symbol(sym) => Err(EvalError::ParseError {
                message: format!("unexpected token `{}`", sym),
                pos: tok.pos,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literals() {
        assert_eq!(parse("true").unwrap(), Expr::Literal(Value::Bool(true)));
        assert_eq!(parse("null").unwrap(), Expr::Literal(Value::Null));
        assert_eq!(parse("42").unwrap(), Expr::Literal(Value::Number(42.0)));
        assert_eq!(parse("3.5").unwrap(), Expr::Literal(Value::Number(3.5)));
        assert_eq!(
            parse("\"hi\"").unwrap(),
            Expr::Literal(Value::Text("hi".into()))
        );
    }

    #[test]
    fn test_unicode_string_literal() {
        assert_eq!(
            parse("\"héllo wörld\"").unwrap(),
            Expr::Literal(Value::Text("héllo wörld".into()))
        );
    }

    #[test]
    fn test_dotted_path() {
        assert_eq!(
            parse("user.profile.name").unwrap(),
            Expr::VarRef(vec!["user".into(), "profile".into(), "name".into()])
        );
    }

    #[test]
    fn test_precedence() {
        // `a or b and c` parses as `a or (b and c)`
        let expr = parse("a or b and c").unwrap();
        match expr {
            Expr::Binary {
                op: BinaryOp::Or,
                right,
                ..
            } => match *right {
                Expr::Binary {
                    op: BinaryOp::And, ..
                } => {}
                other => panic!("expected and on the right, got {:?}", other),
            },
            other => panic!("expected or at the root, got {:?}", other),
        }
    }

    #[test]
    fn test_arithmetic_precedence() {
        // `1 + 2 * 3` parses as `1 + (2 * 3)`
        let expr = parse("1 + 2 * 3").unwrap();
        match expr {
            Expr::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => assert!(matches!(
                *right,
                Expr::Binary {
                    op: BinaryOp::Mul,
                    ..
                }
            )),
            other => panic!("expected add at the root, got {:?}", other),
        }
    }

    #[test]
    fn test_call_with_args() {
        let expr = parse("version_gte(version, \"2.0.0\")").unwrap();
        match expr {
            Expr::Call { name, args } => {
                assert_eq!(name, "version_gte");
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_sandbox_rejects_reserved_tokens() {
        for text in ["eval(x)", "a and process", "window.open", "constructor"] {
            assert!(matches!(
                parse(text),
                Err(EvalError::UnsafeExpression(_))
            ));
        }
        // Reserved words embedded inside longer identifiers are fine.
        assert!(parse("processing").is_ok());
    }

    #[test]
    fn test_sandbox_length_boundary() {
        // Pad with a harmless comparison to reach the exact lengths.
        let base = "x == ";
        let pad_ok = "9".repeat(MAX_EXPRESSION_LENGTH - base.len());
        assert!(parse(&format!("{}{}", base, pad_ok)).is_ok());
        let pad_long = "9".repeat(MAX_EXPRESSION_LENGTH - base.len() + 1);
        assert!(matches!(
            parse(&format!("{}{}", base, pad_long)),
            Err(EvalError::UnsafeExpression(_))
        ));
    }

    #[test]
    fn test_parse_error_reports_position() {
        match parse("a ==") {
            Err(EvalError::ParseError { .. }) => {}
            other => panic!("expected parse error, got {:?}", other),
        }
    }
}
