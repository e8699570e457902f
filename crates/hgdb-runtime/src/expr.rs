//! Breakpoint condition expressions.
//!
//! Conditions are integer predicates over generator-language symbols, e.g.
//! `a[0].b == 5 && rst_n`. The compiler here is deliberately small: a lexer
//! that folds hierarchical selects into single symbol tokens, a Pratt parser,
//! and a tree evaluator over `i64`. Each inserted breakpoint owns its own
//! [`DebugExpression`], so evaluation needs no synchronization.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

/// All expression values are 64-bit signed integers; logical and comparison
/// operators produce 0 or 1.
pub type ExprValue = i64;

/// Reserved symbol that evaluates to the current simulation time.
pub const TIME_VAR_NAME: &str = "$time";
/// Reserved symbol that evaluates to the instance id at the evaluation site.
pub const INSTANCE_VAR_NAME: &str = "$instance";

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why an expression failed to parse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unexpected character `{0}` at offset {1}")]
    UnexpectedChar(char, usize),
    #[error("malformed number at offset {0}")]
    MalformedNumber(usize),
    #[error("unexpected token `{0}`")]
    UnexpectedToken(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("trailing input after expression")]
    TrailingInput,
}

// ── Tokens ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Number(i64),
    /// A full scoped symbol, selects included: `a[0].b` is one token.
    Symbol(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Amp,
    Pipe,
    Caret,
    Tilde,
    AmpAmp,
    PipePipe,
    Bang,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
}

fn is_symbol_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_symbol_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

fn tokenize(source: &str) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '%' => {
                tokens.push(Token::Percent);
                i += 1;
            }
            '^' => {
                tokens.push(Token::Caret);
                i += 1;
            }
            '~' => {
                tokens.push(Token::Tilde);
                i += 1;
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::AmpAmp);
                    i += 2;
                } else {
                    tokens.push(Token::Amp);
                    i += 1;
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::PipePipe);
                    i += 2;
                } else {
                    tokens.push(Token::Pipe);
                    i += 1;
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    return Err(ParseError::UnexpectedChar('=', i));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Le);
                    i += 2;
                } else {
                    tokens.push(Token::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    tokens.push(Token::Ge);
                    i += 2;
                } else {
                    tokens.push(Token::Gt);
                    i += 1;
                }
            }
            _ if c.is_ascii_digit() => {
                let start = i;
                let value = if c == '0' && matches!(chars.get(i + 1).copied(), Some('x' | 'X')) {
                    i += 2;
                    let hex_start = i;
                    while i < chars.len() && chars[i].is_ascii_hexdigit() {
                        i += 1;
                    }
                    if i == hex_start {
                        return Err(ParseError::MalformedNumber(start));
                    }
                    let text: String = chars[hex_start..i].iter().collect();
                    i64::from_str_radix(&text, 16)
                        .map_err(|_| ParseError::MalformedNumber(start))?
                } else {
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                    let text: String = chars[start..i].iter().collect();
                    text.parse::<i64>()
                        .map_err(|_| ParseError::MalformedNumber(start))?
                };
                // a digit run directly followed by a symbol character (`0a`)
                // is not a valid literal
                if i < chars.len() && is_symbol_start(chars[i]) {
                    return Err(ParseError::MalformedNumber(start));
                }
                tokens.push(Token::Number(value));
            }
            _ if is_symbol_start(c) => {
                let start = i;
                i += 1;
                while i < chars.len() && is_symbol_char(chars[i]) {
                    i += 1;
                }
                // fold `.part` and `[n]` selects into the same symbol token
                loop {
                    if chars.get(i) == Some(&'.')
                        && chars.get(i + 1).copied().is_some_and(is_symbol_start)
                    {
                        i += 2;
                        while i < chars.len() && is_symbol_char(chars[i]) {
                            i += 1;
                        }
                    } else if chars.get(i) == Some(&'[') {
                        let select_start = i;
                        i += 1;
                        let digits_start = i;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                        if i == digits_start || chars.get(i) != Some(&']') {
                            return Err(ParseError::UnexpectedChar('[', select_start));
                        }
                        i += 1;
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Symbol(chars[start..i].iter().collect()));
            }
            _ => return Err(ParseError::UnexpectedChar(c, i)),
        }
    }
    Ok(tokens)
}

// ── AST ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Plus,
    Minus,
    Not,
    Invert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(i64),
    Symbol(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    /// Evaluate against a symbol lookup. Returns `None` if a symbol is
    /// missing from the lookup.
    fn eval(&self, lookup: &dyn Fn(&str) -> Option<i64>) -> Option<i64> {
        match self {
            Expr::Literal(v) => Some(*v),
            Expr::Symbol(name) => lookup(name),
            Expr::Unary { op, operand } => {
                let v = operand.eval(lookup)?;
                Some(match op {
                    UnaryOp::Plus => v,
                    UnaryOp::Minus => v.wrapping_neg(),
                    UnaryOp::Not => i64::from(v == 0),
                    UnaryOp::Invert => !v,
                })
            }
            Expr::Binary { op, lhs, rhs } => {
                // logical operators short-circuit
                match op {
                    BinaryOp::And => {
                        let l = lhs.eval(lookup)?;
                        if l == 0 {
                            return Some(0);
                        }
                        return Some(i64::from(rhs.eval(lookup)? != 0));
                    }
                    BinaryOp::Or => {
                        let l = lhs.eval(lookup)?;
                        if l != 0 {
                            return Some(1);
                        }
                        return Some(i64::from(rhs.eval(lookup)? != 0));
                    }
                    _ => {}
                }
                let l = lhs.eval(lookup)?;
                let r = rhs.eval(lookup)?;
                Some(match op {
                    BinaryOp::Add => l.wrapping_add(r),
                    BinaryOp::Sub => l.wrapping_sub(r),
                    BinaryOp::Mul => l.wrapping_mul(r),
                    // hardware predicates treat division by zero as 0
                    BinaryOp::Div => l.checked_div(r).unwrap_or(0),
                    BinaryOp::Mod => l.checked_rem(r).unwrap_or(0),
                    BinaryOp::BitAnd => l & r,
                    BinaryOp::BitOr => l | r,
                    BinaryOp::BitXor => l ^ r,
                    BinaryOp::Eq => i64::from(l == r),
                    BinaryOp::Ne => i64::from(l != r),
                    BinaryOp::Lt => i64::from(l < r),
                    BinaryOp::Le => i64::from(l <= r),
                    BinaryOp::Gt => i64::from(l > r),
                    BinaryOp::Ge => i64::from(l >= r),
                    BinaryOp::And | BinaryOp::Or => unreachable!(),
                })
            }
        }
    }
}

// ── Parser ────────────────────────────────────────────────────────────────────

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

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

    fn parse(mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_binary(0)?;
        if self.pos != self.tokens.len() {
            return Err(ParseError::TrailingInput);
        }
        Ok(expr)
    }

    /// Binding power of an infix operator, `None` for non-operators.
    fn binding_power(token: &Token) -> Option<(u8, BinaryOp)> {
        Some(match token {
            Token::PipePipe => (1, BinaryOp::Or),
            Token::AmpAmp => (2, BinaryOp::And),
            Token::Pipe => (3, BinaryOp::BitOr),
            Token::Caret => (4, BinaryOp::BitXor),
            Token::Amp => (5, BinaryOp::BitAnd),
            Token::EqEq => (6, BinaryOp::Eq),
            Token::NotEq => (6, BinaryOp::Ne),
            Token::Lt => (7, BinaryOp::Lt),
            Token::Le => (7, BinaryOp::Le),
            Token::Gt => (7, BinaryOp::Gt),
            Token::Ge => (7, BinaryOp::Ge),
            Token::Plus => (8, BinaryOp::Add),
            Token::Minus => (8, BinaryOp::Sub),
            Token::Star => (9, BinaryOp::Mul),
            Token::Slash => (9, BinaryOp::Div),
            Token::Percent => (9, BinaryOp::Mod),
            _ => return None,
        })
    }

    fn parse_binary(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_unary()?;
        while let Some(token) = self.peek() {
            let Some((bp, op)) = Self::binding_power(token) else {
                break;
            };
            if bp < min_bp {
                break;
            }
            self.advance();
            // left associative: the right side binds one level tighter
            let rhs = self.parse_binary(bp + 1)?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek() {
            Some(Token::Plus) => Some(UnaryOp::Plus),
            Some(Token::Minus) => Some(UnaryOp::Minus),
            Some(Token::Bang) => Some(UnaryOp::Not),
            Some(Token::Tilde) => Some(UnaryOp::Invert),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match self.advance() {
            Some(Token::Number(v)) => Ok(Expr::Literal(v)),
            Some(Token::Symbol(name)) => Ok(Expr::Symbol(name)),
            Some(Token::LParen) => {
                let inner = self.parse_binary(0)?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    Some(tok) => Err(ParseError::UnexpectedToken(format!("{tok:?}"))),
                    None => Err(ParseError::UnexpectedEnd),
                }
            }
            Some(tok) => Err(ParseError::UnexpectedToken(format!("{tok:?}"))),
            None => Err(ParseError::UnexpectedEnd),
        }
    }
}

// ── DebugExpression ───────────────────────────────────────────────────────────

/// A compiled breakpoint condition.
///
/// The constructor never fails; a parse failure leaves the expression in the
/// not-[`correct`](DebugExpression::correct) state, in which `eval` always
/// returns 0. Symbols can be pinned to compile-time constants
/// ([`set_static_values`](DebugExpression::set_static_values)); the rest are
/// "required" and must be bound to resolved RTL names before evaluation.
#[derive(Debug)]
pub struct DebugExpression {
    source: String,
    root: Option<Expr>,
    symbols: HashSet<String>,
    static_values: HashMap<String, i64>,
    resolved: HashMap<String, String>,
    correct: bool,
}

impl DebugExpression {
    pub fn new(source: impl Into<String>) -> Self {
        let source = source.into();
        let parsed = tokenize(&source).and_then(|tokens| Parser::new(tokens).parse());
        match parsed {
            Ok(root) => {
                let mut symbols = HashSet::new();
                collect_symbols(&root, &mut symbols);
                Self {
                    source,
                    root: Some(root),
                    symbols,
                    static_values: HashMap::new(),
                    resolved: HashMap::new(),
                    correct: true,
                }
            }
            Err(_) => Self {
                source,
                root: None,
                symbols: HashSet::new(),
                static_values: HashMap::new(),
                resolved: HashMap::new(),
                correct: false,
            },
        }
    }

    /// The original expression text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the expression parsed and all symbols resolved so far.
    pub fn correct(&self) -> bool {
        self.correct && self.root.is_some()
    }

    /// Mark the expression as permanently dead (e.g. unresolvable symbol).
    pub fn set_error(&mut self) {
        self.correct = false;
    }

    /// All symbol names referenced by the expression.
    pub fn symbols(&self) -> &HashSet<String> {
        &self.symbols
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Pin compile-time constants; pinned symbols are no longer required at
    /// runtime.
    pub fn set_static_values(&mut self, values: HashMap<String, i64>) {
        self.static_values = values;
    }

    /// Symbols that must be supplied at evaluation time.
    pub fn required_symbols(&self) -> HashSet<String> {
        self.symbols
            .iter()
            .filter(|name| !self.static_values.contains_key(*name))
            .cloned()
            .collect()
    }

    /// Bind a required symbol to its simulator-visible full name.
    pub fn set_resolved_symbol(&mut self, name: impl Into<String>, full_name: impl Into<String>) {
        self.resolved.insert(name.into(), full_name.into());
    }

    /// The symbol → full RTL name bindings established so far.
    pub fn resolved_symbols(&self) -> &HashMap<String, String> {
        &self.resolved
    }

    /// Evaluate with the given symbol values. Returns 0 when the expression
    /// is not correct or a required symbol is missing from the map.
    pub fn eval(&self, values: &HashMap<String, i64>) -> ExprValue {
        if !self.correct() {
            return 0;
        }
        let missing = self
            .required_symbols()
            .iter()
            .any(|name| !values.contains_key(name));
        if missing {
            return 0;
        }
        let lookup = |name: &str| -> Option<i64> {
            values
                .get(name)
                .or_else(|| self.static_values.get(name))
                .copied()
        };
        self.root
            .as_ref()
            .and_then(|root| root.eval(&lookup))
            .unwrap_or(0)
    }
}

fn collect_symbols(expr: &Expr, out: &mut HashSet<String>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Symbol(name) => {
            out.insert(name.clone());
        }
        Expr::Unary { operand, .. } => collect_symbols(operand, out),
        Expr::Binary { lhs, rhs, .. } => {
            collect_symbols(lhs, out);
            collect_symbols(rhs, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, i64)]) -> HashMap<String, i64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_scoped_symbols() {
        let expr = DebugExpression::new("a[0][0] + __x.$y");
        assert!(expr.correct());
        let mut symbols: Vec<_> = expr.symbols().iter().cloned().collect();
        symbols.sort();
        assert_eq!(symbols, vec!["__x.$y".to_string(), "a[0][0]".to_string()]);
    }

    #[test]
    fn test_leading_digit_symbol_fails() {
        let expr = DebugExpression::new("0a");
        assert!(!expr.correct());
        assert_eq!(expr.eval(&HashMap::new()), 0);
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        let expr = DebugExpression::new("1 + 2 * 3 - 4 % 3");
        assert_eq!(expr.eval(&HashMap::new()), 6);
        let expr = DebugExpression::new("(1 + 2) * 3");
        assert_eq!(expr.eval(&HashMap::new()), 9);
        let expr = DebugExpression::new("0x10 + 1");
        assert_eq!(expr.eval(&HashMap::new()), 17);
    }

    #[test]
    fn test_logical_and_comparison() {
        let expr = DebugExpression::new("a == 5 && b < 3");
        assert_eq!(expr.eval(&values(&[("a", 5), ("b", 2)])), 1);
        assert_eq!(expr.eval(&values(&[("a", 5), ("b", 4)])), 0);
        let expr = DebugExpression::new("!a || a >= 10");
        assert_eq!(expr.eval(&values(&[("a", 0)])), 1);
        assert_eq!(expr.eval(&values(&[("a", 3)])), 0);
    }

    #[test]
    fn test_bitwise() {
        let expr = DebugExpression::new("a & 0xff ^ b | 1");
        assert_eq!(expr.eval(&values(&[("a", 0x1f0), ("b", 2)])), (0xf0 ^ 2) | 1);
        let expr = DebugExpression::new("~0");
        assert_eq!(expr.eval(&HashMap::new()), -1);
    }

    #[test]
    fn test_division_by_zero_is_zero() {
        let expr = DebugExpression::new("1 / a + 1 % a");
        assert_eq!(expr.eval(&values(&[("a", 0)])), 0);
    }

    #[test]
    fn test_missing_symbol_returns_zero() {
        let expr = DebugExpression::new("a + b");
        assert_eq!(expr.eval(&values(&[("a", 1)])), 0);
    }

    #[test]
    fn test_static_values_fold() {
        let mut expr = DebugExpression::new("a + b");
        expr.set_static_values(values(&[("b", 10)]));
        let required = expr.required_symbols();
        assert!(required.contains("a"));
        assert!(!required.contains("b"));
        // same result as if the map carried the constant
        assert_eq!(expr.eval(&values(&[("a", 1)])), 11);
        assert_eq!(expr.eval(&values(&[("a", 1), ("b", 10)])), 11);
    }

    #[test]
    fn test_reserved_symbols() {
        let expr = DebugExpression::new("$time > 100 && $instance == 2");
        assert!(expr.symbols().contains(TIME_VAR_NAME));
        assert!(expr.symbols().contains(INSTANCE_VAR_NAME));
        assert_eq!(
            expr.eval(&values(&[("$time", 150), ("$instance", 2)])),
            1
        );
    }

    #[test]
    fn test_malformed_expressions() {
        for src in ["a +", "(a", "a ==", "= a", "a b", "a[x]", ""] {
            let expr = DebugExpression::new(src);
            assert!(!expr.correct(), "expected parse failure for `{src}`");
        }
    }

    #[test]
    fn test_set_error_kills_expression() {
        let mut expr = DebugExpression::new("a");
        assert!(expr.correct());
        expr.set_error();
        assert!(!expr.correct());
        assert_eq!(expr.eval(&values(&[("a", 1)])), 0);
    }
}
