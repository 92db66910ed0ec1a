//! Boolean condition expressions for post-command templates.
//!
//! Conditions like `multilingual == true` or `pageCount != 0 && theme ==
//! "dark"` gate whether a post-command template applies. They are parsed once
//! into a small AST and evaluated against a typed variable map; arbitrary
//! source is never evaluated as code.
//!
//! Supported syntax: variable paths (`a`, `settings.theme`), string/number/
//! boolean/null literals, `!`, `==`, `!=`, `&&`, `||`, and parentheses.
//! `===`/`!==` are accepted and normalized to `==`/`!=` since existing
//! admin-console documents use the strict spellings. Ordering comparisons
//! (`<`, `>`, `<=`, `>=`) are rejected with a dedicated error.

use serde_json::{Map, Number, Value};
use thiserror::Error;

/// Errors from parsing a condition expression.
#[derive(Debug, Error, PartialEq)]
pub enum ConditionError {
    #[error("unexpected character '{ch}' at position {position}")]
    UnexpectedChar { ch: char, position: usize },
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unsupported operator '{0}'; only ==, !=, &&, || and ! are supported")]
    UnsupportedOperator(String),
    #[error("unexpected token '{0}'")]
    UnexpectedToken(String),
    #[error("expression ended unexpectedly")]
    UnexpectedEnd,
    #[error("unexpected trailing input '{0}'")]
    TrailingInput(String),
    #[error("expression cannot be empty")]
    Empty,
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
}

/// A parsed condition expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionExpr {
    Literal(Value),
    /// Dotted variable path resolved against the variable map.
    Var(String),
    Not(Box<ConditionExpr>),
    Cmp {
        op: CmpOp,
        lhs: Box<ConditionExpr>,
        rhs: Box<ConditionExpr>,
    },
    And(Box<ConditionExpr>, Box<ConditionExpr>),
    Or(Box<ConditionExpr>, Box<ConditionExpr>),
}

impl ConditionExpr {
    /// Parse an expression. The whole input must be consumed.
    pub fn parse(input: &str) -> Result<Self, ConditionError> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(ConditionError::Empty);
        }
        let mut parser = Parser { tokens, position: 0 };
        let expr = parser.parse_or()?;
        if let Some(token) = parser.peek() {
            return Err(ConditionError::TrailingInput(token.describe()));
        }
        Ok(expr)
    }

    /// Evaluate to a boolean against a variable map.
    ///
    /// Unknown variables resolve to `null`, which is falsy, so a condition
    /// over a parameter the user never supplied simply does not match.
    pub fn eval(&self, vars: &Map<String, Value>) -> bool {
        truthy(&self.resolve(vars))
    }

    fn resolve(&self, vars: &Map<String, Value>) -> Value {
        match self {
            ConditionExpr::Literal(value) => value.clone(),
            ConditionExpr::Var(path) => lookup_path(vars, path).unwrap_or(Value::Null),
            ConditionExpr::Not(inner) => Value::Bool(!inner.eval(vars)),
            ConditionExpr::Cmp { op, lhs, rhs } => {
                let equal = loose_eq(&lhs.resolve(vars), &rhs.resolve(vars));
                Value::Bool(match op {
                    CmpOp::Eq => equal,
                    CmpOp::Ne => !equal,
                })
            }
            ConditionExpr::And(lhs, rhs) => Value::Bool(lhs.eval(vars) && rhs.eval(vars)),
            ConditionExpr::Or(lhs, rhs) => Value::Bool(lhs.eval(vars) || rhs.eval(vars)),
        }
    }
}

/// Resolve a dotted path (`settings.theme`) against a variable map.
pub(crate) fn lookup_path(vars: &Map<String, Value>, path: &str) -> Option<Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = vars.get(first)?;
    for segment in segments {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

/// Truthiness mirrors how the admin console treats form values: the strings
/// `""` and `"false"` are falsy because checkbox state arrives as text.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty() && s != "false",
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Loose equality: same-type values compare structurally; mixed types
/// compare by canonical string form, so `"true" == true` and `1 == "1"`.
fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (a, b) if std::mem::discriminant(a) == std::mem::discriminant(b) => a == b,
        _ => canonical(a) == canonical(b),
    }
}

pub(crate) fn canonical(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Literal(Value),
    Bang,
    Cmp(CmpOp),
    And,
    Or,
    LParen,
    RParen,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Token::Ident(name) => name.clone(),
            Token::Literal(value) => value.to_string(),
            Token::Bang => "!".into(),
            Token::Cmp(CmpOp::Eq) => "==".into(),
            Token::Cmp(CmpOp::Ne) => "!=".into(),
            Token::And => "&&".into(),
            Token::Or => "||".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ConditionError> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];
        match ch {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '=' => {
                let run = count_run(&chars, i, '=');
                if run < 2 || run > 3 {
                    return Err(ConditionError::UnsupportedOperator("=".repeat(run)));
                }
                tokens.push(Token::Cmp(CmpOp::Eq));
                i += run;
            }
            '!' => {
                let run = count_run(&chars[i + 1..], 0, '=');
                if run >= 1 {
                    // != or !==
                    if run > 2 {
                        return Err(ConditionError::UnsupportedOperator(format!("!{}", "=".repeat(run))));
                    }
                    tokens.push(Token::Cmp(CmpOp::Ne));
                    i += 1 + run;
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '&' => {
                if chars.get(i + 1) == Some(&'&') {
                    tokens.push(Token::And);
                    i += 2;
                } else {
                    return Err(ConditionError::UnsupportedOperator("&".into()));
                }
            }
            '|' => {
                if chars.get(i + 1) == Some(&'|') {
                    tokens.push(Token::Or);
                    i += 2;
                } else {
                    return Err(ConditionError::UnsupportedOperator("|".into()));
                }
            }
            '<' | '>' => {
                return Err(ConditionError::UnsupportedOperator(ch.to_string()));
            }
            '"' | '\'' => {
                let (literal, consumed) = read_string(&chars[i..], ch)?;
                tokens.push(Token::Literal(Value::String(literal)));
                i += consumed;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).map(|n| n.is_ascii_digit()).unwrap_or(false)) => {
                let (number, consumed) = read_number(&chars[i..]);
                tokens.push(Token::Literal(number));
                i += consumed;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let (word, consumed) = read_word(&chars[i..]);
                tokens.push(match word.as_str() {
                    "true" => Token::Literal(Value::Bool(true)),
                    "false" => Token::Literal(Value::Bool(false)),
                    "null" => Token::Literal(Value::Null),
                    _ => Token::Ident(word),
                });
                i += consumed;
            }
            other => {
                return Err(ConditionError::UnexpectedChar { ch: other, position: i });
            }
        }
    }

    Ok(tokens)
}

fn count_run(chars: &[char], start: usize, target: char) -> usize {
    chars[start..].iter().take_while(|&&c| c == target).count()
}

fn read_string(chars: &[char], quote: char) -> Result<(String, usize), ConditionError> {
    let mut literal = String::new();
    let mut i = 1;
    while i < chars.len() {
        if chars[i] == quote {
            return Ok((literal, i + 1));
        }
        literal.push(chars[i]);
        i += 1;
    }
    Err(ConditionError::UnterminatedString)
}

fn read_number(chars: &[char]) -> (Value, usize) {
    let mut text = String::new();
    let mut i = 0;
    if chars[0] == '-' {
        text.push('-');
        i = 1;
    }
    while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
        text.push(chars[i]);
        i += 1;
    }
    let number = text
        .parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null);
    (number, i)
}

fn read_word(chars: &[char]) -> (String, usize) {
    let mut word = String::new();
    let mut i = 0;
    while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
        word.push(chars[i]);
        i += 1;
    }
    (word, i)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn parse_or(&mut self) -> Result<ConditionExpr, ConditionError> {
        let mut expr = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            let rhs = self.parse_and()?;
            expr = ConditionExpr::Or(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<ConditionExpr, ConditionError> {
        let mut expr = self.parse_comparison()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            let rhs = self.parse_comparison()?;
            expr = ConditionExpr::And(Box::new(expr), Box::new(rhs));
        }
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<ConditionExpr, ConditionError> {
        let lhs = self.parse_unary()?;
        if let Some(Token::Cmp(op)) = self.peek().cloned() {
            self.advance();
            let rhs = self.parse_unary()?;
            return Ok(ConditionExpr::Cmp {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            });
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<ConditionExpr, ConditionError> {
        if self.peek() == Some(&Token::Bang) {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(ConditionExpr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<ConditionExpr, ConditionError> {
        match self.advance() {
            Some(Token::Literal(value)) => Ok(ConditionExpr::Literal(value)),
            Some(Token::Ident(name)) => Ok(ConditionExpr::Var(name)),
            Some(Token::LParen) => {
                let expr = self.parse_or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(expr),
                    Some(token) => Err(ConditionError::UnexpectedToken(token.describe())),
                    None => Err(ConditionError::UnexpectedEnd),
                }
            }
            Some(token) => Err(ConditionError::UnexpectedToken(token.describe())),
            None => Err(ConditionError::UnexpectedEnd),
        }
    }
}
