//! Boolean selection expressions over container columns, e.g.
//! `(reco_energy >= 5) & ~(pid < 0.5) | true_coszen < -0.8`.

use super::container::{Container, ContainerError};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Clone)]
pub enum CutError {
    #[error("Unexpected character '{ch}' at position {pos} in cut expression")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("Unexpected token {found} in cut expression, expected {expected}")]
    UnexpectedToken { found: String, expected: &'static str },
    #[error("Invalid number '{0}' in cut expression")]
    InvalidNumber(String),
    #[error("Cut refers to unknown variable '{variable}' in container '{container}'")]
    UnknownVariable { variable: String, container: String },
    #[error("Container error while applying cut: {0}")]
    Container(#[from] ContainerError),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(f64),
    Op(CompareOp),
    And,
    Or,
    Not,
    Minus,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "'{s}'"),
            Token::Number(n) => write!(f, "'{n}'"),
            Token::Op(op) => write!(f, "'{op}'"),
            Token::And => f.write_str("'&'"),
            Token::Or => f.write_str("'|'"),
            Token::Not => f.write_str("'~'"),
            Token::Minus => f.write_str("'-'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    fn apply(self, a: f64, b: f64) -> bool {
        match self {
            CompareOp::Lt => a < b,
            CompareOp::Le => a <= b,
            CompareOp::Gt => a > b,
            CompareOp::Ge => a >= b,
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Variable(String),
    Number(f64),
    Negate(Box<Operand>),
}

impl Operand {
    fn value(&self, columns: &[(&str, &[f64])], event: usize) -> f64 {
        match self {
            Operand::Number(n) => *n,
            Operand::Negate(inner) => -inner.value(columns, event),
            Operand::Variable(name) => columns
                .iter()
                .find(|(n, _)| *n == name.as_str())
                .map_or(f64::NAN, |(_, data)| data[event]),
        }
    }

    fn collect_variables<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Operand::Variable(name) => {
                out.insert(name);
            }
            Operand::Negate(inner) => inner.collect_variables(out),
            Operand::Number(_) => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Or(Vec<Expr>),
    And(Vec<Expr>),
    Not(Box<Expr>),
    Compare {
        lhs: Operand,
        op: CompareOp,
        rhs: Operand,
    },
}

impl Expr {
    fn evaluate(&self, columns: &[(&str, &[f64])], event: usize) -> bool {
        match self {
            Expr::Or(terms) => terms.iter().any(|t| t.evaluate(columns, event)),
            Expr::And(factors) => factors.iter().all(|f| f.evaluate(columns, event)),
            Expr::Not(inner) => !inner.evaluate(columns, event),
            Expr::Compare { lhs, op, rhs } => {
                op.apply(lhs.value(columns, event), rhs.value(columns, event))
            }
        }
    }

    fn collect_variables<'a>(&'a self, out: &mut BTreeSet<&'a str>) {
        match self {
            Expr::Or(items) | Expr::And(items) => {
                items.iter().for_each(|i| i.collect_variables(out))
            }
            Expr::Not(inner) => inner.collect_variables(out),
            Expr::Compare { lhs, rhs, .. } => {
                lhs.collect_variables(out);
                rhs.collect_variables(out);
            }
        }
    }
}

/// A parsed selection expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Cut {
    source: String,
    expr: Expr,
}

impl Cut {
    pub fn parse(source: &str) -> Result<Self, CutError> {
        let tokens = tokenize(source)?;
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        if let Some(tok) = parser.peek() {
            return Err(CutError::UnexpectedToken {
                found: tok.to_string(),
                expected: "end of expression",
            });
        }
        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn variables(&self) -> Vec<&str> {
        let mut out = BTreeSet::new();
        self.expr.collect_variables(&mut out);
        out.into_iter().collect()
    }

    /// Returns the per-event selection mask for `container`.
    pub fn evaluate(&self, container: &Container) -> Result<Vec<bool>, CutError> {
        let mut columns = Vec::new();
        for var in self.variables() {
            if !container.contains(var) {
                return Err(CutError::UnknownVariable {
                    variable: var.to_string(),
                    container: container.name.clone(),
                });
            }
            columns.push((var, container.column(var)?));
        }
        Ok((0..container.size())
            .map(|event| self.expr.evaluate(&columns, event))
            .collect())
    }
}

fn tokenize(source: &str) -> Result<Vec<Token>, CutError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
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
            '&' => {
                tokens.push(Token::And);
                i += if chars.get(i + 1) == Some(&'&') { 2 } else { 1 };
            }
            '|' => {
                tokens.push(Token::Or);
                i += if chars.get(i + 1) == Some(&'|') { 2 } else { 1 };
            }
            '~' => {
                tokens.push(Token::Not);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '<' | '>' | '=' | '!' => {
                let followed_by_eq = chars.get(i + 1) == Some(&'=');
                let op = match (ch, followed_by_eq) {
                    ('<', false) => CompareOp::Lt,
                    ('<', true) => CompareOp::Le,
                    ('>', false) => CompareOp::Gt,
                    ('>', true) => CompareOp::Ge,
                    ('=', true) => CompareOp::Eq,
                    ('!', true) => CompareOp::Ne,
                    _ => return Err(CutError::UnexpectedChar { ch, pos: i }),
                };
                tokens.push(Token::Op(op));
                i += if followed_by_eq { 2 } else { 1 };
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() {
                    let c = chars[i];
                    let exponent_sign = (c == '+' || c == '-')
                        && matches!(chars.get(i.wrapping_sub(1)), Some('e') | Some('E'));
                    if c.is_ascii_digit() || c == '.' || c == 'e' || c == 'E' || exponent_sign {
                        i += 1;
                    } else {
                        break;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse::<f64>()
                    .map_err(|_| CutError::InvalidNumber(text.clone()))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => return Err(CutError::UnexpectedChar { ch, pos: i }),
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

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn unexpected(found: Option<Token>, expected: &'static str) -> CutError {
        CutError::UnexpectedToken {
            found: found.map_or_else(|| "end of expression".to_string(), |t| t.to_string()),
            expected,
        }
    }

    fn expr(&mut self) -> Result<Expr, CutError> {
        let mut terms = vec![self.term()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            terms.push(self.term()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::Or(terms)
        })
    }

    fn term(&mut self) -> Result<Expr, CutError> {
        let mut factors = vec![self.factor()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            factors.push(self.factor()?);
        }
        Ok(if factors.len() == 1 {
            factors.remove(0)
        } else {
            Expr::And(factors)
        })
    }

    fn factor(&mut self) -> Result<Expr, CutError> {
        match self.peek() {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.factor()?)))
            }
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    other => Err(Self::unexpected(other, "')'")),
                }
            }
            _ => self.comparison(),
        }
    }

    fn comparison(&mut self) -> Result<Expr, CutError> {
        let lhs = self.operand()?;
        let op = match self.next() {
            Some(Token::Op(op)) => op,
            other => return Err(Self::unexpected(other, "a comparison operator")),
        };
        let rhs = self.operand()?;
        Ok(Expr::Compare { lhs, op, rhs })
    }

    fn operand(&mut self) -> Result<Operand, CutError> {
        match self.next() {
            Some(Token::Ident(name)) => Ok(Operand::Variable(name)),
            Some(Token::Number(n)) => Ok(Operand::Number(n)),
            Some(Token::Minus) => Ok(Operand::Negate(Box::new(self.operand()?))),
            other => Err(Self::unexpected(other, "a variable or number")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::container::Field;

    fn events() -> Container {
        let mut c = Container::new("numu_cc", 4);
        c.insert("reco_energy", Field::column(vec![1.0, 5.0, 10.0, 50.0]))
            .unwrap();
        c.insert("reco_coszen", Field::column(vec![-0.9, 0.2, -0.1, 0.5]))
            .unwrap();
        c
    }

    #[test]
    fn conjunction_and_disjunction_follow_precedence() {
        let cut = Cut::parse("reco_energy >= 5 & reco_coszen < 0 | reco_energy < 2").unwrap();
        assert_eq!(cut.evaluate(&events()).unwrap(), vec![true, false, true, false]);
    }

    #[test]
    fn negation_and_parentheses() {
        let cut = Cut::parse("~(reco_energy > 5) & (reco_coszen > -1e0)").unwrap();
        assert_eq!(cut.evaluate(&events()).unwrap(), vec![true, true, false, false]);
    }

    #[test]
    fn negative_literals_parse() {
        let cut = Cut::parse("reco_coszen <= -0.1").unwrap();
        assert_eq!(cut.evaluate(&events()).unwrap(), vec![true, false, true, false]);
    }

    #[test]
    fn variables_are_listed_once() {
        let cut = Cut::parse("(a < 1) | (b > a) & (a != 3)").unwrap();
        assert_eq!(cut.variables(), vec!["a", "b"]);
    }

    #[test]
    fn unknown_variable_is_an_error() {
        let cut = Cut::parse("pid > 0.5").unwrap();
        assert!(matches!(
            cut.evaluate(&events()),
            Err(CutError::UnknownVariable { .. })
        ));
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        assert!(Cut::parse("reco_energy >").is_err());
        assert!(Cut::parse("(reco_energy > 1").is_err());
        assert!(Cut::parse("reco_energy = 1").is_err());
        assert!(Cut::parse("reco_energy > 1 $").is_err());
    }
}
