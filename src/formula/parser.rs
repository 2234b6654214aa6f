use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::EvaluationError;
use crate::formula::lexer::{tokenize, Spanned, Token};
use crate::formula::FormulaLimits;

/// Evaluation tree for the restricted formula grammar.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(f64),
    Field(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Function {
    Min,
    Max,
    If,
    Abs,
    Round,
    And,
    Or,
    Not,
}

impl Function {
    pub const ALL: [Function; 8] = [
        Function::Min,
        Function::Max,
        Function::If,
        Function::Abs,
        Function::Round,
        Function::And,
        Function::Or,
        Function::Not,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Min => "min",
            Self::Max => "max",
            Self::If => "if",
            Self::Abs => "abs",
            Self::Round => "round",
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.name().eq_ignore_ascii_case(name))
    }

    fn check_arity(self, found: usize) -> Result<(), EvaluationError> {
        let (ok, expected) = match self {
            Self::Min | Self::Max | Self::And | Self::Or => (found >= 1, "at least 1"),
            Self::If => (found == 3, "3"),
            Self::Abs | Self::Not => (found == 1, "1"),
            Self::Round => ((1..=2).contains(&found), "1 or 2"),
        };
        if ok {
            Ok(())
        } else {
            Err(EvaluationError::Arity {
                function: self.name(),
                expected,
                found,
            })
        }
    }
}

impl Display for Function {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

pub fn parse(source: &str, limits: &FormulaLimits) -> Result<Expr, EvaluationError> {
    let length = source.chars().count();
    if length > limits.max_length {
        return Err(EvaluationError::TooLong {
            length,
            max: limits.max_length,
        });
    }
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(EvaluationError::Empty);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        max_depth: limits.max_depth,
        end_offset: source.len(),
    };
    let expr = parser.expression()?;
    if let Some(extra) = parser.peek() {
        return Err(EvaluationError::syntax(
            extra.offset,
            format!("unexpected {} after end of expression", extra.token.describe()),
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    max_depth: usize,
    end_offset: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn peek_token(&self) -> Option<&Token> {
        self.peek().map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let next = self.tokens.get(self.pos).cloned();
        if next.is_some() {
            self.pos += 1;
        }
        next
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek_token() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), EvaluationError> {
        match self.advance() {
            Some(found) if found.token == token => Ok(()),
            Some(found) => Err(EvaluationError::syntax(
                found.offset,
                format!("expected {}, found {}", token.describe(), found.token.describe()),
            )),
            None => Err(EvaluationError::syntax(
                self.end_offset,
                format!("expected {}, found end of formula", token.describe()),
            )),
        }
    }

    fn enter(&mut self) -> Result<(), EvaluationError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(EvaluationError::TooDeep {
                max: self.max_depth,
            });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn expression(&mut self) -> Result<Expr, EvaluationError> {
        self.enter()?;
        let expr = self.comparison();
        self.leave();
        expr
    }

    fn comparison(&mut self) -> Result<Expr, EvaluationError> {
        let lhs = self.additive()?;
        let op = match self.peek_token() {
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        let rhs = self.additive()?;
        Ok(binary(op, lhs, rhs))
    }

    fn additive(&mut self) -> Result<Expr, EvaluationError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn term(&mut self) -> Result<Expr, EvaluationError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek_token() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, EvaluationError> {
        if self.eat(&Token::Minus) {
            self.enter()?;
            let operand = self.unary();
            self.leave();
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand?),
            });
        }
        if self.eat(&Token::Plus) {
            self.enter()?;
            let operand = self.unary();
            self.leave();
            return operand;
        }
        self.postfix()
    }

    fn postfix(&mut self) -> Result<Expr, EvaluationError> {
        let mut expr = self.primary()?;
        while self.eat(&Token::Percent) {
            expr = Expr::Unary {
                op: UnaryOp::Percent,
                operand: Box::new(expr),
            };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, EvaluationError> {
        let Some(next) = self.advance() else {
            return Err(EvaluationError::syntax(
                self.end_offset,
                "unexpected end of formula",
            ));
        };
        match next.token {
            Token::Number(value) => Ok(Expr::Literal(value)),
            Token::Field(name) => Ok(Expr::Field(name)),
            Token::Ident(name) => {
                if self.peek_token() == Some(&Token::LParen) {
                    let function = Function::from_name(&name)
                        .ok_or_else(|| EvaluationError::UnknownFunction(name.clone()))?;
                    self.call(function)
                } else {
                    Ok(Expr::Field(name))
                }
            }
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            other => Err(EvaluationError::syntax(
                next.offset,
                format!("unexpected {}", other.describe()),
            )),
        }
    }

    fn call(&mut self, function: Function) -> Result<Expr, EvaluationError> {
        self.expect(Token::LParen)?;
        let mut args = Vec::new();
        if !self.eat(&Token::RParen) {
            loop {
                args.push(self.expression()?);
                if self.eat(&Token::Comma) {
                    continue;
                }
                self.expect(Token::RParen)?;
                break;
            }
        }
        function.check_arity(args.len())?;
        Ok(Expr::Call { function, args })
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}
