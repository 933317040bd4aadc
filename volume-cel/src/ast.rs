// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }

    pub(crate) fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 2,
            BinaryOp::And => 3,
            BinaryOp::Eq
            | BinaryOp::Ne
            | BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::In => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 6,
        }
    }
}

/// Parsed expression tree; also the persisted checked form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Select {
        operand: Box<Expr>,
        field: String,
    },
    Index {
        operand: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        target: Option<Box<Expr>>,
        function: String,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    List(Vec<Expr>),
}

const PREC_CONDITIONAL: u8 = 1;
const PREC_UNARY: u8 = 7;
const PREC_MEMBER: u8 = 8;

impl Expr {
    fn precedence(&self) -> u8 {
        match self {
            Expr::Conditional { .. } => PREC_CONDITIONAL,
            Expr::Binary { op, .. } => op.precedence(),
            Expr::Unary { .. } => PREC_UNARY,
            Expr::Literal(Value::Int(i)) if *i < 0 => PREC_UNARY,
            Expr::Literal(Value::Double(d)) if d.is_sign_negative() => PREC_UNARY,
            _ => PREC_MEMBER,
        }
    }

    fn fmt_at(&self, f: &mut fmt::Formatter<'_>, min: u8) -> fmt::Result {
        if self.precedence() < min {
            write!(f, "(")?;
            self.fmt_at(f, 0)?;
            return write!(f, ")");
        }

        match self {
            Expr::Literal(value) => fmt_literal(value, f),
            Expr::Ident(name) => f.write_str(name),
            Expr::Select { operand, field } => {
                operand.fmt_at(f, PREC_MEMBER)?;
                write!(f, ".{field}")
            }
            Expr::Index { operand, index } => {
                operand.fmt_at(f, PREC_MEMBER)?;
                write!(f, "[")?;
                index.fmt_at(f, 0)?;
                write!(f, "]")
            }
            Expr::Call {
                target,
                function,
                args,
            } => {
                if let Some(target) = target {
                    target.fmt_at(f, PREC_MEMBER)?;
                    write!(f, ".")?;
                }
                write!(f, "{function}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    arg.fmt_at(f, 0)?;
                }
                write!(f, ")")
            }
            Expr::Unary { op, operand } => {
                f.write_str(match op {
                    UnaryOp::Not => "!",
                    UnaryOp::Neg => "-",
                })?;
                operand.fmt_at(f, PREC_UNARY)
            }
            Expr::Binary { op, lhs, rhs } => {
                let prec = op.precedence();
                lhs.fmt_at(f, prec)?;
                write!(f, " {} ", op.symbol())?;
                rhs.fmt_at(f, prec + 1)
            }
            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => {
                cond.fmt_at(f, PREC_CONDITIONAL + 1)?;
                write!(f, " ? ")?;
                then.fmt_at(f, PREC_CONDITIONAL + 1)?;
                write!(f, " : ")?;
                otherwise.fmt_at(f, PREC_CONDITIONAL)
            }
            Expr::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.fmt_at(f, 0)?;
                }
                write!(f, "]")
            }
        }
    }
}

fn fmt_literal(value: &Value, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match value {
        Value::Null => f.write_str("null"),
        Value::Bool(b) => write!(f, "{b}"),
        Value::Int(i) => write!(f, "{i}"),
        Value::Uint(u) => write!(f, "{u}u"),
        Value::Double(d) => write!(f, "{d:?}"),
        Value::String(s) => {
            f.write_str("\"")?;
            for c in s.chars() {
                match c {
                    '"' => f.write_str("\\\"")?,
                    '\\' => f.write_str("\\\\")?,
                    '\n' => f.write_str("\\n")?,
                    '\r' => f.write_str("\\r")?,
                    '\t' => f.write_str("\\t")?,
                    '\0' => f.write_str("\\0")?,
                    c => write!(f, "{c}")?,
                }
            }
            f.write_str("\"")
        }
        Value::List(items) => {
            write!(f, "[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                fmt_literal(item, f)?;
            }
            write!(f, "]")
        }
        // Record literals are never produced by the parser.
        Value::Record(_) => f.write_str("null"),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_at(f, 0)
    }
}
