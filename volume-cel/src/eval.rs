// SPDX-License-Identifier: GPL-3.0-only

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::env::Env;
use crate::error::{CelError, Result};
use crate::value::Value;

/// Variable bindings for one evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Activation {
    bindings: BTreeMap<String, Value>,
}

impl Activation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a binding, consuming and returning the activation.
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.bindings.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }
}

pub(crate) fn evaluate(expr: &Expr, env: &Env, activation: &Activation) -> Result<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(name) => activation
            .get(name)
            .or_else(|| env.constant(name))
            .cloned()
            .ok_or_else(|| CelError::eval(format!("no such attribute '{name}'"))),
        Expr::Select { operand, field } => match evaluate(operand, env, activation)? {
            Value::Record(mut fields) => fields
                .remove(field)
                .ok_or_else(|| CelError::eval(format!("no such key: {field}"))),
            other => Err(CelError::eval(format!(
                "cannot select '{field}' from {}",
                other.kind_name()
            ))),
        },
        Expr::Index { operand, index } => {
            let operand = evaluate(operand, env, activation)?;
            let index = evaluate(index, env, activation)?;
            match (operand, index) {
                (Value::List(mut items), Value::Int(i)) => usize::try_from(i)
                    .ok()
                    .filter(|i| *i < items.len())
                    .map(|i| items.swap_remove(i))
                    .ok_or_else(|| CelError::eval(format!("index {i} out of range"))),
                (Value::List(mut items), Value::Uint(i)) => usize::try_from(i)
                    .ok()
                    .filter(|i| *i < items.len())
                    .map(|i| items.swap_remove(i))
                    .ok_or_else(|| CelError::eval(format!("index {i} out of range"))),
                (Value::Record(mut fields), Value::String(key)) => fields
                    .remove(&key)
                    .ok_or_else(|| CelError::eval(format!("no such key: {key}"))),
                (operand, index) => Err(CelError::eval(format!(
                    "cannot index {} with {}",
                    operand.kind_name(),
                    index.kind_name()
                ))),
            }
        }
        Expr::Unary { op, operand } => {
            let value = evaluate(operand, env, activation)?;
            match (op, value) {
                (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (UnaryOp::Neg, Value::Int(i)) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| CelError::eval("integer overflow")),
                (UnaryOp::Neg, Value::Double(d)) => Ok(Value::Double(-d)),
                (op, value) => Err(CelError::eval(format!(
                    "no matching overload for {op:?} on {}",
                    value.kind_name()
                ))),
            }
        }
        Expr::Binary { op, lhs, rhs } => match op {
            BinaryOp::And => logical(lhs, rhs, env, activation, false),
            BinaryOp::Or => logical(lhs, rhs, env, activation, true),
            _ => {
                let lhs = evaluate(lhs, env, activation)?;
                let rhs = evaluate(rhs, env, activation)?;
                binary(*op, lhs, rhs)
            }
        },
        Expr::Conditional {
            cond,
            then,
            otherwise,
        } => match evaluate(cond, env, activation)? {
            Value::Bool(true) => evaluate(then, env, activation),
            Value::Bool(false) => evaluate(otherwise, env, activation),
            other => Err(CelError::eval(format!(
                "conditional requires bool, got {}",
                other.kind_name()
            ))),
        },
        Expr::List(items) => items
            .iter()
            .map(|item| evaluate(item, env, activation))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        Expr::Call {
            target,
            function,
            args,
        } => {
            let target = target
                .as_deref()
                .map(|t| evaluate(t, env, activation))
                .transpose()?;
            let args = args
                .iter()
                .map(|arg| evaluate(arg, env, activation))
                .collect::<Result<Vec<_>>>()?;
            call(env, target, function, args)
        }
    }
}

/// `&&` and `||` with error absorption: a decisive operand on either side
/// wins over an error on the other.
fn logical(
    lhs: &Expr,
    rhs: &Expr,
    env: &Env,
    activation: &Activation,
    decisive: bool,
) -> Result<Value> {
    let left = evaluate(lhs, env, activation).and_then(expect_bool);
    if let Ok(value) = left
        && value == decisive
    {
        return Ok(Value::Bool(decisive));
    }

    let right = evaluate(rhs, env, activation).and_then(expect_bool);
    match (left, right) {
        (_, Ok(value)) if value == decisive => Ok(Value::Bool(decisive)),
        (Err(err), _) | (_, Err(err)) => Err(err),
        (Ok(_), Ok(_)) => Ok(Value::Bool(!decisive)),
    }
}

fn expect_bool(value: Value) -> Result<bool> {
    value.as_bool().ok_or_else(|| {
        CelError::eval(format!("expected bool operand, got {}", value.kind_name()))
    })
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(lhs.cel_equals(&rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!lhs.cel_equals(&rhs))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = lhs.cel_compare(&rhs).ok_or_else(|| {
                CelError::eval(format!(
                    "cannot compare {} with {}",
                    lhs.kind_name(),
                    rhs.kind_name()
                ))
            })?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::In => match rhs {
            Value::List(items) => Ok(Value::Bool(items.iter().any(|item| lhs.cel_equals(item)))),
            Value::Record(fields) => match lhs {
                Value::String(key) => Ok(Value::Bool(fields.contains_key(&key))),
                other => Err(CelError::eval(format!(
                    "record keys are strings, got {}",
                    other.kind_name()
                ))),
            },
            other => Err(CelError::eval(format!(
                "'in' requires a list, got {}",
                other.kind_name()
            ))),
        },
        BinaryOp::Add => match (lhs, rhs) {
            (Value::String(mut a), Value::String(b)) => {
                a.push_str(&b);
                Ok(Value::String(a))
            }
            (Value::List(mut a), Value::List(b)) => {
                a.extend(b);
                Ok(Value::List(a))
            }
            (lhs, rhs) => arithmetic(op, lhs, rhs),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, lhs, rhs)
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("logical operators short-circuit"),
    }
}

fn arithmetic(op: BinaryOp, lhs: Value, rhs: Value) -> Result<Value> {
    let overflow = || CelError::eval("integer overflow");
    let zero = || CelError::eval("division by zero");

    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => match op {
            BinaryOp::Add => a.checked_add(b).ok_or_else(overflow),
            BinaryOp::Sub => a.checked_sub(b).ok_or_else(overflow),
            BinaryOp::Mul => a.checked_mul(b).ok_or_else(overflow),
            BinaryOp::Div if b == 0 => Err(zero()),
            BinaryOp::Div => a.checked_div(b).ok_or_else(overflow),
            BinaryOp::Rem if b == 0 => Err(zero()),
            _ => a.checked_rem(b).ok_or_else(overflow),
        }
        .map(Value::Int),
        (Value::Uint(a), Value::Uint(b)) => match op {
            BinaryOp::Add => a.checked_add(b).ok_or_else(overflow),
            BinaryOp::Sub => a.checked_sub(b).ok_or_else(overflow),
            BinaryOp::Mul => a.checked_mul(b).ok_or_else(overflow),
            BinaryOp::Div | BinaryOp::Rem if b == 0 => Err(zero()),
            BinaryOp::Div => Ok(a / b),
            _ => Ok(a % b),
        }
        .map(Value::Uint),
        (Value::Double(a), Value::Double(b)) => match op {
            BinaryOp::Add => Ok(Value::Double(a + b)),
            BinaryOp::Sub => Ok(Value::Double(a - b)),
            BinaryOp::Mul => Ok(Value::Double(a * b)),
            BinaryOp::Div => Ok(Value::Double(a / b)),
            _ => Err(CelError::eval("no matching overload for double modulo")),
        },
        (lhs, rhs) => Err(CelError::eval(format!(
            "no matching overload for {} {op:?} {}",
            lhs.kind_name(),
            rhs.kind_name()
        ))),
    }
}

fn call(env: &Env, target: Option<Value>, function: &str, args: Vec<Value>) -> Result<Value> {
    let bad_args = || CelError::eval(format!("no matching overload for '{function}'"));

    match (target, function) {
        (target, "size") => {
            let subject = match (target, args.as_slice()) {
                (Some(t), []) => t,
                (None, [t]) => t.clone(),
                _ => return Err(bad_args()),
            };
            let len = match subject {
                Value::String(s) => s.chars().count(),
                Value::List(items) => items.len(),
                _ => return Err(bad_args()),
            };
            i64::try_from(len)
                .map(Value::Int)
                .map_err(|_| CelError::eval("size overflow"))
        }
        (None, "int") => match single(args).ok_or_else(bad_args)? {
            Value::Int(i) => Ok(Value::Int(i)),
            Value::Uint(u) => i64::try_from(u)
                .map(Value::Int)
                .map_err(|_| CelError::eval("int range error")),
            Value::Double(d) if d.is_finite() && d >= i64::MIN as f64 && d < i64::MAX as f64 => {
                Ok(Value::Int(d.trunc() as i64))
            }
            Value::String(s) => s
                .parse()
                .map(Value::Int)
                .map_err(|_| CelError::eval(format!("cannot convert {s:?} to int"))),
            _ => Err(CelError::eval("int range error")),
        },
        (None, "uint") => match single(args).ok_or_else(bad_args)? {
            Value::Uint(u) => Ok(Value::Uint(u)),
            Value::Int(i) => u64::try_from(i)
                .map(Value::Uint)
                .map_err(|_| CelError::eval("uint range error")),
            Value::Double(d) if d.is_finite() && d >= 0.0 && d < u64::MAX as f64 => {
                Ok(Value::Uint(d.trunc() as u64))
            }
            Value::String(s) => s
                .parse()
                .map(Value::Uint)
                .map_err(|_| CelError::eval(format!("cannot convert {s:?} to uint"))),
            _ => Err(CelError::eval("uint range error")),
        },
        (None, "double") => match single(args).ok_or_else(bad_args)? {
            Value::Double(d) => Ok(Value::Double(d)),
            Value::Int(i) => Ok(Value::Double(i as f64)),
            Value::Uint(u) => Ok(Value::Double(u as f64)),
            Value::String(s) => s
                .parse()
                .map(Value::Double)
                .map_err(|_| CelError::eval(format!("cannot convert {s:?} to double"))),
            _ => Err(bad_args()),
        },
        (None, "string") => match single(args).ok_or_else(bad_args)? {
            Value::String(s) => Ok(Value::String(s)),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            Value::Int(i) => Ok(Value::String(i.to_string())),
            Value::Uint(u) => Ok(Value::String(u.to_string())),
            Value::Double(d) => Ok(Value::String(d.to_string())),
            other => Err(CelError::eval(format!(
                "cannot convert {} to string",
                other.kind_name()
            ))),
        },
        (None, "glob") if env.has_glob() => match args.as_slice() {
            [Value::String(pattern), Value::String(value)] => glob::Pattern::new(pattern)
                .map(|p| Value::Bool(p.matches(value)))
                .map_err(|err| CelError::eval(format!("invalid glob pattern {pattern:?}: {err}"))),
            _ => Err(bad_args()),
        },
        (Some(Value::String(s)), "startsWith" | "endsWith" | "contains") => {
            match args.as_slice() {
                [Value::String(arg)] => Ok(Value::Bool(match function {
                    "startsWith" => s.starts_with(arg.as_str()),
                    "endsWith" => s.ends_with(arg.as_str()),
                    _ => s.contains(arg.as_str()),
                })),
                _ => Err(bad_args()),
            }
        }
        _ => Err(bad_args()),
    }
}

fn single(mut args: Vec<Value>) -> Option<Value> {
    if args.len() == 1 { args.pop() } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env;
    use crate::parser::parse;

    fn eval(text: &str, env: &Env, activation: &Activation) -> Result<Value> {
        let expr = parse(text).map_err(CelError::Eval)?;
        evaluate(&expr, env, activation)
    }

    fn nvme_disk() -> Activation {
        Activation::new()
            .bind(
                "disk",
                Value::record([
                    ("dev_path", Value::from("/dev/nvme0n1")),
                    ("size", Value::Uint(512 * 1024 * 1024 * 1024)),
                    ("transport", Value::from("nvme")),
                    ("rotational", Value::Bool(false)),
                    ("model", Value::from("Samsung SSD 980")),
                ]),
            )
            .bind("system_disk", false)
    }

    #[test]
    fn evaluates_disk_selectors() {
        let env = env::disk_locator();
        let disk = nvme_disk();

        for (text, expected) in [
            ("disk.transport == 'nvme'", true),
            ("disk.size > 120u * GB", true),
            ("disk.size >= 1u * TiB", false),
            ("!system_disk && !disk.rotational", true),
            ("glob('/dev/nvme*', disk.dev_path)", true),
            ("disk.model.startsWith('Samsung')", true),
            ("disk.transport in ['sata', 'nvme']", true),
            ("disk.size > 1000", true),
        ] {
            assert_eq!(
                eval(text, env, &disk),
                Ok(Value::Bool(expected)),
                "{text}"
            );
        }
    }

    #[test]
    fn logical_operators_absorb_errors() {
        let env = env::disk_locator();
        let disk = nvme_disk();

        assert_eq!(
            eval("disk.missing == 'x' || true", env, &disk),
            Ok(Value::Bool(true))
        );
        assert_eq!(
            eval("false && disk.missing == 'x'", env, &disk),
            Ok(Value::Bool(false))
        );
        assert!(eval("disk.missing == 'x' && true", env, &disk).is_err());
    }

    #[test]
    fn reports_runtime_failures() {
        let env = env::disk_locator();
        let empty = Activation::new();

        assert!(eval("disk.size > 0u", env, &empty).is_err());
        assert!(eval("18446744073709551615u + 1u", env, &empty).is_err());
        assert!(eval("1 / 0", env, &empty).is_err());
        assert!(eval("glob('[', 'x')", env, &empty).is_err());
        assert_eq!(eval("1u - 2u", env, &empty), Err(CelError::eval("integer overflow")));
    }

    #[test]
    fn converts_between_numeric_kinds() {
        let env = env::disk_locator();
        let empty = Activation::new();

        assert_eq!(eval("double(3u) / 2.0", env, &empty), Ok(Value::Double(1.5)));
        assert_eq!(eval("int('42') + 1", env, &empty), Ok(Value::Int(43)));
        assert_eq!(eval("uint(-1)", env, &empty), Err(CelError::eval("uint range error")));
        assert_eq!(eval("size('héllo')", env, &empty), Ok(Value::Int(5)));
        assert_eq!(eval("[1, 2, 3][1u]", env, &empty), Ok(Value::Int(2)));
    }
}
