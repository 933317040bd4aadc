// SPDX-License-Identifier: GPL-3.0-only

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::env::Env;
use crate::value::Type;

/// Infers the static type of `expr`, rejecting ill-typed trees.
pub(crate) fn check(expr: &Expr, env: &Env) -> Result<Type, String> {
    match expr {
        Expr::Literal(value) => Ok(value.type_of()),
        Expr::Ident(name) => env
            .variable(name)
            .cloned()
            .or_else(|| env.constant(name).map(|v| v.type_of()))
            .ok_or_else(|| format!("undeclared reference to '{name}'")),
        Expr::Select { operand, field } => match check(operand, env)? {
            Type::Record(record) => env
                .field(&record, field)
                .cloned()
                .ok_or_else(|| format!("undefined field '{field}' on {record}")),
            Type::Dyn => Ok(Type::Dyn),
            other => Err(format!("type '{other}' does not support field selection")),
        },
        Expr::Index { operand, index } => {
            let operand = check(operand, env)?;
            let index = check(index, env)?;
            match operand {
                Type::List(elem) => {
                    if matches!(index, Type::Int | Type::Uint | Type::Dyn) {
                        Ok(*elem)
                    } else {
                        Err(format!("list index must be int or uint, got '{index}'"))
                    }
                }
                Type::Dyn => Ok(Type::Dyn),
                other => Err(format!("type '{other}' does not support indexing")),
            }
        }
        Expr::Unary { op, operand } => {
            let ty = check(operand, env)?;
            match (op, ty) {
                (UnaryOp::Not, Type::Bool | Type::Dyn) => Ok(Type::Bool),
                (UnaryOp::Neg, ty @ (Type::Int | Type::Double | Type::Dyn)) => Ok(ty),
                (op, ty) => Err(format!("no matching overload for {op:?} on '{ty}'")),
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            let lhs = check(lhs, env)?;
            let rhs = check(rhs, env)?;
            check_binary(*op, lhs, rhs)
        }
        Expr::Conditional {
            cond,
            then,
            otherwise,
        } => {
            let cond = check(cond, env)?;
            if !cond.is_assignable(&Type::Bool) {
                return Err(format!("conditional requires bool, got '{cond}'"));
            }
            let then = check(then, env)?;
            let otherwise = check(otherwise, env)?;
            if then == otherwise {
                Ok(then)
            } else if then.is_assignable(&otherwise) {
                Ok(Type::Dyn)
            } else {
                Err(format!(
                    "conditional branches differ: '{then}' and '{otherwise}'"
                ))
            }
        }
        Expr::List(items) => {
            let mut elem: Option<Type> = None;
            for item in items {
                let ty = check(item, env)?;
                elem = Some(match elem {
                    None => ty,
                    Some(prev) if prev == ty => prev,
                    Some(_) => Type::Dyn,
                });
            }
            Ok(Type::List(Box::new(elem.unwrap_or(Type::Dyn))))
        }
        Expr::Call {
            target,
            function,
            args,
        } => {
            let target = target.as_deref().map(|t| check(t, env)).transpose()?;
            let args = args
                .iter()
                .map(|arg| check(arg, env))
                .collect::<Result<Vec<_>, _>>()?;
            check_call(env, target, function, &args)
        }
    }
}

fn check_binary(op: BinaryOp, lhs: Type, rhs: Type) -> Result<Type, String> {
    let mismatch = || format!("no matching overload for '{lhs}' {op:?} '{rhs}'");

    match op {
        BinaryOp::And | BinaryOp::Or => {
            if lhs.is_assignable(&Type::Bool) && rhs.is_assignable(&Type::Bool) {
                Ok(Type::Bool)
            } else {
                Err(mismatch())
            }
        }
        BinaryOp::Eq | BinaryOp::Ne => {
            if lhs.is_assignable(&rhs) || (lhs.is_numeric() && rhs.is_numeric()) {
                Ok(Type::Bool)
            } else {
                Err(mismatch())
            }
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordered = |t: &Type| t.is_numeric() || matches!(t, Type::String | Type::Bool);
            let ok = match (&lhs, &rhs) {
                (Type::Dyn, other) | (other, Type::Dyn) => other.is_dyn() || ordered(other),
                (a, b) if a.is_numeric() && b.is_numeric() => true,
                (a, b) => a == b && ordered(a),
            };
            if ok { Ok(Type::Bool) } else { Err(mismatch()) }
        }
        BinaryOp::In => match &rhs {
            Type::List(elem) => {
                if lhs.is_assignable(elem) || (lhs.is_numeric() && elem.is_numeric()) {
                    Ok(Type::Bool)
                } else {
                    Err(mismatch())
                }
            }
            Type::Record(_) | Type::Dyn => Ok(Type::Bool),
            _ => Err(mismatch()),
        },
        BinaryOp::Add => match (&lhs, &rhs) {
            (Type::Dyn, other) | (other, Type::Dyn) => Ok(other.clone()),
            (Type::String, Type::String) => Ok(Type::String),
            (Type::List(a), Type::List(b)) => Ok(Type::List(Box::new(if a == b {
                (**a).clone()
            } else {
                Type::Dyn
            }))),
            (a, b) if a == b && a.is_numeric() => Ok(lhs.clone()),
            _ => Err(mismatch()),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => match (&lhs, &rhs) {
            (Type::Dyn, other) | (other, Type::Dyn) if other.is_dyn() || other.is_numeric() => {
                Ok(other.clone())
            }
            (a, b) if a == b && a.is_numeric() => Ok(lhs.clone()),
            _ => Err(mismatch()),
        },
        BinaryOp::Rem => match (&lhs, &rhs) {
            (Type::Dyn, other) | (other, Type::Dyn)
                if matches!(other, Type::Dyn | Type::Int | Type::Uint) =>
            {
                Ok(other.clone())
            }
            (Type::Int, Type::Int) => Ok(Type::Int),
            (Type::Uint, Type::Uint) => Ok(Type::Uint),
            _ => Err(mismatch()),
        },
    }
}

fn check_call(
    env: &Env,
    target: Option<Type>,
    function: &str,
    args: &[Type],
) -> Result<Type, String> {
    let bad_args = || format!("no matching overload for '{function}'");
    let all = |expected: &[Type]| {
        args.len() == expected.len()
            && args.iter().zip(expected).all(|(a, e)| a.is_assignable(e))
    };

    match (target.as_ref(), function) {
        (_, "size") => {
            let subject = match (target.as_ref(), args) {
                (Some(t), []) => t,
                (None, [t]) => t,
                _ => return Err(bad_args()),
            };
            match subject {
                Type::String | Type::List(_) | Type::Dyn => Ok(Type::Int),
                _ => Err(bad_args()),
            }
        }
        (None, "int" | "uint" | "double") => {
            let [arg] = args else {
                return Err(bad_args());
            };
            if arg.is_numeric() || matches!(arg, Type::String | Type::Dyn) {
                Ok(match function {
                    "int" => Type::Int,
                    "uint" => Type::Uint,
                    _ => Type::Double,
                })
            } else {
                Err(bad_args())
            }
        }
        (None, "string") => {
            if args.len() == 1 {
                Ok(Type::String)
            } else {
                Err(bad_args())
            }
        }
        (None, "glob") if env.has_glob() => {
            if all(&[Type::String, Type::String]) {
                Ok(Type::Bool)
            } else {
                Err(bad_args())
            }
        }
        (Some(target), "startsWith" | "endsWith" | "contains") => {
            if target.is_assignable(&Type::String) && all(&[Type::String]) {
                Ok(Type::Bool)
            } else {
                Err(bad_args())
            }
        }
        _ => Err(format!("undeclared reference to function '{function}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env;
    use crate::parser::parse;

    fn ty(text: &str, env: &Env) -> Result<Type, String> {
        check(&parse(text)?, env)
    }

    #[test]
    fn types_disk_selectors() {
        let env = env::disk_locator();
        assert_eq!(ty("disk.size > 120u * GB", env), Ok(Type::Bool));
        assert_eq!(ty("disk.transport == 'nvme' && !system_disk", env), Ok(Type::Bool));
        assert_eq!(ty("glob('/dev/sd*', disk.dev_path)", env), Ok(Type::Bool));
        assert_eq!(ty("'by-id' in disk.symlinks", env), Ok(Type::Bool));
        assert_eq!(ty("disk.size / GiB", env), Ok(Type::Uint));
        assert_eq!(ty("double(disk.size) / 2.0", env), Ok(Type::Double));
        assert_eq!(ty("disk.size > 1000", env), Ok(Type::Bool));
    }

    #[test]
    fn rejects_ill_typed_selectors() {
        let env = env::disk_locator();
        assert!(ty("disk.missing == 1", env).is_err());
        assert!(ty("disk.size + 1", env).is_err());
        assert!(ty("disk.size && true", env).is_err());
        assert!(ty("volume.size > 0u", env).is_err());
        assert!(ty("disk.model == 1", env).is_err());
        assert!(ty("glob('x')", env).is_err());
    }

    #[test]
    fn glob_is_only_declared_for_disks() {
        assert!(ty("glob('a', 'b')", env::volume_locator()).is_err());
        assert!(ty("system_disk", env::volume_locator()).is_err());
        assert_eq!(
            ty("volume.partition_label == 'META' && volume.size == 1048576u", env::volume_locator()),
            Ok(Type::Bool)
        );
    }
}
