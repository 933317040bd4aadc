// SPDX-License-Identifier: GPL-3.0-only

use std::fmt;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ast::Expr;
use crate::checker::check;
use crate::env::{self, Env};
use crate::error::{CelError, Result};
use crate::eval::{Activation, evaluate};
use crate::parser::parse;
use crate::value::{Type, Value};

/// Typed tree bound to the environment it was checked against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Checked {
    env: String,
    result: Type,
    expr: Expr,
}

/// A selector expression.
///
/// Serializes as its source text. Two expressions are equal when their text
/// is equal. The zero value (empty text) is an unset expression.
#[derive(Clone, Default)]
pub struct Expression {
    text: String,
    checked: Option<Arc<Checked>>,
}

impl Expression {
    /// Parses and type-checks `text` against `env`.
    pub fn parse(text: &str, env: &Env) -> Result<Self> {
        let checked = compile(text, env)?;
        Ok(Self {
            text: text.to_string(),
            checked: Some(Arc::new(checked)),
        })
    }

    /// Like [`Expression::parse`], requiring a boolean result.
    pub fn parse_bool(text: &str, env: &Env) -> Result<Self> {
        let expr = Self::parse(text, env)?;
        expr.require(text, |ty| ty.is_assignable(&Type::Bool))?;
        Ok(expr)
    }

    /// Like [`Expression::parse`], requiring a numeric result.
    pub fn parse_double(text: &str, env: &Env) -> Result<Self> {
        let expr = Self::parse(text, env)?;
        expr.require(text, |ty| ty.is_numeric() || ty.is_dyn())?;
        Ok(expr)
    }

    /// Wraps text without checking it; it is compiled on first evaluation.
    pub fn unchecked(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            checked: None,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn is_zero(&self) -> bool {
        self.text.is_empty()
    }

    /// The static result type, if the expression has been checked.
    pub fn result_type(&self) -> Option<&Type> {
        self.checked.as_ref().map(|c| &c.result)
    }

    fn require(&self, text: &str, accept: impl Fn(&Type) -> bool) -> Result<()> {
        match self.result_type() {
            Some(ty) if !accept(ty) => Err(CelError::invalid(
                text,
                format!("unexpected result type '{ty}'"),
            )),
            _ => Ok(()),
        }
    }

    fn compiled(&self, env: &Env) -> Result<Arc<Checked>> {
        match &self.checked {
            Some(checked) if checked.env == env.name() => Ok(Arc::clone(checked)),
            _ => compile(&self.text, env).map(Arc::new),
        }
    }

    pub fn eval(&self, env: &Env, activation: &Activation) -> Result<Value> {
        let checked = self.compiled(env)?;
        evaluate(&checked.expr, env, activation)
    }

    pub fn eval_bool(&self, env: &Env, activation: &Activation) -> Result<bool> {
        match self.eval(env, activation)? {
            Value::Bool(b) => Ok(b),
            other => Err(CelError::eval(format!(
                "expected bool result, got {}",
                other.kind_name()
            ))),
        }
    }

    pub fn eval_double(&self, env: &Env, activation: &Activation) -> Result<f64> {
        match self.eval(env, activation)? {
            Value::Double(d) => Ok(d),
            Value::Int(i) => Ok(i as f64),
            Value::Uint(u) => Ok(u as f64),
            other => Err(CelError::eval(format!(
                "expected double result, got {}",
                other.kind_name()
            ))),
        }
    }

    /// Compact checked form (JSON of the typed tree).
    pub fn to_checked_bytes(&self, env: &Env) -> Result<Vec<u8>> {
        let checked = self.compiled(env)?;
        serde_json::to_vec(checked.as_ref()).map_err(|err| CelError::Decode(err.to_string()))
    }

    /// Restores an expression from [`Expression::to_checked_bytes`].
    ///
    /// The text is regenerated from the tree, so it may differ from the
    /// original in spacing, quoting and parentheses.
    pub fn from_checked_bytes(bytes: &[u8]) -> Result<Self> {
        let checked: Checked =
            serde_json::from_slice(bytes).map_err(|err| CelError::Decode(err.to_string()))?;
        let env = env::by_name(&checked.env)
            .ok_or_else(|| CelError::Decode(format!("unknown environment {:?}", checked.env)))?;
        let ty = check(&checked.expr, env).map_err(CelError::Decode)?;
        if ty != checked.result {
            return Err(CelError::Decode(format!(
                "result type mismatch: stored '{}', checked '{ty}'",
                checked.result
            )));
        }
        Ok(Self {
            text: checked.expr.to_string(),
            checked: Some(Arc::new(checked)),
        })
    }

    pub fn to_checked_base64(&self, env: &Env) -> Result<String> {
        self.to_checked_bytes(env).map(|bytes| STANDARD.encode(bytes))
    }

    pub fn from_checked_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|err| CelError::Decode(err.to_string()))?;
        Self::from_checked_bytes(&bytes)
    }
}

fn compile(text: &str, env: &Env) -> Result<Checked> {
    let expr = parse(text).map_err(|message| CelError::invalid(text, message))?;
    let result = check(&expr, env).map_err(|message| CelError::invalid(text, message))?;
    Ok(Checked {
        env: env.name().to_string(),
        result,
        expr,
    })
}

impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}

impl Eq for Expression {}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Expression({:?})", self.text)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for Expression {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for Expression {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        String::deserialize(deserializer).map(Expression::unchecked)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn parse_bool_rejects_non_boolean_results() {
        let env = env::disk_locator();
        assert!(Expression::parse_bool("disk.size", env).is_err());
        assert!(Expression::parse_double("disk.size", env).is_ok());
        assert!(Expression::parse_double("disk.model", env).is_err());

        let err = Expression::parse_bool("disk.size >", env).unwrap_err();
        assert!(matches!(err, CelError::InvalidExpression { .. }));
    }

    #[test]
    fn serializes_as_text() {
        let expr =
            Expression::parse_bool("disk.transport == \"nvme\"", env::disk_locator()).unwrap();
        let json = serde_json::to_string(&expr).unwrap();
        assert_eq!(json, r#""disk.transport == \"nvme\"""#);

        let back: Expression = serde_json::from_str(&json).unwrap();
        assert_eq!(back, expr);
        assert!(back.result_type().is_none());
    }

    #[test]
    fn unchecked_text_compiles_on_evaluation() {
        let expr = Expression::unchecked("volume.partition_label == 'STATE'");
        let activation = Activation::new().bind(
            "volume",
            Value::record([("partition_label", Value::from("STATE"))]),
        );
        assert_eq!(expr.eval_bool(env::volume_locator(), &activation), Ok(true));
        assert!(expr.eval_bool(env::disk_locator(), &activation).is_err());
    }

    #[test]
    fn checked_form_restores_tree() {
        let env = env::volume_locator();
        let expr = Expression::parse_bool(
            "volume.partition_label == 'META' && volume.name in ['', 'talosmeta'] && volume.size == 1048576u",
            env,
        )
        .unwrap();

        let encoded = expr.to_checked_base64(env).unwrap();
        let restored = Expression::from_checked_base64(&encoded).unwrap();
        assert_eq!(
            restored.text(),
            r#"volume.partition_label == "META" && volume.name in ["", "talosmeta"] && volume.size == 1048576u"#
        );

        let meta = Activation::new().bind(
            "volume",
            Value::record([
                ("partition_label", Value::from("META")),
                ("name", Value::from("talosmeta")),
                ("size", Value::Uint(1048576)),
            ]),
        );
        assert_eq!(restored.eval_bool(env, &meta), Ok(true));
    }

    #[test]
    fn rejects_tampered_checked_form() {
        assert!(Expression::from_checked_bytes(b"{").is_err());
        assert!(Expression::from_checked_base64("!!!").is_err());
    }

    proptest! {
        #[test]
        fn checked_round_trip_preserves_value(
            size in any::<u64>(),
            threshold in any::<u64>(),
            rotational in any::<bool>(),
            transport in prop::sample::select(vec!["nvme", "sata", "usb", ""]),
        ) {
            let env = env::disk_locator();
            let text = format!(
                "(disk.size >= {threshold}u || disk.rotational) && disk.transport != 'usb' ? !system_disk : disk.size % 2u == 0u"
            );
            let expr = Expression::parse_bool(&text, env).unwrap();
            let restored = Expression::from_checked_bytes(&expr.to_checked_bytes(env).unwrap()).unwrap();

            let activation = Activation::new()
                .bind("disk", Value::record([
                    ("size", Value::Uint(size)),
                    ("rotational", Value::Bool(rotational)),
                    ("transport", Value::from(transport)),
                ]))
                .bind("system_disk", rotational);

            prop_assert_eq!(expr.eval_bool(env, &activation), restored.eval_bool(env, &activation));
            prop_assert_eq!(
                Expression::parse_bool(restored.text(), env).unwrap().eval_bool(env, &activation),
                expr.eval_bool(env, &activation)
            );
        }
    }
}
