// SPDX-License-Identifier: GPL-3.0-only

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::lexer::{Spanned, Token, tokenize};
use crate::value::Value;

const MAX_DEPTH: usize = 64;

/// Parses expression text into an unchecked tree.
pub(crate) fn parse(input: &str) -> Result<Expr, String> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expr()?;
    if let Some(extra) = parser.tokens.get(parser.pos) {
        return Err(format!(
            "unexpected {:?} at offset {}",
            extra.token, extra.offset
        ));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<(), String> {
        if self.eat(&token) {
            return Ok(());
        }
        match self.tokens.get(self.pos) {
            Some(found) => Err(format!(
                "expected {token:?}, found {:?} at offset {}",
                found.token, found.offset
            )),
            None => Err(format!("expected {token:?}, found end of input")),
        }
    }

    fn enter(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err("expression nests too deeply".to_string());
        }
        Ok(())
    }

    fn expr(&mut self) -> Result<Expr, String> {
        self.enter()?;
        let cond = self.or()?;
        let result = if self.eat(&Token::Question) {
            let then = self.or()?;
            self.expect(Token::Colon)?;
            let otherwise = self.expr()?;
            Expr::Conditional {
                cond: Box::new(cond),
                then: Box::new(then),
                otherwise: Box::new(otherwise),
            }
        } else {
            cond
        };
        self.depth -= 1;
        Ok(result)
    }

    fn or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.and()?;
        while self.eat(&Token::Or) {
            let rhs = self.and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.relation()?;
        while self.eat(&Token::And) {
            let rhs = self.relation()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn relation(&mut self) -> Result<Expr, String> {
        let mut lhs = self.addition()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::Ne) => BinaryOp::Ne,
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                Some(Token::In) => BinaryOp::In,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.addition()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn addition(&mut self) -> Result<Expr, String> {
        let mut lhs = self.multiplication()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.multiplication()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn multiplication(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, String> {
        if self.eat(&Token::Not) {
            self.enter()?;
            let operand = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }

        if self.eat(&Token::Minus) {
            // Negative literals fold so that i64::MIN is expressible.
            match self.peek().cloned() {
                Some(Token::Int(magnitude)) if !self.member_follows(1) => {
                    self.pos += 1;
                    let value = if magnitude == 1u64 << 63 {
                        i64::MIN
                    } else {
                        i64::try_from(magnitude)
                            .map(|v| -v)
                            .map_err(|_| format!("integer literal -{magnitude} out of range"))?
                    };
                    return Ok(Expr::Literal(Value::Int(value)));
                }
                Some(Token::Double(value)) if !self.member_follows(1) => {
                    self.pos += 1;
                    return Ok(Expr::Literal(Value::Double(-value)));
                }
                _ => {}
            }
            self.enter()?;
            let operand = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }

        self.member()
    }

    fn member_follows(&self, ahead: usize) -> bool {
        matches!(
            self.tokens.get(self.pos + ahead).map(|s| &s.token),
            Some(Token::Dot) | Some(Token::LBracket)
        )
    }

    fn member(&mut self) -> Result<Expr, String> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::Dot) {
                let field = match self.peek().cloned() {
                    Some(Token::Ident(name)) => {
                        self.pos += 1;
                        name
                    }
                    _ => return Err("expected field name after '.'".to_string()),
                };
                if self.eat(&Token::LParen) {
                    let args = self.arguments(Token::RParen)?;
                    expr = Expr::Call {
                        target: Some(Box::new(expr)),
                        function: field,
                        args,
                    };
                } else {
                    expr = Expr::Select {
                        operand: Box::new(expr),
                        field,
                    };
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.expr()?;
                self.expect(Token::RBracket)?;
                expr = Expr::Index {
                    operand: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, String> {
        let Some(spanned) = self.tokens.get(self.pos).cloned() else {
            return Err("unexpected end of input".to_string());
        };
        self.pos += 1;

        match spanned.token {
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Uint(u) => Ok(Expr::Literal(Value::Uint(u))),
            Token::Double(d) => Ok(Expr::Literal(Value::Double(d))),
            Token::Int(magnitude) => i64::try_from(magnitude)
                .map(|v| Expr::Literal(Value::Int(v)))
                .map_err(|_| format!("integer literal {magnitude} out of range")),
            Token::Ident(name) => {
                if self.eat(&Token::LParen) {
                    let args = self.arguments(Token::RParen)?;
                    Ok(Expr::Call {
                        target: None,
                        function: name,
                        args,
                    })
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            Token::LParen => {
                let inner = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => Ok(Expr::List(self.arguments(Token::RBracket)?)),
            other => Err(format!(
                "unexpected {other:?} at offset {}",
                spanned.offset
            )),
        }
    }

    /// Comma separated expressions up to `close`; a trailing comma is allowed.
    fn arguments(&mut self, close: Token) -> Result<Vec<Expr>, String> {
        let mut args = Vec::new();
        loop {
            if self.eat(&close) {
                return Ok(args);
            }
            args.push(self.expr()?);
            if !self.eat(&Token::Comma) {
                self.expect(close)?;
                return Ok(args);
            }
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn respects_precedence() {
        let expr = parse("a || b && c == 1 + 2 * 3").expect("parse");
        assert_eq!(expr.to_string(), "a || b && c == 1 + 2 * 3");

        let Expr::Binary { op, rhs, .. } = expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Or);
        assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::And, .. }));
    }

    #[test]
    fn folds_negative_literals() {
        assert_eq!(
            parse("-9223372036854775808").expect("parse"),
            Expr::Literal(Value::Int(i64::MIN))
        );
        assert!(parse("9223372036854775808").is_err());
        assert_eq!(
            parse("-x").expect("parse"),
            Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(Expr::Ident("x".into())),
            }
        );
    }

    #[test]
    fn parses_members_calls_and_lists() {
        let expr = parse(r#"volume.name in ["", "talosmeta"] && glob("/dev/sd*", disk.dev_path)"#)
            .expect("parse");
        assert_eq!(
            expr.to_string(),
            r#"volume.name in ["", "talosmeta"] && glob("/dev/sd*", disk.dev_path)"#
        );

        let method = parse("disk.model.startsWith('Samsung')").expect("parse");
        assert!(matches!(method, Expr::Call { target: Some(_), .. }));
    }

    #[test]
    fn display_parenthesizes_when_needed() {
        let expr = parse("(a - (b - c)) * 2").expect("parse");
        assert_eq!(expr.to_string(), "(a - (b - c)) * 2");
        assert_eq!(parse(&expr.to_string()).expect("reparse"), expr);

        let cond = parse("a ? b : c ? d : e").expect("parse");
        assert_eq!(parse(&cond.to_string()).expect("reparse"), cond);
    }

    #[test]
    fn reports_syntax_errors() {
        assert!(parse("").is_err());
        assert!(parse("disk.size >").is_err());
        assert!(parse("(a").is_err());
        assert!(parse("a b").is_err());
        assert!(parse("disk.").is_err());
    }

    #[test]
    fn limits_nesting() {
        let deep = format!("{}true{}", "(".repeat(100), ")".repeat(100));
        assert!(parse(&deep).is_err());
    }
}
