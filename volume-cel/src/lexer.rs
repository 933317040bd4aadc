// SPDX-License-Identifier: GPL-3.0-only

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    /// Unsigned magnitude; sign and range are resolved by the parser.
    Int(u64),
    Uint(u64),
    Double(f64),
    Str(String),
    True,
    False,
    Null,
    In,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Dot,
    Comma,
    Question,
    Colon,
    Not,
    Minus,
    Plus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Spanned>, String> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let single = match c {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '[' => Some(Token::LBracket),
            ']' => Some(Token::RBracket),
            ',' => Some(Token::Comma),
            '?' => Some(Token::Question),
            ':' => Some(Token::Colon),
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push(Spanned { token, offset });
            i += 1;
            continue;
        }

        let next = chars.get(i + 1).map(|(_, c)| *c);
        let double = match (c, next) {
            ('=', Some('=')) => Some(Token::Eq),
            ('!', Some('=')) => Some(Token::Ne),
            ('<', Some('=')) => Some(Token::Le),
            ('>', Some('=')) => Some(Token::Ge),
            ('&', Some('&')) => Some(Token::And),
            ('|', Some('|')) => Some(Token::Or),
            _ => None,
        };
        if let Some(token) = double {
            tokens.push(Spanned { token, offset });
            i += 2;
            continue;
        }

        match c {
            '!' => {
                tokens.push(Spanned { token: Token::Not, offset });
                i += 1;
            }
            '<' => {
                tokens.push(Spanned { token: Token::Lt, offset });
                i += 1;
            }
            '>' => {
                tokens.push(Spanned { token: Token::Gt, offset });
                i += 1;
            }
            '.' if !next.is_some_and(|n| n.is_ascii_digit()) => {
                tokens.push(Spanned { token: Token::Dot, offset });
                i += 1;
            }
            '\'' | '"' => {
                let (value, consumed) = lex_string(&chars[i..], c)
                    .map_err(|message| format!("{message} at offset {offset}"))?;
                tokens.push(Spanned { token: Token::Str(value), offset });
                i += consumed;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let (token, consumed) = lex_number(&chars[i..])
                    .map_err(|message| format!("{message} at offset {offset}"))?;
                tokens.push(Spanned { token, offset });
                i += consumed;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].1.is_ascii_alphanumeric() || chars[i].1 == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().map(|(_, c)| *c).collect();
                let token = match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "in" => Token::In,
                    _ => Token::Ident(word),
                };
                tokens.push(Spanned { token, offset });
            }
            other => return Err(format!("unexpected character {other:?} at offset {offset}")),
        }
    }

    Ok(tokens)
}

fn lex_string(chars: &[(usize, char)], quote: char) -> Result<(String, usize), String> {
    let mut value = String::new();
    let mut i = 1;

    while i < chars.len() {
        let c = chars[i].1;
        if c == quote {
            return Ok((value, i + 1));
        }
        if c == '\n' {
            break;
        }
        if c == '\\' {
            let escaped = chars.get(i + 1).map(|(_, c)| *c).ok_or("unterminated escape")?;
            value.push(match escaped {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '0' => '\0',
                '\\' | '\'' | '"' | '?' | '`' => escaped,
                other => return Err(format!("invalid escape sequence \\{other}")),
            });
            i += 2;
            continue;
        }
        value.push(c);
        i += 1;
    }

    Err("unterminated string literal".to_string())
}

fn lex_number(chars: &[(usize, char)]) -> Result<(Token, usize), String> {
    let at = |i: usize| chars.get(i).map(|(_, c)| *c);

    if at(0) == Some('0') && matches!(at(1), Some('x') | Some('X')) {
        let mut i = 2;
        while at(i).is_some_and(|c| c.is_ascii_hexdigit()) {
            i += 1;
        }
        let digits: String = chars[2..i].iter().map(|(_, c)| *c).collect();
        let magnitude =
            u64::from_str_radix(&digits, 16).map_err(|_| "invalid hex literal".to_string())?;
        return Ok(unsigned_suffix(magnitude, i, at(i)));
    }

    let mut i = 0;
    let mut is_double = false;
    while at(i).is_some_and(|c| c.is_ascii_digit()) {
        i += 1;
    }
    if at(i) == Some('.') && at(i + 1).is_some_and(|c| c.is_ascii_digit()) {
        is_double = true;
        i += 1;
        while at(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
    }
    if matches!(at(i), Some('e') | Some('E')) {
        let mut j = i + 1;
        if matches!(at(j), Some('+') | Some('-')) {
            j += 1;
        }
        if at(j).is_some_and(|c| c.is_ascii_digit()) {
            is_double = true;
            i = j;
            while at(i).is_some_and(|c| c.is_ascii_digit()) {
                i += 1;
            }
        }
    }

    let text: String = chars[..i].iter().map(|(_, c)| *c).collect();
    if is_double {
        let value: f64 = text
            .parse()
            .map_err(|_| format!("invalid double literal {text:?}"))?;
        return Ok((Token::Double(value), i));
    }

    let magnitude: u64 = text
        .parse()
        .map_err(|_| format!("integer literal {text:?} out of range"))?;
    Ok(unsigned_suffix(magnitude, i, at(i)))
}

fn unsigned_suffix(magnitude: u64, consumed: usize, next: Option<char>) -> (Token, usize) {
    if matches!(next, Some('u') | Some('U')) {
        (Token::Uint(magnitude), consumed + 1)
    } else {
        (Token::Int(magnitude), consumed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input)
            .expect("tokenize")
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn lexes_selector() {
        assert_eq!(
            kinds("disk.size >= 120u * GB && !disk.rotational"),
            vec![
                Token::Ident("disk".into()),
                Token::Dot,
                Token::Ident("size".into()),
                Token::Ge,
                Token::Uint(120),
                Token::Star,
                Token::Ident("GB".into()),
                Token::And,
                Token::Not,
                Token::Ident("disk".into()),
                Token::Dot,
                Token::Ident("rotational".into()),
            ]
        );
    }

    #[test]
    fn lexes_strings_and_numbers() {
        assert_eq!(
            kinds(r#"'a\'b' "c" 1.5 2e3 0x10u 7"#),
            vec![
                Token::Str("a'b".into()),
                Token::Str("c".into()),
                Token::Double(1.5),
                Token::Double(2000.0),
                Token::Uint(16),
                Token::Int(7),
            ]
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(tokenize("disk.size @ 1").is_err());
        assert!(tokenize("'open").is_err());
        assert!(tokenize("a = b").is_err());
    }
}
