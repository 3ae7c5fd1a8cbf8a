//! Tokenizer for JSONata expressions.
//!
//! Produces a flat token stream with source positions for error reporting.
//! Regex literals (`/pattern/` with optional `i` flag) are recognized only in
//! prefix position, using the previous token to disambiguate from division.

use super::JsonataError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    /// `$name`; the empty string is the bare context reference `$`.
    Var(String),
    Regex {
        pattern: String,
        insensitive: bool,
    },
    True,
    False,
    Null,
    And,
    Or,
    In,
    Function,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Dot,
    Comma,
    Colon,
    Semi,
    Question,
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    Percent,
    Amp,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Assign,
}

impl Token {
    /// Whether this token can end a value, meaning a following `/` is
    /// division rather than the start of a regex literal.
    fn ends_value(&self) -> bool {
        matches!(
            self,
            Token::Number(_)
                | Token::Str(_)
                | Token::Ident(_)
                | Token::Var(_)
                | Token::Regex { .. }
                | Token::True
                | Token::False
                | Token::Null
                | Token::RParen
                | Token::RBracket
                | Token::RBrace
        )
    }
}

#[derive(Clone)]
pub(crate) struct Spanned {
    pub token: Token,
    pub position: usize,
}

fn syntax_error(position: usize, message: impl Into<String>) -> JsonataError {
    JsonataError::Syntax {
        position,
        message: message.into(),
    }
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, JsonataError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens: Vec<Spanned> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        // Block comments.
        if c == '/' && chars.get(i + 1) == Some(&'*') {
            let mut j = i + 2;
            loop {
                match (chars.get(j), chars.get(j + 1)) {
                    (Some('*'), Some('/')) => break,
                    (Some(_), _) => j += 1,
                    (None, _) => return Err(syntax_error(start, "unterminated comment")),
                }
            }
            i = j + 2;
            continue;
        }

        // Regex literal, only where a value cannot end.
        if c == '/' && !tokens.last().map(|t| t.token.ends_value()).unwrap_or(false) {
            let mut j = i + 1;
            let mut pattern = String::new();
            loop {
                match chars.get(j) {
                    Some('\\') => {
                        pattern.push('\\');
                        match chars.get(j + 1) {
                            Some(&escaped) => {
                                pattern.push(escaped);
                                j += 2;
                            }
                            None => return Err(syntax_error(start, "unterminated regex")),
                        }
                    }
                    Some('/') => break,
                    Some(&ch) => {
                        pattern.push(ch);
                        j += 1;
                    }
                    None => return Err(syntax_error(start, "unterminated regex")),
                }
            }
            let mut insensitive = false;
            let mut end = j + 1;
            if chars.get(end) == Some(&'i') {
                insensitive = true;
                end += 1;
            }
            tokens.push(Spanned {
                token: Token::Regex {
                    pattern,
                    insensitive,
                },
                position: start,
            });
            i = end;
            continue;
        }

        if c.is_ascii_digit() {
            let mut j = i;
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            if chars.get(j) == Some(&'.') && chars.get(j + 1).map(|c| c.is_ascii_digit()) == Some(true)
            {
                j += 1;
                while j < chars.len() && chars[j].is_ascii_digit() {
                    j += 1;
                }
            }
            if matches!(chars.get(j), Some('e') | Some('E')) {
                let mut k = j + 1;
                if matches!(chars.get(k), Some('+') | Some('-')) {
                    k += 1;
                }
                if chars.get(k).map(|c| c.is_ascii_digit()) == Some(true) {
                    j = k;
                    while j < chars.len() && chars[j].is_ascii_digit() {
                        j += 1;
                    }
                }
            }
            let text: String = chars[i..j].iter().collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| syntax_error(start, format!("invalid number '{text}'")))?;
            tokens.push(Spanned {
                token: Token::Number(value),
                position: start,
            });
            i = j;
            continue;
        }

        if c == '"' || c == '\'' {
            let quote = c;
            let mut j = i + 1;
            let mut text = String::new();
            loop {
                match chars.get(j) {
                    Some('\\') => {
                        let escaped = chars
                            .get(j + 1)
                            .ok_or_else(|| syntax_error(start, "unterminated string"))?;
                        match escaped {
                            'n' => text.push('\n'),
                            't' => text.push('\t'),
                            'r' => text.push('\r'),
                            '\\' => text.push('\\'),
                            '/' => text.push('/'),
                            '"' => text.push('"'),
                            '\'' => text.push('\''),
                            'u' => {
                                let hex: String = chars
                                    .get(j + 2..j + 6)
                                    .ok_or_else(|| syntax_error(start, "bad unicode escape"))?
                                    .iter()
                                    .collect();
                                let code = u32::from_str_radix(&hex, 16)
                                    .map_err(|_| syntax_error(start, "bad unicode escape"))?;
                                text.push(
                                    char::from_u32(code)
                                        .ok_or_else(|| syntax_error(start, "bad unicode escape"))?,
                                );
                                j += 4;
                            }
                            other => {
                                return Err(syntax_error(
                                    start,
                                    format!("unsupported escape '\\{other}'"),
                                ))
                            }
                        }
                        j += 2;
                    }
                    Some(&ch) if ch == quote => break,
                    Some(&ch) => {
                        text.push(ch);
                        j += 1;
                    }
                    None => return Err(syntax_error(start, "unterminated string")),
                }
            }
            tokens.push(Spanned {
                token: Token::Str(text),
                position: start,
            });
            i = j + 1;
            continue;
        }

        if c == '$' {
            let mut j = i + 1;
            while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                j += 1;
            }
            let name: String = chars[i + 1..j].iter().collect();
            tokens.push(Spanned {
                token: Token::Var(name),
                position: start,
            });
            i = j;
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let mut j = i + 1;
            while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                j += 1;
            }
            let word: String = chars[i..j].iter().collect();
            let token = match word.as_str() {
                "true" => Token::True,
                "false" => Token::False,
                "null" => Token::Null,
                "and" => Token::And,
                "or" => Token::Or,
                "in" => Token::In,
                "function" => Token::Function,
                _ => Token::Ident(word),
            };
            tokens.push(Spanned {
                token,
                position: start,
            });
            i = j;
            continue;
        }

        let (token, width) = match c {
            '{' => (Token::LBrace, 1),
            '}' => (Token::RBrace, 1),
            '[' => (Token::LBracket, 1),
            ']' => (Token::RBracket, 1),
            '(' => (Token::LParen, 1),
            ')' => (Token::RParen, 1),
            '.' => (Token::Dot, 1),
            ',' => (Token::Comma, 1),
            ';' => (Token::Semi, 1),
            '?' => (Token::Question, 1),
            '+' => (Token::Plus, 1),
            '-' => (Token::Minus, 1),
            '/' => (Token::Slash, 1),
            '%' => (Token::Percent, 1),
            '&' => (Token::Amp, 1),
            '*' => {
                if chars.get(i + 1) == Some(&'*') {
                    (Token::DoubleStar, 2)
                } else {
                    (Token::Star, 1)
                }
            }
            '=' => (Token::Eq, 1),
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    (Token::Ne, 2)
                } else {
                    return Err(syntax_error(start, "unexpected '!'"));
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    (Token::Le, 2)
                } else {
                    (Token::Lt, 1)
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    (Token::Ge, 2)
                } else {
                    (Token::Gt, 1)
                }
            }
            ':' => {
                if chars.get(i + 1) == Some(&'=') {
                    (Token::Assign, 2)
                } else {
                    (Token::Colon, 1)
                }
            }
            other => return Err(syntax_error(start, format!("unexpected character '{other}'"))),
        };
        tokens.push(Spanned {
            token,
            position: start,
        });
        i += width;
    }

    Ok(tokens)
}
