use crate::error::EvaluationError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Ident(String),
    /// `[Field Name]`, brackets stripped.
    Field(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    LParen,
    RParen,
    Comma,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Self::Number(n) => format!("number {n}"),
            Self::Ident(name) => format!("`{name}`"),
            Self::Field(name) => format!("field [{name}]"),
            Self::Plus => "`+`".to_string(),
            Self::Minus => "`-`".to_string(),
            Self::Star => "`*`".to_string(),
            Self::Slash => "`/`".to_string(),
            Self::Percent => "`%`".to_string(),
            Self::LParen => "`(`".to_string(),
            Self::RParen => "`)`".to_string(),
            Self::Comma => "`,`".to_string(),
            Self::Lt => "`<`".to_string(),
            Self::Le => "`<=`".to_string(),
            Self::Gt => "`>`".to_string(),
            Self::Ge => "`>=`".to_string(),
            Self::Eq => "`=`".to_string(),
            Self::Ne => "`<>`".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub offset: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Spanned>, EvaluationError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(offset, ch)) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
            continue;
        }

        if ch.is_ascii_digit() || ch == '.' {
            let end = scan_number(source, offset);
            let text = &source[offset..end];
            let value = text
                .parse::<f64>()
                .map_err(|_| EvaluationError::syntax(offset, format!("invalid number `{text}`")))?;
            tokens.push(Spanned {
                token: Token::Number(value),
                offset,
            });
            while chars.peek().is_some_and(|&(i, _)| i < end) {
                chars.next();
            }
            continue;
        }

        if ch.is_alphabetic() || ch == '_' {
            let mut end = offset;
            while let Some(&(i, c)) = chars.peek() {
                if c.is_alphanumeric() || c == '_' || c == '.' {
                    end = i + c.len_utf8();
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Spanned {
                token: Token::Ident(source[offset..end].to_string()),
                offset,
            });
            continue;
        }

        if ch == '[' {
            chars.next();
            let mut name = String::new();
            let mut closed = false;
            for (_, c) in chars.by_ref() {
                if c == ']' {
                    closed = true;
                    break;
                }
                name.push(c);
            }
            if !closed {
                return Err(EvaluationError::syntax(offset, "unterminated `[` field reference"));
            }
            let name = name.trim();
            if name.is_empty() {
                return Err(EvaluationError::syntax(offset, "empty `[]` field reference"));
            }
            tokens.push(Spanned {
                token: Token::Field(name.to_string()),
                offset,
            });
            continue;
        }

        chars.next();
        let next = chars.peek().map(|&(_, c)| c);
        let token = match ch {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' | '×' => Token::Star,
            '/' | '÷' => Token::Slash,
            '%' => Token::Percent,
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            '<' => match next {
                Some('=') => {
                    chars.next();
                    Token::Le
                }
                Some('>') => {
                    chars.next();
                    Token::Ne
                }
                _ => Token::Lt,
            },
            '>' => {
                if next == Some('=') {
                    chars.next();
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            '=' => {
                if next == Some('=') {
                    chars.next();
                }
                Token::Eq
            }
            '!' if next == Some('=') => {
                chars.next();
                Token::Ne
            }
            other => {
                return Err(EvaluationError::syntax(
                    offset,
                    format!("unexpected character `{other}`"),
                ))
            }
        };
        tokens.push(Spanned { token, offset });
    }

    Ok(tokens)
}

/// Byte offset one past the end of the numeric literal starting at `start`.
fn scan_number(source: &str, start: usize) -> usize {
    let bytes = source.as_bytes();
    let mut end = start;
    while end < bytes.len() && (bytes[end].is_ascii_digit() || bytes[end] == b'.') {
        end += 1;
    }
    if end < bytes.len() && (bytes[end] == b'e' || bytes[end] == b'E') {
        let mut exp = end + 1;
        if exp < bytes.len() && (bytes[exp] == b'+' || bytes[exp] == b'-') {
            exp += 1;
        }
        if exp < bytes.len() && bytes[exp].is_ascii_digit() {
            while exp < bytes.len() && bytes[exp].is_ascii_digit() {
                exp += 1;
            }
            end = exp;
        }
    }
    end
}
