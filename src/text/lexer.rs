//! Graph text lexer.

use crate::{Error, Result};

/// A token from the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub text: String,
}

/// Source span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Literals
    Integer, StringLiteral,

    Identifier,

    // Punctuation
    LParen, RParen, LBracket, RBracket,
    Dot, Comma, Colon, Hash, Dollar, Underscore,

    // Instruction symbols; `<` also opens a range
    Question, Star, Eq, Plus, Minus, Bang, Lt, Gt, Caret, Tilde,

    Eof,
}

impl TokenKind {
    /// Instruction symbol carried by this token, if any.
    pub fn instruction_symbol(self) -> Option<char> {
        Some(match self {
            TokenKind::Question => '?',
            TokenKind::Star => '*',
            TokenKind::Eq => '=',
            TokenKind::Plus => '+',
            TokenKind::Minus => '-',
            TokenKind::Bang => '!',
            TokenKind::Lt => '<',
            TokenKind::Gt => '>',
            TokenKind::Caret => '^',
            TokenKind::Tilde => '~',
            _ => return None,
        })
    }
}

/// Tokenize graph text.
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => { chars.next(); }

            // Block comments /* ... */
            '/' if matches!(chars.clone().nth(1), Some((_, '*'))) => {
                chars.next();
                chars.next();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    if c == '*' && matches!(chars.peek(), Some(&(_, '/'))) {
                        chars.next();
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(Error::Syntax {
                        position: pos,
                        message: "unterminated block comment".into(),
                    });
                }
            }

            // Line comments
            '/' if matches!(chars.clone().nth(1), Some((_, '/'))) => {
                while chars.peek().is_some_and(|&(_, c)| c != '\n') {
                    chars.next();
                }
            }

            '"' => {
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some((_, '\\')) => match chars.next() {
                            Some((_, 'n')) => s.push('\n'),
                            Some((_, 't')) => s.push('\t'),
                            Some((_, c)) => s.push(c),
                            None => break,
                        },
                        Some((end, '"')) => {
                            tokens.push(Token {
                                kind: TokenKind::StringLiteral,
                                span: Span { start: pos, end: end + 1 },
                                text: s,
                            });
                            break;
                        }
                        Some((_, c)) => s.push(c),
                        None => {
                            return Err(Error::Syntax {
                                position: pos,
                                message: "unterminated string literal".into(),
                            });
                        }
                    }
                }
                if tokens.last().is_none_or(|t| t.span.start != pos) {
                    return Err(Error::Syntax {
                        position: pos,
                        message: "unterminated string literal".into(),
                    });
                }
            }

            // Integers, with an optional sign glued to the digits
            c if c.is_ascii_digit()
                || (c == '-' && chars.clone().nth(1).is_some_and(|(_, d)| d.is_ascii_digit())) =>
            {
                let mut num = String::new();
                num.push(c);
                chars.next();
                while let Some(&(_, d)) = chars.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    num.push(d);
                    chars.next();
                }
                tokens.push(Token {
                    kind: TokenKind::Integer,
                    span: Span { start: pos, end: pos + num.len() },
                    text: num,
                });
            }

            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let kind = if ident == "_" { TokenKind::Underscore } else { TokenKind::Identifier };
                tokens.push(Token {
                    kind,
                    span: Span { start: pos, end: pos + ident.len() },
                    text: ident,
                });
            }

            _ => {
                let kind = match ch {
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    '[' => TokenKind::LBracket,
                    ']' => TokenKind::RBracket,
                    '.' => TokenKind::Dot,
                    ',' => TokenKind::Comma,
                    ':' => TokenKind::Colon,
                    '#' => TokenKind::Hash,
                    '$' => TokenKind::Dollar,
                    '?' => TokenKind::Question,
                    '*' => TokenKind::Star,
                    '=' => TokenKind::Eq,
                    '+' => TokenKind::Plus,
                    '-' => TokenKind::Minus,
                    '!' => TokenKind::Bang,
                    '<' => TokenKind::Lt,
                    '>' => TokenKind::Gt,
                    '^' => TokenKind::Caret,
                    '~' => TokenKind::Tilde,
                    other => {
                        return Err(Error::Syntax {
                            position: pos,
                            message: format!("unexpected character '{other}'"),
                        });
                    }
                };
                chars.next();
                tokens.push(punct(kind, pos, ch));
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        span: Span { start: input.len(), end: input.len() },
        text: String::new(),
    });
    Ok(tokens)
}

fn punct(kind: TokenKind, pos: usize, ch: char) -> Token {
    Token {
        kind,
        span: Span { start: pos, end: pos + ch.len_utf8() },
        text: ch.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn range_and_codes() {
        use TokenKind::*;
        assert_eq!(
            kinds("digit: <0, 9>, run: !(x: _)"),
            vec![
                Identifier, Colon, Lt, Integer, Comma, Integer, Gt, Comma,
                Identifier, Colon, Bang, LParen, Identifier, Colon, Underscore, RParen, Eof,
            ]
        );
    }

    #[test]
    fn negative_integers_and_remove() {
        let tokens = tokenize("<-3, -1> -(a)").unwrap();
        assert_eq!(tokens[1].text, "-3");
        assert_eq!(tokens[3].text, "-1");
        assert_eq!(tokens[5].kind, TokenKind::Minus);
    }

    #[test]
    fn comments_and_hints() {
        let tokens = tokenize("// note\na /* skip\nthis */ #\"k\":\"v\\\"\"").unwrap();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "#", "k", ":", "v\"", ""]);
    }

    #[test]
    fn unterminated_input_is_an_error() {
        assert!(matches!(tokenize("a /* open"), Err(Error::Syntax { position: 2, .. })));
        assert!(matches!(tokenize("#\"k"), Err(Error::Syntax { position: 1, .. })));
        assert!(matches!(tokenize("a @ b"), Err(Error::Syntax { position: 2, .. })));
    }
}
