//! Tokenizer for the expression language

use super::ExpressionError;
use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    QuestionDot,
    Question,
    Colon,
    Not,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    EqEqEq,
    NotEqEq,
    AndAnd,
    OrOr,
    Nullish,
}

impl Token {
    pub fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {}", n),
            Token::Str(s) => format!("string '{}'", s),
            Token::Ident(name) => format!("identifier '{}'", name),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::QuestionDot => "?.",
            Token::Question => "?",
            Token::Colon => ":",
            Token::Not => "!",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Lt => "<",
            Token::Le => "<=",
            Token::Gt => ">",
            Token::Ge => ">=",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::EqEqEq => "===",
            Token::NotEqEq => "!==",
            Token::AndAnd => "&&",
            Token::OrOr => "||",
            Token::Nullish => "??",
            Token::Number(_) | Token::Str(_) | Token::Ident(_) => "",
        }
    }
}

/// A token with its byte offset in the source
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

pub struct Lexer<'a> {
    source: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.char_indices().peekable(),
        }
    }

    /// Tokenize the whole input
    pub fn tokenize(mut self) -> Result<Vec<Spanned>, ExpressionError> {
        let mut tokens = Vec::new();
        while let Some(token) = self.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    fn error(&self, position: usize, message: impl Into<String>) -> ExpressionError {
        ExpressionError::Syntax {
            expression: self.source.to_string(),
            position,
            message: message.into(),
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        if let Some(&(_, c)) = self.chars.peek() {
            if c == expected {
                self.chars.next();
                return true;
            }
        }
        false
    }

    fn next_token(&mut self) -> Result<Option<Spanned>, ExpressionError> {
        while let Some(&(_, c)) = self.chars.peek() {
            if c.is_whitespace() {
                self.chars.next();
            } else {
                break;
            }
        }

        let Some((position, c)) = self.chars.next() else {
            return Ok(None);
        };

        let token = match c {
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            ',' => Token::Comma,
            ':' => Token::Colon,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '.' => {
                if self.chars.peek().is_some_and(|&(_, n)| n.is_ascii_digit()) {
                    return self.number(position).map(Some);
                }
                Token::Dot
            }
            '?' => {
                if self.eat('?') {
                    Token::Nullish
                } else if self.peek_optional_chain() {
                    self.chars.next();
                    Token::QuestionDot
                } else {
                    Token::Question
                }
            }
            '!' => {
                if self.eat('=') {
                    if self.eat('=') {
                        Token::NotEqEq
                    } else {
                        Token::NotEq
                    }
                } else {
                    Token::Not
                }
            }
            '=' => {
                if !self.eat('=') {
                    return Err(self.error(position, "assignment is not allowed"));
                }
                if self.eat('=') {
                    Token::EqEqEq
                } else {
                    Token::EqEq
                }
            }
            '<' => {
                if self.eat('=') {
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            '&' => {
                if !self.eat('&') {
                    return Err(self.error(position, "bitwise '&' is not supported"));
                }
                Token::AndAnd
            }
            '|' => {
                if !self.eat('|') {
                    return Err(self.error(position, "bitwise '|' is not supported"));
                }
                Token::OrOr
            }
            '\'' | '"' => return self.string(position, c).map(Some),
            c if c.is_ascii_digit() => return self.number(position).map(Some),
            c if is_ident_start(c) => {
                let mut name = c.to_string();
                while let Some(&(_, n)) = self.chars.peek() {
                    if is_ident_continue(n) {
                        name.push(n);
                        self.chars.next();
                    } else {
                        break;
                    }
                }
                Token::Ident(name)
            }
            other => {
                return Err(self.error(position, format!("unexpected character '{}'", other)));
            }
        };

        Ok(Some(Spanned { token, position }))
    }

    /// `?.` is optional chaining unless followed by a digit (`a ?.5 : b`)
    fn peek_optional_chain(&self) -> bool {
        let mut lookahead = self.chars.clone();
        match lookahead.next() {
            Some((_, '.')) => !lookahead.next().is_some_and(|(_, c)| c.is_ascii_digit()),
            _ => false,
        }
    }

    fn string(&mut self, position: usize, quote: char) -> Result<Spanned, ExpressionError> {
        let mut value = String::new();
        while let Some((_, c)) = self.chars.next() {
            match c {
                '\\' => {
                    let Some((_, escaped)) = self.chars.next() else {
                        break;
                    };
                    value.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        other => other,
                    });
                }
                c if c == quote => {
                    return Ok(Spanned {
                        token: Token::Str(value),
                        position,
                    });
                }
                c => value.push(c),
            }
        }
        Err(self.error(position, "unterminated string"))
    }

    fn number(&mut self, position: usize) -> Result<Spanned, ExpressionError> {
        let mut end = position + 1;
        let mut seen_dot = self.source[position..].starts_with('.');
        while let Some(&(i, c)) = self.chars.peek() {
            if c.is_ascii_digit() || (c == '.' && !seen_dot && self.digit_follows(i)) {
                seen_dot |= c == '.';
                end = i + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        let text = &self.source[position..end];
        let value = text
            .parse::<f64>()
            .map_err(|_| self.error(position, format!("invalid number '{}'", text)))?;
        Ok(Spanned {
            token: Token::Number(value),
            position,
        })
    }

    fn digit_follows(&self, dot_position: usize) -> bool {
        self.source[dot_position + 1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit())
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(src: &str) -> Vec<Token> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|s| s.token)
            .collect()
    }

    #[test]
    fn test_operators() {
        assert_eq!(
            tokens("a === b !== c ?? d"),
            vec![
                Token::Ident("a".into()),
                Token::EqEqEq,
                Token::Ident("b".into()),
                Token::NotEqEq,
                Token::Ident("c".into()),
                Token::Nullish,
                Token::Ident("d".into()),
            ]
        );
    }

    #[test]
    fn test_optional_chain_vs_ternary() {
        assert_eq!(
            tokens("a?.b"),
            vec![
                Token::Ident("a".into()),
                Token::QuestionDot,
                Token::Ident("b".into())
            ]
        );
        assert_eq!(
            tokens("a?.5:1"),
            vec![
                Token::Ident("a".into()),
                Token::Question,
                Token::Number(0.5),
                Token::Colon,
                Token::Number(1.0)
            ]
        );
    }

    #[test]
    fn test_numbers_and_member_dots() {
        assert_eq!(
            tokens("1.5 + items.length"),
            vec![
                Token::Number(1.5),
                Token::Plus,
                Token::Ident("items".into()),
                Token::Dot,
                Token::Ident("length".into())
            ]
        );
    }

    #[test]
    fn test_strings_with_escapes() {
        assert_eq!(tokens(r#"'it\'s' "x""#), vec![
            Token::Str("it's".into()),
            Token::Str("x".into())
        ]);
    }

    #[test]
    fn test_dollar_identifiers() {
        assert_eq!(
            tokens("$.qty * $index"),
            vec![
                Token::Ident("$".into()),
                Token::Dot,
                Token::Ident("qty".into()),
                Token::Star,
                Token::Ident("$index".into())
            ]
        );
    }

    #[test]
    fn test_rejects_assignment_and_bitwise() {
        assert!(Lexer::new("a = 1").tokenize().is_err());
        assert!(Lexer::new("a & b").tokenize().is_err());
        assert!(Lexer::new("'open").tokenize().is_err());
        assert!(Lexer::new("a ; b").tokenize().is_err());
    }
}
