//! Recursive-descent parser producing [`Expr`] trees
//!
//! Precedence, lowest first:
//!
//! ```text
//! ?:   ??   ||   &&   == != === !==   < <= > >=   + -   * / %   ! - +   . ?. [] ()
//! ```

use super::ast::{BinaryOp, Expr, LogicalOp, UnaryOp};
use super::lexer::{Lexer, Spanned, Token};
use super::{number_value, ExpressionError};
use serde_json::Value;

/// Maximum nesting depth accepted by the parser
pub const MAX_DEPTH: usize = 64;

/// Property names that would reach into object internals in a JS host
const FORBIDDEN_PROPERTIES: &[&str] = &["constructor", "prototype", "__proto__"];

/// Parse an expression string
pub fn parse(source: &str) -> Result<Expr, ExpressionError> {
    let tokens = Lexer::new(source).tokenize()?;
    let mut parser = Parser {
        source,
        tokens,
        pos: 0,
        depth: 0,
    };

    if parser.tokens.is_empty() {
        return Err(parser.error_at(0, "empty expression"));
    }

    let expr = parser.expression()?;
    if let Some(extra) = parser.peek_spanned() {
        let message = format!("unexpected {}", extra.token.describe());
        return Err(parser.error_at(extra.position, message));
    }
    Ok(expr)
}

/// Reject property names that could escape the sandbox
pub fn check_property(name: &str) -> Result<(), ExpressionError> {
    if FORBIDDEN_PROPERTIES.contains(&name) || name.starts_with("__") {
        return Err(ExpressionError::DisallowedProperty(name.to_string()));
    }
    Ok(())
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn error_at(&self, position: usize, message: impl Into<String>) -> ExpressionError {
        ExpressionError::Syntax {
            expression: self.source.to_string(),
            position,
            message: message.into(),
        }
    }

    fn error_here(&self, message: impl Into<String>) -> ExpressionError {
        let position = self
            .peek_spanned()
            .map(|s| s.position)
            .unwrap_or(self.source.len());
        self.error_at(position, message)
    }

    fn peek_spanned(&self) -> Option<&Spanned> {
        self.tokens.get(self.pos)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ExpressionError> {
        if self.eat(&expected) {
            Ok(())
        } else {
            let found = self
                .peek()
                .map(Token::describe)
                .unwrap_or_else(|| "end of expression".to_string());
            Err(self.error_here(format!("expected {}, found {}", what, found)))
        }
    }

    fn enter(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExpressionError::TooDeep(MAX_DEPTH));
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Expr, ExpressionError> {
        self.enter()?;
        let result = self.conditional();
        self.depth -= 1;
        result
    }

    fn conditional(&mut self) -> Result<Expr, ExpressionError> {
        let test = self.nullish()?;
        if !self.eat(&Token::Question) {
            return Ok(test);
        }
        let consequent = self.expression()?;
        self.expect(Token::Colon, "':'")?;
        let alternate = self.expression()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    fn nullish(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.or()?;
        while self.eat(&Token::Nullish) {
            let right = self.or()?;
            left = logical(LogicalOp::Nullish, left, right);
        }
        Ok(left)
    }

    fn or(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.and()?;
        while self.eat(&Token::OrOr) {
            let right = self.and()?;
            left = logical(LogicalOp::Or, left, right);
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.equality()?;
        while self.eat(&Token::AndAnd) {
            let right = self.equality()?;
            left = logical(LogicalOp::And, left, right);
        }
        Ok(left)
    }

    fn equality(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.relational()?;
        loop {
            let op = match self.peek() {
                Some(Token::EqEq) => BinaryOp::LooseEq,
                Some(Token::NotEq) => BinaryOp::LooseNe,
                Some(Token::EqEqEq) => BinaryOp::StrictEq,
                Some(Token::NotEqEq) => BinaryOp::StrictNe,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.relational()?;
            left = binary(op, left, right);
        }
    }

    fn relational(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.additive()?;
            left = binary(op, left, right);
        }
    }

    fn additive(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(left),
            };
            self.pos += 1;
            let right = self.unary()?;
            left = binary(op, left, right);
        }
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        let op = match self.peek() {
            Some(Token::Not) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Negate,
            Some(Token::Plus) => UnaryOp::Plus,
            _ => return self.postfix(),
        };
        self.pos += 1;
        self.enter()?;
        let operand = self.unary();
        self.depth -= 1;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand?),
        })
    }

    fn postfix(&mut self) -> Result<Expr, ExpressionError> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    expr = self.member(expr, false)?;
                }
                Some(Token::QuestionDot) => {
                    self.pos += 1;
                    if self.eat(&Token::LBracket) {
                        expr = self.index(expr, true)?;
                    } else {
                        expr = self.member(expr, true)?;
                    }
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    expr = self.index(expr, false)?;
                }
                Some(Token::LParen) => {
                    let Expr::Ident(function) = expr else {
                        return Err(self.error_here("only named functions can be called"));
                    };
                    self.pos += 1;
                    let args = self.arguments()?;
                    expr = Expr::Call { function, args };
                }
                _ => return Ok(expr),
            }
        }
    }

    fn member(&mut self, object: Expr, optional: bool) -> Result<Expr, ExpressionError> {
        let property = match self.advance() {
            Some(Token::Ident(name)) => name,
            _ => return Err(self.error_here("expected property name")),
        };
        check_property(&property)?;

        if self.eat(&Token::LParen) {
            let args = self.arguments()?;
            return Ok(Expr::MethodCall {
                object: Box::new(object),
                method: property,
                args,
                optional,
            });
        }

        Ok(Expr::Member {
            object: Box::new(object),
            property,
            optional,
        })
    }

    fn index(&mut self, object: Expr, optional: bool) -> Result<Expr, ExpressionError> {
        let index = self.expression()?;
        if let Expr::Literal(Value::String(name)) = &index {
            check_property(name)?;
        }
        self.expect(Token::RBracket, "']'")?;
        Ok(Expr::Index {
            object: Box::new(object),
            index: Box::new(index),
            optional,
        })
    }

    /// Comma-separated arguments after an already consumed '('
    fn arguments(&mut self) -> Result<Vec<Expr>, ExpressionError> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expression()?);
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            self.expect(Token::Comma, "',' or ')'")?;
        }
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        let Some(token) = self.advance() else {
            return Err(self.error_here("unexpected end of expression"));
        };

        match token {
            Token::Number(n) => Ok(Expr::Literal(number_value(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Ident(name) => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" | "undefined" => Expr::Literal(Value::Null),
                _ => Expr::Ident(name),
            }),
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if self.eat(&Token::RBracket) {
                    return Ok(Expr::Array(items));
                }
                loop {
                    items.push(self.expression()?);
                    if self.eat(&Token::RBracket) {
                        return Ok(Expr::Array(items));
                    }
                    self.expect(Token::Comma, "',' or ']'")?;
                }
            }
            other => {
                self.pos -= 1;
                Err(self.error_here(format!("unexpected {}", other.describe())))
            }
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

fn logical(op: LogicalOp, left: Expr, right: Expr) -> Expr {
    Expr::Logical {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_precedence() {
        let expr = parse("1 + 2 * 3").unwrap();
        assert_eq!(
            expr,
            binary(
                BinaryOp::Add,
                Expr::Literal(json!(1)),
                binary(BinaryOp::Mul, Expr::Literal(json!(2)), Expr::Literal(json!(3)))
            )
        );
    }

    #[test]
    fn test_member_chain_and_call() {
        let expr = parse("round(formValue.items[0].price, 2)").unwrap();
        let Expr::Call { function, args } = expr else {
            panic!("expected call");
        };
        assert_eq!(function, "round");
        assert_eq!(args.len(), 2);
    }

    #[test]
    fn test_ternary_is_right_associative() {
        let expr = parse("a ? 1 : b ? 2 : 3").unwrap();
        let Expr::Conditional { alternate, .. } = expr else {
            panic!("expected conditional");
        };
        assert!(matches!(*alternate, Expr::Conditional { .. }));
    }

    #[test]
    fn test_method_call() {
        let expr = parse("fieldValue?.trim()").unwrap();
        assert!(matches!(
            expr,
            Expr::MethodCall { ref method, optional: true, .. } if method == "trim"
        ));
    }

    #[test]
    fn test_forbidden_properties() {
        assert_eq!(
            parse("formValue.constructor"),
            Err(ExpressionError::DisallowedProperty("constructor".into()))
        );
        assert_eq!(
            parse("formValue['__proto__']"),
            Err(ExpressionError::DisallowedProperty("__proto__".into()))
        );
        assert!(parse("fieldValue.__defineGetter__").is_err());
    }

    #[test]
    fn test_only_named_calls() {
        assert!(parse("(formValue.f)(1)").is_err());
        assert!(parse("formValue.items[0]()").is_err());
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse("").is_err());
        assert!(parse("1 +").is_err());
        assert!(parse("(1 + 2").is_err());
        assert!(parse("a b").is_err());
        assert!(parse("a ? b").is_err());
        assert!(parse("new Function('x')").is_err());
    }

    #[test]
    fn test_depth_limit() {
        let deep = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(parse(&deep), Err(ExpressionError::TooDeep(MAX_DEPTH)));
        let negations = format!("{}true", "!".repeat(100));
        assert_eq!(parse(&negations), Err(ExpressionError::TooDeep(MAX_DEPTH)));
    }
}
