//! Recursive-descent (Pratt) parser producing the expression AST.

use std::rc::Rc;

use super::{
    lexer::{tokenize, Spanned, Token},
    JsonataError,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    /// Bare `$`: the evaluation context.
    Context,
    /// `$name` variable reference.
    Var(String),
    /// Identifier path step (field access on the context).
    Name(String),
    /// `*`: all values of the context object / elements of the array.
    Wildcard,
    /// `**`: all descendant values.
    Descend,
    Path(Box<Expr>, Box<Expr>),
    Filter(Box<Expr>, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Neg(Box<Expr>),
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
    Object(Vec<(Expr, Expr)>),
    Array(Vec<Expr>),
    Call {
        name: String,
        args: Vec<Expr>,
    },
    Lambda {
        params: Vec<String>,
        body: Rc<Expr>,
    },
    Bind {
        name: String,
        value: Box<Expr>,
    },
    Block(Vec<Expr>),
    Regex {
        pattern: String,
        insensitive: bool,
    },
}

pub(crate) fn parse(source: &str) -> Result<Expr, JsonataError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser { tokens, index: 0 };
    let expr = parser.expression(0)?;
    if let Some(trailing) = parser.peek() {
        return Err(parser.error(trailing.position, "unexpected trailing input"));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    index: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.index)
    }

    fn peek_token(&self) -> Option<&Token> {
        self.peek().map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let spanned = self.tokens.get(self.index).cloned();
        if spanned.is_some() {
            self.index += 1;
        }
        spanned
    }

    fn error(&self, position: usize, message: impl Into<String>) -> JsonataError {
        JsonataError::Syntax {
            position,
            message: message.into(),
        }
    }

    fn expect(&mut self, expected: &Token, what: &str) -> Result<(), JsonataError> {
        match self.advance() {
            Some(spanned) if spanned.token == *expected => Ok(()),
            Some(spanned) => Err(self.error(spanned.position, format!("expected {what}"))),
            None => Err(self.error(usize::MAX, format!("expected {what}, found end of input"))),
        }
    }

    fn binding_power(token: &Token) -> Option<u8> {
        Some(match token {
            Token::LBracket | Token::LParen => 80,
            Token::Dot => 75,
            Token::Star | Token::Slash | Token::Percent => 60,
            Token::Plus | Token::Minus | Token::Amp => 50,
            Token::Eq | Token::Ne | Token::Lt | Token::Le | Token::Gt | Token::Ge | Token::In => 40,
            Token::And => 30,
            Token::Or => 25,
            Token::Question => 20,
            Token::Assign => 10,
            _ => return None,
        })
    }

    fn expression(&mut self, min_bp: u8) -> Result<Expr, JsonataError> {
        let mut lhs = self.prefix()?;

        while let Some(token) = self.peek_token() {
            let Some(bp) = Self::binding_power(token) else {
                break;
            };
            if bp <= min_bp {
                break;
            }
            lhs = self.infix(lhs)?;
        }

        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, JsonataError> {
        let Some(spanned) = self.advance() else {
            return Err(self.error(usize::MAX, "unexpected end of input"));
        };
        let position = spanned.position;

        match spanned.token {
            Token::Number(n) => Ok(Expr::Number(n)),
            Token::Str(s) => Ok(Expr::Str(s)),
            Token::True => Ok(Expr::Bool(true)),
            Token::False => Ok(Expr::Bool(false)),
            Token::Null => Ok(Expr::Null),
            Token::Ident(name) => Ok(Expr::Name(name)),
            Token::Var(name) => {
                if name.is_empty() {
                    Ok(Expr::Context)
                } else {
                    Ok(Expr::Var(name))
                }
            }
            Token::Star => Ok(Expr::Wildcard),
            Token::DoubleStar => Ok(Expr::Descend),
            Token::Regex {
                pattern,
                insensitive,
            } => Ok(Expr::Regex {
                pattern,
                insensitive,
            }),
            Token::Minus => {
                let operand = self.expression(70)?;
                Ok(Expr::Neg(Box::new(operand)))
            }
            Token::LParen => {
                let mut exprs = vec![self.expression(0)?];
                while self.peek_token() == Some(&Token::Semi) {
                    self.advance();
                    if self.peek_token() == Some(&Token::RParen) {
                        break;
                    }
                    exprs.push(self.expression(0)?);
                }
                self.expect(&Token::RParen, "')'")?;
                if exprs.len() == 1 {
                    Ok(exprs.pop().expect("single expression"))
                } else {
                    Ok(Expr::Block(exprs))
                }
            }
            Token::LBracket => {
                let mut items = Vec::new();
                if self.peek_token() != Some(&Token::RBracket) {
                    loop {
                        items.push(self.expression(0)?);
                        if self.peek_token() == Some(&Token::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBracket, "']'")?;
                Ok(Expr::Array(items))
            }
            Token::LBrace => {
                let mut entries = Vec::new();
                if self.peek_token() != Some(&Token::RBrace) {
                    loop {
                        let key = self.expression(0)?;
                        self.expect(&Token::Colon, "':' in object constructor")?;
                        let value = self.expression(0)?;
                        entries.push((key, value));
                        if self.peek_token() == Some(&Token::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RBrace, "'}'")?;
                Ok(Expr::Object(entries))
            }
            Token::Function => {
                self.expect(&Token::LParen, "'(' after function")?;
                let mut params = Vec::new();
                if self.peek_token() != Some(&Token::RParen) {
                    loop {
                        match self.advance() {
                            Some(Spanned {
                                token: Token::Var(name),
                                ..
                            }) if !name.is_empty() => params.push(name),
                            Some(s) => {
                                return Err(
                                    self.error(s.position, "expected '$param' in function signature")
                                )
                            }
                            None => return Err(self.error(usize::MAX, "unterminated function")),
                        }
                        if self.peek_token() == Some(&Token::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RParen, "')' after parameters")?;
                self.expect(&Token::LBrace, "'{' before function body")?;
                let body = self.expression(0)?;
                self.expect(&Token::RBrace, "'}' after function body")?;
                Ok(Expr::Lambda {
                    params,
                    body: Rc::new(body),
                })
            }
            _ => Err(self.error(position, "unexpected token")),
        }
    }

    fn infix(&mut self, lhs: Expr) -> Result<Expr, JsonataError> {
        let Some(spanned) = self.advance() else {
            return Err(self.error(usize::MAX, "unexpected end of input"));
        };
        let position = spanned.position;

        match spanned.token {
            Token::Dot => {
                let rhs = self.expression(75)?;
                Ok(Expr::Path(Box::new(lhs), Box::new(rhs)))
            }
            Token::LBracket => {
                let predicate = self.expression(0)?;
                self.expect(&Token::RBracket, "']' after predicate")?;
                Ok(Expr::Filter(Box::new(lhs), Box::new(predicate)))
            }
            Token::LParen => {
                let Expr::Var(name) = lhs else {
                    return Err(self.error(position, "only '$function' references can be called"));
                };
                let mut args = Vec::new();
                if self.peek_token() != Some(&Token::RParen) {
                    loop {
                        args.push(self.expression(0)?);
                        if self.peek_token() == Some(&Token::Comma) {
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                self.expect(&Token::RParen, "')' after arguments")?;
                Ok(Expr::Call { name, args })
            }
            Token::Question => {
                let then = self.expression(0)?;
                let otherwise = if self.peek_token() == Some(&Token::Colon) {
                    self.advance();
                    Some(Box::new(self.expression(0)?))
                } else {
                    None
                };
                Ok(Expr::Ternary {
                    cond: Box::new(lhs),
                    then: Box::new(then),
                    otherwise,
                })
            }
            Token::Assign => {
                let Expr::Var(name) = lhs else {
                    return Err(self.error(position, "':=' requires a '$variable' on the left"));
                };
                let value = self.expression(9)?;
                Ok(Expr::Bind {
                    name,
                    value: Box::new(value),
                })
            }
            Token::Star => self.binary(BinOp::Mul, lhs, 60),
            Token::Slash => self.binary(BinOp::Div, lhs, 60),
            Token::Percent => self.binary(BinOp::Mod, lhs, 60),
            Token::Plus => self.binary(BinOp::Add, lhs, 50),
            Token::Minus => self.binary(BinOp::Sub, lhs, 50),
            Token::Amp => self.binary(BinOp::Concat, lhs, 50),
            Token::Eq => self.binary(BinOp::Eq, lhs, 40),
            Token::Ne => self.binary(BinOp::Ne, lhs, 40),
            Token::Lt => self.binary(BinOp::Lt, lhs, 40),
            Token::Le => self.binary(BinOp::Le, lhs, 40),
            Token::Gt => self.binary(BinOp::Gt, lhs, 40),
            Token::Ge => self.binary(BinOp::Ge, lhs, 40),
            Token::In => self.binary(BinOp::In, lhs, 40),
            Token::And => self.binary(BinOp::And, lhs, 30),
            Token::Or => self.binary(BinOp::Or, lhs, 25),
            _ => Err(self.error(position, "unexpected operator")),
        }
    }

    fn binary(&mut self, op: BinOp, lhs: Expr, bp: u8) -> Result<Expr, JsonataError> {
        let rhs = self.expression(bp)?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_path() {
        let expr = parse("account.orders").unwrap();
        assert_eq!(
            expr,
            Expr::Path(
                Box::new(Expr::Name("account".into())),
                Box::new(Expr::Name("orders".into()))
            )
        );
    }

    #[test]
    fn test_parse_precedence() {
        // 1 + 2 * 3 parses as 1 + (2 * 3)
        let expr = parse("1 + 2 * 3").unwrap();
        match expr {
            Expr::Binary(BinOp::Add, lhs, rhs) => {
                assert_eq!(*lhs, Expr::Number(1.0));
                assert!(matches!(*rhs, Expr::Binary(BinOp::Mul, _, _)));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_parse_filter_and_call() {
        let expr = parse("$count(items[price > 10])").unwrap();
        match expr {
            Expr::Call { name, args } => {
                assert_eq!(name, "count");
                assert!(matches!(args[0], Expr::Filter(_, _)));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_parse_object_and_array() {
        let expr = parse(r#"{"a": [1, 2], "b": x}"#).unwrap();
        match expr {
            Expr::Object(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].0, Expr::Str("a".into()));
                assert!(matches!(entries[0].1, Expr::Array(_)));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_parse_ternary_without_else() {
        let expr = parse("a > 1 ? \"big\"").unwrap();
        assert!(matches!(expr, Expr::Ternary { otherwise: None, .. }));
    }

    #[test]
    fn test_parse_lambda() {
        let expr = parse("function($x) { $x * 2 }").unwrap();
        match expr {
            Expr::Lambda { params, .. } => assert_eq!(params, vec!["x".to_string()]),
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_parse_bind_and_block() {
        let expr = parse("($x := 2; $x + 1)").unwrap();
        match expr {
            Expr::Block(exprs) => {
                assert!(matches!(exprs[0], Expr::Bind { .. }));
                assert_eq!(exprs.len(), 2);
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_parse_descendants() {
        let expr = parse("**.price").unwrap();
        assert!(matches!(expr, Expr::Path(base, _) if *base == Expr::Descend));
    }

    #[test]
    fn test_assign_requires_variable() {
        assert!(parse("a := 1").is_err());
    }

    #[test]
    fn test_trailing_input_rejected() {
        assert!(parse("1 1").is_err());
    }

    #[test]
    fn test_unterminated_object_rejected() {
        assert!(parse("{\"a\": 1").is_err());
    }
}
