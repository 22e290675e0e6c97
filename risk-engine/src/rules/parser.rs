//! Tokenizer and recursive-descent parser for rule expressions
//!
//! Precedence, loosest first:
//!
//! ```text
//! or      := and   ( ("||" | "or")  and )*
//! and     := cmp   ( ("&&" | "and") cmp )*
//! cmp     := sum   ( ("==" | "!=" | "<" | "<=" | ">" | ">=") sum )?
//! sum     := term  ( ("+" | "-") term )*
//! term    := unary ( ("*" | "/" | "%") unary )*
//! unary   := ("!" | "not" | "-") unary | primary
//! primary := number | string | "true" | "false" | ident | "(" or ")"
//! ```

use super::eval::{BinaryOp, Expr, FactValue, UnaryOp};

/// Nesting limit, keeps hostile rule text from blowing the stack
const MAX_DEPTH: usize = 64;

/// Operator limit; chained operators build left-deep trees that evaluate
/// recursively
const MAX_OPERATORS: usize = 256;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    True,
    False,
    And,
    Or,
    Not,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        let next = chars.get(i + 1).copied();
        let (token, len) = match (c, next) {
            ('&', Some('&')) => (Token::And, 2),
            ('|', Some('|')) => (Token::Or, 2),
            ('=', Some('=')) => (Token::Eq, 2),
            ('!', Some('=')) => (Token::Ne, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('<', _) => (Token::Lt, 1),
            ('>', _) => (Token::Gt, 1),
            ('!', _) => (Token::Not, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('=', _) => return Err(format!("'=' at {} is not an operator, use '=='", i)),
            ('\'' | '"', _) => {
                let quote = c;
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|&ch| ch == quote)
                    .map(|p| start + p)
                    .ok_or_else(|| format!("unterminated string starting at {}", i))?;
                let text: String = chars[start..end].iter().collect();
                (Token::Str(text), end + 1 - i)
            }
            (d, _) if d.is_ascii_digit() => {
                let start = i;
                let mut end = i;
                while end < chars.len() && (chars[end].is_ascii_digit() || chars[end] == '_' || chars[end] == '.') {
                    end += 1;
                }
                let raw: String = chars[start..end].iter().filter(|&&ch| ch != '_').collect();
                let value = raw
                    .parse::<f64>()
                    .map_err(|_| format!("invalid number '{}' at {}", raw, start))?;
                (Token::Number(value), end - start)
            }
            (a, _) if a.is_ascii_alphabetic() || a == '_' => {
                let start = i;
                let mut end = i;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let word: String = chars[start..end].iter().collect();
                let token = match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word),
                };
                (token, end - start)
            }
            (other, _) => return Err(format!("unexpected character '{}' at {}", other, i)),
        };

        tokens.push(token);
        i += len;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    operators: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
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

    fn enter(&mut self) -> Result<(), String> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(format!("expression nested deeper than {}", MAX_DEPTH));
        }
        Ok(())
    }

    fn operator(&mut self) -> Result<(), String> {
        self.operators += 1;
        if self.operators > MAX_OPERATORS {
            return Err(format!("expression has more than {} operators", MAX_OPERATORS));
        }
        Ok(())
    }

    fn or(&mut self) -> Result<Expr, String> {
        let mut lhs = self.and()?;
        while self.eat(&Token::Or) {
            self.operator()?;
            let rhs = self.and()?;
            lhs = Expr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and(&mut self) -> Result<Expr, String> {
        let mut lhs = self.comparison()?;
        while self.eat(&Token::And) {
            self.operator()?;
            let rhs = self.comparison()?;
            lhs = Expr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn comparison(&mut self) -> Result<Expr, String> {
        let lhs = self.sum()?;
        let op = match self.peek() {
            Some(Token::Eq) => BinaryOp::Eq,
            Some(Token::Ne) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            _ => return Ok(lhs),
        };
        self.pos += 1;
        self.operator()?;
        let rhs = self.sum()?;
        Ok(Expr::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn sum(&mut self) -> Result<Expr, String> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            self.operator()?;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn term(&mut self) -> Result<Expr, String> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.pos += 1;
            self.operator()?;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn unary(&mut self) -> Result<Expr, String> {
        let op = match self.peek() {
            Some(Token::Not) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Neg,
            _ => return self.primary(),
        };
        self.pos += 1;
        self.enter()?;
        self.operator()?;
        let operand = self.unary()?;
        self.depth -= 1;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn primary(&mut self) -> Result<Expr, String> {
        match self.advance() {
            Some(Token::Number(n)) => Ok(Expr::Literal(FactValue::Number(n))),
            Some(Token::Str(s)) => Ok(Expr::Literal(FactValue::Text(s))),
            Some(Token::True) => Ok(Expr::Literal(FactValue::Bool(true))),
            Some(Token::False) => Ok(Expr::Literal(FactValue::Bool(false))),
            Some(Token::Ident(name)) => Ok(Expr::Fact(name)),
            Some(Token::LParen) => {
                self.enter()?;
                let inner = self.or()?;
                self.depth -= 1;
                if !self.eat(&Token::RParen) {
                    return Err("expected ')'".to_string());
                }
                Ok(inner)
            }
            Some(other) => Err(format!("unexpected token {:?}", other)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

/// Parse rule text into an expression tree
pub(crate) fn parse(input: &str) -> Result<Expr, String> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err("empty expression".to_string());
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        operators: 0,
    };
    let expr = parser.or()?;
    if let Some(extra) = parser.peek() {
        return Err(format!("unexpected trailing token {:?}", extra));
    }
    Ok(expr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::eval::Facts;

    fn eval(input: &str, facts: &Facts) -> FactValue {
        parse(input).unwrap().eval(facts).unwrap()
    }

    #[test]
    fn test_precedence() {
        let facts = Facts::new();
        assert_eq!(eval("1 + 2 * 3", &facts), FactValue::Number(7.0));
        assert_eq!(eval("(1 + 2) * 3", &facts), FactValue::Number(9.0));
        assert_eq!(eval("-2 + 5", &facts), FactValue::Number(3.0));
        assert_eq!(eval("10 % 4", &facts), FactValue::Number(2.0));
        assert_eq!(eval("true || false && false", &facts), FactValue::Bool(true));
        assert_eq!(eval("not (1 > 2)", &facts), FactValue::Bool(true));
        assert!(parse("not 1 > 2").unwrap().eval(&facts).is_err());
    }

    #[test]
    fn test_facts_and_strings() {
        let mut facts = Facts::new();
        facts.insert("amount".into(), FactValue::Number(2_000_000.0));
        facts.insert("payment_method".into(), FactValue::Text("crypto".into()));

        assert_eq!(eval("amount > 1_000_000", &facts), FactValue::Bool(true));
        assert_eq!(
            eval("payment_method == 'crypto' and amount >= 1000.5", &facts),
            FactValue::Bool(true)
        );
        assert_eq!(eval("payment_method != \"card\"", &facts), FactValue::Bool(true));
    }

    #[test]
    fn test_malformed_input() {
        assert!(parse("").is_err());
        assert!(parse("amount >").is_err());
        assert!(parse("amount = 5").is_err());
        assert!(parse("(amount > 5").is_err());
        assert!(parse("amount > 5)").is_err());
        assert!(parse("'open").is_err());
        assert!(parse("1.2.3 > 0").is_err());
        assert!(parse("amount # 3").is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}true{}", "(".repeat(100), ")".repeat(100));
        assert!(parse(&deep).is_err());
        let shallow = format!("{}true{}", "(".repeat(10), ")".repeat(10));
        assert!(parse(&shallow).is_ok());
    }

    #[test]
    fn test_operator_limit() {
        let long_sum = format!("{} > 0", vec!["1"; 2000].join(" + "));
        let err = parse(&long_sum).unwrap_err();
        assert!(err.contains("operators"));

        let long_or = vec!["false"; 2000].join(" or ");
        assert!(parse(&long_or).is_err());

        let short_sum = format!("{} > 0", vec!["1"; 100].join(" + "));
        let facts = Facts::new();
        assert_eq!(eval(&short_sum, &facts), FactValue::Bool(true));
    }
}
