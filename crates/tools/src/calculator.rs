//! Calculation capability: evaluates arithmetic expressions.
//!
//! Covers what research answers usually need (growth rates, ratios,
//! averages): `+ - * / % ^`, parentheses, unary minus, the constants `pi`
//! and `e`, and the functions `sqrt abs ln log10 exp round floor ceil min
//! max`.

use async_trait::async_trait;
use quarry_core::error::ToolError;
use quarry_core::tool::{Capability, InvocationContext};

const NAME: &str = "calculate";

pub struct Calculate;

#[async_trait]
impl Capability for Calculate {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression, e.g. '(259.2 / 302.2 - 1) * 100' or \
         '(120 / 80) ^ (1 / 3) - 1'. Supports + - * / % ^, parentheses, pi, e, \
         sqrt, abs, ln, log10, exp, round, floor, ceil, min, max."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The expression to evaluate"
                }
            },
            "required": ["expression"]
        })
    }

    async fn invoke(
        &self,
        arguments: serde_json::Value,
        _ctx: &InvocationContext,
    ) -> Result<String, ToolError> {
        let expr = arguments["expression"]
            .as_str()
            .ok_or_else(|| ToolError::invalid(NAME, "Missing 'expression' argument"))?;

        let value = evaluate(expr).map_err(|e| ToolError::failed(NAME, e))?;
        Ok(format_number(value))
    }
}

/// Integers print without a fractional part; everything else keeps at
/// most ten significant decimals.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        let s = format!("{value:.10}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

/// Evaluate an expression string.
pub fn evaluate(expr: &str) -> Result<f64, String> {
    let tokens = lex(expr)?;
    let mut parser = Parser { tokens: &tokens, pos: 0 };
    let value = parser.expr()?;
    if let Some(tok) = parser.peek() {
        return Err(format!("Unexpected {tok:?} at token {}", parser.pos));
    }
    if !value.is_finite() {
        return Err("Result is not a finite number".into());
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
}

fn lex(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '+' | '-' | '*' | '/' | '%' | '^' => {
                tokens.push(Token::Op(c));
                chars.next();
            }
            '(' => {
                tokens.push(Token::LParen);
                chars.next();
            }
            ')' => {
                tokens.push(Token::RParen);
                chars.next();
            }
            ',' => {
                tokens.push(Token::Comma);
                chars.next();
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut literal = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' || d == '_' {
                        if d != '_' {
                            literal.push(d);
                        }
                        chars.next();
                    } else {
                        break;
                    }
                }
                let n = literal
                    .parse()
                    .map_err(|_| format!("Invalid number: {literal}"))?;
                tokens.push(Token::Num(n));
            }
            c if c.is_ascii_alphabetic() => {
                let mut ident = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() {
                        ident.push(d.to_ascii_lowercase());
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(format!("Unexpected character: '{other}'")),
        }
    }

    if tokens.is_empty() {
        return Err("Empty expression".into());
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    // expr := term (('+' | '-') term)*
    fn expr(&mut self) -> Result<f64, String> {
        let mut acc = self.term()?;
        loop {
            if self.eat(&Token::Op('+')) {
                acc += self.term()?;
            } else if self.eat(&Token::Op('-')) {
                acc -= self.term()?;
            } else {
                return Ok(acc);
            }
        }
    }

    // term := unary (('*' | '/' | '%') unary)*
    fn term(&mut self) -> Result<f64, String> {
        let mut acc = self.unary()?;
        loop {
            if self.eat(&Token::Op('*')) {
                acc *= self.unary()?;
            } else if self.eat(&Token::Op('/')) {
                let rhs = self.unary()?;
                if rhs == 0.0 {
                    return Err("Division by zero".into());
                }
                acc /= rhs;
            } else if self.eat(&Token::Op('%')) {
                let rhs = self.unary()?;
                if rhs == 0.0 {
                    return Err("Modulo by zero".into());
                }
                acc %= rhs;
            } else {
                return Ok(acc);
            }
        }
    }

    // unary := '-' unary | power
    fn unary(&mut self) -> Result<f64, String> {
        if self.eat(&Token::Op('-')) {
            return Ok(-self.unary()?);
        }
        if self.eat(&Token::Op('+')) {
            return self.unary();
        }
        self.power()
    }

    // power := primary ('^' unary)?   (right-associative)
    fn power(&mut self) -> Result<f64, String> {
        let base = self.primary()?;
        if self.eat(&Token::Op('^')) {
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    // primary := NUM | IDENT | IDENT '(' args ')' | '(' expr ')'
    fn primary(&mut self) -> Result<f64, String> {
        match self.advance() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                if !self.eat(&Token::RParen) {
                    return Err("Expected closing parenthesis".into());
                }
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if self.eat(&Token::LParen) {
                    let args = self.args()?;
                    call(&name, &args)
                } else {
                    constant(&name)
                }
            }
            Some(tok) => Err(format!("Unexpected {tok:?}")),
            None => Err("Unexpected end of expression".into()),
        }
    }

    fn args(&mut self) -> Result<Vec<f64>, String> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            if !self.eat(&Token::Comma) {
                return Err("Expected ',' or ')' in argument list".into());
            }
        }
    }
}

fn constant(name: &str) -> Result<f64, String> {
    match name {
        "pi" => Ok(std::f64::consts::PI),
        "e" => Ok(std::f64::consts::E),
        _ => Err(format!("Unknown name '{name}'")),
    }
}

fn call(name: &str, args: &[f64]) -> Result<f64, String> {
    let one = |f: fn(f64) -> f64| match args {
        [x] => Ok(f(*x)),
        _ => Err(format!("{name}() takes exactly one argument")),
    };

    match name {
        "sqrt" => match args {
            [x] if *x < 0.0 => Err("sqrt() of a negative number".into()),
            _ => one(f64::sqrt),
        },
        "ln" | "log10" => match args {
            [x] if *x <= 0.0 => Err(format!("{name}() needs a positive argument")),
            _ if name == "ln" => one(f64::ln),
            _ => one(f64::log10),
        },
        "abs" => one(f64::abs),
        "exp" => one(f64::exp),
        "round" => one(f64::round),
        "floor" => one(f64::floor),
        "ceil" => one(f64::ceil),
        "min" | "max" if args.is_empty() => Err(format!("{name}() needs at least one argument")),
        "min" => Ok(args.iter().copied().fold(f64::INFINITY, f64::min)),
        "max" => Ok(args.iter().copied().fold(f64::NEG_INFINITY, f64::max)),
        _ => Err(format!("Unknown function '{name}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(expr: &str, expected: f64) {
        let got = evaluate(expr).unwrap();
        assert!((got - expected).abs() < 1e-9, "{expr} = {got}, expected {expected}");
    }

    #[test]
    fn precedence_and_parentheses() {
        approx("2 + 3 * 4", 14.0);
        approx("(2 + 3) * 4", 20.0);
        approx("((1 + 2) * (3 + 4))", 21.0);
        approx("10 % 4 + 1", 3.0);
    }

    #[test]
    fn power_is_right_associative_and_binds_tighter_than_unary() {
        approx("2 ^ 3 ^ 2", 512.0);
        approx("-2 ^ 2", -4.0);
        approx("2 ^ -1", 0.5);
    }

    #[test]
    fn growth_rate_expressions() {
        approx("(259.2 / 302.2 - 1) * 100", (259.2 / 302.2 - 1.0) * 100.0);
        approx("(120 / 80) ^ (1 / 3) - 1", 1.5_f64.powf(1.0 / 3.0) - 1.0);
    }

    #[test]
    fn functions_and_constants() {
        approx("sqrt(16) + abs(-3)", 7.0);
        approx("max(1, 7, 3) - min(4, 2)", 5.0);
        approx("round(2.6) + floor(2.6) + ceil(2.1)", 8.0);
        approx("ln(e)", 1.0);
        approx("log10(1000)", 3.0);
        approx("2 * pi", 2.0 * std::f64::consts::PI);
    }

    #[test]
    fn underscores_in_numbers() {
        approx("1_000_000 / 4", 250_000.0);
    }

    #[test]
    fn errors() {
        assert!(evaluate("1 / 0").is_err());
        assert!(evaluate("2 +").is_err());
        assert!(evaluate("").is_err());
        assert!(evaluate("sqrt(-1)").is_err());
        assert!(evaluate("ln(0)").is_err());
        assert!(evaluate("foo(1)").is_err());
        assert!(evaluate("sqrt(1, 2)").is_err());
        assert!(evaluate("max()").is_err());
        assert!(evaluate("(1 + 2").is_err());
        assert!(evaluate("1 2").is_err());
        assert!(evaluate("10 ^ 400").is_err());
    }

    #[test]
    fn formatting() {
        assert_eq!(format_number(5.0), "5");
        assert_eq!(format_number(-2.0), "-2");
        assert_eq!(format_number(2.5), "2.5");
        assert_eq!(format_number(10.0 / 3.0), "3.3333333333");
    }

    #[tokio::test]
    async fn invoke_returns_formatted_result() {
        let out = Calculate
            .invoke(
                serde_json::json!({"expression": "10 / 2"}),
                &InvocationContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(out, "5");
    }

    #[tokio::test]
    async fn invoke_reports_evaluation_errors() {
        let err = Calculate
            .invoke(
                serde_json::json!({"expression": "1 / 0"}),
                &InvocationContext::default(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Division by zero"));
        assert!(err.to_string().contains("calculate"));
    }
}
