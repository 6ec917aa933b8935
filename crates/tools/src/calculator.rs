//! Calculator tool — exact arithmetic for the agent.
//!
//! Accepts either a structured call `{a, b, op}` or a free-form
//! `expression`. Expressions go through a small recursive-descent parser:
//! `+ - * / % ^`, parentheses, unary minus, decimals, the constants `pi` and
//! `e`, and a handful of one-argument functions (`sqrt`, `abs`, `ln`, ...).

use async_trait::async_trait;
use parley_core::error::ToolError;
use parley_core::tool::{Tool, ToolContext, ToolResult};

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate arithmetic exactly. Pass either {\"a\": 2, \"b\": 2, \"op\": \"+\"} or \
         {\"expression\": \"(2 + 3) * 4\"}. Supports + - * / % ^, parentheses, pi, e, \
         sqrt, abs, round, ln, log10, exp, sin, cos, tan."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "minLength": 1,
                    "description": "A mathematical expression, e.g. '(2 + 3) * 4'"
                },
                "a": { "type": "number", "description": "Left operand" },
                "b": { "type": "number", "description": "Right operand" },
                "op": {
                    "type": "string",
                    "enum": ["+", "-", "*", "/", "^", "%"],
                    "description": "Operator applied as a <op> b"
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(
        &self,
        arguments: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError> {
        let invalid = |reason: &str| ToolError::InvalidInput {
            tool_name: "calculator".into(),
            reason: reason.into(),
        };

        let (shown, value) = if let Some(expr) = arguments["expression"].as_str() {
            (expr.trim().to_string(), evaluate(expr))
        } else {
            let (Some(a), Some(b), Some(op)) = (
                arguments["a"].as_f64(),
                arguments["b"].as_f64(),
                arguments["op"].as_str(),
            ) else {
                return Err(invalid("provide either 'expression' or all of 'a', 'b', 'op'"));
            };
            (
                format!("{} {op} {}", format_number(a), format_number(b)),
                apply(a, op, b),
            )
        };

        match value {
            Ok(v) => Ok(ToolResult::ok(format_number(v))
                .with_data(serde_json::json!({ "expression": shown, "result": v }))),
            Err(e) => Ok(ToolResult {
                success: false,
                output: format!("Error: {e}"),
                data: None,
            }),
        }
    }
}

/// Integers print without a fractional part; everything else is rounded to
/// 10 significant decimals so `0.1 + 0.2` reads as `0.3`.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    let rounded = (value * 1e10).round() / 1e10;
    format!("{rounded}")
}

fn apply(a: f64, op: &str, b: f64) -> Result<f64, String> {
    let result = match op {
        "+" => a + b,
        "-" => a - b,
        "*" => a * b,
        "/" if b == 0.0 => return Err("Division by zero".into()),
        "/" => a / b,
        "%" if b == 0.0 => return Err("Modulo by zero".into()),
        "%" => a % b,
        "^" => a.powf(b),
        other => return Err(format!("Unknown operator: {other}")),
    };
    finite(result)
}

fn finite(value: f64) -> Result<f64, String> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err("Result is not a finite number".into())
    }
}

// ── Recursive-descent expression evaluator ────────────────────────────────

const MAX_EXPRESSION_LEN: usize = 1024;
const MAX_DEPTH: usize = 64;

/// Evaluate a mathematical expression string.
pub fn evaluate(expr: &str) -> Result<f64, String> {
    if expr.len() > MAX_EXPRESSION_LEN {
        return Err(format!("Expression longer than {MAX_EXPRESSION_LEN} characters"));
    }
    let tokens = tokenize(expr)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        depth: 0,
    };
    let result = parser.parse_expr()?;
    if let Some(tok) = parser.tokens.get(parser.pos) {
        return Err(format!("Unexpected token at position {}: {tok:?}", parser.pos));
    }
    finite(result)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '+' | '-' | '*' | '/' | '%' | '^' => {
                tokens.push(Token::Op(c));
                i += 1;
            }
            '×' => {
                tokens.push(Token::Op('*'));
                i += 1;
            }
            '÷' => {
                tokens.push(Token::Op('/'));
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text.parse().map_err(|_| format!("Invalid number: {text}"))?;
                tokens.push(Token::Number(n));
            }
            c if c.is_ascii_alphabetic() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_alphanumeric() {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                tokens.push(Token::Ident(ident.to_ascii_lowercase()));
            }
            c => return Err(format!("Unexpected character: '{c}'")),
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    /// Runs `f` one nesting level deeper. Parentheses, function calls and
    /// unary signs each count as a level.
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, String>) -> Result<T, String> {
        if self.depth >= MAX_DEPTH {
            return Err("Expression nested too deeply".into());
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn peek_op(&self) -> Option<char> {
        match self.tokens.get(self.pos) {
            Some(Token::Op(c)) => Some(*c),
            _ => None,
        }
    }

    fn next(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    // expr = term (('+' | '-') term)*
    fn parse_expr(&mut self) -> Result<f64, String> {
        let mut left = self.parse_term()?;
        while let Some(op @ ('+' | '-')) = self.peek_op() {
            self.pos += 1;
            let right = self.parse_term()?;
            left = if op == '+' { left + right } else { left - right };
        }
        Ok(left)
    }

    // term = unary (('*' | '/' | '%') unary)*
    fn parse_term(&mut self) -> Result<f64, String> {
        let mut left = self.parse_unary()?;
        while let Some(op @ ('*' | '/' | '%')) = self.peek_op() {
            self.pos += 1;
            let right = self.parse_unary()?;
            left = apply(left, &op.to_string(), right)?;
        }
        Ok(left)
    }

    // unary = ('-' | '+') unary | power
    fn parse_unary(&mut self) -> Result<f64, String> {
        match self.peek_op() {
            Some('-') => {
                self.pos += 1;
                Ok(-self.nested(Self::parse_unary)?)
            }
            Some('+') => {
                self.pos += 1;
                self.nested(Self::parse_unary)
            }
            _ => self.parse_power(),
        }
    }

    // power = primary ('^' unary)?   (right-associative, so 2^3^2 = 2^9)
    fn parse_power(&mut self) -> Result<f64, String> {
        let base = self.parse_primary()?;
        if self.peek_op() == Some('^') {
            self.pos += 1;
            let exponent = self.nested(Self::parse_unary)?;
            return apply(base, "^", exponent);
        }
        Ok(base)
    }

    // primary = NUMBER | CONST | FUNC '(' expr ')' | '(' expr ')'
    fn parse_primary(&mut self) -> Result<f64, String> {
        match self.next().cloned() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.nested(Self::parse_expr)?;
                self.expect_rparen()?;
                Ok(value)
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "pi" => Ok(std::f64::consts::PI),
                "e" => Ok(std::f64::consts::E),
                _ => {
                    if self.next() != Some(&Token::LParen) {
                        return Err(format!("Expected '(' after {name}"));
                    }
                    let arg = self.nested(Self::parse_expr)?;
                    self.expect_rparen()?;
                    call(&name, arg)
                }
            },
            Some(tok) => Err(format!("Unexpected token: {tok:?}")),
            None => Err("Unexpected end of expression".into()),
        }
    }

    fn expect_rparen(&mut self) -> Result<(), String> {
        match self.next() {
            Some(Token::RParen) => Ok(()),
            _ => Err("Expected closing parenthesis".into()),
        }
    }
}

fn call(name: &str, x: f64) -> Result<f64, String> {
    let value = match name {
        "sqrt" if x < 0.0 => return Err("Square root of a negative number".into()),
        "sqrt" => x.sqrt(),
        "abs" => x.abs(),
        "round" => x.round(),
        "ln" | "log" => x.ln(),
        "log10" => x.log10(),
        "exp" => x.exp(),
        "sin" => x.sin(),
        "cos" => x.cos(),
        "tan" => x.tan(),
        other => return Err(format!("Unknown function: {other}")),
    };
    finite(value)
}

// ── Tests ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::message::SessionId;
    use parley_core::tool::ToolRegistry;

    fn ctx() -> ToolContext {
        ToolContext::new(SessionId::from("s1"))
    }

    #[test]
    fn precedence_and_parentheses() {
        assert_eq!(evaluate("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(evaluate("(2 + 3) * 4").unwrap(), 20.0);
        assert_eq!(evaluate("((1 + 2) * (3 + 4))").unwrap(), 21.0);
    }

    #[test]
    fn power_binds_tighter_than_unary_minus() {
        assert_eq!(evaluate("-2^2").unwrap(), -4.0);
        assert_eq!(evaluate("2^3^2").unwrap(), 512.0);
        assert_eq!(evaluate("2^-1").unwrap(), 0.5);
    }

    #[test]
    fn modulo_and_division() {
        assert_eq!(evaluate("10 % 4").unwrap(), 2.0);
        assert_eq!(evaluate("10 / 4").unwrap(), 2.5);
        assert!(evaluate("1 / 0").is_err());
        assert!(evaluate("1 % 0").is_err());
    }

    #[test]
    fn constants_and_functions() {
        assert_eq!(evaluate("sqrt(16)").unwrap(), 4.0);
        assert_eq!(evaluate("abs(-3) + round(2.6)").unwrap(), 6.0);
        assert!((evaluate("2 * pi").unwrap() - std::f64::consts::TAU).abs() < 1e-12);
        assert!(evaluate("sqrt(-1)").is_err());
        assert!(evaluate("frobnicate(2)").is_err());
    }

    #[test]
    fn malformed_expressions() {
        assert!(evaluate("").is_err());
        assert!(evaluate("2 +").is_err());
        assert!(evaluate("(1 + 2").is_err());
        assert!(evaluate("2 $ 3").is_err());
    }

    #[test]
    fn deep_nesting_is_an_error_not_a_crash() {
        let parens = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert!(evaluate(&parens).is_err());

        let nested = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(evaluate(&nested).unwrap_err(), "Expression nested too deeply");

        let signs = format!("{}1", "-".repeat(500));
        assert_eq!(evaluate(&signs).unwrap_err(), "Expression nested too deeply");

        let shallow = format!("{}1{}", "(".repeat(20), ")".repeat(20));
        assert_eq!(evaluate(&shallow).unwrap(), 1.0);
        assert_eq!(evaluate("--2").unwrap(), 2.0);
    }

    #[tokio::test]
    async fn runaway_expression_returns_an_unsuccessful_result() {
        let expression = format!("{}1{}", "(".repeat(6000), ")".repeat(6000));
        let result = CalculatorTool
            .execute(serde_json::json!({ "expression": expression }), &ctx())
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.starts_with("Error:"));
    }

    #[test]
    fn number_formatting() {
        assert_eq!(format_number(4.0), "4");
        assert_eq!(format_number(0.1 + 0.2), "0.3");
        assert_eq!(format_number(-2.5), "-2.5");
    }

    #[tokio::test]
    async fn structured_call() {
        let result = CalculatorTool
            .execute(serde_json::json!({"a": 2, "b": 2, "op": "+"}), &ctx())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "4");
        assert_eq!(result.data.unwrap()["expression"], "2 + 2");
    }

    #[tokio::test]
    async fn expression_call() {
        let result = CalculatorTool
            .execute(serde_json::json!({"expression": "10 / 3"}), &ctx())
            .await
            .unwrap();
        assert!(result.output.starts_with("3.333"));
    }

    #[tokio::test]
    async fn arithmetic_error_is_an_unsuccessful_result() {
        let result = CalculatorTool
            .execute(serde_json::json!({"a": 1, "b": 0, "op": "/"}), &ctx())
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.output.contains("Division by zero"));
    }

    #[tokio::test]
    async fn incomplete_structured_call_is_invalid_input() {
        let err = CalculatorTool
            .execute(serde_json::json!({"a": 1, "op": "+"}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn registry_rejects_unknown_operator_before_execution() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(CalculatorTool));
        let err = registry
            .invoke("calculator", serde_json::json!({"a": 1, "b": 2, "op": "**"}), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput { .. }));
    }
}
