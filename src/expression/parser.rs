//! Expression parser - turns tokens into an AST.
//!
//! The parser is stateless: every call to [`ExpressionParser::parse`] creates
//! its own [`Tokenizer`], so one parser can be shared between threads.
//!
//! Precedence, loosest first: `or`, `and`, `not`, comparisons (`==`, `!=`,
//! `<`, `<=`, `>`, `>=`, `like`, `containsoneof`, `containsnone`),
//! additive (`+`, `-`), multiplicative (`*`, `/`, `%`), prefix `-`/`!`,
//! postfix (`isnull`, `notnull`). Binary operators associate to the left;
//! comparisons do not chain.

use super::error::{ParseError, ParseResult};
use super::expr::Expression;
use super::operand::{BinaryOperator, FunctionKind, Operand, OperandRegistry, UnaryOperator};
use super::token::{TokenKind, Tokenizer, DEFAULT_ESCAPE};
use crate::value::{Value, ValueType};
use std::ops::Range;
use std::sync::Arc;

const LOWEST_PRECEDENCE: u8 = 1;
const COMPARISON_PRECEDENCE: u8 = 3;
const HIGHEST_PRECEDENCE: u8 = 5;

/// Result of parsing an expression out of a larger text
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed {
    /// The expression, or `None` when the text held no expression
    pub expression: Option<Expression>,
    /// Offset of the first character not consumed by the expression. When
    /// parsing stopped at a terminator this is the terminator's position.
    pub end: usize,
}

/// Parser for the expression language
#[derive(Debug, Clone)]
pub struct ExpressionParser {
    registry: Arc<OperandRegistry>,
}

impl Default for ExpressionParser {
    fn default() -> Self {
        Self::new(Arc::new(OperandRegistry::standard()))
    }
}

impl ExpressionParser {
    pub fn new(registry: Arc<OperandRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &OperandRegistry {
        &self.registry
    }

    /// Parse a standalone expression; the whole text must be consumed
    pub fn parse_str(&self, code: &str) -> ParseResult<Expression> {
        let parsed = self.parse(code, 0, None)?;
        if parsed.end < code.len() {
            return Err(ParseError::new(
                "Unexpected text after expression",
                parsed.end..code.len(),
            ));
        }
        parsed
            .expression
            .ok_or_else(|| ParseError::new("Empty expression", 0..code.len()))
    }

    /// Parse an expression starting at `start`, stopping at the enclosing
    /// character, a `;` or the end of input
    pub fn parse(&self, code: &str, start: usize, enclosing: Option<char>) -> ParseResult<Parsed> {
        self.parse_with_escape(code, start, enclosing, DEFAULT_ESCAPE)
    }

    pub fn parse_with_escape(
        &self,
        code: &str,
        start: usize,
        enclosing: Option<char>,
        escape: char,
    ) -> ParseResult<Parsed> {
        if start > code.len() || !code.is_char_boundary(start) {
            return Err(ParseError::new("Invalid start offset", start..start));
        }

        let mut state = ParseState {
            registry: &self.registry,
            code,
            escape,
            enclosing,
            tokenizer: Tokenizer::new(),
            pos: start,
            kind: TokenKind::End,
            text: String::new(),
            span: start..start,
        };
        state.advance()?;

        if state.at_end() {
            return Ok(Parsed {
                expression: None,
                end: state.span.start,
            });
        }

        let expression = state.parse_expression()?;
        if !state.at_end() {
            return Err(state.unexpected());
        }

        Ok(Parsed {
            expression: Some(expression),
            end: state.span.start,
        })
    }
}

/// Per-call parser state with one token of lookahead
struct ParseState<'a> {
    registry: &'a OperandRegistry,
    code: &'a str,
    escape: char,
    enclosing: Option<char>,
    tokenizer: Tokenizer,
    /// Offset after the current token
    pos: usize,
    kind: TokenKind,
    text: String,
    span: Range<usize>,
}

impl<'a> ParseState<'a> {
    /// Move to the next token, skipping separators
    fn advance(&mut self) -> ParseResult<()> {
        loop {
            let next =
                self.tokenizer
                    .parse_next_token(self.code, self.pos, self.escape, self.enclosing)?;
            self.pos = next;
            if self.tokenizer.kind() != TokenKind::Separator {
                self.kind = self.tokenizer.kind();
                self.text = self.tokenizer.text().to_string();
                self.span = self.tokenizer.span();
                return Ok(());
            }
        }
    }

    fn at_end(&self) -> bool {
        matches!(self.kind, TokenKind::End | TokenKind::Terminator)
    }

    fn current_operand(&self) -> Option<Operand> {
        if self.kind == TokenKind::Keyword {
            self.registry.create_operand(&self.text)
        } else {
            None
        }
    }

    fn current_binary(&self) -> Option<BinaryOperator> {
        match self.current_operand() {
            Some(Operand::Binary(op)) => Some(op),
            _ => None,
        }
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> ParseResult<()> {
        if self.kind != kind {
            return Err(ParseError::new(
                format!("Expected {}", what),
                self.span.clone(),
            ));
        }
        self.advance()
    }

    fn unexpected(&self) -> ParseError {
        match self.kind {
            TokenKind::End | TokenKind::Terminator => {
                ParseError::new("Unexpected end of expression", self.span.clone())
            }
            TokenKind::ParenClose => ParseError::new("Unexpected ')'", self.span.clone()),
            TokenKind::ArgumentSeparator => ParseError::new("Unexpected ','", self.span.clone()),
            _ => ParseError::new(
                format!("Unexpected token '{}'", &self.code[self.span.clone()]),
                self.span.clone(),
            ),
        }
    }

    fn parse_expression(&mut self) -> ParseResult<Expression> {
        self.parse_binary(LOWEST_PRECEDENCE)
    }

    /// Parse all binary operators binding at least as tight as `level`
    fn parse_binary(&mut self, level: u8) -> ParseResult<Expression> {
        if level > HIGHEST_PRECEDENCE {
            return self.parse_unary();
        }
        if level == COMPARISON_PRECEDENCE {
            return self.parse_not();
        }

        let mut left = self.parse_binary(level + 1)?;
        while let Some(op) = self.current_binary().filter(|op| op.precedence() == level) {
            self.advance()?;
            let right = self.parse_binary(level + 1)?;
            left = combine(op, left, right);
        }
        Ok(left)
    }

    /// Parse NOT expression
    fn parse_not(&mut self) -> ParseResult<Expression> {
        if let Some(Operand::LeftUnary(op)) = self.current_operand() {
            self.advance()?;
            let operand = self.parse_not()?;
            return Ok(Expression::unary_op(
                op,
                operand.with_expected(op.operand_type()),
            ));
        }
        self.parse_comparison()
    }

    /// Parse comparison expression
    fn parse_comparison(&mut self) -> ParseResult<Expression> {
        let left = self.parse_binary(COMPARISON_PRECEDENCE + 1)?;

        let Some(op) = self.current_binary().filter(BinaryOperator::is_comparison) else {
            return Ok(left);
        };
        self.advance()?;
        let right = self.parse_binary(COMPARISON_PRECEDENCE + 1)?;

        if self.current_binary().is_some_and(|next| next.is_comparison()) {
            return Err(ParseError::new(
                "Comparison operators cannot be chained",
                self.span.clone(),
            ));
        }

        Ok(combine(op, left, right))
    }

    /// Parse prefix operators
    fn parse_unary(&mut self) -> ParseResult<Expression> {
        match self.current_operand() {
            Some(Operand::LeftUnary(op)) => {
                self.advance()?;
                let operand = self.parse_unary()?;
                Ok(Expression::unary_op(
                    op,
                    operand.with_expected(op.operand_type()),
                ))
            }
            Some(Operand::Binary(BinaryOperator::Sub)) => {
                self.advance()?;
                let operand = self.parse_unary()?;
                Ok(negate(operand))
            }
            Some(Operand::Binary(BinaryOperator::Add)) => {
                self.advance()?;
                self.parse_unary()
            }
            _ => self.parse_postfix(),
        }
    }

    /// Parse postfix operators
    fn parse_postfix(&mut self) -> ParseResult<Expression> {
        let mut expr = self.parse_primary()?;
        while let Some(Operand::RightUnary(op)) = self.current_operand() {
            self.advance()?;
            expr = Expression::unary_op(op, expr.with_expected(op.operand_type()));
        }
        Ok(expr)
    }

    /// Parse primary expression
    fn parse_primary(&mut self) -> ParseResult<Expression> {
        match self.kind {
            TokenKind::ParenOpen => {
                self.advance()?;
                let expr = self.parse_expression()?;
                self.expect(TokenKind::ParenClose, "')'")?;
                Ok(expr)
            }
            TokenKind::Constant => {
                let value = Value::String(std::mem::take(&mut self.text));
                self.advance()?;
                Ok(Expression::literal(value))
            }
            TokenKind::Keyword => match self.current_operand() {
                Some(Operand::Function(function)) => self.parse_function(function),
                Some(operand) => Err(ParseError::new(
                    format!(
                        "Unexpected {} operator '{}'",
                        operand.namespace(),
                        self.text
                    ),
                    self.span.clone(),
                )),
                None => self.parse_word(),
            },
            _ => Err(self.unexpected()),
        }
    }

    /// Parse a function call; the current token is the function name
    fn parse_function(&mut self, function: FunctionKind) -> ParseResult<Expression> {
        let name_span = self.span.clone();
        self.advance()?;
        self.expect(TokenKind::ParenOpen, "'(' after function name")?;

        let mut operands = Vec::new();
        if self.kind == TokenKind::ParenClose {
            self.advance()?;
        } else {
            loop {
                let operand = self.parse_expression()?;
                operands.push(operand.with_expected(function.argument_type()));
                match self.kind {
                    TokenKind::ArgumentSeparator => self.advance()?,
                    TokenKind::ParenClose => {
                        self.advance()?;
                        break;
                    }
                    _ => {
                        return Err(ParseError::new(
                            "Expected ',' or ')' in argument list",
                            self.span.clone(),
                        ))
                    }
                }
            }
        }

        if !function.accepts(operands.len()) {
            return Err(ParseError::new(
                format!(
                    "Function {} expects {} arguments, got {}",
                    function.name(),
                    function.arity_description(),
                    operands.len()
                ),
                name_span.start..self.span.start,
            ));
        }

        Ok(Expression::function(function, operands))
    }

    /// Parse a bare word: boolean, null, number or variable path
    fn parse_word(&mut self) -> ParseResult<Expression> {
        let span = self.span.clone();
        let word = std::mem::take(&mut self.text);
        self.advance()?;

        if self.kind == TokenKind::ParenOpen {
            return Err(ParseError::new(format!("Unknown function '{}'", word), span));
        }

        if word.eq_ignore_ascii_case("true") {
            return Ok(Expression::literal(true));
        }
        if word.eq_ignore_ascii_case("false") {
            return Ok(Expression::literal(false));
        }
        if word.eq_ignore_ascii_case("null") {
            return Ok(Expression::null());
        }

        if word.starts_with(|ch: char| ch.is_ascii_digit()) {
            if let Ok(i) = word.parse::<i64>() {
                return Ok(Expression::literal(i));
            }
            return match word.parse::<f64>() {
                Ok(f) if f.is_finite() => Ok(Expression::literal(f)),
                _ => Err(ParseError::new(format!("Invalid number '{}'", word), span)),
            };
        }

        let valid_path = word.split('.').all(|segment| {
            !segment.is_empty() && !segment.starts_with(|ch: char| ch.is_ascii_digit())
        });
        if !valid_path {
            return Err(ParseError::new(format!("Invalid path '{}'", word), span));
        }

        Ok(Expression::variable(word))
    }
}

/// Build a binary node, recording the operand types the operator expects
fn combine(op: BinaryOperator, left: Expression, right: Expression) -> Expression {
    let (left_type, right_type) = op.operand_types();
    Expression::binary_op(
        op,
        expect_type(left, left_type),
        expect_type(right, right_type),
    )
}

fn expect_type(expr: Expression, expected: ValueType) -> Expression {
    if expected == ValueType::Any {
        expr
    } else {
        expr.with_expected(expected)
    }
}

/// Negate an operand, folding numeric literals
fn negate(operand: Expression) -> Expression {
    match operand {
        Expression::Literal {
            value: Value::Integer(i),
            ..
        } => Expression::literal(-i),
        Expression::Literal {
            value: Value::Float(f),
            ..
        } => Expression::literal(-f),
        other => Expression::unary_op(
            UnaryOperator::Negate,
            other.with_expected(ValueType::Number),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(code: &str) -> ParseResult<Expression> {
        ExpressionParser::default().parse_str(code)
    }

    #[test]
    fn test_parse_comparison_conjunction() -> ParseResult<()> {
        let expr = parse("object.age > 30 and object.name = 'Smith'")?;
        assert_eq!(
            expr,
            Expression::and(
                Expression::gt(Expression::variable("object.age"), Expression::literal(30)),
                Expression::eq(
                    Expression::variable("object.name"),
                    Expression::literal("Smith")
                ),
            )
        );
        Ok(())
    }

    #[test]
    fn test_precedence() -> ParseResult<()> {
        let expr = parse("a or b and c")?;
        assert_eq!(expr.to_string(), "a or b and c");
        let Expression::BinaryOp { op, right, .. } = &expr else {
            panic!("expected binary op");
        };
        assert_eq!(*op, BinaryOperator::Or);
        assert!(matches!(
            **right,
            Expression::BinaryOp {
                op: BinaryOperator::And,
                ..
            }
        ));

        let expr = parse("1 + 2 * 3 == 7")?;
        assert_eq!(expr.to_string(), "1 + 2 * 3 == 7");
        assert!(matches!(
            expr,
            Expression::BinaryOp {
                op: BinaryOperator::Eq,
                ..
            }
        ));

        let expr = parse("10 - 4 - 3")?;
        assert_eq!(expr.to_string(), "10 - 4 - 3");
        Ok(())
    }

    #[test]
    fn test_not_binds_looser_than_comparison() -> ParseResult<()> {
        let expr = parse("not object.a == 1")?;
        assert!(matches!(
            expr,
            Expression::UnaryOp {
                op: UnaryOperator::Not,
                ..
            }
        ));
        assert_eq!(expr.to_string(), "not object.a == 1");

        let expr = parse("!(object.a == 1) && object.b")?;
        assert_eq!(expr.to_string(), "not object.a == 1 and object.b");
        Ok(())
    }

    #[test]
    fn test_expected_types_recorded() -> ParseResult<()> {
        let expr = parse("object.active and object.count - 1 > 2")?;
        let Expression::BinaryOp { left, right, .. } = expr else {
            panic!("expected binary op");
        };
        assert_eq!(left.output_type(), ValueType::Boolean);
        let Expression::BinaryOp { left: cmp_left, .. } = *right else {
            panic!("expected comparison");
        };
        let Expression::BinaryOp { left: count, .. } = *cmp_left else {
            panic!("expected subtraction");
        };
        assert_eq!(count.output_type(), ValueType::Number);
        Ok(())
    }

    #[test]
    fn test_functions_and_postfix() -> ParseResult<()> {
        let expr = parse("lower(object.name) like 'sm%' or object.email isnull")?;
        assert_eq!(
            expr.to_string(),
            "lower(object.name) like 'sm%' or object.email isnull"
        );

        let expr = parse("concat('a', object.b, 'c') == 'abc'")?;
        assert!(matches!(
            expr,
            Expression::BinaryOp {
                op: BinaryOperator::Eq,
                ..
            }
        ));

        let expr = parse("now() > object.created")?;
        assert!(!expr.is_constant());
        Ok(())
    }

    #[test]
    fn test_literals() -> ParseResult<()> {
        assert_eq!(parse("TRUE")?, Expression::literal(true));
        assert_eq!(parse("null")?, Expression::null());
        assert_eq!(parse("-5")?, Expression::literal(-5));
        assert_eq!(parse("2.5")?, Expression::literal(2.5));
        assert_eq!(
            parse("-object.x")?,
            Expression::unary_op(
                UnaryOperator::Negate,
                Expression::variable("object.x").with_expected(ValueType::Number)
            )
        );
        Ok(())
    }

    #[test]
    fn test_parse_errors() {
        let err = parse("object.a == ").unwrap_err();
        assert_eq!(err.message, "Unexpected end of expression");

        let err = parse("lower(object.a, 'x')").unwrap_err();
        assert_eq!(err.message, "Function lower expects 1 arguments, got 2");

        let err = parse("frobnicate(1)").unwrap_err();
        assert_eq!(err.message, "Unknown function 'frobnicate'");
        assert_eq!(err.span, 0..10);

        let err = parse("object.a foo 3").unwrap_err();
        assert_eq!(err.message, "Unexpected token 'foo'");

        let err = parse("(object.a == 1").unwrap_err();
        assert_eq!(err.message, "Expected ')'");

        let err = parse("a < b < c").unwrap_err();
        assert_eq!(err.message, "Comparison operators cannot be chained");

        let err = parse("object..a").unwrap_err();
        assert_eq!(err.message, "Invalid path 'object..a'");

        let err = parse("1.2.3").unwrap_err();
        assert_eq!(err.message, "Invalid number '1.2.3'");

        assert!(parse("a == 'open").is_err());
        assert!(parse("and").is_err());
    }

    #[test]
    fn test_embedded_in_template() -> ParseResult<()> {
        let parser = ExpressionParser::default();
        let template = r#"<node if="object.age >= 18 and object.name != 'x'" />"#;
        let start = template.find('"').map(|i| i + 1).unwrap_or(0);
        let parsed = parser.parse(template, start, Some('"'))?;

        assert!(parsed.expression.is_some());
        assert_eq!(&template[parsed.end..], "\" />");
        Ok(())
    }

    #[test]
    fn test_custom_escape_character() -> ParseResult<()> {
        let parser = ExpressionParser::default();
        let template = r#"<node if="object.name == 'O~'Brien\dir~~'" />"#;
        let start = template.find('"').map(|i| i + 1).unwrap_or(0);
        let parsed = parser.parse_with_escape(template, start, Some('"'), '~')?;

        assert_eq!(
            parsed.expression,
            Some(Expression::eq(
                Expression::variable("object.name"),
                Expression::literal("O'Brien\\dir~"),
            ))
        );
        assert_eq!(&template[parsed.end..], "\" />");

        // With the default escape the same text ends the constant early
        assert!(parser.parse(template, start, Some('"')).is_err());
        Ok(())
    }

    #[test]
    fn test_semicolon_and_empty_input() -> ParseResult<()> {
        let parser = ExpressionParser::default();
        let code = "object.a == 1; rest";
        let parsed = parser.parse(code, 0, None)?;
        assert_eq!(parsed.end, 13);
        assert_eq!(&code[parsed.end..], "; rest");

        let parsed = parser.parse("   ", 0, None)?;
        assert_eq!(parsed.expression, None);

        let parsed = parser.parse("x; 1 + 2", 2, None)?;
        assert_eq!(parsed.expression, Some(Expression::binary_op(
            BinaryOperator::Add,
            Expression::literal(1),
            Expression::literal(2),
        )));
        assert_eq!(parsed.end, 8);
        Ok(())
    }

    #[test]
    fn test_custom_registry() -> ParseResult<()> {
        let mut registry = OperandRegistry::standard();
        registry
            .register("eq", Operand::Binary(BinaryOperator::Eq))
            .map_err(|e| ParseError::new(e.to_string(), 0..0))?;
        let parser = ExpressionParser::new(Arc::new(registry));
        let expr = parser.parse_str("object.a eq 1")?;
        assert_eq!(
            expr,
            Expression::eq(Expression::variable("object.a"), Expression::literal(1))
        );
        Ok(())
    }
}
