use winnow::ascii::{digit1, multispace0};
use winnow::combinator::{alt, not, opt, preceded, terminated};
use winnow::error::{ContextError, ErrMode, StrContext, StrContextValue};
use winnow::token::{literal, one_of, take_while};
use winnow::{ModalResult, Parser};

use serde_json::Value;

use crate::ast::*;

const KEYWORDS: &[&str] = &["and", "or", "not", "in", "matches", "true", "false", "null"];

fn make_cut_error(desc: &'static str) -> ErrMode<ContextError<StrContext>> {
    let mut e = ContextError::new();
    e.push(StrContext::Expected(StrContextValue::Description(desc)));
    ErrMode::Cut(e)
}

fn backtrack() -> ErrMode<ContextError<StrContext>> {
    ErrMode::Backtrack(ContextError::new())
}

/// Whitespace consumer (including newlines).
fn ws<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    multispace0.parse_next(input)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Parse an identifier: [A-Za-z_][A-Za-z0-9_]*
fn identifier<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        take_while(1, |c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., is_ident_char),
    )
        .take()
        .parse_next(input)
}

/// A word operator such as `and`; must not be followed by an identifier character.
fn keyword<'i>(
    word: &'static str,
) -> impl Parser<&'i str, &'i str, ErrMode<ContextError<StrContext>>> {
    terminated(literal(word), not(one_of(is_ident_char)))
}

/// Parse a quoted string (single or double quotes) with escape support.
fn quoted_string(input: &mut &str) -> ModalResult<String> {
    let quote = one_of(['"', '\'']).parse_next(input)?;
    let mut s = String::new();
    loop {
        let c = winnow::token::any
            .parse_next(input)
            .map_err(|_: ErrMode<ContextError>| make_cut_error("closing quote"))?;
        match c {
            '\\' => {
                let esc = winnow::token::any.parse_next(input)?;
                match esc {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    '\\' => s.push('\\'),
                    '"' => s.push('"'),
                    '\'' => s.push('\''),
                    other => {
                        s.push('\\');
                        s.push(other);
                    }
                }
            }
            c if c == quote => break,
            other => s.push(other),
        }
    }
    Ok(s)
}

/// Parse a float: digits, '.', digits.
fn float_value(input: &mut &str) -> ModalResult<Value> {
    let s: &str = (digit1, '.', digit1).take().parse_next(input)?;
    let f: f64 = s.parse().map_err(|_| backtrack())?;
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(backtrack)
}

/// Parse an unsigned integer; negation is a unary operator.
fn integer_value(input: &mut &str) -> ModalResult<Value> {
    let s: &str = digit1.parse_next(input)?;
    let i: i64 = s.parse().map_err(|_| backtrack())?;
    Ok(Value::from(i))
}

fn constant(input: &mut &str) -> ModalResult<Value> {
    alt((
        keyword("true").value(Value::Bool(true)),
        keyword("false").value(Value::Bool(false)),
        keyword("null").value(Value::Null),
    ))
    .parse_next(input)
}

fn literal_expr(input: &mut &str) -> ModalResult<Expr> {
    alt((
        quoted_string.map(|s| Expr::Literal(Value::String(s))),
        float_value.map(Expr::Literal),
        integer_value.map(Expr::Literal),
        constant.map(Expr::Literal),
    ))
    .parse_next(input)
}

/// Parse a comma-separated list of expressions up to `close`.
fn expr_list(input: &mut &str, mut close: char) -> ModalResult<Vec<Expr>> {
    let mut items = Vec::new();
    let _ = ws.parse_next(input)?;
    if opt(close).parse_next(input)?.is_some() {
        return Ok(items);
    }
    loop {
        let _ = ws.parse_next(input)?;
        items.push(or_expr.parse_next(input)?);
        let _ = ws.parse_next(input)?;
        if opt(',').parse_next(input)?.is_some() {
            continue;
        }
        let _ = close
            .parse_next(input)
            .map_err(|_: ErrMode<ContextError>| make_cut_error("',' or closing bracket"))?;
        break;
    }
    Ok(items)
}

fn array_expr(input: &mut &str) -> ModalResult<Expr> {
    let _ = '['.parse_next(input)?;
    let items = expr_list(input, ']')?;
    Ok(Expr::Array(items))
}

fn paren_expr(input: &mut &str) -> ModalResult<Expr> {
    let _ = '('.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let inner = or_expr.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    let _ = ')'
        .parse_next(input)
        .map_err(|_: ErrMode<ContextError>| make_cut_error("closing parenthesis"))?;
    Ok(inner)
}

/// Variable reference or function call.
fn name_expr(input: &mut &str) -> ModalResult<Expr> {
    let name = identifier.parse_next(input)?;
    if KEYWORDS.contains(&name) {
        return Err(backtrack());
    }
    if opt('(').parse_next(input)?.is_some() {
        let args = expr_list(input, ')')?;
        return Ok(Expr::Call(name.to_string(), args));
    }
    Ok(Expr::Variable(name.to_string()))
}

fn primary(input: &mut &str) -> ModalResult<Expr> {
    alt((literal_expr, array_expr, paren_expr, name_expr))
        .context(StrContext::Expected(StrContextValue::Description(
            "operand",
        )))
        .parse_next(input)
}

/// primary ( '.' identifier | '[' expr ']' )*
fn postfix(input: &mut &str) -> ModalResult<Expr> {
    let mut target = primary.parse_next(input)?;
    loop {
        if let Some(name) = opt(preceded('.', identifier)).parse_next(input)? {
            target = Expr::Member(Box::new(target), name.to_string());
        } else if opt('[').parse_next(input)?.is_some() {
            let _ = ws.parse_next(input)?;
            let index = or_expr.parse_next(input)?;
            let _ = ws.parse_next(input)?;
            let _ = ']'
                .parse_next(input)
                .map_err(|_: ErrMode<ContextError>| make_cut_error("closing bracket"))?;
            target = Expr::Index(Box::new(target), Box::new(index));
        } else {
            break;
        }
    }
    Ok(target)
}

fn unary(input: &mut &str) -> ModalResult<Expr> {
    let _ = ws.parse_next(input)?;
    let op = opt(alt((
        keyword("not").value(UnaryOp::Not),
        terminated('!', not('=')).value(UnaryOp::Not),
        '-'.value(UnaryOp::Neg),
    )))
    .parse_next(input)?;
    match op {
        Some(op) => {
            let operand = unary.parse_next(input)?;
            Ok(Expr::unary(op, operand))
        }
        None => postfix.parse_next(input),
    }
}

fn multiplicative(input: &mut &str) -> ModalResult<Expr> {
    let mut lhs = unary.parse_next(input)?;
    loop {
        let _ = ws.parse_next(input)?;
        let op = opt(alt(('*'.value(BinaryOp::Mul), '/'.value(BinaryOp::Div)))).parse_next(input)?;
        let Some(op) = op else { break };
        let rhs = unary.parse_next(input)?;
        lhs = Expr::binary(op, lhs, rhs);
    }
    Ok(lhs)
}

fn additive(input: &mut &str) -> ModalResult<Expr> {
    let mut lhs = multiplicative.parse_next(input)?;
    loop {
        let _ = ws.parse_next(input)?;
        let op = opt(alt(('+'.value(BinaryOp::Add), '-'.value(BinaryOp::Sub)))).parse_next(input)?;
        let Some(op) = op else { break };
        let rhs = multiplicative.parse_next(input)?;
        lhs = Expr::binary(op, lhs, rhs);
    }
    Ok(lhs)
}

fn concat(input: &mut &str) -> ModalResult<Expr> {
    let mut lhs = additive.parse_next(input)?;
    loop {
        let _ = ws.parse_next(input)?;
        if opt('~').parse_next(input)?.is_none() {
            break;
        }
        let rhs = additive.parse_next(input)?;
        lhs = Expr::binary(BinaryOp::Concat, lhs, rhs);
    }
    Ok(lhs)
}

fn comparison_op(input: &mut &str) -> ModalResult<BinaryOp> {
    alt((
        literal("==").value(BinaryOp::Eq),
        literal("!=").value(BinaryOp::NotEq),
        literal("<=").value(BinaryOp::LtEq),
        literal(">=").value(BinaryOp::GtEq),
        literal("<").value(BinaryOp::Lt),
        literal(">").value(BinaryOp::Gt),
        (keyword("not"), ws, keyword("in")).value(BinaryOp::NotIn),
        keyword("in").value(BinaryOp::In),
        keyword("matches").value(BinaryOp::Matches),
    ))
    .parse_next(input)
}

/// Comparisons do not chain: `a == b == c` is rejected as trailing input.
fn comparison(input: &mut &str) -> ModalResult<Expr> {
    let lhs = concat.parse_next(input)?;
    let _ = ws.parse_next(input)?;
    match opt(comparison_op).parse_next(input)? {
        Some(op) => {
            let rhs = concat.parse_next(input)?;
            Ok(Expr::binary(op, lhs, rhs))
        }
        None => Ok(lhs),
    }
}

fn and_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut lhs = comparison.parse_next(input)?;
    loop {
        let _ = ws.parse_next(input)?;
        if opt(alt((literal("&&"), keyword("and")))).parse_next(input)?.is_none() {
            break;
        }
        let rhs = comparison.parse_next(input)?;
        lhs = Expr::binary(BinaryOp::And, lhs, rhs);
    }
    Ok(lhs)
}

fn or_expr(input: &mut &str) -> ModalResult<Expr> {
    let mut lhs = and_expr.parse_next(input)?;
    loop {
        let _ = ws.parse_next(input)?;
        if opt(alt((literal("||"), keyword("or")))).parse_next(input)?.is_none() {
            break;
        }
        let rhs = and_expr.parse_next(input)?;
        lhs = Expr::binary(BinaryOp::Or, lhs, rhs);
    }
    Ok(lhs)
}

/// Public entry point.
pub fn parse(input: &str) -> std::result::Result<Expr, shape_types::ShapeError> {
    let mut remaining = input;
    let result = (ws, or_expr, ws).parse_next(&mut remaining);

    let to_error = |remaining: &str, message: String| {
        let snippet = remaining.chars().take(40).collect::<String>();
        shape_types::ShapeError::ExpressionParse {
            offset: input.len() - remaining.len(),
            message,
            snippet: if snippet.is_empty() { None } else { Some(snippet) },
        }
    };

    match result {
        Ok((_, expr, _)) if remaining.is_empty() => Ok(expr),
        Ok(_) => Err(to_error(remaining, "unexpected trailing input".into())),
        Err(e) => {
            let message = format!("{}", e);
            let message = if message.is_empty() {
                "invalid expression".to_string()
            } else {
                message
            };
            Err(to_error(remaining, message))
        }
    }
}
