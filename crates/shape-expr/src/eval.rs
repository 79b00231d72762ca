//! Evaluation of parsed expressions against a variable context.

use serde_json::{Map, Number, Value};

use shape_types::{Result, ShapeError};

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::parser::parse;

/// An expression evaluator bound to a fixed set of variables.
///
/// Conditions for field visibility, finisher eligibility, and validators all
/// evaluate through a `Resolver`, so they share one naming convention.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    variables: Map<String, Value>,
}

impl Resolver {
    pub fn new(variables: Map<String, Value>) -> Self {
        Self { variables }
    }

    pub fn variables(&self) -> &Map<String, Value> {
        &self.variables
    }

    /// Parse and evaluate `source`.
    pub fn evaluate(&self, source: &str) -> Result<Value> {
        tracing::trace!(expression = source, "Evaluating expression");
        let expr = parse(source)?;
        self.eval(&expr)
    }

    /// Parse and evaluate `source`, coercing the result with [`is_truthy`].
    pub fn evaluate_bool(&self, source: &str) -> Result<bool> {
        self.evaluate(source).map(|v| is_truthy(&v))
    }

    /// Evaluate an already-parsed expression.
    pub fn eval(&self, expr: &Expr) -> Result<Value> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Array(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            Expr::Variable(name) => Ok(self.variables.get(name).cloned().unwrap_or(Value::Null)),
            Expr::Member(target, name) => {
                let target = self.eval(target)?;
                Ok(target.get(name).cloned().unwrap_or(Value::Null))
            }
            Expr::Index(target, index) => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                Ok(index_value(&target, &index))
            }
            Expr::Unary(UnaryOp::Not, operand) => Ok(Value::Bool(!is_truthy(&self.eval(operand)?))),
            Expr::Unary(UnaryOp::Neg, operand) => {
                let value = self.eval(operand)?;
                match to_number(&value) {
                    Some(Num::Int(i)) => Ok(i
                        .checked_neg()
                        .map(Value::from)
                        .unwrap_or_else(|| float(-(i as f64)))),
                    Some(Num::Float(f)) => Ok(float(-f)),
                    None => Err(type_error("-", &value)),
                }
            }
            Expr::Binary(BinaryOp::And, lhs, rhs) => {
                if !is_truthy(&self.eval(lhs)?) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(is_truthy(&self.eval(rhs)?)))
            }
            Expr::Binary(BinaryOp::Or, lhs, rhs) => {
                if is_truthy(&self.eval(lhs)?) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(is_truthy(&self.eval(rhs)?)))
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                binary(*op, &lhs, &rhs)
            }
            Expr::Call(name, args) => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>>>()?;
                call(name, &args)
            }
        }
    }
}

/// Truthiness used for conditions: `null`, `false`, zero, `""`, `"0"`, and
/// empty arrays/objects are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !(s.is_empty() || s == "0"),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// String form of a value as used by `~`, `matches`, and string functions.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "1".to_string(),
        Value::Bool(false) => String::new(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Loose equality: numbers compare numerically (numeric strings included),
/// booleans compare by truthiness, and `null` equals empty values.
pub fn loose_eq(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(b), other) | (other, Value::Bool(b)) => *b == is_truthy(other),
        (Value::Null, other) | (other, Value::Null) => match other {
            Value::String(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            _ => false,
        },
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            match (to_number(lhs), to_number(rhs)) {
                (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
                _ => false,
            }
        }
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| loose_eq(x, y))
        }
        _ => lhs == rhs,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn to_number(value: &Value) -> Option<Num> {
    match value {
        Value::Null => Some(Num::Int(0)),
        Value::Number(n) => n
            .as_i64()
            .map(Num::Int)
            .or_else(|| n.as_f64().map(Num::Float)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .map(Num::Int)
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(Num::Float))
        }
        _ => None,
    }
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn type_error(op: &str, value: &Value) -> ShapeError {
    ShapeError::Expression(format!("operator '{op}' cannot be applied to {value}"))
}

fn index_value(target: &Value, index: &Value) -> Value {
    match (target, index) {
        (Value::Array(items), Value::Number(n)) => n
            .as_u64()
            .and_then(|i| items.get(i as usize))
            .cloned()
            .unwrap_or(Value::Null),
        (Value::Object(map), key) => map.get(&stringify(key)).cloned().unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    let symbol = match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        _ => "/",
    };
    let a = to_number(lhs).ok_or_else(|| type_error(symbol, lhs))?;
    let b = to_number(rhs).ok_or_else(|| type_error(symbol, rhs))?;

    if let (Num::Int(x), Num::Int(y)) = (a, b) {
        let exact = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Sub => x.checked_sub(y),
            BinaryOp::Mul => x.checked_mul(y),
            _ if x.checked_rem(y) == Some(0) => x.checked_div(y),
            _ => None,
        };
        if let Some(v) = exact {
            return Ok(Value::from(v));
        }
    }

    let (x, y) = (a.as_f64(), b.as_f64());
    match op {
        BinaryOp::Add => Ok(float(x + y)),
        BinaryOp::Sub => Ok(float(x - y)),
        BinaryOp::Mul => Ok(float(x * y)),
        _ if y == 0.0 => Err(ShapeError::Expression("division by zero".into())),
        _ => Ok(float(x / y)),
    }
}

/// Values without a common order, such as text against a number, compare as
/// false. Operands usually come from visitor input.
fn compare(op: BinaryOp, lhs: &Value, rhs: &Value) -> bool {
    let ordering = match (lhs, rhs) {
        (Value::String(a), Value::String(b)) => match (to_number(lhs), to_number(rhs)) {
            (Some(x), Some(y)) => x.as_f64().partial_cmp(&y.as_f64()),
            _ => Some(a.cmp(b)),
        },
        _ => match (to_number(lhs), to_number(rhs)) {
            (Some(x), Some(y)) => x.as_f64().partial_cmp(&y.as_f64()),
            _ => None,
        },
    };
    let Some(ordering) = ordering else {
        tracing::trace!(%lhs, %rhs, "Values have no common order");
        return false;
    };
    match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::LtEq => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool> {
    match haystack {
        Value::Null => Ok(false),
        Value::Array(items) => Ok(items.iter().any(|item| loose_eq(item, needle))),
        Value::String(s) => Ok(s.contains(&stringify(needle))),
        other => Err(type_error("in", other)),
    }
}

/// Compile a `matches` pattern. Accepts both bare patterns and
/// `/pattern/flags` delimited ones.
fn compile_pattern(pattern: &str) -> Result<regex::Regex> {
    let (body, flags) = match pattern.strip_prefix('/').and_then(|rest| rest.rsplit_once('/')) {
        Some((body, flags)) => (body, flags),
        None => (pattern, ""),
    };
    let mut builder = regex::RegexBuilder::new(body);
    for flag in flags.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            'u' => &mut builder,
            other => {
                return Err(ShapeError::Expression(format!(
                    "unsupported regex flag '{other}'"
                )))
            }
        };
    }
    builder
        .build()
        .map_err(|e| ShapeError::Expression(format!("invalid pattern '{pattern}': {e}")))
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value> {
    let result = match op {
        BinaryOp::Eq => Value::Bool(loose_eq(lhs, rhs)),
        BinaryOp::NotEq => Value::Bool(!loose_eq(lhs, rhs)),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            Value::Bool(compare(op, lhs, rhs))
        }
        BinaryOp::In => Value::Bool(contains(rhs, lhs)?),
        BinaryOp::NotIn => Value::Bool(!contains(rhs, lhs)?),
        BinaryOp::Matches => {
            let pattern = compile_pattern(&stringify(rhs))?;
            Value::Bool(pattern.is_match(&stringify(lhs)))
        }
        BinaryOp::Concat => Value::String(stringify(lhs) + &stringify(rhs)),
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            arithmetic(op, lhs, rhs)?
        }
        BinaryOp::And | BinaryOp::Or => unreachable!("logical operators short-circuit in eval"),
    };
    Ok(result)
}

fn expect_args(name: &str, args: &[Value], count: usize) -> Result<()> {
    if args.len() != count {
        return Err(ShapeError::Expression(format!(
            "{name}() takes {count} argument(s), {} given",
            args.len()
        )));
    }
    Ok(())
}

fn call(name: &str, args: &[Value]) -> Result<Value> {
    match name {
        "empty" => {
            expect_args(name, args, 1)?;
            Ok(Value::Bool(!is_truthy(&args[0])))
        }
        "count" => {
            expect_args(name, args, 1)?;
            let n = match &args[0] {
                Value::Null => 0,
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                Value::String(s) => s.chars().count(),
                other => return Err(type_error("count", other)),
            };
            Ok(Value::from(n as u64))
        }
        "lower" => {
            expect_args(name, args, 1)?;
            Ok(Value::String(stringify(&args[0]).to_lowercase()))
        }
        "upper" => {
            expect_args(name, args, 1)?;
            Ok(Value::String(stringify(&args[0]).to_uppercase()))
        }
        "trim" => {
            expect_args(name, args, 1)?;
            Ok(Value::String(stringify(&args[0]).trim().to_string()))
        }
        "contains" => {
            expect_args(name, args, 2)?;
            Ok(Value::Bool(contains(&args[0], &args[1])?))
        }
        "starts_with" => {
            expect_args(name, args, 2)?;
            Ok(Value::Bool(stringify(&args[0]).starts_with(&stringify(&args[1]))))
        }
        "ends_with" => {
            expect_args(name, args, 2)?;
            Ok(Value::Bool(stringify(&args[0]).ends_with(&stringify(&args[1]))))
        }
        other => Err(ShapeError::Expression(format!("unknown function '{other}'"))),
    }
}
