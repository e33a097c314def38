//! Operator overloading semantics.
//!
//! PaperScript lets objects such as `Point` and `Size` overload `+`, `-`, `*`,
//! `/`, `%`, `==` and `!=`. The operator tables here drive both the JavaScript
//! dispatch functions emitted into every component (see
//! [`crate::operators::dispatch_runtime`]) and [`binary_op`] / [`unary_op`],
//! which evaluate the same rules over [`Value`]s.

use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Errors raised by operator dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The operator has no overload hook and no native fallback.
    #[error("Unsupported operator: {0}")]
    UnsupportedOperator(String),
}

/// Binary operators PaperScript can overload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equals,
    NotEquals,
}

impl BinaryOperator {
    /// Every operator, in emission order.
    pub const ALL: [Self; 7] = [
        Self::Add,
        Self::Subtract,
        Self::Multiply,
        Self::Divide,
        Self::Modulo,
        Self::Equals,
        Self::NotEquals,
    ];

    /// Parses an operator symbol as it appears in compiled PaperScript.
    pub fn parse(symbol: &str) -> Result<Self, DispatchError> {
        Self::ALL
            .into_iter()
            .find(|op| op.symbol() == symbol)
            .ok_or_else(|| DispatchError::UnsupportedOperator(symbol.to_string()))
    }

    /// The JavaScript operator symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::Equals => "==",
            Self::NotEquals => "!=",
        }
    }

    /// The overload method looked up on the left operand.
    ///
    /// `!=` has no hook of its own: it calls `__equals` and negates the result.
    pub fn method(self) -> &'static str {
        match self {
            Self::Add => "__add",
            Self::Subtract => "__subtract",
            Self::Multiply => "__multiply",
            Self::Divide => "__divide",
            Self::Modulo => "__modulo",
            Self::Equals | Self::NotEquals => "__equals",
        }
    }

    /// Whether the overload result is logically negated.
    pub fn negates(self) -> bool {
        self == Self::NotEquals
    }
}

/// Unary operators PaperScript can overload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Negate,
    Identity,
}

impl UnaryOperator {
    /// Every operator, in emission order.
    pub const ALL: [Self; 2] = [Self::Negate, Self::Identity];

    /// Parses an operator symbol. Unknown symbols have no overload hook.
    pub fn parse(symbol: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.symbol() == symbol)
    }

    /// The JavaScript operator symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Negate => "-",
            Self::Identity => "+",
        }
    }

    /// The overload method looked up on the operand.
    pub fn method(self) -> &'static str {
        match self {
            Self::Negate => "__negate",
            Self::Identity => "__self",
        }
    }
}

/// An object that may implement overload methods.
pub trait Operand: fmt::Debug {
    /// Calls `method` with an optional argument, or returns `None` if the
    /// object does not expose that method.
    fn invoke(&self, method: &str, argument: Option<&Value>) -> Option<Value>;
}

/// A JavaScript value, reduced to what operator dispatch can observe.
#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Object(Rc<dyn Operand>),
}

impl Value {
    /// JavaScript truthiness.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Object(_) => true,
        }
    }

    /// JavaScript `ToNumber`.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined | Value::Object(_) => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::Str(s) => {
                let s = s.trim();
                if s.is_empty() {
                    0.0
                } else {
                    s.parse().unwrap_or(f64::NAN)
                }
            }
        }
    }

    /// Returns the number if this is a `Number`.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the boolean if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    fn to_js_string(&self) -> String {
        match self {
            Value::Undefined => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::Str(s) => s.clone(),
            Value::Object(_) => "[object Object]".to_string(),
        }
    }

    fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// JavaScript `==`.
    fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() || b.is_nullish() => a.is_nullish() && b.is_nullish(),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Object(_), _) | (_, Value::Object(_)) => false,
            (Value::Str(a), Value::Str(b)) => a == b,
            (a, b) => a.to_number() == b.to_number(),
        }
    }
}

/// JavaScript `String(n)`: shortest round-trip digits, plain notation for
/// magnitudes in `[1e-6, 1e21)` and exponent notation outside it.
fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }

    // `{:e}` yields the shortest digits that round-trip, e.g. "1.2345e3".
    let formatted = format!("{:e}", n.abs());
    let Some((mantissa, exponent)) = formatted.split_once('e') else {
        return n.to_string();
    };
    let Ok(exponent) = exponent.parse::<i32>() else {
        return n.to_string();
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let len = digits.len() as i32;
    // Position of the decimal point relative to the first digit.
    let point = exponent + 1;

    let body = if len <= point && point <= 21 {
        format!("{digits}{}", "0".repeat((point - len) as usize))
    } else if 0 < point && point <= 21 {
        let (int, frac) = digits.split_at(point as usize);
        format!("{int}.{frac}")
    } else if -6 < point && point <= 0 {
        format!("0.{}{digits}", "0".repeat(point.unsigned_abs() as usize))
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        let (lead, rest) = digits.split_at(1);
        if rest.is_empty() {
            format!("{lead}e{sign}{}", exponent.abs())
        } else {
            format!("{lead}.{rest}e{sign}{}", exponent.abs())
        }
    };

    if n < 0.0 {
        format!("-{body}")
    } else {
        body
    }
}

/// Evaluates `left <symbol> right` the way `__paper_binary_op` does.
///
/// If `left` exposes the operator's overload method it is called (negated for
/// `!=`); otherwise the native JavaScript operator applies.
pub fn binary_op(left: &Value, symbol: &str, right: &Value) -> Result<Value, DispatchError> {
    let op = BinaryOperator::parse(symbol)?;

    if let Value::Object(object) = left {
        if let Some(result) = object.invoke(op.method(), Some(right)) {
            return Ok(if op.negates() {
                Value::Bool(!result.truthy())
            } else {
                result
            });
        }
    }

    Ok(match op {
        BinaryOperator::Add => match (left, right) {
            (Value::Str(_) | Value::Object(_), _) | (_, Value::Str(_) | Value::Object(_)) => {
                Value::Str(left.to_js_string() + &right.to_js_string())
            }
            _ => Value::Number(left.to_number() + right.to_number()),
        },
        BinaryOperator::Subtract => Value::Number(left.to_number() - right.to_number()),
        BinaryOperator::Multiply => Value::Number(left.to_number() * right.to_number()),
        BinaryOperator::Divide => Value::Number(left.to_number() / right.to_number()),
        BinaryOperator::Modulo => Value::Number(left.to_number() % right.to_number()),
        BinaryOperator::Equals => Value::Bool(left.loose_equals(right)),
        BinaryOperator::NotEquals => Value::Bool(!left.loose_equals(right)),
    })
}

/// Evaluates `<symbol>value` the way `__paper_unary_op` does.
pub fn unary_op(symbol: &str, value: &Value) -> Value {
    let op = UnaryOperator::parse(symbol);

    if let (Some(op), Value::Object(object)) = (op, value) {
        if let Some(result) = object.invoke(op.method(), None) {
            return result;
        }
    }

    match op {
        Some(UnaryOperator::Negate) => Value::Number(-value.to_number()),
        _ => Value::Number(value.to_number()),
    }
}
