//! Logic expressions used by `when` and `allowFailure`
//!
//! Grammar (parsed, never executed):
//! - literals `true`, `false`, `1`, `0` and `!` negation
//! - `A == B`, `A != B`: case-insensitive string equality after trimming
//!   surrounding spaces and quotes
//! - `A > B`, `A >= B`, `A < B`, `A <= B`: integer comparison
//!
//! Plain text that matches none of these evaluates to the caller's default.
//! A comparison with other than two operands, or a non-integer operand to a
//! numeric comparison, is an error.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExprError {
    #[error("expression '{expression}': '{operator}' needs exactly two operands")]
    Operands {
        expression: String,
        operator: &'static str,
    },

    #[error("expression '{expression}': '{operand}' is not an integer")]
    NotInteger { expression: String, operand: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Ne,
    Eq,
    Ge,
    Le,
    Gt,
    Lt,
}

impl Operator {
    // Two-character operators first so `>=` is not read as `>`
    const ALL: [Operator; 6] = [
        Operator::Ne,
        Operator::Eq,
        Operator::Ge,
        Operator::Le,
        Operator::Gt,
        Operator::Lt,
    ];

    fn symbol(&self) -> &'static str {
        match self {
            Operator::Ne => "!=",
            Operator::Eq => "==",
            Operator::Ge => ">=",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Lt => "<",
        }
    }
}

/// Evaluates `expression`, returning `default` for empty or unrecognized text
pub fn logic_expression(expression: &str, default: bool) -> Result<bool, ExprError> {
    let expression = expression.trim();
    if expression.is_empty() {
        return Ok(default);
    }

    if let Some(literal) = parse_bool(expression) {
        return Ok(literal);
    }

    if let Some(operator) = Operator::ALL
        .into_iter()
        .find(|op| expression.contains(op.symbol()))
    {
        return compare(expression, operator);
    }

    if let Some(inner) = expression.strip_prefix('!') {
        return logic_expression(inner, !default).map(|v| !v);
    }

    Ok(default)
}

fn parse_bool(s: &str) -> Option<bool> {
    match strip_marks(s).to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

fn compare(expression: &str, operator: Operator) -> Result<bool, ExprError> {
    let parts: Vec<&str> = expression.split(operator.symbol()).collect();
    let [left, right] = parts.as_slice() else {
        return Err(ExprError::Operands {
            expression: expression.to_string(),
            operator: operator.symbol(),
        });
    };
    let (left, right) = (strip_marks(left), strip_marks(right));

    match operator {
        Operator::Eq => Ok(left.eq_ignore_ascii_case(right)),
        Operator::Ne => Ok(!left.eq_ignore_ascii_case(right)),
        _ => {
            let l = parse_int(expression, left)?;
            let r = parse_int(expression, right)?;
            Ok(match operator {
                Operator::Gt => l > r,
                Operator::Ge => l >= r,
                Operator::Lt => l < r,
                _ => l <= r,
            })
        }
    }
}

fn parse_int(expression: &str, operand: &str) -> Result<i64, ExprError> {
    operand.parse().map_err(|_| ExprError::NotInteger {
        expression: expression.to_string(),
        operand: operand.to_string(),
    })
}

/// Trims whitespace and one layer of matching quotes
fn strip_marks(s: &str) -> &str {
    let s = s.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = s.strip_prefix(quote).and_then(|i| i.strip_suffix(quote)) {
            return inner.trim();
        }
    }
    s
}
