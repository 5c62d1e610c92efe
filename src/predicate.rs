//! Rule conditions
//!
//! | syntax       | meaning                                           |
//! |--------------|---------------------------------------------------|
//! | `a>1` `a<1` `a>=1` `a<=1` | gauge comparison                     |
//! | `a=1` `a=blue` | sensor equality                                 |
//! | `g@b`        | group `g` enters state `b`                        |
//! | `g@b->c`     | group `g` enters state `c` from state `b`         |
//! | `g@b->`      | group `g` leaves state `b` for any other state    |

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::sampler::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Less,
    Greater,
    LessOrEqual,
    GreaterOrEqual,
}

impl Comparison {
    pub fn apply(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Less => value < threshold,
            Self::Greater => value > threshold,
            Self::LessOrEqual => value <= threshold,
            Self::GreaterOrEqual => value >= threshold,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Less => "<",
            Self::Greater => ">",
            Self::LessOrEqual => "<=",
            Self::GreaterOrEqual => ">=",
        }
    }
}

/// A member of a state group, written `group@member`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateRef {
    pub group: String,
    pub member: String,
}

impl StateRef {
    pub fn new(group: &str, member: &str) -> Self {
        Self {
            group: group.to_string(),
            member: member.to_string(),
        }
    }
}

impl FromStr for StateRef {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (group, member) = s
            .trim()
            .split_once('@')
            .ok_or_else(|| invalid(s, "expected `group@state`"))?;
        Ok(Self {
            group: identifier(s, group)?,
            member: identifier(s, member)?,
        })
    }
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.group, self.member)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        quantity: String,
        op: Comparison,
        threshold: f64,
    },
    Equals {
        quantity: String,
        literal: String,
    },
    Entered {
        group: String,
        to: String,
    },
    Moved {
        group: String,
        from: String,
        to: String,
    },
    Exited {
        group: String,
        from: String,
    },
}

impl Predicate {
    /// State predicates depend on the transitions of the current tick
    pub fn is_state(&self) -> bool {
        matches!(
            self,
            Self::Entered { .. } | Self::Moved { .. } | Self::Exited { .. }
        )
    }

    /// Evaluate a gauge or sensor predicate; `None` means not yet sampled
    pub fn matches_value(&self, value: Option<&Value>) -> bool {
        match (self, value) {
            (Self::Compare { op, threshold, .. }, Some(Value::Number(n))) => {
                op.apply(*n, *threshold)
            }
            (Self::Equals { literal, .. }, Some(Value::Text(text))) => text == literal,
            (Self::Equals { literal, .. }, Some(Value::Number(n))) => {
                literal.parse::<f64>().is_ok_and(|l| l == *n)
            }
            _ => false,
        }
    }
}

impl FromStr for Predicate {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();

        if let Some((group, rest)) = input.split_once('@') {
            let group = identifier(s, group)?;
            return match rest.split_once("->") {
                Some((from, "")) => Ok(Self::Exited {
                    group,
                    from: identifier(s, from)?,
                }),
                Some((from, to)) => Ok(Self::Moved {
                    group,
                    from: identifier(s, from)?,
                    to: identifier(s, to)?,
                }),
                None => Ok(Self::Entered {
                    group,
                    to: identifier(s, rest)?,
                }),
            };
        }

        let at = input
            .find(['<', '>', '='])
            .ok_or_else(|| invalid(s, "expected one of `<`, `>`, `<=`, `>=`, `=` or `@`"))?;
        let quantity = identifier(s, &input[..at])?;
        let rest = &input[at..];

        let (op, operand) = if let Some(operand) = rest.strip_prefix("<=") {
            (Some(Comparison::LessOrEqual), operand)
        } else if let Some(operand) = rest.strip_prefix(">=") {
            (Some(Comparison::GreaterOrEqual), operand)
        } else if let Some(operand) = rest.strip_prefix('<') {
            (Some(Comparison::Less), operand)
        } else if let Some(operand) = rest.strip_prefix('>') {
            (Some(Comparison::Greater), operand)
        } else {
            (None, &rest[1..])
        };

        let operand = operand.trim();
        if operand.is_empty() {
            return Err(invalid(s, "missing value after operator"));
        }

        match op {
            Some(op) => {
                let threshold = operand
                    .parse::<f64>()
                    .ok()
                    .filter(|t| t.is_finite())
                    .ok_or_else(|| invalid(s, "threshold must be a number"))?;
                Ok(Self::Compare {
                    quantity,
                    op,
                    threshold,
                })
            }
            None => Ok(Self::Equals {
                quantity,
                literal: identifier(s, operand)?,
            }),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compare {
                quantity,
                op,
                threshold,
            } => write!(f, "{quantity}{}{threshold}", op.symbol()),
            Self::Equals { quantity, literal } => write!(f, "{quantity}={literal}"),
            Self::Entered { group, to } => write!(f, "{group}@{to}"),
            Self::Moved { group, from, to } => write!(f, "{group}@{from}->{to}"),
            Self::Exited { group, from } => write!(f, "{group}@{from}->"),
        }
    }
}

fn identifier(input: &str, part: &str) -> Result<String, ConfigError> {
    let part = part.trim();
    if part.is_empty() {
        return Err(invalid(input, "empty name"));
    }
    if !part
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(invalid(input, &format!("`{part}` is not a valid name")));
    }
    Ok(part.to_string())
}

fn invalid(input: &str, reason: &str) -> ConfigError {
    ConfigError::Predicate {
        input: input.to_string(),
        reason: reason.to_string(),
    }
}
