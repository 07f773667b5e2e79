//! Tree-walking evaluator for validated programs
//!
//! Every evaluation step draws from a fuel [`Budget`] and checks a
//! cooperative cancel flag, so a run always terminates: by producing a value,
//! by exhausting fuel, or by observing cancellation.

use crate::ast::{BinaryOp, Expr, Program, Stmt, UnaryOp};
use crate::builtins;
use dpo_types::{Scalar, TableError, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

/// Why evaluation stopped without a value
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuntimeError {
    /// Runtime fault such as a type mismatch or bad argument
    #[error("{0}")]
    Fault(String),

    /// Step budget used up
    #[error("fuel exhausted after {0} steps")]
    FuelExhausted(u64),

    /// Cancel flag observed
    #[error("cancelled")]
    Cancelled,

    /// A value under construction outgrew its bound
    #[error("value of {size} bytes exceeds the {limit} byte bound")]
    OutputTooLarge { size: usize, limit: usize },
}

impl RuntimeError {
    pub(crate) fn fault(message: impl Into<String>) -> Self {
        Self::Fault(message.into())
    }
}

impl From<TableError> for RuntimeError {
    fn from(err: TableError) -> Self {
        Self::Fault(err.to_string())
    }
}

/// Step budget shared by the evaluator and builtins
///
/// Also bounds the size of any single value a builtin builds, so a join or
/// a replace is stopped while it grows instead of after.
pub struct Budget<'a> {
    limit: u64,
    used: u64,
    max_value_bytes: usize,
    cancel: &'a AtomicBool,
}

impl<'a> Budget<'a> {
    /// `limit` steps, checking `cancel` as it goes
    #[must_use]
    pub fn new(limit: u64, cancel: &'a AtomicBool) -> Self {
        Self {
            limit,
            used: 0,
            max_value_bytes: usize::MAX,
            cancel,
        }
    }

    /// Bound the size of any single value built by a builtin
    #[must_use]
    pub fn with_max_value_bytes(mut self, bytes: usize) -> Self {
        self.max_value_bytes = bytes;
        self
    }

    /// Charge `steps` for a piece of a value under construction whose size
    /// so far is `bytes`
    ///
    /// # Errors
    /// As [`Budget::charge`], plus [`RuntimeError::OutputTooLarge`] once
    /// `bytes` passes the value bound.
    pub fn produce(&mut self, steps: u64, bytes: usize) -> Result<(), RuntimeError> {
        self.charge(steps)?;
        if bytes > self.max_value_bytes {
            return Err(RuntimeError::OutputTooLarge {
                size: bytes,
                limit: self.max_value_bytes,
            });
        }
        Ok(())
    }

    /// Consume `steps` units of fuel
    ///
    /// # Errors
    /// [`RuntimeError::Cancelled`] once the cancel flag is raised,
    /// [`RuntimeError::FuelExhausted`] when the limit is passed.
    pub fn charge(&mut self, steps: u64) -> Result<(), RuntimeError> {
        if self.cancel.load(AtomicOrdering::Relaxed) {
            return Err(RuntimeError::Cancelled);
        }
        self.used = self.used.saturating_add(steps);
        if self.used > self.limit {
            return Err(RuntimeError::FuelExhausted(self.limit));
        }
        Ok(())
    }

    /// Steps charged so far
    #[inline]
    #[must_use]
    pub fn used(&self) -> u64 {
        self.used
    }
}

/// Evaluates one program in a fresh scope
pub struct Interpreter<'a> {
    scope: HashMap<String, Value>,
    budget: Budget<'a>,
}

impl<'a> Interpreter<'a> {
    /// Fresh scope seeded with `bindings`
    #[must_use]
    pub fn new(bindings: impl IntoIterator<Item = (String, Value)>, budget: Budget<'a>) -> Self {
        Self {
            scope: bindings.into_iter().collect(),
            budget,
        }
    }

    /// Run the program and return the value of its last value-producing statement
    ///
    /// # Errors
    /// Any [`RuntimeError`] raised during evaluation.
    pub fn run(mut self, program: &Program) -> Result<Value, RuntimeError> {
        let mut last = Value::Null;
        for stmt in &program.statements {
            match stmt {
                Stmt::Import { .. } => {}
                Stmt::Let { name, value, line } => {
                    let v = self.eval(value).map_err(|e| at_line(e, *line))?;
                    last = v.clone();
                    self.scope.insert(name.clone(), v);
                }
                Stmt::Expr { value, line } => {
                    last = self.eval(value).map_err(|e| at_line(e, *line))?;
                }
            }
        }
        Ok(last)
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, RuntimeError> {
        self.budget.charge(1)?;
        match expr {
            Expr::Literal(s) => Ok(s.clone().into()),
            Expr::Var(name) => self
                .scope
                .get(name)
                .cloned()
                .ok_or_else(|| RuntimeError::fault(format!("undefined variable {name}"))),
            Expr::List(items) => Ok(Value::List(
                items.iter().map(|e| self.eval(e)).collect::<Result<_, _>>()?,
            )),
            Expr::Map(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for (key, e) in entries {
                    out.push((key.clone(), self.eval(e)?));
                }
                Ok(builtins::map(out))
            }
            Expr::Call { module, function, args } => {
                let values = args.iter().map(|e| self.eval(e)).collect::<Result<Vec<_>, _>>()?;
                builtins::call(module, function, values, &mut self.budget)
            }
            Expr::Index { target, index } => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                index_value(target, &index)
            }
            Expr::Unary { op, operand } => {
                let v = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Ok(Value::Bool(!truthy(&v))),
                    UnaryOp::Neg => match v {
                        Value::Int(i) => i
                            .checked_neg()
                            .map(Value::Int)
                            .ok_or_else(|| RuntimeError::fault("integer overflow")),
                        Value::Float(f) => Ok(Value::Float(-f)),
                        other => Err(RuntimeError::fault(format!("cannot negate {}", other.type_name()))),
                    },
                }
            }
            Expr::Binary { op, left, right } => {
                let l = self.eval(left)?;
                match op {
                    BinaryOp::And if !truthy(&l) => return Ok(Value::Bool(false)),
                    BinaryOp::Or if truthy(&l) => return Ok(Value::Bool(true)),
                    BinaryOp::And | BinaryOp::Or => return Ok(Value::Bool(truthy(&self.eval(right)?))),
                    _ => {}
                }
                let r = self.eval(right)?;
                binary(*op, l, r)
            }
        }
    }
}

fn at_line(err: RuntimeError, line: usize) -> RuntimeError {
    match err {
        RuntimeError::Fault(message) => RuntimeError::Fault(format!("line {line}: {message}")),
        other => other,
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::Str(s) => !s.is_empty(),
        Value::List(items) => !items.is_empty(),
        Value::Map(m) => !m.is_empty(),
        Value::Table(t) => !t.is_empty(),
    }
}

fn index_value(target: Value, index: &Value) -> Result<Value, RuntimeError> {
    match (target, index) {
        (Value::List(items), Value::Int(i)) => {
            let len = items.len() as i64;
            let pos = if *i < 0 { len + i } else { *i };
            usize::try_from(pos)
                .ok()
                .and_then(|p| items.into_iter().nth(p))
                .ok_or_else(|| RuntimeError::fault(format!("index {i} out of range")))
        }
        (Value::Map(mut m), Value::Str(key)) => m
            .remove(key)
            .ok_or_else(|| RuntimeError::fault(format!("missing key {key}"))),
        (Value::Table(t), Value::Str(column)) => Ok(Value::List(
            t.column(column)?.into_iter().map(Value::from).collect(),
        )),
        (t, i) => Err(RuntimeError::fault(format!(
            "cannot index {} with {}",
            t.type_name(),
            i.type_name()
        ))),
    }
}

fn binary(op: BinaryOp, l: Value, r: Value) -> Result<Value, RuntimeError> {
    use BinaryOp::*;
    match op {
        Eq => return Ok(Value::Bool(values_equal(&l, &r))),
        Ne => return Ok(Value::Bool(!values_equal(&l, &r))),
        Lt | Le | Gt | Ge => {
            let ord = compare(&l, &r)?;
            let b = match op {
                Lt => ord == Ordering::Less,
                Le => ord != Ordering::Greater,
                Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            };
            return Ok(Value::Bool(b));
        }
        _ => {}
    }

    match (op, l, r) {
        (Add, Value::Str(a), b) => Ok(Value::Str(a + &builtins::display(&b))),
        (Add, Value::List(mut a), Value::List(b)) => {
            a.extend(b);
            Ok(Value::List(a))
        }
        (op, Value::Int(a), Value::Int(b)) => {
            let out = match op {
                Add => a.checked_add(b),
                Sub => a.checked_sub(b),
                Mul => a.checked_mul(b),
                Div => {
                    if b == 0 {
                        return Err(RuntimeError::fault("division by zero"));
                    }
                    return Ok(Value::Float(a as f64 / b as f64));
                }
                Rem => {
                    if b == 0 {
                        return Err(RuntimeError::fault("division by zero"));
                    }
                    a.checked_rem(b)
                }
                _ => None,
            };
            out.map(Value::Int).ok_or_else(|| RuntimeError::fault("integer overflow"))
        }
        (op, l, r) => {
            let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
                return Err(RuntimeError::fault(format!(
                    "unsupported operands {} and {}",
                    l.type_name(),
                    r.type_name()
                )));
            };
            let out = match op {
                Add => a + b,
                Sub => a - b,
                Mul => a * b,
                Div | Rem if b == 0.0 => return Err(RuntimeError::fault("division by zero")),
                Div => a / b,
                Rem => a % b,
                _ => return Err(RuntimeError::fault("unsupported operator")),
            };
            Ok(Value::Float(out))
        }
    }
}

fn values_equal(l: &Value, r: &Value) -> bool {
    match (l.to_scalar(), r.to_scalar()) {
        (Some(a), Some(b)) => a.loose_eq(&b),
        _ => l == r,
    }
}

fn compare(l: &Value, r: &Value) -> Result<Ordering, RuntimeError> {
    match (l.to_scalar(), r.to_scalar()) {
        (Some(a), Some(b)) if !a.is_null() && !b.is_null() && comparable(&a, &b) => Ok(a.total_cmp(&b)),
        _ => Err(RuntimeError::fault(format!(
            "cannot compare {} with {}",
            l.type_name(),
            r.type_name()
        ))),
    }
}

fn comparable(a: &Scalar, b: &Scalar) -> bool {
    (a.as_f64().is_some() && b.as_f64().is_some()) || a.type_name() == b.type_name()
}
