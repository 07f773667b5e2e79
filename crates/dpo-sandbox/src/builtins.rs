//! Allow-listed modules and their functions
//!
//! [`MODULES`] is the single source of truth for what a snippet may
//! reference: the policy checks names against it and the interpreter
//! dispatches through it.

use crate::interpreter::{Budget, RuntimeError};
use dpo_types::{Aggregation, CompareOp, JoinKind, Scalar, Table, Value};
use std::collections::BTreeMap;

/// One allow-listed module
#[derive(Debug)]
pub struct ModuleSpec {
    /// Module name as written after `import`
    pub name: &'static str,
    /// Callable functions
    pub functions: &'static [&'static str],
}

/// Every module the interpreter implements
pub const MODULES: &[ModuleSpec] = &[
    ModuleSpec {
        name: "table",
        functions: &[
            "filter", "select", "aggregate", "join", "sort", "top", "head", "distinct", "drop_nulls",
            "fill_nulls", "rename", "column", "columns", "rows", "shape", "cell",
        ],
    },
    ModuleSpec {
        name: "stats",
        functions: &[
            "sum", "mean", "median", "min", "max", "std", "var", "count", "quantile", "corr",
        ],
    },
    ModuleSpec {
        name: "math",
        functions: &[
            "abs", "round", "floor", "ceil", "sqrt", "pow", "log", "exp", "min", "max", "pi",
        ],
    },
    ModuleSpec {
        name: "text",
        functions: &[
            "upper", "lower", "len", "contains", "replace", "split", "join", "trim", "concat",
            "starts_with", "ends_with",
        ],
    },
];

/// Look up a module by name
#[must_use]
pub fn module(name: &str) -> Option<&'static ModuleSpec> {
    MODULES.iter().find(|m| m.name == name)
}

/// Whether `module.function` is allow-listed
#[must_use]
pub fn is_known(module_name: &str, function: &str) -> bool {
    module(module_name).is_some_and(|m| m.functions.contains(&function))
}

/// Invoke an allow-listed function
pub(crate) fn call(
    module: &str,
    function: &str,
    args: Vec<Value>,
    budget: &mut Budget<'_>,
) -> Result<Value, RuntimeError> {
    let cost = 1 + args.iter().map(weight).sum::<u64>();
    budget.charge(cost)?;
    let args = Args {
        name: format!("{module}.{function}"),
        values: args,
    };
    match module {
        "table" => table_fn(function, &args, budget),
        "stats" => stats_fn(function, &args),
        "math" => math_fn(function, &args),
        "text" => text_fn(function, &args, budget),
        _ => Err(RuntimeError::fault(format!("unknown module {module}"))),
    }
}

fn weight(value: &Value) -> u64 {
    match value {
        Value::Table(t) => t.row_count() as u64,
        Value::List(items) => items.len() as u64,
        Value::Map(m) => m.len() as u64,
        Value::Str(s) => (s.len() / 64) as u64,
        _ => 0,
    }
}

struct Args {
    name: String,
    values: Vec<Value>,
}

impl Args {
    fn arity(&self, min: usize, max: usize) -> Result<(), RuntimeError> {
        let n = self.values.len();
        if n < min || n > max {
            let expected = if min == max {
                format!("{min}")
            } else {
                format!("{min} to {max}")
            };
            return Err(RuntimeError::fault(format!(
                "{} takes {expected} arguments, got {n}",
                self.name
            )));
        }
        Ok(())
    }

    fn get(&self, i: usize) -> Option<&Value> {
        self.values.get(i)
    }

    fn wrong(&self, i: usize, expected: &str) -> RuntimeError {
        let found = self.values.get(i).map_or("nothing", Value::type_name);
        RuntimeError::fault(format!(
            "{} argument {} must be {expected}, got {found}",
            self.name,
            i + 1
        ))
    }

    fn table(&self, i: usize) -> Result<&Table, RuntimeError> {
        self.get(i)
            .and_then(Value::primary_table)
            .ok_or_else(|| self.wrong(i, "a table"))
    }

    fn str(&self, i: usize) -> Result<&str, RuntimeError> {
        self.get(i).and_then(Value::as_str).ok_or_else(|| self.wrong(i, "a string"))
    }

    fn num(&self, i: usize) -> Result<f64, RuntimeError> {
        self.get(i).and_then(Value::as_f64).ok_or_else(|| self.wrong(i, "a number"))
    }

    fn int(&self, i: usize) -> Result<i64, RuntimeError> {
        match self.get(i) {
            Some(Value::Int(n)) => Ok(*n),
            Some(Value::Float(f)) if f.fract() == 0.0 => Ok(*f as i64),
            _ => Err(self.wrong(i, "an integer")),
        }
    }

    fn count(&self, i: usize) -> Result<usize, RuntimeError> {
        usize::try_from(self.int(i)?).map_err(|_| self.wrong(i, "a non-negative integer"))
    }

    fn scalar(&self, i: usize) -> Result<Scalar, RuntimeError> {
        self.get(i).and_then(Value::to_scalar).ok_or_else(|| self.wrong(i, "a scalar"))
    }

    fn opt_bool(&self, i: usize, default: bool) -> Result<bool, RuntimeError> {
        match self.get(i) {
            None => Ok(default),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(self.wrong(i, "a bool")),
        }
    }

    fn names(&self, i: usize) -> Result<Vec<String>, RuntimeError> {
        match self.get(i) {
            Some(Value::Str(s)) => Ok(vec![s.clone()]),
            Some(Value::List(items)) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string).ok_or_else(|| self.wrong(i, "a list of strings")))
                .collect(),
            _ => Err(self.wrong(i, "a column name or list of names")),
        }
    }

    /// Numbers from `(list)` or `(table, column)` starting at argument `i`
    fn numbers(&self, i: usize) -> Result<Vec<f64>, RuntimeError> {
        match self.get(i) {
            Some(Value::List(items)) => items
                .iter()
                .filter(|v| !matches!(v, Value::Null))
                .map(|v| v.as_f64().ok_or_else(|| self.wrong(i, "a list of numbers")))
                .collect(),
            Some(v) if v.primary_table().is_some() => {
                let column = self.str(i + 1)?;
                Ok(self.table(i)?.numeric(column)?)
            }
            _ => Err(self.wrong(i, "a list of numbers or a table and column")),
        }
    }

    /// Position after the data argument(s) consumed by [`Args::numbers`]
    fn after_numbers(&self, i: usize) -> usize {
        match self.get(i) {
            Some(Value::List(_)) => i + 1,
            _ => i + 2,
        }
    }
}

/// Rough JSON size of one row, for bounding values as they are built
fn row_bytes(row: &[Scalar]) -> usize {
    2 + row
        .iter()
        .map(|cell| match cell {
            Scalar::Str(s) => s.len() + 3,
            _ => 8,
        })
        .sum::<usize>()
}

fn table_fn(function: &str, a: &Args, budget: &mut Budget<'_>) -> Result<Value, RuntimeError> {
    let out = match function {
        "filter" => {
            a.arity(4, 4)?;
            let op: CompareOp = a.str(2)?.parse()?;
            a.table(0)?.filter(a.str(1)?, op, &a.scalar(3)?)?
        }
        "select" => {
            a.arity(2, 2)?;
            a.table(0)?.select(&a.names(1)?)?
        }
        "aggregate" => {
            a.arity(4, 4)?;
            let group_by = match a.get(1) {
                Some(Value::Null) => None,
                _ => Some(a.str(1)?),
            };
            let agg: Aggregation = a.str(3)?.parse()?;
            a.table(0)?.aggregate(group_by, a.str(2)?, agg)?
        }
        "join" => {
            a.arity(3, 4)?;
            let kind = match a.get(3) {
                None => JoinKind::Inner,
                Some(_) => a.str(3)?.parse()?,
            };
            // output can be rows x rows, so every produced row is metered
            let mut bytes = 0usize;
            a.table(0)?.try_join(a.table(1)?, a.str(2)?, kind, |row| {
                bytes = bytes.saturating_add(row_bytes(row));
                budget.produce(1, bytes)
            })?
        }
        "sort" => {
            a.arity(2, 3)?;
            a.table(0)?.sort_by(a.str(1)?, a.opt_bool(2, false)?)?
        }
        "top" => {
            a.arity(3, 3)?;
            a.table(0)?.sort_by(a.str(1)?, true)?.head(a.count(2)?)
        }
        "head" => {
            a.arity(1, 2)?;
            let n = if a.get(1).is_some() { a.count(1)? } else { 5 };
            a.table(0)?.head(n)
        }
        "distinct" => {
            a.arity(2, 2)?;
            a.table(0)?.distinct(a.str(1)?)?
        }
        "drop_nulls" => {
            a.arity(1, 2)?;
            let cols = if a.get(1).is_some() { a.names(1)? } else { Vec::new() };
            a.table(0)?.drop_nulls(&cols)?
        }
        "fill_nulls" => {
            a.arity(2, 2)?;
            a.table(0)?.fill_nulls(&a.scalar(1)?)
        }
        "rename" => {
            a.arity(3, 3)?;
            a.table(0)?.rename(a.str(1)?, a.str(2)?)?
        }
        "column" => {
            a.arity(2, 2)?;
            let values = a.table(0)?.column(a.str(1)?)?;
            return Ok(Value::List(values.into_iter().map(Value::from).collect()));
        }
        "columns" => {
            a.arity(1, 1)?;
            let t = a.table(0)?;
            return Ok(Value::List(t.columns().iter().cloned().map(Value::Str).collect()));
        }
        "rows" => {
            a.arity(1, 1)?;
            return Ok(Value::Int(a.table(0)?.row_count() as i64));
        }
        "shape" => {
            a.arity(1, 1)?;
            let t = a.table(0)?;
            return Ok(Value::List(vec![
                Value::Int(t.row_count() as i64),
                Value::Int(t.column_count() as i64),
            ]));
        }
        "cell" => {
            a.arity(3, 3)?;
            let t = a.table(0)?;
            let row = a.count(1)?;
            let col = t.column_index(a.str(2)?)?;
            let cell = t
                .rows()
                .get(row)
                .map(|r| r[col].clone())
                .ok_or_else(|| RuntimeError::fault(format!("row {row} out of range")))?;
            return Ok(cell.into());
        }
        other => return Err(unknown("table", other)),
    };
    Ok(Value::Table(out))
}

fn stats_fn(function: &str, a: &Args) -> Result<Value, RuntimeError> {
    if function == "corr" {
        a.arity(2, 3)?;
        let (xs, ys) = match (a.get(0), a.get(1)) {
            (Some(Value::List(_)), Some(Value::List(_))) => (a.numbers(0)?, a.numbers(1)?),
            _ => {
                let t = a.table(0)?;
                (t.numeric(a.str(1)?)?, t.numeric(a.str(2)?)?)
            }
        };
        return Ok(opt_float(correlation(&xs, &ys)));
    }

    let values = a.numbers(0)?;
    let extra = a.after_numbers(0);
    if function == "quantile" {
        a.arity(extra + 1, extra + 1)?;
        let q = a.num(extra)?;
        if !(0.0..=1.0).contains(&q) {
            return Err(RuntimeError::fault("quantile must be between 0 and 1"));
        }
        return Ok(opt_float(quantile(&values, q)));
    }
    a.arity(extra, extra)?;

    let n = values.len() as f64;
    let mean = (!values.is_empty()).then(|| values.iter().sum::<f64>() / n);
    let out = match function {
        "sum" => Value::Float(values.iter().sum()),
        "count" => Value::Int(values.len() as i64),
        "mean" => opt_float(mean),
        "median" => opt_float(quantile(&values, 0.5)),
        "min" => opt_float(values.iter().copied().reduce(f64::min)),
        "max" => opt_float(values.iter().copied().reduce(f64::max)),
        "var" => opt_float(variance(&values)),
        "std" => opt_float(variance(&values).map(f64::sqrt)),
        other => return Err(unknown("stats", other)),
    };
    Ok(out)
}

fn opt_float(v: Option<f64>) -> Value {
    v.filter(|f| f.is_finite()).map_or(Value::Null, Value::Float)
}

fn variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    Some(values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0))
}

/// Linear-interpolated quantile
fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

fn correlation(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let n = xs.len() as f64;
    let mx = xs.iter().sum::<f64>() / n;
    let my = ys.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mx) * (y - my);
        vx += (x - mx).powi(2);
        vy += (y - my).powi(2);
    }
    let denom = (vx * vy).sqrt();
    (denom > 0.0).then(|| cov / denom)
}

fn math_fn(function: &str, a: &Args) -> Result<Value, RuntimeError> {
    let out = match function {
        "pi" => {
            a.arity(0, 0)?;
            std::f64::consts::PI
        }
        "abs" => {
            a.arity(1, 1)?;
            if let Some(Value::Int(i)) = a.get(0) {
                return i
                    .checked_abs()
                    .map(Value::Int)
                    .ok_or_else(|| RuntimeError::fault("integer overflow"));
            }
            a.num(0)?.abs()
        }
        "round" => {
            a.arity(1, 2)?;
            let x = a.num(0)?;
            if a.get(1).is_none() {
                return Ok(Value::Int(x.round() as i64));
            }
            let digits = a.int(1)?.clamp(-12, 12) as i32;
            let factor = 10f64.powi(digits);
            (x * factor).round() / factor
        }
        "floor" => {
            a.arity(1, 1)?;
            return Ok(Value::Int(a.num(0)?.floor() as i64));
        }
        "ceil" => {
            a.arity(1, 1)?;
            return Ok(Value::Int(a.num(0)?.ceil() as i64));
        }
        "sqrt" => {
            a.arity(1, 1)?;
            let x = a.num(0)?;
            if x < 0.0 {
                return Err(RuntimeError::fault("sqrt of a negative number"));
            }
            x.sqrt()
        }
        "pow" => {
            a.arity(2, 2)?;
            a.num(0)?.powf(a.num(1)?)
        }
        "log" => {
            a.arity(1, 2)?;
            let x = a.num(0)?;
            if x <= 0.0 {
                return Err(RuntimeError::fault("log of a non-positive number"));
            }
            match a.get(1) {
                None => x.ln(),
                Some(_) => x.log(a.num(1)?),
            }
        }
        "exp" => {
            a.arity(1, 1)?;
            a.num(0)?.exp()
        }
        "min" | "max" => {
            a.arity(1, usize::MAX)?;
            let values = if a.values.len() == 1 {
                a.numbers(0)?
            } else {
                (0..a.values.len()).map(|i| a.num(i)).collect::<Result<Vec<_>, _>>()?
            };
            let pick: fn(f64, f64) -> f64 = if function == "min" { f64::min } else { f64::max };
            return Ok(opt_float(values.into_iter().reduce(pick)));
        }
        other => return Err(unknown("math", other)),
    };
    if out.is_finite() {
        Ok(Value::Float(out))
    } else {
        Err(RuntimeError::fault(format!("{} produced a non-finite number", a.name)))
    }
}

fn text_fn(function: &str, a: &Args, budget: &mut Budget<'_>) -> Result<Value, RuntimeError> {
    let out = match function {
        "upper" => {
            a.arity(1, 1)?;
            Value::Str(a.str(0)?.to_uppercase())
        }
        "lower" => {
            a.arity(1, 1)?;
            Value::Str(a.str(0)?.to_lowercase())
        }
        "trim" => {
            a.arity(1, 1)?;
            Value::Str(a.str(0)?.trim().to_string())
        }
        "len" => {
            a.arity(1, 1)?;
            let n = match a.get(0) {
                Some(Value::Str(s)) => s.chars().count(),
                Some(Value::List(items)) => items.len(),
                Some(Value::Map(m)) => m.len(),
                Some(Value::Table(t)) => t.row_count(),
                _ => return Err(a.wrong(0, "a string, list, map or table")),
            };
            Value::Int(n as i64)
        }
        "contains" => {
            a.arity(2, 2)?;
            match a.get(0) {
                Some(Value::List(items)) => {
                    let needle = a.scalar(1)?;
                    Value::Bool(
                        items
                            .iter()
                            .filter_map(Value::to_scalar)
                            .any(|s| s.loose_eq(&needle)),
                    )
                }
                _ => Value::Bool(a.str(0)?.contains(a.str(1)?)),
            }
        }
        "starts_with" => {
            a.arity(2, 2)?;
            Value::Bool(a.str(0)?.starts_with(a.str(1)?))
        }
        "ends_with" => {
            a.arity(2, 2)?;
            Value::Bool(a.str(0)?.ends_with(a.str(1)?))
        }
        "replace" => {
            a.arity(3, 3)?;
            let (text, from, to) = (a.str(0)?, a.str(1)?, a.str(2)?);
            if from.is_empty() {
                return Err(RuntimeError::fault("replace pattern must not be empty"));
            }
            let mut out = String::with_capacity(text.len());
            let mut last = 0;
            for (at, _) in text.match_indices(from) {
                out.push_str(&text[last..at]);
                out.push_str(to);
                last = at + from.len();
                budget.produce(1 + (to.len() / 64) as u64, out.len())?;
            }
            out.push_str(&text[last..]);
            budget.produce(0, out.len())?;
            Value::Str(out)
        }
        "split" => {
            a.arity(2, 2)?;
            let sep = a.str(1)?;
            if sep.is_empty() {
                return Err(RuntimeError::fault("split separator must not be empty"));
            }
            Value::List(a.str(0)?.split(sep).map(|s| Value::Str(s.to_string())).collect())
        }
        "join" => {
            a.arity(2, 2)?;
            let Some(Value::List(items)) = a.get(0) else {
                return Err(a.wrong(0, "a list"));
            };
            let parts: Vec<String> = items.iter().map(display).collect();
            Value::Str(parts.join(a.str(1)?))
        }
        "concat" => Value::Str(a.values.iter().map(display).collect()),
        other => return Err(unknown("text", other)),
    };
    Ok(out)
}

/// Text rendering used by `text.concat` and `text.join`
pub(crate) fn display(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        other => other.summary(),
    }
}

fn unknown(module: &str, function: &str) -> RuntimeError {
    RuntimeError::fault(format!("unknown function {module}.{function}"))
}

/// Map from the `{key: value}` literal form
pub(crate) fn map(entries: Vec<(String, Value)>) -> Value {
    Value::Map(entries.into_iter().collect::<BTreeMap<_, _>>())
}
