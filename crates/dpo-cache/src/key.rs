//! Cache key derivation
//!
//! A key is the Blake3 hash of a canonical JSON document built from the
//! producing agent's kind, the task parameters and the content fingerprint
//! of the input. Parameters are a `BTreeMap`, so key order never matters;
//! floats are normalised so `1` and `1.0` hash alike, as do `-0.0` and `0`.

use dpo_types::{ContentHash, HashError, Params, Scalar};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Fingerprint identifying one cached result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(ContentHash);

impl CacheKey {
    /// Derive the key for `(kind, params, input fingerprint)`
    ///
    /// Pure: equal inputs always give equal keys, on any machine.
    #[must_use]
    pub fn derive(kind: &str, params: &Params, input: &ContentHash) -> Self {
        let params: serde_json::Map<String, serde_json::Value> = params
            .iter()
            .map(|(k, v)| (k.clone(), canonical_scalar(v)))
            .collect();
        let doc = serde_json::json!({
            "kind": kind,
            "params": params,
            "input": input.to_string(),
        });
        // params iterate in key order and the outer keys are fixed
        let bytes = doc.to_string();
        Self(ContentHash::compute(bytes.as_bytes()))
    }

    /// Key for an arbitrary label, for callers caching outside the agent path
    #[must_use]
    pub fn named(label: &str) -> Self {
        Self(ContentHash::compute(label.as_bytes()))
    }

    /// Underlying digest
    #[inline]
    #[must_use]
    pub fn hash(&self) -> &ContentHash {
        &self.0
    }

    /// Short form for logs
    #[inline]
    #[must_use]
    pub fn short(&self) -> String {
        self.0.short()
    }
}

fn canonical_scalar(value: &Scalar) -> serde_json::Value {
    match value {
        Scalar::Null => serde_json::Value::Null,
        Scalar::Bool(b) => serde_json::Value::Bool(*b),
        Scalar::Int(i) => serde_json::Value::from(*i),
        Scalar::Float(f) => canonical_float(*f),
        Scalar::Str(s) => serde_json::Value::String(s.clone()),
    }
}

fn canonical_float(f: f64) -> serde_json::Value {
    if f.is_nan() {
        return serde_json::Value::String("NaN".to_string());
    }
    if f.is_infinite() {
        let label = if f > 0.0 { "inf" } else { "-inf" };
        return serde_json::Value::String(label.to_string());
    }
    // integral floats encode as integers so 1 and 1.0 agree
    if f.fract() == 0.0 && f.abs() < 9.0e15 {
        return serde_json::Value::from(f as i64);
    }
    serde_json::Number::from_f64(f).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for CacheKey {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}
