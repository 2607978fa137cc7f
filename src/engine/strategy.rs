use std::collections::{BTreeMap, HashSet};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::engine::{Order, StrategyContext, Trade};
use crate::errors::{Error, Result};

/// A strategy driven by the backtest runner.
///
/// Every hook is optional: the default implementations do nothing.
/// Hooks never return errors; misuse is reported through the run log instead.
pub trait Strategy {
    /// Describes the configurable parameters of the strategy.
    fn schema(&self) -> Schema {
        Schema::default()
    }

    /// Called once before the first bar. No bar is current yet, so order intents are ignored.
    fn on_init(&mut self, _ctx: &mut StrategyContext) {}

    /// Called for every decision bar, warmup bars included.
    fn on_bar(&mut self, _ctx: &mut StrategyContext, _index: usize) {}

    /// Called when an order is filled or rejected.
    fn on_order(&mut self, _ctx: &mut StrategyContext, _order: &Order) {}

    /// Called when an order closes the position.
    fn on_trade(&mut self, _ctx: &mut StrategyContext, _trade: &Trade) {}

    /// Called once when the run ends, after any forced close.
    fn on_finish(&mut self, _ctx: &mut StrategyContext) {}
}

/// Adapts a closure into a strategy that only implements `on_bar`.
pub struct OnBar<F>(pub F);

impl<F> Strategy for OnBar<F>
where
    F: FnMut(&mut StrategyContext, usize),
{
    fn on_bar(&mut self, ctx: &mut StrategyContext, index: usize) {
        (self.0)(ctx, index)
    }
}

/// Kind of a parameter value.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Integer.
    Int,
    /// Floating point.
    Float,
    /// Boolean.
    Bool,
    /// Free text.
    Text,
}

/// A parameter or scratch-state value.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// Integer value.
    Int(i64),
    /// Floating point value.
    Float(f64),
    /// Boolean value.
    Bool(bool),
    /// Text value.
    Text(String),
}

impl ParamValue {
    /// Returns the kind of the value.
    pub fn kind(&self) -> ParamKind {
        match self {
            Self::Int(_) => ParamKind::Int,
            Self::Float(_) => ParamKind::Float,
            Self::Bool(_) => ParamKind::Bool,
            Self::Text(_) => ParamKind::Text,
        }
    }

    /// Returns the value as a float; integers are widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Returns the value as an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

/// Named parameter values, ordered by name.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Params(BTreeMap<String, ParamValue>);

impl<K, V, const N: usize> From<[(K, V); N]> for Params
where
    K: Into<String>,
    V: Into<ParamValue>,
{
    fn from(values: [(K, V); N]) -> Self {
        Self(values.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

impl Params {
    /// Creates an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a value.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Option<ParamValue> {
        self.0.insert(name.into(), value.into())
    }

    /// Returns a value.
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    /// Returns a float value (integers are widened).
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(ParamValue::as_f64)
    }

    /// Returns an integer value.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(ParamValue::as_i64)
    }

    /// Returns an integer value converted to `usize`.
    pub fn get_usize(&self, name: &str) -> Option<usize> {
        self.get_i64(name).and_then(|v| usize::try_from(v).ok())
    }

    /// Returns a boolean value.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(ParamValue::as_bool)
    }

    /// Returns a text value.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ParamValue::as_str)
    }

    /// Iterates over `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Returns the number of values.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no values.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Declaration of one configurable parameter.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    /// Parameter name.
    pub name: String,
    /// Expected kind.
    pub kind: ParamKind,
    /// Value used when no override is given.
    pub default: ParamValue,
    /// Inclusive lower bound for numeric kinds.
    pub min: Option<f64>,
    /// Inclusive upper bound for numeric kinds.
    pub max: Option<f64>,
    /// Human readable description.
    pub description: String,
}

impl ParamSpec {
    /// Declares a parameter whose kind is taken from its default value.
    pub fn new(name: impl Into<String>, default: impl Into<ParamValue>) -> Self {
        let default = default.into();
        Self {
            name: name.into(),
            kind: default.kind(),
            default,
            min: None,
            max: None,
            description: String::new(),
        }
    }

    /// Sets inclusive numeric bounds.
    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    /// Sets the description.
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn check(&self, value: ParamValue) -> Result<ParamValue> {
        let invalid = |reason: String| Error::InvalidParam {
            name: self.name.clone(),
            reason,
        };
        let value = match (self.kind, value) {
            (ParamKind::Float, ParamValue::Int(v)) => ParamValue::Float(v as f64),
            (kind, value) if value.kind() == kind => value,
            (kind, value) => return Err(invalid(format!("expected {kind:?}, got {:?}", value.kind()))),
        };
        if let Some(v) = value.as_f64() {
            if !v.is_finite() {
                return Err(invalid(format!("{v} is not finite")));
            }
            if self.min.is_some_and(|min| v < min) || self.max.is_some_and(|max| v > max) {
                return Err(invalid(format!(
                    "{v} outside [{}, {}]",
                    self.min.unwrap_or(f64::NEG_INFINITY),
                    self.max.unwrap_or(f64::INFINITY)
                )));
            }
        }
        Ok(value)
    }
}

/// The ordered parameter declarations of a strategy.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Schema {
    /// Declared parameters, in display order.
    pub params: Vec<ParamSpec>,
}

impl Schema {
    /// Creates a schema from parameter declarations.
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    /// Checks the declarations themselves: unique names, well-typed defaults, `min <= max`.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for spec in &self.params {
            if !seen.insert(spec.name.as_str()) {
                return Err(Error::DuplicateParam(spec.name.clone()));
            }
            if let (Some(min), Some(max)) = (spec.min, spec.max)
                && min > max
            {
                return Err(Error::InvalidParam {
                    name: spec.name.clone(),
                    reason: format!("min {min} greater than max {max}"),
                });
            }
            spec.check(spec.default.clone())?;
        }
        Ok(())
    }

    /// Resolves the final parameter values: defaults first, then `overrides`.
    ///
    /// ### Returns
    /// The resolved parameters, or an error for unknown names, wrong kinds or
    /// out-of-range values.
    pub fn resolve(&self, overrides: &Params) -> Result<Params> {
        self.validate()?;
        if let Some((name, _)) = overrides
            .iter()
            .find(|(name, _)| !self.params.iter().any(|spec| spec.name == *name))
        {
            return Err(Error::UnknownParam(name.to_owned()));
        }

        let mut resolved = Params::new();
        for spec in &self.params {
            let value = overrides.get(&spec.name).cloned().unwrap_or_else(|| spec.default.clone());
            resolved.insert(spec.name.clone(), spec.check(value)?);
        }
        Ok(resolved)
    }
}
