//! Typed parameter bags shared by notifications, preferences and rendering.
//!
//! A [`Params`] bag maps parameter names to [`ParamValue`]s. Reads and writes
//! normally go through a typed [`Param<T>`] key, so a value stored as an
//! integer never reads back as a string: a type mismatch reads as absent.
//!
//! # Example
//!
//! ```
//! use notify_params::{Param, Params};
//!
//! const RECIPIENT: Param<String> = Param::new("recipient");
//! const AMOUNT: Param<i64> = Param::new("amount");
//!
//! let mut params = Params::new();
//! params.set(RECIPIENT, "jane@example.com".to_string());
//!
//! assert_eq!(params.get(RECIPIENT).as_deref(), Some("jane@example.com"));
//! assert_eq!(params.get(AMOUNT), None);
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

/// A single stored parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    String(String),
    Integer(i64),
    Double(f64),
    Boolean(bool),
    Json(serde_json::Value),
}

impl ParamValue {
    /// Short name of the stored type, used in diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Integer(_) => "integer",
            Self::Double(_) => "double",
            Self::Boolean(_) => "boolean",
            Self::Json(_) => "json",
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => f.write_str(s),
            Self::Integer(i) => write!(f, "{}", i),
            Self::Double(d) => write!(f, "{}", d),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Json(v) => write!(f, "{}", v),
        }
    }
}

/// Rust types that can be stored in a [`Params`] bag.
pub trait ParamType: Sized {
    fn into_value(self) -> ParamValue;
    fn from_value(value: &ParamValue) -> Option<Self>;
}

impl ParamType for String {
    fn into_value(self) -> ParamValue {
        ParamValue::String(self)
    }

    fn from_value(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::String(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl ParamType for i64 {
    fn into_value(self) -> ParamValue {
        ParamValue::Integer(self)
    }

    fn from_value(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Integer(i) => Some(*i),
            _ => None,
        }
    }
}

impl ParamType for f64 {
    fn into_value(self) -> ParamValue {
        ParamValue::Double(self)
    }

    fn from_value(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Double(d) => Some(*d),
            _ => None,
        }
    }
}

impl ParamType for bool {
    fn into_value(self) -> ParamValue {
        ParamValue::Boolean(self)
    }

    fn from_value(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl ParamType for serde_json::Value {
    fn into_value(self) -> ParamValue {
        ParamValue::Json(self)
    }

    fn from_value(value: &ParamValue) -> Option<Self> {
        match value {
            ParamValue::Json(v) => Some(v.clone()),
            _ => None,
        }
    }
}

/// A typed parameter key.
pub struct Param<T> {
    name: &'static str,
    _type: PhantomData<fn() -> T>,
}

impl<T> Param<T> {
    /// Create a key. Names must be non-empty.
    pub const fn new(name: &'static str) -> Self {
        assert!(!name.is_empty(), "param name must not be empty");
        Self {
            name,
            _type: PhantomData,
        }
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl Param<String> {
    pub const fn string(name: &'static str) -> Self {
        Self::new(name)
    }
}

impl Param<i64> {
    pub const fn integer(name: &'static str) -> Self {
        Self::new(name)
    }
}

impl Param<f64> {
    pub const fn double(name: &'static str) -> Self {
        Self::new(name)
    }
}

impl Param<bool> {
    pub const fn boolean(name: &'static str) -> Self {
        Self::new(name)
    }
}

impl<T> Clone for Param<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Param<T> {}

impl<T> fmt::Debug for Param<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Param")
            .field("name", &self.name)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

/// An ordered parameter bag with an optional snapshot of default values.
///
/// Only the current values are serialized; defaults are a runtime concern of
/// the owner that created the bag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Params {
    #[serde(flatten)]
    values: BTreeMap<String, ParamValue>,
    #[serde(skip)]
    defaults: Option<BTreeMap<String, ParamValue>>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bag pre-populated with (and remembering) `defaults`.
    pub fn with_defaults(defaults: &Params) -> Self {
        Self {
            values: defaults.values.clone(),
            defaults: Some(defaults.values.clone()),
        }
    }

    /// Builder-style [`Params::set`].
    pub fn with<T: ParamType>(mut self, param: Param<T>, value: T) -> Self {
        self.set(param, value);
        self
    }

    pub fn set<T: ParamType>(&mut self, param: Param<T>, value: T) -> &mut Self {
        self.values
            .insert(param.name().to_string(), value.into_value());
        self
    }

    /// Remove a value, restoring its default when one was provided.
    pub fn unset<T>(&mut self, param: Param<T>) -> &mut Self {
        self.unset_value(param.name())
    }

    pub fn unset_value(&mut self, name: &str) -> &mut Self {
        if self.values.remove(name).is_some() {
            if let Some(default) = self.defaults.as_ref().and_then(|d| d.get(name)) {
                self.values.insert(name.to_string(), default.clone());
            }
        }
        self
    }

    /// Typed read. A value stored with a different type reads as `None`.
    pub fn get<T: ParamType>(&self, param: Param<T>) -> Option<T> {
        self.values.get(param.name()).and_then(T::from_value)
    }

    pub fn set_value(&mut self, name: impl Into<String>, value: ParamValue) -> &mut Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn get_value(&self, name: &str) -> Option<&ParamValue> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn contains_all(&self, names: &[&str]) -> bool {
        names.iter().all(|name| self.values.contains_key(*name))
    }

    /// Copy every value of `other` into this bag; values of `other` win.
    pub fn merge(&mut self, other: &Params) -> &mut Self {
        for (name, value) in &other.values {
            self.values.insert(name.clone(), value.clone());
        }
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl PartialEq for Params {
    fn eq(&self, other: &Self) -> bool {
        self.values == other.values
    }
}

impl FromIterator<(String, ParamValue)> for Params {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
            defaults: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAME: Param<String> = Param::string("name");
    const COUNT: Param<i64> = Param::integer("count");
    const ENABLED: Param<bool> = Param::boolean("enabled");

    #[test]
    fn test_typed_get_and_set() {
        let mut params = Params::new();
        params.set(NAME, "John".to_string()).set(COUNT, 3);

        assert_eq!(params.get(NAME).as_deref(), Some("John"));
        assert_eq!(params.get(COUNT), Some(3));
        assert_eq!(params.get(ENABLED), None);
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn test_type_mismatch_reads_as_absent() {
        let mut params = Params::new();
        params.set_value("count", ParamValue::String("three".into()));

        assert_eq!(params.get(COUNT), None);
        assert!(params.contains("count"));
    }

    #[test]
    fn test_unset_restores_default() {
        let defaults = Params::new().with(COUNT, 25);
        let mut params = Params::with_defaults(&defaults);
        assert_eq!(params.get(COUNT), Some(25));

        params.set(COUNT, 10);
        assert_eq!(params.get(COUNT), Some(10));

        params.unset(COUNT);
        assert_eq!(params.get(COUNT), Some(25));

        params.unset(NAME);
        assert!(!params.contains("name"));
    }

    #[test]
    fn test_merge_later_wins() {
        let mut base = Params::new().with(NAME, "base".to_string()).with(COUNT, 1);
        let overlay = Params::new().with(NAME, "overlay".to_string());

        base.merge(&overlay);

        assert_eq!(base.get(NAME).as_deref(), Some("overlay"));
        assert_eq!(base.get(COUNT), Some(1));
    }

    #[test]
    fn test_contains_all() {
        let params = Params::new().with(NAME, "x".to_string()).with(ENABLED, true);
        assert!(params.contains_all(&["name", "enabled"]));
        assert!(!params.contains_all(&["name", "count"]));
        assert!(params.contains_all(&[]));
    }

    #[test]
    fn test_serde_keeps_values_only() {
        let defaults = Params::new().with(COUNT, 5);
        let params = Params::with_defaults(&defaults).with(NAME, "n".to_string());

        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json["count"]["type"], "integer");
        assert_eq!(json["name"]["value"], "n");

        let back: Params = serde_json::from_value(json).unwrap();
        assert_eq!(back, params);
    }
}
