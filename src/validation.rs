//! Rule based validation of flat option maps.
//!
//! A rule expression is a `|` separated list such as `integer|min:50|max:250`. Type rules
//! (`boolean`, `integer`, `float`, `string`, `array`, `array:<type>`, `object`) are alternatives of
//! which one has to pass; constraint rules (`min:N`, `max:N`) all have to pass. `nullable` allows
//! an explicit null. Absent fields are not validated.

use std::collections::BTreeMap;

use serde_json::{Map, Value};
use thiserror::Error;

/// A rule expression referenced a rule that does not exist.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("validation rule {0} does not exist")]
pub struct UnknownRule(pub String);

/// Result of a validation run, errors keyed by field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validation {
    errors: BTreeMap<String, String>,
}

impl Validation {
    pub fn passes(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn fails(&self) -> bool {
        !self.passes()
    }

    pub fn errors(&self) -> &BTreeMap<String, String> {
        &self.errors
    }

    /// The first failing field in key order.
    pub fn first_error(&self) -> Option<(&str, &str)> {
        self.errors.iter().next().map(|(field, error)| (field.as_str(), error.as_str()))
    }
}

enum Check {
    /// Passes when the value has the shape, the optional argument refines it.
    Type(fn(&Value, Option<&str>) -> bool),
    /// Passes when the argument bound holds, otherwise returns the error.
    Constraint(fn(&Value, &str) -> Result<(), String>),
}

struct RuleEntry {
    name: &'static str,
    check: Check,
}

const RULES: &[RuleEntry] = &[
    RuleEntry { name: "boolean", check: Check::Type(|value, _| value.is_boolean()) },
    RuleEntry { name: "integer", check: Check::Type(|value, _| value.is_i64() || value.is_u64()) },
    RuleEntry { name: "float", check: Check::Type(|value, _| value.is_number()) },
    RuleEntry { name: "string", check: Check::Type(|value, _| value.is_string()) },
    RuleEntry { name: "object", check: Check::Type(|value, _| value.is_object()) },
    RuleEntry { name: "array", check: Check::Type(array) },
    RuleEntry { name: "min", check: Check::Constraint(min) },
    RuleEntry { name: "max", check: Check::Constraint(max) },
];

fn lookup(name: &str) -> Option<&'static RuleEntry> {
    RULES.iter().find(|rule| rule.name == name)
}

fn array(value: &Value, element: Option<&str>) -> bool {
    let Some(items) = value.as_array() else { return false };
    match element.and_then(lookup) {
        Some(RuleEntry { check: Check::Type(check), .. }) => items.iter().all(|item| check(item, None)),
        _ => element.is_none(),
    }
}

/// Numbers compare by value, strings by character count, arrays and objects by size.
fn magnitude(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => Some(text.chars().count() as f64),
        Value::Array(items) => Some(items.len() as f64),
        Value::Object(map) => Some(map.len() as f64),
        _ => None,
    }
}

fn bound(argument: &str) -> Result<f64, String> {
    argument.parse().map_err(|_| format!("has an invalid bound {argument}"))
}

fn min(value: &Value, argument: &str) -> Result<(), String> {
    let limit = bound(argument)?;
    match magnitude(value) {
        Some(size) if size >= limit => Ok(()),
        _ if value.is_string() => Err(format!("must be at least {argument} characters long")),
        _ => Err(format!("must be at least {argument}")),
    }
}

fn max(value: &Value, argument: &str) -> Result<(), String> {
    let limit = bound(argument)?;
    match magnitude(value) {
        Some(size) if size <= limit => Ok(()),
        _ if value.is_string() => Err(format!("must be at most {argument} characters long")),
        _ => Err(format!("must be at most {argument}")),
    }
}

/// Validates `fields` against `rules`, a list of `(field, expression)` pairs.
pub fn validate(fields: &Map<String, Value>, rules: &[(&str, &str)]) -> Result<Validation, UnknownRule> {
    let mut validation = Validation::default();

    for (field, expression) in rules {
        let mut nullable = false;
        let mut types = Vec::new();
        let mut constraints = Vec::new();

        for rule in expression.split('|').filter(|rule| !rule.is_empty()) {
            let (name, argument) = match rule.split_once(':') {
                Some((name, argument)) => (name, Some(argument)),
                None => (rule, None),
            };
            if name == "nullable" {
                nullable = true;
                continue;
            }
            match lookup(name) {
                Some(RuleEntry { check: Check::Type(check), .. }) => types.push((rule, *check, argument)),
                Some(RuleEntry { check: Check::Constraint(check), .. }) => {
                    constraints.push((*check, argument.unwrap_or_default()));
                }
                None => return Err(UnknownRule(name.to_owned())),
            }
        }

        let Some(value) = fields.get(*field) else { continue };

        if value.is_null() {
            if !nullable {
                validation.errors.insert((*field).to_owned(), "must not be null".to_owned());
            }
            continue;
        }

        if !types.is_empty() && !types.iter().any(|(_, check, argument)| check(value, *argument)) {
            let expected: Vec<_> = types.iter().map(|(rule, ..)| *rule).collect();
            validation.errors.insert((*field).to_owned(), format!("must be of type {}", expected.join(" or ")));
            continue;
        }

        if let Some(error) = constraints.iter().find_map(|(check, argument)| check(value, *argument).err()) {
            validation.errors.insert((*field).to_owned(), error);
        }
    }

    Ok(validation)
}
