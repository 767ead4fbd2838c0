//! Declared per-field rules for bound input.
//!
//! Every type the binder accepts implements [`Validate`] and lists its rules
//! explicitly:
//!
//! ```
//! use micro_kit::validation::{Validate, Validator};
//!
//! struct SignUp { email: String, name: String }
//!
//! impl Validate for SignUp {
//!     fn validate(&self, v: &mut Validator) {
//!         v.required("email", &self.email).email("email", &self.email);
//!         v.required("name", &self.name).max_len("name", &self.name, 64);
//!     }
//! }
//! ```

use serde::Serialize;

/// One failed rule, rendered as `field: tag`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub tag: String,
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.tag)
    }
}

pub trait Validate {
    fn validate(&self, _v: &mut Validator) {}
}

impl Validate for serde_json::Value {}
impl Validate for () {}

/// Values the `required` rule understands. Zero values count as absent.
pub trait Presence {
    fn is_present(&self) -> bool;
}

impl Presence for String {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

impl Presence for &str {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

impl<T> Presence for Option<T> {
    fn is_present(&self) -> bool {
        self.is_some()
    }
}

impl<T> Presence for Vec<T> {
    fn is_present(&self) -> bool {
        !self.is_empty()
    }
}

impl Presence for bool {
    fn is_present(&self) -> bool {
        *self
    }
}

macro_rules! numeric_presence {
    ($($t:ty),*) => {
        $(impl Presence for $t {
            fn is_present(&self) -> bool {
                *self != 0 as $t
            }
        })*
    };
}

numeric_presence!(i32, i64, u32, u64, usize, f64);

#[derive(Debug, Default)]
pub struct Validator {
    violations: Vec<FieldViolation>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a violation of `tag` on `field` unless `ok`
    pub fn check(&mut self, field: &str, tag: &str, ok: bool) -> &mut Self {
        if !ok {
            self.violations.push(FieldViolation {
                field: field.to_string(),
                tag: tag.to_string(),
            });
        }
        self
    }

    pub fn required<P: Presence + ?Sized>(&mut self, field: &str, value: &P) -> &mut Self {
        self.check(field, "required", value.is_present())
    }

    pub fn min_len(&mut self, field: &str, value: &str, min: usize) -> &mut Self {
        self.check(field, "min", value.chars().count() >= min)
    }

    pub fn max_len(&mut self, field: &str, value: &str, max: usize) -> &mut Self {
        self.check(field, "max", value.chars().count() <= max)
    }

    /// Empty values pass; pair with `required` when the field is mandatory
    pub fn email(&mut self, field: &str, value: &str) -> &mut Self {
        self.check(field, "email", value.is_empty() || looks_like_email(value))
    }

    pub fn one_of(&mut self, field: &str, value: &str, allowed: &[&str]) -> &mut Self {
        self.check(field, "oneof", allowed.contains(&value))
    }

    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations(&self) -> &[FieldViolation] {
        &self.violations
    }

    pub fn finish(self) -> Result<(), Vec<FieldViolation>> {
        if self.violations.is_empty() {
            Ok(())
        } else {
            Err(self.violations)
        }
    }
}

/// Runs the rules declared by `value`
pub fn validate<T: Validate + ?Sized>(value: &T) -> Result<(), Vec<FieldViolation>> {
    let mut v = Validator::new();
    value.validate(&mut v);
    v.finish()
}

fn looks_like_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !value.chars().any(char::is_whitespace)
}
