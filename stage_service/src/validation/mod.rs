//! Validation Pipeline
//!
//! Each block of a stage definition has its own validator returning either the
//! normalized value or a [`ValidationErrors`] set. Parent validators nest the
//! child errors under the child's field path, so a single response lists every
//! offending field (`proxy_http.upstreams.hosts[1].host`, `vars`, ...).

pub mod proxy_http;
pub mod stage;
pub mod validators;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer};

use crate::i18n::{ErrorMessage, Lang, ValueKind};

pub use proxy_http::{
    Host, HostInput, ProxyHttpConfig, ProxyHttpInput, ProxyHttpValidator, TransformHeaders,
    TransformHeadersInput, TransformHeadersValidator, Upstreams, UpstreamsInput, UpstreamsValidator,
};
pub use stage::{StageInput, StageValidator, ValidatedStage};
pub use validators::{MaxCountPerGatewayValidator, NameValidator, StageVarsValidator};

/// Key used for errors that belong to a whole block rather than one field.
pub const NON_FIELD_ERRORS: &str = "non_field_errors";

/// An input value that keeps its raw JSON when it has the wrong type, so the
/// mismatch is reported on the field's own path instead of failing the body.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Field<T> {
    Valid(T),
    Invalid(serde_json::Value),
}

impl<T> From<T> for Field<T> {
    fn from(value: T) -> Self {
        Field::Valid(value)
    }
}

impl<T> Field<T> {
    pub fn typed(&self, kind: ValueKind) -> Result<&T, ErrorMessage> {
        match self {
            Field::Valid(value) => Ok(value),
            Field::Invalid(_) => Err(ErrorMessage::InvalidType(kind)),
        }
    }
}

pub trait OptionalField<T> {
    /// `Ok(None)` when the field was omitted or `null`.
    fn typed(&self, kind: ValueKind) -> Result<Option<&T>, ErrorMessage>;
}

impl<T> OptionalField<T> for Option<Field<T>> {
    fn typed(&self, kind: ValueKind) -> Result<Option<&T>, ErrorMessage> {
        self.as_ref().map(|field| field.typed(kind)).transpose()
    }
}

/// Tells an omitted field (`None`) from an explicit `null` (`Some(None)`).
/// Use with `#[serde(default, deserialize_with = "present")]`.
pub fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

/// Validates one block of input. `None` means the block was omitted.
pub trait BlockValidator {
    type Input;
    type Output;

    fn validate(&self, input: Option<&Self::Input>) -> Result<Self::Output, ValidationErrors>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors {
    errors: BTreeMap<String, Vec<ErrorMessage>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, message: ErrorMessage) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: impl Into<String>, message: ErrorMessage) {
        self.errors.entry(field.into()).or_default().push(message);
    }

    /// Merge `other` under `prefix`. Block-level errors of the child land on
    /// the prefix itself, everything else on `prefix.field`.
    pub fn nest(&mut self, prefix: &str, other: ValidationErrors) {
        for (field, messages) in other.errors {
            let key = if field == NON_FIELD_ERRORS {
                prefix.to_string()
            } else if field.starts_with('[') {
                format!("{}{}", prefix, field)
            } else {
                format!("{}.{}", prefix, field)
            };
            self.errors.entry(key).or_default().extend(messages);
        }
    }

    /// Record the error side of a child result and hand back the value, if any.
    pub fn collect<T>(&mut self, prefix: &str, result: Result<T, ValidationErrors>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(errors) => {
                self.nest(prefix, errors);
                None
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.errors.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&[ErrorMessage]> {
        self.errors.get(field).map(Vec::as_slice)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.errors.keys().map(String::as_str)
    }

    pub fn into_result<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }

    pub fn render(&self, lang: Lang) -> BTreeMap<String, Vec<String>> {
        self.errors
            .iter()
            .map(|(field, messages)| {
                let rendered = messages.iter().map(|m| m.localize(lang)).collect();
                (field.clone(), rendered)
            })
            .collect()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.errors {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                write!(f, "{}: {}", field, message)?;
                first = false;
            }
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}
