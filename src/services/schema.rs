//! Form schemas describing service bodies to a user interface.

use serde::{Serialize, Serializer};
use std::fmt;

/// Type of a form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    String,
    Text,
    Number,
    Bool,
    IPv4,
    IPv6,
    Domain,
    Duration,
    List(Box<FieldType>),
    /// Nested form registered as a subservice, such as `svcs.MX`.
    SubService(&'static str),
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::String => f.write_str("string"),
            FieldType::Text => f.write_str("text"),
            FieldType::Number => f.write_str("number"),
            FieldType::Bool => f.write_str("bool"),
            FieldType::IPv4 => f.write_str("ipv4"),
            FieldType::IPv6 => f.write_str("ipv6"),
            FieldType::Domain => f.write_str("domain"),
            FieldType::Duration => f.write_str("duration"),
            FieldType::List(inner) => write!(f, "[]{inner}"),
            FieldType::SubService(name) => f.write_str(name),
        }
    }
}

impl Serialize for FieldType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Field {
    pub id: &'static str,
    pub label: &'static str,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub placeholder: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub secret: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<&'static str>,
    #[serde(skip_serializing_if = "str::is_empty")]
    pub description: &'static str,
}

impl Field {
    #[must_use]
    pub fn new(id: &'static str, label: &'static str, field_type: FieldType) -> Self {
        Field {
            id,
            label,
            field_type,
            placeholder: "",
            default: None,
            required: false,
            secret: false,
            hidden: false,
            choices: Vec::new(),
            description: "",
        }
    }

    #[must_use]
    pub fn placeholder(mut self, placeholder: &'static str) -> Self {
        self.placeholder = placeholder;
        self
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    #[must_use]
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    #[must_use]
    pub fn choices(mut self, choices: &[&'static str]) -> Self {
        self.choices = choices.to_vec();
        self
    }

    #[must_use]
    pub fn description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }
}

/// A nested form referenced from a [`FieldType::SubService`] field.
#[derive(Debug, Clone, Serialize)]
pub struct SubService {
    pub name: &'static str,
    pub fields: Vec<Field>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_serialize_sparsely() {
        let f = Field::new("mxs", "Mail servers", FieldType::List(Box::new(FieldType::SubService("svcs.MX"))))
            .required();
        let v = serde_json::to_value(&f).unwrap();
        assert_eq!(v["type"], "[]svcs.MX");
        assert_eq!(v["required"], true);
        assert!(v.get("secret").is_none());
        assert!(v.get("placeholder").is_none());
    }
}
