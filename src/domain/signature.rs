//! Declared tool signatures
//!
//! A signature is the contract a generated implementation must honour: the
//! entry point name, its parameters, and the return type. Signatures are
//! written in a compact form, e.g. `(city: string) -> number`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AnvilError, Result};

/// Entry point every generated tool must declare
pub const DEFAULT_ENTRY_POINT: &str = "run";

/// Type of a declared parameter or return value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Any,
}

impl ParamType {
    /// Parse a type name; accepts a few common aliases
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "string" | "str" => Ok(ParamType::String),
            "integer" | "int" => Ok(ParamType::Integer),
            "number" | "float" => Ok(ParamType::Number),
            "boolean" | "bool" => Ok(ParamType::Boolean),
            "array" | "list" => Ok(ParamType::Array),
            "object" | "dict" => Ok(ParamType::Object),
            "any" => Ok(ParamType::Any),
            other => Err(AnvilError::Parse(format!("unknown type: {}", other))),
        }
    }

    /// Representative value used when verifying a candidate
    pub fn sample_value(&self) -> serde_json::Value {
        match self {
            ParamType::String | ParamType::Any => serde_json::json!("test"),
            ParamType::Integer => serde_json::json!(1),
            ParamType::Number => serde_json::json!(1.0),
            ParamType::Boolean => serde_json::json!(true),
            ParamType::Array => serde_json::json!([]),
            ParamType::Object => serde_json::json!({}),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Integer => "integer",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::Any => "any",
        }
    }
}

/// A declared input parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
}

impl Param {
    pub fn new(name: impl Into<String>, ty: ParamType) -> Self {
        Self { name: name.into(), ty }
    }
}

/// Declared invocation contract of a tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub entry_point: String,
    pub params: Vec<Param>,
    pub returns: ParamType,
}

impl Signature {
    /// Create a signature with the default entry point
    pub fn new(params: Vec<Param>, returns: ParamType) -> Self {
        Self {
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
            params,
            returns,
        }
    }

    /// Parse `(name: type, ...) -> type`
    ///
    /// The return clause is optional and defaults to `any`.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let (params_part, returns_part) = match text.split_once("->") {
            Some((p, r)) => (p.trim(), Some(r.trim())),
            None => (text, None),
        };

        let inner = params_part
            .strip_prefix('(')
            .and_then(|s| s.strip_suffix(')'))
            .ok_or_else(|| AnvilError::Parse(format!("signature must be parenthesised: {}", text)))?;

        let mut params = Vec::new();
        for piece in inner.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, ty) = piece
                .split_once(':')
                .ok_or_else(|| AnvilError::Parse(format!("parameter needs a type: {}", piece)))?;
            let name = name.trim();
            if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                return Err(AnvilError::Parse(format!("invalid parameter name: {}", name)));
            }
            if params.iter().any(|p: &Param| p.name == name) {
                return Err(AnvilError::Parse(format!("duplicate parameter: {}", name)));
            }
            params.push(Param::new(name, ParamType::parse(ty)?));
        }

        let returns = match returns_part {
            Some(r) => ParamType::parse(r)?,
            None => ParamType::Any,
        };

        Ok(Self::new(params, returns))
    }

    /// Names of the declared parameters, in order
    pub fn param_names(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.name.as_str()).collect()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.ty.as_str()))
            .collect();
        write!(f, "({}) -> {}", params.join(", "), self.returns.as_str())
    }
}
