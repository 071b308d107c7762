//! Handles and labels exposed by the graphs.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle to a type vertex, valid within the schema graph that issued it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeRef(pub(crate) u32);

/// Handle to a thing vertex, valid within the data graph that issued it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThingRef(pub(crate) u32);

/// Handle to a rule, valid within the schema graph that issued it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleRef(pub(crate) u32);

macro_rules! handle_index {
    ($($handle:ident),*) => {$(
        impl $handle {
            pub(crate) fn index(self) -> usize {
                self.0 as usize
            }
        }
    )*};
}

handle_index!(TypeRef, ThingRef, RuleRef);

/// Name of a type, optionally scoped (role types are scoped by their
/// relation type).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    /// Unscoped name.
    pub name: String,
    /// Scope, for role types.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl Label {
    /// An unscoped label.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: None,
        }
    }

    /// A label scoped under `scope`.
    pub fn scoped(name: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: Some(scope.into()),
        }
    }

    /// `scope:name`, or just `name` when unscoped; the form used by the
    /// label index.
    pub fn scoped_name(&self) -> String {
        match &self.scope {
            Some(scope) => format!("{scope}:{}", self.name),
            None => self.name.clone(),
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{scope}:{}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

impl From<&str> for Label {
    fn from(name: &str) -> Self {
        Label::new(name)
    }
}

/// Properties carried by a type edge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TypeEdgeProps {
    /// Inherited target this edge overrides (e.g. an owned attribute type
    /// specialising the supertype's).
    pub overridden: Option<TypeRef>,
    /// Whether owned values must be unique across owners.
    pub unique: bool,
}
