#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_ID_LEN: usize = 256;
const ROOT: &str = "root";

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("id must not be empty")]
    Empty,
    #[error("id is too long")]
    TooLong,
    #[error("id contains control characters")]
    ContainsControl,
    #[error("'root' is reserved for the top-level parent")]
    Reserved,
}

fn validate_id(value: &str) -> Result<(), IdError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(IdError::Empty);
    }
    if trimmed.len() > MAX_ID_LEN {
        return Err(IdError::TooLong);
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(IdError::ContainsControl);
    }
    Ok(())
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $validate:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_string(self) -> String {
                self.0
            }

            pub fn try_new(value: impl Into<String>) -> Result<Self, IdError> {
                let value = value.into();
                let validate: fn(&str) -> Result<(), IdError> = $validate;
                validate(&value)?;
                Ok(Self(value))
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::try_new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Stable identifier of a logical node. Every instance of a clone shares it.
    NodeId,
    |value| {
        validate_id(value)?;
        if value == ROOT {
            return Err(IdError::Reserved);
        }
        Ok(())
    }
);

string_id!(TemplateId, validate_id);

string_id!(
    /// Scopes a forest and its persisted rows.
    TreeId,
    validate_id
);

impl NodeId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// The parent a node instance hangs under.
///
/// Persisted records keep the flat `parentIds` shape: `Root` is written as the
/// string `"root"`, node parents as their id.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ParentRef {
    Root,
    Node(NodeId),
}

impl ParentRef {
    pub fn parse(value: &str) -> Result<Self, IdError> {
        if value.trim() == ROOT {
            return Ok(Self::Root);
        }
        NodeId::try_new(value).map(Self::Node)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Root => ROOT,
            Self::Node(id) => id.as_str(),
        }
    }

    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            Self::Root => None,
            Self::Node(id) => Some(id),
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, Self::Root)
    }
}

impl From<NodeId> for ParentRef {
    fn from(value: NodeId) -> Self {
        Self::Node(value)
    }
}

impl TryFrom<String> for ParentRef {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ParentRef> for String {
    fn from(value: ParentRef) -> Self {
        match value {
            ParentRef::Root => ROOT.to_string(),
            ParentRef::Node(id) => id.into_string(),
        }
    }
}

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
