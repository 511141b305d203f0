//! Typed identifiers that cross the interchange boundary as bare string tokens.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Wrap a token, treating an absent or empty token as no identifier.
            pub fn from_token(token: Option<&str>) -> Option<Self> {
                match token {
                    Some(value) if !value.is_empty() => Some(Self(value.to_string())),
                    _ => None,
                }
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of a stored workflow definition.
    WorkflowId
);
string_id!(
    /// Identifier of a user group, e.g. the group owning a workflow.
    GroupId
);
string_id!(
    /// Identifier of a user.
    UserId
);

/// Deserialize an optional id from a bare token; `null` and `""` become `None`.
pub fn deserialize_optional_id<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: From<String>,
{
    let token: Option<String> = Option::deserialize(deserializer)?;
    Ok(token.filter(|value| !value.is_empty()).map(T::from))
}
