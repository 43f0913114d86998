//! Newtype wrappers for engine-facing identifiers.
//!
//! All newtypes serialize/deserialize as plain strings.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! string_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_newtype!(
    /// Name of a service, unique within a project.
    ServiceName
);

string_newtype!(
    /// Engine container name, `{namespace}_{service}_{instance}`.
    ContainerName
);

string_newtype!(
    /// Engine image identifier, usually `sha256:<hex>`.
    ImageId
);

impl ImageId {
    /// The 12-character hex prefix engines display for an image.
    pub fn short(&self) -> &str {
        let hex = self.0.strip_prefix("sha256:").unwrap_or(&self.0);
        &hex[..12.min(hex.len())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_name_display_and_eq() {
        let name = ServiceName::new("web");
        assert_eq!(name.to_string(), "web");
        assert_eq!(name, "web");
        assert_eq!(name.as_str(), "web");
    }

    #[test]
    fn container_name_serde_is_transparent() {
        let name = ContainerName::new("ansible_web_1");
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"ansible_web_1\"");
        let back: ContainerName = serde_json::from_str(&json).unwrap();
        assert_eq!(back, name);
    }

    #[test]
    fn image_id_short_strips_digest_prefix() {
        let id = ImageId::new("sha256:0123456789abcdef0123");
        assert_eq!(id.short(), "0123456789ab");
        assert_eq!(ImageId::new("abc").short(), "abc");
    }
}
