//! Typed identifiers for persisted entities.

/// Defines a UUID-backed identifier newtype.
///
/// Generates `new()` (random v4), `from_uuid()`, `as_uuid()`, `Display`, and
/// the `Uuid` conversions the storage layer relies on.
macro_rules! define_uuid_id {
    (
        $(#[$meta:meta])*
        $vis:vis struct $Name:ident;
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            serde::Serialize, serde::Deserialize,
        )]
        #[serde(transparent)]
        $vis struct $Name(uuid::Uuid);

        impl $Name {
            /// Generates a fresh random id.
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// Wraps an existing UUID, e.g. one read back from storage.
            pub fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $Name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $Name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<uuid::Uuid> for $Name {
            fn from(value: uuid::Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$Name> for uuid::Uuid {
            fn from(value: $Name) -> Self {
                value.0
            }
        }
    };
}

define_uuid_id! {
    /// Stable identifier of a [`crate::model::Member`].
    pub struct MemberId;
}

define_uuid_id! {
    /// Stable identifier of a [`crate::model::Team`].
    pub struct TeamId;
}
