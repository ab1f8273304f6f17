use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

macro_rules! opaque_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap an externally supplied opaque string (e.g. a workspace key
            /// handed in by the caller, or a tool-call id from the host).
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
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

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }
    };
}

opaque_id!(
    WorkspaceId,
    "Opaque tenant key; processes are partitioned by workspace."
);
opaque_id!(
    ToolCallId,
    "Opaque id the host uses to mark a foreground bash tool call."
);

/// Opaque id assigned by the engine at `start`, unique for the host process's
/// lifetime. Not reused across restarts — callers must not persist it across
/// engine instances.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    /// Mint a fresh, unique process id.
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ProcessId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn process_ids_are_unique() {
        let a = ProcessId::generate();
        let b = ProcessId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn workspace_id_round_trips_through_display() {
        let ws = WorkspaceId::new("proj-7");
        assert_eq!(ws.to_string(), "proj-7");
        assert_eq!(ws.as_str(), "proj-7");
    }

    #[test]
    fn ids_serialize_as_bare_strings() {
        let ws = WorkspaceId::new("proj-7");
        assert_eq!(serde_json::to_string(&ws).unwrap(), "\"proj-7\"");
    }
}
