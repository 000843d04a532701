//! Shared event/enum vocabulary. Lives here (rather than in `vaultkit-core`)
//! so a UI-only crate can match on sync/conflict kinds without depending on
//! the crypto/network/runtime stack.
use serde::{Deserialize, Serialize};

/// The two conflict channels from the wire protocol (spec.md §4.4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    UuidConflict,
    SyncConflict,
}

/// Event names emitted by the core (spec.md §6.5), kept as a closed enum
/// rather than raw strings so host code gets exhaustiveness checking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncEventName {
    LocalDataIncrementalLoad,
    LocalDataLoaded,
    SyncCompleted,
    SyncError,
    SyncTakingTooLong,
    MajorDataChange,
    SyncSessionInvalid,
    SyncException,
    EnterOutOfSync,
    ExitOutOfSync,
}

impl SyncEventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LocalDataIncrementalLoad => "local-data-incremental-load",
            Self::LocalDataLoaded => "local-data-loaded",
            Self::SyncCompleted => "sync:completed",
            Self::SyncError => "sync:error",
            Self::SyncTakingTooLong => "sync:taking-too-long",
            Self::MajorDataChange => "major-data-change",
            Self::SyncSessionInvalid => "sync-session-invalid",
            Self::SyncException => "sync-exception",
            Self::EnterOutOfSync => "enter-out-of-sync",
            Self::ExitOutOfSync => "exit-out-of-sync",
        }
    }
}

impl std::fmt::Display for SyncEventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_match_wire_strings() {
        assert_eq!(SyncEventName::SyncCompleted.as_str(), "sync:completed");
        assert_eq!(
            SyncEventName::EnterOutOfSync.as_str(),
            "enter-out-of-sync"
        );
    }
}
