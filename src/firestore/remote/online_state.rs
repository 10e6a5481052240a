/// Connectivity state the Remote Store reports upward to the Sync Engine.
///
/// Mirrors the Firestore JS SDK's `OnlineState` from
/// `packages/firestore/src/core/types.ts`: `Unknown` is the initial state
/// before the watch stream has either succeeded or failed enough times to
/// decide, and a view transitions to `SyncState::Local` only once the Remote
/// Store reports `Offline`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnlineState {
    Unknown,
    Online,
    Offline,
}

impl Default for OnlineState {
    fn default() -> Self {
        OnlineState::Unknown
    }
}

/// Number of consecutive watch stream failures the Remote Store tolerates
/// before declaring `Offline`, giving a transient network blip a chance to
/// self-heal without flipping every view to `SyncState::Local`.
pub const MAX_WATCH_STREAM_FAILURES: u32 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_unknown() {
        assert_eq!(OnlineState::default(), OnlineState::Unknown);
    }
}
