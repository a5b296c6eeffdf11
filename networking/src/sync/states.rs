/// Synchronizer state machine.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncState {
    /// Catch-up has not run yet, or no server matched any chain.
    #[default]
    Idle,

    /// Catch-up is fetching headers.
    Syncing,

    /// Catch-up finished for at least one chain. Live monitoring keeps the
    /// chains current from here on.
    Synced,
}

impl SyncState {
    /// Check if a transition to the target state is valid.
    pub fn can_transition_to(&self, target: SyncState) -> bool {
        match self {
            SyncState::Idle => matches!(target, SyncState::Syncing),
            SyncState::Syncing => matches!(target, SyncState::Synced | SyncState::Idle),
            SyncState::Synced => matches!(target, SyncState::Syncing | SyncState::Idle),
        }
    }
}
