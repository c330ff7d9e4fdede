use agenthub_session::{Role, SessionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reaction {
    Refresh,
    Clear,
    Nothing,
}

/// Decides what the cache does for each published session snapshot.
///
/// Remembers the principal it last refreshed for, so repeated snapshots of the
/// same authorized session fire a single fetch.
#[derive(Debug, Default)]
pub(crate) struct SessionTrigger {
    refreshed_for: Option<String>,
}

impl SessionTrigger {
    pub(crate) fn observe_state(&mut self, state: &SessionState) -> Reaction {
        self.observe(state.uid(), state.role())
    }

    pub(crate) fn observe(&mut self, uid: Option<&str>, role: Option<Role>) -> Reaction {
        match (uid, role) {
            (None, _) => {
                self.refreshed_for = None;
                Reaction::Clear
            }
            (Some(uid), None) => match self.refreshed_for.take() {
                Some(previous) if previous != uid => Reaction::Clear,
                _ => Reaction::Nothing,
            },
            (Some(uid), Some(_)) if self.refreshed_for.as_deref() == Some(uid) => Reaction::Nothing,
            (Some(uid), Some(_)) => {
                self.refreshed_for = Some(uid.to_owned());
                Reaction::Refresh
            }
        }
    }
}
