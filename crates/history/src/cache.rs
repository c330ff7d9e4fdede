use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use agenthub_backend::{BackendClient, ConversationSession, SessionSummary};
use agenthub_session::SessionState;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::trigger::{Reaction, SessionTrigger};
use crate::HistoryError;

/// Snapshot published to the sidebar.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryState {
    pub sessions: Vec<SessionSummary>,
    /// Principal the sessions were fetched for.
    pub owner: Option<String>,
    pub loading: bool,
}

#[derive(Default)]
struct Control {
    epoch: u64,
    refreshing: u32,
}

struct Inner {
    backend: BackendClient,
    session: watch::Receiver<SessionState>,
    state: watch::Sender<HistoryState>,
    control: Mutex<Control>,
}

struct ObserverGuard(JoinHandle<()>);

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Past conversations of the signed-in principal.
///
/// Follows the session published by the identity manager: fetches when it
/// becomes authorized and empties as soon as the identity disappears.
#[derive(Clone)]
pub struct ConversationHistoryCache {
    inner: Arc<Inner>,
    _observer: Arc<ObserverGuard>,
}

impl ConversationHistoryCache {
    /// Must be called from within a tokio runtime.
    pub fn start(backend: BackendClient, session: watch::Receiver<SessionState>) -> Self {
        let (state, _) = watch::channel(HistoryState::default());
        let inner = Arc::new(Inner {
            backend,
            session: session.clone(),
            state,
            control: Mutex::new(Control::default()),
        });

        let observer = tokio::spawn(observe_session(Arc::downgrade(&inner), session));

        Self {
            inner,
            _observer: Arc::new(ObserverGuard(observer)),
        }
    }

    /// Cached summaries in server order; empty unless they belong to the
    /// identity currently signed in.
    pub fn sessions(&self) -> Vec<SessionSummary> {
        let session = self.inner.session.borrow();
        let state = self.inner.state.borrow();
        match (session.uid(), state.owner.as_deref()) {
            (Some(uid), Some(owner)) if uid == owner => state.sessions.clone(),
            _ => Vec::new(),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().loading
    }

    pub fn subscribe(&self) -> watch::Receiver<HistoryState> {
        self.inner.state.subscribe()
    }

    /// Replace the list with the server's current view.
    ///
    /// Skipped while the session is not authorized. A failed fetch empties the
    /// list; a response for a principal that is no longer signed in is dropped.
    pub async fn refresh(&self) -> Result<(), HistoryError> {
        self.inner.refresh().await
    }

    /// Hook for flows that complete a server turn. Refreshes when the turn
    /// produced a session id other than the active one.
    pub async fn record_turn(
        &self,
        active: Option<&str>,
        returned: &str,
    ) -> Result<bool, HistoryError> {
        if active == Some(returned) {
            return Ok(false);
        }
        debug!(session_id = returned, "turn started a new session");
        self.inner.refresh().await?;
        Ok(true)
    }

    /// Delete on the server, then drop the entry locally.
    pub async fn delete(&self, id: &str) -> Result<(), HistoryError> {
        if let Err(error) = self.inner.backend.delete_chat_session(id).await {
            warn!(session_id = id, %error, "session deletion rejected");
            return Err(HistoryError::classify(error, id));
        }

        let removed = self.inner.state.send_if_modified(|state| {
            let before = state.sessions.len();
            state.sessions.retain(|session| session.id != id);
            state.sessions.len() != before
        });
        info!(session_id = id, removed, "session deleted");
        Ok(())
    }

    /// Full transcript of a past conversation. Leaves the list untouched.
    pub async fn open(&self, id: &str) -> Result<ConversationSession, HistoryError> {
        self.inner
            .backend
            .chat_session(id)
            .await
            .map_err(|error| HistoryError::classify(error, id))
    }
}

impl Inner {
    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn authorized_uid(&self) -> Option<String> {
        let session = self.session.borrow();
        if session.is_authorized() {
            session.uid().map(str::to_owned)
        } else {
            None
        }
    }

    fn clear(&self) {
        let mut control = self.lock_control();
        control.epoch += 1;
        let cleared = self.state.send_if_modified(|state| {
            let had_sessions = !state.sessions.is_empty() || state.owner.is_some();
            state.sessions.clear();
            state.owner = None;
            had_sessions
        });
        if cleared {
            debug!("history cleared for departed principal");
        }
    }

    async fn refresh(&self) -> Result<(), HistoryError> {
        let Some(uid) = self.authorized_uid() else {
            debug!("skipping history refresh without an authorized session");
            return Ok(());
        };

        let epoch = {
            let mut control = self.lock_control();
            control.refreshing += 1;
            self.state
                .send_if_modified(|state| !std::mem::replace(&mut state.loading, true));
            control.epoch
        };

        let outcome = self.backend.chat_history().await;

        let mut control = self.lock_control();
        control.refreshing = control.refreshing.saturating_sub(1);
        let loading = control.refreshing > 0;
        let current =
            control.epoch == epoch && self.authorized_uid().as_deref() == Some(uid.as_str());

        match outcome {
            Ok(sessions) if current => {
                info!(uid = %uid, count = sessions.len(), "history refreshed");
                self.state.send_modify(|state| {
                    state.sessions = sessions;
                    state.owner = Some(uid.clone());
                    state.loading = loading;
                });
                Ok(())
            }
            Ok(_) => {
                debug!(uid = %uid, "discarding history for a previous principal");
                self.state.send_if_modified(|state| {
                    std::mem::replace(&mut state.loading, loading) != loading
                });
                Ok(())
            }
            Err(error) => {
                warn!(uid = %uid, %error, "history refresh failed");
                self.state.send_modify(|state| {
                    if current {
                        state.sessions.clear();
                        state.owner = None;
                    }
                    state.loading = loading;
                });
                Err(HistoryError::Backend(error))
            }
        }
    }
}

async fn observe_session(inner: Weak<Inner>, mut session: watch::Receiver<SessionState>) {
    let mut trigger = SessionTrigger::default();
    loop {
        let reaction = trigger.observe_state(&session.borrow_and_update());
        let Some(strong) = inner.upgrade() else {
            break;
        };

        match reaction {
            Reaction::Refresh => {
                tokio::spawn(async move {
                    if let Err(error) = strong.refresh().await {
                        debug!(%error, "automatic history refresh failed");
                    }
                });
            }
            Reaction::Clear => strong.clear(),
            Reaction::Nothing => {}
        }

        if session.changed().await.is_err() {
            debug!("session manager dropped, history observer exiting");
            break;
        }
    }
}
