//! State machine reconciling the provider identity with the server role.
//!
//! Phases run `SignedOut -> Authenticating -> SyncingRole -> Authorized`, with
//! `SyncFailed -> SignedOut` when the server refuses the identity. Every role
//! exchange carries a `(epoch, uid)` ticket; logout and every local clear bump
//! the epoch so late responses for a previous principal are dropped.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use agenthub_backend::Role;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::authority::{SessionAuthority, SessionSyncError};
use crate::identity::{Identity, IdentityProvider, ProviderAuthError};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Provider(#[from] ProviderAuthError),
    /// Shared with every caller that joined the same exchange.
    #[error(transparent)]
    Sync(#[from] Arc<SessionSyncError>),
    #[error("the session changed before authorization completed")]
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    SignedOut,
    Authenticating,
    SyncingRole,
    SyncFailed,
    Authorized,
}

/// Snapshot published to dependents.
///
/// A role is only ever present together with the identity it was issued for.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    identity: Option<Identity>,
    role: Option<Role>,
    phase: SessionPhase,
    loading: bool,
}

impl SessionState {
    fn initial() -> Self {
        Self {
            identity: None,
            role: None,
            phase: SessionPhase::SignedOut,
            loading: true,
        }
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn is_authorized(&self) -> bool {
        self.identity.is_some() && self.role.is_some()
    }

    pub fn uid(&self) -> Option<&str> {
        self.identity
            .as_ref()
            .map(|identity| identity.provider_uid.as_str())
    }

    fn clear(&mut self) {
        self.identity = None;
        self.role = None;
        self.phase = SessionPhase::SignedOut;
    }

    fn adopt(&mut self, identity: Identity) {
        if self.uid() != Some(identity.provider_uid.as_str()) {
            self.role = None;
        }
        self.identity = Some(identity);
        self.phase = SessionPhase::SyncingRole;
    }

    fn authorize(&mut self, role: Role) {
        if self.identity.is_some() {
            self.role = Some(role);
            self.phase = SessionPhase::Authorized;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Ticket {
    epoch: u64,
    uid: String,
}

#[derive(Default)]
struct Control {
    epoch: u64,
    in_flight: Option<Ticket>,
    last_failed: Option<(Ticket, Arc<SessionSyncError>)>,
    signing_out: u32,
}

struct Inner {
    provider: Arc<dyn IdentityProvider>,
    authority: SessionAuthority,
    state: watch::Sender<SessionState>,
    control: Mutex<Control>,
}

struct ListenerGuard(JoinHandle<()>);

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Owns `{identity, role, loading}` for the process.
///
/// Constructing one subscribes to the provider's restoration notifications;
/// the listener lives until the last clone is dropped.
#[derive(Clone)]
pub struct IdentitySessionManager {
    inner: Arc<Inner>,
    _listener: Arc<ListenerGuard>,
}

impl IdentitySessionManager {
    /// Must be called from within a tokio runtime.
    pub fn start(provider: Arc<dyn IdentityProvider>, authority: SessionAuthority) -> Self {
        let (state, _) = watch::channel(SessionState::initial());
        let inner = Arc::new(Inner {
            provider,
            authority,
            state,
            control: Mutex::new(Control::default()),
        });

        let notifications = inner.provider.subscribe();
        let listener = tokio::spawn(resume_listener(Arc::downgrade(&inner), notifications));

        Self {
            inner,
            _listener: Arc::new(ListenerGuard(listener)),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner.state.borrow().identity.clone()
    }

    pub fn role(&self) -> Option<Role> {
        self.inner.state.borrow().role
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.borrow().loading
    }

    /// Resolves once the first provider notification has been handled.
    pub async fn wait_until_settled(&self) -> SessionState {
        let mut receiver = self.subscribe();
        let settled = match receiver.wait_for(|state| !state.loading).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        settled
    }

    /// Interactive login followed by the role exchange.
    pub async fn login(&self) -> Result<Role, SessionError> {
        self.inner.state.send_modify(|state| {
            if state.identity.is_none() {
                state.phase = SessionPhase::Authenticating;
            }
        });

        let identity = match self.inner.provider.sign_in().await {
            Ok(identity) => identity,
            Err(error) => {
                self.inner.state.send_modify(|state| {
                    if state.phase == SessionPhase::Authenticating {
                        state.phase = SessionPhase::SignedOut;
                    }
                });
                warn!(%error, "provider sign-in failed");
                return Err(error.into());
            }
        };

        info!(uid = %identity.provider_uid, "provider sign-in completed");
        self.inner.synchronise(identity).await
    }

    /// Clears identity and role before returning; the provider and server
    /// revocations run when the returned future is awaited and never fail.
    pub fn logout(&self) -> impl Future<Output = ()> + Send + 'static {
        {
            let mut control = self.inner.lock_control();
            control.epoch += 1;
            control.in_flight = None;
            control.signing_out += 1;
            self.inner.state.send_modify(SessionState::clear);
        }
        info!("local session cleared");

        let guard = SigningOut(self.inner.clone());
        let inner = self.inner.clone();
        async move {
            if let Err(error) = inner.provider.sign_out().await {
                warn!(%error, "provider sign-out failed");
            }
            drop(guard);

            if let Err(error) = inner.authority.revoke().await {
                warn!(%error, "server session revocation failed");
            }
        }
    }
}

struct SigningOut(Arc<Inner>);

impl Drop for SigningOut {
    fn drop(&mut self) {
        let mut control = self.0.lock_control();
        control.signing_out = control.signing_out.saturating_sub(1);
    }
}

enum Next {
    Done(Role),
    Join(Ticket),
    Exchange(Ticket),
}

impl Inner {
    fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, control: &Control, ticket: &Ticket) -> bool {
        control.epoch == ticket.epoch && self.state.borrow().uid() == Some(ticket.uid.as_str())
    }

    async fn on_provider_notification(&self, observed: Option<Identity>) {
        match observed {
            Some(identity) => {
                let signing_out = self.lock_control().signing_out > 0;
                if signing_out {
                    debug!(uid = %identity.provider_uid, "ignoring provider session while signing out");
                } else if let Err(error) = self.synchronise(identity).await {
                    warn!(%error, "restored provider session was not authorized");
                }
            }
            None => {
                let mut control = self.lock_control();
                if self.state.borrow().identity.is_some() {
                    control.epoch += 1;
                    control.in_flight = None;
                    self.state.send_modify(SessionState::clear);
                    info!("provider reported sign-out, local session cleared");
                }
            }
        }

        self.state.send_if_modified(|state| std::mem::replace(&mut state.loading, false));
    }

    async fn synchronise(&self, identity: Identity) -> Result<Role, SessionError> {
        let next = {
            let mut control = self.lock_control();
            let (same_uid, role) = {
                let state = self.state.borrow();
                (
                    state.uid() == Some(identity.provider_uid.as_str()),
                    state.role,
                )
            };

            let joinable = control
                .in_flight
                .clone()
                .filter(|ticket| same_uid && ticket.uid == identity.provider_uid);

            match (same_uid, role, joinable) {
                (true, Some(role), _) => Next::Done(role),
                (_, _, Some(ticket)) => Next::Join(ticket),
                _ => {
                    control.epoch += 1;
                    let ticket = Ticket {
                        epoch: control.epoch,
                        uid: identity.provider_uid.clone(),
                    };
                    control.in_flight = Some(ticket.clone());
                    let adopted = identity.clone();
                    self.state.send_modify(move |state| state.adopt(adopted));
                    Next::Exchange(ticket)
                }
            }
        };

        match next {
            Next::Done(role) => {
                debug!(uid = %identity.provider_uid, %role, "role already held, skipping exchange");
                Ok(role)
            }
            Next::Join(ticket) => self.join(ticket).await,
            Next::Exchange(ticket) => {
                debug!(uid = %ticket.uid, epoch = ticket.epoch, "exchanging identity for role");
                let outcome = self.authority.exchange(&identity).await;
                self.complete(ticket, outcome).await
            }
        }
    }

    async fn join(&self, ticket: Ticket) -> Result<Role, SessionError> {
        let mut receiver = self.state.subscribe();
        let settled = receiver
            .wait_for(|state| {
                !matches!(state.phase, SessionPhase::SyncingRole | SessionPhase::SyncFailed)
                    || state.uid() != Some(ticket.uid.as_str())
            })
            .await
            .map(|state| state.clone());

        let failure = self
            .lock_control()
            .last_failed
            .as_ref()
            .filter(|(failed, _)| *failed == ticket)
            .map(|(_, error)| error.clone());
        let incomplete = || Arc::new(SessionSyncError::Incomplete);
        match (settled, failure) {
            (Ok(state), failure) if state.uid() == Some(ticket.uid.as_str()) => state
                .role
                .ok_or_else(|| SessionError::Sync(failure.unwrap_or_else(incomplete))),
            (Ok(_), Some(error)) => Err(SessionError::Sync(error)),
            (Ok(_), None) => Err(SessionError::Superseded),
            (Err(_), failure) => Err(SessionError::Sync(failure.unwrap_or_else(incomplete))),
        }
    }

    async fn complete(
        &self,
        ticket: Ticket,
        outcome: Result<Role, SessionSyncError>,
    ) -> Result<Role, SessionError> {
        match outcome {
            Ok(role) => {
                let applied = {
                    let mut control = self.lock_control();
                    if control.in_flight.as_ref() == Some(&ticket) {
                        control.in_flight = None;
                    }
                    let current = self.is_current(&control, &ticket);
                    if current {
                        self.state.send_modify(|state| state.authorize(role));
                    }
                    current
                };

                if applied {
                    info!(uid = %ticket.uid, %role, "session authorized");
                    Ok(role)
                } else {
                    debug!(uid = %ticket.uid, epoch = ticket.epoch, "discarding stale role exchange");
                    Err(SessionError::Superseded)
                }
            }
            Err(error) => {
                let error = Arc::new(error);
                let current = {
                    let mut control = self.lock_control();
                    if control.in_flight.as_ref() == Some(&ticket) {
                        control.in_flight = None;
                    }
                    let current = self.is_current(&control, &ticket);
                    if current {
                        control.last_failed = Some((ticket.clone(), error.clone()));
                        self.state
                            .send_modify(|state| state.phase = SessionPhase::SyncFailed);
                    }
                    current
                };

                if !current {
                    debug!(uid = %ticket.uid, %error, "ignoring failure of stale role exchange");
                    return Err(SessionError::Sync(error));
                }

                warn!(uid = %ticket.uid, %error, "role exchange failed, revoking provider session");
                if let Err(revoke_error) = self.provider.sign_out().await {
                    warn!(error = %revoke_error, "provider sign-out after failed exchange failed");
                }

                let mut control = self.lock_control();
                if control.epoch == ticket.epoch {
                    control.epoch += 1;
                    self.state.send_modify(SessionState::clear);
                }

                Err(SessionError::Sync(error))
            }
        }
    }
}

async fn resume_listener(
    inner: Weak<Inner>,
    mut notifications: watch::Receiver<Option<Identity>>,
) {
    loop {
        let observed = notifications.borrow_and_update().clone();
        let Some(strong) = inner.upgrade() else {
            break;
        };
        strong.on_provider_notification(observed).await;
        drop(strong);

        if notifications.changed().await.is_err() {
            debug!("identity provider closed its notification channel");
            break;
        }
    }
}
