//! Auth context: the session/profile state machine.
//!
//! Every input that can change the phase (startup, a backend event,
//! `login`, `logout`, `dispose`) takes a ticket from a monotonically
//! increasing counter. Profile lookups run in their own tasks and carry
//! the ticket they were started under; a result is applied only while
//! that ticket is still the latest, so the most recent input always wins
//! regardless of the order lookups complete in.

use std::sync::{Arc, Weak};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use civic_core::config::AuthConfig;
use civic_core::result::AppResult;
use civic_entity::profile::{Permission, Profile, UserRole};
use civic_entity::session::Session;

use crate::backend::{AuthBackend, AuthEvent, AuthEventKind};
use crate::error::AuthError;
use crate::rbac::RbacEnforcer;

use super::state::{AuthPhase, AuthSnapshot};
use super::store::ProfileStore;

/// Result of [`AuthContext::logout`]. Local state is cleared in both cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogoutOutcome {
    /// The backend terminated the session.
    Clean,
    /// The backend could not terminate the session.
    LocalOnly(AuthError),
}

impl LogoutOutcome {
    /// Whether the backend confirmed the sign-out.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }
}

/// Ticket bookkeeping guarded by the transition lock.
#[derive(Debug, Default)]
struct Transitions {
    /// Latest issued ticket.
    ticket: u64,
    /// Set once by `dispose`.
    disposed: bool,
}

/// Owns the authentication state for one application instance.
///
/// Constructed explicitly and shared as `Arc<AuthContext>`; call
/// [`start`](Self::start) once, and [`dispose`](Self::dispose) on shutdown.
pub struct AuthContext {
    /// Backend auth surface.
    auth: Arc<dyn AuthBackend>,
    /// Profile lookups.
    profiles: ProfileStore,
    /// Authorization checks.
    rbac: RbacEnforcer,
    /// Timeouts and guard paths.
    config: AuthConfig,
    /// Published state.
    state: watch::Sender<AuthSnapshot>,
    /// Serializes transitions and owns the ticket counter.
    transitions: Mutex<Transitions>,
    /// Event listener task.
    listener: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("phase", &self.state.borrow().phase.name())
            .field("profiles_table", &self.profiles.table())
            .field("config", &self.config)
            .finish()
    }
}

impl AuthContext {
    /// Creates a context in the `Initializing` phase.
    pub fn new(auth: Arc<dyn AuthBackend>, profiles: ProfileStore, config: AuthConfig) -> Arc<Self> {
        let (state, _) = watch::channel(AuthSnapshot::default());
        Arc::new(Self {
            auth,
            profiles,
            rbac: RbacEnforcer::new(),
            config,
            state,
            transitions: Mutex::new(Transitions::default()),
            listener: std::sync::Mutex::new(None),
        })
    }

    /// Subscribes to backend events, then resolves any existing session.
    ///
    /// Returns once the startup lookup has settled. Calling it again is a
    /// no-op.
    pub async fn start(self: &Arc<Self>) {
        {
            let mut listener = match self.listener.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if listener.is_some() {
                warn!("Auth context already started");
                return;
            }
            let events = self.auth.subscribe();
            *listener = Some(self.spawn_listener(events));
        }

        self.bootstrap().await;
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Current state.
    pub fn snapshot(&self) -> AuthSnapshot {
        self.state.borrow().clone()
    }

    /// Receiver that observes every published state.
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.state.subscribe()
    }

    /// Whether a profile is loaded for the current session.
    pub fn is_authenticated(&self) -> bool {
        self.state.borrow().is_authenticated()
    }

    /// Whether the module is still resolving.
    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading()
    }

    /// The loaded profile.
    pub fn user(&self) -> Option<Arc<Profile>> {
        match &self.state.borrow().phase {
            AuthPhase::Authenticated(profile) => Some(Arc::clone(profile)),
            _ => None,
        }
    }

    /// The current session.
    pub fn session(&self) -> Option<Session> {
        self.state.borrow().session.clone()
    }

    /// True if the user is `master` or was granted `permission`.
    pub fn has_permission(&self, permission: Permission) -> bool {
        self.rbac
            .has_permission(self.state.borrow().user(), permission)
    }

    /// True if the user is `master` or holds one of `roles`.
    pub fn has_role(&self, roles: &[UserRole]) -> bool {
        self.rbac.has_role(self.state.borrow().user(), roles)
    }

    /// Like [`has_permission`](Self::has_permission), as an authorization error.
    pub fn require_permission(&self, permission: Permission) -> AppResult<()> {
        self.rbac
            .require_permission(self.state.borrow().user(), permission)
    }

    /// Like [`has_role`](Self::has_role), as an authorization error.
    pub fn require_role(&self, roles: &[UserRole]) -> AppResult<()> {
        self.rbac.require_role(self.state.borrow().user(), roles)
    }

    /// Waits until the phase is neither `Initializing` nor `Authenticating`.
    pub async fn wait_until_settled(&self) -> AuthSnapshot {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|snapshot| !snapshot.is_loading()).await {
            Ok(snapshot) => snapshot.clone(),
            Err(_) => self.snapshot(),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Signs in with credentials.
    ///
    /// Success only means the backend accepted the credentials; the phase
    /// becomes `Authenticated` once the profile for the new session loads.
    /// On failure the previous settled state is restored; if the context was
    /// still loading, the backend's current session is resolved again.
    pub async fn login(self: &Arc<Self>, identifier: &str, secret: &str) -> Result<(), AuthError> {
        let identifier = identifier.trim();
        if identifier.is_empty() || secret.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }
        if self.is_disposed().await {
            return Err(AuthError::BackendUnavailable(
                "auth context has been disposed".to_string(),
            ));
        }

        let previous = self.snapshot();
        let ticket = self
            .begin(|snapshot| {
                snapshot.phase = AuthPhase::Authenticating;
                snapshot.notice = None;
            })
            .await;

        match self.auth.sign_in(identifier, secret).await {
            Ok(session) => {
                info!(subject = %session.subject, "Sign-in accepted");
                self.spawn_login_watchdog(ticket, session);
                Ok(())
            }
            Err(e) => {
                let err = e.into_login_failure();
                warn!(error = %err, "Sign-in failed");
                if previous.is_loading() {
                    self.resume_after_failed_login(ticket, err.clone()).await;
                } else {
                    let notice = err.clone();
                    self.apply_if_current(ticket, move |snapshot| {
                        *snapshot = previous;
                        snapshot.notice = Some(notice);
                    })
                    .await;
                }
                Err(err)
            }
        }
    }

    /// Signs out. Local state is cleared whatever the backend answers.
    pub async fn logout(&self) -> LogoutOutcome {
        let outcome = match self.auth.sign_out().await {
            Ok(()) => LogoutOutcome::Clean,
            Err(e) => {
                let err = e.into_sign_out_failure();
                warn!(error = %err, "Backend sign-out failed; clearing local session");
                LogoutOutcome::LocalOnly(err)
            }
        };

        let notice = match &outcome {
            LogoutOutcome::Clean => None,
            LogoutOutcome::LocalOnly(err) => Some(err.clone()),
        };
        self.begin(move |snapshot| {
            *snapshot = AuthSnapshot {
                phase: AuthPhase::Unauthenticated,
                session: None,
                notice,
            };
        })
        .await;

        info!("Signed out");
        outcome
    }

    /// Re-fetches the profile for the current session, keeping the phase
    /// until the lookup resolves.
    pub async fn refresh_profile(&self) -> AuthSnapshot {
        let Some(session) = self.session() else {
            debug!("No session; profile refresh skipped");
            return self.snapshot();
        };
        let ticket = self.begin(|_| {}).await;
        self.finish_profile_load(ticket, session).await;
        self.snapshot()
    }

    /// Stops the event listener and invalidates in-flight lookups.
    /// Idempotent.
    pub async fn dispose(&self) {
        {
            let mut transitions = self.transitions.lock().await;
            if transitions.disposed {
                return;
            }
            transitions.disposed = true;
            transitions.ticket += 1;
        }
        self.abort_listener();
        info!("Auth context disposed");
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Takes a new ticket and applies `update` under the transition lock.
    async fn begin(&self, update: impl FnOnce(&mut AuthSnapshot)) -> u64 {
        let mut transitions = self.transitions.lock().await;
        transitions.ticket += 1;
        self.state.send_modify(update);
        transitions.ticket
    }

    /// Applies `update` only if `ticket` is still the latest.
    async fn apply_if_current(&self, ticket: u64, update: impl FnOnce(&mut AuthSnapshot)) -> bool {
        let transitions = self.transitions.lock().await;
        if transitions.disposed || transitions.ticket != ticket {
            debug!(
                ticket,
                current = transitions.ticket,
                disposed = transitions.disposed,
                "Discarding stale result"
            );
            return false;
        }
        self.state.send_modify(update);
        true
    }

    async fn is_disposed(&self) -> bool {
        self.transitions.lock().await.disposed
    }

    async fn bootstrap(self: &Arc<Self>) {
        let ticket = self.begin(|_| {}).await;

        match self.auth.current_session().await {
            Ok(Some(session)) => {
                info!(subject = %session.subject, "Restoring existing session");
                let restored = session.clone();
                let applied = self
                    .apply_if_current(ticket, move |snapshot| {
                        snapshot.phase = AuthPhase::Authenticating;
                        snapshot.session = Some(restored);
                    })
                    .await;
                if applied {
                    self.finish_profile_load(ticket, session).await;
                }
            }
            Ok(None) => {
                debug!("No existing session");
                self.apply_if_current(ticket, |snapshot| {
                    snapshot.phase = AuthPhase::Unauthenticated;
                    snapshot.session = None;
                })
                .await;
            }
            Err(e) => {
                warn!(error = %e, "Backend unavailable during startup; treating as signed out");
                self.apply_if_current(ticket, move |snapshot| {
                    snapshot.phase = AuthPhase::Unauthenticated;
                    snapshot.session = None;
                    snapshot.notice = Some(e);
                })
                .await;
            }
        }
    }

    /// Enters `Authenticating` for `session` and loads its profile in a
    /// separate task.
    async fn load_profile(self: &Arc<Self>, session: Session) {
        let pending = session.clone();
        let ticket = self
            .begin(move |snapshot| {
                snapshot.phase = AuthPhase::Authenticating;
                snapshot.session = Some(pending);
                snapshot.notice = None;
            })
            .await;

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.finish_profile_load(ticket, session).await;
        });
    }

    /// Fetches the profile for `session` and applies the outcome if
    /// `ticket` is still current.
    async fn finish_profile_load(&self, ticket: u64, session: Session) {
        let timeout = self.config.profile_fetch_timeout();
        let subject = session.subject.clone();

        let result = match tokio::time::timeout(timeout, self.profiles.fetch(&subject)).await {
            Ok(result) => result,
            Err(_) => Err(AuthError::BackendUnavailable(format!(
                "profile lookup timed out after {}ms",
                timeout.as_millis()
            ))),
        };

        let outcome = result.clone();
        let applied = self
            .apply_if_current(ticket, move |snapshot| {
                adopt_session(snapshot, session);
                match outcome {
                    Ok(profile) => {
                        snapshot.phase = AuthPhase::Authenticated(Arc::new(profile));
                        snapshot.notice = None;
                    }
                    Err(err) => {
                        snapshot.phase = AuthPhase::ProfileLoadFailed;
                        snapshot.notice = Some(err);
                    }
                }
            })
            .await;

        if !applied {
            return;
        }
        match result {
            Ok(profile) => info!(subject = %subject, role = %profile.role, "Authenticated"),
            Err(e) => warn!(subject = %subject, error = %e, "Profile load failed"),
        }
    }

    /// Replaces the session if it belongs to the loaded profile. Returns
    /// `false` when the caller must load the profile instead.
    async fn replace_session(&self, session: &Session) -> bool {
        let _transitions = self.transitions.lock().await;
        let same_subject = self
            .state
            .borrow()
            .user()
            .is_some_and(|profile| profile.id == session.subject);
        if same_subject {
            let refreshed = session.clone();
            self.state.send_modify(move |snapshot| snapshot.session = Some(refreshed));
        }
        same_subject
    }

    // ── Events ───────────────────────────────────────────────────────

    fn spawn_listener(self: &Arc<Self>, mut events: broadcast::Receiver<AuthEvent>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let received = events.recv().await;
                let Some(context) = weak.upgrade() else {
                    break;
                };
                match received {
                    Ok(event) => context.handle_event(event).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Auth event listener lagged; resynchronizing");
                        context.resync().await;
                    }
                    Err(RecvError::Closed) => {
                        debug!("Auth event stream closed");
                        break;
                    }
                }
            }
        })
    }

    async fn handle_event(self: &Arc<Self>, event: AuthEvent) {
        debug!(event_id = %event.id, kind = ?event.kind, "Auth event received");

        match (event.kind, event.session) {
            (AuthEventKind::SignedOut, _) => {
                self.begin(|snapshot| {
                    *snapshot = AuthSnapshot {
                        phase: AuthPhase::Unauthenticated,
                        session: None,
                        notice: None,
                    };
                })
                .await;
                info!("Session ended");
            }
            (AuthEventKind::SignedIn, Some(session)) => self.load_profile(session).await,
            (AuthEventKind::TokenRefreshed, Some(session)) => {
                if self.replace_session(&session).await {
                    debug!(subject = %session.subject, "Session token refreshed");
                } else {
                    self.load_profile(session).await;
                }
            }
            (AuthEventKind::UserUpdated, Some(session)) => {
                let ticket = self.begin(|_| {}).await;
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    this.finish_profile_load(ticket, session).await;
                });
            }
            (kind, None) => warn!(?kind, "Auth event without a session ignored"),
        }
    }

    async fn resync(self: &Arc<Self>) {
        match self.auth.current_session().await {
            Ok(Some(session)) => self.load_profile(session).await,
            Ok(None) => {
                self.begin(|snapshot| {
                    *snapshot = AuthSnapshot {
                        phase: AuthPhase::Unauthenticated,
                        session: None,
                        notice: None,
                    };
                })
                .await;
            }
            Err(e) => warn!(error = %e, "Resynchronization failed; keeping current state"),
        }
    }

    /// Re-reads the backend session after a rejected sign-in interrupted a
    /// pending lookup, so the rejection does not discard a valid session.
    async fn resume_after_failed_login(self: &Arc<Self>, ticket: u64, notice: AuthError) {
        let session = match self.auth.current_session().await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "Could not re-read session after failed sign-in");
                None
            }
        };

        let pending = session.clone();
        let applied = self
            .apply_if_current(ticket, move |snapshot| {
                snapshot.phase = if pending.is_some() {
                    AuthPhase::Authenticating
                } else {
                    AuthPhase::Unauthenticated
                };
                snapshot.session = pending;
                snapshot.notice = Some(notice);
            })
            .await;

        if let (true, Some(session)) = (applied, session) {
            debug!(subject = %session.subject, "Resuming profile load after failed sign-in");
            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.finish_profile_load(ticket, session).await;
            });
        }
    }

    /// Loads the profile directly if no newer input arrives within
    /// `auth.login_event_timeout_ms` of a successful sign-in.
    fn spawn_login_watchdog(self: &Arc<Self>, ticket: u64, session: Session) {
        let weak = Arc::downgrade(self);
        let wait = self.config.login_event_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let Some(context) = weak.upgrade() else {
                return;
            };
            if context.transitions.lock().await.ticket != ticket {
                return;
            }
            warn!(
                subject = %session.subject,
                "No sign-in event received; loading profile directly"
            );
            context.finish_profile_load(ticket, session).await;
        });
    }

    fn abort_listener(&self) {
        let handle = match self.listener.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

impl Drop for AuthContext {
    fn drop(&mut self) {
        self.abort_listener();
    }
}

/// Keeps a newer same-subject session (from a token refresh) over the one
/// a lookup was started with.
fn adopt_session(snapshot: &mut AuthSnapshot, session: Session) {
    let same_subject = snapshot
        .session
        .as_ref()
        .is_some_and(|current| current.subject == session.subject);
    if !same_subject {
        snapshot.session = Some(session);
    }
}
