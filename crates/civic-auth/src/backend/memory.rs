//! In-process backend using a Tokio mutex, for local runs and tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{Mutex, Semaphore, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

use civic_core::error::AppError;
use civic_core::types::SubjectId;
use civic_entity::session::Session;

use super::event::AuthEvent;
use super::{AuthBackend, DataBackend, SelectQuery};
use crate::error::AuthError;

/// A seeded account: credentials plus the profile row stored for it.
#[derive(Clone, Deserialize)]
pub struct SeedAccount {
    /// Sign-in identifier (email).
    pub email: String,
    /// Sign-in secret.
    pub password: String,
    /// Row inserted into the profiles table; its `id` becomes the subject.
    pub profile: serde_json::Value,
}

#[derive(Clone)]
struct Account {
    subject: SubjectId,
    secret: String,
}

/// Internal state for the memory backend.
#[derive(Default)]
struct InnerState {
    /// Lowercased identifier → account.
    accounts: HashMap<String, Account>,
    /// Table name → rows.
    tables: HashMap<String, Vec<serde_json::Value>>,
    /// Session the backend currently holds.
    current: Option<Session>,
    /// When set, every call fails with `BackendUnavailable`.
    unavailable: bool,
    /// When set, `sign_out` fails (local session is still dropped).
    fail_sign_out: bool,
    /// When set, `sign_in` does not emit `SignedIn`.
    suppress_events: bool,
    /// Subjects whose row lookups block until released.
    gates: HashMap<SubjectId, Arc<Semaphore>>,
    /// Completed row lookups per subject.
    reads: HashMap<SubjectId, usize>,
}

/// In-memory backend implementing both the auth and data surfaces.
///
/// Besides seeding accounts and rows, it can inject failures and hold
/// individual profile lookups open so callers can force a specific
/// completion order.
#[derive(Clone)]
pub struct MemoryBackend {
    /// Protected inner state.
    state: Arc<Mutex<InnerState>>,
    /// Auth event stream.
    events: broadcast::Sender<AuthEvent>,
    /// Table seeded accounts' profile rows go into.
    profiles_table: String,
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("subscribers", &self.events.receiver_count())
            .finish()
    }
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new(event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            state: Arc::new(Mutex::new(InnerState::default())),
            events,
            profiles_table: "profiles".to_string(),
        }
    }

    /// Stores seeded profile rows in `table` instead of `profiles`.
    pub fn with_profiles_table(mut self, table: impl Into<String>) -> Self {
        self.profiles_table = table.into();
        self
    }

    /// Creates a backend seeded with accounts.
    pub async fn with_accounts(
        event_buffer: usize,
        accounts: impl IntoIterator<Item = SeedAccount>,
    ) -> Result<Self, AppError> {
        let backend = Self::new(event_buffer);
        backend.seed(accounts).await?;
        Ok(backend)
    }

    /// Adds every account in `accounts`.
    pub async fn seed(&self, accounts: impl IntoIterator<Item = SeedAccount>) -> Result<(), AppError> {
        for account in accounts {
            self.add_account(account).await?;
        }
        Ok(())
    }

    /// Adds the accounts listed in a JSON file holding `[SeedAccount]`.
    pub async fn seed_from_file(&self, path: impl AsRef<Path>) -> Result<(), AppError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            AppError::configuration(format!("Failed to read seed file {}: {e}", path.display()))
        })?;
        let accounts: Vec<SeedAccount> = serde_json::from_str(&raw)?;
        info!(path = %path.display(), accounts = accounts.len(), "Seeding memory backend");
        self.seed(accounts).await
    }

    /// Registers credentials and inserts the profile row.
    pub async fn add_account(&self, account: SeedAccount) -> Result<(), AppError> {
        let subject = account
            .profile
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::validation("Seed profile must have a string 'id'"))?;
        let subject = SubjectId::new(subject);

        let mut state = self.state.lock().await;
        state.accounts.insert(
            account.email.to_lowercase(),
            Account {
                subject,
                secret: account.password,
            },
        );
        state
            .tables
            .entry(self.profiles_table.clone())
            .or_default()
            .push(account.profile);
        Ok(())
    }

    /// Inserts a row into `table`.
    pub async fn insert_row(&self, table: &str, row: serde_json::Value) {
        let mut state = self.state.lock().await;
        state.tables.entry(table.to_string()).or_default().push(row);
    }

    /// Removes every row of `table` matching `query`'s filters.
    pub async fn delete_rows(&self, query: &SelectQuery) -> usize {
        let mut state = self.state.lock().await;
        let Some(rows) = state.tables.get_mut(&query.table) else {
            return 0;
        };
        let before = rows.len();
        rows.retain(|row| !query.matches(row));
        before - rows.len()
    }

    /// Replaces the session the backend reports as current (no event).
    pub async fn set_session(&self, session: Option<Session>) {
        self.state.lock().await.current = session;
    }

    /// Makes every subsequent call fail with `BackendUnavailable`.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    /// Makes `sign_out` fail.
    pub async fn set_fail_sign_out(&self, fail: bool) {
        self.state.lock().await.fail_sign_out = fail;
    }

    /// Stops `sign_in` from emitting `SignedIn`.
    pub async fn set_suppress_events(&self, suppress: bool) {
        self.state.lock().await.suppress_events = suppress;
    }

    /// Emits an event to every subscriber, returning how many received it.
    pub fn emit(&self, event: AuthEvent) -> usize {
        debug!(kind = ?event.kind, "Emitting auth event");
        self.events.send(event).unwrap_or(0)
    }

    /// Holds row lookups filtered on `id = subject` open until
    /// [`release_rows`](Self::release_rows) is called.
    pub async fn hold_rows(&self, subject: impl Into<SubjectId>) {
        self.state
            .lock()
            .await
            .gates
            .insert(subject.into(), Arc::new(Semaphore::new(0)));
    }

    /// Lets held lookups for `subject` proceed.
    pub async fn release_rows(&self, subject: impl Into<SubjectId>) {
        if let Some(gate) = self.state.lock().await.gates.remove(&subject.into()) {
            gate.close();
        }
    }

    /// Number of completed lookups filtered on `id = subject`.
    pub async fn reads(&self, subject: impl Into<SubjectId>) -> usize {
        self.state
            .lock()
            .await
            .reads
            .get(&subject.into())
            .copied()
            .unwrap_or(0)
    }

    fn unavailable() -> AuthError {
        AuthError::BackendUnavailable("memory backend marked unavailable".to_string())
    }
}

#[async_trait]
impl AuthBackend for MemoryBackend {
    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        let state = self.state.lock().await;
        if state.unavailable {
            return Err(Self::unavailable());
        }
        Ok(state.current.clone().filter(|s| !s.is_expired()))
    }

    async fn sign_in(&self, identifier: &str, secret: &str) -> Result<Session, AuthError> {
        let (session, emit) = {
            let mut state = self.state.lock().await;
            if state.unavailable {
                return Err(Self::unavailable());
            }

            let account = state
                .accounts
                .get(&identifier.trim().to_lowercase())
                .filter(|account| account.secret == secret)
                .cloned()
                .ok_or(AuthError::InvalidCredentials)?;

            let mut session = Session::new(account.subject, Uuid::new_v4().to_string());
            session.refresh_token = Some(Uuid::new_v4().to_string());
            session.email = Some(identifier.trim().to_string());
            state.current = Some(session.clone());
            (session, !state.suppress_events)
        };

        info!(subject = %session.subject, "Memory backend sign-in");
        if emit {
            self.emit(AuthEvent::signed_in(session.clone()));
        }
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let fail = {
            let mut state = self.state.lock().await;
            if state.unavailable {
                return Err(Self::unavailable());
            }
            state.current = None;
            state.fail_sign_out
        };

        if fail {
            warn!("Memory backend sign-out failure injected");
            return Err(AuthError::SignOutFailed(
                "memory backend refused sign-out".to_string(),
            ));
        }

        self.emit(AuthEvent::signed_out());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl DataBackend for MemoryBackend {
    async fn select_one(&self, query: &SelectQuery) -> Result<Option<serde_json::Value>, AuthError> {
        let subject = query
            .filters
            .iter()
            .find(|(column, _)| column == "id")
            .map(|(_, value)| SubjectId::new(value.as_str()));

        let gate = {
            let state = self.state.lock().await;
            if state.unavailable {
                return Err(Self::unavailable());
            }
            subject.as_ref().and_then(|s| state.gates.get(s).cloned())
        };

        if let Some(gate) = gate {
            // Closed on release; the error is the wake-up signal.
            let _ = gate.acquire().await;
        }

        let mut state = self.state.lock().await;
        if state.unavailable {
            return Err(Self::unavailable());
        }

        let mut rows: Vec<&serde_json::Value> = state
            .tables
            .get(&query.table)
            .map(|rows| rows.iter().filter(|row| query.matches(row)).collect())
            .unwrap_or_default();

        if let Some((column, order)) = &query.order {
            rows.sort_by_key(|row| row.get(column).map(|v| v.to_string()).unwrap_or_default());
            if *order == super::Order::Desc {
                rows.reverse();
            }
        }

        let row = rows.first().map(|row| (*row).clone());
        if let Some(subject) = subject {
            *state.reads.entry(subject).or_insert(0) += 1;
        }
        Ok(row)
    }
}
