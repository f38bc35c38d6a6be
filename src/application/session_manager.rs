//! Authentication lifecycle.
//!
//! The [`SessionManager`] is the only writer of the current [`Session`]. It
//! bootstraps from a persisted credential, follows the identity store's
//! change notifications, enriches credentials with profile rows, and
//! publishes the result through a `watch` cell that any number of
//! [`SessionHandle`]s can read.
//!
//! Ordering: every source event (bootstrap result or notification) is
//! numbered on arrival. A resolved session is committed only if its event is
//! still the latest one to have arrived and the manager has not been torn
//! down, so a slow profile lookup can never overwrite a newer sign-in or
//! sign-out.

use crate::domain::ports::{SharedIdentityStore, SharedProfileStore};
use crate::domain::session::{
    Credential, ProfileUpdate, Session, SessionSnapshot, SubjectId,
};
use crate::error::{AuthError, StoreError};
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use regex::Regex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MIN_SECRET_LEN: usize = 6;
const MIN_DISPLAY_NAME_LEN: usize = 2;

static EMAIL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}$").expect("email pattern is valid")
});

/// Read-only view of the current session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    rx: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub fn snapshot(&self) -> SessionSnapshot {
        self.rx.borrow().clone()
    }

    pub fn current(&self) -> Option<Session> {
        self.rx.borrow().session.clone()
    }

    pub fn is_resolving(&self) -> bool {
        self.rx.borrow().resolving
    }

    /// Waits until the snapshot satisfies `predicate`.
    ///
    /// Returns `None` if the manager has been dropped before that happened.
    pub async fn wait_for<F>(&mut self, predicate: F) -> Option<SessionSnapshot>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        self.rx.wait_for(predicate).await.ok().map(|s| s.clone())
    }

    /// Waits until the initial credential lookup has resolved or timed out.
    pub async fn settled(&mut self) -> Option<SessionSnapshot> {
        self.wait_for(|s| !s.resolving).await
    }
}

/// How a sign-up ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUpOutcome {
    /// The account is usable and the subject is now signed in.
    Active(SubjectId),
    /// The subject must confirm their e-mail address before signing in.
    ConfirmationPending(SubjectId),
}

/// Owns the authentication lifecycle and the current session.
pub struct SessionManager {
    identity: SharedIdentityStore,
    profiles: SharedProfileStore,
    state: Arc<watch::Sender<SessionSnapshot>>,
    liveness: CancellationToken,
    busy_ops: Arc<AtomicUsize>,
    driver: JoinHandle<()>,
}

impl SessionManager {
    /// Starts the manager: subscribes to identity changes, then issues the
    /// bootstrap lookup bounded by `bootstrap_timeout`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        identity: SharedIdentityStore,
        profiles: SharedProfileStore,
        bootstrap_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        let state = Arc::new(state);
        let liveness = CancellationToken::new();

        // Subscribe before bootstrapping so no notification falls in between.
        let events = identity.subscribe();
        let driver = Driver {
            identity: identity.clone(),
            profiles: profiles.clone(),
            state: state.clone(),
            liveness: liveness.clone(),
            bootstrap_timeout,
        };
        let driver = tokio::spawn(driver.run(events));

        Self {
            identity,
            profiles,
            state,
            liveness,
            busy_ops: Arc::default(),
            driver,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            rx: self.state.subscribe(),
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn current_session(&self) -> Option<Session> {
        self.state.borrow().session.clone()
    }

    pub fn is_resolving(&self) -> bool {
        self.state.borrow().resolving
    }

    pub fn is_live(&self) -> bool {
        !self.liveness.is_cancelled()
    }

    /// Tears the manager down. Continuations still pending afterwards are discarded.
    pub fn shutdown(&self) {
        if !self.liveness.is_cancelled() {
            info!("session manager shutting down");
            self.liveness.cancel();
        }
    }

    pub async fn sign_in(&self, email: &str, secret: &str) -> Result<SubjectId, AuthError> {
        validate_email(email)?;
        if secret.is_empty() {
            return Err(AuthError::InvalidInput("Password is required"));
        }
        let _busy = self.busy();
        let credential = self
            .identity
            .sign_in(email, secret)
            .await
            .map_err(|e| auth_failure("sign in", e))?;
        info!(subject = %credential.subject, "signed in");
        Ok(credential.subject)
    }

    pub async fn sign_up(
        &self,
        email: &str,
        secret: &str,
        display_name: &str,
    ) -> Result<SignUpOutcome, AuthError> {
        let display_name = display_name.trim();
        if display_name.chars().count() < MIN_DISPLAY_NAME_LEN {
            return Err(AuthError::InvalidInput("Name must be at least 2 characters"));
        }
        validate_email(email)?;
        validate_secret(secret)?;

        let _busy = self.busy();
        let credential = self
            .identity
            .sign_up(email, secret, display_name)
            .await
            .map_err(|e| auth_failure("sign up", e))?;
        let subject = credential.subject.clone();

        let update = ProfileUpdate {
            full_name: Some(display_name.to_string()),
            ..Default::default()
        };
        match self.profiles.upsert_profile(&subject, &update).await {
            Ok(()) => self.refresh_profile(&subject).await,
            Err(err) => warn!(subject = %subject, error = %err, "could not seed profile after sign up"),
        }

        if credential.confirmed {
            info!(subject = %subject, "account created and signed in");
            Ok(SignUpOutcome::Active(subject))
        } else {
            info!(subject = %subject, "account created, awaiting e-mail confirmation");
            Ok(SignUpOutcome::ConfirmationPending(subject))
        }
    }

    pub async fn sign_out(&self) -> Result<(), AuthError> {
        let _busy = self.busy();
        self.identity
            .sign_out()
            .await
            .map_err(|e| auth_failure("sign out", e))?;
        info!("signed out");
        Ok(())
    }

    /// Updates the current subject's profile and republishes the enriched session.
    pub async fn update_profile(&self, update: ProfileUpdate) -> Result<(), AuthError> {
        let subject = self.require_subject()?;
        if update.is_empty() {
            return Err(AuthError::InvalidInput("Nothing to update"));
        }
        if let Some(name) = &update.full_name
            && name.trim().chars().count() < MIN_DISPLAY_NAME_LEN
        {
            return Err(AuthError::InvalidInput("Name must be at least 2 characters"));
        }

        let _busy = self.busy();
        self.profiles
            .upsert_profile(&subject, &update)
            .await
            .map_err(|e| auth_failure("profile update", e))?;
        self.refresh_profile(&subject).await;
        info!(subject = %subject, "profile updated");
        Ok(())
    }

    /// Replaces the current subject's secret.
    pub async fn update_secret(&self, new_secret: &str) -> Result<(), AuthError> {
        let subject = self.require_subject()?;
        validate_secret(new_secret)?;

        let _busy = self.busy();
        self.identity
            .update_secret(new_secret)
            .await
            .map_err(|e| auth_failure("secret update", e))?;
        info!(subject = %subject, "secret updated");
        Ok(())
    }

    fn require_subject(&self) -> Result<SubjectId, AuthError> {
        self.state
            .borrow()
            .subject()
            .cloned()
            .ok_or(AuthError::NotSignedIn)
    }

    /// Reloads the profile of `subject` and republishes the session if that
    /// subject is still the current one.
    async fn refresh_profile(&self, subject: &SubjectId) {
        let profile = match self.profiles.get_profile(subject).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!(subject = %subject, error = %err, "profile reload failed");
                return;
            }
        };
        if self.liveness.is_cancelled() {
            debug!(subject = %subject, "profile reload resolved after teardown, discarded");
            return;
        }
        self.state.send_if_modified(|snapshot| match &mut snapshot.session {
            Some(current) if &current.subject == subject => {
                let refreshed = Session::from_credential(current.credential.clone(), profile.as_ref());
                let changed = *current != refreshed;
                *current = refreshed;
                changed
            }
            _ => false,
        });
    }

    fn busy(&self) -> BusyGuard {
        let state = self.state.clone();
        let count = self.busy_ops.clone();
        if !self.liveness.is_cancelled() {
            state.send_modify(|s| {
                count.fetch_add(1, Ordering::SeqCst);
                s.busy = true;
            });
        }
        BusyGuard {
            state,
            count,
            liveness: self.liveness.clone(),
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.liveness.cancel();
        self.driver.abort();
    }
}

struct BusyGuard {
    state: Arc<watch::Sender<SessionSnapshot>>,
    count: Arc<AtomicUsize>,
    liveness: CancellationToken,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if self.liveness.is_cancelled() {
            return;
        }
        let count = &self.count;
        self.state.send_modify(|s| {
            let previous = count
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .unwrap_or(0);
            s.busy = previous > 1;
        });
    }
}

/// Background task that turns source events into committed sessions.
struct Driver {
    identity: SharedIdentityStore,
    profiles: SharedProfileStore,
    state: Arc<watch::Sender<SessionSnapshot>>,
    liveness: CancellationToken,
    bootstrap_timeout: Duration,
}

impl Driver {
    async fn run(self, mut events: broadcast::Receiver<Option<Credential>>) {
        let identity = self.identity.clone();
        let bootstrap = async move { identity.bootstrap_session().await };
        tokio::pin!(bootstrap);
        let timeout = tokio::time::sleep(self.bootstrap_timeout);
        tokio::pin!(timeout);

        let mut bootstrapped = false;
        let mut timed_out = false;
        let mut events_open = true;
        let mut latest: u64 = 0;
        let mut pending: FuturesUnordered<BoxFuture<'static, (u64, Option<Session>)>> =
            FuturesUnordered::new();

        debug!("session bootstrap started");
        loop {
            tokio::select! {
                biased;

                _ = self.liveness.cancelled() => break,

                result = &mut bootstrap, if !bootstrapped => {
                    bootstrapped = true;
                    match result {
                        Ok(credential) => {
                            latest += 1;
                            debug!(seq = latest, signed_in = credential.is_some(), "bootstrap resolved");
                            pending.push(enrich(self.profiles.clone(), latest, credential));
                        }
                        Err(err) => {
                            error!(error = %err, "error getting session, continuing signed out");
                            self.finish_resolving();
                        }
                    }
                }

                _ = &mut timeout, if !bootstrapped && !timed_out => {
                    timed_out = true;
                    warn!(timeout_ms = self.bootstrap_timeout.as_millis() as u64, "auth initialization timeout, proceeding without auth");
                    self.finish_resolving();
                }

                event = events.recv(), if events_open => match event {
                    Ok(credential) => {
                        latest += 1;
                        debug!(seq = latest, signed_in = credential.is_some(), "identity change received");
                        pending.push(enrich(self.profiles.clone(), latest, credential));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "identity notifications dropped, subscriber lagged");
                    }
                    Err(RecvError::Closed) => {
                        debug!("identity notification stream closed");
                        events_open = false;
                    }
                },

                Some((seq, session)) = pending.next(), if !pending.is_empty() => {
                    self.commit(seq, latest, session);
                }
            }
        }
        debug!(abandoned = pending.len(), "session driver stopped");
    }

    fn finish_resolving(&self) {
        if self.liveness.is_cancelled() {
            return;
        }
        self.state
            .send_if_modified(|s| std::mem::replace(&mut s.resolving, false));
    }

    fn commit(&self, seq: u64, latest: u64, session: Option<Session>) {
        if self.liveness.is_cancelled() {
            debug!(seq, "session resolved after teardown, discarded");
            return;
        }
        if seq != latest {
            debug!(seq, latest, "session superseded by a newer identity event, discarded");
            return;
        }
        match &session {
            Some(s) => info!(subject = %s.subject, "session established"),
            None => info!("no active session"),
        }
        self.state.send_modify(|s| {
            s.session = session;
            s.resolving = false;
        });
    }
}

/// Resolves a credential into a session, enriching it with the profile row.
///
/// A failed or missing profile never blocks authentication: the session is
/// then built from credential defaults.
fn enrich(
    profiles: SharedProfileStore,
    seq: u64,
    credential: Option<Credential>,
) -> BoxFuture<'static, (u64, Option<Session>)> {
    async move {
        let Some(credential) = credential else {
            return (seq, None);
        };
        let profile = match profiles.get_profile(&credential.subject).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!(subject = %credential.subject, error = %err, "error loading profile, using defaults");
                None
            }
        };
        (seq, Some(Session::from_credential(credential, profile.as_ref())))
    }
    .boxed()
}

fn auth_failure(operation: &'static str, err: StoreError) -> AuthError {
    let mapped = AuthError::from_store(&err);
    warn!(operation, error = %err, category = ?mapped, "identity operation failed");
    mapped
}

fn validate_email(email: &str) -> Result<(), AuthError> {
    if email.is_empty() {
        return Err(AuthError::InvalidInput("Email is required"));
    }
    if !EMAIL_PATTERN.is_match(email) {
        return Err(AuthError::InvalidInput("Invalid email address"));
    }
    Ok(())
}

fn validate_secret(secret: &str) -> Result<(), AuthError> {
    if secret.chars().count() < MIN_SECRET_LEN {
        return Err(AuthError::InvalidInput(
            "Password must be at least 6 characters",
        ));
    }
    Ok(())
}
