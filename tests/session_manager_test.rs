mod common;

use common::{DelayedProfileStore, SlowIdentityStore, credential, profile};
use marketplace_core::application::session_manager::{SessionManager, SignUpOutcome};
use marketplace_core::domain::session::{DEFAULT_AVATAR_URL, ProfileUpdate, SubjectId};
use marketplace_core::error::AuthError;
use marketplace_core::infrastructure::in_memory::InMemoryIdentityStore;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::Instant;

const TIMEOUT: Duration = Duration::from_secs(5);

fn start(identity: &SlowIdentityStore, profiles: &DelayedProfileStore) -> SessionManager {
    SessionManager::start(
        Arc::new(identity.clone()),
        Arc::new(profiles.clone()),
        TIMEOUT,
    )
}

#[tokio::test(start_paused = true)]
async fn test_last_arrival_wins_over_slow_enrichment() {
    let identity = SlowIdentityStore::default();
    let profiles = DelayedProfileStore::default();
    profiles.inner.insert(profile("U1")).await;
    profiles.inner.insert(profile("U2")).await;
    profiles.delay("U1", Duration::from_millis(500));
    profiles.delay("U2", Duration::from_millis(10));

    let manager = start(&identity, &profiles);
    manager.handle().settled().await.unwrap();

    identity.inner.notify(Some(credential("U1")));
    identity.inner.notify(Some(credential("U2")));
    tokio::time::sleep(Duration::from_secs(1)).await;

    let session = manager.current_session().expect("U2 should be signed in");
    assert_eq!(session.subject, SubjectId::new("U2"));
    assert_eq!(session.display_name, "Profile U2");
    assert_eq!(profiles.lookups.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_sign_out_after_slow_sign_in_stays_signed_out() {
    let identity = SlowIdentityStore::default();
    let profiles = DelayedProfileStore::default();
    profiles.delay("U1", Duration::from_millis(500));

    let manager = start(&identity, &profiles);
    manager.handle().settled().await.unwrap();

    identity.inner.notify(Some(credential("U1")));
    identity.inner.notify(None);
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(manager.current_session().is_none());
    assert!(!manager.is_resolving());
}

#[tokio::test(start_paused = true)]
async fn test_no_commit_after_shutdown() {
    let identity = SlowIdentityStore::default();
    let profiles = DelayedProfileStore::default();
    profiles.delay("U1", Duration::from_secs(1));

    let manager = start(&identity, &profiles);
    let handle = manager.handle();
    manager.handle().settled().await.unwrap();

    identity.inner.notify(Some(credential("U1")));
    tokio::time::sleep(Duration::from_millis(100)).await;
    manager.shutdown();
    manager.shutdown();
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(!manager.is_live());
    assert!(manager.current_session().is_none());
    assert!(handle.current().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_pending_bootstrap_discarded_after_shutdown() {
    let identity = SlowIdentityStore::new(Duration::from_secs(3));
    identity.inner.persist(Some(credential("U1"))).await;
    let profiles = DelayedProfileStore::default();

    let manager = start(&identity, &profiles);
    tokio::time::sleep(Duration::from_secs(1)).await;
    manager.shutdown();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(manager.current_session().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_timeout_stops_resolving() {
    let identity = SlowIdentityStore::new(Duration::from_secs(10));
    identity.inner.persist(Some(credential("U1"))).await;
    let profiles = DelayedProfileStore::default();

    let started = Instant::now();
    let manager = start(&identity, &profiles);
    let snapshot = manager.handle().settled().await.unwrap();

    let elapsed = started.elapsed();
    assert!(elapsed >= TIMEOUT, "settled after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(10));
    assert!(snapshot.session.is_none());

    // The lookup itself was not cancelled and still lands while live.
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(
        manager.current_session().map(|s| s.subject),
        Some(SubjectId::new("U1"))
    );
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_error_resolves_signed_out() {
    let identity = SlowIdentityStore::failing();
    let profiles = DelayedProfileStore::default();

    let manager = start(&identity, &profiles);
    let snapshot = manager.handle().settled().await.unwrap();

    assert!(snapshot.session.is_none());
    assert!(!snapshot.resolving);
}

#[tokio::test]
async fn test_bootstrap_restores_persisted_credential() {
    let identity = SlowIdentityStore::default();
    identity.inner.persist(Some(credential("U1"))).await;
    let profiles = DelayedProfileStore::default();
    profiles.inner.insert(profile("U1")).await;

    let manager = start(&identity, &profiles);
    let snapshot = manager.handle().settled().await.unwrap();

    let session = snapshot.session.expect("persisted credential should be restored");
    assert_eq!(session.subject, SubjectId::new("U1"));
    assert_eq!(session.display_name, "Profile U1");
}

#[tokio::test]
async fn test_profile_failure_falls_back_to_defaults() {
    let identity = SlowIdentityStore::default();
    identity.inner.persist(Some(credential("U1"))).await;
    let profiles = DelayedProfileStore::default();
    profiles.fail.store(true, Ordering::SeqCst);

    let manager = start(&identity, &profiles);
    let snapshot = manager.handle().settled().await.unwrap();

    let session = snapshot.session.expect("profile failure must not block sign-in");
    assert_eq!(session.display_name, "u1");
    assert_eq!(session.avatar_url, DEFAULT_AVATAR_URL);
}

#[tokio::test]
async fn test_sign_in_and_sign_out() {
    let identity = SlowIdentityStore::default();
    identity
        .inner
        .add_account(SubjectId::new("U1"), "ada@example.com", "secret1")
        .await;
    let profiles = DelayedProfileStore::default();
    let manager = start(&identity, &profiles);
    let mut handle = manager.handle();
    handle.settled().await.unwrap();

    assert_eq!(
        manager.sign_in("ada@example.com", "wrong-secret").await,
        Err(AuthError::InvalidCredentials)
    );
    assert_eq!(
        manager.sign_in("not-an-email", "secret1").await,
        Err(AuthError::InvalidInput("Invalid email address"))
    );

    let subject = manager.sign_in("ada@example.com", "secret1").await.unwrap();
    let snapshot = handle
        .wait_for(|s| s.subject() == Some(&subject))
        .await
        .unwrap();
    assert_eq!(snapshot.session.unwrap().display_name, "ada");

    manager.sign_out().await.unwrap();
    let snapshot = handle.wait_for(|s| s.session.is_none()).await.unwrap();
    assert!(!snapshot.busy);
}

#[tokio::test]
async fn test_sign_up_with_confirmation() {
    let identity = SlowIdentityStore {
        inner: InMemoryIdentityStore::new().requiring_confirmation(),
        ..Default::default()
    };
    let profiles = DelayedProfileStore::default();
    let manager = start(&identity, &profiles);
    manager.handle().settled().await.unwrap();

    assert_eq!(
        manager.sign_up("ada@example.com", "secret1", "A").await,
        Err(AuthError::InvalidInput("Name must be at least 2 characters"))
    );
    assert_eq!(
        manager.sign_up("ada@example.com", "abc", "Ada").await,
        Err(AuthError::InvalidInput("Password must be at least 6 characters"))
    );

    let outcome = manager
        .sign_up("ada@example.com", "secret1", "Ada Lovelace")
        .await
        .unwrap();
    let SignUpOutcome::ConfirmationPending(subject) = outcome else {
        panic!("expected confirmation to be pending, got {outcome:?}");
    };
    assert!(manager.current_session().is_none());

    assert_eq!(
        manager.sign_up("ada@example.com", "secret1", "Ada").await,
        Err(AuthError::AlreadyRegistered)
    );
    assert_eq!(
        manager.sign_in("ada@example.com", "secret1").await,
        Err(AuthError::EmailNotConfirmed)
    );

    identity.inner.confirm("ada@example.com").await;
    assert_eq!(
        manager.sign_in("ada@example.com", "secret1").await,
        Ok(subject.clone())
    );
    let snapshot = manager
        .handle()
        .wait_for(|s| s.subject() == Some(&subject))
        .await
        .unwrap();
    assert_eq!(snapshot.session.unwrap().display_name, "Ada Lovelace");
}

#[tokio::test]
async fn test_sign_up_active_account() {
    let identity = SlowIdentityStore::default();
    let profiles = DelayedProfileStore::default();
    let manager = start(&identity, &profiles);
    manager.handle().settled().await.unwrap();

    let outcome = manager
        .sign_up("grace@example.com", "secret1", "Grace Hopper")
        .await
        .unwrap();
    let SignUpOutcome::Active(subject) = outcome else {
        panic!("expected an active account, got {outcome:?}");
    };
    let snapshot = manager
        .handle()
        .wait_for(|s| s.session.as_ref().is_some_and(|s| s.display_name == "Grace Hopper"))
        .await
        .unwrap();
    assert_eq!(snapshot.subject(), Some(&subject));
}

#[tokio::test]
async fn test_update_profile_republishes_session() {
    let identity = SlowIdentityStore::default();
    identity
        .inner
        .add_account(SubjectId::new("U1"), "ada@example.com", "secret1")
        .await;
    let profiles = DelayedProfileStore::default();
    let manager = start(&identity, &profiles);
    let mut handle = manager.handle();
    handle.settled().await.unwrap();

    let update = ProfileUpdate {
        full_name: Some("Ada Lovelace".into()),
        bio: Some("Analyst".into()),
        ..Default::default()
    };
    assert_eq!(
        manager.update_profile(update.clone()).await,
        Err(AuthError::NotSignedIn)
    );

    let subject = manager.sign_in("ada@example.com", "secret1").await.unwrap();
    handle
        .wait_for(|s| s.subject() == Some(&subject))
        .await
        .unwrap();

    assert_eq!(
        manager.update_profile(ProfileUpdate::default()).await,
        Err(AuthError::InvalidInput("Nothing to update"))
    );
    manager.update_profile(update).await.unwrap();

    let session = manager.current_session().unwrap();
    assert_eq!(session.display_name, "Ada Lovelace");
    assert_eq!(session.bio.as_deref(), Some("Analyst"));
}

#[tokio::test]
async fn test_update_secret() {
    let identity = SlowIdentityStore::default();
    identity
        .inner
        .add_account(SubjectId::new("U1"), "ada@example.com", "secret1")
        .await;
    let profiles = DelayedProfileStore::default();
    let manager = start(&identity, &profiles);
    let mut handle = manager.handle();
    handle.settled().await.unwrap();

    assert_eq!(
        manager.update_secret("secret2").await,
        Err(AuthError::NotSignedIn)
    );

    let subject = manager.sign_in("ada@example.com", "secret1").await.unwrap();
    handle
        .wait_for(|s| s.subject() == Some(&subject))
        .await
        .unwrap();

    assert_eq!(
        manager.update_secret("abc").await,
        Err(AuthError::InvalidInput("Password must be at least 6 characters"))
    );
    manager.update_secret("secret2").await.unwrap();
    manager.sign_out().await.unwrap();

    assert_eq!(
        manager.sign_in("ada@example.com", "secret1").await,
        Err(AuthError::InvalidCredentials)
    );
    assert_eq!(
        manager.sign_in("ada@example.com", "secret2").await,
        Ok(subject)
    );
}
