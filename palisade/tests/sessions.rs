use std::sync::Arc;

use chrono::Duration;
use palisade::{
    ClientInfo, Error, LoginAttempt, Palisade, PalisadeConfig, PrivilegeLevel, SessionError,
    SqliteRepositoryProvider,
};
use palisade_core::services::SessionPolicy;

const PASSWORD: &str = "Corr3ct!Horse#Battery";

async fn setup_with(policy: SessionPolicy) -> Palisade<SqliteRepositoryProvider> {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    let palisade = Palisade::with_config(
        Arc::new(SqliteRepositoryProvider::new(pool)),
        PalisadeConfig::default().with_sessions(policy),
    );
    palisade.migrate().await.unwrap();
    palisade
}

fn attempt(remember_me: bool) -> LoginAttempt {
    LoginAttempt {
        email: "sessions@example.com".to_string(),
        password: PASSWORD.to_string(),
        second_factor: None,
        remember_me,
        client: ClientInfo {
            ip_address: Some("203.0.113.7".to_string()),
            user_agent: Some("Mozilla/5.0 (X11; Linux x86_64)".to_string()),
        },
    }
}

#[tokio::test]
async fn test_session_cap_evicts_oldest() {
    let palisade = setup_with(SessionPolicy::default().with_max_concurrent(5)).await;
    let account = palisade
        .create_account("sessions@example.com", PASSWORD, None, PrivilegeLevel::Viewer)
        .await
        .unwrap();

    let mut tokens = Vec::new();
    for _ in 0..6 {
        // Distinct creation instants keep eviction order deterministic
        tokio::time::sleep(std::time::Duration::from_millis(1010)).await;
        let outcome = palisade.login(attempt(false)).await.unwrap();
        tokens.push(outcome.session.token.clone());
    }

    // Exactly 5 remain active and they are the 5 most recent
    let active = palisade.active_sessions(&account.id).await.unwrap();
    assert_eq!(active.len(), 5);

    assert!(matches!(
        palisade.get_session(&tokens[0]).await,
        Err(Error::Session(SessionError::Expired))
    ));
    for token in &tokens[1..] {
        palisade.get_session(token).await.unwrap();
    }
}

#[tokio::test]
async fn test_remember_me_bypasses_cap_but_is_counted() {
    let palisade = setup_with(SessionPolicy::default().with_max_concurrent(1)).await;
    let account = palisade
        .create_account("sessions@example.com", PASSWORD, None, PrivilegeLevel::Viewer)
        .await
        .unwrap();

    let standard = palisade.login(attempt(false)).await.unwrap();
    let remembered = palisade.login(attempt(true)).await.unwrap();

    // The remember-me login did not evict the standard session
    palisade.get_session(&standard.session.token).await.unwrap();
    palisade.get_session(&remembered.session.token).await.unwrap();

    let active = palisade.active_sessions(&account.id).await.unwrap();
    assert_eq!(active.len(), 2);

    // Remember-me sessions get the long TTL
    assert!(remembered.session.expires_at > standard.session.expires_at);
}

#[tokio::test]
async fn test_renew_updates_activity_never_expiry() {
    let palisade = setup_with(SessionPolicy::default()).await;
    palisade
        .create_account("sessions@example.com", PASSWORD, None, PrivilegeLevel::Viewer)
        .await
        .unwrap();

    let outcome = palisade.login(attempt(false)).await.unwrap();
    let original_expiry = outcome.session.expires_at;

    tokio::time::sleep(std::time::Duration::from_millis(1010)).await;
    let renewed = palisade.renew_session(&outcome.session.token).await.unwrap();

    assert_eq!(renewed.expires_at, original_expiry);
    assert!(renewed.last_activity_at > outcome.session.last_activity_at);
}

#[tokio::test]
async fn test_expired_session_rejected_everywhere() {
    let palisade =
        setup_with(SessionPolicy::default().with_session_ttl(Duration::seconds(-1))).await;
    palisade
        .create_account("sessions@example.com", PASSWORD, None, PrivilegeLevel::Viewer)
        .await
        .unwrap();

    let outcome = palisade.login(attempt(false)).await.unwrap();
    let token = outcome.session.token;

    assert!(matches!(
        palisade.get_session(&token).await,
        Err(Error::Session(SessionError::Expired))
    ));
    assert!(matches!(
        palisade.renew_session(&token).await,
        Err(Error::Session(SessionError::Expired))
    ));
    assert!(matches!(
        palisade.change_password(&token, PASSWORD, "New!Valley7Moonset").await,
        Err(Error::Session(SessionError::Expired))
    ));
}

#[tokio::test]
async fn test_logout_ends_session() {
    let palisade = setup_with(SessionPolicy::default()).await;
    palisade
        .create_account("sessions@example.com", PASSWORD, None, PrivilegeLevel::Viewer)
        .await
        .unwrap();

    let outcome = palisade.login(attempt(false)).await.unwrap();
    palisade.logout(&outcome.session.token).await.unwrap();

    assert!(palisade.get_session(&outcome.session.token).await.is_err());
}

#[tokio::test]
async fn test_revoke_other_sessions_spares_current() {
    let palisade = setup_with(SessionPolicy::default()).await;
    palisade
        .create_account("sessions@example.com", PASSWORD, None, PrivilegeLevel::Viewer)
        .await
        .unwrap();

    let first = palisade.login(attempt(false)).await.unwrap();
    let second = palisade.login(attempt(true)).await.unwrap();
    let current = palisade.login(attempt(false)).await.unwrap();

    let ended = palisade
        .revoke_other_sessions(&current.session.token)
        .await
        .unwrap();
    assert_eq!(ended, 2);

    palisade.get_session(&current.session.token).await.unwrap();
    assert!(palisade.get_session(&first.session.token).await.is_err());
    assert!(palisade.get_session(&second.session.token).await.is_err());
}

#[tokio::test]
async fn test_change_password_revokes_other_sessions() {
    let palisade = setup_with(SessionPolicy::default()).await;
    palisade
        .create_account("sessions@example.com", PASSWORD, None, PrivilegeLevel::Viewer)
        .await
        .unwrap();

    let other = palisade.login(attempt(false)).await.unwrap();
    let current = palisade.login(attempt(false)).await.unwrap();

    palisade
        .change_password(&current.session.token, PASSWORD, "New!Valley7Moonset")
        .await
        .unwrap();

    palisade.get_session(&current.session.token).await.unwrap();
    assert!(palisade.get_session(&other.session.token).await.is_err());

    // Old password is rejected and lands in the reuse history
    let old = palisade.login(attempt(false)).await;
    assert!(old.is_err());

    let relogin = LoginAttempt {
        password: "New!Valley7Moonset".to_string(),
        ..attempt(false)
    };
    palisade.login(relogin).await.unwrap();
}
