use std::sync::Arc;

use chrono::Utc;
use palisade::{
    AuthError, ClientInfo, Error, LoginAttempt, Palisade, PrivilegeLevel, SecondFactor,
    SecurityEventType, SqliteRepositoryProvider,
};
use palisade_core::repositories::AuditQuery;
use totp_rs::{Algorithm, Secret, TOTP};

const PASSWORD: &str = "Corr3ct!Horse#Battery";
const AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64)";

async fn setup() -> Palisade<SqliteRepositoryProvider> {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    let palisade = Palisade::new(Arc::new(SqliteRepositoryProvider::new(pool)));
    palisade.migrate().await.unwrap();
    palisade
}

fn attempt(email: &str, password: &str) -> LoginAttempt {
    LoginAttempt {
        email: email.to_string(),
        password: password.to_string(),
        second_factor: None,
        remember_me: false,
        client: ClientInfo {
            ip_address: Some("203.0.113.7".to_string()),
            user_agent: Some(AGENT.to_string()),
        },
    }
}

fn totp_code(secret: &str, email: &str) -> String {
    TOTP::new(
        Algorithm::SHA1,
        6,
        1,
        30,
        Secret::Encoded(secret.to_string()).to_bytes().unwrap(),
        Some("palisade".to_string()),
        email.to_string(),
    )
    .unwrap()
    .generate_current()
    .unwrap()
}

#[tokio::test]
async fn test_login_success_and_audit_trail() {
    let palisade = setup().await;
    let account = palisade
        .create_account("admin@example.com", PASSWORD, None, PrivilegeLevel::Admin)
        .await
        .unwrap();

    let outcome = palisade
        .login(attempt("admin@example.com", PASSWORD))
        .await
        .unwrap();

    assert_eq!(outcome.account.id, account.id);
    assert!(outcome.session.is_active(Utc::now()));
    assert!(outcome.risk.score <= 100);

    palisade.flush_audit().await;
    let events = palisade
        .query_events(
            &AuditQuery::for_account(account.id.clone())
                .event_type(SecurityEventType::LoginSuccess),
        )
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert!(events[0].risk_score.is_some());
}

#[tokio::test]
async fn test_wrong_password_is_generic_and_counted() {
    let palisade = setup().await;
    palisade
        .create_account("user@example.com", PASSWORD, None, PrivilegeLevel::Viewer)
        .await
        .unwrap();

    let unknown = palisade
        .login(attempt("ghost@example.com", PASSWORD))
        .await
        .unwrap_err();
    let wrong = palisade
        .login(attempt("user@example.com", "Wrong!Pass9word"))
        .await
        .unwrap_err();

    assert!(matches!(
        unknown,
        Error::Auth(AuthError::InvalidCredentials)
    ));
    assert!(matches!(wrong, Error::Auth(AuthError::InvalidCredentials)));

    let account = palisade
        .get_account_by_email("user@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.failed_attempts, 1);
}

#[tokio::test]
async fn test_lockout_after_five_failures() {
    let palisade = setup().await;
    let account = palisade
        .create_account("locked@example.com", PASSWORD, None, PrivilegeLevel::Viewer)
        .await
        .unwrap();

    for _ in 0..5 {
        let _ = palisade
            .login(attempt("locked@example.com", "Wrong!Pass9word"))
            .await;
    }

    // Sixth attempt with the CORRECT password is still rejected, and the
    // rejection carries the unlock time (~30 minutes out)
    let result = palisade.login(attempt("locked@example.com", PASSWORD)).await;
    match result {
        Err(Error::Auth(AuthError::AccountLocked { locked_until })) => {
            let minutes = (locked_until - Utc::now()).num_minutes();
            assert!((28..=30).contains(&minutes), "unlock in {minutes} minutes");
        }
        other => panic!("expected AccountLocked, got {other:?}"),
    }

    palisade.flush_audit().await;
    let locked_events = palisade
        .query_events(
            &AuditQuery::for_account(account.id.clone())
                .event_type(SecurityEventType::AccountLocked),
        )
        .await
        .unwrap();
    assert_eq!(locked_events.len(), 1, "one lockout event per episode");
}

#[tokio::test]
async fn test_success_resets_failed_attempts() {
    let palisade = setup().await;
    palisade
        .create_account("reset@example.com", PASSWORD, None, PrivilegeLevel::Viewer)
        .await
        .unwrap();

    for _ in 0..3 {
        let _ = palisade
            .login(attempt("reset@example.com", "Wrong!Pass9word"))
            .await;
    }

    palisade
        .login(attempt("reset@example.com", PASSWORD))
        .await
        .unwrap();

    let account = palisade
        .get_account_by_email("reset@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.failed_attempts, 0);
    assert!(account.locked_until.is_none());
    assert_eq!(account.login_count, 1);
}

#[tokio::test]
async fn test_two_factor_full_flow() {
    let palisade = setup().await;
    palisade
        .create_account("otp@example.com", PASSWORD, None, PrivilegeLevel::Admin)
        .await
        .unwrap();

    // Log in and enroll
    let outcome = palisade
        .login(attempt("otp@example.com", PASSWORD))
        .await
        .unwrap();
    let token = outcome.session.token.clone();

    let enrollment = palisade.setup_two_factor(&token, PASSWORD).await.unwrap();
    assert_eq!(enrollment.backup_codes.len(), 8);
    assert!(enrollment.provisioning_uri.starts_with("otpauth://totp/"));

    let code = totp_code(&enrollment.secret, "otp@example.com");
    palisade.verify_two_factor(&token, &code).await.unwrap();

    // Password alone no longer suffices
    let missing = palisade
        .login(attempt("otp@example.com", PASSWORD))
        .await
        .unwrap_err();
    assert!(matches!(missing, Error::Auth(AuthError::TwoFactorRequired)));

    // Wrong code is rejected without touching the lockout counter
    let mut bad = attempt("otp@example.com", PASSWORD);
    bad.second_factor = Some(SecondFactor::Totp("000000".to_string()));
    let invalid = palisade.login(bad).await.unwrap_err();
    assert!(matches!(invalid, Error::Auth(AuthError::InvalidTwoFactor)));

    let account = palisade
        .get_account_by_email("otp@example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(account.failed_attempts, 0);

    // Correct code logs in
    let secret = account.two_factor_secret.clone().unwrap();
    let mut good = attempt("otp@example.com", PASSWORD);
    good.second_factor = Some(SecondFactor::Totp(totp_code(&secret, "otp@example.com")));
    palisade.login(good).await.unwrap();

    // A backup code works exactly once
    let backup = enrollment.backup_codes[0].clone();
    let mut with_backup = attempt("otp@example.com", PASSWORD);
    with_backup.second_factor = Some(SecondFactor::BackupCode(backup.clone()));
    palisade.login(with_backup).await.unwrap();

    let mut replay = attempt("otp@example.com", PASSWORD);
    replay.second_factor = Some(SecondFactor::BackupCode(backup));
    let replayed = palisade.login(replay).await.unwrap_err();
    assert!(matches!(replayed, Error::Auth(AuthError::InvalidTwoFactor)));
}

#[tokio::test]
async fn test_disable_two_factor_clears_state() {
    let palisade = setup().await;
    palisade
        .create_account("off@example.com", PASSWORD, None, PrivilegeLevel::Admin)
        .await
        .unwrap();

    let outcome = palisade
        .login(attempt("off@example.com", PASSWORD))
        .await
        .unwrap();
    let token = outcome.session.token.clone();

    let enrollment = palisade.setup_two_factor(&token, PASSWORD).await.unwrap();
    let code = totp_code(&enrollment.secret, "off@example.com");
    palisade.verify_two_factor(&token, &code).await.unwrap();

    palisade
        .disable_two_factor(&token, PASSWORD, None)
        .await
        .unwrap();

    let account = palisade
        .get_account_by_email("off@example.com")
        .await
        .unwrap()
        .unwrap();
    assert!(!account.two_factor_enabled);
    assert!(account.two_factor_secret.is_none());

    // Password alone logs in again
    palisade
        .login(attempt("off@example.com", PASSWORD))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_admin_login_requires_privilege() {
    let palisade = setup().await;
    palisade
        .create_account("viewer@example.com", PASSWORD, None, PrivilegeLevel::Viewer)
        .await
        .unwrap();
    palisade
        .create_account("root@example.com", PASSWORD, None, PrivilegeLevel::SuperAdmin)
        .await
        .unwrap();

    let denied = palisade
        .admin_login(attempt("viewer@example.com", PASSWORD), PrivilegeLevel::Admin)
        .await
        .unwrap_err();
    assert!(matches!(
        denied,
        Error::Auth(AuthError::InsufficientPrivilege)
    ));

    palisade
        .admin_login(attempt("root@example.com", PASSWORD), PrivilegeLevel::Admin)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_admin_unlock_override() {
    let palisade = setup().await;
    let target = palisade
        .create_account("victim@example.com", PASSWORD, None, PrivilegeLevel::Viewer)
        .await
        .unwrap();
    palisade
        .create_account("ops@example.com", PASSWORD, None, PrivilegeLevel::Admin)
        .await
        .unwrap();

    for _ in 0..5 {
        let _ = palisade
            .login(attempt("victim@example.com", "Wrong!Pass9word"))
            .await;
    }
    assert!(matches!(
        palisade.login(attempt("victim@example.com", PASSWORD)).await,
        Err(Error::Auth(AuthError::AccountLocked { .. }))
    ));

    let admin = palisade
        .admin_login(attempt("ops@example.com", PASSWORD), PrivilegeLevel::Admin)
        .await
        .unwrap();
    palisade
        .unlock_account(&admin.session.token, &target.id)
        .await
        .unwrap();

    // Unlocked immediately, independent of elapsed time
    palisade
        .login(attempt("victim@example.com", PASSWORD))
        .await
        .unwrap();
}
