//! Authentication and RBAC scenarios

use entitydb::{bootstrap_admin, EngineConfig, RbacGate, SessionStore, Store};
use std::time::Duration;
use tempfile::TempDir;

fn open_sessions(dir: &TempDir) -> SessionStore {
    let store = Store::open(EngineConfig {
        data_path: dir.path().to_path_buf(),
        ..Default::default()
    })
    .unwrap();
    SessionStore::new(store)
}

#[test]
fn test_bootstrap_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let sessions = open_sessions(&dir);

    let first = bootstrap_admin(&sessions, "secret").unwrap();
    assert!(first.is_some());
    let second = bootstrap_admin(&sessions, "other").unwrap();
    assert!(second.is_none());
}

#[test]
fn test_login_logout_token_reuse() {
    let dir = TempDir::new().unwrap();
    let sessions = open_sessions(&dir);
    bootstrap_admin(&sessions, "secret").unwrap();

    let session = sessions.login("admin", "secret").unwrap();
    assert!(session.user.is_admin());

    // The token resolves while the session lives
    let ctx = sessions.validate(&session.token).unwrap();
    assert_eq!(ctx.username.as_deref(), Some("admin"));

    // After logout the same token is unauthorized
    sessions.logout(&session.token).unwrap();
    let err = sessions.validate(&session.token).unwrap_err();
    assert!(err.is_auth_error());
}

#[test]
fn test_wrong_credentials_are_indistinguishable() {
    let dir = TempDir::new().unwrap();
    let sessions = open_sessions(&dir);
    bootstrap_admin(&sessions, "secret").unwrap();

    let wrong_password = sessions.login("admin", "nope").unwrap_err();
    let unknown_user = sessions.login("nobody", "nope").unwrap_err();
    assert_eq!(wrong_password.to_string(), unknown_user.to_string());
}

#[test]
fn test_garbage_tokens_are_unauthorized() {
    let dir = TempDir::new().unwrap();
    let sessions = open_sessions(&dir);
    bootstrap_admin(&sessions, "secret").unwrap();

    assert!(sessions.validate("not-a-token").unwrap_err().is_auth_error());
    // A valid-shaped id that is not a session entity
    let fake = entitydb::EntityId::generate(entitydb::Timestamp::now());
    assert!(sessions
        .validate(fake.as_str())
        .unwrap_err()
        .is_auth_error());
}

#[test]
fn test_expired_session_is_rejected_lazily() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(EngineConfig {
        data_path: dir.path().to_path_buf(),
        ..Default::default()
    })
    .unwrap();
    let sessions = SessionStore::with_ttl(store, Duration::from_millis(30));
    bootstrap_admin(&sessions, "secret").unwrap();

    let session = sessions.login("admin", "secret").unwrap();
    assert!(sessions.validate(&session.token).is_ok());

    std::thread::sleep(Duration::from_millis(60));
    let err = sessions.validate(&session.token).unwrap_err();
    assert!(err.is_auth_error());
}

#[test]
fn test_sweep_expires_stale_sessions() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(EngineConfig {
        data_path: dir.path().to_path_buf(),
        ..Default::default()
    })
    .unwrap();
    let sessions = SessionStore::with_ttl(store, Duration::from_millis(30));
    bootstrap_admin(&sessions, "secret").unwrap();

    sessions.login("admin", "secret").unwrap();
    sessions.login("admin", "secret").unwrap();
    std::thread::sleep(Duration::from_millis(60));

    assert_eq!(sessions.sweep().unwrap(), 2);
    // A second sweep finds nothing left to do
    assert_eq!(sessions.sweep().unwrap(), 0);
}

#[test]
fn test_limited_user_is_gated() {
    let dir = TempDir::new().unwrap();
    let sessions = open_sessions(&dir);
    bootstrap_admin(&sessions, "secret").unwrap();

    sessions
        .create_user("reader", "pw", &[], &[("read", "entity")])
        .unwrap();
    let session = sessions.login("reader", "pw").unwrap();
    let ctx = session.user;

    let gate = RbacGate;
    assert!(gate.require(&ctx, "read", "entity").is_ok());
    assert!(gate.require(&ctx, "write", "entity").unwrap_err().is_auth_error());
    assert!(gate.require(&ctx, "dataset", "cross").is_err());
    assert!(gate.require_admin(&ctx).is_err());
    assert!(!ctx.is_admin());
}

#[test]
fn test_sessions_survive_restart() {
    let dir = TempDir::new().unwrap();
    let token = {
        let sessions = open_sessions(&dir);
        bootstrap_admin(&sessions, "secret").unwrap();
        let session = sessions.login("admin", "secret").unwrap();
        sessions.validate(&session.token).unwrap();
        session.token
        // Store dropped without clean shutdown: recovery replays the WAL
    };

    let sessions = open_sessions(&dir);
    let ctx = sessions.validate(&token).unwrap();
    assert_eq!(ctx.username.as_deref(), Some("admin"));
}
