//! Tests for the token repository contract.

use crate::auth::{AuthError, BootstrapTokenRepository, TokenRepository};

#[test]
fn empty_bootstrap_disables_validation() {
    let repo = BootstrapTokenRepository::new("");
    repo.validate("anything").unwrap();
    repo.validate("").unwrap();
}

#[test]
fn bootstrap_token_validates() {
    let repo = BootstrapTokenRepository::new("root-secret");
    repo.validate("root-secret").unwrap();

    let err = repo.validate("wrong").unwrap_err();
    assert!(matches!(err, AuthError::Unauthorized(_)));
    let err = repo.validate("").unwrap_err();
    assert!(matches!(err, AuthError::Unauthorized(_)));
}

#[test]
fn create_get_remove_token() {
    let repo = BootstrapTokenRepository::new("root-secret");

    let token = repo
        .create_token("ingest", "ingest-value".to_string())
        .unwrap();
    assert_eq!(token.name, "ingest");
    assert!(token.created_at > 0);

    assert_eq!(repo.get_token("ingest").unwrap().value, "ingest-value");
    repo.validate("ingest-value").unwrap();

    repo.remove_token("ingest").unwrap();
    assert!(matches!(
        repo.get_token("ingest").unwrap_err(),
        AuthError::NotFound(_)
    ));
    assert!(matches!(
        repo.validate("ingest-value").unwrap_err(),
        AuthError::Unauthorized(_)
    ));
}

#[test]
fn duplicate_token_name_is_conflict() {
    let repo = BootstrapTokenRepository::new("root-secret");
    repo.create_token("ingest", "a".to_string()).unwrap();

    let err = repo.create_token("ingest", "b".to_string()).unwrap_err();
    assert!(matches!(err, AuthError::Conflict(_)));
}

#[test]
fn list_is_sorted_by_name() {
    let repo = BootstrapTokenRepository::new("root-secret");
    repo.create_token("zeta", "z".to_string()).unwrap();
    repo.create_token("alpha", "a".to_string()).unwrap();

    let names: Vec<String> = repo
        .list_tokens()
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, ["alpha", "zeta"]);
}

#[test]
fn remove_missing_token_is_not_found() {
    let repo = BootstrapTokenRepository::new("root-secret");
    let err = repo.remove_token("ghost").unwrap_err();
    assert!(matches!(err, AuthError::NotFound(_)));
}
