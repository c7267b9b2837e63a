//! Pluggable credential validation for CONNECT.
//!
//! The broker core never hard-codes a credential source: it is handed
//! an `Arc<dyn CredentialValidator>` at construction and calls
//! [`AuthService::login`] once per CONNECT attempt.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("no username supplied")]
    MissingCredentials,
    #[error("bad username or password")]
    Rejected,
}

/// Checks a username/password pair against whatever backs this
/// deployment (a static table, a database, an external identity
/// provider). Implementations should treat timing attacks, rate
/// limiting and credential storage as their own concern.
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    async fn validate(&self, user_id: &str, password: &[u8]) -> bool;
}

/// Accepts every CONNECT, credentials or not. Useful for local testing
/// and for deployments that push authentication to the transport layer
/// (e.g. mutual TLS) instead.
#[derive(Default)]
pub struct AllowAllValidator;

#[async_trait]
impl CredentialValidator for AllowAllValidator {
    async fn validate(&self, _user_id: &str, _password: &[u8]) -> bool {
        true
    }
}

/// Validates against a fixed, in-memory username/password table.
#[derive(Default)]
pub struct StaticCredentialValidator {
    credentials: HashMap<String, Vec<u8>>,
}

impl StaticCredentialValidator {
    pub fn new(credentials: HashMap<String, Vec<u8>>) -> Self {
        Self { credentials }
    }
}

#[async_trait]
impl CredentialValidator for StaticCredentialValidator {
    async fn validate(&self, user_id: &str, password: &[u8]) -> bool {
        self.credentials
            .get(user_id)
            .map(|expected| expected.as_slice() == password)
            .unwrap_or(false)
    }
}

/// Wraps a [`CredentialValidator`] with the CONNECT-time login
/// semantics: a CONNECT that carries no username is rejected outright
/// rather than handed to the validator, since "no data" is itself a
/// failure rather than an anonymous identity.
pub struct AuthService {
    validator: Arc<dyn CredentialValidator>,
}

impl AuthService {
    pub fn new(validator: Arc<dyn CredentialValidator>) -> Self {
        Self { validator }
    }

    pub async fn login(&self, user_id: Option<&str>, password: Option<&[u8]>) -> Result<(), AuthError> {
        let user_id = user_id.ok_or(AuthError::MissingCredentials)?;
        let password = password.unwrap_or(&[]);

        if self.validator.validate(user_id, password).await {
            Ok(())
        } else {
            Err(AuthError::Rejected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_allow_all_accepts_any_credentials() {
        let service = AuthService::new(Arc::new(AllowAllValidator));
        assert!(service.login(Some("anyone"), Some(b"whatever")).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_username_is_rejected() {
        let service = AuthService::new(Arc::new(AllowAllValidator));
        assert_eq!(service.login(None, Some(b"pw")).await, Err(AuthError::MissingCredentials));
    }

    #[tokio::test]
    async fn test_static_validator_checks_password() {
        let mut creds = HashMap::new();
        creds.insert("alice".to_string(), b"secret".to_vec());
        let service = AuthService::new(Arc::new(StaticCredentialValidator::new(creds)));

        assert!(service.login(Some("alice"), Some(b"secret")).await.is_ok());
        assert_eq!(
            service.login(Some("alice"), Some(b"wrong")).await,
            Err(AuthError::Rejected)
        );
        assert_eq!(
            service.login(Some("bob"), Some(b"secret")).await,
            Err(AuthError::Rejected)
        );
    }
}
