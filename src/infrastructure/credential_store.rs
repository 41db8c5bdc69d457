use crate::domain::models::OAuthToken;
use crate::infrastructure::error::InfraError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const KEYRING_SERVICE: &str = "inbox-planner.oauth.google";

/// Token storage scoped to one user.
pub trait CredentialStore: Send + Sync {
    fn save_token(&self, token: &OAuthToken) -> Result<(), InfraError>;
    fn load_token(&self) -> Result<Option<OAuthToken>, InfraError>;
    fn delete_token(&self) -> Result<(), InfraError>;
}

/// OS keyring entry, one per user id.
#[derive(Debug, Clone)]
pub struct KeyringCredentialStore {
    service_name: String,
    user_id: String,
}

impl KeyringCredentialStore {
    pub fn new(service_name: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            user_id: user_id.into(),
        }
    }

    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self::new(KEYRING_SERVICE, user_id)
    }

    fn entry(&self) -> Result<keyring::Entry, InfraError> {
        keyring::Entry::new(&self.service_name, &self.user_id)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }
}

impl CredentialStore for KeyringCredentialStore {
    fn save_token(&self, token: &OAuthToken) -> Result<(), InfraError> {
        let payload =
            serde_json::to_string(token).map_err(|error| InfraError::Credential(error.to_string()))?;
        self.entry()?
            .set_password(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))
    }

    fn load_token(&self) -> Result<Option<OAuthToken>, InfraError> {
        let payload = match self.entry()?.get_password() {
            Ok(value) => value,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(error) => return Err(InfraError::Credential(error.to_string())),
        };

        let token = serde_json::from_str::<OAuthToken>(&payload)
            .map_err(|error| InfraError::Credential(error.to_string()))?;
        Ok(Some(token))
    }

    fn delete_token(&self) -> Result<(), InfraError> {
        match self.entry()?.delete_credential() {
            Ok(_) => Ok(()),
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(error) => Err(InfraError::Credential(error.to_string())),
        }
    }
}

/// Process-local token map keyed by user id. Views created with
/// [`InMemoryCredentialStore::scoped_to`] share the same map.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCredentialStore {
    tokens: Arc<Mutex<HashMap<String, OAuthToken>>>,
    user_id: String,
}

impl InMemoryCredentialStore {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            tokens: Arc::default(),
            user_id: user_id.into(),
        }
    }

    pub fn scoped_to(&self, user_id: impl Into<String>) -> Self {
        Self {
            tokens: Arc::clone(&self.tokens),
            user_id: user_id.into(),
        }
    }

    fn with_tokens<T>(
        &self,
        action: impl FnOnce(&mut HashMap<String, OAuthToken>) -> T,
    ) -> Result<T, InfraError> {
        let mut guard = self
            .tokens
            .lock()
            .map_err(|error| InfraError::Credential(format!("in-memory lock poisoned: {error}")))?;
        Ok(action(&mut guard))
    }
}

impl CredentialStore for InMemoryCredentialStore {
    fn save_token(&self, token: &OAuthToken) -> Result<(), InfraError> {
        self.with_tokens(|tokens| {
            tokens.insert(self.user_id.clone(), token.clone());
        })
    }

    fn load_token(&self) -> Result<Option<OAuthToken>, InfraError> {
        self.with_tokens(|tokens| tokens.get(&self.user_id).cloned())
    }

    fn delete_token(&self) -> Result<(), InfraError> {
        self.with_tokens(|tokens| {
            tokens.remove(&self.user_id);
        })
    }
}
