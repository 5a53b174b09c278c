//! Account storage and credential verification.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::DuelNetError;

/// A registered identity.
///
/// Outlives any single connection. The credential is kept only as a digest
/// and is never serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique username.
    pub username: String,
    /// SHA-256 digest of the credential, hex-encoded.
    #[serde(skip_serializing)]
    pub credential_digest: String,
    /// Ladder rank, always >= 1.
    pub rank: u32,
    /// Admin flag.
    pub admin: bool,
    /// Creation timestamp (Unix seconds).
    pub created_at: u64,
}

/// Account errors.
#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("incorrect credential")]
    BadCredential,

    #[error("unknown account: {0}")]
    UnknownAccount(String),

    #[error("username taken: {0}")]
    UsernameTaken(String),
}

impl From<AccountError> for DuelNetError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::BadCredential => DuelNetError::unauthorized("incorrect credential"),
            AccountError::UnknownAccount(name) => DuelNetError::not_found(format!("account '{name}'")),
            AccountError::UsernameTaken(name) => {
                DuelNetError::conflict(format!("username '{name}' is taken"))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, AccountError>;

/// Identity provider contract.
///
/// Unknown usernames are registered on first login; known usernames must
/// present the original credential.
pub trait IdentityProvider: Send + Sync {
    fn verify_or_create(&self, username: &str, credential: &str) -> Result<Account>;
}

/// In-memory account registry.
pub struct Accounts {
    accounts: DashMap<String, Account>,
}

impl Accounts {
    pub fn new() -> Self {
        Self {
            accounts: DashMap::new(),
        }
    }

    pub fn get(&self, username: &str) -> Option<Account> {
        self.accounts.get(username).map(|r| r.clone())
    }

    pub fn contains(&self, username: &str) -> bool {
        self.accounts.contains_key(username)
    }

    pub fn count(&self) -> usize {
        self.accounts.len()
    }

    /// Set the ladder rank. Values below the floor are clamped to 1.
    pub fn set_rank(&self, username: &str, rank: u32) -> Result<()> {
        let mut account = self
            .accounts
            .get_mut(username)
            .ok_or_else(|| AccountError::UnknownAccount(username.to_string()))?;
        account.rank = rank.max(1);
        Ok(())
    }

    /// Reset the ladder rank to the floor.
    pub fn reset_rank(&self, username: &str) -> Result<()> {
        self.set_rank(username, 1)
    }

    pub fn grant_admin(&self, username: &str) -> Result<()> {
        let mut account = self
            .accounts
            .get_mut(username)
            .ok_or_else(|| AccountError::UnknownAccount(username.to_string()))?;
        account.admin = true;
        Ok(())
    }

    /// Rebind an account to a new username.
    pub fn rename(&self, username: &str, new_username: &str) -> Result<()> {
        if self.accounts.contains_key(new_username) {
            return Err(AccountError::UsernameTaken(new_username.to_string()));
        }
        let (_, mut account) = self
            .accounts
            .remove(username)
            .ok_or_else(|| AccountError::UnknownAccount(username.to_string()))?;
        account.username = new_username.to_string();
        self.accounts.insert(new_username.to_string(), account);
        Ok(())
    }
}

impl Default for Accounts {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityProvider for Accounts {
    fn verify_or_create(&self, username: &str, credential: &str) -> Result<Account> {
        let digest = credential_digest(credential);

        if let Some(account) = self.accounts.get(username) {
            if account.credential_digest != digest {
                return Err(AccountError::BadCredential);
            }
            return Ok(account.clone());
        }

        let account = Account {
            username: username.to_string(),
            credential_digest: digest,
            rank: 1,
            admin: false,
            created_at: unix_timestamp(),
        };
        self.accounts.insert(username.to_string(), account.clone());
        Ok(account)
    }
}

fn credential_digest(credential: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(credential.as_bytes());
    hex::encode(hasher.finalize())
}

fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
