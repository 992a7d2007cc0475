use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Tokens;
use crate::model::AccountId;

/// A user's token account with its cooldown window.
/// Balances are only changed by the store on behalf of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    id: AccountId,
    email: String,
    tokens: Tokens,
    cooldown_until: Option<DateTime<Utc>>,
}

impl Account {
    pub fn new(email: &str) -> Self {
        Self::with_id(Uuid::new_v4(), email)
    }

    pub fn with_id(id: AccountId, email: &str) -> Self {
        Self {
            id,
            email: normalize_email(email),
            tokens: Tokens::ZERO,
            cooldown_until: None,
        }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn tokens(&self) -> Tokens {
        self.tokens
    }

    pub fn cooldown_until(&self) -> Option<DateTime<Utc>> {
        self.cooldown_until
    }

    /// Whether the account may not send a new transfer at `now`.
    pub fn is_cooling_down(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| now < until)
    }

    pub(crate) fn set_tokens(&mut self, tokens: Tokens) {
        self.tokens = tokens;
    }

    pub(crate) fn set_cooldown(&mut self, until: DateTime<Utc>) {
        self.cooldown_until = Some(until);
    }
}

/// Emails are compared case-insensitively and without surrounding blanks.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
