//! Login lookup over the configured user table.

use std::collections::HashMap;

use vitals_core::rate_limit::normalize_phone;
use vitals_core::MemoryCredentialStore;

use crate::config::UserConfig;

/// Read-only index of configured users by id, username and phone number.
#[derive(Debug, Default)]
pub struct UserDirectory {
    by_id: HashMap<String, UserConfig>,
    by_username: HashMap<String, String>,
    by_phone: HashMap<String, String>,
}

impl UserDirectory {
    pub fn new(users: &[UserConfig]) -> Self {
        let mut directory = Self::default();
        for user in users {
            directory
                .by_username
                .insert(user.username.clone(), user.id.clone());
            if let Some(phone) = user.phone.as_deref().and_then(normalize_phone) {
                directory.by_phone.insert(phone, user.id.clone());
            }
            directory.by_id.insert(user.id.clone(), user.clone());
        }
        directory
    }

    pub fn get(&self, id: &str) -> Option<&UserConfig> {
        self.by_id.get(id)
    }

    pub fn find_by_username(&self, username: &str) -> Option<&UserConfig> {
        self.by_username.get(username).and_then(|id| self.get(id))
    }

    pub fn find_by_phone(&self, phone: &str) -> Option<&UserConfig> {
        let phone = normalize_phone(phone)?;
        self.by_phone.get(&phone).and_then(|id| self.get(id))
    }

    /// Registers every user with the credential store.
    pub fn seed(&self, store: &MemoryCredentialStore) {
        for user in self.by_id.values() {
            store.insert(&user.id, user.active);
        }
    }
}
