//! Admin credentials installed on every machine

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Username and SSH key pair used to seed cloud key pairs and to log into
/// machines after launch. The private key never appears in `Debug` output.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdminAccess {
    pub username: String,
    pub public_key: String,
    pub private_key: String,
}

impl AdminAccess {
    pub fn builder() -> AdminAccessBuilder {
        AdminAccessBuilder::default()
    }

    pub fn to_builder(&self) -> AdminAccessBuilder {
        AdminAccessBuilder {
            access: self.clone(),
        }
    }

    /// Base64 blob of the public key, without the type prefix or comment
    pub fn raw_public_key(&self) -> Option<&str> {
        self.public_key.split_whitespace().nth(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.username.trim().is_empty() {
            return Err(Error::validation("admin username cannot be empty"));
        }
        if self.public_key.trim().is_empty() {
            return Err(Error::validation("admin public key cannot be empty"));
        }
        if self.private_key.trim().is_empty() {
            return Err(Error::validation("admin private key cannot be empty"));
        }
        Ok(())
    }
}

impl fmt::Debug for AdminAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminAccess")
            .field("username", &self.username)
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[derive(Default)]
pub struct AdminAccessBuilder {
    access: AdminAccess,
}

impl AdminAccessBuilder {
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.access.username = username.into();
        self
    }

    pub fn public_key(mut self, key: impl Into<String>) -> Self {
        self.access.public_key = key.into();
        self
    }

    pub fn private_key(mut self, key: impl Into<String>) -> Self {
        self.access.private_key = key.into();
        self
    }

    pub fn build(self) -> Result<AdminAccess> {
        self.access.validate()?;
        Ok(self.access)
    }
}
