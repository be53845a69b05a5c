//! Software installed on pool machines

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Image id sentinel resolved per provider by the image resolver
pub const DEFAULT_IMAGE_ID: &str = "default";

/// A package repository added before packages are installed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repository {
    pub name: String,
    pub entries: Vec<String>,
    /// Signing key, armored
    pub key: Option<String>,
}

impl Repository {
    pub fn new(name: impl Into<String>, entries: Vec<String>) -> Self {
        Self {
            name: name.into(),
            entries,
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Software {
    pub image_id: String,
    /// The image already carries the software; skip bootstrap
    pub cached_image: bool,
    /// Source URL -> destination path
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub repositories: Vec<Repository>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl Default for Software {
    fn default() -> Self {
        Self {
            image_id: DEFAULT_IMAGE_ID.to_string(),
            cached_image: false,
            files: BTreeMap::new(),
            packages: Vec::new(),
            repositories: Vec::new(),
            options: BTreeMap::new(),
        }
    }
}

impl Software {
    pub fn builder() -> SoftwareBuilder {
        SoftwareBuilder::default()
    }

    pub fn uses_default_image(&self) -> bool {
        self.image_id == DEFAULT_IMAGE_ID
    }

    pub fn validate(&self) -> Result<()> {
        if self.image_id.trim().is_empty() {
            return Err(Error::validation("software image id cannot be empty"));
        }
        if let Some(pkg) = self.packages.iter().find(|p| p.trim().is_empty()) {
            return Err(Error::validation(format!("invalid package name {:?}", pkg)));
        }
        if let Some(repo) = self.repositories.iter().find(|r| r.name.trim().is_empty()) {
            return Err(Error::validation(format!(
                "repository with entries {:?} has no name",
                repo.entries
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct SoftwareBuilder {
    software: Software,
}

impl SoftwareBuilder {
    pub fn image_id(mut self, image_id: impl Into<String>) -> Self {
        self.software.image_id = image_id.into();
        self
    }

    pub fn cached_image(mut self, cached: bool) -> Self {
        self.software.cached_image = cached;
        self
    }

    pub fn file(mut self, source_url: impl Into<String>, destination: impl Into<String>) -> Self {
        self.software.files.insert(source_url.into(), destination.into());
        self
    }

    pub fn packages<I, S>(mut self, packages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.software.packages = packages.into_iter().map(Into::into).collect();
        self
    }

    pub fn add_package(mut self, package: impl Into<String>) -> Self {
        self.software.packages.push(package.into());
        self
    }

    pub fn repository(mut self, repository: Repository) -> Self {
        self.software.repositories.push(repository);
        self
    }

    pub fn option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.software.options.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> Result<Software> {
        self.software.validate()?;
        Ok(self.software)
    }
}
