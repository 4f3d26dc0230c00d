//! Playground documents: the shader/program bundle a gallery entry points at.
//!
//! A document is stored as JSON in the documents [`BlobStore`]; gallery rows
//! only carry its digest. Validation happens before storage so the store only
//! ever holds well-formed documents.

use crate::blob::{BlobError, BlobStore};
use crate::digest::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Licenses a publishing author may choose from.
pub const LICENSES: [&str; 5] = ["CC 0", "CC BY", "CC BY-NC", "CC BY-SA", "CC BY-NC-SA"];

/// The license that allows anonymous authorship.
const PUBLIC_DOMAIN: &str = "CC 0";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Document does not have a title")]
    MissingTitle,
    #[error("Document does not have a description")]
    MissingDescription,
    #[error("Document does not have any programs")]
    NoPrograms,
    #[error("Program does not have a name")]
    UnnamedProgram,
    #[error("Program '{0}' does not have a vertex shader")]
    MissingVertex(String),
    #[error("Program '{0}' does not have a fragment shader")]
    MissingFragment(String),
    #[error("Only one program can be the default program")]
    MultipleDefaults,
    #[error("Default program not specified")]
    NoDefault,
    #[error("Invalid license: {0}")]
    InvalidLicense(String),
    #[error("License '{0}' requires an author name")]
    AuthorRequired(String),
}

/// One vertex/fragment shader pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Program {
    pub version: u32,
    pub name: String,
    pub vertex: String,
    pub fragment: String,
    pub is_default: bool,
}

/// Attribution record appended on every publication.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Author {
    pub name: String,
    pub license: String,
    pub year: i32,
}

impl Author {
    pub fn validate(&self) -> Result<(), DocumentError> {
        if !LICENSES.contains(&self.license.as_str()) {
            return Err(DocumentError::InvalidLicense(self.license.clone()));
        }
        if self.name.is_empty() && self.license != PUBLIC_DOMAIN {
            return Err(DocumentError::AuthorRequired(self.license.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Document {
    pub version: u32,
    pub title: String,
    pub description: String,
    pub programs: Vec<Program>,
    pub javascript: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_time: Option<DateTime<Utc>>,
    pub authors: Vec<Author>,
}

impl Document {
    /// Structural checks required for any stored document.
    pub fn validate(&self) -> Result<(), DocumentError> {
        if self.title.is_empty() {
            return Err(DocumentError::MissingTitle);
        }
        if self.programs.is_empty() {
            return Err(DocumentError::NoPrograms);
        }

        let mut has_default = false;
        for program in &self.programs {
            if program.is_default {
                if has_default {
                    return Err(DocumentError::MultipleDefaults);
                }
                has_default = true;
            }
            if program.name.is_empty() {
                return Err(DocumentError::UnnamedProgram);
            }
            if program.vertex.is_empty() {
                return Err(DocumentError::MissingVertex(program.name.clone()));
            }
            if program.fragment.is_empty() {
                return Err(DocumentError::MissingFragment(program.name.clone()));
            }
        }
        if !has_default {
            return Err(DocumentError::NoDefault);
        }
        Ok(())
    }

    /// Gallery entries additionally need a description.
    pub fn validate_publication(&self) -> Result<(), DocumentError> {
        self.validate()?;
        if self.description.is_empty() {
            return Err(DocumentError::MissingDescription);
        }
        Ok(())
    }

    /// Validate and record `author` as the latest contributor.
    ///
    /// Re-publishing by the same author with the same license does not grow
    /// the attribution list.
    pub fn prepare(&mut self, author: Author) -> Result<(), DocumentError> {
        self.validate()?;
        author.validate()?;
        if self.authors.last() != Some(&author) {
            self.authors.push(author);
        }
        Ok(())
    }

    /// Serialize and store in the documents blob store.
    pub fn store(&self, blobs: &BlobStore) -> Result<Digest, BlobError> {
        let json = serde_json::to_vec(self).map_err(std::io::Error::from)?;
        blobs.store(&json)
    }
}
