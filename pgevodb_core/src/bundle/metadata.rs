use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

use crate::identifier::MigrationId;



/// An error that can occur when loading a bundle's `meta.yaml`.
#[derive(Error, Debug)]
pub enum BundleMetadataError {
    #[error(
        "metadata file \"{}\" is not a file",
        .file_path.display()
    )]
    NotAFile { file_path: PathBuf },

    #[error(
        "metadata file \"{}\" could not be read",
        .file_path.display()
    )]
    UnableToReadFile {
        file_path: PathBuf,

        #[source]
        error: std::io::Error,
    },

    #[error(
        "metadata file \"{}\" could not be parsed as YAML",
        .file_path.display()
    )]
    UnableToParseContents {
        file_path: PathBuf,

        #[source]
        error: Box<serde_yaml::Error>,
    },

    #[error(
        "metadata file \"{}\" sets timeout_sec to zero; the timeout must be a positive integer",
        .file_path.display()
    )]
    NonPositiveTimeout { file_path: PathBuf },
}


/// Per-bundle metadata, loaded from `meta.yaml` inside the bundle directory.
///
/// Every field is optional in the file; a missing file is equivalent to an
/// empty one. Unrecognised keys are rejected so a typo cannot silently turn
/// a constraint off.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields, default)]
pub struct BundleMetadata {
    /// Per-migration statement timeout, overriding the global one.
    pub timeout_sec: Option<u32>,

    /// Tags this migration carries; participates in the `allow_tags` filter.
    pub tags: BTreeSet<String>,

    /// When false, rolling this migration back is refused outright.
    pub reversible: bool,

    /// Ids that must be applied before this migration may be.
    pub requires: BTreeSet<MigrationId>,

    /// Advisory marker; not enforced by the engine.
    pub online_safe: bool,

    /// Commands to run before the migration's state is first touched.
    pub pre_hooks: Vec<String>,

    /// Commands to run after the migration's scripts have committed.
    pub post_hooks: Vec<String>,
}

impl Default for BundleMetadata {
    fn default() -> Self {
        Self {
            timeout_sec: None,
            tags: BTreeSet::new(),
            reversible: true,
            requires: BTreeSet::new(),
            online_safe: false,
            pre_hooks: Vec::new(),
            post_hooks: Vec::new(),
        }
    }
}


impl BundleMetadata {
    pub const fn file_name_in_bundle_directory() -> &'static str {
        "meta.yaml"
    }

    /// Loads `meta.yaml` from the given bundle directory, returning `None`
    /// when the file does not exist.
    pub fn load_from_directory<P>(
        bundle_directory_path: P,
    ) -> Result<Option<Self>, BundleMetadataError>
    where
        P: AsRef<Path>,
    {
        let metadata_file_path = bundle_directory_path
            .as_ref()
            .join(Self::file_name_in_bundle_directory());

        if !metadata_file_path.exists() {
            return Ok(None);
        } else if !metadata_file_path.is_file() {
            return Err(BundleMetadataError::NotAFile {
                file_path: metadata_file_path,
            });
        }


        let metadata_contents = fs::read_to_string(&metadata_file_path).map_err(|error| {
            BundleMetadataError::UnableToReadFile {
                file_path: metadata_file_path.clone(),
                error,
            }
        })?;

        let metadata: BundleMetadata =
            serde_yaml::from_str(&metadata_contents).map_err(|error| {
                BundleMetadataError::UnableToParseContents {
                    file_path: metadata_file_path.clone(),
                    error: Box::new(error),
                }
            })?;

        if metadata.timeout_sec == Some(0) {
            return Err(BundleMetadataError::NonPositiveTimeout {
                file_path: metadata_file_path,
            });
        }


        Ok(Some(metadata))
    }

    #[allow(dead_code)]
    pub(crate) fn load_from_str(metadata_yaml_str: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(metadata_yaml_str)
    }
}



#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let metadata = BundleMetadata::load_from_str("tags:\n  - schema\n").unwrap();

        assert_eq!(metadata.timeout_sec, None);
        assert!(metadata.reversible);
        assert!(metadata.requires.is_empty());
        assert!(!metadata.online_safe);
        assert!(metadata.pre_hooks.is_empty());
        assert!(metadata.post_hooks.is_empty());
        assert!(metadata.tags.contains("schema"));
    }

    #[test]
    fn empty_document_equals_default() {
        let metadata = BundleMetadata::load_from_str("{}").unwrap();

        assert_eq!(metadata, BundleMetadata::default());
    }

    #[test]
    fn all_recognised_keys_parse() {
        let metadata = BundleMetadata::load_from_str(
            r#"
timeout_sec: 120
tags:
  - data
  - backfill
reversible: false
requires:
  - 2025-01-01T10-00-00__create_products
online_safe: true
pre_hooks:
  - echo before
post_hooks:
  - echo after
"#,
        )
        .unwrap();

        assert_eq!(metadata.timeout_sec, Some(120));
        assert!(!metadata.reversible);
        assert!(metadata.online_safe);
        assert_eq!(metadata.pre_hooks, vec!["echo before".to_string()]);
        assert_eq!(metadata.post_hooks, vec!["echo after".to_string()]);
        assert_eq!(metadata.requires.len(), 1);
        assert_eq!(metadata.tags.len(), 2);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(BundleMetadata::load_from_str("timeout_secs: 10\n").is_err());
    }

    #[test]
    fn negative_timeout_is_rejected() {
        assert!(BundleMetadata::load_from_str("timeout_sec: -5\n").is_err());
    }
}
