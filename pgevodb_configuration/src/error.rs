use std::{io, path::PathBuf};

use thiserror::Error;


#[derive(Debug, Error)]
pub enum ConfigurationResolutionError {
    #[error(
        "default_profile names \"{}\", but no such profile is defined",
        .profile_name
    )]
    UnknownDefaultProfile { profile_name: String },

    #[error(
        "profile \"{}\" sets schema to \"{}\", which is not a plain identifier",
        .profile_name,
        .schema
    )]
    InvalidSchemaIdentifier {
        profile_name: String,

        schema: String,
    },

    #[error("global.timeout_sec must be a positive integer")]
    NonPositiveTimeout,
}


#[derive(Debug, Error)]
pub enum ConfigurationLoadingError {
    #[error("unable to read configuration file at {}", .path.display())]
    UnableToReadConfigurationFile {
        path: PathBuf,

        #[source]
        error: io::Error,
    },

    #[error("failed to parse the contents of the configuration file as YAML")]
    ParsingError {
        #[from]
        #[source]
        error: Box<serde_yaml::Error>,
    },

    #[error("failed to resolve and validate the contents of the configuration")]
    ResolutionError {
        #[from]
        #[source]
        error: ConfigurationResolutionError,
    },
}


#[derive(Debug, Error)]
pub enum ProfileSelectionError {
    #[error(
        "no profile selected: pass --profile or set default_profile in the configuration file"
    )]
    NoProfileSelected,

    #[error("no profile named \"{}\" is defined", .profile_name)]
    UnknownProfile { profile_name: String },
}
