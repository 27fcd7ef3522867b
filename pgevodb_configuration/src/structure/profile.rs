use serde::Deserialize;

use crate::error::ConfigurationResolutionError;
use crate::traits::TryResolveWithContext;


#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub(crate) struct UnresolvedProfileConfiguration {
    dsn: Option<String>,

    schema: Option<String>,

    app_env: Option<String>,

    confirm_prod: Option<bool>,
}


/// A single connection target.
#[derive(Debug, Clone)]
pub struct ProfileConfiguration {
    /// PostgreSQL connection string. May be omitted in the file, in which
    /// case the caller falls back to the `DATABASE_URL` environment
    /// variable.
    pub dsn: Option<String>,

    /// Schema the `schema_migrations` table lives in.
    pub schema: String,

    /// Free-form environment label (e.g. `development`, `production`).
    pub app_env: Option<String>,

    /// When true, execution against this profile requires interactive
    /// confirmation or an explicit `--confirm-prod`.
    pub confirm_prod: bool,
}


/// The schema name ends up interpolated into DDL/DML statements, so only
/// plain identifiers are accepted.
fn is_plain_identifier(candidate: &str) -> bool {
    let mut characters = candidate.chars();

    let Some(first_character) = characters.next() else {
        return false;
    };

    if !first_character.is_ascii_alphabetic() && first_character != '_' {
        return false;
    }

    characters.all(|character| character.is_ascii_alphanumeric() || character == '_')
}


impl TryResolveWithContext for UnresolvedProfileConfiguration {
    type Resolved = ProfileConfiguration;
    type Context = String;
    type Error = ConfigurationResolutionError;

    fn try_resolve_with_context(
        self,
        profile_name: Self::Context,
    ) -> Result<Self::Resolved, Self::Error> {
        let schema = self.schema.unwrap_or_else(|| "public".to_string());

        if !is_plain_identifier(&schema) {
            return Err(ConfigurationResolutionError::InvalidSchemaIdentifier {
                profile_name,
                schema,
            });
        }

        Ok(ProfileConfiguration {
            dsn: self.dsn,
            schema,
            app_env: self.app_env,
            confirm_prod: self.confirm_prod.unwrap_or(false),
        })
    }
}



#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn plain_identifiers_are_accepted() {
        assert!(is_plain_identifier("public"));
        assert!(is_plain_identifier("_migrations"));
        assert!(is_plain_identifier("app2"));
    }

    #[test]
    fn quoting_hazards_are_rejected() {
        assert!(!is_plain_identifier(""));
        assert!(!is_plain_identifier("2fast"));
        assert!(!is_plain_identifier("public\"; DROP TABLE users; --"));
        assert!(!is_plain_identifier("my schema"));
    }
}
