use std::{borrow::Cow, collections::HashSet, fs, path::Path};

use fs_more::directory::{DirectoryScanDepthLimit, DirectoryScanOptions, DirectoryScanner};
use metadata::BundleMetadata;

use crate::{errors::BundleError, fingerprint::Fingerprint, identifier::MigrationId};

pub mod metadata;



/// A single migration bundle loaded from disk.
///
/// The bundle directory's name is the migration id; `up.sql` and `down.sql`
/// are mandatory (`down.sql` may be empty), `verify.sql` and `meta.yaml`
/// are optional. The `up_script` field holds the script *after* `@include`
/// expansion, which is also the text the fingerprint covers.
#[derive(Clone, Debug)]
pub struct MigrationBundle {
    pub id: MigrationId,

    pub up_script: String,

    pub down_script: String,

    pub verify_script: Option<String>,

    pub metadata: BundleMetadata,

    pub fingerprint: Fingerprint,
}


const UP_SCRIPT_FILE_NAME: &str = "up.sql";
const DOWN_SCRIPT_FILE_NAME: &str = "down.sql";
const VERIFY_SCRIPT_FILE_NAME: &str = "verify.sql";

const INCLUDE_DIRECTIVE_PREFIX: &str = "-- @include ";


/// Parses a single script line as an `@include` directive,
/// returning the referenced relative path if it is one.
fn parse_include_directive(line: &str) -> Option<&str> {
    let target = line.trim().strip_prefix(INCLUDE_DIRECTIVE_PREFIX)?.trim();

    if target.is_empty() {
        return None;
    }

    Some(target)
}


/// Expands `@include` directives in a script with the referenced files'
/// contents, resolved relative to the script's directory.
///
/// This is a single deterministic pass over the script's lines: lines that
/// are not directives are copied through byte-for-byte, and includes do not
/// nest. A directive inside an included file, a script including itself,
/// and a missing or unreadable target are all load-time errors.
fn expand_includes(script: &str, script_path: &Path) -> Result<String, BundleError> {
    let script_directory = script_path.parent().unwrap_or_else(|| Path::new("."));

    let mut expanded = String::with_capacity(script.len());

    for raw_line in script.split_inclusive('\n') {
        let line_content = raw_line
            .strip_suffix('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .unwrap_or(raw_line);

        let Some(include_target) = parse_include_directive(line_content) else {
            expanded.push_str(raw_line);
            continue;
        };

        let include_path = script_directory.join(include_target);

        if !include_path.is_file() {
            return Err(BundleError::IncludeTargetMissing {
                script_path: script_path.to_path_buf(),
                include_path,
            });
        }

        if paths_refer_to_same_file(script_path, &include_path) {
            return Err(BundleError::IncludeCycle {
                script_path: script_path.to_path_buf(),
            });
        }

        let include_contents = fs::read_to_string(&include_path).map_err(|error| {
            BundleError::UnableToReadInclude {
                include_path: include_path.clone(),
                error,
            }
        })?;

        if include_contents
            .lines()
            .any(|included_line| parse_include_directive(included_line).is_some())
        {
            return Err(BundleError::NestedInclude {
                script_path: script_path.to_path_buf(),
                include_path,
            });
        }

        expanded.push_str(&include_contents);

        if !include_contents.ends_with('\n') {
            expanded.push('\n');
        }
    }

    Ok(expanded)
}

fn paths_refer_to_same_file(first: &Path, second: &Path) -> bool {
    match (fs::canonicalize(first), fs::canonicalize(second)) {
        (Ok(first_canonical), Ok(second_canonical)) => first_canonical == second_canonical,
        _ => false,
    }
}


fn read_script_file(path: &Path) -> Result<String, BundleError> {
    fs::read_to_string(path).map_err(|error| BundleError::UnableToReadScript {
        path: path.to_path_buf(),
        error,
    })
}


impl MigrationBundle {
    /// Loads a single migration bundle from its directory.
    pub fn load_from_directory<P>(bundle_directory: P) -> Result<Self, BundleError>
    where
        P: AsRef<Path>,
    {
        let bundle_directory = bundle_directory.as_ref();

        let id = {
            let directory_name = bundle_directory
                .file_name()
                .ok_or_else(|| BundleError::InvalidBundleStructure {
                    bundle_directory_path: bundle_directory.to_path_buf(),
                    reason: Cow::Borrowed("bundle directory has no name"),
                })?
                .to_str()
                .ok_or_else(|| BundleError::InvalidBundleStructure {
                    bundle_directory_path: bundle_directory.to_path_buf(),
                    reason: Cow::Borrowed("bundle directory has a non-UTF-8 name"),
                })?;

            MigrationId::parse_from_str(directory_name).map_err(|error| {
                BundleError::InvalidBundleId {
                    id: directory_name.to_string(),
                    error,
                }
            })?
        };


        let metadata = BundleMetadata::load_from_directory(bundle_directory)
            .map_err(|error| BundleError::MetadataError {
                id: id.clone(),
                error,
            })?
            .unwrap_or_default();


        let up_script = {
            let up_script_path = bundle_directory.join(UP_SCRIPT_FILE_NAME);
            if !up_script_path.is_file() {
                return Err(BundleError::InvalidBundleStructure {
                    bundle_directory_path: bundle_directory.to_path_buf(),
                    reason: Cow::Borrowed("no up.sql file"),
                });
            }

            let raw_up_script = read_script_file(&up_script_path)?;

            expand_includes(&raw_up_script, &up_script_path)?
        };

        let down_script = {
            let down_script_path = bundle_directory.join(DOWN_SCRIPT_FILE_NAME);
            if !down_script_path.is_file() {
                return Err(BundleError::InvalidBundleStructure {
                    bundle_directory_path: bundle_directory.to_path_buf(),
                    reason: Cow::Borrowed("no down.sql file"),
                });
            }

            read_script_file(&down_script_path)?
        };

        let verify_script = {
            let verify_script_path = bundle_directory.join(VERIFY_SCRIPT_FILE_NAME);

            if verify_script_path.is_file() {
                Some(read_script_file(&verify_script_path)?)
            } else {
                None
            }
        };


        let fingerprint = Fingerprint::calculate(&up_script, &down_script);

        Ok(Self {
            id,
            up_script,
            down_script,
            verify_script,
            metadata,
            fingerprint,
        })
    }

    /// The statement timeout this bundle requests, if any.
    pub fn timeout_sec(&self) -> Option<u32> {
        self.metadata.timeout_sec
    }
}


/// Scans the migrations directory for bundles, one level deep.
///
/// Non-directory entries are skipped. The returned bundles are sorted by id
/// in ascending order, which is the apply order.
pub fn load_bundles(migrations_directory: &Path) -> Result<Vec<MigrationBundle>, BundleError> {
    let mut bundles = Vec::new();
    let mut seen_ids = HashSet::new();

    let migrations_directory_scanner = DirectoryScanner::new(
        migrations_directory,
        DirectoryScanOptions {
            follow_base_directory_symbolic_link: false,
            follow_symbolic_links: false,
            yield_base_directory: false,
            maximum_scan_depth: DirectoryScanDepthLimit::Limited { maximum_depth: 0 },
        },
    );

    for directory_entry_result in migrations_directory_scanner {
        let directory_entry = directory_entry_result.map_err(|error| {
            BundleError::UnableToScanDirectory {
                directory_path: migrations_directory.to_path_buf(),
                error,
            }
        })?;

        if !directory_entry.metadata().is_dir() {
            continue;
        }

        let bundle = MigrationBundle::load_from_directory(directory_entry.path())?;

        if !seen_ids.insert(bundle.id.clone()) {
            return Err(BundleError::DuplicateId { id: bundle.id });
        }

        bundles.push(bundle);
    }

    bundles.sort_unstable_by(|first, second| first.id.cmp(&second.id));

    Ok(bundles)
}



#[cfg(test)]
mod test {
    use std::{fs, path::PathBuf};

    use tempfile::TempDir;

    use super::*;

    fn write_bundle(
        migrations_directory: &Path,
        id: &str,
        up_script: &str,
        down_script: &str,
    ) -> PathBuf {
        let bundle_directory = migrations_directory.join(id);
        fs::create_dir(&bundle_directory).unwrap();
        fs::write(bundle_directory.join("up.sql"), up_script).unwrap();
        fs::write(bundle_directory.join("down.sql"), down_script).unwrap();

        bundle_directory
    }

    #[test]
    fn bundle_loads_with_default_metadata() {
        let temporary_directory = TempDir::new().unwrap();
        let bundle_directory = write_bundle(
            temporary_directory.path(),
            "2025-01-01T10-00-00__create_products",
            "CREATE TABLE products (id bigint);\n",
            "DROP TABLE products;\n",
        );

        let bundle = MigrationBundle::load_from_directory(&bundle_directory).unwrap();

        assert_eq!(
            bundle.id.as_str(),
            "2025-01-01T10-00-00__create_products"
        );
        assert_eq!(bundle.metadata, BundleMetadata::default());
        assert_eq!(bundle.verify_script, None);
        assert_eq!(
            bundle.fingerprint,
            Fingerprint::calculate(
                "CREATE TABLE products (id bigint);\n",
                "DROP TABLE products;\n"
            )
        );
    }

    #[test]
    fn missing_up_script_is_an_error() {
        let temporary_directory = TempDir::new().unwrap();
        let bundle_directory = temporary_directory
            .path()
            .join("2025-01-01T10-00-00__broken");
        fs::create_dir(&bundle_directory).unwrap();
        fs::write(bundle_directory.join("down.sql"), "").unwrap();

        assert!(matches!(
            MigrationBundle::load_from_directory(&bundle_directory),
            Err(BundleError::InvalidBundleStructure { .. })
        ));
    }

    #[test]
    fn missing_down_script_is_an_error() {
        let temporary_directory = TempDir::new().unwrap();
        let bundle_directory = temporary_directory
            .path()
            .join("2025-01-01T10-00-00__broken");
        fs::create_dir(&bundle_directory).unwrap();
        fs::write(bundle_directory.join("up.sql"), "SELECT 1;\n").unwrap();

        assert!(matches!(
            MigrationBundle::load_from_directory(&bundle_directory),
            Err(BundleError::InvalidBundleStructure { .. })
        ));
    }

    #[test]
    fn includes_expand_in_order() {
        let temporary_directory = TempDir::new().unwrap();
        let bundle_directory = write_bundle(
            temporary_directory.path(),
            "2025-01-01T10-00-00__example_multi_tables",
            "-- @include sql/01_create_products.sql\n-- @include sql/02_create_orders.sql\n",
            "DROP TABLE orders;\nDROP TABLE products;\n",
        );

        let sql_directory = bundle_directory.join("sql");
        fs::create_dir(&sql_directory).unwrap();
        fs::write(
            sql_directory.join("01_create_products.sql"),
            "CREATE TABLE products (id bigint);\n",
        )
        .unwrap();
        fs::write(
            sql_directory.join("02_create_orders.sql"),
            "CREATE TABLE orders (id bigint);\n",
        )
        .unwrap();

        let bundle = MigrationBundle::load_from_directory(&bundle_directory).unwrap();

        assert_eq!(
            bundle.up_script,
            "CREATE TABLE products (id bigint);\nCREATE TABLE orders (id bigint);\n"
        );
        assert_eq!(
            bundle.fingerprint,
            Fingerprint::calculate(&bundle.up_script, &bundle.down_script)
        );
    }

    #[test]
    fn editing_an_included_file_changes_the_fingerprint() {
        let temporary_directory = TempDir::new().unwrap();
        let bundle_directory = write_bundle(
            temporary_directory.path(),
            "2025-01-01T10-00-00__example",
            "-- @include part.sql\n",
            "",
        );
        fs::write(bundle_directory.join("part.sql"), "SELECT 1;\n").unwrap();

        let fingerprint_before = MigrationBundle::load_from_directory(&bundle_directory)
            .unwrap()
            .fingerprint;

        fs::write(bundle_directory.join("part.sql"), "SELECT 2;\n").unwrap();

        let fingerprint_after = MigrationBundle::load_from_directory(&bundle_directory)
            .unwrap()
            .fingerprint;

        assert_ne!(fingerprint_before, fingerprint_after);
    }

    #[test]
    fn missing_include_target_is_an_error() {
        let temporary_directory = TempDir::new().unwrap();
        let bundle_directory = write_bundle(
            temporary_directory.path(),
            "2025-01-01T10-00-00__example",
            "-- @include nowhere.sql\n",
            "",
        );

        assert!(matches!(
            MigrationBundle::load_from_directory(&bundle_directory),
            Err(BundleError::IncludeTargetMissing { .. })
        ));
    }

    #[test]
    fn nested_includes_are_an_error() {
        let temporary_directory = TempDir::new().unwrap();
        let bundle_directory = write_bundle(
            temporary_directory.path(),
            "2025-01-01T10-00-00__example",
            "-- @include outer.sql\n",
            "",
        );
        fs::write(
            bundle_directory.join("outer.sql"),
            "-- @include inner.sql\n",
        )
        .unwrap();
        fs::write(bundle_directory.join("inner.sql"), "SELECT 1;\n").unwrap();

        assert!(matches!(
            MigrationBundle::load_from_directory(&bundle_directory),
            Err(BundleError::NestedInclude { .. })
        ));
    }

    #[test]
    fn self_include_is_a_cycle_error() {
        let temporary_directory = TempDir::new().unwrap();
        let bundle_directory = write_bundle(
            temporary_directory.path(),
            "2025-01-01T10-00-00__example",
            "-- @include up.sql\n",
            "",
        );

        assert!(matches!(
            MigrationBundle::load_from_directory(&bundle_directory),
            Err(BundleError::IncludeCycle { .. })
        ));
    }

    #[test]
    fn non_directive_lines_are_preserved_byte_for_byte() {
        let temporary_directory = TempDir::new().unwrap();
        let up_script = "-- plain comment mentioning @include elsewhere\nSELECT 1;";
        let bundle_directory = write_bundle(
            temporary_directory.path(),
            "2025-01-01T10-00-00__example",
            up_script,
            "",
        );

        let bundle = MigrationBundle::load_from_directory(&bundle_directory).unwrap();

        assert_eq!(bundle.up_script, up_script);
    }

    #[test]
    fn bundles_load_sorted_by_id() {
        let temporary_directory = TempDir::new().unwrap();
        write_bundle(
            temporary_directory.path(),
            "2025-02-01T10-00-00__second",
            "SELECT 2;\n",
            "",
        );
        write_bundle(
            temporary_directory.path(),
            "2025-01-01T10-00-00__first",
            "SELECT 1;\n",
            "",
        );
        fs::write(temporary_directory.path().join("README.md"), "notes\n").unwrap();

        let bundles = load_bundles(temporary_directory.path()).unwrap();

        assert_eq!(bundles.len(), 2);
        assert_eq!(bundles[0].id.as_str(), "2025-01-01T10-00-00__first");
        assert_eq!(bundles[1].id.as_str(), "2025-02-01T10-00-00__second");
    }

    #[test]
    fn verify_script_is_loaded_when_present() {
        let temporary_directory = TempDir::new().unwrap();
        let bundle_directory = write_bundle(
            temporary_directory.path(),
            "2025-01-01T10-00-00__example",
            "SELECT 1;\n",
            "",
        );
        fs::write(
            bundle_directory.join("verify.sql"),
            "SELECT count(*) FROM products;\n",
        )
        .unwrap();

        let bundle = MigrationBundle::load_from_directory(&bundle_directory).unwrap();

        assert_eq!(
            bundle.verify_script.as_deref(),
            Some("SELECT count(*) FROM products;\n")
        );
    }
}
