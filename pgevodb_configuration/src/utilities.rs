use std::path::PathBuf;


/// Returns the default configuration filepath, which is at
/// `{current directory}/pgevodb.yaml`.
pub fn get_default_configuration_file_path() -> PathBuf {
    PathBuf::from("./pgevodb.yaml")
}
