use std::{fs, io, path::PathBuf};

use chrono::Utc;
use pgevodb_core::step_log::{StepLog, StepLogSink};
use pgevodb_core::MigrationId;


/// Writes each step's execution log to its own file under the configured
/// log directory. The file path doubles as the `log_ref` recorded in
/// `schema_migrations`.
pub struct FileStepLogSink {
    log_directory: PathBuf,
}

impl FileStepLogSink {
    pub fn new(log_directory: PathBuf) -> Self {
        Self { log_directory }
    }
}

impl StepLogSink for FileStepLogSink {
    fn open_step_log(&self, id: &MigrationId) -> io::Result<StepLog> {
        fs::create_dir_all(&self.log_directory)?;

        let log_file_name = format!("{}__{}.log", Utc::now().format("%Y%m%dT%H%M%SZ"), id);
        let log_file_path = self.log_directory.join(log_file_name);

        let log_file = fs::File::create(&log_file_path)?;

        Ok(StepLog {
            reference: log_file_path.display().to_string(),
            stream: Box::new(log_file),
        })
    }
}
