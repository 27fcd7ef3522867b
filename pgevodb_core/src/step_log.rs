use std::io::Write;

use crate::identifier::MigrationId;


/// A per-step execution log: an opaque reference for the `log_ref` column
/// plus the stream the executor writes its timing markers to.
///
/// The stream is owned by exactly one step and is flushed and dropped when
/// the step finishes; the engine keeps no long-lived handles.
pub struct StepLog {
    pub reference: String,

    pub stream: Box<dyn Write + Send>,
}


/// Provides the per-step log streams the executor writes to.
///
/// The engine treats the sink as an opaque collaborator: `reference` is
/// whatever string the external log consumer can later resolve (a file
/// path, a URL). Server NOTICE/WARNING traffic travels through the
/// `tracing` facade rather than this stream.
pub trait StepLogSink {
    fn open_step_log(&self, id: &MigrationId) -> std::io::Result<StepLog>;
}


/// A [`StepLogSink`] that discards everything (tests, dry runs).
pub struct NullStepLogSink;

impl StepLogSink for NullStepLogSink {
    fn open_step_log(&self, id: &MigrationId) -> std::io::Result<StepLog> {
        Ok(StepLog {
            reference: format!("null:{}", id),
            stream: Box::new(std::io::sink()),
        })
    }
}
