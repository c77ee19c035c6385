use serde::Serialize;

/// `IngestReport` returned by `Ingest`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestReport {
    pub docs_in: u64,
    pub docs_written: u64,
    pub steps_written: u64,
    pub warnings: u64,
    pub errors: u64,
}

impl IngestReport {
    pub fn merge(&mut self, other: &IngestReport) {
        self.docs_in += other.docs_in;
        self.docs_written += other.docs_written;
        self.steps_written += other.steps_written;
        self.warnings += other.warnings;
        self.errors += other.errors;
    }
}
