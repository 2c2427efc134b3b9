use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::IterationKey;

/// A conversion job message sent to the CAD converter queue.
///
/// Asks the external converter to derive viewer-friendly geometry from a
/// freshly uploaded native CAD file. Consumed by the converter service, which
/// owns any retry policy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversionJob {
    /// Job identifier (UUID).
    pub job_id: String,
    /// The iteration the CAD file is attached to.
    pub iteration: IterationKey,
    /// Sub type the file was uploaded under (e.g. "nativecad").
    pub sub_type: String,
    /// Vault path of the native CAD file to convert.
    pub cad_file: String,
}

impl ConversionJob {
    pub fn new(
        iteration: IterationKey,
        sub_type: impl Into<String>,
        cad_file: impl Into<String>,
    ) -> Self {
        Self {
            job_id: Uuid::now_v7().to_string(),
            iteration,
            sub_type: sub_type.into(),
            cad_file: cad_file.into(),
        }
    }
}
