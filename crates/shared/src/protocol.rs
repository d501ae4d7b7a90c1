use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::{ConversionStatus, JobId, PackId};

/// A conversion job as reported by `POST /convert` and the job status endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionJob {
    pub id: JobId,
    pub status: ConversionStatus,
    pub target_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub console_log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackRef {
    pub id: PackId,
}

/// An uploaded pack, or a pack produced by a conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcePackRecord {
    pub id: PackId,
    pub original_filename: String,
    pub storage_filename: String,
    pub size: u64,
    pub upload_date: NaiveDateTime,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_hash: Option<String>,
    #[serde(default)]
    pub converted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_pack: Option<PackRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack_format: Option<u32>,
}

impl ResourcePackRecord {
    /// Id of the pack this one was converted from, if any.
    pub fn source_pack_id(&self) -> Option<PackId> {
        self.original_pack.map(|pack| pack.id)
    }

    pub fn is_conversion_of(&self, pack_id: PackId) -> bool {
        self.converted && self.source_pack_id() == Some(pack_id)
    }
}
