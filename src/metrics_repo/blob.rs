// Raw snapshot BLOB: [version: u8][wincode MetricValues].
// A blob whose first byte is not a known version is treated as unreadable and
// the snapshot slot is re-seeded by the next capture.

use crate::models::MetricValues;

pub(super) const SNAPSHOT_BLOB_VERSION: u8 = 1;

pub(super) fn encode_values(values: &MetricValues) -> anyhow::Result<Vec<u8>> {
    let payload =
        wincode::serialize(values).map_err(|e| anyhow::anyhow!("wincode snapshot: {}", e))?;
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(SNAPSHOT_BLOB_VERSION);
    out.extend_from_slice(&payload);
    Ok(out)
}

/// `None` for an empty blob or an unknown version.
pub(super) fn decode_values(bytes: &[u8]) -> Option<MetricValues> {
    match bytes.split_first() {
        Some((&SNAPSHOT_BLOB_VERSION, payload)) => match wincode::deserialize(payload) {
            Ok(values) => Some(values),
            Err(e) => {
                tracing::debug!(error = %e, "wincode deserialize snapshot (corrupt), ignoring");
                None
            }
        },
        _ => None,
    }
}
