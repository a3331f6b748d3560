#![forbid(unsafe_code)]

//! Durable projection of a resource: attributes plus its cached range set.
//!
//! One file per resource at `<storage>/<id>.meta`, in one of two layouts:
//!
//! - **List variant** (interval representation): a UTF-8 JSON object with
//!   camelCase keys and an inclusive `ranges` array.
//! - **Bitmap variant**: a `u32` big-endian header length, that many bytes
//!   of the same JSON object minus `ranges`, then the raw bitmap to EOF.
//!
//! The two are distinguished on load by the first byte: JSON starts with
//! `{`, while a sane header length never has `0x7B` as its high byte.
//!
//! Writes are atomic (`temp + rename`). A meta file lagging behind the data
//! file is always safe to resume from: bytes are written to the data file
//! before they enter the range set.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{RangeSet, StorageError, StorageResult};

/// Persisted resource attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaHeader {
    pub id: String,
    pub total_size: u64,
    pub original_url: String,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
    pub target_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MetaRange {
    start: u64,
    end: u64,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDoc {
    #[serde(flatten)]
    header: MetaHeader,
    ranges: Vec<MetaRange>,
}

/// Serialize `header` + `set` into the variant matching the set's
/// representation and write it atomically to `path`.
pub async fn save(path: &Path, header: &MetaHeader, set: &mut RangeSet) -> StorageResult<()> {
    let bytes = match set.bitmap_bytes() {
        None => {
            let doc = ListDoc {
                header: header.clone(),
                ranges: set
                    .to_ranges()
                    .into_iter()
                    .map(|(start, end)| MetaRange { start, end })
                    .collect(),
            };
            serde_json::to_vec(&doc).map_err(|e| StorageError::Corrupt(e.to_string()))?
        }
        Some(bitmap) => {
            let header_json =
                serde_json::to_vec(header).map_err(|e| StorageError::Corrupt(e.to_string()))?;
            let mut bytes =
                Vec::with_capacity(4 + header_json.len() + bitmap.len());
            bytes.extend_from_slice(&u32::try_from(header_json.len()).map_err(|_| {
                StorageError::Corrupt("meta header exceeds u32 length".to_string())
            })?
            .to_be_bytes());
            bytes.extend_from_slice(&header_json);
            bytes.extend_from_slice(&bitmap);
            bytes
        }
    };

    let tmp = tmp_path_for(path);
    tokio::fs::write(&tmp, &bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

/// Load a meta file, reconstructing the range set in the representation the
/// file was saved with.
pub async fn load(path: &Path) -> StorageResult<(MetaHeader, RangeSet)> {
    let bytes = tokio::fs::read(path).await?;

    if bytes.first() == Some(&b'{') {
        let doc: ListDoc = serde_json::from_slice(&bytes)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;
        let set = RangeSet::from_ranges(
            doc.header.total_size,
            doc.ranges.iter().map(|r| (r.start, r.end)),
        );
        return Ok((doc.header, set));
    }

    if bytes.len() < 4 {
        return Err(StorageError::Corrupt("meta file too short".to_string()));
    }
    let header_len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let header_end = 4usize
        .checked_add(header_len)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| StorageError::Corrupt("meta header length out of bounds".to_string()))?;
    let header: MetaHeader = serde_json::from_slice(&bytes[4..header_end])
        .map_err(|e| StorageError::Corrupt(e.to_string()))?;
    let set = RangeSet::from_bitmap_bytes(header.total_size, &bytes[header_end..])?;
    Ok((header, set))
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.to_path_buf();
    let mut name = tmp
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "meta".to_string());
    name.push_str(".tmp");
    tmp.set_file_name(name);
    tmp
}
