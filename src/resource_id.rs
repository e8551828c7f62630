use crate::error::{EngineError, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Number of 8 KiB chunks read from the middle of the file for the
/// content-hash fallback (§3, ResourceId).
const CONTENT_HASH_CHUNKS: usize = 8;
const CONTENT_HASH_CHUNK_LEN: usize = 8 * 1024;

/// Derives the int32 `ResourceId` for a path (§3).
///
/// If the basename (without extension) is all ASCII digits, parses it
/// directly. Otherwise hashes 8x8 KiB read from the middle of the file
/// with MurmurHash3 (32-bit) and folds the result into the upper half of
/// the `i32` range, reserving the lower half (`0..i32::MAX/2`) for
/// explicit sequential ids assigned by callers that don't go through a
/// file path at all (e.g. tests constructing synthetic resources).
pub fn resource_id_for_path(path: &Path) -> Result<i32> {
    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
        if !stem.is_empty() && stem.bytes().all(|b| b.is_ascii_digit()) {
            return stem
                .parse::<i32>()
                .map_err(|e| EngineError::Config(format!("resource id overflow: {e}")));
        }
    }
    content_hash_id(path)
}

fn content_hash_id(path: &Path) -> Result<i32> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();

    let sample = if len == 0 {
        Vec::new()
    } else {
        let mid = len / 2;
        let span = (CONTENT_HASH_CHUNKS * CONTENT_HASH_CHUNK_LEN) as u64;
        let start = mid.saturating_sub(span / 2);
        file.seek(SeekFrom::Start(start))?;

        let mut buf = vec![0u8; span as usize];
        let mut total_read = 0usize;
        loop {
            let n = file.read(&mut buf[total_read..])?;
            if n == 0 {
                break;
            }
            total_read += n;
            if total_read == buf.len() {
                break;
            }
        }
        buf.truncate(total_read);
        buf
    };

    let hash32 = murmur3::murmur3_32(&mut std::io::Cursor::new(&sample), 0)
        .map_err(|e| EngineError::StorageIo(format!("murmur3 hash failed: {e}")))?;

    // Fold into the upper half of i32's range: clear the sign bit, then
    // set it, guaranteeing a negative-or-large-positive id that never
    // collides with the caller-assigned sequential range.
    let folded = (hash32 >> 1) | 0x8000_0000;
    Ok(folded as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn digit_basename_parses_directly() {
        let path = Path::new("/music/1234.wav");
        assert_eq!(resource_id_for_path(path).unwrap(), 1234);
    }

    #[test]
    fn content_hash_is_stable_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.wav");
        let mut f = File::create(&path).unwrap();
        f.write_all(&vec![7u8; 200_000]).unwrap();
        drop(f);

        let id1 = resource_id_for_path(&path).unwrap();
        let id2 = resource_id_for_path(&path).unwrap();
        assert_eq!(id1, id2);
        assert!(id1 < 0 || (id1 as i64) >= (i32::MAX as i64) / 2);
    }

    #[test]
    fn different_contents_usually_differ() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        std::fs::write(&a, vec![1u8; 100_000]).unwrap();
        std::fs::write(&b, vec![2u8; 100_000]).unwrap();
        assert_ne!(
            resource_id_for_path(&a).unwrap(),
            resource_id_for_path(&b).unwrap()
        );
    }
}
