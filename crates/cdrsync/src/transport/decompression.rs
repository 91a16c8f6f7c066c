//! Gzip decompression of downloaded log files
//!
//! `cdr-2024-01-01.txt.gz` is unpacked to `cdr-2024-01-01.txt` in the same
//! directory. Multi-member archives are read to the end.

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::Decompressor;

const GZIP_EXTENSION: &str = "gz";

/// Unpacks `.gz` files with flate2
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipDecompressor;

impl Decompressor for GzipDecompressor {
    fn output_path(&self, path: &Path) -> Option<PathBuf> {
        let is_gzip = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(GZIP_EXTENSION));
        is_gzip.then(|| path.with_extension(""))
    }

    fn decompress(&self, path: &Path) -> Result<PathBuf> {
        let out_path = self
            .output_path(path)
            .with_context(|| format!("{} is not a .gz file", path.display()))?;

        let input = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let mut decoder = MultiGzDecoder::new(BufReader::new(input));

        let output = File::create(&out_path)
            .with_context(|| format!("Failed to create {}", out_path.display()))?;
        let mut writer = BufWriter::new(output);

        let bytes = std::io::copy(&mut decoder, &mut writer)
            .with_context(|| format!("Failed to decompress {}", path.display()))?;
        writer
            .flush()
            .with_context(|| format!("Failed to write {}", out_path.display()))?;

        debug!("Decompressed {} -> {} ({} bytes)", path.display(), out_path.display(), bytes);
        Ok(out_path)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn gzip(content: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_output_path() {
        let gz = GzipDecompressor;
        assert_eq!(
            gz.output_path(Path::new("work/cdr.txt.gz")),
            Some(PathBuf::from("work/cdr.txt"))
        );
        assert_eq!(gz.output_path(Path::new("work/cdr.txt")), None);
    }

    #[test]
    fn test_decompress_to_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("cdr.txt.gz");
        std::fs::write(&archive, gzip(b"line one\nline two\n")).unwrap();

        let out = GzipDecompressor.decompress(&archive).unwrap();
        assert_eq!(out, dir.path().join("cdr.txt"));
        assert_eq!(std::fs::read_to_string(out).unwrap(), "line one\nline two\n");
    }

    #[test]
    fn test_decompress_multi_member() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("cdr.txt.gz");
        let mut data = gzip(b"first\n");
        data.extend(gzip(b"second\n"));
        std::fs::write(&archive, data).unwrap();

        let out = GzipDecompressor.decompress(&archive).unwrap();
        assert_eq!(std::fs::read_to_string(out).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_decompress_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.txt.gz");
        std::fs::write(&archive, b"not gzip data").unwrap();
        assert!(GzipDecompressor.decompress(&archive).is_err());
    }
}
