// Source File
//
// Parsed representation of one input file. The real syntax tree lives behind
// the external compiler; this side keeps the file text plus a lazily stamped
// content version, which is what program reuse needs to detect changes.

use once_cell::sync::OnceCell;
use xxhash_rust::xxh3::xxh3_64;

#[derive(Debug)]
pub struct SourceFile {
    file_name: String,
    text: String,
    version: OnceCell<String>,
}

impl SourceFile {
    pub fn new(file_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            text: text.into(),
            version: OnceCell::new(),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Content version, if a stamp has been applied.
    pub fn version(&self) -> Option<&str> {
        self.version.get().map(|v| v.as_str())
    }

    /// Stamp the file with a content hash version. Idempotent: the first
    /// stamp wins, which keeps versions stable across repeated host reads.
    pub fn ensure_version(&self) -> &str {
        self.version
            .get_or_init(|| format!("{:016x}", xxh3_64(self.text.as_bytes())))
    }

    pub fn content_hash(&self) -> u64 {
        xxh3_64(self.text.as_bytes())
    }
}
