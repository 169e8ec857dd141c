//! Attachment materialization.
//!
//! Mandrill embeds attachments and inline images in the webhook payload,
//! usually base64 encoded. Each one is decoded and written to temporary
//! storage so downstream consumers get a file instead of a JSON string.
//!
//! Storage is injected through [`TempStorage`]. Deleting materialized files is
//! the consumer's job.

use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::envelope::AttachmentDescriptor;
use super::error::AttachmentError;

/// Standard alphabet, padding optional.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Longest stem, in bytes, used in a temporary file name.
const MAX_STEM_BYTES: usize = 100;

/// Longest extension, in bytes, kept in a temporary file name.
const MAX_EXTENSION_BYTES: usize = 16;

/// An attachment written to temporary storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedAttachment {
    /// Name with path separators replaced
    pub filename: String,
    /// Name as sent by Mandrill
    pub original_filename: String,
    pub content_type: Option<String>,
    /// Storage-assigned identifier, unique per stored file
    pub location: String,
    pub size: u64,
}

impl MaterializedAttachment {
    /// Open the stored content for reading from the start.
    pub fn open(&self, storage: &dyn TempStorage) -> io::Result<Box<dyn Read + Send>> {
        storage.open(&self.location)
    }
}

/// Handle to a freshly created temporary file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub location: String,
    pub size: u64,
}

/// Temporary file facility used for attachment content.
///
/// Every `create` call must yield a distinct location, even when the same
/// filename is requested twice.
pub trait TempStorage: Send + Sync {
    /// Store `content` in a new temporary file named after `filename`.
    fn create(&self, filename: &str, content: &[u8]) -> io::Result<StoredFile>;

    /// Read a stored file back from its first byte.
    fn open(&self, location: &str) -> io::Result<Box<dyn Read + Send>>;

    /// Delete a stored file.
    fn remove(&self, location: &str) -> io::Result<()>;
}

/// Filesystem storage backed by `tempfile`.
///
/// File names are `{stem}-{random}{.ext}`, so identical requested names never
/// collide, including across concurrent processors sharing the directory.
/// Long stems and extensions are shortened to stay under the filesystem's
/// name length limit.
#[derive(Debug, Clone)]
pub struct FsTempStorage {
    dir: PathBuf,
}

impl FsTempStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl TempStorage for FsTempStorage {
    fn create(&self, filename: &str, content: &[u8]) -> io::Result<StoredFile> {
        let (stem, extension) = split_extension(filename);
        let prefix = format!("{}-", truncate_bytes(stem, MAX_STEM_BYTES));

        let mut file = tempfile::Builder::new()
            .prefix(&prefix)
            .suffix(truncate_bytes(extension, MAX_EXTENSION_BYTES))
            .tempfile_in(&self.dir)?;

        file.write_all(content)?;
        file.flush()?;

        // Persist: cleanup belongs to whoever consumes the normalized email.
        let (_, path) = file.keep().map_err(|e| e.error)?;

        Ok(StoredFile {
            location: path.to_string_lossy().into_owned(),
            size: content.len() as u64,
        })
    }

    fn open(&self, location: &str) -> io::Result<Box<dyn Read + Send>> {
        let file = std::fs::File::open(location)?;
        Ok(Box::new(file))
    }

    fn remove(&self, location: &str) -> io::Result<()> {
        std::fs::remove_file(location)
    }
}

/// In-process storage, mostly for tests.
#[derive(Debug, Default)]
pub struct MemoryTempStorage {
    files: Mutex<MemoryFiles>,
}

#[derive(Debug, Default)]
struct MemoryFiles {
    next_id: u64,
    contents: HashMap<String, Vec<u8>>,
}

impl MemoryTempStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of files currently stored.
    pub fn len(&self) -> usize {
        self.lock().contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryFiles> {
        self.files.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TempStorage for MemoryTempStorage {
    fn create(&self, filename: &str, content: &[u8]) -> io::Result<StoredFile> {
        let mut files = self.lock();
        let location = format!("mem://{}/{}", files.next_id, filename);
        files.next_id += 1;
        files.contents.insert(location.clone(), content.to_vec());

        Ok(StoredFile {
            location,
            size: content.len() as u64,
        })
    }

    fn open(&self, location: &str) -> io::Result<Box<dyn Read + Send>> {
        let content = self
            .lock()
            .contents
            .get(location)
            .cloned()
            .ok_or_else(|| not_found(location))?;
        Ok(Box::new(Cursor::new(content)))
    }

    fn remove(&self, location: &str) -> io::Result<()> {
        self.lock()
            .contents
            .remove(location)
            .map(|_| ())
            .ok_or_else(|| not_found(location))
    }
}

fn not_found(location: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, location.to_string())
}

/// Replace `/` and `\` so the name cannot escape the storage directory.
pub fn sanitize_filename(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}

/// Decode descriptor content into raw bytes.
pub fn decode_content(descriptor: &AttachmentDescriptor) -> Result<Vec<u8>, AttachmentError> {
    let name = descriptor.name.clone().unwrap_or_default();
    let content = descriptor
        .content
        .as_deref()
        .ok_or_else(|| AttachmentError::MissingContent { name: name.clone() })?;

    if !descriptor.is_base64() {
        return Ok(content.as_bytes().to_vec());
    }

    // Encoded content is commonly wrapped at 76 columns.
    let compact: Vec<u8> = content
        .bytes()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    LENIENT_BASE64
        .decode(compact)
        .map_err(|source| AttachmentError::InvalidBase64 { name, source })
}

/// Decode one descriptor and write it to storage.
pub fn materialize(
    descriptor: &AttachmentDescriptor,
    storage: &dyn TempStorage,
) -> Result<MaterializedAttachment, AttachmentError> {
    let original_filename = descriptor
        .name
        .clone()
        .ok_or(AttachmentError::MissingName)?;
    let filename = sanitize_filename(&original_filename);
    let content = decode_content(descriptor)?;

    let stored = storage
        .create(&filename, &content)
        .map_err(|source| AttachmentError::Storage {
            name: original_filename.clone(),
            source,
        })?;

    info!(
        filename = %filename,
        content_type = ?descriptor.content_type,
        size = stored.size,
        location = %stored.location,
        "attachment_materialized"
    );

    Ok(MaterializedAttachment {
        filename,
        original_filename,
        content_type: descriptor.content_type.clone(),
        location: stored.location,
        size: stored.size,
    })
}

/// Materialize attachments followed by inline images, keeping payload order.
///
/// All or nothing: when one descriptor fails, the files already written for
/// the earlier ones are removed before the error is returned.
pub fn materialize_all<'a, I>(
    descriptors: I,
    storage: &dyn TempStorage,
) -> Result<Vec<MaterializedAttachment>, AttachmentError>
where
    I: IntoIterator<Item = &'a AttachmentDescriptor>,
{
    let mut stored = Vec::new();
    for descriptor in descriptors {
        match materialize(descriptor, storage) {
            Ok(attachment) => stored.push(attachment),
            Err(e) => {
                discard(&stored, storage);
                return Err(e);
            }
        }
    }
    Ok(stored)
}

/// Best-effort removal of files nobody will receive.
pub fn discard(attachments: &[MaterializedAttachment], storage: &dyn TempStorage) {
    for attachment in attachments {
        if let Err(e) = storage.remove(&attachment.location) {
            warn!(
                location = %attachment.location,
                error = %e,
                "attachment_discard_failed"
            );
        }
    }
}

/// Cut `s` to at most `max` bytes without splitting a character.
fn truncate_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Split `report.final.pdf` into `("report.final", ".pdf")`.
fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(0) | None => (filename, ""),
        Some(dot) => filename.split_at(dot),
    }
}
