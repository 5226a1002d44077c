//! Storage connector (§6): the byte-stream abstraction the transfer engine
//! reads/writes through, so local filesystem, SFTP and S3 back-ends share
//! one seam. Only the local filesystem reference implementation lives here;
//! SFTP/S3 are external collaborators (§1 out-of-scope) that would
//! implement the same trait.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};

use crate::error::PesitError;
use crate::validators::map_io_error;

#[async_trait]
pub trait WritableStream: Send {
    async fn write_chunk(&mut self, buf: &[u8]) -> Result<(), PesitError>;
    async fn flush(&mut self) -> Result<(), PesitError>;
    async fn truncate(&mut self, len: u64) -> Result<(), PesitError>;
}

#[async_trait]
pub trait ReadableStream: Send {
    /// Reads up to `max_len` bytes. An empty result means EOF.
    async fn read_chunk(&mut self, max_len: usize) -> Result<Vec<u8>, PesitError>;
}

#[async_trait]
pub trait StorageConnector: Send + Sync {
    async fn open_write(&self, path: &Path, append: bool) -> Result<Box<dyn WritableStream>, PesitError>;
    async fn open_read(&self, path: &Path, offset: u64) -> Result<Box<dyn ReadableStream>, PesitError>;
    async fn size(&self, path: &Path) -> Result<u64, PesitError>;
    async fn exists(&self, path: &Path) -> bool;
    async fn is_readable(&self, path: &Path) -> bool;
    async fn ensure_parent_dirs(&self, path: &Path) -> Result<(), PesitError>;
}

fn storage_err(err: std::io::Error) -> PesitError {
    let diagnostic = map_io_error(&err);
    PesitError::Storage { diagnostic, source: err }
}

pub struct LocalFileWriter(File);

#[async_trait]
impl WritableStream for LocalFileWriter {
    async fn write_chunk(&mut self, buf: &[u8]) -> Result<(), PesitError> {
        self.0.write_all(buf).await.map_err(storage_err)
    }

    async fn flush(&mut self) -> Result<(), PesitError> {
        self.0.flush().await.map_err(storage_err)
    }

    async fn truncate(&mut self, len: u64) -> Result<(), PesitError> {
        self.0.set_len(len).await.map_err(storage_err)?;
        self.0.seek(SeekFrom::Start(len)).await.map_err(storage_err)?;
        Ok(())
    }
}

pub struct LocalFileReader(File);

#[async_trait]
impl ReadableStream for LocalFileReader {
    async fn read_chunk(&mut self, max_len: usize) -> Result<Vec<u8>, PesitError> {
        let mut buf = vec![0u8; max_len];
        let n = self.0.read(&mut buf).await.map_err(storage_err)?;
        buf.truncate(n);
        Ok(buf)
    }
}

/// Reference `StorageConnector` backed by the local filesystem (tokio `fs`).
#[derive(Debug, Clone, Default)]
pub struct LocalFilesystemStorage;

#[async_trait]
impl StorageConnector for LocalFilesystemStorage {
    async fn open_write(&self, path: &Path, append: bool) -> Result<Box<dyn WritableStream>, PesitError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .await
            .map_err(storage_err)?;
        Ok(Box::new(LocalFileWriter(file)))
    }

    async fn open_read(&self, path: &Path, offset: u64) -> Result<Box<dyn ReadableStream>, PesitError> {
        let mut file = File::open(path).await.map_err(storage_err)?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await.map_err(storage_err)?;
        }
        Ok(Box::new(LocalFileReader(file)))
    }

    async fn size(&self, path: &Path) -> Result<u64, PesitError> {
        let meta = tokio::fs::metadata(path).await.map_err(storage_err)?;
        Ok(meta.len())
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    async fn is_readable(&self, path: &Path) -> bool {
        File::open(path).await.is_ok()
    }

    async fn ensure_parent_dirs(&self, path: &Path) -> Result<(), PesitError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(storage_err)?;
        }
        Ok(())
    }
}

/// Expands `{PLACEHOLDER}` tokens in a virtual-file filename pattern (§4.4).
/// Unrecognized placeholders are left literal.
pub fn expand_placeholders(
    pattern: &str,
    partner: &str,
    virtual_name: &str,
    transfer_id: u32,
    now: time::OffsetDateTime,
) -> String {
    let mut out = pattern.to_string();
    let replacements: [(&str, String); 9] = [
        ("{PARTNER}", partner.to_string()),
        ("{VIRTUAL}", virtual_name.to_string()),
        ("{TRANSFER_ID}", transfer_id.to_string()),
        ("{DATE}", format!("{:04}{:02}{:02}", now.year(), u8::from(now.month()), now.day())),
        ("{TIME}", format!("{:02}{:02}{:02}", now.hour(), now.minute(), now.second())),
        ("{TIMESTAMP}", (now.unix_timestamp_nanos() / 1_000_000).to_string()),
        ("{YEAR}", format!("{:04}", now.year())),
        ("{MONTH}", format!("{:02}", u8::from(now.month()))),
        ("{DAY}", format!("{:02}", now.day())),
    ];
    for (token, value) in replacements {
        out = out.replace(token, &value);
    }
    out = out.replace("{UUID}", &uuid::Uuid::new_v4().to_string());
    out
}

/// Synthesizes a default physical path when no virtual-file entry matches
/// and the server is not in strict mode (§4.4).
pub fn default_path(receive_dir: &Path, virtual_name: &str, millis: u128) -> PathBuf {
    receive_dir.join(format!("{virtual_name}_{millis}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_known_placeholders_and_preserves_unknown() {
        let now = time::OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let expanded = expand_placeholders("{PARTNER}_{VIRTUAL}_{TRANSFER_ID}_{NOPE}", "BANKA", "STMT", 42, now);
        assert!(expanded.starts_with("BANKA_STMT_42_"));
        assert!(expanded.ends_with("{NOPE}"));
    }

    #[test]
    fn default_path_joins_receive_dir() {
        let path = default_path(Path::new("/recv"), "FILE", 12345);
        assert_eq!(path, PathBuf::from("/recv/FILE_12345"));
    }
}
