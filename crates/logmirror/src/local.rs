//! Local checksum and compression tools.

use crate::error::{MirrorError, Result};
use crate::listing::Listing;
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

const READ_BUFFER_SIZE: usize = 64 * 1024;

#[async_trait]
pub trait LocalTools: Send + Sync {
    /// Lowercase hex MD5 of one file
    async fn checksum(&self, path: &Path) -> Result<String>;

    /// Checksums of the regular files in `dir` whose name starts with `prefix`
    async fn list_checksums(&self, dir: &Path, prefix: &str) -> Result<Listing>;

    /// Gzip `src` into `dst`; `dst` is removed again on failure
    async fn compress(&self, src: &Path, dst: &Path) -> Result<()>;
}

/// In-process MD5 and gzip, run on the blocking pool
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeTools;

#[async_trait]
impl LocalTools for NativeTools {
    async fn checksum(&self, path: &Path) -> Result<String> {
        let path = path.to_path_buf();
        blocking(move || md5_file(&path)).await
    }

    async fn list_checksums(&self, dir: &Path, prefix: &str) -> Result<Listing> {
        let dir = dir.to_path_buf();
        let prefix = prefix.to_string();
        blocking(move || list_dir_checksums(&dir, &prefix)).await
    }

    async fn compress(&self, src: &Path, dst: &Path) -> Result<()> {
        let src = src.to_path_buf();
        let dst = dst.to_path_buf();
        blocking(move || {
            let result = gzip_file(&src, &dst);
            if result.is_err() {
                let _ = fs::remove_file(&dst);
            }
            result
        })
        .await
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MirrorError::InvalidState(format!("blocking task failed: {e}")))?
}

pub fn md5_file(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut context = md5::Context::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
    }
    Ok(format!("{:x}", context.compute()))
}

fn list_dir_checksums(dir: &Path, prefix: &str) -> Result<Listing> {
    let mut matching: Vec<(String, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(prefix) {
            matching.push((name, entry.path()));
        }
    }

    let mut entries = Vec::with_capacity(matching.len());
    for (name, path) in matching {
        entries.push((name, md5_file(&path)?));
    }
    Ok(entries.into_iter().collect())
}

fn gzip_file(src: &Path, dst: &Path) -> Result<()> {
    let mut reader = BufReader::new(File::open(src)?);
    let mut encoder = GzEncoder::new(BufWriter::new(File::create(dst)?), Compression::default());
    io::copy(&mut reader, &mut encoder)?;
    let mut writer = encoder.finish()?;
    writer.flush()?;
    Ok(())
}
