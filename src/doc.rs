use std::fs::File;
use std::io::{Read, Seek};
use std::ops::Deref;
use std::path::Path;

use crate::error::{Result, VfsError};
use crate::fat::EntryType;
use crate::keys::KeyTable;
use crate::vfs::VirtualFileSystem;

const THUMBNAIL_ENTRY: &str = "thumbnail";

/// Decoded preview raster. Pixel bytes are BGRA exactly as stored;
/// reorder at a higher layer if another channel order is wanted.
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// A document container: the plain VFS plus typed accessors for its
/// well-known entries.
pub struct Document<R> {
    vfs: VirtualFileSystem<R>,
}

impl Document<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_key(path, KeyTable::User)
    }

    pub fn open_with_key<P: AsRef<Path>>(path: P, key: KeyTable) -> Result<Self> {
        Ok(Document {
            vfs: VirtualFileSystem::open_with_key(path, key)?,
        })
    }
}

impl<R: Read + Seek> Document<R> {
    pub fn from_reader(reader: R) -> Result<Self> {
        Self::from_reader_with_key(reader, KeyTable::User)
    }

    pub fn from_reader_with_key(reader: R, key: KeyTable) -> Result<Self> {
        Ok(Document {
            vfs: VirtualFileSystem::from_reader_with_key(reader, key)?,
        })
    }

    pub fn vfs(&self) -> &VirtualFileSystem<R> {
        &self.vfs
    }

    /// Decodes the `thumbnail` entry: a `{u32 width, u32 height}` header
    /// followed by `width * height * 4` bytes of BGRA pixel data.
    pub fn thumbnail(&self) -> Result<Thumbnail> {
        let mut entry = self.vfs.entry(THUMBNAIL_ENTRY)?;
        if entry.entry_type() != EntryType::File {
            return Err(VfsError::Malformed("thumbnail entry is not a file"));
        }

        let width = entry.read_u32()?;
        let height = entry.read_u32()?;

        // Both dimensions come straight from file content; the product has
        // to be formed without wrapping before it can be trusted
        let pixel_bytes = (width as u64)
            .checked_mul(height as u64)
            .and_then(|pixels| pixels.checked_mul(4))
            .ok_or(VfsError::Malformed("thumbnail dimensions overflow"))?;
        if pixel_bytes > entry.size().saturating_sub(8) {
            return Err(VfsError::Malformed(
                "thumbnail shorter than its header claims",
            ));
        }

        let mut pixels = vec![0u8; pixel_bytes as usize];
        entry.read_exact(&mut pixels)?;

        Ok(Thumbnail {
            width,
            height,
            pixels,
        })
    }
}

impl<R> Deref for Document<R> {
    type Target = VirtualFileSystem<R>;

    fn deref(&self) -> &VirtualFileSystem<R> {
        &self.vfs
    }
}
