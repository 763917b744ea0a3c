use std::cell::RefCell;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use std::rc::Rc;

use log::warn;

use crate::entry::VirtualFileEntry;
use crate::error::{Result, VfsError};
use crate::fat::{EntryType, FatEntry, ENTRIES_PER_BLOCK, FAT_ENTRY_SIZE};
use crate::keys::KeyTable;
use crate::pager::PagedReader;

/// Page index of the root directory block.
pub const ROOT_PAGE: u32 = 2;

/// Depth-first traversal callbacks. Every callback returns whether the
/// walk should continue; `false` aborts the whole traversal.
pub trait VirtualFileVisitor<R: Read + Seek> {
    fn visit_folder_begin(&mut self, entry: &mut VirtualFileEntry<R>) -> bool {
        let _ = entry;
        true
    }

    fn visit_folder_end(&mut self, entry: &mut VirtualFileEntry<R>) -> bool {
        let _ = entry;
        true
    }

    fn visit_file(&mut self, entry: &mut VirtualFileEntry<R>) -> bool {
        let _ = entry;
        true
    }
}

/// Read-only view of one container.
///
/// The container is opened once and held for the lifetime of this object.
/// Entries materialized from it borrow the underlying reader weakly, so
/// they fail cleanly rather than dangle if they outlive it.
pub struct VirtualFileSystem<R> {
    pager: Rc<RefCell<PagedReader<R>>>,
}

impl VirtualFileSystem<File> {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_key(path, KeyTable::User)
    }

    pub fn open_with_key<P: AsRef<Path>>(path: P, key: KeyTable) -> Result<Self> {
        Self::from_reader_with_key(File::open(path)?, key)
    }
}

impl<R: Read + Seek> VirtualFileSystem<R> {
    pub fn from_reader(reader: R) -> Result<Self> {
        Self::from_reader_with_key(reader, KeyTable::User)
    }

    pub fn from_reader_with_key(reader: R, key: KeyTable) -> Result<Self> {
        let mut pager = PagedReader::new(reader, key)?;
        // Page 0 is always a table page; validating it up front rejects
        // non-container input and wrong key tables at open time
        pager.fetch_page(0)?;

        Ok(VirtualFileSystem {
            pager: Rc::new(RefCell::new(pager)),
        })
    }

    pub fn page_count(&self) -> u32 {
        self.pager.borrow().page_count()
    }

    /// Copies decrypted bytes from an absolute container offset. Tooling
    /// aid; file content is normally read through [`entry`](Self::entry).
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        self.pager.borrow_mut().read(offset, buf)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.entry(path).is_ok()
    }

    /// Resolves a `/`-separated path, case-sensitively, to an entry.
    pub fn entry(&self, path: &str) -> Result<VirtualFileEntry<R>> {
        let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();
        if components.peek().is_none() {
            return Err(VfsError::NotFound(path.to_string()));
        }

        let mut block = ROOT_PAGE;
        while let Some(component) = components.next() {
            let found = self
                .read_block(block)?
                .into_iter()
                .find(|e| e.name() == component)
                .ok_or_else(|| VfsError::NotFound(path.to_string()))?;

            if components.peek().is_none() {
                return Ok(self.make_entry(found));
            }
            match found.entry_type() {
                EntryType::Folder => block = found.page_index,
                _ => return Err(VfsError::NotADirectory(path.to_string())),
            }
        }
        Err(VfsError::NotFound(path.to_string()))
    }

    /// Walks the whole tree depth-first from the root block, emitting
    /// folder-begin / folder-end / file events in slot order.
    pub fn walk<V: VirtualFileVisitor<R>>(&self, visitor: &mut V) -> Result<()> {
        self.walk_block(ROOT_PAGE, visitor)?;
        Ok(())
    }

    fn walk_block<V: VirtualFileVisitor<R>>(&self, block: u32, visitor: &mut V) -> Result<bool> {
        for fat in self.read_block(block)? {
            match fat.entry_type() {
                EntryType::Folder => {
                    let child = fat.page_index;
                    let mut entry = self.make_entry(fat);
                    if !visitor.visit_folder_begin(&mut entry) {
                        return Ok(false);
                    }
                    if !self.walk_block(child, visitor)? {
                        return Ok(false);
                    }
                    if !visitor.visit_folder_end(&mut entry) {
                        return Ok(false);
                    }
                }
                EntryType::File => {
                    let mut entry = self.make_entry(fat);
                    if !visitor.visit_file(&mut entry) {
                        return Ok(false);
                    }
                }
                EntryType::Unknown(raw) => {
                    warn!(
                        "skipping entry {:?} with unknown type {:#04x}",
                        fat.name(),
                        raw
                    );
                }
            }
        }
        Ok(true)
    }

    // One directory block is one page: 64 slots, ended early by an
    // all-zero flags word. Slots without the used bit are skipped but do
    // not end the block.
    fn read_block(&self, block: u32) -> Result<Vec<FatEntry>> {
        let mut pager = self.pager.borrow_mut();
        let page = pager.fetch_page(block)?;

        let mut entries = Vec::new();
        for slot in 0..ENTRIES_PER_BLOCK {
            let fat = FatEntry::parse(&page.bytes()[slot * FAT_ENTRY_SIZE..]);
            if fat.flags == 0 {
                break;
            }
            if fat.is_used() {
                entries.push(fat);
            }
        }
        Ok(entries)
    }

    pub(crate) fn make_entry(&self, fat: FatEntry) -> VirtualFileEntry<R> {
        VirtualFileEntry::new(fat, Rc::downgrade(&self.pager))
    }
}

#[cfg(test)]
mod test_open {
    use std::io::Cursor;
    use std::io::Write;

    use super::*;
    use crate::testutil::{BlockBuilder, ContainerBuilder};

    fn empty_container() -> Vec<u8> {
        let mut builder = ContainerBuilder::new();
        builder.add_page(&[]);
        builder.add_page(&BlockBuilder::new().finish());
        builder.build().into_inner()
    }

    #[test]
    fn opens_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&empty_container()).unwrap();

        let vfs = VirtualFileSystem::open(file.path()).unwrap();
        assert_eq!(vfs.page_count(), 3);
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            VirtualFileSystem::open("no/such/container"),
            Err(VfsError::Io(_))
        ));
    }

    #[test]
    fn rejects_garbage_up_front() {
        let garbage = vec![0x5Au8; crate::page::PAGE_SIZE * 2];
        assert!(matches!(
            VirtualFileSystem::from_reader(Cursor::new(garbage)),
            Err(VfsError::ChecksumMismatch { page: 0, .. })
        ));
    }

    #[test]
    fn rejects_wrong_key_table() {
        let data = empty_container();
        assert!(matches!(
            VirtualFileSystem::from_reader_with_key(Cursor::new(data), KeyTable::System),
            Err(VfsError::ChecksumMismatch { page: 0, .. })
        ));
    }

    #[test]
    fn raw_offset_read() {
        let mut builder = ContainerBuilder::new();
        builder.add_page(b"page one payload");
        builder.add_page(&BlockBuilder::new().finish());
        let vfs = VirtualFileSystem::from_reader(builder.build()).unwrap();

        let mut buf = [0u8; 16];
        let n = vfs.read(crate::page::PAGE_SIZE as u64, &mut buf).unwrap();
        assert_eq!(n, 16);
        assert_eq!(&buf, b"page one payload");
    }
}
