use std::io::{Read, Seek, SeekFrom};

use log::{debug, trace, warn};

use crate::error::{Result, VfsError};
use crate::keys::KeyTable;
use crate::page::{is_table_page, table_page_of, Page, PAGE_SIZE, TABLE_SPAN};

// Sentinel for an unfilled cache slot; no real container reaches this index
const NO_PAGE: u32 = u32::MAX;

struct Slot {
    index: u32,
    page: Page,
}

impl Slot {
    fn empty() -> Slot {
        Slot {
            index: NO_PAGE,
            page: Page::zeroed(),
        }
    }
}

/// Random-access reader over the raw container stream.
///
/// Every page handed out has been decrypted and validated against its
/// stored checksum. Two single-slot caches are kept, one for the table
/// page and one for the data page most recently touched; they are separate
/// because directory traversal alternates between the two kinds, and a
/// shared slot would thrash. A page that fails validation is never
/// installed into either slot.
pub struct PagedReader<R> {
    inner: R,
    page_count: u32,
    key: KeyTable,
    table_slot: Slot,
    page_slot: Slot,
}

impl<R: Read + Seek> PagedReader<R> {
    pub fn new(mut inner: R, key: KeyTable) -> Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        if len == 0 || len % PAGE_SIZE as u64 != 0 {
            return Err(VfsError::BadSize(len));
        }
        let page_count = len / PAGE_SIZE as u64;
        if page_count > NO_PAGE as u64 {
            return Err(VfsError::BadSize(len));
        }
        debug!("container holds {} pages", page_count);

        Ok(PagedReader {
            inner,
            page_count: page_count as u32,
            key,
            table_slot: Slot::empty(),
            page_slot: Slot::empty(),
        })
    }

    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Returns the decrypted, checksum-validated page at `index`.
    pub fn fetch_page(&mut self, index: u32) -> Result<&Page> {
        if index >= self.page_count {
            return Err(VfsError::OutOfRange(index as u64));
        }

        if is_table_page(index) {
            self.load_table(index)?;
            return Ok(&self.table_slot.page);
        }

        // The stored checksum doubles as the data page's cipher key, so
        // the owning table page has to be resident first
        self.load_table(table_page_of(index))?;
        let expected = self
            .table_slot
            .page
            .entry((index % TABLE_SPAN) as usize)
            .checksum;

        if self.page_slot.index == index {
            trace!("data page {} cache hit", index);
            return Ok(&self.page_slot.page);
        }

        let raw = self.read_raw(index)?;
        let page = Page::decrypt_data(&raw, expected, self.key);
        let actual = page.checksum();
        if actual != expected {
            warn!(
                "data page {} failed checksum: expected {:#010x}, got {:#010x}",
                index, expected, actual
            );
            return Err(VfsError::ChecksumMismatch {
                page: index,
                expected,
                actual,
            });
        }

        debug!("data page {} cached", index);
        self.page_slot = Slot { index, page };
        Ok(&self.page_slot.page)
    }

    /// Copies decrypted bytes from an absolute container offset, clamping
    /// at the container end. Returns the number of bytes copied.
    pub fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let total = self.page_count as u64 * PAGE_SIZE as u64;
        if offset >= total {
            return Ok(0);
        }
        let end = total.min(offset + buf.len() as u64);

        let mut pos = offset;
        let mut written = 0;
        while pos < end {
            let index = (pos / PAGE_SIZE as u64) as u32;
            let in_page = (pos % PAGE_SIZE as u64) as usize;
            let take = ((PAGE_SIZE - in_page) as u64).min(end - pos) as usize;

            let page = self.fetch_page(index)?;
            buf[written..written + take].copy_from_slice(&page.bytes()[in_page..in_page + take]);

            written += take;
            pos += take as u64;
        }
        Ok(written)
    }

    fn load_table(&mut self, index: u32) -> Result<()> {
        if self.table_slot.index == index {
            trace!("table page {} cache hit", index);
            return Ok(());
        }

        let raw = self.read_raw(index)?;
        let (page, stored) = Page::decrypt_table(&raw, index, self.key);
        let actual = page.checksum();
        if actual != stored {
            warn!(
                "table page {} failed checksum: expected {:#010x}, got {:#010x}",
                index, stored, actual
            );
            return Err(VfsError::ChecksumMismatch {
                page: index,
                expected: stored,
                actual,
            });
        }

        debug!("table page {} cached", index);
        self.table_slot = Slot { index, page };
        Ok(())
    }

    fn read_raw(&mut self, index: u32) -> Result<[u8; PAGE_SIZE]> {
        self.inner
            .seek(SeekFrom::Start(index as u64 * PAGE_SIZE as u64))?;
        let mut raw = [0u8; PAGE_SIZE];
        self.inner.read_exact(&mut raw)?;
        Ok(raw)
    }
}
