use std::borrow::Cow;
use std::cell::RefCell;
use std::io::{self, Read, Seek};
use std::rc::Weak;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{Result, VfsError};
use crate::fat::{EntryType, FatEntry};
use crate::page::{PAGE_SIZE, TABLE_SPAN};
use crate::pager::PagedReader;

/// Maps a logical page of a file payload onto the container page holding
/// it. Payloads occupy consecutive *data* pages only: the physical address
/// space is punctuated by a table page every `TABLE_SPAN` pages, and those
/// indices are skipped when advancing.
///
/// `start` comes straight out of a directory record, so nothing guarantees
/// the mapping stays inside the u32 page space; `None` means the record
/// points past it.
pub(crate) fn physical_page(start: u32, logical: u32) -> Option<u32> {
    let slot = start % TABLE_SPAN;
    let first_span = TABLE_SPAN - slot;
    if logical < first_span {
        return start.checked_add(logical);
    }
    let rest = logical - first_span;
    let spans = rest / (TABLE_SPAN - 1);
    let slot_in_span = rest % (TABLE_SPAN - 1);
    spans
        .checked_add(1)?
        .checked_mul(TABLE_SPAN)?
        .checked_add(start - slot)?
        .checked_add(1 + slot_in_span)
}

/// A read cursor over one file or folder payload.
///
/// The entry holds an immutable snapshot of its directory record plus a
/// weak handle to the reader it came from. Dropping the file system
/// invalidates the entry: reads then fail with [`VfsError::Closed`].
pub struct VirtualFileEntry<R> {
    fat: FatEntry,
    pos: u64,
    pager: Weak<RefCell<PagedReader<R>>>,
}

impl<R: Read + Seek> VirtualFileEntry<R> {
    pub(crate) fn new(fat: FatEntry, pager: Weak<RefCell<PagedReader<R>>>) -> Self {
        VirtualFileEntry {
            fat,
            pos: 0,
            pager,
        }
    }

    pub fn name(&self) -> Cow<'_, str> {
        self.fat.name()
    }

    pub fn entry_type(&self) -> EntryType {
        self.fat.entry_type()
    }

    pub fn size(&self) -> u64 {
        self.fat.size as u64
    }

    /// Starting data page of the payload.
    pub fn page_index(&self) -> u32 {
        self.fat.page_index
    }

    /// The raw flags word, unmodified. Only bit 0 is interpreted by this
    /// crate.
    pub fn flags(&self) -> u32 {
        self.fat.flags
    }

    /// Modification time as Unix seconds.
    pub fn timestamp(&self) -> i64 {
        self.fat.unix_timestamp()
    }

    /// Modification time as a raw Windows FILETIME.
    pub fn filetime(&self) -> u64 {
        self.fat.timestamp
    }

    /// The opaque trailing record field, unmodified.
    pub fn unknown_b(&self) -> u64 {
        self.fat.unknown_b
    }

    pub fn tell(&self) -> u64 {
        self.pos
    }

    /// Positions the cursor. Seeking past the end of the payload fails;
    /// seeking exactly to the end is allowed and makes the next read
    /// return 0.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        if offset > self.size() {
            return Err(VfsError::OutOfRange(offset));
        }
        self.pos = offset;
        Ok(())
    }

    /// Reads from the cursor, clamping at the payload end. Returns the
    /// number of bytes copied, 0 once the cursor sits at the end.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let pager = self.pager.upgrade().ok_or(VfsError::Closed)?;
        let mut pager = pager.borrow_mut();

        let size = self.size();
        if self.pos >= size {
            return Ok(0);
        }
        let end = size.min(self.pos + buf.len() as u64);

        let mut written = 0;
        while self.pos < end {
            let logical = (self.pos / PAGE_SIZE as u64) as u32;
            let in_page = (self.pos % PAGE_SIZE as u64) as usize;
            let take = ((PAGE_SIZE - in_page) as u64).min(end - self.pos) as usize;

            let index = physical_page(self.fat.page_index, logical)
                .ok_or(VfsError::OutOfRange(self.pos))?;
            let page = pager.fetch_page(index)?;
            buf[written..written + take].copy_from_slice(&page.bytes()[in_page..in_page + take]);

            written += take;
            self.pos += take as u64;
        }
        Ok(written)
    }

    /// Like [`read`](Self::read) but a short count is an error.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let n = self.read(buf)?;
        if n != buf.len() {
            return Err(VfsError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "entry payload ended early",
            )));
        }
        Ok(())
    }

    /// Reads everything from the cursor to the payload end.
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; (self.size() - self.pos) as usize];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;
        Ok(LittleEndian::read_u16(&buf))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;
        Ok(LittleEndian::read_u32(&buf))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_exact(&mut buf)?;
        Ok(LittleEndian::read_u64(&buf))
    }
}

impl<R: Read + Seek> Read for VirtualFileEntry<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        VirtualFileEntry::read(self, buf).map_err(io::Error::other)
    }
}

impl<R: Read + Seek> Seek for VirtualFileEntry<R> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let target = match pos {
            io::SeekFrom::Start(offset) => i64::try_from(offset).ok(),
            io::SeekFrom::End(delta) => (self.size() as i64).checked_add(delta),
            io::SeekFrom::Current(delta) => (self.pos as i64).checked_add(delta),
        };
        let target = match target {
            Some(target) if target >= 0 => target as u64,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "seek outside entry bounds",
                ));
            }
        };
        VirtualFileEntry::seek(self, target).map_err(io::Error::other)?;
        Ok(self.pos)
    }
}


#[cfg(test)]
mod test_entry_read {
    use super::*;
    use crate::testutil::{BlockBuilder, ContainerBuilder};
    use crate::vfs::VirtualFileSystem;

    // One file `data` of the given payload, rooted at page 2
    fn file_container(payload: &[u8]) -> VirtualFileSystem<std::io::Cursor<Vec<u8>>> {
        let mut builder = ContainerBuilder::new();
        builder.add_page(&[]);
        builder.add_page(&[]);
        let start = builder.add_stream(payload);

        let mut root = BlockBuilder::new();
        root.file("data", start, payload.len() as u32);
        builder.set_page(2, &root.finish());

        VirtualFileSystem::from_reader(builder.build()).unwrap()
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8).collect()
    }

    #[test]
    fn read_across_page_boundary() {
        let payload = pattern(5000);
        let vfs = file_container(&payload);
        let mut entry = vfs.entry("data").unwrap();

        let mut first = vec![0u8; 4096];
        assert_eq!(entry.read(&mut first).unwrap(), 4096);
        assert_eq!(&first[..], &payload[..4096]);

        let mut rest = vec![0u8; 4096];
        assert_eq!(entry.read(&mut rest).unwrap(), 904);
        assert_eq!(&rest[..904], &payload[4096..]);

        assert_eq!(entry.read(&mut rest).unwrap(), 0);
    }

    #[test]
    fn seek_and_tell() {
        let payload = pattern(5000);
        let vfs = file_container(&payload);
        let mut entry = vfs.entry("data").unwrap();

        entry.seek(4096).unwrap();
        assert_eq!(entry.tell(), 4096);

        let mut buf = vec![0u8; 904];
        entry.read_exact(&mut buf).unwrap();
        assert_eq!(&buf[..], &payload[4096..]);

        // Seeking to the exact end is fine, past it is not
        entry.seek(5000).unwrap();
        assert_eq!(entry.read(&mut buf).unwrap(), 0);
        assert!(matches!(entry.seek(5001), Err(VfsError::OutOfRange(5001))));
    }

    #[test]
    fn seeked_read_matches_fresh_traversal() {
        let payload = pattern(10_000);
        let vfs = file_container(&payload);

        let mut fresh = vfs.entry("data").unwrap();
        let all = fresh.read_to_vec().unwrap();

        let mut seeked = vfs.entry("data").unwrap();
        seeked.seek(6123).unwrap();
        let tail = seeked.read_to_vec().unwrap();

        assert_eq!(all, payload);
        assert_eq!(&tail[..], &all[6123..]);
    }

    #[test]
    fn payload_spans_the_table_page() {
        // 513 pages of payload starting at page 1: physical pages
        // 1..=511, then 513 onward, with the table page at 512 skipped
        let mut payload = Vec::new();
        for logical in 0..513u32 {
            let mut chunk = vec![0u8; PAGE_SIZE];
            LittleEndian::write_u32(&mut chunk, logical);
            payload.extend_from_slice(&chunk);
        }

        let mut builder = ContainerBuilder::new();
        let start = builder.add_stream(&payload);
        assert_eq!(start, 1);

        let vfs = VirtualFileSystem::from_reader(builder.build()).unwrap();
        let entry = FatEntry::parse(&{
            let mut block = BlockBuilder::new();
            block.file("big", start, payload.len() as u32);
            block.finish()[..64].to_vec()
        });
        let mut entry = vfs.make_entry(entry);

        // Byte 4096*511 of the payload is byte 0 of physical page 513
        entry.seek(511 * PAGE_SIZE as u64).unwrap();
        assert_eq!(entry.read_u32().unwrap(), 511);

        let mut raw = [0u8; 4];
        vfs.read(513 * PAGE_SIZE as u64, &mut raw).unwrap();
        assert_eq!(LittleEndian::read_u32(&raw), 511);

        entry.seek(512 * PAGE_SIZE as u64).unwrap();
        assert_eq!(entry.read_u32().unwrap(), 512);
    }

    #[test]
    fn typed_reads() {
        let mut payload = Vec::new();
        payload.push(0xAAu8);
        payload.extend_from_slice(&0xBBCCu16.to_le_bytes());
        payload.extend_from_slice(&0xDDEE_FF00u32.to_le_bytes());
        payload.extend_from_slice(&0x0102_0304_0506_0708u64.to_le_bytes());

        let vfs = file_container(&payload);
        let mut entry = vfs.entry("data").unwrap();

        assert_eq!(entry.read_u8().unwrap(), 0xAA);
        assert_eq!(entry.read_u16().unwrap(), 0xBBCC);
        assert_eq!(entry.read_u32().unwrap(), 0xDDEE_FF00);
        assert_eq!(entry.read_u64().unwrap(), 0x0102_0304_0506_0708);
        assert!(matches!(entry.read_u8(), Err(VfsError::Io(_))));
    }

    #[test]
    fn forged_start_page_errors_instead_of_wrapping() {
        let payload = pattern(100);
        let vfs = file_container(&payload);

        // A checksum-valid container can still carry a record pointing
        // anywhere; reads through it must error, never remap
        let mut block = BlockBuilder::new();
        block.file("forged", u32::MAX, 8192);
        let fat = FatEntry::parse(&block.finish()[..64]);
        let mut entry = vfs.make_entry(fat);

        let mut buf = [0u8; 16];
        assert!(matches!(
            entry.read(&mut buf),
            Err(VfsError::OutOfRange(_))
        ));

        entry.seek(4096).unwrap();
        assert!(matches!(
            entry.read(&mut buf),
            Err(VfsError::OutOfRange(_))
        ));
    }

    #[test]
    fn entry_outliving_its_vfs_fails_closed() {
        let payload = pattern(100);
        let vfs = file_container(&payload);
        let mut entry = vfs.entry("data").unwrap();
        drop(vfs);

        let mut buf = [0u8; 10];
        assert!(matches!(entry.read(&mut buf), Err(VfsError::Closed)));
    }

    #[test]
    fn std_read_and_seek_interop() {
        let payload = pattern(3000);
        let vfs = file_container(&payload);
        let mut entry = vfs.entry("data").unwrap();

        Seek::seek(&mut entry, io::SeekFrom::End(-1000)).unwrap();
        let mut out = Vec::new();
        entry.read_to_end(&mut out).unwrap();
        assert_eq!(&out[..], &payload[2000..]);

        assert!(Seek::seek(&mut entry, io::SeekFrom::Current(1)).is_err());
        assert!(Seek::seek(&mut entry, io::SeekFrom::Current(i64::MAX)).is_err());
        assert!(Seek::seek(&mut entry, io::SeekFrom::End(i64::MAX)).is_err());
        assert!(Seek::seek(&mut entry, io::SeekFrom::Start(u64::MAX)).is_err());
    }
}
