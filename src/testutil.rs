//! Test-side container assembly: the encrypt direction of the page codec
//! plus just enough layout plumbing to synthesize valid containers in
//! memory. The published crate stays strictly read-only.

use std::io::Cursor;

use byteorder::{ByteOrder, LittleEndian};

use crate::fat::FAT_ENTRY_SIZE;
use crate::keys::KeyTable;
use crate::page::{checksum_bytes, key_mix, PAGE_SIZE, PAGE_WORDS, TABLE_SPAN};

// 2017-08-31T14:00:00Z
pub const TEST_FILETIME: u64 = 131_486_616_000_000_000;

/// Exact inverse of the page decryption: XOR, rotate left, add, with the
/// ciphertext word chaining into the next key.
pub fn encrypt_into(plain: &[u8; PAGE_SIZE], init_key: u32, table: &[u32; 256], out: &mut [u8]) {
    let mut key = init_key;
    for i in 0..PAGE_WORDS {
        let p = LittleEndian::read_u32(&plain[i * 4..]);
        let cur = key_mix(table, key);
        let word = (p ^ cur).rotate_left(cur & 0x1F).wrapping_add(cur);
        LittleEndian::write_u32(&mut out[i * 4..], word);
        key = word;
    }
}

enum PageKind {
    Table,
    Data(Box<[u8; PAGE_SIZE]>),
}

/// Assembles a container page by page. Data pages are collected in
/// plaintext; [`build`](ContainerBuilder::build) computes every checksum,
/// fills in the table pages and encrypts the lot.
pub struct ContainerBuilder {
    pages: Vec<PageKind>,
    key: KeyTable,
}

impl ContainerBuilder {
    pub fn new() -> ContainerBuilder {
        ContainerBuilder::with_key(KeyTable::User)
    }

    pub fn with_key(key: KeyTable) -> ContainerBuilder {
        ContainerBuilder {
            pages: vec![PageKind::Table],
            key,
        }
    }

    /// Appends one data page, slotting in a table placeholder whenever the
    /// next index lands on a table-page boundary. Returns the page index.
    pub fn add_page(&mut self, bytes: &[u8]) -> u32 {
        assert!(bytes.len() <= PAGE_SIZE);
        if self.pages.len() as u32 % TABLE_SPAN == 0 {
            self.pages.push(PageKind::Table);
        }

        let mut page = Box::new([0u8; PAGE_SIZE]);
        page[..bytes.len()].copy_from_slice(bytes);
        self.pages.push(PageKind::Data(page));
        (self.pages.len() - 1) as u32
    }

    /// Appends consecutive data pages holding `data`, returning the first
    /// index. Zero-length payloads still claim one page.
    pub fn add_stream(&mut self, data: &[u8]) -> u32 {
        let mut chunks = data.chunks(PAGE_SIZE);
        let first = self.add_page(chunks.next().unwrap_or(&[]));
        for chunk in chunks {
            self.add_page(chunk);
        }
        first
    }

    /// Replaces the plaintext of an already-reserved data page.
    pub fn set_page(&mut self, index: u32, bytes: &[u8]) {
        assert!(bytes.len() <= PAGE_SIZE);
        match &mut self.pages[index as usize] {
            PageKind::Data(page) => {
                page[..bytes.len()].copy_from_slice(bytes);
                page[bytes.len()..].fill(0);
            }
            PageKind::Table => panic!("page {} is a table page", index),
        }
    }

    pub fn build(self) -> Cursor<Vec<u8>> {
        let count = self.pages.len();
        let table = self.key.words();
        let mut out = vec![0u8; count * PAGE_SIZE];

        // Data checksums first: they key the data cipher and fill the
        // table slots
        let mut checksums = vec![0u32; count];
        for (index, page) in self.pages.iter().enumerate() {
            if let PageKind::Data(plain) = page {
                checksums[index] = checksum_bytes(plain);
            }
        }

        for (index, kind) in self.pages.iter().enumerate() {
            let out = &mut out[index * PAGE_SIZE..][..PAGE_SIZE];
            match kind {
                PageKind::Table => {
                    let mut plain = [0u8; PAGE_SIZE];
                    for slot in 1..TABLE_SPAN as usize {
                        let described = index + slot;
                        if described >= count {
                            break;
                        }
                        LittleEndian::write_u32(&mut plain[slot * 8..], checksums[described]);
                        LittleEndian::write_u32(&mut plain[slot * 8 + 4..], 1);
                    }
                    // Slot 0 describes the table page itself; its checksum
                    // is computed while the checksum word is still zero,
                    // then stored there
                    LittleEndian::write_u32(&mut plain[4..], 1);
                    let self_checksum = checksum_bytes(&plain);
                    LittleEndian::write_u32(&mut plain[0..], self_checksum);

                    encrypt_into(&plain, index as u32, table, out);
                }
                PageKind::Data(plain) => {
                    encrypt_into(plain, checksums[index], table, out);
                }
            }
        }

        Cursor::new(out)
    }
}

/// Accumulates 64-byte directory records into one block page.
pub struct BlockBuilder {
    records: Vec<u8>,
}

impl BlockBuilder {
    pub fn new() -> BlockBuilder {
        BlockBuilder {
            records: Vec::new(),
        }
    }

    pub fn folder(&mut self, name: &str, page_index: u32) -> &mut Self {
        self.record(0x1, name, 0x10, page_index, 0, TEST_FILETIME)
    }

    pub fn file(&mut self, name: &str, page_index: u32, size: u32) -> &mut Self {
        self.record(0x1, name, 0x80, page_index, size, TEST_FILETIME)
    }

    pub fn record(
        &mut self,
        flags: u32,
        name: &str,
        typ: u8,
        page_index: u32,
        size: u32,
        timestamp: u64,
    ) -> &mut Self {
        assert!(name.len() <= 32);

        let mut record = [0u8; FAT_ENTRY_SIZE];
        LittleEndian::write_u32(&mut record[0..], flags);
        record[4..4 + name.len()].copy_from_slice(name.as_bytes());
        record[38] = typ;
        LittleEndian::write_u32(&mut record[40..], page_index);
        LittleEndian::write_u32(&mut record[44..], size);
        LittleEndian::write_u64(&mut record[48..], timestamp);

        self.records.extend_from_slice(&record);
        self
    }

    pub fn finish(&self) -> [u8; PAGE_SIZE] {
        assert!(self.records.len() <= PAGE_SIZE);
        let mut page = [0u8; PAGE_SIZE];
        page[..self.records.len()].copy_from_slice(&self.records);
        page
    }
}
