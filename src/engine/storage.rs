use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};
use tracing::debug;

use super::buffer::PageCache;
use super::EngineError;

/// Standard database page size (4 KiB) used for all file I/O.
/// This matches common filesystem block sizes for predictable write behavior.
pub const PAGE_SIZE: usize = 4096;

/// Magic bytes at the start of page 0 identifying a database file.
pub const MAGIC: &[u8; 4] = b"WOWO";

/// Data page header layout: next-page id (u32), record count (u16),
/// free offset (u16). Records start immediately after.
pub const DATA_HEADER_SIZE: usize = 8;

/// Largest serialized record that fits in a fresh data page
/// (page size minus the header and the u16 length prefix).
pub const MAX_RECORD_SIZE: usize = PAGE_SIZE - DATA_HEADER_SIZE - 2;

/// Reads a little-endian u16 at `offset`.
pub fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

/// Writes a little-endian u16 at `offset`.
pub fn write_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

/// Reads a little-endian u32 at `offset`.
pub fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

/// Writes a little-endian u32 at `offset`.
pub fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Next-page id of a data page (0 means end of chain).
pub fn page_next(page: &[u8]) -> u32 {
    read_u32(page, 0)
}

pub fn set_page_next(page: &mut [u8], next: u32) {
    write_u32(page, 0, next);
}

/// Number of record slots stored in a data page.
pub fn page_count(page: &[u8]) -> u16 {
    read_u16(page, 4)
}

pub fn set_page_count(page: &mut [u8], count: u16) {
    write_u16(page, 4, count);
}

/// Offset of the first free byte in a data page. A fresh page starts at 8.
pub fn page_free_offset(page: &[u8]) -> u16 {
    read_u16(page, 6)
}

pub fn set_page_free_offset(page: &mut [u8], offset: u16) {
    write_u16(page, 6, offset);
}

/// Manages 4 KiB page I/O for a single database file.
///
/// The file is a dense array of pages addressed by a 32-bit page id
/// starting at 0. Page 0 holds the magic, the total page count, and
/// the table directory. Every write is flushed to stable storage
/// before returning, so a completed `write_page` means the bytes are
/// on disk.
///
/// ## Caching
/// The pager keeps a small write-through LRU cache of recently used
/// pages. Writes always hit the file and fsync before the call
/// returns; the cache only short-cuts re-reads of hot pages such as
/// page 0 and the tail page of the table being inserted into.
///
/// ## Ownership
/// A pager has exactly one owner. Callers are expected to serialize
/// access; there is no internal locking beyond the cache mutex.
#[derive(Debug)]
pub struct Pager {
    path: PathBuf,
    file: File,
    cache: PageCache,
}

impl Pager {
    /// Opens an existing database file or creates and initializes a new one.
    ///
    /// A new file gets a single master page: the magic bytes, a total
    /// page count of 1, and an empty table directory. An existing file
    /// is verified to start with the magic before it is accepted.
    pub fn open<P: Into<PathBuf>>(path: P) -> Result<Self, EngineError> {
        let path = path.into();
        let existed = path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let mut pager = Self {
            path,
            file,
            cache: PageCache::new(64),
        };

        if existed {
            let page0 = pager.read_page(0)?;
            if &page0[0..4] != MAGIC {
                return Err(EngineError::Corrupt(format!(
                    "bukan berkas SawitDB: {}",
                    pager.path.display()
                )));
            }
        } else {
            pager.init_new_file()?;
            debug!(path = %pager.path.display(), "initialized database file");
        }

        Ok(pager)
    }

    fn init_new_file(&mut self) -> Result<(), EngineError> {
        let mut page0 = vec![0u8; PAGE_SIZE];
        page0[0..4].copy_from_slice(MAGIC);
        write_u32(&mut page0, 4, 1); // total pages
        write_u32(&mut page0, 8, 0); // table count
        self.write_page(0, &page0)
    }

    /// Path of the underlying database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the 4 KiB page at `page_id`.
    ///
    /// Reading past the end of the file is an I/O error; page ids are
    /// only ever handed out by `alloc_page`, so this indicates either
    /// a caller bug or a truncated file.
    pub fn read_page(&mut self, page_id: u32) -> Result<Vec<u8>, EngineError> {
        if let Some(page) = self.cache.get(page_id) {
            return Ok(page);
        }
        let mut buf = vec![0u8; PAGE_SIZE];
        self.file
            .seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))?;
        self.file.read_exact(&mut buf)?;
        self.cache.put(page_id, buf.clone());
        Ok(buf)
    }

    /// Overwrites the page at `page_id` and flushes it to stable storage.
    ///
    /// The buffer must be exactly one page. The fsync happens before
    /// this returns, which is the durability barrier every mutation in
    /// the engine relies on.
    pub fn write_page(&mut self, page_id: u32, buf: &[u8]) -> Result<(), EngineError> {
        if buf.len() != PAGE_SIZE {
            return Err(EngineError::Internal(format!(
                "write_page butuh buffer {} byte, dapat {}",
                PAGE_SIZE,
                buf.len()
            )));
        }
        self.file
            .seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))?;
        self.file.write_all(buf)?;
        self.file.sync_all()?;
        self.cache.put(page_id, buf.to_vec());
        Ok(())
    }

    /// Allocates a fresh page at the end of the file and returns its id.
    ///
    /// The total-page counter on page 0 is incremented and written
    /// back, then the new page is written with an empty data-page
    /// header (`next = 0`, `count = 0`, `free_offset = 8`). Both
    /// writes are durable before the id is returned.
    pub fn alloc_page(&mut self) -> Result<u32, EngineError> {
        let mut page0 = self.read_page(0)?;
        let total_pages = read_u32(&page0, 4);
        let new_page_id = total_pages;

        write_u32(&mut page0, 4, total_pages + 1);
        self.write_page(0, &page0)?;

        let mut new_page = vec![0u8; PAGE_SIZE];
        set_page_next(&mut new_page, 0);
        set_page_count(&mut new_page, 0);
        set_page_free_offset(&mut new_page, DATA_HEADER_SIZE as u16);
        self.write_page(new_page_id, &new_page)?;

        Ok(new_page_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_pager() -> (tempfile::TempDir, Pager) {
        let dir = tempfile::tempdir().unwrap();
        let pager = Pager::open(dir.path().join("test.sawit")).unwrap();
        (dir, pager)
    }

    #[test]
    fn new_file_gets_master_page() {
        let (_dir, mut pager) = temp_pager();
        let page0 = pager.read_page(0).unwrap();
        assert_eq!(&page0[0..4], MAGIC);
        assert_eq!(read_u32(&page0, 4), 1); // total pages
        assert_eq!(read_u32(&page0, 8), 0); // table count
    }

    #[test]
    fn alloc_page_extends_file_and_zeroes_header() {
        let (_dir, mut pager) = temp_pager();
        let id = pager.alloc_page().unwrap();
        assert_eq!(id, 1);
        let id2 = pager.alloc_page().unwrap();
        assert_eq!(id2, 2);

        let page0 = pager.read_page(0).unwrap();
        assert_eq!(read_u32(&page0, 4), 3);

        let page = pager.read_page(1).unwrap();
        assert_eq!(page_next(&page), 0);
        assert_eq!(page_count(&page), 0);
        assert_eq!(page_free_offset(&page), 8);
    }

    #[test]
    fn total_pages_matches_file_length() {
        let (dir, mut pager) = temp_pager();
        pager.alloc_page().unwrap();
        pager.alloc_page().unwrap();
        let page0 = pager.read_page(0).unwrap();
        let total = read_u32(&page0, 4) as u64;
        let len = std::fs::metadata(dir.path().join("test.sawit"))
            .unwrap()
            .len();
        assert_eq!(len, total * PAGE_SIZE as u64);
    }

    #[test]
    fn write_page_rejects_wrong_size() {
        let (_dir, mut pager) = temp_pager();
        let err = pager.write_page(0, &[0u8; 100]).unwrap_err();
        assert!(matches!(err, EngineError::Internal(_)));
    }

    #[test]
    fn pages_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reopen.sawit");
        {
            let mut pager = Pager::open(&path).unwrap();
            let id = pager.alloc_page().unwrap();
            let mut page = pager.read_page(id).unwrap();
            page[100] = 0xAB;
            pager.write_page(id, &page).unwrap();
        }
        let mut pager = Pager::open(&path).unwrap();
        let page = pager.read_page(1).unwrap();
        assert_eq!(page[100], 0xAB);
    }

    #[test]
    fn open_rejects_foreign_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.bin");
        std::fs::write(&path, vec![0u8; PAGE_SIZE]).unwrap();
        let err = Pager::open(&path).unwrap_err();
        assert!(matches!(err, EngineError::Corrupt(_)));
    }

    #[test]
    fn read_past_eof_fails() {
        let (_dir, mut pager) = temp_pager();
        assert!(pager.read_page(99).is_err());
    }
}
