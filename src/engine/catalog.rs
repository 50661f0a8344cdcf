//! Table directory operations on the master page.
//!
//! Page 0 holds the directory: after the 12-byte header (magic, total
//! pages, table count) come `table_count` fixed 40-byte entries, each
//! a null-padded 32-byte name followed by the table's first and last
//! data page ids. All lookups are linear scans; the directory caps
//! out at 102 tables, which keeps that acceptable.

use super::storage::{self, Pager, PAGE_SIZE};
use super::EngineError;

/// Byte offset of the first directory entry on page 0.
pub const DIRECTORY_OFFSET: usize = 12;

/// Size of one directory entry: 32-byte name + first page + last page.
pub const ENTRY_SIZE: usize = 40;

/// Maximum length of a table name in bytes.
pub const NAME_SIZE: usize = 32;

/// Maximum number of tables the directory can hold.
pub const MAX_TABLES: usize = (PAGE_SIZE - DIRECTORY_OFFSET) / ENTRY_SIZE;

/// A located directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableEntry {
    /// Position of the entry within the directory (0-based).
    pub slot: usize,
    /// Byte offset of the entry on page 0.
    pub offset: usize,
    /// First data page of the table's chain.
    pub first_page: u32,
    /// Last data page of the table's chain.
    pub last_page: u32,
}

fn entry_name(page0: &[u8], offset: usize) -> String {
    let raw = &page0[offset..offset + NAME_SIZE];
    String::from_utf8_lossy(raw)
        .trim_end_matches('\0')
        .to_string()
}

/// Looks up a table by name with a linear scan of the directory.
pub fn find_table(pager: &mut Pager, name: &str) -> Result<Option<TableEntry>, EngineError> {
    let page0 = pager.read_page(0)?;
    let table_count = storage::read_u32(&page0, 8) as usize;

    let mut offset = DIRECTORY_OFFSET;
    for slot in 0..table_count {
        if entry_name(&page0, offset) == name {
            return Ok(Some(TableEntry {
                slot,
                offset,
                first_page: storage::read_u32(&page0, offset + NAME_SIZE),
                last_page: storage::read_u32(&page0, offset + NAME_SIZE + 4),
            }));
        }
        offset += ENTRY_SIZE;
    }
    Ok(None)
}

/// Returns all table names in directory order.
pub fn list_tables(pager: &mut Pager) -> Result<Vec<String>, EngineError> {
    let page0 = pager.read_page(0)?;
    let table_count = storage::read_u32(&page0, 8) as usize;

    let mut tables = Vec::with_capacity(table_count);
    let mut offset = DIRECTORY_OFFSET;
    for _ in 0..table_count {
        tables.push(entry_name(&page0, offset));
        offset += ENTRY_SIZE;
    }
    Ok(tables)
}

/// Creates a table: allocates one empty data page and appends a
/// directory entry pointing at it as both first and last page.
///
/// Creating a table that already exists is reported as a benign
/// success message rather than an error.
pub fn create_table(pager: &mut Pager, name: &str) -> Result<String, EngineError> {
    if name.is_empty() {
        return Err(EngineError::Invalid(
            "nama kebun tidak boleh kosong".to_string(),
        ));
    }
    if name.len() > NAME_SIZE {
        return Err(EngineError::Invalid(format!(
            "nama kebun maksimal {NAME_SIZE} karakter"
        )));
    }

    if find_table(pager, name)?.is_some() {
        return Ok(format!("Kebun '{name}' sudah ada."));
    }

    let page0 = pager.read_page(0)?;
    let table_count = storage::read_u32(&page0, 8) as usize;
    let offset = DIRECTORY_OFFSET + table_count * ENTRY_SIZE;
    if offset + ENTRY_SIZE > PAGE_SIZE {
        return Err(EngineError::Full("lahan penuh (page 0 full)".to_string()));
    }

    // Allocate before touching the directory; alloc_page rewrites the
    // total-page counter on page 0, so the directory edit must work on
    // a fresh copy of the page.
    let new_page_id = pager.alloc_page()?;
    let mut page0 = pager.read_page(0)?;

    page0[offset..offset + ENTRY_SIZE].fill(0);
    page0[offset..offset + name.len()].copy_from_slice(name.as_bytes());
    storage::write_u32(&mut page0, offset + NAME_SIZE, new_page_id);
    storage::write_u32(&mut page0, offset + NAME_SIZE + 4, new_page_id);
    storage::write_u32(&mut page0, 8, table_count as u32 + 1);

    pager.write_page(0, &page0)?;
    Ok(format!("Kebun '{name}' telah dibuka."))
}

/// Drops a table by swapping the last directory entry into its slot.
///
/// The table's heap pages are orphaned, not reclaimed; the file only
/// ever grows. Dropping a missing table is a benign success message.
pub fn drop_table(pager: &mut Pager, name: &str) -> Result<String, EngineError> {
    let entry = match find_table(pager, name)? {
        Some(entry) => entry,
        None => return Ok(format!("Kebun '{name}' tidak ditemukan.")),
    };

    let mut page0 = pager.read_page(0)?;
    let table_count = storage::read_u32(&page0, 8) as usize;
    let last_offset = DIRECTORY_OFFSET + (table_count - 1) * ENTRY_SIZE;

    if entry.slot < table_count - 1 {
        let last: [u8; ENTRY_SIZE] = page0[last_offset..last_offset + ENTRY_SIZE]
            .try_into()
            .expect("directory entry is 40 bytes");
        page0[entry.offset..entry.offset + ENTRY_SIZE].copy_from_slice(&last);
    }
    page0[last_offset..last_offset + ENTRY_SIZE].fill(0);
    storage::write_u32(&mut page0, 8, table_count as u32 - 1);

    pager.write_page(0, &page0)?;
    Ok(format!("Kebun '{name}' telah dibakar (drop)."))
}

/// Patches the last-page id of a table's directory entry in place.
/// Used when an insert overflows into a freshly allocated page.
pub fn update_last_page(
    pager: &mut Pager,
    name: &str,
    new_last_page: u32,
) -> Result<(), EngineError> {
    let entry = find_table(pager, name)?.ok_or_else(|| {
        EngineError::Internal(format!("tabel '{name}' hilang saat update last page"))
    })?;

    let mut page0 = pager.read_page(0)?;
    storage::write_u32(&mut page0, entry.offset + NAME_SIZE + 4, new_last_page);
    pager.write_page(0, &page0)
}
