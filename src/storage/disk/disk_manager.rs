use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::page::HEADER_PAGE_ID;

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager is responsible for the actual disk I/O operations: reading
/// and writing fixed-size pages by page id, and allocating new pages with
/// monotonically increasing ids.
pub struct DiskManager {
    db_file: Mutex<File>,
}

impl DiskManager {
    /// Open or create the database file. A fresh file gets page 0 reserved
    /// for the index header directory.
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        let disk = Self {
            db_file: Mutex::new(file),
        };

        if disk.num_pages()? == 0 {
            let reserved = disk.allocate_page()?;
            debug_assert_eq!(reserved, HEADER_PAGE_ID);
        }

        Ok(disk)
    }

    /// Read a page from disk. Offsets beyond the end of the file yield a
    /// zeroed page, so freshly allocated pages read back as empty.
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = page_offset(page_id);
        let mut file = self.db_file.lock();

        let file_size = file.metadata()?.len();
        if offset >= file_size {
            page.data.fill(0);
            page.page_id = page_id;
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut page.data)?;
        page.page_id = page_id;

        Ok(())
    }

    /// Write a page through to disk.
    pub fn write_page(&self, page: &Page) -> Result<(), DiskManagerError> {
        if page.page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = page_offset(page.page_id);
        let mut file = self.db_file.lock();

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&page.data)?;
        file.flush()?;

        Ok(())
    }

    /// Allocate a new page on disk and return its id. Ids increase
    /// monotonically with the file length.
    pub fn allocate_page(&self) -> Result<PageId, DiskManagerError> {
        let mut file = self.db_file.lock();

        let file_size = file.metadata()?.len();
        let new_page_id = (file_size / PAGE_SIZE as u64) as PageId;

        file.seek(SeekFrom::End(0))?;
        let zeros = [0u8; PAGE_SIZE];
        file.write_all(&zeros)?;
        file.flush()?;

        Ok(new_page_id)
    }

    /// Number of pages currently allocated in the file.
    pub fn num_pages(&self) -> Result<u64, DiskManagerError> {
        let file = self.db_file.lock();
        Ok(file.metadata()?.len() / PAGE_SIZE as u64)
    }
}

fn page_offset(page_id: PageId) -> u64 {
    page_id as u64 * PAGE_SIZE as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_reserves_header_page() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();
        assert_eq!(disk.num_pages().unwrap(), 1);

        // The next allocation comes after the reserved header page.
        assert_eq!(disk.allocate_page().unwrap(), 1);
    }

    #[test]
    fn test_write_read_round_trip() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let page_id = disk.allocate_page().unwrap();
        let mut page = Page::new(page_id);
        page.data[0..4].copy_from_slice(&[1, 2, 3, 4]);
        disk.write_page(&page).unwrap();

        let mut read_back = Page::new(INVALID_PAGE_ID);
        disk.read_page(page_id, &mut read_back).unwrap();
        assert_eq!(read_back.page_id, page_id);
        assert_eq!(&read_back.data[0..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_read_past_eof_is_zeroed() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let mut page = Page::new(INVALID_PAGE_ID);
        page.data[10] = 0xFF;
        disk.read_page(42, &mut page).unwrap();
        assert_eq!(page.page_id, 42);
        assert!(page.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_invalid_page_id_rejected() {
        let file = NamedTempFile::new().unwrap();
        let disk = DiskManager::new(file.path()).unwrap();

        let mut page = Page::new(INVALID_PAGE_ID);
        assert!(disk.read_page(INVALID_PAGE_ID, &mut page).is_err());
        assert!(disk.write_page(&page).is_err());
    }
}
