use std::sync::Arc;
use std::sync::Once;
use anyhow::Result;
use tempfile::NamedTempFile;

use rookdb::storage::buffer::BufferPoolManager;

static INIT_LOGGER: Once = Once::new();

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager over a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(
    pool_size: usize,
    replacer_k: usize,
) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });

    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, path, replacer_k)?);
    Ok((buffer_pool, file))
}
