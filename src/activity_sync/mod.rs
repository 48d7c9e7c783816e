use crate::common::cache::TtlCache;
use crate::common::connect_client::ConnectClient;
use crate::config::{ExportConfig, Pacing};
use std::path::{Path, PathBuf};

mod index;
mod listing;
mod sync;

pub use index::{ActivityIndex, INDEX_FILE, IndexEntry};
pub use listing::{ActivityLister, LIST_CACHE_KEY, PageRequest, TOTALS_CACHE_KEY, page_count, page_plan};
pub use sync::SyncReport;

pub struct ActivitySync<'a> {
    client: &'a ConnectClient,
    lister: ActivityLister<'a>,
    output_dir: PathBuf,
    pacing: Pacing,
    download_retries: u32,
}

impl<'a> ActivitySync<'a> {
    pub fn new(
        client: &'a ConnectClient,
        cache: &'a TtlCache,
        config: &ExportConfig,
        output_dir: &Path,
    ) -> Self {
        Self {
            client,
            lister: ActivityLister::new(client, cache, config.page_size, config.cache_ttl),
            output_dir: output_dir.to_path_buf(),
            pacing: config.pacing,
            download_retries: config.download_retries,
        }
    }

    pub fn lister(&self) -> &ActivityLister<'a> {
        &self.lister
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}
