use crate::common::cache::TtlCache;
use crate::common::connect_client::{ConnectClient, Totals};
use crate::common::types::{Activity, ExportResult};
use function_timer::time;
use std::time::Duration;
use tracing::{debug, info};

pub const LIST_CACHE_KEY: &str = "list_of_activities";
pub const TOTALS_CACHE_KEY: &str = "totals";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub start: u64,
    pub limit: u64,
}

/// Pages are requested from the end of the list backwards:
/// page `i` starts at `total - limit * (i + 1)`. When that goes negative the
/// page is the partial boundary page, which shrinks to `limit + start` items
/// and is requested from `start = 1`.
///
/// Page sizes always add up to `total`. With a partial boundary page the
/// request overlaps the previous page by one position, so callers must
/// tolerate the same activity appearing twice.
pub fn page_plan(total: u64, limit: u64) -> impl DoubleEndedIterator<Item = PageRequest> {
    (0..page_count(total, limit)).map(move |i| {
        let start = total as i128 - limit as i128 * (i as i128 + 1);
        if start < 0 {
            PageRequest {
                start: 1,
                limit: (limit as i128 + start) as u64,
            }
        } else {
            PageRequest {
                start: start as u64,
                limit,
            }
        }
    })
}

pub fn page_count(total: u64, limit: u64) -> u64 {
    if limit == 0 { 0 } else { total.div_ceil(limit) }
}

/// Enumerates an account's activities, caching the totals and the full
/// listing per account.
pub struct ActivityLister<'a> {
    client: &'a ConnectClient,
    cache: &'a TtlCache,
    page_size: u32,
    ttl: Duration,
}

impl<'a> ActivityLister<'a> {
    pub fn new(client: &'a ConnectClient, cache: &'a TtlCache, page_size: u32, ttl: Duration) -> Self {
        Self {
            client,
            cache,
            page_size,
            ttl,
        }
    }

    pub async fn totals(&self, account: &str) -> ExportResult<Totals> {
        if let Some(totals) = self.cache.get::<Totals>(TOTALS_CACHE_KEY, Some(account), self.ttl) {
            debug!("Using cached totals for {}", account);
            return Ok(totals);
        }

        let totals = self.client.totals(account).await?;
        self.cache.set(TOTALS_CACHE_KEY, Some(account), &totals);
        Ok(totals)
    }

    pub async fn total_activities(&self, account: &str) -> ExportResult<u64> {
        Ok(self.totals(account).await?.activities)
    }

    /// All activity summaries, in request order. Only a complete listing is
    /// cached; a failing page aborts without touching the cache.
    #[time("list_activities_duration")]
    pub async fn list_activities(&self, account: &str) -> ExportResult<Vec<Activity>> {
        if let Some(activities) =
            self.cache
                .get::<Vec<Activity>>(LIST_CACHE_KEY, Some(account), self.ttl)
        {
            info!(
                "Using cached listing of {} activities for {}",
                activities.len(),
                account
            );
            return Ok(activities);
        }

        let total = self.total_activities(account).await?;
        let limit = u64::from(self.page_size);
        info!(
            "Listing {} activities for {} in {} pages",
            total,
            account,
            page_count(total, limit)
        );

        let mut activities = Vec::new();
        for page in page_plan(total, limit) {
            debug!("Requesting start={} limit={}", page.start, page.limit);
            let batch = self
                .client
                .activity_page(account, page.start, page.limit)
                .await?;
            activities.extend(batch);
        }

        self.cache.set(LIST_CACHE_KEY, Some(account), &activities);
        Ok(activities)
    }

    /// Drop cached totals and listing so the next call goes upstream.
    pub fn invalidate(&self, account: &str) {
        self.cache.invalidate(TOTALS_CACHE_KEY, Some(account));
        self.cache.invalidate(LIST_CACHE_KEY, Some(account));
    }
}
