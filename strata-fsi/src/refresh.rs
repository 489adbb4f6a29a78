use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use strata_result::{Error, Result};
use time::OffsetDateTime;

use crate::caching_mgr::CachingForeignStorageMgr;
use crate::options::{REFRESH_TIMING_TYPE_KEY, SCHEDULE_REFRESH_TIMING_TYPE};

/// Refresh one foreign table by name. Refresh timestamps advance even when
/// the refresh surfaces a post-eviction failure, so a broken table is not
/// retried in a tight loop by the scheduler.
pub fn refresh_foreign_table(
    mgr: &CachingForeignStorageMgr,
    db_id: i32,
    table_name: &str,
    evict_cached_entries: bool,
) -> Result<()> {
    let registry = mgr.registry();
    let config = registry.get_by_name(db_id, table_name).map_err(|_| {
        Error::InvalidArgumentError(format!(
            "{table_name} is not a foreign table. Refreshes are applicable to only foreign tables."
        ))
    })?;
    let table_key = config.table_key();
    match mgr.refresh_table(&table_key, evict_cached_entries) {
        Ok(()) => {
            registry.update_refresh_times(&table_key)?;
            Ok(())
        }
        Err(Error::PostEvictionRefresh(msg)) => {
            registry.update_refresh_times(&table_key)?;
            Err(Error::PostEvictionRefresh(msg))
        }
        Err(e) => Err(e),
    }
}

/// Background driver for scheduled refreshes. Wakes periodically and
/// refreshes every registered table whose next scheduled refresh has come
/// due.
pub struct RefreshScheduler {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl RefreshScheduler {
    pub fn start(mgr: Arc<CachingForeignStorageMgr>, wait_duration: Duration) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let handle = std::thread::spawn(move || {
            while thread_running.load(Ordering::SeqCst) {
                let now = OffsetDateTime::now_utc();
                for table in mgr.registry().all_tables() {
                    let scheduled = table
                        .options
                        .get(REFRESH_TIMING_TYPE_KEY)
                        .is_some_and(|v| v == SCHEDULE_REFRESH_TIMING_TYPE);
                    if !scheduled {
                        continue;
                    }
                    let times = mgr.registry().refresh_times(&table.table_key());
                    let due = match times.next_refresh_time {
                        Some(next) => next <= now,
                        // Never refreshed yet; wait for the start time.
                        None => {
                            times.last_refresh_time.is_none()
                                && table
                                    .options
                                    .get(crate::options::REFRESH_START_DATE_TIME_KEY)
                                    .and_then(|s| crate::options::parse_datetime(s).ok())
                                    .is_some_and(|start| start <= now)
                        }
                    };
                    if !due {
                        continue;
                    }
                    if let Err(e) = refresh_foreign_table(&mgr, table.db_id, &table.name, false) {
                        tracing::error!(
                            table = %table.name,
                            error = %e,
                            "scheduled refresh failed"
                        );
                    }
                }
                std::thread::sleep(wait_duration);
            }
        });
        Self {
            running,
            handle: Some(handle),
        }
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
