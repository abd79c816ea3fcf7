pub mod cache;
pub mod cache_db;
pub mod catalog;
pub mod clock;
pub mod export;
pub mod scheduler;
pub mod screener;

pub use cache::{CacheEntry, CacheStats, ResultCache, DEFAULT_MAX_AGE_HOURS};
pub use cache_db::CacheDb;
pub use catalog::StaticCatalog;
pub use clock::{Clock, ManualClock, SystemClock};
pub use export::{export_columns, rank_results, write_csv};
pub use scheduler::{
    BatchJob, BatchSummary, CancellationFlag, FetchScheduler, ProgressCallback, SchedulerConfig,
    TickerOutcome,
};
pub use screener::{MarketScreener, ScreenOptions, ScreeningReport};
