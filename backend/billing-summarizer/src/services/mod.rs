pub mod attribution;
pub mod builder;
pub mod cursor;
pub mod delivery;
pub mod directory;
pub mod query_source;
pub mod scheduler;
pub mod schema_guard;
pub mod summarizer;

pub use builder::UsageSummaryBuilder;
pub use cursor::{CursorStore, PgCursorStore};
pub use delivery::{sink_from_config, DeliverySink};
pub use directory::{GrpcTenantDirectory, TenantDirectory};
pub use query_source::{ClickHouseQuerySource, MetricQuerySource};
pub use summarizer::{BillingSummarizer, SweepMode, SweepReport, WindowOutcome};
