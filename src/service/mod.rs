pub mod dispatch;
pub mod extraction;
pub mod lifecycle;
pub mod matcher;
pub mod normalize;
pub mod notify;
pub mod pipeline;
pub mod pricing;
pub mod query;
pub mod review;
pub mod storage;
pub mod validation;
pub mod worker;

pub use dispatch::{Task, TaskQueue, TaskReceiver};
pub use extraction::{ExtractionClient, HttpExtractionClient};
pub use lifecycle::{DocumentLifecycle, Transition};
pub use matcher::{CatalogSnapshot, MatchSummary, MaterialMatcher, MatcherService};
pub use notify::{PipelineEvent, StatusNotifier};
pub use pipeline::Pipeline;
pub use pricing::effective_unit_price;
pub use query::{export_csv, PriceQueryService};
pub use review::ReviewService;
pub use storage::{LocalObjectStorage, ObjectStorage};
pub use validation::{ValidationPolicy, ValidationReport, Validator, Verdict};
pub use worker::Worker;
