//! Run driver: crawl, dedupe against the store, score, rank, summarize,
//! persist and deliver one digest per platform.

pub mod dedupe;
pub mod pipeline;

#[cfg(test)]
mod tests;

pub use dedupe::filter_new_posts;
pub use pipeline::{
    DeliveryOutcome, DigestPipeline, PipelineSettings, PostSource, RunReport, RUN_EVENT,
};
