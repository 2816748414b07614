pub mod cache;
pub mod category;
pub mod clock;
pub mod failures;
pub mod geo;
pub mod normalizer;
pub mod orchestrator;
pub mod policy;
pub mod request;
pub mod resolver;
pub mod segmenter;
pub mod summary;
pub mod transport;
pub mod units;
