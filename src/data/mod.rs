// Data module
// Dataset availability probes, train/validation materialization and JSONL tables

mod service;
pub mod table;

pub use service::{
    sample_rows, split_rows, DatasetService, DatasetSplit, LocalDatasetService, SplitConfig,
    SAMPLE_DATASET,
};
