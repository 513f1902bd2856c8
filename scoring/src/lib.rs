pub mod aggregator;
pub mod analyzers;
pub mod clock;
pub mod error;
pub mod executable_utils;
pub mod model;
pub mod pattern_store;
pub mod processor;
pub mod providers;
pub mod rules;
pub mod storage;
