// Storage seams, one trait per record family, plus the in-memory backend
pub mod activity;
pub mod context;
pub mod fraud_score;
pub mod in_memory;
pub mod keyword;
pub mod pattern;

pub use activity::*;
pub use context::*;
pub use fraud_score::*;
pub use in_memory::*;
pub use keyword::*;
pub use pattern::*;
