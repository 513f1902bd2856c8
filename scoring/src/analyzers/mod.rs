pub mod behavioral;
pub mod context;
pub mod keyword;
pub mod retry;
pub mod transaction;

pub use behavioral::*;
pub use context::*;
pub use keyword::*;
pub use retry::*;
pub use transaction::*;
