// Concrete adapters for the external collaborators
pub mod http;

pub use http::*;
