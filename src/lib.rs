pub mod catalog;
pub mod executor;
pub mod fetch;
pub mod model;
pub mod repository;
pub mod traits;

// Re-export common types for convenience
pub use catalog::*;
pub use executor::*;
pub use model::*;
pub use repository::*;
pub use traits::*;
