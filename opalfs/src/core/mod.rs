// Sub-modules
pub mod codec;
pub mod error;
pub mod utils;

// Error types
pub use error::*;

// Utilities
pub use utils::path_utils::*;
pub use utils::time_utils::*;
