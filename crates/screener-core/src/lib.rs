pub mod criterion;
pub mod error;
pub mod traits;
pub mod types;

pub use criterion::*;
pub use error::*;
pub use traits::*;
pub use types::*;
