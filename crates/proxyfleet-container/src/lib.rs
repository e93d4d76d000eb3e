pub mod converter;
pub mod docker;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod runtime;

pub use converter::*;
pub use docker::*;
pub use error::*;
pub use runtime::*;
