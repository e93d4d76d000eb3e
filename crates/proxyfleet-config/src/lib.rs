pub mod credentials;
pub mod error;
pub mod settings;

pub use credentials::*;
pub use error::*;
pub use settings::*;
