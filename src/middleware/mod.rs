pub mod logging;
pub mod rate_limit;

pub use logging::*;
pub use rate_limit::*;
