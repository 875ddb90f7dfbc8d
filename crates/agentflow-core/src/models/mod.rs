pub mod agent;
pub mod instance;
pub mod template;

pub use agent::*;
pub use instance::*;
pub use template::*;
