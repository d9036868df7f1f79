pub mod discovery;
pub mod registry;

pub use discovery::Scanner;
pub use registry::Registry;
