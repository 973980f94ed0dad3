mod envelope;
mod receipt;
mod result;

pub use envelope::*;
pub use receipt::*;
pub use result::*;
