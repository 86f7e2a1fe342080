pub mod battery;
pub mod request;
pub mod result;

pub use battery::*;
pub use request::*;
pub use result::*;
