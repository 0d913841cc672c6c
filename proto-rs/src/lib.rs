pub mod entry;
pub mod request;
pub mod response;

pub use entry::{decode_entry, encode_entry, CachedEntry};
pub use request::{Destination, Method, Request, RequestKey};
pub use response::{Response, ResponseType};
