pub mod requests;

pub use requests::{Credentials, SearchParams};
