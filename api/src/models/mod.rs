pub mod post;
pub mod user;

pub use post::{Location, Post};
pub use user::User;
