pub mod health;
pub mod media;
pub mod post;
pub mod search;
pub mod user;

pub use health::health_check;
pub use media::get_media;
pub use post::create_post;
pub use search::search_posts;
pub use user::{login, signup};
