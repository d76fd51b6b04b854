pub mod middleware;

pub use middleware::{Claims, JwtSecret};
