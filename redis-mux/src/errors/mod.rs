mod redis_error;
mod server_error;

pub(crate) use redis_error::closed_connection_error;
pub use redis_error::*;
pub use server_error::*;
