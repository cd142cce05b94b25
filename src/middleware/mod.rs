pub mod guard;
pub mod response;
pub mod session;

pub use guard::{guard_middleware, route_action};
pub use response::{ApiResponse, ApiResult};
pub use session::{session_middleware, CurrentSession};
