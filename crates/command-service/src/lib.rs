//! Command Service: validates, pre-checks, and dispatches commands against
//! the Product/Category/Order aggregates, and starts/drives the order
//! fulfillment saga. Owns no HTTP surface — that transport binding is out of
//! scope here; callers embed [`CommandService`] directly.

pub mod external;
pub mod precheck;
pub mod service;

pub use external::{AlwaysSucceedsCollaborator, CommandServiceDispatcher, ExternalCollaborator};
pub use precheck::CategoryPreCheck;
pub use service::CommandService;
