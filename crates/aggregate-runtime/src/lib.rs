//! Aggregate contract, the three domain aggregates (Product, Category, Order),
//! and the command bus that drives them through the per-command protocol.

pub mod aggregate;
pub mod category;
pub mod command_bus;
pub mod idempotency;
pub mod order;
pub mod product;

pub use aggregate::{domain_error, Aggregate, AggregateRepository, DomainEvent};
pub use category::{CategoryCommand, CategoryError, CategoryEvent, CategoryState, CategoryStatus, MoveTarget};
pub use command_bus::{CommandBus, NoPreCheck, PreCheck};
pub use idempotency::{CommandOutcome, IdempotencyCache};
pub use order::{OrderCommand, OrderError, OrderEvent, OrderLineItem, OrderState, OrderStatus, OrderTotals};
pub use product::{ProductCommand, ProductError, ProductEvent, ProductState, ProductStatus};
