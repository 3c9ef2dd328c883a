//! Product aggregate: `absent -> active -> deleted`, terminal on delete.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{Aggregate, DomainEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductStatus {
    Absent,
    Active,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductState {
    pub id: Uuid,
    pub version: i64,
    pub status: ProductStatus,
    pub name: String,
    pub price: i64,
    pub category_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub enum ProductCommand {
    Create { name: String, price: i64, category_id: Option<Uuid> },
    Update { name: Option<String>, category_id: Option<Uuid> },
    ChangePrice { new_price: i64 },
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductCreated { name: String, price: i64, category_id: Option<Uuid> },
    ProductUpdated { name: Option<String>, category_id: Option<Uuid> },
    ProductPriceChanged { old_price: i64, new_price: i64 },
    ProductDeleted,
}

impl DomainEvent for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductCreated { .. } => "ProductCreated",
            ProductEvent::ProductUpdated { .. } => "ProductUpdated",
            ProductEvent::ProductPriceChanged { .. } => "ProductPriceChanged",
            ProductEvent::ProductDeleted => "ProductDeleted",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProductError {
    #[error("product {0} already exists")]
    AlreadyExists(Uuid),
    #[error("product {0} does not exist")]
    NotFound(Uuid),
    #[error("product {0} has been deleted")]
    Deleted(Uuid),
    #[error("price must be positive, got {0}")]
    InvalidPrice(i64),
    #[error("name must not be empty")]
    EmptyName,
}

impl Aggregate for ProductState {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = ProductError;

    fn aggregate_type() -> &'static str {
        "Product"
    }

    fn empty(id: Uuid) -> Self {
        Self {
            id,
            version: 0,
            status: ProductStatus::Absent,
            name: String::new(),
            price: 0,
            category_id: None,
        }
    }

    fn id(&self) -> Uuid {
        self.id
    }

    fn version(&self) -> i64 {
        self.version
    }

    fn execute(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match (self.status, command) {
            (ProductStatus::Absent, ProductCommand::Create { name, price, category_id }) => {
                if name.trim().is_empty() {
                    return Err(ProductError::EmptyName);
                }
                if *price <= 0 {
                    return Err(ProductError::InvalidPrice(*price));
                }
                Ok(vec![ProductEvent::ProductCreated {
                    name: name.clone(),
                    price: *price,
                    category_id: *category_id,
                }])
            }
            (ProductStatus::Active, ProductCommand::Create { .. }) => Err(ProductError::AlreadyExists(self.id)),
            (ProductStatus::Absent, _) => Err(ProductError::NotFound(self.id)),
            (ProductStatus::Deleted, _) => Err(ProductError::Deleted(self.id)),

            (ProductStatus::Active, ProductCommand::Update { name, category_id }) => {
                if name.is_none() && category_id.is_none() {
                    return Ok(vec![]);
                }
                if let Some(n) = name {
                    if n.trim().is_empty() {
                        return Err(ProductError::EmptyName);
                    }
                }
                Ok(vec![ProductEvent::ProductUpdated {
                    name: name.clone(),
                    category_id: *category_id,
                }])
            }
            (ProductStatus::Active, ProductCommand::ChangePrice { new_price }) => {
                if *new_price <= 0 {
                    return Err(ProductError::InvalidPrice(*new_price));
                }
                if *new_price == self.price {
                    return Ok(vec![]);
                }
                Ok(vec![ProductEvent::ProductPriceChanged {
                    old_price: self.price,
                    new_price: *new_price,
                }])
            }
            (ProductStatus::Active, ProductCommand::Delete) => Ok(vec![ProductEvent::ProductDeleted]),
        }
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductCreated { name, price, category_id } => {
                self.status = ProductStatus::Active;
                self.name = name.clone();
                self.price = *price;
                self.category_id = *category_id;
            }
            ProductEvent::ProductUpdated { name, category_id } => {
                if let Some(n) = name {
                    self.name = n.clone();
                }
                if let Some(c) = category_id {
                    self.category_id = Some(*c);
                }
            }
            ProductEvent::ProductPriceChanged { new_price, .. } => {
                self.price = *new_price;
            }
            ProductEvent::ProductDeleted => {
                self.status = ProductStatus::Deleted;
            }
        }
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_change_price_is_two_versions() {
        let mut product = ProductState::empty(Uuid::new_v4());
        let events = product
            .execute(&ProductCommand::Create { name: "Widget".into(), price: 1000, category_id: None })
            .unwrap();
        for e in &events {
            product.apply(e);
        }
        assert_eq!(product.version, 1);

        let events = product.execute(&ProductCommand::ChangePrice { new_price: 1200 }).unwrap();
        assert_eq!(events.len(), 1);
        for e in &events {
            product.apply(e);
        }
        assert_eq!(product.version, 2);
        assert_eq!(product.price, 1200);
    }

    #[test]
    fn no_op_update_produces_no_events() {
        let mut product = ProductState::empty(Uuid::new_v4());
        for e in product.execute(&ProductCommand::Create { name: "Widget".into(), price: 1000, category_id: None }).unwrap() {
            product.apply(&e);
        }
        let events = product.execute(&ProductCommand::Update { name: None, category_id: None }).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn commands_after_delete_fail() {
        let mut product = ProductState::empty(Uuid::new_v4());
        for e in product.execute(&ProductCommand::Create { name: "Widget".into(), price: 1000, category_id: None }).unwrap() {
            product.apply(&e);
        }
        for e in product.execute(&ProductCommand::Delete).unwrap() {
            product.apply(&e);
        }
        let result = product.execute(&ProductCommand::ChangePrice { new_price: 500 });
        assert!(matches!(result, Err(ProductError::Deleted(_))));
    }

    #[test]
    fn negative_price_rejected() {
        let product = ProductState::empty(Uuid::new_v4());
        let result = product.execute(&ProductCommand::Create { name: "Widget".into(), price: -1, category_id: None });
        assert!(matches!(result, Err(ProductError::InvalidPrice(-1))));
    }
}
