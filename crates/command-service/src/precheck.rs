//! Cross-aggregate pre-checks: facts a pure `Aggregate::execute` cannot see
//! for itself. The command handler already resolves the *structural* facts
//! a command needs (`parent_path`, `is_descendant`, `has_children`) into its
//! fields before dispatch; this pre-check only guards the one invariant that
//! isn't naturally expressed as a command field — sibling name uniqueness.

use aggregate_runtime::{CategoryCommand, CategoryState, PreCheck};
use async_trait::async_trait;
use cqrs_core::{CqrsError, CqrsResult};
use projection_engine::QueryApi;
use std::sync::Arc;
use uuid::Uuid;

pub struct CategoryPreCheck {
    queries: Arc<QueryApi>,
}

impl CategoryPreCheck {
    pub fn new(queries: Arc<QueryApi>) -> Self {
        Self { queries }
    }
}

#[async_trait]
impl PreCheck<CategoryState> for CategoryPreCheck {
    async fn check(&self, _aggregate_id: Uuid, command: &CategoryCommand) -> CqrsResult<()> {
        match command {
            CategoryCommand::Create { name, parent_id, .. } => {
                if self.queries.find_category_by_parent_and_name(*parent_id, name)?.is_some() {
                    return Err(CqrsError::domain("Category", format!("a category named '{name}' already exists under this parent")));
                }
            }
            CategoryCommand::Update { name: Some(name), move_to } => {
                let parent_id = move_to.as_ref().map(|m| m.parent_id).unwrap_or(None);
                if let Some(existing) = self.queries.find_category_by_parent_and_name(parent_id, name)? {
                    if existing.id != _aggregate_id {
                        return Err(CqrsError::domain("Category", format!("a category named '{name}' already exists under this parent")));
                    }
                }
            }
            CategoryCommand::Update { .. } | CategoryCommand::Delete { .. } => {}
        }
        Ok(())
    }
}
