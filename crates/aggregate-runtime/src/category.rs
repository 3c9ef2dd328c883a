//! Category aggregate: `absent -> active -> deleted`, with a materialized
//! `path`/`depth` for O(1) hierarchy queries downstream in the read model.
//!
//! Cross-aggregate facts this pure aggregate cannot resolve itself — whether a
//! sibling with the same name already exists, whether a candidate new parent
//! is a descendant of this category, whether children or products still
//! reference it — are resolved by the command handler against the read model
//! and threaded into the command before `execute` runs.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{Aggregate, DomainEvent};

pub const MAX_CATEGORY_DEPTH: i32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CategoryStatus {
    Absent,
    Active,
    Deleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryState {
    pub id: Uuid,
    pub version: i64,
    pub status: CategoryStatus,
    pub name: String,
    pub parent_id: Option<Uuid>,
    pub path: String,
    pub depth: i32,
}

/// The resolved target of a move, supplied by the handler after consulting
/// the read model; `is_descendant` must already reflect a cycle check.
#[derive(Debug, Clone)]
pub struct MoveTarget {
    pub parent_id: Option<Uuid>,
    pub parent_path: Option<String>,
    pub parent_depth: Option<i32>,
    pub is_descendant: bool,
}

#[derive(Debug, Clone)]
pub enum CategoryCommand {
    Create {
        name: String,
        parent_id: Option<Uuid>,
        parent_path: Option<String>,
        parent_depth: Option<i32>,
    },
    Update {
        name: Option<String>,
        move_to: Option<MoveTarget>,
    },
    Delete { has_children: bool, has_products: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CategoryEvent {
    CategoryCreated { name: String, parent_id: Option<Uuid>, path: String, depth: i32 },
    CategoryUpdated { name: String },
    CategoryMoved { parent_id: Option<Uuid>, path: String, depth: i32 },
    CategoryDeleted,
}

impl DomainEvent for CategoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CategoryEvent::CategoryCreated { .. } => "CategoryCreated",
            CategoryEvent::CategoryUpdated { .. } => "CategoryUpdated",
            CategoryEvent::CategoryMoved { .. } => "CategoryMoved",
            CategoryEvent::CategoryDeleted => "CategoryDeleted",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CategoryError {
    #[error("category {0} already exists")]
    AlreadyExists(Uuid),
    #[error("category {0} does not exist")]
    NotFound(Uuid),
    #[error("category {0} has been deleted")]
    Deleted(Uuid),
    #[error("name must not be empty")]
    EmptyName,
    #[error("max_depth_exceeded: depth would be {0}, limit is {MAX_CATEGORY_DEPTH}")]
    MaxDepthExceeded(i32),
    #[error("cannot move category under its own descendant")]
    CyclicMove,
    #[error("cannot delete category {0}: it still has subcategories or referencing products")]
    NotEmpty(Uuid),
}

fn compute_path_and_depth(id: Uuid, parent_path: &Option<String>, parent_depth: &Option<i32>) -> (String, i32) {
    match parent_path {
        Some(p) => (format!("{p}/{id}"), parent_depth.unwrap_or(0) + 1),
        None => (id.to_string(), 0),
    }
}

impl Aggregate for CategoryState {
    type Command = CategoryCommand;
    type Event = CategoryEvent;
    type Error = CategoryError;

    fn aggregate_type() -> &'static str {
        "Category"
    }

    fn empty(id: Uuid) -> Self {
        Self {
            id,
            version: 0,
            status: CategoryStatus::Absent,
            name: String::new(),
            parent_id: None,
            path: String::new(),
            depth: 0,
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
            (CategoryStatus::Absent, CategoryCommand::Create { name, parent_id, parent_path, parent_depth }) => {
                if name.trim().is_empty() {
                    return Err(CategoryError::EmptyName);
                }
                let (path, depth) = compute_path_and_depth(self.id, parent_path, parent_depth);
                if depth > MAX_CATEGORY_DEPTH {
                    return Err(CategoryError::MaxDepthExceeded(depth));
                }
                Ok(vec![CategoryEvent::CategoryCreated {
                    name: name.clone(),
                    parent_id: *parent_id,
                    path,
                    depth,
                }])
            }
            (CategoryStatus::Active, CategoryCommand::Create { .. }) => Err(CategoryError::AlreadyExists(self.id)),
            (CategoryStatus::Absent, _) => Err(CategoryError::NotFound(self.id)),
            (CategoryStatus::Deleted, _) => Err(CategoryError::Deleted(self.id)),

            (CategoryStatus::Active, CategoryCommand::Update { name, move_to }) => {
                let mut events = Vec::new();

                if let Some(new_name) = name {
                    if new_name.trim().is_empty() {
                        return Err(CategoryError::EmptyName);
                    }
                    if new_name != &self.name {
                        events.push(CategoryEvent::CategoryUpdated { name: new_name.clone() });
                    }
                }

                if let Some(target) = move_to {
                    if target.is_descendant {
                        return Err(CategoryError::CyclicMove);
                    }
                    let (path, depth) = compute_path_and_depth(self.id, &target.parent_path, &target.parent_depth);
                    if depth > MAX_CATEGORY_DEPTH {
                        return Err(CategoryError::MaxDepthExceeded(depth));
                    }
                    if target.parent_id != self.parent_id {
                        events.push(CategoryEvent::CategoryMoved { parent_id: target.parent_id, path, depth });
                    }
                }

                Ok(events)
            }
            (CategoryStatus::Active, CategoryCommand::Delete { has_children, has_products }) => {
                if *has_children || *has_products {
                    return Err(CategoryError::NotEmpty(self.id));
                }
                Ok(vec![CategoryEvent::CategoryDeleted])
            }
        }
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CategoryEvent::CategoryCreated { name, parent_id, path, depth } => {
                self.status = CategoryStatus::Active;
                self.name = name.clone();
                self.parent_id = *parent_id;
                self.path = path.clone();
                self.depth = *depth;
            }
            CategoryEvent::CategoryUpdated { name } => {
                self.name = name.clone();
            }
            CategoryEvent::CategoryMoved { parent_id, path, depth } => {
                self.parent_id = *parent_id;
                self.path = path.clone();
                self.depth = *depth;
            }
            CategoryEvent::CategoryDeleted => {
                self.status = CategoryStatus::Deleted;
            }
        }
        self.version += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_category_has_depth_zero() {
        let category = CategoryState::empty(Uuid::new_v4());
        let events = category
            .execute(&CategoryCommand::Create { name: "Electronics".into(), parent_id: None, parent_path: None, parent_depth: None })
            .unwrap();
        match &events[0] {
            CategoryEvent::CategoryCreated { depth, .. } => assert_eq!(*depth, 0),
            _ => panic!("expected CategoryCreated"),
        }
    }

    #[test]
    fn depth_beyond_five_is_rejected() {
        let category = CategoryState::empty(Uuid::new_v4());
        let result = category.execute(&CategoryCommand::Create {
            name: "TooDeep".into(),
            parent_id: Some(Uuid::new_v4()),
            parent_path: Some("a/b/c/d/e".into()),
            parent_depth: Some(5),
        });
        assert!(matches!(result, Err(CategoryError::MaxDepthExceeded(6))));
    }

    #[test]
    fn move_under_own_descendant_is_rejected() {
        let mut category = CategoryState::empty(Uuid::new_v4());
        for e in category.execute(&CategoryCommand::Create { name: "Root".into(), parent_id: None, parent_path: None, parent_depth: None }).unwrap() {
            category.apply(&e);
        }
        let result = category.execute(&CategoryCommand::Update {
            name: None,
            move_to: Some(MoveTarget { parent_id: Some(Uuid::new_v4()), parent_path: None, parent_depth: None, is_descendant: true }),
        });
        assert!(matches!(result, Err(CategoryError::CyclicMove)));
    }

    #[test]
    fn delete_with_children_is_rejected() {
        let mut category = CategoryState::empty(Uuid::new_v4());
        for e in category.execute(&CategoryCommand::Create { name: "Root".into(), parent_id: None, parent_path: None, parent_depth: None }).unwrap() {
            category.apply(&e);
        }
        let result = category.execute(&CategoryCommand::Delete { has_children: true, has_products: false });
        assert!(matches!(result, Err(CategoryError::NotEmpty(_))));
    }
}
