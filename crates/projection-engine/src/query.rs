//! Read-only Query API over the projection store: get-by-id, paginated
//! listing with a whitelisted sort field, and the domain-specific
//! aggregations (category tree, order stats) that are cheap to compute from
//! the materialized read models.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use serde::Serialize;
use uuid::Uuid;

use cqrs_core::{CqrsError, CqrsResult};

use crate::schema::{category_read_models, order_read_models, product_read_models};

const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Clone, Copy)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone)]
pub struct Pagination {
    pub page: i64,
    pub page_size: i64,
}

impl Pagination {
    pub fn new(page: i64, page_size: i64) -> CqrsResult<Self> {
        if page < 1 {
            return Err(CqrsError::Validation { message: "page must be >= 1".into() });
        }
        if page_size < 1 || page_size > MAX_PAGE_SIZE {
            return Err(CqrsError::Validation { message: format!("page_size must be between 1 and {MAX_PAGE_SIZE}") });
        }
        Ok(Self { page, page_size })
    }

    fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
}

#[derive(Debug, Queryable, Serialize)]
pub struct ProductView {
    pub id: Uuid,
    pub name: String,
    pub price: i64,
    pub category_id: Option<Uuid>,
    pub deleted: bool,
    pub updated_at: DateTime<Utc>,
}

/// Raw `category_read_models` row. `product_count` is not one of its
/// columns — a category's live product count is derived from
/// `product_read_models` at read time (see `product_counts_for`) rather than
/// accumulated onto this table, so it can never drift out of sync with what
/// the product projection actually has on hand.
#[derive(Debug, Queryable)]
struct CategoryRecord {
    id: Uuid,
    name: String,
    parent_id: Option<Uuid>,
    path: String,
    depth: i32,
    deleted: bool,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CategoryView {
    pub id: Uuid,
    pub name: String,
    pub parent_id: Option<Uuid>,
    pub path: String,
    pub depth: i32,
    pub product_count: i64,
    pub deleted: bool,
    pub updated_at: DateTime<Utc>,
}

impl CategoryView {
    fn from_record(record: CategoryRecord, product_count: i64) -> Self {
        Self {
            id: record.id,
            name: record.name,
            parent_id: record.parent_id,
            path: record.path,
            depth: record.depth,
            product_count,
            deleted: record.deleted,
            updated_at: record.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CategoryTreeNode {
    pub category: CategoryView,
    pub children: Vec<CategoryTreeNode>,
}

#[derive(Debug, Queryable, Serialize)]
pub struct OrderView {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub subtotal: i64,
    pub tax: i64,
    pub shipping: i64,
    pub total: i64,
    pub items: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct OrderStatsBucket {
    pub group: String,
    pub order_count: i64,
    pub total_cents: i64,
}

pub struct QueryApi {
    pool: Pool<ConnectionManager<PgConnection>>,
}

impl QueryApi {
    pub fn new(pool: Pool<ConnectionManager<PgConnection>>) -> Self {
        Self { pool }
    }

    pub fn get_product(&self, id: Uuid) -> CqrsResult<Option<ProductView>> {
        let mut conn = self.pool.get()?;
        Ok(product_read_models::table
            .filter(product_read_models::id.eq(id))
            .select((
                product_read_models::id,
                product_read_models::name,
                product_read_models::price,
                product_read_models::category_id,
                product_read_models::deleted,
                product_read_models::updated_at,
            ))
            .first(&mut conn)
            .optional()?)
    }

    /// `sort_field` must be one of `"name"`, `"price"`, `"updated_at"` — any
    /// other value is rejected rather than silently falling back, since a
    /// typo'd sort field should surface to the caller, not quietly sort wrong.
    pub fn list_products(&self, category_id: Option<Uuid>, include_deleted: bool, sort_field: &str, direction: SortDirection, pagination: Pagination) -> CqrsResult<Page<ProductView>> {
        let mut conn = self.pool.get()?;

        let mut count_query = product_read_models::table.into_boxed();
        let mut rows_query = product_read_models::table.into_boxed();
        if let Some(category_id) = category_id {
            count_query = count_query.filter(product_read_models::category_id.eq(category_id));
            rows_query = rows_query.filter(product_read_models::category_id.eq(category_id));
        }
        if !include_deleted {
            count_query = count_query.filter(product_read_models::deleted.eq(false));
            rows_query = rows_query.filter(product_read_models::deleted.eq(false));
        }
        let total: i64 = count_query.count().get_result(&mut conn)?;

        rows_query = match (sort_field, direction) {
            ("name", SortDirection::Asc) => rows_query.order(product_read_models::name.asc()),
            ("name", SortDirection::Desc) => rows_query.order(product_read_models::name.desc()),
            ("price", SortDirection::Asc) => rows_query.order(product_read_models::price.asc()),
            ("price", SortDirection::Desc) => rows_query.order(product_read_models::price.desc()),
            ("updated_at", SortDirection::Asc) => rows_query.order(product_read_models::updated_at.asc()),
            ("updated_at", SortDirection::Desc) => rows_query.order(product_read_models::updated_at.desc()),
            (other, _) => return Err(CqrsError::Validation { message: format!("unsupported sort field '{other}'") }),
        };

        let items: Vec<ProductView> = rows_query
            .limit(pagination.page_size)
            .offset(pagination.offset())
            .select((
                product_read_models::id,
                product_read_models::name,
                product_read_models::price,
                product_read_models::category_id,
                product_read_models::deleted,
                product_read_models::updated_at,
            ))
            .load(&mut conn)?;

        Ok(Page { items, page: pagination.page, page_size: pagination.page_size, total })
    }

    pub fn get_category(&self, id: Uuid) -> CqrsResult<Option<CategoryView>> {
        let mut conn = self.pool.get()?;
        let record: Option<CategoryRecord> = category_read_models::table.filter(category_read_models::id.eq(id)).first(&mut conn).optional()?;
        let Some(record) = record else { return Ok(None) };
        let count = product_count_for(&mut conn, record.id)?;
        Ok(Some(CategoryView::from_record(record, count)))
    }

    /// Used by the category pre-check to reject a duplicate sibling name
    /// before the command even reaches the aggregate.
    pub fn find_category_by_parent_and_name(&self, parent_id: Option<Uuid>, name: &str) -> CqrsResult<Option<CategoryView>> {
        let mut conn = self.pool.get()?;
        let mut query = category_read_models::table.filter(category_read_models::name.eq(name)).filter(category_read_models::deleted.eq(false)).into_boxed();
        query = match parent_id {
            Some(parent_id) => query.filter(category_read_models::parent_id.eq(parent_id)),
            None => query.filter(category_read_models::parent_id.is_null()),
        };
        let record: Option<CategoryRecord> = query.first(&mut conn).optional()?;
        let Some(record) = record else { return Ok(None) };
        let count = product_count_for(&mut conn, record.id)?;
        Ok(Some(CategoryView::from_record(record, count)))
    }

    pub fn has_children(&self, category_id: Uuid) -> CqrsResult<bool> {
        let mut conn = self.pool.get()?;
        let count: i64 = category_read_models::table
            .filter(category_read_models::parent_id.eq(category_id))
            .filter(category_read_models::deleted.eq(false))
            .count()
            .get_result(&mut conn)?;
        Ok(count > 0)
    }

    pub fn has_products(&self, category_id: Uuid) -> CqrsResult<bool> {
        let mut conn = self.pool.get()?;
        let count: i64 = product_read_models::table
            .filter(product_read_models::category_id.eq(category_id))
            .filter(product_read_models::deleted.eq(false))
            .count()
            .get_result(&mut conn)?;
        Ok(count > 0)
    }

    /// Builds the category subtree rooted at `root_id`, stopping at
    /// `max_depth` levels below the root. `depth`/`path` on the read model
    /// make this a single indexed query per level rather than a recursive
    /// walk against the event store.
    pub fn category_tree(&self, root_id: Uuid, max_depth: i32) -> CqrsResult<Option<CategoryTreeNode>> {
        let mut conn = self.pool.get()?;
        let root: Option<CategoryRecord> = category_read_models::table.filter(category_read_models::id.eq(root_id)).first(&mut conn).optional()?;
        let Some(root) = root else { return Ok(None) };

        let deepest = root.depth + max_depth;
        let descendants: Vec<CategoryRecord> = category_read_models::table
            .filter(category_read_models::path.like(format!("{}/%", root.path)))
            .filter(category_read_models::depth.le(deepest))
            .filter(category_read_models::deleted.eq(false))
            .order(category_read_models::depth.asc())
            .load(&mut conn)?;

        let mut ids: Vec<Uuid> = descendants.iter().map(|c| c.id).collect();
        ids.push(root.id);
        let counts = product_counts_for(&mut conn, &ids)?;

        let root_count = counts.get(&root.id).copied().unwrap_or(0);
        let root = CategoryView::from_record(root, root_count);
        let descendants: Vec<CategoryView> = descendants
            .into_iter()
            .map(|record| {
                let count = counts.get(&record.id).copied().unwrap_or(0);
                CategoryView::from_record(record, count)
            })
            .collect();

        Ok(Some(build_tree(root, descendants)))
    }

    pub fn get_order(&self, id: Uuid) -> CqrsResult<Option<OrderView>> {
        let mut conn = self.pool.get()?;
        Ok(order_read_models::table.filter(order_read_models::id.eq(id)).first(&mut conn).optional()?)
    }

    pub fn list_orders_for_user(&self, user_id: Uuid, pagination: Pagination) -> CqrsResult<Page<OrderView>> {
        let mut conn = self.pool.get()?;
        let total: i64 = order_read_models::table.filter(order_read_models::user_id.eq(user_id)).count().get_result(&mut conn)?;
        let items: Vec<OrderView> = order_read_models::table
            .filter(order_read_models::user_id.eq(user_id))
            .order(order_read_models::created_at.desc())
            .limit(pagination.page_size)
            .offset(pagination.offset())
            .load(&mut conn)?;
        Ok(Page { items, page: pagination.page, page_size: pagination.page_size, total })
    }

    /// Order totals grouped by status within `[since, until)`. `group_by` is
    /// currently only `"status"`; other groupings are rejected the same way
    /// an unsupported sort field is.
    pub fn order_stats(&self, since: DateTime<Utc>, until: DateTime<Utc>, group_by: &str) -> CqrsResult<Vec<OrderStatsBucket>> {
        if group_by != "status" {
            return Err(CqrsError::Validation { message: format!("unsupported group_by '{group_by}'") });
        }
        let mut conn = self.pool.get()?;
        let rows: Vec<(String, i64, Option<i64>)> = order_read_models::table
            .filter(order_read_models::created_at.ge(since))
            .filter(order_read_models::created_at.lt(until))
            .group_by(order_read_models::status)
            .select((order_read_models::status, diesel::dsl::count(order_read_models::id), diesel::dsl::sum(order_read_models::total)))
            .load(&mut conn)?;

        Ok(rows
            .into_iter()
            .map(|(group, order_count, total_cents)| OrderStatsBucket { group, order_count, total_cents: total_cents.unwrap_or(0) })
            .collect())
    }
}

/// Live product count for one category, counted fresh from
/// `product_read_models` on every call — idempotent under at-least-once
/// event redelivery and correct across a partial rebuild of either
/// projection, since nothing is accumulated.
fn product_count_for(conn: &mut PgConnection, category_id: Uuid) -> QueryResult<i64> {
    product_read_models::table
        .filter(product_read_models::category_id.eq(category_id))
        .filter(product_read_models::deleted.eq(false))
        .count()
        .get_result(conn)
}

/// Same as `product_count_for` but for many categories at once, to avoid an
/// N+1 query per node when walking a tree.
fn product_counts_for(conn: &mut PgConnection, category_ids: &[Uuid]) -> QueryResult<HashMap<Uuid, i64>> {
    let rows: Vec<(Option<Uuid>, i64)> = product_read_models::table
        .filter(product_read_models::category_id.eq_any(category_ids))
        .filter(product_read_models::deleted.eq(false))
        .group_by(product_read_models::category_id)
        .select((product_read_models::category_id, diesel::dsl::count(product_read_models::id)))
        .load(conn)?;
    Ok(rows.into_iter().filter_map(|(id, count)| id.map(|id| (id, count))).collect())
}

fn build_tree(root: CategoryView, mut descendants: Vec<CategoryView>) -> CategoryTreeNode {
    let children_rows: Vec<CategoryView> = {
        let mut direct = Vec::new();
        let mut rest = Vec::new();
        for row in descendants.drain(..) {
            if row.parent_id == Some(root.id) {
                direct.push(row);
            } else {
                rest.push(row);
            }
        }
        descendants = rest;
        direct
    };

    let children = children_rows.into_iter().map(|child| build_tree(child, descendants.clone())).collect();
    CategoryTreeNode { category: root, children }
}
