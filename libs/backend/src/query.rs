//! Table, filter and ordering vocabulary of the record store and change feed
//!
//! Filters are conjunctions of equality predicates over a closed set of
//! columns, which is all the bookmarks view needs (`user_id = $owner`, and
//! `id = $id AND user_id = $owner` for deletes). The same filter value is
//! rendered to SQL for the Postgres store and evaluated in memory against
//! feed records and in-process rows.

use serde::{Deserialize, Serialize};
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

use crate::models::{Bookmark, RecordKey};

/// Tables exposed by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Bookmarks,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Bookmarks => "bookmarks",
        }
    }
}

/// Filterable and orderable columns of the bookmarks table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Id,
    Title,
    Url,
    Owner,
    CreatedAt,
}

impl Column {
    pub fn as_str(&self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::Title => "title",
            Column::Url => "url",
            Column::Owner => "user_id",
            Column::CreatedAt => "created_at",
        }
    }
}

/// Literal compared against a column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Text(String),
    Uuid(Uuid),
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<Uuid> for Value {
    fn from(value: Uuid) -> Self {
        Value::Uuid(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

/// Conjunction of `column = value` predicates. An empty filter matches
/// every row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    predicates: Vec<(Column, Value)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an equality predicate
    pub fn eq(mut self, column: Column, value: impl Into<Value>) -> Self {
        self.predicates.push((column, value.into()));
        self
    }

    /// Rows owned by `user_id`
    pub fn owned_by(user_id: Uuid) -> Self {
        Self::new().eq(Column::Owner, user_id)
    }

    pub fn predicates(&self) -> &[(Column, Value)] {
        &self.predicates
    }

    /// Evaluate the filter against a row
    pub fn matches(&self, row: &Bookmark) -> bool {
        self.predicates.iter().all(|(column, value)| {
            match (column, value) {
                (Column::Id, Value::Int(id)) => row.id == *id,
                (Column::Title, Value::Text(title)) => row.title == *title,
                (Column::Url, Value::Text(url)) => row.url == *url,
                (Column::Owner, Value::Uuid(owner)) => row.user_id == *owner,
                // Postgres would reject the comparison; nothing matches.
                _ => false,
            }
        })
    }

    /// Whether every predicate is on a key column (`id` or the owner), the
    /// only columns carried by change notifications
    pub fn is_key_filter(&self) -> bool {
        self.predicates
            .iter()
            .all(|(column, _)| matches!(column, Column::Id | Column::Owner))
    }

    /// Evaluate the filter against a row key. Predicates on other columns
    /// never match.
    pub fn matches_key(&self, key: &RecordKey) -> bool {
        self.predicates.iter().all(|(column, value)| match (column, value) {
            (Column::Id, Value::Int(id)) => key.id == *id,
            (Column::Owner, Value::Uuid(owner)) => key.user_id == *owner,
            _ => false,
        })
    }

    /// Append ` WHERE …` to a query, binding every value
    pub fn push_where(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        for (index, (column, value)) in self.predicates.iter().enumerate() {
            builder.push(if index == 0 { " WHERE " } else { " AND " });
            builder.push(column.as_str());
            builder.push(" = ");
            match value {
                Value::Int(v) => builder.push_bind(*v),
                Value::Text(v) => builder.push_bind(v.clone()),
                Value::Uuid(v) => builder.push_bind(*v),
            };
        }
    }
}

/// Sort order of a query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Order {
    pub column: Column,
    pub descending: bool,
}

impl Order {
    pub fn asc(column: Column) -> Self {
        Self {
            column,
            descending: false,
        }
    }

    pub fn desc(column: Column) -> Self {
        Self {
            column,
            descending: true,
        }
    }

    /// Newest first, the order of the bookmarks list
    pub fn newest_first() -> Self {
        Self::desc(Column::CreatedAt)
    }

    pub fn push_order_by(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        builder.push(" ORDER BY ");
        builder.push(self.column.as_str());
        builder.push(if self.descending { " DESC" } else { " ASC" });
        // Stable order for rows sharing a timestamp
        if self.column != Column::Id {
            builder.push(if self.descending { ", id DESC" } else { ", id ASC" });
        }
    }

    /// Sort rows in place with the same semantics as the SQL clause
    pub fn sort(&self, rows: &mut [Bookmark]) {
        rows.sort_by(|a, b| {
            let ordering = match self.column {
                Column::Id => a.id.cmp(&b.id),
                Column::Title => a.title.cmp(&b.title),
                Column::Url => a.url.cmp(&b.url),
                Column::Owner => a.user_id.cmp(&b.user_id),
                Column::CreatedAt => a.created_at.cmp(&b.created_at),
            }
            .then(a.id.cmp(&b.id));
            if self.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn row(id: i64, owner: Uuid, age_minutes: i64) -> Bookmark {
        Bookmark {
            id,
            title: format!("title-{id}"),
            url: format!("https://example.com/{id}"),
            user_id: owner,
            created_at: Utc::now() - Duration::minutes(age_minutes),
        }
    }

    #[test]
    fn test_filter_matches_conjunction() {
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let filter = Filter::owned_by(owner).eq(Column::Id, 7i64);

        assert!(filter.matches(&row(7, owner, 0)));
        assert!(!filter.matches(&row(7, other, 0)));
        assert!(!filter.matches(&row(8, owner, 0)));
        assert!(Filter::new().matches(&row(1, other, 0)));
    }

    #[test]
    fn test_filter_type_mismatch_matches_nothing() {
        let owner = Uuid::new_v4();
        let filter = Filter::new().eq(Column::Owner, "not-a-uuid");
        assert!(!filter.matches(&row(1, owner, 0)));
    }

    #[test]
    fn test_key_filter_matches_keys_only() {
        let owner = Uuid::new_v4();
        let key = RecordKey { id: 7, user_id: owner };

        let filter = Filter::owned_by(owner).eq(Column::Id, 7i64);
        assert!(filter.is_key_filter());
        assert!(filter.matches_key(&key));
        assert!(!Filter::owned_by(Uuid::new_v4()).matches_key(&key));

        let by_title = Filter::owned_by(owner).eq(Column::Title, "Paper");
        assert!(!by_title.is_key_filter());
        assert!(!by_title.matches_key(&key));
    }

    #[test]
    fn test_filter_renders_bound_sql() {
        let mut builder = QueryBuilder::<Postgres>::new("DELETE FROM bookmarks");
        Filter::new()
            .eq(Column::Id, 3i64)
            .eq(Column::Owner, Uuid::new_v4())
            .push_where(&mut builder);

        assert_eq!(
            builder.sql(),
            "DELETE FROM bookmarks WHERE id = $1 AND user_id = $2"
        );
    }

    #[test]
    fn test_order_renders_tiebreaker() {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM bookmarks");
        Order::newest_first().push_order_by(&mut builder);
        assert_eq!(
            builder.sql(),
            "SELECT * FROM bookmarks ORDER BY created_at DESC, id DESC"
        );
    }

    #[test]
    fn test_sort_newest_first() {
        let owner = Uuid::new_v4();
        let mut rows = vec![row(1, owner, 30), row(2, owner, 10), row(3, owner, 20)];
        Order::newest_first().sort(&mut rows);

        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }
}
