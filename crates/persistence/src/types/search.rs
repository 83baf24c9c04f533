//! Search and count option types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::query::FilterBuilder;
use crate::types::DatabaseObject;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl SortOrder {
    /// Returns the native order keyword.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// A point of interest for geo-distance sorting.
///
/// Missing coordinates default to `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude.
    #[serde(default)]
    pub lat: f64,
    /// Longitude.
    #[serde(default)]
    pub long: f64,
}

/// One sort criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortField {
    /// Field to sort on.
    pub field: String,
    /// Direction.
    #[serde(default)]
    pub order: SortOrder,
    /// When set, sort by distance from this point instead of by value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo: Option<GeoPoint>,
}

impl SortField {
    /// Sorts ascending on `field`.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
            geo: None,
        }
    }

    /// Sorts descending on `field`.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
            geo: None,
        }
    }

    /// Sorts by distance of `field` from `poi`.
    pub fn geo(field: impl Into<String>, poi: GeoPoint, order: SortOrder) -> Self {
        Self {
            field: field.into(),
            order,
            geo: Some(poi),
        }
    }
}

/// Options for [`ObjectStore::search_objects`](crate::ObjectStore::search_objects).
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    /// Model type to search.
    pub model: String,
    /// Owning application, required for non-global models.
    pub application_id: Option<String>,
    /// Filter tree; `None` or an empty builder matches everything.
    pub filters: Option<FilterBuilder>,
    /// Fields to project. Setting this selects streaming mode.
    pub fields: Option<Vec<String>>,
    /// Sort criteria, applied in order.
    pub sort: Vec<SortField>,
    /// Number of hits to skip.
    pub offset: Option<u64>,
    /// Maximum number of hits to return.
    pub limit: Option<u64>,
}

impl SearchOptions {
    /// Creates options for `model`.
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Sets the owning application.
    pub fn with_application(mut self, application_id: impl Into<String>) -> Self {
        self.application_id = Some(application_id.into());
        self
    }

    /// Sets the filter tree.
    pub fn with_filters(mut self, filters: FilterBuilder) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Selects streaming mode with the given projection.
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Appends a sort criterion.
    pub fn with_sort(mut self, sort: SortField) -> Self {
        self.sort.push(sort);
        self
    }

    /// Sets the offset.
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Sets the limit.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Result of a direct-mode search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchObjectsResult {
    /// Matching objects, in backend order.
    pub results: Vec<DatabaseObject>,
}

/// Options for [`ObjectStore::count_objects`](crate::ObjectStore::count_objects).
#[derive(Debug, Clone, Default)]
pub struct CountOptions {
    /// Owning application, required for non-global models.
    pub application_id: Option<String>,
    /// Filter tree.
    pub filters: Option<FilterBuilder>,
    /// Native aggregation body, computed alongside the count.
    pub aggregation: Option<Value>,
}

impl CountOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the owning application.
    pub fn with_application(mut self, application_id: impl Into<String>) -> Self {
        self.application_id = Some(application_id.into());
        self
    }

    /// Sets the filter tree.
    pub fn with_filters(mut self, filters: FilterBuilder) -> Self {
        self.filters = Some(filters);
        self
    }

    /// Sets the aggregation.
    pub fn with_aggregation(mut self, aggregation: Value) -> Self {
        self.aggregation = Some(aggregation);
        self
    }
}

/// Result of a count.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountResult {
    /// Number of matching objects.
    pub count: u64,
    /// The aggregation's `value`, when an aggregation was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<Value>,
}
