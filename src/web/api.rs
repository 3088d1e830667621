//! JSON API handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::NaiveDate;
use serde::Deserialize;

use super::{ApiError, AppState, page_number, page_size};
use crate::store::{CategorySummary, Page, RecordFilter, Statistics, StoredRecord};

const DEFAULT_LIMIT: u32 = 10;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub query: Option<String>,
}

/// Search parameters as they arrive; blank values are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub text: Option<String>,
    pub sender: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub category: Option<String>,
    pub limit: Option<i64>,
}

impl SearchParams {
    fn into_filter(self) -> Result<(RecordFilter, u32), ApiError> {
        let limit = page_size(self.limit, DEFAULT_LIMIT);
        let filter = RecordFilter {
            text: blank_to_none(self.text),
            sender: blank_to_none(self.sender),
            date_from: parse_day("date_from", self.date_from)?,
            date_to: parse_day("date_to", self.date_to)?,
            category: blank_to_none(self.category),
        };
        Ok((filter, limit))
    }
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_day(field: &str, value: Option<String>) -> Result<Option<NaiveDate>, ApiError> {
    match blank_to_none(value) {
        None => Ok(None),
        Some(v) => NaiveDate::parse_from_str(&v, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| ApiError::bad_request(format!("{field} must be YYYY-MM-DD"))),
    }
}

pub async fn list_emails(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Page<StoredRecord>>, ApiError> {
    let query = params.query.as_deref().map(str::trim).filter(|q| !q.is_empty());
    let page = state
        .store
        .page(
            query,
            page_number(params.page),
            page_size(params.limit, DEFAULT_LIMIT),
        )
        .await?;
    Ok(Json(page))
}

pub async fn search_emails(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<StoredRecord>>, ApiError> {
    let (filter, limit) = params.into_filter()?;
    let records = state.store.query(&filter, limit).await?;
    Ok(Json(records))
}

pub async fn get_email(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StoredRecord>, ApiError> {
    state
        .store
        .get_record(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("email {id} not found")))
}

pub async fn list_categories(
    State(state): State<AppState>,
) -> Result<Json<Vec<CategorySummary>>, ApiError> {
    Ok(Json(state.store.list_categories().await?))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<Statistics>, ApiError> {
    Ok(Json(state.store.statistics().await?))
}
