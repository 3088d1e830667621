//! HTML page handlers.

use axum::{
    extract::{Path, Query, State},
    response::Html,
};
use serde::Deserialize;

use super::{AppState, PageError, page_number, render};
use crate::store::RecordFilter;

/// Records per page on `/emails` and category pages.
pub const EMAILS_PER_PAGE: u32 = 10;

const OVERVIEW_LATEST: u32 = 5;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub page: Option<i64>,
    pub query: Option<String>,
}

pub async fn overview(State(state): State<AppState>) -> Result<Html<String>, PageError> {
    let stats = state.store.statistics().await?;
    let latest = state
        .store
        .query(&RecordFilter::default(), OVERVIEW_LATEST)
        .await?;

    let content = format!(
        "{}<h2>Latest messages</h2>{}",
        render::statistics(&stats),
        render::record_list(&latest)
    );
    Ok(Html(render::layout("Overview", &content)))
}

pub async fn email_list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Html<String>, PageError> {
    let query = params.query.as_deref().map(str::trim).filter(|q| !q.is_empty());
    let page = state
        .store
        .page(query, page_number(params.page), EMAILS_PER_PAGE)
        .await?;

    let content = format!(
        "{}{}{}",
        render::search_form(query),
        render::record_list(&page.items),
        render::pagination("/emails", &page, query)
    );
    Ok(Html(render::layout("Emails", &content)))
}

pub async fn email_detail(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Html<String>, PageError> {
    let record = state
        .store
        .get_record(&id)
        .await?
        .ok_or_else(|| PageError::not_found(format!("No message with id {id}.")))?;

    Ok(Html(render::layout(
        render::display_subject(&record.subject),
        &render::record_detail(&record),
    )))
}

pub async fn category_list(State(state): State<AppState>) -> Result<Html<String>, PageError> {
    let categories = state.store.list_categories().await?;
    Ok(Html(render::layout(
        "Categories",
        &render::category_table(&categories),
    )))
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
}

pub async fn category_detail(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Html<String>, PageError> {
    let categories = state.store.list_categories().await?;
    let Some(category) = categories.into_iter().find(|c| c.name == name) else {
        return Err(PageError::not_found(format!("No category named {name}.")));
    };

    let filter = RecordFilter {
        category: Some(category.name.clone()),
        ..RecordFilter::default()
    };
    let page = state
        .store
        .page_filtered(&filter, page_number(params.page), EMAILS_PER_PAGE)
        .await?;

    let mut content = String::new();
    if let Some(description) = &category.description {
        content.push_str(&format!("<p>{}</p>", render::escape(description)));
    }
    content.push_str(&render::record_list(&page.items));
    let base = format!("/categories/{}", urlencoding::encode(&category.name));
    content.push_str(&render::pagination(&base, &page, None));
    Ok(Html(render::layout(&category.name, &content)))
}

pub async fn stats(State(state): State<AppState>) -> Result<Html<String>, PageError> {
    let stats = state.store.statistics().await?;
    Ok(Html(render::layout("Statistics", &render::statistics(&stats))))
}
