use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{
        Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use chrono_tz::Tz;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use uuid::Uuid;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{
    error::{AppError, Result},
    handlers::response::{JsonBody, QueryParams, json, json_with_headers, required},
    models::{
        date::{CalendarDate, DateRange},
        session::Credentials,
        transaction::NormalizedTransaction,
    },
    services::{
        orchestrator::{ScrapeJob, ScrapeRequest},
        progress::ProgressSubscription,
    },
    state::AppState,
    validation::auth::{validate_password, validate_user_id},
};

/// The request payload for a scrape, as a JSON body or a query string.
#[derive(Deserialize, Default, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeParams {
    #[zeroize(skip)]
    pub username: Option<String>,
    pub password: Option<String>,
    #[zeroize(skip)]
    pub start_date: Option<String>,
    #[zeroize(skip)]
    pub end_date: Option<String>,
    #[zeroize(skip)]
    #[serde(default, deserialize_with = "flag")]
    pub show_browser: bool,
}

/// Accepts `true`/`false` as a JSON bool or as the strings a query string carries.
fn flag<'de, D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        None => false,
        Some(Flag::Bool(b)) => b,
        Some(Flag::Text(s)) => s.eq_ignore_ascii_case("true") || s == "1",
    })
}

impl ScrapeParams {
    /// Validates everything before any portal interaction. Scrape dates may not be in the future.
    fn into_request(mut self, state: &AppState) -> Result<ScrapeRequest> {
        let username = required(self.username.take(), "username")?.trim().to_string();
        validate_user_id(&username)?;

        let password = Zeroizing::new(required(self.password.take(), "password")?);
        validate_password(&password)?;

        let range = state.filter.parse_range(
            self.start_date.as_deref(),
            self.end_date.as_deref(),
            false,
        )?;

        Ok(ScrapeRequest {
            credentials: Credentials {
                user_id: username,
                password,
                interactive: self.show_browser,
            },
            range,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobAccepted {
    job_id: Uuid,
}

/// `transactions_<first>_<last>.json`, from the local dates of the earliest and latest records.
///
/// Falls back to the requested bounds, then to `earliest`/`latest`.
pub fn download_filename(transactions: &[NormalizedTransaction], range: &DateRange, timezone: Tz) -> String {
    let local_day = |t: &NormalizedTransaction| {
        CalendarDate::from(t.transaction_time.with_timezone(&timezone).date_naive())
    };

    let first = transactions
        .iter()
        .min_by_key(|t| t.transaction_time)
        .map(local_day)
        .or(range.start)
        .map_or_else(|| "earliest".to_string(), |d| d.to_string());
    let last = transactions
        .iter()
        .max_by_key(|t| t.transaction_time)
        .map(local_day)
        .or(range.end)
        .map_or_else(|| "latest".to_string(), |d| d.to_string());

    format!("transactions_{}_{}.json", first, last)
}

fn sse(subscription: ProgressSubscription) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let events = subscription.into_stream().map(|event| {
        let data = sonic_rs::to_string(&event).unwrap_or_else(|e| {
            tracing::error!("❌ Progress event serialization failed: {}", e);
            r#"{"type":"error","message":"event serialization failed"}"#.to_string()
        });
        Ok(Event::default().data(data))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn find_job(state: &AppState, job_id: &str) -> Result<std::sync::Arc<ScrapeJob>> {
    let id = Uuid::parse_str(job_id)
        .map_err(|_| AppError::Validation(format!("'{}' is not a valid job id", job_id)))?;

    state
        .orchestrator
        .job(id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))
}

/// Runs a scrape to completion and returns the transactions as a download.
#[axum::debug_handler]
pub async fn scrape(
    State(state): State<AppState>,
    JsonBody(params): JsonBody<ScrapeParams>,
) -> Result<Response> {
    let request = params.into_request(&state)?;
    let range = request.range;
    tracing::info!("🚀 Scrape request for {}", request.credentials.user_id);

    let transactions = state.orchestrator.run(request, None).await?;

    let filename = download_filename(&transactions, &range, state.filter.timezone());
    let disposition = HeaderValue::from_str(&format!(r#"attachment; filename="{}""#, filename))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_DISPOSITION, disposition);

    json_with_headers(StatusCode::OK, headers, &*transactions)
}

/// Starts a scrape in the background.
#[axum::debug_handler]
pub async fn start_job(
    State(state): State<AppState>,
    JsonBody(params): JsonBody<ScrapeParams>,
) -> Result<Response> {
    let request = params.into_request(&state)?;
    let (job, _) = state.orchestrator.submit(request, None).await;

    json(StatusCode::ACCEPTED, &JobAccepted { job_id: job.id })
}

#[axum::debug_handler]
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response> {
    let job = find_job(&state, &job_id).await?;
    json(StatusCode::OK, &job.snapshot())
}

/// Follows an existing job. Subscribers joining after it ended get only the terminal event.
pub async fn job_stream(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let job = find_job(&state, &job_id).await?;
    Ok(sse(job.subscribe()))
}

/// Starts a scrape and streams its progress, then one `done` or `error` event.
///
/// The job keeps running if the client disconnects.
pub async fn scrape_stream(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<ScrapeParams>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let request = params.into_request(&state)?;
    let (job, subscription) = state.orchestrator.submit(request, None).await;
    tracing::info!("📡 Streaming job {} for {}", job.id, job.user_id);

    Ok(sse(subscription))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fixture::samples::{SYDNEY, raw};
    use crate::services::normalizer::normalize_all;

    #[test]
    fn filename_uses_local_dates_of_extremes() {
        let transactions = normalize_all(&[
            raw("2024-01-10T22:15:07Z", "card-1", "bus", "-2.24"),
            raw("2023-12-31T14:30:00Z", "card-1", "train", "-3.20"),
            raw("2024-01-15T08:00:00Z", "card-2", "ferry", "-6.12"),
        ]);

        let name = download_filename(&transactions, &DateRange::unbounded(), SYDNEY);
        assert_eq!(name, "transactions_01-01-2024_01-15-2024.json");
    }

    #[test]
    fn filename_falls_back_to_range_then_placeholders() {
        let range = DateRange {
            start: CalendarDate::from_ymd(2024, 3, 1),
            end: None,
        };
        assert_eq!(
            download_filename(&[], &range, SYDNEY),
            "transactions_03-01-2024_latest.json"
        );
        assert_eq!(
            download_filename(&[], &DateRange::unbounded(), SYDNEY),
            "transactions_earliest_latest.json"
        );
    }

    #[test]
    fn show_browser_accepts_query_strings_and_bools() {
        let params: ScrapeParams = serde_json::from_str(r#"{"showBrowser":"true"}"#).unwrap();
        assert!(params.show_browser);
        let params: ScrapeParams = serde_json::from_str(r#"{"showBrowser":false}"#).unwrap();
        assert!(!params.show_browser);
        let params: ScrapeParams = serde_json::from_str(r#"{}"#).unwrap();
        assert!(!params.show_browser);
    }
}
