use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, TimeZone, Utc};
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::core::error::PipelineError;
use crate::core::gateway::{ProviderGateway, date_range, require_symbol};
use crate::core::query::Query;
use crate::core::result::FetchResult;
use crate::core::table::{Column, Table};

pub const PROVIDER_ID: &str = "yfinance";
pub const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";

pub const EQUITY_HISTORICAL: &str = "equity.price.historical";
pub const CURRENCY_HISTORICAL: &str = "currency.price.historical";
pub const CRYPTO_HISTORICAL: &str = "crypto.price.historical";
pub const INDEX_HISTORICAL: &str = "index.price.historical";

// Every supported function maps onto the same daily chart endpoint.
const FUNCTIONS: [&str; 4] = [
    EQUITY_HISTORICAL,
    CURRENCY_HISTORICAL,
    CRYPTO_HISTORICAL,
    INDEX_HISTORICAL,
];

/// Daily OHLCV history from the Yahoo Finance chart API.
pub struct YahooFinanceGateway {
    base_url: Url,
    client: reqwest::Client,
}

impl YahooFinanceGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("finchart/0.1")
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid Yahoo Finance base URL: {base_url}"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("Invalid Yahoo Finance base URL: {base_url}"));
        }
        Ok(YahooFinanceGateway { base_url, client })
    }

    // The symbol is pushed as a single path segment, so reserved characters
    // are percent-encoded rather than altering the request.
    fn chart_url(&self, symbol: &str, (period1, period2): (i64, i64)) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("Invalid Yahoo Finance base URL: {}", self.base_url))?
            .pop_if_empty()
            .extend(["v8", "finance", "chart", symbol]);
        url.query_pairs_mut()
            .append_pair("period1", &period1.to_string())
            .append_pair("period2", &period2.to_string())
            .append_pair("interval", "1d");
        Ok(url)
    }

    async fn fetch_table(&self, symbol: &str, period: (i64, i64)) -> Result<Table> {
        let url = self.chart_url(symbol, period)?;
        debug!("Requesting price history from {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| anyhow!("Request error: {} for symbol: {}", e, symbol))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body for {symbol}"))?;

        if !status.is_success() {
            let detail = serde_json::from_str::<YahooChartResponse>(&text)
                .ok()
                .and_then(|r| r.chart.error)
                .map(|e| format!(" ({})", e.description))
                .unwrap_or_default();
            return Err(anyhow!("HTTP error: {} for symbol: {}{}", status, symbol, detail));
        }

        let data: YahooChartResponse = serde_json::from_str(&text)
            .map_err(|e| anyhow!("Failed to parse JSON response for {}: {}", symbol, e))?;

        if let Some(error) = data.chart.error {
            return Err(anyhow!("Provider error for {}: {}", symbol, error.description));
        }

        let item = data
            .chart
            .result
            .unwrap_or_default()
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No price data found for symbol: {}", symbol))?;

        build_table(item)
    }
}

/// Unix bounds for the chart request. `period2` is exclusive, so it is
/// midnight after `end`.
fn period_bounds(start: NaiveDate, end: NaiveDate) -> Result<(i64, i64), PipelineError> {
    let midnight = |date: NaiveDate| date.and_hms_opt(0, 0, 0).map(|d| d.and_utc().timestamp());
    let period1 = midnight(start);
    let period2 = end
        .checked_add_signed(ChronoDuration::days(1))
        .and_then(midnight);
    match (period1, period2) {
        (Some(period1), Some(period2)) => Ok((period1, period2)),
        _ => Err(PipelineError::invalid_query(format!(
            "date range {start}..{end} is out of bounds"
        ))),
    }
}

fn build_table(item: ChartItem) -> Result<Table> {
    let offset = item.meta.gmtoffset.unwrap_or(0);
    let timestamps = item.timestamp.unwrap_or_default();
    let dates = timestamps
        .iter()
        .map(|ts| {
            Utc.timestamp_opt(ts + offset, 0)
                .single()
                .map(|dt| dt.date_naive())
                .ok_or_else(|| anyhow!("Invalid timestamp in response: {}", ts))
        })
        .collect::<Result<Vec<_>>>()?;

    let quote = item
        .indicators
        .and_then(|i| i.quote.into_iter().next())
        .unwrap_or_default();
    let rows = dates.len();
    // Missing or short arrays are padded with gaps so every column lines up
    let padded = |values: Option<Vec<Option<f64>>>| {
        let mut values = values.unwrap_or_default();
        values.resize(rows, None);
        values
    };

    Table::new(vec![
        Column::dates("date", dates),
        Column::floats("open", padded(quote.open)),
        Column::floats("high", padded(quote.high)),
        Column::floats("low", padded(quote.low)),
        Column::floats("close", padded(quote.close)),
        Column::floats("volume", padded(quote.volume)),
    ])
}

#[derive(Deserialize, Debug)]
struct YahooChartResponse {
    chart: ChartEnvelope,
}

#[derive(Deserialize, Debug)]
struct ChartEnvelope {
    result: Option<Vec<ChartItem>>,
    error: Option<ChartError>,
}

#[derive(Deserialize, Debug)]
struct ChartError {
    description: String,
}

#[derive(Deserialize, Debug)]
struct ChartItem {
    meta: ChartMeta,
    timestamp: Option<Vec<i64>>,
    indicators: Option<Indicators>,
}

#[derive(Deserialize, Debug)]
struct ChartMeta {
    gmtoffset: Option<i64>,
}

#[derive(Deserialize, Debug)]
struct Indicators {
    quote: Vec<Quote>,
}

#[derive(Deserialize, Debug, Default)]
struct Quote {
    open: Option<Vec<Option<f64>>>,
    high: Option<Vec<Option<f64>>>,
    low: Option<Vec<Option<f64>>>,
    close: Option<Vec<Option<f64>>>,
    volume: Option<Vec<Option<f64>>>,
}

#[async_trait]
impl ProviderGateway for YahooFinanceGateway {
    fn validate(&self, query: &Query) -> Result<(), PipelineError> {
        if query.provider() != PROVIDER_ID {
            return Err(PipelineError::invalid_query(format!(
                "provider '{}' is not served by {}",
                query.provider(),
                PROVIDER_ID
            )));
        }
        if !FUNCTIONS.contains(&query.function()) {
            return Err(PipelineError::invalid_query(format!(
                "unknown function '{}' for provider {}",
                query.function(),
                PROVIDER_ID
            )));
        }
        require_symbol(query)?;
        let (start, end) = date_range(query)?;
        period_bounds(start, end)?;
        Ok(())
    }

    #[instrument(
        name = "YahooHistoryFetch",
        skip(self, query),
        fields(query = %query)
    )]
    async fn fetch(&self, query: &Query) -> Result<FetchResult, PipelineError> {
        self.validate(query)?;
        let symbol = require_symbol(query)?;
        let (start, end) = date_range(query)?;
        let period = period_bounds(start, end)?;

        match self.fetch_table(symbol, period).await {
            Ok(table) => {
                debug!(rows = table.len(), "Received Yahoo price history");
                Ok(FetchResult::success(PROVIDER_ID, table))
            }
            Err(e) => {
                warn!(error = %e, "Yahoo price history fetch failed");
                Ok(FetchResult::failure(PROVIDER_ID, format!("{e:#}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gateway::{END_PARAM, START_PARAM, SYMBOL_PARAM};
    use crate::core::table::Value;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    pub async fn create_mock_server(symbol: &str, status: u16, body: &str) -> MockServer {
        let mock_server = MockServer::start().await;
        let request_path = format!("/v8/finance/chart/{symbol}");

        Mock::given(method("GET"))
            .and(path(request_path))
            .respond_with(ResponseTemplate::new(status).set_body_string(body))
            .mount(&mock_server)
            .await;

        mock_server
    }

    fn gateway(uri: &str) -> YahooFinanceGateway {
        YahooFinanceGateway::new(uri, Duration::from_secs(5)).unwrap()
    }

    fn query(symbol: &str) -> Query {
        Query::new(PROVIDER_ID, EQUITY_HISTORICAL)
            .with_param(SYMBOL_PARAM, symbol)
            .with_param(START_PARAM, "2024-01-02")
            .with_param(END_PARAM, "2024-01-03")
    }

    const HISTORY: &str = r#"{
        "chart": {
            "result": [{
                "meta": {
                    "currency": "USD",
                    "symbol": "AAPL",
                    "gmtoffset": -18000
                },
                "timestamp": [1704205800, 1704292200],
                "indicators": {
                    "quote": [{
                        "open": [187.15, 184.22],
                        "high": [188.44, 185.88],
                        "low": [183.89, 183.43],
                        "close": [185.64, null],
                        "volume": [82488700, 58414500]
                    }]
                }
            }],
            "error": null
        }
    }"#;

    #[tokio::test]
    async fn test_successful_history_fetch() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/AAPL"))
            .and(query_param("period1", "1704153600"))
            .and(query_param("period2", "1704326400"))
            .and(query_param("interval", "1d"))
            .respond_with(ResponseTemplate::new(200).set_body_string(HISTORY))
            .mount(&mock_server)
            .await;

        let result = gateway(&mock_server.uri())
            .fetch(&query("AAPL"))
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.provider, PROVIDER_ID);
        let table = &result.table;
        assert_eq!(table.len(), 2);
        assert_eq!(
            table.column_names().collect::<Vec<_>>(),
            vec!["date", "open", "high", "low", "close", "volume"]
        );
        assert_eq!(
            table.column("date").unwrap().values[0],
            Value::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap())
        );
        assert_eq!(table.float_column("close").unwrap(), vec![Some(185.64), None]);
        assert_eq!(table.float_column("volume").unwrap()[1], Some(58414500.0));
    }

    #[tokio::test]
    async fn test_no_trading_days_is_empty_success() {
        let body = r#"{"chart": {"result": [{"meta": {"gmtoffset": 0}, "indicators": {"quote": [{}]}}], "error": null}}"#;
        let mock_server = create_mock_server("AAPL", 200, body).await;

        let result = gateway(&mock_server.uri())
            .fetch(&query("AAPL"))
            .await
            .unwrap();
        assert!(result.is_success());
        assert!(result.table.is_empty());
        assert!(result.table.has_column("close"));
    }

    #[tokio::test]
    async fn test_no_result_data_is_failure() {
        let mock_server = create_mock_server("INVALID", 200, r#"{"chart": {"result": []}}"#).await;

        let result = gateway(&mock_server.uri())
            .fetch(&query("INVALID"))
            .await
            .unwrap();
        assert!(!result.is_success());
        assert_eq!(
            result.diagnostic(),
            Some("No price data found for symbol: INVALID")
        );
    }

    #[tokio::test]
    async fn test_http_error_is_failure() {
        let body = r#"{"chart": {"result": null, "error": {"code": "Not Found", "description": "No data found, symbol may be delisted"}}}"#;
        let mock_server = create_mock_server("GONE", 404, body).await;

        let result = gateway(&mock_server.uri())
            .fetch(&query("GONE"))
            .await
            .unwrap();
        assert_eq!(
            result.diagnostic(),
            Some("HTTP error: 404 Not Found for symbol: GONE (No data found, symbol may be delisted)")
        );

        let mock_server = create_mock_server("AAPL", 500, "").await;
        let result = gateway(&mock_server.uri())
            .fetch(&query("AAPL"))
            .await
            .unwrap();
        assert_eq!(
            result.diagnostic(),
            Some("HTTP error: 500 Internal Server Error for symbol: AAPL")
        );
    }

    #[tokio::test]
    async fn test_malformed_response_is_failure() {
        let mock_server = create_mock_server("AAPL", 200, r#"{"charts": {}}"#).await;

        let result = gateway(&mock_server.uri())
            .fetch(&query("AAPL"))
            .await
            .unwrap();
        assert!(
            result
                .diagnostic()
                .unwrap()
                .contains("Failed to parse JSON response for AAPL")
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_failure() {
        // Reserve a port and release it so nothing is listening there
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let uri = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let result = gateway(&uri).fetch(&query("AAPL")).await.unwrap();
        assert!(result.diagnostic().unwrap().starts_with("Request error:"));
    }

    #[tokio::test]
    async fn test_invalid_query_makes_no_request() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(HISTORY))
            .expect(0)
            .mount(&mock_server)
            .await;
        let gateway = gateway(&mock_server.uri());

        let reversed = query("AAPL")
            .with_param(START_PARAM, "2024-02-01")
            .with_param(END_PARAM, "2024-01-01");
        assert!(matches!(
            gateway.fetch(&reversed).await,
            Err(PipelineError::InvalidQuery(_))
        ));

        let no_symbol = Query::new(PROVIDER_ID, EQUITY_HISTORICAL);
        assert!(gateway.fetch(&no_symbol).await.is_err());

        let bad_function = Query::new(PROVIDER_ID, "news.world").with_param(SYMBOL_PARAM, "AAPL");
        assert!(gateway.validate(&bad_function).is_err());

        let other_provider = Query::new("fmp", EQUITY_HISTORICAL).with_param(SYMBOL_PARAM, "AAPL");
        assert!(gateway.validate(&other_provider).is_err());
    }

    #[tokio::test]
    async fn test_reserved_characters_in_symbol_are_encoded() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v8/finance/chart/AAPL%23x"))
            .and(query_param("period1", "1704067200"))
            .and(query_param("period2", "1704499200"))
            .and(query_param("interval", "1d"))
            .respond_with(ResponseTemplate::new(200).set_body_string(HISTORY))
            .expect(1)
            .mount(&mock_server)
            .await;

        let query = Query::new(PROVIDER_ID, EQUITY_HISTORICAL)
            .with_param(SYMBOL_PARAM, "AAPL#x")
            .with_param(START_PARAM, "2024-01-01")
            .with_param(END_PARAM, "2024-01-05");
        let result = gateway(&mock_server.uri()).fetch(&query).await.unwrap();
        assert!(result.is_success(), "{:?}", result.diagnostic());
    }

    #[tokio::test]
    async fn test_out_of_range_end_date_is_rejected_before_request() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(HISTORY))
            .expect(0)
            .mount(&mock_server)
            .await;
        let gateway = gateway(&mock_server.uri());

        let latest = NaiveDate::MAX.format("%Y-%m-%d").to_string();
        let query = query("AAPL").with_param(END_PARAM, latest);
        assert!(matches!(
            gateway.validate(&query),
            Err(PipelineError::InvalidQuery(_))
        ));
        assert!(matches!(
            gateway.fetch(&query).await,
            Err(PipelineError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_base_url_must_parse() {
        assert!(YahooFinanceGateway::new("not a url", Duration::from_secs(1)).is_err());
        assert!(YahooFinanceGateway::new("http://localhost:9/api/", Duration::from_secs(1)).is_ok());
    }
}
