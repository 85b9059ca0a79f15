//! Binance spot REST data provider.
//!
//! Two endpoints are used: the 24h ticker snapshot for universe ranking and
//! live prices, and the klines endpoint for historical candles. Klines come
//! back as positional JSON arrays with prices encoded as strings.
//!
//! No retries happen here. A non-success status is a fatal error for the
//! call; request budgeting is the fetcher's job.

use super::provider::{DataError, Kline, KlineQuery, MarketDataProvider, Ticker};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";

const TICKER_PATH: &str = "/api/v3/ticker/24hr";
const KLINES_PATH: &str = "/api/v3/klines";

/// 24h ticker entry. Numeric fields arrive as strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerEntry {
    symbol: String,
    last_price: String,
    quote_volume: String,
}

/// Binance error body, e.g. `{"code":-1121,"msg":"Invalid symbol."}`.
#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

/// Binance spot data provider.
pub struct BinanceProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: Option<String>,
}

impl BinanceProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        })
    }

    /// Public endpoints, default base URL, 30s timeout.
    pub fn public() -> Result<Self, DataError> {
        Self::new(DEFAULT_BASE_URL, None, Duration::from_secs(30))
    }

    fn get(&self, path: &str, params: &[(&str, String)]) -> Result<String, DataError> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.client.get(&url).query(params);
        if let Some(key) = &self.api_key {
            request = request.header("X-MBX-APIKEY", key);
        }

        let resp = request
            .send()
            .map_err(|e| DataError::NetworkUnreachable(e.to_string()))?;
        let status = resp.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 418 {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(DataError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        let body = resp
            .text()
            .map_err(|e| DataError::NetworkUnreachable(e.to_string()))?;

        if !status.is_success() {
            let message = match serde_json::from_str::<ApiError>(&body) {
                Ok(err) => format!("{} (code {})", err.msg, err.code),
                Err(_) => body,
            };
            return Err(DataError::Http {
                status: status.as_u16(),
                message,
            });
        }

        Ok(body)
    }
}

impl MarketDataProvider for BinanceProvider {
    fn name(&self) -> &str {
        "binance"
    }

    fn ticker_snapshot(&self) -> Result<Vec<Ticker>, DataError> {
        let body = self.get(TICKER_PATH, &[])?;
        parse_tickers(&body)
    }

    fn klines(&self, query: &KlineQuery) -> Result<Vec<Kline>, DataError> {
        let params = [
            ("symbol", query.symbol.clone()),
            ("interval", query.interval.as_str().to_string()),
            ("startTime", query.start.timestamp_millis().to_string()),
            ("endTime", query.end.timestamp_millis().to_string()),
            ("limit", query.limit.to_string()),
        ];
        let body = match self.get(KLINES_PATH, &params) {
            Err(DataError::Http { status: 400, message }) if message.contains("-1121") => {
                return Err(DataError::SymbolNotFound {
                    symbol: query.symbol.clone(),
                })
            }
            other => other?,
        };
        parse_klines(&body)
    }
}

/// Parse the 24h ticker snapshot body.
pub fn parse_tickers(body: &str) -> Result<Vec<Ticker>, DataError> {
    let entries: Vec<TickerEntry> = serde_json::from_str(body)
        .map_err(|e| DataError::ResponseFormatChanged(format!("ticker snapshot: {e}")))?;

    entries
        .into_iter()
        .map(|e| {
            Ok(Ticker {
                last_price: parse_decimal(&e.last_price, "lastPrice")?,
                quote_volume: parse_decimal(&e.quote_volume, "quoteVolume")?,
                symbol: e.symbol,
            })
        })
        .collect()
}

/// Parse a klines body: an array of positional arrays.
///
/// Layout: `[open_time, open, high, low, close, volume, close_time,
/// quote_volume, trades, taker_base, taker_quote, ignore]`.
pub fn parse_klines(body: &str) -> Result<Vec<Kline>, DataError> {
    let rows: Vec<Vec<Value>> = serde_json::from_str(body)
        .map_err(|e| DataError::ResponseFormatChanged(format!("klines: {e}")))?;

    rows.iter().map(|row| parse_kline_row(row)).collect()
}

fn parse_kline_row(row: &[Value]) -> Result<Kline, DataError> {
    if row.len() < 9 {
        return Err(DataError::ResponseFormatChanged(format!(
            "kline row has {} fields, expected at least 9",
            row.len()
        )));
    }

    Ok(Kline {
        open_time: millis_field(&row[0], "open_time")?,
        open: decimal_field(&row[1], "open")?,
        high: decimal_field(&row[2], "high")?,
        low: decimal_field(&row[3], "low")?,
        close: decimal_field(&row[4], "close")?,
        volume: decimal_field(&row[5], "volume")?,
        close_time: millis_field(&row[6], "close_time")?,
        quote_volume: decimal_field(&row[7], "quote_volume")?,
        trades: row[8].as_u64().ok_or_else(|| {
            DataError::ResponseFormatChanged(format!("kline trades is not an integer: {}", row[8]))
        })?,
    })
}

fn millis_field(value: &Value, name: &str) -> Result<DateTime<Utc>, DataError> {
    value
        .as_i64()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| {
            DataError::ResponseFormatChanged(format!("kline {name} is not a timestamp: {value}"))
        })
}

fn decimal_field(value: &Value, name: &str) -> Result<f64, DataError> {
    match value {
        Value::String(s) => parse_decimal(s, name),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| DataError::ResponseFormatChanged(format!("kline {name} out of range"))),
        other => Err(DataError::ResponseFormatChanged(format!(
            "kline {name} has unexpected type: {other}"
        ))),
    }
}

fn parse_decimal(s: &str, name: &str) -> Result<f64, DataError> {
    s.parse::<f64>()
        .map_err(|e| DataError::ResponseFormatChanged(format!("{name} '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const KLINES_BODY: &str = r#"[
        [1699999200000,"35000.10","35100.00","34900.00","35050.50","12.5",1700000099999,"438131.25",420,"6.1","213801.5","0"],
        [1700000100000,"35050.50","35200.00","35000.00","35180.00","9.75",1700000999999,"342999.00",388,"4.0","140720.0","0"]
    ]"#;

    #[test]
    fn parses_kline_rows() {
        let klines = parse_klines(KLINES_BODY).unwrap();
        assert_eq!(klines.len(), 2);

        let k = &klines[0];
        assert_eq!(k.open_time.timestamp_millis(), 1_699_999_200_000);
        assert_eq!(k.close_time.timestamp_millis(), 1_700_000_099_999);
        assert_eq!(k.open, 35000.10);
        assert_eq!(k.close, 35050.50);
        assert_eq!(k.volume, 12.5);
        assert_eq!(k.trades, 420);
        assert_eq!(klines[1].close, 35180.0);
    }

    #[test]
    fn empty_kline_page_is_ok() {
        assert!(parse_klines("[]").unwrap().is_empty());
    }

    #[test]
    fn short_kline_row_is_format_error() {
        let err = parse_klines(r#"[[1,"2","3"]]"#).unwrap_err();
        assert!(matches!(err, DataError::ResponseFormatChanged(_)));
    }

    #[test]
    fn non_numeric_price_is_format_error() {
        let body = r#"[[1,"abc","1","1","1","1",2,"1",3,"0","0","0"]]"#;
        let err = parse_klines(body).unwrap_err();
        assert!(err.to_string().contains("open"));
    }

    #[test]
    fn parses_ticker_snapshot() {
        let body = r#"[
            {"symbol":"BTCUSDT","lastPrice":"35180.00","quoteVolume":"1250000000.5","priceChange":"10"},
            {"symbol":"ETHBTC","lastPrice":"0.0531","quoteVolume":"4100.2"}
        ]"#;
        let tickers = parse_tickers(body).unwrap();
        assert_eq!(tickers.len(), 2);
        assert_eq!(tickers[0].symbol, "BTCUSDT");
        assert_eq!(tickers[0].last_price, 35180.0);
        assert_eq!(tickers[0].quote_volume, 1_250_000_000.5);
    }

    #[test]
    fn malformed_ticker_body_is_format_error() {
        let err = parse_tickers(r#"{"code":-1}"#).unwrap_err();
        assert!(matches!(err, DataError::ResponseFormatChanged(_)));
    }

    #[test]
    fn base_url_trailing_slash_trimmed() {
        let p = BinanceProvider::new("http://localhost:9/", None, Duration::from_secs(1)).unwrap();
        assert_eq!(p.base_url, "http://localhost:9");
    }
}
