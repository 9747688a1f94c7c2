use reqwest::header::HeaderMap;
use serde::Deserialize;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const LIMIT: &str = "x-ratelimit-limit";
const REMAINING: &str = "x-ratelimit-remaining";
const RESET: &str = "x-ratelimit-reset";
const RESET_AFTER: &str = "x-ratelimit-reset-after";
const BUCKET: &str = "x-ratelimit-bucket";
const GLOBAL: &str = "x-ratelimit-global";
const SCOPE: &str = "x-ratelimit-scope";
const RETRY_AFTER: &str = "retry-after";

/// Ratelimit accounting reported by the server for one response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RateLimitHeaders {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Time until the bucket resets, preferred over `reset` as it does not
    /// depend on clock skew.
    pub reset_after: Option<Duration>,
    /// Absolute reset time in seconds since the unix epoch.
    pub reset: Option<f64>,
    pub bucket: Option<String>,
    pub global: bool,
    pub scope: Option<String>,
    pub retry_after: Option<Duration>,
}

impl RateLimitHeaders {
    /// Returns `None` when the response carries no ratelimit information at all.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let parsed = Self {
            limit: parse(headers, LIMIT),
            remaining: parse(headers, REMAINING),
            reset_after: parse::<f64>(headers, RESET_AFTER).and_then(seconds),
            reset: parse(headers, RESET),
            bucket: header_str(headers, BUCKET).map(str::to_owned),
            global: header_str(headers, GLOBAL).map_or(false, |v| v.eq_ignore_ascii_case("true")),
            scope: header_str(headers, SCOPE).map(str::to_owned),
            retry_after: parse::<f64>(headers, RETRY_AFTER).and_then(seconds),
        };

        if parsed == Self::default() {
            None
        } else {
            Some(parsed)
        }
    }

    /// Duration until the bucket resets, from `reset_after` or else derived
    /// from the absolute `reset` timestamp.
    pub fn reset_in(&self) -> Option<Duration> {
        if let Some(reset_after) = self.reset_after {
            return Some(reset_after);
        }

        let reset = self.reset?;
        let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs_f64();
        seconds((reset - now).max(0.0))
    }
}

/// Body of a 429 response.
#[derive(Deserialize, Debug)]
pub struct RateLimitedBody {
    pub retry_after: f64,
    #[serde(default)]
    pub global: bool,
}

impl RateLimitedBody {
    pub fn retry_after(&self) -> Duration {
        seconds(self.retry_after).unwrap_or_default()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name)?.to_str().ok()
}

fn parse<T: FromStr>(headers: &HeaderMap, name: &str) -> Option<T> {
    header_str(headers, name)?.trim().parse().ok()
}

fn seconds(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn test_parse_bucket_headers() {
        let parsed = RateLimitHeaders::from_headers(&headers(&[
            ("x-ratelimit-limit", "5"),
            ("x-ratelimit-remaining", "4"),
            ("x-ratelimit-reset-after", "1.5"),
            ("x-ratelimit-bucket", "abcd1234"),
        ]))
        .unwrap();

        assert_eq!(parsed.limit, Some(5));
        assert_eq!(parsed.remaining, Some(4));
        assert_eq!(parsed.reset_in(), Some(Duration::from_millis(1500)));
        assert_eq!(parsed.bucket.as_deref(), Some("abcd1234"));
        assert!(!parsed.global);
    }

    #[test]
    fn test_parse_global() {
        let parsed = RateLimitHeaders::from_headers(&headers(&[
            ("x-ratelimit-global", "true"),
            ("retry-after", "3"),
        ]))
        .unwrap();

        assert!(parsed.global);
        assert_eq!(parsed.retry_after, Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_no_headers() {
        assert!(RateLimitHeaders::from_headers(&HeaderMap::new()).is_none());
        assert!(
            RateLimitHeaders::from_headers(&headers(&[("x-ratelimit-remaining", "nope")])).is_none()
        );
    }

    #[test]
    fn test_body() {
        let body: RateLimitedBody =
            serde_json::from_str(r#"{"message":"You are being rate limited.","retry_after":0.25,"global":false}"#)
                .unwrap();

        assert_eq!(body.retry_after(), Duration::from_millis(250));
        assert!(!body.global);
    }
}
