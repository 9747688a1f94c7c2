use reqwest::Method;
use std::fmt;

/// Resources whose id scopes the ratelimit bucket. Ids following any other
/// segment are replaced with a placeholder so that e.g. every message in a
/// channel shares one bucket.
const MAJOR_RESOURCES: &[&str] = &["channels", "guilds", "webhooks", "interactions"];

/// Major resources whose id is followed by a token that is also part of the
/// bucket identity.
const TOKENED_RESOURCES: &[&str] = &["webhooks", "interactions"];

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Route {
    method: Method,
    path: String,
    bucket_key: String,
}

impl Route {
    /// `path` is relative to the API base, e.g. `/channels/1234/messages`.
    /// A query string, if present, is ignored for bucketing.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let mut path = path.into();
        if !path.starts_with('/') {
            path.insert(0, '/');
        }

        let bucket_key = bucket_key(&method, &path);

        Self {
            method,
            path,
            bucket_key,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Method plus templated path with major parameters substituted.
    pub fn bucket_key(&self) -> &str {
        &self.bucket_key
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

fn bucket_key(method: &Method, path: &str) -> String {
    let path = path.split('?').next().unwrap_or_default();
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let mut templated = Vec::with_capacity(segments.len());
    for (i, segment) in segments.iter().enumerate() {
        let previous = i.checked_sub(1).map(|i| segments[i]);
        let before_previous = i.checked_sub(2).map(|i| segments[i]);

        let keep = match previous {
            Some(prev) if MAJOR_RESOURCES.contains(&prev) => true,
            _ => before_previous.map_or(false, |r| TOKENED_RESOURCES.contains(&r)),
        };

        if keep {
            templated.push(*segment);
        } else if previous == Some("reactions") {
            // every emoji shares the reaction bucket
            templated.push("{emoji}");
        } else if is_id(segment) {
            templated.push("{id}");
        } else {
            templated.push(*segment);
        }
    }

    format!("{} /{}", method, templated.join("/"))
}

fn is_id(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}
