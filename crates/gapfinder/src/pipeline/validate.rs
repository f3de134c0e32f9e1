//! Submission validation: every URL must be an absolute http(s) URL within
//! the length cap. Duplicates are dropped keeping the first occurrence.

use std::collections::HashSet;

use url::Url;

use crate::error::ValidationError;

/// Validates and deduplicates a list of URLs. An empty list is accepted.
pub fn normalize_urls<S: AsRef<str>>(
    urls: &[S],
    max_items: usize,
    max_url_length: usize,
) -> Result<Vec<String>, ValidationError> {
    let mut seen = HashSet::new();
    let mut accepted = Vec::with_capacity(urls.len());

    for raw in urls {
        let trimmed = raw.as_ref().trim();
        let parsed = validate_url(trimmed, max_url_length)?;
        if seen.insert(parsed.as_str().to_string()) {
            accepted.push(trimmed.to_string());
        }
    }

    if accepted.len() > max_items {
        return Err(ValidationError::TooManyItems {
            count: accepted.len(),
            max: max_items,
        });
    }
    Ok(accepted)
}

/// Like [`normalize_urls`] but rejects a batch that ends up empty.
pub fn validate_batch<S: AsRef<str>>(
    urls: &[S],
    max_items: usize,
    max_url_length: usize,
) -> Result<Vec<String>, ValidationError> {
    let accepted = normalize_urls(urls, max_items, max_url_length)?;
    if accepted.is_empty() {
        return Err(ValidationError::EmptyBatch);
    }
    Ok(accepted)
}

pub fn validate_url(raw: &str, max_len: usize) -> Result<Url, ValidationError> {
    if raw.len() > max_len {
        return Err(ValidationError::UrlTooLong {
            len: raw.len(),
            max: max_len,
        });
    }

    let url = Url::parse(raw).map_err(|e| ValidationError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(ValidationError::UnsupportedScheme {
                url: raw.to_string(),
                scheme: other.to_string(),
            })
        }
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(ValidationError::InvalidUrl {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }

    Ok(url)
}
