use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{HeaderMap, LINK};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::client::{ApiRequest, ApiResponse, PartnerClient};
use crate::error::{ClientError, ClientResult};

static NEXT_LINK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<([^>]+)>\s*;[^,]*rel\s*=\s*"?next"?"#).expect("invalid regex")
});

/// Target of the `rel="next"` entry across all `Link` headers, if any.
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|raw| {
            NEXT_LINK
                .captures(raw)
                .and_then(|caps| caps.get(1))
                .map(|url| url.as_str().trim().to_string())
        })
        .filter(|url| !url.is_empty())
}

#[derive(Deserialize)]
struct ItemsPage<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// Items gathered by [`fetch_all`]. When `error` is set the walk stopped early
/// and `items` holds whatever was collected before the failing page.
#[derive(Debug)]
pub struct Collected<T> {
    pub items: Vec<T>,
    pub pages: u32,
    pub error: Option<ClientError>,
}

impl<T> Collected<T> {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> ClientResult<Vec<T>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.items),
        }
    }
}

/// Walks a collection endpoint page by page, following `Link: rel="next"`.
///
/// Items keep the order the platform returned them in; nothing is deduplicated.
pub async fn fetch_all<T: DeserializeOwned>(
    client: &PartnerClient,
    request: ApiRequest,
) -> Collected<T> {
    let mut items = Vec::new();
    let mut pages = 0u32;
    let mut current = request;

    loop {
        let response = match client
            .request(&current)
            .await
            .and_then(ApiResponse::error_for_status)
        {
            Ok(response) => response,
            Err(err) => {
                return Collected {
                    items,
                    pages,
                    error: Some(err),
                }
            }
        };
        pages += 1;

        match response.json::<ItemsPage<T>>() {
            Ok(page) => items.extend(page.items),
            Err(err) => {
                return Collected {
                    items,
                    pages,
                    error: Some(err),
                }
            }
        }

        match response.next_link() {
            Some(next) => {
                debug!(call_type = current.call_type, page = pages, %next, "following next page");
                current = current.with_url(next);
            }
            None => break,
        }
    }

    Collected {
        items,
        pages,
        error: None,
    }
}
