//! Serde types for response envelopes that are not domain entities.

use serde::{Deserialize, Deserializer, Serialize};

use super::types::User;

/// One page of a paginated list.
///
/// Endpoints disagree slightly on the envelope: some send `size` instead
/// of `page_size`, `pages` is often missing, and a few return a bare
/// array. All of those deserialize into this one shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub total: u64,
  pub page: u64,
  pub page_size: u64,
  pub pages: Option<u64>,
}

impl<T> Page<T> {
  /// Page count, derived from `total` when the server did not send it.
  pub fn page_count(&self) -> u64 {
    self.pages.unwrap_or_else(|| {
      if self.page_size == 0 {
        1
      } else {
        self.total.div_ceil(self.page_size).max(1)
      }
    })
  }

  pub fn has_next(&self) -> bool {
    self.page < self.page_count()
  }
}

impl<T> Default for Page<T> {
  fn default() -> Self {
    Self {
      items: Vec::new(),
      total: 0,
      page: 1,
      page_size: 0,
      pages: None,
    }
  }
}

#[derive(Deserialize)]
struct ApiPage<T> {
  items: Vec<T>,
  #[serde(default)]
  total: Option<u64>,
  #[serde(default)]
  page: Option<u64>,
  #[serde(default, alias = "size")]
  page_size: Option<u64>,
  #[serde(default)]
  pages: Option<u64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PageRepr<T> {
  Envelope(ApiPage<T>),
  Bare(Vec<T>),
}

impl<'de, T> Deserialize<'de> for Page<T>
where
  T: Deserialize<'de>,
{
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    Ok(match PageRepr::deserialize(deserializer)? {
      PageRepr::Envelope(page) => {
        let count = page.items.len() as u64;
        Page {
          total: page.total.unwrap_or(count),
          page: page.page.unwrap_or(1),
          page_size: page.page_size.unwrap_or(count),
          pages: page.pages,
          items: page.items,
        }
      }
      PageRepr::Bare(items) => {
        let count = items.len() as u64;
        Page {
          items,
          total: count,
          page: 1,
          page_size: count,
          pages: Some(1),
        }
      }
    })
  }
}

/// `POST /token` response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
  pub access_token: String,
  #[serde(default)]
  pub refresh_token: Option<String>,
  #[serde(default)]
  pub user: Option<User>,
}

/// `POST /token/refresh` response
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
  pub access_token: String,
  /// Some deployments rotate the refresh token as well
  #[serde(default)]
  pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RefreshRequest<'a> {
  pub refresh_token: &'a str,
}

/// `PATCH /tasks/{id}/status` body
#[derive(Debug, Serialize)]
pub struct StatusPatch {
  pub status: super::types::TaskStatus,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_page_with_size_alias_and_no_pages() {
    let page: Page<u32> =
      serde_json::from_str(r#"{"items": [1, 2], "total": 5, "page": 1, "size": 2}"#).unwrap();
    assert_eq!(page.page_size, 2);
    assert_eq!(page.pages, None);
    assert_eq!(page.page_count(), 3);
    assert!(page.has_next());
  }

  #[test]
  fn test_page_with_page_size() {
    let page: Page<u32> = serde_json::from_str(
      r#"{"items": [1], "total": 1, "page": 1, "page_size": 50, "pages": 1}"#,
    )
    .unwrap();
    assert_eq!(page.page_size, 50);
    assert!(!page.has_next());
  }

  #[test]
  fn test_bare_array_is_single_page() {
    let page: Page<u32> = serde_json::from_str("[4, 5, 6]").unwrap();
    assert_eq!(page.items, vec![4, 5, 6]);
    assert_eq!(page.total, 3);
    assert_eq!(page.page_count(), 1);
  }

  #[test]
  fn test_serialized_page_reads_back() {
    let page = Page {
      items: vec![1u32],
      total: 1,
      page: 1,
      page_size: 10,
      pages: None,
    };
    let value = serde_json::to_value(&page).unwrap();
    let back: Page<u32> = serde_json::from_value(value).unwrap();
    assert_eq!(back, page);
  }
}
