//! Article corpus input
//!
//! Articles are read from a JSON array of `{id, title, content}` objects and
//! processed in ascending id order, which is what the session resume marker
//! relies on.

use crate::error::{CodebookError, CodebookResult};
use crate::types::ArticleId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub title: String,
    pub content: String,
}

impl Article {
    pub fn new(id: ArticleId, title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            content: content.into(),
        }
    }
}

/// Parse, sort and check a JSON article array
pub fn parse_articles(json: &str) -> CodebookResult<Vec<Article>> {
    let mut articles: Vec<Article> = serde_json::from_str(json)?;
    articles.sort_by_key(|a| a.id);

    if let Some(pair) = articles.windows(2).find(|pair| pair[0].id == pair[1].id) {
        return Err(CodebookError::Validation(format!(
            "Duplicate article id {}",
            pair[0].id
        )));
    }

    Ok(articles)
}

pub fn load_articles(path: &Path) -> CodebookResult<Vec<Article>> {
    let content = std::fs::read_to_string(path)?;
    let articles = parse_articles(&content)?;

    info!(
        path = %path.display(),
        count = articles.len(),
        first_id = ?articles.first().map(|a| a.id),
        last_id = ?articles.last().map(|a| a.id),
        "Loaded articles"
    );
    Ok(articles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sorts_by_id() {
        let articles = parse_articles(
            r#"[
                {"id": 7, "title": "Later", "content": "b"},
                {"id": 2, "title": "Earlier", "content": "a"}
            ]"#,
        )
        .unwrap();

        let ids: Vec<u64> = articles.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![2, 7]);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = parse_articles(
            r#"[{"id": 1, "title": "a", "content": "x"}, {"id": 1, "title": "b", "content": "y"}]"#,
        )
        .unwrap_err();
        assert!(matches!(err, CodebookError::Validation(_)));
    }

    #[test]
    fn test_missing_field_is_json_error() {
        let err = parse_articles(r#"[{"id": 1, "title": "a"}]"#).unwrap_err();
        assert!(matches!(err, CodebookError::Json(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("articles.json");
        std::fs::write(&path, r#"[{"id": 3, "title": "t", "content": "c"}]"#).unwrap();

        let articles = load_articles(&path).unwrap();
        assert_eq!(articles, vec![Article::new(3, "t", "c")]);
    }
}
