//! Topic lookup over a paginated [`TopicDirectory`].

use std::collections::HashSet;

use tracing::debug;

use crate::error::{IngestionError, IngestionResult};
use crate::store::TopicDirectory;

/// Find the topic whose last `:`-separated segment equals `name`.
///
/// Every page is visited before concluding the topic does not exist. A continuation token
/// seen twice is reported as an upstream error instead of looping forever.
pub fn resolve_topic(directory: &dyn TopicDirectory, name: &str) -> IngestionResult<Option<String>> {
    let mut token: Option<String> = None;
    let mut seen_tokens = HashSet::new();
    let mut pages: usize = 0;
    loop {
        let page = directory.list_topics(token.as_deref())?;
        pages += 1;
        if let Some(found) = page.topics.into_iter().find(|t| topic_name(t) == name) {
            debug!(name, pages, topic = %found, "topic resolved");
            return Ok(Some(found));
        }
        match page.next_token {
            Some(next) => {
                if !seen_tokens.insert(next.clone()) {
                    return Err(IngestionError::Upstream(crate::store::StoreError::Backend {
                        operation: "list_topics".to_string(),
                        message: format!("continuation token '{next}' repeated"),
                    }));
                }
                token = Some(next);
            }
            None => {
                debug!(name, pages, "topic not found");
                return Ok(None);
            }
        }
    }
}

fn topic_name(handle: &str) -> &str {
    handle.rsplit(':').next().unwrap_or(handle)
}
