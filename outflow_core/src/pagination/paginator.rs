use crate::client::GuardedSource;
use crate::pagination::{Batch, PageState, split_read};
use crate::protocol::SyncConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Names of the template variables a paginated connector expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationVariables {
    pub limit: String,
    pub offset: String,
    /// Variable receiving the last seen cursor value, when paging by cursor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

impl Default for PaginationVariables {
    fn default() -> Self {
        Self {
            limit: "limit".to_string(),
            offset: "offset".to_string(),
            cursor: None,
        }
    }
}

/// Loop for connectors whose query is a template with `{{ limit }}`-style
/// placeholders (API endpoints, search queries) rather than SQL.
pub struct Paginator {
    client: GuardedSource,
    sync_config: SyncConfig,
    template: String,
    variables: PaginationVariables,
    state: PageState,
}

impl Paginator {
    pub fn new(
        client: GuardedSource,
        sync_config: SyncConfig,
        variables: PaginationVariables,
        batch_size: usize,
    ) -> Result<Self> {
        let state = PageState::new(batch_size, &sync_config)?;
        if variables.limit.trim().is_empty() || variables.offset.trim().is_empty() {
            return Err(Error::InvalidInput(
                "pagination variable names must not be empty".to_string(),
            ));
        }
        Ok(Self {
            template: sync_config.model.query.clone(),
            client,
            sync_config,
            variables,
            state,
        })
    }

    #[tracing::instrument(level = "debug", skip(self), fields(sync_id = %self.sync_config.sync_id, batch = self.state.batches + 1))]
    pub async fn next_batch(&mut self) -> Option<Batch> {
        if self.state.done {
            return None;
        }
        let mut vars = Map::new();
        vars.insert(self.variables.limit.clone(), Value::from(self.state.batch_size));
        vars.insert(self.variables.offset.clone(), Value::from(self.state.offset));
        if let Some(name) = &self.variables.cursor {
            let cursor = self.state.last_cursor.clone().unwrap_or_default();
            vars.insert(name.clone(), Value::String(cursor));
        }
        let query = match render_query(&self.template, &vars) {
            Ok(q) => q,
            Err(e) => {
                self.state.fail(e.to_string());
                return None;
            }
        };

        let mut cfg = self.sync_config.with_query(query);
        cfg.limit = Some(self.state.batch_size);
        cfg.offset = Some(self.state.offset);
        cfg.current_cursor_field = self.state.last_cursor.clone();
        let outcome = split_read(self.client.read(&cfg).await);
        self.state.accept(outcome)
    }

    pub fn error(&self) -> Option<&str> {
        self.state.error.as_deref()
    }

    pub fn batches(&self) -> u64 {
        self.state.batches
    }
}

/// Substitute `{{ name }}` placeholders with `vars[name]`. Unknown
/// placeholders are left as they are.
pub fn render_query(template: &str, vars: &Map<String, Value>) -> Result<String> {
    let re = regex::Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}")
        .map_err(|e| Error::BackendMessage(format!("template regex error: {e}")))?;
    let rendered = re.replace_all(template, |caps: &regex::Captures<'_>| {
        match vars.get(&caps[1]) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => caps[0].to_string(),
        }
    });
    Ok(rendered.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::QueryType;
    use crate::test_support::{TableSource, sample_sync};
    use serde_json::json;
    use std::sync::Arc;

    fn config(template: &str) -> SyncConfig {
        let mut sync = sample_sync();
        sync.model.query = template.to_string();
        sync.model.query_type = QueryType::Template;
        SyncConfig::for_sync(&sync, None).unwrap()
    }

    #[test]
    fn renders_named_variables() {
        let mut vars = Map::new();
        vars.insert("page_size".into(), json!(50));
        vars.insert("start".into(), json!(100));
        vars.insert("after".into(), json!("2024-01-01"));
        let q = render_query(
            "/contacts?count={{page_size}}&skip={{ start }}&after={{after}}&x={{unknown}}",
            &vars,
        )
        .unwrap();
        assert_eq!(q, "/contacts?count=50&skip=100&after=2024-01-01&x={{unknown}}");
    }

    #[tokio::test]
    async fn zero_batch_size_is_rejected() {
        let source = Arc::new(TableSource::new(vec![]));
        let res = Paginator::new(
            GuardedSource::new("api", source.clone()),
            config("q"),
            PaginationVariables::default(),
            0,
        );
        assert!(matches!(res, Err(Error::InvalidInput(_))));
        assert_eq!(source.reads(), 0);
    }

    #[tokio::test]
    async fn renders_each_page_until_empty() {
        let rows = (1..=3).map(|i| json!({"id": i})).collect();
        let source = Arc::new(TableSource::new(rows));
        let vars = PaginationVariables {
            limit: "take".into(),
            offset: "skip".into(),
            cursor: None,
        };
        let mut p = Paginator::new(
            GuardedSource::new("api", source.clone()),
            config("GET /rows?take={{take}}&skip={{skip}}"),
            vars,
            2,
        )
        .unwrap();

        let mut total = 0;
        while let Some(batch) = p.next_batch().await {
            total += batch.records.len();
        }
        assert_eq!(total, 3);
        assert_eq!(
            source.queries(),
            vec![
                "GET /rows?take=2&skip=0".to_string(),
                "GET /rows?take=2&skip=2".to_string(),
                "GET /rows?take=2&skip=4".to_string(),
            ]
        );
        assert_eq!(p.batches(), 2);
    }
}
