use async_trait::async_trait;
use reqwest::StatusCode;
use rowgate_query::{
    AccessPlan, ConnectionConfig, DataRow, Executor, QueryError, RawResultSet, Result, SearchPlan,
};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::{debug, error};
use url::Url;

/// Sends search plans to the `_search` endpoint of an Elasticsearch cluster
#[derive(Debug, Clone)]
pub struct ElasticExecutor {
    client: reqwest::Client,
    base: Url,
    credentials: Option<(String, Option<String>)>,
    timeout_ms: u64,
}

impl ElasticExecutor {
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        let raw = match (&config.endpoint, &config.host) {
            (Some(endpoint), _) => endpoint.clone(),
            (None, Some(host)) => format!("http://{}:{}", host, config.port.unwrap_or(9200)),
            (None, None) => {
                return Err(QueryError::InvalidConfiguration(format!(
                    "backend '{}' needs an endpoint or host",
                    config.name
                )))
            }
        };

        let base = Url::parse(&raw).map_err(|e| {
            QueryError::InvalidConfiguration(format!("invalid search endpoint '{}': {}", raw, e))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| QueryError::InvalidConfiguration(format!("http client: {}", e)))?;

        debug!("Search backend '{}' at {}", config.name, base);

        Ok(Self {
            client,
            base,
            credentials: config
                .username
                .clone()
                .map(|user| (user, config.password.clone())),
            timeout_ms: config.timeout_ms,
        })
    }

    fn search_url(&self, index: &str) -> Result<Url> {
        self.base
            .join(&format!("{}/_search", urlencode_segment(index)))
            .map_err(|e| QueryError::Internal(format!("search url for '{}': {}", index, e)))
    }

    async fn search(&self, plan: &SearchPlan) -> Result<Value> {
        let url = self.search_url(&plan.index)?;
        let mut request = self.client.post(url).json(&plan.body);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_ref());
        }

        let response = request.send().await.map_err(|e| {
            error!("Search request on '{}' failed: {}", plan.index, e);
            if e.is_timeout() {
                QueryError::QueryTimeout(self.timeout_ms)
            } else if e.is_connect() {
                QueryError::BackendUnavailable(e.to_string())
            } else {
                QueryError::backend(e.to_string())
            }
        })?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| QueryError::backend(format!("unreadable search response: {}", e)))?;

        if status == StatusCode::NOT_FOUND {
            return Err(QueryError::not_found(format!("index '{}'", plan.index)));
        }
        if !status.is_success() {
            error!("Search on '{}' returned {}: {}", plan.index, status, body);
            return Err(QueryError::backend(format!(
                "search on '{}' returned {}",
                plan.index, status
            )));
        }
        Ok(body)
    }
}

fn urlencode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

/// Pull `_source` documents and the total hit count out of a search response
fn read_hits(body: &Value) -> (Vec<DataRow>, Option<u64>) {
    let hits = &body["hits"];
    let rows = hits["hits"]
        .as_array()
        .map(|hits| {
            hits.iter()
                .filter_map(|hit| hit["_source"].as_object().cloned())
                .collect()
        })
        .unwrap_or_default();
    let total = match &hits["total"] {
        Value::Number(n) => n.as_u64(),
        other => other["value"].as_u64(),
    };
    (rows, total)
}

#[async_trait]
impl Executor for ElasticExecutor {
    async fn execute(&self, plan: &AccessPlan) -> Result<RawResultSet> {
        let AccessPlan::Search(plan) = plan else {
            return Err(QueryError::Internal(format!(
                "search backend cannot execute a {} plan",
                plan.backend_kind()
            )));
        };

        debug!("Executing search plan: {}", plan);
        let start = Instant::now();
        let body = self.search(plan).await?;
        let (rows, total) = read_hits(&body);

        let from = plan.body["from"].as_u64().unwrap_or(0);
        let fetched = from + rows.len() as u64;
        let mut result = RawResultSet::new(rows, start.elapsed().as_millis() as u64);
        result.stats.has_more = total.is_some_and(|t| t > fetched);
        Ok(result)
    }
}
