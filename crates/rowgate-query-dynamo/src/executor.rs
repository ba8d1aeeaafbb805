use crate::convert::{from_item, to_attribute, to_item};
use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_sdk_dynamodb::config::{Credentials, Region, SharedCredentialsProvider};
use aws_sdk_dynamodb::error::{DisplayErrorContext, SdkError};
use aws_sdk_dynamodb::types::{AttributeValue, DeleteRequest, WriteRequest};
use aws_sdk_dynamodb::Client;
use rowgate_query::{
    AccessPlan, ConnectionConfig, DataRow, Executor, QueryError, RawResultSet, Result,
    WideColumnMode, WideColumnPlan,
};
use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// BatchWriteItem accepts at most this many requests per call
const BATCH_WRITE_LIMIT: usize = 25;
const BATCH_WRITE_ATTEMPTS: usize = 5;

type Item = HashMap<String, AttributeValue>;

/// Runs wide-column plans against DynamoDB
pub struct DynamoExecutor {
    client: Client,
    timeout: Duration,
}

impl DynamoExecutor {
    /// Create a client from configuration.
    ///
    /// `username`/`password` are used as access key and secret when present;
    /// otherwise the default AWS credential chain applies. `endpoint`
    /// points the client at DynamoDB Local or another compatible service.
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        let region = config.region.clone().unwrap_or_else(|| "us-east-1".to_string());
        debug!("Creating DynamoDB client for region: {}", region);

        let region_provider = RegionProviderChain::first_try(Region::new(region));
        let mut loader =
            aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region_provider);

        if let (Some(access_key), Some(secret_key)) = (&config.username, &config.password) {
            let credentials = Credentials::new(access_key, secret_key, None, None, "rowgate");
            loader = loader.credentials_provider(SharedCredentialsProvider::new(credentials));
        }

        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        let client = Client::new(&sdk_config);

        debug!("DynamoDB client created for backend '{}'", config.name);

        Ok(Self::with_client(
            client,
            Duration::from_millis(config.timeout_ms),
        ))
    }

    pub fn with_client(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn timed<T, E, R, F>(&self, op: &str, table: &str, call: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, SdkError<E, R>>>,
        E: std::error::Error + Send + Sync + 'static,
        R: std::fmt::Debug,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Err(_) => Err(QueryError::QueryTimeout(self.timeout.as_millis() as u64)),
            Ok(Ok(out)) => Ok(out),
            Ok(Err(e)) => {
                error!("DynamoDB {} on '{}' failed: {}", op, table, DisplayErrorContext(&e));
                Err(match e {
                    SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => {
                        QueryError::BackendUnavailable(format!("{} on '{}': {}", op, table, e))
                    }
                    other => QueryError::BackendFailure(format!(
                        "{} on '{}': {}",
                        op,
                        table,
                        DisplayErrorContext(&other)
                    )),
                })
            }
        }
    }

    fn expression_maps(plan: &WideColumnPlan) -> (Option<HashMap<String, String>>, Option<Item>) {
        let names = (!plan.names.is_empty()).then(|| plan.names.iter().cloned().collect());
        let values = (!plan.values.is_empty()).then(|| {
            plan.values
                .iter()
                .map(|(k, v)| (k.clone(), to_attribute(v)))
                .collect()
        });
        (names, values)
    }

    fn page_limit(plan: &WideColumnPlan) -> Option<i32> {
        plan.limit.map(|l| l.min(i32::MAX as u64) as i32)
    }

    async fn get_item(&self, plan: &WideColumnPlan) -> Result<Vec<DataRow>> {
        let key = to_item(plan.key.iter().map(|(k, v)| (k, v)));
        let out = self
            .timed(
                "GetItem",
                &plan.table,
                self.client
                    .get_item()
                    .table_name(&plan.table)
                    .set_key(Some(key))
                    .send(),
            )
            .await?;
        Ok(out.item().map(from_item).into_iter().collect())
    }

    async fn query(&self, plan: &WideColumnPlan) -> Result<(Vec<DataRow>, bool)> {
        let (names, values) = Self::expression_maps(plan);
        let index = if plan.index_is_primary {
            None
        } else {
            plan.index.clone()
        };

        let mut rows = Vec::new();
        let mut start: Option<Item> = None;
        loop {
            let out = self
                .timed(
                    "Query",
                    &plan.table,
                    self.client
                        .query()
                        .table_name(&plan.table)
                        .set_index_name(index.clone())
                        .set_key_condition_expression(plan.key_condition.clone())
                        .set_filter_expression(plan.filter.clone())
                        .set_expression_attribute_names(names.clone())
                        .set_expression_attribute_values(values.clone())
                        .set_limit(Self::page_limit(plan))
                        .scan_index_forward(plan.scan_forward)
                        .set_exclusive_start_key(start.take())
                        .send(),
                )
                .await?;

            rows.extend(out.items().iter().map(from_item));
            start = out.last_evaluated_key().cloned();

            // A limited read is one page; an unlimited one follows the cursor
            if plan.limit.is_some() || start.is_none() {
                return Ok((rows, start.is_some()));
            }
        }
    }

    async fn scan(&self, plan: &WideColumnPlan) -> Result<(Vec<DataRow>, bool)> {
        let (names, values) = Self::expression_maps(plan);

        let mut rows = Vec::new();
        let mut start: Option<Item> = None;
        loop {
            let out = self
                .timed(
                    "Scan",
                    &plan.table,
                    self.client
                        .scan()
                        .table_name(&plan.table)
                        .set_filter_expression(plan.filter.clone())
                        .set_expression_attribute_names(names.clone())
                        .set_expression_attribute_values(values.clone())
                        .set_limit(Self::page_limit(plan))
                        .set_exclusive_start_key(start.take())
                        .send(),
                )
                .await?;

            rows.extend(out.items().iter().map(from_item));
            start = out.last_evaluated_key().cloned();

            if plan.limit.is_some() || start.is_none() {
                return Ok((rows, start.is_some()));
            }
        }
    }

    async fn put_item(&self, plan: &WideColumnPlan) -> Result<Vec<DataRow>> {
        let item = plan
            .item
            .as_ref()
            .ok_or_else(|| QueryError::Internal("PutItem plan without an item".into()))?;

        self.timed(
            "PutItem",
            &plan.table,
            self.client
                .put_item()
                .table_name(&plan.table)
                .set_item(Some(to_item(item)))
                .send(),
        )
        .await?;
        Ok(vec![item.clone()])
    }

    async fn batch_delete(&self, plan: &WideColumnPlan) -> Result<u64> {
        let requests = plan
            .delete_keys
            .iter()
            .map(|key| {
                let delete = DeleteRequest::builder()
                    .set_key(Some(to_item(key.iter().map(|(k, v)| (k, v)))))
                    .build()
                    .map_err(|e| QueryError::Internal(format!("invalid delete request: {}", e)))?;
                Ok(WriteRequest::builder().delete_request(delete).build())
            })
            .collect::<Result<Vec<_>>>()?;

        for chunk in requests.chunks(BATCH_WRITE_LIMIT) {
            let mut pending = chunk.to_vec();
            let mut attempts = 0;
            while !pending.is_empty() {
                attempts += 1;
                if attempts > BATCH_WRITE_ATTEMPTS {
                    return Err(QueryError::BackendFailure(format!(
                        "{} deletes on '{}' stayed unprocessed after {} attempts",
                        pending.len(),
                        plan.table,
                        BATCH_WRITE_ATTEMPTS
                    )));
                }

                let out = self
                    .timed(
                        "BatchWriteItem",
                        &plan.table,
                        self.client
                            .batch_write_item()
                            .request_items(&plan.table, pending)
                            .send(),
                    )
                    .await?;

                pending = out
                    .unprocessed_items()
                    .and_then(|u| u.get(&plan.table))
                    .cloned()
                    .unwrap_or_default();
                if !pending.is_empty() {
                    warn!(
                        "{} deletes on '{}' unprocessed, resubmitting",
                        pending.len(),
                        plan.table
                    );
                }
            }
        }

        Ok(plan.delete_keys.len() as u64)
    }
}

#[async_trait]
impl Executor for DynamoExecutor {
    async fn execute(&self, plan: &AccessPlan) -> Result<RawResultSet> {
        let AccessPlan::WideColumn(plan) = plan else {
            return Err(QueryError::Internal(format!(
                "DynamoDB cannot execute a {} plan",
                plan.backend_kind()
            )));
        };

        debug!("Executing DynamoDB plan: {}", plan);
        let start = Instant::now();
        let elapsed = || start.elapsed().as_millis() as u64;

        let result = match plan.mode {
            WideColumnMode::GetItem => RawResultSet::new(self.get_item(plan).await?, elapsed()),
            WideColumnMode::Query | WideColumnMode::Scan => {
                let (rows, has_more) = if plan.mode == WideColumnMode::Query {
                    self.query(plan).await?
                } else {
                    self.scan(plan).await?
                };
                let mut result = RawResultSet::new(rows, elapsed());
                result.stats.has_more = has_more;
                result
            }
            WideColumnMode::PutItem => {
                let mut result = RawResultSet::new(self.put_item(plan).await?, elapsed());
                result.stats.rows_affected = 1;
                result
            }
            WideColumnMode::BatchDelete => {
                RawResultSet::affected(self.batch_delete(plan).await?, elapsed())
            }
        };

        debug!(
            "DynamoDB returned {} items ({} affected) in {}ms",
            result.stats.row_count, result.stats.rows_affected, result.stats.execution_ms
        );
        Ok(result)
    }
}
