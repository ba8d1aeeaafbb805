//! REST actions: the handler that plans and executes against the backend

use crate::chain::{nested_failure, Chain, Handler};
use crate::context::ContextKey;
use crate::request::{Change, Request, Response};
use async_trait::async_trait;
use http::{Method, StatusCode};
use rowgate_query::{
    AccessPlan, Collection, DataRow, DataSource, Entity, Predicate, Query, QueryError,
    RawResultSet, Result,
};
use serde_json::{json, Value};
use tracing::debug;

/// Key selections gathered by a DELETE and the nested DELETEs it replays
#[derive(Debug, Default)]
pub struct BatchDelete {
    pub fragments: Vec<AccessPlan>,
    pub predicates: Vec<Predicate>,
}

pub const BATCH_DELETE: ContextKey<BatchDelete> = ContextKey::new("batch.delete");

/// Attribute carrying a row's canonical URL in responses and bodies
const HREF: &str = "href";

/// Final handler of every chain; dispatches on the request method
#[derive(Debug, Default)]
pub struct RestAction;

#[async_trait]
impl Handler for RestAction {
    fn name(&self) -> &str {
        "rest"
    }

    async fn handle(&self, chain: &mut Chain<'_>, req: &mut Request, res: &mut Response) -> Result<()> {
        let collection = chain.gateway().collection(&req.collection)?;
        let source = chain.gateway().source_for(&collection).await?;

        match req.method {
            Method::GET => get(chain, &collection, source.as_ref(), req, res).await,
            Method::POST => post(chain, &collection, source.as_ref(), req, res).await,
            Method::PUT => put(chain, &collection, source.as_ref(), req, res).await,
            Method::DELETE => delete(chain, &collection, source.as_ref(), req, res).await,
            ref other => Err(QueryError::operation_not_supported(format!(
                "{} is not supported on collections",
                other
            ))),
        }
    }
}

async fn execute(source: &dyn DataSource, plan: &AccessPlan, res: &mut Response) -> Result<RawResultSet> {
    debug!("{}", plan);
    res.plans.push(plan.to_string());
    source.execute(plan).await
}

/// Public representation of a physical row, `href` first
fn represent(chain: &Chain<'_>, collection: &Collection, row: &DataRow) -> Value {
    let entity = &collection.entity;
    let mut out = DataRow::new();
    if let Ok(key) = entity.key_values(row) {
        let href = chain
            .gateway()
            .entity_url(&collection.name, &Entity::encode_key(&key));
        out.insert(HREF.to_string(), Value::String(href));
    }
    out.extend(entity.project_row(row));
    Value::Object(out)
}

async fn get(
    chain: &mut Chain<'_>,
    collection: &Collection,
    source: &dyn DataSource,
    req: &mut Request,
    res: &mut Response,
) -> Result<()> {
    let query = chain.gateway().query_for(collection, req)?;
    let plan = source.planner().plan_select(&collection.entity, &query)?;
    let result = execute(source, &plan, res).await?;

    if req.entity_key.is_some() && result.rows.is_empty() {
        return Err(QueryError::not_found(format!(
            "'{}' in collection '{}'",
            req.entity_key.as_deref().unwrap_or_default(),
            collection.name
        )));
    }

    let data: Vec<Value> = result
        .rows
        .iter()
        .map(|row| represent(chain, collection, row))
        .collect();

    let mut meta = json!({
        "rowCount": result.stats.row_count,
        "pageSize": query.page.size(),
        "page": query.page.number(),
    });
    if result.stats.has_more {
        meta["hasMore"] = Value::Bool(true);
    }

    res.status = StatusCode::OK;
    res.body = Some(json!({"meta": meta, "data": data}));
    Ok(())
}

/// Body object minus its `href`, in physical column names
fn physical_row(entity: &Entity, body: &serde_json::Map<String, Value>) -> Result<DataRow> {
    let mut body = body.clone();
    body.remove(HREF);
    entity.to_physical_row(&body)
}

async fn post(
    chain: &mut Chain<'_>,
    collection: &Collection,
    source: &dyn DataSource,
    req: &mut Request,
    res: &mut Response,
) -> Result<()> {
    if req.entity_key.is_some() {
        return Err(QueryError::invalid_body(
            "POST to the collection, not to an entity key",
        ));
    }

    let collection_url = chain.gateway().collection_url(&collection.name);

    match req.body.take() {
        Some(Value::Object(body)) => {
            let entity = &collection.entity;
            let row = physical_row(entity, &body)?;
            let plan = source.planner().plan_insert(entity, &row)?;
            let result = execute(source, &plan, res).await?;

            // Generated keys come back in the first row
            let mut stored = row;
            if let Some(returned) = result.rows.first() {
                stored.extend(returned.clone());
            }
            let key = Entity::encode_key(&entity.key_values(&stored)?);
            let href = chain.gateway().entity_url(&collection.name, &key);

            res.changes.push(Change::new(&Method::POST, &collection.name, key));
            res.set_header("Location", href.clone());
            res.body = Some(json!({"data": [{HREF: href}]}));
        }
        Some(Value::Array(items)) => {
            let mut data = Vec::with_capacity(items.len());
            let mut keys = Vec::with_capacity(items.len());

            for item in items {
                let child = chain
                    .include(Method::POST, &collection_url, Some(item))
                    .await?;
                if !child.is_success() {
                    return Err(nested_failure(&collection_url, &child));
                }
                if let Some(Value::Array(created)) = child.find("data") {
                    data.extend(created.iter().cloned());
                }
                keys.extend(child.changes.iter().map(|c| c.key.clone()));
                res.changes.extend(child.changes);
            }

            res.set_header("Location", format!("{}/{}", collection_url, keys.join(",")));
            res.body = Some(json!({"data": data}));
        }
        _ => {
            return Err(QueryError::invalid_body(
                "POST needs a JSON object or an array of objects",
            ))
        }
    }

    res.status = StatusCode::CREATED;
    Ok(())
}

async fn put(
    chain: &mut Chain<'_>,
    collection: &Collection,
    source: &dyn DataSource,
    req: &mut Request,
    res: &mut Response,
) -> Result<()> {
    match req.body.take() {
        Some(Value::Array(items)) => {
            if req.entity_key.is_some() {
                return Err(QueryError::invalid_body(
                    "PUT an array to the collection, not to an entity key",
                ));
            }
            for item in items {
                let href = item
                    .get(HREF)
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .ok_or_else(|| QueryError::invalid_body("every item of a PUT array needs an href"))?;
                let child = chain.include(Method::PUT, &href, Some(item)).await?;
                if !child.is_success() {
                    return Err(nested_failure(&href, &child));
                }
                res.changes.extend(child.changes);
            }
            res.body = Some(json!({"meta": {"rowsAffected": res.changes.len()}}));
        }
        Some(Value::Object(body)) => {
            let entity = &collection.entity;

            // An href in the body names the entity when the URL does not
            if req.entity_key.is_none() {
                if let Some(href) = body.get(HREF).and_then(Value::as_str) {
                    let target = chain.gateway().request(Method::PUT, href, None)?;
                    if !target.collection.eq_ignore_ascii_case(&collection.name) {
                        return Err(QueryError::invalid_body(format!(
                            "href '{}' is not in collection '{}'",
                            href, collection.name
                        )));
                    }
                    req.entity_key = target.entity_key;
                }
            }

            let query = chain.gateway().query_for(collection, req)?;
            if query.root.is_none() {
                return Err(QueryError::UnconditionalMutationRejected(format!(
                    "PUT to '{}' needs an entity key or a filter",
                    collection.name
                )));
            }

            let row = physical_row(entity, &body)?;
            let plan = source.planner().plan_update(entity, &query, &row)?;
            let result = execute(source, &plan, res).await?;

            if let Some(keys) = &req.entity_key {
                for key in entity.parse_entity_key(keys)? {
                    res.changes.push(Change::new(
                        &Method::PUT,
                        &collection.name,
                        Entity::encode_key(&key),
                    ));
                }
            }
            res.body = Some(json!({"meta": {"rowsAffected": result.stats.rows_affected}}));
        }
        _ => {
            return Err(QueryError::invalid_body(
                "PUT needs a JSON object or an array of objects",
            ))
        }
    }

    res.status = StatusCode::OK;
    Ok(())
}

async fn delete(
    chain: &mut Chain<'_>,
    collection: &Collection,
    source: &dyn DataSource,
    req: &mut Request,
    res: &mut Response,
) -> Result<()> {
    let root = !chain.context().contains(&BATCH_DELETE);
    if root {
        chain
            .context_mut()
            .insert_scoped(&BATCH_DELETE, BatchDelete::default());
    }

    match req.body.take() {
        Some(body) => {
            if req.entity_key.is_some() {
                return Err(QueryError::invalid_body(
                    "a DELETE cannot name an entity key and carry a body",
                ));
            }
            let urls = delete_targets(chain, collection, &body)?;
            for url in urls {
                let child = chain.include(Method::DELETE, &url, None).await?;
                if !child.is_success() {
                    return Err(nested_failure(&url, &child));
                }
            }
        }
        None => {
            if req.entity_key.is_none() && !chain.gateway().config().delete.permits(&collection.name) {
                return Err(QueryError::operation_not_supported(format!(
                    "batch deletes are not allowed on '{}'",
                    collection.name
                )));
            }

            let query = chain.gateway().query_for(collection, req)?;
            let fragment = source
                .planner()
                .plan_key_selection(&collection.entity, &query)?;
            debug!("Queued delete selection: {}", fragment);

            let batch = chain
                .context_mut()
                .get_mut(&BATCH_DELETE)
                .ok_or_else(|| QueryError::Internal("batch delete state vanished".into()))?;
            batch.fragments.push(fragment);
            batch.predicates.extend(query.root);
        }
    }

    if root {
        let batch = chain
            .context_mut()
            .remove(&BATCH_DELETE)
            .unwrap_or_default();
        let deleted = delete_batch(collection, source, batch, res).await?;
        res.body = Some(json!({"meta": {"rowsAffected": deleted}}));
    }

    res.status = StatusCode::OK;
    Ok(())
}

/// Validate a DELETE body: an array of URLs inside the request's collection
fn delete_targets(chain: &Chain<'_>, collection: &Collection, body: &Value) -> Result<Vec<String>> {
    let invalid = || QueryError::invalid_body("the body of a DELETE must be an array of url strings");

    body.as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|item| {
            let url = item.as_str().ok_or_else(invalid)?;
            let target = chain.gateway().request(Method::DELETE, url, None)?;
            if !target.collection.eq_ignore_ascii_case(&collection.name) {
                return Err(QueryError::invalid_body(format!(
                    "every delete must target '{}', got '{}'",
                    chain.gateway().collection_url(&collection.name),
                    url
                )));
            }
            Ok(url.to_string())
        })
        .collect()
}

/// One selection over every queued fragment, then one delete mutation
async fn delete_batch(
    collection: &Collection,
    source: &dyn DataSource,
    batch: BatchDelete,
    res: &mut Response,
) -> Result<usize> {
    if batch.fragments.is_empty() {
        return Ok(0);
    }

    let entity = &collection.entity;
    let planner = source.planner();
    let selection = match planner.plan_batch_selection(entity, batch.fragments) {
        Err(QueryError::OperationNotSupported(reason)) if batch.predicates.len() > 1 => {
            debug!("Merging delete selections as a disjunction: {}", reason);
            let query = Query {
                root: Some(Predicate::Or(batch.predicates)),
                ..Query::default()
            };
            planner.plan_key_selection(entity, &query)?
        }
        other => other?,
    };

    let selected = execute(source, &selection, res).await?;

    let mut keys: Vec<Vec<Value>> = Vec::with_capacity(selected.rows.len());
    for row in &selected.rows {
        let key = entity.key_values(row)?;
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    if keys.is_empty() {
        debug!("Nothing to delete in '{}'", collection.name);
        return Ok(0);
    }

    let mutation = planner.plan_delete(entity, &keys)?;
    execute(source, &mutation, res).await?;

    for key in &keys {
        res.changes.push(Change::new(
            &Method::DELETE,
            &collection.name,
            Entity::encode_key(key),
        ));
    }
    Ok(keys.len())
}
