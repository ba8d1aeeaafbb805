#![allow(dead_code)]

use async_trait::async_trait;
use rowgate_chain::{Gateway, GatewayConfig};
use rowgate_query::{
    AccessPlan, Catalog, Collection, DataRow, Entity, Executor, FieldType, Index, RawResultSet,
    Result, SourceRegistry, SqlDialect, Table,
};
use rowgate_query_sql::SqlSource;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

pub const BASE_URL: &str = "http://localhost/northwind";

/// Executor that records every plan and answers reads with canned rows
#[derive(Default)]
pub struct Recorder {
    plans: Mutex<Vec<AccessPlan>>,
    rows: Mutex<Vec<DataRow>>,
}

impl Recorder {
    pub fn with_rows(rows: Vec<Value>) -> Arc<Self> {
        let recorder = Self::default();
        *recorder.rows.lock().unwrap() = rows
            .into_iter()
            .map(|r| r.as_object().cloned().unwrap())
            .collect();
        Arc::new(recorder)
    }

    pub fn plans(&self) -> Vec<AccessPlan> {
        self.plans.lock().unwrap().clone()
    }

    pub fn mutations(&self) -> Vec<AccessPlan> {
        self.plans().into_iter().filter(|p| p.is_mutation()).collect()
    }

    pub fn reads(&self) -> usize {
        self.plans().iter().filter(|p| !p.is_mutation()).count()
    }
}

#[async_trait]
impl Executor for Recorder {
    async fn execute(&self, plan: &AccessPlan) -> Result<RawResultSet> {
        self.plans.lock().unwrap().push(plan.clone());
        if plan.is_mutation() {
            Ok(RawResultSet::affected(1, 0))
        } else {
            Ok(RawResultSet::new(self.rows.lock().unwrap().clone(), 0))
        }
    }
}

pub fn orders_table() -> Table {
    Table::new("orders", "northwind")
        .with_column("orderid", FieldType::Int64)
        .with_column("customerid", FieldType::String)
        .with_column("shipcity", FieldType::String)
        .with_column("freight", FieldType::Float64)
        .with_index(Index::primary("orderid", None))
}

pub fn catalog() -> Catalog {
    Catalog::new().with_collection(Collection::new(
        "orders",
        Entity::new(orders_table()).unwrap(),
    ))
}

pub async fn gateway_with(config: GatewayConfig, recorder: Arc<Recorder>) -> Gateway {
    let sources = SourceRegistry::new();
    sources
        .register_source(Arc::new(SqlSource::new(
            "northwind",
            SqlDialect::Postgres,
            recorder,
        )))
        .await;
    Gateway::new(config.with_base_url(BASE_URL), catalog(), sources).unwrap()
}

pub async fn gateway(recorder: Arc<Recorder>) -> Gateway {
    gateway_with(GatewayConfig::default(), recorder).await
}

pub fn order(id: i64, city: &str) -> Value {
    json!({"orderid": id, "customerid": "VINET", "shipcity": city, "freight": 32.38})
}
