//! Client for the external restricter, which re-checks visibility of hits
//! for the calling user and returns the fields they may see.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use searchd_core::{parse_fqid, FieldRelations};

#[derive(Debug, Error)]
pub enum RestricterError {
    #[error("building client failed: {0}")]
    Client(#[source] reqwest::Error),

    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(reqwest::StatusCode),

    #[error("decoding response failed: {0}")]
    Decode(#[source] reqwest::Error),
}

/// One collection's worth of ids and the fields to fetch for them.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RestrictRequest {
    pub ids: Vec<u64>,
    pub collection: String,
    pub fields: Option<FieldRelations>,
}

/// Fully-qualified id -> visible field values.
pub type Restricted = BTreeMap<String, Map<String, Value>>;

/// Groups `fqids` by collection in first-seen order. Ids that do not parse
/// are skipped.
pub fn build_requests<'a, F>(fqids: impl IntoIterator<Item = &'a str>, fields: F) -> Vec<RestrictRequest>
where
    F: Fn(&str) -> Option<FieldRelations>,
{
    let mut grouped: IndexMap<String, RestrictRequest> = IndexMap::new();
    for fqid in fqids {
        let Some((collection, id)) = parse_fqid(fqid) else {
            continue;
        };
        grouped
            .entry(collection.to_string())
            .or_insert_with(|| RestrictRequest {
                ids: Vec::new(),
                collection: collection.to_string(),
                fields: fields(collection),
            })
            .ids
            .push(id);
    }
    grouped.into_values().collect()
}

/// Turns `"<collection>/<id>/<field>"` keys into one object per fqid.
pub fn reshape(response: HashMap<String, Value>) -> Restricted {
    let mut restricted = Restricted::new();
    for (key, value) in response {
        let mut parts = key.split('/');
        let (Some(collection), Some(id), Some(field)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        restricted.entry(format!("{collection}/{id}")).or_default().insert(field.to_string(), value);
    }
    restricted
}

#[derive(Debug, Clone)]
pub struct Restricter {
    client: reqwest::Client,
    url: String,
}

impl Restricter {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RestricterError> {
        let client = reqwest::Client::builder().timeout(timeout).build().map_err(RestricterError::Client)?;
        Ok(Self { client, url: url.into() })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn restrict(&self, user_id: u64, requests: &[RestrictRequest]) -> Result<Restricted, RestricterError> {
        let response = self
            .client
            .post(&self.url)
            .query(&[("user_id", user_id.to_string()), ("single", "1".to_string())])
            .json(requests)
            .send()
            .await
            .map_err(RestricterError::Transport)?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(RestricterError::Status(response.status()));
        }
        let body: HashMap<String, Value> = response.json().await.map_err(RestricterError::Decode)?;
        Ok(reshape(body))
    }
}
