use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::value::DbValue;

/// Per-request deadline on the loopback socket.
const STORE_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client handle for one store instance.
#[derive(Debug, Clone)]
pub struct StoreClient {
    address: String,
    http: reqwest::Client,
}

impl StoreClient {
    /// Creates a client for the store listening at `host:port`.
    pub fn new(host: &str, port: u16) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(STORE_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Unreachable(e.to_string()))?;

        Ok(Self { address: format!("http://{host}:{port}"), http })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// One request against the store. The method is GET throughout; write
    /// operations carry the value in the body.
    async fn request(&self, route: &str, body: Option<String>) -> Result<String> {
        let url = format!("{}{}", self.address, route);
        debug!(url = %url, "store request");

        let mut req = self.http.get(&url);
        if let Some(body) = body {
            req = req.body(body);
        }

        let resp = req.send().await.map_err(|e| StoreError::Unreachable(e.to_string()))?;
        resp.text().await.map_err(|e| StoreError::Unreachable(e.to_string()))
    }

    /// A write operation answers with a bare `OK`; anything else is a
    /// rejection message.
    async fn write(&self, route: &str, body: String) -> Result<()> {
        let reply = self.request(route, Some(body)).await?;

        if reply == "OK" {
            Ok(())
        } else {
            Err(StoreError::Rejected(reply))
        }
    }

    async fn read(&self, route: &str) -> Result<DbValue> {
        let reply = self.request(route, None).await?;
        DbValue::parse_message(&reply)
    }

    /// True when the store answers on its home route.
    pub async fn is_reachable(&self) -> bool {
        self.request("/", None).await.is_ok()
    }

    /// Returns the document at `key`, or `Value::Null` if absent.
    pub async fn get(&self, key: &str) -> Result<Value> {
        match self.read(&format!("/get/{key}")).await?.into_json() {
            Ok(value) => Ok(value),
            Err(StoreError::Rejected(_)) => Ok(Value::Null),
            Err(e) => Err(e),
        }
    }

    /// Overwrites the document at `key`.
    pub async fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.write(&format!("/set/{key}"), format!("JSON {value}")).await
    }

    /// Deletes the document at `key`.
    pub async fn delete(&self, key: &str) -> Result<()> {
        let reply = self.request(&format!("/delete/{key}"), None).await?;
        if let Ok(DbValue::Err(e)) = DbValue::parse_message(&reply) {
            return Err(StoreError::Rejected(e));
        }
        Ok(())
    }

    /// Returns the JSONPath matches of `path` inside the document at `key`.
    pub async fn json_get(&self, key: &str, path: &str) -> Result<Value> {
        let route = format!("/json_get/{key}/{}", urlencoding::encode(path));
        self.read(&route).await?.into_json()
    }

    /// Overwrites the node at `path` inside the document at `key`.
    pub async fn json_set(&self, key: &str, path: &str, value: &Value) -> Result<()> {
        let route = format!("/json_set/{key}/{}", urlencoding::encode(path));
        self.write(&route, value.to_string()).await
    }

    /// Appends to the array at `path` inside the document at `key`.
    pub async fn json_append(&self, key: &str, path: &str, value: &Value) -> Result<()> {
        let route = format!("/json_append/{key}/{}", urlencoding::encode(path));
        self.write(&route, value.to_string()).await
    }

    /// Deletes the first array element matching the JSONPath predicate.
    pub async fn json_delete(&self, key: &str, path: &str) -> Result<()> {
        let route = format!("/json_delete/{key}/{}", urlencoding::encode(path));
        self.write(&route, String::new()).await
    }

    /// Atomically adds `n` to the numeric node at `path`.
    pub async fn json_increment(&self, key: &str, path: &str, n: i64) -> Result<()> {
        let route = format!("/json_increment/{key}/{}", urlencoding::encode(path));
        self.write(&route, n.to_string()).await
    }
}
