use super::auth::Auth;
use crate::error::{BlockError, Result};
use crate::registry::{BlockDescriptor, BlockKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const METHOD_HELLO: &str = "hello";
pub const METHOD_SAVE: &str = "save";
pub const METHOD_LOAD: &str = "load";
pub const METHOD_DELETE: &str = "delete";
pub const METHOD_LIST: &str = "list";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<Auth>,
}

impl RequestEnvelope {
    pub fn new<P: Serialize>(method: &str, params: &P) -> Result<Self> {
        Ok(Self {
            method: method.to_string(),
            params: serde_json::to_value(params)?,
            auth: None,
        })
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Decode `params` into the type the method expects.
    pub fn params<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.params.clone()).map_err(|e| {
            BlockError::InvalidRequest(format!("bad params for {}: {}", self.method, e))
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| BlockError::MalformedEnvelope(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub result: Value,
}

impl ResponseEnvelope {
    pub fn ok<T: Serialize>(result: &T) -> Result<Self> {
        Ok(Self {
            error: String::new(),
            result: serde_json::to_value(result)?,
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            result: Value::Null,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_empty()
    }

    /// A non-empty `error` becomes `BlockError::Remote`.
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T> {
        if !self.is_ok() {
            return Err(BlockError::Remote(self.error));
        }
        serde_json::from_value(self.result)
            .map_err(|e| BlockError::MalformedEnvelope(format!("bad result: {}", e)))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| BlockError::MalformedEnvelope(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloParams {
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveParams {
    #[serde(flatten)]
    pub key: BlockKey,
    /// Length of the raw stream following the envelope.
    pub size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub cluster_id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadResult {
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResult {
    pub blocks: Vec<BlockDescriptor>,
}

/// Result of methods that return nothing (`{}` on the wire).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Empty {}

/// Closed set of requests understood by a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Hello(HelloParams),
    Save(SaveParams),
    Load(BlockKey),
    Delete(BlockKey),
    List(ListParams),
}

impl Request {
    pub fn method(&self) -> &'static str {
        match self {
            Request::Hello(_) => METHOD_HELLO,
            Request::Save(_) => METHOD_SAVE,
            Request::Load(_) => METHOD_LOAD,
            Request::Delete(_) => METHOD_DELETE,
            Request::List(_) => METHOD_LIST,
        }
    }

    /// Decode params into the variant selected by the envelope's method.
    pub fn decode(envelope: &RequestEnvelope) -> Result<Self> {
        match envelope.method.as_str() {
            METHOD_HELLO => Ok(Request::Hello(envelope.params()?)),
            METHOD_SAVE => Ok(Request::Save(envelope.params()?)),
            METHOD_LOAD => Ok(Request::Load(envelope.params()?)),
            METHOD_DELETE => Ok(Request::Delete(envelope.params()?)),
            METHOD_LIST => Ok(Request::List(envelope.params()?)),
            other => Err(BlockError::UnknownMethod(other.to_string())),
        }
    }

    pub fn to_envelope(&self) -> Result<RequestEnvelope> {
        match self {
            Request::Hello(p) => RequestEnvelope::new(METHOD_HELLO, p),
            Request::Save(p) => RequestEnvelope::new(METHOD_SAVE, p),
            Request::Load(k) => RequestEnvelope::new(METHOD_LOAD, k),
            Request::Delete(k) => RequestEnvelope::new(METHOD_DELETE, k),
            Request::List(p) => RequestEnvelope::new(METHOD_LIST, p),
        }
    }
}
