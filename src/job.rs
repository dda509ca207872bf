// src/job.rs
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::QueueError;

/// An opaque unit of work: a JSON object mapping string keys to JSON values.
///
/// The queue layer never looks inside a job. Field-presence validation belongs
/// to the [`JobHandler`] that consumes it, e.g. a recipe handler checking for
/// `recipe_url`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Job(Map<String, Value>);

impl Job {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field insert.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Wraps a decoded wire value. Anything other than a JSON object is
    /// rejected; the queue only carries mappings.
    pub fn from_value(value: Value) -> Result<Self, QueueError> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => Err(QueueError::Deserialization(format!(
                "job payload must be a JSON object, got: {other}"
            ))),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Job {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Value::Object(self.0.clone()))
    }
}

/// The work behind a job. Implementations live outside the queue layer; the
/// worker only promises to call `handle` at most once per delivered job and to
/// log (not propagate) whatever error comes back.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: Job) -> anyhow::Result<()>;
}
