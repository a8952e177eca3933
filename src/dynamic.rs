//! Externally fetched data merged into the document before env and secrets.

use crate::error::{StrataError, StrataResult};
use crate::secrets::aws::{AwsScope, DEFAULT_REGION, ObjectStoreClient};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// Inputs shared by dynamic data providers.
#[derive(Debug, Clone, Default)]
pub struct DynamicContext {
    /// Hierarchy root; relative local paths resolve against it.
    pub root: PathBuf,
    pub default_aws_profile: Option<String>,
}

/// A source of extra data keyed off the merged document.
///
/// `Ok(None)` means the document did not ask for anything.
pub trait DynamicDataProvider: Send + Sync {
    fn name(&self) -> &str;

    fn fetch(&self, document: &Value, context: &DynamicContext) -> StrataResult<Option<Value>>;
}

pub const REMOTE_STATES_KEY: &str = "remote_states";

/// One entry of `remote_states`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "backend_type", rename_all = "lowercase")]
pub enum RemoteState {
    Local {
        name: String,
        path: PathBuf,
    },
    S3 {
        name: String,
        s3_bucket: String,
        statefile_key: String,
        #[serde(default)]
        aws_profile: Option<String>,
        #[serde(default)]
        region_name: Option<String>,
    },
}

impl RemoteState {
    pub fn name(&self) -> &str {
        match self {
            RemoteState::Local { name, .. } | RemoteState::S3 { name, .. } => name,
        }
    }
}

/// Terraform state outputs, published as `outputs.<name>.<output>.value`.
#[derive(Default)]
pub struct TerraformStateProvider {
    object_store: Option<Arc<dyn ObjectStoreClient>>,
}

impl TerraformStateProvider {
    /// Local state files only.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object_store(mut self, client: Arc<dyn ObjectStoreClient>) -> Self {
        self.object_store = Some(client);
        self
    }

    fn load_state(&self, state: &RemoteState, context: &DynamicContext) -> StrataResult<Value> {
        let bytes = match state {
            RemoteState::Local { path, .. } => {
                let path = if path.is_absolute() {
                    path.clone()
                } else {
                    context.root.join(path)
                };
                std::fs::read(&path).map_err(|e| StrataError::io(&path, e))?
            }
            RemoteState::S3 {
                name,
                s3_bucket,
                statefile_key,
                aws_profile,
                region_name,
            } => {
                let client = self.object_store.as_ref().ok_or_else(|| {
                    StrataError::backend(name, "no object store client configured for s3 remote state")
                })?;
                let profile = aws_profile
                    .clone()
                    .or_else(|| context.default_aws_profile.clone())
                    .ok_or_else(|| {
                        StrataError::missing_parameter("aws_profile", format!("remote state '{}'", name))
                    })?;
                let scope = AwsScope {
                    profile,
                    region: region_name.clone().unwrap_or_else(|| DEFAULT_REGION.to_string()),
                };
                client
                    .get_object(&scope, s3_bucket, statefile_key)
                    .map_err(|e| StrataError::backend(name, format!("{:#}", e)))?
            }
        };

        serde_json::from_slice(&bytes)
            .map_err(|e| StrataError::invalid_document(state.name(), format!("not a Terraform state: {}", e)))
    }
}

impl DynamicDataProvider for TerraformStateProvider {
    fn name(&self) -> &str {
        "terraform"
    }

    fn fetch(&self, document: &Value, context: &DynamicContext) -> StrataResult<Option<Value>> {
        let Some(entries) = document.get(REMOTE_STATES_KEY) else {
            return Ok(None);
        };
        let states: Vec<RemoteState> = serde_json::from_value(entries.clone())
            .map_err(|e| StrataError::invalid_document(REMOTE_STATES_KEY, e))?;

        let mut outputs = Map::new();
        for state in &states {
            info!(name = state.name(), "Fetching remote state");
            let mut loaded = self.load_state(state, context)?;
            let state_outputs = loaded
                .get_mut("outputs")
                .map(std::mem::take)
                .unwrap_or_else(|| Value::Object(Map::new()));
            outputs.insert(state.name().to_string(), state_outputs);
        }
        debug!(count = states.len(), "Remote states loaded");

        let mut data = Map::new();
        data.insert("outputs".to_string(), Value::Object(outputs));
        Ok(Some(Value::Object(data)))
    }
}
