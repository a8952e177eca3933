//! Parameter-store (`ssm`) and object-store (`s3`) backends.
//!
//! The cloud SDK is kept behind [`ParameterStoreClient`] and
//! [`ObjectStoreClient`]; the resolvers only handle parameter validation,
//! profile/region defaults and value decoding.

use super::{ResolveContext, SecretReference, SecretResolver};
use crate::error::{StrataError, StrataResult};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_REGION: &str = "us-east-1";

/// Credentials profile and region for one call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AwsScope {
    pub profile: String,
    pub region: String,
}

impl AwsScope {
    /// Resolve the scope from `aws_profile` / `region_name` parameters,
    /// falling back to the document's default profile.
    pub fn from_reference(reference: &SecretReference, context: &ResolveContext) -> StrataResult<Self> {
        let profile = reference
            .params
            .get("aws_profile")
            .map(str::to_string)
            .or_else(|| context.default_aws_profile.clone())
            .ok_or_else(|| StrataError::missing_parameter("aws_profile", &reference.params))?;
        let region = reference
            .params
            .get("region_name")
            .unwrap_or(DEFAULT_REGION)
            .to_string();
        Ok(Self { profile, region })
    }
}

pub trait ParameterStoreClient: Send + Sync {
    /// Fetch a decrypted parameter value.
    fn get_parameter(&self, scope: &AwsScope, name: &str) -> anyhow::Result<String>;
}

pub trait ObjectStoreClient: Send + Sync {
    fn get_object(&self, scope: &AwsScope, bucket: &str, key: &str) -> anyhow::Result<Vec<u8>>;
}

/// `{{ssm.path(/name).aws_profile(p).region_name(r)}}`
pub struct SsmSecretResolver {
    client: Arc<dyn ParameterStoreClient>,
}

impl SsmSecretResolver {
    pub fn new(client: Arc<dyn ParameterStoreClient>) -> Self {
        Self { client }
    }
}

impl SecretResolver for SsmSecretResolver {
    fn name(&self) -> &str {
        "ssm"
    }

    fn supports(&self, secret_type: &str) -> bool {
        secret_type == "ssm"
    }

    fn resolve(&self, reference: &SecretReference, context: &ResolveContext) -> StrataResult<Value> {
        let scope = AwsScope::from_reference(reference, context)?;
        let path = reference.params.require("path")?;

        info!(path, profile = %scope.profile, region = %scope.region, "Resolving SSM secret");
        self.client
            .get_parameter(&scope, path)
            .map(Value::String)
            .map_err(|e| StrataError::backend(&reference.to_string(), format!("{:#}", e)))
    }
}

/// `{{s3.bucket(b).path(key).base64encode(true)}}`
pub struct S3SecretResolver {
    client: Arc<dyn ObjectStoreClient>,
}

impl S3SecretResolver {
    pub fn new(client: Arc<dyn ObjectStoreClient>) -> Self {
        Self { client }
    }
}

impl SecretResolver for S3SecretResolver {
    fn name(&self) -> &str {
        "s3"
    }

    fn supports(&self, secret_type: &str) -> bool {
        secret_type == "s3"
    }

    fn resolve(&self, reference: &SecretReference, context: &ResolveContext) -> StrataResult<Value> {
        let scope = AwsScope::from_reference(reference, context)?;
        let bucket = reference.params.require("bucket")?;
        let path = reference.params.require("path")?;
        let encode = reference.params.flag("base64encode");

        info!(bucket, path, profile = %scope.profile, region = %scope.region, "Resolving S3 object");
        let bytes = self
            .client
            .get_object(&scope, bucket, path)
            .map_err(|e| StrataError::backend(&reference.to_string(), format!("{:#}", e)))?;

        if encode {
            return Ok(Value::String(STANDARD.encode(bytes)));
        }
        String::from_utf8(bytes)
            .map(Value::String)
            .map_err(|e| StrataError::backend(&reference.to_string(), e))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory parameter store keyed by (profile, region, name).
    #[derive(Default)]
    pub struct MemoryParameterStore {
        pub values: HashMap<(String, String, String), String>,
        pub calls: Mutex<usize>,
    }

    impl MemoryParameterStore {
        pub fn with(mut self, profile: &str, region: &str, name: &str, value: &str) -> Self {
            self.values.insert(
                (profile.to_string(), region.to_string(), name.to_string()),
                value.to_string(),
            );
            self
        }

        pub fn call_count(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    impl ParameterStoreClient for MemoryParameterStore {
        fn get_parameter(&self, scope: &AwsScope, name: &str) -> anyhow::Result<String> {
            *self.calls.lock().unwrap() += 1;
            self.values
                .get(&(scope.profile.clone(), scope.region.clone(), name.to_string()))
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("ParameterNotFound: {}", name))
        }
    }

    #[derive(Default)]
    pub struct MemoryObjectStore {
        pub objects: HashMap<(String, String), Vec<u8>>,
    }

    impl MemoryObjectStore {
        pub fn with(mut self, bucket: &str, key: &str, bytes: &[u8]) -> Self {
            self.objects
                .insert((bucket.to_string(), key.to_string()), bytes.to_vec());
            self
        }
    }

    impl ObjectStoreClient for MemoryObjectStore {
        fn get_object(&self, _scope: &AwsScope, bucket: &str, key: &str) -> anyhow::Result<Vec<u8>> {
            self.objects
                .get(&(bucket.to_string(), key.to_string()))
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("NoSuchKey: {}/{}", bucket, key))
        }
    }
}
