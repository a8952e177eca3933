//! The processing pipeline: hierarchy, merge, resolution passes, reshaping,
//! validation and output.

use crate::config::{EnvProvider, OutputOptions, ProcessEnv, ProcessOptions};
use crate::document::{Document, lookup_path};
use crate::dynamic::{DynamicContext, DynamicDataProvider, TerraformStateProvider};
use crate::error::{StrataError, StrataResult};
use crate::format;
use crate::fragment::FragmentLoader;
use crate::hierarchy::Hierarchy;
use crate::interpolation::{
    self, DEFAULT_SECRET_CACHE_CAPACITY, SecretCache, SecretInjector, resolve_env, resolve_self_references,
};
use crate::merge::deep_merge;
use crate::secrets::{ResolveContext, SecretRegistry, SecretResolver, SopsSecretResolver, VaultSecretResolver};
use crate::shaping;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Runs [`ProcessOptions`] against the file system.
///
/// Holds the secret backends, dynamic data providers, environment source and
/// a secret cache shared by every document it processes.
pub struct ConfigProcessor {
    registry: SecretRegistry,
    dynamic: Vec<Box<dyn DynamicDataProvider>>,
    env: Box<dyn EnvProvider>,
    cache: SecretCache,
}

impl Default for ConfigProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigProcessor {
    /// No secret backends, no dynamic data, the process environment.
    pub fn new() -> Self {
        Self {
            registry: SecretRegistry::new(),
            dynamic: Vec::new(),
            env: Box::new(ProcessEnv),
            cache: SecretCache::new(DEFAULT_SECRET_CACHE_CAPACITY),
        }
    }

    /// Backends that need no extra client wiring: Vault (configured from the
    /// environment), sops and local Terraform state.
    pub fn with_default_backends() -> Self {
        Self::new()
            .with_secret_resolver(VaultSecretResolver::from_env(&ProcessEnv))
            .with_secret_resolver(SopsSecretResolver::new())
            .with_dynamic_source(TerraformStateProvider::new())
    }

    /// Append a backend. Earlier backends win for a shared secret type.
    pub fn with_secret_resolver(mut self, resolver: impl SecretResolver + 'static) -> Self {
        self.registry.register(resolver);
        self
    }

    pub fn with_dynamic_source(mut self, provider: impl DynamicDataProvider + 'static) -> Self {
        self.dynamic.push(Box::new(provider));
        self
    }

    pub fn with_env(mut self, env: impl EnvProvider + 'static) -> Self {
        self.env = Box::new(env);
        self
    }

    pub fn registry(&self) -> &SecretRegistry {
        &self.registry
    }

    /// Build, merge and resolve the document described by `options`.
    pub fn process(&self, options: &ProcessOptions) -> StrataResult<Document> {
        let cwd = options.working_directory()?;
        let target = options.relative_target(&cwd);

        let hierarchy = Hierarchy::build(&cwd, &target)?;
        debug!(target = %target.display(), files = hierarchy.file_count(), "Hierarchy built");

        let loader = if options.yaml_includes {
            FragmentLoader::with_includes(&cwd)
        } else {
            FragmentLoader::new()
        };
        let mut document = hierarchy.merge(&loader, &options.strategies)?;

        if !options.exclude_keys.is_empty() {
            document = shaping::exclude_keys(document, &options.exclude_keys);
        }

        if !options.skip_interpolations {
            document = self.resolve(document, &cwd, options)?;
        }

        document = shaping::filter_keys(document, &options.filters);

        if options.should_validate() {
            interpolation::validate(&document)?;
        }

        if let Some(enclosure) = &options.enclosure {
            document = shaping::apply_enclosure(document, enclosure)?;
        }

        Ok(interpolation::clean_escapes(document))
    }

    /// The fixed pass order. Every external pass is followed by a
    /// self-reference pass so chains completed by it resolve too.
    fn resolve(&self, document: Document, cwd: &Path, options: &ProcessOptions) -> StrataResult<Document> {
        let mut document = resolve_self_references(document);
        document = resolve_self_references(document);

        let aws_profile = default_aws_profile(&document);

        let context = DynamicContext {
            root: cwd.to_path_buf(),
            default_aws_profile: aws_profile.clone(),
        };
        for provider in &self.dynamic {
            if let Some(data) = provider.fetch(&document, &context)? {
                debug!(provider = provider.name(), "Merging dynamic data");
                document = deep_merge(document, data, &options.strategies)?;
            }
        }
        document = resolve_self_references(document);

        document = resolve_env(document, &*self.env);
        document = resolve_self_references(document);

        if !options.skip_secrets {
            let context = ResolveContext {
                default_aws_profile: default_aws_profile(&document).or(aws_profile),
            };
            document = SecretInjector::new(&self.registry, &self.cache, context).resolve(document)?;
            document = resolve_self_references(document);
        }

        Ok(document)
    }

    /// Process and render in one step.
    pub fn render(&self, options: &ProcessOptions) -> StrataResult<String> {
        let document = self.process(options)?;
        render_document(&document, &options.output)
    }
}

fn default_aws_profile(document: &Document) -> Option<String> {
    lookup_path(document, "aws.profile")
        .and_then(Value::as_str)
        .map(str::to_string)
}

pub fn render_document(document: &Document, output: &OutputOptions) -> StrataResult<String> {
    format::render(document, output.format, &output.render_options())
}

/// Write `content` to `path`, creating parent directories.
pub fn write_output(path: &Path, content: &str) -> StrataResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| StrataError::io(parent, e))?;
    }
    fs::write(path, content).map_err(|e| StrataError::io(path, e))?;
    info!(path = %path.display(), "Wrote output");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Enclosure;
    use crate::error::ErrorCode;
    use crate::secrets::SsmSecretResolver;
    use crate::secrets::aws::testing::MemoryParameterStore;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write(dir: &Path, relative: &str, content: &str) {
        let path = dir.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn processor() -> ConfigProcessor {
        ConfigProcessor::new().with_env(HashMap::from([("STAGE".to_string(), "dev".to_string())]))
    }

    #[test]
    fn test_resolves_across_levels() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "default.yaml", "name: app\nstage: \"{{env(STAGE)}}\"\n");
        write(dir.path(), "env=dev/env.yaml", "fqdn: \"{{name}}.{{stage}}.example.com\"\n");

        let options = ProcessOptions::new("env=dev").with_cwd(dir.path());
        let document = processor().process(&options).unwrap();
        assert_eq!(document["fqdn"], json!("app.dev.example.com"));
    }

    #[test]
    fn test_unresolved_fails_unless_validation_skipped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "default.yaml", "a: \"{{missing}}\"\n");

        let options = ProcessOptions::new(".").with_cwd(dir.path());
        let err = processor().process(&options).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnresolvedInterpolation);

        let document = processor()
            .process(&options.skip_interpolation_validation(true))
            .unwrap();
        assert_eq!(document["a"], json!("{{missing}}"));
    }

    #[test]
    fn test_exclude_runs_before_interpolation() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "default.yaml", "secret: x\ncopy: \"{{secret}}\"\n");

        let options = ProcessOptions::new(".")
            .with_cwd(dir.path())
            .with_exclude_keys(["secret"]);
        let err = processor().process(&options).unwrap_err();
        assert_eq!(err.code, ErrorCode::UnresolvedInterpolation);
    }

    #[test]
    fn test_filter_runs_after_interpolation() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "default.yaml", "a: 1\nb: \"{{a}}\"\nc: 3\n");

        let options = ProcessOptions::new(".")
            .with_cwd(dir.path())
            .with_filters(["b"]);
        assert_eq!(processor().process(&options).unwrap(), json!({"b": 1}));
    }

    #[test]
    fn test_secrets_use_document_aws_profile() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "default.yaml",
            "aws:\n  profile: dev\npassword: \"{{ssm.path(/db/password)}}\"\ndsn: \"db:{{password}}\"\n",
        );
        let store = Arc::new(MemoryParameterStore::default().with("dev", "us-east-1", "/db/password", "hunter2"));
        let processor = processor().with_secret_resolver(SsmSecretResolver::new(store));

        let options = ProcessOptions::new(".").with_cwd(dir.path());
        let document = processor.process(&options).unwrap();
        assert_eq!(document["password"], json!("hunter2"));
        assert_eq!(document["dsn"], json!("db:hunter2"));
    }

    #[test]
    fn test_skip_secrets_leaves_references() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "default.yaml", "password: \"{{ssm.path(/db/password)}}\"\n");

        let options = ProcessOptions::new(".").with_cwd(dir.path()).skip_secrets(true);
        let document = processor().process(&options).unwrap();
        assert_eq!(document["password"], json!("{{ssm.path(/db/password)}}"));
    }

    #[test]
    fn test_enclosure_and_escapes() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "default.yaml", "tmpl: \"{{`{{name}}`}}\"\n");

        let options = ProcessOptions::new(".")
            .with_cwd(dir.path())
            .with_enclosure(Enclosure::Add("cluster".to_string()));
        let document = processor().process(&options).unwrap();
        assert_eq!(document, json!({"cluster": {"tmpl": "{{name}}"}}));
    }

    #[test]
    fn test_absolute_target_under_cwd() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "default.yaml", "a: 1\n");
        write(dir.path(), "env=dev/env.yaml", "b: 2\n");

        let options = ProcessOptions::new(dir.path().join("env=dev")).with_cwd(dir.path());
        assert_eq!(processor().process(&options).unwrap(), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_write_output_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/nested/config.yaml");
        write_output(&path, "a: 1\n").unwrap();
        assert_eq!(fs::read_to_string(path).unwrap(), "a: 1\n");
    }
}
