//! Encrypted-file backend driven by the `sops` binary.
//!
//! `{{sops.secret_file(path/to/file.enc.yaml).secret_key(['db']['password'])}}`
//! decrypts the file once per run (cached by path) and walks the key path.

use super::{ResolveContext, SecretReference, SecretResolver};
use crate::error::{StrataError, StrataResult};
use crate::fragment::FragmentLoader;
use lru::LruCache;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use tracing::info;

const DEFAULT_CACHE_CAPACITY: NonZeroUsize = NonZeroUsize::new(2048).unwrap();

/// Name of a documented sops exit code.
pub fn exit_code_name(code: i32) -> Option<&'static str> {
    let name = match code {
        1 => "ErrorGeneric",
        2 => "CouldNotReadInputFile",
        3 => "CouldNotWriteOutputFile",
        4 => "ErrorDumpingTree",
        5 => "ErrorReadingConfig",
        6 => "ErrorInvalidKMSEncryptionContextFormat",
        7 => "ErrorInvalidSetFormat",
        8 => "ErrorConflictingParameters",
        21 => "ErrorEncryptingMac",
        23 => "ErrorEncryptingTree",
        24 => "ErrorDecryptingMac",
        25 => "ErrorDecryptingTree",
        49 => "CannotChangeKeysFromNonExistentFile",
        51 => "MacMismatch",
        52 => "MacNotFound",
        61 => "ConfigFileNotFound",
        85 => "KeyboardInterrupt",
        91 => "InvalidTreePathFormat",
        100 => "NoFileSpecified",
        111 => "NoEncryptionKeyFound",
        128 => "CouldNotRetrieveKey",
        200 => "FileHasNotBeenModified",
        201 => "NoEditorFound",
        202 => "FailedToCompareVersions",
        203 => "FileAlreadyEncrypted",
        _ => return None,
    };
    Some(name)
}

fn describe_failure(file: &Path, code: Option<i32>, stderr: &str) -> String {
    match code.and_then(|c| exit_code_name(c).map(|name| (c, name))) {
        Some((code, name)) => format!(
            "error with file {}: {} exited with code {}: {}",
            file.display(),
            name,
            code,
            stderr.trim()
        ),
        None => format!(
            "could not decrypt file {}; Unknown sops error code: {}; message: {}",
            file.display(),
            code.map_or_else(|| "none".to_string(), |c| c.to_string()),
            stderr.trim()
        ),
    }
}

/// Split `['a']['b']` (or a plain `a`) into its keys.
pub fn parse_key_path(secret_key: &str) -> Vec<String> {
    secret_key
        .trim_matches(|c| c == '[' || c == ']')
        .split("']['")
        .map(|key| key.trim_matches('\'').to_string())
        .collect()
}

pub struct SopsSecretResolver {
    binary: PathBuf,
    decrypted: Mutex<LruCache<PathBuf, Value>>,
}

impl Default for SopsSecretResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl SopsSecretResolver {
    pub fn new() -> Self {
        Self::with_binary("sops")
    }

    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            decrypted: Mutex::new(LruCache::new(DEFAULT_CACHE_CAPACITY)),
        }
    }

    /// Decrypt `file`, reusing an earlier result for the same path.
    ///
    /// The cache lock is held across the decryption so concurrent callers
    /// never decrypt the same file twice.
    fn decrypt(&self, file: &Path) -> Result<Value, String> {
        let mut cache = self
            .decrypted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(value) = cache.get(file) {
            return Ok(value.clone());
        }

        let output = Command::new(&self.binary)
            .arg("--decrypt")
            .arg(file)
            .output()
            .map_err(|e| format!("failed to run {}: {}", self.binary.display(), e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(describe_failure(file, output.status.code(), &stderr));
        }

        let plaintext = String::from_utf8_lossy(&output.stdout);
        let value = FragmentLoader::new()
            .parse_str(plaintext.trim_end(), file)
            .map_err(|e| e.to_string())?;
        cache.put(file.to_path_buf(), value.clone());
        Ok(value)
    }
}

impl SecretResolver for SopsSecretResolver {
    fn name(&self) -> &str {
        "sops"
    }

    fn supports(&self, secret_type: &str) -> bool {
        secret_type == "sops"
    }

    fn resolve(&self, reference: &SecretReference, _context: &ResolveContext) -> StrataResult<Value> {
        let secret_file = reference.params.require("secret_file")?;
        let secret_key = reference.params.require("secret_key")?;
        let file = Path::new(secret_file);

        info!(secret_key, file = secret_file, "Resolving sops secret");
        let wrap = |message: String| {
            StrataError::backend(
                &reference.to_string(),
                format!(
                    "Error while trying to read sops value for file {}, key: {} - {}",
                    secret_file, secret_key, message
                ),
            )
        };

        let mut current = self.decrypt(file).map_err(wrap)?;
        for key in parse_key_path(secret_key) {
            current = current
                .get_mut(&key)
                .map(std::mem::take)
                .ok_or_else(|| {
                    wrap(describe_failure(
                        file,
                        Some(128),
                        &format!("Encountered KeyError parsing yaml for key: {}", secret_key),
                    ))
                })?;
        }
        Ok(current)
    }
}
