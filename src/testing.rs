// Copyright 2018-2025 the Deno authors. MIT license.

use std::collections::HashMap;
use std::collections::HashSet;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::env::ArtifactMeta;
use crate::env::ArtifactStorage;
use crate::env::CjsLexer;
use crate::env::CjsLexerResult;
use crate::env::DtsParser;
use crate::env::DtsReference;
use crate::env::GitRef;
use crate::env::JsLexer;
use crate::env::NpmRegistry;
use crate::env::RepoRefsLister;
use crate::env::ResolverEnv;
use crate::env::ResolverFs;
use crate::env::TsImportKind;
use crate::errors::InstallError;
use crate::errors::LexerError;
use crate::errors::RefsError;
use crate::errors::RegistryError;
use crate::errors::StorageError;
use crate::package_json::PackageJson;
use crate::path::EsmPath;

#[derive(Debug, Default)]
struct MemoryFs {
  files: Mutex<HashMap<PathBuf, String>>,
}

impl ResolverFs for MemoryFs {
  fn exists_file(&self, path: &Path) -> bool {
    self.files.lock().contains_key(path)
  }

  fn read_to_string(&self, path: &Path) -> std::io::Result<String> {
    self.files.lock().get(path).cloned().ok_or_else(|| {
      std::io::Error::new(std::io::ErrorKind::NotFound, "file not found")
    })
  }
}

#[derive(Debug, Default)]
struct MemoryRegistry {
  packages: Mutex<HashMap<(String, String), PackageJson>>,
}

#[async_trait]
impl NpmRegistry for MemoryRegistry {
  async fn get_package_info(
    &self,
    name: &str,
    version: &str,
  ) -> Result<PackageJson, RegistryError> {
    self
      .packages
      .lock()
      .get(&(name.to_string(), version.to_string()))
      .cloned()
      .ok_or_else(|| RegistryError::NotFound {
        name: name.to_string(),
        version: version.to_string(),
      })
  }

  async fn install(
    &self,
    path: &EsmPath,
    _wd: &Path,
  ) -> Result<PackageJson, InstallError> {
    self
      .packages
      .lock()
      .get(&(path.pkg_name.clone(), path.pkg_version.clone()))
      .cloned()
      .ok_or_else(|| InstallError::NoMatchingVersion {
        name: path.pkg_name.clone(),
        version: path.pkg_version.clone(),
      })
  }
}

#[derive(Debug, Default)]
struct StubRefsLister {
  head_sha: Mutex<Option<String>>,
}

#[async_trait]
impl RepoRefsLister for StubRefsLister {
  async fn list_repo_refs(&self, url: &str) -> Result<Vec<GitRef>, RefsError> {
    match self.head_sha.lock().clone() {
      Some(sha) => Ok(vec![GitRef {
        ref_name: "HEAD".to_string(),
        sha,
      }]),
      None => Err(RefsError {
        url: url.to_string(),
        message: "no refs configured".to_string(),
      }),
    }
  }
}

#[derive(Debug, Default)]
struct MemoryStorage {
  items: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl ArtifactStorage for MemoryStorage {
  async fn stat(
    &self,
    key: &str,
  ) -> Result<Option<ArtifactMeta>, StorageError> {
    Ok(
      self
        .items
        .lock()
        .get(key)
        .map(|bytes| ArtifactMeta {
          size: bytes.len() as u64,
        }),
    )
  }

  async fn put(&self, key: &str, content: &[u8]) -> Result<(), StorageError> {
    self.items.lock().insert(key.to_string(), content.to_vec());
    Ok(())
  }
}

/// Reports files registered with [`TestEnv::mark_esm`] as ES modules; any
/// other existing file lexes as CommonJS.
#[derive(Debug, Default)]
struct StubJsLexer {
  esm_files: Mutex<HashSet<PathBuf>>,
}

impl JsLexer for StubJsLexer {
  fn validate_module_file(
    &self,
    path: &Path,
  ) -> Result<(bool, Vec<String>), LexerError> {
    let is_esm = self.esm_files.lock().contains(path);
    Ok((is_esm, Vec::new()))
  }
}

#[derive(Debug, Default)]
struct StubCjsLexer;

#[async_trait]
impl CjsLexer for StubCjsLexer {
  async fn cjs_module_lexer(
    &self,
    _pkg_name: &str,
    _wd: &Path,
    _specifier: &str,
    _node_env: &str,
  ) -> Result<CjsLexerResult, LexerError> {
    Ok(CjsLexerResult {
      has_default_export: true,
      named_exports: Vec::new(),
      reexport: None,
      error: None,
    })
  }
}

/// Treats every double-quoted string in the source as an import
/// specifier. Enough structure for exercising the splice-and-rewrite
/// pipeline without a real declaration parser.
#[derive(Debug, Default)]
struct QuotedDtsParser;

impl DtsParser for QuotedDtsParser {
  fn parse_dts(&self, source: &str) -> Result<Vec<DtsReference>, LexerError> {
    let mut references = Vec::new();
    let bytes = source.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
      if bytes[i] == b'"' {
        if let Some(len) = source[i + 1..].find('"') {
          references.push(DtsReference {
            specifier: source[i + 1..i + 1 + len].to_string(),
            kind: TsImportKind::Import,
            range: i + 1..i + 1 + len,
          });
          i += len + 2;
          continue;
        }
      }
      i += 1;
    }
    Ok(references)
  }
}

/// An in-memory environment wiring every collaborator to test doubles.
#[derive(Debug, Clone)]
pub(crate) struct TestEnv {
  fs: Arc<MemoryFs>,
  registry: Arc<MemoryRegistry>,
  refs: Arc<StubRefsLister>,
  storage: Arc<MemoryStorage>,
  js_lexer: Arc<StubJsLexer>,
  env: ResolverEnv,
}

impl TestEnv {
  pub fn new() -> TestEnv {
    let fs = Arc::new(MemoryFs::default());
    let registry = Arc::new(MemoryRegistry::default());
    let refs = Arc::new(StubRefsLister::default());
    let storage = Arc::new(MemoryStorage::default());
    let js_lexer = Arc::new(StubJsLexer::default());
    let env = ResolverEnv {
      fs: fs.clone(),
      registry: registry.clone(),
      refs: refs.clone(),
      storage: storage.clone(),
      js_lexer: js_lexer.clone(),
      cjs_lexer: Arc::new(StubCjsLexer),
      dts_parser: Arc::new(QuotedDtsParser),
    };
    TestEnv {
      fs,
      registry,
      refs,
      storage,
      js_lexer,
      env,
    }
  }

  pub fn env(&self) -> ResolverEnv {
    self.env.clone()
  }

  pub fn add_file(&self, path: &str, content: &str) {
    self
      .fs
      .files
      .lock()
      .insert(PathBuf::from(path), content.to_string());
  }

  pub fn mark_esm(&self, path: &str) {
    self.js_lexer.esm_files.lock().insert(PathBuf::from(path));
  }

  pub fn add_package(&self, name: &str, version: &str, manifest: Value) {
    self.registry.packages.lock().insert(
      (name.to_string(), version.to_string()),
      PackageJson::from_value(manifest),
    );
  }

  pub fn set_head_sha(&self, sha: &str) {
    *self.refs.head_sha.lock() = Some(sha.to_string());
  }

  pub fn storage_get(&self, key: &str) -> Option<String> {
    self
      .storage
      .items
      .lock()
      .get(key)
      .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
  }

  pub fn storage_put(&self, key: &str, content: &str) {
    self
      .storage
      .items
      .lock()
      .insert(key.to_string(), content.as_bytes().to_vec());
  }
}

/// A bare environment for tests that never touch the collaborators.
pub(crate) fn test_env() -> ResolverEnv {
  TestEnv::new().env()
}
