// Copyright 2018-2025 the Deno authors. MIT license.

use std::fmt;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::InstallError;
use crate::errors::LexerError;
use crate::errors::RefsError;
use crate::errors::RegistryError;
use crate::errors::StorageError;
use crate::package_json::PackageJson;
use crate::path::EsmPath;

/// Filesystem access, rooted wherever the registry client unpacks
/// tarballs. Only existence checks and whole-file reads are needed.
pub trait ResolverFs: fmt::Debug + Send + Sync {
  fn exists_file(&self, path: &Path) -> bool;
  fn read_to_string(&self, path: &Path) -> std::io::Result<String>;
}

pub type ResolverFsRc = Arc<dyn ResolverFs>;

/// The npm registry client. `get_package_info` resolves a version
/// expression to a concrete manifest; `install` unpacks the package into
/// `<wd>/node_modules/<name>` and returns its manifest.
#[async_trait]
pub trait NpmRegistry: fmt::Debug + Send + Sync {
  async fn get_package_info(
    &self,
    name: &str,
    version: &str,
  ) -> Result<PackageJson, RegistryError>;

  async fn install(
    &self,
    path: &EsmPath,
    wd: &Path,
  ) -> Result<PackageJson, InstallError>;
}

pub type NpmRegistryRc = Arc<dyn NpmRegistry>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitRef {
  pub ref_name: String,
  pub sha: String,
}

/// Lists the refs of a remote git repository (used to pin floating HEAD
/// references of GitHub dependencies).
#[async_trait]
pub trait RepoRefsLister: fmt::Debug + Send + Sync {
  async fn list_repo_refs(&self, url: &str) -> Result<Vec<GitRef>, RefsError>;
}

pub type RepoRefsListerRc = Arc<dyn RepoRefsLister>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMeta {
  pub size: u64,
}

/// The content-addressed artifact store. A successful `stat` is the
/// idempotence check that short-circuits re-transformation.
#[async_trait]
pub trait ArtifactStorage: fmt::Debug + Send + Sync {
  async fn stat(&self, key: &str)
    -> Result<Option<ArtifactMeta>, StorageError>;
  async fn put(&self, key: &str, content: &[u8])
    -> Result<(), StorageError>;
}

pub type ArtifactStorageRc = Arc<dyn ArtifactStorage>;

/// The JavaScript/TypeScript lexer: reports whether a file parses as ESM
/// and which names it exports.
pub trait JsLexer: fmt::Debug + Send + Sync {
  fn validate_module_file(
    &self,
    path: &Path,
  ) -> Result<(bool, Vec<String>), LexerError>;
}

pub type JsLexerRc = Arc<dyn JsLexer>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CjsLexerResult {
  pub has_default_export: bool,
  pub named_exports: Vec<String>,
  pub reexport: Option<String>,
  pub error: Option<String>,
}

/// The CommonJS lexer, which evaluates a module in a sandboxed runtime to
/// discover its export shape.
#[async_trait]
pub trait CjsLexer: fmt::Debug + Send + Sync {
  async fn cjs_module_lexer(
    &self,
    pkg_name: &str,
    wd: &Path,
    specifier: &str,
    node_env: &str,
  ) -> Result<CjsLexerResult, LexerError>;
}

pub type CjsLexerRc = Arc<dyn CjsLexer>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsImportKind {
  Import,
  ReferenceTypes,
  ReferencePath,
  DeclareModule,
  ExportFrom,
}

/// One specifier found in a declaration file. `range` is the byte span of
/// the specifier text inside the source, so replacements can be spliced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DtsReference {
  pub specifier: String,
  pub kind: TsImportKind,
  pub range: Range<usize>,
}

/// The declaration-file parser. Scanning and splicing are split so the
/// rewrite step can suspend on registry lookups between references.
pub trait DtsParser: fmt::Debug + Send + Sync {
  fn parse_dts(&self, source: &str) -> Result<Vec<DtsReference>, LexerError>;
}

pub type DtsParserRc = Arc<dyn DtsParser>;

/// The bundle of collaborators a build runs against.
#[derive(Debug, Clone)]
pub struct ResolverEnv {
  pub fs: ResolverFsRc,
  pub registry: NpmRegistryRc,
  pub refs: RepoRefsListerRc,
  pub storage: ArtifactStorageRc,
  pub js_lexer: JsLexerRc,
  pub cjs_lexer: CjsLexerRc,
  pub dts_parser: DtsParserRc,
}

impl ResolverEnv {
  pub(crate) fn read_json(&self, path: &Path) -> Option<PackageJson> {
    let source = self.fs.read_to_string(path).ok()?;
    PackageJson::parse(&source).ok()
  }
}
