// Copyright 2018-2025 the Deno authors. MIT license.

use thiserror::Error;

/// Error returned by the registry collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
  #[error("package '{name}@{version}' not found")]
  NotFound { name: String, version: String },
  #[error("failed loading registry info for '{name}': {message}")]
  Request { name: String, message: String },
}

impl RegistryError {
  /// The typed form of the original's "error message ends in `not found`"
  /// check, which gates the `@types/*` fallback.
  pub fn is_not_found(&self) -> bool {
    matches!(self, RegistryError::NotFound { .. })
  }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InstallError {
  #[error("no matching version for '{name}@{version}'")]
  NoMatchingVersion { name: String, version: String },
  #[error("failed to install '{name}@{version}': {message}")]
  Failed {
    name: String,
    version: String,
    message: String,
  },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("failed listing refs for '{url}': {message}")]
pub struct RefsError {
  pub url: String,
  pub message: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("artifact store error for '{key}': {message}")]
pub struct StorageError {
  pub key: String,
  pub message: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LexerError {
  #[error("invalid syntax in '{specifier}': {message}")]
  Syntax { specifier: String, message: String },
  #[error("cjs lexer failed for '{specifier}': {message}")]
  Cjs { specifier: String, message: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("types not found for '{specifier}'")]
pub struct TypesNotFoundError {
  pub specifier: String,
}

/// Any error that can surface from a resolve or rewrite operation. These
/// bubble to the build root, which decides whether to emit an error
/// artifact or fail the request.
#[derive(Debug, Error)]
pub enum ResolveError {
  #[error(transparent)]
  Registry(#[from] RegistryError),
  #[error(transparent)]
  Install(#[from] InstallError),
  #[error(transparent)]
  Refs(#[from] RefsError),
  #[error(transparent)]
  TypesNotFound(#[from] TypesNotFoundError),
  #[error(transparent)]
  Lexer(#[from] LexerError),
  #[error(transparent)]
  Storage(#[from] StorageError),
  #[error("i/o failure on '{path}': {message}")]
  Io { path: String, message: String },
}
