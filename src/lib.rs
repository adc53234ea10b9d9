// Copyright 2018-2025 the Deno authors. MIT license.

//! Resolution and entrypoint-selection core of an ESM-over-HTTP CDN.
//!
//! Given a package, a version, an optional sub-path and a set of build
//! options, this crate decides which files inside the extracted package
//! serve as the ESM/CommonJS/declaration entrypoints, rewrites every
//! import surfaced during a build to a canonical CDN URL, and rewrites
//! declaration-file references. All decisions are deterministic for
//! identical inputs; the canonical URL doubles as the cache key of the
//! content-addressed artifact store.

#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]

pub mod build_args;
pub mod builtin_modules;
pub mod context;
pub mod dts;
pub mod entry;
pub mod env;
pub mod errors;
pub mod exports;
pub mod package_json;
pub mod path;
pub mod rewriter;
pub mod specifier;
#[cfg(test)]
mod testing;

pub use build_args::decode_build_args;
pub use build_args::encode_build_args;
pub use build_args::BuildArgs;
pub use builtin_modules::is_node_builtin_module;
pub use context::normalize_save_path;
pub use context::BuildContext;
pub use context::ScheduledBuild;
pub use context::SubBuilds;
pub use context::SubBuildsRc;
pub use dts::ESM_CDN_ORIGIN_PLACEHOLDER;
pub use entry::BuildEntry;
pub use entry::EntryKind;
pub use entry::ModuleMeta;
pub use env::ResolverEnv;
pub use errors::ResolveError;
pub use exports::ModuleType;
pub use package_json::PackageJson;
pub use path::parse_canonical_url;
pub use path::BundleMode;
pub use path::EsmPath;
pub use path::Origin;
pub use path::Target;
pub use rewriter::ImportKind;
pub use specifier::DepResolution;
