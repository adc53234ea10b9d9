// Copyright 2018-2025 the Deno authors. MIT license.

use crate::build_args::encode_build_args;
use crate::build_args::normalize_build_args;
use crate::build_args::BuildArgs;
use crate::builtin_modules::is_node_builtin_module;
use crate::builtin_modules::node_builtin_name;
use crate::context::BuildContext;
use crate::context::ScheduledBuild;
use crate::errors::ResolveError;
use crate::path::dir_of;
use crate::path::rel_path;
use crate::path::split_esm_path;
use crate::path::to_module_bare_name;
use crate::path::to_package_name;
use crate::path::BundleMode;
use crate::path::EsmPath;
use crate::path::Origin;
use crate::path::Target;
use crate::specifier::interpret_version_expression;
use crate::specifier::is_fixed_version;
use crate::specifier::DepResolution;

/// How an import was written at its call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportKind {
  Static,
  Dynamic,
  Require,
}

impl BuildContext {
  /// Rewrites one import surfaced during the build to its canonical CDN
  /// URL. Each pair of (full URL, emitted URL) is recorded in the import
  /// map for preloading, except dynamic imports; `require()` calls are
  /// additionally recorded for the backend's require shim and keep their
  /// original specifier in the output.
  pub async fn resolve_external_module(
    &mut self,
    specifier: &str,
    kind: ImportKind,
  ) -> Result<String, ResolveError> {
    let mut resolved_path = self.resolve_external_module_inner(specifier).await?;

    let resolved_path_full = resolved_path.clone();
    // use a relative path for a sub-module of the current package
    if specifier.starts_with(&format!("{}/", self.package_json.name)) {
      resolved_path = rel_path(&dir_of(&self.path()), &resolved_path);
    }
    // mark the resolved path for preloading
    if kind != ImportKind::Dynamic {
      self
        .import_map
        .push((resolved_path_full.clone(), resolved_path.clone()));
    }
    // a `require("module")` call gets shimmed by the backend
    if kind == ImportKind::Require {
      self.cjs_requires.push((
        specifier.to_string(),
        resolved_path_full,
        resolved_path,
      ));
      resolved_path = specifier.to_string();
    }
    Ok(resolved_path)
  }

  async fn resolve_external_module_inner(
    &self,
    specifier: &str,
  ) -> Result<String, ResolveError> {
    // the entry of the current package when it comes from GitHub
    let pkg = &self.package_json;
    if self.esm_path.origin == Origin::GitHub
      && (specifier == pkg.name || specifier == pkg.pkg_name)
    {
      return Ok(self.import_path(
        &EsmPath {
          pkg_name: pkg.name.clone(),
          pkg_version: pkg.version.clone(),
          sub_path: String::new(),
          sub_bare_name: String::new(),
          origin: Origin::GitHub,
        },
        &self.build_args_prefix(false),
      ));
    }

    // node builtin module
    if is_node_builtin_module(specifier) {
      let name = node_builtin_name(specifier).unwrap();
      if self.args.external_all
        || self.target == Target::Node
        || self.target == Target::DenoNext
        || self.args.external.contains(specifier)
        || self.args.external.contains(name)
      {
        return Ok(specifier.to_string());
      } else if self.target == Target::Deno {
        return Ok(format!(
          "https://deno.land/std@0.177.1/node/{name}.ts"
        ));
      }
      return Ok(format!("/node/{name}.mjs"));
    }

    // check `?external`
    if self.args.external_all
      || self.args.external.contains(to_package_name(specifier))
    {
      return Ok(specifier.to_string());
    }

    // a sub-module of the current package
    if let Some(sub_path) =
      specifier.strip_prefix(&format!("{}/", self.package_json.name))
    {
      let sub_module = EsmPath {
        pkg_name: self.esm_path.pkg_name.clone(),
        pkg_version: self.esm_path.pkg_version.clone(),
        sub_path: sub_path.to_string(),
        sub_bare_name: to_module_bare_name(sub_path, false),
        origin: self.esm_path.origin,
      };
      if let Some(sub_builds) = &self.sub_builds {
        let bundle_mode = if self.bundle_mode == BundleMode::BundleFalse {
          BundleMode::BundleFalse
        } else {
          BundleMode::Default
        };
        let child = self.sub_module_context(sub_module.clone(), bundle_mode);
        sub_builds.try_schedule(ScheduledBuild {
          url: child.path(),
          path: sub_module.clone(),
          bundle_mode,
        });
      }
      let mut resolved_path =
        self.import_path(&sub_module, &self.build_args_prefix(false));
      if self.bundle_mode == BundleMode::BundleFalse {
        if let Some((name, ext)) = resolved_path.rsplit_once('.') {
          resolved_path = format!("{name}.nobundle.{ext}");
        }
      }
      return Ok(resolved_path);
    }

    // common npm dependency
    let (mut pkg_name, mut version, sub_path) = split_esm_path(specifier);
    if version.is_empty() {
      if pkg_name == self.esm_path.pkg_name {
        version = self.esm_path.pkg_version.clone();
      } else if let Some(pinned) = self.args.deps.get(&pkg_name) {
        version = pinned.clone();
      } else if let Some(declared) =
        self.package_json.dependencies.get(&pkg_name)
      {
        version = declared.trim().to_string();
      } else if let Some(declared) =
        self.package_json.peer_dependencies.get(&pkg_name)
      {
        version = declared.trim().to_string();
      } else {
        version = "latest".to_string();
      }
    }

    // force the version of 'react' (as a dependency) to equal 'react-dom'
    if self.esm_path.pkg_name == "react-dom" && pkg_name == "react" {
      version = self.esm_path.pkg_version.clone();
    }

    let dep_path = EsmPath {
      pkg_name: pkg_name.clone(),
      pkg_version: version.clone(),
      sub_path: sub_path.clone(),
      sub_bare_name: to_module_bare_name(&sub_path, true),
      origin: Origin::Registry,
    };

    let mut dep_path =
      match interpret_version_expression(&dep_path, &version, &self.esm_path)
      {
        DepResolution::Path(path) => path,
        DepResolution::ErrorUrl(url) => return Ok(url),
      };

    // pin a floating GitHub dependency to the repository HEAD
    if dep_path.origin == Origin::GitHub && dep_path.pkg_version.is_empty() {
      let refs = self
        .env
        .refs
        .list_repo_refs(&format!("https://github.com/{}", dep_path.pkg_name))
        .await?;
      if let Some(head) = refs.iter().find(|r| r.ref_name == "HEAD") {
        dep_path.pkg_version = head.sha[..16].to_string();
      }
    }

    let fixed_version = is_fixed_version(&dep_path);
    let mut args = BuildArgs {
      alias: self.args.alias.clone(),
      deps: self.args.deps.clone(),
      external: self.args.external.clone(),
      conditions: self.args.conditions.clone(),
      exports: Default::default(),
      external_all: false,
    };
    normalize_build_args(&mut args, &dep_path);

    if fixed_version {
      let encoded = encode_build_args(&args, false);
      let args_prefix = if encoded.is_empty() {
        String::new()
      } else {
        format!("X-{encoded}/")
      };
      return Ok(self.import_path(&dep_path, &args_prefix));
    }

    if dep_path.pkg_version.contains('|') || dep_path.pkg_version.contains(' ')
    {
      // pin a semver range to the latest matching release
      let (_, info) = self
        .lookup_dep(
          &format!("{}@{}", pkg_name, dep_path.pkg_version),
          false,
        )
        .await?;
      dep_path.pkg_version = format!("^{}", info.version);
    }

    let mut resolved_path = format!("/{}", dep_path.specifier());
    // workaround for es5-ext's "../#/.." paths
    if dep_path.pkg_name == "es5-ext" {
      resolved_path = resolved_path.replace("/#/", "/%23/");
    }

    let mut params: Vec<String> = Vec::new();
    if !args.alias.is_empty() {
      let mut alias: Vec<String> = args
        .alias
        .iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect();
      alias.sort();
      params.push(format!("alias={}", alias.join(",")));
    }
    if !args.deps.is_empty() {
      let mut deps: Vec<String> =
        args.deps.iter().map(|(n, v)| format!("{n}@{v}")).collect();
      deps.sort();
      params.push(format!("deps={}", deps.join(",")));
    }
    if !args.external.is_empty() {
      let external: Vec<&str> =
        args.external.iter().map(String::as_str).collect();
      params.push(format!("external={}", external.join(",")));
    }
    if !args.conditions.is_empty() {
      let mut conditions: Vec<&str> =
        args.conditions.iter().map(String::as_str).collect();
      conditions.sort();
      params.push(format!("conditions={}", conditions.join(",")));
    }
    if self.pinned_target {
      params.push(format!("target={}", self.target.as_str()));
    }
    if self.dev {
      params.push("dev".to_string());
    }
    if resolved_path.ends_with(".json") {
      params.push("module".to_string());
    }
    if !params.is_empty() {
      resolved_path = format!("{resolved_path}?{}", params.join("&"));
    }
    Ok(resolved_path)
  }

  /// A context for a sub-module build sharing this build's read-only
  /// inputs but owning its own output collections.
  fn sub_module_context(
    &self,
    esm_path: EsmPath,
    bundle_mode: BundleMode,
  ) -> BuildContext {
    let mut child = BuildContext::new(
      self.env.clone(),
      self.zone_id.clone(),
      esm_path,
      self.args.clone(),
      self.target,
      self.dev,
      bundle_mode,
      self.pinned_target,
    );
    child.package_json = self.package_json.clone();
    child.wd = self.wd.clone();
    child.pkg_dir = self.pkg_dir.clone();
    child.sub_builds = self.sub_builds.clone();
    child
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use futures::executor::block_on;
  use serde_json::json;

  use super::*;
  use crate::context::SubBuilds;
  use crate::package_json::PackageJson;
  use crate::testing::TestEnv;

  fn context(target: Target) -> BuildContext {
    let env = TestEnv::new();
    context_with(&env, target)
  }

  fn context_with(env: &TestEnv, target: Target) -> BuildContext {
    let mut ctx = BuildContext::new(
      env.env(),
      None,
      EsmPath::parse("app@1.0.0").unwrap(),
      BuildArgs::default(),
      target,
      false,
      BundleMode::Default,
      false,
    );
    ctx.wd = "/work".into();
    ctx.pkg_dir = "/work/node_modules/app".into();
    ctx.package_json = PackageJson::from_value(json!({
      "name": "app",
      "version": "1.0.0"
    }));
    ctx
  }

  #[test]
  fn test_builtin_for_each_target() {
    let mut ctx = context(Target::Deno);
    assert_eq!(
      block_on(ctx.resolve_external_module("fs", ImportKind::Static))
        .unwrap(),
      "https://deno.land/std@0.177.1/node/fs.ts"
    );
    let mut ctx = context(Target::DenoNext);
    assert_eq!(
      block_on(ctx.resolve_external_module("fs", ImportKind::Static))
        .unwrap(),
      "fs"
    );
    let mut ctx = context(Target::Es2022);
    assert_eq!(
      block_on(ctx.resolve_external_module("fs", ImportKind::Static))
        .unwrap(),
      "/node/fs.mjs"
    );
    let mut ctx = context(Target::Es2022);
    assert_eq!(
      block_on(
        ctx.resolve_external_module("node:fs/promises", ImportKind::Static)
      )
      .unwrap(),
      "/node/fs/promises.mjs"
    );
  }

  #[test]
  fn test_external_packages_stay_verbatim() {
    let mut ctx = context(Target::Es2022);
    ctx.args.external.insert("react".into());
    assert_eq!(
      block_on(
        ctx.resolve_external_module("react/jsx-runtime", ImportKind::Static)
      )
      .unwrap(),
      "react/jsx-runtime"
    );
    let mut ctx = context(Target::Es2022);
    ctx.args.external_all = true;
    assert_eq!(
      block_on(ctx.resolve_external_module("anything", ImportKind::Static))
        .unwrap(),
      "anything"
    );
  }

  #[test]
  fn test_fixed_dependency_url() {
    let mut ctx = context(Target::Es2022);
    ctx
      .package_json
      .dependencies
      .insert("lodash".into(), "4.17.21".into());
    assert_eq!(
      block_on(ctx.resolve_external_module("lodash", ImportKind::Static))
        .unwrap(),
      "/lodash@4.17.21/es2022/lodash.mjs"
    );
  }

  #[test]
  fn test_github_dependency_keeps_tag() {
    let mut ctx = context(Target::Es2022);
    ctx
      .package_json
      .dependencies
      .insert("react".into(), "github:facebook/react#v18.2.0".into());
    assert_eq!(
      block_on(ctx.resolve_external_module("react", ImportKind::Static))
        .unwrap(),
      "/gh/facebook/react@v18.2.0/es2022/react.mjs"
    );
  }

  #[test]
  fn test_github_dependency_pins_head() {
    let env = TestEnv::new();
    env.set_head_sha("0123456789abcdef0123456789abcdef01234567");
    let mut ctx = context_with(&env, Target::Es2022);
    ctx
      .package_json
      .dependencies
      .insert("tslib".into(), "github:microsoft/tslib".into());
    assert_eq!(
      block_on(ctx.resolve_external_module("tslib", ImportKind::Static))
        .unwrap(),
      "/gh/microsoft/tslib@0123456789abcdef/es2022/tslib.mjs"
    );
  }

  #[test]
  fn test_unfixed_dependency_gets_query_url() {
    let mut ctx = context(Target::Es2022);
    ctx.pinned_target = true;
    ctx
      .package_json
      .dependencies
      .insert("lodash".into(), "^4.17.0".into());
    assert_eq!(
      block_on(ctx.resolve_external_module("lodash/get", ImportKind::Static))
        .unwrap(),
      "/lodash@^4.17.0/get?target=es2022"
    );
  }

  #[test]
  fn test_json_submodule_gets_module_param() {
    let mut ctx = context(Target::Es2022);
    ctx
      .package_json
      .dependencies
      .insert("cfg".into(), "^1.0.0".into());
    assert_eq!(
      block_on(
        ctx.resolve_external_module("cfg/data.json", ImportKind::Static)
      )
      .unwrap(),
      "/cfg@^1.0.0/data.json?module"
    );
  }

  #[test]
  fn test_self_submodule_is_scheduled_and_relative() {
    let mut ctx = context(Target::Es2022);
    ctx.sub_builds = Some(Arc::new(SubBuilds::new()));
    let resolved = block_on(
      ctx.resolve_external_module("app/utils", ImportKind::Static),
    )
    .unwrap();
    assert_eq!(resolved, "./utils.mjs");
    let sub_builds = ctx.sub_builds.clone().unwrap();
    assert!(sub_builds.contains("/app@1.0.0/es2022/utils.mjs"));
    assert_eq!(sub_builds.drain_pending().len(), 1);
    // scheduling is deduplicated by canonical URL
    let _ = block_on(
      ctx.resolve_external_module("app/utils", ImportKind::Static),
    )
    .unwrap();
    assert!(sub_builds.drain_pending().is_empty());
    // the full URL is still recorded in the import map
    assert_eq!(
      ctx.import_map.last().unwrap().0,
      "/app@1.0.0/es2022/utils.mjs"
    );
  }

  #[test]
  fn test_self_submodule_nobundle() {
    let mut ctx = context(Target::Es2022);
    ctx.bundle_mode = BundleMode::BundleFalse;
    let resolved = block_on(
      ctx.resolve_external_module("app/utils", ImportKind::Static),
    )
    .unwrap();
    assert_eq!(resolved, "./utils.nobundle.mjs");
  }

  #[test]
  fn test_require_kind_returns_original_specifier() {
    let mut ctx = context(Target::Es2022);
    ctx
      .package_json
      .dependencies
      .insert("lodash".into(), "4.17.21".into());
    let resolved = block_on(
      ctx.resolve_external_module("lodash", ImportKind::Require),
    )
    .unwrap();
    assert_eq!(resolved, "lodash");
    assert_eq!(
      ctx.cjs_requires,
      vec![(
        "lodash".to_string(),
        "/lodash@4.17.21/es2022/lodash.mjs".to_string(),
        "/lodash@4.17.21/es2022/lodash.mjs".to_string()
      )]
    );
  }

  #[test]
  fn test_dynamic_imports_skip_import_map() {
    let mut ctx = context(Target::Es2022);
    ctx
      .package_json
      .dependencies
      .insert("lodash".into(), "4.17.21".into());
    let _ = block_on(
      ctx.resolve_external_module("lodash", ImportKind::Dynamic),
    )
    .unwrap();
    assert!(ctx.import_map.is_empty());
    let _ = block_on(
      ctx.resolve_external_module("lodash", ImportKind::Static),
    )
    .unwrap();
    assert_eq!(ctx.import_map.len(), 1);
  }

  #[test]
  fn test_es5_ext_hash_encoding() {
    let mut ctx = context(Target::Es2022);
    ctx
      .package_json
      .dependencies
      .insert("es5-ext".into(), "^0.10.0".into());
    let resolved = block_on(ctx.resolve_external_module(
      "es5-ext/array/#/some",
      ImportKind::Static,
    ))
    .unwrap();
    assert_eq!(resolved, "/es5-ext@^0.10.0/array/%23/some");
  }

  #[test]
  fn test_react_dom_pins_react_version() {
    let env = TestEnv::new();
    let mut ctx = BuildContext::new(
      env.env(),
      None,
      EsmPath::parse("react-dom@18.2.0").unwrap(),
      BuildArgs::default(),
      Target::Es2022,
      false,
      BundleMode::Default,
      false,
    );
    ctx.package_json = PackageJson::from_value(json!({
      "name": "react-dom",
      "version": "18.2.0",
      "dependencies": { "react": "^18.0.0" }
    }));
    assert_eq!(
      block_on(ctx.resolve_external_module("react", ImportKind::Static))
        .unwrap(),
      "/react@18.2.0/es2022/react.mjs"
    );
  }

  #[test]
  fn test_github_self_import() {
    let env = TestEnv::new();
    let mut ctx = BuildContext::new(
      env.env(),
      None,
      EsmPath::parse("gh/facebook/react@v18.2.0").unwrap(),
      BuildArgs::default(),
      Target::Es2022,
      false,
      BundleMode::Default,
      false,
    );
    ctx.package_json = PackageJson::from_value(json!({
      "name": "react",
      "version": "18.2.0"
    }));
    ctx.normalize_package_json();
    assert_eq!(
      block_on(ctx.resolve_external_module("react", ImportKind::Static))
        .unwrap(),
      "/gh/facebook/react@v18.2.0/es2022/react.mjs"
    );
  }
}
