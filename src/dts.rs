// Copyright 2018-2025 the Deno authors. MIT license.

use std::collections::BTreeSet;
use std::collections::HashSet;
use std::sync::Arc;

use futures::future::join_all;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;

use crate::build_args::BuildArgs;
use crate::builtin_modules::is_node_builtin_module;
use crate::context::normalize_save_path;
use crate::context::BuildContext;
use crate::env::TsImportKind;
use crate::errors::ResolveError;
use crate::errors::TypesNotFoundError;
use crate::path::dir_of;
use crate::path::is_rel_path_specifier;
use crate::path::join_paths;
use crate::path::rel_path;
use crate::path::split_esm_path;
use crate::path::strip_module_ext;
use crate::path::BundleMode;
use crate::path::EsmPath;
use crate::path::Origin;
use crate::path::Target;
use crate::path::MODULE_EXTS;
use crate::specifier::to_types_package_name;

/// The placeholder the serving layer substitutes with the CDN origin when
/// a type artifact is read back.
pub const ESM_CDN_ORIGIN_PLACEHOLDER: &str = "{ESM_CDN_ORIGIN}";

type Marker = Arc<Mutex<HashSet<String>>>;

impl BuildContext {
  /// Rewrites a declaration file and, recursively, every internal
  /// declaration file it references. Persisted exactly once per
  /// destination path; re-entry is cut off both by the shared marker and
  /// by an artifact-store stat.
  pub async fn transform_dts(&self, dts: &str) -> Result<(), ResolveError> {
    let transformed = transform_dts_inner(
      self,
      dts.to_string(),
      self.build_args_prefix(true),
      None,
    )
    .await?;
    log::debug!("transformed dts '{dts}' ({transformed} related dts files)");
    Ok(())
  }
}

fn transform_dts_inner<'a>(
  ctx: &'a BuildContext,
  dts: String,
  args_prefix: String,
  marker: Option<Marker>,
) -> BoxFuture<'a, Result<usize, ResolveError>> {
  async move {
    let is_entry = marker.is_none();
    let marker =
      marker.unwrap_or_else(|| Arc::new(Mutex::new(HashSet::new())));

    let dts_path = join_paths(&[
      &format!("/{}", ctx.esm_path.package_name()),
      &args_prefix,
      &dts,
    ]);
    if !marker.lock().insert(dts_path.clone()) {
      // already transformed in this tree
      return Ok(0);
    }

    let save_path = normalize_save_path(
      ctx.zone_id.as_deref(),
      &join_paths(&["types", &dts_path]),
    );
    if ctx.env.storage.stat(&save_path).await?.is_some() {
      return Ok(0);
    }

    let dts_file_path = ctx
      .wd
      .join("node_modules")
      .join(&ctx.esm_path.pkg_name)
      .join(dts.trim_start_matches("./"));
    let source = match ctx.env.fs.read_to_string(&dts_file_path) {
      Ok(source) => source,
      Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
        if is_entry {
          return Err(
            TypesNotFoundError {
              specifier: dts.clone(),
            }
            .into(),
          );
        }
        log::warn!("dts not found: {}", dts_file_path.display());
        return Ok(0);
      }
      Err(err) => {
        return Err(ResolveError::Io {
          path: dts_file_path.display().to_string(),
          message: err.to_string(),
        });
      }
    };

    let references = ctx.env.dts_parser.parse_dts(&source)?;
    let dts_dir = dir_of(&dts);
    let mut internal_dts: BTreeSet<String> = BTreeSet::new();
    let mut output = String::with_capacity(source.len());
    let mut cursor = 0usize;
    for reference in &references {
      let rewritten = rewrite_dts_specifier(
        ctx,
        &dts,
        &args_prefix,
        &reference.specifier,
        reference.kind,
        &mut internal_dts,
      )
      .await?;
      output.push_str(&source[cursor..reference.range.start]);
      output.push_str(&rewritten);
      cursor = reference.range.end;
    }
    output.push_str(&source[cursor..]);

    ctx
      .env
      .storage
      .put(&save_path, output.as_bytes())
      .await?;

    // sibling transforms run concurrently; the first error is returned
    // after all complete
    let transforms = internal_dts.iter().map(|specifier| {
      transform_dts_inner(
        ctx,
        format!("./{}", join_paths(&[&dts_dir, specifier])),
        args_prefix.clone(),
        Some(marker.clone()),
      )
    });
    let results = join_all(transforms).await;
    let mut transformed = internal_dts.len();
    let mut first_error = None;
    for result in results {
      match result {
        Ok(n) => transformed += n,
        Err(err) => {
          if first_error.is_none() {
            first_error = Some(err);
          }
        }
      }
    }
    match first_error {
      Some(err) => Err(err),
      None => Ok(transformed),
    }
  }
  .boxed()
}

async fn rewrite_dts_specifier(
  ctx: &BuildContext,
  dts: &str,
  args_prefix: &str,
  specifier: &str,
  kind: TsImportKind,
  internal_dts: &mut BTreeSet<String>,
) -> Result<String, ResolveError> {
  // inside @types/node everything node-ish is already addressed correctly
  if ctx.esm_path.pkg_name == "@types/node"
    && (specifier.starts_with("node:")
      || is_node_builtin_module(specifier)
      || is_rel_path_specifier(specifier))
  {
    return Ok(specifier.to_string());
  }

  if is_rel_path_specifier(specifier) {
    let mut specifier =
      specifier.strip_suffix(".d").unwrap_or(specifier).to_string();
    let dts_wd = dir_of(&format!(
      "{}/{}",
      ctx.wd
        .join("node_modules")
        .join(&ctx.esm_path.pkg_name)
        .display(),
      dts.trim_start_matches("./")
    ));

    if !ends_with_dts(&specifier) {
      let mut has_types = false;
      // a nested package.json may name the types file
      let nested_manifest = ctx.env.read_json(&std::path::PathBuf::from(
        join_paths(&[&dts_wd, &specifier, "package.json"]),
      ));
      if let Some(nested) = nested_manifest {
        if let Some(types) = nested.types_field() {
          let dir = join_paths(&["/", &dir_of(dts)]);
          specifier =
            rel_path(&dir, &join_paths(&[&dir, &specifier, types]));
          has_types = true;
        }
      }
      if !has_types {
        let exists =
          |p: &str| ctx.env.fs.exists_file(std::path::Path::new(p));
        if exists(&join_paths(&[&dts_wd, &format!("{specifier}.d.mts")])) {
          specifier = format!("{specifier}.d.mts");
        } else if exists(&join_paths(&[&dts_wd, &format!("{specifier}.d.ts")]))
        {
          specifier = format!("{specifier}.d.ts");
        } else if exists(&join_paths(&[&dts_wd, &specifier, "index.d.mts"]))
        {
          specifier =
            format!("{}/index.d.mts", specifier.trim_end_matches('/'));
        } else if exists(&join_paths(&[&dts_wd, &specifier, "index.d.ts"])) {
          specifier =
            format!("{}/index.d.ts", specifier.trim_end_matches('/'));
        } else if specifier.ends_with(".js")
          || specifier.ends_with(".mjs")
          || specifier.ends_with(".cjs")
        {
          let stripped = strip_module_ext(&specifier, MODULE_EXTS).to_string();
          specifier = stripped;
          if exists(&join_paths(&[&dts_wd, &format!("{specifier}.d.mts")])) {
            specifier = format!("{specifier}.d.mts");
          } else if exists(
            &join_paths(&[&dts_wd, &format!("{specifier}.d.ts")]),
          ) {
            specifier = format!("{specifier}.d.ts");
          }
        }
      }
    }

    if ends_with_dts(&specifier) {
      internal_dts.insert(specifier.clone());
    } else {
      specifier.push_str(".d.ts");
    }
    return Ok(specifier);
  }

  if kind == TsImportKind::ReferenceTypes && specifier == "node" {
    // an empty string drops the reference from the output
    return Ok(String::new());
  }

  if specifier == "node" || is_node_builtin_module(specifier) {
    return Ok(specifier.to_string());
  }

  let (mut dep_pkg_name, _, sub_path) = split_esm_path(specifier);
  let mut specifier = if sub_path.is_empty() {
    dep_pkg_name.clone()
  } else {
    format!("{dep_pkg_name}/{sub_path}")
  };
  let mut sub_path = sub_path;

  if dep_pkg_name == ctx.esm_path.pkg_name {
    if sub_path.contains('*') {
      return Ok(format!(
        "{}/{}/{}{}",
        ESM_CDN_ORIGIN_PLACEHOLDER,
        ctx.esm_path.package_name(),
        args_prefix,
        sub_path
      ));
    }
    let entry = ctx.resolve_entry(&EsmPath {
      pkg_name: dep_pkg_name,
      pkg_version: ctx.esm_path.pkg_version.clone(),
      sub_path: sub_path.clone(),
      sub_bare_name: sub_path,
      origin: Origin::Registry,
    });
    if let Some(types) = &entry.dts {
      return Ok(format!(
        "{}/{}/{}{}",
        ESM_CDN_ORIGIN_PLACEHOLDER,
        ctx.esm_path.package_name(),
        args_prefix,
        types.trim_start_matches("./")
      ));
    }
    return Ok(specifier);
  }

  // respect `?alias`
  if let Some(alias) = ctx.args.alias.get(&dep_pkg_name) {
    let (alias_pkg_name, _, alias_sub_path) = split_esm_path(alias);
    dep_pkg_name = alias_pkg_name;
    if !alias_sub_path.is_empty() {
      sub_path = if sub_path.is_empty() {
        alias_sub_path
      } else {
        format!("{alias_sub_path}/{sub_path}")
      };
    }
    specifier = if sub_path.is_empty() {
      dep_pkg_name.clone()
    } else {
      format!("{dep_pkg_name}/{sub_path}")
    };
  }

  // respect `?external`
  if ctx.args.external_all || ctx.args.external.contains(&dep_pkg_name) {
    return Ok(specifier);
  }

  // prefer a sibling @types package the manifest already depends on
  let types_pkg_name = to_types_package_name(&dep_pkg_name);
  if ctx.package_json.dependencies.contains_key(&types_pkg_name)
    || ctx
      .package_json
      .peer_dependencies
      .contains_key(&types_pkg_name)
  {
    dep_pkg_name = types_pkg_name;
  }

  let (_, info) = match ctx.lookup_dep(&dep_pkg_name, true).await {
    Ok(found) => found,
    Err(ResolveError::Registry(err))
      if kind == TsImportKind::DeclareModule && err.is_not_found() =>
    {
      // a declare-module stub for a package that does not exist stays
      return Ok(specifier);
    }
    Err(err) => return Err(err),
  };

  let dts_module = EsmPath {
    pkg_name: info.name.clone(),
    pkg_version: info.version.clone(),
    sub_path: sub_path.clone(),
    sub_bare_name: sub_path,
    origin: Origin::Registry,
  };
  let mut types_ctx = BuildContext::new(
    ctx.env.clone(),
    ctx.zone_id.clone(),
    dts_module.clone(),
    BuildArgs::default(),
    Target::Types,
    false,
    BundleMode::Default,
    false,
  );
  types_ctx.wd = ctx.wd.clone();
  types_ctx
    .install()
    .await
    .map_err(ResolveError::Install)?;

  let entry = types_ctx.resolve_entry(&dts_module);
  if let Some(dts_path) = types_ctx.resolve_dts(&entry).await? {
    return Ok(format!("{ESM_CDN_ORIGIN_PLACEHOLDER}{dts_path}"));
  }

  if kind == TsImportKind::DeclareModule {
    return Ok(format!(
      "{}/{}",
      ESM_CDN_ORIGIN_PLACEHOLDER,
      dts_module.specifier()
    ));
  }

  Ok(format!("{ESM_CDN_ORIGIN_PLACEHOLDER}{}", types_ctx.path()))
}

fn ends_with_dts(specifier: &str) -> bool {
  specifier.ends_with(".d.ts") || specifier.ends_with(".d.mts")
}

#[cfg(test)]
mod tests {
  use futures::executor::block_on;
  use serde_json::json;

  use super::*;
  use crate::package_json::PackageJson;
  use crate::testing::TestEnv;

  fn context_for(env: &TestEnv, manifest: serde_json::Value) -> BuildContext {
    let mut ctx = BuildContext::new(
      env.env(),
      None,
      EsmPath::parse("foo@1.0.0").unwrap(),
      BuildArgs::default(),
      Target::Types,
      false,
      BundleMode::BundleFalse,
      false,
    );
    ctx.wd = "/work".into();
    ctx.pkg_dir = "/work/node_modules/foo".into();
    ctx.package_json = PackageJson::from_value(manifest);
    ctx
  }

  #[test]
  fn test_transform_rewrites_and_persists() {
    let env = TestEnv::new();
    env.add_file(
      "/work/node_modules/foo/index.d.ts",
      "import \"./util\";\nimport \"node:fs\";\n",
    );
    env.add_file("/work/node_modules/foo/util.d.ts", "export {};\n");
    let ctx =
      context_for(&env, json!({ "name": "foo", "version": "1.0.0" }));
    block_on(ctx.transform_dts("./index.d.ts")).unwrap();

    let stored = env.storage_get("types/foo@1.0.0/index.d.ts").unwrap();
    assert_eq!(stored, "import \"./util.d.ts\";\nimport \"node:fs\";\n");
    // the referenced internal dts was transformed too
    assert!(env.storage_get("types/foo@1.0.0/util.d.ts").is_some());
  }

  #[test]
  fn test_transform_skips_already_stored() {
    let env = TestEnv::new();
    env.add_file(
      "/work/node_modules/foo/index.d.ts",
      "import \"./missing\";\n",
    );
    env.storage_put("types/foo@1.0.0/index.d.ts", "cached");
    let ctx =
      context_for(&env, json!({ "name": "foo", "version": "1.0.0" }));
    block_on(ctx.transform_dts("./index.d.ts")).unwrap();
    assert_eq!(
      env.storage_get("types/foo@1.0.0/index.d.ts").unwrap(),
      "cached"
    );
  }

  #[test]
  fn test_missing_entry_dts_is_an_error() {
    let env = TestEnv::new();
    let ctx =
      context_for(&env, json!({ "name": "foo", "version": "1.0.0" }));
    let err = block_on(ctx.transform_dts("./index.d.ts")).unwrap_err();
    assert!(matches!(err, ResolveError::TypesNotFound(_)));
  }

  #[test]
  fn test_missing_internal_dts_is_skipped() {
    let env = TestEnv::new();
    env.add_file(
      "/work/node_modules/foo/index.d.ts",
      "import \"./gone.d.ts\";\n",
    );
    let ctx =
      context_for(&env, json!({ "name": "foo", "version": "1.0.0" }));
    // the referenced file does not exist; only a warning is logged
    block_on(ctx.transform_dts("./index.d.ts")).unwrap();
    assert!(env.storage_get("types/foo@1.0.0/index.d.ts").is_some());
    assert!(env.storage_get("types/foo@1.0.0/gone.d.ts").is_none());
  }

  #[test]
  fn test_reference_types_node_is_elided() {
    let env = TestEnv::new();
    let ctx =
      context_for(&env, json!({ "name": "foo", "version": "1.0.0" }));
    let mut internal = BTreeSet::new();
    let rewritten = block_on(rewrite_dts_specifier(
      &ctx,
      "./index.d.ts",
      "",
      "node",
      TsImportKind::ReferenceTypes,
      &mut internal,
    ))
    .unwrap();
    assert_eq!(rewritten, "");
    let rewritten = block_on(rewrite_dts_specifier(
      &ctx,
      "./index.d.ts",
      "",
      "fs",
      TsImportKind::Import,
      &mut internal,
    ))
    .unwrap();
    assert_eq!(rewritten, "fs");
  }

  #[test]
  fn test_self_subpath_resolves_to_placeholder_origin() {
    let env = TestEnv::new();
    env.add_file("/work/node_modules/foo/lib/sub.d.ts", "");
    let ctx =
      context_for(&env, json!({ "name": "foo", "version": "1.0.0" }));
    let mut internal = BTreeSet::new();
    let rewritten = block_on(rewrite_dts_specifier(
      &ctx,
      "./index.d.ts",
      "",
      "foo/lib/sub",
      TsImportKind::Import,
      &mut internal,
    ))
    .unwrap();
    assert_eq!(rewritten, "{ESM_CDN_ORIGIN}/foo@1.0.0/lib/sub.d.ts");
  }

  #[test]
  fn test_external_package_resolves_through_registry() {
    let env = TestEnv::new();
    env.add_package(
      "bar",
      "2.1.0",
      json!({
        "name": "bar",
        "version": "2.1.0",
        "types": "./index.d.ts"
      }),
    );
    env.add_file("/work/node_modules/bar/index.d.ts", "export {};\n");
    let ctx = context_for(
      &env,
      json!({
        "name": "foo",
        "version": "1.0.0",
        "dependencies": { "bar": "2.1.0" }
      }),
    );
    let mut internal = BTreeSet::new();
    let rewritten = block_on(rewrite_dts_specifier(
      &ctx,
      "./index.d.ts",
      "",
      "bar",
      TsImportKind::Import,
      &mut internal,
    ))
    .unwrap();
    assert_eq!(rewritten, "{ESM_CDN_ORIGIN}/bar@2.1.0/index.d.ts");
  }

  #[test]
  fn test_declare_module_for_unknown_package_stays() {
    let env = TestEnv::new();
    let ctx =
      context_for(&env, json!({ "name": "foo", "version": "1.0.0" }));
    let mut internal = BTreeSet::new();
    let rewritten = block_on(rewrite_dts_specifier(
      &ctx,
      "./index.d.ts",
      "",
      "ghost-pkg",
      TsImportKind::DeclareModule,
      &mut internal,
    ))
    .unwrap();
    assert_eq!(rewritten, "ghost-pkg");
  }

  #[test]
  fn test_relative_js_specifier_maps_to_dts_sibling() {
    let env = TestEnv::new();
    env.add_file("/work/node_modules/foo/impl.d.ts", "");
    let ctx =
      context_for(&env, json!({ "name": "foo", "version": "1.0.0" }));
    let mut internal = BTreeSet::new();
    let rewritten = block_on(rewrite_dts_specifier(
      &ctx,
      "./index.d.ts",
      "",
      "./impl.js",
      TsImportKind::Import,
      &mut internal,
    ))
    .unwrap();
    assert_eq!(rewritten, "./impl.d.ts");
    assert!(internal.contains("./impl.d.ts"));
  }
}
