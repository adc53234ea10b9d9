// Copyright 2018-2025 the Deno authors. MIT license.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde_json::Value;
use sha1::Digest;
use sha1::Sha1;

use crate::build_args::encode_build_args;
use crate::build_args::BuildArgs;
use crate::entry::BuildEntry;
use crate::env::ResolverEnv;
use crate::errors::InstallError;
use crate::errors::ResolveError;
use crate::package_json::get_all_exports_paths;
use crate::package_json::PackageJson;
use crate::path::base_of;
use crate::path::clean_path;
use crate::path::join_paths;
use crate::path::split_esm_path;
use crate::path::strip_module_ext;
use crate::path::to_module_bare_name;
use crate::path::BundleMode;
use crate::path::EsmPath;
use crate::path::Origin;
use crate::path::Target;
use crate::path::MODULE_EXTS;
use crate::specifier::is_strict_semver;
use crate::specifier::to_types_package_name;

/// A sub-module build queued by the import rewriter. The embedding server
/// drains these and runs each through the bundler backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledBuild {
  pub url: String,
  pub path: EsmPath,
  pub bundle_mode: BundleMode,
}

/// The process-wide scheduling gate: each canonical artifact URL is
/// dispatched at most once per server lifetime. Shared across every
/// context of a request tree.
#[derive(Debug, Default)]
pub struct SubBuilds {
  inner: Mutex<SubBuildsInner>,
}

#[derive(Debug, Default)]
struct SubBuildsInner {
  seen: HashSet<String>,
  pending: Vec<ScheduledBuild>,
}

impl SubBuilds {
  pub fn new() -> SubBuilds {
    SubBuilds::default()
  }

  /// Enqueues the build unless its URL was already claimed.
  pub fn try_schedule(&self, build: ScheduledBuild) -> bool {
    let mut inner = self.inner.lock();
    if inner.seen.insert(build.url.clone()) {
      inner.pending.push(build);
      true
    } else {
      false
    }
  }

  pub fn contains(&self, url: &str) -> bool {
    self.inner.lock().seen.contains(url)
  }

  pub fn drain_pending(&self) -> Vec<ScheduledBuild> {
    std::mem::take(&mut self.inner.lock().pending)
  }

  pub fn len(&self) -> usize {
    self.inner.lock().seen.len()
  }

  pub fn is_empty(&self) -> bool {
    self.inner.lock().seen.is_empty()
  }
}

pub type SubBuildsRc = Arc<SubBuilds>;

/// Per-request state of one build: the immutable inputs, the append-only
/// collections the rewriter populates, and the memoized canonical path.
#[derive(Debug)]
pub struct BuildContext {
  pub env: ResolverEnv,
  pub zone_id: Option<String>,
  pub esm_path: EsmPath,
  pub package_json: PackageJson,
  pub args: BuildArgs,
  pub target: Target,
  pub pinned_target: bool,
  pub dev: bool,
  pub bundle_mode: BundleMode,
  pub wd: PathBuf,
  pub pkg_dir: PathBuf,
  pub import_map: Vec<(String, String)>,
  pub cjs_requires: Vec<(String, String, String)>,
  pub sub_builds: Option<SubBuildsRc>,
  path: OnceCell<String>,
}

impl BuildContext {
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    env: ResolverEnv,
    zone_id: Option<String>,
    esm_path: EsmPath,
    args: BuildArgs,
    target: Target,
    dev: bool,
    bundle_mode: BundleMode,
    pinned_target: bool,
  ) -> BuildContext {
    BuildContext {
      env,
      zone_id,
      esm_path,
      package_json: PackageJson::default(),
      args,
      target,
      pinned_target,
      dev,
      bundle_mode,
      wd: PathBuf::new(),
      pkg_dir: PathBuf::new(),
      import_map: Vec::new(),
      cjs_requires: Vec::new(),
      sub_builds: None,
      path: OnceCell::new(),
    }
  }

  /// The canonical URL of this build's artifact. Memoized: the path is
  /// part of the identity of the context.
  pub fn path(&self) -> String {
    self
      .path
      .get_or_init(|| {
        let esm_path = &self.esm_path;
        if self.target == Target::Types {
          if esm_path.sub_path.ends_with(".d.ts") {
            return format!(
              "/{}/{}{}",
              esm_path.package_name(),
              self.build_args_prefix(true),
              esm_path.sub_path
            );
          }
          return format!("/{}", esm_path.specifier());
        }

        let mut name = self.artifact_name(esm_path);
        match self.bundle_mode {
          BundleMode::BundleAll => name.push_str(".bundle"),
          BundleMode::BundleFalse => name.push_str(".nobundle"),
          BundleMode::Default => {}
        }
        format!(
          "/{}/{}{}/{}.mjs",
          esm_path.package_name(),
          self.build_args_prefix(false),
          self.target.as_str(),
          name
        )
      })
      .clone()
  }

  /// The canonical URL of another module built with this context's target
  /// and dev flag; used for every import the rewriter emits.
  pub fn import_path(&self, esm_path: &EsmPath, args_prefix: &str) -> String {
    format!(
      "/{}/{}{}/{}.mjs",
      esm_path.package_name(),
      args_prefix,
      self.target.as_str(),
      self.artifact_name(esm_path)
    )
  }

  fn artifact_name(&self, esm_path: &EsmPath) -> String {
    let base = base_of(&esm_path.pkg_name);
    let mut name = base.strip_suffix(".js").unwrap_or(base).to_string();
    if !esm_path.sub_bare_name.is_empty() {
      if esm_path.sub_bare_name == name {
        // the sub-module name is the same as the package name
        name = format!("__{}", esm_path.sub_bare_name);
      } else {
        name = esm_path.sub_bare_name.clone();
      }
      // workaround for es5-ext's "../#/.." paths
      if esm_path.pkg_name == "es5-ext" {
        name = name.replace("/#/", "/%23/");
      }
    }
    if self.dev {
      name.push_str(".development");
    }
    name
  }

  pub fn save_path(&self) -> String {
    normalize_save_path(
      self.zone_id.as_deref(),
      &join_paths(&["builds", &self.path()]),
    )
  }

  pub fn build_args_prefix(&self, for_types: bool) -> String {
    let encoded = encode_build_args(&self.args, for_types);
    if encoded.is_empty() {
      String::new()
    } else {
      format!("X-{encoded}/")
    }
  }

  pub fn node_env(&self) -> &'static str {
    if self.dev {
      "development"
    } else {
      "production"
    }
  }

  pub fn exists_pkg_file(&self, rel: &str) -> bool {
    let rel = rel.trim_start_matches("./");
    self.env.fs.exists_file(&self.pkg_dir.join(rel))
  }

  /// Installs the package this context addresses and loads its manifest.
  pub async fn install(&mut self) -> Result<(), InstallError> {
    let pkg = self.env.registry.install(&self.esm_path, &self.wd).await?;
    self.pkg_dir = self
      .wd
      .join("node_modules")
      .join(&self.esm_path.pkg_name);
    self.package_json = pkg;
    self.normalize_package_json();
    Ok(())
  }

  /// Resolves a dependency specifier to a concrete package: a `?deps` pin
  /// wins, then an already-installed manifest, then the version expression
  /// from this package's dependency tables, then `latest`. When resolving
  /// for declaration files, a missing package retries as `@types/<name>`.
  pub async fn lookup_dep(
    &self,
    specifier: &str,
    is_dts: bool,
  ) -> Result<(EsmPath, PackageJson), ResolveError> {
    let (mut pkg_name, mut version, sub_path) = split_esm_path(specifier);
    loop {
      if let Some(pinned) = self.args.deps.get(&pkg_name) {
        let info =
          self.env.registry.get_package_info(&pkg_name, pinned).await?;
        return Ok((dep_path(&pkg_name, &info.version, &sub_path), info));
      }

      let pnpm_manifest = self
        .wd
        .join("node_modules/.pnpm/node_modules")
        .join(&pkg_name)
        .join("package.json");
      let plain_manifest = self
        .wd
        .join("node_modules")
        .join(&pkg_name)
        .join("package.json");
      for manifest_path in [pnpm_manifest, plain_manifest] {
        if self.env.fs.exists_file(&manifest_path) {
          if let Some(info) = self.env.read_json(&manifest_path) {
            return Ok((dep_path(&pkg_name, &info.version, &sub_path), info));
          }
        }
      }

      if version.is_empty() {
        let declared = self
          .package_json
          .dependencies
          .get(&pkg_name)
          .or_else(|| self.package_json.peer_dependencies.get(&pkg_name));
        match declared {
          Some(v) if v.starts_with("npm:") => {
            let (aliased_name, aliased_version, _) = split_esm_path(&v[4..]);
            pkg_name = aliased_name;
            version = aliased_version;
          }
          Some(v) => version = v.clone(),
          None => version = "latest".to_string(),
        }
      }

      match self.env.registry.get_package_info(&pkg_name, &version).await {
        Ok(info) => {
          return Ok((dep_path(&pkg_name, &info.version, &sub_path), info));
        }
        Err(err)
          if err.is_not_found()
            && is_dts
            && !pkg_name.starts_with("@types/") =>
        {
          pkg_name = to_types_package_name(&pkg_name);
        }
        Err(err) => return Err(err.into()),
      }
    }
  }

  /// Reshapes the freshly-installed manifest into the form the resolver
  /// expects: origin-dependent renaming and version pinning, `module`
  /// inference from legacy fields, and collapsing a sub-path that denotes
  /// the package's main entry back to the canonical root URL.
  pub fn normalize_package_json(&mut self) {
    if matches!(self.esm_path.origin, Origin::GitHub | Origin::PkgPr) {
      // the manifest name may differ from the repository path
      if self.package_json.name != self.esm_path.pkg_name {
        self.package_json.pkg_name = self.package_json.name.clone();
        self.package_json.name = self.esm_path.pkg_name.clone();
      }
      self.package_json.version = self.esm_path.pkg_version.clone();
    } else {
      self.package_json.version = self
        .package_json
        .version
        .trim_start_matches('v')
        .to_string();
    }

    if self.target == Target::Types {
      return;
    }

    if self.package_json.module.is_none() {
      let es2015 = self.package_json.es2015.clone();
      let jsnext_main = self.package_json.jsnext_main.clone();
      let main = self.package_json.main.clone();
      let is_esm_type = self.package_json.typ == "module";
      if let Some(es2015) = es2015.filter(|p| self.exists_pkg_file(p)) {
        self.package_json.module = Some(es2015);
      } else if let Some(jsnext) =
        jsnext_main.filter(|p| self.exists_pkg_file(p))
      {
        self.package_json.module = Some(jsnext);
      } else if let Some(main) = main {
        if is_esm_type || main.ends_with(".mjs") {
          self.package_json.module = Some(main);
          self.package_json.main = None;
        }
      }
    }

    let sub_module = self.esm_path.sub_bare_name.clone();
    if !sub_module.is_empty() {
      let check = |s: &str| -> bool {
        if s.is_empty() {
          return false;
        }
        let stripped = strip_module_ext(s, MODULE_EXTS);
        let normalized =
          clean_path(&format!("/{}", stripped.trim_start_matches("./")));
        sub_module == normalized[1..]
      };

      let mut is_pkg_main_module = false;
      match &self.package_json.exports {
        Some(Value::String(s)) => is_pkg_main_module = check(s),
        Some(Value::Object(om)) => match om.get(".") {
          Some(Value::String(s)) => is_pkg_main_module = check(s),
          Some(Value::Object(conditions)) => {
            for path in get_all_exports_paths(conditions) {
              if check(&path) {
                is_pkg_main_module = true;
                break;
              }
            }
          }
          _ => {}
        },
        _ => {}
      }
      if !is_pkg_main_module {
        is_pkg_main_module = self
          .package_json
          .module
          .as_deref()
          .is_some_and(check)
          || self.package_json.main.as_deref().is_some_and(check);
      }
      if is_pkg_main_module {
        self.esm_path.sub_bare_name = String::new();
        self.esm_path.sub_path = String::new();
        self.path = OnceCell::new();
      }
    }
  }

  /// Turns a resolved dts entry into its canonical types URL, falling back
  /// to a sibling `@types/*` package published for this version when the
  /// package itself ships no types.
  pub fn resolve_dts<'a>(
    &'a self,
    entry: &'a BuildEntry,
  ) -> BoxFuture<'a, Result<Option<String>, ResolveError>> {
    async move {
      if let Some(dts) = &entry.dts {
        if !self.exists_pkg_file(dts) {
          return Ok(None);
        }
        return Ok(Some(format!(
          "/{}/{}{}",
          self.esm_path.package_name(),
          self.build_args_prefix(true),
          dts.trim_start_matches("./")
        )));
      }

      if !self.esm_path.sub_path.is_empty()
        && self.package_json.types_field().is_some()
      {
        return Ok(None);
      }

      let pkg = &self.package_json;
      if pkg.types.is_none()
        && !pkg.name.starts_with("@types/")
        && is_strict_semver(&pkg.version)
      {
        let parts: Vec<&str> = pkg.version.split('.').collect();
        let mut versions =
          vec![format!("{}.{}", parts[0], parts[1]), parts[0].to_string()];
        let types_pkg_name = to_types_package_name(&pkg.name);
        if let Some(pinned) = self.args.deps.get(&types_pkg_name) {
          // the `?deps` query wins over the derived ranges
          versions.insert(0, pinned.clone());
        }
        for version in versions {
          let Ok(info) = self
            .env
            .registry
            .get_package_info(&types_pkg_name, &version)
            .await
          else {
            continue;
          };
          let dts_module = EsmPath {
            pkg_name: types_pkg_name.clone(),
            pkg_version: info.version.clone(),
            sub_path: self.esm_path.sub_path.clone(),
            sub_bare_name: self.esm_path.sub_bare_name.clone(),
            origin: Origin::Registry,
          };
          let mut types_ctx = BuildContext::new(
            self.env.clone(),
            self.zone_id.clone(),
            dts_module.clone(),
            self.args.clone(),
            Target::Types,
            false,
            BundleMode::BundleFalse,
            false,
          );
          types_ctx.wd = self.wd.clone();
          match types_ctx.install().await {
            Ok(()) => {}
            Err(InstallError::NoMatchingVersion { .. }) => return Ok(None),
            Err(err) => return Err(err.into()),
          }
          let types_entry = types_ctx.resolve_entry(&dts_module);
          if let Some(dts) = types_ctx.resolve_dts(&types_entry).await? {
            // use a tilde semver range instead of the exact version
            return Ok(Some(dts.replace(
              &format!("{types_pkg_name}@{}", info.version),
              &format!("{types_pkg_name}@~{}", info.version),
            )));
          }
        }
      }

      Ok(None)
    }
    .boxed()
  }
}

fn dep_path(name: &str, version: &str, sub_path: &str) -> EsmPath {
  EsmPath {
    pkg_name: name.to_string(),
    pkg_version: version.to_string(),
    sub_path: sub_path.to_string(),
    sub_bare_name: to_module_bare_name(sub_path, true),
    origin: Origin::Registry,
  }
}

/// Bounds filesystem key length: any `X-` args segment longer than 42
/// characters is replaced with the sha1 of the segment.
pub fn normalize_save_path(zone_id: Option<&str>, pathname: &str) -> String {
  let segs: Vec<String> = pathname
    .split('/')
    .map(|seg| {
      if seg.starts_with("X-") && seg.len() > 42 {
        let mut hasher = Sha1::new();
        hasher.update(seg.as_bytes());
        let digest = hasher.finalize();
        let hex: String =
          digest.iter().map(|b| format!("{b:02x}")).collect();
        format!("X-{hex}")
      } else {
        seg.to_string()
      }
    })
    .collect();
  let joined = segs.join("/");
  match zone_id {
    Some(zone) if !zone.is_empty() => format!("{zone}/{joined}"),
    _ => joined,
  }
}
