// Copyright 2018-2025 the Deno authors. MIT license.

use percent_encoding::utf8_percent_encode;
use percent_encoding::NON_ALPHANUMERIC;
use url::Url;

use crate::path::split_esm_path;
use crate::path::EsmPath;
use crate::path::Origin;

/// Version expressions the rewriter accepts as-is.
pub fn is_loose_version(version: &str) -> bool {
  lazy_regex::regex_is_match!(r"^[\w+\-.]+$", version)
}

/// A version that names exactly one release.
pub fn is_strict_semver(version: &str) -> bool {
  lazy_regex::regex_is_match!(
    r"^\d+\.\d+\.\d+(-[.\w+\-]+)?(\+[.\w\-]+)?$",
    version
  )
}

/// A git object-id prefix (HEAD refs are pinned to 16 digits).
pub fn is_commitish(version: &str) -> bool {
  version.len() >= 7
    && version.len() <= 40
    && version.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

/// Gets the corresponding `@types/*` package name
/// (`@scope/name` becomes `@types/scope__name`).
pub fn to_types_package_name(pkg_name: &str) -> String {
  match pkg_name.strip_prefix('@') {
    Some(scoped) => format!("@types/{}", scoped.replacen('/', "__", 1)),
    None => format!("@types/{pkg_name}"),
  }
}

/// Outcome of interpreting a dependency version expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepResolution {
  /// The expression mapped onto a concrete package coordinate (possibly
  /// with an empty version for a floating GitHub HEAD).
  Path(EsmPath),
  /// The expression is unsupported or malformed; the URL serves a
  /// runtime-visible error module.
  ErrorUrl(String),
}

pub fn error_url(kind: &str, name: &str, importer: &EsmPath) -> String {
  format!("/error.js?type={kind}&name={name}&importer={importer}")
}

/// Interprets a dependency's version expression, resolving the alternative
/// registry schemes npm supports in dependency tables.
/// follow https://docs.npmjs.com/cli/v10/configuring-npm/package-json#git-urls-as-dependencies
/// e.g. "@mark/html": "npm:@jsr/mark__html@^1.0.0"
/// e.g. "tslib": "git+https://github.com/microsoft/tslib.git#v2.3.0"
/// e.g. "react": "github:facebook/react#v18.2.0"
pub fn interpret_version_expression(
  dep: &EsmPath,
  expression: &str,
  importer: &EsmPath,
) -> DepResolution {
  let mut dep = dep.clone();

  if expression.starts_with("file:") {
    return DepResolution::ErrorUrl(error_url(
      "unsupported-file-dependency",
      &dep.pkg_name,
      importer,
    ));
  }

  if crate::path::is_http_specifier(expression) {
    let parsed = Url::parse(expression);
    let Ok(parsed) = parsed else {
      return DepResolution::ErrorUrl(error_url(
        "unsupported-http-dependency",
        &dep.pkg_name,
        importer,
      ));
    };
    if parsed.host_str() != Some("pkg.pr.new") {
      return DepResolution::ErrorUrl(error_url(
        "unsupported-http-dependency",
        &dep.pkg_name,
        importer,
      ));
    }
    // /<name>@<version>[/...]
    let path = parsed.path().trim_start_matches('/');
    let Some((name, rest)) = path.rsplit_once('@') else {
      return DepResolution::ErrorUrl(error_url(
        "invalid-http-dependency",
        path,
        importer,
      ));
    };
    let version = rest.split('/').next().unwrap_or_default();
    if name.is_empty() || version.is_empty() || !is_loose_version(version) {
      return DepResolution::ErrorUrl(error_url(
        "invalid-http-dependency",
        name,
        importer,
      ));
    }
    dep.pkg_name = name.to_string();
    dep.pkg_version = version.to_string();
    dep.origin = Origin::PkgPr;
    return DepResolution::Path(dep);
  }

  if let Some(embedded) = expression.strip_prefix("npm:") {
    let (name, version, _) = split_esm_path(embedded);
    dep.pkg_name = name;
    dep.pkg_version = version;
    return DepResolution::Path(dep);
  }

  if let Some(embedded) = expression.strip_prefix("jsr:") {
    let (name, version, _) = split_esm_path(embedded);
    if !name.starts_with('@') || !name.contains('/') {
      return DepResolution::ErrorUrl(error_url(
        "invalid-jsr-dependency",
        &name,
        importer,
      ));
    }
    let (scope, bare_name) = name.split_once('/').unwrap();
    dep.pkg_name = format!("@jsr/{}__{}", &scope[1..], bare_name);
    dep.pkg_version = version;
    return DepResolution::Path(dep);
  }

  if expression.starts_with("git+ssh://")
    || expression.starts_with("git+https://")
    || expression.starts_with("git://")
  {
    let parsed = Url::parse(expression);
    let Ok(parsed) = parsed else {
      return DepResolution::ErrorUrl(error_url(
        "unsupported-git-dependency",
        &dep.pkg_name,
        importer,
      ));
    };
    if parsed.host_str() != Some("github.com") {
      return DepResolution::ErrorUrl(error_url(
        "unsupported-git-dependency",
        &dep.pkg_name,
        importer,
      ));
    }
    let mut repo = parsed
      .path()
      .trim_start_matches('/')
      .trim_end_matches(".git")
      .to_string();
    if parsed.scheme() == "git+ssh" {
      if let Some(port) = parsed.port() {
        repo = format!("{port}/{repo}");
      }
    }
    dep.pkg_name = repo;
    dep.pkg_version = escaped_git_ref(parsed.fragment().unwrap_or(""));
    dep.origin = Origin::GitHub;
    return DepResolution::Path(dep);
  }

  if expression.starts_with("github:")
    || (!expression.starts_with('@') && expression.contains('/'))
  {
    let stripped = expression.strip_prefix("github:").unwrap_or(expression);
    let (repo, fragment) = match stripped.rsplit_once('#') {
      Some((repo, fragment)) => (repo, fragment),
      None => (stripped, ""),
    };
    dep.pkg_name = repo.to_string();
    dep.pkg_version = escaped_git_ref(fragment);
    dep.origin = Origin::GitHub;
    return DepResolution::Path(dep);
  }

  DepResolution::Path(dep)
}

// the characters `url.QueryEscape` style escaping leaves alone
const GIT_REF_ESCAPE: percent_encoding::AsciiSet = NON_ALPHANUMERIC
  .remove(b'-')
  .remove(b'_')
  .remove(b'.')
  .remove(b'~');

fn escaped_git_ref(fragment: &str) -> String {
  // a fragment of the form `semver:^x.y.z` pins by range, not by ref
  let fragment = fragment.strip_prefix("semver:").unwrap_or(fragment);
  utf8_percent_encode(fragment, &GIT_REF_ESCAPE).to_string()
}

/// Whether the coordinate names a single immutable artifact.
pub fn is_fixed_version(dep: &EsmPath) -> bool {
  match dep.origin {
    Origin::GitHub => {
      is_commitish(&dep.pkg_version)
        || is_strict_semver(dep.pkg_version.trim_start_matches('v'))
    }
    Origin::PkgPr => true,
    Origin::Registry => is_strict_semver(&dep.pkg_version),
  }
}
