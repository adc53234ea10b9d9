// Copyright 2018-2025 the Deno authors. MIT license.

use std::fmt;

/// Extensions that identify an importable module file. Stripping one of
/// these from a sub-path yields the sub-module's bare name.
pub static MODULE_EXTS: &[&str] =
  &[".mjs", ".js", ".jsx", ".mts", ".ts", ".tsx", ".cjs"];

/// Where a package comes from. GitHub and pkg.pr.new artifacts get a
/// marker segment (`gh/`, `pr/`) in every URL they appear in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Origin {
  #[default]
  Registry,
  GitHub,
  PkgPr,
}

impl Origin {
  pub fn url_prefix(&self) -> &'static str {
    match self {
      Origin::Registry => "",
      Origin::GitHub => "gh/",
      Origin::PkgPr => "pr/",
    }
  }
}

/// A fully-qualified module reference: package name, version, optional
/// sub-path and origin. This is the unit the whole resolver operates on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct EsmPath {
  pub pkg_name: String,
  pub pkg_version: String,
  pub sub_path: String,
  /// `sub_path` with any known module extension stripped; names an
  /// importable sub-module regardless of which file realizes it.
  pub sub_bare_name: String,
  pub origin: Origin,
}

impl EsmPath {
  /// The origin-prefixed `name@version` part, e.g. `gh/owner/repo@1.0.0`.
  pub fn package_name(&self) -> String {
    format!(
      "{}{}@{}",
      self.origin.url_prefix(),
      self.pkg_name,
      self.pkg_version
    )
  }

  /// The full specifier including the sub-path.
  pub fn specifier(&self) -> String {
    if self.sub_path.is_empty() {
      self.package_name()
    } else {
      format!("{}/{}", self.package_name(), self.sub_path)
    }
  }

  /// Parses the output of [`EsmPath::specifier`] back into a path.
  pub fn parse(specifier: &str) -> Option<EsmPath> {
    let s = specifier.trim_start_matches('/');
    let (origin, rest) = if let Some(r) = s.strip_prefix("gh/") {
      (Origin::GitHub, r)
    } else if let Some(r) = s.strip_prefix("pr/") {
      (Origin::PkgPr, r)
    } else {
      (Origin::Registry, s)
    };

    let (pkg_name, after) = match origin {
      // GitHub names are `owner/repo`, so the version separator is the
      // first `@` after the slash.
      Origin::GitHub => {
        let (owner, tail) = rest.split_once('/')?;
        let at = tail.find('@')?;
        (format!("{}/{}", owner, &tail[..at]), &tail[at + 1..])
      }
      _ => {
        let search_from = if rest.starts_with('@') { 1 } else { 0 };
        let at = rest[search_from..].find('@')? + search_from;
        (rest[..at].to_string(), &rest[at + 1..])
      }
    };

    let (pkg_version, sub_path) = match after.split_once('/') {
      Some((v, sub)) => (v.to_string(), sub.to_string()),
      None => (after.to_string(), String::new()),
    };
    if pkg_name.is_empty() || pkg_version.is_empty() {
      return None;
    }
    let sub_bare_name = to_module_bare_name(&sub_path, true);
    Some(EsmPath {
      pkg_name,
      pkg_version,
      sub_path,
      sub_bare_name,
      origin,
    })
  }
}

impl fmt::Display for EsmPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.specifier())
  }
}

/// Target runtime of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
  Deno,
  DenoNext,
  Node,
  Es2015,
  Es2016,
  Es2017,
  Es2018,
  Es2019,
  Es2020,
  Es2021,
  Es2022,
  Es2023,
  Es2024,
  EsNext,
  Types,
}

impl Target {
  pub fn as_str(&self) -> &'static str {
    match self {
      Target::Deno => "deno",
      Target::DenoNext => "denonext",
      Target::Node => "node",
      Target::Es2015 => "es2015",
      Target::Es2016 => "es2016",
      Target::Es2017 => "es2017",
      Target::Es2018 => "es2018",
      Target::Es2019 => "es2019",
      Target::Es2020 => "es2020",
      Target::Es2021 => "es2021",
      Target::Es2022 => "es2022",
      Target::Es2023 => "es2023",
      Target::Es2024 => "es2024",
      Target::EsNext => "esnext",
      Target::Types => "types",
    }
  }

  pub fn from_str(s: &str) -> Option<Target> {
    Some(match s {
      "deno" => Target::Deno,
      "denonext" => Target::DenoNext,
      "node" => Target::Node,
      "es2015" => Target::Es2015,
      "es2016" => Target::Es2016,
      "es2017" => Target::Es2017,
      "es2018" => Target::Es2018,
      "es2019" => Target::Es2019,
      "es2020" => Target::Es2020,
      "es2021" => Target::Es2021,
      "es2022" => Target::Es2022,
      "es2023" => Target::Es2023,
      "es2024" => Target::Es2024,
      "esnext" => Target::EsNext,
      "types" => Target::Types,
      _ => return None,
    })
  }

  pub fn is_browser(&self) -> bool {
    self.as_str().starts_with("es")
  }

  pub fn is_deno(&self) -> bool {
    matches!(self, Target::Deno | Target::DenoNext)
  }
}

impl fmt::Display for Target {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// How much of the module graph one artifact carries. Opaque to the
/// resolver except for the canonical URL filename.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum BundleMode {
  #[default]
  Default,
  BundleAll,
  BundleFalse,
}

/// Strips the first matching extension from `s`.
pub fn strip_module_ext<'a>(s: &'a str, exts: &[&str]) -> &'a str {
  for ext in exts {
    if let Some(stripped) = s.strip_suffix(ext) {
      return stripped;
    }
  }
  s
}

/// Converts a sub-path into a sub-module bare name by stripping any known
/// module extension and, optionally, a trailing `/index`.
pub fn to_module_bare_name(sub_path: &str, strip_index: bool) -> String {
  if sub_path.is_empty() {
    return String::new();
  }
  let mut bare = strip_module_ext(sub_path, MODULE_EXTS);
  if strip_index {
    bare = bare.strip_suffix("/index").unwrap_or(bare);
  }
  bare.to_string()
}

/// Splits `name[@version][/sub]` (scoped names included) the way the CDN
/// splits request paths and import specifiers. GitHub repo paths are not
/// handled here; they come in through the dependency normalizer.
pub fn split_esm_path(specifier: &str) -> (String, String, String) {
  let mut parts = specifier.trim_start_matches('/').splitn(3, '/');
  let first = parts.next().unwrap_or_default();
  let (name_and_version, sub_path) = if first.starts_with('@') {
    let second = parts.next().unwrap_or_default();
    (
      format!("{first}/{second}"),
      parts.next().unwrap_or_default().to_string(),
    )
  } else {
    let rest: Vec<&str> = parts.collect();
    (first.to_string(), rest.join("/"))
  };
  match name_and_version.get(1..).and_then(|s| s.find('@')) {
    Some(i) => (
      name_and_version[..i + 1].to_string(),
      name_and_version[i + 2..].to_string(),
      sub_path,
    ),
    None => (name_and_version, String::new(), sub_path),
  }
}

/// Extracts the leading package name of a specifier
/// (`@scope/name/x` -> `@scope/name`, `a/b` -> `a`).
pub fn to_package_name(specifier: &str) -> &str {
  let mut slashes = specifier.match_indices('/');
  let boundary = if specifier.starts_with('@') {
    slashes.nth(1)
  } else {
    slashes.next()
  };
  match boundary {
    Some((i, _)) => &specifier[..i],
    None => specifier,
  }
}

pub fn is_rel_path_specifier(specifier: &str) -> bool {
  specifier.starts_with("./") || specifier.starts_with("../")
}

pub fn is_http_specifier(specifier: &str) -> bool {
  specifier.starts_with("http://") || specifier.starts_with("https://")
}

/// Rewrites an entry to the `./`-rooted form used throughout the resolver.
pub fn normalize_entry_path(path: &str) -> String {
  format!(".{}", clean_path(&format!("/{}", path)))
}

/// Lexical path cleaning with the semantics of Go's `path.Clean`, which
/// the canonical URL builder relies on. Operates on `/`-separated strings,
/// never on OS paths.
pub fn clean_path(path: &str) -> String {
  let rooted = path.starts_with('/');
  let mut out: Vec<&str> = Vec::new();
  for seg in path.split('/') {
    match seg {
      "" | "." => {}
      ".." => {
        if out.last().is_some_and(|s| *s != "..") {
          out.pop();
        } else if !rooted {
          out.push("..");
        }
      }
      _ => out.push(seg),
    }
  }
  let joined = out.join("/");
  if rooted {
    format!("/{joined}")
  } else if joined.is_empty() {
    ".".to_string()
  } else {
    joined
  }
}

/// `path.Join`: joins non-empty parts and cleans the result.
pub fn join_paths(parts: &[&str]) -> String {
  let non_empty: Vec<&str> =
    parts.iter().copied().filter(|p| !p.is_empty()).collect();
  if non_empty.is_empty() {
    return String::new();
  }
  clean_path(&non_empty.join("/"))
}

/// `path.Dir`: everything before the final slash, cleaned.
pub fn dir_of(path: &str) -> String {
  match path.rfind('/') {
    Some(i) => {
      let head = &path[..i];
      if head.is_empty() {
        "/".to_string()
      } else {
        clean_path(head)
      }
    }
    None => ".".to_string(),
  }
}

/// `path.Base`: the last path element.
pub fn base_of(path: &str) -> &str {
  match path.rfind('/') {
    Some(i) => &path[i + 1..],
    None => path,
  }
}

/// Relative path from `base` to `target`, `./`-prefixed unless it walks up.
pub fn rel_path(base: &str, target: &str) -> String {
  let base = clean_path(base);
  let target = clean_path(target);
  let base_segs: Vec<&str> = base
    .split('/')
    .filter(|s| !s.is_empty() && *s != ".")
    .collect();
  let target_segs: Vec<&str> = target
    .split('/')
    .filter(|s| !s.is_empty() && *s != ".")
    .collect();
  let mut common = 0;
  while common < base_segs.len()
    && common < target_segs.len()
    && base_segs[common] == target_segs[common]
  {
    common += 1;
  }
  let mut parts: Vec<&str> = vec![".."; base_segs.len() - common];
  parts.extend(&target_segs[common..]);
  let joined = parts.join("/");
  if joined.starts_with("..") {
    joined
  } else {
    format!("./{joined}")
  }
}

/// The ModulePath half of canonical-URL parsing: reconstructs the
/// [`EsmPath`] (plus target, dev flag and bundle mode) that produced a
/// module or type artifact URL. Bundle-mode and dev suffixes are
/// recovered from the filename; the sub-path comes back in bare form
/// because the filename carries no extension information.
pub fn parse_canonical_url(
  url: &str,
) -> Option<(EsmPath, Option<Target>, bool, BundleMode)> {
  let s = url.trim_start_matches('/');
  let (origin, rest) = if let Some(r) = s.strip_prefix("gh/") {
    (Origin::GitHub, r)
  } else if let Some(r) = s.strip_prefix("pr/") {
    (Origin::PkgPr, r)
  } else {
    (Origin::Registry, s)
  };

  let (pkg_name, after) = match origin {
    Origin::GitHub => {
      let (owner, tail) = rest.split_once('/')?;
      let at = tail.find('@')?;
      (format!("{}/{}", owner, &tail[..at]), &tail[at + 1..])
    }
    _ => {
      let search_from = if rest.starts_with('@') { 1 } else { 0 };
      let at = rest[search_from..].find('@')? + search_from;
      (rest[..at].to_string(), &rest[at + 1..])
    }
  };
  let (pkg_version, mut rest) = match after.split_once('/') {
    Some((v, r)) => (v.to_string(), r),
    None => (after.to_string(), ""),
  };
  if pkg_name.is_empty() || pkg_version.is_empty() {
    return None;
  }

  // skip a build-args segment
  if rest.starts_with("X-") {
    rest = rest.split_once('/').map(|(_, r)| r).unwrap_or("");
  }

  let make = |sub_path: String, origin| {
    let sub_bare_name = to_module_bare_name(&sub_path, true);
    EsmPath {
      pkg_name: pkg_name.clone(),
      pkg_version: pkg_version.clone(),
      sub_path,
      sub_bare_name,
      origin,
    }
  };

  if let Some((seg, filename)) = rest.split_once('/') {
    if let Some(target) = Target::from_str(seg) {
      let mut name = filename.strip_suffix(".mjs")?;
      let mut bundle_mode = BundleMode::Default;
      if let Some(n) = name.strip_suffix(".bundle") {
        name = n;
        bundle_mode = BundleMode::BundleAll;
      } else if let Some(n) = name.strip_suffix(".nobundle") {
        name = n;
        bundle_mode = BundleMode::BundleFalse;
      }
      let mut dev = false;
      if let Some(n) = name.strip_suffix(".development") {
        name = n;
        dev = true;
      }
      let name = name.replace("/%23/", "/#/");
      let base = strip_module_ext(base_of(&pkg_name), &[".js"]);
      let sub_path = if let Some(sub) = name.strip_prefix("__") {
        sub.to_string()
      } else if name == base {
        String::new()
      } else {
        name.to_string()
      };
      return Some((make(sub_path, origin), Some(target), dev, bundle_mode));
    }
  }
  // a type artifact URL: the remainder is the sub-path itself
  Some((
    make(rest.to_string(), origin),
    None,
    false,
    BundleMode::Default,
  ))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_specifier_round_trip() {
    let cases = [
      "left-pad@1.3.0",
      "@scope/name@1.0.0/sub/mod",
      "gh/facebook/react@v18.2.0",
      "gh/facebook/react@v18.2.0/jsx-runtime",
      "pr/styled-components@6.1.19",
    ];
    for case in cases {
      let parsed = EsmPath::parse(case).unwrap();
      assert_eq!(parsed.specifier(), case);
    }
  }

  #[test]
  fn test_parse_origin() {
    let p = EsmPath::parse("gh/owner/repo@abcdef1234567890/lib/x.js").unwrap();
    assert_eq!(p.origin, Origin::GitHub);
    assert_eq!(p.pkg_name, "owner/repo");
    assert_eq!(p.pkg_version, "abcdef1234567890");
    assert_eq!(p.sub_path, "lib/x.js");
    assert_eq!(p.sub_bare_name, "lib/x");
  }

  #[test]
  fn test_split_esm_path() {
    assert_eq!(
      split_esm_path("react@18.2.0/jsx-runtime"),
      ("react".into(), "18.2.0".into(), "jsx-runtime".into())
    );
    assert_eq!(
      split_esm_path("@vue/shared@^3.0.0"),
      ("@vue/shared".into(), "^3.0.0".into(), "".into())
    );
    assert_eq!(
      split_esm_path("@astrojs/prism/dist/highlighter"),
      ("@astrojs/prism".into(), "".into(), "dist/highlighter".into())
    );
    assert_eq!(
      split_esm_path("fetch-blob"),
      ("fetch-blob".into(), "".into(), "".into())
    );
  }

  #[test]
  fn test_to_package_name() {
    assert_eq!(to_package_name("@vue/shared/x"), "@vue/shared");
    assert_eq!(to_package_name("lodash/get"), "lodash");
    assert_eq!(to_package_name("lodash"), "lodash");
  }

  #[test]
  fn test_to_module_bare_name() {
    assert_eq!(to_module_bare_name("lib/x.js", true), "lib/x");
    assert_eq!(to_module_bare_name("lib/index.mjs", true), "lib");
    assert_eq!(to_module_bare_name("lib/index.mjs", false), "lib/index");
    assert_eq!(to_module_bare_name("", true), "");
  }

  #[test]
  fn test_path_helpers() {
    assert_eq!(clean_path("/a/b/../c//d/."), "/a/c/d");
    assert_eq!(clean_path("./foo"), "foo");
    assert_eq!(join_paths(&["types", "/a/b", "c.d.ts"]), "types/a/b/c.d.ts");
    assert_eq!(dir_of("./foo/bar.d.ts"), "foo");
    assert_eq!(dir_of("index.d.ts"), ".");
    assert_eq!(base_of("a/b/c.js"), "c.js");
    assert_eq!(rel_path("/p@1/es2022", "/p@1/es2022/x.mjs"), "./x.mjs");
    assert_eq!(rel_path("/p@1/es2022/a", "/p@1/b.mjs"), "../../b.mjs");
  }

  #[test]
  fn test_parse_canonical_url() {
    let (p, target, dev, mode) =
      parse_canonical_url("/left-pad@1.3.0/es2022/left-pad.mjs").unwrap();
    assert_eq!(p.pkg_name, "left-pad");
    assert_eq!(p.pkg_version, "1.3.0");
    assert_eq!(p.sub_path, "");
    assert_eq!(target, Some(Target::Es2022));
    assert!(!dev);
    assert_eq!(mode, BundleMode::Default);

    let (p, target, dev, mode) =
      parse_canonical_url("/bar@2.0.0/X-ZS9yZWFjdA/es2022/x.development.nobundle.mjs")
        .unwrap();
    assert_eq!(p.sub_path, "x");
    assert_eq!(target, Some(Target::Es2022));
    assert!(dev);
    assert_eq!(mode, BundleMode::BundleFalse);

    let (p, target, _, _) =
      parse_canonical_url("/foo@1.0.0/sub/index.d.ts").unwrap();
    assert_eq!(p.sub_path, "sub/index.d.ts");
    assert_eq!(target, None);

    // the self-named sub-module disambiguation reverses
    let (p, _, _, _) =
      parse_canonical_url("/foo@1.0.0/es2022/__foo.mjs").unwrap();
    assert_eq!(p.sub_path, "foo");
  }
}
