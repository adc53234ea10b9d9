// Copyright 2018-2025 the Deno authors. MIT license.

use std::collections::BTreeSet;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use indexmap::IndexMap;

use crate::path::EsmPath;

/// Build options that participate in the cache key. `conditions` keeps the
/// caller's order because user-specified conditions take precedence over
/// built-ins in that order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildArgs {
  pub alias: IndexMap<String, String>,
  pub deps: IndexMap<String, String>,
  pub external: BTreeSet<String>,
  pub conditions: Vec<String>,
  pub exports: BTreeSet<String>,
  pub external_all: bool,
}

impl BuildArgs {
  pub fn is_empty(&self, for_types: bool) -> bool {
    self.alias.is_empty()
      && self.deps.is_empty()
      && self.external.is_empty()
      && self.conditions.is_empty()
      && (for_types || (self.exports.is_empty() && !self.external_all))
  }
}

/// Encodes build args into the stable URL-prefix payload. Alias, deps and
/// external entries are sorted so identical argument sets produce
/// identical prefixes; a dts prefix omits `exports`/`externalAll`, which
/// do not affect type artifacts.
pub fn encode_build_args(args: &BuildArgs, for_types: bool) -> String {
  let mut lines: Vec<String> = Vec::new();
  if !args.alias.is_empty() {
    let mut alias: Vec<String> = args
      .alias
      .iter()
      .map(|(k, v)| format!("{k}:{v}"))
      .collect();
    alias.sort();
    lines.push(format!("a{}", alias.join(",")));
  }
  if !args.deps.is_empty() {
    let mut deps: Vec<String> =
      args.deps.iter().map(|(n, v)| format!("{n}@{v}")).collect();
    deps.sort();
    lines.push(format!("d{}", deps.join(",")));
  }
  if !args.external.is_empty() {
    let external: Vec<&str> =
      args.external.iter().map(String::as_str).collect();
    lines.push(format!("e{}", external.join(",")));
  }
  if !args.conditions.is_empty() {
    lines.push(format!("c{}", args.conditions.join(",")));
  }
  if !for_types {
    if args.external_all {
      lines.push("*".to_string());
    }
    if !args.exports.is_empty() {
      let exports: Vec<&str> =
        args.exports.iter().map(String::as_str).collect();
      lines.push(format!("s{}", exports.join(",")));
    }
  }
  if lines.is_empty() {
    return String::new();
  }
  URL_SAFE_NO_PAD.encode(lines.join("\n"))
}

/// Decodes a prefix payload produced by [`encode_build_args`].
pub fn decode_build_args(encoded: &str) -> Option<BuildArgs> {
  let bytes = URL_SAFE_NO_PAD.decode(encoded).ok()?;
  let text = String::from_utf8(bytes).ok()?;
  let mut args = BuildArgs::default();
  for line in text.split('\n') {
    if line.is_empty() {
      continue;
    }
    if line == "*" {
      args.external_all = true;
      continue;
    }
    let (tag, rest) = line.split_at(1);
    match tag {
      "a" => {
        for pair in rest.split(',') {
          let (k, v) = pair.split_once(':')?;
          args.alias.insert(k.to_string(), v.to_string());
        }
      }
      "d" => {
        for dep in rest.split(',') {
          let at = dep[1..].find('@')? + 1;
          args
            .deps
            .insert(dep[..at].to_string(), dep[at + 1..].to_string());
        }
      }
      "e" => {
        args.external.extend(rest.split(',').map(String::from));
      }
      "c" => {
        args.conditions.extend(rest.split(',').map(String::from));
      }
      "s" => {
        args.exports.extend(rest.split(',').map(String::from));
      }
      _ => return None,
    }
  }
  Some(args)
}

/// Prunes args that no longer apply once a dependency has its own URL:
/// alias/deps entries naming the dependency itself are consumed by version
/// selection, and requested exports never propagate to dependencies.
pub fn normalize_build_args(args: &mut BuildArgs, path: &EsmPath) {
  args.alias.shift_remove(&path.pkg_name);
  args.deps.shift_remove(&path.pkg_name);
  args.exports.clear();
  args.external_all = false;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_encode_decode_round_trip() {
    let mut args = BuildArgs::default();
    args.alias.insert("react".into(), "preact/compat".into());
    args.deps.insert("preact".into(), "10.0.0".into());
    args.deps.insert("@scope/x".into(), "^2.1.0".into());
    args.external.insert("lodash".into());
    args.conditions.push("worker".into());
    args.conditions.push("edge".into());
    let encoded = encode_build_args(&args, false);
    assert!(!encoded.is_empty());
    assert_eq!(decode_build_args(&encoded).unwrap(), args);
  }

  #[test]
  fn test_encode_is_order_independent() {
    let mut a = BuildArgs::default();
    a.deps.insert("a".into(), "1.0.0".into());
    a.deps.insert("b".into(), "2.0.0".into());
    let mut b = BuildArgs::default();
    b.deps.insert("b".into(), "2.0.0".into());
    b.deps.insert("a".into(), "1.0.0".into());
    assert_eq!(
      encode_build_args(&a, false),
      encode_build_args(&b, false)
    );
  }

  #[test]
  fn test_empty_args_encode_empty() {
    assert_eq!(encode_build_args(&BuildArgs::default(), false), "");
    let mut args = BuildArgs::default();
    args.external_all = true;
    // externalAll does not affect type artifacts
    assert_eq!(encode_build_args(&args, true), "");
    assert_ne!(encode_build_args(&args, false), "");
  }

  #[test]
  fn test_normalize_drops_self_references() {
    let mut args = BuildArgs::default();
    args.alias.insert("foo".into(), "bar".into());
    args.deps.insert("foo".into(), "1.0.0".into());
    args.deps.insert("baz".into(), "2.0.0".into());
    args.exports.insert("default".into());
    let path = EsmPath {
      pkg_name: "foo".into(),
      pkg_version: "1.0.0".into(),
      ..Default::default()
    };
    normalize_build_args(&mut args, &path);
    assert!(args.alias.is_empty());
    assert_eq!(args.deps.len(), 1);
    assert!(args.exports.is_empty());
  }
}
