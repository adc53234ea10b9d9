// Copyright 2018-2025 the Deno authors. MIT license.

use indexmap::IndexMap;
use serde_json::Map;
use serde_json::Value;

/// The slice of a `package.json` the resolver reads. Parsed tolerantly:
/// fields of the wrong JSON type are treated as absent, the way npm
/// clients behave on the registry's long tail.
///
/// `exports` and `typesVersions` stay as raw JSON values because their key
/// order is semantically significant (`serde_json` is built with
/// `preserve_order`, so `Map` keeps insertion order).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageJson {
  pub name: String,
  /// The manifest's own name when it differs from the requested one
  /// (GitHub/pkg.pr.new packages are addressed by repo path).
  pub pkg_name: String,
  pub version: String,
  pub typ: String,
  pub main: Option<String>,
  pub module: Option<String>,
  pub es2015: Option<String>,
  pub jsnext_main: Option<String>,
  pub types: Option<String>,
  pub typings: Option<String>,
  pub browser: IndexMap<String, String>,
  pub exports: Option<Value>,
  pub types_versions: Option<Map<String, Value>>,
  pub dependencies: IndexMap<String, String>,
  pub peer_dependencies: IndexMap<String, String>,
}

impl PackageJson {
  pub fn from_value(value: Value) -> PackageJson {
    let Value::Object(map) = value else {
      return PackageJson::default();
    };

    fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
      match map.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
      }
    }

    fn string_map(map: &Map<String, Value>, key: &str) -> IndexMap<String, String> {
      let mut out = IndexMap::new();
      if let Some(Value::Object(obj)) = map.get(key) {
        for (k, v) in obj {
          if let Value::String(s) = v {
            out.insert(k.clone(), s.clone());
          }
        }
      }
      out
    }

    // a string `browser` field is shorthand for replacing the main entry
    let browser = match map.get("browser") {
      Some(Value::String(s)) if !s.is_empty() => {
        IndexMap::from([(".".to_string(), s.clone())])
      }
      Some(Value::Object(obj)) => {
        let mut out = IndexMap::new();
        for (k, v) in obj {
          if let Value::String(s) = v {
            out.insert(k.clone(), s.clone());
          }
        }
        out
      }
      _ => IndexMap::new(),
    };

    let exports = map.get("exports").and_then(|v| match v {
      Value::String(_) | Value::Object(_) => Some(v.clone()),
      _ => None,
    });

    let types_versions = match map.get("typesVersions") {
      Some(Value::Object(obj)) => Some(obj.clone()),
      _ => None,
    };

    let name = string_field(&map, "name").unwrap_or_default();
    PackageJson {
      pkg_name: name.clone(),
      name,
      version: string_field(&map, "version").unwrap_or_default(),
      typ: string_field(&map, "type").unwrap_or_default(),
      main: string_field(&map, "main"),
      module: string_field(&map, "module"),
      es2015: string_field(&map, "es2015"),
      jsnext_main: string_field(&map, "jsnext:main"),
      types: string_field(&map, "types"),
      typings: string_field(&map, "typings"),
      browser,
      exports,
      types_versions,
      dependencies: string_map(&map, "dependencies"),
      peer_dependencies: string_map(&map, "peerDependencies"),
    }
  }

  pub fn parse(source: &str) -> serde_json::Result<PackageJson> {
    Ok(PackageJson::from_value(serde_json::from_str(source)?))
  }

  /// `types` falling back to `typings`.
  pub fn types_field(&self) -> Option<&str> {
    self
      .types
      .as_deref()
      .or(self.typings.as_deref())
      .filter(|s| !s.is_empty())
  }
}

/// Collects every string leaf reachable in an exports conditions object,
/// in source order. Used to detect sub-paths that denote the main entry.
pub fn get_all_exports_paths(conditions: &Map<String, Value>) -> Vec<String> {
  let mut values = Vec::new();
  for value in conditions.values() {
    match value {
      Value::String(s) => values.push(s.clone()),
      Value::Object(nested) => {
        values.extend(get_all_exports_paths(nested));
      }
      _ => {}
    }
  }
  values
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn test_from_value() {
    let pkg = PackageJson::from_value(json!({
      "name": "foo",
      "version": "1.0.0",
      "type": "module",
      "main": "./index.js",
      "module": "./esm/index.js",
      "types": "./index.d.ts",
      "jsnext:main": "./next/index.js",
      "browser": { "./server.js": "./client.js" },
      "dependencies": { "bar": "^1.0.0" },
      "peerDependencies": { "react": ">=17" },
      "exports": { ".": { "import": "./esm/index.js" } }
    }));
    assert_eq!(pkg.name, "foo");
    assert_eq!(pkg.typ, "module");
    assert_eq!(pkg.module.as_deref(), Some("./esm/index.js"));
    assert_eq!(pkg.jsnext_main.as_deref(), Some("./next/index.js"));
    assert_eq!(pkg.browser.get("./server.js").unwrap(), "./client.js");
    assert_eq!(pkg.dependencies.get("bar").unwrap(), "^1.0.0");
    assert!(pkg.exports.is_some());
  }

  #[test]
  fn test_tolerates_malformed_fields() {
    let pkg = PackageJson::from_value(json!({
      "name": "weird",
      "main": { "not": "a string" },
      "browser": false,
      "exports": 42,
      "dependencies": ["not", "a", "map"]
    }));
    assert_eq!(pkg.name, "weird");
    assert!(pkg.main.is_none());
    assert!(pkg.browser.is_empty());
    assert!(pkg.exports.is_none());
    assert!(pkg.dependencies.is_empty());
  }

  #[test]
  fn test_string_browser_field() {
    let pkg = PackageJson::from_value(json!({
      "name": "b",
      "browser": "./browser.js"
    }));
    assert_eq!(pkg.browser.get(".").unwrap(), "./browser.js");
  }

  #[test]
  fn test_get_all_exports_paths() {
    let Value::Object(conditions) = json!({
      "node": { "require": "./cjs/index.js", "import": "./esm/index.js" },
      "default": "./index.js"
    }) else {
      unreachable!()
    };
    assert_eq!(
      get_all_exports_paths(&conditions),
      vec!["./cjs/index.js", "./esm/index.js", "./index.js"]
    );
  }
}
