// Copyright 2018-2025 the Deno authors. MIT license.

use serde_json::Map;
use serde_json::Value;

use crate::context::BuildContext;
use crate::entry::BuildEntry;
use crate::entry::EntryKind;
use crate::path::strip_module_ext;
use crate::path::EsmPath;
use crate::path::Target;

/// The module-type hint that decides which slot a condition without an
/// implied slot fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleType {
  Unspecified,
  CommonJs,
  Module,
  Types,
}

impl ModuleType {
  pub fn from_pkg_type(typ: &str) -> ModuleType {
    match typ {
      "module" => ModuleType::Module,
      "commonjs" => ModuleType::CommonJs,
      _ => ModuleType::Unspecified,
    }
  }

  pub fn entry_kind(&self) -> EntryKind {
    match self {
      ModuleType::Unspecified | ModuleType::CommonJs => EntryKind::Cjs,
      ModuleType::Module => EntryKind::Esm,
      ModuleType::Types => EntryKind::Dts,
    }
  }
}

impl BuildEntry {
  /// Assigns a condition value to `kind` unless that slot is already
  /// filled; a nested conditions object tries its `default` string first
  /// and then recurses so nested conditions can fill the other slots.
  /// Precedence is encoded purely by visit order; a filled slot is never
  /// overwritten.
  pub(crate) fn resolve_condition(
    &mut self,
    ctx: &BuildContext,
    module_type: ModuleType,
    condition: &Value,
    kind: EntryKind,
  ) {
    if self.has(kind) {
      return;
    }
    match condition {
      Value::String(s) => {
        self.update(kind, s.clone());
      }
      Value::Object(om) => {
        if let Some(Value::String(s)) = om.get("default") {
          if !s.is_empty() {
            self.update(kind, s.clone());
          }
        }
        let nested = resolve_condition_export_entry(ctx, om, module_type);
        if let Some(esm) = nested.esm {
          if !self.has(EntryKind::Esm) {
            self.update(EntryKind::Esm, esm);
          }
        }
        if let Some(cjs) = nested.cjs {
          if !self.has(EntryKind::Cjs) {
            self.update(EntryKind::Cjs, cjs);
          }
        }
        if let Some(dts) = nested.dts {
          if !self.has(EntryKind::Dts) {
            self.update(EntryKind::Dts, dts);
          }
        }
      }
      _ => {}
    }
  }
}

/// Reduces a conditions object to a three-slot entry under the active
/// conditions. Order of visit is the precedence order: user conditions
/// first, `development` when building dev, the runtime condition, then the
/// slot-implying conditions in source order.
pub fn resolve_condition_export_entry(
  ctx: &BuildContext,
  conditions: &Map<String, Value>,
  module_type: ModuleType,
) -> BuildEntry {
  let entry_kind = module_type.entry_kind();
  let mut entry = BuildEntry::default();

  for condition_name in &ctx.args.conditions {
    if let Some(condition) = conditions.get(condition_name) {
      entry.resolve_condition(ctx, module_type, condition, entry_kind);
    }
  }

  if ctx.dev {
    if let Some(condition) = conditions.get("development") {
      entry.resolve_condition(ctx, module_type, condition, entry_kind);
    }
  }

  if ctx.target.is_browser() {
    if let Some(condition) = conditions.get("browser") {
      entry.resolve_condition(ctx, module_type, condition, entry_kind);
    }
  } else if ctx.target.is_deno() {
    for condition_name in ["deno", "node"] {
      if let Some(condition) = conditions.get(condition_name) {
        entry.resolve_condition(ctx, module_type, condition, entry_kind);
        break;
      }
    }
  } else if ctx.target == Target::Node {
    if let Some(condition) = conditions.get("node") {
      entry.resolve_condition(ctx, module_type, condition, entry_kind);
    }
  }

  for (condition_name, condition) in conditions {
    match condition_name.as_str() {
      "module" | "import" | "es2015" => {
        entry.resolve_condition(
          ctx,
          ModuleType::Module,
          condition,
          EntryKind::Esm,
        );
      }
      "require" => {
        entry.resolve_condition(
          ctx,
          ModuleType::CommonJs,
          condition,
          EntryKind::Cjs,
        );
      }
      "types" | "typings" => {
        entry.resolve_condition(
          ctx,
          ModuleType::Types,
          condition,
          EntryKind::Dts,
        );
      }
      "default" => {
        entry.resolve_condition(ctx, module_type, condition, entry_kind);
      }
      _ => {}
    }
  }

  entry
}

/// Matches an exports key containing `*` against the requested
/// sub-module; returns the part of the name covered by the `*`.
pub fn match_asterisk_exports(
  exports_key: &str,
  path: &EsmPath,
) -> Option<String> {
  let pattern_index = exports_key.rfind('*')?;
  let prefix = &exports_key[..pattern_index];
  let sub_module = format!("./{}", path.sub_bare_name);
  sub_module.strip_prefix(prefix).map(str::to_string)
}

/// Clones a conditions object with every literal `*` replaced by the
/// matched diff, recursively.
pub fn resolve_asterisk_path_mapping(
  conditions: &Map<String, Value>,
  diff: &str,
) -> Map<String, Value> {
  let mut resolved = Map::new();
  for (key, value) in conditions {
    match value {
      Value::String(s) => {
        resolved.insert(key.clone(), Value::String(s.replace('*', diff)));
      }
      Value::Object(nested) => {
        resolved.insert(
          key.clone(),
          Value::Object(resolve_asterisk_path_mapping(nested, diff)),
        );
      }
      _ => {}
    }
  }
  resolved
}

/// An exact sub-path key match, with module extensions stripped.
pub(crate) fn matches_exact_export(key: &str, sub_module: &str) -> bool {
  let expected = format!("./{sub_module}");
  key == expected
    || strip_module_ext(key, &[".js", ".cjs", ".mjs"]) == expected
}
