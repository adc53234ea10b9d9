// Copyright 2018-2025 the Deno authors. MIT license.

use serde_json::Value;

use crate::context::BuildContext;
use crate::env::CjsLexerResult;
use crate::errors::LexerError;
use crate::errors::ResolveError;
use crate::exports::match_asterisk_exports;
use crate::exports::matches_exact_export;
use crate::exports::resolve_asterisk_path_mapping;
use crate::exports::resolve_condition_export_entry;
use crate::exports::ModuleType;
use crate::path::is_rel_path_specifier;
use crate::path::join_paths;
use crate::path::normalize_entry_path;
use crate::path::strip_module_ext;
use crate::path::EsmPath;
use crate::path::MODULE_EXTS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
  Esm,
  Cjs,
  Dts,
}

/// The chosen entrypoints of a package or sub-module. Every filled slot
/// names a file that exists inside the extracted package, rooted at the
/// package directory and beginning `./` after normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildEntry {
  pub esm: Option<String>,
  pub cjs: Option<String>,
  pub dts: Option<String>,
}

impl BuildEntry {
  pub fn is_empty(&self) -> bool {
    self.esm.is_none() && self.cjs.is_none() && self.dts.is_none()
  }

  pub fn has(&self, kind: EntryKind) -> bool {
    self.get(kind).is_some()
  }

  pub fn get(&self, kind: EntryKind) -> Option<&str> {
    match kind {
      EntryKind::Esm => self.esm.as_deref(),
      EntryKind::Cjs => self.cjs.as_deref(),
      EntryKind::Dts => self.dts.as_deref(),
    }
  }

  pub fn update(&mut self, kind: EntryKind, path: String) {
    match kind {
      EntryKind::Esm => self.esm = Some(path),
      EntryKind::Cjs => self.cjs = Some(path),
      EntryKind::Dts => self.dts = Some(path),
    }
  }
}

/// What the lexers learned about a chosen entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleMeta {
  pub has_default_export: bool,
  pub named_exports: Vec<String>,
  pub from_cjs: bool,
}

impl BuildContext {
  /// Produces the {esm, cjs, dts} triple for the requested package or
  /// sub-module by layering exports evaluation, nested package.json
  /// discovery, conventional filename probing, `typesVersions` remapping
  /// and `browser` field substitution.
  pub fn resolve_entry(&self, esm_path: &EsmPath) -> BuildEntry {
    let mut entry = BuildEntry::default();

    if !esm_path.sub_bare_name.is_empty() {
      if ends_with_any(&esm_path.sub_path, &[".d.ts", ".d.mts", ".d.cts"]) {
        entry.dts = Some(normalize_entry_path(&esm_path.sub_path));
        return entry;
      }

      // the backend transforms these source files directly
      if ends_with_any(
        &esm_path.sub_path,
        &[".jsx", ".ts", ".tsx", ".mts", ".svelte", ".vue"],
      ) {
        entry.esm = Some(normalize_entry_path(&esm_path.sub_path));
        return entry;
      }

      let sub_module = esm_path.sub_bare_name.clone();
      let module_type = ModuleType::from_pkg_type(&self.package_json.typ);

      // resolve the sub-module against `exports` conditions
      // see https://nodejs.org/api/packages.html#package-entry-points
      if let Some(Value::Object(exports)) = &self.package_json.exports {
        let mut export_entry = BuildEntry::default();
        for (name, conditions) in exports {
          if matches_exact_export(name, &sub_module) {
            match conditions {
              Value::String(s) => {
                // exports: {
                // "./lib/foo": "./lib/foo.js"
                // }
                if module_type == ModuleType::Module {
                  export_entry.esm = Some(s.clone());
                } else {
                  export_entry.cjs = Some(s.clone());
                }
              }
              Value::Object(conditions) => {
                // exports: {
                // "./lib/foo": {
                // "require": "./lib/foo.js",
                // "import": "./esm/foo.js",
                // "types": "./types/foo.d.ts"
                // }
                // }
                export_entry = resolve_condition_export_entry(
                  self,
                  conditions,
                  module_type,
                );
              }
              _ => {}
            }
            break;
          } else if let Some(diff) = match_asterisk_exports(name, esm_path) {
            match conditions {
              Value::String(s) => {
                // exports: {
                // "./lib/foo/*": "./lib/foo/*.js",
                // }
                let resolved = s.replace('*', &diff);
                if module_type == ModuleType::Module {
                  export_entry.esm = Some(resolved);
                } else {
                  export_entry.cjs = Some(resolved);
                }
              }
              Value::Object(conditions) => {
                // exports: {
                // "./lib/foo/*": {
                // "require": "./lib/foo/*.js",
                // "import": "./esm/lib/foo/*.js",
                // "types": "./types/foo/*.d.ts"
                // },
                // }
                let resolved =
                  resolve_asterisk_path_mapping(conditions, &diff);
                export_entry = resolve_condition_export_entry(
                  self,
                  &resolved,
                  module_type,
                );
              }
              _ => {}
            }
          }
        }
        self.normalize_build_entry(&mut export_entry);
        self.merge_existing(&mut entry, export_entry);
      }

      // a nested package.json names the sub-module's own entrypoints
      if let Some(nested) = self
        .env
        .read_json(&self.pkg_dir.join(&sub_module).join("package.json"))
      {
        if entry.esm.is_none() {
          if let Some(module) = &nested.module {
            entry.esm =
              Some(format!("./{}", join_paths(&[&sub_module, module])));
          }
        }
        if entry.cjs.is_none() {
          if let Some(main) = &nested.main {
            entry.cjs =
              Some(format!("./{}", join_paths(&[&sub_module, main])));
          }
        }
        if entry.dts.is_none() {
          if let Some(types) = nested.types_field() {
            entry.dts =
              Some(format!("./{}", join_paths(&[&sub_module, types])));
          }
        }
      }

      if entry.esm.is_none() {
        if self.exists_pkg_file(&format!("{sub_module}.mjs")) {
          entry.esm = Some(format!("./{sub_module}.mjs"));
        } else if self.exists_pkg_file(&format!("{sub_module}/index.mjs")) {
          entry.esm = Some(format!("./{sub_module}/index.mjs"));
        } else if self.package_json.typ == "module" {
          if self.exists_pkg_file(&format!("{sub_module}.js")) {
            entry.esm = Some(format!("./{sub_module}.js"));
          } else if self.exists_pkg_file(&format!("{sub_module}/index.js")) {
            entry.esm = Some(format!("./{sub_module}/index.js"));
          }
        }
      }

      if entry.cjs.is_none() {
        if self.exists_pkg_file(&format!("{sub_module}.cjs")) {
          entry.cjs = Some(format!("./{sub_module}.cjs"));
        } else if self.exists_pkg_file(&format!("{sub_module}/index.cjs")) {
          entry.cjs = Some(format!("./{sub_module}/index.cjs"));
        } else if self.package_json.typ != "module" {
          if self.exists_pkg_file(&format!("{sub_module}.js")) {
            entry.cjs = Some(format!("./{sub_module}.js"));
          } else if self.exists_pkg_file(&format!("{sub_module}/index.js")) {
            entry.cjs = Some(format!("./{sub_module}/index.js"));
          }
        }
      }

      if entry.dts.is_none() {
        let esm_sibling = entry
          .esm
          .as_deref()
          .map(|esm| format!("{}.d.ts", strip_module_ext(esm, MODULE_EXTS)));
        let cjs_sibling = entry
          .cjs
          .as_deref()
          .map(|cjs| format!("{}.d.ts", strip_module_ext(cjs, MODULE_EXTS)));
        if let Some(dts) =
          esm_sibling.filter(|dts| self.exists_pkg_file(dts))
        {
          entry.dts = Some(dts);
        } else if let Some(dts) =
          cjs_sibling.filter(|dts| self.exists_pkg_file(dts))
        {
          entry.dts = Some(dts);
        } else if self.exists_pkg_file(&format!("{sub_module}.d.mts")) {
          entry.dts = Some(format!("./{sub_module}.d.mts"));
        } else if self.exists_pkg_file(&format!("{sub_module}.d.ts")) {
          entry.dts = Some(format!("./{sub_module}.d.ts"));
        } else if self.exists_pkg_file(&format!("{sub_module}/index.d.mts"))
        {
          entry.dts = Some(format!("./{sub_module}/index.d.mts"));
        } else if self.exists_pkg_file(&format!("{sub_module}/index.d.ts")) {
          entry.dts = Some(format!("./{sub_module}/index.d.ts"));
        }
      }
    } else {
      entry = BuildEntry {
        esm: self.package_json.module.clone(),
        cjs: self.package_json.main.clone(),
        dts: self.package_json.types.clone(),
      };
      if entry.dts.is_none() {
        entry.dts = self.package_json.typings.clone();
      }

      if let Some(exports) = &self.package_json.exports {
        let mut export_entry = BuildEntry::default();
        let module_type = ModuleType::from_pkg_type(&self.package_json.typ);
        match exports {
          Value::Object(exports) => match exports.get(".") {
            Some(Value::String(s)) => {
              // exports: {
              // ".": "./index.js"
              // }
              if module_type == ModuleType::Module {
                export_entry.esm = Some(s.clone());
              } else {
                export_entry.cjs = Some(s.clone());
              }
            }
            Some(Value::Object(conditions)) => {
              // exports: {
              // ".": {
              // "require": "./cjs/index.js",
              // "import": "./esm/index.js"
              // }
              // }
              export_entry = resolve_condition_export_entry(
                self,
                conditions,
                module_type,
              );
            }
            Some(_) => {}
            None => {
              // exports: {
              // "require": "./cjs/index.js",
              // "import": "./esm/index.js"
              // }
              export_entry =
                resolve_condition_export_entry(self, exports, module_type);
            }
          },
          Value::String(s) => {
            // exports: "./index.js"
            if module_type == ModuleType::Module {
              export_entry.esm = Some(s.clone());
            } else {
              export_entry.cjs = Some(s.clone());
            }
          }
          _ => {}
        }
        self.normalize_build_entry(&mut export_entry);
        self.merge_existing(&mut entry, export_entry);
      }

      if entry.esm.is_none() {
        if self.package_json.typ == "module" && self.exists_pkg_file("index.js")
        {
          entry.esm = Some("./index.js".to_string());
        } else if self.exists_pkg_file("index.mjs") {
          entry.esm = Some("./index.mjs".to_string());
        }
      }

      if entry.cjs.is_none() {
        if self.package_json.typ != "module" && self.exists_pkg_file("index.js")
        {
          entry.cjs = Some("./index.js".to_string());
        } else if self.exists_pkg_file("index.cjs") {
          entry.cjs = Some("./index.cjs".to_string());
        }
      }

      if entry.dts.is_none() {
        if self.exists_pkg_file("index.d.mts") {
          entry.dts = Some("./index.d.mts".to_string());
        } else if self.exists_pkg_file("index.d.ts") {
          entry.dts = Some("./index.d.ts".to_string());
        }
      }
      if entry.dts.is_none() {
        if let Some(esm) = entry.esm.clone() {
          entry.dts = self.probe_dts_sibling(&esm);
        }
      }
      if entry.dts.is_none() {
        if let Some(cjs) = entry.cjs.clone() {
          entry.dts = self.probe_dts_sibling(&cjs);
        }
      }
    }

    // remap the dts through `typesVersions`
    // see https://www.typescriptlang.org/docs/handbook/declaration-files/publishing.html#version-selection-with-typesversions
    self.remap_types_versions(&mut entry);

    if !self.package_json.browser.is_empty() && self.target.is_browser() {
      self.normalize_build_entry(&mut entry);
      if let Some(esm) = &entry.esm {
        if let Some(replacement) = self.package_json.browser.get(esm) {
          if is_rel_path_specifier(replacement) {
            entry.esm = Some(replacement.clone());
          }
        }
      }
      if let Some(cjs) = &entry.cjs {
        if let Some(replacement) = self.package_json.browser.get(cjs) {
          if is_rel_path_specifier(replacement) {
            entry.cjs = Some(replacement.clone());
          }
        }
      }
      if esm_path.sub_bare_name.is_empty() {
        if let Some(replacement) = self.package_json.browser.get(".") {
          if is_rel_path_specifier(replacement) {
            if replacement.ends_with(".mjs") {
              // some commonjs packages point "." at an .mjs file; that
              // file is the esm entry, not a cjs replacement
              entry.esm = Some(replacement.clone());
            } else if entry.esm.is_none() {
              entry.cjs = Some(replacement.clone());
            }
          }
        }
      }
    }

    self.normalize_build_entry(&mut entry);
    entry
  }

  /// Keeps slots of `candidate` only when the referenced file exists, then
  /// lets them override `entry`.
  fn merge_existing(&self, entry: &mut BuildEntry, candidate: BuildEntry) {
    if let Some(esm) = candidate.esm.filter(|p| self.exists_pkg_file(p)) {
      entry.esm = Some(esm);
    }
    if let Some(cjs) = candidate.cjs.filter(|p| self.exists_pkg_file(p)) {
      entry.cjs = Some(cjs);
    }
    if let Some(dts) = candidate.dts.filter(|p| self.exists_pkg_file(p)) {
      entry.dts = Some(dts);
    }
  }

  fn probe_dts_sibling(&self, chosen: &str) -> Option<String> {
    let stripped = strip_module_ext(chosen, MODULE_EXTS);
    for ext in [".d.mts", ".d.ts"] {
      let sibling = format!("{stripped}{ext}");
      if self.exists_pkg_file(&sibling) {
        return Some(sibling);
      }
    }
    let (dir, base) = chosen.rsplit_once('/')?;
    if strip_module_ext(base, MODULE_EXTS) == "index" {
      for name in ["index.d.mts", "index.d.ts"] {
        let candidate = format!("{dir}/{name}");
        if self.exists_pkg_file(&candidate) {
          return Some(candidate);
        }
      }
    }
    None
  }

  fn remap_types_versions(&self, entry: &mut BuildEntry) {
    let Some(types_versions) = &self.package_json.types_versions else {
      return;
    };
    let Some(current_dts) = entry.dts.clone() else {
      return;
    };
    let mut ranges: Vec<&String> = types_versions
      .keys()
      .filter(|key| key.starts_with('>'))
      .collect();
    if ranges.is_empty() {
      return;
    }
    // lexicographic sort of the raw range keys, last wins; kept
    // byte-compatible with typescript's published behavior for
    // single-digit majors
    ranges.sort();
    let Some(Value::Object(mapping)) =
      types_versions.get(ranges.last().unwrap().as_str())
    else {
      return;
    };

    let dts = normalize_entry_path(&current_dts);
    let mut exact = false;
    let mut suffix = String::new();
    let mut paths = mapping.get(&dts);
    if paths.is_none() {
      paths = mapping.get(dts.trim_start_matches("./"));
    }
    if paths.is_some() {
      exact = true;
    }
    if paths.is_none() {
      for (key, value) in mapping {
        if key.ends_with("/*") {
          let key = normalize_entry_path(key);
          let key_prefix = key.strip_suffix("/*").unwrap();
          if dts.starts_with(key_prefix) {
            paths = Some(value);
            suffix = dts
              .strip_prefix(key.strip_suffix('*').unwrap())
              .unwrap_or(&dts)
              .to_string();
            break;
          }
        }
      }
    }
    if paths.is_none() {
      paths = mapping.get("*");
    }
    let Some(Value::Array(candidates)) = paths else {
      return;
    };
    let Some(Value::String(first)) = candidates.first() else {
      return;
    };

    let remapped = normalize_entry_path(first);
    if exact {
      entry.dts = Some(remapped);
      return;
    }
    let prefix = match remapped.rfind('*') {
      Some(i) => &remapped[..i],
      None => remapped.as_str(),
    };
    if !suffix.is_empty() {
      entry.dts = Some(format!("{prefix}{suffix}"));
    } else if let Some(diff) = dts.strip_prefix(prefix) {
      entry.dts = Some(remapped.replace('*', diff));
    } else {
      entry.dts = Some(format!("{prefix}{}", &dts[2..]));
    }
  }

  /// Makes every slot a `./`-rooted relative path with an extension,
  /// probing the conventional realizations for extensionless entries; a
  /// `.js` cjs entry that actually parses as ESM is promoted to the esm
  /// slot.
  pub fn normalize_build_entry(&self, entry: &mut BuildEntry) {
    if let Some(esm) = entry.esm.take() {
      let mut esm = normalize_entry_path(&esm);
      if !esm.ends_with(".mjs") && !esm.ends_with(".js") {
        for candidate in [
          format!("{esm}.mjs"),
          format!("{esm}.js"),
          format!("{esm}/index.mjs"),
          format!("{esm}/index.js"),
        ] {
          if self.exists_pkg_file(&candidate) {
            esm = candidate;
            break;
          }
        }
      }
      entry.esm = Some(esm);
    }

    if let Some(cjs) = entry.cjs.take() {
      let mut cjs = normalize_entry_path(&cjs);
      if !cjs.ends_with(".cjs") && !cjs.ends_with(".js") {
        for candidate in [
          format!("{cjs}.cjs"),
          format!("{cjs}.js"),
          format!("{cjs}/index.cjs"),
          format!("{cjs}/index.js"),
        ] {
          if self.exists_pkg_file(&candidate) {
            cjs = candidate;
            break;
          }
        }
      }
      // a `.js` file under a commonjs manifest may still be ESM
      let mut promoted = false;
      if cjs.ends_with(".js") {
        let file = self.pkg_dir.join(cjs.trim_start_matches("./"));
        if let Ok((true, _)) = self.env.js_lexer.validate_module_file(&file) {
          if entry.esm.is_none() {
            entry.esm = Some(cjs.clone());
          }
          promoted = true;
        }
      }
      if !promoted {
        entry.cjs = Some(cjs);
      }
    }

    if let Some(dts) = entry.dts.take() {
      entry.dts = Some(normalize_entry_path(&dts));
    }
  }

  /// Runs the lexers over the chosen entry. A mislabeled ESM entry that
  /// the lexer reports as CommonJS is demoted; the returned re-export is
  /// the specifier a CommonJS barrel forwards to.
  pub async fn analyze_entry(
    &self,
    entry: &mut BuildEntry,
    force_cjs_only: bool,
  ) -> Result<(Option<ModuleMeta>, Option<String>), ResolveError> {
    if !force_cjs_only {
      if let Some(esm) = entry.esm.clone() {
        if esm.ends_with(".vue") || esm.ends_with(".svelte") {
          return Ok((
            Some(ModuleMeta {
              has_default_export: true,
              named_exports: vec!["default".to_string()],
              from_cjs: false,
            }),
            None,
          ));
        }

        let file = self
          .wd
          .join("node_modules")
          .join(&self.esm_path.pkg_name)
          .join(esm.trim_start_matches("./"));
        let (is_esm, named_exports) =
          self.env.js_lexer.validate_module_file(&file)?;
        if is_esm {
          let has_default_export =
            named_exports.iter().any(|name| name == "default");
          return Ok((
            Some(ModuleMeta {
              has_default_export,
              named_exports,
              from_cjs: false,
            }),
            None,
          ));
        }

        log::warn!(
          "fake ES module '{}' of '{}'",
          esm,
          self.package_json.name
        );
        let cjs = self.run_cjs_lexer(&esm).await?;
        entry.cjs = Some(esm);
        entry.esm = None;
        return Ok((
          Some(ModuleMeta {
            has_default_export: cjs.has_default_export,
            named_exports: cjs.named_exports,
            from_cjs: true,
          }),
          cjs.reexport,
        ));
      }
    }

    if let Some(cjs_entry) = entry.cjs.clone() {
      let cjs = self.run_cjs_lexer(&cjs_entry).await?;
      return Ok((
        Some(ModuleMeta {
          has_default_export: cjs.has_default_export,
          named_exports: cjs.named_exports,
          from_cjs: true,
        }),
        cjs.reexport,
      ));
    }

    Ok((None, None))
  }

  async fn run_cjs_lexer(
    &self,
    specifier: &str,
  ) -> Result<CjsLexerResult, ResolveError> {
    let result = self
      .env
      .cjs_lexer
      .cjs_module_lexer(
        &self.esm_path.pkg_name,
        &self.wd,
        specifier,
        self.node_env(),
      )
      .await?;
    if let Some(message) = result.error.as_deref().filter(|m| !m.is_empty()) {
      return Err(
        LexerError::Cjs {
          specifier: specifier.to_string(),
          message: message.to_string(),
        }
        .into(),
      );
    }
    Ok(result)
  }
}

fn ends_with_any(s: &str, suffixes: &[&str]) -> bool {
  suffixes.iter().any(|suffix| s.ends_with(suffix))
}
