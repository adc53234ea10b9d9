// Copyright 2018-2025 the Deno authors. MIT license.

/// Node built-in modules the rewriter recognizes.
pub static NODE_BUILTIN_MODULES: &[&str] = &[
  "_http_agent",
  "_http_common",
  "_http_outgoing",
  "_http_server",
  "_stream_duplex",
  "_stream_passthrough",
  "_stream_readable",
  "_stream_transform",
  "_stream_writable",
  "_tls_common",
  "_tls_wrap",
  "assert",
  "assert/strict",
  "async_hooks",
  "buffer",
  "child_process",
  "cluster",
  "console",
  "constants",
  "crypto",
  "dgram",
  "diagnostics_channel",
  "dns",
  "dns/promises",
  "domain",
  "events",
  "fs",
  "fs/promises",
  "http",
  "http2",
  "https",
  "inspector",
  "inspector/promises",
  "module",
  "net",
  "os",
  "path",
  "path/posix",
  "path/win32",
  "perf_hooks",
  "process",
  "punycode",
  "querystring",
  "readline",
  "readline/promises",
  "repl",
  "stream",
  "stream/consumers",
  "stream/promises",
  "stream/web",
  "string_decoder",
  "sys",
  "timers",
  "timers/promises",
  "tls",
  "tty",
  "url",
  "util",
  "util/types",
  "v8",
  "vm",
  "wasi",
  "worker_threads",
  "zlib",
];

/// Returns the builtin name for a specifier, accepting both the bare
/// (`fs`) and prefixed (`node:fs`) forms.
pub fn node_builtin_name(specifier: &str) -> Option<&str> {
  let name = specifier.strip_prefix("node:").unwrap_or(specifier);
  if NODE_BUILTIN_MODULES.binary_search(&name).is_ok() {
    Some(name)
  } else {
    None
  }
}

#[inline(always)]
pub fn is_node_builtin_module(specifier: &str) -> bool {
  node_builtin_name(specifier).is_some()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_builtins_are_sorted() {
    let mut builtins_list = NODE_BUILTIN_MODULES.to_vec();
    builtins_list.sort();
    assert_eq!(NODE_BUILTIN_MODULES, builtins_list);
  }

  #[test]
  fn test_builtin_name() {
    assert_eq!(node_builtin_name("fs"), Some("fs"));
    assert_eq!(node_builtin_name("node:fs"), Some("fs"));
    assert_eq!(node_builtin_name("node:fs/promises"), Some("fs/promises"));
    assert_eq!(node_builtin_name("lodash"), None);
  }
}
