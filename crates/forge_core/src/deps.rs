//! Static inference of external package dependencies.
//!
//! Two lexical passes are unioned: declared dependencies from manifest files
//! (`package.json`, `requirements.txt`, `Cargo.toml`) and bare module
//! references found in import statements of every other file. Relative and
//! aliased imports, runtime builtins and modules defined inside the project
//! are not dependencies. Nothing is executed and nothing is installed.

use std::collections::{BTreeSet, HashSet};

use regex::Regex;
use tracing::{debug, warn};

use crate::error::CoreResult;
use crate::project::AssembledProject;

/// Deduplicated, ordered set of external package names.
pub type DependencySet = BTreeSet<String>;

const NODE_BUILTINS: &[&str] = &[
    "assert", "buffer", "child_process", "cluster", "crypto", "dgram", "dns", "events", "fs",
    "http", "http2", "https", "module", "net", "os", "path", "perf_hooks", "process",
    "querystring", "readline", "stream", "string_decoder", "timers", "tls", "tty", "url", "util",
    "v8", "vm", "worker_threads", "zlib",
];

const PYTHON_STDLIB: &[&str] = &[
    "abc", "argparse", "asyncio", "base64", "collections", "contextlib", "copy", "csv",
    "dataclasses", "datetime", "decimal", "enum", "functools", "glob", "hashlib", "http", "io",
    "itertools", "json", "logging", "math", "os", "pathlib", "pickle", "random", "re", "shutil",
    "socket", "sqlite3", "string", "subprocess", "sys", "tempfile", "threading", "time",
    "typing", "unittest", "urllib", "uuid", "warnings", "__future__",
];

const JS_EXTENSIONS: &[&str] = &["js", "jsx", "mjs", "cjs", "ts", "tsx", "mts", "cts", "vue", "svelte"];

const PACKAGE_JSON_SECTIONS: &[&str] = &[
    "dependencies",
    "devDependencies",
    "peerDependencies",
    "optionalDependencies",
];

const CARGO_SECTIONS: &[&str] = &["dependencies", "dev-dependencies", "build-dependencies"];

/// Scans assembled projects for external dependencies.
pub struct DependencyResolver {
    js_patterns: Vec<Regex>,
    py_import: Regex,
    py_from: Regex,
    requirement_name: Regex,
}

impl DependencyResolver {
    pub fn new() -> CoreResult<Self> {
        Ok(Self {
            js_patterns: vec![
                Regex::new(r#"\bfrom\s*["']([^"'\n]+)["']"#)?,
                Regex::new(r#"\bimport\s*["']([^"'\n]+)["']"#)?,
                Regex::new(r#"\bimport\s*\(\s*["']([^"'\n]+)["']\s*\)"#)?,
                Regex::new(r#"\brequire\s*\(\s*["']([^"'\n]+)["']\s*\)"#)?,
            ],
            py_import: Regex::new(r"(?m)^[ \t]*import[ \t]+([^\n#]+)")?,
            py_from: Regex::new(r"(?m)^[ \t]*from[ \t]+([\w.]+)[ \t]+import\b")?,
            requirement_name: Regex::new(r"^([A-Za-z0-9][A-Za-z0-9._-]*)")?,
        })
    }

    /// Resolve the dependency set of a project. Pure and total.
    pub fn resolve(&self, project: &AssembledProject) -> DependencySet {
        let local_modules = local_python_modules(project);
        let mut deps = DependencySet::new();

        for (path, file) in &project.files {
            let file_name = path.rsplit('/').next().unwrap_or(path);
            match file_name {
                "package.json" => self.scan_package_json(path, &file.content, &mut deps),
                "requirements.txt" => self.scan_requirements(&file.content, &mut deps),
                "Cargo.toml" => self.scan_cargo_toml(path, &file.content, &mut deps),
                _ => {
                    let extension = file_name.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
                    if JS_EXTENSIONS.contains(&extension) {
                        self.scan_js(&file.content, &mut deps);
                    } else if extension == "py" {
                        self.scan_python(&file.content, &local_modules, &mut deps);
                    }
                }
            }
        }

        debug!("Resolved {} dependencies", deps.len());
        deps
    }

    fn scan_package_json(&self, path: &str, content: &str, deps: &mut DependencySet) {
        let manifest: serde_json::Value = match serde_json::from_str(content) {
            Ok(value) => value,
            Err(e) => {
                warn!("Skipping unparseable manifest {}: {}", path, e);
                return;
            }
        };
        for section in PACKAGE_JSON_SECTIONS {
            if let Some(table) = manifest.get(section).and_then(|v| v.as_object()) {
                deps.extend(table.keys().cloned());
            }
        }
    }

    fn scan_requirements(&self, content: &str, deps: &mut DependencySet) {
        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            if line.is_empty() || line.starts_with('-') {
                continue;
            }
            if let Some(name) = self.requirement_name.captures(line).and_then(|c| c.get(1)) {
                deps.insert(name.as_str().to_lowercase());
            }
        }
    }

    fn scan_cargo_toml(&self, path: &str, content: &str, deps: &mut DependencySet) {
        let manifest: toml::Value = match toml::from_str(content) {
            Ok(value) => value,
            Err(e) => {
                warn!("Skipping unparseable manifest {}: {}", path, e);
                return;
            }
        };
        for section in CARGO_SECTIONS {
            if let Some(table) = manifest.get(section).and_then(|v| v.as_table()) {
                for (name, spec) in table {
                    // Path dependencies live inside the project.
                    if spec.get("path").is_none() {
                        deps.insert(name.clone());
                    }
                }
            }
        }
    }

    fn scan_js(&self, content: &str, deps: &mut DependencySet) {
        for pattern in &self.js_patterns {
            for captures in pattern.captures_iter(content) {
                if let Some(name) = captures.get(1).and_then(|m| js_package_name(m.as_str())) {
                    deps.insert(name);
                }
            }
        }
    }

    fn scan_python(&self, content: &str, local: &HashSet<String>, deps: &mut DependencySet) {
        let mut modules = Vec::new();
        for captures in self.py_import.captures_iter(content) {
            if let Some(list) = captures.get(1) {
                for item in list.as_str().split(',') {
                    if let Some(module) = item.split_whitespace().next() {
                        modules.push(module.to_string());
                    }
                }
            }
        }
        for captures in self.py_from.captures_iter(content) {
            if let Some(module) = captures.get(1) {
                modules.push(module.as_str().to_string());
            }
        }

        for module in modules {
            if module.starts_with('.') {
                continue;
            }
            let top = module.split('.').next().unwrap_or("");
            if top.is_empty() || PYTHON_STDLIB.contains(&top) || local.contains(top) {
                continue;
            }
            deps.insert(top.to_string());
        }
    }
}

/// Package name for a JS module specifier, or `None` for relative,
/// aliased, absolute, URL and builtin specifiers.
fn js_package_name(specifier: &str) -> Option<String> {
    let specifier = specifier.trim();
    if specifier.is_empty()
        || specifier.starts_with('.')
        || specifier.starts_with('/')
        || specifier.starts_with("@/")
        || specifier.starts_with("~/")
        || specifier.starts_with("node:")
        || specifier.contains("://")
    {
        return None;
    }

    let mut segments = specifier.split('/');
    let name = if specifier.starts_with('@') {
        let scope = segments.next()?;
        let package = segments.next()?;
        format!("{}/{}", scope, package)
    } else {
        segments.next()?.to_string()
    };

    if NODE_BUILTINS.contains(&name.as_str()) {
        return None;
    }
    Some(name)
}

/// Top-level module names defined by the project's own Python files.
fn local_python_modules(project: &AssembledProject) -> HashSet<String> {
    let mut modules = HashSet::new();
    for path in project.paths() {
        if !path.ends_with(".py") {
            continue;
        }
        let mut parts = path.split('/');
        if let Some(first) = parts.next() {
            let module = first.trim_end_matches(".py");
            modules.insert(module.to_string());
        }
        // Sources under a src/ layout are importable by their package name.
        if path.starts_with("src/") {
            if let Some(second) = parts.next() {
                modules.insert(second.trim_end_matches(".py").to_string());
            }
        }
    }
    modules
}
