// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Stack trace capture for error and panic events.

use serde::{Deserialize, Serialize};

/// Module prefixes treated as outside the application when no include
/// paths are configured.
const SYSTEM_MODULES: [&str; 6] = ["std", "core", "alloc", "backtrace", "tokio", "test"];

/// One stack frame, as sent on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filename: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub function: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub module: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lineno: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colno: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abs_path: Option<String>,
    #[serde(default)]
    pub in_app: bool,
}

/// Frames ordered oldest call first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stacktrace {
    pub frames: Vec<Frame>,
}

impl Stacktrace {
    /// Records the current call stack.
    ///
    /// Leading frames whose function path starts with `backtrace::` or one of
    /// `skip_prefixes` are dropped so the trace starts at the caller of the
    /// capture machinery.
    #[must_use]
    pub fn capture(skip_prefixes: &[&str], include_paths: &[String]) -> Self {
        let backtrace = backtrace::Backtrace::new();

        // most recent call first
        let mut resolved = Vec::new();
        for frame in backtrace.frames() {
            for symbol in frame.symbols() {
                let Some(name) = symbol.name() else {
                    continue;
                };
                let path = format!("{name:#}");
                let (module, function) = split_function_path(&path);
                let in_app = is_in_app(&module, include_paths);
                resolved.push((
                    path,
                    Frame {
                        filename: symbol
                            .filename()
                            .and_then(|p| p.file_name())
                            .map(|f| f.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                        function,
                        module,
                        lineno: symbol.lineno(),
                        colno: symbol.colno(),
                        abs_path: symbol.filename().map(|p| p.display().to_string()),
                        in_app,
                    },
                ));
            }
        }

        let first_caller = resolved
            .iter()
            .position(|(path, _)| !is_capture_frame(path, skip_prefixes))
            .unwrap_or(resolved.len());

        let mut frames: Vec<Frame> = resolved
            .into_iter()
            .skip(first_caller)
            .map(|(_, frame)| frame)
            .collect();
        frames.reverse();

        Stacktrace { frames }
    }

    /// `module.function` of the most recent in-app frame.
    #[must_use]
    pub fn culprit(&self) -> Option<String> {
        self.frames
            .iter()
            .rev()
            .find(|f| f.in_app && !f.function.is_empty())
            .map(|f| {
                if f.module.is_empty() {
                    f.function.clone()
                } else {
                    format!("{}.{}", f.module, f.function)
                }
            })
    }
}

fn is_capture_frame(path: &str, skip_prefixes: &[&str]) -> bool {
    let path = path.trim_start_matches('<');
    path.starts_with("backtrace::") || skip_prefixes.iter().any(|p| path.starts_with(p))
}

fn split_function_path(path: &str) -> (String, String) {
    let path = path.trim_start_matches('<');
    match path.rsplit_once("::") {
        Some((module, function)) => (module.trim_end_matches('>').to_string(), function.to_string()),
        None => (String::new(), path.to_string()),
    }
}

fn module_matches(module: &str, prefix: &str) -> bool {
    module == prefix
        || module
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with("::"))
}

fn is_in_app(module: &str, include_paths: &[String]) -> bool {
    if include_paths.is_empty() {
        !SYSTEM_MODULES.iter().any(|p| module_matches(module, p))
    } else {
        include_paths.iter().any(|p| module_matches(module, p))
    }
}
