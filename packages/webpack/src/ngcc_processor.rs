// Ngcc Processor
//
// Drives the external linker over dependency entry points so the compiler
// can type-check against linked metadata. Idempotence across process
// restarts comes from a hash-named marker file, not an in-memory cache.

use crate::error::PluginError;
use crate::paths::normalize_path;
use std::cell::RefCell;
use std::collections::HashSet;
use std::path::Path;
use std::process::Command;
use xxhash_rust::xxh3::xxh3_64;

const LOCKFILES: &[&str] = &["package-lock.json", "yarn.lock", "pnpm-lock.yaml"];

/// Marker hash: a pure function of the lockfile contents, the linker config
/// contents, the resolved tsconfig path and the tsconfig contents, so
/// re-runs are exactly reproducible.
pub fn marker_hash(
    lockfile: &str,
    linker_config: &str,
    tsconfig_path: &str,
    tsconfig: &str,
) -> u64 {
    let mut data = Vec::new();
    data.extend_from_slice(lockfile.as_bytes());
    data.push(0);
    data.extend_from_slice(linker_config.as_bytes());
    data.push(0);
    data.extend_from_slice(tsconfig_path.as_bytes());
    data.push(0);
    data.extend_from_slice(tsconfig.as_bytes());
    xxh3_64(&data)
}

/// Package directory for a file resolved inside a dependency directory,
/// handling scoped package names.
pub fn containing_package(resolved_path: &str) -> Option<String> {
    let resolved = normalize_path(resolved_path);
    let idx = resolved.rfind("/node_modules/")?;
    let after = &resolved[idx + "/node_modules/".len()..];
    let mut segments = after.split('/');
    let first = segments.next()?;
    let package = if let Some(stripped) = first.strip_prefix('@') {
        let second = segments.next()?;
        let _ = stripped;
        format!("{}/{}", first, second)
    } else {
        first.to_string()
    };
    Some(format!(
        "{}/node_modules/{}",
        &resolved[..idx],
        package
    ))
}

pub struct NgccProcessor {
    /// Path to the linker executable; `None` disables linking entirely.
    binary: Option<String>,
    base_path: String,
    tsconfig_path: String,
    processed: RefCell<HashSet<String>>,
    pending_error: RefCell<Option<PluginError>>,
}

impl NgccProcessor {
    pub fn new(binary: Option<String>, base_path: String, tsconfig_path: String) -> Self {
        Self {
            binary,
            base_path: normalize_path(&base_path),
            tsconfig_path: normalize_path(&tsconfig_path),
            processed: RefCell::new(HashSet::new()),
            pending_error: RefCell::new(None),
        }
    }

    pub fn enabled(&self) -> bool {
        self.binary.is_some()
    }

    fn marker_file(&self) -> String {
        let read = |p: &str| std::fs::read_to_string(p).unwrap_or_default();
        let lockfile = LOCKFILES
            .iter()
            .map(|f| read(&format!("{}/{}", self.base_path, f)))
            .find(|c| !c.is_empty())
            .unwrap_or_default();
        let linker_config = read(&format!("{}/ngcc.config.js", self.base_path));
        let tsconfig = read(&self.tsconfig_path);
        let hash = marker_hash(&lockfile, &linker_config, &self.tsconfig_path, &tsconfig);
        format!(
            "{}/node_modules/.ngcc-processed-{:016x}",
            self.base_path, hash
        )
    }

    /// Run the linker over the whole dependency tree once per lockfile and
    /// tsconfig combination. The marker file survives process restarts.
    pub fn process(&self) -> Result<(), PluginError> {
        let Some(binary) = &self.binary else {
            return Ok(());
        };
        if !Path::new(&format!("{}/node_modules", self.base_path)).exists() {
            return Ok(());
        }
        let marker = self.marker_file();
        if Path::new(&marker).exists() {
            return Ok(());
        }
        let output = Command::new(binary)
            .arg("--source")
            .arg(format!("{}/node_modules", self.base_path))
            .arg("--tsconfig")
            .arg(&self.tsconfig_path)
            .output()
            .map_err(|e| PluginError::NgccFailed(Some(e.to_string())))?;
        if !output.status.success() {
            return Err(PluginError::NgccFailed(Some(
                String::from_utf8_lossy(&output.stderr).into_owned(),
            )));
        }
        let _ = std::fs::write(&marker, "");
        Ok(())
    }

    /// Link one resolved module on demand. Called from the resolution hook,
    /// so failures are stored and surfaced by the orchestrator via
    /// [`NgccProcessor::take_error`].
    pub fn process_module(&self, module_name: &str, resolved_path: &str) {
        let Some(binary) = &self.binary else {
            return;
        };
        let Some(package_dir) = containing_package(resolved_path) else {
            return;
        };
        if !self.processed.borrow_mut().insert(package_dir.clone()) {
            return;
        }
        let result = Command::new(binary)
            .arg("--source")
            .arg(format!("{}/node_modules", self.base_path))
            .arg("--target")
            .arg(&package_dir)
            .arg("--tsconfig")
            .arg(&self.tsconfig_path)
            .output();
        match result {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                *self.pending_error.borrow_mut() = Some(PluginError::NgccFailed(Some(format!(
                    "processing {}: {}",
                    module_name,
                    String::from_utf8_lossy(&output.stderr)
                ))));
            }
            Err(e) => {
                *self.pending_error.borrow_mut() =
                    Some(PluginError::NgccFailed(Some(e.to_string())));
            }
        }
    }

    /// Take the first error recorded by on-demand linking, if any.
    pub fn take_error(&self) -> Option<PluginError> {
        self.pending_error.borrow_mut().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_hash_is_reproducible() {
        let a = marker_hash("lock", "config", "/p/tsconfig.json", "{}");
        let b = marker_hash("lock", "config", "/p/tsconfig.json", "{}");
        assert_eq!(a, b);
    }

    #[test]
    fn marker_hash_changes_with_any_input() {
        let base = marker_hash("lock", "config", "/p/tsconfig.json", "{}");
        assert_ne!(base, marker_hash("lock2", "config", "/p/tsconfig.json", "{}"));
        assert_ne!(base, marker_hash("lock", "config2", "/p/tsconfig.json", "{}"));
        assert_ne!(base, marker_hash("lock", "config", "/q/tsconfig.json", "{}"));
        assert_ne!(base, marker_hash("lock", "config", "/p/tsconfig.json", "{ }"));
    }

    #[test]
    fn containing_package_handles_plain_and_scoped_names() {
        assert_eq!(
            containing_package("/p/node_modules/rxjs/internal/index.d.ts").as_deref(),
            Some("/p/node_modules/rxjs")
        );
        assert_eq!(
            containing_package("/p/node_modules/@angular/core/index.d.ts").as_deref(),
            Some("/p/node_modules/@angular/core")
        );
        assert_eq!(containing_package("/src/app/main.ts"), None);
    }

    #[test]
    fn failed_on_demand_link_records_a_pending_error() {
        let processor = NgccProcessor::new(
            Some("false".to_string()),
            "/p".to_string(),
            "/p/tsconfig.json".to_string(),
        );
        processor.process_module("rxjs", "/p/node_modules/rxjs/index.d.ts");
        assert!(matches!(
            processor.take_error(),
            Some(PluginError::NgccFailed(_))
        ));
        // Taking the error clears it.
        assert!(processor.take_error().is_none());
    }

    #[test]
    fn whole_tree_link_skips_without_a_dependency_directory() {
        let processor = NgccProcessor::new(
            Some("false".to_string()),
            "/definitely-not-a-real-project".to_string(),
            "/p/tsconfig.json".to_string(),
        );
        assert!(processor.process().is_ok());
    }

    #[test]
    fn disabled_processor_is_a_no_op() {
        let processor = NgccProcessor::new(None, "/p".to_string(), "/p/tsconfig.json".to_string());
        assert!(!processor.enabled());
        processor.process_module("rxjs", "/p/node_modules/rxjs/index.d.ts");
        assert!(processor.take_error().is_none());
        assert!(processor.process().is_ok());
    }
}
