//! Content-addressed directory of compiled functions.

use std::path::{Path, PathBuf};

use kinesym_expr::Expression;
use tracing::{debug, warn};

use crate::CompileError;
use crate::function::CompiledFunction;
use crate::lower::{CacheKey, GraphDescription};
use crate::parameter::Parameter;
use crate::persist::discard;

/// Artifacts stored as `<dir>/<key>.json`, keyed by the SHA-256 of the
/// lowered graph.
///
/// Structurally identical graphs share an artifact; any change to the
/// graph, the parameter layout or the output shape produces a new key.
#[derive(Debug, Clone)]
pub struct FunctionCache {
    dir: PathBuf,
}

impl FunctionCache {
    /// The directory is created lazily on the first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Load the artifact for `expression` or compile and store it.
    ///
    /// Failures to read or write the artifact are logged and treated as a
    /// miss: the freshly compiled function is returned either way.
    ///
    /// # Errors
    ///
    /// Lowering errors only.
    pub fn get_or_compile(
        &self,
        expression: &Expression,
        parameters: &[Parameter],
    ) -> Result<CompiledFunction, CompileError> {
        let graph = GraphDescription::lower(expression, parameters)?;
        let key = graph.key();
        let path = self.path_for(&key);

        let loaded = CompiledFunction::load(&path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "failed to read compiled artifact");
            None
        });
        if let Some(function) = loaded {
            if function.key() == key {
                debug!(key = %key, "compiled function cache hit");
                return Ok(function);
            }
            warn!(
                path = %path.display(),
                expected = %key,
                found = %function.key(),
                "cached artifact belongs to another graph; recompiling"
            );
            discard(&path);
        }

        debug!(key = %key, "compiled function cache miss");
        let function = CompiledFunction::from_graph(&graph);
        if let Err(e) = function.save(&path) {
            warn!(path = %path.display(), error = %e, "failed to store compiled function");
        }
        Ok(function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinesym_expr::Scalar;
    use std::fs;

    fn expression(k: f64) -> (Expression, Vec<Parameter>) {
        let e = Expression::scalar(Scalar::symbol("x").sin() * k);
        (e, vec![Parameter::scalar("x")])
    }

    #[test]
    fn second_request_is_served_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FunctionCache::new(dir.path().join("compiled"));
        let (e, params) = expression(2.0);

        let mut first = cache.get_or_compile(&e, &params).unwrap();
        let path = cache.path_for(&first.key());
        assert!(path.exists());
        let written = fs::metadata(&path).unwrap().modified().unwrap();

        let mut second = cache.get_or_compile(&e, &params).unwrap();
        assert_eq!(second.key(), first.key());
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), written);
        assert_eq!(first.call_flat(&[0.5]).unwrap(), second.call_flat(&[0.5]).unwrap());
    }

    #[test]
    fn changed_graph_gets_a_new_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FunctionCache::new(dir.path());
        let (e1, params) = expression(2.0);
        let (e2, _) = expression(3.0);

        let f1 = cache.get_or_compile(&e1, &params).unwrap();
        let f2 = cache.get_or_compile(&e2, &params).unwrap();
        assert_ne!(f1.key(), f2.key());
        assert!(cache.path_for(&f1.key()).exists());
        assert!(cache.path_for(&f2.key()).exists());
    }

    #[test]
    fn artifact_under_the_wrong_key_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FunctionCache::new(dir.path());
        let (e1, params) = expression(2.0);
        let (e2, _) = expression(3.0);

        let f1 = cache.get_or_compile(&e1, &params).unwrap();
        let f2_key = GraphDescription::lower(&e2, &params).unwrap().key();
        // plant the artifact of e1 where e2's should be
        f1.save(&cache.path_for(&f2_key)).unwrap();

        let mut f2 = cache.get_or_compile(&e2, &params).unwrap();
        assert_eq!(f2.key(), f2_key);
        assert_eq!(f2.call_flat(&[0.5]).unwrap(), &[0.5f64.sin() * 3.0]);

        let reloaded = CompiledFunction::load(&cache.path_for(&f2_key)).unwrap().unwrap();
        assert_eq!(reloaded.key(), f2_key);
    }

    #[test]
    fn corrupt_artifact_is_recompiled() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FunctionCache::new(dir.path());
        let (e, params) = expression(2.0);
        let key = GraphDescription::lower(&e, &params).unwrap().key();
        fs::write(cache.path_for(&key), b"garbage").unwrap();

        let mut f = cache.get_or_compile(&e, &params).unwrap();
        assert_eq!(f.call_flat(&[0.5]).unwrap(), &[0.5f64.sin() * 2.0]);
        assert!(CompiledFunction::load(&cache.path_for(&key)).unwrap().is_some());
    }

    #[test]
    fn unwritable_directory_still_returns_a_function() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"").unwrap();
        // a regular file where the cache directory should be
        let cache = FunctionCache::new(&blocker);
        let (e, params) = expression(2.0);
        let mut f = cache.get_or_compile(&e, &params).unwrap();
        assert_eq!(f.call_flat(&[0.0]).unwrap(), &[0.0]);
    }

    #[test]
    fn lowering_errors_propagate() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FunctionCache::new(dir.path());
        let (e, _) = expression(2.0);
        assert!(matches!(
            cache.get_or_compile(&e, &[]),
            Err(CompileError::UnknownSymbol(_))
        ));
    }
}
