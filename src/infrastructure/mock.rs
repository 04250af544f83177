//! In-memory engine for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::engine::{Engine, EngineError, LaunchSpec, OutputSink};

/// An engine that records launches instead of performing them.
///
/// Exit codes are scripted per image with [`MockEngine::exit_with`];
/// unscripted images succeed. With [`MockEngine::hang`] every `run` call
/// blocks forever, which is how cancel and timeout paths get exercised.
#[derive(Default)]
pub struct MockEngine {
    launches: Mutex<Vec<LaunchSpec>>,
    started: Mutex<Vec<LaunchSpec>>,
    results: Mutex<HashMap<String, i64>>,
    destroy_count: AtomicUsize,
    hang: bool,
}

impl MockEngine {
    /// A mock where every launch exits zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock whose `run` calls never complete.
    #[must_use]
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    /// Scripts the exit code for launches of `image`.
    pub fn exit_with(&self, image: &str, code: i64) {
        if let Ok(mut results) = self.results.lock() {
            results.insert(image.to_string(), code);
        }
    }

    /// Every launch-and-wait request seen so far, in order.
    #[must_use]
    pub fn launches(&self) -> Vec<LaunchSpec> {
        self.launches.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// Every detached start seen so far, in order.
    #[must_use]
    pub fn started(&self) -> Vec<LaunchSpec> {
        self.started.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// How many times `destroy` was called.
    #[must_use]
    pub fn destroy_count(&self) -> usize {
        self.destroy_count.load(Ordering::SeqCst)
    }

    fn scripted_code(&self, image: &str) -> i64 {
        let results = match self.results.lock() {
            Ok(results) => results,
            Err(_) => return 0,
        };
        if let Some(code) = results.get(image) {
            return *code;
        }
        // Fall back to the tag-stripped image name.
        let bare = image.split(':').next().unwrap_or(image);
        results.get(bare).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Engine for MockEngine {
    async fn run(&self, spec: &LaunchSpec, _sink: OutputSink) -> Result<i64, EngineError> {
        if let Ok(mut launches) = self.launches.lock() {
            launches.push(spec.clone());
        }
        if self.hang {
            futures::future::pending::<()>().await;
        }
        Ok(self.scripted_code(&spec.image))
    }

    async fn start(&self, spec: &LaunchSpec) -> Result<(), EngineError> {
        if let Ok(mut started) = self.started.lock() {
            started.push(spec.clone());
        }
        Ok(())
    }

    async fn destroy(&self) {
        self.destroy_count.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::engine::null_sink;

    #[tokio::test]
    async fn test_mock_records_and_scripts() {
        let engine = MockEngine::new();
        engine.exit_with("golang", 2);

        let spec = LaunchSpec {
            image: "golang:1.21".to_string(),
            ..LaunchSpec::default()
        };
        let code = engine.run(&spec, null_sink()).await.unwrap();
        assert_eq!(code, 2);
        assert_eq!(engine.launches().len(), 1);
        assert_eq!(engine.launches()[0].image, "golang:1.21");
    }

    #[tokio::test]
    async fn test_mock_destroy_counts() {
        let engine = MockEngine::new();
        engine.destroy().await;
        engine.destroy().await;
        assert_eq!(engine.destroy_count(), 2);
    }
}
