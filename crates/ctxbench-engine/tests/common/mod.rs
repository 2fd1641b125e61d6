//! Shared test doubles for integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use ctxbench_engine::error::EngineResult;
use ctxbench_engine::invoker::{Generation, GenerationConfig, ModelInvoker};

type ReplyFn = Box<dyn Fn(&str) -> EngineResult<Generation> + Send + Sync>;

/// Invoker that answers from a closure and records every context it saw.
pub struct FakeInvoker {
    reply: ReplyFn,
    calls: Mutex<Vec<String>>,
    call_count: AtomicUsize,
}

impl FakeInvoker {
    pub fn replying<F>(reply: F) -> Self
    where
        F: Fn(&str) -> EngineResult<Generation> + Send + Sync + 'static,
    {
        Self {
            reply: Box::new(reply),
            calls: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Invoker that always answers `text` and reports `tokens`.
    pub fn fixed(text: &str, tokens: u64) -> Self {
        let text = text.to_string();
        Self::replying(move |_| {
            Ok(Generation {
                text: text.clone(),
                tokens,
            })
        })
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelInvoker for FakeInvoker {
    async fn generate(
        &self,
        context: &str,
        _config: &GenerationConfig,
    ) -> EngineResult<Generation> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(context.to_string());
        (self.reply)(context)
    }
}
