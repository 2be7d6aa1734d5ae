//! Post-processing hooks run after a call is persisted
//!
//! Hooks are best-effort: they run on their own tasks, never block
//! persistence or dispatch, and a failing hook only logs.

use async_trait::async_trait;
use std::sync::Arc;
use wavecap_core::types::Call;
use wavecap_core::Result;

/// One post-processing step over a freshly persisted call
#[async_trait]
pub trait CallHook: Send + Sync {
    /// Hook name used in logs
    fn name(&self) -> &'static str;

    /// Process the call; errors are logged, never propagated
    async fn process(&self, call: &Call) -> Result<()>;
}

/// Spawn every hook against the call on detached tasks
pub fn run_hooks(hooks: &[Arc<dyn CallHook>], call: &Arc<Call>) {
    for hook in hooks {
        let hook = Arc::clone(hook);
        let call = Arc::clone(call);
        tokio::spawn(async move {
            if let Err(e) = hook.process(&call).await {
                tracing::warn!(hook = hook.name(), call_id = call.id, error = %e, "post-processing hook failed");
            }
        });
    }
}

/// Flags calls whose transcript mentions a watched keyword
#[derive(Debug, Default)]
pub struct KeywordFlagHook {
    keywords: Vec<String>,
}

impl KeywordFlagHook {
    /// Watch the given keywords, matched case-insensitively
    #[must_use]
    pub fn new(keywords: Vec<String>) -> Self {
        Self {
            keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
        }
    }
}

#[async_trait]
impl CallHook for KeywordFlagHook {
    fn name(&self) -> &'static str {
        "keyword-flag"
    }

    async fn process(&self, call: &Call) -> Result<()> {
        let Some(transcript) = &call.transcript else {
            return Ok(());
        };

        let haystack = transcript.to_lowercase();
        for keyword in &self.keywords {
            if haystack.contains(keyword) {
                tracing::warn!(
                    call_id = call.id,
                    system = call.system_ref,
                    talkgroup = call.talkgroup_ref,
                    keyword = %keyword,
                    "watched keyword heard on call"
                );
            }
        }

        Ok(())
    }
}
