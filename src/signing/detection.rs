//! Token detection with last-detection-wins semantics.
//!
//! Each opening of the signing dialog starts a new pass. Results from a pass
//! that has been superseded are discarded, even when they arrive last.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::backends::{BackendError, DeviceAgent, TokenInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionPass(u64);

#[derive(Debug, Default)]
pub struct TokenDetectionRegistry {
    generation: AtomicU64,
    published: Mutex<Option<(u64, Vec<TokenInfo>)>>,
}

impl TokenDetectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_pass(&self) -> DetectionPass {
        DetectionPass(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, pass: DetectionPass) -> bool {
        self.generation.load(Ordering::SeqCst) == pass.0
    }

    /// Store the tokens found by `pass`. Returns `false` when the pass was
    /// superseded and the result was dropped.
    pub fn publish(&self, pass: DetectionPass, tokens: Vec<TokenInfo>) -> bool {
        let Ok(mut published) = self.published.lock() else {
            return false;
        };
        // Checked under the lock so a newer pass cannot publish in between.
        if !self.is_current(pass) {
            tracing::debug!(pass = pass.0, "Discarding superseded token detection");
            return false;
        }
        *published = Some((pass.0, tokens));
        true
    }

    /// Tokens from the current pass, if it has published.
    pub fn current(&self) -> Option<Vec<TokenInfo>> {
        let published = self.published.lock().ok()?;
        match &*published {
            Some((generation, tokens)) if *generation == self.generation.load(Ordering::SeqCst) => {
                Some(tokens.clone())
            }
            _ => None,
        }
    }

    /// Query the agent for `pass`. `Ok(None)` when the pass was superseded
    /// while the agent was answering.
    pub fn detect(
        &self,
        pass: DetectionPass,
        agent: &dyn DeviceAgent,
    ) -> Result<Option<Vec<TokenInfo>>, BackendError> {
        let tokens = agent.detect_tokens()?;
        if self.publish(pass, tokens.clone()) {
            Ok(Some(tokens))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::ScriptedDeviceAgent;

    fn token(id: &str) -> TokenInfo {
        TokenInfo {
            id: id.into(),
            label: format!("Token {id}"),
            subject: None,
        }
    }

    #[test]
    fn latest_pass_wins() {
        let registry = TokenDetectionRegistry::new();
        let first = registry.start_pass();
        let second = registry.start_pass();

        assert!(registry.publish(second, vec![token("b")]));
        assert!(!registry.publish(first, vec![token("a")]));
        assert_eq!(registry.current().unwrap()[0].id, "b");
    }

    #[test]
    fn new_pass_hides_stale_result() {
        let registry = TokenDetectionRegistry::new();
        let first = registry.start_pass();
        registry.publish(first, vec![token("a")]);
        let _second = registry.start_pass();
        assert!(registry.current().is_none());
    }

    #[test]
    fn detect_superseded_returns_none() {
        let registry = TokenDetectionRegistry::new();
        let agent = ScriptedDeviceAgent::new();
        let stale = registry.start_pass();
        let fresh = registry.start_pass();

        assert!(registry.detect(stale, &agent).unwrap().is_none());
        assert_eq!(registry.detect(fresh, &agent).unwrap().unwrap().len(), 1);
        assert_eq!(agent.detect_calls(), 2);
    }

    #[test]
    fn concurrent_passes_keep_only_latest() {
        use std::sync::Arc;
        let registry = Arc::new(TokenDetectionRegistry::new());
        let passes: Vec<_> = (0..8).map(|_| registry.start_pass()).collect();
        let last = *passes.last().unwrap();

        let handles: Vec<_> = passes
            .into_iter()
            .map(|pass| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.publish(pass, vec![token("x")]))
            })
            .collect();
        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap() as usize).sum();

        assert_eq!(accepted, 1);
        assert!(registry.is_current(last));
        assert!(registry.current().is_some());
    }
}
