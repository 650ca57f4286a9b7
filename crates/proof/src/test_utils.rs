//! Fixed [`ProofSource`] for tests.
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use eyre::Result;

use crate::{ProofSource, PublicState, ValidityPis};

#[derive(Debug, Default)]
struct State {
    proofs: HashMap<u64, ValidityPis>,
    latest_proven: u64,
    delay: Duration,
}

/// Proofs and a proven high-water mark set by the test.
#[derive(Debug, Clone, Default)]
pub struct StaticProofs {
    state: Arc<Mutex<State>>,
    requests: Arc<AtomicUsize>,
}

impl StaticProofs {
    /// Create a source with no proofs and nothing proven.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish the proof of `block_number`.
    pub fn set_proof(&self, block_number: u64, is_valid_block: bool, next_account_id: u64) {
        let pis = ValidityPis {
            public_state: PublicState { block_number, block_hash: None, next_account_id },
            is_valid_block,
        };
        self.state().proofs.insert(block_number, pis);
    }

    /// Set the latest proven block number.
    pub fn set_latest_proven(&self, block_number: u64) {
        self.state().latest_proven = block_number;
    }

    /// Hold every per-block proof request for `delay` before answering.
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = delay;
    }

    /// Number of per-block proof requests so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProofSource for StaticProofs {
    async fn validity_pis(&self, block_number: u64) -> Result<Option<ValidityPis>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let delay = self.state().delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.state().proofs.get(&block_number).cloned())
    }

    async fn latest_proven_block_number(&self) -> Result<u64> {
        Ok(self.state().latest_proven)
    }
}
