//! The persistent proof-of-work queue.
//!
//! Every object that needs a nonce is recorded in the
//! [`ProofOfWorkRepository`](crate::ports::ProofOfWorkRepository)
//! before the search starts and removed once the stamped object is in
//! the inventory. A node that dies mid-search finds the item again at
//! startup and resumes with the object's remaining lifetime.

use std::sync::Arc;

use bitmsg_protocol::object::ObjectMessage;
use bitmsg_protocol::pow::{initial_hash, pow_target};
use bitmsg_protocol::unix_time_now;
use bitmsg_types::Result;

use crate::context::Context;
use crate::engine::PowEngine;
use crate::ports::PowItem;

// ---------------------------------------------------------------------------
// ProofOfWorkService
// ---------------------------------------------------------------------------

/// Queue bookkeeping around the [`PowEngine`].
pub struct ProofOfWorkService {
    engine: PowEngine,
}

impl ProofOfWorkService {
    /// Creates the service with a fresh engine.
    pub fn new() -> Self {
        Self {
            engine: PowEngine::new(),
        }
    }

    /// Computes the nonce for an object, then stores and floods it.
    ///
    /// The item is persisted before the search and removed after the
    /// stamped object reached the inventory, so a crash in between
    /// resumes rather than loses it.
    pub async fn do_proof_of_work(
        &self,
        ctx: &Context,
        mut object: ObjectMessage,
        nonce_trials_per_byte: u64,
        extra_bytes: u64,
    ) -> Result<ObjectMessage> {
        let payload = object.bytes_without_nonce();
        let hash = initial_hash(&object);
        ctx.pow_repository.put_item(
            hash,
            &PowItem {
                object: object.clone(),
                nonce_trials_per_byte,
                extra_bytes,
            },
        )?;

        let ttl = object.expires_time.saturating_sub(unix_time_now()).max(0) as u64;
        let target = pow_target(payload.len(), ttl, nonce_trials_per_byte, extra_bytes);
        let nonce = self.engine.compute(hash, target).await?;
        object.nonce = Some(nonce);

        ctx.pow_repository.remove_item(&hash)?;
        let iv = object.inventory_vector();
        ctx.inventory.store_object(&object)?;
        ctx.network.offer(iv);
        tracing::debug!(%iv, "object stamped and offered");
        Ok(object)
    }

    /// Resumes every half-done computation found in the repository.
    /// Returns how many were spawned.
    pub fn resume(ctx: &Arc<Context>) -> usize {
        let items = ctx.pow_repository.items();
        let count = items.len();
        if count > 0 {
            tracing::info!(count, "resuming pending proof of work");
        }
        for (_hash, item) in items {
            let ctx = Arc::clone(ctx);
            tokio::spawn(async move {
                // do_proof_of_work re-persists the item under the same
                // key before searching, so the queue entry survives
                // another crash.
                if let Err(e) = ctx
                    .pow
                    .do_proof_of_work(
                        &ctx,
                        item.object,
                        item.nonce_trials_per_byte,
                        item.extra_bytes,
                    )
                    .await
                {
                    tracing::warn!(error = %e, "resumed proof of work failed");
                }
            });
        }
        count
    }

    /// Cancels the current and all queued searches.
    pub fn shutdown(&self) {
        self.engine.shutdown();
    }
}

impl Default for ProofOfWorkService {
    fn default() -> Self {
        Self::new()
    }
}
