//! Partner discovery over the `temp_user` table.
//!
//! A searcher claims a queued candidate with one conditional update
//! (`status = onchat, partner_id = me` where the candidate is still queued and
//! active), so two searchers can never both win the same candidate. Before
//! claiming, the searcher takes itself out of the queue with the same kind of
//! conditional update; if that fails, somebody already claimed it and the
//! partner is read back from `partner_id`.

use std::time::Duration;

use log::{debug, error, info};
use rand::seq::SliceRandom;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::models::{Identity, IdentityId, Status};
use crate::store::{IdentityFilter, IdentityPatch, SharedStore, StoreResult};

pub const SEARCH_BACKOFF: Duration = Duration::from_secs(3);

/// Upper bound of the random pause after losing a candidate to another searcher.
pub const CONTENTION_JITTER: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Paired(IdentityId),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    Paired(IdentityId),
    /// Nobody else is queued.
    Empty,
    /// A candidate existed but another searcher got there first.
    Contended,
    /// The local identity was not in the queue when it tried to claim.
    NotQueued,
}

fn contention_pause<R: Rng + ?Sized>(rng: &mut R) -> Duration {
    let max = u64::try_from(CONTENTION_JITTER.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(rng.gen_range(0..=max))
}

/// Picks a candidate uniformly at random.
pub fn pick_candidate<'a, R: Rng + ?Sized>(
    candidates: &'a [Identity],
    rng: &mut R,
) -> Option<&'a Identity> {
    candidates.choose(rng)
}

#[derive(Clone)]
pub struct PairingEngine {
    store: SharedStore,
    backoff: Duration,
}

impl PairingEngine {
    pub fn new(store: SharedStore, backoff: Duration) -> Self {
        PairingEngine { store, backoff }
    }

    /// Puts `me` back in the queue, forgetting any previous partner.
    pub async fn enter_queue(&self, me: &str) -> StoreResult<()> {
        self.store
            .update_identities(
                &IdentityPatch::status(Status::Queue).partner(None),
                &IdentityFilter::by_id(me),
            )
            .await?;
        debug!("Identity {} entered the queue", me);
        Ok(())
    }

    pub async fn find_candidates(&self, me: &str) -> StoreResult<Vec<Identity>> {
        let filter = IdentityFilter::default()
            .active(true)
            .status(Status::Queue)
            .excluding(me);
        self.store.select_identities(&filter).await
    }

    /// Returns the partner that claimed `me`, if any.
    pub async fn claimed_by(&self, me: &str) -> StoreResult<Option<IdentityId>> {
        let rows = self
            .store
            .select_identities(&IdentityFilter::by_id(me))
            .await?;
        Ok(rows
            .into_iter()
            .find(|row| row.status == Status::Onchat)
            .and_then(|row| row.partner_id))
    }

    /// Moves `candidate` from `queue` to `onchat` bound to `me`. `false` means
    /// the candidate was no longer available.
    pub async fn claim(&self, me: &str, candidate: &str) -> StoreResult<bool> {
        let affected = self
            .store
            .update_identities(
                &IdentityPatch::status(Status::Onchat).partner(Some(me.to_string())),
                &IdentityFilter::by_id(candidate)
                    .status(Status::Queue)
                    .active(true),
            )
            .await?;
        Ok(affected == 1)
    }

    async fn reserve(&self, me: &str) -> StoreResult<bool> {
        let affected = self
            .store
            .update_identities(
                &IdentityPatch::status(Status::Onchat).partner(None),
                &IdentityFilter::by_id(me).status(Status::Queue),
            )
            .await?;
        Ok(affected == 1)
    }

    async fn release(&self, me: &str) -> StoreResult<()> {
        self.store
            .update_identities(
                &IdentityPatch::status(Status::Queue),
                &IdentityFilter::by_id(me).status(Status::Onchat),
            )
            .await?;
        Ok(())
    }

    async fn bind(&self, me: &str, partner: &str) -> StoreResult<()> {
        self.store
            .update_identities(
                &IdentityPatch::default().partner(Some(partner.to_string())),
                &IdentityFilter::by_id(me),
            )
            .await?;
        Ok(())
    }

    pub async fn deactivate(&self, me: &str) -> StoreResult<()> {
        self.store
            .update_identities(&IdentityPatch::deactivate(), &IdentityFilter::by_id(me))
            .await?;
        info!("User with id {} has been set to inactive", me);
        Ok(())
    }

    /// One discovery round.
    pub async fn attempt(&self, me: &str) -> StoreResult<Attempt> {
        if let Some(partner) = self.claimed_by(me).await? {
            info!("Identity {} was claimed by {}", me, partner);
            return Ok(Attempt::Paired(partner));
        }

        let candidates = self.find_candidates(me).await?;
        let candidate = {
            let mut rng = rand::thread_rng();
            match pick_candidate(&candidates, &mut rng) {
                Some(candidate) => candidate.id.clone(),
                None => return Ok(Attempt::Empty),
            }
        };

        if !self.reserve(me).await? {
            return Ok(match self.claimed_by(me).await? {
                Some(partner) => Attempt::Paired(partner),
                None => Attempt::NotQueued,
            });
        }

        if !self.claim(me, &candidate).await? {
            debug!("Candidate {} was already claimed", candidate);
            self.release(me).await?;
            return Ok(Attempt::Contended);
        }

        // The claim stands even if recording it locally fails.
        if let Err(e) = self.bind(me, &candidate).await {
            error!("Error recording partner {} for {}: {}", candidate, me, e);
        }
        info!("Connected to user with ID: {}", candidate);
        Ok(Attempt::Paired(candidate))
    }

    /// Searches until paired or `cancel` fires. Store errors count as an
    /// empty round.
    pub async fn search(&self, me: &str, cancel: CancellationToken) -> SearchOutcome {
        loop {
            if cancel.is_cancelled() {
                return SearchOutcome::Cancelled;
            }

            match self.attempt(me).await {
                Ok(Attempt::Paired(partner)) => return SearchOutcome::Paired(partner),
                Ok(Attempt::Contended) => {
                    let pause = contention_pause(&mut rand::thread_rng());
                    debug!("Lost a candidate, retrying in {} ms", pause.as_millis());
                    tokio::select! {
                        () = cancel.cancelled() => return SearchOutcome::Cancelled,
                        () = tokio::time::sleep(pause) => continue,
                    }
                }
                Ok(Attempt::NotQueued) => {
                    debug!("Identity {} fell out of the queue, re-entering", me);
                    if let Err(e) = self.enter_queue(me).await {
                        error!("Error updating user with id {}: {}", me, e);
                    }
                }
                Ok(Attempt::Empty) => {
                    info!(
                        "No active users found. Retrying in {} ms...",
                        self.backoff.as_millis()
                    );
                }
                Err(e) => error!("Error fetching active users: {}", e),
            }

            tokio::select! {
                () = cancel.cancelled() => return SearchOutcome::Cancelled,
                () = tokio::time::sleep(self.backoff) => {}
            }
        }
    }
}
