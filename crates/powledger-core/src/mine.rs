//! Parallel nonce search.
//!
//! One dispatcher hands out contiguous nonce batches in increasing order over a
//! depth-1 queue, so it stalls while every worker is busy. Workers report
//! through a single-slot result channel; the first report wins and raises the
//! shared stop flag, which every worker checks before each nonce.

use crate::block::digest;
use crate::error::{LedgerError, Result};
use crate::pow::{Proof, ProofOfWork};
use crossbeam_channel::{bounded, select, Receiver, Sender};
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;
use tracing::{debug, info, warn};

pub(crate) fn search(pow: &ProofOfWork, prefix: &[u8], cancel: &AtomicBool) -> Result<Proof> {
    let started = Instant::now();
    let stop = AtomicBool::new(false);
    let (batch_tx, batch_rx) = bounded::<Range<u64>>(1);
    let (found_tx, found_rx) = bounded::<Proof>(1);

    let outcome = thread::scope(|scope| {
        for id in 0..pow.workers {
            let batches = batch_rx.clone();
            let found = found_tx.clone();
            let stop = &stop;
            thread::Builder::new()
                .name(format!("pow-worker-{id}"))
                .spawn_scoped(scope, move || work(pow, prefix, batches, found, stop, cancel))
                .map_err(LedgerError::WorkerSpawn)?;
        }
        drop(batch_rx);
        drop(found_tx);

        let outcome = dispatch(pow, batch_tx, &found_rx, cancel);
        stop.store(true, Ordering::Relaxed);
        outcome
    });

    match &outcome {
        Ok(proof) => info!(
            nonce = proof.nonce,
            hash = %hex::encode(proof.hash),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "found proof of work"
        ),
        Err(LedgerError::Cancelled) => warn!("nonce search cancelled"),
        Err(e) => warn!(error = %e, "nonce search failed"),
    }
    outcome
}

fn dispatch(
    pow: &ProofOfWork,
    batches: Sender<Range<u64>>,
    found: &Receiver<Proof>,
    cancel: &AtomicBool,
) -> Result<Proof> {
    let mut next = 0u64;
    while next < pow.max_nonce {
        if cancel.load(Ordering::Relaxed) {
            return Err(LedgerError::Cancelled);
        }
        let end = next.saturating_add(pow.batch_size).min(pow.max_nonce);
        select! {
            send(batches, next..end) -> sent => {
                if sent.is_err() {
                    // every worker has quit
                    break;
                }
                next = end;
            }
            recv(found) -> proof => match proof {
                Ok(proof) => return Ok(proof),
                Err(_) => break,
            },
        }
    }
    drop(batches);

    // Whole range issued; wait for in-flight batches to drain.
    match found.recv() {
        Ok(proof) => Ok(proof),
        Err(_) if cancel.load(Ordering::Relaxed) => Err(LedgerError::Cancelled),
        Err(_) => Err(LedgerError::Exhausted {
            max_nonce: pow.max_nonce,
        }),
    }
}

fn work(
    pow: &ProofOfWork,
    prefix: &[u8],
    batches: Receiver<Range<u64>>,
    found: Sender<Proof>,
    stop: &AtomicBool,
    cancel: &AtomicBool,
) {
    let name = thread::current().name().unwrap_or("pow-worker").to_owned();
    let mut searched = 0u64;
    'batches: for batch in batches.iter() {
        for nonce in batch {
            if stop.load(Ordering::Relaxed) || cancel.load(Ordering::Relaxed) {
                break 'batches;
            }
            let hash = digest(prefix, nonce);
            searched += 1;
            if pow.meets_target(&hash) {
                // Single slot: a later finder's report is simply dropped.
                let _ = found.try_send(Proof { nonce, hash });
                stop.store(true, Ordering::Relaxed);
                break 'batches;
            }
        }
    }
    debug!(worker = %name, searched, "worker stopped");
}
