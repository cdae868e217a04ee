//! Concurrent multi-source download orchestration
//!
//! A download resolves metadata and holders from the tracker, runs one fetch
//! task per holder over that holder's claimed indices, re-routes indices
//! that failed to other holders, then merges and verifies the result.
//!
//! All tasks of one download share a single `DownloadState` behind an async
//! mutex. Checking whether an index is already held, inserting the piece,
//! publishing it and reporting it to the tracker happen in one critical
//! section, so each index is recorded at most once even when tasks race.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::node::PeerNode;
use super::store::LocalFileStore;
use super::{PeerConnector, PeerError, PieceSource};
use crate::files::{FileError, FileHash, FileMetadata, FileRecord, Piece, PieceIndex};
use crate::tracker::{PeerAvailability, TrackerClient};

/// Lifecycle of a single download.
///
/// `Merged` and `Failed` are terminal. `Partial` always ends in `Failed`
/// because an incomplete record is never merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DownloadPhase {
    Pending,
    Resolving,
    Fetching,
    Complete,
    Partial,
    Merged,
    Failed,
}

impl DownloadPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, DownloadPhase::Merged | DownloadPhase::Failed)
    }

    /// Checks whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: DownloadPhase) -> bool {
        use DownloadPhase::*;
        matches!(
            (self, next),
            (Pending, Resolving)
                | (Resolving, Fetching)
                | (Resolving, Failed)
                | (Fetching, Complete)
                | (Fetching, Partial)
                | (Fetching, Failed)
                | (Complete, Merged)
                | (Complete, Failed)
                | (Partial, Failed)
        )
    }
}

impl std::fmt::Display for DownloadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DownloadPhase::Pending => "PENDING",
            DownloadPhase::Resolving => "RESOLVING",
            DownloadPhase::Fetching => "FETCHING",
            DownloadPhase::Complete => "COMPLETE",
            DownloadPhase::Partial => "PARTIAL",
            DownloadPhase::Merged => "MERGED",
            DownloadPhase::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Logs phase transitions for one download.
struct PhaseLog {
    hash: FileHash,
    phase: DownloadPhase,
}

impl PhaseLog {
    fn new(hash: FileHash) -> Self {
        Self {
            hash,
            phase: DownloadPhase::Pending,
        }
    }

    fn advance(&mut self, next: DownloadPhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "illegal download transition {} -> {}",
            self.phase,
            next
        );
        if next.is_terminal() {
            tracing::info!(hash = %self.hash, from = %self.phase, phase = %next, "Download finished");
        } else {
            tracing::debug!(hash = %self.hash, from = %self.phase, phase = %next, "Download phase");
        }
        self.phase = next;
    }

    fn fail(&mut self, error: PeerError) -> PeerError {
        self.advance(DownloadPhase::Failed);
        error
    }
}

/// Mutable state shared by all fetch tasks of one download.
struct DownloadState {
    record: FileRecord,
    /// Indices each holder claimed, as reported by the tracker
    assignments: HashMap<SocketAddr, BTreeSet<PieceIndex>>,
    /// Holders that failed to deliver a given index at least once
    failures: HashMap<PieceIndex, HashSet<SocketAddr>>,
    /// Holders that could not be dialed at all
    unreachable: HashSet<SocketAddr>,
}

impl DownloadState {
    fn new(record: FileRecord, assignments: HashMap<SocketAddr, BTreeSet<PieceIndex>>) -> Self {
        Self {
            record,
            assignments,
            failures: HashMap::new(),
            unreachable: HashSet::new(),
        }
    }

    fn record_failure(&mut self, index: PieceIndex, address: SocketAddr) {
        self.failures.entry(index).or_default().insert(address);
    }

    /// Reachable holders claiming `index`.
    ///
    /// Holders that have not failed this index come first; holders that
    /// failed it before follow, so transient errors get a second attempt.
    /// Ties are broken by address.
    fn fallback_candidates(&self, index: PieceIndex) -> Vec<SocketAddr> {
        let failed = self.failures.get(&index);
        let mut candidates: Vec<(bool, SocketAddr)> = self
            .assignments
            .iter()
            .filter(|(address, claimed)| {
                claimed.contains(&index) && !self.unreachable.contains(*address)
            })
            .map(|(address, _)| (failed.is_some_and(|set| set.contains(address)), *address))
            .collect();
        candidates.sort();
        candidates.into_iter().map(|(_, address)| address).collect()
    }
}

/// Read-only handles plus the shared state, cloned into every fetch task.
struct FetchContext {
    metadata: FileMetadata,
    tracker: Arc<dyn TrackerClient>,
    connector: Arc<dyn PeerConnector>,
    store: Arc<LocalFileStore>,
    fetch_pause: Duration,
    cancel: CancellationToken,
    state: Mutex<DownloadState>,
}

impl FetchContext {
    fn hash(&self) -> FileHash {
        self.metadata.hash
    }

    async fn is_held(&self, index: PieceIndex) -> bool {
        self.state.lock().await.record.has_piece(index)
    }

    async fn record_failure(&self, index: PieceIndex, address: SocketAddr) {
        self.state.lock().await.record_failure(index, address);
    }

    async fn connect(&self, address: SocketAddr) -> Result<Arc<dyn PieceSource>, PeerError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(PeerError::Cancelled),
            source = self.connector.connect(address) => source,
        }
    }

    /// Requests one piece and checks it matches the expected index and length.
    async fn fetch(
        &self,
        source: &dyn PieceSource,
        index: PieceIndex,
    ) -> Result<Piece, PeerError> {
        let piece = tokio::select! {
            _ = self.cancel.cancelled() => return Err(PeerError::Cancelled),
            piece = source.piece(self.hash(), index) => piece?,
        };

        if piece.index != index {
            return Err(PeerError::Remote {
                reason: format!("requested piece {index}, received {}", piece.index),
            });
        }
        let expected = self.metadata.piece_length(index);
        if expected != Some(piece.len() as u64) {
            return Err(PeerError::Remote {
                reason: format!(
                    "piece {index} has {} bytes, expected {}",
                    piece.len(),
                    expected.unwrap_or(0)
                ),
            });
        }
        Ok(piece)
    }

    /// Records an acquired piece unless another task got there first.
    ///
    /// Returns true when the piece was new.
    async fn accept(&self, source: SocketAddr, piece: Piece) -> bool {
        let index = piece.index;
        let mut state = self.state.lock().await;

        if !state.record.insert_piece(piece.clone()) {
            tracing::debug!(hash = %self.hash(), %index, peer = %source, "Discarded duplicate piece");
            return false;
        }
        self.store.publish_piece(self.hash(), piece);

        let report = tokio::select! {
            _ = self.cancel.cancelled() => return true,
            report = self.tracker.post_piece_info(self.hash(), index) => report,
        };
        if let Err(e) = report {
            tracing::warn!(hash = %self.hash(), %index, error = %e, "Failed to report piece to tracker");
        }

        tracing::debug!(
            hash = %self.hash(),
            %index,
            peer = %source,
            collected = state.record.collected(),
            expected = self.metadata.piece_count,
            "Acquired piece"
        );
        true
    }

    async fn pause(&self) -> Result<(), PeerError> {
        if self.fetch_pause.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(PeerError::Cancelled),
            _ = tokio::time::sleep(self.fetch_pause) => Ok(()),
        }
    }
}

/// Walks one holder's claimed indices in order.
///
/// Returns the number of pieces this task contributed. A failure to dial
/// the holder marks it unreachable and returns the dial error; per-index
/// failures are logged and skipped.
async fn fetch_from_peer(
    context: Arc<FetchContext>,
    address: SocketAddr,
    work: Vec<PieceIndex>,
) -> Result<usize, PeerError> {
    let source = match context.connect(address).await {
        Ok(source) => source,
        Err(PeerError::Cancelled) => return Err(PeerError::Cancelled),
        Err(e) => {
            context.state.lock().await.unreachable.insert(address);
            return Err(e);
        }
    };

    let mut acquired = 0;
    for index in work {
        if context.cancel.is_cancelled() {
            return Err(PeerError::Cancelled);
        }
        if context.is_held(index).await {
            continue;
        }

        match context.fetch(source.as_ref(), index).await {
            Ok(piece) => {
                if context.accept(address, piece).await {
                    acquired += 1;
                    context.pause().await?;
                }
            }
            Err(PeerError::Cancelled) => return Err(PeerError::Cancelled),
            Err(e) => {
                tracing::warn!(
                    hash = %context.hash(),
                    %index,
                    peer = %address,
                    error = %e,
                    "Piece fetch failed"
                );
                context.record_failure(index, address).await;
            }
        }
    }

    Ok(acquired)
}

/// Re-requests every still-missing index from the holders that claim it.
async fn fallback_pass(context: &FetchContext, attempts: usize) -> Result<(), PeerError> {
    let missing = context.state.lock().await.record.missing_indices();
    if missing.is_empty() || attempts == 0 {
        return Ok(());
    }

    tracing::debug!(hash = %context.hash(), missing = missing.len(), "Re-routing missing pieces");

    for index in missing {
        let candidates = context.state.lock().await.fallback_candidates(index);
        for address in candidates.into_iter().take(attempts) {
            let source = match context.connect(address).await {
                Ok(source) => source,
                Err(PeerError::Cancelled) => return Err(PeerError::Cancelled),
                Err(e) => {
                    tracing::warn!(hash = %context.hash(), peer = %address, error = %e, "Fallback dial failed");
                    context.state.lock().await.unreachable.insert(address);
                    continue;
                }
            };

            match context.fetch(source.as_ref(), index).await {
                Ok(piece) => {
                    context.accept(address, piece).await;
                    context.pause().await?;
                    break;
                }
                Err(PeerError::Cancelled) => return Err(PeerError::Cancelled),
                Err(e) => {
                    tracing::warn!(
                        hash = %context.hash(),
                        %index,
                        peer = %address,
                        error = %e,
                        "Fallback fetch failed"
                    );
                    context.record_failure(index, address).await;
                }
            }
        }
    }

    Ok(())
}

/// Fetches file metadata and holders from the tracker.
async fn resolve(
    tracker: &dyn TrackerClient,
    hash: FileHash,
    cancel: &CancellationToken,
) -> Result<(FileMetadata, Vec<PeerAvailability>), PeerError> {
    tokio::select! {
        _ = cancel.cancelled() => Err(PeerError::Cancelled),
        resolved = async {
            let metadata = tracker.file_info(hash).await?;
            let peers = tracker.peers(hash).await?;
            Ok::<_, PeerError>((metadata, peers))
        } => resolved,
    }
}

/// Builds per-holder work lists, skipping this node and invalid indices.
fn partition(
    own_address: SocketAddr,
    metadata: &FileMetadata,
    peers: Vec<PeerAvailability>,
) -> HashMap<SocketAddr, BTreeSet<PieceIndex>> {
    peers
        .into_iter()
        .filter(|peer| peer.address != own_address)
        .map(|peer| {
            let claimed: BTreeSet<PieceIndex> = peer
                .pieces
                .into_iter()
                .filter(|index| metadata.contains_index(*index))
                .collect();
            (peer.address, claimed)
        })
        .filter(|(_, claimed)| !claimed.is_empty())
        .collect()
}

/// Resolves the output location inside `download_dir`.
///
/// Only the final component of the announced name is used, so a remote
/// name can never escape the directory.
pub(crate) fn output_path(download_dir: &Path, name: &str) -> Result<PathBuf, FileError> {
    let base = Path::new(name)
        .file_name()
        .ok_or_else(|| FileError::InvalidPath {
            reason: format!("announced name {name:?} has no base name"),
        })?;
    Ok(download_dir.join(base))
}

pub(crate) async fn run(
    node: &PeerNode,
    hash: FileHash,
    cancel: CancellationToken,
) -> Result<PathBuf, PeerError> {
    let mut phase = PhaseLog::new(hash);
    phase.advance(DownloadPhase::Resolving);

    let (metadata, peers) = match resolve(node.tracker().as_ref(), hash, &cancel).await {
        Ok(resolved) => resolved,
        Err(e) => return Err(phase.fail(e)),
    };

    let assignments = partition(node.address(), &metadata, peers);
    let record = node.store().begin_download(&metadata);
    tracing::info!(
        %hash,
        name = %metadata.name,
        pieces = metadata.piece_count,
        held = record.collected(),
        sources = assignments.len(),
        "Starting download"
    );

    let context = Arc::new(FetchContext {
        metadata,
        tracker: node.tracker().clone(),
        connector: node.connector().clone(),
        store: node.store().clone(),
        fetch_pause: node.config().fetch_pause,
        cancel,
        state: Mutex::new(DownloadState::new(record, assignments.clone())),
    });

    phase.advance(DownloadPhase::Fetching);

    let mut tasks = JoinSet::new();
    for (address, claimed) in assignments {
        let context = context.clone();
        tasks.spawn(fetch_from_peer(context, address, claimed.into_iter().collect()));
    }

    let mut cancelled = false;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(acquired)) => {
                tracing::debug!(%hash, acquired, "Fetch task finished");
            }
            Ok(Err(PeerError::Cancelled)) => cancelled = true,
            Ok(Err(e)) => {
                tracing::warn!(%hash, error = %e, "Fetch task failed, its pieces fall back to other holders");
            }
            Err(join_error) => {
                tasks.abort_all();
                return Err(phase.fail(PeerError::TaskFailed {
                    reason: join_error.to_string(),
                }));
            }
        }
    }
    if cancelled || context.cancel.is_cancelled() {
        return Err(phase.fail(PeerError::Cancelled));
    }

    if let Err(e) = fallback_pass(&context, node.config().fallback_attempts).await {
        return Err(phase.fail(e));
    }

    let record = context.state.lock().await.record.clone();
    if !record.is_complete() {
        phase.advance(DownloadPhase::Partial);
        return Err(phase.fail(PeerError::Incomplete {
            collected: record.collected(),
            expected: record.metadata().piece_count as usize,
        }));
    }
    phase.advance(DownloadPhase::Complete);

    let content = match record.merge() {
        Ok(content) => content,
        Err(e) => {
            if let FileError::HashMismatch { expected, actual } = &e {
                tracing::error!(%expected, %actual, "Reassembled file failed verification, discarding");
                node.store().discard(hash);
            }
            return Err(phase.fail(e.into()));
        }
    };

    let written = async {
        let path = output_path(&node.config().download_dir, record.name())?;
        tokio::fs::create_dir_all(&node.config().download_dir).await?;
        tokio::fs::write(&path, &content).await?;
        Ok::<_, PeerError>(path)
    }
    .await;

    let path = match written {
        Ok(path) => path,
        Err(e) => return Err(phase.fail(e)),
    };

    node.store().insert_complete(record);
    phase.advance(DownloadPhase::Merged);
    tracing::info!(%hash, path = %path.display(), bytes = content.len(), "Download written");
    Ok(path)
}
