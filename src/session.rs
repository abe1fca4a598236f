//! Stream session coordination: one state machine cell per
//! (answer-slot × model) pair, concurrent fan-out over the SSE transport,
//! deterministic all-done detection, and the two-slot battle extension.
//!
//! ## Design
//! - `apply_event` is a pure transition function `(CellState, StreamEvent) ->
//!   CellState`; every terminal guard lives there, not in callbacks.
//! - The coordinator owns one authoritative `SessionSnapshot` behind a mutex
//!   and publishes whole-snapshot copies through a `tokio::sync::watch`
//!   channel, so a consumer always observes a self-consistent state.
//! - Every in-flight call carries a `CancellationToken` plus the generation
//!   number of the submission that started it; a resubmission or reset bumps
//!   the generation, cancels all tokens, and replaces the snapshot, so stale
//!   callbacks are discarded instead of mutating the new session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Error, Result};
use crate::events::{AnswerResult, BattleResult, StreamEvent};
use crate::sse::fetch_sse;

/// Upper bound on answer slots per submission (2 = battle mode).
pub const MAX_SLOTS: usize = 2;

pub type SlotId = String;
pub type ModelId = u64;

// ---------------------------------------------------------------------------
// Cell state machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellStatus {
    Thinking,
    Streaming,
    Done,
    Error,
}

impl CellStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CellStatus::Done | CellStatus::Error)
    }
}

/// A typo-correction note for a slot's answer. `corrected: None` means the
/// backend looked and found nothing to fix.
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub original: String,
    pub corrected: Option<String>,
}

/// Live state of one (slot × model) evaluation stream.
#[derive(Debug, Clone, PartialEq)]
pub struct CellState {
    pub status: CellStatus,
    pub thinking_text: String,
    pub content_text: String,
    pub result: Option<AnswerResult>,
    pub error: Option<String>,
    pub correction: Option<Correction>,
}

impl CellState {
    pub fn new() -> Self {
        CellState {
            status: CellStatus::Thinking,
            thinking_text: String::new(),
            content_text: String::new(),
            result: None,
            error: None,
            correction: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

impl Default for CellState {
    fn default() -> Self {
        Self::new()
    }
}

/// Pure transition function for one cell.
///
/// Once a cell is terminal (`Done`/`Error`) every further event is a no-op: a
/// late `done` is benign, anything else is a protocol violation that must not
/// crash the session.
pub fn apply_event(cell: &CellState, event: &StreamEvent) -> CellState {
    let mut next = cell.clone();
    if cell.is_terminal() {
        return next;
    }
    match event {
        StreamEvent::Thinking { content } => {
            next.status = CellStatus::Thinking;
            next.thinking_text.push_str(content);
        }
        StreamEvent::Content { content } => {
            next.status = CellStatus::Streaming;
            next.content_text.push_str(content);
        }
        StreamEvent::Correction { original, corrected } => {
            next.correction = Some(Correction {
                original: original.clone(),
                corrected: corrected.clone(),
            });
        }
        StreamEvent::Result(result) => {
            next.result = Some((**result).clone());
            next.status = CellStatus::Done;
        }
        StreamEvent::Error { detail } => {
            next.error = Some(detail.clone());
            next.status = CellStatus::Error;
        }
        // Stream closed (or explicit done) without a terminal event: keep
        // whatever partial state exists and mark the cell finished.
        StreamEvent::Done => {
            next.status = CellStatus::Done;
        }
        // battleResult never belongs to a cell stream.
        StreamEvent::BattleResult(_) => {}
    }
    next
}

// ---------------------------------------------------------------------------
// Battle and follow-up states (single-cell-like, keyed apart from the map)
// ---------------------------------------------------------------------------

/// State of the head-to-head analysis stream issued after a two-slot
/// submission finishes.
#[derive(Debug, Clone, PartialEq)]
pub struct BattleState {
    pub status: CellStatus,
    pub thinking_text: String,
    pub content_text: String,
    pub result: Option<BattleResult>,
    pub error: Option<String>,
}

impl BattleState {
    pub fn new() -> Self {
        BattleState {
            status: CellStatus::Thinking,
            thinking_text: String::new(),
            content_text: String::new(),
            result: None,
            error: None,
        }
    }
}

impl Default for BattleState {
    fn default() -> Self {
        Self::new()
    }
}

pub fn apply_battle_event(state: &BattleState, event: &StreamEvent) -> BattleState {
    let mut next = state.clone();
    if state.status.is_terminal() {
        return next;
    }
    match event {
        StreamEvent::Thinking { content } => {
            next.status = CellStatus::Thinking;
            next.thinking_text.push_str(content);
        }
        StreamEvent::Content { content } => {
            next.status = CellStatus::Streaming;
            next.content_text.push_str(content);
        }
        StreamEvent::BattleResult(result) => {
            next.result = Some((**result).clone());
            next.status = CellStatus::Done;
        }
        StreamEvent::Error { detail } => {
            next.error = Some(detail.clone());
            next.status = CellStatus::Error;
        }
        StreamEvent::Done => {
            next.status = CellStatus::Done;
        }
        StreamEvent::Result(_) | StreamEvent::Correction { .. } => {}
    }
    next
}

/// State of one follow-up question stream; its terminal event is a bare
/// `done`, the accumulated `content_text` is the answer.
#[derive(Debug, Clone, PartialEq)]
pub struct FollowUpState {
    pub status: CellStatus,
    pub thinking_text: String,
    pub content_text: String,
    pub error: Option<String>,
}

impl FollowUpState {
    pub fn new() -> Self {
        FollowUpState {
            status: CellStatus::Thinking,
            thinking_text: String::new(),
            content_text: String::new(),
            error: None,
        }
    }
}

impl Default for FollowUpState {
    fn default() -> Self {
        Self::new()
    }
}

pub fn apply_follow_up_event(state: &FollowUpState, event: &StreamEvent) -> FollowUpState {
    let mut next = state.clone();
    if state.status.is_terminal() {
        return next;
    }
    match event {
        StreamEvent::Thinking { content } => {
            next.status = CellStatus::Thinking;
            next.thinking_text.push_str(content);
        }
        StreamEvent::Content { content } => {
            next.status = CellStatus::Streaming;
            next.content_text.push_str(content);
        }
        StreamEvent::Done => {
            next.status = CellStatus::Done;
        }
        StreamEvent::Error { detail } => {
            next.error = Some(detail.clone());
            next.status = CellStatus::Error;
        }
        StreamEvent::Result(_)
        | StreamEvent::BattleResult(_)
        | StreamEvent::Correction { .. } => {}
    }
    next
}

// ---------------------------------------------------------------------------
// Slots and session snapshot
// ---------------------------------------------------------------------------

/// A participant reference. Threaded through the slot explicitly instead of a
/// process-wide "current user" singleton.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRef {
    pub id: u64,
    pub label: String,
}

/// An interviewer-role selection forwarded to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleRef {
    pub role_key: String,
    pub difficulty_level: Option<String>,
}

/// One participant's answer within a submission.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerSlot {
    pub id: SlotId,
    pub user: Option<UserRef>,
    pub answer: String,
}

impl AnswerSlot {
    pub fn new() -> Self {
        AnswerSlot {
            id: uuid::Uuid::new_v4().to_string(),
            user: None,
            answer: String::new(),
        }
    }

    pub fn with_user(user: UserRef, answer: impl Into<String>) -> Self {
        AnswerSlot {
            id: uuid::Uuid::new_v4().to_string(),
            user: Some(user),
            answer: answer.into(),
        }
    }

    /// A slot is submittable only with a user and a non-empty trimmed answer.
    pub fn is_valid(&self) -> bool {
        self.user.is_some() && !self.answer.trim().is_empty()
    }
}

impl Default for AnswerSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Input,
    Running,
    Result,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CellKey {
    pub slot: SlotId,
    pub model: ModelId,
}

/// The validated, frozen view of a slot inside a running session.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotView {
    pub id: SlotId,
    pub user_id: u64,
    pub user_label: String,
    pub answer: String,
}

/// A self-consistent snapshot of the whole session, replaced atomically on
/// every update.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub phase: Phase,
    pub generation: u64,
    pub question_id: Option<u64>,
    pub slots: Vec<SlotView>,
    pub model_ids: Vec<ModelId>,
    pub cells: HashMap<CellKey, CellState>,
    /// True when the submission had exactly two valid slots; a battle stream
    /// will follow once every cell is terminal.
    pub battle_expected: bool,
    pub battle: Option<BattleState>,
    pub follow_up: Option<FollowUpState>,
}

impl SessionSnapshot {
    pub fn empty() -> Self {
        SessionSnapshot {
            phase: Phase::Input,
            generation: 0,
            question_id: None,
            slots: Vec::new(),
            model_ids: Vec::new(),
            cells: HashMap::new(),
            battle_expected: false,
            battle: None,
            follow_up: None,
        }
    }

    /// Non-empty cell map AND every cell terminal.
    pub fn all_done(&self) -> bool {
        !self.cells.is_empty() && self.cells.values().all(CellState::is_terminal)
    }

    /// This slot's cells in the submission's model order (deterministic, so
    /// tie-breaks in aggregation are stable).
    pub fn cells_for_slot(&self, slot: &SlotId) -> Vec<&CellState> {
        self.model_ids
            .iter()
            .filter_map(|model| {
                self.cells.get(&CellKey { slot: slot.clone(), model: *model })
            })
            .collect()
    }

    /// True once nothing more will arrive: the result phase was reached and
    /// the battle stream (when one is expected) has finished too.
    pub fn settled(&self) -> bool {
        self.phase == Phase::Result
            && (!self.battle_expected
                || self
                    .battle
                    .as_ref()
                    .is_some_and(|b| b.status.is_terminal()))
    }
}

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

/// The three streaming endpoints sharing one framing and event vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEndpoint {
    SubmitAnswer,
    FollowUp,
    BattleAnalysis,
}

impl StreamEndpoint {
    pub fn path(self) -> &'static str {
        match self {
            StreamEndpoint::SubmitAnswer => "/answers/submit-stream/",
            StreamEndpoint::FollowUp => "/answers/follow-up-stream/",
            StreamEndpoint::BattleAnalysis => "/answers/battle-analysis-stream/",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub endpoint: StreamEndpoint,
    pub body: serde_json::Value,
}

pub type EventSink = Box<dyn FnMut(StreamEvent) + Send + 'static>;

/// Seam between the coordinator and the wire. Production uses
/// [`HttpTransport`]; tests substitute a scripted implementation.
pub trait StreamTransport: Send + Sync + 'static {
    /// Open one stream. The returned future resolves when the stream closes,
    /// fails, or is cancelled; `on_event` is invoked for every decoded event
    /// before that.
    fn open(
        &self,
        request: StreamRequest,
        cancel: CancellationToken,
        on_event: EventSink,
    ) -> BoxFuture<'static, Result<()>>;
}

/// Real transport: streamed POSTs against the configured backend.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        HttpTransport { client, base_url: base_url.into() }
    }
}

impl StreamTransport for HttpTransport {
    fn open(
        &self,
        request: StreamRequest,
        cancel: CancellationToken,
        mut on_event: EventSink,
    ) -> BoxFuture<'static, Result<()>> {
        let client = self.client.clone();
        let url = format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            request.endpoint.path()
        );
        Box::pin(async move {
            fetch_sse(&client, &url, &request.body, &cancel, |event| on_event(event)).await
        })
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

struct CoordinatorState {
    generation: u64,
    snapshot: SessionSnapshot,
    cancels: Vec<CancellationToken>,
}

/// Owns the session state machine and the fan-out of transport calls.
///
/// Cloning is cheap; clones share the same session.
#[derive(Clone)]
pub struct SessionCoordinator {
    transport: Arc<dyn StreamTransport>,
    state: Arc<Mutex<CoordinatorState>>,
    watch_tx: watch::Sender<SessionSnapshot>,
}

impl SessionCoordinator {
    pub fn new(transport: Arc<dyn StreamTransport>) -> Self {
        let snapshot = SessionSnapshot::empty();
        let (watch_tx, _) = watch::channel(snapshot.clone());
        SessionCoordinator {
            transport,
            state: Arc::new(Mutex::new(CoordinatorState {
                generation: 0,
                snapshot,
                cancels: Vec::new(),
            })),
            watch_tx,
        }
    }

    /// Subscribe to snapshot updates. The receiver always holds the latest
    /// self-consistent snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.watch_tx.subscribe()
    }

    /// The latest snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.watch_tx.borrow().clone()
    }

    /// Start one evaluation stream per valid-slot × model combination.
    ///
    /// Cancels every in-flight call from the previous submission and replaces
    /// (never merges) the cell map. Must be called from within a tokio
    /// runtime.
    pub fn submit(
        &self,
        slots: &[AnswerSlot],
        model_ids: &[ModelId],
        question_id: u64,
        role: Option<&RoleRef>,
    ) -> Result<()> {
        let valid: Vec<&AnswerSlot> = slots.iter().filter(|s| s.is_valid()).collect();
        if valid.is_empty() {
            return Err(Error::Session(
                "at least one slot needs a user and a non-empty answer".to_string(),
            ));
        }
        if valid.len() > MAX_SLOTS {
            return Err(Error::Session(format!(
                "at most {} answer slots per submission",
                MAX_SLOTS
            )));
        }
        if model_ids.is_empty() {
            return Err(Error::Session("select at least one model".to_string()));
        }

        let slot_views: Vec<SlotView> = valid
            .iter()
            .map(|s| {
                let user = s.user.as_ref().cloned().unwrap_or(UserRef {
                    id: 0,
                    label: String::new(),
                });
                SlotView {
                    id: s.id.clone(),
                    user_id: user.id,
                    user_label: user.label,
                    answer: s.answer.trim().to_string(),
                }
            })
            .collect();

        // Replace state under the lock: bump generation, cancel the previous
        // submission, install the new snapshot and one token per cell.
        let (generation, tokens) = {
            let Ok(mut guard) = self.state.lock() else {
                return Err(Error::Session("session state unavailable".to_string()));
            };
            guard.generation += 1;
            let generation = guard.generation;
            for token in guard.cancels.drain(..) {
                token.cancel();
            }

            let mut cells = HashMap::new();
            let mut tokens = Vec::new();
            for view in &slot_views {
                for model in model_ids {
                    cells.insert(
                        CellKey { slot: view.id.clone(), model: *model },
                        CellState::new(),
                    );
                    let token = CancellationToken::new();
                    guard.cancels.push(token.clone());
                    tokens.push((view.clone(), *model, token));
                }
            }

            let snapshot = SessionSnapshot {
                phase: Phase::Running,
                generation,
                question_id: Some(question_id),
                slots: slot_views.clone(),
                model_ids: model_ids.to_vec(),
                cells,
                battle_expected: slot_views.len() == 2,
                battle: None,
                follow_up: None,
            };
            guard.snapshot = snapshot.clone();
            self.watch_tx.send_replace(snapshot);
            (generation, tokens)
        };

        // Open all transports outside the lock (fan-out, no ordering between
        // cells), then supervise them from a single task.
        let mut cell_futs = Vec::new();
        for (view, model, token) in tokens {
            let key = CellKey { slot: view.id.clone(), model };
            let body = submit_body(&view, model, question_id, role);
            let this = self.clone();
            let sink_key = key.clone();
            let sink: EventSink = Box::new(move |event| {
                this.apply_cell(generation, sink_key.clone(), event);
            });
            let fut = self.transport.open(
                StreamRequest { endpoint: StreamEndpoint::SubmitAnswer, body },
                token,
                sink,
            );
            cell_futs.push((key, fut));
        }

        let this = self.clone();
        tokio::spawn(async move {
            let wrapped = cell_futs.into_iter().map(|(key, fut)| {
                let this = this.clone();
                async move {
                    match fut.await {
                        // Stream closed cleanly; a benign done settles any
                        // cell the server left without a terminal event.
                        Ok(()) => this.apply_cell(generation, key, StreamEvent::Done),
                        Err(err) if err.is_cancelled() => {}
                        Err(err) => {
                            warn!(slot = %key.slot, model = key.model, %err, "cell stream failed");
                            this.apply_cell(
                                generation,
                                key,
                                StreamEvent::Error { detail: err.to_string() },
                            );
                        }
                    }
                }
            });
            futures_util::future::join_all(wrapped).await;
            this.run_battle_if_expected(generation).await;
        });

        Ok(())
    }

    /// Cancel everything in flight and return to the input phase with an
    /// empty cell map.
    pub fn reset(&self) {
        let Ok(mut guard) = self.state.lock() else {
            return;
        };
        guard.generation += 1;
        for token in guard.cancels.drain(..) {
            token.cancel();
        }
        let mut snapshot = SessionSnapshot::empty();
        snapshot.generation = guard.generation;
        guard.snapshot = snapshot.clone();
        self.watch_tx.send_replace(snapshot);
    }

    /// Open one follow-up question stream against an existing answer record.
    pub fn follow_up(
        &self,
        record_id: u64,
        user_question: impl Into<String>,
        model_id: Option<ModelId>,
    ) -> Result<()> {
        let question = user_question.into();
        if question.trim().is_empty() {
            return Err(Error::Session("follow-up question is empty".to_string()));
        }

        let (generation, token) = {
            let Ok(mut guard) = self.state.lock() else {
                return Err(Error::Session("session state unavailable".to_string()));
            };
            let generation = guard.generation;
            let token = CancellationToken::new();
            guard.cancels.push(token.clone());
            let mut snapshot = guard.snapshot.clone();
            snapshot.follow_up = Some(FollowUpState::new());
            guard.snapshot = snapshot.clone();
            self.watch_tx.send_replace(snapshot);
            (generation, token)
        };

        let mut body = serde_json::json!({
            "record_id": record_id,
            "question": question.trim(),
        });
        if let Some(model) = model_id {
            body["model_id"] = serde_json::json!(model);
        }

        let this = self.clone();
        let sink: EventSink = Box::new(move |event| {
            this.apply_follow_up(generation, event);
        });
        let fut = self.transport.open(
            StreamRequest { endpoint: StreamEndpoint::FollowUp, body },
            token,
            sink,
        );

        let this = self.clone();
        tokio::spawn(async move {
            match fut.await {
                Ok(()) => this.apply_follow_up(generation, StreamEvent::Done),
                Err(err) if err.is_cancelled() => {}
                Err(err) => {
                    warn!(%err, "follow-up stream failed");
                    this.apply_follow_up(generation, StreamEvent::Error { detail: err.to_string() });
                }
            }
        });

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internal: state application (all guarded by the generation counter)
    // -----------------------------------------------------------------------

    fn apply_cell(&self, generation: u64, key: CellKey, event: StreamEvent) {
        let Ok(mut guard) = self.state.lock() else {
            return;
        };
        if guard.generation != generation {
            return; // superseded submission
        }
        let Some(cell) = guard.snapshot.cells.get(&key) else {
            return;
        };
        let next = apply_event(cell, &event);

        let mut snapshot = guard.snapshot.clone();
        snapshot.cells.insert(key, next);
        // Re-evaluated after every individual update; computed, never set
        // manually, and idempotent once in Result.
        if snapshot.phase == Phase::Running && snapshot.all_done() {
            snapshot.phase = Phase::Result;
        }
        guard.snapshot = snapshot.clone();
        self.watch_tx.send_replace(snapshot);
    }

    fn apply_battle(&self, generation: u64, event: StreamEvent) {
        let Ok(mut guard) = self.state.lock() else {
            return;
        };
        if guard.generation != generation {
            return;
        }
        let Some(battle) = guard.snapshot.battle.as_ref() else {
            return;
        };
        let next = apply_battle_event(battle, &event);
        let mut snapshot = guard.snapshot.clone();
        snapshot.battle = Some(next);
        guard.snapshot = snapshot.clone();
        self.watch_tx.send_replace(snapshot);
    }

    fn apply_follow_up(&self, generation: u64, event: StreamEvent) {
        let Ok(mut guard) = self.state.lock() else {
            return;
        };
        if guard.generation != generation {
            return;
        }
        let Some(state) = guard.snapshot.follow_up.as_ref() else {
            return;
        };
        let next = apply_follow_up_event(state, &event);
        let mut snapshot = guard.snapshot.clone();
        snapshot.follow_up = Some(next);
        guard.snapshot = snapshot.clone();
        self.watch_tx.send_replace(snapshot);
    }

    /// After every cell of a two-slot submission is terminal, issue the one
    /// battle-analysis stream carrying both answers and each slot's completed
    /// scores.
    async fn run_battle_if_expected(&self, generation: u64) {
        let (body, token) = {
            let Ok(mut guard) = self.state.lock() else {
                return;
            };
            if guard.generation != generation {
                return;
            }
            if !guard.snapshot.battle_expected || guard.snapshot.slots.len() != 2 {
                return;
            }
            let Some(question_id) = guard.snapshot.question_id else {
                return;
            };

            let a = &guard.snapshot.slots[0];
            let b = &guard.snapshot.slots[1];
            let body = serde_json::json!({
                "question_id": question_id,
                "user_a_id": a.user_id,
                "user_a_name": a.user_label,
                "user_a_answer": a.answer,
                "user_a_scores": score_summary(&guard.snapshot, &a.id),
                "user_b_id": b.user_id,
                "user_b_name": b.user_label,
                "user_b_answer": b.answer,
                "user_b_scores": score_summary(&guard.snapshot, &b.id),
            });

            let token = CancellationToken::new();
            guard.cancels.push(token.clone());
            let mut snapshot = guard.snapshot.clone();
            snapshot.battle = Some(BattleState::new());
            guard.snapshot = snapshot.clone();
            self.watch_tx.send_replace(snapshot);
            (body, token)
        };

        let this = self.clone();
        let sink: EventSink = Box::new(move |event| {
            this.apply_battle(generation, event);
        });
        let fut = self.transport.open(
            StreamRequest { endpoint: StreamEndpoint::BattleAnalysis, body },
            token,
            sink,
        );
        match fut.await {
            Ok(()) => self.apply_battle(generation, StreamEvent::Done),
            Err(err) if err.is_cancelled() => {}
            Err(err) => {
                warn!(%err, "battle stream failed");
                self.apply_battle(generation, StreamEvent::Error { detail: err.to_string() });
            }
        }
    }
}

/// Request body for one cell's submit-answer stream.
fn submit_body(
    view: &SlotView,
    model: ModelId,
    question_id: u64,
    role: Option<&RoleRef>,
) -> serde_json::Value {
    let mut body = serde_json::json!({
        "user_id": view.user_id,
        "question_id": question_id,
        "answer": view.answer,
        "model_id": model,
    });
    if let Some(role) = role {
        body["role_key"] = serde_json::json!(role.role_key);
        if let Some(level) = &role.difficulty_level {
            body["difficulty_level"] = serde_json::json!(level);
        }
    }
    body
}

/// Join a slot's completed scores into one annotated summary string, e.g.
/// `"gpt-4o: 82, deepseek-v3: 76"`. Cells without a result are skipped.
fn score_summary(snapshot: &SessionSnapshot, slot: &SlotId) -> String {
    snapshot
        .cells_for_slot(slot)
        .iter()
        .zip(snapshot.model_ids.iter())
        .filter_map(|(cell, model)| {
            cell.result.as_ref().map(|r| {
                let name = if r.ai_model_name.is_empty() {
                    format!("model {}", model)
                } else {
                    r.ai_model_name.clone()
                };
                format!("{}: {}", name, r.ai_score)
            })
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result_with_score(score: u32) -> AnswerResult {
        AnswerResult {
            id: 1,
            user: 1,
            question: 1,
            question_title: String::new(),
            category_name: String::new(),
            user_answer: String::new(),
            corrected_answer: String::new(),
            ai_score: score,
            ai_highlights: vec![],
            ai_missing_points: vec![],
            ai_suggestion: String::new(),
            ai_improved_answer: String::new(),
            ai_role_scores: vec![],
            ai_model_name: "test-model".to_string(),
            created_at: String::new(),
            usage: None,
        }
    }

    // -- apply_event: accumulation -------------------------------------------

    #[test]
    fn test_thinking_appends_in_order() {
        let mut cell = CellState::new();
        for part in ["a", "b", "c"] {
            cell = apply_event(&cell, &StreamEvent::Thinking { content: part.to_string() });
        }
        assert_eq!(cell.thinking_text, "abc");
        assert_eq!(cell.status, CellStatus::Thinking);
    }

    #[test]
    fn test_first_content_leaves_thinking() {
        let cell = apply_event(
            &CellState::new(),
            &StreamEvent::Content { content: "x".to_string() },
        );
        assert_eq!(cell.status, CellStatus::Streaming);
        assert_eq!(cell.content_text, "x");
    }

    #[test]
    fn test_thinking_and_content_accumulate_independently() {
        let mut cell = CellState::new();
        cell = apply_event(&cell, &StreamEvent::Thinking { content: "think".to_string() });
        cell = apply_event(&cell, &StreamEvent::Content { content: "out".to_string() });
        cell = apply_event(&cell, &StreamEvent::Content { content: "put".to_string() });
        assert_eq!(cell.thinking_text, "think");
        assert_eq!(cell.content_text, "output");
    }

    // -- apply_event: terminals ----------------------------------------------

    #[test]
    fn test_result_is_terminal() {
        let cell = apply_event(
            &CellState::new(),
            &StreamEvent::Result(Box::new(result_with_score(80))),
        );
        assert_eq!(cell.status, CellStatus::Done);
        assert_eq!(cell.result.as_ref().map(|r| r.ai_score), Some(80));
    }

    #[test]
    fn test_error_is_terminal() {
        let cell = apply_event(
            &CellState::new(),
            &StreamEvent::Error { detail: "timeout".to_string() },
        );
        assert_eq!(cell.status, CellStatus::Error);
        assert_eq!(cell.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_late_done_after_result_is_noop() {
        let done = apply_event(
            &CellState::new(),
            &StreamEvent::Result(Box::new(result_with_score(70))),
        );
        let after = apply_event(&done, &StreamEvent::Done);
        assert_eq!(after, done);
    }

    #[test]
    fn test_events_after_terminal_ignored() {
        let done = apply_event(
            &CellState::new(),
            &StreamEvent::Result(Box::new(result_with_score(70))),
        );
        for event in [
            StreamEvent::Thinking { content: "late".to_string() },
            StreamEvent::Content { content: "late".to_string() },
            StreamEvent::Error { detail: "late".to_string() },
            StreamEvent::Result(Box::new(result_with_score(99))),
        ] {
            assert_eq!(apply_event(&done, &event), done);
        }
    }

    #[test]
    fn test_done_without_terminal_keeps_partial_state() {
        let mut cell = CellState::new();
        cell = apply_event(&cell, &StreamEvent::Content { content: "partial".to_string() });
        cell = apply_event(&cell, &StreamEvent::Done);
        assert_eq!(cell.status, CellStatus::Done);
        assert_eq!(cell.content_text, "partial");
        assert!(cell.result.is_none());
    }

    #[test]
    fn test_correction_sets_field_once() {
        let cell = apply_event(
            &CellState::new(),
            &StreamEvent::Correction {
                original: "teh cache".to_string(),
                corrected: Some("the cache".to_string()),
            },
        );
        let correction = cell.correction.expect("correction set");
        assert_eq!(correction.corrected.as_deref(), Some("the cache"));
        assert_eq!(cell.status, CellStatus::Thinking);
    }

    #[test]
    fn test_battle_result_ignored_by_cell() {
        let cell = apply_event(
            &CellState::new(),
            &StreamEvent::BattleResult(Box::new(BattleResult {
                winner: "A".to_string(),
                score_a: 1,
                score_b: 2,
                summary: String::new(),
                a_can_learn_from_b: vec![],
                b_can_learn_from_a: vec![],
                common_missing: vec![],
            })),
        );
        assert_eq!(cell, CellState::new());
    }

    // -- battle / follow-up state machines ------------------------------------

    #[test]
    fn test_battle_terminal_is_battle_result() {
        let state = apply_battle_event(
            &BattleState::new(),
            &StreamEvent::BattleResult(Box::new(BattleResult {
                winner: "B".to_string(),
                score_a: 60,
                score_b: 75,
                summary: "B was sharper".to_string(),
                a_can_learn_from_b: vec![],
                b_can_learn_from_a: vec![],
                common_missing: vec![],
            })),
        );
        assert_eq!(state.status, CellStatus::Done);
        assert_eq!(state.result.as_ref().map(|r| r.score_b), Some(75));
    }

    #[test]
    fn test_battle_ignores_answer_result() {
        let state = apply_battle_event(
            &BattleState::new(),
            &StreamEvent::Result(Box::new(result_with_score(50))),
        );
        assert_eq!(state, BattleState::new());
    }

    #[test]
    fn test_follow_up_done_is_terminal() {
        let mut state = FollowUpState::new();
        state = apply_follow_up_event(
            &state,
            &StreamEvent::Content { content: "because".to_string() },
        );
        state = apply_follow_up_event(&state, &StreamEvent::Done);
        assert_eq!(state.status, CellStatus::Done);
        assert_eq!(state.content_text, "because");
        let after = apply_follow_up_event(
            &state,
            &StreamEvent::Content { content: "late".to_string() },
        );
        assert_eq!(after, state);
    }

    // -- slots ----------------------------------------------------------------

    #[test]
    fn test_slot_invalid_without_user() {
        let mut slot = AnswerSlot::new();
        slot.answer = "an answer".to_string();
        assert!(!slot.is_valid());
    }

    #[test]
    fn test_slot_invalid_with_whitespace_answer() {
        let slot = AnswerSlot::with_user(UserRef { id: 1, label: "a".to_string() }, "   ");
        assert!(!slot.is_valid());
    }

    #[test]
    fn test_slot_valid_with_user_and_answer() {
        let slot = AnswerSlot::with_user(UserRef { id: 1, label: "a".to_string() }, "hash maps");
        assert!(slot.is_valid());
    }

    #[test]
    fn test_slot_ids_unique() {
        assert_ne!(AnswerSlot::new().id, AnswerSlot::new().id);
    }

    // -- snapshot -------------------------------------------------------------

    #[test]
    fn test_empty_snapshot_not_all_done() {
        assert!(!SessionSnapshot::empty().all_done());
    }

    #[test]
    fn test_all_done_requires_every_cell_terminal() {
        let mut snap = SessionSnapshot::empty();
        let done = apply_event(
            &CellState::new(),
            &StreamEvent::Result(Box::new(result_with_score(80))),
        );
        snap.cells.insert(CellKey { slot: "s1".to_string(), model: 1 }, done);
        snap.cells
            .insert(CellKey { slot: "s1".to_string(), model: 2 }, CellState::new());
        assert!(!snap.all_done());

        let err = apply_event(
            &CellState::new(),
            &StreamEvent::Error { detail: "x".to_string() },
        );
        snap.cells.insert(CellKey { slot: "s1".to_string(), model: 2 }, err);
        assert!(snap.all_done());
    }

    #[test]
    fn test_cells_for_slot_follows_model_order() {
        let mut snap = SessionSnapshot::empty();
        snap.model_ids = vec![9, 3, 7];
        for model in [3u64, 7, 9] {
            let mut cell = CellState::new();
            cell.content_text = format!("m{}", model);
            snap.cells.insert(CellKey { slot: "s1".to_string(), model }, cell);
        }
        let ordered: Vec<&str> = snap
            .cells_for_slot(&"s1".to_string())
            .iter()
            .map(|c| c.content_text.as_str())
            .collect();
        assert_eq!(ordered, vec!["m9", "m3", "m7"]);
    }

    #[test]
    fn test_settled_waits_for_battle() {
        let mut snap = SessionSnapshot::empty();
        snap.phase = Phase::Result;
        snap.battle_expected = true;
        assert!(!snap.settled());
        snap.battle = Some(BattleState::new());
        assert!(!snap.settled());
        let mut battle = BattleState::new();
        battle.status = CellStatus::Done;
        snap.battle = Some(battle);
        assert!(snap.settled());
    }

    #[test]
    fn test_settled_without_battle() {
        let mut snap = SessionSnapshot::empty();
        snap.phase = Phase::Result;
        assert!(snap.settled());
    }

    // -- helpers ---------------------------------------------------------------

    #[test]
    fn test_score_summary_joins_model_and_score() {
        let mut snap = SessionSnapshot::empty();
        snap.model_ids = vec![1, 2];
        let mut with_result = CellState::new();
        with_result.result = Some(result_with_score(82));
        with_result.status = CellStatus::Done;
        snap.cells
            .insert(CellKey { slot: "s1".to_string(), model: 1 }, with_result);
        let mut failed = CellState::new();
        failed.status = CellStatus::Error;
        failed.error = Some("x".to_string());
        snap.cells.insert(CellKey { slot: "s1".to_string(), model: 2 }, failed);

        assert_eq!(score_summary(&snap, &"s1".to_string()), "test-model: 82");
    }

    #[test]
    fn test_submit_body_includes_role_when_present() {
        let view = SlotView {
            id: "s1".to_string(),
            user_id: 4,
            user_label: "Ada".to_string(),
            answer: "an answer".to_string(),
        };
        let role = RoleRef {
            role_key: "senior".to_string(),
            difficulty_level: Some("hard".to_string()),
        };
        let body = submit_body(&view, 2, 10, Some(&role));
        assert_eq!(body["user_id"], 4);
        assert_eq!(body["question_id"], 10);
        assert_eq!(body["model_id"], 2);
        assert_eq!(body["role_key"], "senior");
        assert_eq!(body["difficulty_level"], "hard");
    }

    #[test]
    fn test_submit_body_omits_role_when_absent() {
        let view = SlotView {
            id: "s1".to_string(),
            user_id: 4,
            user_label: "Ada".to_string(),
            answer: "a".to_string(),
        };
        let body = submit_body(&view, 2, 10, None);
        assert!(body.get("role_key").is_none());
    }

    #[test]
    fn test_endpoint_paths() {
        assert_eq!(StreamEndpoint::SubmitAnswer.path(), "/answers/submit-stream/");
        assert_eq!(StreamEndpoint::FollowUp.path(), "/answers/follow-up-stream/");
        assert_eq!(
            StreamEndpoint::BattleAnalysis.path(),
            "/answers/battle-analysis-stream/"
        );
    }
}
