//! Session turn state machine
//!
//! Sequences voice activity, transcript fragments, buffer decisions, and
//! playback into non-overlapping turns. All state lives on one task; timers,
//! generation, and playback run as spawned tasks that report back through
//! the engine's event channel, so every transition happens in one place.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;

use tutor_config::Settings;
use tutor_core::{
    now_ms, BufferDecision, Speaker, SpeculativeCandidate, TranscriptFragment, Turn, TurnId,
    VadEventKind, VoiceActivityEvent,
};
use tutor_llm::{GenerationBackend, SpeculativeConfig, SpeculativeResponder};
use tutor_pipeline::{
    AppendOutcome, PauseConfig, PauseDetector, PipelineError, PlaybackConfig, PlaybackController,
    PlaybackOutcome, SttBackend, TranscriptStream, TtsBackend,
};

use crate::context::{ContextConfig, ConversationContext};
use crate::decision::{BufferDecisionEngine, DecisionConfig};
use crate::EngineError;

/// Everything the engine's event loop consumes
#[derive(Debug)]
pub enum EngineEvent {
    /// Voice activity transition from the external VAD
    Vad(VoiceActivityEvent),

    /// Transcript fragment from the external STT; the engine re-stamps it
    /// onto the currently open user turn
    Transcript(TranscriptFragment),

    /// Armed silence timer elapsed
    PauseDeadline { turn_id: TurnId, at_ms: u64 },

    /// Grace period for an in-flight STT-final fragment elapsed
    GraceElapsed { turn_id: TurnId },

    /// A speculative candidate finished generating
    CandidateReady(SpeculativeCandidate),

    /// The buffer decision for a finalized user turn completed
    DecisionReady { turn_id: TurnId, decision: BufferDecision },

    /// Late real reply for a turn that degraded to the filler
    FollowUp { turn_id: TurnId, text: String },

    /// Assistant playback ran to completion or was stopped
    PlaybackFinished { turn_id: TurnId, outcome: PlaybackOutcome },

    /// Assistant playback failed; the reply is delivered as text
    PlaybackFailed { turn_id: TurnId, message: String },

    /// Voice capture is gone; switch to typed input
    InputLost,

    /// Voice capture is back
    InputRestored,

    /// A typed user utterance, complete as given
    TextInput { text: String },

    /// Stop the event loop
    Shutdown,
}

/// Observable turn lifecycle events for UI and logging sinks
#[derive(Debug, Clone)]
pub enum TurnEvent {
    UserTurnStarted { turn_id: TurnId },
    PartialTranscript { turn_id: TurnId, text: String },
    UserTurnFinalized { turn_id: TurnId, text: String },
    DecisionMade { turn_id: TurnId, decision: BufferDecision },
    AssistantTurnStarted { turn_id: TurnId, text: String },
    AssistantTurnFinished { turn_id: TurnId, interrupted: bool, spoken_ms: u64 },
    DegradedModeChanged { degraded: bool },
    Fault { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Nobody holds the floor
    Idle,
    /// User turn open, transcript accumulating
    UserSpeaking,
    /// Pause confirmed, waiting for an STT-final fragment or the grace timer
    AwaitingFinal,
    /// User turn finalized, buffer decision in flight
    Deciding,
    /// Assistant reply playing out
    AssistantSpeaking,
}

/// The turn-taking engine. Create it, optionally attach an STT stream, then
/// drive it with `run()`; interact through `sender()` and `subscribe()`.
pub struct TurnEngine {
    phase: Phase,
    degraded: bool,

    detector: PauseDetector,
    transcripts: TranscriptStream,
    context: ConversationContext,
    responder: Arc<SpeculativeResponder>,
    decision_engine: Arc<BufferDecisionEngine>,
    playback: Arc<PlaybackController>,

    stt_final_grace_ms: u64,

    user_turn: Option<Turn>,
    assistant_turn: Option<Turn>,
    deciding_turn: Option<TurnId>,
    pending_candidate: Option<SpeculativeCandidate>,

    /// User turn whose filler is owed a real reply
    awaiting_follow_up: Option<TurnId>,
    /// Follow-up that arrived while the filler was still playing
    queued_follow_up: Option<(TurnId, String)>,

    pause_timer: Option<AbortHandle>,
    grace_timer: Option<AbortHandle>,
    decision_task: Option<AbortHandle>,
    playback_task: Option<AbortHandle>,

    tx: mpsc::UnboundedSender<EngineEvent>,
    rx: Option<mpsc::UnboundedReceiver<EngineEvent>>,
    events: broadcast::Sender<TurnEvent>,
}

impl TurnEngine {
    pub fn new(
        settings: &Settings,
        backend: Arc<dyn GenerationBackend>,
        tts: Arc<dyn TtsBackend>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(100);

        let (candidate_tx, mut candidate_rx) = mpsc::channel(16);
        let candidate_forward = tx.clone();
        tokio::spawn(async move {
            while let Some(candidate) = candidate_rx.recv().await {
                if candidate_forward
                    .send(EngineEvent::CandidateReady(candidate))
                    .is_err()
                {
                    break;
                }
            }
        });

        let responder = Arc::new(SpeculativeResponder::new(
            backend,
            SpeculativeConfig {
                enabled: settings.speculative.enabled,
                min_gap_ms: settings.speculative.min_gap_ms,
                min_prefix_growth_chars: settings.speculative.min_prefix_growth_chars,
                generation_timeout_ms: settings.generation.timeout_ms,
            },
            candidate_tx,
        ));

        let decision_engine = Arc::new(BufferDecisionEngine::new(
            DecisionConfig::from_settings(&settings.decision, settings.generation.retry_once),
            Arc::clone(&responder),
        ));

        let playback = Arc::new(PlaybackController::new(
            tts,
            PlaybackConfig {
                stop_poll_interval_ms: (settings.playback.stop_latency_ms / 4).max(5),
                response_delay_ms: settings.playback.response_delay_ms,
                chunk_words: 6,
            },
        ));

        Self {
            phase: Phase::Idle,
            degraded: false,
            detector: PauseDetector::new(PauseConfig {
                threshold_ms: settings.pause.threshold_ms,
                min_speech_ms: settings.pause.min_speech_ms,
            }),
            transcripts: TranscriptStream::new(),
            context: ConversationContext::new(ContextConfig {
                max_turns: settings.context.max_turns,
                max_chars: settings.context.max_chars,
            }),
            responder,
            decision_engine,
            playback,
            stt_final_grace_ms: settings.pause.stt_final_grace_ms,
            user_turn: None,
            assistant_turn: None,
            deciding_turn: None,
            pending_candidate: None,
            awaiting_follow_up: None,
            queued_follow_up: None,
            pause_timer: None,
            grace_timer: None,
            decision_task: None,
            playback_task: None,
            tx,
            rx: Some(rx),
            events,
        }
    }

    /// Handle for feeding events into the engine
    pub fn sender(&self) -> mpsc::UnboundedSender<EngineEvent> {
        self.tx.clone()
    }

    /// Subscribe to observable turn events
    pub fn subscribe(&self) -> broadcast::Receiver<TurnEvent> {
        self.events.subscribe()
    }

    /// Pump an STT backend's fragments into the event loop
    pub fn attach_stt(&self, stt: Box<dyn SttBackend>) {
        let (fragment_tx, mut fragment_rx) = mpsc::channel(32);
        tokio::spawn(async move {
            if let Err(err) = stt.run(fragment_tx).await {
                tracing::warn!(error = %err, "stt stream ended with error");
            }
        });

        let tx = self.tx.clone();
        tokio::spawn(async move {
            while let Some(fragment) = fragment_rx.recv().await {
                if tx.send(EngineEvent::Transcript(fragment)).is_err() {
                    break;
                }
            }
        });
    }

    /// Run the event loop until shutdown.
    pub async fn run(mut self) -> Result<(), EngineError> {
        let mut rx = self.rx.take().ok_or(EngineError::ChannelClosed)?;
        loop {
            let Some(event) = rx.recv().await else {
                self.cancel_all_tasks();
                return Err(EngineError::ChannelClosed);
            };
            if matches!(event, EngineEvent::Shutdown) {
                tracing::info!("engine shutting down");
                self.playback.stop();
                self.cancel_all_tasks();
                return Ok(());
            }
            self.handle(event).await;
        }
    }

    async fn handle(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Vad(vad) => self.on_vad(vad),
            EngineEvent::Transcript(fragment) => self.on_fragment(fragment),
            EngineEvent::PauseDeadline { turn_id, at_ms } => self.on_pause_deadline(turn_id, at_ms),
            EngineEvent::GraceElapsed { turn_id } => self.on_grace_elapsed(turn_id),
            EngineEvent::CandidateReady(candidate) => self.on_candidate(candidate),
            EngineEvent::DecisionReady { turn_id, decision } => {
                self.on_decision(turn_id, decision);
            }
            EngineEvent::FollowUp { turn_id, text } => self.on_follow_up(turn_id, text),
            EngineEvent::PlaybackFinished { turn_id, outcome } => {
                self.on_playback_finished(turn_id, outcome);
            }
            EngineEvent::PlaybackFailed { turn_id, message } => {
                self.on_playback_failed(turn_id, message);
            }
            EngineEvent::InputLost => self.on_input_lost(),
            EngineEvent::InputRestored => self.on_input_restored(),
            EngineEvent::TextInput { text } => self.on_text_input(text),
            EngineEvent::Shutdown => {}
        }
    }

    fn on_vad(&mut self, vad: VoiceActivityEvent) {
        if self.degraded {
            tracing::debug!("ignoring voice activity while degraded to text input");
            return;
        }
        self.detector.observe(&vad);

        match vad.kind {
            VadEventKind::SpeechStart => match self.phase {
                Phase::Idle => self.start_user_turn(vad.timestamp_ms),
                Phase::UserSpeaking => {
                    // Silence ended; if it was only a blip the detector will
                    // hand back the original deadline on the next speech end
                    self.cancel_pause_timer();
                    self.resume_user_turn();
                }
                Phase::AwaitingFinal => {
                    // Premature pause; the user kept going on the same turn.
                    // The fired silence period is spent, so rebind the
                    // detector for a fresh one.
                    self.cancel_grace_timer();
                    self.resume_user_turn();
                    if let Some(turn) = self.user_turn.as_ref() {
                        self.detector.bind_turn(turn.id);
                    }
                    self.phase = Phase::UserSpeaking;
                    tracing::debug!("speech resumed before finalization, turn continues");
                }
                Phase::Deciding => {
                    self.abort_decision();
                    self.start_user_turn(vad.timestamp_ms);
                }
                Phase::AssistantSpeaking => {
                    self.interrupt_assistant(vad.timestamp_ms);
                    self.start_user_turn(vad.timestamp_ms);
                }
            },
            VadEventKind::SpeechEnd => {
                if self.phase == Phase::UserSpeaking {
                    if let (Some(turn), Some(deadline)) =
                        (self.user_turn.as_ref(), self.detector.deadline_ms())
                    {
                        self.arm_pause_timer(turn.id, deadline);
                    }
                }
            }
        }
    }

    fn on_fragment(&mut self, mut fragment: TranscriptFragment) {
        if !matches!(self.phase, Phase::UserSpeaking | Phase::AwaitingFinal) {
            tracing::debug!("dropping transcript fragment with no open user turn");
            return;
        }
        let Some(turn_id) = self.user_turn.as_ref().map(|t| t.id) else {
            return;
        };
        fragment.turn_id = turn_id;

        match self.transcripts.append(fragment) {
            Ok(AppendOutcome::Partial) => {
                let text = self.transcripts.current_text(turn_id).unwrap_or_default();
                let _ = self.events.send(TurnEvent::PartialTranscript {
                    turn_id,
                    text: text.clone(),
                });
                if self.phase == Phase::UserSpeaking {
                    let history = self.context.snapshot().as_pairs();
                    self.responder.on_partial(turn_id, &text, &history, now_ms());
                }
            }
            Ok(AppendOutcome::Finalized) => {
                if self.phase == Phase::AwaitingFinal {
                    self.cancel_grace_timer();
                    self.finalize_user_turn(now_ms());
                }
                // While still speaking, the pause signal closes the turn
            }
            Err(err @ PipelineError::TranscriptOrdering { .. }) => {
                tracing::warn!(error = %err, "dropped misordered transcript fragment");
            }
            Err(err) => {
                tracing::warn!(error = %err, "transcript append failed");
            }
        }
    }

    fn on_pause_deadline(&mut self, turn_id: TurnId, at_ms: u64) {
        if self.phase != Phase::UserSpeaking
            || self.user_turn.as_ref().map(|t| t.id) != Some(turn_id)
        {
            return;
        }
        let Some(signal) = self.detector.poll(at_ms) else {
            // Speech resumed before the deadline; the timer is stale
            return;
        };
        tracing::debug!(%turn_id, silence_ms = signal.silence_ms, "pause confirmed");

        if self.transcripts.is_finalized(turn_id) {
            self.phase = Phase::AwaitingFinal;
            self.finalize_user_turn(at_ms);
        } else if self.stt_final_grace_ms == 0 {
            let _ = self.transcripts.force_finalize(turn_id);
            self.phase = Phase::AwaitingFinal;
            self.finalize_user_turn(at_ms);
        } else {
            self.phase = Phase::AwaitingFinal;
            self.arm_grace_timer(turn_id);
        }
    }

    fn on_grace_elapsed(&mut self, turn_id: TurnId) {
        if self.phase != Phase::AwaitingFinal
            || self.user_turn.as_ref().map(|t| t.id) != Some(turn_id)
        {
            return;
        }
        tracing::debug!(%turn_id, "grace elapsed, finalizing from latest partial");
        let _ = self.transcripts.force_finalize(turn_id);
        self.finalize_user_turn(now_ms());
    }

    fn on_candidate(&mut self, candidate: SpeculativeCandidate) {
        let current = self.user_turn.as_ref().map(|t| t.id);
        let relevant = matches!(self.phase, Phase::UserSpeaking | Phase::AwaitingFinal)
            && current == Some(candidate.turn_id);
        if relevant {
            // Latest candidate supersedes, never queues
            self.pending_candidate = Some(candidate);
        } else {
            tracing::debug!(turn_id = %candidate.turn_id, "discarding candidate for closed turn");
        }
    }

    fn on_decision(&mut self, turn_id: TurnId, decision: BufferDecision) {
        if self.phase != Phase::Deciding || self.deciding_turn != Some(turn_id) {
            tracing::debug!(%turn_id, "ignoring decision for superseded turn");
            return;
        }
        self.decision_task = None;
        self.deciding_turn = None;

        self.awaiting_follow_up = decision.degraded.then_some(turn_id);
        let text = decision.final_text.clone();
        let _ = self.events.send(TurnEvent::DecisionMade { turn_id, decision });
        self.start_assistant_turn(text);
    }

    fn on_follow_up(&mut self, turn_id: TurnId, text: String) {
        if self.awaiting_follow_up != Some(turn_id) {
            tracing::debug!(%turn_id, "dropping follow-up for superseded turn");
            return;
        }
        match self.phase {
            Phase::AssistantSpeaking => {
                // Filler still playing; speak the real reply right after it
                self.queued_follow_up = Some((turn_id, text));
            }
            Phase::Deciding if self.deciding_turn == Some(turn_id) => {
                // Follow-up outran its own decision record; hold it until
                // the filler has been spoken
                self.queued_follow_up = Some((turn_id, text));
            }
            Phase::Idle => {
                self.awaiting_follow_up = None;
                self.start_assistant_turn(text);
            }
            _ => {
                // The user moved on; the late reply no longer applies
                self.awaiting_follow_up = None;
            }
        }
    }

    fn on_playback_finished(&mut self, turn_id: TurnId, outcome: PlaybackOutcome) {
        let current = self.assistant_turn.as_ref().map(|t| t.id);
        if current != Some(turn_id) {
            // Stopped playback for a turn already closed at barge-in
            return;
        }
        self.playback_task = None;
        let mut turn = self.assistant_turn.take().unwrap();
        self.phase = Phase::Idle;

        let (interrupted, spoken_ms) = match outcome {
            PlaybackOutcome::Completed { spoken_ms } => {
                turn.finalize(turn.text.clone(), now_ms());
                (false, spoken_ms)
            }
            PlaybackOutcome::Interrupted { spoken_ms } => {
                turn.interrupt(now_ms());
                (true, spoken_ms)
            }
        };
        self.context.push(turn);
        let _ = self.events.send(TurnEvent::AssistantTurnFinished {
            turn_id,
            interrupted,
            spoken_ms,
        });

        if !interrupted {
            self.maybe_speak_follow_up();
        }
    }

    fn on_playback_failed(&mut self, turn_id: TurnId, message: String) {
        let current = self.assistant_turn.as_ref().map(|t| t.id);
        if current != Some(turn_id) {
            return;
        }
        self.playback_task = None;
        tracing::warn!(%turn_id, %message, "playback failed, delivering reply as text");
        let _ = self.events.send(TurnEvent::Fault {
            message: format!("playback failed: {message}"),
        });

        // The reply still reached the user as text in AssistantTurnStarted
        let mut turn = self.assistant_turn.take().unwrap();
        turn.finalize(turn.text.clone(), now_ms());
        self.context.push(turn);
        self.phase = Phase::Idle;
        let _ = self.events.send(TurnEvent::AssistantTurnFinished {
            turn_id,
            interrupted: false,
            spoken_ms: 0,
        });
        self.maybe_speak_follow_up();
    }

    fn on_input_lost(&mut self) {
        if self.degraded {
            return;
        }
        self.degraded = true;
        tracing::warn!("voice input lost, degrading to text input");
        let _ = self.events.send(TurnEvent::DegradedModeChanged { degraded: true });

        if matches!(self.phase, Phase::UserSpeaking | Phase::AwaitingFinal) {
            self.discard_open_user_turn();
            self.phase = Phase::Idle;
        }
        // A decision or playback in flight still completes; replies are
        // delivered as text from here on
    }

    fn on_input_restored(&mut self) {
        if !self.degraded {
            return;
        }
        self.degraded = false;
        tracing::info!("voice input restored");
        let _ = self.events.send(TurnEvent::DegradedModeChanged { degraded: false });
    }

    fn on_text_input(&mut self, text: String) {
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }

        match self.phase {
            Phase::AssistantSpeaking => self.interrupt_assistant(now_ms()),
            Phase::Deciding => self.abort_decision(),
            Phase::UserSpeaking | Phase::AwaitingFinal => {
                self.discard_open_user_turn();
            }
            Phase::Idle => {}
        }

        let at_ms = now_ms();
        let mut turn = Turn::open(Speaker::User, at_ms);
        let turn_id = turn.id;
        let _ = self.events.send(TurnEvent::UserTurnStarted { turn_id });

        let history = self.context.snapshot().as_pairs();
        turn.finalize(text.clone(), at_ms);
        self.context.push(turn);
        let _ = self.events.send(TurnEvent::UserTurnFinalized {
            turn_id,
            text: text.clone(),
        });

        self.spawn_decision(turn_id, None, text, history, at_ms);
    }

    fn start_user_turn(&mut self, at_ms: u64) {
        let turn = Turn::open(Speaker::User, at_ms);
        let turn_id = turn.id;
        tracing::info!(%turn_id, "user turn started");

        self.transcripts.begin_turn(turn_id);
        self.detector.bind_turn(turn_id);
        self.responder.begin_turn(turn_id);
        self.pending_candidate = None;
        self.awaiting_follow_up = None;
        self.queued_follow_up = None;
        self.cancel_pause_timer();
        self.cancel_grace_timer();

        self.user_turn = Some(turn);
        self.phase = Phase::UserSpeaking;
        let _ = self.events.send(TurnEvent::UserTurnStarted { turn_id });
    }

    fn finalize_user_turn(&mut self, at_ms: u64) {
        self.cancel_pause_timer();
        self.cancel_grace_timer();
        self.detector.reset();
        self.responder.cancel_inflight();

        let Some(mut turn) = self.user_turn.take() else {
            self.phase = Phase::Idle;
            return;
        };
        let turn_id = turn.id;
        let text = self
            .transcripts
            .final_text(turn_id)
            .unwrap_or_default();
        self.transcripts.discard_turn(turn_id);

        if text.is_empty() {
            // Silence or noise with no usable transcript; nothing to answer
            tracing::debug!(%turn_id, "discarding empty user turn");
            self.pending_candidate = None;
            self.phase = Phase::Idle;
            return;
        }

        tracing::info!(%turn_id, chars = text.len(), "user turn finalized");
        let history = self.context.snapshot().as_pairs();
        turn.finalize(text.clone(), at_ms);
        self.context.push(turn);
        let _ = self.events.send(TurnEvent::UserTurnFinalized {
            turn_id,
            text: text.clone(),
        });

        let candidate = self
            .pending_candidate
            .take()
            .filter(|c| c.turn_id == turn_id);
        self.spawn_decision(turn_id, candidate, text, history, at_ms);
    }

    fn spawn_decision(
        &mut self,
        turn_id: TurnId,
        candidate: Option<SpeculativeCandidate>,
        final_text: String,
        history: Vec<(Speaker, String)>,
        user_end_ms: u64,
    ) {
        self.abort_decision();
        self.phase = Phase::Deciding;
        self.deciding_turn = Some(turn_id);
        // Armed now rather than at DecisionReady: a fast-failing backend can
        // push the follow-up through the queue ahead of the decision record
        self.awaiting_follow_up = Some(turn_id);
        self.queued_follow_up = None;

        let engine = Arc::clone(&self.decision_engine);
        let tx = self.tx.clone();

        let (follow_up_tx, mut follow_up_rx) = mpsc::channel(1);
        let follow_up_forward = self.tx.clone();
        tokio::spawn(async move {
            if let Some(text) = follow_up_rx.recv().await {
                let _ = follow_up_forward.send(EngineEvent::FollowUp { turn_id, text });
            }
        });

        let task = tokio::spawn(async move {
            let decision = engine
                .decide(candidate, &final_text, &history, user_end_ms, follow_up_tx)
                .await;
            let _ = tx.send(EngineEvent::DecisionReady { turn_id, decision });
        });
        self.decision_task = Some(task.abort_handle());
    }

    fn start_assistant_turn(&mut self, text: String) {
        let mut turn = Turn::open(Speaker::Assistant, now_ms());
        turn.text = text.clone();
        let turn_id = turn.id;
        let _ = self.events.send(TurnEvent::AssistantTurnStarted {
            turn_id,
            text: text.clone(),
        });

        if self.degraded {
            // Text delivery only; the turn closes immediately
            turn.finalize(text, now_ms());
            self.context.push(turn);
            self.phase = Phase::Idle;
            let _ = self.events.send(TurnEvent::AssistantTurnFinished {
                turn_id,
                interrupted: false,
                spoken_ms: 0,
            });
            self.maybe_speak_follow_up();
            return;
        }

        tracing::info!(%turn_id, "assistant speaking");
        self.assistant_turn = Some(turn);
        self.phase = Phase::AssistantSpeaking;

        let playback = Arc::clone(&self.playback);
        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            match playback.speak(&text).await {
                Ok(outcome) => {
                    let _ = tx.send(EngineEvent::PlaybackFinished { turn_id, outcome });
                }
                Err(err) => {
                    let _ = tx.send(EngineEvent::PlaybackFailed {
                        turn_id,
                        message: err.to_string(),
                    });
                }
            }
        });
        self.playback_task = Some(task.abort_handle());
    }

    /// Barge-in: stop playback now and close the assistant turn before any
    /// new user turn opens, so the record never shows overlap.
    fn interrupt_assistant(&mut self, at_ms: u64) {
        self.playback.stop();
        self.queued_follow_up = None;
        self.awaiting_follow_up = None;

        if let Some(mut turn) = self.assistant_turn.take() {
            let turn_id = turn.id;
            tracing::info!(%turn_id, "assistant interrupted by user speech");
            turn.interrupt(at_ms);
            let spoken_ms = turn.duration_ms();
            self.context.push(turn);
            let _ = self.events.send(TurnEvent::AssistantTurnFinished {
                turn_id,
                interrupted: true,
                spoken_ms,
            });
        }
        // The playback task still sends PlaybackFinished; with the turn
        // already closed it is ignored as stale
        self.phase = Phase::Idle;
    }

    /// An early STT-final can close the transcript while the user is in
    /// fact still going; reopen it so resumed speech is not lost.
    fn resume_user_turn(&mut self) {
        if let Some(turn) = self.user_turn.as_ref() {
            if self.transcripts.is_finalized(turn.id) {
                let _ = self.transcripts.reopen(turn.id);
            }
        }
    }

    fn maybe_speak_follow_up(&mut self) {
        if let Some((turn_id, text)) = self.queued_follow_up.take() {
            if self.awaiting_follow_up == Some(turn_id) {
                self.awaiting_follow_up = None;
                self.start_assistant_turn(text);
            }
        }
    }

    fn discard_open_user_turn(&mut self) {
        if let Some(turn) = self.user_turn.take() {
            tracing::debug!(turn_id = %turn.id, "discarding open user turn");
            self.transcripts.discard_turn(turn.id);
        }
        self.detector.reset();
        self.responder.cancel_inflight();
        self.pending_candidate = None;
        self.cancel_pause_timer();
        self.cancel_grace_timer();
    }

    fn abort_decision(&mut self) {
        if let Some(task) = self.decision_task.take() {
            tracing::debug!("aborting in-flight decision");
            task.abort();
        }
        self.deciding_turn = None;
    }

    fn arm_pause_timer(&mut self, turn_id: TurnId, deadline_ms: u64) {
        self.cancel_pause_timer();
        let tx = self.tx.clone();
        let delay = deadline_ms.saturating_sub(now_ms());
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            let _ = tx.send(EngineEvent::PauseDeadline { turn_id, at_ms: deadline_ms });
        });
        self.pause_timer = Some(task.abort_handle());
    }

    fn arm_grace_timer(&mut self, turn_id: TurnId) {
        self.cancel_grace_timer();
        let tx = self.tx.clone();
        let grace = self.stt_final_grace_ms;
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(grace)).await;
            let _ = tx.send(EngineEvent::GraceElapsed { turn_id });
        });
        self.grace_timer = Some(task.abort_handle());
    }

    fn cancel_pause_timer(&mut self) {
        if let Some(timer) = self.pause_timer.take() {
            timer.abort();
        }
    }

    fn cancel_grace_timer(&mut self) {
        if let Some(timer) = self.grace_timer.take() {
            timer.abort();
        }
    }

    fn cancel_all_tasks(&mut self) {
        self.cancel_pause_timer();
        self.cancel_grace_timer();
        self.abort_decision();
        if let Some(task) = self.playback_task.take() {
            task.abort();
        }
        self.responder.cancel_inflight();
    }
}
