//! Pure state transition function
//!
//! The lifecycle of one generation request as `transition(state, input) ->
//! (state, effects)`. The controller actor owns the state and executes the
//! effects; nothing here touches IO.

use storyui_protocol::{CompletionFeedback, ErrorFeedback, StreamEvent, StreamingState};

// ---------------------------------------------------------------------------
// GenerationPhase: named states of one request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationPhase {
    Idle,
    IntentKnown,
    Progressing,
    Succeeded,
    Failed,
    Cancelled,
}

impl GenerationPhase {
    /// No further input is applied once a request reaches one of these.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            GenerationPhase::Succeeded | GenerationPhase::Failed | GenerationPhase::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationPhase::Idle => "idle",
            GenerationPhase::IntentKnown => "intent_known",
            GenerationPhase::Progressing => "progressing",
            GenerationPhase::Succeeded => "succeeded",
            GenerationPhase::Failed => "failed",
            GenerationPhase::Cancelled => "cancelled",
        }
    }
}

// ---------------------------------------------------------------------------
// InFlight: the current request
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct InFlight {
    pub request_id: u64,
    pub phase: GenerationPhase,
    pub snapshot: StreamingState,
    pub events_applied: u64,
}

impl InFlight {
    /// State before any request has been issued. Closed, so stray input
    /// for request 0 is ignored.
    pub fn idle() -> Self {
        Self {
            request_id: 0,
            phase: GenerationPhase::Cancelled,
            snapshot: StreamingState::default(),
            events_applied: 0,
        }
    }

    /// True while a request is accepting events
    pub fn is_active(&self) -> bool {
        !self.phase.is_closed()
    }

    /// True when `request_id` is the request still accepting events
    pub fn is_current(&self, request_id: u64) -> bool {
        self.request_id == request_id && self.is_active()
    }
}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Input {
    /// A new request supersedes whatever was in flight
    Begin { request_id: u64 },
    /// A decoded stream event
    Event { request_id: u64, event: StreamEvent },
    /// Transport-level terminal failure (after progress, or fallback failed)
    Fail {
        request_id: u64,
        error: ErrorFeedback,
    },
    /// The non-streaming fallback produced a result
    FallbackCompleted {
        request_id: u64,
        completion: Box<CompletionFeedback>,
    },
    /// Caller-initiated abort
    Cancel { request_id: u64 },
}

impl Input {
    fn request_id(&self) -> u64 {
        match self {
            Input::Begin { request_id }
            | Input::Event { request_id, .. }
            | Input::Fail { request_id, .. }
            | Input::FallbackCompleted { request_id, .. }
            | Input::Cancel { request_id } => *request_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Effects: work for the caller to execute
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed {
        completion: Box<CompletionFeedback>,
        via_fallback: bool,
    },
    Failed(ErrorFeedback),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// The observable snapshot changed
    Notify(Box<StreamingState>),
    /// Terminal hand-off; emitted at most once per request
    Finalize { request_id: u64, outcome: Outcome },
    /// The request was abandoned and its snapshot dropped
    Discard { request_id: u64 },
}

// ---------------------------------------------------------------------------
// transition()
// ---------------------------------------------------------------------------

/// Pure, synchronous state transition.
///
/// Input for any request other than the current one, or arriving after the
/// current request closed, is ignored and produces no effects.
pub fn transition(mut state: InFlight, input: Input) -> (InFlight, Vec<Effect>) {
    if let Input::Begin { request_id } = input {
        let mut effects = Vec::new();
        if state.is_active() {
            effects.push(Effect::Discard {
                request_id: state.request_id,
            });
        }
        state = InFlight {
            request_id,
            phase: GenerationPhase::Idle,
            snapshot: StreamingState::default(),
            events_applied: 0,
        };
        effects.push(Effect::Notify(Box::new(state.snapshot.clone())));
        return (state, effects);
    }

    if input.request_id() != state.request_id || state.phase.is_closed() {
        return (state, Vec::new());
    }

    let request_id = state.request_id;
    let mut effects = Vec::new();

    match input {
        // handled above
        Input::Begin { .. } => {}

        Input::Event { event, .. } => {
            state.events_applied += 1;
            match event {
                StreamEvent::Intent(intent) => {
                    state.snapshot.intent = Some(intent);
                    if state.phase == GenerationPhase::Idle {
                        state.phase = GenerationPhase::IntentKnown;
                    }
                }
                StreamEvent::Progress(progress) => {
                    state.snapshot.progress = Some(progress);
                    state.phase = GenerationPhase::Progressing;
                }
                StreamEvent::Validation(validation) => {
                    state.snapshot.validation = Some(validation);
                    state.phase = GenerationPhase::Progressing;
                }
                StreamEvent::Retry(retry) => {
                    state.snapshot.retry = Some(retry);
                    state.phase = GenerationPhase::Progressing;
                }
                StreamEvent::Completion(completion) => {
                    state.snapshot.completion = Some((*completion).clone());
                    state.phase = GenerationPhase::Succeeded;
                    effects.push(Effect::Notify(Box::new(state.snapshot.clone())));
                    effects.push(Effect::Finalize {
                        request_id,
                        outcome: Outcome::Completed {
                            completion,
                            via_fallback: false,
                        },
                    });
                    return (state, effects);
                }
                StreamEvent::Error(error) => {
                    state.snapshot.error = Some(error.clone());
                    state.phase = GenerationPhase::Failed;
                    effects.push(Effect::Notify(Box::new(state.snapshot.clone())));
                    effects.push(Effect::Finalize {
                        request_id,
                        outcome: Outcome::Failed(error),
                    });
                    return (state, effects);
                }
            }
            effects.push(Effect::Notify(Box::new(state.snapshot.clone())));
        }

        Input::Fail { error, .. } => {
            state.snapshot.error = Some(error.clone());
            state.phase = GenerationPhase::Failed;
            effects.push(Effect::Notify(Box::new(state.snapshot.clone())));
            effects.push(Effect::Finalize {
                request_id,
                outcome: Outcome::Failed(error),
            });
        }

        Input::FallbackCompleted { completion, .. } => {
            state.snapshot.completion = Some((*completion).clone());
            state.phase = GenerationPhase::Succeeded;
            effects.push(Effect::Notify(Box::new(state.snapshot.clone())));
            effects.push(Effect::Finalize {
                request_id,
                outcome: Outcome::Completed {
                    completion,
                    via_fallback: true,
                },
            });
        }

        Input::Cancel { .. } => {
            state.snapshot = StreamingState::default();
            state.phase = GenerationPhase::Cancelled;
            effects.push(Effect::Discard { request_id });
        }
    }

    (state, effects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyui_protocol::{IntentPreview, ProgressUpdate, RetryInfo, ValidationFeedback};

    fn begin(request_id: u64) -> InFlight {
        let (state, _) = transition(InFlight::idle(), Input::Begin { request_id });
        state
    }

    fn event(request_id: u64, event: StreamEvent) -> Input {
        Input::Event { request_id, event }
    }

    fn progress(step: u32) -> StreamEvent {
        StreamEvent::Progress(ProgressUpdate {
            phase: "generating".into(),
            step,
            total_steps: 4,
            message: format!("step {step}"),
        })
    }

    fn completion(title: &str) -> StreamEvent {
        StreamEvent::Completion(Box::new(CompletionFeedback {
            success: true,
            title: Some(title.into()),
            ..Default::default()
        }))
    }

    fn error(message: &str) -> StreamEvent {
        StreamEvent::Error(ErrorFeedback {
            message: message.into(),
            details: None,
            suggestion: None,
        })
    }

    fn finalize_count(effects: &[Effect]) -> usize {
        effects
            .iter()
            .filter(|e| matches!(e, Effect::Finalize { .. }))
            .count()
    }

    #[test]
    fn begin_resets_snapshot_and_enters_idle() {
        let state = begin(1);
        assert_eq!(state.phase, GenerationPhase::Idle);
        assert_eq!(state.snapshot, StreamingState::default());
        assert!(state.is_active());
    }

    #[test]
    fn intent_moves_idle_to_intent_known_only_once() {
        let intent = StreamEvent::Intent(IntentPreview {
            title: "Card".into(),
            ..Default::default()
        });
        let (state, effects) = transition(begin(1), event(1, intent.clone()));
        assert_eq!(state.phase, GenerationPhase::IntentKnown);
        assert_eq!(effects.len(), 1);

        let (state, _) = transition(state, event(1, progress(1)));
        let (state, _) = transition(state, event(1, intent));
        assert_eq!(state.phase, GenerationPhase::Progressing);
    }

    #[test]
    fn fields_from_different_kinds_do_not_overwrite_each_other() {
        let (state, _) = transition(begin(1), event(1, progress(1)));
        let (state, _) = transition(
            state,
            event(
                1,
                StreamEvent::Validation(ValidationFeedback {
                    is_valid: false,
                    errors: vec!["missing export".into()],
                    auto_fix_applied: false,
                }),
            ),
        );
        let (state, _) = transition(
            state,
            event(
                1,
                StreamEvent::Retry(RetryInfo {
                    attempt: 1,
                    max_attempts: 3,
                    reason: "validation".into(),
                }),
            ),
        );
        let (state, _) = transition(state, event(1, progress(3)));

        assert_eq!(state.snapshot.progress.as_ref().unwrap().step, 3);
        assert!(!state.snapshot.validation.as_ref().unwrap().is_valid);
        assert_eq!(state.snapshot.retry.as_ref().unwrap().attempt, 1);
        assert_eq!(state.events_applied, 4);
    }

    #[test]
    fn terminal_event_is_applied_exactly_once_for_any_prefix() {
        let prefixes: Vec<Vec<StreamEvent>> = vec![
            vec![],
            vec![progress(1)],
            vec![progress(1), progress(2), progress(1)],
            vec![
                StreamEvent::Intent(IntentPreview::default()),
                StreamEvent::Retry(RetryInfo::default()),
                progress(4),
            ],
        ];
        let terminals = [completion("Card"), error("boom")];

        for prefix in &prefixes {
            for terminal in &terminals {
                let mut state = begin(7);
                let mut finals = 0;
                let inputs = prefix
                    .iter()
                    .cloned()
                    .chain([terminal.clone(), progress(9), completion("late"), error("late")]);
                for ev in inputs {
                    let (next, effects) = transition(state, event(7, ev));
                    finals += finalize_count(&effects);
                    state = next;
                }
                assert_eq!(finals, 1, "prefix {prefix:?} terminal {terminal:?}");
                assert!(state.phase.is_closed());
                assert!(state.snapshot.completion.is_none() || state.snapshot.error.is_none());
                assert_eq!(state.events_applied as usize, prefix.len() + 1);
            }
        }
    }

    #[test]
    fn events_for_a_superseded_request_are_ignored() {
        let (state, _) = transition(begin(1), event(1, progress(1)));
        let (state, effects) = transition(state, Input::Begin { request_id: 2 });
        assert_eq!(effects[0], Effect::Discard { request_id: 1 });

        let (state, effects) = transition(state, event(1, completion("stale")));
        assert!(effects.is_empty());
        assert!(state.snapshot.completion.is_none());
        assert_eq!(state.request_id, 2);
    }

    #[test]
    fn cancel_discards_snapshot_and_blocks_late_terminal() {
        let (state, _) = transition(begin(3), event(3, progress(2)));
        let (state, effects) = transition(state, Input::Cancel { request_id: 3 });

        assert_eq!(effects, vec![Effect::Discard { request_id: 3 }]);
        assert_eq!(state.phase, GenerationPhase::Cancelled);
        assert_eq!(state.snapshot, StreamingState::default());
        assert!(!state.is_current(3));

        let (_, effects) = transition(state, event(3, completion("late")));
        assert!(effects.is_empty());
    }

    #[test]
    fn only_the_open_request_is_current() {
        let state = begin(4);
        assert!(state.is_current(4));
        assert!(!state.is_current(3));
        assert!(!InFlight::idle().is_current(0));
    }

    #[test]
    fn transport_failure_finalizes_as_error() {
        let (state, _) = transition(begin(5), event(5, progress(1)));
        let (state, effects) = transition(
            state,
            Input::Fail {
                request_id: 5,
                error: ErrorFeedback {
                    message: "stream ended before completion".into(),
                    details: None,
                    suggestion: None,
                },
            },
        );
        assert_eq!(state.phase, GenerationPhase::Failed);
        assert!(matches!(
            effects.last(),
            Some(Effect::Finalize {
                outcome: Outcome::Failed(_),
                ..
            })
        ));
    }

    #[test]
    fn fallback_completion_is_marked() {
        let (_, effects) = transition(
            begin(9),
            Input::FallbackCompleted {
                request_id: 9,
                completion: Box::new(CompletionFeedback::default()),
            },
        );
        assert!(matches!(
            effects.last(),
            Some(Effect::Finalize {
                outcome: Outcome::Completed {
                    via_fallback: true,
                    ..
                },
                ..
            })
        ));
    }
}
