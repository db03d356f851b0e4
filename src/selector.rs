//! Turn-selection strategies for group conversations
//!
//! Three interchangeable strategies share one capability: given the
//! transcript so far and the roster of participants, name the next speaker
//! (or defer to the registry's default order).

use std::sync::Arc;

use async_trait::async_trait;
use tower::util::BoxCloneService;
use tower::{BoxError, Service, ServiceExt};
use tracing::debug;

use crate::error::{GroupChatError, Result};
use crate::messages::GroupMessage;
use crate::participant::RosterEntry;

/// Decides who speaks next.
#[async_trait]
pub trait SpeakerSelector: Send {
    /// Return the next speaker's name, or `None` to defer to the default
    /// registry order.
    async fn select_speaker(
        &mut self,
        history: &[GroupMessage],
        roster: &[RosterEntry],
    ) -> Result<Option<String>>;

    /// Clear any persisted position or memory of past selections.
    fn reset(&mut self);
}

/// Strict cyclic order over the registry.
///
/// The position persists across runs until [`reset`](SpeakerSelector::reset),
/// so a resumed run continues from the participant after the last speaker.
#[derive(Debug, Default)]
pub struct RoundRobinSelector {
    next: usize,
}

impl RoundRobinSelector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SpeakerSelector for RoundRobinSelector {
    async fn select_speaker(
        &mut self,
        _history: &[GroupMessage],
        roster: &[RosterEntry],
    ) -> Result<Option<String>> {
        if roster.is_empty() {
            return Err(GroupChatError::EmptyCandidates);
        }
        let pick = roster[self.next % roster.len()].name.clone();
        self.next = (self.next + 1) % roster.len();
        Ok(Some(pick))
    }

    fn reset(&mut self) {
        self.next = 0;
    }
}

/// Request sent to the selection model collaborator.
#[derive(Debug, Clone)]
pub struct SelectRequest {
    /// Fully composed selection prompt
    pub prompt: String,
    /// Names the reply is expected to choose from
    pub candidates: Vec<String>,
}

/// Boxed selection-model service type alias.
pub type SelectorModelSvc = BoxCloneService<SelectRequest, String, BoxError>;

/// Caller-supplied override: a non-`None` result wins the turn outright.
pub type SelectorFn = Arc<dyn Fn(&[GroupMessage]) -> Option<String> + Send + Sync>;

/// Caller-supplied narrowing of the model's eligible set.
pub type CandidateFn = Arc<dyn Fn(&[GroupMessage]) -> Vec<String> + Send + Sync>;

const SELECTOR_PROMPT: &str = "You are in a role play game. The following roles are available:
{roles}

Read the following conversation. Then select the next role from {participants} to play. Only return the role.

{history}

Read the above conversation. Then select the next role from {participants} to play. Only return the role.";

/// Model-driven selection among a candidate subset.
///
/// Composes a prompt from role descriptions and the rendered transcript,
/// invokes the selection model, and resolves the reply by counting roster
/// mentions. Will not pick the same speaker twice in a row unless it is the
/// only eligible candidate or repeats are explicitly allowed.
pub struct ModelSelector {
    svc: SelectorModelSvc,
    allow_repeated_speaker: bool,
    last_speaker: Option<String>,
    selector_fn: Option<SelectorFn>,
    candidate_fn: Option<CandidateFn>,
}

impl ModelSelector {
    pub fn new<S>(svc: S) -> Self
    where
        S: Service<SelectRequest, Response = String, Error = BoxError> + Clone + Send + 'static,
        S::Future: Send + 'static,
    {
        Self {
            svc: BoxCloneService::new(svc),
            allow_repeated_speaker: false,
            last_speaker: None,
            selector_fn: None,
            candidate_fn: None,
        }
    }

    /// Permit the same participant to be chosen on consecutive turns.
    pub fn allow_repeated_speaker(mut self, allow: bool) -> Self {
        self.allow_repeated_speaker = allow;
        self
    }

    /// Install a per-turn override function. Mutually exclusive with
    /// [`with_candidate_fn`](Self::with_candidate_fn).
    pub fn with_selector_fn(mut self, f: SelectorFn) -> Self {
        self.selector_fn = Some(f);
        self
    }

    /// Install a candidate-narrowing function. Mutually exclusive with
    /// [`with_selector_fn`](Self::with_selector_fn).
    pub fn with_candidate_fn(mut self, f: CandidateFn) -> Self {
        self.candidate_fn = Some(f);
        self
    }

    fn compose_prompt(history: &[GroupMessage], roster: &[RosterEntry], candidates: &[String]) -> String {
        let roles = roster
            .iter()
            .filter(|r| candidates.contains(&r.name))
            .map(|r| format!("{}: {}", r.name, r.description))
            .collect::<Vec<_>>()
            .join("\n");
        let participants = candidates.join(", ");
        let rendered_history = history
            .iter()
            .filter_map(|m| m.as_chat())
            .map(|m| format!("{}: {}", m.source(), m.rendered()))
            .collect::<Vec<_>>()
            .join("\n");
        SELECTOR_PROMPT
            .replace("{roles}", &roles)
            .replace("{participants}", &participants)
            .replace("{history}", &rendered_history)
    }

    /// Resolve the model's reply to exactly one candidate by mention count.
    fn resolve_reply(reply: &str, candidates: &[String]) -> Result<String> {
        let mut best: Option<(&String, usize)> = None;
        let mut tied = false;
        for name in candidates {
            let count = reply.matches(name.as_str()).count();
            if count == 0 {
                continue;
            }
            match best {
                Some((_, c)) if count == c => tied = true,
                Some((_, c)) if count > c => {
                    best = Some((name, count));
                    tied = false;
                }
                None => best = Some((name, count)),
                _ => {}
            }
        }
        match best {
            Some((name, _)) if !tied => Ok(name.clone()),
            _ => Err(GroupChatError::SpeakerNotResolved {
                reply: reply.to_string(),
            }),
        }
    }
}

#[async_trait]
impl SpeakerSelector for ModelSelector {
    async fn select_speaker(
        &mut self,
        history: &[GroupMessage],
        roster: &[RosterEntry],
    ) -> Result<Option<String>> {
        if self.selector_fn.is_some() && self.candidate_fn.is_some() {
            return Err(GroupChatError::SelectorConflict);
        }

        // A custom selector result always overrides the model for this turn.
        if let Some(f) = &self.selector_fn {
            if let Some(name) = f(history) {
                if !roster.iter().any(|r| r.name == name) {
                    return Err(GroupChatError::UnknownParticipant { name });
                }
                debug!(speaker = %name, "selector function forced speaker");
                self.last_speaker = Some(name.clone());
                return Ok(Some(name));
            }
        }

        let mut candidates: Vec<String> = match &self.candidate_fn {
            Some(f) => {
                let narrowed = f(history);
                if narrowed.is_empty() {
                    return Err(GroupChatError::EmptyCandidates);
                }
                for name in &narrowed {
                    if !roster.iter().any(|r| r.name == *name) {
                        return Err(GroupChatError::UnknownParticipant { name: name.clone() });
                    }
                }
                narrowed
            }
            None => roster.iter().map(|r| r.name.clone()).collect(),
        };

        if !self.allow_repeated_speaker && candidates.len() > 1 {
            if let Some(last) = &self.last_speaker {
                candidates.retain(|c| c != last);
            }
        }

        // A singleton forces that speaker without a model call.
        if candidates.len() == 1 {
            let name = candidates.remove(0);
            self.last_speaker = Some(name.clone());
            return Ok(Some(name));
        }

        let prompt = Self::compose_prompt(history, roster, &candidates);
        let reply = self
            .svc
            .ready()
            .await
            .map_err(|e| GroupChatError::ModelBehaviorError {
                message: format!("selection model not ready: {e}"),
            })?
            .call(SelectRequest {
                prompt,
                candidates: candidates.clone(),
            })
            .await
            .map_err(|e| GroupChatError::ModelBehaviorError {
                message: format!("selection model error: {e}"),
            })?;

        let name = Self::resolve_reply(&reply, &candidates)?;
        debug!(speaker = %name, "selection model picked speaker");
        self.last_speaker = Some(name.clone());
        Ok(Some(name))
    }

    fn reset(&mut self) {
        self.last_speaker = None;
    }
}
