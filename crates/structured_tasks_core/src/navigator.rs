use anyhow::{Result, bail};
use serde::Serialize;

use crate::marker::{Decision, SuggestionId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewSession {
    pub ordered: Vec<SuggestionId>,
    pub current: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionAction {
    /// Nothing was decided; ask whether to abandon the edit.
    PromptAbandon,
    Save,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum NavigationOutcome {
    Moved(SuggestionId),
    Stayed(Option<SuggestionId>),
    ReachedEnd(CompletionAction),
}

#[derive(Debug, Clone)]
pub struct ReviewNavigator {
    session: ReviewSession,
    auto_advance: bool,
}

impl ReviewNavigator {
    pub fn new(ordered: Vec<SuggestionId>, auto_advance: bool) -> Self {
        Self {
            session: ReviewSession {
                ordered,
                current: 0,
            },
            auto_advance,
        }
    }

    pub fn session(&self) -> &ReviewSession {
        &self.session
    }

    pub fn auto_advance(&self) -> bool {
        self.auto_advance
    }

    pub fn current(&self) -> Option<SuggestionId> {
        self.session.ordered.get(self.session.current).copied()
    }

    pub fn len(&self) -> usize {
        self.session.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.session.ordered.is_empty()
    }

    fn is_last(&self) -> bool {
        self.session.current + 1 >= self.session.ordered.len()
    }

    pub fn previous(&mut self) -> NavigationOutcome {
        if self.session.current == 0 {
            return NavigationOutcome::Stayed(self.current());
        }
        self.session.current -= 1;
        self.moved()
    }

    /// Step forward. Stepping past the last suggestion leaves the index where
    /// it is and reports how review should finish.
    pub fn next<F>(&mut self, decision_of: F) -> NavigationOutcome
    where
        F: Fn(SuggestionId) -> Decision,
    {
        if !self.is_last() {
            self.session.current += 1;
            return self.moved();
        }
        let any_decided = self
            .session
            .ordered
            .iter()
            .any(|id| decision_of(*id).is_terminal());
        if any_decided {
            NavigationOutcome::ReachedEnd(CompletionAction::Save)
        } else {
            NavigationOutcome::ReachedEnd(CompletionAction::PromptAbandon)
        }
    }

    pub fn select(&mut self, suggestion_id: SuggestionId) -> Result<NavigationOutcome> {
        let Some(index) = self
            .session
            .ordered
            .iter()
            .position(|id| *id == suggestion_id)
        else {
            bail!("{suggestion_id} is not part of this review");
        };
        self.session.current = index;
        Ok(self.moved())
    }

    /// Auto-advance after a decision on the current suggestion.
    pub fn after_decision(&mut self, decision: Decision) -> NavigationOutcome {
        if !self.auto_advance || !decision.is_terminal() {
            return NavigationOutcome::Stayed(self.current());
        }
        if !self.is_last() {
            self.session.current += 1;
            return self.moved();
        }
        match decision {
            Decision::Accepted => NavigationOutcome::ReachedEnd(CompletionAction::Save),
            _ => NavigationOutcome::Stayed(self.current()),
        }
    }

    fn moved(&self) -> NavigationOutcome {
        match self.current() {
            Some(id) => NavigationOutcome::Moved(id),
            None => NavigationOutcome::Stayed(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn navigator(auto_advance: bool) -> ReviewNavigator {
        ReviewNavigator::new(
            vec![SuggestionId(0), SuggestionId(1), SuggestionId(2)],
            auto_advance,
        )
    }

    #[test]
    fn previous_and_next_clamp_at_bounds() {
        let mut nav = navigator(false);
        assert_eq!(nav.previous(), NavigationOutcome::Stayed(Some(SuggestionId(0))));
        assert_eq!(nav.next(|_| Decision::Undecided), NavigationOutcome::Moved(SuggestionId(1)));
        assert_eq!(nav.next(|_| Decision::Undecided), NavigationOutcome::Moved(SuggestionId(2)));
        assert_eq!(
            nav.next(|_| Decision::Undecided),
            NavigationOutcome::ReachedEnd(CompletionAction::PromptAbandon)
        );
        assert_eq!(nav.current(), Some(SuggestionId(2)));
        assert_eq!(
            nav.next(|id| if id == SuggestionId(1) {
                Decision::Rejected
            } else {
                Decision::Undecided
            }),
            NavigationOutcome::ReachedEnd(CompletionAction::Save)
        );
        assert_eq!(nav.previous(), NavigationOutcome::Moved(SuggestionId(1)));
    }

    #[test]
    fn auto_advance_moves_on_terminal_decisions_only() {
        let mut nav = navigator(true);
        assert_eq!(
            nav.after_decision(Decision::Undecided),
            NavigationOutcome::Stayed(Some(SuggestionId(0)))
        );
        assert_eq!(
            nav.after_decision(Decision::Rejected),
            NavigationOutcome::Moved(SuggestionId(1))
        );
        assert_eq!(
            nav.after_decision(Decision::Accepted),
            NavigationOutcome::Moved(SuggestionId(2))
        );
    }

    #[test]
    fn last_suggestion_saves_on_accept_and_stays_on_reject() {
        let mut nav = navigator(true);
        nav.select(SuggestionId(2)).expect("select");
        assert_eq!(
            nav.after_decision(Decision::Rejected),
            NavigationOutcome::Stayed(Some(SuggestionId(2)))
        );
        assert_eq!(
            nav.after_decision(Decision::Accepted),
            NavigationOutcome::ReachedEnd(CompletionAction::Save)
        );
    }

    #[test]
    fn without_auto_advance_decisions_never_move() {
        let mut nav = navigator(false);
        assert_eq!(
            nav.after_decision(Decision::Accepted),
            NavigationOutcome::Stayed(Some(SuggestionId(0)))
        );
    }

    #[test]
    fn select_rejects_unknown_ids() {
        let mut nav = navigator(false);
        assert!(nav.select(SuggestionId(7)).is_err());
        assert_eq!(
            nav.select(SuggestionId(1)).expect("select"),
            NavigationOutcome::Moved(SuggestionId(1))
        );
    }

    #[test]
    fn empty_review_reaches_end_immediately() {
        let mut nav = ReviewNavigator::new(Vec::new(), true);
        assert_eq!(nav.current(), None);
        assert_eq!(
            nav.next(|_| Decision::Undecided),
            NavigationOutcome::ReachedEnd(CompletionAction::PromptAbandon)
        );
    }
}
