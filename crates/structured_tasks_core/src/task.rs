use std::collections::BTreeSet;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use crate::config::{Platform, TaskConfig};
use crate::decisions::{DecisionStateMachine, PendingRejection, ReasonResponse, RejectionOutcome};
use crate::document::Document;
use crate::events::EventBus;
use crate::fragments::FragmentTracker;
use crate::insertion::{InsertionPoint, find_insertion_offset};
use crate::marker::{Decision, ImageMarker, LinkMarker, ReviewMarker, SuggestionId};
use crate::matcher::{MatchReport, annotate_suggestions};
use crate::navigator::{NavigationOutcome, ReviewNavigator};
use crate::submission::{ImageSubmission, LinkSubmission, is_saveable};
use crate::suggestions::{ImageSuggestion, SuggestionSet};
use crate::wikitext::normalize_title;

/// The image task reviews exactly one candidate.
pub const IMAGE_SUGGESTION_ID: SuggestionId = SuggestionId(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    LinkRecommendation,
    ImageRecommendation,
}

impl TaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LinkRecommendation => "link-recommendation",
            Self::ImageRecommendation => "image-recommendation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SubmissionPayload {
    Links(LinkSubmission),
    Image(ImageSubmission),
}

impl SubmissionPayload {
    pub fn is_null_edit(&self) -> bool {
        match self {
            Self::Links(links) => links.is_null_edit(),
            Self::Image(image) => image.is_null_edit(),
        }
    }
}

/// Document, decision machine and event bus shared by every task type.
#[derive(Debug)]
pub struct TaskCore<M: ReviewMarker> {
    document: Document,
    machine: DecisionStateMachine<M>,
    events: EventBus,
}

impl<M: ReviewMarker> TaskCore<M> {
    pub fn new(document: Document, fragments: FragmentTracker, events: EventBus) -> Result<Self> {
        let machine = DecisionStateMachine::new(&document, fragments)?;
        Ok(Self {
            document,
            machine,
            events,
        })
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    pub fn machine(&self) -> &DecisionStateMachine<M> {
        &self.machine
    }

    pub fn toggle_accept(&mut self, suggestion_id: SuggestionId) -> Result<Decision> {
        self.machine
            .toggle_accept(&mut self.document, &mut self.events, suggestion_id)
    }

    pub fn begin_reject(&mut self, suggestion_id: SuggestionId) -> Result<PendingRejection<M::Reasons>> {
        self.machine.begin_reject(&self.document, suggestion_id)
    }

    pub fn resolve_rejection(
        &mut self,
        response: ReasonResponse<M::Reasons>,
    ) -> Result<RejectionOutcome> {
        self.machine
            .resolve_rejection(&mut self.document, &mut self.events, response)
    }
}

pub type ReasonsOf<T> = <<T as StructuredTask>::Marker as ReviewMarker>::Reasons;

/// Capability shared by link and image recommendation tasks.
pub trait StructuredTask {
    type Marker: ReviewMarker;

    fn kind(&self) -> TaskKind;
    fn core(&self) -> &TaskCore<Self::Marker>;
    fn core_mut(&mut self) -> &mut TaskCore<Self::Marker>;
    fn payload(&self) -> Result<SubmissionPayload>;

    fn document(&self) -> &Document {
        self.core().document()
    }

    /// Reader edits go straight to the document; fragments follow them.
    fn document_mut(&mut self) -> &mut Document {
        self.core_mut().document_mut()
    }

    fn events_mut(&mut self) -> &mut EventBus {
        self.core_mut().events_mut()
    }

    fn review_order(&self) -> Vec<SuggestionId> {
        self.core().machine().ids()
    }

    fn decision(&self, suggestion_id: SuggestionId) -> Result<Decision> {
        self.core().machine().decision(suggestion_id)
    }

    fn toggle_accept(&mut self, suggestion_id: SuggestionId) -> Result<Decision> {
        self.core_mut().toggle_accept(suggestion_id)
    }

    fn begin_reject(&mut self, suggestion_id: SuggestionId) -> Result<PendingRejection<ReasonsOf<Self>>> {
        self.core_mut().begin_reject(suggestion_id)
    }

    fn resolve_rejection(&mut self, response: ReasonResponse<ReasonsOf<Self>>) -> Result<RejectionOutcome> {
        self.core_mut().resolve_rejection(response)
    }

    /// Decisions whose spans survive in the document; see
    /// [`DecisionStateMachine::effective_decisions`].
    fn effective_decisions(&self) -> Vec<(SuggestionId, Decision)> {
        self.core().machine().effective_decisions(self.document())
    }

    fn is_saveable(&self) -> bool {
        is_saveable(
            self.effective_decisions()
                .into_iter()
                .map(|(_, decision)| decision),
        )
    }

    fn is_null_edit(&self) -> Result<bool> {
        Ok(self.payload()?.is_null_edit())
    }
}

#[derive(Debug)]
pub struct LinkRecommendationTask {
    core: TaskCore<LinkMarker>,
    suggestions: SuggestionSet,
    report: MatchReport,
}

impl LinkRecommendationTask {
    /// Annotate the document and start tracking every matched suggestion.
    pub fn load(
        mut document: Document,
        suggestions: SuggestionSet,
        mut events: EventBus,
    ) -> Result<Self> {
        let report = annotate_suggestions(&mut document, &suggestions, &mut events)?;
        let fragments = FragmentTracker::build::<LinkMarker>(&mut document)?;
        let core = TaskCore::new(document, fragments, events)?;
        info!(
            suggestions = suggestions.len(),
            reviewable = core.machine().ids().len(),
            unmatched = report.unmatched.len(),
            "loaded link recommendation task"
        );
        Ok(Self {
            core,
            suggestions,
            report,
        })
    }

    pub fn report(&self) -> &MatchReport {
        &self.report
    }

    pub fn suggestions(&self) -> &SuggestionSet {
        &self.suggestions
    }

    fn target(&self, suggestion_id: SuggestionId) -> Result<String> {
        let suggestion = self
            .suggestions
            .get(suggestion_id)
            .with_context(|| format!("unknown {suggestion_id}"))?;
        Ok(normalize_title(&suggestion.target).unwrap_or_else(|| suggestion.target.clone()))
    }
}

impl StructuredTask for LinkRecommendationTask {
    type Marker = LinkMarker;

    fn kind(&self) -> TaskKind {
        TaskKind::LinkRecommendation
    }

    fn core(&self) -> &TaskCore<LinkMarker> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore<LinkMarker> {
        &mut self.core
    }

    fn payload(&self) -> Result<SubmissionPayload> {
        let entries = self
            .effective_decisions()
            .into_iter()
            .map(|(id, decision)| Ok((self.target(id)?, decision)))
            .collect::<Result<Vec<_>>>()?;
        Ok(SubmissionPayload::Links(LinkSubmission::aggregate(entries)))
    }
}

#[derive(Debug)]
pub struct ImageRecommendationTask {
    core: TaskCore<ImageMarker>,
    suggestion: ImageSuggestion,
    insertion: InsertionPoint,
}

impl ImageRecommendationTask {
    /// Place the image marker at the first content offset and track it.
    pub fn load(
        mut document: Document,
        suggestion: ImageSuggestion,
        events: EventBus,
    ) -> Result<Self> {
        let insertion = find_insertion_offset(&document);
        let marker = ImageMarker {
            suggestion_id: IMAGE_SUGGESTION_ID,
            filename: suggestion.filename().to_string(),
            decision: Decision::Undecided,
            reasons: BTreeSet::new(),
        };
        let node = document
            .insert_leaf(insertion.offset, marker.into_node())
            .with_context(|| format!("failed to insert image at offset {}", insertion.offset))?;
        let mut fragments = FragmentTracker::new();
        fragments.track_node(&mut document, IMAGE_SUGGESTION_ID, node)?;
        let core = TaskCore::new(document, fragments, events)?;
        info!(
            image = suggestion.filename(),
            offset = insertion.offset,
            fell_back = insertion.fell_back,
            "loaded image recommendation task"
        );
        Ok(Self {
            core,
            suggestion,
            insertion,
        })
    }

    pub fn suggestion(&self) -> &ImageSuggestion {
        &self.suggestion
    }

    pub fn insertion(&self) -> InsertionPoint {
        self.insertion
    }
}

impl StructuredTask for ImageRecommendationTask {
    type Marker = ImageMarker;

    fn kind(&self) -> TaskKind {
        TaskKind::ImageRecommendation
    }

    fn core(&self) -> &TaskCore<ImageMarker> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut TaskCore<ImageMarker> {
        &mut self.core
    }

    fn payload(&self) -> Result<SubmissionPayload> {
        let machine = self.core.machine();
        let decision = self
            .effective_decisions()
            .into_iter()
            .find_map(|(id, decision)| (id == IMAGE_SUGGESTION_ID).then_some(decision))
            .with_context(|| format!("{IMAGE_SUGGESTION_ID} is not tracked"))?;
        let reasons = machine.reasons(IMAGE_SUGGESTION_ID)?;
        Ok(SubmissionPayload::Image(ImageSubmission::aggregate(
            self.suggestion.filename(),
            decision,
            reasons,
        )))
    }
}

/// A task plus the navigation and auto-advance policy around it.
#[derive(Debug)]
pub struct ReviewEngine<T: StructuredTask> {
    task: T,
    navigator: ReviewNavigator,
}

impl<T: StructuredTask> ReviewEngine<T> {
    pub fn new(task: T, auto_advance: bool) -> Self {
        let navigator = ReviewNavigator::new(task.review_order(), auto_advance);
        Self { task, navigator }
    }

    pub fn task(&self) -> &T {
        &self.task
    }

    pub fn task_mut(&mut self) -> &mut T {
        &mut self.task
    }

    pub fn navigator(&self) -> &ReviewNavigator {
        &self.navigator
    }

    pub fn current(&self) -> Option<SuggestionId> {
        self.navigator.current()
    }

    fn require_current(&self) -> Result<SuggestionId> {
        self.current().context("there is nothing to review")
    }

    pub fn previous(&mut self) -> NavigationOutcome {
        self.navigator.previous()
    }

    pub fn next(&mut self) -> NavigationOutcome {
        let task = &self.task;
        self.navigator
            .next(|id| task.decision(id).unwrap_or(Decision::Undecided))
    }

    pub fn select(&mut self, suggestion_id: SuggestionId) -> Result<NavigationOutcome> {
        self.navigator.select(suggestion_id)
    }

    pub fn toggle_accept_current(&mut self) -> Result<NavigationOutcome> {
        let suggestion_id = self.require_current()?;
        let decision = self.task.toggle_accept(suggestion_id)?;
        Ok(self.navigator.after_decision(decision))
    }

    pub fn begin_reject_current(&mut self) -> Result<PendingRejection<ReasonsOf<T>>> {
        let suggestion_id = self.require_current()?;
        self.task.begin_reject(suggestion_id)
    }

    pub fn resolve_rejection(
        &mut self,
        response: ReasonResponse<ReasonsOf<T>>,
    ) -> Result<NavigationOutcome> {
        let pending = self.task.core().machine().pending();
        let outcome = self.task.resolve_rejection(response)?;
        if outcome == RejectionOutcome::Committed && pending == self.current() {
            return Ok(self.navigator.after_decision(Decision::Rejected));
        }
        Ok(NavigationOutcome::Stayed(self.current()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PostEditPanel {
    Completed,
    /// Shown after a save that changed no content.
    NoEdit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavePlan {
    pub task: TaskKind,
    pub platform: Platform,
    pub payload: SubmissionPayload,
    pub null_edit: bool,
    pub show_diff: bool,
    pub post_edit_panel: PostEditPanel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SaveGate {
    NotSaveable,
    Ready(SavePlan),
}

/// Platform-specific wrapper around a review engine.
pub trait ReviewSurface {
    type Task: StructuredTask;

    fn platform(&self) -> Platform;
    fn engine(&self) -> &ReviewEngine<Self::Task>;
    fn engine_mut(&mut self) -> &mut ReviewEngine<Self::Task>;
    fn shows_diff(&self, null_edit: bool) -> bool;

    fn prepare_save(&self) -> Result<SaveGate> {
        let task = self.engine().task();
        if !task.is_saveable() {
            info!(platform = self.platform().as_str(), "save blocked: nothing decided yet");
            return Ok(SaveGate::NotSaveable);
        }
        let payload = task.payload()?;
        let null_edit = payload.is_null_edit();
        Ok(SaveGate::Ready(SavePlan {
            task: task.kind(),
            platform: self.platform(),
            show_diff: self.shows_diff(null_edit),
            post_edit_panel: if null_edit {
                PostEditPanel::NoEdit
            } else {
                PostEditPanel::Completed
            },
            null_edit,
            payload,
        }))
    }
}

#[derive(Debug)]
pub struct DesktopSurface<T: StructuredTask> {
    engine: ReviewEngine<T>,
}

impl<T: StructuredTask> DesktopSurface<T> {
    pub fn new(task: T, config: &TaskConfig) -> Self {
        Self {
            engine: ReviewEngine::new(task, config.auto_advance()),
        }
    }
}

impl<T: StructuredTask> ReviewSurface for DesktopSurface<T> {
    type Task = T;

    fn platform(&self) -> Platform {
        Platform::Desktop
    }

    fn engine(&self) -> &ReviewEngine<T> {
        &self.engine
    }

    fn engine_mut(&mut self) -> &mut ReviewEngine<T> {
        &mut self.engine
    }

    fn shows_diff(&self, null_edit: bool) -> bool {
        !null_edit
    }
}

#[derive(Debug)]
pub struct MobileSurface<T: StructuredTask> {
    engine: ReviewEngine<T>,
}

impl<T: StructuredTask> MobileSurface<T> {
    pub fn new(task: T) -> Self {
        Self {
            engine: ReviewEngine::new(task, true),
        }
    }
}

impl<T: StructuredTask> ReviewSurface for MobileSurface<T> {
    type Task = T;

    fn platform(&self) -> Platform {
        Platform::Mobile
    }

    fn engine(&self) -> &ReviewEngine<T> {
        &self.engine
    }

    fn engine_mut(&mut self) -> &mut ReviewEngine<T> {
        &mut self.engine
    }

    fn shows_diff(&self, _null_edit: bool) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReviewSection;
    use crate::marker::{ImageRejectionReason, LinkRejectionReason};
    use crate::navigator::CompletionAction;
    use crate::suggestions::LinkSuggestionInput;
    use crate::wikitext::{WikitextOptions, parse_wikitext};

    fn link_task(source: &str, phrases: &[(&str, usize, &str)]) -> LinkRecommendationTask {
        let document = parse_wikitext(source, &WikitextOptions::default()).expect("parse");
        let inputs = phrases
            .iter()
            .map(|(text, occurrence_index, target)| LinkSuggestionInput {
                text: text.to_string(),
                target: target.to_string(),
                occurrence_index: *occurrence_index,
                score: 0.9,
                document_offset_hint: None,
                context_before: String::new(),
                context_after: String::new(),
            })
            .collect();
        LinkRecommendationTask::load(document, SuggestionSet::new(inputs), EventBus::new())
            .expect("load")
    }

    fn image_task(source: &str) -> ImageRecommendationTask {
        let document = parse_wikitext(source, &WikitextOptions::default()).expect("parse");
        let suggestion =
            ImageSuggestion::from_json(r#"{"image": "Paris.jpg", "source": "wikidata"}"#)
                .expect("image");
        ImageRecommendationTask::load(document, suggestion, EventBus::new()).expect("load")
    }

    #[test]
    fn desktop_link_review_saves_after_last_accept() {
        let task = link_task(
            "Paris lies on the Seine.",
            &[("Paris", 0, "Paris"), ("Seine", 0, "Seine")],
        );
        let mut surface = DesktopSurface::new(task, &TaskConfig::default());
        assert_eq!(surface.prepare_save().expect("gate"), SaveGate::NotSaveable);

        let engine = surface.engine_mut();
        assert_eq!(engine.current(), Some(SuggestionId(0)));
        assert_eq!(
            engine.toggle_accept_current().expect("accept"),
            NavigationOutcome::Moved(SuggestionId(1))
        );
        assert_eq!(
            engine.toggle_accept_current().expect("accept"),
            NavigationOutcome::ReachedEnd(CompletionAction::Save)
        );

        let SaveGate::Ready(plan) = surface.prepare_save().expect("gate") else {
            panic!("expected a saveable review");
        };
        assert!(plan.show_diff);
        assert!(!plan.null_edit);
        assert_eq!(plan.post_edit_panel, PostEditPanel::Completed);
        assert_eq!(
            plan.payload,
            SubmissionPayload::Links(LinkSubmission {
                accepted_targets: vec!["Paris".to_string(), "Seine".to_string()],
                rejected_targets: Vec::new(),
                skipped_targets: Vec::new(),
            })
        );
    }

    #[test]
    fn desktop_respects_disabled_auto_advance() {
        let task = link_task("Paris lies on the Seine.", &[("Paris", 0, "Paris"), ("Seine", 0, "Seine")]);
        let config = TaskConfig {
            review: ReviewSection {
                auto_advance: Some(false),
                platform: None,
            },
            ..TaskConfig::default()
        };
        let mut surface = DesktopSurface::new(task, &config);
        assert_eq!(
            surface.engine_mut().toggle_accept_current().expect("accept"),
            NavigationOutcome::Stayed(Some(SuggestionId(0)))
        );
    }

    #[test]
    fn rejecting_everything_is_a_saveable_null_edit() {
        let task = link_task("Paris lies on the Seine.", &[("Paris", 0, "Paris"), ("Seine", 0, "Seine")]);
        let mut surface = DesktopSurface::new(task, &TaskConfig::default());
        let engine = surface.engine_mut();
        for _ in 0..2 {
            engine.begin_reject_current().expect("begin");
            engine
                .resolve_rejection(ReasonResponse::Submit(LinkRejectionReason::Everyday))
                .expect("resolve");
        }
        assert!(engine.task().is_saveable());
        assert!(engine.task().is_null_edit().expect("null edit"));

        let SaveGate::Ready(plan) = surface.prepare_save().expect("gate") else {
            panic!("expected a saveable review");
        };
        assert!(plan.null_edit);
        assert!(!plan.show_diff);
        assert_eq!(plan.post_edit_panel, PostEditPanel::NoEdit);
    }

    #[test]
    fn reject_on_last_suggestion_does_not_advance() {
        let task = link_task("Paris lies on the Seine.", &[("Paris", 0, "Paris"), ("Seine", 0, "Seine")]);
        let mut surface = MobileSurface::new(task);
        let engine = surface.engine_mut();
        engine.select(SuggestionId(1)).expect("select");
        engine.begin_reject_current().expect("begin");
        assert_eq!(
            engine
                .resolve_rejection(ReasonResponse::Submit(LinkRejectionReason::Other))
                .expect("resolve"),
            NavigationOutcome::Stayed(Some(SuggestionId(1)))
        );
        assert_eq!(
            engine.next(),
            NavigationOutcome::ReachedEnd(CompletionAction::Save)
        );
    }

    #[test]
    fn mobile_image_review_never_shows_diff() {
        let mut surface = MobileSurface::new(image_task("{{Infobox}}\n\nParis is a city."));
        let task = surface.engine().task();
        assert_eq!(task.review_order(), vec![IMAGE_SUGGESTION_ID]);
        assert!(!task.insertion().fell_back);

        let engine = surface.engine_mut();
        assert_eq!(
            engine.toggle_accept_current().expect("accept"),
            NavigationOutcome::ReachedEnd(CompletionAction::Save)
        );
        let SaveGate::Ready(plan) = surface.prepare_save().expect("gate") else {
            panic!("expected a saveable review");
        };
        assert!(!plan.show_diff);
        assert_eq!(plan.platform, Platform::Mobile);
        assert_eq!(
            plan.payload,
            SubmissionPayload::Image(ImageSubmission {
                filename: "Paris.jpg".to_string(),
                accepted: true,
                reasons: Vec::new(),
            })
        );
    }

    #[test]
    fn image_marker_sits_before_first_character() {
        let task = image_task("{{Infobox}}\n\nParis is a city.");
        let document = task.document();
        let paragraph = document.children(document.root())[1];
        let first = document.children(paragraph)[0];
        assert!(matches!(
            document.kind(first),
            Some(crate::document::NodeKind::ImageSuggestion(_))
        ));
    }

    #[test]
    fn image_rejection_reports_reason_set() {
        let mut task = image_task("Paris is a city.");
        task.begin_reject(IMAGE_SUGGESTION_ID).expect("begin");
        task.resolve_rejection(ReasonResponse::Submit(BTreeSet::from([
            ImageRejectionReason::Unfamiliar,
        ])))
        .expect("resolve");
        assert_eq!(
            task.payload().expect("payload"),
            SubmissionPayload::Image(ImageSubmission {
                filename: "Paris.jpg".to_string(),
                accepted: false,
                reasons: vec!["unfamiliar".to_string()],
            })
        );
        assert!(task.is_null_edit().expect("null edit"));
    }
}
