use std::cell::RefCell;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;
use structured_tasks_core::config::{Platform, TaskConfig, load_config};
use structured_tasks_core::decisions::ReasonResponse;
use structured_tasks_core::document::LinearItem;
use structured_tasks_core::events::{EventBus, ReviewEvent};
use structured_tasks_core::insertion::find_insertion_offset;
use structured_tasks_core::marker::{Decision, ImageRejectionReason, LinkRejectionReason};
use structured_tasks_core::matcher::MatchReport;
use structured_tasks_core::navigator::NavigationOutcome;
use structured_tasks_core::page::{load_image_suggestion, load_link_suggestions, load_page};
use structured_tasks_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, init_layout,
    normalize_for_display, resolve_paths,
};
use structured_tasks_core::task::{
    DesktopSurface, IMAGE_SUGGESTION_ID, ImageRecommendationTask, LinkRecommendationTask,
    MobileSurface, ReviewSurface, SaveGate, StructuredTask,
};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    name = "structured-tasks",
    version,
    about = "Annotate pages with link and image suggestions and replay reviews"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    project_root: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    project_root: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            project_root: cli.project_root.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init(InitArgs),
    #[command(about = "Match link suggestions against a page and report the fragments")]
    Annotate(AnnotateArgs),
    #[command(about = "Replay a link review and print the save plan")]
    Review(ReviewArgs),
    #[command(about = "Place an image suggestion and optionally decide it")]
    Image(ImageArgs),
    #[command(name = "insertion-point", about = "Show where an image would be inserted")]
    InsertionPoint(InsertionPointArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct AnnotateArgs {
    page: PathBuf,
    #[arg(long, value_name = "PATH")]
    suggestions: PathBuf,
    #[arg(long, help = "Print the report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct ReviewArgs {
    page: PathBuf,
    #[arg(long, value_name = "PATH")]
    suggestions: PathBuf,
    #[arg(
        long,
        value_delimiter = ',',
        value_name = "STEP",
        help = "Steps applied to the current suggestion: accept, reject:<reason>, skip, back, undo"
    )]
    decisions: Vec<String>,
    #[arg(long, value_name = "desktop|mobile")]
    platform: Option<String>,
}

#[derive(Debug, Args)]
struct ImageArgs {
    page: PathBuf,
    #[arg(long, value_name = "PATH")]
    suggestion: PathBuf,
    #[arg(long, conflicts_with = "reject")]
    accept: bool,
    #[arg(long, value_delimiter = ',', value_name = "REASON")]
    reject: Vec<String>,
    #[arg(long, value_name = "desktop|mobile")]
    platform: Option<String>,
}

#[derive(Debug, Args)]
struct InsertionPointArgs {
    page: PathBuf,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Annotate(args)) => run_annotate(&runtime, args),
        Some(Commands::Review(args)) => run_review(&runtime, args),
        Some(Commands::Image(args)) => run_image(&runtime, args),
        Some(Commands::InsertionPoint(args)) => run_insertion_point(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "structured_tasks=info,structured_tasks_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let workspace = Workspace::resolve(runtime)?;
    let report = init_layout(&workspace.paths, &InitOptions { force: args.force })?;

    println!("Initialized structured-tasks layout");
    println!("project_root: {}", normalize_for_display(&workspace.paths.project_root));
    println!("state_dir: {}", normalize_for_display(&workspace.paths.state_dir));
    println!("pages_dir: {}", normalize_for_display(&workspace.paths.pages_dir));
    println!(
        "suggestions_dir: {}",
        normalize_for_display(&workspace.paths.suggestions_dir)
    );
    println!("config_path: {}", normalize_for_display(&workspace.paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", report.wrote_config);
    workspace.print_diagnostics(runtime);
    Ok(())
}

#[derive(Debug, Serialize)]
struct AnnotateOutput {
    page: String,
    content_hash: String,
    suggestions: usize,
    report: MatchReport,
    fragments: Vec<FragmentOutput>,
    exhausted_events: usize,
}

#[derive(Debug, Serialize)]
struct FragmentOutput {
    suggestion: String,
    target: String,
    start: usize,
    end: usize,
    text: String,
}

fn run_annotate(runtime: &RuntimeOptions, args: AnnotateArgs) -> Result<()> {
    let workspace = Workspace::resolve(runtime)?;
    let page = load_page(&workspace.input(&args.page)?)?;
    let document = page.parse(&workspace.config.wikitext_options())?;
    let suggestions = load_link_suggestions(
        &workspace.input(&args.suggestions)?,
        &workspace.config.link_filter()?,
    )?;
    let suggestion_count = suggestions.len();

    let exhausted = Rc::new(RefCell::new(0usize));
    let mut events = EventBus::new();
    let sink = Rc::clone(&exhausted);
    events.subscribe(move |event| {
        if matches!(event, ReviewEvent::MatchesExhausted { .. }) {
            *sink.borrow_mut() += 1;
        }
    });
    let task = LinkRecommendationTask::load(document, suggestions, events)?;

    let machine = task.core().machine();
    let mut fragments = Vec::new();
    for id in task.review_order() {
        let range = machine.fragments().range(task.document(), id)?;
        let target = task
            .suggestions()
            .get(id)
            .map(|suggestion| suggestion.target.clone())
            .unwrap_or_default();
        fragments.push(FragmentOutput {
            suggestion: id.to_string(),
            target,
            start: range.start,
            end: range.end,
            text: task.document().text_in(range),
        });
    }
    let output = AnnotateOutput {
        page: normalize_for_display(&page.path),
        content_hash: page.content_hash.clone(),
        suggestions: suggestion_count,
        report: task.report().clone(),
        fragments,
        exhausted_events: *exhausted.borrow(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("annotate");
        println!("page: {}", output.page);
        println!("content_hash: {}", output.content_hash);
        println!("suggestions: {}", output.suggestions);
        println!("matched: {}", output.report.matched.len());
        println!("inert: {}", output.report.inert.len());
        println!("unmatched: {}", output.report.unmatched.len());
        for fragment in &output.fragments {
            println!(
                "fragment: {} [{}..{}] {:?} -> {}",
                fragment.suggestion, fragment.start, fragment.end, fragment.text, fragment.target
            );
        }
        for phrase in &output.report.unmatched {
            println!(
                "unmatched.phrase: {:?} (seen {}, missing {:?})",
                phrase.phrase, phrase.occurrences_seen, phrase.missing_occurrences
            );
        }
    }
    workspace.print_diagnostics(runtime);
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReviewStep {
    Accept,
    Reject(LinkRejectionReason),
    Skip,
    Back,
    Undo,
}

impl ReviewStep {
    fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if let Some(reason) = value.strip_prefix("reject:") {
            return Ok(Self::Reject(LinkRejectionReason::parse(reason)?));
        }
        match value.to_ascii_lowercase().as_str() {
            "accept" => Ok(Self::Accept),
            "reject" => bail!("reject needs a reason, e.g. reject:everyday"),
            "skip" => Ok(Self::Skip),
            "back" => Ok(Self::Back),
            "undo" => Ok(Self::Undo),
            other => bail!("unknown review step: {other}"),
        }
    }
}

fn run_review(runtime: &RuntimeOptions, args: ReviewArgs) -> Result<()> {
    let workspace = Workspace::resolve(runtime)?;
    let steps = args
        .decisions
        .iter()
        .filter(|value| !value.trim().is_empty())
        .map(|value| ReviewStep::parse(value))
        .collect::<Result<Vec<_>>>()?;
    let platform = workspace.platform(args.platform.as_deref())?;

    let page = load_page(&workspace.input(&args.page)?)?;
    let document = page.parse(&workspace.config.wikitext_options())?;
    let suggestions = load_link_suggestions(
        &workspace.input(&args.suggestions)?,
        &workspace.config.link_filter()?,
    )?;
    let task = LinkRecommendationTask::load(document, suggestions, EventBus::new())?;

    println!("review");
    println!("page: {}", normalize_for_display(&page.path));
    println!("platform: {}", platform.as_str());
    let gate = match platform {
        Platform::Desktop => {
            let mut surface = DesktopSurface::new(task, &workspace.config);
            replay_link_review(&mut surface, &steps)?;
            surface.prepare_save()?
        }
        Platform::Mobile => {
            let mut surface = MobileSurface::new(task);
            replay_link_review(&mut surface, &steps)?;
            surface.prepare_save()?
        }
    };
    print_save_gate(&gate)?;
    workspace.print_diagnostics(runtime);
    Ok(())
}

fn replay_link_review<S>(surface: &mut S, steps: &[ReviewStep]) -> Result<()>
where
    S: ReviewSurface<Task = LinkRecommendationTask>,
{
    let engine = surface.engine_mut();
    for (index, step) in steps.iter().enumerate() {
        let Some(current) = engine.current() else {
            bail!("step {} ({step:?}) has no suggestion to act on", index + 1);
        };
        let outcome = match step {
            ReviewStep::Accept => engine.toggle_accept_current()?,
            ReviewStep::Reject(reason) => {
                engine.begin_reject_current()?;
                engine.resolve_rejection(ReasonResponse::Submit(*reason))?
            }
            ReviewStep::Skip => engine.next(),
            ReviewStep::Back => engine.previous(),
            ReviewStep::Undo => match engine.task().decision(current)? {
                Decision::Accepted => engine.toggle_accept_current()?,
                Decision::Rejected => {
                    engine.begin_reject_current()?;
                    engine.resolve_rejection(ReasonResponse::Withdraw)?
                }
                Decision::Undecided => NavigationOutcome::Stayed(Some(current)),
            },
        };
        debug!(step = index + 1, suggestion = %current, ?outcome, "replayed review step");
        println!("step.{}: {current} {step:?} -> {}", index + 1, describe_outcome(outcome));
    }
    Ok(())
}

fn describe_outcome(outcome: NavigationOutcome) -> String {
    match outcome {
        NavigationOutcome::Moved(id) => format!("moved to {id}"),
        NavigationOutcome::Stayed(Some(id)) => format!("stayed on {id}"),
        NavigationOutcome::Stayed(None) => "stayed".to_string(),
        NavigationOutcome::ReachedEnd(action) => format!("reached end ({action:?})"),
    }
}

fn run_image(runtime: &RuntimeOptions, args: ImageArgs) -> Result<()> {
    let workspace = Workspace::resolve(runtime)?;
    let platform = workspace.platform(args.platform.as_deref())?;
    let reasons = args
        .reject
        .iter()
        .filter(|value| !value.trim().is_empty())
        .map(|value| ImageRejectionReason::parse(value))
        .collect::<Result<BTreeSet<_>>>()?;

    let page = load_page(&workspace.input(&args.page)?)?;
    let document = page.parse(&workspace.config.wikitext_options())?;
    let suggestion = load_image_suggestion(&workspace.input(&args.suggestion)?)?;
    let mut task = ImageRecommendationTask::load(document, suggestion, EventBus::new())?;

    println!("image");
    println!("page: {}", normalize_for_display(&page.path));
    println!("image: {}", task.suggestion().filename());
    println!("insertion.offset: {}", task.insertion().offset);
    println!("insertion.fell_back: {}", task.insertion().fell_back);

    if args.accept {
        task.toggle_accept(IMAGE_SUGGESTION_ID)?;
    } else if !reasons.is_empty() {
        task.begin_reject(IMAGE_SUGGESTION_ID)?;
        task.resolve_rejection(ReasonResponse::Submit(reasons))?;
    }
    println!("decision: {}", task.decision(IMAGE_SUGGESTION_ID)?.as_str());

    let gate = match platform {
        Platform::Desktop => DesktopSurface::new(task, &workspace.config).prepare_save()?,
        Platform::Mobile => MobileSurface::new(task).prepare_save()?,
    };
    print_save_gate(&gate)?;
    workspace.print_diagnostics(runtime);
    Ok(())
}

fn run_insertion_point(runtime: &RuntimeOptions, args: InsertionPointArgs) -> Result<()> {
    let workspace = Workspace::resolve(runtime)?;
    let page = load_page(&workspace.input(&args.page)?)?;
    let document = page.parse(&workspace.config.wikitext_options())?;
    let point = find_insertion_offset(&document);

    println!("insertion-point");
    println!("page: {}", normalize_for_display(&page.path));
    println!("document_length: {}", document.len());
    println!("offset: {}", point.offset);
    println!("fell_back: {}", format_flag(point.fell_back));
    let following = document
        .linear_items()
        .into_iter()
        .skip(point.offset)
        .filter_map(|item| match item {
            LinearItem::Char { ch, .. } => Some(ch),
            _ => None,
        })
        .take(40)
        .collect::<String>();
    println!("following_text: {following:?}");
    workspace.print_diagnostics(runtime);
    Ok(())
}

fn print_save_gate(gate: &SaveGate) -> Result<()> {
    match gate {
        SaveGate::NotSaveable => println!("saveable: no"),
        SaveGate::Ready(plan) => {
            println!("saveable: yes");
            println!("null_edit: {}", format_flag(plan.null_edit));
            println!("show_diff: {}", format_flag(plan.show_diff));
        }
    }
    println!("{}", serde_json::to_string_pretty(gate)?);
    Ok(())
}

struct Workspace {
    context: ResolutionContext,
    paths: ResolvedPaths,
    config: TaskConfig,
}

impl Workspace {
    fn resolve(runtime: &RuntimeOptions) -> Result<Self> {
        dotenvy::dotenv().ok();

        let context = ResolutionContext::from_process()?;
        let overrides = PathOverrides {
            project_root: runtime.project_root.clone(),
            config: runtime.config.clone(),
        };

        let initial = resolve_paths(&context, &overrides)?;
        let project_env = initial.project_root.join(".env");
        load_project_env(&project_env);

        let paths = resolve_paths(&context, &overrides)?;
        let config = load_config(&paths.config_path)?;
        info!(
            project_root = %normalize_for_display(&paths.project_root),
            config = %normalize_for_display(&paths.config_path),
            "resolved runtime"
        );
        Ok(Self {
            context,
            paths,
            config,
        })
    }

    fn input(&self, argument: &Path) -> Result<PathBuf> {
        self.paths.resolve_input(&self.context, argument)
    }

    fn platform(&self, flag: Option<&str>) -> Result<Platform> {
        match flag {
            Some(value) => Platform::parse(value).context("invalid --platform"),
            None => self.config.platform(),
        }
    }

    fn print_diagnostics(&self, runtime: &RuntimeOptions) {
        if runtime.diagnostics {
            println!("\n[diagnostics]\n{}", self.paths.diagnostics());
        }
    }
}

/// Returns whether `project_env` was applied. A file that fails to parse is
/// skipped with a warning.
fn load_project_env(project_env: &Path) -> bool {
    if !project_env.exists() {
        return false;
    }
    match dotenvy::from_path_override(project_env) {
        Ok(()) => true,
        Err(error) => {
            warn!(
                path = %normalize_for_display(project_env),
                %error,
                "ignoring unreadable project .env"
            );
            false
        }
    }
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
