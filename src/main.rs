use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::*;
use tracing_subscriber::EnvFilter;

use quizwire::aggregate::{
    best_result, composite_score, correction_banner, model_score_line, score_band,
    speech_summary, CorrectionBanner, ScoreBand,
};
use quizwire::api::ApiClient;
use quizwire::cli::{resolve_base_url, Cli, Command};
use quizwire::config::ClientConfig;
use quizwire::error::{Error, Result};
use quizwire::events::BattleResult;
use quizwire::session::{
    AnswerSlot, CellKey, CellStatus, HttpTransport, ModelId, RoleRef, SessionCoordinator,
    SessionSnapshot, UserRef,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quizwire=warn")),
        )
        .with_writer(io::stderr)
        .init();

    if let Err(err) = run().await {
        eprintln!("{} {}", "error:".bright_red().bold(), err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = ClientConfig::load(cli.config.as_deref())?;
    let base_url = resolve_base_url(cli.base_url.as_deref(), &config);

    // Plain lookups get a timeout; the streaming client must not have one,
    // since a scoring stream legitimately runs for minutes.
    let rest_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .build()?;
    let api = ApiClient::new(rest_client, &base_url);

    match cli.command {
        Command::Models => list_models(&api).await,
        Command::Users => list_users(&api).await,
        Command::Roles => list_roles(&api).await,
        Command::Question { id, category } => show_question(&api, id, category).await,
        Command::FollowUp { record, question, model } => {
            run_follow_up(&base_url, record, &question, model).await
        }
        Command::Practice {
            question,
            category,
            user,
            answer,
            models,
            opponent,
            opponent_answer,
            role,
            difficulty,
        } => {
            let practice = PracticeArgs {
                question,
                category,
                user,
                answer,
                models,
                opponent,
                opponent_answer,
                role,
                difficulty,
            };
            run_practice(&api, &base_url, practice).await
        }
    }
}

// ---------------------------------------------------------------------------
// Lookup commands
// ---------------------------------------------------------------------------

async fn list_models(api: &ApiClient) -> Result<()> {
    for model in api.get_ai_models().await? {
        let state = if !model.is_enabled {
            "disabled".bright_black()
        } else if !model.has_api_key {
            "no api key".bright_red()
        } else if model.is_default {
            "default".bright_green()
        } else {
            "enabled".normal()
        };
        println!(
            "{:>4}  {}  {} [{}]",
            model.id.to_string().bright_yellow(),
            model.name.bright_white(),
            model.model_name.bright_black(),
            state
        );
    }
    Ok(())
}

async fn list_users(api: &ApiClient) -> Result<()> {
    for user in api.get_users().await? {
        println!(
            "{:>4}  {}  answers: {}, avg: {:.1}",
            user.id.to_string().bright_yellow(),
            user.label().bright_white(),
            user.total_answers,
            user.avg_score
        );
    }
    Ok(())
}

async fn list_roles(api: &ApiClient) -> Result<()> {
    for role in api.get_ai_roles().await? {
        let state = if role.is_enabled { "enabled".normal() } else { "disabled".bright_black() };
        println!(
            "{:>12}  {}  {} [{}]",
            role.role_key.bright_yellow(),
            role.name.bright_white(),
            role.difficulty_level.bright_black(),
            state
        );
    }
    Ok(())
}

async fn show_question(api: &ApiClient, id: Option<u64>, category: Option<u64>) -> Result<()> {
    let question = match id {
        Some(id) => api.get_question(id).await?,
        None => api.get_random_question(category).await?,
    };
    println!("{} {}", format!("#{}", question.id).bright_yellow(), question.title.bright_white().bold());
    if !question.category_name.is_empty() {
        println!("{}: {}", "Category".bright_yellow(), question.category_name);
    }
    if !question.key_points.is_empty() {
        println!("{}:", "Key points".bright_yellow());
        for point in &question.key_points {
            println!("  - {}", point);
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Practice (solo and battle)
// ---------------------------------------------------------------------------

struct PracticeArgs {
    question: Option<u64>,
    category: Option<u64>,
    user: u64,
    answer: String,
    models: Vec<u64>,
    opponent: Option<u64>,
    opponent_answer: Option<String>,
    role: Option<String>,
    difficulty: Option<String>,
}

async fn run_practice(api: &ApiClient, base_url: &str, args: PracticeArgs) -> Result<()> {
    let question = match args.question {
        Some(id) => api.get_question(id).await?,
        None => api.get_random_question(args.category).await?,
    };

    let users = api.get_users().await?;
    let user_ref = |id: u64| -> Result<UserRef> {
        users
            .iter()
            .find(|u| u.id == id)
            .map(|u| UserRef { id: u.id, label: u.label().to_string() })
            .ok_or_else(|| Error::Session(format!("unknown user id {}", id)))
    };

    let mut slots = vec![AnswerSlot::with_user(user_ref(args.user)?, args.answer.clone())];
    if let (Some(opponent), Some(answer)) = (args.opponent, args.opponent_answer.as_ref()) {
        slots.push(AnswerSlot::with_user(user_ref(opponent)?, answer.clone()));
    }

    let role = args.role.map(|role_key| RoleRef {
        role_key,
        difficulty_level: args.difficulty,
    });

    let model_names: HashMap<ModelId, String> = api
        .get_ai_models()
        .await?
        .into_iter()
        .map(|m| (m.id, m.name))
        .collect();

    print_practice_header(&question.title, &slots, &args.models, &model_names);

    let stream_client = reqwest::Client::new();
    let transport = Arc::new(HttpTransport::new(stream_client, base_url));
    let coordinator = SessionCoordinator::new(transport);
    let mut rx = coordinator.subscribe();

    coordinator.submit(&slots, &args.models, question.id, role.as_ref())?;

    let mut printer = StreamPrinter::new(model_names);
    loop {
        let snapshot = rx.borrow_and_update().clone();
        printer.render(&snapshot);
        if snapshot.settled() {
            print_practice_footer(&snapshot);
            return Ok(());
        }
        if rx.changed().await.is_err() {
            return Ok(());
        }
    }
}

fn print_practice_header(
    title: &str,
    slots: &[AnswerSlot],
    model_ids: &[ModelId],
    model_names: &HashMap<ModelId, String>,
) {
    println!("{}", "QUIZWIRE PRACTICE".bright_cyan().bold());
    println!("{}: {}", "Question".bright_yellow(), title.bright_white());
    for slot in slots {
        if let Some(user) = &slot.user {
            println!("{}: {}", "Answering".bright_yellow(), user.label);
        }
    }
    let names: Vec<String> = model_ids
        .iter()
        .map(|id| model_names.get(id).cloned().unwrap_or_else(|| format!("model {}", id)))
        .collect();
    println!("{}: {}", "Models".bright_yellow(), names.join(", "));
    if slots.len() == 2 {
        println!("{}", "Battle mode: a head-to-head analysis follows the scores".bright_magenta());
    }
    println!("{}", "=".repeat(50).bright_blue());
}

fn print_practice_footer(snapshot: &SessionSnapshot) {
    println!("\n{}", "=".repeat(50).bright_blue());
    for slot in &snapshot.slots {
        let cells = snapshot.cells_for_slot(&slot.id);
        println!("{}", slot.user_label.bright_white().bold());

        match composite_score(&cells, None) {
            Some(score) => {
                println!(
                    "  {}: {}  ({})",
                    "Composite".bright_yellow(),
                    paint_score(score),
                    model_score_line(&cells)
                );
            }
            None => println!("  {}", "No model produced a score.".bright_red()),
        }

        if let Some(best) = best_result(&cells) {
            if !best.ai_improved_answer.is_empty() {
                println!(
                    "  {} ({}):\n    {}",
                    "Improved answer".bright_yellow(),
                    best.ai_model_name,
                    best.ai_improved_answer.replace('\n', "\n    ")
                );
            }
        }

        let correction = cells.iter().find_map(|c| c.correction.as_ref());
        match correction_banner(correction) {
            CorrectionBanner::Hidden => {}
            CorrectionBanner::NoCorrectionNeeded => {
                println!("  {}", "No correction needed.".bright_green());
            }
            CorrectionBanner::Diff { original, corrected } => {
                println!("  {}: {}", "Original".bright_red(), original);
                println!("  {}: {}", "Corrected".bright_green(), corrected);
            }
        }

        if let Some(summary) = speech_summary(&slot.user_label, &cells, None) {
            println!("  {}: {}", "Summary".bright_yellow(), summary);
        }
    }

    if let Some(result) = snapshot.battle.as_ref().and_then(|b| b.result.as_ref()) {
        print_battle_result(snapshot, result);
    }
}

fn print_battle_result(snapshot: &SessionSnapshot, result: &BattleResult) {
    println!("\n{}", "BATTLE RESULT".bright_magenta().bold());
    let winner_label = match result.winner.as_str() {
        "A" => snapshot.slots.first().map(|s| s.user_label.as_str()),
        "B" => snapshot.slots.get(1).map(|s| s.user_label.as_str()),
        _ => None,
    };
    println!(
        "{}: {}  ({} vs {})",
        "Winner".bright_yellow(),
        winner_label.unwrap_or(&result.winner).bright_green().bold(),
        paint_score(result.score_a),
        paint_score(result.score_b)
    );
    if !result.summary.is_empty() {
        println!("{}: {}", "Summary".bright_yellow(), result.summary);
    }
    for (label, points) in [
        ("A can learn from B", &result.a_can_learn_from_b),
        ("B can learn from A", &result.b_can_learn_from_a),
        ("Both missed", &result.common_missing),
    ] {
        if !points.is_empty() {
            println!("{}:", label.bright_yellow());
            for point in points {
                println!("  - {}", point);
            }
        }
    }
}

fn paint_score(score: u32) -> ColoredString {
    match score_band(score) {
        ScoreBand::Excellent => score.to_string().bright_green().bold(),
        ScoreBand::Good => score.to_string().green(),
        ScoreBand::Fair => score.to_string().yellow(),
        ScoreBand::Poor => score.to_string().bright_red(),
    }
}

// ---------------------------------------------------------------------------
// Incremental stream rendering
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CellProgress {
    thinking: usize,
    content: usize,
    closed: bool,
}

/// Prints each snapshot's newly-appended text, tagging output whenever the
/// stream being echoed changes. Byte offsets are always prior full-string
/// lengths, so slicing stays on char boundaries.
struct StreamPrinter {
    model_names: HashMap<ModelId, String>,
    cells: HashMap<CellKey, CellProgress>,
    battle: CellProgress,
    battle_announced: bool,
    current_tag: Option<String>,
}

impl StreamPrinter {
    fn new(model_names: HashMap<ModelId, String>) -> Self {
        StreamPrinter {
            model_names,
            cells: HashMap::new(),
            battle: CellProgress::default(),
            battle_announced: false,
            current_tag: None,
        }
    }

    fn model_name(&self, id: ModelId) -> String {
        self.model_names.get(&id).cloned().unwrap_or_else(|| format!("model {}", id))
    }

    fn switch_tag(&mut self, tag: &str) {
        if self.current_tag.as_deref() != Some(tag) {
            println!();
            print!("{} ", format!("[{}]", tag).bright_cyan());
            self.current_tag = Some(tag.to_string());
        }
    }

    fn render(&mut self, snapshot: &SessionSnapshot) {
        // Deterministic order: slots as submitted, models as submitted.
        for slot in &snapshot.slots {
            for model in &snapshot.model_ids {
                let key = CellKey { slot: slot.id.clone(), model: *model };
                let Some(cell) = snapshot.cells.get(&key) else { continue };

                let tag = if snapshot.slots.len() > 1 {
                    format!("{} · {}", slot.user_label, self.model_name(*model))
                } else {
                    self.model_name(*model)
                };

                let progress = self.cells.entry(key.clone()).or_default();
                let new_thinking = cell.thinking_text.len() > progress.thinking;
                let new_content = cell.content_text.len() > progress.content;
                let newly_closed = cell.is_terminal() && !progress.closed;

                if !(new_thinking || new_content || newly_closed) {
                    continue;
                }

                let thinking_from = progress.thinking;
                let content_from = progress.content;
                progress.thinking = cell.thinking_text.len();
                progress.content = cell.content_text.len();
                progress.closed = cell.is_terminal();

                self.switch_tag(&tag);
                if new_thinking {
                    print!("{}", cell.thinking_text[thinking_from..].dimmed());
                }
                if new_content {
                    print!("{}", &cell.content_text[content_from..]);
                }
                if newly_closed {
                    match cell.status {
                        CellStatus::Done => {
                            if let Some(result) = &cell.result {
                                print!(" {}", format!("[{}]", paint_score(result.ai_score)).bold());
                            } else {
                                print!(" {}", "[closed]".bright_black());
                            }
                        }
                        CellStatus::Error => {
                            let detail = cell.error.as_deref().unwrap_or("stream failed");
                            print!(" {}", format!("[error: {}]", detail).bright_red());
                        }
                        _ => {}
                    }
                }
                let _ = io::stdout().flush();
            }
        }

        if let Some(battle) = &snapshot.battle {
            if !self.battle_announced {
                println!("\n{}", "Battle analysis...".bright_magenta());
                self.battle_announced = true;
                self.current_tag = None;
            }
            let thinking_from = self.battle.thinking;
            let content_from = self.battle.content;
            self.battle.thinking = battle.thinking_text.len();
            self.battle.content = battle.content_text.len();
            print!("{}", battle.thinking_text[thinking_from..].dimmed());
            print!("{}", &battle.content_text[content_from..]);
            if battle.status == CellStatus::Error && !self.battle.closed {
                self.battle.closed = true;
                let detail = battle.error.as_deref().unwrap_or("stream failed");
                print!(" {}", format!("[error: {}]", detail).bright_red());
            }
            let _ = io::stdout().flush();
        }
    }

    fn render_follow_up(&mut self, snapshot: &SessionSnapshot) {
        let Some(state) = &snapshot.follow_up else { return };
        let thinking_from = self.battle.thinking;
        let content_from = self.battle.content;
        self.battle.thinking = state.thinking_text.len();
        self.battle.content = state.content_text.len();
        print!("{}", state.thinking_text[thinking_from..].dimmed());
        print!("{}", &state.content_text[content_from..]);
        if state.status == CellStatus::Error && !self.battle.closed {
            self.battle.closed = true;
            let detail = state.error.as_deref().unwrap_or("stream failed");
            print!(" {}", format!("[error: {}]", detail).bright_red());
        }
        let _ = io::stdout().flush();
    }
}

// ---------------------------------------------------------------------------
// Follow-up
// ---------------------------------------------------------------------------

async fn run_follow_up(
    base_url: &str,
    record: u64,
    question: &str,
    model: Option<u64>,
) -> Result<()> {
    println!("{}", "QUIZWIRE FOLLOW-UP".bright_cyan().bold());
    println!("{}: {}", "Question".bright_yellow(), question.bright_white());
    println!("{}", "=".repeat(50).bright_blue());

    let stream_client = reqwest::Client::new();
    let transport = Arc::new(HttpTransport::new(stream_client, base_url));
    let coordinator = SessionCoordinator::new(transport);
    let mut rx = coordinator.subscribe();

    coordinator.follow_up(record, question, model)?;

    let mut printer = StreamPrinter::new(HashMap::new());
    loop {
        let snapshot = rx.borrow_and_update().clone();
        printer.render_follow_up(&snapshot);
        if snapshot
            .follow_up
            .as_ref()
            .is_some_and(|f| f.status.is_terminal())
        {
            println!();
            return Ok(());
        }
        if rx.changed().await.is_err() {
            return Ok(());
        }
    }
}
