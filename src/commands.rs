use crate::calendar::{events_on, month_grid};
use crate::engine::{run_ticker, TickReport, TimerEngine, TimerSnapshot, TimerStatus};
use crate::events::parse_local_datetime;
use crate::format::{format_time, format_time_detailed};
use crate::models::{Event, EventKind, EventPatch, NewEvent, Session, Subject, SubjectPatch};
use crate::stats::summarize;
use crate::{install_panic_hook, open_database, AppConfig, Database};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{Datelike, Local, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Parser, Clone)]
#[command(
    name = "studyflow",
    version,
    about = "Track study subjects, timed sessions and upcoming deadlines"
)]
pub struct Cli {
    /// Print JSON instead of human-readable text
    #[arg(long, global = true)]
    pub json: bool,

    /// Directory holding studyflow.db (overrides STUDYFLOW_DATA_DIR)
    #[arg(long, global = true, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Manage subjects
    #[command(subcommand)]
    Subject(SubjectCommand),
    /// Inspect recorded sessions
    #[command(subcommand)]
    Session(SessionCommand),
    /// Manage exams, assignments and reminders
    #[command(subcommand)]
    Event(EventCommand),
    /// Control the study timer
    #[command(subcommand)]
    Timer(TimerCommand),
    /// Study statistics
    Stats {
        /// Number of days in the daily breakdown
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// Month view with events per day
    Calendar {
        /// Month as YYYY-MM (defaults to the current month)
        #[arg(long)]
        month: Option<String>,
    },
    /// First-run onboarding flag
    #[command(subcommand)]
    Onboarding(OnboardingCommand),
}

#[derive(Debug, Subcommand, Clone)]
pub enum SubjectCommand {
    Add { name: String },
    List,
    /// SUBJECT is an id or a name
    Rename { subject: String, name: String },
    /// Set a color tag; omit COLOR to clear it
    Color { subject: String, color: Option<String> },
    /// Delete the subject and all its sessions
    Delete { subject: String },
}

#[derive(Debug, Subcommand, Clone)]
pub enum SessionCommand {
    /// Sessions started today (local time)
    Today,
}

#[derive(Debug, Args, Clone)]
pub struct EventAddArgs {
    pub title: String,
    /// Date as YYYY-MM-DD or RFC 3339
    #[arg(long)]
    pub date: String,
    /// Local time as HH:MM
    #[arg(long)]
    pub time: Option<String>,
    /// exam, assignment, study-session or reminder
    #[arg(long = "type", default_value = "reminder")]
    pub kind: String,
    /// Subject id or name
    #[arg(long)]
    pub subject: Option<String>,
    /// Minutes before the event to remind
    #[arg(long, default_value_t = 60)]
    pub notify_before: u32,
    #[arg(long)]
    pub description: Option<String>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum EventCommand {
    Add(EventAddArgs),
    List,
    /// Incomplete events in the next N days
    Upcoming {
        #[arg(long)]
        days: Option<u32>,
    },
    Complete { id: String },
    Delete { id: String },
    /// Reminders due now; each one is reported once unless --peek is given
    Reminders {
        #[arg(long)]
        peek: bool,
    },
}

#[derive(Debug, Subcommand, Clone)]
pub enum TimerCommand {
    /// Start timing SUBJECT (id or name)
    Start { subject: String },
    Pause,
    Resume,
    /// Stop and record the session
    Stop,
    Status,
    /// Keep ticking in the foreground until Ctrl+C
    Watch {
        /// Pomodoro interval in minutes for this watch
        #[arg(long)]
        pomodoro: Option<u32>,
    },
}

#[derive(Debug, Subcommand, Clone)]
pub enum OnboardingCommand {
    Status,
    Complete,
}

struct Ctx {
    config: AppConfig,
    db: Arc<Database>,
    json: bool,
}

impl Ctx {
    fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce() -> String) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            println!("{}", human());
        }
        Ok(())
    }

    fn engine(&self) -> Arc<TimerEngine> {
        Arc::new(TimerEngine::with_db(
            self.db.clone(),
            self.config.pomodoro_minutes,
        ))
    }
}

/// Entry point for the binary: open the store and dispatch
pub async fn run(cli: Cli, mut config: AppConfig) -> Result<()> {
    if let Some(dir) = cli.data_dir.clone() {
        config = config.with_data_dir(dir);
    }
    let db = open_database(&config).context("Failed to open the study database")?;
    let ctx = Ctx {
        config,
        db,
        json: cli.json,
    };

    match cli.command {
        Command::Subject(cmd) => subject_command(&ctx, cmd),
        Command::Session(SessionCommand::Today) => sessions_today(&ctx),
        Command::Event(cmd) => event_command(&ctx, cmd),
        Command::Timer(cmd) => timer_command(&ctx, cmd).await,
        Command::Stats { days } => stats_command(&ctx, days),
        Command::Calendar { month } => calendar_command(&ctx, month.as_deref()),
        Command::Onboarding(cmd) => onboarding_command(&ctx, cmd),
    }
}

/// Id match first, then a case-insensitive name match
fn resolve_subject(db: &Database, key: &str) -> Result<Subject> {
    let subjects = db.list_subjects()?;
    let key = key.trim();
    subjects
        .iter()
        .find(|s| s.id == key)
        .or_else(|| subjects.iter().find(|s| s.name.eq_ignore_ascii_case(key)))
        .cloned()
        .ok_or_else(|| anyhow!("No subject matches '{}'", key))
}

fn subject_name(db: &Database, id: &str) -> String {
    match db.get_subject(id) {
        Ok(Some(subject)) => subject.name,
        Ok(None) => "(deleted subject)".to_string(),
        Err(e) => {
            debug!("[CLI] Subject lookup failed for {}: {}", id, e);
            id.to_string()
        }
    }
}

fn subject_command(ctx: &Ctx, cmd: SubjectCommand) -> Result<()> {
    let db = &ctx.db;
    match cmd {
        SubjectCommand::Add { name } => {
            let subject = db.create_subject(&name)?;
            ctx.emit(&subject, || format!("Added {} ({})", subject.name, subject.id))
        }
        SubjectCommand::List => {
            let subjects = db.list_subjects()?;
            ctx.emit(&subjects, || {
                if subjects.is_empty() {
                    return "No subjects yet".to_string();
                }
                subjects
                    .iter()
                    .map(|s| {
                        let color = s
                            .color_tag
                            .as_deref()
                            .map(|c| format!(" [{}]", c))
                            .unwrap_or_default();
                        format!("{}  {:<24} {:>8}{}", s.id, s.name, format_time(s.total_time), color)
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        }
        SubjectCommand::Rename { subject, name } => {
            let target = resolve_subject(db, &subject)?;
            let patch = SubjectPatch {
                name: Some(name.clone()),
                ..Default::default()
            };
            let updated = db.update_subject(&target.id, patch)?;
            ctx.emit(&json!({ "id": target.id, "updated": updated }), || {
                format!("Renamed {} to {}", target.name, name.trim())
            })
        }
        SubjectCommand::Color { subject, color } => {
            let target = resolve_subject(db, &subject)?;
            let patch = SubjectPatch {
                color_tag: Some(color.clone()),
                ..Default::default()
            };
            let updated = db.update_subject(&target.id, patch)?;
            ctx.emit(&json!({ "id": target.id, "updated": updated }), || match &color {
                Some(c) => format!("{} is now tagged {}", target.name, c),
                None => format!("Cleared color tag of {}", target.name),
            })
        }
        SubjectCommand::Delete { subject } => {
            let target = resolve_subject(db, &subject)?;
            let removed = db.delete_subject(&target.id)?;
            ctx.emit(&json!({ "id": target.id, "removed": removed }), || {
                format!("Deleted {} and its sessions", target.name)
            })
        }
    }
}

fn session_line(db: &Database, session: &Session) -> String {
    format!(
        "{} - {}  {:<24} {}",
        session.start_time.with_timezone(&Local).format("%H:%M"),
        session.end_time.with_timezone(&Local).format("%H:%M"),
        subject_name(db, &session.subject_id),
        format_time(session.duration)
    )
}

fn sessions_today(ctx: &Ctx) -> Result<()> {
    let sessions = ctx.db.list_sessions_for_today()?;
    let total: u64 = sessions.iter().map(|s| s.duration).sum();
    ctx.emit(&sessions, || {
        let mut lines: Vec<String> = sessions.iter().map(|s| session_line(&ctx.db, s)).collect();
        lines.push(format!("Total today: {}", format_time(total)));
        lines.join("\n")
    })
}

fn event_line(db: &Database, event: &Event) -> String {
    let subject = event
        .subject_id
        .as_deref()
        .map(|id| format!(" ({})", subject_name(db, id)))
        .unwrap_or_default();
    format!(
        "{}  {}  [{}] {}{}{}",
        event.id,
        event.date.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
        event.kind.as_str(),
        event.title,
        subject,
        if event.completed { "  done" } else { "" }
    )
}

fn event_list(ctx: &Ctx, events: &[Event], empty: &str) -> Result<()> {
    ctx.emit(&events, || {
        if events.is_empty() {
            return empty.to_string();
        }
        events
            .iter()
            .map(|e| event_line(&ctx.db, e))
            .collect::<Vec<_>>()
            .join("\n")
    })
}

fn event_command(ctx: &Ctx, cmd: EventCommand) -> Result<()> {
    let db = &ctx.db;
    match cmd {
        EventCommand::Add(args) => {
            let date = parse_local_datetime(&args.date, args.time.as_deref())
                .ok_or_else(|| anyhow!("Unreadable date '{}'", args.date))?;
            let kind: EventKind = args.kind.parse()?;
            let subject_id = match args.subject.as_deref() {
                Some(key) => Some(resolve_subject(db, key)?.id),
                None => None,
            };
            let mut new_event = NewEvent::new(args.title, date);
            new_event.kind = kind;
            new_event.subject_id = subject_id;
            new_event.description = args.description;
            new_event.reminder_offset_minutes = args.notify_before;
            let event = db.create_event(new_event)?;
            ctx.emit(&event, || format!("Added {}", event_line(db, &event)))
        }
        EventCommand::List => event_list(ctx, &db.list_events()?, "No events"),
        EventCommand::Upcoming { days } => {
            let days = days.unwrap_or(ctx.config.upcoming_window_days);
            let events = db.upcoming_events(days)?;
            event_list(ctx, &events, &format!("Nothing due in the next {} days", days))
        }
        EventCommand::Complete { id } => {
            let patch = EventPatch {
                completed: Some(true),
                ..Default::default()
            };
            let updated = db.update_event(&id, patch)?;
            if !updated {
                bail!("No event with id '{}'", id);
            }
            ctx.emit(&json!({ "id": id, "completed": true }), || {
                format!("Marked {} as done", id)
            })
        }
        EventCommand::Delete { id } => {
            let removed = db.delete_event(&id)?;
            ctx.emit(&json!({ "id": id, "removed": removed }), || {
                if removed {
                    format!("Deleted {}", id)
                } else {
                    format!("No event with id '{}'", id)
                }
            })
        }
        EventCommand::Reminders { peek } => {
            let now = Utc::now();
            let due = db.due_reminders_at(now)?;
            if !peek {
                for event in &due {
                    db.mark_event_reminded(&event.id, now)?;
                }
            }
            event_list(ctx, &due, "No reminders due")
        }
    }
}

fn status_line(db: &Database, snapshot: &TimerSnapshot) -> String {
    let subject = snapshot
        .active_subject_id
        .as_deref()
        .map(|id| subject_name(db, id))
        .unwrap_or_default();
    match snapshot.status {
        TimerStatus::Idle => "Timer idle".to_string(),
        TimerStatus::Running | TimerStatus::Paused => format!(
            "{} {} {}  (break in {} min)",
            if snapshot.is_running() { "Studying" } else { "Paused" },
            subject,
            format_time_detailed(snapshot.elapsed_seconds),
            snapshot.next_break_in_minutes.unwrap_or(0)
        ),
    }
}

async fn timer_command(ctx: &Ctx, cmd: TimerCommand) -> Result<()> {
    let engine = ctx.engine();
    match cmd {
        TimerCommand::Start { subject } => {
            let target = resolve_subject(&ctx.db, &subject)?;
            engine.start(&target.id)?;
        }
        TimerCommand::Pause => engine.pause()?,
        TimerCommand::Resume => engine.resume()?,
        TimerCommand::Stop => {
            let session = engine.stop()?;
            return ctx.emit(&session, || match &session {
                Some(s) => format!("Recorded {}", session_line(&ctx.db, s)),
                None => "Nothing to record".to_string(),
            });
        }
        TimerCommand::Status => {}
        TimerCommand::Watch { pomodoro } => {
            if let Some(minutes) = pomodoro {
                engine.set_pomodoro_interval(minutes)?;
            }
            return watch(ctx, engine).await;
        }
    }
    let snapshot = engine.get_state()?;
    ctx.emit(&snapshot, || status_line(&ctx.db, &snapshot))
}

async fn watch(ctx: &Ctx, engine: Arc<TimerEngine>) -> Result<()> {
    if !engine.is_running()? {
        bail!("Timer is not running; start or resume it first");
    }
    install_panic_hook(engine.clone());
    info!("[CLI] Watching timer, Ctrl+C to detach");

    let db = ctx.db.clone();
    let json = ctx.json;
    let mut reminder_minute = None;
    let on_tick = move |report: TickReport| {
        if let Some(alert) = &report.alert {
            if json {
                println!("{}", json!({ "pomodoroAlert": alert }));
            } else {
                println!(
                    "\nBreak time! {} min studied ({} x {} min)",
                    alert.elapsed_seconds / 60,
                    alert.count,
                    alert.interval_minutes
                );
            }
        }
        if entered_new_minute(&mut reminder_minute, report.snapshot.elapsed_seconds) {
            announce_reminders(&db, json);
        }
        if json {
            if let Ok(line) = serde_json::to_string(&report.snapshot) {
                println!("{}", line);
            }
        } else {
            print!("\r{}   ", status_line(&db, &report.snapshot));
            let _ = std::io::stdout().flush();
        }
    };

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("[CLI] Failed to listen for Ctrl+C: {}", e);
        }
    };
    run_ticker(engine.clone(), on_tick, shutdown).await;
    if !json {
        println!();
    }
    let snapshot = engine.get_state()?;
    ctx.emit(&snapshot, || {
        format!("Detached; timer keeps {}", status_line(&ctx.db, &snapshot))
    })
}

/// True once per elapsed minute, including the first tick seen. Skipped ticks
/// cannot make a minute go unnoticed.
pub(crate) fn entered_new_minute(last_minute: &mut Option<u64>, elapsed_seconds: u64) -> bool {
    let minute = elapsed_seconds / 60;
    if *last_minute == Some(minute) {
        return false;
    }
    *last_minute = Some(minute);
    true
}

fn announce_reminders(db: &Database, json: bool) {
    let now = Utc::now();
    let due = match db.due_reminders_at(now) {
        Ok(due) => due,
        Err(e) => {
            warn!("[CLI] Failed to check reminders: {}", e);
            return;
        }
    };
    for event in due {
        if json {
            println!("{}", json!({ "reminder": event }));
        } else {
            println!("\nReminder: {}", event_line(db, &event));
        }
        if let Err(e) = db.mark_event_reminded(&event.id, now) {
            warn!("[CLI] Failed to mark reminder {}: {}", event.id, e);
        }
    }
}

fn stats_command(ctx: &Ctx, days: u32) -> Result<()> {
    let data = ctx.db.load_study_data()?;
    let summary = summarize(&data, Local::now().date_naive(), days);
    ctx.emit(&summary, || {
        let mut lines = vec![
            format!("Today: {}", format_time(summary.today_seconds)),
            format!(
                "Last {} days: {}",
                summary.daily.len(),
                format_time(summary.window_seconds)
            ),
            format!("Streak: {} day(s)", summary.streak_days),
            String::new(),
        ];
        lines.extend(
            summary
                .daily
                .iter()
                .map(|d| format!("{}  {}", d.day.format("%a %d %b"), format_time(d.seconds))),
        );
        lines.push(String::new());
        lines.extend(summary.subjects.iter().map(|s| {
            format!("{:<24} {:>8} {:>5.1}%", s.name, format_time(s.seconds), s.percentage)
        }));
        lines.join("\n")
    })
}

fn parse_month(month: Option<&str>) -> Result<(i32, u32)> {
    match month {
        None => {
            let today = Local::now().date_naive();
            Ok((today.year(), today.month()))
        }
        Some(text) => {
            let first = NaiveDate::parse_from_str(&format!("{}-01", text.trim()), "%Y-%m-%d")
                .with_context(|| format!("Expected YYYY-MM, got '{}'", text))?;
            Ok((first.year(), first.month()))
        }
    }
}

fn calendar_command(ctx: &Ctx, month: Option<&str>) -> Result<()> {
    let (year, month) = parse_month(month)?;
    let weeks = month_grid(year, month)?;
    let events = ctx.db.list_events()?;

    let days: Vec<_> = weeks
        .iter()
        .flatten()
        .filter(|day| day.month() == month)
        .map(|day| {
            let on_day: Vec<&Event> = events_on(&events, *day);
            (*day, on_day)
        })
        .collect();

    let value = json!({
        "year": year,
        "month": month,
        "weeks": weeks,
        "events": days
            .iter()
            .filter(|(_, evs)| !evs.is_empty())
            .map(|(day, evs)| json!({ "day": day, "events": evs }))
            .collect::<Vec<_>>(),
    });

    ctx.emit(&value, || {
        let mut out = vec!["Su  Mo  Tu  We  Th  Fr  Sa".to_string()];
        for week in &weeks {
            let row: Vec<String> = week
                .iter()
                .map(|day| {
                    let has_events = !events_on(&events, *day).is_empty();
                    match (day.month() == month, has_events) {
                        (false, _) => "   ".to_string(),
                        (true, true) => format!("{:>2}*", day.day()),
                        (true, false) => format!("{:>2} ", day.day()),
                    }
                })
                .collect();
            out.push(row.join(" "));
        }
        for (day, evs) in &days {
            for event in evs {
                out.push(format!("{}  [{}] {}", day, event.kind.as_str(), event.title));
            }
        }
        out.join("\n")
    })
}

fn onboarding_command(ctx: &Ctx, cmd: OnboardingCommand) -> Result<()> {
    if let OnboardingCommand::Complete = cmd {
        ctx.db.set_onboarding_completed(true)?;
    }
    let completed = ctx.db.onboarding_completed()?;
    ctx.emit(&json!({ "completed": completed }), || {
        if completed {
            "Onboarding completed".to_string()
        } else {
            "Onboarding not completed yet".to_string()
        }
    })
}
