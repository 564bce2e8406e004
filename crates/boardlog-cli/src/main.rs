use anyhow::{Context, Result};
use boardlog_core::{
    Action, FileActionLog, HttpLogSource, LoggedAction, NativeChannel, SessionState,
    SessionUpdate, VectorSurface, Whiteboard, WhiteboardConfig, replay,
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(16);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "boardlog", about = "Headless client for Boardlog whiteboard sessions", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Client config file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a saved log and describe the resulting board
    Replay {
        /// JSON array of logged actions, or a .jsonl session log
        file: PathBuf,

        /// Print the resulting primitives as JSON
        #[arg(long)]
        json: bool,
    },

    /// Join a session, catch up and print live activity
    Watch {
        #[arg(short, long)]
        session: String,

        #[arg(short, long, default_value = "watcher")]
        user: String,

        /// WebSocket endpoint (overrides the config file)
        #[arg(long)]
        server: Option<String>,

        /// REST root used for catch-up (overrides the config file)
        #[arg(long)]
        api: Option<String>,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config = match &cli.config {
        Some(path) => WhiteboardConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => WhiteboardConfig::default(),
    };

    match cli.command {
        Commands::Replay { file, json } => {
            let actions = load_actions(&file)?;
            let mut surface = VectorSurface::new();
            replay(&mut surface, &actions);
            if json {
                println!("{}", serde_json::to_string_pretty(surface.primitives())?);
            } else {
                print!("{}", describe(&actions, &surface));
            }
        }
        Commands::Watch {
            session,
            user,
            server,
            api,
            duration,
        } => {
            let mut config = config;
            if let Some(server) = server {
                config.server_url = server;
            }
            if let Some(api) = api {
                config.api_url = api;
            }
            config.validate()?;
            watch(&config, &session, &user, duration.map(Duration::from_secs))?;
        }
    }

    Ok(())
}

/// Read actions from a JSON array or a `.jsonl` session log.
fn load_actions(path: &Path) -> Result<Vec<Action>> {
    if path.extension().is_some_and(|ext| ext == "jsonl") {
        let entries = FileActionLog::read_file(path)
            .with_context(|| format!("Failed to read log {}", path.display()))?;
        return Ok(entries.into_iter().map(|entry| entry.action).collect());
    }

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_actions(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Accepts logged actions (ordered by sequence) or bare actions (file order).
fn parse_actions(text: &str) -> Result<Vec<Action>> {
    if let Ok(mut logged) = serde_json::from_str::<Vec<LoggedAction>>(text) {
        logged.sort_by_key(|entry| entry.sequence);
        return Ok(logged.into_iter().map(|entry| entry.action).collect());
    }
    Ok(serde_json::from_str::<Vec<Action>>(text)?)
}

fn describe(actions: &[Action], surface: &VectorSurface) -> String {
    let mut out = format!(
        "{} actions replayed, {} primitives visible\n",
        actions.len(),
        surface.primitive_count()
    );
    if let Some(bounds) = surface.bounds() {
        out.push_str(&format!(
            "bounds: ({:.1}, {:.1}) - ({:.1}, {:.1})\n",
            bounds.x0, bounds.y0, bounds.x1, bounds.y1
        ));
    }
    out
}

fn watch(config: &WhiteboardConfig, session: &str, user: &str, duration: Option<Duration>) -> Result<()> {
    let mut board = Whiteboard::new(
        VectorSurface::new(),
        NativeChannel::new(config.server_url.clone()),
        HttpLogSource::new(config.api_url.clone())?,
        config,
    );
    board.join(session, user)?;
    log::info!("Joining {} as {} via {}", session, user, config.server_url);

    let started = Instant::now();
    let mut stalled_since: Option<Instant> = None;
    loop {
        if duration.is_some_and(|limit| started.elapsed() >= limit) {
            break;
        }

        for update in board.pump() {
            report(&update, board.surface());
        }
        if board.session().session_id().is_none() {
            break;
        }

        let state = board.session().state();
        if matches!(state, SessionState::Disconnected | SessionState::CatchingUp) {
            let since = *stalled_since.get_or_insert_with(Instant::now);
            if since.elapsed() >= RECONNECT_DELAY {
                stalled_since = None;
                if state == SessionState::CatchingUp {
                    for update in board.retry_catch_up() {
                        report(&update, board.surface());
                    }
                } else if let Err(e) = board.reconnect() {
                    log::warn!("Reconnect failed: {}", e);
                }
            }
        } else {
            stalled_since = None;
        }

        std::thread::sleep(POLL_INTERVAL);
    }

    board.leave();
    Ok(())
}

fn report(update: &SessionUpdate, surface: &VectorSurface) {
    match update {
        SessionUpdate::Replay(actions) => println!(
            "caught up: {} actions, {} primitives visible",
            actions.len(),
            surface.primitive_count()
        ),
        SessionUpdate::Apply(logged) => {
            let action = &logged.action;
            let author = if action.author_id.is_empty() { "?" } else { &action.author_id };
            println!("#{} {} by {}", logged.sequence, action.kind(), author);
        }
        SessionUpdate::Acknowledged(sequence) => log::debug!("own action stored as #{}", sequence),
        SessionUpdate::Resubmitted(actions) => println!("re-sent {} queued actions", actions.len()),
        SessionUpdate::StateChanged(state) => log::info!("session {:?}", state),
        SessionUpdate::ParticipantJoined(user) => println!("+ {}", user),
        SessionUpdate::ParticipantLeft(user) => println!("- {}", user),
        SessionUpdate::Notice(message) => println!("! {}", message),
        SessionUpdate::Ended(session) => println!("session {} ended", session),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boardlog_core::{ActionLog, MemoryActionLog};
    use kurbo::Point;
    use tempfile::TempDir;

    #[test]
    fn test_parse_logged_actions_orders_by_sequence() {
        let json = r#"[
            {"sequence": 2, "actionKind": "text", "payload": {"content": "b", "anchor": {"x": 0.0, "y": 0.0}}},
            {"sequence": 1, "actionKind": "clear"}
        ]"#;
        let actions = parse_actions(json).unwrap();
        assert!(actions[0].is_clear());
        assert_eq!(actions.len(), 2);
    }

    #[test]
    fn test_parse_bare_actions() {
        let json = r#"[{"actionKind": "path", "payload": {"points": [{"x": 0.0, "y": 0.0}, {"x": 1.0, "y": 1.0}]}}]"#;
        assert_eq!(parse_actions(json).unwrap().len(), 1);
        assert!(parse_actions("{}").is_err());
    }

    #[test]
    fn test_replay_jsonl_log() {
        let dir = TempDir::new().unwrap();
        let path = {
            let mut log = FileActionLog::open(dir.path(), "demo").unwrap();
            log.append(Action::text("gone", Point::ZERO)).unwrap();
            log.append(Action::clear()).unwrap();
            log.append(Action::text("kept", Point::new(4.0, 4.0))).unwrap();
            log.path().to_path_buf()
        };

        let actions = load_actions(&path).unwrap();
        let mut surface = VectorSurface::new();
        replay(&mut surface, &actions);
        assert_eq!(actions.len(), 3);
        assert_eq!(surface.primitive_count(), 1);
    }

    #[test]
    fn test_describe_summary() {
        let mut log = MemoryActionLog::new();
        log.append(Action::path(vec![Point::new(0.0, 0.0), Point::new(10.0, 5.0)]))
            .unwrap();
        let actions: Vec<Action> = log.all().unwrap().into_iter().map(|e| e.action).collect();
        let mut surface = VectorSurface::new();
        replay(&mut surface, &actions);

        let summary = describe(&actions, &surface);
        assert!(summary.starts_with("1 actions replayed, 1 primitives visible"));
        assert!(summary.contains("bounds:"));
    }
}
