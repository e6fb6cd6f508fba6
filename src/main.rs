//! gatepost: PreToolUse hook.
//!
//! Reads the hook JSON from stdin, judges the tool call against the layered
//! policy, and writes a permission decision to stdout.
//!
//! Usage:
//!   gatepost [--session FILE] [--policy FILE]
//!   gatepost [--session FILE] [--policy FILE] --kind KIND INPUT
//!
//! Exit status: 0 allow, 1 ask, 2 deny, 3 malformed input or configuration.

use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use gatepost::config::{self, LayerSources};
use gatepost::{ActionKind, Engine, Error, Request, logging};

#[derive(Deserialize)]
struct HookInput {
    tool_name: Option<String>,
    #[serde(default)]
    tool_input: Value,
    cwd: Option<PathBuf>,
}

#[derive(Default)]
struct Args {
    session: Option<PathBuf>,
    policy: Option<PathBuf>,
    direct: Option<(ActionKind, String)>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut parsed = Args::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--session" => {
                parsed.session = Some(args.next().ok_or("--session needs a file")?.into());
            }
            "--policy" => {
                parsed.policy = Some(args.next().ok_or("--policy needs a file")?.into());
            }
            "--kind" => {
                let name = args.next().ok_or("--kind needs a kind and an input")?;
                let kind = ActionKind::from_name(&name)
                    .ok_or_else(|| format!("unknown kind `{name}`"))?;
                let input = args.next().ok_or("--kind needs an input")?;
                parsed.direct = Some((kind, input));
            }
            other => return Err(format!("unexpected argument `{other}`")),
        }
    }
    Ok(parsed)
}

/// Map a tool call to the action it performs. `None` for tools we don't gate.
fn action_for(tool: &str, input: &Value) -> Option<(ActionKind, String)> {
    let field = |name: &str| input.get(name).and_then(Value::as_str).map(str::to_string);
    match tool {
        "Bash" => Some((ActionKind::Shell, field("command").unwrap_or_default())),
        "Read" => Some((ActionKind::Read, field("file_path")?)),
        "Write" => Some((ActionKind::Write, field("file_path")?)),
        "Edit" | "MultiEdit" => Some((ActionKind::Edit, field("file_path")?)),
        "NotebookEdit" => Some((ActionKind::Edit, field("notebook_path")?)),
        "Glob" => {
            let pattern = field("pattern")?;
            let target = match field("path") {
                Some(dir) if !pattern.starts_with('/') => format!("{}/{pattern}", dir.trim_end_matches('/')),
                _ => pattern,
            };
            Some((ActionKind::Glob, target))
        }
        "Grep" => Some((ActionKind::Grep, field("path").unwrap_or_else(|| ".".into()))),
        "WebFetch" => Some((ActionKind::Fetch, field("url")?)),
        _ => None,
    }
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/"))
}

fn fail(message: &str, code: i32) -> ! {
    eprintln!("gatepost: {message}");
    std::process::exit(code);
}

fn run(kind: ActionKind, input: &str, cwd: &Path, home: &Path, args: &Args) -> Result<gatepost::Decision, Error> {
    let sources = LayerSources {
        cwd: cwd.to_path_buf(),
        home: home.to_path_buf(),
        session: args
            .session
            .clone()
            .or_else(|| std::env::var_os(config::SESSION_ENV).map(PathBuf::from)),
        explicit: args.policy.clone(),
    };
    let engine = Engine::new(config::load_layers(&sources)?);
    engine.decide(&Request {
        kind,
        input,
        cwd,
        home,
    })
}

fn main() {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(a) => a,
        Err(e) => fail(&e, Error::EXIT_CODE),
    };
    let home = home_dir();
    logging::init(&home);

    let (kind, input, cwd, hook) = match &args.direct {
        Some((kind, input)) => {
            let cwd = std::env::current_dir().unwrap_or_else(|_| home.clone());
            (*kind, input.clone(), cwd, false)
        }
        None => {
            let mut raw = String::new();
            if let Err(e) = std::io::stdin().read_to_string(&mut raw) {
                fail(&format!("failed to read stdin: {e}"), Error::EXIT_CODE);
            }
            let hook_input: HookInput = match serde_json::from_str(&raw) {
                Ok(v) => v,
                Err(e) => fail(&format!("JSON parse error: {e}"), Error::EXIT_CODE),
            };
            let Some(tool) = hook_input.tool_name else {
                std::process::exit(0);
            };
            let Some((kind, input)) = action_for(&tool, &hook_input.tool_input) else {
                log::debug!("not gating tool {tool}");
                std::process::exit(0);
            };
            let cwd = hook_input
                .cwd
                .or_else(|| std::env::current_dir().ok())
                .unwrap_or_else(|| home.clone());
            (kind, input, cwd, true)
        }
    };

    let decision = match run(kind, &input, &cwd, &home, &args) {
        Ok(d) => d,
        Err(e) => {
            log::error!("{kind}\terror\t{e}");
            fail(&e.to_string(), Error::EXIT_CODE)
        }
    };
    logging::log_decision(kind, &input, &decision);

    if hook {
        let output = serde_json::json!({
            "hookSpecificOutput": {
                "hookEventName": "PreToolUse",
                "permissionDecision": decision.verdict.as_str(),
                "permissionDecisionReason": decision.message,
            }
        });
        println!("{output}");
    } else {
        println!("{}: {}", decision.verdict.label(), decision.message);
    }
    std::process::exit(decision.exit_code());
}
