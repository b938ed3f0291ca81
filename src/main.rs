use std::io::Read;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context as _};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use text_transformer::cancel::CancellationToken;
use text_transformer::config::Settings;
use text_transformer::host::DocumentSnapshot;
use text_transformer::{Engine, MemoryDocument, Mode, Position, RunOutcome, Selection};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Replace each selection with the expression's result
    Transform,
    /// Select `[start, end]` column pairs per line
    Select,
    /// Select regex matches per line
    Regex,
    /// Insert `{iterations, func}` output at the cursor
    Generate,
    /// Print the expression's value as JSON
    Eval,
}

/// Run a text-transformer expression over a file or stdin.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// What to do with the expression
    #[arg(value_enum)]
    mode: ModeArg,
    /// The expression, e.g. "currentSelection.toUpperCase()"
    expression: String,
    /// Input document (reads stdin when omitted)
    #[arg(short, long)]
    file: Option<PathBuf>,
    /// Selection as LINE:COL-LINE:COL or a caret LINE:COL (repeatable, zero-based)
    #[arg(short, long = "select")]
    selections: Vec<String>,
    /// Settings file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print text, selections and outcome as one JSON object
    #[arg(long)]
    json: bool,
}

fn parse_position(s: &str) -> anyhow::Result<Position> {
    let (line, character) = s.split_once(':').ok_or_else(|| anyhow!("expected LINE:COL, got {s:?}"))?;
    Ok(Position::new(line.trim().parse()?, character.trim().parse()?))
}

fn parse_selection(s: &str) -> anyhow::Result<Selection> {
    match s.split_once('-') {
        Some((anchor, active)) => Ok(Selection::new(parse_position(anchor)?, parse_position(active)?)),
        None => Ok(Selection::caret(parse_position(s)?)),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => Settings::load(path).with_context(|| format!("reading {}", path.display()))?,
        None => Settings::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(settings.log_filter.as_deref().unwrap_or("warn"))
        }))
        .with_writer(std::io::stderr)
        .init();

    let engine = Engine::new(settings);

    let mode = match args.mode {
        ModeArg::Transform => Mode::Transform,
        ModeArg::Select => Mode::LineSelector,
        ModeArg::Regex => Mode::RegexLineSelector,
        ModeArg::Generate => Mode::Generator,
        ModeArg::Eval => {
            // Guest errors hold `Rc` values, so they are reported by message.
            let value = text_transformer::eval(&args.expression).map_err(|e| anyhow!("{e}"))?;
            let json = value.to_json().unwrap_or(serde_json::Value::Null);
            println!("{}", serde_json::to_string_pretty(&json)?);
            return Ok(());
        }
    };

    let text = match &args.file {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    let selections = args.selections.iter().map(|s| parse_selection(s)).collect::<anyhow::Result<Vec<_>>>()?;

    let mut document = MemoryDocument::new(text);
    if !selections.is_empty() {
        document = document.with_selections(selections);
    }
    if let Some(path) = &args.file {
        document = document.with_path(path.clone());
    }

    let snapshot = DocumentSnapshot::capture(&document).await;
    let outcome = engine.run(mode, &document, &snapshot, &args.expression, &CancellationToken::new()).await?;
    if outcome == RunOutcome::Cancelled {
        bail!("run was cancelled");
    }

    if args.json {
        let report = serde_json::json!({
            "outcome": outcome,
            "text": document.current_text(),
            "selections": document.current_selections(),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    match mode {
        Mode::Transform | Mode::Generator => print!("{}", document.current_text()),
        Mode::LineSelector | Mode::RegexLineSelector => {
            println!("{}", serde_json::to_string_pretty(&document.current_selections())?)
        }
    }
    Ok(())
}
