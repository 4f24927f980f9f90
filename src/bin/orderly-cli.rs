//! Orderly CLI - Command-line interface for the orchestration pipeline
//!
//! Provides subcommands for checking triggers and generated JSON offline and
//! for running orders against the in-memory sandbox world.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use orderly::config::Config;
use orderly::engine::ExecutionEngine;
use orderly::events::{EventSink, FanoutSink, RecordingSink, TracingSink};
use orderly::orchestrator::response::{self, StructuredResponse};
use orderly::orchestrator::{
    CommandOrchestrator, GeneratorClient, HttpGeneratorClient, ScriptedGenerator, ScriptedReply,
};
use orderly::schema::{Archetype, OutputSchema, SchemaVariant, ValidationReport, Validator};
use orderly::translator::CommandTranslator;
use orderly::trigger::{StaticContext, Variable};
use orderly::world::{Sandbox, UnitId, WorldSnapshot};
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "orderly")]
#[command(about = "Natural-language unit command orchestration", long_about = None)]
struct Cli {
    /// JSON configuration file; ORDERLY_* environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a trigger and evaluate it against fixed values
    Eval {
        /// Trigger expression, e.g. "health_pct < 20 AND enemy_dist < 15"
        expr: String,

        /// Variable binding such as health_pct=15 (repeatable)
        #[arg(long = "var", value_parser = parse_binding)]
        vars: Vec<(Variable, f64)>,
    },

    /// Validate a plan, command or full reply stored as JSON
    Validate {
        /// JSON file
        file: PathBuf,

        /// Archetype the content is validated for
        #[arg(short, long, default_value = "scout")]
        archetype: Archetype,
    },

    /// Print the output schema requested for a selection of archetypes
    Schema {
        /// Archetypes in the selection (repeatable)
        #[arg(short, long = "archetype", required = true)]
        archetypes: Vec<Archetype>,
    },

    /// Replay a stored generator reply against the sandbox world
    Simulate {
        /// File with the reply content
        file: PathBuf,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Send an order to the configured generator and run it in the sandbox
    Ask {
        /// The order, in plain language
        text: String,

        #[command(flatten)]
        session: SessionArgs,
    },
}

#[derive(clap::Args)]
struct SessionArgs {
    /// Selected unit ids (sandbox friendlies are 1-5)
    #[arg(short, long, value_delimiter = ',', default_value = "1")]
    units: Vec<u64>,

    /// Health override such as 3=15 (repeatable)
    #[arg(long = "health", value_parser = parse_health)]
    health: Vec<(u64, f64)>,

    /// Maximum ticks to run
    #[arg(long, default_value = "100")]
    ticks: u64,

    /// Milliseconds of game time per tick
    #[arg(long, default_value = "100")]
    tick_ms: u64,

    /// Order text used when replaying a stored reply
    #[arg(long, default_value = "replayed order")]
    text: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    config.apply_env()?;

    match cli.command {
        Commands::Eval { expr, vars } => {
            let trigger = orderly::compile(&expr)?;
            let context = vars
                .into_iter()
                .fold(StaticContext::new(), |ctx, (var, value)| ctx.with(var, value));
            let names: Vec<&str> = trigger.variables().into_iter().map(Variable::name).collect();
            println!("trigger:   {trigger}");
            println!("variables: {}", names.join(", "));
            println!("result:    {}", trigger.evaluate(&context));
        }

        Commands::Validate { file, archetype } => {
            let data = read_json(&file)?;
            let validator = Validator::new(config.orchestrator.max_steps_per_plan);
            let report = validate_document(&validator, data, archetype);
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Schema { archetypes } => {
            let variant = SchemaVariant::for_archetypes(&archetypes);
            let schema = OutputSchema::build(variant, &archetypes);
            println!("{}", serde_json::to_string_pretty(&schema)?);
        }

        Commands::Simulate { file, session } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let generator = ScriptedGenerator::new();
            generator.push(ScriptedReply::Content(content));
            let text = session.text.clone();
            run_session(&config, Arc::new(generator), &text, &session).await?;
        }

        Commands::Ask { text, session } => {
            let client = HttpGeneratorClient::new(config.generator.clone())?;
            run_session(&config, Arc::new(client), &text, &session).await?;
        }
    }

    Ok(())
}

fn validate_document(validator: &Validator, data: Value, archetype: Archetype) -> ValidationReport {
    if data.get("steps").is_some() {
        return ValidationReport::from_result(&validator.validate_plan_for(&data, archetype));
    }
    if data.get("action").is_some() {
        return ValidationReport::from_result(&validator.validate_command(&data, archetype));
    }
    let result = response::classify(data).and_then(|structured| match structured {
        StructuredResponse::Error(reason) => Ok(json!({ "declined": reason })),
        structured => response::validate(
            structured,
            SchemaVariant::Individual,
            &[(UnitId(1), archetype)],
            validator,
        )
        .map(|_| Value::Null),
    });
    ValidationReport::from_result(&result)
}

async fn run_session(
    config: &Config,
    client: Arc<dyn GeneratorClient>,
    text: &str,
    args: &SessionArgs,
) -> Result<()> {
    let recorder = Arc::new(RecordingSink::new());
    let sinks: Vec<Arc<dyn EventSink>> =
        vec![recorder.clone() as Arc<dyn EventSink>, Arc::new(TracingSink)];
    let sink: Arc<dyn EventSink> = Arc::new(FanoutSink::new(sinks));

    let mut world = Sandbox::skirmish();
    for (id, health) in &args.health {
        world.set_health(UnitId(*id), *health);
    }
    let mut engine = ExecutionEngine::new(config.engine.clone(), sink.clone());
    let mut translator = CommandTranslator::new(sink.clone());
    let mut orchestrator = CommandOrchestrator::new(config.orchestrator.clone(), client, sink)?;

    let selection: Vec<UnitId> = args.units.iter().copied().map(UnitId).collect();
    let snapshot = WorldSnapshot::capture(&world, &selection);
    orchestrator.process_command(text, &selection, &snapshot)?;
    if !orchestrator.wait_for_completion().await {
        bail!("request finished without a reply");
    }

    let mut now_ms = 0;
    for _ in 0..args.ticks {
        orchestrator.poll(&mut engine, &mut translator, &mut world);
        engine.tick(&mut world, now_ms);
        for event in recorder.take() {
            println!("{}", serde_json::to_string(&event)?);
        }
        if engine.active_plan_count() == 0 && orchestrator.pending_count() == 0 {
            break;
        }
        now_ms += args.tick_ms;
    }

    println!("{}", serde_json::to_string_pretty(engine.stats())?);
    Ok(())
}

fn read_json(path: &PathBuf) -> Result<Value> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn parse_binding(raw: &str) -> std::result::Result<(Variable, f64), String> {
    let (name, value) = raw.split_once('=').ok_or("expected name=value")?;
    let var = name
        .trim()
        .parse::<Variable>()
        .map_err(|()| format!("unknown variable: {name}"))?;
    let value = value.trim().parse::<f64>().map_err(|err| err.to_string())?;
    Ok((var, value))
}

fn parse_health(raw: &str) -> std::result::Result<(u64, f64), String> {
    let (id, value) = raw.split_once('=').ok_or("expected id=percent")?;
    let id = id.trim().parse::<u64>().map_err(|err| err.to_string())?;
    let value = value.trim().parse::<f64>().map_err(|err| err.to_string())?;
    Ok((id, value))
}
