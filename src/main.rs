//! Stratify: subtype prediction for AECOPD readmission risk.
//!
//! Command-line host. Wires configuration, schema, registry, model and
//! explainer once, runs a single assessment and prints it as JSON.

use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use stratify::adapters::explain::{SamplingExplainer, TreeExplainer};
use stratify::adapters::input::FormPayload;
use stratify::adapters::sanitize::{Redactor, SanitizingMakeWriter};
use stratify::adapters::stacking::{StackedEnsemble, StackingLoader};
use stratify::application::{AssessmentService, PredictionService};
use stratify::config::{parse_explainer, AppConfig, LogMode};
use stratify::domain::{ExplainerKind, FeatureSchema, SchemaCatalog, SubtypeRegistry};
use stratify::ports::Explainer;

const USAGE: &str = "\
Usage: stratify [OPTIONS] [NAME=VALUE ...]

Options:
  --schema <ID>         Schema version (env STRATIFY_SCHEMA_VERSION,
                        default aecopd-subtype-4)
  --model <PATH>        Model artifact or directory (env STRATIFY_MODEL_PATH,
                        default models/<schema>)
  --input <FILE>        JSON object of input values; '-' reads stdin
  --explain <METHOD>    none, sampling or tree (env STRATIFY_EXPLAINER)
  --list-schemas        Print known schema versions and their features
  -h, --help            Print this help

NAME=VALUE pairs override values from --input.";

#[derive(Debug, Default)]
struct CliArgs {
    schema: Option<String>,
    model: Option<PathBuf>,
    input: Option<String>,
    explain: Option<Option<ExplainerKind>>,
    list_schemas: bool,
    pairs: Vec<String>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Option<CliArgs>> {
    let mut cli = CliArgs::default();
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .with_context(|| format!("{flag} requires a value"))
        };
        match arg.as_str() {
            "-h" | "--help" => return Ok(None),
            "--schema" => cli.schema = Some(value("--schema")?),
            "--model" => cli.model = Some(PathBuf::from(value("--model")?)),
            "--input" => cli.input = Some(value("--input")?),
            "--explain" => cli.explain = Some(parse_explainer(&value("--explain")?)?),
            "--list-schemas" => cli.list_schemas = true,
            other if other.starts_with("--") => bail!("unknown option {other}\n\n{USAGE}"),
            pair => cli.pairs.push(pair.to_string()),
        }
    }
    Ok(Some(cli))
}

fn main() -> Result<()> {
    let Some(cli) = parse_args(std::env::args().skip(1))? else {
        println!("{USAGE}");
        return Ok(());
    };

    let mut config = AppConfig::from_env()?;
    if let Some(schema) = cli.schema.clone() {
        config.schema_version = schema;
    }
    if let Some(model) = cli.model.clone() {
        config.model_path = Some(model);
    }
    if let Some(explain) = cli.explain {
        config.explainer = explain;
    }

    let (catalog, registered) = build_catalog(config.schema_path.as_deref())?;
    if cli.list_schemas {
        for version in catalog.versions() {
            let schema = catalog.get_schema(version)?;
            println!("{version}: {}", schema.names().collect::<Vec<_>>().join(", "));
        }
        return Ok(());
    }
    let schema = catalog.get_schema(&config.schema_version)?.clone();

    let _guard = init_logging(&config, &schema)?;
    tracing::info!("Starting Stratify (schema={})", schema.version());
    if let Some(path) = &config.schema_path {
        tracing::info!("Registered {} schema(s) from {:?}", registered, path);
    }

    let registry = match &config.registry_path {
        Some(path) => SubtypeRegistry::load_file(path)?,
        None => SubtypeRegistry::builtin(schema.version())?,
    };

    let loader = StackingLoader::new(config.artifact_verification()?);
    let predictor = PredictionService::load(
        &loader,
        &config.resolved_model_path(),
        schema.clone(),
        config.label_policy,
    )?;
    if let Some(info) = predictor.describe() {
        tracing::info!(
            "Model: {} over {:?} -> {} ({} features, {} classes)",
            info.kind,
            info.base_learners,
            info.meta_learner,
            info.n_features,
            info.n_classes
        );
    }

    let explainer = match (config.explainer, predictor.model()) {
        (Some(kind), Ok(model)) => Some(build_explainer(kind, model, &schema, &config)?),
        _ => None,
    };

    let service = AssessmentService::new(predictor, registry, explainer, config.collect);

    let mut payload = match cli.input.as_deref() {
        Some("-") => {
            let mut content = String::new();
            std::io::stdin()
                .read_to_string(&mut content)
                .context("reading input from stdin")?;
            FormPayload::from_json(&content)?
        }
        Some(path) => {
            let content =
                std::fs::read_to_string(path).with_context(|| format!("reading input file {path}"))?;
            FormPayload::from_json(&content)?
        }
        None => FormPayload::new(),
    };
    payload.merge(FormPayload::from_pairs(&cli.pairs)?);

    let assessment = service.assess(&payload, config.explainer.is_some())?;
    println!("{}", serde_json::to_string_pretty(&assessment)?);

    tracing::info!("Stratify finished.");
    Ok(())
}

/// Built-in schemas plus those from `schema_path`, and how many the file added.
///
/// Runs before the subscriber exists, so it reports instead of logging.
fn build_catalog(schema_path: Option<&Path>) -> Result<(SchemaCatalog, usize)> {
    let mut catalog = SchemaCatalog::builtin();
    let registered = match schema_path {
        Some(path) => catalog.load_file(path)?,
        None => 0,
    };
    Ok((catalog, registered))
}

fn build_explainer(
    kind: ExplainerKind,
    model: &Arc<StackedEnsemble>,
    schema: &FeatureSchema,
    config: &AppConfig,
) -> Result<Arc<dyn Explainer>> {
    Ok(match kind {
        ExplainerKind::Tree => Arc::new(TreeExplainer::new(model, config.tree_learner.as_deref())?),
        ExplainerKind::Sampling => {
            let background = model.background.clone().unwrap_or_else(|| {
                tracing::info!("Artifact has no background vector; using schema defaults");
                schema.defaults()
            });
            Arc::new(SamplingExplainer::new(Arc::clone(model), background, config.sampling)?)
        }
    })
}

/// Install the global subscriber.
///
/// Assessment JSON goes to stdout, so logs never do. Everything is written
/// through the redacting writer, which masks values of the active schema's
/// features.
fn init_logging(
    config: &AppConfig,
    schema: &FeatureSchema,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let use_file = match config.log_mode {
        LogMode::File => true,
        LogMode::Stderr => false,
        LogMode::Auto => !std::io::stderr().is_terminal(),
    };

    let (writer, guard) = if use_file {
        if let Some(parent) = config.log_file.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating log directory {parent:?}"))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.log_file)
            .with_context(|| format!("opening log file {:?}", config.log_file))?;
        tracing_appender::non_blocking(file)
    } else {
        tracing_appender::non_blocking(std::io::stderr())
    };

    let redactor = Redactor::with_feature_names(schema.names()).context("building log redactor")?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(SanitizingMakeWriter::new(writer, redactor)),
        )
        .init();

    Ok(guard)
}
