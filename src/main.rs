use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use assessment_guide::assessment::{
    diff_inputs, field_history, submit, summarize_history, verify_stored, Assessment,
    AssessmentId, AuditLogEntry, HistorySummary, SubmissionRequest, VerificationReport,
};
use assessment_guide::config::{Config, ConfigOverrides};
use assessment_guide::criteria::schema::parse_bands;
use assessment_guide::criteria::{
    build_version_diff, import_criteria_file, textual_diff, CriteriaVersion, ImportOptions,
    VersionedCriteria,
};
use assessment_guide::input::import::read_inputs_file;
use assessment_guide::input::{parse_assignment, InputValues};
use assessment_guide::output::csv::{
    assessment_to_csv, audit_to_csv, criteria_to_csv, history_to_csv,
};
use assessment_guide::output::json::{render_json, render_json_line};
use assessment_guide::output::table::{
    render_assessment_table, render_audit_table, render_criteria_table, render_diff_table,
    render_field_history_table, render_history_table, render_input_changes_table,
    render_verification_table, render_versions_table,
};
use assessment_guide::scoring::{required_fields, validate_criteria_set};
use assessment_guide::server::run_server;
use assessment_guide::store::AssessmentStore;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// How far back `show --changes` looks for the DevCo's previous submission.
const PREVIOUS_SCAN_LIMIT: usize = 10_000;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    /// One JSON record per line.
    Jsonl,
    Csv,
}

#[derive(Debug, Parser)]
#[command(
    name = "assessment-guide",
    about = "Score DevCo assessments against versioned, weighted criteria"
)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// SQLite database path, overrides `storage.db_path`.
    #[arg(long)]
    db: Option<String>,
    /// Name recorded in the audit log.
    #[arg(long)]
    actor: Option<String>,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage criteria versions.
    Criteria {
        #[command(subcommand)]
        command: CriteriaCommand,
    },
    /// Score and store one DevCo's inputs.
    Assess {
        #[arg(long)]
        devco: String,
        /// CSV with `field,value` (and optionally `devco`) columns.
        #[arg(long)]
        input: Option<PathBuf>,
        /// `field=value`, repeatable; wins over values from --input.
        #[arg(long = "set")]
        values: Vec<String>,
    },
    /// Score and store every DevCo found in a bulk input CSV.
    ImportInputs {
        file: PathBuf,
        /// DevCo for rows without a devco column.
        #[arg(long)]
        devco: Option<String>,
    },
    History {
        #[arg(long)]
        devco: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Show the change log of one input field instead.
        #[arg(long)]
        field: Option<String>,
    },
    Show {
        id: i64,
        /// Also list input changes since the DevCo's previous submission.
        #[arg(long)]
        changes: bool,
    },
    /// Re-derive stored scores from stored inputs.
    Verify {
        id: Option<i64>,
        #[arg(long)]
        all: bool,
        #[arg(long, default_value_t = 1000)]
        limit: usize,
    },
    Audit {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    Serve {
        /// Overrides `server.bind`.
        #[arg(long)]
        bind: Option<String>,
    },
    Config {
        #[arg(long)]
        init: bool,
        #[arg(long)]
        show: bool,
    },
}

#[derive(Debug, Subcommand)]
enum CriteriaCommand {
    /// Import a criteria sheet (CSV) as a new version.
    Import {
        file: PathBuf,
        #[arg(long)]
        label: Option<String>,
        /// Aggregate bands, e.g. `0:Fail;50:Pass`; defaults to `scoring.aggregate_bands`.
        #[arg(long)]
        bands: Option<String>,
        #[arg(long)]
        activate: bool,
    },
    List,
    /// Show a version, the active one by default.
    Show { version: Option<CriteriaVersion> },
    Activate { version: CriteriaVersion },
    Diff {
        from: CriteriaVersion,
        /// Defaults to the active version.
        to: Option<CriteriaVersion>,
        /// Print a line diff of the criteria JSON.
        #[arg(long)]
        text: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(Some(&config_path))?;
    let bind_override = match &cli.command {
        Commands::Serve { bind } => bind.clone(),
        _ => None,
    };
    config.apply_overrides(ConfigOverrides {
        db_path: cli.db.clone(),
        actor: cli.actor.clone(),
        bind: bind_override,
    });

    if matches!(cli.command, Commands::Config { .. }) {
        return handle_config_command(&cli.command, &config, &config_path);
    }
    if matches!(cli.command, Commands::Serve { .. }) {
        let addr: SocketAddr = config
            .server
            .bind
            .parse()
            .map_err(|e| anyhow!("invalid bind address {}: {e}", config.server.bind))?;
        return run_server(config, addr).await;
    }

    let actor = config.audit.actor.clone();
    let mut store = AssessmentStore::open(&config.resolved_db_path())?;

    match &cli.command {
        Commands::Criteria { command } => {
            handle_criteria_command(command, &mut store, &config, cli.output)?;
        }
        Commands::Assess {
            devco,
            input,
            values,
        } => {
            let inputs = collect_inputs(devco, input.as_deref(), values)?;
            let request = SubmissionRequest {
                devco: devco.clone(),
                inputs,
                submitted_by: None,
            };
            let assessment = submit(&mut store, request, &actor)?;
            print_assessment(&assessment, cli.output)?;
        }
        Commands::ImportInputs { file, devco } => {
            let grouped = read_inputs_file(file, devco.as_deref())?;
            let mut failed = 0usize;
            let mut saved = Vec::new();
            for (devco, inputs) in grouped {
                let request = SubmissionRequest {
                    devco: devco.clone(),
                    inputs,
                    submitted_by: None,
                };
                match submit(&mut store, request, &actor) {
                    Ok(assessment) => saved.push(assessment),
                    Err(err) if err.is_user_error() => {
                        warn!("{devco}: {err}");
                        failed += 1;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            let summary = summarize_history(None, &saved);
            print_history(&summary, &saved, cli.output)?;
            if failed > 0 {
                bail!("{failed} DevCo submission(s) rejected, {} stored", saved.len());
            }
        }
        Commands::History {
            devco,
            limit,
            field,
        } => {
            let history = store.list_assessments(devco.as_deref(), *limit)?;
            match field {
                Some(field) => {
                    let entries = field_history(&history, field);
                    match cli.output {
                        OutputFormat::Table => {
                            println!("{}", render_field_history_table(field, &entries))
                        }
                        OutputFormat::Json => println!("{}", render_json(&entries)?),
                        OutputFormat::Jsonl => print_lines(&entries)?,
                        OutputFormat::Csv => {
                            warn!("CSV output for field history not implemented, using JSON");
                            println!("{}", render_json(&entries)?);
                        }
                    }
                }
                None => {
                    let summary = summarize_history(devco.as_deref(), &history);
                    print_history(&summary, &history, cli.output)?;
                }
            }
        }
        Commands::Show { id, changes } => {
            let assessment = store
                .load_assessment(AssessmentId(*id))?
                .ok_or_else(|| anyhow!("assessment {id} not found"))?;
            print_assessment(&assessment, cli.output)?;
            if *changes {
                let previous = previous_submission(&store, &assessment)?;
                let changes = previous
                    .map(|older| diff_inputs(&older.inputs, &assessment.inputs))
                    .unwrap_or_default();
                match cli.output {
                    OutputFormat::Table => println!("{}", render_input_changes_table(&changes)),
                    _ => println!("{}", render_json(&changes)?),
                }
            }
        }
        Commands::Verify { id, all, limit } => {
            let ids = match (id, all) {
                (Some(id), false) => vec![AssessmentId(*id)],
                (None, true) => store
                    .list_assessments(None, *limit)?
                    .into_iter()
                    .map(|a| a.id)
                    .collect(),
                _ => bail!("pass either an assessment id or --all"),
            };
            let mut reports = Vec::with_capacity(ids.len());
            for id in ids {
                let report = verify_stored(&store, id)?
                    .ok_or_else(|| anyhow!("assessment {id} not found"))?;
                reports.push(report);
            }
            print_verification(&reports, cli.output)?;
            let mismatched = reports.iter().filter(|r| !r.matches).count();
            if mismatched > 0 {
                bail!("{mismatched} assessment(s) failed verification");
            }
        }
        Commands::Audit { limit } => {
            let entries = store.audit_log(*limit)?;
            print_audit(&entries, cli.output)?;
        }
        Commands::Config { .. } => {}
        Commands::Serve { .. } => unreachable!("serve command handled before dispatch"),
    }

    Ok(())
}

fn handle_config_command(command: &Commands, config: &Config, config_path: &Path) -> Result<()> {
    let Commands::Config { init, show } = command else {
        return Ok(());
    };
    if *init {
        Config::write_template(config_path)?;
        println!("Wrote config template to {}", config_path.display());
    }
    if *show || !*init {
        println!("{}", render_json(config)?);
    }
    Ok(())
}

fn handle_criteria_command(
    command: &CriteriaCommand,
    store: &mut AssessmentStore,
    config: &Config,
    format: OutputFormat,
) -> Result<()> {
    let actor = config.audit.actor.as_str();
    match command {
        CriteriaCommand::Import {
            file,
            label,
            bands,
            activate,
        } => {
            let aggregate_bands = match bands {
                Some(raw) => parse_bands(raw)?,
                None => config.scoring.aggregate_bands.clone(),
            };
            let set = import_criteria_file(
                file,
                &ImportOptions {
                    label: label.clone(),
                    aggregate_bands,
                    scoring: config.scoring_options(),
                },
            )?;
            let version = store.import_criteria(&set, actor)?;
            let criteria = if *activate {
                store.activate_criteria(version, actor)?
            } else {
                if let Err(err) = validate_criteria_set(&set) {
                    warn!("{version} cannot be activated as imported: {err}");
                }
                load_version(store, version)?
            };
            print_criteria(&criteria, format)?;
        }
        CriteriaCommand::List => {
            let versions = store.list_criteria_versions()?;
            match format {
                OutputFormat::Table => println!("{}", render_versions_table(&versions)),
                OutputFormat::Json => println!("{}", render_json(&versions)?),
                OutputFormat::Jsonl => print_lines(&versions)?,
                OutputFormat::Csv => {
                    warn!("CSV output for criteria list not implemented, using JSON");
                    println!("{}", render_json(&versions)?);
                }
            }
        }
        CriteriaCommand::Show { version } => {
            let criteria = match version {
                Some(version) => load_version(store, *version)?,
                None => store
                    .active_criteria()?
                    .ok_or_else(|| anyhow!("no criteria version is active"))?,
            };
            print_criteria(&criteria, format)?;
        }
        CriteriaCommand::Activate { version } => {
            let criteria = store
                .activate_criteria(*version, actor)
                .with_context(|| format!("criteria {version} was not activated"))?;
            info!("{} is now active", criteria.version);
            print_criteria(&criteria, format)?;
        }
        CriteriaCommand::Diff { from, to, text } => {
            let old = load_version(store, *from)?;
            let new = match to {
                Some(to) => load_version(store, *to)?,
                None => store
                    .active_criteria()?
                    .ok_or_else(|| anyhow!("no criteria version is active"))?,
            };
            if *text {
                print!("{}", textual_diff(&old.set, &new.set));
                return Ok(());
            }
            let diff = build_version_diff(&old, &new);
            match format {
                OutputFormat::Table => println!("{}", render_diff_table(&diff)),
                OutputFormat::Json => println!("{}", render_json(&diff)?),
                OutputFormat::Jsonl => println!("{}", render_json_line(&diff)?),
                OutputFormat::Csv => {
                    warn!("CSV output for criteria diff not implemented, using JSON");
                    println!("{}", render_json(&diff)?);
                }
            }
        }
    }
    Ok(())
}

fn load_version(store: &AssessmentStore, version: CriteriaVersion) -> Result<VersionedCriteria> {
    store
        .criteria_version(version)?
        .ok_or_else(|| anyhow!("criteria {version} does not exist"))
}

fn collect_inputs(devco: &str, input: Option<&Path>, values: &[String]) -> Result<InputValues> {
    let mut inputs = InputValues::new();
    if let Some(path) = input {
        let mut grouped = read_inputs_file(path, Some(devco))?;
        if let Some(own) = grouped.remove(devco) {
            inputs = own;
        }
        for other in grouped.keys() {
            warn!("ignoring rows for {other} in {}", path.display());
        }
    }
    for raw in values {
        let (field, value) = parse_assignment(raw)?;
        inputs.insert(field, value);
    }
    if inputs.is_empty() {
        bail!("no input values given, use --input or --set");
    }
    Ok(inputs)
}

fn previous_submission(store: &AssessmentStore, current: &Assessment) -> Result<Option<Assessment>> {
    let history = store.list_assessments(Some(&current.devco), PREVIOUS_SCAN_LIMIT)?;
    Ok(history.into_iter().find(|a| a.id < current.id))
}

fn print_criteria(
    criteria: &VersionedCriteria,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Table => {
            println!("{}", render_criteria_table(criteria));
            match required_fields(&criteria.set) {
                Ok(fields) => println!(
                    "Required inputs: {}",
                    fields.into_iter().collect::<Vec<_>>().join(", ")
                ),
                Err(err) => println!("Not activatable: {err}"),
            }
        }
        OutputFormat::Json => println!("{}", render_json(criteria)?),
        OutputFormat::Jsonl => println!("{}", render_json_line(criteria)?),
        OutputFormat::Csv => print!("{}", criteria_to_csv(criteria)?),
    }
    Ok(())
}

fn print_assessment(assessment: &Assessment, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", render_assessment_table(assessment)),
        OutputFormat::Json => println!("{}", render_json(assessment)?),
        OutputFormat::Jsonl => println!("{}", render_json_line(assessment)?),
        OutputFormat::Csv => print!("{}", assessment_to_csv(assessment)?),
    }
    Ok(())
}

fn print_history(
    summary: &HistorySummary,
    assessments: &[Assessment],
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", render_history_table(summary, assessments)),
        OutputFormat::Json => println!(
            "{}",
            render_json(&serde_json::json!({
                "summary": summary,
                "assessments": assessments,
            }))?
        ),
        OutputFormat::Jsonl => print_lines(assessments)?,
        OutputFormat::Csv => print!("{}", history_to_csv(assessments)?),
    }
    Ok(())
}

fn print_verification(reports: &[VerificationReport], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            for report in reports {
                println!("{}", render_verification_table(report));
            }
        }
        OutputFormat::Json => println!("{}", render_json(reports)?),
        OutputFormat::Jsonl => print_lines(reports)?,
        OutputFormat::Csv => {
            warn!("CSV output for verify not implemented, using JSON");
            println!("{}", render_json(reports)?);
        }
    }
    Ok(())
}

fn print_audit(entries: &[AuditLogEntry], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => println!("{}", render_audit_table(entries)),
        OutputFormat::Json => println!("{}", render_json(entries)?),
        OutputFormat::Jsonl => print_lines(entries)?,
        OutputFormat::Csv => print!("{}", audit_to_csv(entries)?),
    }
    Ok(())
}

fn print_lines<T: Serialize>(items: &[T]) -> Result<()> {
    for item in items {
        println!("{}", render_json_line(item)?);
    }
    Ok(())
}
