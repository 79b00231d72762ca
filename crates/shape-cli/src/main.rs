//! CLI binary for running, linting, and inspecting form definitions.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};

use shape_runtime::{
    FileSessionStore, FinisherRegistry, Form, FormDriver, FormRequest, FormSettings, Hooks,
    HttpTokenVerifier, PluginRecord, RequestOutcome, RuntimeServices, Severity,
};

#[derive(Parser)]
#[command(name = "shape", version, about = "Multi-page form runtime")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle one request against a form and print the outcome as JSON
    Run {
        /// Path to the form definition (.json)
        #[arg(long)]
        form: PathBuf,

        /// Path to the request (.json); a plain GET when omitted
        #[arg(long)]
        request: Option<PathBuf>,

        /// Directory holding visitor sessions
        #[arg(long, default_value = ".shape/sessions")]
        sessions: PathBuf,

        /// Path to the plugin settings (.json)
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Identity of the content instance the form is embedded in
        #[arg(long, default_value = "0")]
        plugin_uid: u64,

        /// Sessions untouched for longer than this start over
        #[arg(long)]
        session_ttl_secs: Option<i64>,

        /// Pretty-print the rendered view
        #[arg(long)]
        pretty: bool,
    },

    /// Check a form definition for authoring mistakes
    Lint {
        #[arg(long)]
        form: PathBuf,
    },

    /// Show the pages, fields, and finishers of a form
    Info {
        #[arg(long)]
        form: PathBuf,
    },

    /// Evaluate a condition expression against variables from a JSON file
    Eval {
        expression: String,

        /// JSON object providing the expression variables
        #[arg(long)]
        vars: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            form,
            request,
            sessions,
            settings,
            plugin_uid,
            session_ttl_secs,
            pretty,
        } => cmd_run(RunArgs {
            form,
            request,
            sessions,
            settings,
            plugin_uid,
            session_ttl_secs,
            pretty,
        }),
        Commands::Lint { form } => cmd_lint(&form),
        Commands::Info { form } => cmd_info(&form),
        Commands::Eval { expression, vars } => cmd_eval(&expression, vars.as_deref()),
    }
}

fn load_form(path: &Path) -> anyhow::Result<Form> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("reading form {}", path.display()))?;
    Ok(Form::from_json(&source)?)
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&source).with_context(|| format!("parsing {}", path.display()))
}

struct RunArgs {
    form: PathBuf,
    request: Option<PathBuf>,
    sessions: PathBuf,
    settings: Option<PathBuf>,
    plugin_uid: u64,
    session_ttl_secs: Option<i64>,
    pretty: bool,
}

fn cmd_run(args: RunArgs) -> anyhow::Result<()> {
    let form = load_form(&args.form)?;
    let registry = FinisherRegistry::with_builtins();
    shape_runtime::lint_or_raise(&form, &registry)?;

    let settings = match &args.settings {
        Some(path) => FormSettings::from_file(path)?,
        None => FormSettings::default(),
    };
    let request: FormRequest = match &args.request {
        Some(path) => load_json(path)?,
        None => FormRequest::get(),
    };

    let mut hooks = Hooks::new();
    if settings.spam_protection.google_recaptcha.enabled {
        shape_runtime::register_recaptcha(&mut hooks, Arc::new(HttpTokenVerifier::new()?));
    }
    let services = RuntimeServices::new()
        .with_hooks(hooks)
        .with_finishers(registry)
        .with_renderer(shape_runtime::JsonViewRenderer { pretty: args.pretty });

    let mut store = FileSessionStore::new(&args.sessions);
    if let Some(secs) = args.session_ttl_secs {
        store = store.with_ttl(chrono::Duration::seconds(secs));
    }

    let driver = FormDriver::new(
        Arc::new(services),
        store,
        Arc::new(form),
        settings,
        PluginRecord::new(args.plugin_uid),
    );
    let outcome = match driver.handle(request) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(status = e.http_status(), "Request failed: {e}");
            std::process::exit(if e.is_configuration() { 2 } else { 1 });
        }
    };

    match &outcome {
        RequestOutcome::Rendered {
            page_index,
            has_errors,
            ..
        } => tracing::info!(page = page_index, has_errors, "Rendered form page"),
        RequestOutcome::Finished { session_id, .. } => {
            tracing::info!(session = %session_id, "Form finished")
        }
    }
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

fn cmd_lint(path: &Path) -> anyhow::Result<()> {
    let form = load_form(path)?;
    let diagnostics = shape_runtime::lint(&form, &FinisherRegistry::with_builtins());

    if diagnostics.is_empty() {
        println!("Form is valid");
        return Ok(());
    }

    let mut has_error = false;
    for diag in &diagnostics {
        let severity = match diag.severity {
            Severity::Error => {
                has_error = true;
                "ERROR"
            }
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        match &diag.field {
            Some(field) => println!("[{severity}] {} ({field}): {}", diag.rule, diag.message),
            None => println!("[{severity}] {}: {}", diag.rule, diag.message),
        }
        if let Some(fix) = &diag.fix {
            println!("    fix: {fix}");
        }
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let form = load_form(path)?;

    println!("Form: {} (uid {})", form.name, form.uid);
    println!("Pages: {}", form.page_count());

    for (i, page) in form.pages.iter().enumerate() {
        let label = page.label.as_deref().unwrap_or("");
        println!("\n  Page {} [{}] {}", i + 1, page.page_type, label);
        for field in &page.fields {
            let mut flags = Vec::new();
            if field.is_required() {
                flags.push("required".to_string());
            }
            if let Some(condition) = field.condition() {
                flags.push(format!("if {condition}"));
            }
            let name = if field.name.is_empty() { "-" } else { &field.name };
            println!("    {} ({}) {}", name, field.field_type, flags.join(", "));
        }
    }

    if !form.finisher_configurations.is_empty() {
        println!("\nFinishers:");
        for configuration in &form.finisher_configurations {
            match configuration.condition() {
                Some(condition) => println!("  {} if {condition}", configuration.identifier),
                None => println!("  {}", configuration.identifier),
            }
        }
    }

    Ok(())
}

fn cmd_eval(expression: &str, vars: Option<&Path>) -> anyhow::Result<()> {
    let variables: Map<String, Value> = match vars {
        Some(path) => load_json(path)?,
        None => Map::new(),
    };
    let resolver = shape_expr::Resolver::new(variables);
    let value = resolver.evaluate(expression)?;
    println!("{}", serde_json::to_string(&value)?);
    Ok(())
}
