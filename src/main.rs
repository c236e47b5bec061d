//! CLI entry point for `sheetmerge`.

use std::io::{BufRead as _, Write as _};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Args, Parser, Subcommand};

use sheetmerge_lib::attach::{
    Attachment, DirectoryConverter, DisabledConverter, DocumentConverter, DocumentId,
    HttpExportConverter,
};
use sheetmerge_lib::data::csv::CsvOptions;
use sheetmerge_lib::data::CsvSheet;
use sheetmerge_lib::merge::{
    run_merge, template_dir_of, BatchResult, Host, MergeRun, Preview, RunOutcome,
};
use sheetmerge_lib::smtp::{self, Mailer, OutgoingMail, SmtpCredentials, SmtpMailer, SmtpProfile};
use sheetmerge_lib::template::{extract_placeholders, parse_template, Template};

#[derive(Parser)]
#[command(name = "sheetmerge", version, about = "Send one personalised email per spreadsheet row")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Preview the first row, confirm, then send to every row without a status
    Send {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        smtp: SmtpArgs,
        #[command(flatten)]
        docs: DocsArgs,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
        /// Render and resolve attachments but send nothing and leave the sheet untouched
        #[arg(long)]
        dry_run: bool,
        /// Print the batch result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Render the first row and check the sheet without sending
    Preview {
        #[command(flatten)]
        input: InputArgs,
        #[arg(long)]
        json: bool,
    },
    /// List the placeholders a template uses
    Placeholders {
        template: PathBuf,
    },
    /// Manage SMTP credentials in the OS keychain
    Credential {
        #[command(subcommand)]
        action: CredentialAction,
    },
    /// Check that the SMTP server in a profile accepts a connection
    TestConnection {
        #[command(flatten)]
        smtp: SmtpArgs,
    },
}

#[derive(Subcommand)]
enum CredentialAction {
    /// Store a username and password (password read from stdin)
    Set {
        profile: String,
        #[arg(short, long)]
        username: String,
    },
    /// Remove stored credentials
    Delete { profile: String },
}

#[derive(Args)]
struct InputArgs {
    /// CSV sheet: header row plus one row per recipient
    data: PathBuf,
    /// YAML template with `subject` and `body`
    #[arg(short, long)]
    template: PathBuf,
    /// Field separator (auto-detected when omitted)
    #[arg(long)]
    separator: Option<char>,
    /// Input encoding label, e.g. windows-1252 (UTF-8 when omitted)
    #[arg(long)]
    encoding: Option<String>,
}

#[derive(Args)]
struct SmtpArgs {
    /// SMTP profile name
    #[arg(short, long, env = "SHEETMERGE_PROFILE")]
    profile: Option<String>,
    /// JSON file holding SMTP profiles
    #[arg(long, env = "SHEETMERGE_PROFILES", default_value = "smtp_profiles.json")]
    profiles: PathBuf,
}

#[derive(Args)]
struct DocsArgs {
    /// Directory of pre-exported documents named `<id>.pdf`
    #[arg(long, conflicts_with = "export_base")]
    docs_dir: Option<PathBuf>,
    /// Base URL of a document export service
    #[arg(long)]
    export_base: Option<String>,
    /// Bearer token for the export service
    #[arg(long, env = "SHEETMERGE_EXPORT_TOKEN", hide_env_values = true)]
    export_token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level);

    match cli.command {
        Commands::Send {
            input,
            smtp,
            docs,
            yes,
            dry_run,
            json,
        } => cmd_send(&input, &smtp, &docs, yes, dry_run, json).await,
        Commands::Preview { input, json } => cmd_preview(&input, json),
        Commands::Placeholders { template } => cmd_placeholders(&template),
        Commands::Credential { action } => cmd_credential(action),
        Commands::TestConnection { smtp } => cmd_test_connection(&smtp).await,
    }
}

fn setup_logging(level: &str) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .init();
}

fn open_run(input: &InputArgs) -> anyhow::Result<MergeRun<CsvSheet>> {
    let template = load_template(&input.template)?;
    let separator = match input.separator {
        Some(c) if c.is_ascii() => Some(c as u8),
        Some(c) => anyhow::bail!("separator must be a single ASCII character, got '{c}'"),
        None => None,
    };
    let sheet = CsvSheet::new(
        &input.data,
        CsvOptions {
            separator,
            encoding: input.encoding.clone(),
        },
    );
    Ok(MergeRun::new(template, sheet).with_template_dir(template_dir_of(&input.template)))
}

fn load_template(path: &Path) -> anyhow::Result<Template> {
    parse_template(path).with_context(|| format!("cannot load template {}", path.display()))
}

async fn cmd_send(
    input: &InputArgs,
    smtp_args: &SmtpArgs,
    docs: &DocsArgs,
    yes: bool,
    dry_run: bool,
    json: bool,
) -> anyhow::Result<()> {
    let cancel = Arc::new(AtomicBool::new(false));
    let mut run = open_run(input)?
        .with_dry_run(dry_run)
        .with_cancel_flag(cancel.clone());

    let mailer = if dry_run {
        CliMailer::DryRun
    } else {
        let profile = select_profile(smtp_args)?;
        let credentials = credentials_for(&profile.name);
        CliMailer::Smtp(SmtpMailer::new(&profile, &credentials)?)
    };
    let converter = CliConverter::from_args(docs);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current row");
            cancel.store(true, Ordering::Relaxed);
        }
    });

    let mut host = TerminalHost { assume_yes: yes, json };
    match run_merge(&mut run, &mut host, &mailer, &converter).await? {
        RunOutcome::Completed(_) => Ok(()),
        RunOutcome::Cancelled => {
            eprintln!("Cancelled. Nothing was sent.");
            Ok(())
        }
    }
}

fn cmd_preview(input: &InputArgs, json: bool) -> anyhow::Result<()> {
    let mut run = open_run(input)?;
    let preview = run.preview()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&preview)?);
    } else {
        print_preview(&mut std::io::stdout(), &preview)?;
    }
    Ok(())
}

fn cmd_placeholders(path: &Path) -> anyhow::Result<()> {
    let template = load_template(path)?;
    let delimiters = &template.config.delimiters;
    let mut names = extract_placeholders(&template.subject, delimiters);
    names.extend(extract_placeholders(&template.body, delimiters));
    names.sort();
    names.dedup();
    for name in names {
        println!("{}", delimiters.token(&name));
    }
    Ok(())
}

fn cmd_credential(action: CredentialAction) -> anyhow::Result<()> {
    match action {
        CredentialAction::Set { profile, username } => {
            eprint!("Password for {username}: ");
            std::io::stderr().flush()?;
            let mut password = String::new();
            std::io::stdin().lock().read_line(&mut password)?;
            smtp::store_credential(&profile, &username, password.trim_end_matches(['\r', '\n']))?;
            eprintln!("Stored credentials for profile '{profile}'.");
        }
        CredentialAction::Delete { profile } => {
            smtp::delete_credential(&profile)?;
            eprintln!("Removed credentials for profile '{profile}'.");
        }
    }
    Ok(())
}

async fn cmd_test_connection(smtp_args: &SmtpArgs) -> anyhow::Result<()> {
    let profile = select_profile(smtp_args)?;
    let credentials = credentials_for(&profile.name);
    smtp::test_connection(&profile, &credentials).await?;
    println!("Connected to {}:{}.", profile.host, profile.port);
    Ok(())
}

fn select_profile(args: &SmtpArgs) -> anyhow::Result<SmtpProfile> {
    let profiles = smtp::load_profiles(&args.profiles)
        .with_context(|| format!("cannot load SMTP profiles from {}", args.profiles.display()))?;
    match &args.profile {
        Some(name) => profiles
            .into_iter()
            .find(|p| &p.name == name)
            .with_context(|| format!("no SMTP profile named '{name}'")),
        None => {
            if profiles.len() > 1 {
                anyhow::bail!("several SMTP profiles defined; choose one with --profile");
            }
            profiles
                .into_iter()
                .next()
                .with_context(|| format!("{} contains no SMTP profiles", args.profiles.display()))
        }
    }
}

/// Environment variables win over the keychain; no credentials means an open relay.
fn credentials_for(profile_name: &str) -> SmtpCredentials {
    if let Ok(username) = std::env::var("SHEETMERGE_SMTP_USERNAME") {
        return SmtpCredentials {
            username,
            password: std::env::var("SHEETMERGE_SMTP_PASSWORD").unwrap_or_default(),
        };
    }
    match smtp::retrieve_credential(profile_name) {
        Ok(credentials) => credentials,
        Err(e) => {
            tracing::warn!(profile = profile_name, error = %e, "no stored credentials, connecting without authentication");
            SmtpCredentials::default()
        }
    }
}

enum CliMailer {
    Smtp(SmtpMailer),
    DryRun,
}

impl Mailer for CliMailer {
    async fn send(&self, mail: &OutgoingMail) -> sheetmerge_lib::Result<()> {
        match self {
            CliMailer::Smtp(mailer) => mailer.send(mail).await,
            CliMailer::DryRun => Ok(()),
        }
    }
}

enum CliConverter {
    Disabled(DisabledConverter),
    Directory(DirectoryConverter),
    Http(HttpExportConverter),
}

impl CliConverter {
    fn from_args(args: &DocsArgs) -> Self {
        if let Some(dir) = &args.docs_dir {
            return CliConverter::Directory(DirectoryConverter::new(dir));
        }
        match &args.export_base {
            Some(base) => CliConverter::Http(HttpExportConverter::new(
                base.clone(),
                args.export_token.clone(),
            )),
            None => CliConverter::Disabled(DisabledConverter),
        }
    }
}

impl DocumentConverter for CliConverter {
    async fn convert(&self, id: &DocumentId) -> sheetmerge_lib::Result<Attachment> {
        match self {
            CliConverter::Disabled(c) => c.convert(id).await,
            CliConverter::Directory(c) => c.convert(id).await,
            CliConverter::Http(c) => c.convert(id).await,
        }
    }
}

/// Confirmation prompt on stdin, report on stdout.
struct TerminalHost {
    assume_yes: bool,
    json: bool,
}

impl Host for TerminalHost {
    fn confirm(&mut self, preview: &Preview) -> bool {
        let mut err = std::io::stderr();
        if print_preview(&mut err, preview).is_err() {
            return false;
        }
        if preview.eligible_rows == 0 {
            let _ = writeln!(err, "Every row already has a status; nothing to send.");
        }
        if self.assume_yes {
            return true;
        }
        let _ = write!(err, "Send to {} row(s)? [y/N] ", preview.eligible_rows);
        let _ = err.flush();
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }

    fn report(&mut self, result: &BatchResult) {
        if self.json {
            match serde_json::to_string_pretty(result) {
                Ok(s) => println!("{s}"),
                Err(e) => tracing::error!(error = %e, "cannot serialize batch result"),
            }
            return;
        }
        println!("{}", result.summary());
        if !result.errors.is_empty() {
            println!("Errors:");
            for error in &result.errors {
                println!("  {error}");
            }
        }
    }
}

fn print_preview(out: &mut impl std::io::Write, preview: &Preview) -> std::io::Result<()> {
    writeln!(out, "Preview of row {}", preview.row)?;
    writeln!(out, "  To:      {}", preview.to)?;
    writeln!(out, "  Subject: {}", preview.subject)?;
    writeln!(out)?;
    for line in preview.text_body.lines() {
        writeln!(out, "  {line}")?;
    }
    writeln!(out)?;
    writeln!(
        out,
        "{} data row(s), {} without a status",
        preview.total_rows, preview.eligible_rows
    )?;
    if preview.status_column_created {
        writeln!(out, "Column '{}' will be added.", preview.status_header)?;
    }
    if !preview.unknown_placeholders.is_empty() {
        writeln!(
            out,
            "Warning: no column for {}",
            preview.unknown_placeholders.join(", ")
        )?;
    }
    Ok(())
}
