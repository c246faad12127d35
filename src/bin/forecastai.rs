use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use forecastai_client::{
    config::{self, ClientConfig},
    dataset::UploadedDataset,
    export::{self, ExportKind},
    models::{DateRange, ForecastBundle, RegistrationForm, RoiSource},
    storage::FileStore,
    ClientError, ForecastClient,
};
use serde::Serialize;
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize(cli.api_url.clone())?;

    match cli.command {
        Commands::Auth(command) => handle_auth_command(&context, command, cli.json).await?,
        Commands::Forecast(command) => handle_forecast_command(&context, command, cli.json).await?,
        Commands::Trial(command) => handle_trial_command(&context, command, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(name = "forecastai", about = "ForecastAI client for sales forecasts and inventory planning", version)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON when available"
    )]
    json: bool,
    #[arg(long, global = true, help = "Backend base URL, overriding configuration")]
    api_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(subcommand)]
    Auth(AuthCommands),
    #[command(subcommand)]
    Forecast(ForecastCommands),
    #[command(subcommand)]
    Trial(TrialCommands),
}

#[derive(Subcommand)]
enum AuthCommands {
    Login(AuthLoginArgs),
    Register(AuthRegisterArgs),
    Whoami,
    Logout,
    /// Request a password reset code by email
    Forgot(AuthForgotArgs),
    /// Set a new password using the emailed code
    Reset(AuthResetArgs),
}

#[derive(Args)]
struct AuthLoginArgs {
    #[arg(long, help = "Email address for the account")]
    email: String,
    #[arg(long, help = "Password for the account")]
    password: String,
    #[arg(
        long,
        action = ArgAction::SetTrue,
        help = "Keep the refresh token so the session survives restarts"
    )]
    stay_logged_in: bool,
}

#[derive(Args)]
struct AuthRegisterArgs {
    #[arg(long)]
    full_name: String,
    #[arg(long)]
    company_name: String,
    #[arg(long)]
    email: String,
    #[arg(long)]
    password: String,
    #[arg(long, help = "Repeat the password")]
    confirm_password: String,
}

#[derive(Args)]
struct AuthForgotArgs {
    #[arg(long)]
    email: String,
}

#[derive(Args)]
struct AuthResetArgs {
    #[arg(long)]
    email: String,
    #[arg(long, help = "Code received by email")]
    otp: String,
    #[arg(long)]
    new_password: String,
    #[arg(long)]
    confirm_password: String,
}

#[derive(Subcommand)]
enum ForecastCommands {
    /// Upload a sales file and print the forecast
    Upload(ForecastUploadArgs),
    /// Run the forecast on the backend's sample data
    Sample(ForecastOutputArgs),
    /// Ask the backend for a preview of a sales file
    Preview(ForecastPreviewArgs),
}

#[derive(Args)]
struct ForecastUploadArgs {
    #[arg(long, help = "CSV or Excel file with sales history")]
    file: PathBuf,
    #[arg(long, help = "Start of the forecast window (YYYY-MM-DD)")]
    from: Option<NaiveDate>,
    #[arg(long, help = "End of the forecast window (YYYY-MM-DD)")]
    to: Option<NaiveDate>,
    #[arg(long, help = "Store the history belongs to")]
    store: Option<String>,
    #[command(flatten)]
    output: ForecastOutputArgs,
}

#[derive(Args)]
struct ForecastOutputArgs {
    #[arg(long, help = "Write CSV exports into this directory")]
    export_dir: Option<PathBuf>,
    #[arg(long, value_enum, help = "Limit exports to one kind")]
    only: Option<ExportSelection>,
}

#[derive(Args)]
struct ForecastPreviewArgs {
    #[arg(long)]
    file: PathBuf,
    #[arg(long)]
    store: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportSelection {
    Forecasts,
    Inventory,
    Actions,
    Historical,
}

impl From<ExportSelection> for ExportKind {
    fn from(selection: ExportSelection) -> Self {
        match selection {
            ExportSelection::Forecasts => ExportKind::Forecasts,
            ExportSelection::Inventory => ExportKind::Inventory,
            ExportSelection::Actions => ExportKind::PriorityActions,
            ExportSelection::Historical => ExportKind::Historical,
        }
    }
}

#[derive(Subcommand)]
enum TrialCommands {
    Info,
    Upgrade(TrialUpgradeArgs),
}

#[derive(Args)]
struct TrialUpgradeArgs {
    #[arg(long, help = "Plan tier to move to, e.g. pro")]
    plan: String,
}

struct CliContext {
    config: ClientConfig,
    client: ForecastClient,
}

impl CliContext {
    fn initialize(api_url: Option<String>) -> Result<Self> {
        let mut config = config::load_config().context("failed to load client config")?;
        config::init_tracing(config.log_level(), config.log_json);

        if let Some(url) = api_url {
            config.api_base_url = url;
        }
        if config.session_file.is_none() {
            config.session_file = FileStore::default_path();
        }
        debug!(session_file = ?config.session_file, "using session cache");

        let client = ForecastClient::new(config.clone()).context("failed to build API client")?;
        Ok(Self { config, client })
    }

    /// Resumes the cached session or fails with a hint to log in.
    async fn require_session(&self) -> Result<()> {
        let restored = self
            .client
            .session()
            .restore()
            .await
            .context("failed to resume session")?;
        if !restored {
            bail!("not logged in; run `forecastai auth login` first");
        }
        Ok(())
    }
}

async fn handle_auth_command(context: &CliContext, command: AuthCommands, json: bool) -> Result<()> {
    let session = context.client.session();
    match command {
        AuthCommands::Login(args) => {
            let user = session
                .login(&args.email, &args.password, args.stay_logged_in)
                .await
                .map_err(describe)
                .context("login failed")?;
            if json {
                print_json(&user)?;
            } else {
                match user {
                    Some(user) => println!("Logged in as {} <{}>", user.full_name, user.email),
                    None => println!("Logged in"),
                }
                if let Some(expires_at) = session.expires_at() {
                    println!("Session valid until {}", expires_at.format("%Y-%m-%d %H:%M UTC"));
                }
            }
        }
        AuthCommands::Register(args) => {
            let form = RegistrationForm {
                full_name: args.full_name,
                email: args.email,
                company_name: args.company_name,
                password: args.password,
                confirm_password: args.confirm_password,
            };
            let response = session
                .register(&form)
                .await
                .map_err(describe)
                .context("registration failed")?;
            if json {
                print_json(&response)?;
            } else {
                println!("Account created for {}. Log in to continue.", form.email.trim());
            }
        }
        AuthCommands::Whoami => {
            context.require_session().await?;
            let user = session
                .current_user()
                .ok_or_else(|| anyhow!("session has no profile"))?;
            if json {
                print_json(&user)?;
            } else {
                println!("{} <{}>", user.full_name, user.email);
                if let Some(company) = user.company_name.as_deref().filter(|c| !c.is_empty()) {
                    println!("Company: {company}");
                }
            }
        }
        AuthCommands::Logout => {
            // Restore first so the server-side revoke can carry the token
            if let Err(err) = session.restore().await {
                debug!("could not resume session before logout: {}", err);
            }
            session.logout().await;
            println!("Logged out");
        }
        AuthCommands::Forgot(args) => {
            let message = session
                .request_password_reset(&args.email)
                .await
                .map_err(describe)
                .context("could not request a reset code")?;
            println!(
                "{}",
                message.unwrap_or_else(|| "If the account exists, a reset code is on its way".to_string())
            );
        }
        AuthCommands::Reset(args) => {
            let message = session
                .reset_password(&args.email, &args.otp, &args.new_password, &args.confirm_password)
                .await
                .map_err(describe)
                .context("password reset failed")?;
            println!(
                "{}",
                message.unwrap_or_else(|| "Password updated. You can log in now.".to_string())
            );
        }
    }
    Ok(())
}

async fn handle_forecast_command(
    context: &CliContext,
    command: ForecastCommands,
    json: bool,
) -> Result<()> {
    context.require_session().await?;
    let dashboard = context.client.dashboard();

    match command {
        ForecastCommands::Upload(args) => {
            let store = args
                .store
                .unwrap_or_else(|| context.config.default_store.clone());
            let mut dataset = UploadedDataset::from_path(&args.file, store)
                .with_context(|| format!("failed to read {}", args.file.display()))?;
            if let Some(range) = resolve_range(args.from, args.to, dataset.date_range)? {
                dataset = dataset.with_date_range(range);
            }
            let range = dataset.date_range;

            let result = dashboard.upload(dataset).await;
            report(&dashboard, result)?;
            let snapshot = dashboard.snapshot();
            render_bundle(&snapshot.bundle, json)?;
            write_exports(&snapshot.bundle, range.as_ref(), &args.output)?;
        }
        ForecastCommands::Sample(output) => {
            let result = dashboard.load_sample().await;
            report(&dashboard, result)?;
            let snapshot = dashboard.snapshot();
            render_bundle(&snapshot.bundle, json)?;
            write_exports(&snapshot.bundle, None, &output)?;
        }
        ForecastCommands::Preview(args) => {
            let store = args
                .store
                .unwrap_or_else(|| context.config.default_store.clone());
            let dataset = UploadedDataset::from_path(&args.file, store)
                .with_context(|| format!("failed to read {}", args.file.display()))?;
            let preview = context
                .client
                .api()
                .preview(&dataset)
                .await
                .map_err(describe)
                .context("preview failed")?;
            print_json(&preview)?;
        }
    }
    Ok(())
}

async fn handle_trial_command(context: &CliContext, command: TrialCommands, json: bool) -> Result<()> {
    context.require_session().await?;
    let api = context.client.api();
    match command {
        TrialCommands::Info => {
            let info = api
                .trial_info()
                .await
                .map_err(describe)
                .context("failed to load trial info")?;
            if json {
                print_json(&info)?;
            } else {
                let status = if info.is_active { "active" } else { "inactive" };
                println!("Plan {} • {} • {} day(s) remaining", info.plan, status, info.days_remaining);
                if let Some(ends) = info.trial_ends_at {
                    println!("Trial ends {}", ends.format("%Y-%m-%d"));
                }
            }
        }
        TrialCommands::Upgrade(args) => {
            let response = api
                .upgrade_trial(&args.plan)
                .await
                .map_err(describe)
                .context("upgrade failed")?;
            if json {
                print_json(&response)?;
            } else {
                println!("Upgrade to {} requested", args.plan.trim());
            }
        }
    }
    Ok(())
}

/// Explicit bounds win; a single bound is completed from the file's own range.
fn resolve_range(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    detected: Option<DateRange>,
) -> Result<Option<DateRange>> {
    let range = match (from, to, detected) {
        (None, None, _) => return Ok(None),
        (Some(from), Some(to), _) => DateRange::new(from, to),
        (Some(from), None, Some(d)) => DateRange::new(from, d.to),
        (None, Some(to), Some(d)) => DateRange::new(d.from, to),
        _ => bail!("both --from and --to are required for files without readable dates"),
    };
    if range.to < range.from {
        bail!("--to must be on or after --from");
    }
    Ok(Some(range))
}

/// Turns a failed dashboard request into an error carrying the banner text.
fn report(dashboard: &forecastai_client::DashboardState, result: Result<(), ClientError>) -> Result<()> {
    let snapshot = dashboard.snapshot();
    if let Some(paywall) = snapshot.paywall {
        bail!("{} Upgrade at {}", paywall.message, paywall.upgrade_url);
    }
    result.map_err(describe).context("forecast request failed")?;
    if let Some(status) = snapshot.status {
        eprintln!("{}", status.text);
    }
    Ok(())
}

fn describe(err: ClientError) -> anyhow::Error {
    anyhow!(err.user_message()).context(err)
}

fn write_exports(
    bundle: &ForecastBundle,
    range: Option<&DateRange>,
    output: &ForecastOutputArgs,
) -> Result<()> {
    let Some(dir) = &output.export_dir else {
        return Ok(());
    };
    let files = match output.only {
        Some(kind) => vec![export::export(kind.into(), bundle, range)?],
        None => export::export_all(bundle, range)?,
    };
    for file in files {
        let path = file
            .write_to(dir)
            .with_context(|| format!("failed to write {}", file.filename))?;
        println!("Saved {}", path.display());
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_bundle(bundle: &ForecastBundle, json: bool) -> Result<()> {
    if json {
        return print_json(bundle);
    }

    if let Some(summary) = &bundle.summary {
        println!(
            "Summary • {} record(s) • {} item(s) • total sales {:.0} • avg/day {:.1}",
            summary.total_records, summary.unique_items, summary.total_sales, summary.average_daily_sales
        );
        if let Some(range) = &summary.date_range {
            println!("  Range {range}");
        }
    }

    println!("Forecasts ({})", bundle.forecasts.len());
    for forecast in &bundle.forecasts {
        println!(
            "- {} • {} • {} day(s) • {:.0} unit(s) • accuracy {:.0}%",
            forecast.sku,
            forecast.item_name,
            forecast.forecast_points.len(),
            forecast.total_predicted_units(),
            forecast.accuracy * 100.0
        );
    }

    if !bundle.inventory.is_empty() {
        println!("Inventory");
        for item in &bundle.inventory {
            println!(
                "- {} • stock {:.0} → {:.0} • reorder at {:.0} • risk {}",
                item.sku, item.current_stock, item.recommended_stock, item.reorder_point, item.risk_level
            );
        }
    }

    if !bundle.priority_actions.is_empty() {
        println!("Priority actions");
        for action in &bundle.priority_actions {
            println!(
                "- [{}] {} • order {:.0} • revenue at risk {} • ROI {:.0}%",
                action.priority, action.sku, action.recommended_qty, action.revenue_risk, action.roi_percent
            );
        }
    }

    if let Some(roi) = &bundle.roi {
        let source = match roi.source {
            RoiSource::Backend => "reported",
            RoiSource::Computed => "estimated",
        };
        println!(
            "ROI ({source}) • revenue {} • projected +{} • savings {} • net {}%",
            roi.current_revenue, roi.projected_increase, roi.inventory_cost_savings, roi.net_roi
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    #[test]
    fn range_completes_from_detected_dates() {
        let detected = Some(DateRange::new(d(1), d(30)));
        assert_eq!(resolve_range(None, None, detected).unwrap(), None);
        assert_eq!(
            resolve_range(Some(d(10)), None, detected).unwrap(),
            Some(DateRange::new(d(10), d(30)))
        );
        assert!(resolve_range(Some(d(10)), None, None).is_err());
        assert!(resolve_range(Some(d(10)), Some(d(5)), None).is_err());
    }

    #[test]
    fn cli_parses_upload() {
        let cli = Cli::try_parse_from([
            "forecastai",
            "forecast",
            "upload",
            "--file",
            "sales.csv",
            "--from",
            "2025-06-01",
            "--to",
            "2025-06-30",
            "--only",
            "actions",
        ])
        .unwrap();
        match cli.command {
            Commands::Forecast(ForecastCommands::Upload(args)) => {
                assert_eq!(args.from, Some(d(1)));
                assert!(matches!(args.output.only, Some(ExportSelection::Actions)));
            }
            _ => panic!("expected forecast upload"),
        }
    }
}
