//! Pastures - POC landing zones for Google Cloud
//!
//! The `pasture` command deploys a Cloud Foundation Fabric foundation into a
//! Google Cloud organization and plants sandbox "pastures" on top of it.
//!
//! ## Commands
//!
//! - `plant <pasture>`: deploy the foundation (if needed) and the pasture
//! - `burn <pasture>`: destroy the pasture, leaving the foundation in place
//! - `plow`: write the shared var file and grant organization roles

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgGroup, Args, Parser, Subcommand};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, Level};

use gcp_facade::{
    app_default_credentials, set_required_org_iam_roles, AdcTokenProvider, GcsObjectStore,
    IamClient, Organization, REQUIRED_ORG_ROLES,
};
use pasture_core::{hydrate, FastConfig, PastureError, Settings, VarFile};
use pasture_fabric::{
    Jumpstarts, Mode, PastureSize, Pipeline, PipelineReport, RunFlags, SeedOptions, SeedTemplate,
};
use tf_runner::{is_terraform_available, TerraformCli};

#[derive(Parser, Debug)]
#[command(name = "pasture")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A POC toolkit for Google Cloud", long_about = None)]
struct Cli {
    /// Settings file (default is $HOME/.pastures.yaml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Show Terraform output and debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Only test whether the foundation can be applied
    #[arg(long, global = true)]
    dry_run: bool,

    /// Do not touch foundation stages
    #[arg(long, global = true)]
    skip_foundation: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deploy a pasture into the organization
    Plant {
        #[command(subcommand)]
        pasture: PastureCommand,
    },

    /// Destroy a pasture, leaving the foundation in place
    Burn {
        #[command(subcommand)]
        pasture: PastureCommand,
    },

    /// Prepare the var file and organization roles for a first plant
    Plow(PlowArgs),
}

#[derive(Subcommand, Debug)]
enum PastureCommand {
    /// Data Cloud pasture with optional jumpstarts
    DataCloud(DataCloudArgs),
}

#[derive(Args, Debug)]
#[command(group(
    ArgGroup::new("jumpstart")
        .required(true)
        .multiple(true)
        .args(["knowledge_base", "data_warehouse", "analytics_lakehouse", "genai_rag"])
))]
struct DataCloudArgs {
    /// Region for GCP resources
    #[arg(short, long, default_value = "us-central1")]
    region: String,

    /// Size of the pasture environment (big or small)
    #[arg(short = 's', long, value_name = "SIZE")]
    pasture_size: PastureSize,

    /// Enable the Vertex AI knowledge base jumpstart
    #[arg(long)]
    knowledge_base: bool,

    /// Enable the BigQuery data warehouse jumpstart
    #[arg(long)]
    data_warehouse: bool,

    /// Enable the analytics lakehouse jumpstart
    #[arg(long)]
    analytics_lakehouse: bool,

    /// Enable the Vertex AI RAG jumpstart
    #[arg(long)]
    genai_rag: bool,
}

impl DataCloudArgs {
    fn seed_options(&self) -> SeedOptions {
        SeedOptions {
            region: self.region.clone(),
            size: self.pasture_size,
            jumpstarts: Jumpstarts {
                knowledge_base: self.knowledge_base,
                data_warehouse: self.data_warehouse,
                analytics_lakehouse: self.analytics_lakehouse,
                genai_rag: self.genai_rag,
            },
        }
    }
}

#[derive(Args, Debug)]
struct PlowArgs {
    /// Resource prefix (lowercase, up to 9 characters)
    #[arg(long)]
    prefix: String,

    /// Numeric organization ID
    #[arg(long)]
    org_id: u64,

    /// Organization domain
    #[arg(long)]
    domain: String,

    /// Billing account ID
    #[arg(long)]
    billing_account: String,

    /// Workspace customer ID
    #[arg(long)]
    customer_id: Option<String>,

    /// Admin group granted the organization roles
    #[arg(long, default_value = "gcp-organization-admins")]
    group: String,

    /// Overwrite an existing var file
    #[arg(long)]
    rehydrate: bool,

    /// Do not touch the organization IAM policy
    #[arg(long)]
    skip_iam: bool,
}

impl PlowArgs {
    fn organization(&self) -> Organization {
        Organization {
            id: self.org_id,
            domain: self.domain.clone(),
            customer_id: self.customer_id.clone(),
        }
    }

    fn var_file_body(&self) -> Result<Map<String, Value>> {
        let body = json!({
            "prefix": self.prefix,
            "organization": self.organization(),
            "billing_account": { "id": self.billing_account },
            "groups": { "gcp-organization-admins": self.group },
        });
        match body {
            Value::Object(map) => Ok(map),
            _ => Err(anyhow!("var file body is not an object")),
        }
    }
}

fn parse_exit_code(err: &clap::Error) -> u8 {
    if err.use_stderr() {
        1
    } else {
        0
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(parse_exit_code(&e));
        }
    };

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    pasture_core::init_tracing(cli.json, level);

    let result = tokio::select! {
        result = run(cli) => result,
        _ = tokio::signal::ctrl_c() => Err(anyhow!("Interrupted")),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    let flags = RunFlags {
        dry_run: cli.dry_run,
        skip_foundation: cli.skip_foundation,
    };

    match cli.command {
        Commands::Plant { pasture } => {
            cmd_pasture(&settings, Mode::Plant, flags, pasture, cli.verbose, cli.json).await
        }
        Commands::Burn { pasture } => {
            cmd_pasture(&settings, Mode::Burn, flags, pasture, cli.verbose, cli.json).await
        }
        Commands::Plow(args) => cmd_plow(&settings, &args).await,
    }
}

async fn credentials() -> Result<Arc<AdcTokenProvider>> {
    let tokens = app_default_credentials()
        .await
        .map_err(|e| PastureError::Auth(e.to_string()))?;
    info!(source = ?tokens.source(), "Application default credentials verified");
    Ok(Arc::new(tokens))
}

async fn cmd_pasture(
    settings: &Settings,
    mode: Mode,
    flags: RunFlags,
    pasture: PastureCommand,
    verbose: bool,
    json: bool,
) -> Result<()> {
    let (template, options) = match pasture {
        PastureCommand::DataCloud(args) => (SeedTemplate::DataCloud, args.seed_options()),
    };

    if !is_terraform_available(&settings.terraform).await {
        bail!("Terraform binary not found or not runnable: {}", settings.terraform);
    }
    let tokens = credentials().await?;

    let hydrated = hydrate(settings).map_err(rehydrate_hint)?;

    let mut pipeline = Pipeline::build(settings, &hydrated, template, mode, flags, options)
        .with_context(|| format!("Failed to prepare {} pasture", template))?;
    let engine = TerraformCli::new(&settings.terraform, verbose);
    let store = GcsObjectStore::new(tokens)?;

    let report = pipeline.run(&engine, &store).await?;
    print_report(&report, json)
}

/// Point the user at `plow --rehydrate` when the var file is unreadable.
fn rehydrate_hint(err: PastureError) -> anyhow::Error {
    if err.is_config_parse() {
        anyhow::Error::new(err)
            .context("Unable to read var file. Try running `pasture plow --rehydrate`")
    } else {
        err.into()
    }
}

fn print_report(report: &PipelineReport, json: bool) -> Result<()> {
    if json {
        let stages: Vec<Value> = report
            .stages
            .iter()
            .map(|s| {
                json!({
                    "stage": s.stage,
                    "outcome": format!("{:?}", s.outcome),
                    "first_run": s.first_run,
                })
            })
            .collect();
        let summary = json!({
            "mode": report.mode.as_str(),
            "stages": stages,
            "dry_run_verified": report.dry_run_verified,
            "project_id": report.project_id,
            "console_url": report.console_url(),
        });
        println!("{}", serde_json::to_string(&summary)?);
        return Ok(());
    }

    if report.dry_run_verified {
        println!("Foundation can be applied to GCP organization");
    }
    if let Some(url) = report.console_url() {
        println!("Access your seed project: {}", url);
    }
    Ok(())
}

async fn cmd_plow(settings: &Settings, args: &PlowArgs) -> Result<()> {
    write_var_file(settings, args)?;

    if args.skip_iam {
        info!("Skipping organization IAM changes");
        return Ok(());
    }

    let tokens = credentials().await?;
    let iam = IamClient::new(tokens)?;
    set_required_org_iam_roles(&iam, &args.organization(), &args.group, REQUIRED_ORG_ROLES)
        .await
        .with_context(|| format!("Failed to grant organization roles to {}", args.group))?;

    println!(
        "Granted {} organization roles to {}",
        REQUIRED_ORG_ROLES.len(),
        args.organization().group_principal(&args.group)
    );
    Ok(())
}

fn write_var_file(settings: &Settings, args: &PlowArgs) -> Result<VarFile> {
    FastConfig::validate_prefix(&args.prefix).map_err(|reason| anyhow!(reason))?;

    let path = settings.var_file_path();
    if path.exists() && !args.rehydrate {
        bail!(
            "Var file {} already exists; pass --rehydrate to overwrite it",
            path.display()
        );
    }

    let var_file = VarFile::create(&path, args.var_file_body()?)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), "Var file written");
    Ok(var_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> std::result::Result<Cli, clap::Error> {
        Cli::try_parse_from(args)
    }

    fn settings(root: &std::path::Path) -> Settings {
        Settings::load_with(None, Some(root.to_path_buf()), |_| None).unwrap()
    }

    fn plow_args(rehydrate: bool) -> PlowArgs {
        PlowArgs {
            prefix: "pst".to_string(),
            org_id: 1234567890,
            domain: "example.com".to_string(),
            billing_account: "012345-6789AB-CDEF01".to_string(),
            customer_id: Some("C0abc123".to_string()),
            group: "gcp-organization-admins".to_string(),
            rehydrate,
            skip_iam: true,
        }
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_plant_data_cloud() {
        let cli = parse(&[
            "pasture",
            "plant",
            "data-cloud",
            "-s",
            "big",
            "--data-warehouse",
            "--genai-rag",
            "--dry-run",
        ])
        .unwrap();

        assert!(cli.dry_run);
        assert!(!cli.skip_foundation);
        let Commands::Plant {
            pasture: PastureCommand::DataCloud(args),
        } = cli.command
        else {
            panic!("expected plant data-cloud");
        };
        let options = args.seed_options();
        assert_eq!(options.region, "us-central1");
        assert_eq!(options.size, PastureSize::Big);
        assert!(options.jumpstarts.data_warehouse && options.jumpstarts.genai_rag);
        assert!(!options.jumpstarts.knowledge_base);
    }

    #[test]
    fn test_burn_with_region() {
        let cli = parse(&[
            "pasture",
            "--skip-foundation",
            "burn",
            "data-cloud",
            "--region",
            "europe-west1",
            "--pasture-size",
            "small",
            "--analytics-lakehouse",
        ])
        .unwrap();

        assert!(cli.skip_foundation);
        let Commands::Burn {
            pasture: PastureCommand::DataCloud(args),
        } = cli.command
        else {
            panic!("expected burn data-cloud");
        };
        assert_eq!(args.region, "europe-west1");
        assert_eq!(args.pasture_size, PastureSize::Small);
    }

    #[test]
    fn test_missing_pasture_size_is_rejected() {
        let err = parse(&["pasture", "plant", "data-cloud", "--knowledge-base"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
        assert_eq!(parse_exit_code(&err), 1);
    }

    #[test]
    fn test_missing_jumpstart_is_rejected() {
        let err = parse(&["pasture", "plant", "data-cloud", "-s", "small"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
        assert_eq!(parse_exit_code(&err), 1);
    }

    #[test]
    fn test_invalid_size_is_rejected() {
        let err = parse(&["pasture", "plant", "data-cloud", "-s", "medium", "--genai-rag"])
            .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
        assert!(err.to_string().contains("medium"));
        assert_eq!(parse_exit_code(&err), 1);
    }

    #[test]
    fn test_unreadable_var_file_suggests_rehydrate() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings(root.path());
        std::fs::create_dir_all(&settings.config_dir).unwrap();
        std::fs::write(settings.var_file_path(), r#"{"organization": {}}"#).unwrap();

        let err = rehydrate_hint(hydrate(&settings).unwrap_err());
        let message = format!("{err:#}");
        assert!(message.contains("pasture plow --rehydrate"));
        assert!(message.contains("missing field `prefix`"));
    }

    #[test]
    fn test_other_errors_have_no_rehydrate_hint() {
        let err = rehydrate_hint(PastureError::InvalidPipeline("duplicate order".to_string()));
        assert!(!format!("{err:#}").contains("--rehydrate"));
    }

    #[test]
    fn test_help_exits_zero() {
        let err = parse(&["pasture", "--help"]).unwrap_err();
        assert_eq!(parse_exit_code(&err), 0);
    }

    #[test]
    fn test_plow_defaults() {
        let cli = parse(&[
            "pasture",
            "plow",
            "--prefix",
            "pst",
            "--org-id",
            "1234567890",
            "--domain",
            "example.com",
            "--billing-account",
            "012345-6789AB-CDEF01",
        ])
        .unwrap();
        let Commands::Plow(args) = cli.command else {
            panic!("expected plow");
        };
        assert_eq!(args.group, "gcp-organization-admins");
        assert!(!args.rehydrate && !args.skip_iam);
        assert!(args.customer_id.is_none());
    }

    #[test]
    fn test_write_var_file_hydrates() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings(root.path());
        let args = plow_args(false);

        write_var_file(&settings, &args).unwrap();

        let hydrated = hydrate(&settings).unwrap();
        assert_eq!(hydrated.prefix, "pst");
        let config = hydrated.var_file.config().unwrap();
        assert_eq!(config.organization.as_ref().unwrap(), &args.organization());
        assert_eq!(config.billing_account.as_ref().unwrap().id, "012345-6789AB-CDEF01");
    }

    #[test]
    fn test_write_var_file_refuses_overwrite() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings(root.path());
        write_var_file(&settings, &plow_args(false)).unwrap();

        let err = write_var_file(&settings, &plow_args(false)).unwrap_err();
        assert!(format!("{err:#}").contains("--rehydrate"));
        assert!(write_var_file(&settings, &plow_args(true)).is_ok());
    }

    #[test]
    fn test_write_var_file_rejects_bad_prefix() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings(root.path());
        let args = PlowArgs {
            prefix: "Not-Valid-Prefix".to_string(),
            ..plow_args(false)
        };
        assert!(write_var_file(&settings, &args).is_err());
        assert!(!settings.var_file_path().exists());
    }

    #[tokio::test]
    async fn test_plow_skip_iam_writes_file_only() {
        let root = tempfile::tempdir().unwrap();
        let settings = settings(root.path());
        cmd_plow(&settings, &plow_args(false)).await.unwrap();
        assert!(settings.var_file_path().exists());
    }
}
