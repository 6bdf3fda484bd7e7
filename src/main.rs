// src/main.rs
use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod allocation_form;
mod allocation_reconciler;
mod employee_search;
mod session;
mod staffing_client;


use allocation_form::{FormError, FormSession};
use allocation_reconciler::{
    AllocationId, AllocationRecord, ApproverId, BillingType, ClientId, EmployeeId, ProjectId,
};
use employee_search::EmployeeSearch;
use session::{clear_session, require_session, save_session, Role, UserSession};
use staffing_client::{
    AllocationFilter, ClientConfig, DateWindow, FormVariant, StaffingBackend, StaffingClient,
};

// --- CLI Definition ---

#[derive(Parser, Debug)]
#[command(
    name = "staffing-core",
    about = "Validates and submits employee project allocations against the staffing backend"
)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Start a session as the given user and role.
    Login {
        #[arg(long)]
        user: String,
        /// Dashboard role: leader (read-only) or bizops.
        #[arg(long)]
        role: Role,
    },
    /// End the current session.
    Logout,
    /// Print an employee's remaining allocation.
    Remaining {
        #[arg(long)]
        employee: EmployeeId,
        /// Scope the figure to allocations touching this window.
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long, requires = "start")]
        end: Option<NaiveDate>,
    },
    /// List an employee's allocations.
    Allocations {
        #[arg(long)]
        employee: EmployeeId,
        #[arg(long, value_enum, default_value = "current")]
        filter: FilterArg,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long, requires = "start")]
        end: Option<NaiveDate>,
    },
    /// Run an allocation through every rule without submitting it.
    Check {
        #[arg(long)]
        employee: EmployeeId,
        /// Validate as an edit of this existing allocation.
        #[arg(long)]
        edit: Option<AllocationId>,
        #[command(flatten)]
        form: FormArgs,
    },
    /// Create an allocation (bizops only).
    Allocate {
        #[arg(long)]
        employee: EmployeeId,
        /// Submit through the project-modal route instead of the
        /// employee-modal one.
        #[arg(long)]
        project_modal: bool,
        #[command(flatten)]
        form: FormArgs,
    },
    /// Edit an existing allocation (bizops only).
    Reallocate {
        #[arg(long)]
        employee: EmployeeId,
        #[arg(long)]
        id: AllocationId,
        /// Mark the allocation closed, after applying the other fields.
        #[arg(long)]
        close: bool,
        #[command(flatten)]
        form: FormArgs,
    },
    /// Search employees by name.
    Search {
        #[arg(long)]
        query: String,
    },
    /// Print the dropdown reference data.
    Refdata,
}

/// Form fields shared by check, allocate and reallocate. Anything left
/// out stays as the form already has it (prefilled values when editing).
#[derive(Args, Debug, Clone)]
struct FormArgs {
    #[arg(long)]
    client: Option<ClientId>,
    #[arg(long)]
    project: Option<ProjectId>,
    /// One of 0, 25, 50, 75 or 100.
    #[arg(long)]
    percent: Option<u8>,
    #[arg(long)]
    start_date: Option<NaiveDate>,
    #[arg(long)]
    end_date: Option<NaiveDate>,
    #[arg(long, value_enum)]
    billing_type: Option<BillingTypeArg>,
    #[arg(long)]
    billed: Option<bool>,
    /// Hourly rate; required (and positive) when billed.
    #[arg(long)]
    billing_rate: Option<String>,
    /// Time-sheet approver; defaults to the project manager if unset.
    #[arg(long)]
    approver: Option<ApproverId>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum BillingTypeArg {
    /// Time and materials.
    Tm,
    /// Fixed price.
    FixPrice,
}

impl BillingTypeArg {
    fn as_domain(self) -> BillingType {
        match self {
            BillingTypeArg::Tm => BillingType::TimeAndMaterials,
            BillingTypeArg::FixPrice => BillingType::FixPrice,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum FilterArg {
    Current,
    All,
}

impl FilterArg {
    fn as_domain(self) -> AllocationFilter {
        match self {
            FilterArg::Current => AllocationFilter::Current,
            FilterArg::All => AllocationFilter::All,
        }
    }
}

// --- Entry Point ---

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Setting tracing subscriber failed")?;

    let cli = Cli::parse();
    let config = ClientConfig::from_env()
        .context("Loading STAFFING_* configuration from the environment failed")?;
    info!("Configuration loaded (base URL {}).", config.base_url);

    run(cli.command, config).await
}

async fn run(command: CliCommand, config: ClientConfig) -> Result<()> {
    let session_path = PathBuf::from(&config.session_file);

    match command {
        CliCommand::Login { user, role } => {
            let user_session = UserSession::new(&user, role)?;
            save_session(&session_path, &user_session)?;
            println!(
                "Logged in as {} ({}).",
                user_session.user_name, user_session.role
            );
            Ok(())
        }
        CliCommand::Logout => {
            if clear_session(&session_path)? {
                println!("Logged out.");
            } else {
                println!("No active session.");
            }
            Ok(())
        }
        CliCommand::Remaining {
            employee,
            start,
            end,
        } => {
            let (_user_session, backend) = connect(&config, &session_path)?;
            let window = start.map(|start| DateWindow { start, end });
            let remaining = backend.remaining_allocation(employee, window).await?;
            println!(
                "Remaining allocation for employee {}: {}%",
                employee, remaining
            );
            Ok(())
        }
        CliCommand::Allocations {
            employee,
            filter,
            start,
            end,
        } => {
            let (_user_session, backend) = connect(&config, &session_path)?;
            let window = start.map(|start| DateWindow { start, end });
            let listing = backend
                .employee_allocations(employee, Some(filter.as_domain()), window)
                .await?;
            if listing.allocations.is_empty() {
                println!("No allocations found for employee {}.", employee);
            }
            for allocation in &listing.allocations {
                println!("{}", describe_allocation(allocation));
            }
            if let Some(current) = listing.current_allocation {
                println!("Currently allocated: {}%", current);
            }
            Ok(())
        }
        CliCommand::Check {
            employee,
            edit,
            form,
        } => {
            let (user_session, backend) = connect(&config, &session_path)?;
            let form_session = open_form(
                &backend,
                &user_session,
                FormVariant::EmployeeModal,
                employee,
                edit,
                &form,
            )
            .await?;
            match form_session.dry_run().await {
                Ok(command) => {
                    println!("Allocation passes every rule. It would send:");
                    println!("{}", serde_json::to_string_pretty(&command)?);
                }
                Err(error @ (FormError::Validation(_) | FormError::Conflict(_))) => {
                    println!("Allocation rejected: {}", error);
                }
                Err(other) => return Err(other.into()),
            }
            Ok(())
        }
        CliCommand::Allocate {
            employee,
            project_modal,
            form,
        } => {
            let (user_session, backend) = connect(&config, &session_path)?;
            user_session.require_modify_rights()?;
            let variant = if project_modal {
                FormVariant::ProjectModal
            } else {
                FormVariant::EmployeeModal
            };
            let form_session =
                open_form(&backend, &user_session, variant, employee, None, &form).await?;
            submit_form(&form_session).await
        }
        CliCommand::Reallocate {
            employee,
            id,
            close,
            form,
        } => {
            let (user_session, backend) = connect(&config, &session_path)?;
            user_session.require_modify_rights()?;
            let form_session = open_form(
                &backend,
                &user_session,
                FormVariant::EmployeeModal,
                employee,
                Some(id),
                &form,
            )
            .await?;
            if close {
                form_session.mark_closed().await;
            }
            submit_form(&form_session).await
        }
        CliCommand::Search { query } => {
            let (_user_session, backend) = connect(&config, &session_path)?;
            let search =
                EmployeeSearch::new(backend, Duration::from_millis(config.search_debounce_ms));
            match search.submit_input(&query).await? {
                Some(results) => {
                    if results.employees.is_empty() {
                        println!("No employees match {:?}.", results.query);
                    }
                    for employee in &results.employees {
                        println!("{:>6}  {}", employee.id, employee.name);
                    }
                }
                None => println!("Input superseded before the quiet period ended."),
            }
            Ok(())
        }
        CliCommand::Refdata => {
            let (_user_session, backend) = connect(&config, &session_path)?;
            let data = backend.modal_data().await?;
            println!("Clients:");
            for client in &data.clients {
                println!("{:>6}  {}", client.id, client.name);
            }
            println!("Projects:");
            for project in &data.projects {
                let manager = project
                    .project_manager
                    .map(|id| format!("manager {}", id))
                    .unwrap_or_else(|| "no manager".to_string());
                println!(
                    "{:>6}  {} (client {}, {})",
                    project.id, project.name, project.client_id, manager
                );
            }
            println!("Employees:");
            for employee in &data.employees {
                println!("{:>6}  {}", employee.id, employee.name);
            }
            println!("Time-sheet approvers:");
            for approver in &data.time_sheet_approvers {
                println!("{:>6}  {}", approver.id, approver.name);
            }
            Ok(())
        }
    }
}

// --- Command Helpers ---

fn connect(
    config: &ClientConfig,
    session_path: &Path,
) -> Result<(UserSession, Arc<dyn StaffingBackend>)> {
    let user_session = require_session(session_path)?;
    info!(
        "Acting as {} ({}).",
        user_session.user_name, user_session.role
    );
    let backend: Arc<dyn StaffingBackend> = Arc::new(StaffingClient::new(config.clone())?);
    Ok((user_session, backend))
}

async fn open_form(
    backend: &Arc<dyn StaffingBackend>,
    user_session: &UserSession,
    variant: FormVariant,
    employee: EmployeeId,
    edit: Option<AllocationId>,
    args: &FormArgs,
) -> Result<FormSession> {
    let form_session = FormSession::new(backend.clone(), variant, &user_session.user_name);
    match edit {
        Some(id) => {
            let record = find_allocation(backend, employee, id).await?;
            form_session.open_edit(record).await?;
        }
        None => form_session.open_create(Some(employee)).await?,
    }
    apply_form_args(&form_session, args).await?;
    Ok(form_session)
}

/// The contract has no single-allocation read, so edits locate their
/// record through the employee's listing, the way the dashboard hands
/// the row to its modal.
async fn find_allocation(
    backend: &Arc<dyn StaffingBackend>,
    employee: EmployeeId,
    id: AllocationId,
) -> Result<AllocationRecord> {
    let listing = backend
        .employee_allocations(employee, Some(AllocationFilter::All), None)
        .await?;
    listing
        .allocations
        .into_iter()
        .find(|allocation| allocation.id == id)
        .ok_or_else(|| anyhow!("Allocation {} not found for employee {}", id, employee))
}

async fn apply_form_args(form_session: &FormSession, args: &FormArgs) -> Result<(), FormError> {
    if let Some(client) = args.client {
        form_session.set_client(Some(client)).await;
    }
    if let Some(project) = args.project {
        form_session.set_project(Some(project)).await;
    }
    if let Some(percent) = args.percent {
        form_session.set_percent(Some(percent)).await;
    }
    if let Some(start_date) = args.start_date {
        form_session.set_start_date(Some(start_date)).await?;
    }
    if let Some(end_date) = args.end_date {
        form_session.set_end_date(Some(end_date)).await?;
    }
    if let Some(billing_type) = args.billing_type {
        form_session
            .set_billing_type(Some(billing_type.as_domain()))
            .await;
    }
    if let Some(billed) = args.billed {
        form_session.set_billed(Some(billed)).await;
    }
    if let Some(rate) = &args.billing_rate {
        form_session.set_billing_rate(rate).await;
    }
    if let Some(approver) = args.approver {
        form_session.set_approver(Some(approver)).await;
    }
    Ok(())
}

async fn submit_form(form_session: &FormSession) -> Result<()> {
    match form_session.submit().await {
        Ok(()) => {
            println!("Allocation submitted.");
            Ok(())
        }
        Err(
            error @ (FormError::Validation(_)
            | FormError::Conflict(_)
            | FormError::ServerRejected { .. }),
        ) => {
            bail!("Allocation rejected: {}", error)
        }
        Err(other) => Err(other.into()),
    }
}

fn describe_allocation(record: &AllocationRecord) -> String {
    let end = record
        .end_date
        .map(|date| date.to_string())
        .unwrap_or_else(|| "open".to_string());
    let billing = if record.billed {
        match record.billing_rate {
            Some(rate) => format!("billed at {}", rate),
            None => "billed".to_string(),
        }
    } else {
        "unbilled".to_string()
    };
    format!(
        "#{} client {} project {} {:>3}% {} {} to {} ({})",
        record.id,
        record.client_id,
        record.project_id,
        record.percent,
        record.status,
        record.start_date,
        end,
        billing
    )
}
