// src/allocation_form.rs
//
// The form-session engine behind both allocation modals. One instance
// drives one open modal: it holds the form state, keeps the fetched
// snapshot (remaining capacity and the employee's allocations) current as
// tracked fields change, guards against stale fetch results, and runs the
// submit pipeline against fresh server reads.

use rust_decimal::prelude::*;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::allocation_reconciler::{
    self, derive_status, ranges_overlap, AllocationForm, AllocationId, AllocationRecord,
    AllocationRejection, AllocationStatus, ApproverId, BillingType, ClientId, EditTarget,
    EmployeeId, ProjectId, ValidationContext,
};
use crate::staffing_client::{
    AllocationCommand, AllocationFilter, DateWindow, EmployeeAllocations, EmployeeRef,
    FormVariant, ModalData, StaffingApiError, StaffingBackend,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;

// --- Error Types ---

/// What the form surfaces to the user. Exactly one reason per failed
/// submit; the first failure wins.
#[derive(Error, Debug)]
pub enum FormError {
    /// A field-level rule failed (rules 1 through 3).
    #[error("{0}")]
    Validation(AllocationRejection),

    /// The allocation clashes with existing data (overlap or ceiling).
    #[error("{0}")]
    Conflict(AllocationRejection),

    /// The server refused the submit; its verdict overrides a local pass.
    #[error("The server rejected the allocation: {message}")]
    ServerRejected { message: String },

    /// A required fetch or the submit transport failed.
    #[error("Request failed: {0}")]
    Network(StaffingApiError),
}

impl FormError {
    fn from_rejection(rejection: AllocationRejection) -> Self {
        if rejection.is_conflict() {
            FormError::Conflict(rejection)
        } else {
            FormError::Validation(rejection)
        }
    }

    // Submit-time API mapping: a 4xx is the server's business-rule
    // verdict, everything else is a transport problem.
    fn from_submit_error(error: StaffingApiError) -> Self {
        match error {
            StaffingApiError::Api { status, message } if status.is_client_error() => {
                FormError::ServerRejected { message }
            }
            other => FormError::Network(other),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            FormError::Conflict(_) | FormError::ServerRejected { .. }
        )
    }
}

// --- Core Data Structures ---

/// Whether the open modal creates a new allocation or edits an existing
/// one. Editing remembers the original percent so capacity math can net
/// it out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    Create,
    Edit { target: EditTarget },
}

impl FormMode {
    fn edit_target(&self) -> Option<EditTarget> {
        match self {
            FormMode::Create => None,
            FormMode::Edit { target } => Some(*target),
        }
    }
}

/// The fetched state the open form works against.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub remaining: Option<u8>,
    pub allocations: Vec<AllocationRecord>,
}

/// Identity of one snapshot fetch, captured when it starts. A result is
/// applied only while the epoch and the target it was fetched for are
/// still current; anything else arrives late and is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotRequest {
    epoch: u64,
    employee_id: EmployeeId,
    editing_id: Option<AllocationId>,
    window: Option<DateWindow>,
}

/// What a snapshot fetch produced.
#[derive(Debug, Clone)]
pub struct SnapshotData {
    pub remaining: u8,
    pub allocations: EmployeeAllocations,
}

#[derive(Debug, Default)]
struct SessionState {
    fetch_epoch: u64,
    mode: Option<FormMode>,
    employee_id: Option<EmployeeId>,
    form: AllocationForm,
    snapshot: Snapshot,
    reference: ModalData,
}

impl SessionState {
    fn window(&self) -> Option<DateWindow> {
        self.form.start_date.map(|start| DateWindow {
            start,
            end: self.form.end_date,
        })
    }

    fn rederive_status(&mut self) {
        // Manual `Closed` lives only until the next driving-field change.
        self.form.status =
            derive_status(self.form.client_id, self.form.project_id, self.form.percent);
    }

    fn reset(&mut self) {
        self.mode = None;
        self.employee_id = None;
        self.form = AllocationForm::default();
        self.snapshot = Snapshot::default();
        self.reference = ModalData::default();
    }
}

// --- Mock Backend ---

/// In-memory stand-in for the staffing backend. Remaining capacity and
/// listings are computed from the stored allocations the same way the
/// server computes them, so submit-time rules behave as in production.
#[derive(Clone)]
pub struct MockStaffingBackend {
    state: Arc<StdMutex<MockBackendState>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOperation {
    Create(FormVariant),
    Update(AllocationId),
}

#[derive(Debug, Clone)]
pub struct SubmittedCommand {
    pub operation: SubmitOperation,
    pub command: AllocationCommand,
}

#[derive(Default)]
struct MockBackendState {
    allocations: Vec<AllocationRecord>,
    modal_data: ModalData,
    next_id: AllocationId,
    submissions: Vec<SubmittedCommand>,
    search_queries: Vec<String>,
    search_delay_ms: u64,
    reject_next_submit: Option<(u16, String)>,
    fail_reads: bool,
    fail_modal_data: bool,
    fail_search: bool,
}

impl Default for MockStaffingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStaffingBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(StdMutex::new(MockBackendState {
                next_id: 1,
                ..MockBackendState::default()
            })),
        }
    }

    pub fn add_allocation(&self, record: AllocationRecord) {
        let mut state = self.state.lock().unwrap();
        state.next_id = state.next_id.max(record.id + 1);
        state.allocations.push(record);
    }

    pub fn set_modal_data(&self, modal_data: ModalData) {
        self.state.lock().unwrap().modal_data = modal_data;
    }

    pub fn allocations(&self) -> Vec<AllocationRecord> {
        self.state.lock().unwrap().allocations.clone()
    }

    pub fn allocation(&self, id: AllocationId) -> Option<AllocationRecord> {
        self.state
            .lock()
            .unwrap()
            .allocations
            .iter()
            .find(|a| a.id == id)
            .cloned()
    }

    /// Makes the next create/update fail with the given status and
    /// message, as the server would when a business rule trips there.
    pub fn reject_next_submit(&self, status: u16, message: &str) {
        self.state.lock().unwrap().reject_next_submit = Some((status, message.to_string()));
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.state.lock().unwrap().fail_reads = fail;
    }

    pub fn set_fail_modal_data(&self, fail: bool) {
        self.state.lock().unwrap().fail_modal_data = fail;
    }

    pub fn set_fail_search(&self, fail: bool) {
        self.state.lock().unwrap().fail_search = fail;
    }

    /// Delays each search response, for exercising out-of-order
    /// completion.
    pub fn set_search_delay_ms(&self, delay_ms: u64) {
        self.state.lock().unwrap().search_delay_ms = delay_ms;
    }

    pub fn search_queries(&self) -> Vec<String> {
        self.state.lock().unwrap().search_queries.clone()
    }

    pub fn submissions(&self) -> Vec<SubmittedCommand> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn last_submission(&self) -> Option<SubmittedCommand> {
        self.state.lock().unwrap().submissions.last().cloned()
    }

    pub fn expect_submission_count(&self, expected: usize) {
        let submissions = self.submissions();
        assert_eq!(
            submissions.len(),
            expected,
            "Expected {} submissions, found {:?}",
            expected,
            submissions
        );
    }

    fn simulated_failure(context: &str) -> StaffingApiError {
        StaffingApiError::Api {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("Simulated {} failure", context),
        }
    }

    // Counts non-closed allocations, optionally only those touching the
    // window, mirroring the server's remaining computation.
    fn allocated_percent(
        state: &MockBackendState,
        employee_id: EmployeeId,
        window: Option<DateWindow>,
    ) -> u16 {
        state
            .allocations
            .iter()
            .filter(|a| a.employee_id == employee_id && a.status != AllocationStatus::Closed)
            .filter(|a| match window {
                Some(window) => {
                    ranges_overlap(window.start, window.end, a.start_date, a.end_date)
                }
                None => true,
            })
            .map(|a| a.percent as u16)
            .sum()
    }

    fn record_from_command(id: AllocationId, command: &AllocationCommand) -> AllocationRecord {
        AllocationRecord {
            id,
            employee_id: command.employee_id,
            client_id: command.client_id,
            project_id: command.project_id,
            percent: command.percent,
            status: command.status,
            start_date: command.start_date,
            end_date: command.end_date,
            billing_type: command.billing_type,
            billed: command.billed_check == "Yes",
            billing_rate: command.billing_rate.and_then(Decimal::from_f64),
            time_sheet_approver: command.time_sheet_approver,
            modified_by: command.modified_by.clone(),
            modified_at: None,
        }
    }

    fn take_submit_rejection(state: &mut MockBackendState) -> Option<StaffingApiError> {
        state.reject_next_submit.take().map(|(code, message)| {
            let status =
                StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            StaffingApiError::Api { status, message }
        })
    }
}

#[async_trait]
impl StaffingBackend for MockStaffingBackend {
    async fn remaining_allocation(
        &self,
        employee_id: EmployeeId,
        window: Option<DateWindow>,
    ) -> Result<u8, StaffingApiError> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(Self::simulated_failure("remaining allocation"));
        }
        let allocated = Self::allocated_percent(&state, employee_id, window);
        Ok(100u16.saturating_sub(allocated).min(100) as u8)
    }

    async fn employee_allocations(
        &self,
        employee_id: EmployeeId,
        filter: Option<AllocationFilter>,
        window: Option<DateWindow>,
    ) -> Result<EmployeeAllocations, StaffingApiError> {
        let state = self.state.lock().unwrap();
        if state.fail_reads {
            return Err(Self::simulated_failure("employee allocations"));
        }
        let allocations: Vec<AllocationRecord> = state
            .allocations
            .iter()
            .filter(|a| a.employee_id == employee_id)
            .filter(|a| match filter {
                Some(AllocationFilter::Current) => a.status != AllocationStatus::Closed,
                _ => true,
            })
            .filter(|a| match window {
                Some(window) => {
                    ranges_overlap(window.start, window.end, a.start_date, a.end_date)
                }
                None => true,
            })
            .cloned()
            .collect();
        let current_allocation = Some(
            Self::allocated_percent(&state, employee_id, None)
                .min(u8::MAX as u16) as u8,
        );
        Ok(EmployeeAllocations {
            allocations,
            current_allocation,
        })
    }

    async fn create_allocation(
        &self,
        variant: FormVariant,
        command: &AllocationCommand,
    ) -> Result<(), StaffingApiError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = Self::take_submit_rejection(&mut state) {
            return Err(error);
        }
        let id = state.next_id;
        state.next_id += 1;
        let record = Self::record_from_command(id, command);
        state.allocations.push(record);
        state.submissions.push(SubmittedCommand {
            operation: SubmitOperation::Create(variant),
            command: command.clone(),
        });
        debug!("Mock stored allocation {} via {:?}", id, variant);
        Ok(())
    }

    async fn update_allocation(
        &self,
        allocation_id: AllocationId,
        command: &AllocationCommand,
    ) -> Result<(), StaffingApiError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = Self::take_submit_rejection(&mut state) {
            return Err(error);
        }
        let position = match state
            .allocations
            .iter()
            .position(|a| a.id == allocation_id)
        {
            Some(position) => position,
            None => {
                return Err(StaffingApiError::Api {
                    status: StatusCode::NOT_FOUND,
                    message: format!("Allocation {} not found", allocation_id),
                })
            }
        };
        state.allocations[position] = Self::record_from_command(allocation_id, command);
        state.submissions.push(SubmittedCommand {
            operation: SubmitOperation::Update(allocation_id),
            command: command.clone(),
        });
        debug!("Mock replaced allocation {}", allocation_id);
        Ok(())
    }

    async fn modal_data(&self) -> Result<ModalData, StaffingApiError> {
        let state = self.state.lock().unwrap();
        if state.fail_modal_data {
            return Err(Self::simulated_failure("modal data"));
        }
        Ok(state.modal_data.clone())
    }

    async fn search_employees(&self, query: &str) -> Result<Vec<EmployeeRef>, StaffingApiError> {
        // The guard must not live across the sleep, so the outcome is
        // decided first and the delay applied after; a configured
        // failure also waits out the delay.
        let (delay_ms, outcome) = {
            let mut state = self.state.lock().unwrap();
            if state.fail_search {
                (state.search_delay_ms, None)
            } else {
                state.search_queries.push(query.to_string());
                let needle = query.to_lowercase();
                let matches: Vec<EmployeeRef> = state
                    .modal_data
                    .employees
                    .iter()
                    .filter(|e| e.name.to_lowercase().contains(&needle))
                    .cloned()
                    .collect();
                (state.search_delay_ms, Some(matches))
            }
        };
        if delay_ms > 0 {
            sleep(Duration::from_millis(delay_ms)).await;
        }
        match outcome {
            Some(matches) => Ok(matches),
            None => Err(Self::simulated_failure("employee search")),
        }
    }
}

// --- Form Session ---

#[derive(Clone)]
pub struct FormSession {
    backend: Arc<dyn StaffingBackend>,
    variant: FormVariant,
    modified_by: String,
    state: Arc<Mutex<SessionState>>,
}

impl FormSession {
    pub fn new(backend: Arc<dyn StaffingBackend>, variant: FormVariant, modified_by: &str) -> Self {
        Self {
            backend,
            variant,
            modified_by: modified_by.to_string(),
            state: Arc::new(Mutex::new(SessionState::default())),
        }
    }

    pub fn variant(&self) -> FormVariant {
        self.variant
    }

    // --- Lifecycle ---

    /// Opens the modal for a new allocation. The employee is preset in
    /// the employee-modal flow and picked later (via search) in the
    /// project-modal flow.
    pub async fn open_create(&self, employee_id: Option<EmployeeId>) -> Result<(), FormError> {
        {
            let mut state = self.state.lock().await;
            state.fetch_epoch += 1;
            state.reset();
            state.mode = Some(FormMode::Create);
            state.employee_id = employee_id;
        }
        self.load_reference_data().await;
        self.refresh_snapshot().await?;
        info!("Opened allocation form (create) for employee {:?}", employee_id);
        Ok(())
    }

    /// Opens the modal prefilled from an existing allocation.
    pub async fn open_edit(&self, record: AllocationRecord) -> Result<(), FormError> {
        {
            let mut state = self.state.lock().await;
            state.fetch_epoch += 1;
            state.reset();
            state.mode = Some(FormMode::Edit {
                target: EditTarget {
                    allocation_id: record.id,
                    original_percent: record.percent,
                },
            });
            state.employee_id = Some(record.employee_id);
            state.form = AllocationForm {
                client_id: Some(record.client_id),
                project_id: Some(record.project_id),
                status: Some(record.status),
                percent: Some(record.percent),
                start_date: Some(record.start_date),
                end_date: record.end_date,
                billing_type: Some(record.billing_type),
                billed: Some(record.billed),
                billing_rate: record
                    .billing_rate
                    .map(|rate| rate.to_string())
                    .unwrap_or_default(),
                time_sheet_approver: Some(record.time_sheet_approver),
            };
        }
        self.load_reference_data().await;
        self.refresh_snapshot().await?;
        info!("Opened allocation form (edit) for allocation {}", record.id);
        Ok(())
    }

    /// Closes the modal. Bumps the fetch epoch so anything still in
    /// flight lands in the void, then clears all transient state.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.fetch_epoch += 1;
        state.reset();
        debug!("Allocation form closed");
    }

    pub async fn is_open(&self) -> bool {
        self.state.lock().await.mode.is_some()
    }

    // Reference lists are display data; a failure degrades to empty
    // lists instead of blocking the form.
    async fn load_reference_data(&self) {
        match self.backend.modal_data().await {
            Ok(modal_data) => {
                let mut state = self.state.lock().await;
                state.reference = modal_data;
            }
            Err(e) => {
                warn!("Reference data fetch failed, continuing with empty lists: {}", e);
            }
        }
    }

    // --- Tracked Fields (snapshot refetch) ---

    /// Changes the target employee (project-modal flow). Invalidates any
    /// in-flight snapshot and fetches a new one.
    pub async fn set_employee(&self, employee_id: EmployeeId) -> Result<(), FormError> {
        {
            let mut state = self.state.lock().await;
            state.fetch_epoch += 1;
            state.employee_id = Some(employee_id);
            state.snapshot = Snapshot::default();
        }
        self.refresh_snapshot().await?;
        Ok(())
    }

    pub async fn set_start_date(&self, start_date: Option<NaiveDate>) -> Result<(), FormError> {
        {
            let mut state = self.state.lock().await;
            state.fetch_epoch += 1;
            state.form.start_date = start_date;
        }
        self.refresh_snapshot().await?;
        Ok(())
    }

    pub async fn set_end_date(&self, end_date: Option<NaiveDate>) -> Result<(), FormError> {
        {
            let mut state = self.state.lock().await;
            state.fetch_epoch += 1;
            state.form.end_date = end_date;
        }
        self.refresh_snapshot().await?;
        Ok(())
    }

    // --- Status-Driving Fields ---

    pub async fn set_client(&self, client_id: Option<ClientId>) {
        let mut state = self.state.lock().await;
        state.form.client_id = client_id;
        state.rederive_status();
    }

    /// Sets the project and re-derives the status. When the project
    /// carries a manager and no approver has been picked yet, the manager
    /// becomes the default time-sheet approver.
    pub async fn set_project(&self, project_id: Option<ProjectId>) {
        let mut state = self.state.lock().await;
        state.form.project_id = project_id;
        if let Some(project_id) = project_id {
            if state.form.time_sheet_approver.is_none() {
                let manager = state
                    .reference
                    .projects
                    .iter()
                    .find(|p| p.id == project_id)
                    .and_then(|p| p.project_manager);
                if manager.is_some() {
                    debug!("Defaulting time-sheet approver to project manager {:?}", manager);
                    state.form.time_sheet_approver = manager;
                }
            }
        }
        state.rederive_status();
    }

    pub async fn set_percent(&self, percent: Option<u8>) {
        let mut state = self.state.lock().await;
        state.form.percent = percent;
        state.rederive_status();
    }

    /// Manually marks the allocation closed. Only offered while editing;
    /// the next client/project/percent change re-derives the status and
    /// discards it.
    pub async fn mark_closed(&self) -> bool {
        let mut state = self.state.lock().await;
        match state.mode {
            Some(FormMode::Edit { .. }) => {
                state.form.status = Some(AllocationStatus::Closed);
                true
            }
            _ => {
                warn!("Ignoring manual close outside the edit flow");
                false
            }
        }
    }

    // --- Plain Fields ---

    pub async fn set_billing_type(&self, billing_type: Option<BillingType>) {
        self.state.lock().await.form.billing_type = billing_type;
    }

    pub async fn set_billed(&self, billed: Option<bool>) {
        self.state.lock().await.form.billed = billed;
    }

    pub async fn set_billing_rate(&self, raw: &str) {
        self.state.lock().await.form.billing_rate = raw.to_string();
    }

    pub async fn set_approver(&self, approver: Option<ApproverId>) {
        self.state.lock().await.form.time_sheet_approver = approver;
    }

    // --- State Access ---

    pub async fn form(&self) -> AllocationForm {
        self.state.lock().await.form.clone()
    }

    pub async fn derived_status(&self) -> Option<AllocationStatus> {
        self.state.lock().await.form.status
    }

    pub async fn reference(&self) -> ModalData {
        self.state.lock().await.reference.clone()
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.state.lock().await.snapshot.clone()
    }

    /// Percent choices that still fit, from the last snapshot. Before the
    /// first snapshot lands every choice is offered; the submit pipeline
    /// re-checks against fresh numbers anyway.
    pub async fn percent_options(&self) -> Vec<u8> {
        let state = self.state.lock().await;
        let fetched = state.snapshot.remaining.unwrap_or(100);
        let original = state
            .mode
            .as_ref()
            .and_then(|mode| mode.edit_target())
            .map(|target| target.original_percent);
        let capacity = allocation_reconciler::compute_remaining(fetched, original, 0);
        allocation_reconciler::selectable_percent_options(capacity)
    }

    // --- Snapshot Refresh ---

    /// Captures the identity of a snapshot fetch. `None` when the form is
    /// closed or no employee is chosen yet.
    pub async fn begin_snapshot_refresh(&self) -> Option<SnapshotRequest> {
        let state = self.state.lock().await;
        let employee_id = state.employee_id?;
        state.mode?;
        Some(SnapshotRequest {
            epoch: state.fetch_epoch,
            employee_id,
            editing_id: state
                .mode
                .as_ref()
                .and_then(|mode| mode.edit_target())
                .map(|target| target.allocation_id),
            window: state.window(),
        })
    }

    /// Performs the two snapshot reads for a captured request.
    pub async fn fetch_snapshot(
        &self,
        request: &SnapshotRequest,
    ) -> Result<SnapshotData, FormError> {
        let remaining = self
            .backend
            .remaining_allocation(request.employee_id, request.window)
            .await
            .map_err(FormError::Network)?;
        let allocations = self
            .backend
            .employee_allocations(request.employee_id, Some(AllocationFilter::Current), None)
            .await
            .map_err(FormError::Network)?;
        Ok(SnapshotData {
            remaining,
            allocations,
        })
    }

    /// Applies a fetched snapshot if its request is still current.
    /// Returns whether it was applied; a stale result is dropped quietly.
    pub async fn apply_snapshot(&self, request: SnapshotRequest, data: SnapshotData) -> bool {
        let mut state = self.state.lock().await;
        let still_current = state.fetch_epoch == request.epoch
            && state.employee_id == Some(request.employee_id)
            && state
                .mode
                .as_ref()
                .and_then(|mode| mode.edit_target())
                .map(|target| target.allocation_id)
                == request.editing_id;
        if !still_current {
            debug!(
                "Discarding stale snapshot (epoch {} vs {}, employee {:?})",
                request.epoch, state.fetch_epoch, state.employee_id
            );
            return false;
        }
        state.snapshot = Snapshot {
            remaining: Some(data.remaining),
            allocations: data.allocations.allocations,
        };
        true
    }

    /// Begin, fetch, apply. Returns whether the result was applied.
    pub async fn refresh_snapshot(&self) -> Result<bool, FormError> {
        let request = match self.begin_snapshot_refresh().await {
            Some(request) => request,
            None => return Ok(false),
        };
        let data = self.fetch_snapshot(&request).await?;
        Ok(self.apply_snapshot(request, data).await)
    }

    // --- Submit Pipeline ---

    /// Runs the full rule pipeline against fresh server reads and builds
    /// the command that a submit would send, without sending it.
    pub async fn dry_run(&self) -> Result<AllocationCommand, FormError> {
        let (form, employee_id, mode, window) = {
            let state = self.state.lock().await;
            let mode = match state.mode {
                Some(mode) => mode,
                None => {
                    return Err(FormError::Validation(AllocationRejection::MissingFields {
                        fields: vec!["form"],
                    }))
                }
            };
            let employee_id = match state.employee_id {
                Some(id) => id,
                None => {
                    return Err(FormError::Validation(AllocationRejection::MissingFields {
                        fields: vec!["employee"],
                    }))
                }
            };
            (state.form.clone(), employee_id, mode, state.window())
        };

        allocation_reconciler::validate_local(&form).map_err(FormError::from_rejection)?;

        // Both reads are fresh; the snapshot held for display is not
        // trusted at submit time.
        let remaining = self
            .backend
            .remaining_allocation(employee_id, window)
            .await
            .map_err(FormError::Network)?;
        let allocations = self
            .backend
            .employee_allocations(employee_id, Some(AllocationFilter::Current), None)
            .await
            .map_err(FormError::Network)?;

        let context = ValidationContext {
            fresh_remaining: remaining,
            allocations: allocations.allocations,
            editing: mode.edit_target(),
        };
        let normalized = allocation_reconciler::validate(&form, &context)
            .map_err(FormError::from_rejection)?;

        Ok(AllocationCommand::from_normalized(
            employee_id,
            &normalized,
            &self.modified_by,
        ))
    }

    /// Validates and submits. Create goes to the route of this session's
    /// modal variant, edit always updates in place.
    pub async fn submit(&self) -> Result<(), FormError> {
        let command = self.dry_run().await?;
        let mode = {
            let state = self.state.lock().await;
            match state.mode {
                Some(mode) => mode,
                None => {
                    return Err(FormError::Validation(AllocationRejection::MissingFields {
                        fields: vec!["form"],
                    }))
                }
            }
        };

        let result = match mode {
            FormMode::Create => {
                self.backend
                    .create_allocation(self.variant, &command)
                    .await
            }
            FormMode::Edit { target } => {
                self.backend
                    .update_allocation(target.allocation_id, &command)
                    .await
            }
        };
        result.map_err(FormError::from_submit_error)?;
        info!(
            "Allocation submitted for employee {} ({} percent)",
            command.employee_id, command.percent
        );
        Ok(())
    }
}

// --- Test Module ---
#[cfg(test)]
mod allocation_form_tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use tokio::runtime::Runtime;

    use crate::staffing_client::{ApproverRef, ClientRef, ProjectRef};

    fn d(date_str: &str) -> NaiveDate {
        NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
            .unwrap_or_else(|_| panic!("Invalid date string format: {}", date_str))
    }

    fn reference_data() -> ModalData {
        ModalData {
            clients: vec![ClientRef {
                id: 10,
                name: "Contoso".to_string(),
            }],
            projects: vec![
                ProjectRef {
                    id: 100,
                    name: "Apollo".to_string(),
                    client_id: 10,
                    project_manager: Some(7),
                },
                ProjectRef {
                    id: 200,
                    name: "Borealis".to_string(),
                    client_id: 10,
                    project_manager: None,
                },
            ],
            employees: vec![
                EmployeeRef {
                    id: 42,
                    name: "Anna Karlsson".to_string(),
                },
                EmployeeRef {
                    id: 43,
                    name: "Omar Lind".to_string(),
                },
            ],
            time_sheet_approvers: vec![ApproverRef {
                id: 7,
                name: "Lena Berg".to_string(),
            }],
        }
    }

    fn existing_allocation(id: AllocationId, employee_id: EmployeeId) -> AllocationRecord {
        AllocationRecord {
            id,
            employee_id,
            client_id: 10,
            project_id: 100,
            percent: 60,
            status: AllocationStatus::Allocated,
            start_date: d("2024-01-01"),
            end_date: Some(d("2024-12-31")),
            billing_type: BillingType::TimeAndMaterials,
            billed: true,
            billing_rate: Some(dec!(120)),
            time_sheet_approver: 7,
            modified_by: "setup".to_string(),
            modified_at: None,
        }
    }

    fn setup_session(variant: FormVariant) -> (FormSession, MockStaffingBackend) {
        let backend = MockStaffingBackend::new();
        backend.set_modal_data(reference_data());
        let session = FormSession::new(Arc::new(backend.clone()), variant, "lena");
        (session, backend)
    }

    async fn fill_valid_create_form(session: &FormSession) {
        session.set_client(Some(10)).await;
        session.set_project(Some(100)).await;
        session.set_percent(Some(25)).await;
        session
            .set_start_date(Some(d("2025-01-01")))
            .await
            .expect("tracked set must succeed");
        session
            .set_end_date(Some(d("2025-06-30")))
            .await
            .expect("tracked set must succeed");
        session
            .set_billing_type(Some(BillingType::TimeAndMaterials))
            .await;
        session.set_billed(Some(false)).await;
    }

    #[test]
    fn opening_edit_prefills_the_form_from_the_record() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (session, backend) = setup_session(FormVariant::EmployeeModal);
            let record = existing_allocation(1, 42);
            backend.add_allocation(record.clone());

            session.open_edit(record).await.expect("open must succeed");

            let form = session.form().await;
            assert_eq!(form.client_id, Some(10));
            assert_eq!(form.project_id, Some(100));
            assert_eq!(form.percent, Some(60));
            assert_eq!(form.status, Some(AllocationStatus::Allocated));
            assert_eq!(form.billing_rate, "120");
            assert_eq!(session.snapshot().await.remaining, Some(40));
        });
    }

    #[test]
    fn status_follows_the_driving_fields() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (session, _backend) = setup_session(FormVariant::EmployeeModal);
            session
                .open_create(Some(42))
                .await
                .expect("open must succeed");

            session.set_client(Some(10)).await;
            assert_eq!(
                session.derived_status().await,
                Some(AllocationStatus::ClientUnallocated)
            );

            // Undetermined until a percent is chosen.
            session.set_project(Some(100)).await;
            assert_eq!(session.derived_status().await, None);

            session.set_percent(Some(50)).await;
            assert_eq!(
                session.derived_status().await,
                Some(AllocationStatus::Allocated)
            );

            session.set_percent(Some(0)).await;
            assert_eq!(
                session.derived_status().await,
                Some(AllocationStatus::ProjectUnallocated)
            );
        });
    }

    #[test]
    fn choosing_a_project_defaults_the_approver_to_its_manager() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (session, _backend) = setup_session(FormVariant::EmployeeModal);
            session
                .open_create(Some(42))
                .await
                .expect("open must succeed");

            session.set_project(Some(100)).await;
            assert_eq!(session.form().await.time_sheet_approver, Some(7));
        });
    }

    #[test]
    fn an_explicit_approver_is_not_overridden_by_the_project_manager() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (session, _backend) = setup_session(FormVariant::EmployeeModal);
            session
                .open_create(Some(42))
                .await
                .expect("open must succeed");

            session.set_approver(Some(99)).await;
            session.set_project(Some(100)).await;
            assert_eq!(session.form().await.time_sheet_approver, Some(99));
        });
    }

    #[test]
    fn projects_without_a_manager_leave_the_approver_unset() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (session, _backend) = setup_session(FormVariant::EmployeeModal);
            session
                .open_create(Some(42))
                .await
                .expect("open must succeed");

            session.set_project(Some(200)).await;
            assert_eq!(session.form().await.time_sheet_approver, None);
        });
    }

    #[test]
    fn manual_close_is_edit_only_and_lost_on_the_next_driving_change() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (session, backend) = setup_session(FormVariant::EmployeeModal);

            session
                .open_create(Some(42))
                .await
                .expect("open must succeed");
            assert!(!session.mark_closed().await);

            let record = existing_allocation(1, 42);
            backend.add_allocation(record.clone());
            session.open_edit(record).await.expect("open must succeed");
            assert!(session.mark_closed().await);
            assert_eq!(
                session.derived_status().await,
                Some(AllocationStatus::Closed)
            );

            session.set_percent(Some(25)).await;
            assert_eq!(
                session.derived_status().await,
                Some(AllocationStatus::Allocated)
            );
        });
    }

    #[test]
    fn percent_options_respect_the_snapshot_capacity() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (session, backend) = setup_session(FormVariant::EmployeeModal);
            backend.add_allocation(existing_allocation(1, 42));

            session
                .open_create(Some(42))
                .await
                .expect("open must succeed");
            // 60% taken, 40 remain.
            assert_eq!(session.percent_options().await, vec![0, 25]);
        });
    }

    #[test]
    fn percent_options_add_back_the_original_when_editing() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (session, backend) = setup_session(FormVariant::EmployeeModal);
            let record = existing_allocation(1, 42);
            backend.add_allocation(record.clone());

            session.open_edit(record).await.expect("open must succeed");
            // 40 remain plus the 60 this allocation already holds.
            assert_eq!(session.percent_options().await, vec![0, 25, 50, 75, 100]);
        });
    }

    #[test]
    fn reference_data_failure_degrades_to_empty_lists() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (session, backend) = setup_session(FormVariant::EmployeeModal);
            backend.set_fail_modal_data(true);

            session
                .open_create(Some(42))
                .await
                .expect("open must still succeed");
            let reference = session.reference().await;
            assert!(reference.clients.is_empty());
            assert!(reference.projects.is_empty());
        });
    }

    #[test]
    fn snapshot_fetch_failure_is_a_network_error() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (session, backend) = setup_session(FormVariant::EmployeeModal);
            backend.set_fail_reads(true);

            let result = session.open_create(Some(42)).await;
            assert!(matches!(result, Err(FormError::Network(_))));
        });
    }

    #[test]
    fn stale_snapshot_is_dropped_after_close() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (session, _backend) = setup_session(FormVariant::EmployeeModal);
            session
                .open_create(Some(42))
                .await
                .expect("open must succeed");

            let request = session
                .begin_snapshot_refresh()
                .await
                .expect("request must begin");
            let data = session
                .fetch_snapshot(&request)
                .await
                .expect("fetch must succeed");

            session.close().await;
            assert!(!session.apply_snapshot(request, data).await);
            assert_eq!(session.snapshot().await.remaining, None);
        });
    }

    #[test]
    fn stale_snapshot_is_dropped_after_the_employee_changes() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (session, backend) = setup_session(FormVariant::ProjectModal);
            backend.add_allocation(existing_allocation(1, 42));
            session.open_create(None).await.expect("open must succeed");
            session
                .set_employee(42)
                .await
                .expect("set employee must succeed");

            let request = session
                .begin_snapshot_refresh()
                .await
                .expect("request must begin");
            let data = session
                .fetch_snapshot(&request)
                .await
                .expect("fetch must succeed");

            // Employee 42's fetch completes after the user switched to 43.
            session
                .set_employee(43)
                .await
                .expect("set employee must succeed");
            assert!(!session.apply_snapshot(request, data).await);
            // The applied snapshot belongs to employee 43: fully free.
            assert_eq!(session.snapshot().await.remaining, Some(100));
        });
    }

    #[test]
    fn current_snapshot_applies() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (session, backend) = setup_session(FormVariant::EmployeeModal);
            backend.add_allocation(existing_allocation(1, 42));
            session
                .open_create(Some(42))
                .await
                .expect("open must succeed");

            let request = session
                .begin_snapshot_refresh()
                .await
                .expect("request must begin");
            let data = session
                .fetch_snapshot(&request)
                .await
                .expect("fetch must succeed");
            assert!(session.apply_snapshot(request, data).await);
            assert_eq!(session.snapshot().await.remaining, Some(40));
        });
    }

    #[test]
    fn submit_without_an_employee_is_a_missing_field() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (session, _backend) = setup_session(FormVariant::ProjectModal);
            session.open_create(None).await.expect("open must succeed");
            fill_valid_create_form(&session).await;

            let error = session.submit().await.expect_err("submit must fail");
            match error {
                FormError::Validation(AllocationRejection::MissingFields { fields }) => {
                    assert_eq!(fields, vec!["employee"]);
                }
                other => panic!("Expected missing employee, got {:?}", other),
            }
        });
    }

    #[test]
    fn create_submits_through_the_variant_route() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (session, backend) = setup_session(FormVariant::ProjectModal);
            session.open_create(None).await.expect("open must succeed");
            session
                .set_employee(42)
                .await
                .expect("set employee must succeed");
            fill_valid_create_form(&session).await;

            session.submit().await.expect("submit must succeed");

            let submission = backend.last_submission().expect("one submission expected");
            assert_eq!(
                submission.operation,
                SubmitOperation::Create(FormVariant::ProjectModal)
            );
            assert_eq!(submission.command.employee_id, 42);
            assert_eq!(submission.command.modified_by, "lena");
            assert_eq!(submission.command.billed_check, "No");
        });
    }

    #[test]
    fn edit_submits_an_update_in_place() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (session, backend) = setup_session(FormVariant::EmployeeModal);
            let record = existing_allocation(1, 42);
            backend.add_allocation(record.clone());

            session.open_edit(record).await.expect("open must succeed");
            session.set_percent(Some(25)).await;
            session.submit().await.expect("submit must succeed");

            let submission = backend.last_submission().expect("one submission expected");
            assert_eq!(submission.operation, SubmitOperation::Update(1));
            assert_eq!(submission.command.percent, 25);
            let stored = backend.allocation(1).expect("record must exist");
            assert_eq!(stored.percent, 25);
        });
    }

    #[test]
    fn a_server_rejection_overrides_a_local_pass() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (session, backend) = setup_session(FormVariant::EmployeeModal);
            session
                .open_create(Some(42))
                .await
                .expect("open must succeed");
            fill_valid_create_form(&session).await;
            backend.reject_next_submit(409, "Allocation overlaps on the server");

            let error = session.submit().await.expect_err("submit must fail");
            match error {
                FormError::ServerRejected { message } => {
                    assert_eq!(message, "Allocation overlaps on the server");
                }
                other => panic!("Expected server rejection, got {:?}", other),
            }
            backend.expect_submission_count(0);
        });
    }

    #[test]
    fn a_server_5xx_on_submit_is_a_network_error() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (session, backend) = setup_session(FormVariant::EmployeeModal);
            session
                .open_create(Some(42))
                .await
                .expect("open must succeed");
            fill_valid_create_form(&session).await;
            backend.reject_next_submit(500, "boom");

            let error = session.submit().await.expect_err("submit must fail");
            assert!(matches!(error, FormError::Network(_)));
        });
    }

    #[test]
    fn dry_run_builds_the_command_without_submitting() {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let (session, backend) = setup_session(FormVariant::EmployeeModal);
            session
                .open_create(Some(42))
                .await
                .expect("open must succeed");
            fill_valid_create_form(&session).await;

            let command = session.dry_run().await.expect("dry run must succeed");
            assert_eq!(command.employee_id, 42);
            assert_eq!(command.percent, 25);
            backend.expect_submission_count(0);
        });
    }
}
