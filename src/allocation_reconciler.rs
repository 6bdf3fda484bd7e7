// src/allocation_reconciler.rs
//
// Pure allocation rules shared by every entry point that creates or edits
// an allocation. No I/O happens here; callers supply fetched context.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::debug;

// --- Error Types ---

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationRejection {
    #[error("Mandatory field(s) missing or invalid: {}", .fields.join(", "))]
    MissingFields { fields: Vec<&'static str> },

    #[error("Start date {start_date} is before the earliest supported date 2020-01-01")]
    StartDateTooEarly { start_date: NaiveDate },

    #[error("End date {end_date} is before start date {start_date}")]
    EndBeforeStart {
        start_date: NaiveDate,
        end_date: NaiveDate,
    },

    #[error(
        "Dates overlap an existing allocation on the same project ({existing_start} to {})",
        fmt_end(.existing_end)
    )]
    Overlap {
        existing_id: AllocationId,
        existing_start: NaiveDate,
        existing_end: Option<NaiveDate>,
    },

    #[error("Total allocation would reach {adjusted_total}%, exceeding the 100% limit")]
    OverAllocated { adjusted_total: u16 },
}

impl AllocationRejection {
    /// Overlap and over-allocation describe a clash with existing data
    /// rather than a malformed form.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            AllocationRejection::Overlap { .. } | AllocationRejection::OverAllocated { .. }
        )
    }
}

fn fmt_end(end: &Option<NaiveDate>) -> String {
    match end {
        Some(date) => date.to_string(),
        None => "open-ended".to_string(),
    }
}

// --- Constants ---

/// Earliest start date the dashboard accepts.
pub static EARLIEST_START: Lazy<NaiveDate> =
    Lazy::new(|| NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or(NaiveDate::MIN));

/// Open-ended allocations compare as if they ran to the end of year 9999.
pub static OPEN_END_SENTINEL: Lazy<NaiveDate> =
    Lazy::new(|| NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX));

/// The percent choices the allocation form offers before capacity filtering.
pub const PERCENT_OPTIONS: [u8; 5] = [0, 25, 50, 75, 100];

// --- Core Data Structures ---

pub type EmployeeId = i64;
pub type ClientId = i64;
pub type ProjectId = i64;
pub type ApproverId = i64;
pub type AllocationId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AllocationStatus {
    ClientUnallocated,
    ProjectUnallocated,
    Allocated,
    Closed,
}

impl AllocationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationStatus::ClientUnallocated => "ClientUnallocated",
            AllocationStatus::ProjectUnallocated => "ProjectUnallocated",
            AllocationStatus::Allocated => "Allocated",
            AllocationStatus::Closed => "Closed",
        }
    }
}

impl fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BillingType {
    #[serde(rename = "T&M")]
    TimeAndMaterials,
    FixPrice,
}

impl BillingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingType::TimeAndMaterials => "T&M",
            BillingType::FixPrice => "FixPrice",
        }
    }
}

impl fmt::Display for BillingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An allocation as the backend reports it.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationRecord {
    pub id: AllocationId,
    pub employee_id: EmployeeId,
    pub client_id: ClientId,
    pub project_id: ProjectId,
    pub percent: u8,
    pub status: AllocationStatus,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub billing_type: BillingType,
    pub billed: bool,
    pub billing_rate: Option<Decimal>,
    pub time_sheet_approver: ApproverId,
    pub modified_by: String,
    // Server-stamped; carried for display only.
    pub modified_at: Option<String>,
}

/// Form state as the user left it. Everything is optional until supplied;
/// the billing rate stays free text until validation parses it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllocationForm {
    pub client_id: Option<ClientId>,
    pub project_id: Option<ProjectId>,
    pub status: Option<AllocationStatus>,
    pub percent: Option<u8>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub billing_type: Option<BillingType>,
    pub billed: Option<bool>,
    pub billing_rate: String,
    pub time_sheet_approver: Option<ApproverId>,
}

/// Fetched state the submit-time rules run against. `allocations` must be
/// the employee's own allocations; the overlap rule narrows to the form's
/// project itself.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub fresh_remaining: u8,
    pub allocations: Vec<AllocationRecord>,
    pub editing: Option<EditTarget>,
}

/// Identifies the allocation being edited so rules can net out its
/// original contribution and skip it during overlap checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditTarget {
    pub allocation_id: AllocationId,
    pub original_percent: u8,
}

/// The validated, normalized result handed to the submit layer: percent is
/// an integer, the rate is present only when billed, a blank end date is
/// `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedAllocation {
    pub client_id: ClientId,
    pub project_id: ProjectId,
    pub status: AllocationStatus,
    pub percent: u8,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub billing_type: BillingType,
    pub billed: bool,
    pub billing_rate: Option<Decimal>,
    pub time_sheet_approver: ApproverId,
}

// A form with every required field present. Built by the rule-1 check so
// later rules can read values without re-checking presence.
#[derive(Debug, Clone)]
struct CompletedForm {
    client_id: ClientId,
    project_id: ProjectId,
    status: AllocationStatus,
    percent: u8,
    start_date: NaiveDate,
    end_date: Option<NaiveDate>,
    billing_type: BillingType,
    billed: bool,
    billing_rate: Option<Decimal>,
    time_sheet_approver: ApproverId,
}

impl CompletedForm {
    fn into_normalized(self) -> NormalizedAllocation {
        NormalizedAllocation {
            client_id: self.client_id,
            project_id: self.project_id,
            status: self.status,
            percent: self.percent,
            start_date: self.start_date,
            end_date: self.end_date,
            billing_type: self.billing_type,
            billed: self.billed,
            billing_rate: if self.billed { self.billing_rate } else { None },
            time_sheet_approver: self.time_sheet_approver,
        }
    }
}

// --- Status Derivation ---

/// Derives the allocation status from the three driving fields, first
/// match wins. Client and project with no percent chosen yet stays
/// undetermined, as does a missing client. `Closed` is never derived, it
/// is only ever picked manually in the edit flow.
pub fn derive_status(
    client_id: Option<ClientId>,
    project_id: Option<ProjectId>,
    percent: Option<u8>,
) -> Option<AllocationStatus> {
    match (client_id, project_id, percent) {
        (Some(_), Some(_), Some(0)) => Some(AllocationStatus::ProjectUnallocated),
        (Some(_), Some(_), Some(_)) => Some(AllocationStatus::Allocated),
        (Some(_), Some(_), None) => None,
        (Some(_), None, _) => Some(AllocationStatus::ClientUnallocated),
        _ => None,
    }
}

// --- Remaining Capacity ---

/// Remaining capacity after the user's current percent choice. When
/// editing, the original percent is added back first because the server's
/// remaining figure still counts the allocation being edited. Floors at
/// zero; the hard ceiling check is a submit-time rule against a fresh
/// server value.
pub fn compute_remaining(
    fetched_remaining: u8,
    original_percent: Option<u8>,
    current_percent: u8,
) -> u8 {
    let remaining = fetched_remaining as i16 + original_percent.unwrap_or(0) as i16
        - current_percent as i16;
    remaining.max(0) as u8
}

/// Filters the offered percent choices down to what still fits. Zero is
/// always offered.
pub fn selectable_percent_options(remaining: u8) -> Vec<u8> {
    PERCENT_OPTIONS
        .iter()
        .copied()
        .filter(|option| *option <= remaining)
        .collect()
}

// --- Date Overlap ---

/// Inclusive interval overlap with absent ends treated as the year-9999
/// sentinel. Ranges that merely touch at a boundary day count as
/// overlapping.
pub fn ranges_overlap(
    new_start: NaiveDate,
    new_end: Option<NaiveDate>,
    existing_start: NaiveDate,
    existing_end: Option<NaiveDate>,
) -> bool {
    let new_end = new_end.unwrap_or(*OPEN_END_SENTINEL);
    let existing_end = existing_end.unwrap_or(*OPEN_END_SENTINEL);
    new_start <= existing_end && existing_start <= new_end
}

/// First allocation on the same project whose dates overlap the candidate
/// range, skipping the allocation being edited.
pub fn find_overlapping<'a>(
    allocations: &'a [AllocationRecord],
    project_id: ProjectId,
    new_start: NaiveDate,
    new_end: Option<NaiveDate>,
    exclude_id: Option<AllocationId>,
) -> Option<&'a AllocationRecord> {
    allocations.iter().find(|existing| {
        existing.project_id == project_id
            && Some(existing.id) != exclude_id
            && ranges_overlap(new_start, new_end, existing.start_date, existing.end_date)
    })
}

// --- Validation Pipeline ---

/// Parses the free-text billing rate. `None` when blank, unparseable, or
/// not strictly positive.
pub fn parse_billing_rate(raw: &str) -> Option<Decimal> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match Decimal::from_str(trimmed) {
        Ok(rate) if rate > Decimal::ZERO => Some(rate),
        _ => None,
    }
}

// Rule 1: every required field present, in the order the form shows them.
// Collects all offenders so the message names each one.
fn check_required(form: &AllocationForm) -> Result<CompletedForm, AllocationRejection> {
    let mut missing: Vec<&'static str> = Vec::new();

    if form.client_id.is_none() {
        missing.push("client");
    }
    if form.project_id.is_none() {
        missing.push("project");
    }
    if form.status.is_none() {
        missing.push("status");
    }
    // Zero is a valid percent; only a never-set field is missing.
    if form.percent.is_none() {
        missing.push("percent");
    }
    if form.start_date.is_none() {
        missing.push("start date");
    }
    if form.status == Some(AllocationStatus::Allocated) && form.end_date.is_none() {
        missing.push("end date");
    }
    if form.billing_type.is_none() {
        missing.push("billing type");
    }
    if form.billed.is_none() {
        missing.push("billed");
    }
    let billing_rate = parse_billing_rate(&form.billing_rate);
    if form.billed == Some(true) && billing_rate.is_none() {
        missing.push("billing rate");
    }
    if form.time_sheet_approver.is_none() {
        missing.push("time sheet approver");
    }

    if !missing.is_empty() {
        return Err(AllocationRejection::MissingFields { fields: missing });
    }

    match (
        form.client_id,
        form.project_id,
        form.status,
        form.percent,
        form.start_date,
        form.billing_type,
        form.billed,
        form.time_sheet_approver,
    ) {
        (
            Some(client_id),
            Some(project_id),
            Some(status),
            Some(percent),
            Some(start_date),
            Some(billing_type),
            Some(billed),
            Some(time_sheet_approver),
        ) => Ok(CompletedForm {
            client_id,
            project_id,
            status,
            percent,
            start_date,
            end_date: form.end_date,
            billing_type,
            billed,
            billing_rate,
            time_sheet_approver,
        }),
        // Unreachable: presence was checked above.
        _ => Err(AllocationRejection::MissingFields { fields: missing }),
    }
}

// Rules 2 and 3: the start-date floor, then end-before-start.
fn check_dates(form: &CompletedForm) -> Result<(), AllocationRejection> {
    if form.start_date < *EARLIEST_START {
        return Err(AllocationRejection::StartDateTooEarly {
            start_date: form.start_date,
        });
    }
    if let Some(end_date) = form.end_date {
        if end_date < form.start_date {
            return Err(AllocationRejection::EndBeforeStart {
                start_date: form.start_date,
                end_date,
            });
        }
    }
    Ok(())
}

// Rule 4: no date overlap with the employee's other allocations on the
// same project.
fn check_overlap(
    form: &CompletedForm,
    context: &ValidationContext,
) -> Result<(), AllocationRejection> {
    let exclude_id = context.editing.map(|edit| edit.allocation_id);
    if let Some(existing) = find_overlapping(
        &context.allocations,
        form.project_id,
        form.start_date,
        form.end_date,
        exclude_id,
    ) {
        return Err(AllocationRejection::Overlap {
            existing_id: existing.id,
            existing_start: existing.start_date,
            existing_end: existing.end_date,
        });
    }
    Ok(())
}

// Rule 5: the employee's total allocation may not exceed 100%. Runs
// against a freshly fetched remaining figure, netting out the original
// percent when editing.
fn check_ceiling(
    form: &CompletedForm,
    context: &ValidationContext,
) -> Result<(), AllocationRejection> {
    let total_allocated = 100i16 - context.fresh_remaining as i16;
    let adjusted_total = match context.editing {
        Some(edit) => total_allocated - edit.original_percent as i16 + form.percent as i16,
        None => total_allocated + form.percent as i16,
    };
    if adjusted_total > 100 {
        return Err(AllocationRejection::OverAllocated {
            adjusted_total: adjusted_total.max(0) as u16,
        });
    }
    Ok(())
}

/// The field-level rules (1 through 3) only. Cheap enough to run on every
/// keystroke; needs no fetched context.
pub fn validate_local(form: &AllocationForm) -> Result<(), AllocationRejection> {
    let completed = check_required(form)?;
    check_dates(&completed)
}

/// The full ordered pipeline. The first failing rule wins and is the only
/// reason reported. On success the normalized allocation is returned for
/// submission.
pub fn validate(
    form: &AllocationForm,
    context: &ValidationContext,
) -> Result<NormalizedAllocation, AllocationRejection> {
    let completed = check_required(form)?;
    check_dates(&completed)?;
    check_overlap(&completed, context)?;
    check_ceiling(&completed, context)?;
    debug!(
        "Allocation validated: project={}, percent={}, {} to {}",
        completed.project_id,
        completed.percent,
        completed.start_date,
        fmt_end(&completed.end_date)
    );
    Ok(completed.into_normalized())
}
