// src/staffing_client.rs

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Method, StatusCode};
use rust_decimal::prelude::*;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::allocation_reconciler::{
    AllocationId, AllocationRecord, AllocationStatus, ApproverId, BillingType, ClientId,
    EmployeeId, NormalizedAllocation, ProjectId,
};

// Defaults for the STAFFING_* environment configuration.
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";
pub const DEFAULT_SESSION_FILE: &str = "staffing_session.json";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SEARCH_DEBOUNCE_MS: u64 = 500;

// --- Client Configuration ---

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_session_file")]
    pub session_file: String,
    #[serde(default = "default_search_debounce_ms")]
    pub search_debounce_ms: u64,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}
fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
fn default_session_file() -> String {
    DEFAULT_SESSION_FILE.to_string()
}
fn default_search_debounce_ms() -> u64 {
    DEFAULT_SEARCH_DEBOUNCE_MS
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_secs: default_request_timeout_secs(),
            session_file: default_session_file(),
            search_debounce_ms: default_search_debounce_ms(),
        }
    }
}

impl ClientConfig {
    /// Reads STAFFING_BASE_URL, STAFFING_REQUEST_TIMEOUT_SECS,
    /// STAFFING_SESSION_FILE and STAFFING_SEARCH_DEBOUNCE_MS, falling back
    /// to the defaults above.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::prefixed("STAFFING_").from_env::<ClientConfig>()
    }
}

// --- Error Type ---

#[derive(Error, Debug)]
pub enum StaffingApiError {
    #[error("HTTP request failed")]
    Request(#[from] reqwest::Error),

    #[error("JSON processing error")]
    Json(#[from] serde_json::Error),

    #[error("URL parsing error")]
    UrlParse(#[from] url::ParseError),

    #[error("Staffing API error: Status={status}, Message='{message}'")]
    Api { status: StatusCode, message: String },
}

// Error bodies come back as {"message": "..."}; anything else is surfaced raw.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

fn extract_error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.message.unwrap_or_else(|| body.to_string()),
        Err(_) => body.to_string(),
    }
}

// --- Wire Data Structures ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemainingAllocationResponse {
    pub remaining_allocation: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationWire {
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
    pub billing_rate: Option<f64>,
    pub time_sheet_approver: ApproverId,
    pub modified_by: String,
    pub modified_at: Option<String>,
}

impl AllocationWire {
    fn into_record(self) -> AllocationRecord {
        AllocationRecord {
            id: self.id,
            employee_id: self.employee_id,
            client_id: self.client_id,
            project_id: self.project_id,
            percent: self.percent,
            status: self.status,
            start_date: self.start_date,
            end_date: self.end_date,
            billing_type: self.billing_type,
            billed: self.billed,
            billing_rate: self.billing_rate.and_then(Decimal::from_f64),
            time_sheet_approver: self.time_sheet_approver,
            modified_by: self.modified_by,
            modified_at: self.modified_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeAllocationsResponse {
    pub allocations: Vec<AllocationWire>,
    // Not all deployments report this; absence is fine.
    #[serde(default)]
    pub current_allocation: Option<u8>,
}

/// Domain form of the allocations listing.
#[derive(Debug, Clone, Default)]
pub struct EmployeeAllocations {
    pub allocations: Vec<AllocationRecord>,
    pub current_allocation: Option<u8>,
}

impl From<EmployeeAllocationsResponse> for EmployeeAllocations {
    fn from(response: EmployeeAllocationsResponse) -> Self {
        Self {
            allocations: response
                .allocations
                .into_iter()
                .map(AllocationWire::into_record)
                .collect(),
            current_allocation: response.current_allocation,
        }
    }
}

// Reference data for the form dropdowns.

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRef {
    pub id: ClientId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRef {
    pub id: ProjectId,
    pub name: String,
    pub client_id: ClientId,
    // Seeds the time-sheet approver when the user has not picked one.
    pub project_manager: Option<ApproverId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeRef {
    pub id: EmployeeId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproverRef {
    pub id: ApproverId,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModalData {
    #[serde(default)]
    pub clients: Vec<ClientRef>,
    #[serde(default)]
    pub projects: Vec<ProjectRef>,
    #[serde(default)]
    pub employees: Vec<EmployeeRef>,
    #[serde(default)]
    pub time_sheet_approvers: Vec<ApproverRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployeeSearchResponse {
    pub employees: Vec<EmployeeRef>,
}

/// The create/update body. Field names follow the backend's contract to
/// the letter, hence the explicit renames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationCommand {
    #[serde(rename = "EmployeeID")]
    pub employee_id: EmployeeId,
    #[serde(rename = "ClientID")]
    pub client_id: ClientId,
    #[serde(rename = "ProjectID")]
    pub project_id: ProjectId,
    #[serde(rename = "AllocationStatus")]
    pub status: AllocationStatus,
    #[serde(rename = "AllocationPercent")]
    pub percent: u8,
    #[serde(rename = "AllocationStartDate")]
    pub start_date: NaiveDate,
    #[serde(rename = "AllocationEndDate")]
    pub end_date: Option<NaiveDate>,
    #[serde(rename = "AllocationTimeSheetApprover")]
    pub time_sheet_approver: ApproverId,
    #[serde(rename = "AllocationBillingType")]
    pub billing_type: BillingType,
    #[serde(rename = "AllocationBilledCheck")]
    pub billed_check: String,
    #[serde(rename = "AllocationBillingRate")]
    pub billing_rate: Option<f64>,
    #[serde(rename = "ModifiedBy")]
    pub modified_by: String,
}

impl AllocationCommand {
    pub fn from_normalized(
        employee_id: EmployeeId,
        normalized: &NormalizedAllocation,
        modified_by: &str,
    ) -> Self {
        Self {
            employee_id,
            client_id: normalized.client_id,
            project_id: normalized.project_id,
            status: normalized.status,
            percent: normalized.percent,
            start_date: normalized.start_date,
            end_date: normalized.end_date,
            time_sheet_approver: normalized.time_sheet_approver,
            billing_type: normalized.billing_type,
            billed_check: if normalized.billed { "Yes" } else { "No" }.to_string(),
            billing_rate: normalized.billing_rate.and_then(|rate| rate.to_f64()),
            modified_by: modified_by.to_string(),
        }
    }
}

// --- Request Parameters ---

/// Date window a remaining/allocations read is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationFilter {
    Current,
    All,
}

impl AllocationFilter {
    pub fn as_query_value(&self) -> &'static str {
        match self {
            AllocationFilter::Current => "current",
            AllocationFilter::All => "all",
        }
    }
}

/// Which modal the submission came from. Both share one engine; only the
/// create route differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormVariant {
    EmployeeModal,
    ProjectModal,
}

impl FormVariant {
    pub fn create_path(&self) -> &'static str {
        match self {
            FormVariant::EmployeeModal => "api/allocate",
            FormVariant::ProjectModal => "allocations",
        }
    }
}

// --- Backend Abstraction ---

/// The REST surface the form engine consumes. `StaffingClient` is the
/// real implementation; tests use `MockStaffingBackend` from the form
/// module.
#[async_trait]
pub trait StaffingBackend: Send + Sync {
    async fn remaining_allocation(
        &self,
        employee_id: EmployeeId,
        window: Option<DateWindow>,
    ) -> Result<u8, StaffingApiError>;

    async fn employee_allocations(
        &self,
        employee_id: EmployeeId,
        filter: Option<AllocationFilter>,
        window: Option<DateWindow>,
    ) -> Result<EmployeeAllocations, StaffingApiError>;

    async fn create_allocation(
        &self,
        variant: FormVariant,
        command: &AllocationCommand,
    ) -> Result<(), StaffingApiError>;

    async fn update_allocation(
        &self,
        allocation_id: AllocationId,
        command: &AllocationCommand,
    ) -> Result<(), StaffingApiError>;

    async fn modal_data(&self) -> Result<ModalData, StaffingApiError>;

    async fn search_employees(&self, query: &str) -> Result<Vec<EmployeeRef>, StaffingApiError>;
}

// --- Client Implementation ---

#[derive(Clone)]
pub struct StaffingClient {
    config: Arc<ClientConfig>,
    http_client: Client,
}

impl StaffingClient {
    pub fn new(config: ClientConfig) -> Result<Self, StaffingApiError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            config: Arc::new(config),
            http_client,
        })
    }

    fn endpoint_url(&self, path: &str) -> Result<Url, StaffingApiError> {
        let url = format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Ok(Url::parse(&url)?)
    }

    fn append_window(url: &mut Url, window: Option<DateWindow>) {
        if let Some(window) = window {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("startDate", &window.start.format("%Y-%m-%d").to_string());
            if let Some(end) = window.end {
                pairs.append_pair("endDate", &end.format("%Y-%m-%d").to_string());
            }
        }
    }

    fn remaining_url(
        &self,
        employee_id: EmployeeId,
        window: Option<DateWindow>,
    ) -> Result<Url, StaffingApiError> {
        let mut url = self.endpoint_url(&format!("employee-allocations/{}", employee_id))?;
        Self::append_window(&mut url, window);
        Ok(url)
    }

    fn allocations_url(
        &self,
        employee_id: EmployeeId,
        filter: Option<AllocationFilter>,
        window: Option<DateWindow>,
    ) -> Result<Url, StaffingApiError> {
        let mut url =
            self.endpoint_url(&format!("employee-details/{}/allocations", employee_id))?;
        if let Some(filter) = filter {
            url.query_pairs_mut()
                .append_pair("filter", filter.as_query_value());
        }
        Self::append_window(&mut url, window);
        Ok(url)
    }

    fn search_url(&self, query: &str) -> Result<Url, StaffingApiError> {
        let mut url = self.endpoint_url("employees")?;
        url.query_pairs_mut().append_pair("search", query);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        context_msg: &str,
    ) -> Result<T, StaffingApiError> {
        debug!("Sending GET for '{}' to URL: {}", context_msg, url);
        let response = self.http_client.get(url).send().await?;
        let response = Self::check_status(response, context_msg).await?;
        let bytes = response.bytes().await?;
        match serde_json::from_slice::<T>(&bytes) {
            Ok(data) => Ok(data),
            Err(e) => {
                error!("JSON deserialization failed for '{}': {}", context_msg, e);
                Err(StaffingApiError::Json(e))
            }
        }
    }

    async fn send_command(
        &self,
        method: Method,
        url: Url,
        command: &AllocationCommand,
        context_msg: &str,
    ) -> Result<(), StaffingApiError> {
        debug!("Sending {} for '{}' to URL: {}", method, context_msg, url);
        let response = self
            .http_client
            .request(method, url)
            .json(command)
            .send()
            .await?;
        Self::check_status(response, context_msg).await?;
        info!("'{}' accepted by the backend", context_msg);
        Ok(())
    }

    async fn check_status(
        response: reqwest::Response,
        context_msg: &str,
    ) -> Result<reqwest::Response, StaffingApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error body".to_string());
        let message = extract_error_message(&body);
        error!(
            "Request '{}' failed: Status={}, Message='{}'",
            context_msg, status, message
        );
        Err(StaffingApiError::Api { status, message })
    }
}

#[async_trait]
impl StaffingBackend for StaffingClient {
    async fn remaining_allocation(
        &self,
        employee_id: EmployeeId,
        window: Option<DateWindow>,
    ) -> Result<u8, StaffingApiError> {
        let url = self.remaining_url(employee_id, window)?;
        let response: RemainingAllocationResponse =
            self.get_json(url, "remaining allocation").await?;
        Ok(response.remaining_allocation)
    }

    async fn employee_allocations(
        &self,
        employee_id: EmployeeId,
        filter: Option<AllocationFilter>,
        window: Option<DateWindow>,
    ) -> Result<EmployeeAllocations, StaffingApiError> {
        let url = self.allocations_url(employee_id, filter, window)?;
        let response: EmployeeAllocationsResponse =
            self.get_json(url, "employee allocations").await?;
        Ok(response.into())
    }

    async fn create_allocation(
        &self,
        variant: FormVariant,
        command: &AllocationCommand,
    ) -> Result<(), StaffingApiError> {
        let url = self.endpoint_url(variant.create_path())?;
        self.send_command(Method::POST, url, command, "create allocation")
            .await
    }

    async fn update_allocation(
        &self,
        allocation_id: AllocationId,
        command: &AllocationCommand,
    ) -> Result<(), StaffingApiError> {
        let url = self.endpoint_url(&format!("allocations/{}", allocation_id))?;
        self.send_command(Method::PUT, url, command, "update allocation")
            .await
    }

    async fn modal_data(&self) -> Result<ModalData, StaffingApiError> {
        let url = self.endpoint_url("modal/data")?;
        self.get_json(url, "modal reference data").await
    }

    async fn search_employees(&self, query: &str) -> Result<Vec<EmployeeRef>, StaffingApiError> {
        let url = self.search_url(query)?;
        let response: EmployeeSearchResponse = self.get_json(url, "employee search").await?;
        Ok(response.employees)
    }
}

// --- Test Module ---
#[cfg(test)]
mod staffing_client_tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn d(date_str: &str) -> NaiveDate {
        NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
            .unwrap_or_else(|_| panic!("Invalid date string format: {}", date_str))
    }

    fn test_client() -> StaffingClient {
        let config = ClientConfig {
            base_url: "http://staffing.test/".to_string(),
            ..ClientConfig::default()
        };
        StaffingClient::new(config).expect("client construction must succeed")
    }

    // --- URL Construction ---

    #[test]
    fn remaining_url_without_window_has_no_query() {
        let url = test_client()
            .remaining_url(42, None)
            .expect("url must build");
        assert_eq!(url.as_str(), "http://staffing.test/employee-allocations/42");
    }

    #[test]
    fn remaining_url_carries_the_date_window() {
        let window = DateWindow {
            start: d("2024-01-01"),
            end: Some(d("2024-12-31")),
        };
        let url = test_client()
            .remaining_url(42, Some(window))
            .expect("url must build");
        assert_eq!(
            url.as_str(),
            "http://staffing.test/employee-allocations/42?startDate=2024-01-01&endDate=2024-12-31"
        );
    }

    #[test]
    fn open_ended_window_omits_the_end_date_param() {
        let window = DateWindow {
            start: d("2024-06-01"),
            end: None,
        };
        let url = test_client()
            .remaining_url(42, Some(window))
            .expect("url must build");
        assert_eq!(
            url.as_str(),
            "http://staffing.test/employee-allocations/42?startDate=2024-06-01"
        );
    }

    #[test]
    fn allocations_url_carries_filter_then_window() {
        let window = DateWindow {
            start: d("2024-01-01"),
            end: Some(d("2024-12-31")),
        };
        let url = test_client()
            .allocations_url(7, Some(AllocationFilter::Current), Some(window))
            .expect("url must build");
        assert_eq!(
            url.as_str(),
            "http://staffing.test/employee-details/7/allocations?filter=current&startDate=2024-01-01&endDate=2024-12-31"
        );
    }

    #[test]
    fn search_url_percent_encodes_the_query() {
        let url = test_client()
            .search_url("anna k")
            .expect("url must build");
        assert_eq!(
            url.as_str(),
            "http://staffing.test/employees?search=anna+k"
        );
    }

    #[test]
    fn create_paths_differ_per_modal_variant() {
        assert_eq!(FormVariant::EmployeeModal.create_path(), "api/allocate");
        assert_eq!(FormVariant::ProjectModal.create_path(), "allocations");
    }

    // --- Command Serialization ---

    fn sample_normalized() -> NormalizedAllocation {
        NormalizedAllocation {
            client_id: 10,
            project_id: 100,
            status: AllocationStatus::Allocated,
            percent: 50,
            start_date: d("2024-01-01"),
            end_date: Some(d("2024-12-31")),
            billing_type: BillingType::TimeAndMaterials,
            billed: true,
            billing_rate: Some(dec!(150.50)),
            time_sheet_approver: 7,
        }
    }

    #[test]
    fn command_serializes_with_the_exact_contract_field_names() {
        let command = AllocationCommand::from_normalized(42, &sample_normalized(), "lena");
        let value = serde_json::to_value(&command).expect("command must serialize");
        assert_eq!(
            value,
            serde_json::json!({
                "EmployeeID": 42,
                "ClientID": 10,
                "ProjectID": 100,
                "AllocationStatus": "Allocated",
                "AllocationPercent": 50,
                "AllocationStartDate": "2024-01-01",
                "AllocationEndDate": "2024-12-31",
                "AllocationTimeSheetApprover": 7,
                "AllocationBillingType": "T&M",
                "AllocationBilledCheck": "Yes",
                "AllocationBillingRate": 150.5,
                "ModifiedBy": "lena",
            })
        );
    }

    #[test]
    fn unbilled_command_carries_no_for_the_check_and_a_null_rate() {
        let mut normalized = sample_normalized();
        normalized.billed = false;
        normalized.billing_rate = None;
        normalized.status = AllocationStatus::ProjectUnallocated;
        normalized.percent = 0;
        normalized.end_date = None;
        let command = AllocationCommand::from_normalized(42, &normalized, "lena");
        let value = serde_json::to_value(&command).expect("command must serialize");
        assert_eq!(value["AllocationBilledCheck"], "No");
        assert_eq!(value["AllocationBillingRate"], serde_json::Value::Null);
        assert_eq!(value["AllocationEndDate"], serde_json::Value::Null);
        assert_eq!(value["AllocationStatus"], "ProjectUnallocated");
        assert_eq!(value["AllocationPercent"], 0);
    }

    // --- Response Parsing ---

    #[test]
    fn parses_a_remaining_allocation_response() {
        let parsed: RemainingAllocationResponse =
            serde_json::from_str(r#"{"remainingAllocation": 40}"#)
                .expect("response must parse");
        assert_eq!(parsed.remaining_allocation, 40);
    }

    #[test]
    fn parses_an_allocations_listing_with_current_allocation() {
        let body = r#"{
            "allocations": [{
                "id": 1,
                "employeeId": 42,
                "clientId": 10,
                "projectId": 100,
                "percent": 60,
                "status": "Allocated",
                "startDate": "2024-01-01",
                "endDate": "2024-12-31",
                "billingType": "T&M",
                "billed": true,
                "billingRate": 120.0,
                "timeSheetApprover": 7,
                "modifiedBy": "lena",
                "modifiedAt": "2024-01-02T09:30:00Z"
            }],
            "currentAllocation": 60
        }"#;
        let parsed: EmployeeAllocationsResponse =
            serde_json::from_str(body).expect("response must parse");
        let domain: EmployeeAllocations = parsed.into();
        assert_eq!(domain.current_allocation, Some(60));
        assert_eq!(domain.allocations.len(), 1);
        let record = &domain.allocations[0];
        assert_eq!(record.percent, 60);
        assert_eq!(record.status, AllocationStatus::Allocated);
        assert_eq!(record.billing_type, BillingType::TimeAndMaterials);
        assert_eq!(record.billing_rate, Some(dec!(120)));
        assert_eq!(record.end_date, Some(d("2024-12-31")));
    }

    #[test]
    fn allocations_listing_accepts_a_missing_current_allocation() {
        let body = r#"{"allocations": []}"#;
        let parsed: EmployeeAllocationsResponse =
            serde_json::from_str(body).expect("response must parse");
        assert_eq!(parsed.current_allocation, None);
        assert!(parsed.allocations.is_empty());
    }

    #[test]
    fn open_ended_allocation_parses_a_null_end_date() {
        let body = r#"{
            "id": 2,
            "employeeId": 42,
            "clientId": 10,
            "projectId": 100,
            "percent": 25,
            "status": "ClientUnallocated",
            "startDate": "2024-03-01",
            "endDate": null,
            "billingType": "FixPrice",
            "billed": false,
            "billingRate": null,
            "timeSheetApprover": 7,
            "modifiedBy": "lena",
            "modifiedAt": null
        }"#;
        let parsed: AllocationWire = serde_json::from_str(body).expect("wire must parse");
        let record = parsed.into_record();
        assert_eq!(record.end_date, None);
        assert_eq!(record.billing_rate, None);
        assert_eq!(record.billing_type, BillingType::FixPrice);
        assert_eq!(record.status, AllocationStatus::ClientUnallocated);
    }

    #[test]
    fn parses_modal_reference_data() {
        let body = r#"{
            "clients": [{"id": 10, "name": "Contoso"}],
            "projects": [{"id": 100, "name": "Apollo", "clientId": 10, "projectManager": 7}],
            "employees": [{"id": 42, "name": "Anna Karlsson"}],
            "timeSheetApprovers": [{"id": 7, "name": "Lena Berg"}]
        }"#;
        let parsed: ModalData = serde_json::from_str(body).expect("modal data must parse");
        assert_eq!(parsed.clients[0].name, "Contoso");
        assert_eq!(parsed.projects[0].project_manager, Some(7));
        assert_eq!(parsed.time_sheet_approvers[0].id, 7);
    }

    #[test]
    fn error_message_extraction_prefers_the_message_field() {
        assert_eq!(
            extract_error_message(r#"{"message": "Allocation overlaps existing"}"#),
            "Allocation overlaps existing"
        );
        assert_eq!(extract_error_message("plain text failure"), "plain text failure");
        assert_eq!(extract_error_message(r#"{"code": 500}"#), r#"{"code": 500}"#);
    }

    #[test]
    fn filter_query_values_are_lower_case() {
        assert_eq!(AllocationFilter::Current.as_query_value(), "current");
        assert_eq!(AllocationFilter::All.as_query_value(), "all");
    }
}
