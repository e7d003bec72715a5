use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

// =============================================================================
// Timestamps
// =============================================================================

/// Fixed-width RFC 3339 with milliseconds, so stored values sort as text.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses RFC 3339, or the `YYYY-MM-DD HH:MM:SS[.fff]` form (taken as UTC)
/// found in rows written by older tooling.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

// =============================================================================
// Status
// =============================================================================

/// Execution and step status. Declaration order is significant: it defines
/// the ordering used by [`BatchStatus::is_less_than`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Completed,
    Starting,
    Started,
    Stopping,
    Stopped,
    Failed,
    Abandoned,
    Unknown,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Starting => "STARTING",
            BatchStatus::Started => "STARTED",
            BatchStatus::Stopping => "STOPPING",
            BatchStatus::Stopped => "STOPPED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Abandoned => "ABANDONED",
            BatchStatus::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "COMPLETED" => Some(BatchStatus::Completed),
            "STARTING" => Some(BatchStatus::Starting),
            "STARTED" => Some(BatchStatus::Started),
            "STOPPING" => Some(BatchStatus::Stopping),
            "STOPPED" => Some(BatchStatus::Stopped),
            "FAILED" => Some(BatchStatus::Failed),
            "ABANDONED" => Some(BatchStatus::Abandoned),
            "UNKNOWN" => Some(BatchStatus::Unknown),
            _ => None,
        }
    }

    /// Stored statuses that are missing or unrecognized read as `Unknown`.
    pub fn from_db(s: Option<&str>) -> Self {
        s.and_then(Self::parse).unwrap_or(BatchStatus::Unknown)
    }

    pub fn is_running(&self) -> bool {
        matches!(
            self,
            BatchStatus::Starting | BatchStatus::Started | BatchStatus::Stopping
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed
                | BatchStatus::Stopped
                | BatchStatus::Failed
                | BatchStatus::Abandoned
        )
    }

    pub fn is_less_than(&self, other: BatchStatus) -> bool {
        *self < other
    }
}

// =============================================================================
// Parameters
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ParameterValue {
    String(String),
    Long(i64),
    Double(f64),
    Timestamp(DateTime<Utc>),
}

impl ParameterValue {
    /// Type name stored by the current layout.
    pub fn type_name(&self) -> &'static str {
        match self {
            ParameterValue::String(_) => "string",
            ParameterValue::Long(_) => "long",
            ParameterValue::Double(_) => "double",
            ParameterValue::Timestamp(_) => "timestamp",
        }
    }

    /// Type code stored by the legacy layout.
    pub fn type_code(&self) -> &'static str {
        match self {
            ParameterValue::String(_) => "STRING",
            ParameterValue::Long(_) => "LONG",
            ParameterValue::Double(_) => "DOUBLE",
            ParameterValue::Timestamp(_) => "DATE",
        }
    }

    /// Textual form stored by the current layout.
    pub fn to_text(&self) -> String {
        match self {
            ParameterValue::String(s) => s.clone(),
            ParameterValue::Long(v) => v.to_string(),
            ParameterValue::Double(v) => v.to_string(),
            ParameterValue::Timestamp(ts) => format_timestamp(ts),
        }
    }

    /// Rebuilds a value from a type name and its text. Unknown types and
    /// values that do not parse as their type are kept as strings.
    pub fn from_text(type_name: &str, text: &str) -> Self {
        let parsed = match type_name.to_ascii_lowercase().as_str() {
            "long" => text.trim().parse().ok().map(ParameterValue::Long),
            "double" => text.trim().parse().ok().map(ParameterValue::Double),
            "timestamp" | "date" => parse_timestamp(text.trim()).map(ParameterValue::Timestamp),
            _ => None,
        };
        parsed.unwrap_or_else(|| ParameterValue::String(text.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobParameter {
    /// `None` when the stored value column was null.
    pub value: Option<ParameterValue>,
    pub identifying: bool,
}

impl JobParameter {
    pub fn identifying(value: ParameterValue) -> Self {
        Self {
            value: Some(value),
            identifying: true,
        }
    }

    pub fn non_identifying(value: ParameterValue) -> Self {
        Self {
            value: Some(value),
            identifying: false,
        }
    }
}

/// Parameters of one execution, in the order they were added or stored.
/// Setting a name that is already present replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobParameters(Vec<(String, JobParameter)>);

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, parameter: JobParameter) {
        let name = name.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = parameter,
            None => self.0.push((name, parameter)),
        }
    }

    pub fn with(mut self, name: impl Into<String>, parameter: JobParameter) -> Self {
        self.insert(name, parameter);
        self
    }

    pub fn get(&self, name: &str) -> Option<&JobParameter> {
        self.0
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, parameter)| parameter)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JobParameter)> {
        self.0.iter().map(|(name, parameter)| (name, parameter))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical text of the identifying parameters, sorted by name.
    /// Executions of the same instance share it whatever order their
    /// parameters came in.
    pub fn identifying_key(&self) -> String {
        let mut identifying: Vec<_> = self.0.iter().filter(|(_, p)| p.identifying).collect();
        identifying.sort_by(|a, b| a.0.cmp(&b.0));
        identifying
            .into_iter()
            .map(|(name, p)| {
                let value = p.value.as_ref().map(|v| v.to_text()).unwrap_or_default();
                format!("{}={};", name, value)
            })
            .collect()
    }
}

impl Serialize for JobParameters {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, parameter) in &self.0 {
            map.serialize_entry(name, parameter)?;
        }
        map.end()
    }
}

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobInstance {
    pub id: i64,
    pub name: String,
    pub version: i64,
    pub schema_target: String,
}

/// One run of a job, as stored under one schema target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionRecord {
    pub id: i64,
    pub instance_id: i64,
    pub name: String,
    pub parameters: JobParameters,
    pub create_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: BatchStatus,
    pub exit_code: String,
    pub exit_message: String,
    /// Only populated by the step-count query variants.
    pub step_count: Option<i64>,
    pub last_updated: Option<DateTime<Utc>>,
    pub version: i64,
    pub schema_target: String,
}

impl ExecutionRecord {
    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StepCounts {
    pub read_count: i64,
    pub write_count: i64,
    pub filter_count: i64,
    pub commit_count: i64,
    pub rollback_count: i64,
    pub read_skip_count: i64,
    pub write_skip_count: i64,
    pub process_skip_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepRecord {
    pub id: i64,
    pub execution_id: i64,
    pub name: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: BatchStatus,
    pub exit_code: String,
    pub exit_message: String,
    #[serde(flatten)]
    pub counts: StepCounts,
    pub last_updated: Option<DateTime<Utc>>,
    pub version: i64,
    pub schema_target: String,
}

// =============================================================================
// Queries and writes
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionFilter {
    All,
    /// Job name pattern; `*` matches any run of characters.
    Name(String),
    Status(BatchStatus),
    NameAndStatus {
        name: String,
        status: BatchStatus,
    },
    /// Start time within `[from, to]`.
    DateRange {
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    },
    InstanceId(i64),
    /// Executions linked to a parent task execution.
    TaskExecutionId(i64),
}

impl ExecutionFilter {
    /// Filters keyed by an id only make sense within a single target.
    pub fn is_keyed_by_id(&self) -> bool {
        matches!(
            self,
            ExecutionFilter::InstanceId(_) | ExecutionFilter::TaskExecutionId(_)
        )
    }
}

/// Translates a user-facing name pattern into a `LIKE` pattern.
pub fn like_pattern(pattern: &str) -> String {
    pattern.replace('*', "%")
}

/// Execution row to insert. `id` is assigned by the store when `None`.
#[derive(Debug, Clone)]
pub struct NewExecution {
    pub id: Option<i64>,
    pub instance_id: i64,
    pub parameters: JobParameters,
    pub status: BatchStatus,
    pub create_time: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_code: String,
    pub exit_message: String,
}

impl NewExecution {
    pub fn starting(instance_id: i64, parameters: JobParameters) -> Self {
        Self {
            id: None,
            instance_id,
            parameters,
            status: BatchStatus::Starting,
            create_time: Utc::now(),
            start_time: None,
            end_time: None,
            exit_code: "UNKNOWN".to_string(),
            exit_message: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewStep {
    pub id: Option<i64>,
    pub name: String,
    pub status: BatchStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub exit_code: String,
    pub exit_message: String,
    pub counts: StepCounts,
}

impl NewStep {
    pub fn started(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            status: BatchStatus::Started,
            start_time: Some(Utc::now()),
            end_time: None,
            exit_code: "EXECUTING".to_string(),
            exit_message: String::new(),
            counts: StepCounts::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_status_ordering() {
        assert!(BatchStatus::Started.is_less_than(BatchStatus::Stopping));
        assert!(BatchStatus::Completed.is_less_than(BatchStatus::Stopping));
        assert!(!BatchStatus::Stopping.is_less_than(BatchStatus::Stopping));
        assert!(!BatchStatus::Failed.is_less_than(BatchStatus::Stopping));
    }

    #[test]
    fn test_running_and_terminal_are_disjoint() {
        for status in [
            BatchStatus::Completed,
            BatchStatus::Starting,
            BatchStatus::Started,
            BatchStatus::Stopping,
            BatchStatus::Stopped,
            BatchStatus::Failed,
            BatchStatus::Abandoned,
            BatchStatus::Unknown,
        ] {
            assert!(!(status.is_running() && status.is_terminal()), "{:?}", status);
        }
        assert!(!BatchStatus::Unknown.is_running());
        assert!(!BatchStatus::Unknown.is_terminal());
    }

    #[test]
    fn test_status_from_db() {
        assert_eq!(BatchStatus::from_db(Some("started")), BatchStatus::Started);
        assert_eq!(BatchStatus::from_db(Some("PAUSED")), BatchStatus::Unknown);
        assert_eq!(BatchStatus::from_db(None), BatchStatus::Unknown);
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 2, 29, 13, 45, 0).unwrap();
        assert_eq!(parse_timestamp("2024-02-29T13:45:00.000Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-02-29T14:45:00+01:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-02-29 13:45:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-02-29 13:45:00.000"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_formatted_timestamps_sort_as_text() {
        let early = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let late = early + chrono::Duration::milliseconds(1500);
        assert!(format_timestamp(&early) < format_timestamp(&late));
        assert_eq!(format_timestamp(&early), "2024-01-01T09:00:00.000Z");
    }

    #[test]
    fn test_parameter_from_text_falls_back_to_string() {
        assert_eq!(ParameterValue::from_text("long", "42"), ParameterValue::Long(42));
        assert_eq!(ParameterValue::from_text("LONG", "4x2"), ParameterValue::String("4x2".to_string()));
        assert_eq!(
            ParameterValue::from_text("uuid", "abc"),
            ParameterValue::String("abc".to_string())
        );
        assert_eq!(ParameterValue::from_text("double", "2.5"), ParameterValue::Double(2.5));
    }

    #[test]
    fn test_identifying_key_ignores_non_identifying() {
        let params = JobParameters::new()
            .with("run", JobParameter::identifying(ParameterValue::Long(3)))
            .with("file", JobParameter::identifying(ParameterValue::String("a.csv".to_string())))
            .with("debug", JobParameter::non_identifying(ParameterValue::String("y".to_string())));
        assert_eq!(params.identifying_key(), "file=a.csv;run=3;");
    }

    #[test]
    fn test_parameters_keep_insertion_order() {
        let params = JobParameters::new()
            .with("zone", JobParameter::identifying(ParameterValue::String("eu".to_string())))
            .with("attempt", JobParameter::non_identifying(ParameterValue::Long(1)))
            .with("zone", JobParameter::identifying(ParameterValue::String("us".to_string())));
        let names: Vec<&str> = params.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(names, vec!["zone", "attempt"]);
        assert_eq!(
            params.get("zone").and_then(|p| p.value.clone()),
            Some(ParameterValue::String("us".to_string()))
        );

        let json = serde_json::to_string(&params).unwrap();
        assert!(json.find("\"zone\"").unwrap() < json.find("\"attempt\"").unwrap());
    }

    #[test]
    fn test_like_pattern() {
        assert_eq!(like_pattern("import*"), "import%");
        assert_eq!(like_pattern("*-nightly-*"), "%-nightly-%");
    }

    #[test]
    fn test_keyed_filters() {
        assert!(ExecutionFilter::InstanceId(1).is_keyed_by_id());
        assert!(ExecutionFilter::TaskExecutionId(1).is_keyed_by_id());
        assert!(!ExecutionFilter::Status(BatchStatus::Failed).is_keyed_by_id());
    }
}
