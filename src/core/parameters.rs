use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::BatchError;

/// Typed value of a job parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    String(String),
    Long(i64),
    Double(f64),
    Date(DateTime<Utc>),
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::String(value) => write!(f, "{}", value),
            ParameterValue::Long(value) => write!(f, "{}", value),
            ParameterValue::Double(value) => write!(f, "{}", value),
            ParameterValue::Date(value) => write!(f, "{}", value.to_rfc3339()),
        }
    }
}

/// A single job parameter: a typed value flagged identifying or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    value: ParameterValue,
    identifying: bool,
}

impl JobParameter {
    pub fn new(value: ParameterValue, identifying: bool) -> Self {
        Self { value, identifying }
    }

    pub fn value(&self) -> &ParameterValue {
        &self.value
    }

    pub fn is_identifying(&self) -> bool {
        self.identifying
    }
}

/// Ordered set of parameters given to a job launch.
///
/// Only identifying parameters take part in [`JobParameters::identifying_key`],
/// which is what distinguishes one job instance from another.
///
/// # Examples
///
/// ```
/// use resumable_batch::core::parameters::JobParametersBuilder;
///
/// let first = JobParametersBuilder::new()
///     .add_string("input", "customers.csv")
///     .add_long_non_identifying("run", 1)
///     .build();
/// let second = JobParametersBuilder::new()
///     .add_string("input", "customers.csv")
///     .add_long_non_identifying("run", 2)
///     .build();
///
/// assert_ne!(first, second);
/// assert_eq!(first.identifying_key(), second.identifying_key());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobParameters {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses parameters from `name(type)=value` strings.
    ///
    /// The type is one of `string`, `long`, `double` or `date` and defaults to
    /// `string` when omitted. Dates use the `YYYY-MM-DD` or RFC 3339 format.
    /// A leading `-` on the name marks the parameter non-identifying.
    ///
    /// ```
    /// use resumable_batch::core::parameters::{JobParameters, ParameterValue};
    ///
    /// let parameters = JobParameters::from_properties(&["input=data.txt", "-retries(long)=3"]).unwrap();
    /// assert_eq!(parameters.get_string("input"), Some("data.txt"));
    /// assert_eq!(parameters.get_long("retries"), Some(3));
    /// assert!(!parameters.get("retries").unwrap().is_identifying());
    /// ```
    pub fn from_properties(properties: &[&str]) -> Result<Self, BatchError> {
        let mut parameters = JobParameters::new();
        for property in properties {
            let (name, parameter) = parse_property(property)?;
            parameters.parameters.insert(name, parameter);
        }
        Ok(parameters)
    }

    pub fn get(&self, name: &str) -> Option<&JobParameter> {
        self.parameters.get(name)
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        match self.get(name).map(JobParameter::value) {
            Some(ParameterValue::String(value)) => Some(value),
            _ => None,
        }
    }

    pub fn get_long(&self, name: &str) -> Option<i64> {
        match self.get(name).map(JobParameter::value) {
            Some(ParameterValue::Long(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_double(&self, name: &str) -> Option<f64> {
        match self.get(name).map(JobParameter::value) {
            Some(ParameterValue::Double(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn get_date(&self, name: &str) -> Option<DateTime<Utc>> {
        match self.get(name).map(JobParameter::value) {
            Some(ParameterValue::Date(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &JobParameter)> {
        self.parameters.iter()
    }

    /// Returns the identifying parameters only.
    pub fn identifying_parameters(&self) -> JobParameters {
        JobParameters {
            parameters: self
                .parameters
                .iter()
                .filter(|(_, parameter)| parameter.identifying)
                .map(|(name, parameter)| (name.clone(), parameter.clone()))
                .collect(),
        }
    }

    /// Stable string built from the identifying parameters, sorted by name.
    pub fn identifying_key(&self) -> String {
        self.parameters
            .iter()
            .filter(|(_, parameter)| parameter.identifying)
            .map(|(name, parameter)| format!("{}={};", name, parameter.value))
            .collect()
    }
}

fn parse_property(property: &str) -> Result<(String, JobParameter), BatchError> {
    let (key, raw_value) = property.split_once('=').ok_or_else(|| {
        BatchError::Configuration(format!("job parameter '{}' is not of the form name=value", property))
    })?;

    let (key, identifying) = match key.strip_prefix('-') {
        Some(stripped) => (stripped, false),
        None => (key, true),
    };

    let (name, type_name) = match key.split_once('(') {
        Some((name, rest)) => {
            let type_name = rest.strip_suffix(')').ok_or_else(|| {
                BatchError::Configuration(format!("unterminated type in job parameter '{}'", property))
            })?;
            (name, type_name)
        }
        None => (key, "string"),
    };

    if name.is_empty() {
        return Err(BatchError::Configuration(format!(
            "job parameter '{}' has an empty name",
            property
        )));
    }

    let invalid = |error: String| {
        BatchError::Configuration(format!("invalid value for job parameter '{}': {}", name, error))
    };

    let value = match type_name.to_ascii_lowercase().as_str() {
        "string" => ParameterValue::String(raw_value.to_string()),
        "long" => ParameterValue::Long(raw_value.parse().map_err(|e| invalid(format!("{}", e)))?),
        "double" => ParameterValue::Double(raw_value.parse().map_err(|e| invalid(format!("{}", e)))?),
        "date" => ParameterValue::Date(parse_date(raw_value).map_err(invalid)?),
        other => {
            return Err(BatchError::Configuration(format!(
                "unknown type '{}' for job parameter '{}'",
                other, name
            )));
        }
    };

    Ok((name.to_string(), JobParameter::new(value, identifying)))
}

fn parse_date(raw_value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(date_time) = DateTime::parse_from_rfc3339(raw_value) {
        return Ok(date_time.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw_value, "%Y-%m-%d")
        .map_err(|e| e.to_string())?
        .and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("'{}' is not a valid date", raw_value))
}

/// Fluent builder for [`JobParameters`].
#[derive(Default)]
pub struct JobParametersBuilder {
    parameters: BTreeMap<String, JobParameter>,
}

impl JobParametersBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_parameter(mut self, name: &str, parameter: JobParameter) -> Self {
        self.parameters.insert(name.to_string(), parameter);
        self
    }

    pub fn add_string(self, name: &str, value: &str) -> Self {
        self.add_parameter(name, JobParameter::new(ParameterValue::String(value.to_string()), true))
    }

    pub fn add_long(self, name: &str, value: i64) -> Self {
        self.add_parameter(name, JobParameter::new(ParameterValue::Long(value), true))
    }

    pub fn add_long_non_identifying(self, name: &str, value: i64) -> Self {
        self.add_parameter(name, JobParameter::new(ParameterValue::Long(value), false))
    }

    pub fn add_double(self, name: &str, value: f64) -> Self {
        self.add_parameter(name, JobParameter::new(ParameterValue::Double(value), true))
    }

    pub fn add_date(self, name: &str, value: DateTime<Utc>) -> Self {
        self.add_parameter(name, JobParameter::new(ParameterValue::Date(value), true))
    }

    pub fn build(self) -> JobParameters {
        JobParameters {
            parameters: self.parameters,
        }
    }
}
