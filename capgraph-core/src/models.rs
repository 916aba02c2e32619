use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Returned when a metadata value names no known variant
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownValue {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownValue {
    fn new(kind: &'static str, value: &str) -> Self {
        UnknownValue {
            kind,
            value: value.trim().to_string(),
        }
    }
}

/// Kind of specification document
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum DocumentType {
    Capability,
    Enabler,
}

impl DocumentType {
    /// File name suffix used for documents of this type
    pub fn file_suffix(&self) -> &'static str {
        match self {
            DocumentType::Capability => "-capability.md",
            DocumentType::Enabler => "-enabler.md",
        }
    }

    pub fn id_prefix(&self) -> IdPrefix {
        match self {
            DocumentType::Capability => IdPrefix::Capability,
            DocumentType::Enabler => IdPrefix::Enabler,
        }
    }
}

/// Parses the `Type` metadata value
impl FromStr for DocumentType {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "capability" => Ok(DocumentType::Capability),
            "enabler" => Ok(DocumentType::Enabler),
            _ => Err(UnknownValue::new("document type", s)),
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentType::Capability => write!(f, "Capability"),
            DocumentType::Enabler => write!(f, "Enabler"),
        }
    }
}

/// Identifier prefixes known to the allocator
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum IdPrefix {
    Capability,
    Enabler,
    FunctionalRequirement,
    NonFunctionalRequirement,
}

impl IdPrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdPrefix::Capability => "CAP-",
            IdPrefix::Enabler => "ENB-",
            IdPrefix::FunctionalRequirement => "FR-",
            IdPrefix::NonFunctionalRequirement => "NFR-",
        }
    }

    pub fn format(&self, number: u64) -> String {
        format!("{}{:06}", self.as_str(), number)
    }
}

/// Accepts "CAP-", "CAP" or "cap"
impl FromStr for IdPrefix {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_end_matches('-').to_uppercase().as_str() {
            "CAP" => Ok(IdPrefix::Capability),
            "ENB" => Ok(IdPrefix::Enabler),
            "FR" => Ok(IdPrefix::FunctionalRequirement),
            "NFR" => Ok(IdPrefix::NonFunctionalRequirement),
            _ => Err(UnknownValue::new("id prefix", s)),
        }
    }
}

impl fmt::Display for IdPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Strips the `CAP-`/`ENB-`/`FR-`/`NFR-` prefix, leaving the numeric part
pub fn numeric_suffix(id: &str) -> &str {
    id.split_once('-').map(|(_, rest)| rest).unwrap_or(id)
}

/// Approval state of a capability, enabler or requirement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Approval {
    NotApproved,
    Pending,
    Approved,
}

impl fmt::Display for Approval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Approval::NotApproved => write!(f, "Not Approved"),
            Approval::Pending => write!(f, "Pending"),
            Approval::Approved => write!(f, "Approved"),
        }
    }
}

impl FromStr for Approval {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace(['-', '_'], " ").as_str() {
            "not approved" | "notapproved" => Ok(Approval::NotApproved),
            "pending" => Ok(Approval::Pending),
            "approved" => Ok(Approval::Approved),
            _ => Err(UnknownValue::new("approval", s)),
        }
    }
}

/// Priority of a capability, enabler or requirement
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "High"),
            Priority::Medium => write!(f, "Medium"),
            Priority::Low => write!(f, "Low"),
        }
    }
}

impl FromStr for Priority {
    type Err = UnknownValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            _ => Err(UnknownValue::new("priority", s)),
        }
    }
}

/// Row of a capability's `## Enablers` table
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnablerRef {
    pub id: String,
    pub description: String,
}

/// Reference from one capability to another
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dependency {
    pub capability_id: String,
    pub description: String,
}

impl Dependency {
    pub fn new(capability_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            capability_id: capability_id.into(),
            description: description.into(),
        }
    }
}

/// Top-level specification entity
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capability {
    /// `CAP-NNNNNN`
    pub id: String,
    pub name: String,
    pub status: String,
    pub approval: String,
    pub priority: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    pub owner: String,
    pub enablers: Vec<EnablerRef>,
    pub upstream_deps: Vec<Dependency>,
    pub downstream_deps: Vec<Dependency>,
    /// Free text under `### External Upstream Dependencies`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub external_upstream: String,
    /// Free text under `### External Downstream Impact`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub external_downstream: String,
}

impl Capability {
    pub fn enabler_ids(&self) -> impl Iterator<Item = &str> {
        self.enablers.iter().map(|e| e.id.as_str())
    }

    pub fn has_enabler(&self, enabler_id: &str) -> bool {
        self.enablers.iter().any(|e| e.id == enabler_id)
    }
}

/// Functional or non-functional requirement embedded in an enabler
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requirement {
    /// `FR-NNNNNN` or `NFR-NNNNNN`
    pub id: String,
    pub name: String,
    pub requirement: String,
    pub priority: String,
    pub status: String,
    pub approval: String,
    /// Non-functional requirements only (Performance, Security, ...)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub req_type: Option<String>,
}

/// Child specification entity implementing part of a capability
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Enabler {
    /// `ENB-NNNNNN`
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: String,
    pub approval: String,
    pub priority: String,
    /// Owning capability, if parented
    pub capability_id: Option<String>,
    pub functional_requirements: Vec<Requirement>,
    pub non_functional_requirements: Vec<Requirement>,
}

/// Result of parsing a document of a declared type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ParsedDocument {
    Capability(Capability),
    Enabler(Enabler),
}

impl ParsedDocument {
    pub fn id(&self) -> &str {
        match self {
            ParsedDocument::Capability(c) => &c.id,
            ParsedDocument::Enabler(e) => &e.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_prefix_from_str() {
        assert_eq!("CAP-".parse(), Ok(IdPrefix::Capability));
        assert_eq!("enb".parse(), Ok(IdPrefix::Enabler));
        assert_eq!("NFR-".parse(), Ok(IdPrefix::NonFunctionalRequirement));

        let err = "SPEC-".parse::<IdPrefix>().unwrap_err();
        assert_eq!(err.to_string(), "unknown id prefix 'SPEC-'");
    }

    #[test]
    fn test_id_prefix_format_pads_to_six_digits() {
        assert_eq!(IdPrefix::Capability.format(42), "CAP-000042");
        assert_eq!(IdPrefix::Enabler.format(1_000_000), "ENB-1000000");
    }

    #[test]
    fn test_numeric_suffix() {
        assert_eq!(numeric_suffix("CAP-001234"), "001234");
        assert_eq!(numeric_suffix("NFR-7"), "7");
        assert_eq!(numeric_suffix("plain"), "plain");
    }

    #[test]
    fn test_approval_round_trip_through_display() {
        for approval in [Approval::NotApproved, Approval::Pending, Approval::Approved] {
            assert_eq!(approval.to_string().parse(), Ok(approval));
        }
    }

    #[test]
    fn test_priority_parse_ignores_case() {
        assert_eq!(" HIGH ".parse(), Ok(Priority::High));
        assert_eq!("low".parse(), Ok(Priority::Low));
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_document_type_parse() {
        assert_eq!("Capability".parse(), Ok(DocumentType::Capability));
        assert_eq!("enabler".parse(), Ok(DocumentType::Enabler));
        assert!("plan".parse::<DocumentType>().is_err());
    }
}
