//! Engine version descriptor (`Engine/Build/Build.version`) parsing.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineVersion {
    #[serde(rename = "MajorVersion")]
    pub major: u32,
    #[serde(rename = "MinorVersion")]
    pub minor: u32,
    #[serde(rename = "PatchVersion", default)]
    pub patch: u32,
    #[serde(rename = "BranchName", default)]
    pub branch: String,
}

impl EngineVersion {
    /// Parse descriptor JSON. Unknown keys such as `Changelist` are ignored.
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_descriptor() {
        let raw = r#"{
            "MajorVersion": 5,
            "MinorVersion": 3,
            "PatchVersion": 1,
            "Changelist": 0,
            "CompatibleChangelist": 27405482,
            "IsLicenseeVersion": 0,
            "IsPromotedBuild": 1,
            "BranchName": "++UE5+Release-5.3"
        }"#;
        let version = EngineVersion::parse(raw).expect("version");
        assert_eq!(version.to_string(), "5.3.1");
        assert_eq!(version.branch, "++UE5+Release-5.3");
    }

    #[test]
    fn missing_patch_and_branch_default() {
        let version = EngineVersion::parse(r#"{"MajorVersion":4,"MinorVersion":27}"#)
            .expect("version");
        assert_eq!(version.to_string(), "4.27.0");
        assert!(version.branch.is_empty());
    }

    #[test]
    fn malformed_descriptor_is_none() {
        assert_eq!(EngineVersion::parse("not json"), None);
        assert_eq!(EngineVersion::parse(r#"{"MinorVersion":1}"#), None);
    }
}
