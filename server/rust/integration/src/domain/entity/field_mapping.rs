use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use super::profile::{DiscoveredRecord, Profile};
use crate::domain::error::IntegrationError;

/// ProfileField はフィールドマッピングの変換元として認識するプロフィール項目。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    ExternalId,
    Name,
    FirstName,
    LastName,
    JobTitle,
    Company,
    Location,
    ProfileUrl,
}

impl ProfileField {
    pub const ALL: [ProfileField; 8] = [
        Self::ExternalId,
        Self::Name,
        Self::FirstName,
        Self::LastName,
        Self::JobTitle,
        Self::Company,
        Self::Location,
        Self::ProfileUrl,
    ];

    pub fn value_of(self, profile: &Profile) -> Option<String> {
        let value = match self {
            Self::ExternalId => Some(profile.external_id.clone()),
            Self::Name => Some(profile.name.clone()),
            Self::FirstName => profile.first_name(),
            Self::LastName => profile.last_name(),
            Self::JobTitle => profile.job_title.clone(),
            Self::Company => profile.company.clone(),
            Self::Location => profile.location.clone(),
            Self::ProfileUrl => profile.profile_url.clone(),
        };
        value.filter(|v| !v.trim().is_empty())
    }
}

/// TargetRecord は CRM 側スキーマに変換済みのレコード（フィールド名 → 値）。
pub type TargetRecord = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldMappingEntry {
    pub source_field: ProfileField,
    pub target_field: String,
    #[serde(default)]
    pub is_required: bool,
}

/// FieldMapping は順序付きの (変換元 → 変換先, 必須) 対応表と、重複判定に使う自然キー。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldMapping {
    pub fields: Vec<FieldMappingEntry>,
    /// 既存 CRM レコードとの突合に使う変換先フィールド名。
    pub match_field: String,
}

fn entry(source_field: ProfileField, target_field: &str, is_required: bool) -> FieldMappingEntry {
    FieldMappingEntry {
        source_field,
        target_field: target_field.to_string(),
        is_required,
    }
}

/// json_to_string は CRM から返るスカラー値を文字列に揃える。
pub fn json_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()).filter(|s| !s.trim().is_empty()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

impl FieldMapping {
    pub fn salesforce_default() -> Self {
        Self {
            fields: vec![
                entry(ProfileField::FirstName, "FirstName", false),
                entry(ProfileField::LastName, "LastName", true),
                entry(ProfileField::JobTitle, "Title", false),
                entry(ProfileField::Company, "Company", true),
                entry(ProfileField::Location, "City", false),
                entry(ProfileField::ProfileUrl, "LinkedIn_Profile_URL__c", false),
            ],
            match_field: "LinkedIn_Profile_URL__c".to_string(),
        }
    }

    pub fn hubspot_default() -> Self {
        Self {
            fields: vec![
                entry(ProfileField::FirstName, "firstname", false),
                entry(ProfileField::LastName, "lastname", true),
                entry(ProfileField::JobTitle, "jobtitle", false),
                entry(ProfileField::Company, "company", false),
                entry(ProfileField::Location, "city", false),
                entry(ProfileField::ProfileUrl, "linkedin_profile_url", false),
            ],
            match_field: "linkedin_profile_url".to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), IntegrationError> {
        if self.fields.is_empty() {
            return Err(IntegrationError::validation(
                "field mapping must contain at least one entry",
            ));
        }
        let mut seen = HashSet::new();
        for e in &self.fields {
            let target = e.target_field.trim();
            if target.is_empty() {
                return Err(IntegrationError::validation("target_field must not be empty"));
            }
            if !seen.insert(target) {
                return Err(IntegrationError::validation(format!(
                    "target_field {target} is mapped more than once"
                )));
            }
        }
        if !seen.contains(self.match_field.trim()) {
            return Err(IntegrationError::validation(format!(
                "match_field {} must be one of the mapped target fields",
                self.match_field
            )));
        }
        Ok(())
    }

    /// resolve はプロフィールを変換先スキーマのレコードへ変換する。
    /// 必須フィールドの値が空の場合はそのフィールド名を含むエラー文を返す。
    pub fn resolve(&self, profile: &Profile) -> Result<TargetRecord, String> {
        let mut record = TargetRecord::new();
        for e in &self.fields {
            match e.source_field.value_of(profile) {
                Some(value) => {
                    record.insert(e.target_field.clone(), value);
                }
                None if e.is_required => {
                    return Err(format!(
                        "required field {} (from {:?}) is empty",
                        e.target_field, e.source_field
                    ));
                }
                None => {}
            }
        }
        Ok(record)
    }

    pub fn match_key<'a>(&self, record: &'a TargetRecord) -> Option<&'a String> {
        record.get(&self.match_field)
    }

    /// reverse は CRM レコードのフィールドを対応表の逆方向に辿り、観測値へ変換する。
    /// 名前が得られないレコードは None を返す。
    pub fn reverse(
        &self,
        external_id: String,
        fields: &BTreeMap<String, serde_json::Value>,
    ) -> Option<DiscoveredRecord> {
        let mut name = None;
        let mut first = None;
        let mut last = None;
        let mut record = DiscoveredRecord {
            external_id,
            name: String::new(),
            job_title: None,
            company: None,
            location: None,
            profile_url: None,
            image_url: None,
        };
        for e in &self.fields {
            let Some(value) = fields.get(&e.target_field).and_then(json_to_string) else {
                continue;
            };
            match e.source_field {
                ProfileField::Name => name = Some(value),
                ProfileField::FirstName => first = Some(value),
                ProfileField::LastName => last = Some(value),
                ProfileField::JobTitle => record.job_title = Some(value),
                ProfileField::Company => record.company = Some(value),
                ProfileField::Location => record.location = Some(value),
                ProfileField::ProfileUrl => record.profile_url = Some(value),
                ProfileField::ExternalId => {}
            }
        }
        record.name = match (name, first, last) {
            (Some(n), _, _) => n,
            (None, Some(f), Some(l)) => format!("{f} {l}"),
            (None, Some(part), None) | (None, None, Some(part)) => part,
            (None, None, None) => return None,
        };
        Some(record.normalized())
    }
}

/// non_destructive_patch は既存 CRM レコードに対する差分を返す。
/// 空の変換元値で既存値を消すことはなく、値が変わらないフィールドも含めない。
pub fn non_destructive_patch(
    resolved: &TargetRecord,
    existing: &BTreeMap<String, serde_json::Value>,
) -> TargetRecord {
    resolved
        .iter()
        .filter(|(_, v)| !v.trim().is_empty())
        .filter(|(k, v)| existing.get(*k).and_then(json_to_string).as_deref() != Some(v.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn profile() -> Profile {
        Profile::from_record(
            Uuid::new_v4(),
            DiscoveredRecord {
                external_id: "li-1".into(),
                name: "Grace Hopper".into(),
                job_title: Some("Rear Admiral".into()),
                company: Some("US Navy".into()),
                location: None,
                profile_url: Some("https://www.linkedin.com/in/grace".into()),
                image_url: None,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(FieldMapping::salesforce_default().validate().is_ok());
        assert!(FieldMapping::hubspot_default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_match_field_outside_table() {
        let mut m = FieldMapping::hubspot_default();
        m.match_field = "email".into();
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_target() {
        let mut m = FieldMapping::hubspot_default();
        m.fields.push(entry(ProfileField::Name, "firstname", false));
        assert!(m.validate().is_err());
    }

    #[test]
    fn test_resolve_skips_empty_optional_fields() {
        let record = FieldMapping::salesforce_default().resolve(&profile()).unwrap();
        assert_eq!(record.get("FirstName").map(String::as_str), Some("Grace"));
        assert_eq!(record.get("LastName").map(String::as_str), Some("Hopper"));
        assert!(!record.contains_key("City"));
    }

    #[test]
    fn test_resolve_fails_on_missing_required() {
        let mut p = profile();
        p.company = None;
        let err = FieldMapping::salesforce_default().resolve(&p).unwrap_err();
        assert!(err.contains("Company"));
    }

    #[test]
    fn test_patch_never_clears_populated_target() {
        let resolved: TargetRecord = [
            ("firstname".to_string(), "Grace".to_string()),
            ("jobtitle".to_string(), "Admiral".to_string()),
        ]
        .into_iter()
        .collect();
        let existing: BTreeMap<String, serde_json::Value> = [
            ("firstname".to_string(), serde_json::json!("Grace")),
            ("city".to_string(), serde_json::json!("Arlington")),
            ("jobtitle".to_string(), serde_json::json!("Rear Admiral")),
        ]
        .into_iter()
        .collect();

        let patch = non_destructive_patch(&resolved, &existing);
        assert_eq!(patch.len(), 1);
        assert_eq!(patch.get("jobtitle").map(String::as_str), Some("Admiral"));
    }

    #[test]
    fn test_reverse_composes_name() {
        let fields: BTreeMap<String, serde_json::Value> = [
            ("firstname".to_string(), serde_json::json!("Alan")),
            ("lastname".to_string(), serde_json::json!("Turing")),
            ("company".to_string(), serde_json::json!("Bletchley Park")),
        ]
        .into_iter()
        .collect();
        let record = FieldMapping::hubspot_default()
            .reverse("HUBSPOT:42".into(), &fields)
            .unwrap();
        assert_eq!(record.name, "Alan Turing");
        assert_eq!(record.company.as_deref(), Some("Bletchley Park"));
    }

    #[test]
    fn test_reverse_without_name_is_none() {
        let fields: BTreeMap<String, serde_json::Value> =
            [("company".to_string(), serde_json::json!("Acme"))].into_iter().collect();
        assert!(FieldMapping::hubspot_default()
            .reverse("HUBSPOT:1".into(), &fields)
            .is_none());
    }
}
