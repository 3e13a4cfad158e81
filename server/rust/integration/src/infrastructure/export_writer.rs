use rust_xlsxwriter::{Format, Workbook};
use serde::Deserialize;
use uuid::Uuid;

use crate::domain::entity::profile::Profile;

const HEADERS: [&str; 8] = [
    "External ID",
    "Name",
    "Job Title",
    "Company",
    "Location",
    "Profile URL",
    "Last Seen",
    "Status",
];

/// ExportFormat はマッピングのエクスポート形式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Xlsx,
    Csv,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Xlsx => "xlsx",
            Self::Csv => "csv",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Csv => "text/csv; charset=utf-8",
        }
    }
}

/// ExportArtifact はダウンロード用に生成したファイル。
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

fn row(profile: &Profile) -> [String; 8] {
    [
        profile.external_id.clone(),
        profile.name.clone(),
        profile.job_title.clone().unwrap_or_default(),
        profile.company.clone().unwrap_or_default(),
        profile.location.clone().unwrap_or_default(),
        profile.profile_url.clone().unwrap_or_default(),
        profile.last_seen_at.to_rfc3339(),
        if profile.is_active() {
            "Active".to_string()
        } else {
            "Departed".to_string()
        },
    ]
}

/// render はプロフィール一覧を指定形式のファイルに書き出す。
pub fn render(
    mapping_id: Uuid,
    profiles: &[Profile],
    format: ExportFormat,
) -> anyhow::Result<ExportArtifact> {
    let bytes = match format {
        ExportFormat::Csv => render_csv(profiles)?,
        ExportFormat::Xlsx => render_xlsx(profiles)?,
    };
    Ok(ExportArtifact {
        file_name: format!("mapping-{}.{}", mapping_id, format.extension()),
        content_type: format.content_type(),
        bytes,
    })
}

fn render_csv(profiles: &[Profile]) -> anyhow::Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(HEADERS)
        .map_err(|e| anyhow::anyhow!("CSV write error: {e}"))?;
    for profile in profiles {
        writer
            .write_record(row(profile))
            .map_err(|e| anyhow::anyhow!("CSV write error: {e}"))?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("CSV flush error: {e}"))
}

fn render_xlsx(profiles: &[Profile]) -> anyhow::Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Profiles")?;

    for (col, title) in (0u16..).zip(HEADERS) {
        sheet.write_string_with_format(0, col, title, &header)?;
    }
    for (r, profile) in (1u32..).zip(profiles) {
        for (col, value) in (0u16..).zip(row(profile)) {
            sheet.write_string(r, col, value)?;
        }
    }

    Ok(workbook.save_to_buffer()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entity::profile::DiscoveredRecord;
    use chrono::Utc;

    fn profile(external_id: &str, name: &str) -> Profile {
        Profile::from_record(
            Uuid::new_v4(),
            DiscoveredRecord {
                external_id: external_id.into(),
                name: name.into(),
                job_title: Some("Engineer".into()),
                company: Some("Acme, Inc.".into()),
                location: None,
                profile_url: Some(format!("https://www.linkedin.com/in/{external_id}")),
                image_url: None,
            },
            Utc::now(),
        )
    }

    #[test]
    fn test_csv_export_has_header_and_status() {
        let mut departed = profile("b", "Bob Stone");
        departed.mark_departed(Utc::now());
        let id = Uuid::new_v4();

        let artifact = render(id, &[profile("a", "Ada Park"), departed], ExportFormat::Csv).unwrap();
        assert_eq!(artifact.file_name, format!("mapping-{id}.csv"));
        assert!(artifact.content_type.starts_with("text/csv"));

        let text = String::from_utf8(artifact.bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("External ID,Name,Job Title"));
        assert!(lines[1].contains("\"Acme, Inc.\""));
        assert!(lines[1].ends_with("Active"));
        assert!(lines[2].ends_with("Departed"));
    }

    #[test]
    fn test_xlsx_export_is_zip_container() {
        let artifact = render(Uuid::new_v4(), &[profile("a", "Ada")], ExportFormat::Xlsx).unwrap();
        assert!(artifact.file_name.ends_with(".xlsx"));
        assert_eq!(&artifact.bytes[..2], b"PK");
    }

    #[test]
    fn test_format_parses_lowercase() {
        let f: ExportFormat = serde_json::from_value(serde_json::json!("xlsx")).unwrap();
        assert_eq!(f, ExportFormat::Xlsx);
        assert!(serde_json::from_value::<ExportFormat>(serde_json::json!("pdf")).is_err());
    }
}
