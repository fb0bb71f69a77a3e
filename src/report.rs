use std::fmt::Write;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::classify;
use crate::models::{ClassifiedRecord, DecodedMetadata, RecordTypeSummary, UiCategory};

pub fn summarize_by_type(records: &[ClassifiedRecord]) -> Vec<RecordTypeSummary> {
    let mut map: std::collections::HashMap<String, usize> = std::collections::HashMap::new();

    for record in records {
        *map.entry(record.source_type.clone()).or_insert(0) += 1;
    }

    let mut summaries: Vec<RecordTypeSummary> = map
        .into_iter()
        .map(|(source_type, count)| RecordTypeSummary {
            category: classify::category_for(&source_type),
            source_type,
            count,
        })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count).then(a.source_type.cmp(&b.source_type)));
    summaries
}

pub fn build_report(
    owner: Option<&str>,
    generated_at: DateTime<Utc>,
    records: &[ClassifiedRecord],
) -> String {
    let summaries = summarize_by_type(records);

    let mut output = String::new();
    let owner_label = owner.unwrap_or("사용자");

    let _ = writeln!(output, "# Fortune Record Report");
    let _ = writeln!(
        output,
        "Generated for {}님 at {}",
        owner_label,
        generated_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Record Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No records found.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {} ({}): {} records",
                summary.source_type,
                summary.category.label(),
                summary.count
            );
        }
    }

    for tab in [UiCategory::Compat, UiCategory::Future, UiCategory::Relation] {
        let matching = classify::filter_by_category(records, tab);
        let _ = writeln!(output);
        let _ = writeln!(output, "## {}", tab.label());

        if matching.is_empty() {
            let _ = writeln!(output, "No records in this category.");
        } else {
            for record in matching {
                let _ = write!(
                    output,
                    "- {} on {}",
                    record.title,
                    record.created_at.format("%Y-%m-%d")
                );
                match spouse_traits(record) {
                    Some(traits) => {
                        let _ = writeln!(output, " ({traits})");
                    }
                    None => {
                        let _ = writeln!(output);
                    }
                }
            }
        }
    }

    let mut recent: Vec<&ClassifiedRecord> = records.iter().collect();
    recent.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Records");

    if recent.is_empty() {
        let _ = writeln!(output, "No records found.");
    } else {
        for record in recent.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} ({}) on {}",
                record.title,
                record.source_type,
                record.created_at.format("%Y-%m-%d")
            );
        }
    }

    output
}

fn spouse_traits(record: &ClassifiedRecord) -> Option<String> {
    let Some(DecodedMetadata::AiSpouse { fields, .. }) = &record.metadata else {
        return None;
    };
    let mut traits: Vec<&str> = [&fields.impression, &fields.mood, &fields.fashion, &fields.job]
        .into_iter()
        .flatten()
        .map(String::as_str)
        .collect();
    if fields.image_url.is_some() {
        traits.push("image");
    }
    (!traits.is_empty()).then(|| traits.join(", "))
}

#[derive(serde::Serialize)]
struct CsvRow<'a> {
    id: String,
    category: UiCategory,
    source_type: &'a str,
    title: &'a str,
    created_at: String,
    metadata: String,
}

pub fn write_csv(records: &[ClassifiedRecord], path: &Path) -> anyhow::Result<usize> {
    let mut writer = csv::Writer::from_path(path)?;
    write_rows(&mut writer, records)?;
    writer.flush()?;
    Ok(records.len())
}

fn write_rows<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    records: &[ClassifiedRecord],
) -> anyhow::Result<()> {
    for record in records {
        let metadata = match &record.metadata {
            Some(metadata) => serde_json::to_string(metadata)?,
            None => String::new(),
        };
        writer.serialize(CsvRow {
            id: match &record.id {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            category: record.ui_category,
            source_type: &record.source_type,
            title: &record.title,
            created_at: record.created_at.to_rfc3339(),
            metadata,
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    use crate::models::RawRecord;

    fn records() -> Vec<ClassifiedRecord> {
        let base = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let raw = |id: i64, record_type: &str, content: &str, metadata, days: i64| RawRecord {
            id: json!(id),
            record_type: record_type.to_string(),
            content: content.to_string(),
            created_at: base + Duration::days(days),
            metadata,
            image_url: None,
        };

        classify::classify(&[
            raw(
                1,
                "compatibility",
                "",
                Some(json!({ "score": 87.4, "user2_name": "윤성연" })),
                0,
            ),
            raw(2, "ai_spouse", "", None, 2),
            raw(3, "memo", "오늘의 메모", None, 1),
            raw(4, "ai_spouse", "", None, 3),
        ])
    }

    #[test]
    fn summaries_count_by_source_type() {
        let summaries = summarize_by_type(&records());
        assert_eq!(summaries[0].source_type, "ai_spouse");
        assert_eq!(summaries[0].count, 2);
        assert_eq!(summaries[0].category, UiCategory::Future);
        assert_eq!(summaries.len(), 3);
    }

    #[test]
    fn report_lists_categories_and_recent_records() {
        let generated = Utc.with_ymd_and_hms(2026, 3, 5, 9, 30, 0).unwrap();
        let report = build_report(Some("김하늘"), generated, &records());

        assert!(report.contains("Generated for 김하늘님 at 2026-03-05 09:30 UTC"));
        assert!(report.contains("- ai_spouse (미래 배우자): 2 records"));
        assert!(report.contains("## 궁합\n- 윤성님 궁합 87점 on 2026-03-01"));
        assert!(report.contains("## 관계\nNo records in this category."));
        let recent = report.split("## Recent Records").nth(1).unwrap();
        assert!(recent.trim_start().starts_with("- 나의 미래 배우자 (ai_spouse) on 2026-03-04"));
    }

    #[test]
    fn empty_report_says_so() {
        let report = build_report(None, Utc::now(), &[]);
        assert!(report.contains("Generated for 사용자님"));
        assert!(report.contains("No records found."));
    }

    #[test]
    fn spouse_sections_list_traits() {
        let record = RawRecord {
            id: json!(7),
            record_type: "ai_spouse".to_string(),
            content: String::new(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap(),
            metadata: Some(json!({
                "impression": ["warm"],
                "mood": null,
                "job": ["teacher"],
                "image_url": "https://img.test/a.png"
            })),
            image_url: None,
        };
        let report = build_report(None, Utc::now(), &classify::classify(&[record]));
        assert!(report.contains("## 미래 배우자\n- 나의 미래 배우자 on 2026-03-02 (warm, teacher, image)"));
    }

    #[test]
    fn csv_rows_carry_classification() {
        let mut writer = csv::Writer::from_writer(Vec::new());
        write_rows(&mut writer, &records()).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();
        let mut lines = text.lines();

        assert_eq!(
            lines.next(),
            Some("id,category,source_type,title,created_at,metadata")
        );
        let first = lines.next().unwrap();
        assert!(first.starts_with("1,compat,compatibility,윤성님 궁합 87점,2026-03-01T12:00:00+00:00,"));
        assert!(first.contains("user2_name"));
        assert_eq!(text.lines().count(), 5);
    }

    #[test]
    fn csv_file_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.csv");
        let written = write_csv(&records(), &path).unwrap();
        assert_eq!(written, 4);
        assert!(std::fs::read_to_string(&path).unwrap().contains("memo"));
    }
}
