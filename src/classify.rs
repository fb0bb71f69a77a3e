use serde_json::Value;
use tracing::debug;

use crate::models::{
    ClassifiedRecord, CompatibilityMetadata, CompatibilitySummary, DecodedMetadata,
    DispatchTarget, RawRecord, SpouseMetadata, UiCategory, DEFAULT_COUNTERPART_NAME,
};

pub const COMPATIBILITY: &str = "compatibility";
pub const AI_SPOUSE: &str = "ai_spouse";
pub const TODAY_FORTUNE: &str = "today_fortune";
pub const SIMILAR_FRIEND: &str = "similar_friend";

const TITLE_MAX_CHARS: usize = 15;
const SHORT_NAME_CHARS: usize = 2;
/// Title for a compatibility record whose metadata carries no usable score.
const UNTITLED_RECORD: &str = "기록";

/// Classifies records in input order, dropping compatibility entries that
/// name no real counterpart. Never fails.
pub fn classify(records: &[RawRecord]) -> Vec<ClassifiedRecord> {
    records.iter().filter_map(classify_one).collect()
}

fn classify_one(record: &RawRecord) -> Option<ClassifiedRecord> {
    let metadata = decode_metadata(record);

    if let Some(DecodedMetadata::Compatibility { fields, .. }) = &metadata {
        if !has_named_counterpart(fields) {
            debug!(id = %record.id, "dropping compatibility record without counterpart");
            return None;
        }
    }

    Some(ClassifiedRecord {
        id: record.id.clone(),
        ui_category: category_for(&record.record_type),
        title: title_for(record, metadata.as_ref()),
        created_at: record.created_at,
        metadata,
        source_type: record.record_type.clone(),
        raw: record.clone(),
    })
}

pub fn category_for(record_type: &str) -> UiCategory {
    match record_type {
        COMPATIBILITY => UiCategory::Compat,
        AI_SPOUSE => UiCategory::Future,
        TODAY_FORTUNE | SIMILAR_FRIEND => UiCategory::Relation,
        _ => UiCategory::All,
    }
}

/// String metadata is JSON-decoded; unparseable text becomes `None`. Typed
/// views are read field by field and the decoded JSON is kept as is.
pub fn decode_metadata(record: &RawRecord) -> Option<DecodedMetadata> {
    let value = match record.metadata.as_ref()? {
        Value::Null => return None,
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(value) => value,
            Err(err) => {
                debug!(id = %record.id, "unparseable record metadata: {}", err);
                return None;
            }
        },
        other => other.clone(),
    };
    if value.is_null() {
        return None;
    }

    Some(match record.record_type.as_str() {
        COMPATIBILITY => DecodedMetadata::Compatibility {
            fields: CompatibilityMetadata::from_value(&value),
            value,
        },
        AI_SPOUSE => DecodedMetadata::AiSpouse {
            fields: SpouseMetadata::from_value(&value),
            value,
        },
        TODAY_FORTUNE | SIMILAR_FRIEND => DecodedMetadata::Relation(value),
        _ => DecodedMetadata::Other(value),
    })
}

fn has_named_counterpart(meta: &CompatibilityMetadata) -> bool {
    match meta.user2_name.as_deref().map(str::trim) {
        None | Some("") => false,
        Some(name) => name != DEFAULT_COUNTERPART_NAME,
    }
}

fn title_for(record: &RawRecord, metadata: Option<&DecodedMetadata>) -> String {
    match record.record_type.as_str() {
        COMPATIBILITY => {
            if let Some(DecodedMetadata::Compatibility { fields, .. }) = metadata {
                return compatibility_title(fields);
            }
        }
        AI_SPOUSE => return "나의 미래 배우자".to_string(),
        SIMILAR_FRIEND | TODAY_FORTUNE => return "유사 친구".to_string(),
        _ => {}
    }
    content_title(&record.content)
}

/// A score that rounds to zero counts as absent.
fn compatibility_title(meta: &CompatibilityMetadata) -> String {
    let score = meta
        .score
        .filter(|s| s.is_finite())
        .map(|s| s.round() as i64)
        .filter(|s| *s != 0);
    let Some(score) = score else {
        return UNTITLED_RECORD.to_string();
    };
    match meta.user2_name.as_deref().filter(|n| !n.is_empty()) {
        Some(name) => {
            let short: String = name.chars().take(SHORT_NAME_CHARS).collect();
            format!("{short}님 궁합 {score}점")
        }
        None => format!("궁합 {score}점"),
    }
}

fn content_title(content: &str) -> String {
    let first_line = content.split('\n').next().unwrap_or_default();
    if first_line.chars().count() > TITLE_MAX_CHARS {
        let truncated: String = first_line.chars().take(TITLE_MAX_CHARS).collect();
        format!("{truncated}...")
    } else {
        first_line.to_string()
    }
}

impl UiCategory {
    /// Whether a record of category `record` shows under this tab.
    pub fn admits(self, record: UiCategory) -> bool {
        self == UiCategory::All || self == record
    }
}

pub fn filter_by_category(records: &[ClassifiedRecord], tab: UiCategory) -> Vec<&ClassifiedRecord> {
    records.iter().filter(|r| tab.admits(r.ui_category)).collect()
}

/// Detail view for a selected record; unknown types are inert.
pub fn dispatch(record: &ClassifiedRecord, self_name: &str) -> Option<DispatchTarget> {
    match record.source_type.as_str() {
        COMPATIBILITY => {
            let Some(DecodedMetadata::Compatibility { fields: meta, .. }) = &record.metadata else {
                return None;
            };
            Some(DispatchTarget::CompatibilityView {
                compatibility: CompatibilitySummary {
                    score: meta.score.unwrap_or(0.0),
                    analysis: meta.analysis.clone().unwrap_or_default(),
                    communication_analysis: meta.communication_analysis.clone().unwrap_or_default(),
                    emotion_analysis: meta.emotion_analysis.clone().unwrap_or_default(),
                    lifestyle_analysis: meta.lifestyle_analysis.clone().unwrap_or_default(),
                    caution_analysis: meta.caution_analysis.clone().unwrap_or_default(),
                },
                self_name: self_name.to_string(),
                counterpart_name: meta
                    .user2_name
                    .clone()
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| DEFAULT_COUNTERPART_NAME.to_string()),
            })
        }
        AI_SPOUSE => Some(DispatchTarget::FuturePartnerView {
            raw: record.raw.clone(),
            metadata: record.metadata.clone(),
        }),
        SIMILAR_FRIEND | TODAY_FORTUNE => Some(DispatchTarget::SimilarFriendView {
            raw: record.raw.clone(),
            metadata: record.metadata.clone(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn raw(id: i64, record_type: &str, content: &str, metadata: Option<Value>) -> RawRecord {
        RawRecord {
            id: json!(id),
            record_type: record_type.to_string(),
            content: content.to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            metadata,
            image_url: None,
        }
    }

    fn compat(id: i64, name: &str, score: f64) -> RawRecord {
        let metadata = json!({ "score": score, "user2_name": name }).to_string();
        raw(id, COMPATIBILITY, "궁합 결과", Some(Value::String(metadata)))
    }

    #[test]
    fn maps_types_to_categories() {
        assert_eq!(category_for(COMPATIBILITY), UiCategory::Compat);
        assert_eq!(category_for(AI_SPOUSE), UiCategory::Future);
        assert_eq!(category_for(TODAY_FORTUNE), UiCategory::Relation);
        assert_eq!(category_for(SIMILAR_FRIEND), UiCategory::Relation);
        assert_eq!(category_for("memo"), UiCategory::All);
    }

    #[test]
    fn drops_compatibility_without_real_counterpart() {
        let records = vec![
            compat(1, "", 80.0),
            compat(2, "  ", 80.0),
            compat(3, "상대방", 80.0),
            compat(4, "윤성연", 87.4),
        ];

        let classified = classify(&records);
        assert_eq!(classified.len(), 1);
        assert_eq!(classified[0].id, json!(4));
        assert_eq!(classified[0].title, "윤성님 궁합 87점");
        assert_eq!(classified[0].ui_category, UiCategory::Compat);
    }

    #[test]
    fn missing_counterpart_field_is_dropped() {
        let record = raw(1, COMPATIBILITY, "x", Some(json!({ "score": 70 })));
        assert!(classify(&[record]).is_empty());
    }

    #[test]
    fn two_char_name_is_kept_whole() {
        let classified = classify(&[compat(1, "하늘", 91.5)]);
        assert_eq!(classified[0].title, "하늘님 궁합 92점");
    }

    #[test]
    fn malformed_metadata_yields_content_title() {
        let record = raw(
            9,
            COMPATIBILITY,
            "첫 번째 줄이 아주 길어서 잘려야 하는 제목입니다\n둘째 줄",
            Some(Value::String("{not json".to_string())),
        );

        let classified = classify(&[record]);
        assert_eq!(classified.len(), 1);
        assert!(classified[0].metadata.is_none());
        assert_eq!(classified[0].title, "첫 번째 줄이 아주 길어서 ...");
    }

    #[test]
    fn fixed_titles_for_known_types() {
        let records = vec![
            raw(1, AI_SPOUSE, "spouse", Some(json!({ "mood": ["calm"] }))),
            raw(2, SIMILAR_FRIEND, "friend", None),
            raw(3, TODAY_FORTUNE, "today", None),
            raw(4, "memo", "짧은 메모", None),
        ];

        let titles: Vec<String> = classify(&records).into_iter().map(|r| r.title).collect();
        assert_eq!(titles, vec!["나의 미래 배우자", "유사 친구", "유사 친구", "짧은 메모"]);
    }

    #[test]
    fn metadata_is_decoded_by_source_type() {
        let records = vec![
            raw(1, AI_SPOUSE, "", Some(json!({ "job": ["designer"], "image_url": "u" }))),
            raw(2, AI_SPOUSE, "", Some(json!({ "job": 3, "mood": ["calm"] }))),
            raw(3, "memo", "", Some(Value::String("{\"a\":1}".to_string()))),
        ];

        let classified = classify(&records);
        match &classified[0].metadata {
            Some(DecodedMetadata::AiSpouse { fields, .. }) => {
                assert_eq!(fields.job, vec!["designer".to_string()]);
                assert_eq!(fields.image_url.as_deref(), Some("u"));
            }
            other => panic!("unexpected metadata: {other:?}"),
        }
        match &classified[1].metadata {
            Some(DecodedMetadata::AiSpouse { fields, value }) => {
                assert!(fields.job.is_empty());
                assert_eq!(fields.mood, vec!["calm".to_string()]);
                assert_eq!(value, &json!({ "job": 3, "mood": ["calm"] }));
            }
            other => panic!("unexpected metadata: {other:?}"),
        }
        assert_eq!(
            classified[2].metadata,
            Some(DecodedMetadata::Other(json!({ "a": 1 })))
        );
    }

    #[test]
    fn compatibility_score_only_title() {
        let record = RawRecord {
            metadata: Some(json!({ "score": 64.5, "user2_name": "민수" })),
            ..raw(1, COMPATIBILITY, "", None)
        };
        assert_eq!(classify(&[record])[0].title, "민수님 궁합 65점");

        let meta = CompatibilityMetadata {
            score: Some(64.4),
            ..CompatibilityMetadata::default()
        };
        assert_eq!(compatibility_title(&meta), "궁합 64점");
    }

    #[test]
    fn string_score_still_applies_counterpart_rule() {
        let placeholder = raw(
            1,
            COMPATIBILITY,
            "궁합 결과",
            Some(Value::String(r#"{"user2_name":"상대방","score":"87"}"#.to_string())),
        );
        let named = raw(
            2,
            COMPATIBILITY,
            "궁합 결과",
            Some(Value::String(r#"{"user2_name":"윤성연","score":"87"}"#.to_string())),
        );

        let classified = classify(&[placeholder, named]);
        assert_eq!(classified.len(), 1);
        assert_eq!(classified[0].id, json!(2));
        assert_eq!(classified[0].title, "윤성님 궁합 87점");
    }

    #[test]
    fn wrongly_typed_fields_do_not_hide_counterpart() {
        let record = raw(
            1,
            COMPATIBILITY,
            "x",
            Some(json!({ "user2_name": "상대방", "score": 80, "analysis": ["not", "text"] })),
        );
        assert!(classify(&[record]).is_empty());
    }

    #[test]
    fn zero_or_missing_score_is_titled_as_record() {
        let records = vec![
            compat(1, "윤성연", 0.0),
            compat(2, "윤성연", 0.4),
            raw(3, COMPATIBILITY, "내용 제목", Some(json!({ "user2_name": "윤성연" }))),
        ];

        let titles: Vec<String> = classify(&records).into_iter().map(|r| r.title).collect();
        assert_eq!(titles, vec!["기록", "기록", "기록"]);
    }

    #[test]
    fn spouse_metadata_is_passed_through_verbatim() {
        let metadata = json!({ "impression": ["warm"], "image_url": null, "extra": 1 });
        let classified = classify(&[raw(1, AI_SPOUSE, "", Some(metadata.clone()))]);

        match &classified[0].metadata {
            Some(DecodedMetadata::AiSpouse { fields, value }) => {
                assert_eq!(fields.impression, vec!["warm".to_string()]);
                assert_eq!(fields.image_url, None);
                assert_eq!(value, &metadata);
            }
            other => panic!("unexpected metadata: {other:?}"),
        }

        match dispatch(&classified[0], "") {
            Some(DispatchTarget::FuturePartnerView { metadata: Some(decoded), .. }) => {
                assert_eq!(serde_json::to_value(&decoded).unwrap(), metadata);
            }
            other => panic!("unexpected target: {other:?}"),
        }
    }

    #[test]
    fn preserves_input_order() {
        let records = vec![
            raw(3, "memo", "c", None),
            compat(2, "상대방", 10.0),
            raw(1, AI_SPOUSE, "a", None),
        ];
        let ids: Vec<Value> = classify(&records).into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![json!(3), json!(1)]);
    }

    #[test]
    fn filters_by_tab() {
        let classified = classify(&[
            compat(1, "윤성연", 80.0),
            raw(2, AI_SPOUSE, "", None),
            raw(3, "memo", "m", None),
        ]);

        assert_eq!(filter_by_category(&classified, UiCategory::All).len(), 3);
        let compat_only = filter_by_category(&classified, UiCategory::Compat);
        assert_eq!(compat_only.len(), 1);
        assert_eq!(compat_only[0].id, json!(1));
        assert!(filter_by_category(&classified, UiCategory::Relation).is_empty());
    }

    #[test]
    fn dispatches_by_source_type() {
        let classified = classify(&[
            compat(1, "윤성연", 80.0),
            raw(2, AI_SPOUSE, "", None),
            raw(3, TODAY_FORTUNE, "", None),
            raw(4, "memo", "m", None),
            raw(5, COMPATIBILITY, "no metadata", None),
        ]);

        match dispatch(&classified[0], "김하늘") {
            Some(DispatchTarget::CompatibilityView {
                compatibility,
                self_name,
                counterpart_name,
            }) => {
                assert_eq!(compatibility.score, 80.0);
                assert_eq!(compatibility.analysis, "");
                assert_eq!(self_name, "김하늘");
                assert_eq!(counterpart_name, "윤성연");
            }
            other => panic!("unexpected target: {other:?}"),
        }
        assert_eq!(
            dispatch(&classified[1], "").map(|t| t.view_name()),
            Some("future-partner")
        );
        assert_eq!(
            dispatch(&classified[2], "").map(|t| t.view_name()),
            Some("similar-friend")
        );
        assert!(dispatch(&classified[3], "").is_none());
        assert!(dispatch(&classified[4], "").is_none());
    }
}
