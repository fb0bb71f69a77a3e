use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_COUNTERPART_NAME: &str = "상대방";
pub const DEFAULT_SELF_NAME: &str = "나";
pub const DEFAULT_BIRTH_PLACE: &str = "서울";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    /// Single-letter code used by the backend.
    pub fn code(self) -> &'static str {
        match self {
            Sex::Male => "M",
            Sex::Female => "F",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarSystem {
    Solar,
    Lunar,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BirthProfile {
    pub display_name: String,
    pub sex: Sex,
    pub calendar_system: CalendarSystem,
    pub birth_date: NaiveDate,
    pub birth_time: Option<NaiveTime>,
    pub birth_place: String,
}

impl BirthProfile {
    pub fn year(&self) -> i32 {
        self.birth_date.year()
    }

    pub fn month(&self) -> u32 {
        self.birth_date.month()
    }

    pub fn day(&self) -> u32 {
        self.birth_date.day()
    }

    pub fn hour(&self) -> Option<u32> {
        self.birth_time.map(|t| t.hour())
    }

    pub fn minute(&self) -> Option<u32> {
        self.birth_time.map(|t| t.minute())
    }
}

/// Own profile as stored server-side; any field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredProfile {
    pub display_name: Option<String>,
    pub sex: Option<Sex>,
    pub calendar_system: Option<CalendarSystem>,
    pub birth_date: Option<NaiveDate>,
    pub birth_time: Option<NaiveTime>,
    pub birth_place: Option<String>,
}

impl StoredProfile {
    /// Complete profile when date and sex are known, otherwise `self` back.
    pub fn into_full(self, display_name: String) -> Result<BirthProfile, StoredProfile> {
        match (self.birth_date, self.sex) {
            (Some(birth_date), Some(sex)) => Ok(BirthProfile {
                display_name,
                sex,
                calendar_system: self.calendar_system.unwrap_or(CalendarSystem::Solar),
                birth_date,
                birth_time: self.birth_time,
                birth_place: self.birth_place.unwrap_or_default(),
            }),
            _ => Err(self),
        }
    }
}

impl From<BirthProfile> for StoredProfile {
    fn from(profile: BirthProfile) -> Self {
        Self {
            display_name: Some(profile.display_name),
            sex: Some(profile.sex),
            calendar_system: Some(profile.calendar_system),
            birth_date: Some(profile.birth_date),
            birth_time: profile.birth_time,
            birth_place: Some(profile.birth_place),
        }
    }
}

/// Raw partner form fields as typed by the user.
#[derive(Debug, Clone, Default)]
pub struct PartnerForm {
    pub user_name: String,
    pub gender: String,
    pub calendar: String,
    pub birth_date: String,
    pub birth_time: String,
    pub birth_city: String,
}

/// Throwaway account used only to attach the counterpart profile server-side.
#[derive(Debug, Clone)]
pub struct EphemeralIdentity {
    pub email: String,
    pub password: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EntityId(pub String);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub user: Option<RegisteredUser>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisteredUser {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl RegistrationResponse {
    /// Identifier of the created entity: `user.id` first, then top-level `id`.
    pub fn entity_id(&self) -> Option<EntityId> {
        self.user
            .as_ref()
            .and_then(|user| id_from_value(user.id.as_ref()))
            .or_else(|| id_from_value(self.id.as_ref()))
    }
}

fn id_from_value(value: Option<&Value>) -> Option<EntityId> {
    match value? {
        Value::Number(n) => Some(EntityId(n.to_string())),
        Value::String(s) if !s.trim().is_empty() => Some(EntityId(s.trim().to_string())),
        _ => None,
    }
}

/// Opaque payload from the compatibility service. Passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompatibilityResult(pub Value);

impl CompatibilityResult {
    pub fn score(&self) -> Option<f64> {
        self.0.get("score").and_then(Value::as_f64)
    }
}

/// Self profile as resolved by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelfProfile {
    Full(BirthProfile),
    /// No complete stored profile: the cached name plus whatever was fetched.
    Partial {
        display_name: String,
        sex: Option<Sex>,
        calendar_system: Option<CalendarSystem>,
        birth_place: Option<String>,
    },
}

impl SelfProfile {
    pub fn display_name(&self) -> &str {
        match self {
            SelfProfile::Full(profile) => &profile.display_name,
            SelfProfile::Partial { display_name, .. } => display_name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavigationPayload {
    pub compatibility: CompatibilityResult,
    pub self_profile: SelfProfile,
    pub counterpart_profile: BirthProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: Value,
    #[serde(rename = "type")]
    pub record_type: String,
    #[serde(default)]
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordList {
    #[serde(default)]
    pub records: Vec<RawRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewRecord {
    #[serde(rename = "type")]
    pub record_type: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// JSON-encoded metadata string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UiCategory {
    All,
    Compat,
    Future,
    Relation,
}

impl UiCategory {
    pub fn label(self) -> &'static str {
        match self {
            UiCategory::All => "전체",
            UiCategory::Compat => "궁합",
            UiCategory::Future => "미래 배우자",
            UiCategory::Relation => "관계",
        }
    }
}

/// Typed view of compatibility metadata. Every field is read on its own, so
/// one oddly shaped field never hides the others.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompatibilityMetadata {
    pub score: Option<f64>,
    pub user2_name: Option<String>,
    pub analysis: Option<String>,
    pub communication_analysis: Option<String>,
    pub emotion_analysis: Option<String>,
    pub lifestyle_analysis: Option<String>,
    pub caution_analysis: Option<String>,
}

impl CompatibilityMetadata {
    pub fn from_value(value: &Value) -> Self {
        Self {
            score: value.get("score").and_then(number_field),
            user2_name: string_field(value, "user2_name"),
            analysis: string_field(value, "analysis"),
            communication_analysis: string_field(value, "communication_analysis"),
            emotion_analysis: string_field(value, "emotion_analysis"),
            lifestyle_analysis: string_field(value, "lifestyle_analysis"),
            caution_analysis: string_field(value, "caution_analysis"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpouseMetadata {
    pub impression: Vec<String>,
    pub fashion: Vec<String>,
    pub mood: Vec<String>,
    pub job: Vec<String>,
    pub image_url: Option<String>,
}

impl SpouseMetadata {
    pub fn from_value(value: &Value) -> Self {
        Self {
            impression: string_list(value, "impression"),
            fashion: string_list(value, "fashion"),
            mood: string_list(value, "mood"),
            job: string_list(value, "job"),
            image_url: string_field(value, "image_url").filter(|u| !u.is_empty()),
        }
    }
}

/// Numbers, or numeric strings such as `"87"`.
fn number_field(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

fn string_list(value: &Value, key: &str) -> Vec<String> {
    match value.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(single)) => vec![single.clone()],
        _ => Vec::new(),
    }
}

/// Record metadata decoded according to the record's source type. The
/// decoded JSON is always kept verbatim next to any typed view.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMetadata {
    Compatibility {
        fields: CompatibilityMetadata,
        value: Value,
    },
    AiSpouse {
        fields: SpouseMetadata,
        value: Value,
    },
    Relation(Value),
    Other(Value),
}

impl DecodedMetadata {
    pub fn value(&self) -> &Value {
        match self {
            DecodedMetadata::Compatibility { value, .. }
            | DecodedMetadata::AiSpouse { value, .. }
            | DecodedMetadata::Relation(value)
            | DecodedMetadata::Other(value) => value,
        }
    }
}

impl Serialize for DecodedMetadata {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.value().serialize(serializer)
    }
}

#[derive(Debug, Clone)]
pub struct ClassifiedRecord {
    pub id: Value,
    pub ui_category: UiCategory,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub metadata: Option<DecodedMetadata>,
    pub source_type: String,
    pub raw: RawRecord,
}

/// Compatibility view fields, with absent analyses defaulted to empty text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompatibilitySummary {
    pub score: f64,
    pub analysis: String,
    pub communication_analysis: String,
    pub emotion_analysis: String,
    pub lifestyle_analysis: String,
    pub caution_analysis: String,
}

/// Where selecting a classified record leads.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "view", rename_all = "snake_case")]
pub enum DispatchTarget {
    CompatibilityView {
        compatibility: CompatibilitySummary,
        self_name: String,
        counterpart_name: String,
    },
    FuturePartnerView {
        raw: RawRecord,
        metadata: Option<DecodedMetadata>,
    },
    SimilarFriendView {
        raw: RawRecord,
        metadata: Option<DecodedMetadata>,
    },
}

impl DispatchTarget {
    pub fn view_name(&self) -> &'static str {
        match self {
            DispatchTarget::CompatibilityView { .. } => "result",
            DispatchTarget::FuturePartnerView { .. } => "future-partner",
            DispatchTarget::SimilarFriendView { .. } => "similar-friend",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordTypeSummary {
    pub source_type: String,
    pub category: UiCategory,
    pub count: usize,
}
