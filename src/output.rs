//! Result types: what one chunk produced and what the whole run produced.
//!
//! [`MergedResult`] is the stable intermediate shape handed to report
//! renderers. It serialises to JSON with the bullet field names used by the
//! extraction schema plus the merge bookkeeping (`chunk_index`, `global_id`,
//! `global_parent_id`).

use crate::error::{ChunkError, SubmittalError};
use crate::pipeline::repair::Repair;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Classification of a submittal requirement.
///
/// Models rarely emit the canonical spelling, so deserialisation accepts the
/// long article headings as well ("ACTION SUBMITTALS", "Closeout
/// Submittals", "Maintenance Material Submittals", …).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmittalType {
    Action,
    Informational,
    Closeout,
    QualityAssurance,
    MaintenanceMaterial,
}

impl SubmittalType {
    /// Parse a free-form type label, ignoring case, punctuation and the
    /// trailing word "submittals".
    pub fn parse_label(label: &str) -> Option<Self> {
        let norm: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { ' ' })
            .collect();
        let words: Vec<&str> = norm
            .split_whitespace()
            .filter(|w| *w != "SUBMITTALS" && *w != "SUBMITTAL")
            .collect();
        match words.as_slice() {
            ["ACTION"] => Some(Self::Action),
            ["INFORMATIONAL"] | ["INFORMATION"] => Some(Self::Informational),
            ["CLOSEOUT"] | ["CLOSE", "OUT"] => Some(Self::Closeout),
            ["QUALITY", "ASSURANCE"] | ["QA"] => Some(Self::QualityAssurance),
            ["MAINTENANCE", "MATERIAL"] | ["MAINTENANCE", "MATERIALS"] => {
                Some(Self::MaintenanceMaterial)
            }
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Action => "ACTION",
            Self::Informational => "INFORMATIONAL",
            Self::Closeout => "CLOSEOUT",
            Self::QualityAssurance => "QUALITY_ASSURANCE",
            Self::MaintenanceMaterial => "MAINTENANCE_MATERIAL",
        }
    }

    pub const ALL: [SubmittalType; 5] = [
        Self::Action,
        Self::Informational,
        Self::Closeout,
        Self::QualityAssurance,
        Self::MaintenanceMaterial,
    ];
}

impl fmt::Display for SubmittalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SubmittalType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        SubmittalType::parse_label(&label)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown submittal type '{label}'")))
    }
}

/// Unknown or empty type labels become `None` instead of failing the whole
/// payload: one odd label should not cost a chunk its bullets.
fn lenient_type<'de, D: Deserializer<'de>>(d: D) -> Result<Option<SubmittalType>, D::Error> {
    let label: Option<String> = Option::deserialize(d)?;
    Ok(label.as_deref().and_then(SubmittalType::parse_label))
}

/// Accept `"A"`, `1` and `null` for text fields; `null` reads as empty.
fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let v = serde_json::Value::deserialize(d)?;
    Ok(match v {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Null => String::new(),
        other => return Err(serde::de::Error::custom(format!("expected string, got {other}"))),
    })
}

/// Accept a number or a numeric string for `level`, saturating into `u8`.
///
/// The 1–4 clamp happens in hierarchy sanitising, where it is counted.
fn lenient_level<'de, D: Deserializer<'de>>(d: D) -> Result<u8, D::Error> {
    let v = serde_json::Value::deserialize(d)?;
    let n = match &v {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64)),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    };
    n.map(|n| n.clamp(0, u8::MAX as i64) as u8)
        .ok_or_else(|| serde::de::Error::custom(format!("expected a level number, got {v}")))
}

/// One atomic extracted submittal requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bullet {
    /// CSI-style section number, e.g. `"12 24 13"`.
    #[serde(default, deserialize_with = "string_or_number")]
    pub spec_section: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub section_title: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub article_number: String,
    #[serde(default, deserialize_with = "lenient_type")]
    pub submittal_type: Option<SubmittalType>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub submittal_title: String,
    #[serde(deserialize_with = "string_or_number")]
    pub text: String,
    /// Unique within the chunk that produced it.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    /// Hierarchy depth, 1–4.
    #[serde(deserialize_with = "lenient_level")]
    pub level: u8,
    /// Empty for level-1 bullets.
    #[serde(default, deserialize_with = "string_or_number")]
    pub parent_id: String,
}

impl Bullet {
    /// Convenience constructor for a level-1 bullet.
    pub fn top_level(
        spec_section: impl Into<String>,
        article_number: impl Into<String>,
        submittal_title: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            spec_section: spec_section.into(),
            section_title: String::new(),
            article_number: article_number.into(),
            submittal_type: None,
            submittal_title: submittal_title.into(),
            text: String::new(),
            id: id.into(),
            level: 1,
            parent_id: String::new(),
        }
    }

    /// Convenience constructor for a child bullet.
    pub fn child_of(parent: &Bullet, id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            spec_section: parent.spec_section.clone(),
            section_title: parent.section_title.clone(),
            article_number: parent.article_number.clone(),
            submittal_type: parent.submittal_type,
            submittal_title: String::new(),
            text: text.into(),
            id: id.into(),
            level: parent.level.saturating_add(1),
            parent_id: parent.id.clone(),
        }
    }
}

/// Token counts and price for one chunk (summed over its attempts).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
}

impl TokenUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cost += other.cost;
    }
}

/// Counts of hierarchy corrections applied to one chunk's bullets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HierarchyFixes {
    pub levels_clamped: usize,
    pub ids_renamed: usize,
    pub parents_cleared: usize,
}

impl HierarchyFixes {
    pub fn total(&self) -> usize {
        self.levels_clamped + self.ids_renamed + self.parents_cleared
    }
}

/// What one chunk produced.
///
/// Always returned by the extraction client; failures live in `error`
/// rather than being propagated, so one bad chunk does not take down the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResult {
    /// 1-based chunk index from the plan.
    pub chunk_index: usize,
    pub start_page: usize,
    pub end_page: usize,
    pub bullets: Vec<Bullet>,
    pub usage: TokenUsage,
    /// Requests sent, including the first.
    pub attempts: u32,
    pub duration_ms: u64,
    /// Model reported by the service for the last response.
    pub model: Option<String>,
    /// True when the response needed at least one repair pass.
    pub repaired: bool,
    pub repairs: Vec<Repair>,
    pub hierarchy_fixes: HierarchyFixes,
    /// Length of the last raw response; the text itself goes to observers.
    pub raw_response_len: usize,
    pub error: Option<ChunkError>,
}

impl ChunkResult {
    /// An empty result shell for the given page range.
    pub fn empty(chunk_index: usize, start_page: usize, end_page: usize) -> Self {
        Self {
            chunk_index,
            start_page,
            end_page,
            bullets: Vec::new(),
            usage: TokenUsage::default(),
            attempts: 0,
            duration_ms: 0,
            model: None,
            repaired: false,
            repairs: Vec::new(),
            hierarchy_fixes: HierarchyFixes::default(),
            raw_response_len: 0,
            error: None,
        }
    }

    /// A failed result carrying no bullets.
    pub fn failed(chunk_index: usize, start_page: usize, end_page: usize, error: ChunkError) -> Self {
        Self {
            error: Some(error),
            ..Self::empty(chunk_index, start_page, end_page)
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// A bullet placed in the merged, document-wide list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedBullet {
    #[serde(flatten)]
    pub bullet: Bullet,
    /// Chunk the bullet came from; parent lookups never leave it.
    pub chunk_index: usize,
    /// `"{chunk_index}:{id}"`, unique across the whole result.
    pub global_id: String,
    /// Parent's `global_id`, empty for roots.
    pub global_parent_id: String,
}

/// A page range that produced no data, for targeted re-runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub chunk_index: usize,
    pub start_page: usize,
    pub end_page: usize,
    pub kind: String,
    pub reason: String,
}

/// Run-level statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    pub total_pages: usize,
    pub chunks_total: usize,
    /// Failed plus never-dispatched chunks.
    pub chunks_failed: usize,
    pub chunks_not_attempted: usize,
    pub chunks_repaired: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    /// Service requests beyond the first per chunk.
    pub total_retries: u32,
    pub bullets_before_dedup: usize,
    pub bullets_after_dedup: usize,
    pub duplicates_removed: usize,
    pub duration_ms: u64,
}

/// The merged, deduplicated output of a whole run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedResult {
    pub bullets: Vec<MergedBullet>,
    pub stats: RunStats,
    pub gaps: Vec<Gap>,
    /// Some page ranges are missing from `bullets`.
    pub partial: bool,
    /// Dispatch stopped early because of the cost ceiling.
    pub ceiling_exceeded: bool,
}

impl MergedResult {
    /// Convert a partial run into an error, for callers that need every page.
    pub fn into_complete(self, cost_ceiling: Option<f64>) -> Result<Self, SubmittalError> {
        if self.ceiling_exceeded {
            return Err(SubmittalError::CostCeilingExceeded {
                spent: self.stats.total_cost,
                ceiling: cost_ceiling.unwrap_or(self.stats.total_cost),
                skipped: self.stats.chunks_not_attempted,
            });
        }
        if self.stats.chunks_failed > 0 {
            return Err(SubmittalError::PartialFailure {
                failed: self.stats.chunks_failed,
                total: self.stats.chunks_total,
            });
        }
        Ok(self)
    }

    /// Re-express the merged bullets as one chunk's worth of output, using
    /// global ids so parent links stay unambiguous.
    pub fn as_chunk_result(&self) -> ChunkResult {
        let first = self.bullets.first().map(|b| b.chunk_index).unwrap_or(1);
        let mut result = ChunkResult::empty(first, 1, self.stats.total_pages.max(1));
        result.bullets = self
            .bullets
            .iter()
            .map(|mb| Bullet {
                id: mb.global_id.clone(),
                parent_id: mb.global_parent_id.clone(),
                ..mb.bullet.clone()
            })
            .collect();
        result.attempts = 1;
        result
    }

    /// Bullets that head a submittal entry (level 1 with a title).
    pub fn submittal_items(&self) -> impl Iterator<Item = &MergedBullet> {
        self.bullets
            .iter()
            .filter(|b| b.bullet.level == 1 && !b.bullet.submittal_title.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submittal_type_accepts_long_labels() {
        assert_eq!(
            SubmittalType::parse_label("ACTION SUBMITTALS"),
            Some(SubmittalType::Action)
        );
        assert_eq!(
            SubmittalType::parse_label("Informational Submittals"),
            Some(SubmittalType::Informational)
        );
        assert_eq!(
            SubmittalType::parse_label("quality_assurance"),
            Some(SubmittalType::QualityAssurance)
        );
        assert_eq!(
            SubmittalType::parse_label("Maintenance Material Submittals"),
            Some(SubmittalType::MaintenanceMaterial)
        );
        assert_eq!(SubmittalType::parse_label("Closeout"), Some(SubmittalType::Closeout));
        assert_eq!(SubmittalType::parse_label("shop drawings"), None);
    }

    #[test]
    fn bullet_deserialises_with_optional_fields_missing() {
        let json = r#"{"text": "Manufacturer's data sheets", "id": 3, "level": 2, "parent_id": "A"}"#;
        let b: Bullet = serde_json::from_str(json).unwrap();
        assert_eq!(b.id, "3");
        assert_eq!(b.parent_id, "A");
        assert_eq!(b.spec_section, "");
        assert!(b.submittal_type.is_none());
    }

    #[test]
    fn bullet_requires_id_and_level() {
        let json = r#"{"text": "orphan text"}"#;
        assert!(serde_json::from_str::<Bullet>(json).is_err());
    }

    #[test]
    fn null_text_fields_read_as_empty() {
        let json = r#"{"spec_section": null, "section_title": null, "submittal_title": null,
                       "text": null, "id": "A1", "level": 2, "parent_id": null}"#;
        let b: Bullet = serde_json::from_str(json).unwrap();
        assert_eq!(b.submittal_title, "");
        assert_eq!(b.section_title, "");
        assert_eq!(b.text, "");
        assert_eq!(b.parent_id, "");
    }

    #[test]
    fn level_accepts_numeric_strings_and_saturates() {
        let parse = |level: &str| {
            let json = format!(r#"{{"text": "x", "id": "A", "level": {level}}}"#);
            serde_json::from_str::<Bullet>(&json).map(|b| b.level)
        };
        assert_eq!(parse(r#""2""#).unwrap(), 2);
        assert_eq!(parse("3.0").unwrap(), 3);
        assert_eq!(parse("-1").unwrap(), 0);
        assert_eq!(parse("9000").unwrap(), 255);
        assert!(parse(r#""two""#).is_err());
        assert!(parse("null").is_err());
    }

    #[test]
    fn unknown_type_label_is_lenient() {
        let json = r#"{"text": "x", "id": "A", "level": 1, "submittal_type": "SHOP DRAWINGS"}"#;
        let b: Bullet = serde_json::from_str(json).unwrap();
        assert!(b.submittal_type.is_none());
    }

    #[test]
    fn submittal_type_serialises_canonically() {
        let s = serde_json::to_string(&SubmittalType::QualityAssurance).unwrap();
        assert_eq!(s, "\"QUALITY_ASSURANCE\"");
    }

    #[test]
    fn into_complete_reports_ceiling_first() {
        let merged = MergedResult {
            bullets: vec![],
            stats: RunStats {
                chunks_total: 5,
                chunks_failed: 2,
                chunks_not_attempted: 2,
                total_cost: 2.4,
                ..Default::default()
            },
            gaps: vec![],
            partial: true,
            ceiling_exceeded: true,
        };
        let err = merged.into_complete(Some(2.0)).unwrap_err();
        assert!(matches!(
            err,
            SubmittalError::CostCeilingExceeded { skipped: 2, .. }
        ));
    }

    #[test]
    fn merged_bullet_flattens_fields() {
        let mb = MergedBullet {
            bullet: Bullet::top_level("12 24 13", "1.2", "Product Data", "A"),
            chunk_index: 2,
            global_id: "2:A".into(),
            global_parent_id: String::new(),
        };
        let v = serde_json::to_value(&mb).unwrap();
        assert_eq!(v["spec_section"], "12 24 13");
        assert_eq!(v["global_id"], "2:A");
        assert_eq!(v["chunk_index"], 2);
    }
}
