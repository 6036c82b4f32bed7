//! System prompts for the two per-page extraction passes.
//!
//! Every page is read twice: once for soil layers, once for samples. Each pass
//! gets its own prompt so the model fills one table per answer rather than
//! interleaving both. The JSON schema generated from
//! [`crate::schema::SoilPageSchema`] / [`crate::schema::SamplePageSchema`] is
//! appended to the prompt so wire names stay in one place.
//!
//! Callers can override either prompt via
//! [`crate::config::ExtractionConfig::soil_prompt`] /
//! [`crate::config::ExtractionConfig::sample_prompt`]; the schema is appended
//! to overrides as well.

use crate::config::ExtractionConfig;
use crate::schema::SchemaKind;

/// Description of the drill-log layout, shared by both passes.
const LOG_LAYOUT: &str = r#"You are an expert at reading Korean borehole drill logs (시추주상도).

The top of the page holds metadata: PROJECT NAME, HOLE NO., ELEV, LOCATION,
GROUND WATER LEVEL, DATE and DRILLER.

Below the metadata is a table. The leftmost column is a depth scale in meters.
The field observation column (현장 관찰기록) has three sub-columns: 토질명
(soil name), 색 조 (color) and 관 찰 (observation). Each soil description starts
with its depth range, e.g. 0.0~5.0m.
The rightmost columns describe samples: sample number (S1, S2, ...), the depth
the sample was taken at in meters, and the sampling method. The 타격회수/관입량
column holds the blow count (N value) for each sample as a fraction such as
10/30."#;

/// Default soil-pass instructions.
pub const DEFAULT_SOIL_PROMPT: &str = r#"Extract the metadata and every soil layer on this page.

Rules:
1. depth_range MUST be written as "<start>~<end>m", e.g. "0.0~5.0m" or "5.0~7.0m".
2. Report HOLE_NO exactly as printed, e.g. "BH-1".
3. Excavation_level is the ELEV value as a number.
4. GROUND_WATER_LEVEL is a number in meters, or null if not given.
5. Keep Korean text as written; do not translate.
6. If a cell is empty, use an empty string."#;

/// Default sample-pass instructions.
pub const DEFAULT_SAMPLE_PROMPT: &str = r#"Extract the metadata and every sample on this page.

Rules:
1. Sample_number is the label as printed, e.g. "S1".
2. Depth is the sampling depth in meters as a number, e.g. 5.0.
3. Hits is the blow count fraction as printed, e.g. "10/30".
4. Method is the sampling method as text. Never output the map symbol itself.
5. Report HOLE_NO exactly as printed, e.g. "BH-1".
6. If a cell is empty, use an empty string."#;

const OUTPUT_RULES: &str = r#"Return ONLY a single JSON object conforming to this JSON schema.
Do NOT wrap it in code fences and do NOT add commentary."#;

/// Full system prompt for `kind`, honouring overrides in `config`.
pub fn system_prompt(kind: SchemaKind, config: &ExtractionConfig) -> String {
    let instructions = match kind {
        SchemaKind::Soil => config.soil_prompt.as_deref().unwrap_or(DEFAULT_SOIL_PROMPT),
        SchemaKind::Sample => config
            .sample_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SAMPLE_PROMPT),
    };
    let schema = serde_json::to_string_pretty(&kind.json_schema()).unwrap_or_default();
    format!("{LOG_LAYOUT}\n\n{instructions}\n\n{OUTPUT_RULES}\n\n{schema}")
}
