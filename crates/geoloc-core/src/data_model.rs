//! Data Model: detected objects, query descriptors, execution records, ranked locations
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Flat column → scalar mapping returned by the query executor.
pub type Row = Map<String, Value>;

/// Columns every rendered query projects.
pub const OUTPUT_COLUMNS: [&str; 5] = ["a_name", "a_address", "b_name", "b_address", "distance"];

/// Axis-aligned box in image pixels, serialized as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Horizontal center of the box.
    pub fn center_x(&self) -> f64 {
        (self.x1 + self.x2) / 2.0
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from(b: [f64; 4]) -> Self {
        Self::new(b[0], b[1], b[2], b[3])
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub label: String,
    /// Detector confidence in [0, 1]
    pub confidence: f64,
    #[serde(rename = "bbox")]
    pub bounding_box: BoundingBox,
}

impl DetectedObject {
    pub fn new(label: impl Into<String>, confidence: f64, bbox: [f64; 4]) -> Self {
        Self {
            label: label.into(),
            confidence,
            bounding_box: bbox.into(),
        }
    }

    pub fn center_x(&self) -> f64 {
        self.bounding_box.center_x()
    }
}

/// Real-world side of object A relative to object B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    West,
    East,
    None,
}

impl Direction {
    /// The reference marker sits due west; whichever object is horizontally
    /// closer to it in the image is taken to lie further west.
    pub fn infer(a: &DetectedObject, b: &DetectedObject, reference: &DetectedObject) -> Self {
        let anchor = reference.center_x();
        if (a.center_x() - anchor).abs() < (b.center_x() - anchor).abs() {
            Direction::West
        } else {
            Direction::East
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::West => write!(f, "WEST"),
            Direction::East => write!(f, "EAST"),
            Direction::None => write!(f, "NONE"),
        }
    }
}

/// A synthesized geo-proximity query awaiting execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryDescriptor {
    pub object_a: DetectedObject,
    pub object_b: DetectedObject,
    pub direction: Direction,
    pub rendered: String,
}

impl QueryDescriptor {
    /// Identity of the descriptor inside one run.
    pub fn key(&self) -> &str {
        &self.rendered
    }
}

/// One dispatched descriptor and what came back for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub descriptor: QueryDescriptor,
    pub rows: Vec<Row>,
    /// Set when the executor failed or answered with an error row
    pub error: Option<String>,
}

impl ExecutionRecord {
    /// Builds a record from executor rows. A single row carrying an `error`
    /// column is the executor's way of reporting failure.
    pub fn from_rows(descriptor: QueryDescriptor, rows: Vec<Row>) -> Self {
        if let [only] = rows.as_slice() {
            if let Some(err) = only.get("error") {
                let message = scalar_to_string(err);
                return Self::failed(descriptor, message);
            }
        }
        Self {
            descriptor,
            rows,
            error: None,
        }
    }

    pub fn failed(descriptor: QueryDescriptor, message: impl Into<String>) -> Self {
        Self {
            descriptor,
            rows: Vec::new(),
            error: Some(message.into()),
        }
    }

    pub fn key(&self) -> &str {
        self.descriptor.key()
    }

    /// Whether this record can contribute candidate locations.
    pub fn has_rows(&self) -> bool {
        self.error.is_none() && !self.rows.is_empty()
    }
}

/// Object-match support of a ranked location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchSupport {
    High,
    Low,
}

/// Candidate pair of named places derived from a result row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationPair {
    pub name_a: String,
    pub address_a: String,
    pub name_b: String,
    pub address_b: String,
    pub distance_meters: f64,
    pub match_count: usize,
}

impl LocationPair {
    /// Reads the declared output columns. Missing text columns become empty
    /// strings and an unreadable distance becomes 0.
    pub fn from_row(row: &Row) -> Self {
        Self {
            name_a: row_str(row, "a_name"),
            address_a: row_str(row, "a_address"),
            name_b: row_str(row, "b_name"),
            address_b: row_str(row, "b_address"),
            distance_meters: row_f64(row, "distance"),
            match_count: 0,
        }
    }

    /// Order-independent identity on names only.
    pub fn pair_key(&self) -> (String, String) {
        if self.name_a <= self.name_b {
            (self.name_a.clone(), self.name_b.clone())
        } else {
            (self.name_b.clone(), self.name_a.clone())
        }
    }

    /// Whether `label` occurs in either name.
    pub fn mentions(&self, label: &str) -> bool {
        self.name_a.contains(label) || self.name_b.contains(label)
    }

    pub fn support(&self) -> MatchSupport {
        if self.match_count > 0 {
            MatchSupport::High
        } else {
            MatchSupport::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Chat,
    Reasoning,
}

impl Intent {
    /// Exact label match after trimming and lowercasing.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "chat" => Some(Intent::Chat),
            "reasoning" => Some(Intent::Reasoning),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::Chat => "chat",
            Intent::Reasoning => "reasoning",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A collaborator failure absorbed by a stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub stage: String,
    pub collaborator: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTrace {
    pub id: String,
    pub in_hash: String,
    pub out_hash: String,
    pub deterministic: bool,
    pub latency_ms: u64,
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn row_str(row: &Row, column: &str) -> String {
    row.get(column).map(scalar_to_string).unwrap_or_default()
}

fn row_f64(row: &Row, column: &str) -> f64 {
    let value = match row.get(column) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    value.filter(|v| v.is_finite()).unwrap_or(0.0)
}
