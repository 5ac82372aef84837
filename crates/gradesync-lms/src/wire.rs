//! Canvas response shapes, reduced to the fields the crawler reads.

use serde::{Deserialize, Deserializer};
use std::fmt;

/// Canvas object id. Numeric on most instances, string when the
/// `canvas-string-ids` content type is in effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanvasId(pub String);

impl fmt::Display for CanvasId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for CanvasId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawId {
            Num(u64),
            Str(String),
        }

        Ok(match RawId::deserialize(deserializer)? {
            RawId::Num(n) => CanvasId(n.to_string()),
            RawId::Str(s) => CanvasId(s),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub id: Option<CanvasId>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Term {
    #[serde(default)]
    pub id: Option<CanvasId>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Course {
    pub id: CanvasId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub course_code: Option<String>,
    #[serde(default)]
    pub enrollment_term_id: Option<CanvasId>,
    /// Present when the list was requested with `include[]=term`
    #[serde(default)]
    pub term: Option<Term>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Assignment {
    pub id: CanvasId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub published: bool,
    #[serde(default)]
    pub due_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Submission {
    #[serde(default)]
    pub workflow_state: Option<String>,
    #[serde(default)]
    pub grade: Option<String>,
    #[serde(default)]
    pub excused: Option<bool>,
}
