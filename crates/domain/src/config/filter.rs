use serde::{Deserialize, Serialize};

/// One rule list. Rules may be inlined or loaded from a file; inline rules
/// are appended after file contents when both are present.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FilterList {
    pub id: i32,

    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub rules: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FilterParams {
    #[serde(default)]
    pub lists: Vec<FilterList>,
}
