use crate::core::{identifiers::DataNode, value::Value};
use serde::{Deserialize, Serialize};

/// One key interval of one source data node to compare against the target.
/// Both bounds are inclusive, a missing bound is open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCheckRangePosition {
    pub splitting_item: usize,
    pub source_data_node: DataNode,
    pub logic_table_name: String,
    pub lower_position: Option<Value>,
    pub upper_position: Option<Value>,
    pub query_condition: Option<String>,
    pub checked: bool,
    pub matched: Option<bool>,
}

impl TableCheckRangePosition {
    pub fn new(
        splitting_item: usize,
        source_data_node: DataNode,
        logic_table_name: impl Into<String>,
        lower_position: Option<Value>,
        upper_position: Option<Value>,
    ) -> Self {
        Self {
            splitting_item,
            source_data_node,
            logic_table_name: logic_table_name.into(),
            lower_position,
            upper_position,
            query_condition: None,
            checked: false,
            matched: None,
        }
    }

    pub fn mark_checked(&mut self, matched: bool) {
        self.checked = true;
        self.matched = Some(matched);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IgnoredType {
    NoUniqueKey,
}

/// Outcome of comparing one range, or the aggregate of all ranges of a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCheckResult {
    pub matched: bool,
    pub ignored_type: Option<IgnoredType>,
}

impl TableCheckResult {
    pub fn matched(matched: bool) -> Self {
        Self {
            matched,
            ignored_type: None,
        }
    }

    pub fn ignored(ignored_type: IgnoredType) -> Self {
        Self {
            matched: false,
            ignored_type: Some(ignored_type),
        }
    }

    pub fn is_ignored(&self) -> bool {
        self.ignored_type.is_some()
    }

    /// Folds the result of another range of the same table into this one.
    pub fn merge(&mut self, other: &TableCheckResult) {
        self.matched = self.matched && other.matched;
        if self.ignored_type.is_none() {
            self.ignored_type = other.ignored_type;
        }
    }
}
