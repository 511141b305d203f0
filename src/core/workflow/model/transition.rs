use serde::{Deserialize, Serialize};

/// Condition used to guard transitions between activities.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Condition {
    Expr {
        #[serde(rename = "$expr")]
        expr: String,
    },
    Bool(bool),
}

impl Condition {
    pub fn expr(expr: impl Into<String>) -> Self {
        Condition::Expr { expr: expr.into() }
    }

    pub fn expression(&self) -> Option<&str> {
        match self {
            Condition::Expr { expr } => Some(expr.as_str()),
            Condition::Bool(_) => None,
        }
    }
}

/// Directed edge to a target activity, or to the positional successor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Source activity; only set on transitions declared at scope level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub to_next: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

impl Transition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into());
        self
    }

    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self.to_next = false;
        self
    }

    pub fn to_next(mut self) -> Self {
        self.to = None;
        self.to_next = true;
        self
    }

    pub fn condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn describe_target(&self) -> String {
        match (&self.to, self.to_next) {
            (Some(to), _) => to.clone(),
            (None, true) => "<next>".to_string(),
            (None, false) => "<none>".to_string(),
        }
    }
}
