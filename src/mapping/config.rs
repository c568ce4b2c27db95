// rule-set documents: rule trees plus tool settings, stored as .toon or .json
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::error::{MappingError, Result};
use crate::core::types::ToolId;
use crate::mapping::rule::MappingRule;
use crate::mapping::tool::{MappingTool, ToolConfig};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    pub name: String,
    pub tool: ToolConfig,
    pub rules: Vec<MappingRule>,
}

impl RuleSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn with_rule(mut self, rule: MappingRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Every rule must be a valid root rule.
    pub fn validate(&self) -> Result<()> {
        self.rules.iter().try_for_each(MappingRule::validate)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let set: RuleSet = serde_json::from_str(text)?;
        set.validate()?;
        Ok(set)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_toon(text: &str) -> Result<Self> {
        let value: serde_json::Value =
            toon_format::decode_default(text).map_err(|err| MappingError::Config(err.to_string()))?;
        let set: RuleSet = serde_json::from_value(value)?;
        set.validate()?;
        Ok(set)
    }

    pub fn to_toon(&self) -> Result<String> {
        let value = serde_json::to_value(self)?;
        toon_format::encode_default(&value).map_err(|err| MappingError::Config(err.to_string()))
    }

    /// Load a rule set, picking the format from the file extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| MappingError::Config(format!("{}: {err}", path.display())))?;

        let set = match path.extension().and_then(|ext| ext.to_str()) {
            Some("toon") => Self::from_toon(&text)?,
            Some("json") => Self::from_json(&text)?,
            _ => return Err(MappingError::Config(format!("{}: expected a .toon or .json file", path.display()))),
        };
        tracing::debug!(path = %path.display(), rules = set.rules.len(), "loaded rule set");
        Ok(set)
    }

    /// Register every rule with a new tool, in document order. Rule ids are
    /// the rule positions in `rules`.
    pub fn into_tool(self, id: ToolId) -> Result<MappingTool> {
        let mut tool = MappingTool::new(id, self.name).with_config(self.tool);
        for rule in self.rules {
            tool.add_rule(rule)?;
        }
        Ok(tool)
    }
}
