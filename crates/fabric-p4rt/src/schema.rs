//! P4Info schema model and symbolic name resolution.
//!
//! The model mirrors the JSON P4Info produced by `p4c --p4runtime-files`.
//! [`SchemaResolver`] turns symbolic [`EntryRequest`]s into validated
//! [`TableEntry`]s and decodes entries read back from a device.

use crate::entry::{
    ActionCall, ActionParam, DecodedEntry, DecodedMatch, DecodedParam, EntryRequest, FieldMatch,
    MatchField, MatchSpec, MatchValue, ParamValue, TableEntry,
};
use crate::value::{mask_prefix, FieldValue};
use serde::{Deserialize, Deserializer};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading a schema or resolving names against it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("failed to read P4Info {path}: {message}")]
    Load { path: String, message: String },

    #[error("failed to parse P4Info: {0}")]
    Parse(String),

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown action: {0}")]
    UnknownAction(String),

    #[error("unknown counter: {0}")]
    UnknownCounter(String),

    #[error("unknown table id: {0}")]
    UnknownTableId(u32),

    #[error("unknown action id: {0}")]
    UnknownActionId(u32),

    #[error("table {table} has no match field {field}")]
    UnknownField { table: String, field: String },

    #[error("table {table} has no match field with id {id}")]
    UnknownFieldId { table: String, id: u32 },

    #[error("action {action} has no parameter {param}")]
    UnknownParam { action: String, param: String },

    #[error("action {action} has no parameter with id {id}")]
    UnknownParamId { action: String, id: u32 },

    #[error("action {action} is not valid for table {table}")]
    ActionNotAllowed { table: String, action: String },

    #[error("match field {field} given twice for table {table}")]
    DuplicateField { table: String, field: String },

    #[error("parameter {param} given twice for action {action}")]
    DuplicateParam { action: String, param: String },

    #[error("table {table} requires match field {field}")]
    MissingField { table: String, field: String },

    #[error("action {action} requires parameter {param}")]
    MissingParam { action: String, param: String },

    #[error("match field {field} of table {table} is {expected}, not {found}")]
    MatchKindMismatch {
        table: String,
        field: String,
        expected: MatchKind,
        found: MatchKind,
    },

    #[error("value {value} does not fit the {bitwidth}-bit field {name}")]
    ValueTooWide {
        name: String,
        bitwidth: u32,
        value: String,
    },

    #[error("prefix length {prefix_len} exceeds the {bitwidth}-bit field {field}")]
    PrefixTooLong {
        field: String,
        prefix_len: u8,
        bitwidth: u32,
    },

    #[error("table {0} needs a positive priority")]
    MissingPriority(String),

    #[error("table {0} does not take a priority")]
    UnexpectedPriority(String),
}

impl SchemaError {
    fn unknown_field(table: &str, field: &str) -> Self {
        SchemaError::UnknownField {
            table: table.to_string(),
            field: field.to_string(),
        }
    }

    fn unknown_param(action: &str, param: &str) -> Self {
        SchemaError::UnknownParam {
            action: action.to_string(),
            param: param.to_string(),
        }
    }
}

/// Match kinds a P4 table key can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchKind {
    Exact,
    Lpm,
    Ternary,
    Range,
    Optional,
    #[serde(other)]
    Unspecified,
}

impl MatchKind {
    fn needs_priority(&self) -> bool {
        matches!(
            self,
            MatchKind::Ternary | MatchKind::Range | MatchKind::Optional
        )
    }
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MatchKind::Exact => "exact",
            MatchKind::Lpm => "lpm",
            MatchKind::Ternary => "ternary",
            MatchKind::Range => "range",
            MatchKind::Optional => "optional",
            MatchKind::Unspecified => "unspecified",
        };
        f.write_str(name)
    }
}

impl MatchSpec {
    pub fn kind(&self) -> MatchKind {
        match self {
            MatchSpec::Exact(_) => MatchKind::Exact,
            MatchSpec::Lpm { .. } => MatchKind::Lpm,
            MatchSpec::Ternary { .. } => MatchKind::Ternary,
        }
    }
}

/// Where an action may be used within a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionScope {
    #[default]
    TableAndDefault,
    TableOnly,
    DefaultOnly,
}

/// Counter units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CounterUnit {
    #[default]
    Unspecified,
    Bytes,
    Packets,
    Both,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Preamble {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchFieldInfo {
    pub id: u32,
    pub name: String,
    pub bitwidth: u32,
    #[serde(default = "default_match_kind")]
    pub match_type: MatchKind,
}

fn default_match_kind() -> MatchKind {
    MatchKind::Unspecified
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActionRef {
    pub id: u32,
    #[serde(default)]
    pub scope: ActionScope,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableInfo {
    pub preamble: Preamble,
    #[serde(default)]
    pub match_fields: Vec<MatchFieldInfo>,
    #[serde(default)]
    pub action_refs: Vec<ActionRef>,
    #[serde(default, deserialize_with = "de_int64")]
    pub size: i64,
}

impl TableInfo {
    pub fn name(&self) -> &str {
        &self.preamble.name
    }

    pub fn match_field(&self, name: &str) -> Option<&MatchFieldInfo> {
        self.match_fields.iter().find(|f| f.name == name)
    }

    pub fn match_field_by_id(&self, id: u32) -> Option<&MatchFieldInfo> {
        self.match_fields.iter().find(|f| f.id == id)
    }

    /// A keyless table only holds its default action.
    pub fn is_keyless(&self) -> bool {
        self.match_fields.is_empty()
    }

    /// Returns true if `action_id` may appear in an entry of this table.
    /// Keyless tables take any action not scoped `TABLE_ONLY`, since their
    /// only entry is the default.
    pub fn allows_action(&self, action_id: u32) -> bool {
        let excluded = if self.is_keyless() {
            ActionScope::TableOnly
        } else {
            ActionScope::DefaultOnly
        };
        self.action_refs
            .iter()
            .any(|r| r.id == action_id && r.scope != excluded)
    }

    fn needs_priority(&self) -> bool {
        self.match_fields.iter().any(|f| f.match_type.needs_priority())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParamInfo {
    pub id: u32,
    pub name: String,
    pub bitwidth: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ActionInfo {
    pub preamble: Preamble,
    #[serde(default)]
    pub params: Vec<ParamInfo>,
}

impl ActionInfo {
    pub fn name(&self) -> &str {
        &self.preamble.name
    }

    pub fn param(&self, name: &str) -> Option<&ParamInfo> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn param_by_id(&self, id: u32) -> Option<&ParamInfo> {
        self.params.iter().find(|p| p.id == id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct CounterSpec {
    #[serde(default)]
    pub unit: CounterUnit,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CounterInfo {
    pub preamble: Preamble,
    #[serde(default)]
    pub spec: CounterSpec,
    #[serde(default, deserialize_with = "de_int64")]
    pub size: i64,
}

impl CounterInfo {
    pub fn name(&self) -> &str {
        &self.preamble.name
    }

    pub fn id(&self) -> u32 {
        self.preamble.id
    }
}

/// A P4Info document.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct P4Info {
    #[serde(default)]
    pub tables: Vec<TableInfo>,
    #[serde(default)]
    pub actions: Vec<ActionInfo>,
    #[serde(default)]
    pub counters: Vec<CounterInfo>,
}

/// Protobuf JSON writes int64 fields as strings.
fn de_int64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Int64 {
        Number(i64),
        Text(String),
    }

    match Int64::deserialize(deserializer)? {
        Int64::Number(n) => Ok(n),
        Int64::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

fn encode_value(name: &str, value: &FieldValue, bitwidth: u32) -> Result<Vec<u8>, SchemaError> {
    value.encode(bitwidth).ok_or_else(|| SchemaError::ValueTooWide {
        name: name.to_string(),
        bitwidth,
        value: value.to_string(),
    })
}

/// Name and id lookups over a pipeline schema, plus entry encoding and
/// decoding built on them.
///
/// Lookups accept either the fully-qualified name (`MyIngress.ipv4_lpm`) or
/// the alias (`ipv4_lpm`).
pub trait SchemaResolver: Send + Sync {
    fn table(&self, name: &str) -> Result<&TableInfo, SchemaError>;

    fn table_by_id(&self, id: u32) -> Result<&TableInfo, SchemaError>;

    fn action(&self, name: &str) -> Result<&ActionInfo, SchemaError>;

    fn action_by_id(&self, id: u32) -> Result<&ActionInfo, SchemaError>;

    fn counter(&self, name: &str) -> Result<&CounterInfo, SchemaError>;

    /// Encodes one match field of `table`.
    ///
    /// LPM values are masked to their prefix and ternary values to their
    /// mask, so equal keys always encode to equal bytes.
    fn encode_match(&self, table: &str, field: &MatchField) -> Result<FieldMatch, SchemaError> {
        let info = self.table(table)?;
        let mf = info
            .match_field(&field.name)
            .ok_or_else(|| SchemaError::unknown_field(info.name(), &field.name))?;

        let value = match (mf.match_type, &field.spec) {
            (MatchKind::Exact, MatchSpec::Exact(value)) => MatchValue::Exact {
                value: encode_value(&mf.name, value, mf.bitwidth)?,
            },
            (MatchKind::Lpm, MatchSpec::Lpm { value, prefix_len }) => {
                if u32::from(*prefix_len) > mf.bitwidth {
                    return Err(SchemaError::PrefixTooLong {
                        field: mf.name.clone(),
                        prefix_len: *prefix_len,
                        bitwidth: mf.bitwidth,
                    });
                }
                let mut bytes = encode_value(&mf.name, value, mf.bitwidth)?;
                mask_prefix(&mut bytes, u32::from(*prefix_len));
                MatchValue::Lpm {
                    value: bytes,
                    prefix_len: *prefix_len,
                }
            }
            (MatchKind::Ternary, MatchSpec::Ternary { value, mask }) => {
                let mask = encode_value(&mf.name, mask, mf.bitwidth)?;
                let mut value = encode_value(&mf.name, value, mf.bitwidth)?;
                for (byte, m) in value.iter_mut().zip(&mask) {
                    *byte &= *m;
                }
                MatchValue::Ternary { value, mask }
            }
            (expected, spec) => {
                return Err(SchemaError::MatchKindMismatch {
                    table: info.name().to_string(),
                    field: mf.name.clone(),
                    expected,
                    found: spec.kind(),
                })
            }
        };

        Ok(FieldMatch {
            field_id: mf.id,
            value,
        })
    }

    /// Encodes an action call for `table`, checking that the action is
    /// allowed there and that every parameter is given exactly once.
    fn encode_action(
        &self,
        table: &str,
        action: &str,
        params: &[ActionParam],
    ) -> Result<ActionCall, SchemaError> {
        let table_info = self.table(table)?;
        let info = self.action(action)?;
        if !table_info.allows_action(info.preamble.id) {
            return Err(SchemaError::ActionNotAllowed {
                table: table_info.name().to_string(),
                action: info.name().to_string(),
            });
        }

        let mut seen = HashSet::new();
        let mut encoded = Vec::with_capacity(params.len());
        for param in params {
            let p = info
                .param(&param.name)
                .ok_or_else(|| SchemaError::unknown_param(info.name(), &param.name))?;
            if !seen.insert(p.id) {
                return Err(SchemaError::DuplicateParam {
                    action: info.name().to_string(),
                    param: p.name.clone(),
                });
            }
            encoded.push(ParamValue {
                param_id: p.id,
                value: encode_value(&p.name, &param.value, p.bitwidth)?,
            });
        }

        if let Some(missing) = info.params.iter().find(|p| !seen.contains(&p.id)) {
            return Err(SchemaError::MissingParam {
                action: info.name().to_string(),
                param: missing.name.clone(),
            });
        }

        Ok(ActionCall {
            action_id: info.preamble.id,
            params: encoded,
        })
    }

    /// Builds a fully validated entry from a symbolic request.
    ///
    /// A request for a keyless table becomes that table's default-action
    /// entry.
    fn build_entry(&self, request: &EntryRequest) -> Result<TableEntry, SchemaError> {
        let info = self.table(&request.table)?;

        let mut seen = HashSet::new();
        let mut matches = Vec::with_capacity(request.matches.len());
        for field in &request.matches {
            if !seen.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField {
                    table: info.name().to_string(),
                    field: field.name.clone(),
                });
            }
            matches.push(self.encode_match(&request.table, field)?);
        }

        if let Some(missing) = info
            .match_fields
            .iter()
            .find(|f| f.match_type == MatchKind::Exact && !seen.contains(f.name.as_str()))
        {
            return Err(SchemaError::MissingField {
                table: info.name().to_string(),
                field: missing.name.clone(),
            });
        }

        if info.needs_priority() {
            if request.priority <= 0 {
                return Err(SchemaError::MissingPriority(info.name().to_string()));
            }
        } else if request.priority != 0 {
            return Err(SchemaError::UnexpectedPriority(info.name().to_string()));
        }

        let action = self.encode_action(&request.table, &request.action, &request.params)?;

        Ok(TableEntry {
            table_id: info.preamble.id,
            table: info.name().to_string(),
            matches,
            action,
            priority: request.priority,
            is_default_action: info.is_keyless(),
        })
    }

    /// Translates an encoded entry back to names.
    fn decode_entry(&self, entry: &TableEntry) -> Result<DecodedEntry, SchemaError> {
        let table = self.table_by_id(entry.table_id)?;
        let action = self.action_by_id(entry.action.action_id)?;

        let matches = entry
            .matches
            .iter()
            .map(|m| {
                let mf = table
                    .match_field_by_id(m.field_id)
                    .ok_or_else(|| SchemaError::UnknownFieldId {
                        table: table.name().to_string(),
                        id: m.field_id,
                    })?;
                Ok(DecodedMatch {
                    field: mf.name.clone(),
                    bitwidth: mf.bitwidth,
                    value: m.value.clone(),
                })
            })
            .collect::<Result<Vec<_>, SchemaError>>()?;

        let params = entry
            .action
            .params
            .iter()
            .map(|p| {
                let info = action
                    .param_by_id(p.param_id)
                    .ok_or_else(|| SchemaError::UnknownParamId {
                        action: action.name().to_string(),
                        id: p.param_id,
                    })?;
                Ok(DecodedParam {
                    name: info.name.clone(),
                    bitwidth: info.bitwidth,
                    value: p.value.clone(),
                })
            })
            .collect::<Result<Vec<_>, SchemaError>>()?;

        Ok(DecodedEntry {
            table: table.name().to_string(),
            matches,
            action: action.name().to_string(),
            params,
            is_default_action: entry.is_default_action,
        })
    }
}

/// Index of one kind of P4 object by name, alias and id.
#[derive(Debug, Default)]
struct Index {
    by_name: HashMap<String, usize>,
    by_id: HashMap<u32, usize>,
}

impl Index {
    fn build<'a>(preambles: impl Iterator<Item = &'a Preamble>) -> Self {
        let mut index = Index::default();
        let preambles: Vec<_> = preambles.collect();
        for (pos, preamble) in preambles.iter().enumerate() {
            index.by_name.insert(preamble.name.clone(), pos);
            index.by_id.insert(preamble.id, pos);
        }
        // Aliases never shadow a fully-qualified name.
        for (pos, preamble) in preambles.iter().enumerate() {
            if !preamble.alias.is_empty() {
                index.by_name.entry(preamble.alias.clone()).or_insert(pos);
            }
        }
        index
    }
}

/// [`SchemaResolver`] backed by a parsed [`P4Info`].
#[derive(Debug)]
pub struct P4InfoResolver {
    p4info: P4Info,
    tables: Index,
    actions: Index,
    counters: Index,
}

impl P4InfoResolver {
    pub fn new(p4info: P4Info) -> Self {
        let tables = Index::build(p4info.tables.iter().map(|t| &t.preamble));
        let actions = Index::build(p4info.actions.iter().map(|a| &a.preamble));
        let counters = Index::build(p4info.counters.iter().map(|c| &c.preamble));
        debug!(
            tables = p4info.tables.len(),
            actions = p4info.actions.len(),
            counters = p4info.counters.len(),
            "Indexed P4Info"
        );
        Self {
            p4info,
            tables,
            actions,
            counters,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, SchemaError> {
        let p4info: P4Info =
            serde_json::from_str(json).map_err(|e| SchemaError::Parse(e.to_string()))?;
        Ok(Self::new(p4info))
    }

    /// Loads a JSON P4Info file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| SchemaError::Load {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json_str(&json)
    }

    pub fn p4info(&self) -> &P4Info {
        &self.p4info
    }
}

impl SchemaResolver for P4InfoResolver {
    fn table(&self, name: &str) -> Result<&TableInfo, SchemaError> {
        self.tables
            .by_name
            .get(name)
            .map(|&pos| &self.p4info.tables[pos])
            .ok_or_else(|| SchemaError::UnknownTable(name.to_string()))
    }

    fn table_by_id(&self, id: u32) -> Result<&TableInfo, SchemaError> {
        self.tables
            .by_id
            .get(&id)
            .map(|&pos| &self.p4info.tables[pos])
            .ok_or(SchemaError::UnknownTableId(id))
    }

    fn action(&self, name: &str) -> Result<&ActionInfo, SchemaError> {
        self.actions
            .by_name
            .get(name)
            .map(|&pos| &self.p4info.actions[pos])
            .ok_or_else(|| SchemaError::UnknownAction(name.to_string()))
    }

    fn action_by_id(&self, id: u32) -> Result<&ActionInfo, SchemaError> {
        self.actions
            .by_id
            .get(&id)
            .map(|&pos| &self.p4info.actions[pos])
            .ok_or(SchemaError::UnknownActionId(id))
    }

    fn counter(&self, name: &str) -> Result<&CounterInfo, SchemaError> {
        self.counters
            .by_name
            .get(name)
            .map(|&pos| &self.p4info.counters[pos])
            .ok_or_else(|| SchemaError::UnknownCounter(name.to_string()))
    }
}
