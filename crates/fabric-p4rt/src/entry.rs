//! Table entries in their symbolic, wire and decoded forms.
//!
//! - [`EntryRequest`]: names and typed values, as written by the composer
//! - [`TableEntry`]: numeric ids and canonical bytes, as sent to a device
//! - [`DecodedEntry`]: names and raw bytes recovered from a device read
//!
//! A [`SchemaResolver`](crate::SchemaResolver) converts between them.

use crate::value::{render_value, FieldValue};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a symbolic match field should be matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchSpec {
    Exact(FieldValue),
    Lpm { value: FieldValue, prefix_len: u8 },
    Ternary { value: FieldValue, mask: FieldValue },
}

/// A named match field with its requested value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchField {
    pub name: String,
    pub spec: MatchSpec,
}

/// A named action parameter with its value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionParam {
    pub name: String,
    pub value: FieldValue,
}

/// A table entry expressed with symbolic names.
///
/// # Example
///
/// ```
/// use fabric_p4rt::EntryRequest;
/// use fabric_types::Ipv4Address;
///
/// let request = EntryRequest::new("MyIngress.ipv4_lpm")
///     .lpm("hdr.ipv4.dstAddr", Ipv4Address::new(10, 0, 2, 2), 32)
///     .action("MyIngress.myTunnel_ingress")
///     .param("dst_id", 100u32);
/// assert_eq!(request.matches.len(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRequest {
    pub table: String,
    pub matches: Vec<MatchField>,
    pub action: String,
    pub params: Vec<ActionParam>,
    pub priority: i32,
}

impl EntryRequest {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            matches: Vec::new(),
            action: String::new(),
            params: Vec::new(),
            priority: 0,
        }
    }

    pub fn exact(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.matches.push(MatchField {
            name: field.into(),
            spec: MatchSpec::Exact(value.into()),
        });
        self
    }

    pub fn lpm(
        mut self,
        field: impl Into<String>,
        value: impl Into<FieldValue>,
        prefix_len: u8,
    ) -> Self {
        self.matches.push(MatchField {
            name: field.into(),
            spec: MatchSpec::Lpm {
                value: value.into(),
                prefix_len,
            },
        });
        self
    }

    pub fn ternary(
        mut self,
        field: impl Into<String>,
        value: impl Into<FieldValue>,
        mask: impl Into<FieldValue>,
    ) -> Self {
        self.matches.push(MatchField {
            name: field.into(),
            spec: MatchSpec::Ternary {
                value: value.into(),
                mask: mask.into(),
            },
        });
        self
    }

    pub fn action(mut self, action: impl Into<String>) -> Self {
        self.action = action.into();
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.params.push(ActionParam {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Ternary and range entries need a non-zero priority.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// An encoded match value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchValue {
    Exact { value: Vec<u8> },
    Lpm { value: Vec<u8>, prefix_len: u8 },
    Ternary { value: Vec<u8>, mask: Vec<u8> },
}

/// One encoded match field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldMatch {
    pub field_id: u32,
    pub value: MatchValue,
}

/// One encoded action parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParamValue {
    pub param_id: u32,
    pub value: Vec<u8>,
}

/// An encoded action invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionCall {
    pub action_id: u32,
    pub params: Vec<ParamValue>,
}

/// A validated table entry ready to be written to a device.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableEntry {
    pub table_id: u32,
    /// Symbolic table name, kept for logging.
    pub table: String,
    pub matches: Vec<FieldMatch>,
    pub action: ActionCall,
    #[serde(default)]
    pub priority: i32,
    /// Set for the entry of a keyless table: writing it replaces the table's
    /// default action instead of adding a row.
    #[serde(default)]
    pub is_default_action: bool,
}

/// The identity of an entry within a device: two entries with equal keys
/// occupy the same slot and the later write replaces the earlier one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryKey {
    pub table_id: u32,
    pub priority: i32,
    pub matches: Vec<FieldMatch>,
}

impl TableEntry {
    pub fn key(&self) -> EntryKey {
        let mut matches = self.matches.clone();
        matches.sort();
        EntryKey {
            table_id: self.table_id,
            priority: self.priority,
            matches,
        }
    }
}

/// A decoded match field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMatch {
    pub field: String,
    pub bitwidth: u32,
    pub value: MatchValue,
}

/// A decoded action parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedParam {
    pub name: String,
    pub bitwidth: u32,
    pub value: Vec<u8>,
}

/// A table entry translated back to names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEntry {
    pub table: String,
    pub matches: Vec<DecodedMatch>,
    pub action: String,
    pub params: Vec<DecodedParam>,
    pub is_default_action: bool,
}

impl DecodedEntry {
    pub fn match_field(&self, name: &str) -> Option<&DecodedMatch> {
        self.matches.iter().find(|m| m.field == name)
    }

    pub fn param(&self, name: &str) -> Option<&DecodedParam> {
        self.params.iter().find(|p| p.name == name)
    }
}

impl fmt::Display for DecodedMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            MatchValue::Exact { value } => {
                write!(f, "{} {}", self.field, render_value(value, self.bitwidth))
            }
            MatchValue::Lpm { value, prefix_len } => write!(
                f,
                "{} {}/{}",
                self.field,
                render_value(value, self.bitwidth),
                prefix_len
            ),
            MatchValue::Ternary { value, mask } => write!(
                f,
                "{} {} &&& {}",
                self.field,
                render_value(value, self.bitwidth),
                render_value(mask, self.bitwidth)
            ),
        }
    }
}

impl fmt::Display for DecodedEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.table)?;
        if self.is_default_action {
            f.write_str(" (default)")?;
        }
        for m in &self.matches {
            write!(f, " {m}")?;
        }
        write!(f, " -> {}", self.action)?;
        for p in &self.params {
            write!(f, " {} {}", p.name, render_value(&p.value, p.bitwidth))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builder_preserves_order() {
        let request = EntryRequest::new("MyIngress.check_ports")
            .exact("standard_metadata.ingress_port", 1u32)
            .exact("standard_metadata.egress_spec", 3u32)
            .action("MyIngress.set_direction")
            .param("dir", 0u32);

        let names: Vec<_> = request.matches.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["standard_metadata.ingress_port", "standard_metadata.egress_spec"]
        );
        assert_eq!(request.action, "MyIngress.set_direction");
        assert_eq!(request.priority, 0);
    }

    #[test]
    fn test_key_ignores_match_order_and_action() {
        let a = FieldMatch {
            field_id: 1,
            value: MatchValue::Exact { value: vec![1] },
        };
        let b = FieldMatch {
            field_id: 2,
            value: MatchValue::Exact { value: vec![3] },
        };
        let first = TableEntry {
            table_id: 7,
            table: "t".into(),
            matches: vec![a.clone(), b.clone()],
            action: ActionCall {
                action_id: 1,
                params: vec![],
            },
            priority: 0,
            is_default_action: false,
        };
        let second = TableEntry {
            matches: vec![b, a],
            action: ActionCall {
                action_id: 2,
                params: vec![],
            },
            ..first.clone()
        };

        assert_eq!(first.key(), second.key());
    }

    #[test]
    fn test_decoded_display() {
        let entry = DecodedEntry {
            table: "MyIngress.ipv4_lpm".into(),
            matches: vec![DecodedMatch {
                field: "hdr.ipv4.dstAddr".into(),
                bitwidth: 32,
                value: MatchValue::Lpm {
                    value: vec![10, 0, 2, 2],
                    prefix_len: 32,
                },
            }],
            action: "MyIngress.myTunnel_ingress".into(),
            params: vec![DecodedParam {
                name: "dst_id".into(),
                bitwidth: 16,
                value: vec![0, 100],
            }],
            is_default_action: false,
        };

        assert_eq!(
            entry.to_string(),
            "MyIngress.ipv4_lpm: hdr.ipv4.dstAddr 10.0.2.2/32 -> MyIngress.myTunnel_ingress dst_id 100"
        );
    }

    #[test]
    fn test_default_action_display() {
        let entry = DecodedEntry {
            table: "MyEgress.swtrace".into(),
            matches: vec![],
            action: "MyEgress.add_swtrace".into(),
            params: vec![DecodedParam {
                name: "swid".into(),
                bitwidth: 16,
                value: vec![0, 2],
            }],
            is_default_action: true,
        };

        assert_eq!(
            entry.to_string(),
            "MyEgress.swtrace: (default) -> MyEgress.add_swtrace swid 2"
        );
    }
}
