// crates/virt-gate-core/src/core/catalog.rs
// ============================================================================
// Module: Virt Gate Operation Catalog
// Description: Static catalog of gated operations and their parameter schemas.
// Purpose: Define the operations the gateway accepts and how they behave.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Every operation the gateway accepts is declared here with a class and an
//! ordered parameter schema. The class drives read-only enforcement and
//! replay decisions in the connection manager; the schema drives request
//! validation and tool input schemas.
//!
//! Operations absent from the catalog are rejected during validation, so the
//! catalog is also the outer bound of what any allow-list can grant.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use serde_json::Value;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Side-effect class of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    /// Query with no side effects; safe to replay.
    Read,
    /// Changes runtime state of an existing resource.
    Mutating,
    /// Creates or removes resources.
    Destructive,
}

impl OperationClass {
    /// Returns true when the class changes backend state.
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        !matches!(self, Self::Read)
    }

    /// Returns the stable label for the class.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Mutating => "mutating",
            Self::Destructive => "destructive",
        }
    }
}

/// Value kind accepted by a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Resource name checked by [`crate::validate_domain_name`].
    DomainName,
    /// XML document checked by [`crate::validate_xml_document`].
    Xml,
    /// JSON boolean.
    Boolean,
    /// One string out of a fixed set.
    Choice(&'static [&'static str]),
    /// List of distinct strings drawn from a fixed set.
    ChoiceList(&'static [&'static str]),
}

/// Default applied when a parameter is omitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDefault {
    /// Boolean default.
    Bool(bool),
    /// String default for a choice parameter.
    Choice(&'static str),
    /// Every option of a choice-list parameter.
    AllChoices,
}

/// Declared parameter of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    /// Parameter name.
    pub name: &'static str,
    /// Accepted value kind.
    pub kind: ParamKind,
    /// Default value; parameters without one are required.
    pub default: Option<ParamDefault>,
    /// Human-readable description.
    pub description: &'static str,
}

impl ParamSpec {
    /// Returns true when the parameter must be supplied.
    #[must_use]
    pub const fn is_required(&self) -> bool {
        self.default.is_none()
    }

    /// Returns the default as a JSON value, when one is declared.
    #[must_use]
    pub fn default_value(&self) -> Option<Value> {
        let default = self.default?;
        Some(match (default, self.kind) {
            (ParamDefault::Bool(value), _) => Value::Bool(value),
            (ParamDefault::Choice(value), _) => Value::String(value.to_string()),
            (ParamDefault::AllChoices, ParamKind::ChoiceList(options)) => {
                Value::Array(options.iter().map(|option| Value::String((*option).to_string())).collect())
            }
            (ParamDefault::AllChoices, _) => Value::Array(Vec::new()),
        })
    }
}

/// Catalog entry for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationSpec {
    /// Dotted operation name.
    pub name: &'static str,
    /// Side-effect class.
    pub class: OperationClass,
    /// Human-readable description.
    pub description: &'static str,
    /// Ordered parameter schema.
    pub params: &'static [ParamSpec],
}

impl OperationSpec {
    /// Returns the parameter spec with the given name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&'static ParamSpec> {
        self.params.iter().find(|param| param.name == name)
    }
}

// ============================================================================
// SECTION: Parameter Sets
// ============================================================================

/// States accepted by `domain.list`.
pub const DOMAIN_LIST_STATES: &[&str] = &["all", "running", "stopped", "active", "inactive"];

/// Statistics groups accepted by `domain.stats`.
pub const DOMAIN_STATS_FLAGS: &[&str] = &["state", "cpu-total", "balloon", "vcpu", "interface", "block"];

/// Required domain name parameter.
const NAME: ParamSpec = ParamSpec {
    name: "name",
    kind: ParamKind::DomainName,
    default: None,
    description: "Domain name",
};

/// Optional force flag.
const FORCE: ParamSpec = ParamSpec {
    name: "force",
    kind: ParamKind::Boolean,
    default: Some(ParamDefault::Bool(false)),
    description: "Force the operation",
};

/// Parameters shared by device attach and detach.
const DEVICE_PARAMS: &[ParamSpec] = &[
    ParamSpec {
        name: "domain_name",
        kind: ParamKind::DomainName,
        default: None,
        description: "Domain name",
    },
    ParamSpec {
        name: "device_xml",
        kind: ParamKind::Xml,
        default: None,
        description: "Device XML definition",
    },
    ParamSpec {
        name: "live",
        kind: ParamKind::Boolean,
        default: Some(ParamDefault::Bool(true)),
        description: "Apply to the running domain",
    },
    ParamSpec {
        name: "persistent",
        kind: ParamKind::Boolean,
        default: Some(ParamDefault::Bool(true)),
        description: "Apply to the persistent configuration",
    },
];

// ============================================================================
// SECTION: Catalog
// ============================================================================

/// Every operation the gateway understands.
const CATALOG: &[OperationSpec] = &[
    OperationSpec {
        name: "domain.list",
        class: OperationClass::Read,
        description: "List virtual machines with optional state filtering",
        params: &[
            ParamSpec {
                name: "state",
                kind: ParamKind::Choice(DOMAIN_LIST_STATES),
                default: Some(ParamDefault::Choice("all")),
                description: "Filter by domain state",
            },
            ParamSpec {
                name: "include_inactive",
                kind: ParamKind::Boolean,
                default: Some(ParamDefault::Bool(true)),
                description: "Include inactive domains",
            },
        ],
    },
    OperationSpec {
        name: "domain.info",
        class: OperationClass::Read,
        description: "Get detailed information about a virtual machine",
        params: &[NAME],
    },
    OperationSpec {
        name: "domain.start",
        class: OperationClass::Mutating,
        description: "Start a virtual machine",
        params: &[NAME, FORCE],
    },
    OperationSpec {
        name: "domain.stop",
        class: OperationClass::Mutating,
        description: "Stop a virtual machine (graceful unless forced)",
        params: &[NAME, FORCE],
    },
    OperationSpec {
        name: "domain.reboot",
        class: OperationClass::Mutating,
        description: "Reboot a virtual machine",
        params: &[NAME, FORCE],
    },
    OperationSpec {
        name: "domain.stats",
        class: OperationClass::Read,
        description: "Get performance statistics for a virtual machine",
        params: &[
            NAME,
            ParamSpec {
                name: "flags",
                kind: ParamKind::ChoiceList(DOMAIN_STATS_FLAGS),
                default: Some(ParamDefault::AllChoices),
                description: "Statistics groups to collect",
            },
        ],
    },
    OperationSpec {
        name: "domain.getxml",
        class: OperationClass::Read,
        description: "Get the XML configuration of a virtual machine",
        params: &[NAME],
    },
    OperationSpec {
        name: "domain.create",
        class: OperationClass::Destructive,
        description: "Create a virtual machine from an XML definition",
        params: &[
            ParamSpec {
                name: "xml",
                kind: ParamKind::Xml,
                default: None,
                description: "Domain XML definition",
            },
            ParamSpec {
                name: "ephemeral",
                kind: ParamKind::Boolean,
                default: Some(ParamDefault::Bool(false)),
                description: "Start a transient domain instead of defining it",
            },
        ],
    },
    OperationSpec {
        name: "domain.delete",
        class: OperationClass::Destructive,
        description: "Delete a virtual machine definition",
        params: &[
            NAME,
            ParamSpec {
                name: "remove_storage",
                kind: ParamKind::Boolean,
                default: Some(ParamDefault::Bool(false)),
                description: "Remove associated storage volumes",
            },
            FORCE,
        ],
    },
    OperationSpec {
        name: "domain.attach_device",
        class: OperationClass::Mutating,
        description: "Attach a device to a virtual machine",
        params: DEVICE_PARAMS,
    },
    OperationSpec {
        name: "domain.detach_device",
        class: OperationClass::Mutating,
        description: "Detach a device from a virtual machine",
        params: DEVICE_PARAMS,
    },
    OperationSpec {
        name: "host.info",
        class: OperationClass::Read,
        description: "Get hypervisor host information",
        params: &[],
    },
    OperationSpec {
        name: "network.list",
        class: OperationClass::Read,
        description: "List virtual networks",
        params: &[],
    },
    OperationSpec {
        name: "storage.list",
        class: OperationClass::Read,
        description: "List storage pools",
        params: &[],
    },
];

/// Returns every catalog operation in declaration order.
#[must_use]
pub const fn catalog() -> &'static [OperationSpec] {
    CATALOG
}

/// Looks up a catalog operation by name.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static OperationSpec> {
    CATALOG.iter().find(|spec| spec.name == name)
}

/// Returns the names of all operations in the given class.
pub fn names_in_class(class: OperationClass) -> impl Iterator<Item = &'static str> {
    CATALOG.iter().filter(move |spec| spec.class == class).map(|spec| spec.name)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::OperationClass;
    use super::catalog;
    use super::lookup;
    use super::names_in_class;
    use crate::core::identifiers::is_dotted_identifier;

    #[test]
    fn catalog_names_are_unique_and_well_formed() {
        let mut seen = BTreeSet::new();
        for spec in catalog() {
            assert!(is_dotted_identifier(spec.name), "{} is malformed", spec.name);
            assert!(seen.insert(spec.name), "{} is duplicated", spec.name);
        }
        assert_eq!(seen.len(), 14);
    }

    #[test]
    fn destructive_class_covers_create_and_delete() {
        let destructive: Vec<_> = names_in_class(OperationClass::Destructive).collect();
        assert_eq!(destructive, vec!["domain.create", "domain.delete"]);
    }

    #[test]
    fn stats_flags_default_to_every_group() {
        let spec = lookup("domain.stats").map(|spec| spec.param("flags"));
        let default = spec.flatten().and_then(super::ParamSpec::default_value);
        assert_eq!(
            default,
            Some(serde_json::json!(["state", "cpu-total", "balloon", "vcpu", "interface", "block"]))
        );
    }
}
