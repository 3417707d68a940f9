//! Role-based access policy for the supply-chain dataset.
//!
//! The policy is a plain table: role name to visible tables, visible columns and a
//! global-access flag. It is loaded once at startup and shared read-only; nothing in
//! the generator or the guard branches on role names.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::caller::{Region, Role};
use crate::errors::QueryError;

pub const DEFAULT_REGION_COLUMN: &str = "order_country";
pub const DEFAULT_UNRESTRICTED_REGION: &str = "All";
pub const WILDCARD_COLUMN: &str = "*";
pub const SUPPLY_CHAIN_TABLE: &str = "supply_chain";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePolicy {
    pub allowed_tables: BTreeSet<String>,
    pub allowed_columns: Vec<String>,
    #[serde(default)]
    pub global_access: bool,
}

impl RolePolicy {
    pub fn allows_all_columns(&self) -> bool {
        self.allowed_columns.iter().any(|column| column == WILDCARD_COLUMN)
    }

    pub fn allows_table(&self, table: &str) -> bool {
        self.allowed_tables.iter().any(|allowed| allowed.eq_ignore_ascii_case(table))
    }

    pub fn allows_column(&self, column: &str) -> bool {
        self.allows_all_columns()
            || self.allowed_columns.iter().any(|allowed| allowed.eq_ignore_ascii_case(column))
    }
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("could not read access policy `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse access policy: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("access policy validation failed: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessPolicy {
    roles: BTreeMap<String, RolePolicy>,
    region_column: String,
    unrestricted_region: String,
}

#[derive(Debug, Deserialize)]
struct PolicyDocument {
    region_column: Option<String>,
    unrestricted_region: Option<String>,
    #[serde(default)]
    roles: BTreeMap<String, RolePolicy>,
}

impl AccessPolicy {
    pub fn new(
        roles: BTreeMap<String, RolePolicy>,
        region_column: impl Into<String>,
        unrestricted_region: impl Into<String>,
    ) -> Result<Self, PolicyError> {
        let policy = Self {
            roles,
            region_column: region_column.into(),
            unrestricted_region: unrestricted_region.into(),
        };
        policy.validate()?;
        Ok(policy)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, PolicyError> {
        let document = toml::from_str::<PolicyDocument>(raw)?;
        Self::new(
            document.roles,
            document.region_column.unwrap_or_else(|| DEFAULT_REGION_COLUMN.to_string()),
            document
                .unrestricted_region
                .unwrap_or_else(|| DEFAULT_UNRESTRICTED_REGION.to_string()),
        )
    }

    pub fn load(path: &Path) -> Result<Self, PolicyError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| PolicyError::ReadFile { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&raw)
    }

    /// Policy shipped for the DataCo supply-chain dataset.
    pub fn builtin() -> Self {
        let shared = [
            "order_id",
            "order_date_dateorders",
            "order_country",
            "order_region",
            "market",
            "category_id",
            "category_name",
            "product_name",
        ];

        let finance = role(
            &shared,
            &[
                "department_name",
                "sales",
                "order_item_total",
                "order_item_discount",
                "order_item_discount_rate",
                "order_item_profit_ratio",
                "order_profit_per_order",
                "benefit_per_order",
                "sales_per_customer",
                "customer_segment",
            ],
            false,
        );
        let planning = role(
            &shared,
            &[
                "shipping_date_dateorders",
                "order_item_quantity",
                "days_for_shipping_real",
                "days_for_shipment_scheduled",
                "shipping_mode",
                "delivery_status",
                "late_delivery_risk",
                "order_status",
            ],
            false,
        );
        let sales = role(
            &shared,
            &["order_city", "customer_segment", "sales", "order_item_quantity", "order_status"],
            false,
        );
        let operations = RolePolicy {
            allowed_tables: BTreeSet::from([SUPPLY_CHAIN_TABLE.to_string()]),
            allowed_columns: vec![WILDCARD_COLUMN.to_string()],
            global_access: true,
        };

        Self {
            roles: BTreeMap::from([
                ("Operations Manager".to_string(), operations),
                ("Finance".to_string(), finance),
                ("Planning".to_string(), planning),
                ("Sales".to_string(), sales),
            ]),
            region_column: DEFAULT_REGION_COLUMN.to_string(),
            unrestricted_region: DEFAULT_UNRESTRICTED_REGION.to_string(),
        }
    }

    pub fn entry(&self, role: &Role) -> Result<&RolePolicy, QueryError> {
        self.roles
            .get(role.as_str())
            .ok_or_else(|| QueryError::UnknownRole { role: role.as_str().to_string() })
    }

    pub fn is_known_role(&self, role: &Role) -> bool {
        self.roles.contains_key(role.as_str())
    }

    pub fn allowed_tables(&self, role: &Role) -> Option<&BTreeSet<String>> {
        self.roles.get(role.as_str()).map(|entry| &entry.allowed_tables)
    }

    pub fn allowed_columns(&self, role: &Role) -> Option<&[String]> {
        self.roles.get(role.as_str()).map(|entry| entry.allowed_columns.as_slice())
    }

    /// Unknown roles never have global access.
    pub fn is_global_access(&self, role: &Role) -> bool {
        self.roles.get(role.as_str()).map(|entry| entry.global_access).unwrap_or(false)
    }

    pub fn region_column(&self) -> &str {
        &self.region_column
    }

    pub fn unrestricted_region(&self) -> &str {
        &self.unrestricted_region
    }

    pub fn resolve_region(&self, raw: &str) -> Region {
        Region::resolve(raw, &self.unrestricted_region)
    }

    pub fn role_names(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    fn validate(&self) -> Result<(), PolicyError> {
        if self.roles.is_empty() {
            return Err(PolicyError::Validation("at least one role must be defined".to_string()));
        }

        if !is_plain_identifier(&self.region_column) {
            return Err(PolicyError::Validation(format!(
                "region_column `{}` must be a plain lower-case identifier",
                self.region_column
            )));
        }

        if self.unrestricted_region.trim().is_empty() {
            return Err(PolicyError::Validation(
                "unrestricted_region sentinel must not be empty".to_string(),
            ));
        }

        for (name, entry) in &self.roles {
            if name.trim().is_empty() {
                return Err(PolicyError::Validation("role names must not be empty".to_string()));
            }
            if entry.allowed_tables.is_empty() {
                return Err(PolicyError::Validation(format!(
                    "role `{name}` must allow at least one table"
                )));
            }
            if entry.allowed_columns.is_empty() {
                return Err(PolicyError::Validation(format!(
                    "role `{name}` must allow at least one column"
                )));
            }
        }

        Ok(())
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::builtin()
    }
}

fn role(shared: &[&str], extra: &[&str], global_access: bool) -> RolePolicy {
    RolePolicy {
        allowed_tables: BTreeSet::from([SUPPLY_CHAIN_TABLE.to_string()]),
        allowed_columns: shared.iter().chain(extra).map(|column| column.to_string()).collect(),
        global_access,
    }
}

fn is_plain_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_lowercase() || first == '_')
        && chars.all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_')
}
