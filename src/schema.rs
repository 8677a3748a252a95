//! Static table definitions for the Duck Creek policy export hierarchy.
//!
//! The registry is built once with [`SchemaRegistry::duck_creek`] and shared
//! read-only (usually behind an `Arc`). It answers two kinds of questions:
//! what a table looks like (columns, keys, ingestion metadata), and which
//! element positions in a document produce rows for it (extraction rules).

use convert_case::{Case, Casing};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::entity::ColumnType;
use crate::extraction::FieldPath;

/// The target tables, in `list_tables` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Policies,
    Lines,
    Coverages,
    Exposures,
    Limits,
    Deductibles,
    Locations,
    Buildings,
    Occupancies,
    Accounts,
    Addresses,
    UnderwriterReferrals,
    TaxSurcharges,
}

impl Table {
    pub const ALL: [Table; 13] = [
        Table::Policies,
        Table::Lines,
        Table::Coverages,
        Table::Exposures,
        Table::Limits,
        Table::Deductibles,
        Table::Locations,
        Table::Buildings,
        Table::Occupancies,
        Table::Accounts,
        Table::Addresses,
        Table::UnderwriterReferrals,
        Table::TaxSurcharges,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Policies => "policies",
            Table::Lines => "lines",
            Table::Coverages => "coverages",
            Table::Exposures => "exposures",
            Table::Limits => "limits",
            Table::Deductibles => "deductibles",
            Table::Locations => "locations",
            Table::Buildings => "buildings",
            Table::Occupancies => "occupancies",
            Table::Accounts => "accounts",
            Table::Addresses => "addresses",
            Table::UnderwriterReferrals => "underwriter_referrals",
            Table::TaxSurcharges => "tax_surcharges",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = UnsupportedTable;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnsupportedTable {
                name: s.to_string(),
            })
    }
}

/// A table name that is not part of the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedTable {
    pub name: String,
}

impl fmt::Display for UnsupportedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unsupported table: '{}'", self.name)
    }
}

impl std::error::Error for UnsupportedTable {}

/// Hierarchy levels that can be open on the extraction context stack.
///
/// `Session` and `Data` are structural; the rest are opened by an entity row
/// and carry that row's key for the duration of its subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Session,
    Data,
    Policy,
    Line,
    Coverage,
    Account,
    Location,
}

impl Scope {
    /// Column that holds this scope's key when it appears as a foreign key.
    pub fn key_column(&self) -> Option<&'static str> {
        match self {
            Scope::Session | Scope::Data => None,
            Scope::Policy => Some("policy_id"),
            Scope::Line => Some("line_id"),
            Scope::Coverage => Some("coverage_id"),
            Scope::Account => Some("account_id"),
            Scope::Location => Some("location_id"),
        }
    }

    pub fn is_keyed(&self) -> bool {
        self.key_column().is_some()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Scope::Session => "session",
            Scope::Data => "data",
            Scope::Policy => "policy",
            Scope::Line => "line",
            Scope::Coverage => "coverage",
            Scope::Account => "account",
            Scope::Location => "location",
        };
        f.write_str(name)
    }
}

/// Why a column exists in a table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnRole {
    PrimaryKey,
    ForeignKey,
    Value,
    Lineage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ColumnType,
    pub nullable: bool,
    pub role: ColumnRole,
}

/// Columns appended to every row by the materializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineageColumn {
    SourceFile,
    FileModifiedTime,
    ExtractedAt,
}

impl LineageColumn {
    pub fn name(&self) -> &'static str {
        match self {
            LineageColumn::SourceFile => "source_file",
            LineageColumn::FileModifiedTime => "file_modified_time",
            LineageColumn::ExtractedAt => "_extracted_at",
        }
    }

    pub fn column_type(&self) -> ColumnType {
        match self {
            LineageColumn::SourceFile => ColumnType::String,
            LineageColumn::FileModifiedTime | LineageColumn::ExtractedAt => ColumnType::Timestamp,
        }
    }
}

/// Where a bound column reads its raw value from.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueSource {
    /// Child text or attribute path relative to the matched element
    Path(FieldPath),
    /// The `id` attribute of the document root
    SessionId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnBinding {
    pub column: String,
    pub ty: ColumnType,
    pub source: ValueSource,
}

/// How an entity's primary key is obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct KeySpec {
    pub column: &'static str,
    /// Attribute read verbatim when present
    pub id_attribute: &'static str,
    /// Prefix for synthesized keys
    pub prefix: &'static str,
}

/// Polymorphic attachment: the row links to whichever of these levels is
/// innermost on the context stack, and to no other.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentSpec {
    pub levels: Vec<Scope>,
}

impl AttachmentSpec {
    pub fn includes(&self, scope: Scope) -> bool {
        self.levels.contains(&scope)
    }
}

/// A tree-path pattern that produces rows for a table.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionRule {
    pub pattern: FieldPath,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionType {
    /// Rows are re-emitted whenever their source file changes
    Cdc,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub primary_keys: Vec<String>,
    pub cursor_field: String,
    pub ingestion_type: IngestionType,
}

/// Everything the registry knows about one table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub table: Table,
    pub key: KeySpec,
    /// Ancestor scopes whose keys are copied into the row
    pub parents: Vec<Scope>,
    pub attachment: Option<AttachmentSpec>,
    /// Scope this entity opens for its subtree, if any
    pub opens: Option<Scope>,
    pub bindings: Vec<ColumnBinding>,
    pub lineage: Vec<LineageColumn>,
    pub rules: Vec<ExtractionRule>,
    pub metadata: TableMetadata,
    columns: Vec<ColumnDef>,
    link_columns: Vec<Scope>,
}

impl TableSchema {
    /// Ordered column list, lineage columns last.
    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Columns filled by the extraction engine (everything except lineage).
    pub fn extracted_columns(&self) -> impl Iterator<Item = &str> {
        self.columns
            .iter()
            .filter(|c| c.role != ColumnRole::Lineage)
            .map(|c| c.name.as_str())
    }

    /// Foreign-key scopes in column order.
    pub fn link_scopes(&self) -> &[Scope] {
        &self.link_columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Declarative builder for one table definition.
struct EntityBuilder {
    table: Table,
    key: KeySpec,
    parents: Vec<Scope>,
    attachment: Option<AttachmentSpec>,
    opens: Option<Scope>,
    bindings: Vec<ColumnBinding>,
    lineage: Vec<LineageColumn>,
    rules: Vec<ExtractionRule>,
    links: Vec<Scope>,
    primary_keys: Vec<String>,
    cursor_field: &'static str,
}

impl EntityBuilder {
    fn new(table: Table, key_column: &'static str, prefix: &'static str) -> Self {
        Self {
            table,
            key: KeySpec {
                column: key_column,
                id_attribute: "id",
                prefix,
            },
            parents: Vec::new(),
            attachment: None,
            opens: None,
            bindings: Vec::new(),
            lineage: vec![LineageColumn::SourceFile, LineageColumn::ExtractedAt],
            rules: Vec::new(),
            links: Vec::new(),
            primary_keys: vec![key_column.to_string()],
            cursor_field: LineageColumn::ExtractedAt.name(),
        }
    }

    fn rule(mut self, pattern: &str) -> Self {
        self.rules.push(ExtractionRule {
            pattern: FieldPath::parse(pattern),
        });
        self
    }

    fn opens(mut self, scope: Scope) -> Self {
        self.opens = Some(scope);
        self
    }

    fn parent(mut self, scope: Scope) -> Self {
        self.parents.push(scope);
        self.link(scope);
        self
    }

    fn attach_to(mut self, levels: &[Scope]) -> Self {
        for scope in levels {
            self.link(*scope);
        }
        self.attachment = Some(AttachmentSpec {
            levels: levels.to_vec(),
        });
        self
    }

    fn link(&mut self, scope: Scope) {
        if scope.is_keyed() && !self.links.contains(&scope) {
            self.links.push(scope);
        }
    }

    /// Child element text; the column is the snake_case tag name.
    fn child(mut self, tag: &str, ty: ColumnType) -> Self {
        self.bindings.push(ColumnBinding {
            column: tag.to_case(Case::Snake),
            ty,
            source: ValueSource::Path(FieldPath::parse(tag)),
        });
        self
    }

    fn text(self, tag: &str) -> Self {
        self.child(tag, ColumnType::String)
    }

    fn texts(self, tags: &[&str]) -> Self {
        tags.iter().fold(self, |builder, tag| builder.text(tag))
    }

    fn attr(mut self, name: &str, ty: ColumnType) -> Self {
        self.bindings.push(ColumnBinding {
            column: name.to_case(Case::Snake),
            ty,
            source: ValueSource::Path(FieldPath::parse(&format!("@{}", name))),
        });
        self
    }

    fn session_id(mut self) -> Self {
        self.bindings.push(ColumnBinding {
            column: "session_id".to_string(),
            ty: ColumnType::String,
            source: ValueSource::SessionId,
        });
        self
    }

    fn lineage(mut self, lineage: &[LineageColumn]) -> Self {
        self.lineage = lineage.to_vec();
        self
    }

    fn primary_keys(mut self, keys: &[&str]) -> Self {
        self.primary_keys = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    fn cursor_field(mut self, field: &'static str) -> Self {
        self.cursor_field = field;
        self
    }

    fn build(self) -> TableSchema {
        let mut columns = vec![ColumnDef {
            name: self.key.column.to_string(),
            ty: ColumnType::String,
            nullable: false,
            role: ColumnRole::PrimaryKey,
        }];

        for scope in &self.links {
            if let Some(name) = scope.key_column() {
                columns.push(ColumnDef {
                    name: name.to_string(),
                    ty: ColumnType::String,
                    nullable: true,
                    role: ColumnRole::ForeignKey,
                });
            }
        }

        columns.extend(self.bindings.iter().map(|b| ColumnDef {
            name: b.column.clone(),
            ty: b.ty,
            nullable: true,
            role: ColumnRole::Value,
        }));

        columns.extend(self.lineage.iter().map(|l| ColumnDef {
            name: l.name().to_string(),
            ty: l.column_type(),
            nullable: *l != LineageColumn::ExtractedAt,
            role: ColumnRole::Lineage,
        }));

        TableSchema {
            table: self.table,
            key: self.key,
            parents: self.parents,
            attachment: self.attachment,
            opens: self.opens,
            bindings: self.bindings,
            lineage: self.lineage,
            rules: self.rules,
            metadata: TableMetadata {
                primary_keys: self.primary_keys,
                cursor_field: self.cursor_field.to_string(),
                ingestion_type: IngestionType::Cdc,
            },
            columns,
            link_columns: self.links,
        }
    }
}

/// Immutable lookup of table schemas and extraction rules.
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    tables: IndexMap<Table, TableSchema>,
    scopes: Vec<(FieldPath, Scope)>,
    /// Leaf tag -> tables with a rule ending in that tag
    by_leaf: HashMap<String, Vec<(Table, usize)>>,
}

impl SchemaRegistry {
    fn from_schemas(schemas: Vec<TableSchema>, scopes: Vec<(FieldPath, Scope)>) -> Self {
        let mut by_leaf: HashMap<String, Vec<(Table, usize)>> = HashMap::new();
        for schema in &schemas {
            for (i, rule) in schema.rules.iter().enumerate() {
                if let Some(leaf) = rule.pattern.leaf_tag() {
                    by_leaf
                        .entry(leaf.to_string())
                        .or_default()
                        .push((schema.table, i));
                }
            }
        }

        Self {
            tables: schemas.into_iter().map(|s| (s.table, s)).collect(),
            scopes,
            by_leaf,
        }
    }

    /// The Duck Creek policy export hierarchy.
    pub fn duck_creek() -> Self {
        use ColumnType::Double;

        let policies = EntityBuilder::new(Table::Policies, "policy_id", "pol")
            .rule("data/policy")
            .opens(Scope::Policy)
            .session_id()
            .texts(&[
                "EffectiveDate",
                "ExpirationDate",
                "Term",
                "LineOfBusiness",
                "QuoteNumber",
                "PolicyNumber",
                "Status",
                "LastTransactionType",
                "PrimaryRatingState",
                "Segment",
                "Product",
                "WritingCompany",
                "FilingType",
                "AgencyID",
                "Producer",
            ])
            .child("Premium", Double)
            .child("PremiumWritten", Double)
            .child("PremiumChange", Double)
            .texts(&[
                "TransactionDate",
                "TransactionSequenceNumber",
                "EndorsementNumber",
                "TermNumber",
                "RenewalType",
                "CancellationDate",
                "IncludeTerrorism",
                "IncludeGL",
                "IncludeProperty",
            ])
            .lineage(&[
                LineageColumn::SourceFile,
                LineageColumn::FileModifiedTime,
                LineageColumn::ExtractedAt,
            ])
            .cursor_field(LineageColumn::FileModifiedTime.name());

        let lines = EntityBuilder::new(Table::Lines, "line_id", "line")
            .rule("policy/line")
            .opens(Scope::Line)
            .parent(Scope::Policy)
            .text("Type")
            .attr("written", Double)
            .attr("change", Double)
            .texts(&["IsReportable", "IsFinalReport", "HasEarthquakeBeenSelected"])
            .primary_keys(&["line_id", "policy_id"]);

        let coverages = EntityBuilder::new(Table::Coverages, "coverage_id", "cov")
            .rule("line/coverage")
            .opens(Scope::Coverage)
            .parent(Scope::Line)
            .parent(Scope::Policy)
            .text("Type")
            .child("Premium", Double)
            .attr("written", Double)
            .attr("change", Double)
            .text("IsCovEndorsement")
            .primary_keys(&["coverage_id", "line_id", "policy_id"]);

        let exposures = EntityBuilder::new(Table::Exposures, "exposure_id", "exp")
            .rule("line/exposure")
            .parent(Scope::Line)
            .parent(Scope::Policy)
            .text("Type")
            .text("iValue")
            .child("fValue", Double)
            .text("sValue")
            .primary_keys(&["exposure_id", "line_id", "policy_id"]);

        let limits = term_entity(Table::Limits, "limit_id", "lim", "limit");
        let deductibles = term_entity(Table::Deductibles, "deductible_id", "ded", "deductible");

        let locations = EntityBuilder::new(Table::Locations, "location_id", "loc")
            .rule("account/location")
            .opens(Scope::Location)
            .parent(Scope::Account)
            .parent(Scope::Policy)
            .attr("deleted", ColumnType::String)
            .primary_keys(&["location_id", "policy_id"]);

        let buildings = EntityBuilder::new(Table::Buildings, "building_id", "bldg")
            .rule("location/building")
            .rule("account/building")
            .parent(Scope::Location)
            .parent(Scope::Policy)
            .primary_keys(&["building_id", "location_id", "policy_id"]);

        let occupancies = EntityBuilder::new(Table::Occupancies, "occupancy_id", "occ")
            .rule("location/occupancy")
            .rule("account/occupancy")
            .parent(Scope::Location)
            .parent(Scope::Policy)
            .primary_keys(&["occupancy_id", "location_id", "policy_id"]);

        let accounts = EntityBuilder::new(Table::Accounts, "account_id", "acct")
            .rule("account")
            .opens(Scope::Account)
            .parent(Scope::Policy)
            .texts(&[
                "Name",
                "DBA",
                "EntityType",
                "BriefDescription",
                "PrimaryPhone",
                "Fax",
                "Email",
                "SameAsMailingAddress",
                "SICCode",
            ])
            .primary_keys(&["account_id", "policy_id"]);

        let addresses = EntityBuilder::new(Table::Addresses, "address_id", "addr")
            .rule("account/address")
            .rule("location/address")
            .attach_to(&[Scope::Account, Scope::Location])
            .parent(Scope::Policy)
            .texts(&["Latitude", "Longitude", "LastVerified"])
            .primary_keys(&["address_id", "policy_id"]);

        let referrals = EntityBuilder::new(Table::UnderwriterReferrals, "referral_id", "ref")
            .rule("UnderwriterReferrals/UnderwriterReferral")
            .parent(Scope::Policy)
            .primary_keys(&["referral_id", "policy_id"]);

        let taxes = EntityBuilder::new(Table::TaxSurcharges, "tax_id", "tax")
            .rule("policy/stateTaxSurcharge")
            .rule("line/lineStateTaxSurcharge")
            .parent(Scope::Policy)
            .attach_to(&[Scope::Policy, Scope::Line])
            .text("TaxState")
            .child("Amount", Double)
            .attr("written", Double)
            .attr("change", Double)
            .text("Type")
            .primary_keys(&["tax_id", "policy_id"]);

        let schemas = vec![
            policies,
            lines,
            coverages,
            exposures,
            limits,
            deductibles,
            locations,
            buildings,
            occupancies,
            accounts,
            addresses,
            referrals,
            taxes,
        ]
        .into_iter()
        .map(EntityBuilder::build)
        .collect();

        Self::from_schemas(schemas, vec![(FieldPath::parse("data"), Scope::Data)])
    }

    /// Table names in declaration order.
    pub fn table_names(&self) -> Vec<&'static str> {
        self.tables.keys().map(|t| t.as_str()).collect()
    }

    pub fn tables(&self) -> impl Iterator<Item = &TableSchema> {
        self.tables.values()
    }

    pub fn schema(&self, table: Table) -> Option<&TableSchema> {
        self.tables.get(&table)
    }

    /// Look up a table by name.
    pub fn lookup(&self, name: &str) -> Result<&TableSchema, UnsupportedTable> {
        let table: Table = name.parse()?;
        self.schema(table).ok_or_else(|| UnsupportedTable {
            name: name.to_string(),
        })
    }

    /// First table whose rule matches the element at the end of `ancestry`.
    pub fn match_rule<S: AsRef<str>>(&self, ancestry: &[S]) -> Option<&TableSchema> {
        let leaf = ancestry.last()?.as_ref();
        let candidates = self.by_leaf.get(leaf)?;

        candidates.iter().find_map(|(table, rule_index)| {
            let schema = self.tables.get(table)?;
            let rule = schema.rules.get(*rule_index)?;
            rule.pattern.matches_suffix(ancestry).then_some(schema)
        })
    }

    /// Structural scope opened by the element at the end of `ancestry`.
    pub fn match_scope<S: AsRef<str>>(&self, ancestry: &[S]) -> Option<Scope> {
        self.scopes
            .iter()
            .find(|(pattern, _)| pattern.matches_suffix(ancestry))
            .map(|(_, scope)| *scope)
    }
}

/// Limits and deductibles share one shape and attach to a line or a coverage.
fn term_entity(
    table: Table,
    key_column: &'static str,
    prefix: &'static str,
    tag: &str,
) -> EntityBuilder {
    EntityBuilder::new(table, key_column, prefix)
        .rule(&format!("line/{}", tag))
        .rule(&format!("coverage/{}", tag))
        .parent(Scope::Line)
        .attach_to(&[Scope::Line, Scope::Coverage])
        .parent(Scope::Policy)
        .text("Type")
        .child("Amount", ColumnType::Double)
        .text("iValue")
        .child("fValue", ColumnType::Double)
        .text("Scope")
        .primary_keys(&[key_column, "line_id", "policy_id"])
}
