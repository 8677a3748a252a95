//! Extraction engine: one depth-first walk of a parsed document that turns
//! recognized elements into flat table rows.
//!
//! The walk uses an explicit work stack, so document depth never grows the
//! call stack. At each element the first matching registry rule mints the
//! entity key, reads its bindings and copies the keys of the open frames
//! into the row. Entities that open a scope push a frame for their subtree
//! whether or not their own table was requested, so descendants always see
//! their ancestors' keys.

use indexmap::IndexMap;
use std::fmt;
use tracing::debug;

use crate::document::XmlNode;
use crate::entity::{ColumnType, FieldValue, Record};
use crate::extraction::Extractor;
use crate::runtime::context::{ExtractionContext, Frame};
use crate::schema::{Scope, SchemaRegistry, Table, TableSchema, UnsupportedTable, ValueSource};

/// A value that failed type coercion; the field was nulled.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCoercionWarning {
    pub table: Table,
    /// Primary key of the affected row
    pub key: String,
    pub column: String,
    pub value: String,
    pub expected: ColumnType,
}

impl fmt::Display for FieldCoercionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}].{}: cannot coerce '{}' to {}",
            self.table, self.key, self.column, self.value, self.expected
        )
    }
}

/// Non-fatal findings collected during a walk.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractionWarning {
    FieldCoercion(FieldCoercionWarning),
    /// A row was emitted without an expected ancestor; the foreign key is null
    DetachedEntity {
        table: Table,
        key: String,
        missing: Scope,
    },
}

impl fmt::Display for ExtractionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionWarning::FieldCoercion(w) => write!(f, "{}", w),
            ExtractionWarning::DetachedEntity {
                table,
                key,
                missing,
            } => write!(f, "{}[{}]: no enclosing {}", table, key, missing),
        }
    }
}

/// Rows for one requested table.
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub rows: Vec<Record>,
    pub warnings: Vec<ExtractionWarning>,
}

/// Rows for every table, keyed in registry order.
#[derive(Debug, Clone, Default)]
pub struct ExtractionSet {
    pub tables: IndexMap<Table, Vec<Record>>,
    pub warnings: Vec<ExtractionWarning>,
}

impl ExtractionSet {
    pub fn rows(&self, table: Table) -> &[Record] {
        self.tables.get(&table).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn row_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }
}

enum Step<'a> {
    Enter { node: &'a XmlNode, index: usize },
    Exit { frames: usize },
}

/// Walks documents against a schema registry.
pub struct ExtractionEngine<'r> {
    registry: &'r SchemaRegistry,
}

impl<'r> ExtractionEngine<'r> {
    pub fn new(registry: &'r SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Extract the rows of a single table.
    ///
    /// Ancestor entities are still keyed and threaded through the walk, so
    /// the rows are identical to the same table's rows from
    /// [`extract_all`](Self::extract_all).
    pub fn extract(&self, tree: &XmlNode, table: Table) -> Extraction {
        let mut set = self.walk(tree, |t| t == table);
        Extraction {
            rows: set.tables.shift_remove(&table).unwrap_or_default(),
            warnings: set.warnings,
        }
    }

    /// Extract a table by name.
    ///
    /// # Errors
    /// Returns `UnsupportedTable` if the name is not in the registry
    pub fn extract_named(&self, tree: &XmlNode, table: &str) -> Result<Extraction, UnsupportedTable> {
        let schema = self.registry.lookup(table)?;
        Ok(self.extract(tree, schema.table))
    }

    /// Extract every table in one walk.
    pub fn extract_all(&self, tree: &XmlNode) -> ExtractionSet {
        self.walk(tree, |_| true)
    }

    fn walk(&self, tree: &XmlNode, wanted: impl Fn(Table) -> bool) -> ExtractionSet {
        let mut out = ExtractionSet {
            tables: self
                .registry
                .tables()
                .filter(|s| wanted(s.table))
                .map(|s| (s.table, Vec::new()))
                .collect(),
            warnings: Vec::new(),
        };

        let mut ctx = ExtractionContext::new();
        let mut path: Vec<&str> = Vec::new();
        let mut work = vec![Step::Enter {
            node: tree,
            index: 0,
        }];

        while let Some(step) = work.pop() {
            match step {
                Step::Enter { node, index } => {
                    path.push(node.tag.as_str());
                    let frames = self.visit(node, index, &path, &mut ctx, &mut out, &wanted);
                    work.push(Step::Exit { frames });
                    work.extend(
                        node.children
                            .iter()
                            .enumerate()
                            .rev()
                            .map(|(index, node)| Step::Enter { node, index }),
                    );
                }
                Step::Exit { frames } => {
                    path.pop();
                    for _ in 0..frames {
                        ctx.pop();
                    }
                }
            }
        }

        debug!(
            rows = out.row_count(),
            warnings = out.warnings.len(),
            "Extracted document"
        );
        out
    }

    /// Handle one element; returns how many frames it pushed.
    fn visit(
        &self,
        node: &XmlNode,
        index: usize,
        path: &[&str],
        ctx: &mut ExtractionContext,
        out: &mut ExtractionSet,
        wanted: &impl Fn(Table) -> bool,
    ) -> usize {
        let mut frames = 0;

        if path.len() == 1 {
            ctx.push(Frame::Session {
                session_id: node.attribute("id").map(str::to_string),
            });
            frames += 1;
        }

        if self.registry.match_scope(path) == Some(Scope::Data) {
            let reserved_policy = self.reserve_first_policy(node, ctx);
            ctx.push(Frame::Data { reserved_policy });
            frames += 1;
        }

        let schema = match self.registry.match_rule(path) {
            Some(schema) => schema,
            None => return frames,
        };

        let retain = wanted(schema.table);
        if !retain && schema.opens.is_none() {
            return frames;
        }

        let key = self.entity_key(schema, node, index, ctx);

        if retain {
            let record = self.build_record(schema, node, &key, ctx, &mut out.warnings);
            out.tables.entry(schema.table).or_default().push(record);
        }

        if let Some(frame) = schema.opens.and_then(|scope| Frame::entity(scope, key)) {
            ctx.push(frame);
            frames += 1;
        }

        frames
    }

    /// Mint the key of the first `policy` child of a `data` element, so rows
    /// that precede it in the document can already refer to it.
    fn reserve_first_policy(
        &self,
        data: &XmlNode,
        ctx: &mut ExtractionContext,
    ) -> Option<(usize, String)> {
        let policies = self.registry.schema(Table::Policies)?;
        let (index, policy) = data
            .children
            .iter()
            .enumerate()
            .find(|(_, child)| child.tag == "policy")?;

        let key = ctx.mint_key(
            Table::Policies,
            policies.key.prefix,
            verbatim_key(policy, policies.key.id_attribute),
        );
        Some((index, key))
    }

    fn entity_key(
        &self,
        schema: &TableSchema,
        node: &XmlNode,
        index: usize,
        ctx: &mut ExtractionContext,
    ) -> String {
        if schema.table == Table::Policies {
            if let Some(key) = ctx.reserved_policy(index) {
                return key.to_string();
            }
        }

        ctx.mint_key(
            schema.table,
            schema.key.prefix,
            verbatim_key(node, schema.key.id_attribute),
        )
    }

    fn build_record(
        &self,
        schema: &TableSchema,
        node: &XmlNode,
        key: &str,
        ctx: &ExtractionContext,
        warnings: &mut Vec<ExtractionWarning>,
    ) -> Record {
        let mut record = Record::with_columns(schema.extracted_columns());
        record.set(schema.key.column, key);

        let attached = schema
            .attachment
            .as_ref()
            .and_then(|spec| ctx.innermost_of(&spec.levels));

        let mut reported = None;
        if let (Some(spec), None) = (&schema.attachment, attached) {
            if let Some(missing) = spec.levels.first() {
                debug!(table = %schema.table, key, "No attachment level open");
                warnings.push(ExtractionWarning::DetachedEntity {
                    table: schema.table,
                    key: key.to_string(),
                    missing: *missing,
                });
                reported = Some(*missing);
            }
        }

        for scope in schema.link_scopes() {
            let column = match scope.key_column() {
                Some(column) => column,
                None => continue,
            };
            let is_parent = schema.parents.contains(scope);

            let value = match attached {
                Some((level, attached_key)) if level == *scope => Some(attached_key),
                _ if is_parent => ctx.key_of(*scope).or_else(|| match scope {
                    Scope::Policy => ctx.account_policy(schema.table),
                    _ => None,
                }),
                _ => None,
            };

            match value {
                Some(value) => record.set(column, value),
                None if is_parent && reported != Some(*scope) => {
                    debug!(table = %schema.table, key, missing = %scope, "Detached entity");
                    warnings.push(ExtractionWarning::DetachedEntity {
                        table: schema.table,
                        key: key.to_string(),
                        missing: *scope,
                    });
                }
                None => {}
            }
        }

        for binding in &schema.bindings {
            let raw = match &binding.source {
                ValueSource::Path(path) => node.extract(path),
                ValueSource::SessionId => ctx.session_id().map(str::to_string),
            };
            let raw = match raw {
                Some(raw) => raw,
                None => continue,
            };

            match FieldValue::coerce(&raw, binding.ty) {
                Ok(value) => record.set(binding.column.as_str(), value),
                Err(err) => {
                    debug!(
                        table = %schema.table,
                        key,
                        column = %binding.column,
                        "Field coercion failed: {}",
                        err
                    );
                    warnings.push(ExtractionWarning::FieldCoercion(FieldCoercionWarning {
                        table: schema.table,
                        key: key.to_string(),
                        column: binding.column.clone(),
                        value: err.value,
                        expected: err.expected,
                    }));
                }
            }
        }

        record
    }
}

fn verbatim_key(node: &XmlNode, attribute: &str) -> Option<String> {
    node.attribute(attribute)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}
