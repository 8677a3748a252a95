//! Extraction context for one document walk.
//!
//! Holds the stack of hierarchy levels open above the element currently being
//! visited. Each frame carries the key of the entity that opened it, so rows
//! deeper in the tree read their foreign keys from here instead of looking
//! back up the document.

use std::collections::HashMap;

use crate::schema::{Scope, Table};

/// One open hierarchy level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// The document root
    Session { session_id: Option<String> },
    /// A `data` element, with the key already minted for its first `policy`
    /// child (child index, key)
    Data { reserved_policy: Option<(usize, String)> },
    Policy(String),
    Line(String),
    Coverage(String),
    Account(String),
    Location(String),
}

impl Frame {
    /// Build the frame an entity of `scope` opens for its subtree.
    ///
    /// Returns `None` for the structural scopes, which are not opened by rows.
    pub fn entity(scope: Scope, key: String) -> Option<Frame> {
        match scope {
            Scope::Policy => Some(Frame::Policy(key)),
            Scope::Line => Some(Frame::Line(key)),
            Scope::Coverage => Some(Frame::Coverage(key)),
            Scope::Account => Some(Frame::Account(key)),
            Scope::Location => Some(Frame::Location(key)),
            Scope::Session | Scope::Data => None,
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            Frame::Session { .. } => Scope::Session,
            Frame::Data { .. } => Scope::Data,
            Frame::Policy(_) => Scope::Policy,
            Frame::Line(_) => Scope::Line,
            Frame::Coverage(_) => Scope::Coverage,
            Frame::Account(_) => Scope::Account,
            Frame::Location(_) => Scope::Location,
        }
    }

    /// Entity key carried by this frame.
    pub fn key(&self) -> Option<&str> {
        match self {
            Frame::Policy(k)
            | Frame::Line(k)
            | Frame::Coverage(k)
            | Frame::Account(k)
            | Frame::Location(k) => Some(k),
            Frame::Session { .. } | Frame::Data { .. } => None,
        }
    }
}

#[derive(Debug)]
struct OpenFrame {
    frame: Frame,
    /// Rows minted per table while this frame was the innermost keyed one
    minted: HashMap<Table, usize>,
}

/// Stack of open frames for a single document walk.
#[derive(Debug, Default)]
pub struct ExtractionContext {
    frames: Vec<OpenFrame>,
    /// Counters used while no keyed frame is open
    root_minted: HashMap<Table, usize>,
}

impl ExtractionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(OpenFrame {
            frame,
            minted: HashMap::new(),
        });
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop().map(|open| open.frame)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn top(&self) -> Option<&Frame> {
        self.frames.last().map(|open| &open.frame)
    }

    /// The root element's `id` attribute.
    pub fn session_id(&self) -> Option<&str> {
        self.frames.iter().find_map(|open| match &open.frame {
            Frame::Session { session_id } => session_id.as_deref(),
            _ => None,
        })
    }

    /// Key of the innermost open frame of `scope`.
    ///
    /// # Example
    /// ```
    /// use duckcreek::runtime::{ExtractionContext, Frame};
    /// use duckcreek::Scope;
    ///
    /// let mut ctx = ExtractionContext::new();
    /// ctx.push(Frame::Policy("POL-1".to_string()));
    /// ctx.push(Frame::Line("LN-1".to_string()));
    ///
    /// assert_eq!(ctx.key_of(Scope::Policy), Some("POL-1"));
    /// assert_eq!(ctx.key_of(Scope::Coverage), None);
    /// ```
    pub fn key_of(&self, scope: Scope) -> Option<&str> {
        self.frames
            .iter()
            .rev()
            .find(|open| open.frame.scope() == scope)
            .and_then(|open| open.frame.key())
    }

    /// Policy key for an account-side row of `table` that has no enclosing
    /// policy: the first policy reserved by the innermost `data` element.
    ///
    /// Only accounts and rows under an open account qualify. Anything else
    /// outside a policy gets `None` and is reported as detached.
    pub fn account_policy(&self, table: Table) -> Option<&str> {
        if self.key_of(Scope::Policy).is_some() {
            return None;
        }
        if table != Table::Accounts && self.key_of(Scope::Account).is_none() {
            return None;
        }

        self.frames.iter().rev().find_map(|open| match &open.frame {
            Frame::Data {
                reserved_policy: Some((_, key)),
            } => Some(key.as_str()),
            _ => None,
        })
    }

    /// Innermost open keyed frame whose scope is one of `levels`.
    ///
    /// # Returns
    /// The matching scope and its key, or `None` if no candidate level is open
    pub fn innermost_of(&self, levels: &[Scope]) -> Option<(Scope, &str)> {
        self.frames.iter().rev().find_map(|open| {
            let scope = open.frame.scope();
            if !levels.contains(&scope) {
                return None;
            }
            open.frame.key().map(|key| (scope, key))
        })
    }

    /// Policy key reserved for child `index` of the `data` element on top of
    /// the stack.
    pub fn reserved_policy(&self, index: usize) -> Option<&str> {
        match self.top() {
            Some(Frame::Data {
                reserved_policy: Some((reserved, key)),
            }) if *reserved == index => Some(key),
            _ => None,
        }
    }

    /// Mint the key for a new `table` row.
    ///
    /// Every call counts toward the table's ordinal within the innermost
    /// keyed frame. A verbatim key is returned unchanged; otherwise the key
    /// is `{prefix}_{open keys, outermost first}_{ordinal}`.
    ///
    /// # Arguments
    /// * `table` - Table the row belongs to
    /// * `prefix` - Synthesis prefix for the table
    /// * `verbatim` - Key read from the element, if any
    ///
    /// # Example
    /// ```
    /// use duckcreek::runtime::{ExtractionContext, Frame};
    /// use duckcreek::Table;
    ///
    /// let mut ctx = ExtractionContext::new();
    /// ctx.push(Frame::Policy("POL-1".to_string()));
    /// ctx.push(Frame::Line("LN-1".to_string()));
    ///
    /// assert_eq!(ctx.mint_key(Table::Coverages, "cov", None), "cov_POL-1_LN-1_1");
    /// assert_eq!(ctx.mint_key(Table::Coverages, "cov", Some("COV-9".to_string())), "COV-9");
    /// assert_eq!(ctx.mint_key(Table::Coverages, "cov", None), "cov_POL-1_LN-1_3");
    /// ```
    pub fn mint_key(&mut self, table: Table, prefix: &str, verbatim: Option<String>) -> String {
        let lineage: Vec<String> = self
            .frames
            .iter()
            .filter_map(|open| open.frame.key().map(str::to_string))
            .collect();

        let counters = match self
            .frames
            .iter_mut()
            .rev()
            .find(|open| open.frame.key().is_some())
        {
            Some(open) => &mut open.minted,
            None => &mut self.root_minted,
        };
        let ordinal = counters.entry(table).or_insert(0);
        *ordinal += 1;

        if let Some(key) = verbatim {
            return key;
        }

        let mut parts = Vec::with_capacity(lineage.len() + 2);
        parts.push(prefix.to_string());
        parts.extend(lineage);
        parts.push(ordinal.to_string());
        parts.join("_")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_of_innermost_frame() {
        let mut ctx = ExtractionContext::new();
        ctx.push(Frame::Session {
            session_id: Some("S-1".to_string()),
        });
        ctx.push(Frame::Policy("POL-1".to_string()));
        ctx.push(Frame::Account("ACC-1".to_string()));
        ctx.push(Frame::Location("LOC-1".to_string()));

        assert_eq!(ctx.session_id(), Some("S-1"));
        assert_eq!(ctx.key_of(Scope::Account), Some("ACC-1"));
        assert_eq!(ctx.key_of(Scope::Location), Some("LOC-1"));
        assert_eq!(ctx.key_of(Scope::Line), None);
    }

    #[test]
    fn test_account_policy_uses_reserved_key() {
        let mut ctx = ExtractionContext::new();
        ctx.push(Frame::Data {
            reserved_policy: Some((2, "POL-7".to_string())),
        });

        assert_eq!(ctx.key_of(Scope::Policy), None);
        assert_eq!(ctx.account_policy(Table::Accounts), Some("POL-7"));
        assert_eq!(ctx.account_policy(Table::Lines), None);
        assert_eq!(ctx.reserved_policy(2), Some("POL-7"));
        assert_eq!(ctx.reserved_policy(0), None);

        ctx.push(Frame::Account("ACC-1".to_string()));
        assert_eq!(ctx.reserved_policy(2), None);
        assert_eq!(ctx.account_policy(Table::Locations), Some("POL-7"));

        ctx.push(Frame::Policy("POL-9".to_string()));
        assert_eq!(ctx.account_policy(Table::Locations), None);
    }

    #[test]
    fn test_innermost_of_prefers_deepest_level() {
        let mut ctx = ExtractionContext::new();
        ctx.push(Frame::Account("ACC-1".to_string()));
        assert_eq!(
            ctx.innermost_of(&[Scope::Account, Scope::Location]),
            Some((Scope::Account, "ACC-1"))
        );

        ctx.push(Frame::Location("LOC-1".to_string()));
        assert_eq!(
            ctx.innermost_of(&[Scope::Account, Scope::Location]),
            Some((Scope::Location, "LOC-1"))
        );

        assert_eq!(ctx.innermost_of(&[Scope::Line]), None);
    }

    #[test]
    fn test_mint_key_counts_per_frame() {
        let mut ctx = ExtractionContext::new();
        assert_eq!(ctx.mint_key(Table::Policies, "pol", None), "pol_1");

        ctx.push(Frame::Policy("pol_1".to_string()));
        assert_eq!(ctx.mint_key(Table::Lines, "line", None), "line_pol_1_1");
        assert_eq!(ctx.mint_key(Table::UnderwriterReferrals, "ref", None), "ref_pol_1_1");
        assert_eq!(ctx.mint_key(Table::Lines, "line", None), "line_pol_1_2");

        ctx.pop();
        assert_eq!(ctx.mint_key(Table::Policies, "pol", None), "pol_2");
        ctx.push(Frame::Policy("pol_2".to_string()));
        assert_eq!(ctx.mint_key(Table::Lines, "line", None), "line_pol_2_1");
    }

    #[test]
    fn test_structural_frames_do_not_count() {
        let mut ctx = ExtractionContext::new();
        ctx.push(Frame::Session { session_id: None });
        ctx.push(Frame::Data {
            reserved_policy: None,
        });

        assert_eq!(ctx.mint_key(Table::Accounts, "acct", None), "acct_1");
        assert_eq!(ctx.depth(), 2);
        assert_eq!(ctx.pop().map(|f| f.scope()), Some(Scope::Data));
    }
}
