// Rule tree data model
//
// A rule tree is a root group that exclusively owns an ordered sequence of
// children. Each child is either a leaf condition (field / operator / value)
// or another group combining its own children under `all` / `any` semantics.
//
// The node kind is an explicit enum tag. A node is never classified by which
// attributes it happens to carry.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Errors parsing criteria and operators from their string form
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Invalid criteria: {0}")]
    InvalidCriteria(String),

    #[error("Invalid operator: {0}")]
    InvalidOperator(String),
}

// ============================================================================
// Identifiers
// ============================================================================

/// Process-wide node id sequence. Starts at 1 so that 0 never names a node.
static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a node in a rule tree.
///
/// Ids issued by [`NodeId::next`] come from one monotonic sequence shared by
/// every builder in the process, so two calls never return the same id.
/// Ids built with `From<u64>` are taken as given; [`NodeId::reserve`] keeps
/// the sequence from issuing them later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u64);

impl NodeId {
    /// Issues the next id from the process-wide sequence.
    pub fn next() -> Self {
        NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Moves the sequence past `id`, so [`NodeId::next`] never returns it.
    pub fn reserve(id: NodeId) {
        NEXT_NODE_ID.fetch_max(id.0.saturating_add(1), Ordering::Relaxed);
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for NodeId {
    fn from(id: u64) -> Self {
        NodeId(id)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Criteria and operators
// ============================================================================

/// Boolean combination mode of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criteria {
    /// Every child must hold (AND)
    All,
    /// At least one child must hold (OR)
    Any,
}

impl Default for Criteria {
    fn default() -> Self {
        Criteria::All
    }
}

impl std::fmt::Display for Criteria {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Criteria::All => write!(f, "all"),
            Criteria::Any => write!(f, "any"),
        }
    }
}

impl FromStr for Criteria {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Criteria::All),
            "any" => Ok(Criteria::Any),
            other => Err(ParseError::InvalidCriteria(other.to_string())),
        }
    }
}

/// Operators selectable for a leaf condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Subtract,
    #[serde(rename = "*")]
    Multiply,
    #[serde(rename = "/")]
    Divide,
}

impl Operator {
    /// All operators, in the order they are offered for selection.
    pub const ALL: [Operator; 8] = [
        Operator::Equal,
        Operator::NotEqual,
        Operator::LessThan,
        Operator::GreaterThan,
        Operator::Add,
        Operator::Subtract,
        Operator::Multiply,
        Operator::Divide,
    ];

    /// Returns the operator symbol
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::NotEqual => "!=",
            Operator::LessThan => "<",
            Operator::GreaterThan => ">",
            Operator::Add => "+",
            Operator::Subtract => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

impl FromStr for Operator {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operator::ALL
            .iter()
            .copied()
            .find(|op| op.symbol() == s)
            .ok_or_else(|| ParseError::InvalidOperator(s.to_string()))
    }
}

// ============================================================================
// Nodes
// ============================================================================

/// An atomic condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeafRule {
    pub id: NodeId,
    /// Field name, empty until one is chosen
    pub field: String,
    /// Only meaningful relative to the chosen field; cleared whenever the field changes
    pub operator: Option<Operator>,
    pub value: String,
    /// Id of the group that owns this leaf
    pub parent_id: NodeId,
}

impl LeafRule {
    /// Creates an empty leaf owned by `parent_id`.
    pub fn new(parent_id: NodeId) -> Self {
        Self {
            id: NodeId::next(),
            field: String::new(),
            operator: None,
            value: String::new(),
            parent_id,
        }
    }

    /// Replaces the field and clears the operator.
    pub fn set_field(&mut self, field: impl Into<String>) {
        self.field = field.into();
        self.operator = None;
    }
}

/// A nested boolean group owning its children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRule {
    pub id: NodeId,
    pub criteria: Criteria,
    pub rules: Vec<RuleNode>,
    /// `None` only for the root of a tree
    pub parent_id: Option<NodeId>,
}

impl GroupRule {
    /// Creates a root group with no parent.
    pub fn root(id: NodeId, criteria: Criteria) -> Self {
        Self {
            id,
            criteria,
            rules: Vec::new(),
            parent_id: None,
        }
    }

    /// Creates an empty group owned by `parent_id`.
    pub fn nested(parent_id: NodeId, criteria: Criteria) -> Self {
        Self {
            id: NodeId::next(),
            criteria,
            rules: Vec::new(),
            parent_id: Some(parent_id),
        }
    }

    /// Depth-first, pre-order search for the first node with `id`.
    /// The group itself is not a candidate, only its descendants.
    pub fn find(&self, id: NodeId) -> Option<&RuleNode> {
        for node in &self.rules {
            if node.id() == id {
                return Some(node);
            }
            if let RuleNode::Group(group) = node {
                if let Some(found) = group.find(id) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Mutable counterpart of [`GroupRule::find`].
    pub fn find_mut(&mut self, id: NodeId) -> Option<&mut RuleNode> {
        for node in self.rules.iter_mut() {
            if node.id() == id {
                return Some(node);
            }
            if let RuleNode::Group(group) = node {
                if let Some(found) = group.find_mut(id) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Removes every descendant whose id is `id`, along with the subtree it owns.
    ///
    /// Returns the removed nodes in pre-order. Empty when nothing matched.
    pub fn remove(&mut self, id: NodeId) -> Vec<RuleNode> {
        let mut removed = Vec::new();
        for mut node in std::mem::take(&mut self.rules) {
            if node.id() == id {
                removed.push(node);
                continue;
            }
            if let RuleNode::Group(group) = &mut node {
                removed.extend(group.remove(id));
            }
            self.rules.push(node);
        }
        removed
    }

    /// Number of leaves anywhere below this group
    pub fn leaf_count(&self) -> usize {
        self.rules
            .iter()
            .map(|node| match node {
                RuleNode::Leaf(_) => 1,
                RuleNode::Group(group) => group.leaf_count(),
            })
            .sum()
    }

    /// Nesting depth, counting this group as 1.
    pub fn depth(&self) -> usize {
        1 + self
            .rules
            .iter()
            .filter_map(|node| match node {
                RuleNode::Group(group) => Some(group.depth()),
                RuleNode::Leaf(_) => None,
            })
            .max()
            .unwrap_or(0)
    }
}

/// A node of the rule tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleNode {
    Leaf(LeafRule),
    Group(GroupRule),
}

impl RuleNode {
    pub fn id(&self) -> NodeId {
        match self {
            RuleNode::Leaf(leaf) => leaf.id,
            RuleNode::Group(group) => group.id,
        }
    }

    /// Owning group id, `None` for a tree root
    pub fn parent_id(&self) -> Option<NodeId> {
        match self {
            RuleNode::Leaf(leaf) => Some(leaf.parent_id),
            RuleNode::Group(group) => group.parent_id,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, RuleNode::Leaf(_))
    }

    pub fn as_leaf(&self) -> Option<&LeafRule> {
        match self {
            RuleNode::Leaf(leaf) => Some(leaf),
            RuleNode::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&GroupRule> {
        match self {
            RuleNode::Group(group) => Some(group),
            RuleNode::Leaf(_) => None,
        }
    }
}

impl From<LeafRule> for RuleNode {
    fn from(leaf: LeafRule) -> Self {
        RuleNode::Leaf(leaf)
    }
}

impl From<GroupRule> for RuleNode {
    fn from(group: GroupRule) -> Self {
        RuleNode::Group(group)
    }
}

/// Condensed object view of a rule sequence.
///
/// Each leaf contributes `field -> value` and each group contributes
/// `criteria -> <object of its children>`. A later key overwrites an earlier one,
/// so sibling leaves on the same field collapse to the last value.
pub fn to_rule_object(nodes: &[RuleNode]) -> Value {
    let mut object = Map::new();
    for node in nodes {
        match node {
            RuleNode::Leaf(leaf) => {
                object.insert(leaf.field.clone(), Value::String(leaf.value.clone()));
            }
            RuleNode::Group(group) => {
                object.insert(group.criteria.to_string(), to_rule_object(&group.rules));
            }
        }
    }
    Value::Object(object)
}
