// Rule tree builder
//
// Holds one rule tree under construction and exposes the operations a view
// layer drives it with: add leaves and nested groups, edit them by id, remove
// them, and commit the result into a shared rule store.
//
// Design Principles:
// 1. Construction has no side effects. Resetting the store is the explicit
//    `start_session` operation.
// 2. Nesting is plain tree recursion. Every id-addressed operation walks the
//    whole tree, so one builder serves every nesting level.
// 3. Every node id comes from the process-wide `NodeId` sequence.
// 4. Values are not validated. Empty fields, operators and values are accepted.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::parameter_source::{
    load_parameters, spawn_parameter_fetch, ParameterError, ParameterList, ParameterSource,
    DEFAULT_FIELDS,
};
use crate::rule_node::{Criteria, GroupRule, LeafRule, NodeId, Operator, ParseError, RuleNode};
use crate::rule_store::RuleStore;

// ============================================================================
// Core Types
// ============================================================================

#[derive(Debug, Error)]
pub enum BuilderError {
    #[error("Rule node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("Rule node {0} is a group, expected a leaf")]
    NotALeaf(NodeId),

    #[error("Rule node {0} is a leaf, expected a group")]
    NotAGroup(NodeId),

    #[error("Builder rooted at {0} was created for a nested group and cannot commit a root")]
    NotRoot(NodeId),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Parameter(#[from] ParameterError),
}

/// Identifier of one builder session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Builder configuration.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
    /// Field names always offered after the fetched ones
    pub default_fields: Vec<String>,
    /// Upper bound on the parameter fetch
    pub fetch_timeout: Duration,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            default_fields: DEFAULT_FIELDS.iter().map(|f| f.to_string()).collect(),
            fetch_timeout: Duration::from_secs(5),
        }
    }
}

// ============================================================================
// Rule Builder
// ============================================================================

/// Builds one rule tree.
///
/// The root group's id doubles as the parent id of every top-level node.
/// It is either supplied by the caller ([`RuleBuilder::with_parent`]) or issued
/// from the node id sequence.
#[derive(Debug, Clone)]
pub struct RuleBuilder {
    session_id: SessionId,
    root: GroupRule,
    /// False when the parent id was supplied by the caller
    is_root: bool,
    parameters: ParameterList,
    config: BuilderConfig,
}

impl RuleBuilder {
    /// Creates an outermost builder with a fresh root id.
    pub fn new(config: BuilderConfig) -> Self {
        Self::build(config, NodeId::next(), true)
    }

    /// Creates a builder whose top-level nodes belong to `parent_id`.
    ///
    /// `parent_id` is reserved in the node id sequence, so no node created
    /// afterwards can share it.
    pub fn with_parent(config: BuilderConfig, parent_id: NodeId) -> Self {
        NodeId::reserve(parent_id);
        Self::build(config, parent_id, false)
    }

    /// Starts a new session: resets `store` to empty, then returns a fresh
    /// outermost builder.
    pub fn start_session(store: &RuleStore, config: BuilderConfig) -> Self {
        store.reset();
        let builder = Self::new(config);
        info!(
            "Started rule builder session {} (root {})",
            builder.session_id, builder.root.id
        );
        builder
    }

    fn build(config: BuilderConfig, parent_id: NodeId, is_root: bool) -> Self {
        Self {
            session_id: SessionId::new(),
            root: GroupRule::root(parent_id, Criteria::default()),
            is_root,
            parameters: ParameterList::new(config.default_fields.clone()),
            config,
        }
    }

    // ------------------------------------------------------------------------
    // Parameters
    // ------------------------------------------------------------------------

    /// Starts a background fetch of field names from `source`.
    ///
    /// Must be called inside a Tokio runtime. The fetch races with any edits
    /// made meanwhile; it only ever replaces the offered field names, never
    /// fields already chosen on a leaf.
    pub fn attach_parameter_source(
        &self,
        source: Arc<dyn ParameterSource>,
    ) -> Result<JoinHandle<bool>, BuilderError> {
        let handle =
            spawn_parameter_fetch(source, self.parameters.clone(), self.config.fetch_timeout)?;
        Ok(handle)
    }

    /// Fetches field names from `source` and waits for the result.
    pub async fn load_parameters(&self, source: &dyn ParameterSource) -> bool {
        load_parameters(source, &self.parameters, self.config.fetch_timeout).await
    }

    /// Selectable field names: fetched ones first, then the defaults.
    pub fn field_options(&self) -> Vec<String> {
        self.parameters.options()
    }

    /// Selectable operators
    pub fn operators(&self) -> &'static [Operator] {
        &Operator::ALL
    }

    // ------------------------------------------------------------------------
    // Root level
    // ------------------------------------------------------------------------

    pub fn set_criteria(&mut self, criteria: Criteria) {
        debug!("Root {} criteria -> {}", self.root.id, criteria);
        self.root.criteria = criteria;
    }

    /// Appends an empty leaf at the top level and returns its id.
    pub fn add_leaf_rule(&mut self) -> NodeId {
        let leaf = LeafRule::new(self.root.id);
        let id = leaf.id;
        self.root.rules.push(leaf.into());
        debug!("Added leaf {} under {}", id, self.root.id);
        id
    }

    /// Appends an empty nested group at the top level and returns its id.
    ///
    /// The group starts with a copy of the current root criteria. Later
    /// changes to the root criteria do not affect it.
    pub fn add_nested_group(&mut self) -> NodeId {
        let group = GroupRule::nested(self.root.id, self.root.criteria);
        let id = group.id;
        self.root.rules.push(group.into());
        debug!("Added group {} under {}", id, self.root.id);
        id
    }

    // ------------------------------------------------------------------------
    // Id-addressed operations
    // ------------------------------------------------------------------------

    /// Appends an empty leaf to the group `group_id`.
    pub fn add_leaf_rule_to(&mut self, group_id: NodeId) -> Result<NodeId, BuilderError> {
        let group = self.group_mut(group_id)?;
        let leaf = LeafRule::new(group.id);
        let id = leaf.id;
        group.rules.push(leaf.into());
        debug!("Added leaf {} under {}", id, group_id);
        Ok(id)
    }

    /// Appends an empty nested group to the group `group_id`, copying its criteria.
    pub fn add_nested_group_to(&mut self, group_id: NodeId) -> Result<NodeId, BuilderError> {
        let group = self.group_mut(group_id)?;
        let nested = GroupRule::nested(group.id, group.criteria);
        let id = nested.id;
        group.rules.push(nested.into());
        debug!("Added group {} under {}", id, group_id);
        Ok(id)
    }

    pub fn set_group_criteria(
        &mut self,
        node_id: NodeId,
        criteria: Criteria,
    ) -> Result<(), BuilderError> {
        self.group_mut(node_id)?.criteria = criteria;
        debug!("Group {} criteria -> {}", node_id, criteria);
        Ok(())
    }

    /// Removes every node with `node_id` together with the subtree it owns.
    ///
    /// Returns the removed nodes. The root itself cannot be removed.
    pub fn remove_node(&mut self, node_id: NodeId) -> Result<Vec<RuleNode>, BuilderError> {
        let removed = self.root.remove(node_id);
        if removed.is_empty() {
            return Err(BuilderError::NodeNotFound(node_id));
        }
        debug!("Removed {} node(s) with id {}", removed.len(), node_id);
        Ok(removed)
    }

    /// Sets the leaf's field and clears its operator.
    pub fn set_leaf_field(
        &mut self,
        node_id: NodeId,
        field: impl Into<String>,
    ) -> Result<(), BuilderError> {
        self.leaf_mut(node_id)?.set_field(field);
        Ok(())
    }

    pub fn set_leaf_operator(
        &mut self,
        node_id: NodeId,
        operator: Operator,
    ) -> Result<(), BuilderError> {
        self.leaf_mut(node_id)?.operator = Some(operator);
        Ok(())
    }

    pub fn set_leaf_value(
        &mut self,
        node_id: NodeId,
        value: impl Into<String>,
    ) -> Result<(), BuilderError> {
        self.leaf_mut(node_id)?.value = value.into();
        Ok(())
    }

    // Descendants are resolved before the root, so a child sharing the root's
    // id (possible with ids restored via `NodeId::from`) stays addressable.

    fn group_mut(&mut self, id: NodeId) -> Result<&mut GroupRule, BuilderError> {
        let root_id = self.root.id;
        match self.root.find(id).map(RuleNode::is_leaf) {
            Some(true) => Err(BuilderError::NotAGroup(id)),
            Some(false) => match self.root.find_mut(id) {
                Some(RuleNode::Group(group)) => Ok(group),
                _ => Err(BuilderError::NodeNotFound(id)),
            },
            None if id == root_id => Ok(&mut self.root),
            None => Err(BuilderError::NodeNotFound(id)),
        }
    }

    fn leaf_mut(&mut self, id: NodeId) -> Result<&mut LeafRule, BuilderError> {
        let root_id = self.root.id;
        match self.root.find_mut(id) {
            Some(RuleNode::Leaf(leaf)) => Ok(leaf),
            Some(RuleNode::Group(_)) => Err(BuilderError::NotALeaf(id)),
            None if id == root_id => Err(BuilderError::NotALeaf(id)),
            None => Err(BuilderError::NodeNotFound(id)),
        }
    }

    // ------------------------------------------------------------------------
    // Commit
    // ------------------------------------------------------------------------

    /// Appends the top-level nodes to the end of the store's collection.
    ///
    /// Post-state is exactly `store ++ rules`, without deduplication.
    /// Returns the new collection length.
    pub fn commit_local(&self, store: &RuleStore) -> usize {
        let local = self.root.rules.clone();
        let appended = local.len();
        let total = store.update(move |mut rules| {
            rules.extend(local);
            rules
        });
        info!(
            "Session {} committed {} node(s), store now holds {}",
            self.session_id, appended, total
        );
        total
    }

    /// Prepends the whole tree, wrapped in its root group, to the store's collection.
    ///
    /// Only the outermost builder may commit a root. Earlier roots are kept.
    pub fn commit_root(&self, store: &RuleStore) -> Result<usize, BuilderError> {
        if !self.is_root {
            return Err(BuilderError::NotRoot(self.root.id));
        }
        let envelope = RuleNode::Group(self.root.clone());
        let total = store.update(move |rules| std::iter::once(envelope).chain(rules).collect());
        info!(
            "Session {} committed root {} ({} leaves), store now holds {}",
            self.session_id,
            self.root.id,
            self.root.leaf_count(),
            total
        );
        Ok(total)
    }

    // ------------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------------

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Id shared as parent by every top-level node
    pub fn parent_id(&self) -> NodeId {
        self.root.id
    }

    pub fn criteria(&self) -> Criteria {
        self.root.criteria
    }

    /// Top-level nodes, in insertion order
    pub fn rules(&self) -> &[RuleNode] {
        &self.root.rules
    }

    pub fn root(&self) -> &GroupRule {
        &self.root
    }

    pub fn find(&self, node_id: NodeId) -> Option<&RuleNode> {
        self.root.find(node_id)
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }
}

impl Default for RuleBuilder {
    fn default() -> Self {
        Self::new(BuilderConfig::default())
    }
}
