pub mod rule_node;
pub mod rule_store;
pub mod parameter_source;
pub mod rule_builder;

pub use rule_node::{
    to_rule_object, Criteria, GroupRule, LeafRule, NodeId, Operator, ParseError, RuleNode,
};

pub use rule_store::RuleStore;

pub use parameter_source::{
    load_parameters,        // Awaited fetch into a parameter list
    parse_parameter_list,   // HTTP body decoding
    spawn_parameter_fetch,  // Fire-and-forget fetch
    HttpParameterSource,    // GET-based source
    HttpSourceConfig,       // HTTP source settings
    ParameterError,         // Fetch errors
    ParameterList,          // Fetched names + defaults
    ParameterSource,        // Source trait
    StaticParameterSource,  // Fixed answer source
    DEFAULT_FIELDS,         // Always-offered field names
};

pub use rule_builder::{
    BuilderConfig,          // Builder settings
    BuilderError,           // Builder operation errors
    RuleBuilder,            // Tree builder
    SessionId,              // Builder session identifier
};
