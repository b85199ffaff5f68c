//! Fork-and-memoize parser engine: bundle tree, fragment cache, send
//! validation, and the top-level send algorithm (§4).
//!
//! `skein-core` fixes the data model this crate operates on (tokens,
//! phrases, methods); `skein-rt` supplies the fiber scheduler that
//! backs restriction fan-out. This crate has no knowledge of modules,
//! repositories, or the build orchestrator — that lives in
//! `skein-build`.

pub mod bundle;
pub mod bundle_tree;
pub mod engine;
pub mod error;
pub mod fragment_cache;
pub mod instruction;
pub mod method_table;
pub mod restriction;

pub use bundle::{argument_count, compile_message, Bundle, MessagePart};
pub use bundle_tree::BundleTree;
pub use engine::{Engine, Solution};
pub use error::{BundleTreeError, Describer, MacroOutcome, ParseError, RestrictionOutcome};
pub use fragment_cache::{FragmentCache, Lookup, ParseOwner, Subscription};
pub use instruction::{ConversionRule, DecodeError, ParsingInstruction};
pub use method_table::MethodTable;
pub use restriction::{MacroRunner, PrefixRunner, RestrictionRunner, SendValidator};
