//! Constants shared across the crate.

pub const APP_NAME: &str = "autotick";

/// Number of leading hex characters of a key's SHA-256 used as shard directories.
///
/// Each character becomes one directory level, so a namespace fans out into at most
/// 16 entries per directory over five levels (about 10^6 leaf directories).
pub const SHARD_WIDTH: usize = 5;

/// Extension of every document file on disk.
pub const DOC_EXTENSION: &str = "json";

/// Namespace holding one attribute document per feedstock.
pub const NODE_ATTRS_NS: &str = "node_attrs";

/// Namespace holding the persisted dependency graph.
pub const GRAPH_NS: &str = "graph";

/// Key of the persisted dependency graph inside [`GRAPH_NS`].
pub const GRAPH_KEY: &str = "graph";

/// Namespace holding migration specs produced by a run.
pub const MIGRATIONS_NS: &str = "migrators";

/// Marker key used to embed a reference to another document.
pub const DOC_REF_MARKER: &str = "__lazy_json__";

/// Marker key used to tag an unordered collection.
pub const SET_MARKER: &str = "__set__";

/// Name of the element list inside a tagged set.
pub const SET_ELEMENTS: &str = "elements";

/// Default login of the bot account proposals are opened from.
pub const DEFAULT_BOT_LOGIN: &str = "regro-cf-autotick-bot";

/// Default label that asks for a proposal to be regenerated.
pub const DEFAULT_RERUN_LABEL: &str = "bot-rerun";
